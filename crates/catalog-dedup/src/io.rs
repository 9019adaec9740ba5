//! Catalog input, matrix persistence and block output.
//!
//! Catalogs are JSONL, one record per line. Matrices are stored as
//! zstd-compressed bincode with an xxh3 checksum over the element payload;
//! block memberships and tuning results are written as JSON.

use crate::blocking::Block;
use crate::{BinaryMatrix, SignatureMatrix};
use catalog_core::hashing::checksum;
use catalog_core::{Compressor, CoreError, LocalStorage, Matrix, StorageBackend, ZstdCompressor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Current on-disk matrix format version.
pub const MATRIX_FORMAT_VERSION: u32 = 1;

/// File extension of stored matrices.
pub const MATRIX_EXTENSION: &str = "mtx";

/// Errors that can occur during I/O operations.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Field '{field}' not found or not a string at line {line}")]
    MissingField { field: String, line: usize },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Core(#[from] CoreError),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Unsupported matrix format version: {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Checksum mismatch for {key}: stored {stored:016x}, computed {computed:016x}")]
    Checksum { key: String, stored: u64, computed: u64 },

    #[error("Invalid block key encoding: {0:?}")]
    InvalidKey(String),
}

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, IoError>;

// =============================================================================
// Catalog records
// =============================================================================

/// One catalog item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogRecord {
    /// Item identifier.
    pub id: String,
    /// Shared identifier of true duplicates; empty when unknown.
    pub model_id: String,
    /// Extracted feature tokens.
    pub tokens: Vec<String>,
    /// Brand name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Product title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Display resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Free-form key/value specifications.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, String>,
}

/// Streaming catalog reader. Blank lines are skipped.
pub struct CatalogReader<R> {
    reader: R,
    line_num: usize,
}

impl CatalogReader<BufReader<File>> {
    /// Open a JSONL catalog file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> CatalogReader<R> {
    /// Read records from any buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_num: 0,
        }
    }
}

impl<R: BufRead> Iterator for CatalogReader<R> {
    type Item = Result<CatalogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();

        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_num += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(parse_record(&line, self.line_num));
                }
                Err(e) => return Some(Err(IoError::Io(e))),
            }
        }
    }
}

fn parse_record(line: &str, line_num: usize) -> Result<CatalogRecord> {
    let json: serde_json::Value = serde_json::from_str(line).map_err(|e| IoError::Parse {
        line: line_num,
        message: e.to_string(),
    })?;

    if !json.get("id").is_some_and(serde_json::Value::is_string) {
        return Err(IoError::MissingField {
            field: "id".to_string(),
            line: line_num,
        });
    }

    serde_json::from_value(json).map_err(|e| IoError::Parse {
        line: line_num,
        message: e.to_string(),
    })
}

/// Read a whole JSONL catalog.
pub fn read_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<CatalogRecord>> {
    CatalogReader::open(path)?.collect()
}

/// Write records as JSONL.
pub fn write_catalog<P: AsRef<Path>>(path: P, records: &[CatalogRecord]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Block keys
// =============================================================================

/// Make a block key safe for file names.
///
/// ASCII letters, digits, `.`, `_` and `-` are kept; every other byte becomes
/// `%XX` (uppercase hex), so distinct keys always give distinct names.
#[must_use]
pub fn encode_block_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for &byte in key.as_bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// Inverse of [`encode_block_key`].
pub fn decode_block_key(encoded: &str) -> Result<String> {
    let invalid = || IoError::InvalidKey(encoded.to_string());
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3).ok_or_else(invalid)?;
            out.push(u8::from_str_radix(hex, 16).map_err(|_| invalid())?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| invalid())
}

// =============================================================================
// Matrix store
// =============================================================================

/// Which matrix of a block is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    /// Token presence matrix.
    Binary,
    /// MinHash signature matrix.
    Signature,
}

impl MatrixKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Binary => "binary_",
            Self::Signature => "signature_",
        }
    }

    /// File name for a block key.
    #[must_use]
    pub fn file_name(self, block_key: &str) -> String {
        format!("{}{}.{MATRIX_EXTENSION}", self.prefix(), encode_block_key(block_key))
    }

    /// Block key of a file name produced by [`MatrixKind::file_name`].
    pub fn block_key(self, file_name: &str) -> Option<String> {
        let encoded = file_name
            .strip_prefix(self.prefix())?
            .strip_suffix(MATRIX_EXTENSION)?
            .strip_suffix('.')?;
        decode_block_key(encoded).ok()
    }
}

/// On-disk matrix envelope.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMatrix {
    version: u32,
    rows: usize,
    cols: usize,
    /// xxh3-64 of `data`.
    checksum: u64,
    /// bincode-encoded row-major elements.
    data: Vec<u8>,
}

fn bincode_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| IoError::Encoding(format!("bincode serialize error: {e}")))
}

fn bincode_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| IoError::Encoding(format!("bincode deserialize error: {e}")))
}

/// Persists matrices under a root directory, optionally grouped into
/// subdirectories (`primary/`, `secondary/`).
pub struct MatrixStore {
    storage: LocalStorage,
    compressor: ZstdCompressor,
}

impl MatrixStore {
    /// Open (and create) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Ok(Self {
            storage: LocalStorage::new(root)?,
            compressor: ZstdCompressor::new(),
        })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    fn storage_key(kind: MatrixKind, group: &str, block_key: &str) -> String {
        let file = kind.file_name(block_key);
        if group.is_empty() {
            file
        } else {
            format!("{group}/{file}")
        }
    }

    /// Store any matrix.
    pub fn save<T: Serialize>(&self, kind: MatrixKind, group: &str, block_key: &str, matrix: &Matrix<T>) -> Result<()> {
        let data = bincode_serialize(matrix.as_slice())?;
        let stored = StoredMatrix {
            version: MATRIX_FORMAT_VERSION,
            rows: matrix.rows(),
            cols: matrix.cols(),
            checksum: checksum(&data),
            data,
        };
        let encoded = bincode_serialize(&stored)?;
        let compressed = self.compressor.compress(&encoded)?;

        let key = Self::storage_key(kind, group, block_key);
        debug!(key = %key, rows = stored.rows, cols = stored.cols, bytes = compressed.len(), "Storing matrix");
        self.storage.put(&key, &compressed)?;
        Ok(())
    }

    /// Load a matrix stored with [`MatrixStore::save`], verifying version and checksum.
    pub fn load<T: DeserializeOwned>(&self, kind: MatrixKind, group: &str, block_key: &str) -> Result<Matrix<T>> {
        let key = Self::storage_key(kind, group, block_key);
        let compressed = self.storage.get(&key)?;
        let stored: StoredMatrix = bincode_deserialize(&self.compressor.decompress(&compressed)?)?;

        if stored.version != MATRIX_FORMAT_VERSION {
            return Err(IoError::Version {
                found: stored.version,
                expected: MATRIX_FORMAT_VERSION,
            });
        }

        let computed = checksum(&stored.data);
        if computed != stored.checksum {
            return Err(IoError::Checksum {
                key,
                stored: stored.checksum,
                computed,
            });
        }

        let data: Vec<T> = bincode_deserialize(&stored.data)?;
        Ok(Matrix::new(stored.rows, stored.cols, data)?)
    }

    /// Store a signature matrix.
    pub fn save_signatures(&self, group: &str, block_key: &str, matrix: &SignatureMatrix) -> Result<()> {
        self.save(MatrixKind::Signature, group, block_key, matrix)
    }

    /// Load a signature matrix.
    pub fn load_signatures(&self, group: &str, block_key: &str) -> Result<SignatureMatrix> {
        self.load(MatrixKind::Signature, group, block_key)
    }

    /// Store a binary matrix.
    pub fn save_binary(&self, group: &str, block_key: &str, matrix: &BinaryMatrix) -> Result<()> {
        self.save(MatrixKind::Binary, group, block_key, matrix)
    }

    /// Load a binary matrix.
    pub fn load_binary(&self, group: &str, block_key: &str) -> Result<BinaryMatrix> {
        self.load(MatrixKind::Binary, group, block_key)
    }

    /// Block keys with a stored matrix of `kind` in `group`, sorted by file name.
    pub fn block_keys(&self, kind: MatrixKind, group: &str) -> Result<Vec<String>> {
        let prefix = if group.is_empty() {
            String::new()
        } else {
            format!("{group}/")
        };
        let keys = self
            .storage
            .list(&prefix)?
            .into_iter()
            .filter_map(|key| {
                let file = key.strip_prefix(&prefix)?;
                kind.block_key(file)
            })
            .collect();
        Ok(keys)
    }
}

// =============================================================================
// JSON output
// =============================================================================

/// Block key → member item identifiers, in member order.
#[must_use]
pub fn block_members(blocks: &[Block], records: &[CatalogRecord]) -> BTreeMap<String, Vec<String>> {
    blocks
        .iter()
        .map(|block| {
            let ids = block
                .members
                .iter()
                .filter_map(|&item| records.get(item).map(|r| r.id.clone()))
                .collect();
            (block.key.clone(), ids)
        })
        .collect()
}

/// Write [`block_members`] as pretty JSON.
pub fn write_block_members<P: AsRef<Path>>(path: P, blocks: &[Block], records: &[CatalogRecord]) -> Result<()> {
    write_json(path, &block_members(blocks, records))
}

/// Read a block membership file.
pub fn read_block_members<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, Vec<String>>> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write any value as pretty JSON.
pub fn write_json<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::{NamedTempFile, TempDir};

    fn create_test_jsonl(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_catalog_basic() {
        let content = r#"{"id": "a", "model_id": "m1", "tokens": ["55inch", "oled"], "brand": "Sony"}
{"id": "b", "tokens": [], "features": {"Resolution": "1080p"}}"#;
        let file = create_test_jsonl(content);
        let records = read_catalog(file.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].model_id, "m1");
        assert_eq!(records[0].brand.as_deref(), Some("Sony"));
        assert_eq!(records[1].model_id, "");
        assert_eq!(records[1].features["Resolution"], "1080p");
    }

    #[test]
    fn test_read_catalog_missing_id() {
        let file = create_test_jsonl("{\"id\": \"a\"}\n{\"tokens\": [\"x\"]}\n");
        match read_catalog(file.path()) {
            Err(IoError::MissingField { field, line }) => {
                assert_eq!(field, "id");
                assert_eq!(line, 2);
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_read_catalog_parse_error() {
        let file = create_test_jsonl("{\"id\": \"a\"}\nnot json\n");
        assert!(matches!(read_catalog(file.path()), Err(IoError::Parse { line: 2, .. })));
    }

    #[test]
    fn test_reader_skips_blank_lines() {
        let input = "\n{\"id\": \"a\"}\n\n{\"id\": \"b\"}\n";
        let ids: Vec<String> = CatalogReader::new(Cursor::new(input))
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_catalog_write_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("catalog.jsonl");
        let records = vec![CatalogRecord {
            id: "x".into(),
            model_id: "m".into(),
            tokens: vec!["t".into()],
            title: Some("LG LED".into()),
            ..CatalogRecord::default()
        }];
        write_catalog(&path, &records).unwrap();
        assert_eq!(read_catalog(&path).unwrap(), records);
    }

    #[test]
    fn test_block_key_encoding() {
        assert_eq!(encode_block_key("sony-led-1080p"), "sony-led-1080p");
        assert_eq!(encode_block_key("bravia 1080p"), "bravia%201080p");
        assert_eq!(encode_block_key("a/b%c"), "a%2Fb%25c");

        for key in ["lg-lcd-1920 x 1080", "ÿ✓ weird/key", "%", "", "../up"] {
            assert_eq!(decode_block_key(&encode_block_key(key)).unwrap(), key);
        }

        // Keys that differ only in replaced characters stay distinct.
        assert_ne!(encode_block_key("a b"), encode_block_key("a_b"));

        assert!(decode_block_key("bad%2").is_err());
        assert!(decode_block_key("bad%zz").is_err());
    }

    #[test]
    fn test_matrix_file_names() {
        let name = MatrixKind::Signature.file_name("a b");
        assert_eq!(name, "signature_a%20b.mtx");
        assert_eq!(MatrixKind::Signature.block_key(&name).as_deref(), Some("a b"));
        assert_eq!(MatrixKind::Binary.block_key(&name), None);
    }

    #[test]
    fn test_matrix_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = MatrixStore::open(tmp.path()).unwrap();

        let signatures = SignatureMatrix::from_rows(vec![vec![1, u64::MAX], vec![3, 4]]).unwrap();
        let binary = BinaryMatrix::from_rows(vec![vec![true, false, true]]).unwrap();

        store.save_signatures("primary", "sony-led 1080p", &signatures).unwrap();
        store.save_binary("primary", "sony-led 1080p", &binary).unwrap();
        store.save_signatures("secondary", "x y", &signatures).unwrap();

        assert_eq!(store.load_signatures("primary", "sony-led 1080p").unwrap(), signatures);
        assert_eq!(store.load_binary("primary", "sony-led 1080p").unwrap(), binary);
        assert_eq!(
            store.block_keys(MatrixKind::Signature, "primary").unwrap(),
            vec!["sony-led 1080p"]
        );
        assert!(tmp.path().join("primary/signature_sony-led%201080p.mtx").exists());
    }

    #[test]
    fn test_matrix_store_missing() {
        let tmp = TempDir::new().unwrap();
        let store = MatrixStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.load_signatures("", "nothing"),
            Err(IoError::Core(CoreError::NotFound(_)))
        ));
    }

    #[test]
    fn test_matrix_store_detects_corruption() {
        let tmp = TempDir::new().unwrap();
        let store = MatrixStore::open(tmp.path()).unwrap();
        let signatures = SignatureMatrix::from_rows(vec![vec![7, 8, 9]]).unwrap();
        store.save_signatures("", "k", &signatures).unwrap();

        // Re-encode the envelope with a wrong checksum.
        let path = tmp.path().join("signature_k.mtx");
        let raw = zstd::decode_all(std::fs::read(&path).unwrap().as_slice());
        let mut stored: StoredMatrix = bincode::deserialize(&raw.unwrap()).unwrap();
        stored.checksum ^= 1;
        let bytes = zstd::encode_all(bincode::serialize(&stored).unwrap().as_slice(), 3).unwrap();
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            store.load_signatures("", "k"),
            Err(IoError::Checksum { .. })
        ));
    }

    #[test]
    fn test_block_members_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("primary_blocks.json");
        let records: Vec<CatalogRecord> = ["p0", "p1", "p2"]
            .iter()
            .map(|id| CatalogRecord {
                id: id.to_string(),
                ..CatalogRecord::default()
            })
            .collect();
        let blocks = vec![Block::new("b", vec![2, 0]), Block::new("a", vec![1])];

        write_block_members(&path, &blocks, &records).unwrap();
        let read = read_block_members(&path).unwrap();
        assert_eq!(read["b"], vec!["p2", "p0"]);
        assert_eq!(read["a"], vec!["p1"]);
    }
}
