//! Local filesystem storage backend.

use super::StorageBackend;
use crate::error::{CoreError, Result};
use std::path::{Path, PathBuf};

/// Local filesystem storage backend.
///
/// Keys are relative paths under the root directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend, creating the root if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of this backend.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == "..") {
            return Err(CoreError::Storage(format!("invalid key: {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

fn not_found_or_io(key: &str, e: std::io::Error) -> CoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CoreError::NotFound(key.to_string())
    } else {
        CoreError::Io(e)
    }
}

impl StorageBackend for LocalStorage {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.key_to_path(key)?;
        std::fs::read(&path).map_err(|e| not_found_or_io(key, e))
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, data)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key)?;
        std::fs::remove_file(&path).map_err(|e| not_found_or_io(key, e))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.key_to_path(key)?;
        Ok(path.exists())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Empty prefix or prefix ending with "/" searches that directory,
        // otherwise the prefix's parent directory.
        let search_dir = if prefix.is_empty() {
            self.root.clone()
        } else if prefix.ends_with('/') {
            self.root.join(prefix)
        } else {
            let prefix_path = self.root.join(prefix);
            prefix_path.parent().unwrap_or(&self.root).to_path_buf()
        };

        if !search_dir.exists() {
            return Ok(vec![]);
        }

        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&search_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative.to_string_lossy().replace('\\', "/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_storage_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path()).unwrap();

        let key = "primary/signature_a.mtx";
        storage.put(key, b"hello world").unwrap();
        assert!(storage.exists(key).unwrap());

        let retrieved = storage.get(key).unwrap();
        assert_eq!(retrieved, b"hello world");

        storage.delete(key).unwrap();
        assert!(!storage.exists(key).unwrap());
    }

    #[test]
    fn test_local_storage_list() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path()).unwrap();

        storage.put("prefix/b.bin", b"b").unwrap();
        storage.put("prefix/a.bin", b"a").unwrap();
        storage.put("other/c.bin", b"c").unwrap();

        let keys = storage.list("prefix/").unwrap();
        assert_eq!(keys, vec!["prefix/a.bin", "prefix/b.bin"]);
    }

    #[test]
    fn test_local_storage_not_found() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path()).unwrap();

        let result = storage.get("nonexistent");
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_local_storage_rejects_parent_traversal() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path()).unwrap();

        assert!(matches!(
            storage.put("../escape.bin", b"x"),
            Err(CoreError::Storage(_))
        ));
    }

    #[test]
    fn test_local_storage_list_empty_prefix() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path()).unwrap();

        storage.put("file1.bin", b"1").unwrap();
        storage.put("file2.bin", b"2").unwrap();

        let keys = storage.list("").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"file1.bin".to_string()));
        assert!(keys.contains(&"file2.bin".to_string()));
    }
}
