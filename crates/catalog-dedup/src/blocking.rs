//! Partitioning catalog items into blocks before hashing.
//!
//! Primary blocks group items by `brand-keyword-resolution`. Items without a
//! complete primary key fall into secondary blocks keyed by bigrams of the
//! last title tokens; such an item can sit in several secondary blocks.
//! Blocks smaller than the configured minimum are folded into the block they
//! overlap most, or into a shared fallback block.

use crate::io::CatalogRecord;
use crate::ItemId;
use catalog_core::Matrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Feature keys holding the display resolution, in lookup order.
pub const RESOLUTION_KEYS: [&str; 4] = [
    "recommended resolution",
    "resolution",
    "native resolution",
    "vertical resolution",
];

/// Display technologies recognised in titles, in lookup order.
pub const KEYWORDS: [&str; 4] = ["led", "lcd", "ledlcd", "plasma"];

/// Key of the block that collects unmergeable small blocks.
pub const FALLBACK_BLOCK: &str = "fallback";

/// A named group of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block key.
    pub key: String,
    /// Item ids in insertion order.
    pub members: Vec<ItemId>,
}

impl Block {
    /// Create a block.
    #[must_use]
    pub fn new(key: impl Into<String>, members: Vec<ItemId>) -> Self {
        Self {
            key: key.into(),
            members,
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the block has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Columns of `matrix` belonging to this block; local column `k` is item
    /// `members[k]`.
    pub fn submatrix<T: Clone>(&self, matrix: &Matrix<T>) -> catalog_core::Result<Matrix<T>> {
        matrix.select_columns(&self.members)
    }
}

/// Blocking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingConfig {
    /// Blocks with fewer members are merged away.
    pub min_block_size: usize,
    /// Trailing title tokens used for secondary bigrams.
    pub title_tail: usize,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            min_block_size: 3,
            title_tail: 5,
        }
    }
}

impl BlockingConfig {
    /// Set the minimum block size.
    #[must_use]
    pub fn with_min_block_size(mut self, size: usize) -> Self {
        self.min_block_size = size;
        self
    }
}

/// Primary and secondary blocks of a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocks {
    /// `brand-keyword-resolution` blocks.
    pub primary: Vec<Block>,
    /// Title-bigram blocks for items without a primary key.
    pub secondary: Vec<Block>,
}

/// Lowercased, whitespace-split title tokens.
#[must_use]
pub fn title_tokens(record: &CatalogRecord) -> Vec<String> {
    record
        .title
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

/// Display resolution of a record: the explicit field, then the known
/// feature keys, then any feature key mentioning "resolution".
#[must_use]
pub fn extract_resolution(record: &CatalogRecord) -> Option<String> {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_lowercase())
    };

    if let Some(resolution) = record.resolution.as_deref().and_then(non_empty) {
        return Some(resolution);
    }

    let features: BTreeMap<String, &str> = record
        .features
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect();

    RESOLUTION_KEYS
        .iter()
        .find_map(|key| features.get(*key).copied().and_then(non_empty))
        .or_else(|| {
            features
                .iter()
                .filter(|(key, _)| key.contains("resolution"))
                .find_map(|(_, value)| non_empty(*value))
        })
}

/// First display keyword present in the title.
#[must_use]
pub fn title_keyword(tokens: &[String]) -> Option<&'static str> {
    KEYWORDS
        .iter()
        .copied()
        .find(|kw| tokens.iter().any(|t| t == kw))
}

/// Primary key `brand-keyword-resolution`, when all three parts are known.
#[must_use]
pub fn primary_key(record: &CatalogRecord) -> Option<String> {
    let brand = record
        .brand
        .as_deref()
        .map(|b| b.trim().to_lowercase())
        .filter(|b| !b.is_empty())?;
    let keyword = title_keyword(&title_tokens(record))?;
    let resolution = extract_resolution(record)?;
    Some(format!("{brand}-{keyword}-{resolution}"))
}

/// Space-joined bigrams of the last `tail` tokens.
#[must_use]
pub fn tail_bigrams(tokens: &[String], tail: usize) -> Vec<String> {
    let start = tokens.len().saturating_sub(tail);
    tokens[start..]
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect()
}

fn collect_blocks(groups: BTreeMap<String, Vec<ItemId>>) -> Vec<Block> {
    groups
        .into_iter()
        .map(|(key, members)| Block::new(key, members))
        .collect()
}

/// Group records by primary key, in key order.
#[must_use]
pub fn primary_blocks(records: &[CatalogRecord]) -> Vec<Block> {
    let mut groups: BTreeMap<String, Vec<ItemId>> = BTreeMap::new();
    for (item, record) in records.iter().enumerate() {
        if let Some(key) = primary_key(record) {
            groups.entry(key).or_default().push(item);
        }
    }
    collect_blocks(groups)
}

/// Bigram blocks over the items that are in none of `primary`.
#[must_use]
pub fn secondary_blocks(records: &[CatalogRecord], primary: &[Block], title_tail: usize) -> Vec<Block> {
    let blocked: BTreeSet<ItemId> = primary.iter().flat_map(|b| b.members.iter().copied()).collect();

    let mut groups: BTreeMap<String, Vec<ItemId>> = BTreeMap::new();
    for (item, record) in records.iter().enumerate() {
        if blocked.contains(&item) {
            continue;
        }
        for bigram in tail_bigrams(&title_tokens(record), title_tail) {
            let members = groups.entry(bigram).or_default();
            if members.last() != Some(&item) {
                members.push(item);
            }
        }
    }
    collect_blocks(groups)
}

/// Attributes compared when merging small blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemAttributes {
    /// Tail bigrams of the title.
    pub bigrams: BTreeSet<String>,
    /// Lowercased brand, empty when unknown.
    pub brand: String,
    /// Lowercased resolution, empty when unknown.
    pub resolution: String,
}

impl ItemAttributes {
    /// Attributes of one record.
    #[must_use]
    pub fn from_record(record: &CatalogRecord, title_tail: usize) -> Self {
        Self {
            bigrams: tail_bigrams(&title_tokens(record), title_tail).into_iter().collect(),
            brand: record.brand.as_deref().unwrap_or_default().trim().to_lowercase(),
            resolution: extract_resolution(record).unwrap_or_default(),
        }
    }

    /// Bigrams, brand and resolution as one set; empty values are left out.
    #[must_use]
    pub fn features(&self) -> BTreeSet<&str> {
        self.bigrams
            .iter()
            .map(String::as_str)
            .chain([self.brand.as_str(), self.resolution.as_str()])
            .filter(|f| !f.is_empty())
            .collect()
    }
}

/// Fold blocks smaller than `min_block_size` into larger ones.
///
/// Blocks are visited in order. A block at or above the minimum is kept. A
/// smaller block joins the kept block with the most members sharing at least
/// one attribute with it (the earliest on ties); without any overlap its
/// members go to the [`FALLBACK_BLOCK`], which is appended last.
///
/// `attributes[item]` describes item `item`; items without an entry have no
/// attributes.
#[must_use]
pub fn merge_small_blocks(blocks: &[Block], attributes: &[ItemAttributes], min_block_size: usize) -> Vec<Block> {
    let empty = ItemAttributes::default();
    let features_of = |item: ItemId| attributes.get(item).unwrap_or(&empty).features();

    let mut merged: Vec<Block> = Vec::new();
    let mut fallback: Vec<ItemId> = Vec::new();

    for block in blocks {
        if block.len() >= min_block_size {
            merged.push(block.clone());
            continue;
        }

        let block_features: BTreeSet<&str> = block.members.iter().flat_map(|&i| features_of(i)).collect();

        let mut best: Option<(usize, usize)> = None;
        for (index, existing) in merged.iter().enumerate() {
            let overlap = existing
                .members
                .iter()
                .filter(|&&i| !features_of(i).is_disjoint(&block_features))
                .count();
            if overlap > best.map_or(0, |(_, o)| o) {
                best = Some((index, overlap));
            }
        }

        match best {
            Some((index, _)) => merged[index].members.extend(&block.members),
            None => fallback.extend(&block.members),
        }
    }

    if !fallback.is_empty() {
        merged.push(Block::new(FALLBACK_BLOCK, fallback));
    }
    merged
}

/// Build primary and secondary blocks and merge the small ones.
#[must_use]
pub fn build_blocks(records: &[CatalogRecord], config: &BlockingConfig) -> Blocks {
    let attributes: Vec<ItemAttributes> = records
        .iter()
        .map(|r| ItemAttributes::from_record(r, config.title_tail))
        .collect();

    let primary = primary_blocks(records);
    let secondary = secondary_blocks(records, &primary, config.title_tail);

    Blocks {
        primary: merge_small_blocks(&primary, &attributes, config.min_block_size),
        secondary: merge_small_blocks(&secondary, &attributes, config.min_block_size),
    }
}
