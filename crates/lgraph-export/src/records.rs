//! Chain-code persistence records.
//!
//! Every region of an LG graph is persisted as one [`ChainCodeRecord`]:
//! the source filename, the region's scan index and its chain code as a
//! comma-joined string (`"0,0,6,6,4,4,2,2"`).
//!
//! Storage itself is the caller's concern. [`RecordStore`] is the
//! interface the caller implements (or picks [`MemoryStore`]) and hands
//! to [`persist_graph`]; nothing in this crate opens a connection or a
//! file.

use std::collections::BTreeMap;

use lgraph_pipeline::LgGraph;
use serde::{Deserialize, Serialize};

/// One persisted chain code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCodeRecord {
    /// Name of the source image.
    pub filename: String,
    /// Scan-order index of the region within its graph.
    pub region_index: usize,
    /// Comma-joined direction codes.
    pub chain_code: String,
}

impl ChainCodeRecord {
    /// Decode [`chain_code`](Self::chain_code) back into direction codes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidChainCode`] if any entry is not a
    /// direction code in `0..=7`.
    pub fn codes(&self) -> Result<Vec<u8>, StoreError> {
        parse_chain_code(&self.chain_code)
    }
}

/// Errors raised while building, storing or decoding records.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A chain-code entry is not a direction code.
    #[error("invalid chain code entry {value:?} at position {position}")]
    InvalidChainCode {
        /// Zero-based entry index.
        position: usize,
        /// The offending text.
        value: String,
    },

    /// The store already holds a record for this region.
    #[error("duplicate record for {filename} region {region_index}")]
    Duplicate {
        /// Source image name.
        filename: String,
        /// Region index.
        region_index: usize,
    },

    /// JSON encoding or decoding failed.
    #[error("record JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A caller-provided store rejected the record.
    #[error("record store failure: {0}")]
    Backend(String),
}

/// Persistence service for chain-code records.
pub trait RecordStore {
    /// Store one record.
    ///
    /// # Errors
    ///
    /// Implementations decide what to reject; [`MemoryStore`] rejects
    /// duplicates with [`StoreError::Duplicate`].
    fn insert(&mut self, record: ChainCodeRecord) -> Result<(), StoreError>;
}

/// An in-memory [`RecordStore`] keyed by `(filename, region_index)`.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<(String, usize), ChainCodeRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up one record.
    #[must_use]
    pub fn get(&self, filename: &str, region_index: usize) -> Option<&ChainCodeRecord> {
        self.records.get(&(filename.to_string(), region_index))
    }

    /// All records, ordered by filename then region index.
    pub fn records(&self) -> impl Iterator<Item = &ChainCodeRecord> {
        self.records.values()
    }
}

impl RecordStore for MemoryStore {
    fn insert(&mut self, record: ChainCodeRecord) -> Result<(), StoreError> {
        let key = (record.filename.clone(), record.region_index);
        if self.records.contains_key(&key) {
            return Err(StoreError::Duplicate {
                filename: record.filename,
                region_index: record.region_index,
            });
        }
        self.records.insert(key, record);
        Ok(())
    }
}

/// One record per node of `graph`, in scan order.
#[must_use]
pub fn records_from_graph(filename: &str, graph: &LgGraph) -> Vec<ChainCodeRecord> {
    graph
        .nodes
        .iter()
        .map(|node| ChainCodeRecord {
            filename: filename.to_string(),
            region_index: node.id,
            chain_code: node.chain_code.to_record_string(),
        })
        .collect()
}

/// Insert every region of `graph` into `store`. Returns the number of
/// records written.
///
/// # Errors
///
/// Stops at and returns the first error raised by the store.
pub fn persist_graph<S: RecordStore + ?Sized>(
    store: &mut S,
    filename: &str,
    graph: &LgGraph,
) -> Result<usize, StoreError> {
    let records = records_from_graph(filename, graph);
    let count = records.len();
    for record in records {
        store.insert(record)?;
    }
    log::debug!("persisted {count} chain codes for {filename}");
    Ok(count)
}

/// Parse a comma-joined chain code. The empty string is an empty chain.
///
/// # Errors
///
/// Returns [`StoreError::InvalidChainCode`] for any entry that is not an
/// integer in `0..=7`.
pub fn parse_chain_code(text: &str) -> Result<Vec<u8>, StoreError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .enumerate()
        .map(|(position, entry)| {
            entry
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|&code| code < 8)
                .ok_or_else(|| StoreError::InvalidChainCode {
                    position,
                    value: entry.to_string(),
                })
        })
        .collect()
}

/// Serialize records as JSON Lines, one object per line.
///
/// # Errors
///
/// Returns [`StoreError::Json`] if serialization fails.
pub fn to_json_lines(records: &[ChainCodeRecord]) -> Result<String, StoreError> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse JSON Lines written by [`to_json_lines`]. Blank lines are
/// skipped.
///
/// # Errors
///
/// Returns [`StoreError::Json`] for a malformed line.
pub fn from_json_lines(text: &str) -> Result<Vec<ChainCodeRecord>, StoreError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StoreError::from))
        .collect()
}
