//! Terranet persistent store interface
//!
//! The network core treats persistence as an external collaborator exposing
//! three typed record sets:
//!
//! - **Metadata records**: key/value pairs (name, description, version,
//!   spatial reference, and one record per rule as `RULE1`, `RULE2`, ...).
//! - **Graph records**: one record per edge.
//! - **Features records**: one record per feature participating in the
//!   network, mapping its GFID to a layer name.
//!
//! [`Dataset`] is that collaborator's interface. [`MemoryDataset`] is the
//! reference implementation (with a fault-injection counter so tests can pin
//! partial-failure semantics); [`persistence::JsonDataset`] adds a JSON file
//! behind it for round-trips.

pub mod persistence;

pub use persistence::JsonDataset;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use terranet_graph::Gfid;
use thiserror::Error;

// ============================================================================
// Records
// ============================================================================

/// Well-known metadata keys.
pub const MD_NAME: &str = "name";
pub const MD_DESCRIPTION: &str = "description";
pub const MD_VERSION: &str = "version";
pub const MD_SRS: &str = "srs";
/// Rules persist as `RULE1`, `RULE2`, ... in creation order.
pub const MD_RULE_PREFIX: &str = "RULE";

/// Edge direction as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Both,
}

impl Direction {
    pub fn is_bidirectional(self) -> bool {
        matches!(self, Direction::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub key: String,
    pub value: String,
}

impl MetadataRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One persisted edge, keyed by `connector`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub source: Gfid,
    pub target: Gfid,
    pub connector: Gfid,
    pub cost: f64,
    pub inv_cost: f64,
    pub direction: Direction,
    /// Block bitmask, same bit layout as the in-memory graph.
    pub blocked: u8,
}

/// One feature participating in the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub gfid: Gfid,
    pub layer: String,
    pub blocked: bool,
}

// ============================================================================
// Errors
// ============================================================================

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Dataset interface
// ============================================================================

/// The persistent store collaborator.
///
/// Reads return full snapshots of a record set; writes are single-record.
/// `flush` gives file-backed implementations a durability point and is a
/// no-op by default.
pub trait Dataset {
    // metadata
    fn metadata(&self) -> StorageResult<Vec<MetadataRecord>>;
    /// Insert or replace the record with the same key.
    fn put_metadata(&mut self, record: MetadataRecord) -> StorageResult<()>;
    /// Delete every metadata record whose key starts with `prefix`; returns
    /// the number removed.
    fn delete_metadata_prefix(&mut self, prefix: &str) -> StorageResult<usize>;

    // graph records
    fn graph_records(&self) -> StorageResult<Vec<GraphRecord>>;
    fn insert_graph_record(&mut self, record: GraphRecord) -> StorageResult<()>;
    /// Replace the record with the same connector; `NotFound` if absent.
    fn update_graph_record(&mut self, record: GraphRecord) -> StorageResult<()>;
    /// Delete the record keyed by `connector`; `NotFound` if absent.
    fn delete_graph_record(&mut self, connector: Gfid) -> StorageResult<()>;

    // features records
    fn feature_records(&self) -> StorageResult<Vec<FeatureRecord>>;
    fn insert_feature_record(&mut self, record: FeatureRecord) -> StorageResult<()>;
    fn delete_feature_record(&mut self, gfid: Gfid) -> StorageResult<()>;
    /// Update the block flag on the feature's own record; `NotFound` for an
    /// unknown GFID.
    fn set_feature_block_state(&mut self, gfid: Gfid, blocked: bool) -> StorageResult<()>;

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

// ============================================================================
// MemoryDataset
// ============================================================================

/// In-memory reference implementation of [`Dataset`].
///
/// `fail_after(n)` makes the (n+1)-th subsequent write fail, which is how
/// the partial-failure behavior of bulk operations is pinned in tests.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MemoryDataset {
    metadata: Vec<MetadataRecord>,
    graph: Vec<GraphRecord>,
    features: Vec<FeatureRecord>,
    #[serde(skip)]
    writes_until_failure: Option<u32>,
}

impl MemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the fault injector: the next `n` writes succeed, every write after
    /// that fails with [`StorageError::WriteFailed`].
    pub fn fail_after(&mut self, n: u32) {
        self.writes_until_failure = Some(n);
    }

    /// Disarm the fault injector.
    pub fn clear_failure(&mut self) {
        self.writes_until_failure = None;
    }

    fn check_write(&mut self) -> StorageResult<()> {
        match &mut self.writes_until_failure {
            None => Ok(()),
            Some(0) => Err(StorageError::WriteFailed("injected failure".to_string())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }
}

impl Dataset for MemoryDataset {
    fn metadata(&self) -> StorageResult<Vec<MetadataRecord>> {
        Ok(self.metadata.clone())
    }

    fn put_metadata(&mut self, record: MetadataRecord) -> StorageResult<()> {
        self.check_write()?;
        match self.metadata.iter_mut().find(|r| r.key == record.key) {
            Some(existing) => existing.value = record.value,
            None => self.metadata.push(record),
        }
        Ok(())
    }

    fn delete_metadata_prefix(&mut self, prefix: &str) -> StorageResult<usize> {
        self.check_write()?;
        let before = self.metadata.len();
        self.metadata.retain(|r| !r.key.starts_with(prefix));
        Ok(before - self.metadata.len())
    }

    fn graph_records(&self) -> StorageResult<Vec<GraphRecord>> {
        Ok(self.graph.clone())
    }

    fn insert_graph_record(&mut self, record: GraphRecord) -> StorageResult<()> {
        self.check_write()?;
        self.graph.push(record);
        Ok(())
    }

    fn update_graph_record(&mut self, record: GraphRecord) -> StorageResult<()> {
        self.check_write()?;
        match self
            .graph
            .iter_mut()
            .find(|r| r.connector == record.connector)
        {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "graph record for connector {}",
                record.connector
            ))),
        }
    }

    fn delete_graph_record(&mut self, connector: Gfid) -> StorageResult<()> {
        self.check_write()?;
        let before = self.graph.len();
        self.graph.retain(|r| r.connector != connector);
        if self.graph.len() == before {
            return Err(StorageError::NotFound(format!(
                "graph record for connector {connector}"
            )));
        }
        Ok(())
    }

    fn feature_records(&self) -> StorageResult<Vec<FeatureRecord>> {
        Ok(self.features.clone())
    }

    fn insert_feature_record(&mut self, record: FeatureRecord) -> StorageResult<()> {
        self.check_write()?;
        self.features.push(record);
        Ok(())
    }

    fn delete_feature_record(&mut self, gfid: Gfid) -> StorageResult<()> {
        self.check_write()?;
        let before = self.features.len();
        self.features.retain(|r| r.gfid != gfid);
        if self.features.len() == before {
            return Err(StorageError::NotFound(format!("feature record {gfid}")));
        }
        Ok(())
    }

    fn set_feature_block_state(&mut self, gfid: Gfid, blocked: bool) -> StorageResult<()> {
        self.check_write()?;
        match self.features.iter_mut().find(|r| r.gfid == gfid) {
            Some(record) => {
                record.blocked = blocked;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("feature record {gfid}"))),
        }
    }
}
