//! File-backed dataset: a [`MemoryDataset`] snapshotted to a JSON file.
//!
//! Writes mutate the in-memory copy; `flush` serializes the whole dataset
//! back to disk. Good enough for networks in the tens of thousands of edges,
//! which is the scale this engine targets.

use std::fs;
use std::path::{Path, PathBuf};

use terranet_graph::Gfid;

use crate::{
    Dataset, FeatureRecord, GraphRecord, MemoryDataset, MetadataRecord, StorageResult,
};

#[derive(Debug)]
pub struct JsonDataset {
    path: PathBuf,
    inner: MemoryDataset,
}

impl JsonDataset {
    /// Open the dataset at `path`, loading existing records if the file is
    /// present and starting empty otherwise.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            MemoryDataset::new()
        };
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Dataset for JsonDataset {
    fn metadata(&self) -> StorageResult<Vec<MetadataRecord>> {
        self.inner.metadata()
    }

    fn put_metadata(&mut self, record: MetadataRecord) -> StorageResult<()> {
        self.inner.put_metadata(record)
    }

    fn delete_metadata_prefix(&mut self, prefix: &str) -> StorageResult<usize> {
        self.inner.delete_metadata_prefix(prefix)
    }

    fn graph_records(&self) -> StorageResult<Vec<GraphRecord>> {
        self.inner.graph_records()
    }

    fn insert_graph_record(&mut self, record: GraphRecord) -> StorageResult<()> {
        self.inner.insert_graph_record(record)
    }

    fn update_graph_record(&mut self, record: GraphRecord) -> StorageResult<()> {
        self.inner.update_graph_record(record)
    }

    fn delete_graph_record(&mut self, connector: Gfid) -> StorageResult<()> {
        self.inner.delete_graph_record(connector)
    }

    fn feature_records(&self) -> StorageResult<Vec<FeatureRecord>> {
        self.inner.feature_records()
    }

    fn insert_feature_record(&mut self, record: FeatureRecord) -> StorageResult<()> {
        self.inner.insert_feature_record(record)
    }

    fn delete_feature_record(&mut self, gfid: Gfid) -> StorageResult<()> {
        self.inner.delete_feature_record(gfid)
    }

    fn set_feature_block_state(&mut self, gfid: Gfid, blocked: bool) -> StorageResult<()> {
        self.inner.set_feature_block_state(gfid, blocked)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let data = serde_json::to_string_pretty(&self.inner)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}
