use crate::persistence::JsonDataset;
use crate::{
    Dataset, Direction, FeatureRecord, GraphRecord, MemoryDataset, MetadataRecord, StorageError,
    MD_RULE_PREFIX,
};

fn sample_edge(connector: i64) -> GraphRecord {
    GraphRecord {
        source: 1,
        target: 2,
        connector,
        cost: 1.0,
        inv_cost: 1.0,
        direction: Direction::Both,
        blocked: 0,
    }
}

#[test]
fn metadata_put_is_upsert() {
    let mut ds = MemoryDataset::new();
    ds.put_metadata(MetadataRecord::new("name", "water")).unwrap();
    ds.put_metadata(MetadataRecord::new("name", "roads")).unwrap();

    let md = ds.metadata().unwrap();
    assert_eq!(md.len(), 1);
    assert_eq!(md[0].value, "roads");
}

#[test]
fn metadata_prefix_delete_leaves_other_keys() {
    let mut ds = MemoryDataset::new();
    ds.put_metadata(MetadataRecord::new("name", "roads")).unwrap();
    ds.put_metadata(MetadataRecord::new("RULE1", "ALLOW CONNECTS ANY"))
        .unwrap();
    ds.put_metadata(MetadataRecord::new("RULE2", "DENY CONNECTS Wells,Wells"))
        .unwrap();

    let removed = ds.delete_metadata_prefix(MD_RULE_PREFIX).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(ds.metadata().unwrap().len(), 1);
}

#[test]
fn graph_record_update_requires_existing_connector() {
    let mut ds = MemoryDataset::new();
    let err = ds.update_graph_record(sample_edge(100)).unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));

    ds.insert_graph_record(sample_edge(100)).unwrap();
    let mut updated = sample_edge(100);
    updated.cost = 7.5;
    ds.update_graph_record(updated).unwrap();

    let records = ds.graph_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cost, 7.5);
}

#[test]
fn delete_graph_record_reports_missing() {
    let mut ds = MemoryDataset::new();
    ds.insert_graph_record(sample_edge(100)).unwrap();
    ds.delete_graph_record(100).unwrap();
    assert!(matches!(
        ds.delete_graph_record(100),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn feature_block_state_round_trip() {
    let mut ds = MemoryDataset::new();
    ds.insert_feature_record(FeatureRecord {
        gfid: 5,
        layer: "Wells".to_string(),
        blocked: false,
    })
    .unwrap();

    ds.set_feature_block_state(5, true).unwrap();
    assert!(ds.feature_records().unwrap()[0].blocked);
    ds.set_feature_block_state(5, false).unwrap();
    assert!(!ds.feature_records().unwrap()[0].blocked);

    assert!(matches!(
        ds.set_feature_block_state(99, true),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn fail_after_counts_writes() {
    let mut ds = MemoryDataset::new();
    ds.fail_after(2);
    ds.insert_graph_record(sample_edge(100)).unwrap();
    ds.insert_graph_record(sample_edge(101)).unwrap();
    let err = ds.insert_graph_record(sample_edge(102)).unwrap_err();
    assert!(matches!(err, StorageError::WriteFailed(_)));

    // Already-applied writes stay applied.
    assert_eq!(ds.graph_records().unwrap().len(), 2);

    ds.clear_failure();
    ds.insert_graph_record(sample_edge(102)).unwrap();
    assert_eq!(ds.graph_records().unwrap().len(), 3);
}

#[test]
fn json_dataset_round_trips_through_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("network.json");

    {
        let mut ds = JsonDataset::open(&path).unwrap();
        ds.put_metadata(MetadataRecord::new("name", "water")).unwrap();
        ds.insert_graph_record(sample_edge(100)).unwrap();
        ds.insert_feature_record(FeatureRecord {
            gfid: 1,
            layer: "Pipes".to_string(),
            blocked: false,
        })
        .unwrap();
        ds.flush().unwrap();
    }

    let reopened = JsonDataset::open(&path).unwrap();
    assert_eq!(reopened.metadata().unwrap().len(), 1);
    assert_eq!(reopened.graph_records().unwrap().len(), 1);
    assert_eq!(reopened.feature_records().unwrap()[0].layer, "Pipes");
}

#[test]
fn json_dataset_starts_empty_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let ds = JsonDataset::open(dir.path().join("fresh.json")).unwrap();
    assert!(ds.metadata().unwrap().is_empty());
    assert!(ds.graph_records().unwrap().is_empty());
}
