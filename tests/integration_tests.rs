//! Integration tests across the Terranet crates
//!
//! These exercise full workflows end to end:
//! - create → register features → connect → path queries
//! - rule enforcement at connect time
//! - block state propagating storage → graph → query results
//! - close → reopen round-trips through a JSON-backed dataset
//!
//! Run with: cargo test --test integration_tests

use anyhow::Result;
use tempfile::tempdir;

use terranet_graph::{Gfid, GFID_NONE};
use terranet_network::{
    Network, NetworkConfig, NetworkError, PathQuery, PathQueryOptions, PathRecord, ResultKind,
};
use terranet_storage::{Dataset, Direction, JsonDataset, MemoryDataset};

fn gfids(records: &[PathRecord]) -> Vec<Gfid> {
    records.iter().map(|r| r.gfid).collect()
}

/// Vertices A=1, B=2, C=3; pipes C1=101 (A→B, forward, cost 1) and
/// C2=102 (B→C, bidirectional, cost 1 / inverse 2).
fn pipeline_network() -> Result<Network<MemoryDataset>> {
    let mut net = Network::create(
        MemoryDataset::new(),
        NetworkConfig {
            name: "pipeline".to_string(),
            description: "three wells and two pipes".to_string(),
            srs: "EPSG:4326".to_string(),
        },
    )?;

    for gfid in [1, 2, 3] {
        net.register_feature(gfid, "Wells")?;
    }
    for gfid in [101, 102] {
        net.register_feature(gfid, "Pipes")?;
    }

    net.connect(1, 2, 101, 1.0, 1.0, Direction::Forward)?;
    net.connect(2, 3, 102, 1.0, 2.0, Direction::Both)?;
    Ok(net)
}

// ============================================================================
// Shortest path end to end
// ============================================================================

#[test]
fn shortest_path_through_the_pipeline() -> Result<()> {
    let mut net = pipeline_network()?;

    let records = net.find_path(1, 3, PathQuery::Shortest, PathQueryOptions::default())?;
    assert_eq!(gfids(&records), vec![1, 2, 101, 3, 102]);
    assert_eq!(records[0].kind, ResultKind::Vertex);
    assert_eq!(records[2].kind, ResultKind::Edge);
    assert_eq!(records[2].layer.as_deref(), Some("Pipes"));

    // C1 is forward only: no route back from C to A.
    let reverse = net.find_path(3, 1, PathQuery::Shortest, PathQueryOptions::default())?;
    assert!(reverse.is_empty());
    Ok(())
}

#[test]
fn blocking_a_connector_breaks_the_route_until_unblocked() -> Result<()> {
    let mut net = pipeline_network()?;

    net.change_block_state(101, true)?;
    assert!(net
        .find_path(1, 3, PathQuery::Shortest, PathQueryOptions::default())?
        .is_empty());

    net.change_block_state(101, false)?;
    let records = net.find_path(1, 3, PathQuery::Shortest, PathQueryOptions::default())?;
    assert_eq!(gfids(&records), vec![1, 2, 101, 3, 102]);
    Ok(())
}

// ============================================================================
// Rules
// ============================================================================

#[test]
fn deny_rule_forbids_the_named_layer_pair() -> Result<()> {
    let mut net = Network::create(
        MemoryDataset::new(),
        NetworkConfig {
            name: "city".to_string(),
            ..NetworkConfig::default()
        },
    )?;
    net.register_feature(10, "Roads")?;
    net.register_feature(11, "Roads")?;
    net.register_feature(20, "Wells")?;

    net.create_rule("DENY CONNECTS Roads,Roads")?;

    let denied = net.connect(10, 11, GFID_NONE, 1.0, 1.0, Direction::Both);
    assert!(matches!(denied, Err(NetworkError::RuleViolation(_))));

    // Roads → Wells is untouched by the deny rule.
    net.connect(10, 20, GFID_NONE, 1.0, 1.0, Direction::Both)?;
    Ok(())
}

#[test]
fn an_empty_rule_set_denies_everything() -> Result<()> {
    let mut net = pipeline_network()?;
    net.delete_all_rules()?;

    let denied = net.connect(1, 3, GFID_NONE, 1.0, 1.0, Direction::Both);
    assert!(matches!(denied, Err(NetworkError::RuleViolation(_))));
    Ok(())
}

// ============================================================================
// Multi-path queries
// ============================================================================

#[test]
fn k_shortest_ranks_paths_by_cost() -> Result<()> {
    let mut net = Network::create(
        MemoryDataset::new(),
        NetworkConfig {
            name: "grid".to_string(),
            ..NetworkConfig::default()
        },
    )?;
    for gfid in [1, 2, 3, 4] {
        net.register_feature(gfid, "Junctions")?;
    }
    net.connect(1, 2, GFID_NONE, 1.0, 1.0, Direction::Forward)?;
    net.connect(2, 4, GFID_NONE, 1.0, 1.0, Direction::Forward)?;
    net.connect(1, 3, GFID_NONE, 2.0, 2.0, Direction::Forward)?;
    net.connect(3, 4, GFID_NONE, 2.0, 2.0, Direction::Forward)?;

    let records = net.find_path(
        1,
        4,
        PathQuery::KShortest { k: 3 },
        PathQueryOptions {
            include_vertices: true,
            include_edges: false,
        },
    )?;

    let rank0: Vec<Gfid> = records.iter().filter(|r| r.rank == 0).map(|r| r.gfid).collect();
    let rank1: Vec<Gfid> = records.iter().filter(|r| r.rank == 1).map(|r| r.gfid).collect();
    assert_eq!(rank0, vec![1, 2, 4]);
    assert_eq!(rank1, vec![1, 3, 4]);
    assert!(records.iter().all(|r| r.rank < 2));
    Ok(())
}

#[test]
fn connected_components_cover_each_island_once() -> Result<()> {
    let mut net = pipeline_network()?;
    // Disconnected island: two extra wells joined by a virtual connector.
    net.register_feature(8, "Wells")?;
    net.register_feature(9, "Wells")?;
    net.connect(8, 9, GFID_NONE, 1.0, 1.0, Direction::Both)?;

    let records = net.find_path(
        1,
        8,
        PathQuery::ConnectedComponents { emitters: vec![] },
        PathQueryOptions {
            include_vertices: true,
            include_edges: false,
        },
    )?;
    let mut reached = gfids(&records);
    reached.sort_unstable();
    assert_eq!(reached, vec![1, 2, 3, 8, 9]);
    Ok(())
}

// ============================================================================
// Persistence round-trips
// ============================================================================

#[test]
fn network_survives_close_and_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("pipeline.json");

    {
        let mut net = Network::create(
            JsonDataset::open(&path)?,
            NetworkConfig {
                name: "pipeline".to_string(),
                description: "persisted".to_string(),
                srs: "EPSG:4326".to_string(),
            },
        )?;
        for gfid in [1, 2, 3] {
            net.register_feature(gfid, "Wells")?;
        }
        net.register_feature(101, "Pipes")?;
        net.register_feature(102, "Pipes")?;
        net.connect(1, 2, 101, 1.0, 1.0, Direction::Forward)?;
        net.connect(2, 3, 102, 1.0, 2.0, Direction::Both)?;
        net.create_rule("DENY CONNECTS Wells,Wells,Pipes")?;
        net.change_block_state(102, true)?;
        net.close()?;
    }

    let mut reopened = Network::open(JsonDataset::open(&path)?)?;
    assert_eq!(reopened.name(), "pipeline");
    assert_eq!(reopened.srs(), "EPSG:4326");
    assert_eq!(
        reopened.rules(),
        vec![
            "ALLOW CONNECTS ANY".to_string(),
            "DENY CONNECTS Wells,Wells,Pipes".to_string(),
        ]
    );

    // Graph loads lazily and comes back isomorphic, block bit included.
    assert!(!reopened.is_graph_loaded());
    assert!(reopened
        .find_path(1, 3, PathQuery::Shortest, PathQueryOptions::default())?
        .is_empty());
    reopened.change_block_state(102, false)?;
    let records =
        reopened.find_path(1, 3, PathQuery::Shortest, PathQueryOptions::default())?;
    assert_eq!(gfids(&records), vec![1, 2, 101, 3, 102]);

    // The replayed deny rule names a Pipes connector, so a registered pipe
    // is refused while a layerless virtual connector still passes.
    assert!(matches!(
        reopened.connect(1, 3, 102, 1.0, 1.0, Direction::Both),
        Err(NetworkError::RuleViolation(_))
    ));
    reopened.connect(1, 3, GFID_NONE, 1.0, 1.0, Direction::Both)?;
    Ok(())
}

#[test]
fn virtual_ids_stay_unique_across_sessions() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("virtuals.json");

    let first = {
        let mut net = Network::create(
            JsonDataset::open(&path)?,
            NetworkConfig {
                name: "virtuals".to_string(),
                ..NetworkConfig::default()
            },
        )?;
        net.register_feature(1, "Wells")?;
        let conn = net.connect(1, GFID_NONE, GFID_NONE, 1.0, 1.0, Direction::Both)?;
        assert_eq!(conn.target, -2);
        assert_eq!(conn.connector, -3);
        net.close()?;
        conn
    };

    let mut reopened = Network::open(JsonDataset::open(&path)?)?;
    let next = reopened.connect(1, GFID_NONE, GFID_NONE, 1.0, 1.0, Direction::Both)?;
    assert!(next.target < first.connector);
    assert!(next.connector < next.target);
    Ok(())
}

#[test]
fn rule_rewrite_renumbers_persisted_records() -> Result<()> {
    let mut net = pipeline_network()?;
    net.create_rule("DENY CONNECTS Wells,Wells,Pipes")?;
    net.create_rule("ALLOW CONNECTS Pipes,Pipes")?;
    net.delete_rule("deny connects Wells , Wells , Pipes")?;
    net.save_rules()?;

    let mut rule_keys: Vec<(String, String)> = net
        .dataset()
        .metadata()?
        .into_iter()
        .filter(|r| r.key.starts_with("RULE"))
        .map(|r| (r.key, r.value))
        .collect();
    rule_keys.sort();
    assert_eq!(
        rule_keys,
        vec![
            ("RULE1".to_string(), "ALLOW CONNECTS ANY".to_string()),
            ("RULE2".to_string(), "ALLOW CONNECTS Pipes,Pipes".to_string()),
        ]
    );
    Ok(())
}
