//! Path query results
//!
//! Queries produce flat record sets rather than the internal path structure:
//! one record per vertex and/or edge, annotated with the rank of the path it
//! belongs to and the layer its feature lives in (virtual ids have none).

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use terranet_graph::{Gfid, Path, GFID_NONE};

/// Algorithm selector for [`Network::find_path`](crate::Network::find_path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathQuery {
    /// Single cheapest path (Dijkstra).
    Shortest,
    /// Up to `k` loopless paths in ascending cost order (Yen).
    KShortest { k: usize },
    /// Everything reachable from the emitter set. The query's start and end
    /// ids, when given, join the emitters.
    ConnectedComponents { emitters: Vec<Gfid> },
}

/// Which record kinds a query materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathQueryOptions {
    pub include_vertices: bool,
    pub include_edges: bool,
}

impl Default for PathQueryOptions {
    fn default() -> Self {
        Self {
            include_vertices: true,
            include_edges: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Vertex,
    Edge,
}

/// One materialized result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRecord {
    /// Index of the path this record belongs to (0 for single-path queries).
    pub rank: usize,
    pub gfid: Gfid,
    /// Layer of the backing feature; `None` for virtual ids.
    pub layer: Option<String>,
    pub kind: ResultKind,
}

/// Flatten paths into records, resolving layers through the feature index
/// and honoring the include flags. Step order within each path is preserved;
/// a vertex record precedes the edge record that reached it.
pub(crate) fn build_records(
    paths: &[Path],
    feature_layers: &AHashMap<Gfid, String>,
    options: PathQueryOptions,
) -> Vec<PathRecord> {
    let layer_of = |gfid: Gfid| feature_layers.get(&gfid).cloned();

    let mut records = Vec::new();
    for (rank, path) in paths.iter().enumerate() {
        for step in path {
            if options.include_vertices {
                records.push(PathRecord {
                    rank,
                    gfid: step.vertex,
                    layer: layer_of(step.vertex),
                    kind: ResultKind::Vertex,
                });
            }
            if options.include_edges && step.edge != GFID_NONE {
                records.push(PathRecord {
                    rank,
                    gfid: step.edge,
                    layer: layer_of(step.edge),
                    kind: ResultKind::Edge,
                });
            }
        }
    }
    records
}
