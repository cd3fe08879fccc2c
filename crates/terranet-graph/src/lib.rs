//! Terranet connectivity graph
//!
//! The graph is an arena of edges keyed by connector GFID plus a secondary
//! index from vertex GFID to the set of incident edge keys. Vertices have no
//! record of their own: a vertex is whatever GFID appears as an edge endpoint.
//! Ownership stays with the arena; everything is referenced by integer key.
//!
//! Blocking is a per-edge bitmask with independent bits for "source endpoint
//! blocked", "target endpoint blocked" and "connector blocked", so parts of an
//! edge can be made non-traversable without deleting it.
//!
//! Pathfinding (Dijkstra, Yen's k-shortest, connected components) lives in
//! [`pathfinding`] and operates purely on this structure.

pub mod pathfinding;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Identifiers and block bits
// ============================================================================

/// Global Feature Identifier.
///
/// Non-negative ids reference features that exist in a persistent layer;
/// negative ids (strictly decreasing from -2) are virtual graph endpoints
/// with no backing feature. [`GFID_NONE`] means "unspecified/absent".
pub type Gfid = i64;

/// Reserved "unspecified/absent" id.
pub const GFID_NONE: Gfid = -1;

pub const BLOCK_NONE: u8 = 0;
pub const BLOCK_SOURCE: u8 = 1 << 0;
pub const BLOCK_TARGET: u8 = 1 << 1;
pub const BLOCK_CONNECTOR: u8 = 1 << 2;
pub const BLOCK_ALL: u8 = BLOCK_SOURCE | BLOCK_TARGET | BLOCK_CONNECTOR;

// ============================================================================
// Edges and paths
// ============================================================================

/// A graph edge, keyed uniquely by its connector GFID.
///
/// `cost` applies when traversing source → target; `inv_cost` applies to the
/// reverse traversal, which is only possible when `bidirectional` is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub connector: Gfid,
    pub source: Gfid,
    pub target: Gfid,
    pub cost: f64,
    pub inv_cost: f64,
    pub bidirectional: bool,
    pub block_mask: u8,
}

impl Edge {
    /// True if some block bit relevant to traversing away from `from` is set.
    fn blocked_from(&self, from: Gfid) -> bool {
        if from == self.source {
            self.block_mask & (BLOCK_SOURCE | BLOCK_CONNECTOR) != 0
        } else {
            self.block_mask & (BLOCK_TARGET | BLOCK_CONNECTOR) != 0
        }
    }
}

/// One step of a path: the vertex reached and the edge used to reach it.
///
/// The first step of a path carries [`GFID_NONE`] as its edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub vertex: Gfid,
    pub edge: Gfid,
}

impl PathStep {
    pub fn new(vertex: Gfid, edge: Gfid) -> Self {
        Self { vertex, edge }
    }
}

/// An ordered sequence of (vertex, edge) steps.
pub type Path = Vec<PathStep>;

// ============================================================================
// GraphStore
// ============================================================================

/// Edge arena plus incident-edge index.
///
/// Incident sets are ordered by connector id so traversal order (and with it
/// tie-breaking in the path algorithms) is deterministic.
#[derive(Debug, Default, Clone)]
pub struct GraphStore {
    edges: AHashMap<Gfid, Edge>,
    incident: AHashMap<Gfid, BTreeSet<Gfid>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the edge keyed by `connector`.
    ///
    /// Callers are responsible for duplicate checks; an overwrite replaces the
    /// previous edge entirely (block bits reset).
    pub fn add_edge(
        &mut self,
        connector: Gfid,
        source: Gfid,
        target: Gfid,
        bidirectional: bool,
        cost: f64,
        inv_cost: f64,
    ) {
        let edge = Edge {
            connector,
            source,
            target,
            cost,
            inv_cost,
            bidirectional,
            block_mask: BLOCK_NONE,
        };

        if let Some(old) = self.edges.insert(connector, edge) {
            self.unindex_edge(&old);
        }

        self.incident.entry(source).or_default().insert(connector);
        self.incident.entry(target).or_default().insert(connector);
    }

    /// Remove the edge keyed by `connector`. No-op if absent.
    pub fn delete_edge(&mut self, connector: Gfid) {
        if let Some(edge) = self.edges.remove(&connector) {
            self.unindex_edge(&edge);
        }
    }

    /// Remove the vertex from adjacency lookups. Edges still referencing it
    /// are left in place; deleting them first is the caller's responsibility.
    pub fn delete_vertex(&mut self, vertex: Gfid) {
        self.incident.remove(&vertex);
    }

    /// Update edge weights in place. Silent no-op when the connector is
    /// unknown (a caller bug, not a recoverable condition).
    pub fn change_edge(&mut self, connector: Gfid, cost: f64, inv_cost: f64) {
        if let Some(edge) = self.edges.get_mut(&connector) {
            edge.cost = cost;
            edge.inv_cost = inv_cost;
        }
    }

    /// Set or clear every block bit associated with `id` across all edges
    /// referencing it, whether as endpoint or as connector.
    pub fn change_block_state(&mut self, id: Gfid, blocked: bool) {
        if let Some(connectors) = self.incident.get(&id) {
            for connector in connectors {
                let Some(edge) = self.edges.get_mut(connector) else {
                    continue;
                };
                if edge.source == id {
                    set_bit(&mut edge.block_mask, BLOCK_SOURCE, blocked);
                }
                if edge.target == id {
                    set_bit(&mut edge.block_mask, BLOCK_TARGET, blocked);
                }
            }
        }

        if let Some(edge) = self.edges.get_mut(&id) {
            set_bit(&mut edge.block_mask, BLOCK_CONNECTOR, blocked);
        }
    }

    /// Set or clear block bits network-wide.
    pub fn change_all_block_state(&mut self, blocked: bool) {
        let mask = if blocked { BLOCK_ALL } else { BLOCK_NONE };
        for edge in self.edges.values_mut() {
            edge.block_mask = mask;
        }
    }

    /// Empty the structure.
    pub fn clear(&mut self) {
        self.edges.clear();
        self.incident.clear();
    }

    pub fn edge(&self, connector: Gfid) -> Option<&Edge> {
        self.edges.get(&connector)
    }

    pub fn has_edge(&self, connector: Gfid) -> bool {
        self.edges.contains_key(&connector)
    }

    pub fn has_vertex(&self, vertex: Gfid) -> bool {
        self.incident.contains_key(&vertex)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.incident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn unindex_edge(&mut self, edge: &Edge) {
        for endpoint in [edge.source, edge.target] {
            if let Some(set) = self.incident.get_mut(&endpoint) {
                set.remove(&edge.connector);
            }
        }
    }

    /// Connectors of edges incident to `vertex`, in ascending connector order.
    pub(crate) fn incident_connectors(&self, vertex: Gfid) -> Option<&BTreeSet<Gfid>> {
        self.incident.get(&vertex)
    }
}

fn set_bit(mask: &mut u8, bit: u8, on: bool) {
    if on {
        *mask |= bit;
    } else {
        *mask &= !bit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_overwrite_edge() {
        let mut g = GraphStore::new();
        g.add_edge(10, 1, 2, false, 1.0, 1.0);
        assert_eq!(g.edge_count(), 1);
        assert!(g.has_vertex(1) && g.has_vertex(2));

        // Overwrite with new endpoints: old index entries must go away.
        g.add_edge(10, 3, 4, true, 2.0, 3.0);
        assert_eq!(g.edge_count(), 1);
        assert!(g.has_vertex(3) && g.has_vertex(4));
        assert!(g.incident_connectors(1).map_or(true, |s| s.is_empty()));

        let e = g.edge(10).unwrap();
        assert_eq!((e.source, e.target), (3, 4));
        assert!(e.bidirectional);
    }

    #[test]
    fn delete_edge_is_idempotent() {
        let mut g = GraphStore::new();
        g.add_edge(10, 1, 2, false, 1.0, 1.0);
        g.delete_edge(10);
        g.delete_edge(10);
        g.delete_edge(99);
        assert!(g.is_empty());
    }

    #[test]
    fn delete_vertex_keeps_edges() {
        let mut g = GraphStore::new();
        g.add_edge(10, 1, 2, false, 1.0, 1.0);
        g.delete_vertex(1);
        assert!(!g.has_vertex(1));
        assert!(g.has_edge(10));
    }

    #[test]
    fn change_edge_unknown_connector_is_noop() {
        let mut g = GraphStore::new();
        g.add_edge(10, 1, 2, false, 1.0, 1.0);
        g.change_edge(99, 5.0, 5.0);
        assert_eq!(g.edge(10).unwrap().cost, 1.0);

        g.change_edge(10, 5.0, 6.0);
        let e = g.edge(10).unwrap();
        assert_eq!((e.cost, e.inv_cost), (5.0, 6.0));
    }

    #[test]
    fn block_state_sets_bits_per_role() {
        let mut g = GraphStore::new();
        g.add_edge(10, 1, 2, true, 1.0, 1.0);

        g.change_block_state(1, true);
        assert_eq!(g.edge(10).unwrap().block_mask, BLOCK_SOURCE);

        g.change_block_state(2, true);
        assert_eq!(g.edge(10).unwrap().block_mask, BLOCK_SOURCE | BLOCK_TARGET);

        g.change_block_state(10, true);
        assert_eq!(g.edge(10).unwrap().block_mask, BLOCK_ALL);

        g.change_block_state(1, false);
        g.change_block_state(2, false);
        g.change_block_state(10, false);
        assert_eq!(g.edge(10).unwrap().block_mask, BLOCK_NONE);
    }

    #[test]
    fn block_state_self_loop_sets_both_endpoint_bits() {
        let mut g = GraphStore::new();
        g.add_edge(10, 7, 7, false, 1.0, 1.0);
        g.change_block_state(7, true);
        assert_eq!(g.edge(10).unwrap().block_mask, BLOCK_SOURCE | BLOCK_TARGET);
    }

    #[test]
    fn change_all_block_state_round_trips() {
        let mut g = GraphStore::new();
        g.add_edge(10, 1, 2, false, 1.0, 1.0);
        g.add_edge(11, 2, 3, true, 1.0, 1.0);

        g.change_all_block_state(true);
        assert!(g.edges().all(|e| e.block_mask == BLOCK_ALL));

        g.change_all_block_state(false);
        assert!(g.edges().all(|e| e.block_mask == BLOCK_NONE));
    }
}
