//! Path algorithms over [`GraphStore`]
//!
//! All three queries are blind to persistence and report failure as data: an
//! unreachable target or an unknown endpoint yields an empty result, never an
//! error.
//!
//! Traversal eligibility is shared by every algorithm: an edge can be walked
//! from `A` to `B` when `A` is its source and neither the source nor the
//! connector is blocked (using `cost`), or when the edge is bidirectional,
//! `A` is its target, and neither the target nor the connector is blocked
//! (using `inv_cost`).

use crate::{Gfid, GraphStore, Path, PathStep, GFID_NONE};
use ahash::{AHashMap, AHashSet};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

/// One eligible move out of a vertex.
#[derive(Debug, Clone, Copy)]
struct Traversal {
    to: Gfid,
    connector: Gfid,
    step_cost: f64,
}

/// Frontier entry ordered so the cheapest (and among equals, the earliest
/// discovered) entry pops first.
#[derive(Debug)]
struct FrontierEntry {
    cost: f64,
    seq: u64,
    vertex: Gfid,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert so lower cost wins, then lower seq.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl GraphStore {
    /// Eligible moves out of `from`, in ascending connector order.
    fn traversals_from(
        &self,
        from: Gfid,
        banned_edges: &AHashSet<Gfid>,
        banned_vertices: &AHashSet<Gfid>,
    ) -> Vec<Traversal> {
        let Some(connectors) = self.incident_connectors(from) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for &connector in connectors {
            if banned_edges.contains(&connector) {
                continue;
            }
            let Some(edge) = self.edge(connector) else {
                continue;
            };
            if edge.blocked_from(from) {
                continue;
            }

            let (to, step_cost) = if from == edge.source {
                (edge.target, edge.cost)
            } else if edge.bidirectional && from == edge.target {
                (edge.source, edge.inv_cost)
            } else {
                continue;
            };

            if banned_vertices.contains(&to) {
                continue;
            }
            out.push(Traversal {
                to,
                connector,
                step_cost,
            });
        }
        out
    }

    // ========================================================================
    // Dijkstra
    // ========================================================================

    /// Single-source shortest path from `start` to `end`.
    ///
    /// Ties in accumulated cost break by insertion order (first discovered
    /// wins), so results are deterministic. Empty when either endpoint is not
    /// present or the target is unreachable.
    pub fn dijkstra(&self, start: Gfid, end: Gfid) -> Path {
        self.dijkstra_filtered(start, end, &AHashSet::new(), &AHashSet::new())
    }

    fn dijkstra_filtered(
        &self,
        start: Gfid,
        end: Gfid,
        banned_edges: &AHashSet<Gfid>,
        banned_vertices: &AHashSet<Gfid>,
    ) -> Path {
        if !self.has_vertex(start) || !self.has_vertex(end) {
            return Path::new();
        }
        if start == end {
            return vec![PathStep::new(start, GFID_NONE)];
        }

        let mut dist: AHashMap<Gfid, f64> = AHashMap::new();
        let mut prev: AHashMap<Gfid, (Gfid, Gfid)> = AHashMap::new();
        let mut done: AHashSet<Gfid> = AHashSet::new();
        let mut heap = BinaryHeap::new();
        let mut seq: u64 = 0;

        dist.insert(start, 0.0);
        heap.push(FrontierEntry {
            cost: 0.0,
            seq,
            vertex: start,
        });

        while let Some(entry) = heap.pop() {
            if !done.insert(entry.vertex) {
                continue;
            }
            if entry.vertex == end {
                break;
            }

            for step in self.traversals_from(entry.vertex, banned_edges, banned_vertices) {
                if done.contains(&step.to) {
                    continue;
                }
                let next_cost = entry.cost + step.step_cost;
                // Strict improvement only: equal-cost rediscoveries keep the
                // first predecessor.
                if next_cost < dist.get(&step.to).copied().unwrap_or(f64::INFINITY) {
                    dist.insert(step.to, next_cost);
                    prev.insert(step.to, (entry.vertex, step.connector));
                    seq += 1;
                    heap.push(FrontierEntry {
                        cost: next_cost,
                        seq,
                        vertex: step.to,
                    });
                }
            }
        }

        if !prev.contains_key(&end) {
            return Path::new();
        }

        let mut path = Path::new();
        let mut cursor = end;
        while cursor != start {
            let Some(&(from, connector)) = prev.get(&cursor) else {
                return Path::new();
            };
            path.push(PathStep::new(cursor, connector));
            cursor = from;
        }
        path.push(PathStep::new(start, GFID_NONE));
        path.reverse();
        path
    }

    /// Total cost of a path produced by the algorithms above.
    pub fn path_cost(&self, path: &Path) -> f64 {
        let mut total = 0.0;
        for window in path.windows(2) {
            let from = window[0].vertex;
            let step = window[1];
            if let Some(edge) = self.edge(step.edge) {
                total += if from == edge.source {
                    edge.cost
                } else {
                    edge.inv_cost
                };
            }
        }
        total
    }

    // ========================================================================
    // Yen's k-shortest loopless paths
    // ========================================================================

    /// At most `k` loopless paths from `start` to `end`, ascending by total
    /// cost and pairwise distinct as edge sequences.
    pub fn k_shortest_paths(&self, start: Gfid, end: Gfid, k: usize) -> Vec<Path> {
        if k == 0 {
            return Vec::new();
        }

        let first = self.dijkstra(start, end);
        if first.is_empty() {
            return Vec::new();
        }

        let mut accepted: Vec<Path> = vec![first];
        let mut pending: Vec<(f64, Path)> = Vec::new();

        while accepted.len() < k {
            let last = accepted.last().expect("accepted is never empty").clone();

            // Branch at every vertex of the last accepted path except the end.
            for i in 0..last.len() - 1 {
                let spur_vertex = last[i].vertex;
                let root = &last[..=i];

                // Ban the next edge of every already-accepted path sharing
                // this root, so each spur search finds a genuinely new branch.
                let mut banned_edges: AHashSet<Gfid> = AHashSet::new();
                for path in &accepted {
                    if path.len() > i + 1 && path[..=i] == *root {
                        banned_edges.insert(path[i + 1].edge);
                    }
                }

                // Root vertices (except the spur itself) are off limits to
                // keep candidates loopless.
                let banned_vertices: AHashSet<Gfid> =
                    root[..i].iter().map(|step| step.vertex).collect();

                let spur = self.dijkstra_filtered(spur_vertex, end, &banned_edges, &banned_vertices);
                if spur.is_empty() {
                    continue;
                }

                let mut candidate: Path = root.to_vec();
                candidate.extend_from_slice(&spur[1..]);

                if accepted.iter().any(|p| same_edges(p, &candidate))
                    || pending.iter().any(|(_, p)| same_edges(p, &candidate))
                {
                    continue;
                }

                let cost = self.path_cost(&candidate);
                pending.push((cost, candidate));
            }

            // Pop the cheapest pending candidate; ties keep insertion order.
            let Some(best) = pending
                .iter()
                .enumerate()
                .min_by(|(ai, a), (bi, b)| a.0.total_cmp(&b.0).then_with(|| ai.cmp(bi)))
                .map(|(i, _)| i)
            else {
                break;
            };
            accepted.push(pending.remove(best).1);
        }

        accepted
    }

    // ========================================================================
    // Connected components
    // ========================================================================

    /// Every vertex and edge reachable from the emitter set following only
    /// non-blocked, direction-eligible edges. Emitters not present in the
    /// graph are skipped; an empty emitter set yields an empty result.
    pub fn connected_components(&self, emitters: &[Gfid]) -> Path {
        let banned_edges = AHashSet::new();
        let banned_vertices = AHashSet::new();

        let mut visited: AHashSet<Gfid> = AHashSet::new();
        let mut queue: VecDeque<Gfid> = VecDeque::new();
        let mut result = Path::new();

        for &emitter in emitters {
            if !self.has_vertex(emitter) || !visited.insert(emitter) {
                continue;
            }
            result.push(PathStep::new(emitter, GFID_NONE));
            queue.push_back(emitter);
        }

        while let Some(vertex) = queue.pop_front() {
            for step in self.traversals_from(vertex, &banned_edges, &banned_vertices) {
                if visited.insert(step.to) {
                    result.push(PathStep::new(step.to, step.connector));
                    queue.push_back(step.to);
                }
            }
        }

        result
    }
}

fn same_edges(a: &Path, b: &Path) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.edge == y.edge)
}
