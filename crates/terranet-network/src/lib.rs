//! Terranet network controller
//!
//! [`Network`] owns the in-memory graph, the rule engine, a feature → layer
//! index, and a [`Dataset`] it keeps in lockstep with the graph. Mutations are
//! storage-first: the persistent record is written before the in-memory graph
//! changes, so a storage failure never leaves the graph ahead of the store.
//! Bulk operations (block-all, disconnect-all) go record by record and abort
//! on the first storage failure without rolling back already-applied records.
//!
//! The graph itself loads lazily: the edge records are replayed into the
//! [`GraphStore`] the first time an operation needs them, and never again for
//! the lifetime of the instance.

pub mod error;
pub mod result;

pub use error::{NetworkError, NetworkResult};
pub use result::{PathQuery, PathQueryOptions, PathRecord, ResultKind};

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use terranet_graph::{
    Gfid, GraphStore, Path, BLOCK_CONNECTOR, BLOCK_SOURCE, BLOCK_TARGET, GFID_NONE,
};
use terranet_rules::{Rule, RuleEngine};
use terranet_storage::{
    Dataset, Direction, FeatureRecord, GraphRecord, MetadataRecord, MD_DESCRIPTION, MD_NAME,
    MD_RULE_PREFIX, MD_SRS, MD_VERSION,
};

/// Default rule installed at network creation: everything may connect until
/// the caller says otherwise.
pub const DEFAULT_RULE: &str = "ALLOW CONNECTS ANY";

/// Format version written into new networks.
pub const FORMAT_VERSION: &str = "1.0";

// ============================================================================
// Configuration
// ============================================================================

/// Descriptive metadata persisted when a network is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub description: String,
    /// Spatial reference of the network's features, as an opaque string
    /// (typically WKT or an authority code).
    pub srs: String,
}

/// Whether the edge records have been replayed into the in-memory graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphState {
    Unloaded,
    Loaded,
}

/// A successfully established connection, with any virtual ids resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub source: Gfid,
    pub target: Gfid,
    pub connector: Gfid,
}

// ============================================================================
// Network
// ============================================================================

pub struct Network<D: Dataset> {
    dataset: D,
    name: String,
    description: String,
    version: String,
    srs: String,

    rules: RuleEngine,
    rules_changed: bool,

    graph: GraphStore,
    graph_state: GraphState,

    /// GFID → layer name, mirrored from the features record set.
    feature_layers: AHashMap<Gfid, String>,
    /// Layer names known to the network, used for rule validation.
    layers: BTreeSet<String>,

    /// Next unused non-negative feature id.
    next_gfid: Gfid,
    /// Most recently seen virtual id; allocation pre-decrements, so the first
    /// virtual id handed out is -2.
    last_virtual: Gfid,
}

impl<D: Dataset> Network<D> {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a new network on an empty dataset: persist the descriptive
    /// metadata and install the default [`DEFAULT_RULE`].
    pub fn create(mut dataset: D, config: NetworkConfig) -> NetworkResult<Self> {
        dataset.put_metadata(MetadataRecord::new(MD_NAME, &config.name))?;
        dataset.put_metadata(MetadataRecord::new(MD_DESCRIPTION, &config.description))?;
        dataset.put_metadata(MetadataRecord::new(MD_VERSION, FORMAT_VERSION))?;
        dataset.put_metadata(MetadataRecord::new(MD_SRS, &config.srs))?;

        let mut network = Self {
            dataset,
            name: config.name,
            description: config.description,
            version: FORMAT_VERSION.to_string(),
            srs: config.srs,
            rules: RuleEngine::new(),
            rules_changed: false,
            graph: GraphStore::new(),
            graph_state: GraphState::Loaded, // nothing to load yet
            feature_layers: AHashMap::new(),
            layers: BTreeSet::new(),
            next_gfid: 0,
            last_virtual: GFID_NONE,
        };

        network.rules.add(Rule::parse(DEFAULT_RULE)?);
        network.rules_changed = true;
        network.save_rules()?;
        Ok(network)
    }

    /// Open an existing network: read metadata, replay persisted rules in
    /// ascending `RULE<n>` order, and build the feature → layer index. The
    /// graph stays unloaded until first use.
    pub fn open(dataset: D) -> NetworkResult<Self> {
        let mut name = String::new();
        let mut description = String::new();
        let mut version = String::new();
        let mut srs = String::new();
        let mut rule_texts: BTreeMap<u32, String> = BTreeMap::new();

        for record in dataset.metadata()? {
            match record.key.as_str() {
                MD_NAME => name = record.value,
                MD_DESCRIPTION => description = record.value,
                MD_VERSION => version = record.value,
                MD_SRS => srs = record.value,
                key => {
                    if let Some(n) = key
                        .strip_prefix(MD_RULE_PREFIX)
                        .and_then(|n| n.parse::<u32>().ok())
                    {
                        rule_texts.insert(n, record.value);
                    }
                }
            }
        }

        let mut rules = RuleEngine::new();
        for (n, text) in rule_texts {
            match Rule::parse(&text) {
                Ok(rule) => rules.add(rule),
                Err(err) => warn!(rule = n, %err, "skipping invalid persisted rule"),
            }
        }

        let mut feature_layers = AHashMap::new();
        let mut layers = BTreeSet::new();
        let mut next_gfid: Gfid = 0;
        for record in dataset.feature_records()? {
            next_gfid = next_gfid.max(record.gfid + 1);
            layers.insert(record.layer.clone());
            feature_layers.insert(record.gfid, record.layer);
        }

        Ok(Self {
            dataset,
            name,
            description,
            version,
            srs,
            rules,
            rules_changed: false,
            graph: GraphStore::new(),
            graph_state: GraphState::Unloaded,
            feature_layers,
            layers,
            next_gfid,
            last_virtual: GFID_NONE,
        })
    }

    /// Persist pending rule changes and flush the dataset.
    pub fn close(mut self) -> NetworkResult<()> {
        self.save_rules()?;
        self.dataset.flush()?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn srs(&self) -> &str {
        &self.srs
    }

    // ========================================================================
    // Graph loading
    // ========================================================================

    /// Replay edge records into the in-memory graph if that has not happened
    /// yet. Block bits are re-applied per referenced id, and the lowest seen
    /// virtual id is tracked so later allocations continue below it.
    pub fn ensure_graph_loaded(&mut self) -> NetworkResult<()> {
        if self.graph_state == GraphState::Loaded {
            return Ok(());
        }

        let records = self.dataset.graph_records()?;
        for record in &records {
            self.graph.add_edge(
                record.connector,
                record.source,
                record.target,
                record.direction.is_bidirectional(),
                record.cost,
                record.inv_cost,
            );
            for id in [record.source, record.target, record.connector] {
                if id < self.last_virtual {
                    self.last_virtual = id;
                }
            }
        }

        // Second pass so a block on an id shared across edges lands on every
        // edge regardless of record order.
        for record in &records {
            if record.blocked & BLOCK_SOURCE != 0 {
                self.graph.change_block_state(record.source, true);
            }
            if record.blocked & BLOCK_TARGET != 0 {
                self.graph.change_block_state(record.target, true);
            }
            if record.blocked & BLOCK_CONNECTOR != 0 {
                self.graph.change_block_state(record.connector, true);
            }
        }

        debug!(edges = self.graph.edge_count(), "graph loaded");
        self.graph_state = GraphState::Loaded;
        Ok(())
    }

    pub fn is_graph_loaded(&self) -> bool {
        self.graph_state == GraphState::Loaded
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Direct read access to the underlying dataset.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Establish a connection. Fails on an exact duplicate triple or when the
    /// rule set denies the layer combination; [`GFID_NONE`] endpoints and
    /// connectors get fresh virtual ids. Returns the resolved triple.
    pub fn connect(
        &mut self,
        source: Gfid,
        target: Gfid,
        connector: Gfid,
        cost: f64,
        inv_cost: f64,
        direction: Direction,
    ) -> NetworkResult<Connection> {
        self.ensure_graph_loaded()?;

        // Duplicate check happens before any virtual allocation, on the
        // triple exactly as given.
        if self
            .graph
            .edges()
            .any(|e| e.source == source && e.target == target && e.connector == connector)
        {
            return Err(NetworkError::DuplicateConnection {
                source,
                target,
                connector,
            });
        }

        let src_layer = self.layer_of(source).to_string();
        let tgt_layer = self.layer_of(target).to_string();
        let conn_layer = self.layer_of(connector).to_string();
        if !self.rules.can_connect(&src_layer, &tgt_layer, &conn_layer) {
            return Err(NetworkError::RuleViolation(format!(
                "{} -> {} via {}",
                display_layer(&src_layer),
                display_layer(&tgt_layer),
                display_layer(&conn_layer),
            )));
        }

        let source = self.resolve_virtual(source);
        let target = self.resolve_virtual(target);
        let connector = self.resolve_virtual(connector);

        self.dataset.insert_graph_record(GraphRecord {
            source,
            target,
            connector,
            cost,
            inv_cost,
            direction,
            blocked: 0,
        })?;
        self.graph.add_edge(
            connector,
            source,
            target,
            direction.is_bidirectional(),
            cost,
            inv_cost,
        );

        Ok(Connection {
            source,
            target,
            connector,
        })
    }

    /// Remove the connection with this exact triple.
    pub fn disconnect(&mut self, source: Gfid, target: Gfid, connector: Gfid) -> NetworkResult<()> {
        self.ensure_graph_loaded()?;

        let exists = self
            .graph
            .edge(connector)
            .is_some_and(|e| e.source == source && e.target == target);
        if !exists {
            return Err(NetworkError::NotFound(format!(
                "connection {source} -> {target} via {connector}"
            )));
        }

        self.dataset.delete_graph_record(connector)?;
        self.graph.delete_edge(connector);
        Ok(())
    }

    /// Remove every connection referencing `id` in any role, then forget the
    /// id as a vertex.
    pub fn disconnect_by_id(&mut self, id: Gfid) -> NetworkResult<()> {
        self.ensure_graph_loaded()?;

        let connectors: Vec<Gfid> = self
            .graph
            .edges()
            .filter(|e| e.source == id || e.target == id || e.connector == id)
            .map(|e| e.connector)
            .collect();

        for connector in connectors {
            self.dataset.delete_graph_record(connector)?;
            self.graph.delete_edge(connector);
        }
        self.graph.delete_vertex(id);
        Ok(())
    }

    /// Update cost, inverse cost and direction of an existing connection.
    pub fn reconnect(
        &mut self,
        source: Gfid,
        target: Gfid,
        connector: Gfid,
        cost: f64,
        inv_cost: f64,
        direction: Direction,
    ) -> NetworkResult<()> {
        self.ensure_graph_loaded()?;

        let exists = self
            .graph
            .edge(connector)
            .is_some_and(|e| e.source == source && e.target == target);
        if !exists {
            return Err(NetworkError::NotFound(format!(
                "connection {source} -> {target} via {connector}"
            )));
        }

        let blocked = self
            .dataset
            .graph_records()?
            .into_iter()
            .find(|r| r.connector == connector)
            .map(|r| r.blocked)
            .unwrap_or(0);
        self.dataset.update_graph_record(GraphRecord {
            source,
            target,
            connector,
            cost,
            inv_cost,
            direction,
            blocked,
        })?;
        // The in-memory edge keeps its direction until the next full load;
        // only the weights change here.
        self.graph.change_edge(connector, cost, inv_cost);
        Ok(())
    }

    /// Delete every connection. The graph ends up empty but stays loaded.
    pub fn disconnect_all(&mut self) -> NetworkResult<()> {
        self.ensure_graph_loaded()?;
        for record in self.dataset.graph_records()? {
            self.dataset.delete_graph_record(record.connector)?;
        }
        self.graph.clear();
        Ok(())
    }

    // ========================================================================
    // Blocking
    // ========================================================================

    /// Block or unblock a feature everywhere it appears: its own features
    /// record (real ids only), every graph record referencing it, then the
    /// in-memory graph. Aborts on the first storage failure; records already
    /// written stay written.
    pub fn change_block_state(&mut self, id: Gfid, blocked: bool) -> NetworkResult<()> {
        self.ensure_graph_loaded()?;

        if id >= 0 {
            self.dataset.set_feature_block_state(id, blocked)?;
        }

        for record in self.dataset.graph_records()? {
            let mut mask = record.blocked;
            if record.source == id {
                set_bit(&mut mask, BLOCK_SOURCE, blocked);
            }
            if record.target == id {
                set_bit(&mut mask, BLOCK_TARGET, blocked);
            }
            if record.connector == id {
                set_bit(&mut mask, BLOCK_CONNECTOR, blocked);
            }
            if mask != record.blocked {
                self.dataset.update_graph_record(GraphRecord {
                    blocked: mask,
                    ..record
                })?;
            }
        }

        self.graph.change_block_state(id, blocked);
        Ok(())
    }

    /// Block or unblock the whole network, record by record.
    pub fn change_all_block_state(&mut self, blocked: bool) -> NetworkResult<()> {
        self.ensure_graph_loaded()?;

        for record in self.dataset.feature_records()? {
            if record.blocked != blocked {
                self.dataset.set_feature_block_state(record.gfid, blocked)?;
            }
        }
        let mask = if blocked {
            BLOCK_SOURCE | BLOCK_TARGET | BLOCK_CONNECTOR
        } else {
            0
        };
        for record in self.dataset.graph_records()? {
            if record.blocked != mask {
                self.dataset.update_graph_record(GraphRecord {
                    blocked: mask,
                    ..record
                })?;
            }
        }

        self.graph.change_all_block_state(blocked);
        Ok(())
    }

    // ========================================================================
    // Path queries
    // ========================================================================

    /// Run a path query and materialize its result records. Unreachable
    /// targets and unknown endpoints yield an empty record set.
    pub fn find_path(
        &mut self,
        start: Gfid,
        end: Gfid,
        query: PathQuery,
        options: PathQueryOptions,
    ) -> NetworkResult<Vec<PathRecord>> {
        self.ensure_graph_loaded()?;

        let paths: Vec<Path> = match query {
            PathQuery::Shortest => {
                let path = self.graph.dijkstra(start, end);
                if path.is_empty() {
                    Vec::new()
                } else {
                    vec![path]
                }
            }
            PathQuery::KShortest { k } => {
                let paths = self.graph.k_shortest_paths(start, end, k);
                debug!(k, found = paths.len(), "k-shortest query");
                paths
            }
            PathQuery::ConnectedComponents { mut emitters } => {
                for id in [start, end] {
                    if id != GFID_NONE && !emitters.contains(&id) {
                        emitters.push(id);
                    }
                }
                let reached = self.graph.connected_components(&emitters);
                if reached.is_empty() {
                    Vec::new()
                } else {
                    vec![reached]
                }
            }
        };

        Ok(result::build_records(&paths, &self.feature_layers, options))
    }

    // ========================================================================
    // Rules
    // ========================================================================

    /// Parse and install a rule. Named layers must exist in the network.
    pub fn create_rule(&mut self, text: &str) -> NetworkResult<()> {
        let rule = Rule::parse(text)?;
        for layer in rule.named_layers() {
            if !self.layers.contains(layer) {
                return Err(NetworkError::Validation(format!("unknown layer: {layer}")));
            }
        }
        debug!(rule = rule.text(), "rule added");
        self.rules.add(rule);
        self.rules_changed = true;
        Ok(())
    }

    /// Remove the rule whose canonical text matches `text`.
    pub fn delete_rule(&mut self, text: &str) -> NetworkResult<()> {
        let canonical = Rule::parse(text)?;
        if !self.rules.remove_text(canonical.text()) {
            return Err(NetworkError::NotFound(format!("rule: {}", canonical.text())));
        }
        self.rules_changed = true;
        Ok(())
    }

    pub fn delete_all_rules(&mut self) -> NetworkResult<()> {
        self.rules.clear();
        self.rules_changed = true;
        Ok(())
    }

    /// Canonical texts of the installed rules, in evaluation order.
    pub fn rules(&self) -> Vec<String> {
        self.rules.texts()
    }

    /// Rewrite the persisted rule records if the set changed since the last
    /// save: delete all `RULE*` keys, then re-insert `RULE1..RULEn`.
    pub fn save_rules(&mut self) -> NetworkResult<()> {
        if !self.rules_changed {
            return Ok(());
        }
        self.dataset.delete_metadata_prefix(MD_RULE_PREFIX)?;
        for (i, text) in self.rules.texts().into_iter().enumerate() {
            self.dataset
                .put_metadata(MetadataRecord::new(format!("{}{}", MD_RULE_PREFIX, i + 1), text))?;
        }
        self.rules_changed = false;
        Ok(())
    }

    // ========================================================================
    // Features
    // ========================================================================

    /// Next unused non-negative feature id. Consecutive calls return
    /// consecutive ids.
    pub fn next_global_fid(&mut self) -> Gfid {
        let gfid = self.next_gfid;
        self.next_gfid += 1;
        gfid
    }

    /// Record a feature as part of the network, assigning it to `layer`.
    pub fn register_feature(&mut self, gfid: Gfid, layer: &str) -> NetworkResult<()> {
        if gfid < 0 {
            return Err(NetworkError::Validation(format!(
                "cannot register virtual id {gfid}"
            )));
        }

        self.dataset.insert_feature_record(FeatureRecord {
            gfid,
            layer: layer.to_string(),
            blocked: false,
        })?;
        self.feature_layers.insert(gfid, layer.to_string());
        self.layers.insert(layer.to_string());
        self.next_gfid = self.next_gfid.max(gfid + 1);
        Ok(())
    }

    /// Remove a whole layer from the network: its features records, every
    /// connection referencing one of its features, and every rule naming it.
    pub fn remove_layer_features(&mut self, layer: &str) -> NetworkResult<()> {
        self.ensure_graph_loaded()?;

        let gfids: Vec<Gfid> = self
            .feature_layers
            .iter()
            .filter(|(_, l)| l.as_str() == layer)
            .map(|(&gfid, _)| gfid)
            .collect();

        debug!(layer, features = gfids.len(), "removing layer features");
        for &gfid in &gfids {
            self.disconnect_by_id(gfid)?;
            self.dataset.delete_feature_record(gfid)?;
            self.feature_layers.remove(&gfid);
        }
        self.layers.remove(layer);

        let doomed: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| rule.named_layers().contains(&layer))
            .map(|rule| rule.text().to_string())
            .collect();
        for text in doomed {
            self.rules.remove_text(&text);
            self.rules_changed = true;
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn layer_of(&self, gfid: Gfid) -> &str {
        self.feature_layers
            .get(&gfid)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Allocate a fresh virtual id for [`GFID_NONE`]; pass real and already
    /// virtual ids through unchanged.
    fn resolve_virtual(&mut self, gfid: Gfid) -> Gfid {
        if gfid == GFID_NONE {
            self.last_virtual -= 1;
            self.last_virtual
        } else {
            gfid
        }
    }
}

fn set_bit(mask: &mut u8, bit: u8, on: bool) {
    if on {
        *mask |= bit;
    } else {
        *mask &= !bit;
    }
}

fn display_layer(layer: &str) -> &str {
    if layer.is_empty() {
        "<no layer>"
    } else {
        layer
    }
}
