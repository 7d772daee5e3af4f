//! The engine context: modules, nodes, edges and the tick loop.
//!
//! All state lives in one [`Network`]. Structural mutations rebuild the
//! derived indices before returning; `step` only reads them. Invalid ids are
//! ignored (logged at debug level) rather than reported.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::connection::{dedup_last_wins, Connection, EdgeView};
use crate::error::ConfigError;
use crate::module::{ModuleDescriptor, ModuleId, ModuleKind, ModuleLink};
use crate::node::{Node, NodeId, NodeKind, THRESHOLD_FLOOR};
use crate::prng::Prng;
use crate::topology::{self, ModuleView};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct EngineConfig {
    pub seed: u64,

    /// Smoothing factor of the per-node firing-rate average.
    pub rate_alpha: f32,
    /// Add a random extra refractory tick on each fire.
    pub refractory_jitter: bool,

    /// Magnitude ceiling for learned weights.
    pub weight_cap: f32,

    // Inhibitory homeostasis.
    pub inhibitory_target_rate: f32,
    pub inhibitory_step: f32,

    pub threshold_floor: f32,
    /// Synaptic scaling only touches weights above this magnitude.
    pub established_weight: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED_0F_5B1C3,
            rate_alpha: 0.01,
            refractory_jitter: true,
            weight_cap: 2.0,
            inhibitory_target_rate: 0.1,
            inhibitory_step: 0.001,
            threshold_floor: THRESHOLD_FLOOR,
            established_weight: 0.1,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.refractory_jitter = false;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_alpha <= 0.0 || self.rate_alpha > 1.0 {
            return Err(ConfigError::Engine("rate_alpha must be in (0, 1]"));
        }
        if self.weight_cap <= 0.0 {
            return Err(ConfigError::Engine("weight_cap must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.inhibitory_target_rate) {
            return Err(ConfigError::Engine("inhibitory_target_rate must be in [0, 1]"));
        }
        if self.inhibitory_step < 0.0 {
            return Err(ConfigError::Engine("inhibitory_step must be >= 0"));
        }
        if self.threshold_floor <= 0.0 {
            return Err(ConfigError::Engine("threshold_floor must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Diagnostics {
    pub tick_count: u64,
    pub module_count: usize,
    pub node_count: usize,
    pub connection_count: usize,
    pub firing_fraction: f32,
    pub avg_potential: f32,
    pub pruned_last_tick: usize,
    pub regrown_last_tick: usize,
}

/// Edge counts and summed |weight| around one module.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Connectivity {
    pub incoming_count: usize,
    pub incoming_weight: f32,
    pub outgoing_count: usize,
    pub outgoing_weight: f32,
    pub internal_count: usize,
    pub internal_weight: f32,
}

/// Lookup tables derived from `modules`, `nodes`, `owner` and `connections`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Index {
    pub node_slot: HashMap<NodeId, usize>,
    pub module_slot: HashMap<ModuleId, usize>,
    /// Node slot -> owning module slot.
    pub node_module: Vec<Option<usize>>,
    /// Module slot -> node slots, in generation order.
    pub members: Vec<Vec<usize>>,
    /// Connection index -> (source slot, target slot).
    pub ends: Vec<(usize, usize)>,
    pub incoming: Vec<Vec<usize>>,
    pub outgoing: Vec<Vec<usize>>,
}

pub struct Network {
    pub(crate) cfg: EngineConfig,
    pub(crate) rng: Prng,
    pub(crate) tick_count: u64,

    pub(crate) next_node_id: NodeId,
    pub(crate) next_module_id: ModuleId,

    pub(crate) modules: Vec<ModuleDescriptor>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) connections: Vec<Connection>,
    /// Explicit node -> module ownership.
    pub(crate) owner: HashMap<NodeId, ModuleId>,
    /// Stored link configs, at most one per ordered module pair.
    pub(crate) links: Vec<ModuleLink>,

    pub(crate) index: Index,

    pub(crate) pruned_last_tick: usize,
    pub(crate) regrown_last_tick: usize,
}

impl Default for Network {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Network {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            rng: Prng::new(cfg.seed),
            cfg,
            tick_count: 0,
            next_node_id: 0,
            next_module_id: 0,
            modules: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            owner: HashMap::new(),
            links: Vec::new(),
            index: Index::default(),
            pruned_last_tick: 0,
            regrown_last_tick: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    // ---------------------------------------------------------------------
    // Queries

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn module(&self, id: ModuleId) -> Option<&ModuleDescriptor> {
        self.index.module_slot.get(&id).map(|&s| &self.modules[s])
    }

    pub fn module_by_name(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// A module's nodes in generation order. Empty for unknown ids.
    pub fn module_nodes(&self, id: ModuleId) -> Vec<&Node> {
        match self.index.module_slot.get(&id) {
            Some(&s) => self.index.members[s].iter().map(|&n| &self.nodes[n]).collect(),
            None => Vec::new(),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index.node_slot.get(&id).map(|&s| &self.nodes[s])
    }

    pub fn module_of(&self, node: NodeId) -> Option<ModuleId> {
        self.owner.get(&node).copied()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn links(&self) -> &[ModuleLink] {
        &self.links
    }

    pub fn incoming_edges(&self, node: NodeId) -> Vec<EdgeView> {
        self.edges_of(node, &self.index.incoming)
    }

    pub fn outgoing_edges(&self, node: NodeId) -> Vec<EdgeView> {
        self.edges_of(node, &self.index.outgoing)
    }

    fn edges_of(&self, node: NodeId, table: &[Vec<usize>]) -> Vec<EdgeView> {
        let Some(&slot) = self.index.node_slot.get(&node) else {
            debug!("edge query for unknown node {}", node);
            return Vec::new();
        };
        table[slot]
            .iter()
            .map(|&ci| EdgeView::from(&self.connections[ci]))
            .collect()
    }

    /// In/out/internal edge counts and |weight| sums for one module.
    pub fn connectivity(&self, id: ModuleId) -> Option<Connectivity> {
        let &slot = self.index.module_slot.get(&id)?;
        let mut out = Connectivity::default();
        for (ci, &(s, t)) in self.index.ends.iter().enumerate() {
            let w = self.connections[ci].weight.abs();
            let from = self.index.node_module[s] == Some(slot);
            let to = self.index.node_module[t] == Some(slot);
            match (from, to) {
                (true, true) => {
                    out.internal_count += 1;
                    out.internal_weight += w;
                }
                (true, false) => {
                    out.outgoing_count += 1;
                    out.outgoing_weight += w;
                }
                (false, true) => {
                    out.incoming_count += 1;
                    out.incoming_weight += w;
                }
                (false, false) => {}
            }
        }
        Some(out)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let n = self.nodes.len();
        let (firing, potential) = self
            .nodes
            .iter()
            .fold((0usize, 0.0f32), |(f, p), node| (f + node.is_firing as usize, p + node.potential));
        Diagnostics {
            tick_count: self.tick_count,
            module_count: self.modules.len(),
            node_count: n,
            connection_count: self.connections.len(),
            firing_fraction: if n == 0 { 0.0 } else { firing as f32 / n as f32 },
            avg_potential: if n == 0 { 0.0 } else { potential / n as f32 },
            pruned_last_tick: self.pruned_last_tick,
            regrown_last_tick: self.regrown_last_tick,
        }
    }

    // ---------------------------------------------------------------------
    // Structural mutations

    /// Create a module and generate its nodes and internal wiring.
    pub fn add_module(&mut self, mut desc: ModuleDescriptor) -> Result<ModuleId, ConfigError> {
        desc.validate()?;
        if self.next_module_id == ModuleId::MAX {
            return Err(ConfigError::Module("module id space exhausted"));
        }
        self.check_node_ids(&desc)?;

        let id = self.next_module_id;
        self.next_module_id += 1;
        desc.id = id;

        let generated = topology::generate(&desc, self.next_node_id, &mut self.rng);
        info!(
            "module {} '{}' added: {:?}, {} nodes, {} internal edges",
            id,
            desc.name,
            desc.kind,
            generated.nodes.len(),
            generated.connections.len()
        );
        self.insert_generated(id, generated);
        self.modules.push(desc);
        self.rebuild_indices();
        self.normalize_sustained_inputs(id);
        Ok(id)
    }

    /// Replace a module's descriptor.
    ///
    /// Geometry or wiring changes regenerate the module and re-apply every
    /// link touching it; parameter-only changes are applied in place.
    /// Returns `Ok(false)` for an unknown id.
    pub fn update_module(&mut self, desc: ModuleDescriptor) -> Result<bool, ConfigError> {
        desc.validate()?;
        let Some(&slot) = self.index.module_slot.get(&desc.id) else {
            debug!("update of unknown module {}", desc.id);
            return Ok(false);
        };

        if self.modules[slot].needs_regeneration(&desc) {
            self.check_node_ids(&desc)?;
            self.regenerate(slot, desc);
        } else {
            self.retune(slot, desc);
        }
        Ok(true)
    }

    fn regenerate(&mut self, slot: usize, desc: ModuleDescriptor) {
        let id = desc.id;
        let relinks = self.links_to_restore(id);

        self.drop_module_nodes(id);
        self.links.retain(|l| !l.touches(id));

        let generated = topology::generate(&desc, self.next_node_id, &mut self.rng);
        info!(
            "module {} '{}' regenerated with {} nodes; restoring {} links",
            id,
            desc.name,
            generated.nodes.len(),
            relinks.len()
        );
        self.insert_generated(id, generated);
        self.modules[slot] = desc;
        self.rebuild_indices();
        self.normalize_sustained_inputs(id);

        for link in relinks {
            self.apply_link(link);
        }
    }

    fn retune(&mut self, slot: usize, desc: ModuleDescriptor) {
        let old = &self.modules[slot];
        let (dx, dy) = (desc.x - old.x, desc.y - old.y);
        let gain_changed = old.sustained_gain != desc.sustained_gain;

        for &ns in &self.index.members[slot] {
            let node = &mut self.nodes[ns];
            node.x += dx;
            node.y += dy;
            node.apply_params(desc.params);
            if node.kind == NodeKind::Sensor {
                node.input_mode = desc.input_mode;
                node.input_frequency = desc.input_frequency;
            }
        }

        let id = desc.id;
        debug!("module {} '{}' retuned in place", id, desc.name);
        self.modules[slot] = desc;
        if gain_changed {
            self.normalize_sustained_inputs(id);
        }
    }

    /// Links to re-apply after `id` is regenerated: stored configs plus
    /// neighbours inferred from live edges that have no stored config.
    fn links_to_restore(&self, id: ModuleId) -> Vec<ModuleLink> {
        let mut out: Vec<ModuleLink> = self.links.iter().filter(|l| l.touches(id)).copied().collect();

        // BTreeMap keeps the re-apply order (and so the rng stream) stable.
        let mut inferred: BTreeMap<(ModuleId, ModuleId), (usize, HashSet<NodeId>)> = BTreeMap::new();
        for (ci, &(s, t)) in self.index.ends.iter().enumerate() {
            let (Some(ms), Some(mt)) = (self.index.node_module[s], self.index.node_module[t]) else {
                continue;
            };
            let (from, to) = (self.modules[ms].id, self.modules[mt].id);
            if from == to || (from != id && to != id) {
                continue;
            }
            if out.iter().any(|l| l.source_id == from && l.target_id == to) {
                continue;
            }
            let entry = inferred.entry((from, to)).or_default();
            entry.0 += 1;
            entry.1.insert(self.connections[ci].source);
        }

        for ((from, to), (edges, sources)) in inferred {
            let Some(&mt) = self.index.module_slot.get(&to) else {
                continue;
            };
            let pool = module_view(&self.modules, &self.nodes, &self.index, mt)
                .input_pool()
                .len()
                .max(1);
            let per_source = edges as f32 / sources.len().max(1) as f32;
            let coverage = (per_source / pool as f32 * 100.0).min(100.0);
            debug!("inferred link {}->{} at {:.1}% coverage", from, to, coverage);
            out.push(ModuleLink::new(from, to, coverage, 0.0));
        }
        out
    }

    pub fn move_module(&mut self, id: ModuleId, x: f32, y: f32) -> bool {
        let Some(&slot) = self.index.module_slot.get(&id) else {
            debug!("move of unknown module {}", id);
            return false;
        };
        let desc = &mut self.modules[slot];
        let (dx, dy) = (x - desc.x, y - desc.y);
        desc.x = x;
        desc.y = y;
        for &ns in &self.index.members[slot] {
            self.nodes[ns].x += dx;
            self.nodes[ns].y += dy;
        }
        true
    }

    pub fn rename_module(&mut self, id: ModuleId, name: &str) -> bool {
        let Some(&slot) = self.index.module_slot.get(&id) else {
            debug!("rename of unknown module {}", id);
            return false;
        };
        self.modules[slot].name = name.to_string();
        true
    }

    /// Remove a module with its nodes, every edge touching them and its link configs.
    pub fn remove_module(&mut self, id: ModuleId) -> bool {
        let Some(&slot) = self.index.module_slot.get(&id) else {
            debug!("removal of unknown module {}", id);
            return false;
        };
        self.drop_module_nodes(id);
        self.links.retain(|l| !l.touches(id));
        let desc = self.modules.remove(slot);
        self.rebuild_indices();
        info!("module {} '{}' removed", id, desc.name);
        true
    }

    /// Wire `link.source_id` to `link.target_id`, replacing any edges between them.
    ///
    /// Returns the number of edges created.
    pub fn connect_modules(&mut self, link: ModuleLink) -> usize {
        let made = self.apply_link(link);
        info!(
            "connected {}->{}: {} edges ({}% coverage, {}% leak, {:?})",
            link.source_id, link.target_id, made, link.coverage, link.leak, link.sides
        );
        made
    }

    /// Remove all edges between two modules (both directions) and their link configs.
    pub fn disconnect_modules(&mut self, a: ModuleId, b: ModuleId) -> usize {
        if !self.index.module_slot.contains_key(&a) || !self.index.module_slot.contains_key(&b) {
            debug!("disconnect of unknown module pair {}<->{}", a, b);
            return 0;
        }
        let removed = self.clear_between(a, b);
        self.links.retain(|l| !is_pair(l, a, b));
        self.rebuild_indices();
        info!("disconnected {}<->{}: {} edges removed", a, b, removed);
        removed
    }

    pub(crate) fn apply_link(&mut self, link: ModuleLink) -> usize {
        let (Some(&a), Some(&b)) = (
            self.index.module_slot.get(&link.source_id),
            self.index.module_slot.get(&link.target_id),
        ) else {
            debug!("link {}->{} names an unknown module", link.source_id, link.target_id);
            return 0;
        };

        let degenerate = {
            let source = module_view(&self.modules, &self.nodes, &self.index, a);
            let target = module_view(&self.modules, &self.nodes, &self.index, b);
            source.output_pool().is_empty() || target.target_pool(link.sides).is_empty()
        };
        if degenerate {
            debug!(
                "link {}->{} has an empty source or target pool; existing wiring kept",
                link.source_id, link.target_id
            );
            return 0;
        }

        self.clear_between(link.source_id, link.target_id);
        self.links.retain(|l| !is_pair(l, link.source_id, link.target_id));

        // Removing edges leaves `members` valid, so the views can be built right away.
        let edges = {
            let source = module_view(&self.modules, &self.nodes, &self.index, a);
            let target = module_view(&self.modules, &self.nodes, &self.index, b);
            topology::link_modules(&source, &target, &link, &mut self.rng)
        };
        if edges.is_empty() {
            debug!("link {}->{} produced no edges", link.source_id, link.target_id);
        }

        let made = edges.len();
        self.connections.extend(edges);
        self.links.push(link);
        self.rebuild_indices();
        self.normalize_sustained_inputs(link.target_id);
        made
    }

    /// Drop edges running between modules `a` and `b` in either direction.
    fn clear_between(&mut self, a: ModuleId, b: ModuleId) -> usize {
        let modules = &self.modules;
        let index = &self.index;
        let keep: Vec<bool> = index
            .ends
            .iter()
            .map(|&(s, t)| {
                let ms = index.node_module[s].map(|m| modules[m].id);
                let mt = index.node_module[t].map(|m| modules[m].id);
                !matches!((ms, mt), (Some(x), Some(y)) if (x == a && y == b) || (x == b && y == a))
            })
            .collect();

        let before = self.connections.len();
        let mut i = 0;
        self.connections.retain(|_| {
            let k = keep[i];
            i += 1;
            k
        });
        before - self.connections.len()
    }

    /// Ids run up to `NodeId::MAX`, which stays reserved.
    fn check_node_ids(&self, desc: &ModuleDescriptor) -> Result<(), ConfigError> {
        let needed = desc.node_count.saturating_mul(desc.columns());
        let room = (NodeId::MAX - self.next_node_id) as usize;
        if needed > room {
            return Err(ConfigError::Module("node id space exhausted"));
        }
        Ok(())
    }

    fn insert_generated(&mut self, module: ModuleId, generated: topology::Generated) {
        self.next_node_id += generated.nodes.len() as NodeId;
        for n in &generated.nodes {
            self.owner.insert(n.id, module);
        }
        self.nodes.extend(generated.nodes);
        self.connections.extend(generated.connections);
    }

    fn drop_module_nodes(&mut self, module: ModuleId) {
        let doomed: HashSet<NodeId> = self
            .owner
            .iter()
            .filter(|(_, &m)| m == module)
            .map(|(&n, _)| n)
            .collect();
        self.nodes.retain(|n| !doomed.contains(&n.id));
        self.connections
            .retain(|c| !doomed.contains(&c.source) && !doomed.contains(&c.target));
        self.owner.retain(|_, m| *m != module);
    }

    /// Every sustained actuator in `module` gets `±gain / incoming` on each input.
    pub(crate) fn normalize_sustained_inputs(&mut self, module: ModuleId) {
        let Some(&slot) = self.index.module_slot.get(&module) else {
            return;
        };
        if !self.modules[slot].is_sustained_output() {
            return;
        }
        let gain = self.modules[slot].sustained_gain;
        for &ns in &self.index.members[slot] {
            if self.nodes[ns].kind != NodeKind::SustainedActuator {
                continue;
            }
            let incoming = &self.index.incoming[ns];
            if incoming.is_empty() {
                continue;
            }
            let w = gain / incoming.len() as f32;
            for &ci in incoming {
                let src = self.index.ends[ci].0;
                self.connections[ci].weight = self.nodes[src].neuron_type().signed(w);
            }
        }
    }

    /// Recompute every lookup table. Edges whose endpoints no longer exist are
    /// dropped, and repeated (source, target) pairs keep the last one.
    pub(crate) fn rebuild_indices(&mut self) {
        let mut index = Index::default();

        for (slot, m) in self.modules.iter().enumerate() {
            index.module_slot.insert(m.id, slot);
        }
        for (slot, n) in self.nodes.iter().enumerate() {
            index.node_slot.insert(n.id, slot);
        }

        let before = self.connections.len();
        self.connections
            .retain(|c| index.node_slot.contains_key(&c.source) && index.node_slot.contains_key(&c.target));
        let dangling = before - self.connections.len();
        let repeated = dedup_last_wins(&mut self.connections);
        if dangling + repeated > 0 {
            debug!("index rebuild dropped {} dangling and {} repeated edges", dangling, repeated);
        }

        index.members = vec![Vec::new(); self.modules.len()];
        index.node_module = Vec::with_capacity(self.nodes.len());
        for (slot, n) in self.nodes.iter().enumerate() {
            let ms = self
                .owner
                .get(&n.id)
                .and_then(|m| index.module_slot.get(m))
                .copied();
            if let Some(ms) = ms {
                index.members[ms].push(slot);
            }
            index.node_module.push(ms);
        }

        index.incoming = vec![Vec::new(); self.nodes.len()];
        index.outgoing = vec![Vec::new(); self.nodes.len()];
        index.ends = Vec::with_capacity(self.connections.len());
        for (ci, c) in self.connections.iter().enumerate() {
            let s = index.node_slot[&c.source];
            let t = index.node_slot[&c.target];
            index.ends.push((s, t));
            index.outgoing[s].push(ci);
            index.incoming[t].push(ci);
        }

        self.index = index;
    }

    // ---------------------------------------------------------------------
    // Non-structural mutations

    /// Drive a sensor node. Returns false when `node` is unknown or not a sensor.
    pub fn set_sensor_input(&mut self, node: NodeId, value: f32) -> bool {
        let Some(&slot) = self.index.node_slot.get(&node) else {
            debug!("sensor input for unknown node {}", node);
            return false;
        };
        let ok = self.nodes[slot].set_input(value);
        if !ok {
            debug!("node {} is not a sensor; input ignored", node);
        }
        ok
    }

    pub fn set_node_label(&mut self, node: NodeId, label: &str) -> bool {
        let Some(&slot) = self.index.node_slot.get(&node) else {
            debug!("label for unknown node {}", node);
            return false;
        };
        self.nodes[slot].label = label.to_string();
        true
    }

    /// Set decay on every node whose decay is not fixed by its kind.
    pub fn set_global_decay(&mut self, decay: f32) -> usize {
        let decay = if decay.is_finite() { decay.clamp(0.0, 1.0) } else { return 0 };
        let mut changed = 0;
        for node in self.nodes.iter_mut().filter(|n| !n.has_fixed_decay()) {
            node.decay = decay;
            changed += 1;
        }
        changed
    }

    /// Clear potentials, timers, rates and the tick counter. Topology and weights are kept.
    pub fn reset_state(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
        for c in &mut self.connections {
            c.signal_strength = 0.0;
        }
        self.tick_count = 0;
        self.pruned_last_tick = 0;
        self.regrown_last_tick = 0;
        info!("network state reset");
    }

    /// Restart the random stream from `seed`, replacing any restored stream.
    pub fn reseed(&mut self, seed: u64) {
        self.cfg.seed = seed;
        self.rng = Prng::new(seed);
        debug!("rng reseeded with {}", seed);
    }

    // ---------------------------------------------------------------------
    // Tick loop

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    pub fn step(&mut self) {
        self.tick_count = self.tick_count.wrapping_add(1);
        self.pruned_last_tick = 0;
        self.regrown_last_tick = 0;

        let tick = self.tick_count;
        for node in &mut self.nodes {
            node.update_sensor(tick, &mut self.rng);
        }

        let sums = self.aggregate_inputs();

        let jitter = self.cfg.refractory_jitter;
        for (node, &sum) in self.nodes.iter_mut().zip(&sums) {
            node.update(sum, jitter, &mut self.rng);
        }

        let alpha = self.cfg.rate_alpha;
        for node in &mut self.nodes {
            node.record_firing_rate(alpha);
        }

        self.learn();
    }

    /// Weighted input per node slot from last tick's activity.
    ///
    /// Edges arriving from a different recurrent module are averaged per
    /// source module, except into sustained actuators whose weights are
    /// already normalized.
    pub(crate) fn aggregate_inputs(&mut self) -> Vec<f32> {
        let nodes = &self.nodes;
        let modules = &self.modules;
        let index = &self.index;
        let connections = &mut self.connections;

        let mut sums = vec![0.0f32; nodes.len()];
        let mut pools: Vec<(usize, f32, u32)> = Vec::new();

        for (slot, target) in nodes.iter().enumerate() {
            if target.kind == NodeKind::Sensor {
                continue;
            }
            let target_module = index.node_module[slot];
            let pooled = target.kind != NodeKind::SustainedActuator;

            let mut total = 0.0f32;
            pools.clear();
            for &ci in &index.incoming[slot] {
                let src_slot = index.ends[ci].0;
                let source = &nodes[src_slot];
                let conn = &mut connections[ci];

                let signal = transmitted(source, target, conn.weight);
                conn.signal_strength = signal.abs();

                match index.node_module[src_slot] {
                    Some(m)
                        if pooled
                            && Some(m) != target_module
                            && modules[m].kind == ModuleKind::Recurrent =>
                    {
                        match pools.iter_mut().find(|p| p.0 == m) {
                            Some(p) => {
                                p.1 += signal;
                                p.2 += 1;
                            }
                            None => pools.push((m, signal, 1)),
                        }
                    }
                    _ => total += signal,
                }
            }
            total += pools.iter().map(|&(_, s, n)| s / n as f32).sum::<f32>();
            sums[slot] = total;
        }
        sums
    }
}

/// Signal an edge delivers this tick.
///
/// Sustained sources only transmit while firing; into a pulse target they
/// additionally need `potential > weight`.
#[inline]
fn transmitted(source: &Node, target: &Node, weight: f32) -> f32 {
    if source.kind == NodeKind::Sensor || !source.is_sustained() {
        return source.activation * weight;
    }
    if !source.is_firing {
        return 0.0;
    }
    if target.is_sustained() || source.potential > weight {
        weight
    } else {
        0.0
    }
}

#[inline]
fn is_pair(link: &ModuleLink, a: ModuleId, b: ModuleId) -> bool {
    (link.source_id == a && link.target_id == b) || (link.source_id == b && link.target_id == a)
}

pub(crate) fn module_view<'a>(
    modules: &'a [ModuleDescriptor],
    nodes: &'a [Node],
    index: &Index,
    slot: usize,
) -> ModuleView<'a> {
    ModuleView {
        desc: &modules[slot],
        nodes: index.members[slot].iter().map(|&n| &nodes[n]).collect(),
    }
}
