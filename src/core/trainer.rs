//! Presents rows of a training set to concept modules.
//!
//! Each mapping ties a column of the data to a module. A cell is split on the
//! mapping's delimiter and every part selects one node of that module, by
//! label first and then by index. Selected nodes are held active for
//! `steps_per_item` ticks, then cleared before the next row.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SnapshotResult;
use crate::module::ModuleId;
use crate::network::Network;
use crate::node::{NodeId, NodeKind};

pub type TrainingRow = BTreeMap<String, serde_json::Value>;

fn default_delimiter() -> String {
    ";".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMapping {
    /// Module name, or its numeric id.
    pub module: String,
    pub column: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSet {
    #[serde(default)]
    pub rows: Vec<TrainingRow>,
    #[serde(default)]
    pub mappings: Vec<ConceptMapping>,
}

impl TrainingSet {
    pub fn load<P: AsRef<Path>>(path: P) -> SnapshotResult<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerConfig {
    pub steps_per_item: u32,
    pub shuffle: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            steps_per_item: 50,
            shuffle: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochStats {
    pub items: usize,
    pub ticks: u64,
    /// Node activations applied across all items.
    pub presented: usize,
    pub seconds: f32,
}

pub struct Trainer {
    set: TrainingSet,
    cfg: TrainerConfig,
}

impl Trainer {
    pub fn new(set: TrainingSet, cfg: TrainerConfig) -> Self {
        Self { set, cfg }
    }

    pub fn rows(&self) -> usize {
        self.set.rows.len()
    }

    /// Run every row once. Row order is shuffled with the network's PRNG when enabled.
    pub fn run_epoch(&self, net: &mut Network) -> EpochStats {
        let mut stats = EpochStats::default();
        if self.set.rows.is_empty() {
            warn!("trainer: no rows to present");
            return stats;
        }

        let mut order: Vec<usize> = (0..self.set.rows.len()).collect();
        if self.cfg.shuffle {
            net.rng.shuffle(&mut order);
        }

        let start = Instant::now();
        for (done, &row) in order.iter().enumerate() {
            stats.presented += self.present(net, &self.set.rows[row]);
            for _ in 0..self.cfg.steps_per_item {
                net.step();
            }
            stats.ticks += self.cfg.steps_per_item as u64;
            self.clear(net);

            if (done + 1) % 10 == 0 {
                debug!("trainer: {}/{} items", done + 1, order.len());
            }
        }
        stats.items = order.len();
        stats.seconds = start.elapsed().as_secs_f32();

        info!(
            "trainer: epoch of {} items ({} ticks) in {:.2}s",
            stats.items, stats.ticks, stats.seconds
        );
        stats
    }

    /// Activate the nodes a row selects. Returns how many were driven.
    pub fn present(&self, net: &mut Network, row: &TrainingRow) -> usize {
        let mut driven = 0;
        for mapping in &self.set.mappings {
            let Some(module) = resolve_module(net, &mapping.module) else {
                debug!("trainer: mapping names unknown module '{}'", mapping.module);
                continue;
            };
            let Some(cell) = row.get(&mapping.column).and_then(cell_text) else {
                continue;
            };

            for part in cell.split(mapping.delimiter.as_str()).map(str::trim) {
                if part.is_empty() {
                    continue;
                }
                match find_concept(net, module, part) {
                    Some(node) => {
                        drive(net, node, true);
                        driven += 1;
                    }
                    None => debug!("trainer: no node '{}' in module {}", part, module),
                }
            }
        }
        driven
    }

    /// Silence every node of every mapped module.
    pub fn clear(&self, net: &mut Network) {
        for mapping in &self.set.mappings {
            if let Some(module) = resolve_module(net, &mapping.module) {
                let ids: Vec<NodeId> = net.module_nodes(module).iter().map(|n| n.id).collect();
                for id in ids {
                    drive(net, id, false);
                }
            }
        }
    }
}

fn resolve_module(net: &Network, key: &str) -> Option<ModuleId> {
    if let Some(m) = net.module_by_name(key) {
        return Some(m.id);
    }
    let id: ModuleId = key.trim().parse().ok()?;
    net.module(id).map(|m| m.id)
}

fn cell_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Node in `module` labelled `part`, else the node at index `part`.
fn find_concept(net: &Network, module: ModuleId, part: &str) -> Option<NodeId> {
    let nodes = net.module_nodes(module);
    if let Some(n) = nodes.iter().find(|n| n.label == part) {
        return Some(n.id);
    }
    let idx: usize = part.parse().ok()?;
    nodes.get(idx).map(|n| n.id)
}

/// Sensors are held through their input; other nodes get a one-shot spike.
fn drive(net: &mut Network, node: NodeId, on: bool) {
    let Some(&slot) = net.index.node_slot.get(&node) else {
        return;
    };
    let n = &mut net.nodes[slot];
    if n.kind == NodeKind::Sensor {
        n.set_input(if on { 1.0 } else { 0.0 });
        return;
    }
    if on {
        n.activation = 1.0;
        n.potential = 1.0f32.min(n.max_potential);
        n.is_firing = true;
    } else {
        n.activation = 0.0;
        n.potential = 0.0;
        n.is_firing = false;
    }
}
