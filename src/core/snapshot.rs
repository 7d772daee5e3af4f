//! Flat snapshot format and the compressed network image.
//!
//! The JSON form is the interchange format consumed by editors and the
//! headless runner. The image form wraps the same JSON in an LZ4 block behind
//! a magic/version header for checkpoints.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::{SnapshotError, SnapshotResult};
use crate::module::{ModuleDescriptor, ModuleId, ModuleLink};
use crate::network::{EngineConfig, Network};
use crate::node::{ActivationMode, NeuronType, Node, NodeId, NodeKind, NodeParams};
use crate::prng::Prng;
use crate::storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: NodeKind,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub activation_mode: ActivationMode,
    #[serde(default)]
    pub potential: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<ModuleId>,
    #[serde(default)]
    pub neuron_type: NeuronType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: String,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub weight: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
    #[serde(default)]
    pub module_link_configs: Vec<(String, ModuleLink)>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_state: Option<u64>,
}

impl NetworkSnapshot {
    pub fn to_json(&self) -> SnapshotResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> SnapshotResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Network {
    pub fn to_snapshot(&self) -> NetworkSnapshot {
        let nodes = self
            .nodes
            .iter()
            .map(|n| NodeRecord {
                id: n.id,
                kind: n.kind,
                x: n.x,
                y: n.y,
                label: n.label.clone(),
                activation_mode: n.activation_mode,
                potential: n.potential,
                module_id: self.owner.get(&n.id).copied(),
                neuron_type: n.neuron_type(),
            })
            .collect();

        let connections = self
            .connections
            .iter()
            .map(|c| ConnectionRecord {
                id: c.id().to_string(),
                source_id: c.source,
                target_id: c.target,
                weight: c.weight,
            })
            .collect();

        NetworkSnapshot {
            modules: self.modules.clone(),
            nodes,
            connections,
            module_link_configs: self.links.iter().map(|l| (l.key(), *l)).collect(),
            tick_count: Some(self.tick_count),
            rng_state: Some(self.rng.state()),
        }
    }

    /// Rebuild a network from a snapshot.
    ///
    /// Garbage is filtered rather than rejected: duplicate or reserved ids,
    /// edges to missing nodes and non-finite weights are dropped with a
    /// warning. A node's kind and parameters come from its module's
    /// descriptor; only the fields carried by the record are taken from it.
    /// Records without `moduleId` are assigned to modules in order, each
    /// module taking `node_count × columns` of them.
    pub fn from_snapshot(snapshot: NetworkSnapshot, cfg: EngineConfig) -> Self {
        let mut net = Network::new(cfg);

        let mut seen_modules = HashSet::new();
        for desc in snapshot.modules {
            if desc.id == ModuleId::MAX {
                warn!("snapshot: module with reserved id {} dropped", desc.id);
                continue;
            }
            if !seen_modules.insert(desc.id) {
                warn!("snapshot: duplicate module {} dropped", desc.id);
                continue;
            }
            if let Err(e) = desc.validate() {
                warn!("snapshot: module {} kept despite {}", desc.id, e);
            }
            net.modules.push(desc);
        }
        let module_slot: HashMap<ModuleId, usize> =
            net.modules.iter().enumerate().map(|(slot, m)| (m.id, slot)).collect();

        let mut records = Vec::with_capacity(snapshot.nodes.len());
        let mut seen_nodes = HashSet::new();
        for rec in snapshot.nodes {
            if rec.id == NodeId::MAX {
                warn!("snapshot: node with reserved id {} dropped", rec.id);
                continue;
            }
            if !seen_nodes.insert(rec.id) {
                warn!("snapshot: duplicate node {} dropped", rec.id);
                continue;
            }
            records.push(rec);
        }

        let placement = if records.iter().any(|r| r.module_id.is_some()) {
            placement_by_id(&net.modules, &module_slot, &records)
        } else {
            placement_by_order(&net.modules, records.len())
        };

        let mut nodes = Vec::with_capacity(records.len());
        let mut owner = HashMap::new();
        for (rec, place) in records.into_iter().zip(placement) {
            let desc = place.map(|(slot, column)| (&net.modules[slot], column));
            if let Some((desc, _)) = desc {
                owner.insert(rec.id, desc.id);
            }
            nodes.push(restore_node(rec, desc));
        }

        let mut dropped = 0usize;
        let mut mislabelled = 0usize;
        let connections: Vec<Connection> = snapshot
            .connections
            .into_iter()
            .filter_map(|c| {
                let ok = c.weight.is_finite() && seen_nodes.contains(&c.source_id) && seen_nodes.contains(&c.target_id);
                if !ok {
                    dropped += 1;
                    return None;
                }
                let id = ConnectionId::new(c.source_id, c.target_id);
                if parse_connection_id(&c.id) != Some(id) {
                    mislabelled += 1;
                }
                Some(Connection::new(c.source_id, c.target_id, c.weight))
            })
            .collect();
        if dropped > 0 {
            warn!("snapshot: {} connections with missing endpoints or bad weights dropped", dropped);
        }
        if mislabelled > 0 {
            warn!("snapshot: {} connection ids disagree with their endpoints; endpoints used", mislabelled);
        }

        let mut links: Vec<ModuleLink> = Vec::new();
        for (key, link) in snapshot.module_link_configs {
            if !seen_modules.contains(&link.source_id) || !seen_modules.contains(&link.target_id) {
                warn!("snapshot: link config {} names a missing module; dropped", key);
                continue;
            }
            links.retain(|l| !(l.source_id == link.source_id && l.target_id == link.target_id));
            links.push(link);
        }

        // Reserved ids were dropped above, so `+ 1` cannot overflow.
        net.next_module_id = net.modules.iter().map(|m| m.id + 1).max().unwrap_or(0);
        net.next_node_id = nodes.iter().map(|n| n.id + 1).max().unwrap_or(0);
        net.nodes = nodes;
        net.owner = owner;
        net.connections = connections;
        net.links = links;
        net.tick_count = snapshot.tick_count.unwrap_or(0);
        if let Some(state) = snapshot.rng_state {
            net.rng = Prng::from_state(state);
        }
        net.rebuild_indices();

        info!(
            "snapshot loaded: {} modules, {} nodes, {} connections",
            net.modules.len(),
            net.nodes.len(),
            net.connections.len()
        );
        net
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> SnapshotResult<()> {
        let text = self.to_snapshot().to_json()?;
        fs::write(path.as_ref(), text)?;
        info!("snapshot saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P, cfg: EngineConfig) -> SnapshotResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let snapshot = NetworkSnapshot::from_json(&text)?;
        Ok(Self::from_snapshot(snapshot, cfg))
    }

    /// Write a compressed network image: magic, version, LZ4 block of the snapshot JSON.
    pub fn save_image_to<W: Write>(&self, w: &mut W) -> SnapshotResult<()> {
        let payload = serde_json::to_vec(&self.to_snapshot())?;
        w.write_all(storage::MAGIC)?;
        storage::write_u32_le(w, storage::VERSION_CURRENT)?;
        storage::write_lz4_block(w, &payload)?;
        Ok(())
    }

    pub fn load_image_from<R: Read>(r: &mut R, cfg: EngineConfig) -> SnapshotResult<Self> {
        let magic = storage::read_exact::<8, _>(r)?;
        if &magic != storage::MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = storage::read_u32_le(r)?;
        if version != storage::VERSION_V1 {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let payload = storage::read_lz4_block(r).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => SnapshotError::Decompress,
            _ => SnapshotError::Io(e),
        })?;
        let snapshot: NetworkSnapshot = serde_json::from_slice(&payload)?;
        Ok(Self::from_snapshot(snapshot, cfg))
    }

    /// Exact size in bytes of the current network image.
    pub fn image_size_bytes(&self) -> SnapshotResult<usize> {
        let mut cw = storage::CountingWriter::new();
        self.save_image_to(&mut cw)?;
        Ok(cw.written())
    }
}

/// Module slot and column per record, from each record's `moduleId`.
fn placement_by_id(
    modules: &[ModuleDescriptor],
    module_slot: &HashMap<ModuleId, usize>,
    records: &[NodeRecord],
) -> Vec<Option<(usize, usize)>> {
    records
        .iter()
        .map(|rec| {
            let module = rec.module_id?;
            let Some(&slot) = module_slot.get(&module) else {
                warn!("snapshot: node {} names a missing module; kept unowned", rec.id);
                return None;
            };
            Some((slot, column_at(&modules[slot], rec.x)))
        })
        .collect()
}

/// Module slot and column per record when no record names its module:
/// modules claim consecutive records in order.
fn placement_by_order(modules: &[ModuleDescriptor], count: usize) -> Vec<Option<(usize, usize)>> {
    let mut out = Vec::with_capacity(count);
    for (slot, desc) in modules.iter().enumerate() {
        let rows = desc.node_count;
        for i in 0..rows.saturating_mul(desc.columns()) {
            if out.len() == count {
                return out;
            }
            out.push(Some((slot, i / rows)));
        }
    }
    if out.len() < count {
        warn!("snapshot: {} nodes beyond the modules' sizes kept unowned", count - out.len());
        out.resize(count, None);
    }
    out
}

/// Feed-forward column nearest to `x`.
fn column_at(desc: &ModuleDescriptor, x: f32) -> usize {
    if !desc.kind.is_feed_forward() || desc.width <= 0.0 {
        return 0;
    }
    let c = ((x - desc.x) / desc.width).round();
    if c.is_finite() && c > 0.0 {
        (c as usize).min(desc.columns() - 1)
    } else {
        0
    }
}

/// Build a node from its record, taking kind and parameters from its module when known.
fn restore_node(rec: NodeRecord, place: Option<(&ModuleDescriptor, usize)>) -> Node {
    let (kind, mut params) = match place {
        Some((desc, column)) => (desc.node_kind(column), desc.params),
        None => (rec.kind, NodeParams::default()),
    };
    params.activation_mode = rec.activation_mode;

    let mut node = Node::new(rec.id, kind, rec.neuron_type, params).at(rec.x, rec.y);
    node.label = rec.label;
    if let (Some((desc, _)), NodeKind::Sensor) = (place, kind) {
        node.input_mode = desc.input_mode;
        node.input_frequency = desc.input_frequency;
    }
    node.potential = if rec.potential.is_finite() {
        rec.potential.clamp(0.0, node.max_potential)
    } else {
        0.0
    };
    node
}

/// Parse a connection id of the form `"source->target"`.
pub fn parse_connection_id(text: &str) -> Option<ConnectionId> {
    let (s, t) = text.split_once("->")?;
    Some(ConnectionId::new(s.trim().parse().ok()?, t.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::module::LinkSide;

    fn edges(net: &Network) -> Vec<(NodeId, NodeId, f32)> {
        net.connections().iter().map(|c| (c.source, c.target, c.weight)).collect()
    }

    fn sample() -> Network {
        let mut net = Network::new(EngineConfig::with_seed(8));
        let s = net.add_module(ModuleDescriptor::sensor("in", 3).with_depth(2)).unwrap();
        let r = net
            .add_module(ModuleDescriptor::recurrent("core", 12).at(300.0, 0.0))
            .unwrap();
        let o = net
            .add_module(ModuleDescriptor::actuator("out", 2).sustained().at(600.0, 0.0))
            .unwrap();
        net.connect_modules(ModuleLink::new(s, r, 50.0, 0.0));
        net.connect_modules(ModuleLink::new(r, o, 50.0, 0.0).on_side(LinkSide::Left));
        let first = net.module_nodes(r)[0].id;
        net.set_node_label(first, "hub");
        net.run(20);
        net
    }

    #[test]
    fn json_reload_preserves_structure() {
        let net = sample();
        let text = net.to_snapshot().to_json().unwrap();
        let back = Network::from_snapshot(NetworkSnapshot::from_json(&text).unwrap(), EngineConfig::default());

        assert_eq!(back.modules(), net.modules());
        assert_eq!(back.nodes().len(), net.nodes().len());
        assert_eq!(edges(&back), edges(&net));
        assert_eq!(back.links(), net.links());
        assert_eq!(back.tick_count(), net.tick_count());
        for (a, b) in net.nodes().iter().zip(back.nodes()) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.label, b.label);
            assert_eq!(a.neuron_type(), b.neuron_type());
            assert_eq!(net.module_of(a.id), back.module_of(b.id));
        }
    }

    #[test]
    fn reload_resumes_the_same_run() {
        let mut net = sample();
        let mut back = Network::from_snapshot(net.to_snapshot(), EngineConfig::default());
        // Dynamic state beyond potential is not carried, so settle both first.
        net.reset_state();
        back.reset_state();
        net.run(30);
        back.run(30);
        let a: Vec<f32> = net.nodes().iter().map(|n| n.potential).collect();
        let b: Vec<f32> = back.nodes().iter().map(|n| n.potential).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn kind_is_derived_from_descriptor() {
        let net = sample();
        let mut snap = net.to_snapshot();
        for n in &mut snap.nodes {
            n.kind = NodeKind::Recurrent;
        }
        let back = Network::from_snapshot(snap, EngineConfig::default());
        for (a, b) in net.nodes().iter().zip(back.nodes()) {
            assert_eq!(a.kind, b.kind);
        }
    }

    #[test]
    fn garbage_is_filtered() {
        let text = r#"{
            "modules": [{"id": 0, "kind": "RECURRENT", "name": "b", "nodeCount": 2}],
            "nodes": [
                {"id": 0, "kind": "RECURRENT", "x": 0, "y": 0, "moduleId": 0, "potential": 99.0},
                {"id": 1, "kind": "RECURRENT", "x": 1, "y": 0, "moduleId": 0},
                {"id": 1, "kind": "RECURRENT", "x": 2, "y": 0, "moduleId": 0}
            ],
            "connections": [
                {"id": "0->1", "sourceId": 0, "targetId": 1, "weight": 0.4},
                {"id": "0->7", "sourceId": 0, "targetId": 7, "weight": 0.4},
                {"id": "0->1", "sourceId": 0, "targetId": 1, "weight": 0.9}
            ],
            "moduleLinkConfigs": [["0->5", {"sourceId": 0, "targetId": 5, "coverage": 10, "leak": 0}]]
        }"#;
        let net = Network::from_snapshot(NetworkSnapshot::from_json(text).unwrap(), EngineConfig::default());

        assert_eq!(net.nodes().len(), 2);
        assert_eq!(net.connections().len(), 1);
        assert_eq!(net.connections()[0].weight, 0.9);
        assert!(net.links().is_empty());
        let n0 = net.node(0).unwrap();
        assert_eq!(n0.potential, n0.max_potential);
        assert_eq!(net.module_nodes(0).len(), 2);
    }

    #[test]
    fn image_roundtrip_and_header_checks() {
        let net = sample();
        let mut bytes = Vec::new();
        net.save_image_to(&mut bytes).unwrap();
        assert_eq!(net.image_size_bytes().unwrap(), bytes.len());

        let back = Network::load_image_from(&mut io::Cursor::new(&bytes), EngineConfig::default()).unwrap();
        assert_eq!(edges(&back), edges(&net));

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(
            Network::load_image_from(&mut io::Cursor::new(&bad), EngineConfig::default()),
            Err(SnapshotError::BadMagic)
        ));

        let mut future = bytes.clone();
        future[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            Network::load_image_from(&mut io::Cursor::new(&future), EngineConfig::default()),
            Err(SnapshotError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn ownership_follows_module_order_without_module_ids() {
        let text = r#"{
            "modules": [
                {"id": 0, "kind": "RECURRENT", "name": "core", "nodeCount": 2},
                {"id": 1, "kind": "SENSOR", "name": "in", "nodeCount": 1, "depth": 2}
            ],
            "nodes": [
                {"id": 0, "kind": "SENSOR", "x": 0, "y": 0},
                {"id": 1, "kind": "SENSOR", "x": 0, "y": 0},
                {"id": 2, "kind": "RECURRENT", "x": 0, "y": 0},
                {"id": 3, "kind": "SENSOR", "x": 0, "y": 0},
                {"id": 4, "kind": "SENSOR", "x": 0, "y": 0}
            ]
        }"#;
        let net = Network::from_snapshot(NetworkSnapshot::from_json(text).unwrap(), EngineConfig::default());

        let kinds: Vec<NodeKind> = net.nodes().iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Recurrent,
                NodeKind::Recurrent,
                NodeKind::Sensor,
                NodeKind::Recurrent,
                NodeKind::Sensor
            ]
        );
        assert_eq!(net.module_of(0), Some(0));
        assert_eq!(net.module_of(1), Some(0));
        assert_eq!(net.module_of(2), Some(1));
        assert_eq!(net.module_of(3), Some(1));
        assert_eq!(net.module_of(4), None);
        assert_eq!(net.module_nodes(0).len(), 2);
        assert_eq!(net.module_nodes(1).len(), 2);
    }

    #[test]
    fn reserved_ids_are_dropped_and_ids_keep_counting() {
        let text = r#"{
            "modules": [
                {"id": 4294967295, "kind": "RECURRENT", "name": "far", "nodeCount": 1},
                {"id": 0, "kind": "RECURRENT", "name": "b", "nodeCount": 1}
            ],
            "nodes": [
                {"id": 4294967295, "kind": "RECURRENT", "x": 0, "y": 0, "moduleId": 0},
                {"id": 0, "kind": "RECURRENT", "x": 0, "y": 0, "moduleId": 0}
            ],
            "connections": [{"id": "0->4294967295", "sourceId": 0, "targetId": 4294967295, "weight": 0.4}]
        }"#;
        let mut net = Network::from_snapshot(NetworkSnapshot::from_json(text).unwrap(), EngineConfig::default());

        assert_eq!(net.modules().len(), 1);
        assert_eq!(net.nodes().len(), 1);
        assert!(net.connections().is_empty());

        let id = net.add_module(ModuleDescriptor::recurrent("next", 2)).unwrap();
        assert_eq!(id, 1);
        let ids: Vec<NodeId> = net.module_nodes(id).iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn highest_ids_exhaust_instead_of_wrapping() {
        let text = r#"{
            "modules": [{"id": 4294967294, "kind": "RECURRENT", "name": "top", "nodeCount": 1}],
            "nodes": [{"id": 4294967294, "kind": "RECURRENT", "x": 0, "y": 0, "moduleId": 4294967294}]
        }"#;
        let mut net = Network::from_snapshot(NetworkSnapshot::from_json(text).unwrap(), EngineConfig::default());

        assert_eq!(net.nodes().len(), 1);
        assert!(matches!(
            net.add_module(ModuleDescriptor::recurrent("more", 1)),
            Err(ConfigError::Module(_))
        ));
        assert_eq!(net.modules().len(), 1);
    }

    #[test]
    fn connection_endpoints_win_over_their_id() {
        assert_eq!(parse_connection_id("3->14"), Some(ConnectionId::new(3, 14)));
        assert_eq!(parse_connection_id("3-14"), None);

        let text = r#"{
            "modules": [{"id": 0, "kind": "RECURRENT", "name": "b", "nodeCount": 2}],
            "nodes": [
                {"id": 0, "kind": "RECURRENT", "x": 0, "y": 0, "moduleId": 0},
                {"id": 1, "kind": "RECURRENT", "x": 1, "y": 0, "moduleId": 0}
            ],
            "connections": [{"id": "9->9", "sourceId": 1, "targetId": 0, "weight": 0.3}]
        }"#;
        let net = Network::from_snapshot(NetworkSnapshot::from_json(text).unwrap(), EngineConfig::default());

        assert_eq!(edges(&net), vec![(1, 0, 0.3)]);
        assert_eq!(net.to_snapshot().connections[0].id, "1->0");
    }

    #[test]
    fn explicit_seed_replaces_restored_stream() {
        let snap = sample().to_snapshot();
        let restored = Network::from_snapshot(snap.clone(), EngineConfig::default());
        assert_eq!(restored.rng.state(), snap.rng_state.unwrap());

        let mut a = Network::from_snapshot(snap.clone(), EngineConfig::default());
        let mut b = Network::from_snapshot(snap, EngineConfig::with_seed(99));
        a.reseed(3);
        b.reseed(3);
        assert_eq!(a.rng.state(), Prng::new(3).state());
        assert_eq!(b.to_snapshot().rng_state, Some(Prng::new(3).state()));

        a.reset_state();
        b.reset_state();
        a.run(25);
        b.run(25);
        assert_eq!(edges(&a), edges(&b));
    }
}
