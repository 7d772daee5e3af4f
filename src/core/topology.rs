//! Node placement and initial wiring.
//!
//! Recurrent modules are laid out on a golden-angle spiral and wired
//! sparsely (optionally by distance). Feed-forward modules are columns,
//! each fully connected from the one before it. Module-to-module links pick
//! targets by "location" so that neighbouring regions tend to connect.

use std::f32::consts::{PI, TAU};

use crate::connection::Connection;
use crate::module::{LinkSide, ModuleDescriptor, ModuleLink};
use crate::node::{NeuronType, Node, NodeId};
use crate::prng::Prng;

/// Ceiling on any weight produced by the wiring heuristic.
pub const MAX_IDEAL_WEIGHT: f32 = 0.5;

/// Multiplier applied to inhibitory weights relative to the excitatory ideal.
pub const INHIBITORY_GAIN: f32 = 3.0;

/// Initial weight range of feed-forward column-to-column edges.
pub const FORWARD_WEIGHT: (f32, f32) = (0.1, 0.6);

#[inline]
pub fn golden_angle() -> f32 {
    PI * (3.0 - 5.0_f32.sqrt())
}

/// Nodes and internal edges produced for one module.
#[derive(Debug, Clone, Default)]
pub struct Generated {
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

/// Synthesize a module's nodes and internal wiring. Ids are allocated from `first_id` upwards.
pub fn generate(desc: &ModuleDescriptor, first_id: NodeId, rng: &mut Prng) -> Generated {
    if desc.node_count == 0 {
        return Generated::default();
    }

    if desc.kind.is_feed_forward() {
        let nodes = column_layout(desc, first_id);
        let connections = forward_wiring(desc, &nodes, rng);
        Generated { nodes, connections }
    } else {
        let nodes = spiral_layout(desc, first_id, rng);
        let connections = rewire(desc, &nodes, rng);
        Generated { nodes, connections }
    }
}

fn spiral_layout(desc: &ModuleDescriptor, first_id: NodeId, rng: &mut Prng) -> Vec<Node> {
    let n = desc.node_count;
    let golden = golden_angle();
    (0..n)
        .map(|i| {
            let theta = i as f32 * golden;
            let r = desc.radius * ((i + 1) as f32 / n as f32).sqrt();
            let neuron_type = if rng.chance(desc.wiring.inhibitory_fraction) {
                NeuronType::Inhibitory
            } else {
                NeuronType::Excitatory
            };
            Node::new(first_id + i as NodeId, desc.node_kind(0), neuron_type, desc.params)
                .at(desc.x + r * theta.cos(), desc.y + r * theta.sin())
        })
        .collect()
}

fn column_layout(desc: &ModuleDescriptor, first_id: NodeId) -> Vec<Node> {
    let rows = desc.node_count;
    let spacing = desc.height / rows as f32;
    let top = desc.y - desc.height / 2.0;

    let mut nodes = Vec::with_capacity(rows * desc.columns());
    for col in 0..desc.columns() {
        for row in 0..rows {
            let id = first_id + nodes.len() as NodeId;
            let mut node = Node::new(id, desc.node_kind(col), NeuronType::Excitatory, desc.params)
                .at(desc.x + col as f32 * desc.width, top + (row as f32 + 0.5) * spacing);
            node.input_mode = desc.input_mode;
            node.input_frequency = desc.input_frequency;
            nodes.push(node);
        }
    }
    nodes
}

fn forward_wiring(desc: &ModuleDescriptor, nodes: &[Node], rng: &mut Prng) -> Vec<Connection> {
    let rows = desc.node_count;
    let mut out = Vec::with_capacity(rows * rows * desc.columns().saturating_sub(1));
    for col in 1..desc.columns() {
        let prev = &nodes[(col - 1) * rows..col * rows];
        let cur = &nodes[col * rows..(col + 1) * rows];
        for src in prev {
            for dst in cur {
                let w = rng.gen_range_f32(FORWARD_WEIGHT.0, FORWARD_WEIGHT.1);
                out.push(Connection::new(src.id, dst.id, src.neuron_type().signed(w)));
            }
        }
    }
    out
}

/// Weight that lets `target_fraction` of `estimated_inputs` simultaneous spikes reach threshold.
#[inline]
pub fn ideal_weight(estimated_inputs: usize, target_fraction: f32) -> f32 {
    let est = estimated_inputs.max(1) as f32;
    (1.0 / (est * target_fraction)).min(MAX_IDEAL_WEIGHT)
}

/// Draw a Dale-consistent weight around `ideal` for a source of the given type.
pub fn draw_weight(neuron_type: NeuronType, ideal: f32, rng: &mut Prng) -> f32 {
    match neuron_type {
        NeuronType::Inhibitory => -INHIBITORY_GAIN * ideal,
        NeuronType::Excitatory => rng.gen_range_f32(0.5, 1.5) * ideal,
    }
}

/// Internal wiring of a recurrent module: `synapses_per_node` distinct targets per node.
pub fn rewire(desc: &ModuleDescriptor, nodes: &[Node], rng: &mut Prng) -> Vec<Connection> {
    let wiring = desc.wiring;
    let per_node = wiring.synapses_per_node.min(nodes.len().saturating_sub(1));
    if per_node == 0 {
        return Vec::new();
    }
    let ideal = ideal_weight(wiring.synapses_per_node, wiring.target_activation);

    let mut out = Vec::with_capacity(nodes.len() * per_node);
    for (i, src) in nodes.iter().enumerate() {
        let mut candidates: Vec<usize> = (0..nodes.len()).filter(|&j| j != i).collect();

        let picked = if wiring.localized {
            candidates.sort_by(|&a, &b| {
                dist2(src, &nodes[a]).total_cmp(&dist2(src, &nodes[b]))
            });
            pick_leaky(candidates, per_node, wiring.leak, rng)
        } else {
            rng.shuffle(&mut candidates);
            candidates.truncate(per_node);
            candidates
        };

        for j in picked {
            let w = draw_weight(src.neuron_type(), ideal, rng);
            out.push(Connection::new(src.id, nodes[j].id, w));
        }
    }
    out
}

#[inline]
fn dist2(a: &Node, b: &Node) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Take `count` entries from a closest-first list. Each pick rolls against
/// `leak` (percent); on a hit a uniformly random remaining entry is taken.
pub fn pick_leaky(mut ordered: Vec<usize>, count: usize, leak: f32, rng: &mut Prng) -> Vec<usize> {
    let mut out = Vec::with_capacity(count.min(ordered.len()));
    while out.len() < count && !ordered.is_empty() {
        let idx = if leak > 0.0 && rng.roll_percent() < leak {
            rng.gen_range_usize(0, ordered.len())
        } else {
            0
        };
        out.push(ordered.remove(idx));
    }
    out
}

/// A module together with its nodes, in generation order.
pub struct ModuleView<'a> {
    pub desc: &'a ModuleDescriptor,
    pub nodes: Vec<&'a Node>,
}

impl<'a> ModuleView<'a> {
    /// Nodes that send outward: the last column of a feed-forward module, or all of a recurrent one.
    pub fn output_pool(&self) -> Vec<(usize, &'a Node)> {
        self.column_pool(self.desc.columns() - 1)
    }

    /// Nodes that receive from other modules: the first column, or all.
    pub fn input_pool(&self) -> Vec<(usize, &'a Node)> {
        self.column_pool(0)
    }

    /// Input pool restricted to one side of the module.
    pub fn target_pool(&self, side: LinkSide) -> Vec<(usize, &'a Node)> {
        side_filter(self.input_pool(), side)
    }

    fn column_pool(&self, col: usize) -> Vec<(usize, &'a Node)> {
        if !self.desc.kind.is_feed_forward() {
            return self.nodes.iter().copied().enumerate().collect();
        }
        let rows = self.desc.node_count;
        self.nodes
            .iter()
            .copied()
            .enumerate()
            .skip(col * rows)
            .take(rows)
            .collect()
    }

    /// Position of a member along its module, in [0, 1).
    ///
    /// Recurrent: polar angle around the module origin. Feed-forward: row index.
    pub fn location(&self, member: usize) -> f32 {
        if self.desc.kind.is_feed_forward() {
            let rows = self.desc.node_count;
            if rows <= 1 {
                return 0.0;
            }
            (member % rows) as f32 / (rows - 1) as f32
        } else {
            let node = self.nodes[member];
            let angle = (node.y - self.desc.y).atan2(node.x - self.desc.x);
            (angle / TAU).rem_euclid(1.0)
        }
    }
}

/// Distance between two locations; circular when both modules are recurrent.
#[inline]
pub fn location_distance(a: f32, b: f32, circular: bool) -> f32 {
    let d = (a - b).abs();
    if circular {
        d.min(1.0 - d)
    } else {
        d
    }
}

/// Restrict a target pool to one side of its centroid.
fn side_filter<'a>(pool: Vec<(usize, &'a Node)>, side: LinkSide) -> Vec<(usize, &'a Node)> {
    if side == LinkSide::All || pool.is_empty() {
        return pool;
    }

    let (min_x, max_x) = pool
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), (_, n)| (lo.min(n.x), hi.max(n.x)));
    if max_x - min_x < 1e-6 {
        let half = pool.len().div_ceil(2);
        return match side {
            LinkSide::Left => pool.into_iter().take(half).collect(),
            _ => pool.into_iter().skip(half).collect(),
        };
    }

    let cx = pool.iter().map(|(_, n)| n.x).sum::<f32>() / pool.len() as f32;
    pool.into_iter()
        .filter(|(_, n)| match side {
            LinkSide::Left => n.x < cx,
            _ => n.x >= cx,
        })
        .collect()
}

/// Edges for a link from `source` to `target`. Each source node gets
/// `max(1, floor(|pool| * coverage / 100))` distinct non-self targets.
pub fn link_modules(
    source: &ModuleView<'_>,
    target: &ModuleView<'_>,
    link: &ModuleLink,
    rng: &mut Prng,
) -> Vec<Connection> {
    let sources = source.output_pool();
    let pool = target.target_pool(link.sides);
    if sources.is_empty() || pool.is_empty() {
        return Vec::new();
    }

    let coverage = link.coverage.clamp(0.0, 100.0);
    let per_source = ((pool.len() as f32 * coverage / 100.0).floor() as usize).max(1);
    let circular = !source.desc.kind.is_feed_forward() && !target.desc.kind.is_feed_forward();

    let est = (sources.len() * per_source).div_ceil(pool.len());
    let ideal = ideal_weight(est, target.desc.wiring.target_activation);

    let mut out = Vec::with_capacity(sources.len() * per_source);
    for &(member, src) in &sources {
        let here = source.location(member);
        let mut ordered: Vec<usize> = (0..pool.len()).filter(|&k| pool[k].1.id != src.id).collect();
        ordered.sort_by(|&a, &b| {
            let da = location_distance(here, target.location(pool[a].0), circular);
            let db = location_distance(here, target.location(pool[b].0), circular);
            da.total_cmp(&db)
        });

        for k in pick_leaky(ordered, per_source, link.leak, rng) {
            let w = draw_weight(src.neuron_type(), ideal, rng);
            out.push(Connection::new(src.id, pool[k].1.id, w));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::WiringConfig;
    use crate::node::NodeKind;
    use hashbrown::HashSet;

    fn view<'a>(desc: &'a ModuleDescriptor, g: &'a Generated) -> ModuleView<'a> {
        ModuleView {
            desc,
            nodes: g.nodes.iter().collect(),
        }
    }

    #[test]
    fn spiral_places_every_node_within_radius() {
        let desc = ModuleDescriptor::recurrent("b", 50).at(10.0, -5.0);
        let g = generate(&desc, 100, &mut Prng::new(1));
        assert_eq!(g.nodes.len(), 50);
        assert_eq!(g.nodes[0].id, 100);
        for n in &g.nodes {
            let r = ((n.x - 10.0).powi(2) + (n.y + 5.0).powi(2)).sqrt();
            assert!(r <= desc.radius + 1e-3);
            assert_eq!(n.kind, NodeKind::Recurrent);
        }
    }

    #[test]
    fn rewire_gives_distinct_non_self_targets_with_dale_signs() {
        for localized in [false, true] {
            let desc = ModuleDescriptor::recurrent("b", 30).with_wiring(WiringConfig {
                synapses_per_node: 4,
                localized,
                leak: 20.0,
                ..Default::default()
            });
            let g = generate(&desc, 0, &mut Prng::new(2));
            assert_eq!(g.connections.len(), 30 * 4);

            let ids: HashSet<_> = g.connections.iter().map(|c| c.id()).collect();
            assert_eq!(ids.len(), g.connections.len());
            for c in &g.connections {
                assert_ne!(c.source, c.target);
                let src = &g.nodes[c.source as usize];
                assert_eq!(c.weight.signum(), src.neuron_type().sign());
            }
        }
    }

    #[test]
    fn localized_without_leak_picks_nearest() {
        let desc = ModuleDescriptor::recurrent("b", 20).with_wiring(WiringConfig {
            synapses_per_node: 1,
            localized: true,
            leak: 0.0,
            ..Default::default()
        });
        let g = generate(&desc, 0, &mut Prng::new(3));
        for c in &g.connections {
            let src = &g.nodes[c.source as usize];
            let best = g
                .nodes
                .iter()
                .filter(|n| n.id != src.id)
                .map(|n| dist2(src, n))
                .fold(f32::MAX, f32::min);
            assert_eq!(dist2(src, &g.nodes[c.target as usize]), best);
        }
    }

    #[test]
    fn ideal_weight_is_capped() {
        assert_eq!(ideal_weight(2, 0.2), 0.5);
        assert!((ideal_weight(20, 0.2) - 0.25).abs() < 1e-6);
        assert_eq!(ideal_weight(0, 0.2), ideal_weight(1, 0.2));
    }

    #[test]
    fn columns_are_fully_connected_forward() {
        let desc = ModuleDescriptor::sensor("in", 3).with_depth(3);
        let g = generate(&desc, 0, &mut Prng::new(4));
        assert_eq!(g.nodes.len(), 9);
        assert_eq!(g.connections.len(), 2 * 3 * 3);
        assert!(g.nodes[..3].iter().all(|n| n.kind == NodeKind::Sensor));
        assert!(g.nodes[3..].iter().all(|n| n.kind == NodeKind::Recurrent));
        for c in &g.connections {
            assert_eq!(c.target / 3, c.source / 3 + 1);
            assert!(c.weight >= FORWARD_WEIGHT.0 && c.weight <= FORWARD_WEIGHT.1);
        }
    }

    #[test]
    fn link_coverage_sets_targets_per_source() {
        let a_desc = ModuleDescriptor::sensor("a", 2);
        let b_desc = ModuleDescriptor::recurrent("b", 10).at(300.0, 0.0);
        let mut rng = Prng::new(5);
        let a = generate(&a_desc, 0, &mut rng);
        let b = generate(&b_desc, 2, &mut rng);

        let link = ModuleLink::new(0, 1, 50.0, 10.0);
        let edges = link_modules(&view(&a_desc, &a), &view(&b_desc, &b), &link, &mut rng);
        assert_eq!(edges.len(), 10);
        for src in [0, 1] {
            let targets: HashSet<_> = edges.iter().filter(|c| c.source == src).map(|c| c.target).collect();
            assert_eq!(targets.len(), 5);
            assert!(targets.iter().all(|t| (2..12).contains(t)));
        }
    }

    #[test]
    fn link_side_restricts_pool() {
        let a_desc = ModuleDescriptor::sensor("a", 1);
        let b_desc = ModuleDescriptor::actuator("b", 6).at(200.0, 0.0);
        let mut rng = Prng::new(6);
        let a = generate(&a_desc, 0, &mut rng);
        let b = generate(&b_desc, 1, &mut rng);

        let link = ModuleLink::new(0, 1, 100.0, 0.0).on_side(LinkSide::Left);
        let edges = link_modules(&view(&a_desc, &a), &view(&b_desc, &b), &link, &mut rng);
        let targets: HashSet<_> = edges.iter().map(|c| c.target).collect();
        assert_eq!(targets, [1, 2, 3].into_iter().collect());
    }

    #[test]
    fn circular_distance_wraps() {
        assert!((location_distance(0.05, 0.95, true) - 0.1).abs() < 1e-6);
        assert!((location_distance(0.05, 0.95, false) - 0.9).abs() < 1e-6);
    }
}
