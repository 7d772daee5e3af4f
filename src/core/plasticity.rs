//! Per-tick learning for recurrent modules.
//!
//! Runs after every node has been updated. Weight changes apply in place;
//! pruning and regrowth are staged and committed together so the indices are
//! rebuilt at most once per tick.

use tracing::debug;

use crate::connection::Connection;
use crate::module::{LearningConfig, ModuleKind};
use crate::network::Network;
use crate::node::NeuronType;

/// Random pair draws per regrown edge before giving up.
const REGROWTH_ATTEMPTS: usize = 8;

impl Network {
    pub(crate) fn learn(&mut self) {
        let mut doomed = vec![false; self.connections.len()];
        let mut grown: Vec<Connection> = Vec::new();

        for slot in 0..self.modules.len() {
            let desc = &self.modules[slot];
            if desc.kind != ModuleKind::Recurrent || !desc.learning.is_enabled() {
                continue;
            }
            let learning = desc.learning;

            if learning.hebbian {
                self.hebbian(slot, &learning);
            }
            if learning.synaptic_scaling
                && learning.scaling_interval > 0
                && self.tick_count % learning.scaling_interval == 0
            {
                self.scale_synapses(slot, &learning);
            }
            if learning.adaptive_threshold {
                let floor = self.cfg.threshold_floor;
                for &ns in &self.index.members[slot] {
                    self.nodes[ns].adapt_threshold(learning.adaptation_speed, learning.target_rate, floor);
                }
            }
            self.regrow(slot, &learning, &mut grown);
            self.mark_weak(slot, &learning, &mut doomed);
        }

        let pruned = doomed.iter().filter(|&&d| d).count();
        if pruned == 0 && grown.is_empty() {
            return;
        }

        let mut i = 0;
        self.connections.retain(|_| {
            let keep = !doomed[i];
            i += 1;
            keep
        });
        self.regrown_last_tick = grown.len();
        self.pruned_last_tick = pruned;
        self.connections.extend(grown);
        self.rebuild_indices();

        debug!(
            "tick {}: pruned {} edges, regrew {}",
            self.tick_count, self.pruned_last_tick, self.regrown_last_tick
        );
    }

    /// Hebbian update on intra-module edges, followed by the synaptic budget.
    ///
    /// Excitatory: `w += rate * a_src * a_tgt`, capped. Inhibitory edges move
    /// only when their source spikes: stronger if the target fires above the
    /// homeostatic target rate, weaker otherwise.
    fn hebbian(&mut self, slot: usize, learning: &LearningConfig) {
        let cap = self.cfg.weight_cap;
        let target_rate = self.cfg.inhibitory_target_rate;
        let step = self.cfg.inhibitory_step;

        for &t in &self.index.members[slot] {
            let tgt = &self.nodes[t];
            let mut increment = 0.0f32;

            for &ci in &self.index.incoming[t] {
                let s = self.index.ends[ci].0;
                if self.index.node_module[s] != Some(slot) {
                    continue;
                }
                let src = &self.nodes[s];
                let w = self.connections[ci].weight;

                let next = match src.neuron_type() {
                    NeuronType::Excitatory => {
                        (w + learning.learning_rate * src.activation * tgt.activation).min(cap)
                    }
                    NeuronType::Inhibitory if !src.is_firing => w,
                    NeuronType::Inhibitory if tgt.firing_rate > target_rate => (w - step).max(-cap),
                    NeuronType::Inhibitory => (w + step).min(0.0),
                };

                let grew = next.abs() - w.abs();
                if grew > 0.0 {
                    increment += grew;
                }
                self.connections[ci].weight = next;
            }

            if increment <= 0.0 {
                continue;
            }

            // Synaptic budget: each internal input pays its |w| share of the tax, unclamped.
            let sum: f32 = self.index.incoming[t]
                .iter()
                .filter(|&&ci| self.index.node_module[self.index.ends[ci].0] == Some(slot))
                .map(|&ci| self.connections[ci].weight.abs())
                .sum();
            if sum <= learning.target_sum {
                continue;
            }
            let tax = increment.min(sum - learning.target_sum);
            for &ci in &self.index.incoming[t] {
                if self.index.node_module[self.index.ends[ci].0] == Some(slot) {
                    let c = &mut self.connections[ci];
                    c.weight -= tax * c.weight.abs() / sum;
                }
            }
        }
    }

    /// Scale established inputs down when a node's total |incoming| exceeds the budget.
    fn scale_synapses(&mut self, slot: usize, learning: &LearningConfig) {
        let established = self.cfg.established_weight;
        for &t in &self.index.members[slot] {
            let incoming = &self.index.incoming[t];
            let total: f32 = incoming.iter().map(|&ci| self.connections[ci].weight.abs()).sum();
            if total <= learning.target_sum {
                continue;
            }
            let factor = learning.target_sum / total;
            for &ci in incoming {
                let c = &mut self.connections[ci];
                if c.weight.abs() > established {
                    c.weight *= factor;
                }
            }
        }
    }

    /// Draw `floor(rate)` edges plus one more with probability `fract(rate)`.
    fn regrow(&mut self, slot: usize, learning: &LearningConfig, grown: &mut Vec<Connection>) {
        let rate = learning.regrowth_rate;
        let members = &self.index.members[slot];
        if rate <= 0.0 || members.len() < 2 {
            return;
        }

        let mut count = rate.floor() as usize;
        if self.rng.chance(rate.fract()) {
            count += 1;
        }

        for _ in 0..count {
            for _ in 0..REGROWTH_ATTEMPTS {
                let i = self.rng.gen_range_usize(0, members.len());
                let j = self.rng.gen_range_usize(0, members.len());
                if i == j {
                    continue;
                }
                let (s, t) = (members[i], members[j]);
                let (source, target) = (self.nodes[s].id, self.nodes[t].id);
                let exists = self.index.outgoing[s].iter().any(|&ci| self.index.ends[ci].1 == t)
                    || grown.iter().any(|c| c.source == source && c.target == target);
                if exists {
                    continue;
                }

                let magnitude =
                    learning.pruning_threshold + self.rng.gen_range_f32(0.5, 1.0) * learning.regrowth_weight;
                let weight = self.nodes[s].neuron_type().signed(magnitude);
                grown.push(Connection::new(source, target, weight));
                break;
            }
        }
    }

    fn mark_weak(&self, slot: usize, learning: &LearningConfig, doomed: &mut [bool]) {
        for &t in &self.index.members[slot] {
            for &ci in &self.index.incoming[t] {
                let s = self.index.ends[ci].0;
                if self.index.node_module[s] == Some(slot)
                    && self.connections[ci].weight.abs() < learning.pruning_threshold
                {
                    doomed[ci] = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::Connection;
    use crate::module::{LearningConfig, ModuleDescriptor, WiringConfig};
    use crate::network::{EngineConfig, Network};
    use crate::node::{NeuronType, Node, NodeId, NodeKind, NodeParams};

    fn learner(nodes: usize, wiring: WiringConfig, learning: LearningConfig) -> (Network, Vec<NodeId>) {
        let mut net = Network::new(EngineConfig::with_seed(21).without_jitter());
        let m = net
            .add_module(
                ModuleDescriptor::recurrent("core", nodes)
                    .with_wiring(wiring)
                    .with_learning(learning),
            )
            .unwrap();
        let ids = net.module_nodes(m).iter().map(|n| n.id).collect();
        (net, ids)
    }

    fn weight(net: &Network, source: NodeId, target: NodeId) -> f32 {
        net.connections()
            .iter()
            .find(|c| c.source == source && c.target == target)
            .map(|c| c.weight)
            .unwrap()
    }

    fn excitatory_pair() -> WiringConfig {
        WiringConfig {
            synapses_per_node: 1,
            inhibitory_fraction: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn coactive_weight_rises_then_plateaus_at_budget() {
        let learning = LearningConfig {
            hebbian: true,
            learning_rate: 0.02,
            target_sum: 1.0,
            ..Default::default()
        };
        let (mut net, ids) = learner(2, excitatory_pair(), learning);

        let start = weight(&net, ids[0], ids[1]);
        let mut prev = start;
        let mut history = Vec::new();
        for _ in 0..100 {
            for n in &mut net.nodes {
                n.activation = 1.0;
                n.is_firing = true;
            }
            net.learn();
            let w = weight(&net, ids[0], ids[1]);
            assert!(w >= prev - 1e-5, "weight dropped from {prev} to {w}");
            history.push(w);
            prev = w;
        }

        assert!(history[0] > start);
        assert!((prev - 1.0).abs() < 1e-3);
        // Plateau: the last stretch stays pinned at the budget.
        assert!(history[80..].iter().all(|w| (w - 1.0).abs() < 1e-3));
    }

    #[test]
    fn budget_tax_deepens_inhibitory_inputs() {
        let learning = LearningConfig {
            hebbian: true,
            learning_rate: 0.02,
            target_sum: 1.0,
            ..Default::default()
        };
        let wiring = WiringConfig {
            synapses_per_node: 1,
            inhibitory_fraction: 0.0,
            ..Default::default()
        };
        let (mut net, ids) = learner(3, wiring, learning);
        let (e, i, t) = (ids[0], ids[1], ids[2]);
        net.nodes[1] = Node::new(i, NodeKind::Recurrent, NeuronType::Inhibitory, NodeParams::default());
        net.connections = vec![Connection::new(e, t, 0.9), Connection::new(i, t, -0.5)];
        net.rebuild_indices();

        for slot in [0, 2] {
            net.nodes[slot].activation = 1.0;
            net.nodes[slot].is_firing = true;
        }
        net.learn();

        // Grown 0.92, |sum| 1.42, tax 0.02 split by |w| share.
        let exc = weight(&net, e, t);
        let inh = weight(&net, i, t);
        assert!((exc - (0.92 - 0.02 * 0.92 / 1.42)).abs() < 1e-5, "exc {exc}");
        assert!((inh - (-0.5 - 0.02 * 0.5 / 1.42)).abs() < 1e-5, "inh {inh}");
        assert!(inh < -0.5);
    }

    #[test]
    fn silent_module_prunes_once_then_holds() {
        let learning = LearningConfig {
            hebbian: true,
            pruning_threshold: 0.05,
            ..Default::default()
        };
        let wiring = WiringConfig {
            synapses_per_node: 3,
            inhibitory_fraction: 0.3,
            ..Default::default()
        };
        let (mut net, _) = learner(12, wiring, learning);
        let total = net.connections().len();
        for c in net.connections.iter_mut().take(4) {
            c.weight *= 0.01;
        }

        net.learn();
        assert_eq!(net.connections().len(), total - 4);
        assert_eq!(net.pruned_last_tick, 4);

        let weights: Vec<f32> = net.connections().iter().map(|c| c.weight).collect();
        for _ in 0..10 {
            net.learn();
            let again: Vec<f32> = net.connections().iter().map(|c| c.weight).collect();
            assert_eq!(again, weights);
        }
    }

    #[test]
    fn inhibitory_edges_follow_target_rate() {
        let wiring = WiringConfig {
            synapses_per_node: 1,
            inhibitory_fraction: 1.0,
            ..Default::default()
        };
        let learning = LearningConfig {
            hebbian: true,
            ..Default::default()
        };
        let (mut net, ids) = learner(2, wiring, learning);
        let before = weight(&net, ids[0], ids[1]);
        assert!(before < 0.0);

        // Busy target: inhibition strengthens.
        net.nodes[0].is_firing = true;
        net.nodes[1].firing_rate = 0.5;
        net.learn();
        let stronger = weight(&net, ids[0], ids[1]);
        assert!((stronger - (before - 0.001)).abs() < 1e-6);

        // Quiet target: it relaxes.
        net.nodes[1].firing_rate = 0.0;
        net.learn();
        assert!((weight(&net, ids[0], ids[1]) - before).abs() < 1e-6);

        // Silent source: untouched.
        net.nodes[0].is_firing = false;
        net.nodes[1].firing_rate = 0.5;
        net.learn();
        assert!((weight(&net, ids[0], ids[1]) - before).abs() < 1e-6);
    }

    #[test]
    fn regrowth_adds_dale_consistent_edges_above_threshold() {
        let learning = LearningConfig {
            regrowth_rate: 3.0,
            ..Default::default()
        };
        let wiring = WiringConfig {
            synapses_per_node: 1,
            inhibitory_fraction: 0.5,
            ..Default::default()
        };
        let (mut net, _) = learner(40, wiring, learning);
        let before = net.connections().len();

        net.learn();
        assert_eq!(net.regrown_last_tick, 3);
        assert_eq!(net.connections().len(), before + 3);
        for c in &net.connections()[before..] {
            let src = net.node(c.source).unwrap();
            assert_eq!(c.weight.signum(), src.neuron_type().sign());
            assert!(c.weight.abs() >= learning.pruning_threshold);
            assert_ne!(c.source, c.target);
        }
    }

    #[test]
    fn scaling_caps_total_incoming_weight() {
        let learning = LearningConfig {
            synaptic_scaling: true,
            scaling_interval: 100,
            target_sum: 1.0,
            ..Default::default()
        };
        let wiring = WiringConfig {
            synapses_per_node: 3,
            inhibitory_fraction: 0.0,
            ..Default::default()
        };
        let (mut net, ids) = learner(4, wiring, learning);
        for c in &mut net.connections {
            c.weight = 0.9;
        }

        net.tick_count = 99;
        net.learn();
        assert!(net.connections().iter().all(|c| c.weight == 0.9));

        net.tick_count = 100;
        net.learn();
        for &id in &ids {
            let total: f32 = net.incoming_edges(id).iter().map(|e| e.weight.abs()).sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn adaptive_threshold_tracks_firing() {
        let learning = LearningConfig {
            adaptive_threshold: true,
            adaptation_speed: 0.05,
            target_rate: 0.1,
            ..Default::default()
        };
        let (mut net, _) = learner(2, excitatory_pair(), learning);
        net.nodes[0].is_firing = true;
        net.learn();
        assert!((net.nodes[0].threshold - 1.05).abs() < 1e-6);
        assert!((net.nodes[1].threshold - 0.995).abs() < 1e-6);
        assert_eq!(net.nodes[0].neuron_type(), NeuronType::Excitatory);
    }
}
