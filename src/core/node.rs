//! Per-unit firing dynamics.
//!
//! A node is a leaky integrate-and-fire unit with fatigue (a threshold that
//! rises on every spike and recovers while idle) and a refractory timer. The
//! four behavioral variants share one [`Node::update`] and differ only in the
//! `match` arms on [`NodeKind`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::prng::Prng;

pub type NodeId = u32;

/// Scale applied to a sensor's frequency in `SIN` mode.
pub const SIN_RATE: f64 = 0.1;

/// Lowest base threshold any homeostatic rule may drive a node to.
pub const THRESHOLD_FLOOR: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum NodeKind {
    /// Driven by an input generator; ignores incoming edges.
    Sensor,
    /// Integrating unit of a recurrent cluster (also used for feed-forward relays).
    Recurrent,
    /// Output unit with no memory between ticks.
    Actuator,
    /// Output unit that never resets on fire and gates its downstream signal.
    SustainedActuator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ActivationMode {
    /// Soft reset (`potential -= threshold`) on fire.
    #[default]
    Pulse,
    /// Potential is left untouched on fire.
    Sustained,
}

/// Dale's-principle tag: the sign every outgoing weight must carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum NeuronType {
    #[default]
    Excitatory,
    Inhibitory,
}

impl NeuronType {
    #[inline]
    pub fn sign(self) -> f32 {
        match self {
            NeuronType::Excitatory => 1.0,
            NeuronType::Inhibitory => -1.0,
        }
    }

    /// Apply this type's sign to a weight magnitude.
    #[inline]
    pub fn signed(self, magnitude: f32) -> f32 {
        self.sign() * magnitude.abs()
    }
}

/// Input generator used by sensor nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum InputMode {
    /// Activation is whatever was last set with [`Node::set_input`].
    #[default]
    Pulse,
    /// `(sin(tick * freq * 0.1) + 1) / 2`.
    Sin,
    /// Uniform random, held for `round(1 / freq)` ticks when `freq < 1`.
    Noise,
}

/// Parameters a module hands to each node it generates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct NodeParams {
    pub threshold: f32,
    /// Retention factor per tick (`potential *= decay`).
    pub decay: f32,
    pub max_potential: f32,
    pub refractory_period: u32,
    pub fatigue: f32,
    pub recovery: f32,
    pub bias: f32,
    pub activation_mode: ActivationMode,
}

impl Default for NodeParams {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            decay: 0.9,
            max_potential: 5.0,
            refractory_period: 2,
            fatigue: 0.05,
            recovery: 0.01,
            bias: 0.0,
            activation_mode: ActivationMode::Pulse,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    neuron_type: NeuronType,

    pub x: f32,
    pub y: f32,
    pub label: String,

    pub potential: f32,
    pub activation: f32,
    pub is_firing: bool,
    pub refractory_timer: u32,
    /// Slow moving average of `is_firing`, read by homeostatic plasticity.
    pub firing_rate: f32,

    pub threshold: f32,
    pub current_threshold: f32,
    pub decay: f32,
    pub max_potential: f32,
    pub refractory_period: u32,
    pub fatigue: f32,
    pub recovery: f32,
    pub bias: f32,
    pub activation_mode: ActivationMode,

    pub input_mode: InputMode,
    pub input_frequency: f32,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, neuron_type: NeuronType, params: NodeParams) -> Self {
        let mut node = Self {
            id,
            kind,
            neuron_type,
            x: 0.0,
            y: 0.0,
            label: String::new(),
            potential: 0.0,
            activation: 0.0,
            is_firing: false,
            refractory_timer: 0,
            firing_rate: 0.0,
            threshold: 0.0,
            current_threshold: 0.0,
            decay: 0.0,
            max_potential: 0.0,
            refractory_period: 0,
            fatigue: 0.0,
            recovery: 0.0,
            bias: 0.0,
            activation_mode: ActivationMode::Pulse,
            input_mode: InputMode::Pulse,
            input_frequency: 1.0,
        };
        node.apply_params(params);
        node
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    #[inline]
    pub fn neuron_type(&self) -> NeuronType {
        self.neuron_type
    }

    /// Reconfigure parameters in place. Dynamic state is kept but re-clamped.
    pub fn apply_params(&mut self, params: NodeParams) {
        self.threshold = params.threshold.max(THRESHOLD_FLOOR);
        self.current_threshold = self.current_threshold.max(self.threshold);
        self.max_potential = params.max_potential.max(0.0);
        self.refractory_period = params.refractory_period;
        self.fatigue = params.fatigue.max(0.0);
        self.recovery = params.recovery.max(0.0);
        self.bias = params.bias;
        self.activation_mode = match self.kind {
            NodeKind::SustainedActuator => ActivationMode::Sustained,
            _ => params.activation_mode,
        };
        self.decay = match self.kind {
            // Actuators never carry potential across ticks.
            NodeKind::Actuator => 0.0,
            _ => params.decay.clamp(0.0, 1.0),
        };
        self.potential = self.potential.clamp(0.0, self.max_potential);
    }

    /// True when firing leaves the potential untouched.
    #[inline]
    pub fn is_sustained(&self) -> bool {
        self.activation_mode == ActivationMode::Sustained
    }

    /// Sensors and actuators keep their decay when decay is bulk-edited.
    #[inline]
    pub fn has_fixed_decay(&self) -> bool {
        matches!(self.kind, NodeKind::Sensor | NodeKind::Actuator)
    }

    /// Advance one tick with the aggregated incoming signal.
    ///
    /// Sensors are refreshed by [`Node::update_sensor`] instead and ignore this call.
    pub fn update(&mut self, input_sum: f32, jitter: bool, rng: &mut Prng) {
        if self.kind == NodeKind::Sensor {
            return;
        }

        if self.refractory_timer > 0 {
            self.refractory_timer -= 1;
            self.is_firing = false;
            self.activation = 0.0;

            if !self.is_sustained() {
                self.potential = 0.0;
                return;
            }

            // Sustained units keep integrating; only the fire test is gated,
            // and it re-opens on the tick the timer runs out.
            self.integrate(input_sum);
            self.recover_threshold();
            if self.refractory_timer > 0 {
                return;
            }
            self.fire_test(jitter, rng);
            return;
        }

        self.integrate(input_sum);
        self.recover_threshold();
        self.fire_test(jitter, rng);
    }

    /// Refresh a sensor's activation from its generator mode.
    pub fn update_sensor(&mut self, tick: u64, rng: &mut Prng) {
        if self.kind != NodeKind::Sensor {
            return;
        }

        let freq = if self.input_frequency > 0.0 {
            self.input_frequency
        } else {
            1.0
        };

        match self.input_mode {
            InputMode::Pulse => {}
            InputMode::Sin => {
                let phase = tick as f64 * freq as f64 * SIN_RATE;
                self.activation = ((phase.sin() + 1.0) / 2.0) as f32;
            }
            InputMode::Noise => {
                if freq >= 1.0 {
                    self.activation = rng.next_f32_01();
                } else {
                    let period = ((1.0 / freq).round() as u64).max(1);
                    if tick % period == 0 {
                        self.activation = rng.next_f32_01();
                    }
                }
            }
        }

        self.sync_sensor_state();
    }

    /// Drive a sensor's activation directly. Returns false for non-sensors.
    pub fn set_input(&mut self, value: f32) -> bool {
        if self.kind != NodeKind::Sensor {
            return false;
        }
        self.activation = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.sync_sensor_state();
        true
    }

    /// Clear dynamic state. Parameters and topology are untouched.
    pub fn reset(&mut self) {
        self.potential = 0.0;
        self.activation = 0.0;
        self.is_firing = false;
        self.refractory_timer = 0;
        self.firing_rate = 0.0;
        self.current_threshold = self.threshold;
    }

    #[inline]
    pub fn record_firing_rate(&mut self, alpha: f32) {
        let fired = if self.is_firing { 1.0 } else { 0.0 };
        self.firing_rate = alpha * fired + (1.0 - alpha) * self.firing_rate;
    }

    /// Adaptive threshold: climb on fire, sink slowly while silent.
    pub fn adapt_threshold(&mut self, speed: f32, target_rate: f32, floor: f32) {
        if self.is_firing {
            self.threshold += speed;
        } else {
            self.threshold = (self.threshold - speed * target_rate).max(floor);
        }
        self.current_threshold = self.current_threshold.max(self.threshold);
    }

    fn integrate(&mut self, input_sum: f32) {
        let drive = input_sum + self.bias;
        if self.kind == NodeKind::Actuator {
            self.potential = drive;
        } else {
            self.potential = (self.potential + drive) * self.decay;
        }
        if !self.potential.is_finite() {
            self.potential = 0.0;
        }
        self.potential = self.potential.clamp(0.0, self.max_potential);
    }

    fn recover_threshold(&mut self) {
        if self.current_threshold > self.threshold {
            self.current_threshold = (self.current_threshold - self.recovery).max(self.threshold);
        }
    }

    fn fire_test(&mut self, jitter: bool, rng: &mut Prng) {
        if self.potential < self.current_threshold {
            self.is_firing = false;
            self.activation = 0.0;
            return;
        }

        self.is_firing = true;
        self.activation = 1.0;
        if !self.is_sustained() {
            self.potential = (self.potential - self.current_threshold).max(0.0);
        }
        self.current_threshold += self.fatigue;

        let extra = if jitter && rng.chance(0.5) { 1 } else { 0 };
        self.refractory_timer = self.refractory_period + extra;
    }

    fn sync_sensor_state(&mut self) {
        self.potential = self.activation.clamp(0.0, self.max_potential);
        self.is_firing = self.activation > 0.5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lif(mode: ActivationMode) -> Node {
        Node::new(
            1,
            NodeKind::Recurrent,
            NeuronType::Excitatory,
            NodeParams {
                threshold: 1.0,
                decay: 0.9,
                refractory_period: 2,
                activation_mode: mode,
                ..Default::default()
            },
        )
    }

    fn fire_ticks(node: &mut Node, input: f32, ticks: u32) -> Vec<u32> {
        let mut rng = Prng::new(1);
        let mut fired = Vec::new();
        for t in 1..=ticks {
            node.update(input, false, &mut rng);
            if node.is_firing {
                fired.push(t);
            }
        }
        fired
    }

    #[test]
    fn pulse_unit_fires_then_waits_out_refractory() {
        let mut node = lif(ActivationMode::Pulse);
        let fired = fire_ticks(&mut node, 1.5, 4);
        assert_eq!(fired, vec![1, 4]);
    }

    #[test]
    fn sustained_unit_keeps_potential_and_refires_when_timer_expires() {
        let mut node = lif(ActivationMode::Sustained);
        let mut rng = Prng::new(1);

        node.update(1.5, false, &mut rng);
        assert!(node.is_firing);
        let after_first = node.potential;
        assert!(after_first >= node.threshold);

        // Refractory window: silent, but potential never drops below threshold.
        node.update(1.5, false, &mut rng);
        assert!(!node.is_firing);
        assert!(node.potential >= node.threshold);
        assert!(node.potential >= after_first);

        // Timer reaches zero on this tick and the unit fires immediately.
        node.update(1.5, false, &mut rng);
        assert_eq!(node.refractory_timer, node.refractory_period);
        assert!(node.is_firing);
    }

    #[test]
    fn potential_is_clamped_to_range() {
        let mut node = lif(ActivationMode::Sustained);
        node.refractory_period = 0;
        let mut rng = Prng::new(5);

        for _ in 0..50 {
            node.update(100.0, true, &mut rng);
            assert!(node.potential <= node.max_potential);
        }
        for _ in 0..50 {
            node.update(-100.0, true, &mut rng);
            assert!(node.potential >= 0.0);
        }
        node.update(f32::NAN, true, &mut rng);
        assert_eq!(node.potential, 0.0);
    }

    #[test]
    fn refractory_gap_respected_with_jitter() {
        let mut rng = Prng::new(42);
        for mode in [ActivationMode::Pulse, ActivationMode::Sustained] {
            let mut node = lif(mode);
            let mut last: Option<u32> = None;
            for t in 1..=400u32 {
                node.update(3.0, true, &mut rng);
                if node.is_firing {
                    if let Some(prev) = last {
                        assert!(t - prev >= node.refractory_period, "{mode:?} refired too soon");
                    }
                    last = Some(t);
                }
            }
            assert!(last.is_some());
        }
    }

    #[test]
    fn fatigue_raises_and_recovery_lowers_current_threshold() {
        let mut node = lif(ActivationMode::Pulse);
        node.fatigue = 0.5;
        node.recovery = 0.1;
        let mut rng = Prng::new(1);

        node.update(1.5, false, &mut rng);
        assert!(node.is_firing);
        assert!((node.current_threshold - 1.5).abs() < 1e-6);

        // Pulse units do not recover during refractory ticks.
        node.update(0.0, false, &mut rng);
        node.update(0.0, false, &mut rng);
        assert!((node.current_threshold - 1.5).abs() < 1e-6);

        for _ in 0..20 {
            node.update(0.0, false, &mut rng);
        }
        assert_eq!(node.current_threshold, node.threshold);
    }

    #[test]
    fn actuator_has_no_memory_between_ticks() {
        let mut node = Node::new(
            2,
            NodeKind::Actuator,
            NeuronType::Excitatory,
            NodeParams {
                threshold: 1.0,
                refractory_period: 0,
                ..Default::default()
            },
        );
        let mut rng = Prng::new(1);

        node.update(0.6, false, &mut rng);
        assert!(!node.is_firing);
        node.update(0.6, false, &mut rng);
        assert!(!node.is_firing, "sub-threshold drive must not accumulate");
        assert!((node.potential - 0.6).abs() < 1e-6);

        node.update(1.2, false, &mut rng);
        assert!(node.is_firing);
    }

    #[test]
    fn sensor_generators() {
        let mut rng = Prng::new(9);
        let mut sensor = Node::new(3, NodeKind::Sensor, NeuronType::Excitatory, NodeParams::default());

        assert!(sensor.set_input(2.0));
        assert_eq!(sensor.activation, 1.0);
        assert!(sensor.is_firing);
        sensor.update(-5.0, false, &mut rng);
        assert_eq!(sensor.activation, 1.0, "sensors ignore incoming edges");

        sensor.input_mode = InputMode::Sin;
        sensor.update_sensor(0, &mut rng);
        assert!((sensor.activation - 0.5).abs() < 1e-6);

        sensor.input_mode = InputMode::Noise;
        sensor.input_frequency = 0.25;
        sensor.update_sensor(4, &mut rng);
        let held = sensor.activation;
        for t in 5..8 {
            sensor.update_sensor(t, &mut rng);
            assert_eq!(sensor.activation, held);
        }
    }

    #[test]
    fn set_input_rejected_for_non_sensors() {
        let mut node = lif(ActivationMode::Pulse);
        assert!(!node.set_input(1.0));
        assert_eq!(node.activation, 0.0);
    }

    #[test]
    fn adaptive_threshold_respects_floor() {
        let mut node = lif(ActivationMode::Pulse);
        for _ in 0..10_000 {
            node.adapt_threshold(0.01, 0.5, THRESHOLD_FLOOR);
        }
        assert!((node.threshold - THRESHOLD_FLOOR).abs() < 1e-6);
        assert!(node.current_threshold >= node.threshold);
    }
}
