//! Module descriptors: the configuration objects nodes are generated from.
//!
//! A module is never simulated itself. Topology generation reads its geometry
//! and wiring settings; the tick engine and plasticity read its kind and
//! learning settings.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::node::{ActivationMode, InputMode, NodeKind, NodeParams};

pub type ModuleId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ModuleKind {
    /// Recurrent cluster laid out on a golden-angle spiral.
    Recurrent,
    /// Feed-forward input layer.
    Sensor,
    /// Feed-forward output layer.
    Actuator,
    /// Feed-forward readout layer; behaves like an actuator layer.
    Interpretation,
}

impl ModuleKind {
    #[inline]
    pub fn is_feed_forward(self) -> bool {
        !matches!(self, ModuleKind::Recurrent)
    }
}

/// How a recurrent module wires itself.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct WiringConfig {
    pub synapses_per_node: usize,
    /// Prefer spatially close targets.
    pub localized: bool,
    /// Percent chance (0–100) per edge of ignoring locality.
    pub leak: f32,
    /// Fraction of a node's inputs that should be able to fire it together.
    pub target_activation: f32,
    /// Share of inhibitory neurons drawn at creation.
    pub inhibitory_fraction: f32,
}

impl Default for WiringConfig {
    fn default() -> Self {
        Self {
            synapses_per_node: 2,
            localized: false,
            leak: 10.0,
            target_activation: 0.2,
            inhibitory_fraction: 0.2,
        }
    }
}

/// Plasticity and homeostasis settings for a recurrent module.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct LearningConfig {
    pub hebbian: bool,
    pub learning_rate: f32,
    pub pruning_threshold: f32,
    /// Expected number of new intra-module edges per tick.
    pub regrowth_rate: f32,
    /// Upper magnitude of a regrown edge above the pruning threshold.
    pub regrowth_weight: f32,
    /// Synaptic budget: summed |incoming weight| a node may hold.
    pub target_sum: f32,

    pub synaptic_scaling: bool,
    pub scaling_interval: u64,

    pub adaptive_threshold: bool,
    pub adaptation_speed: f32,
    pub target_rate: f32,
}

impl LearningConfig {
    /// True when any per-tick plasticity rule is switched on.
    pub fn is_enabled(&self) -> bool {
        self.hebbian || self.regrowth_rate > 0.0 || self.synaptic_scaling || self.adaptive_threshold
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            hebbian: false,
            learning_rate: 0.01,
            pruning_threshold: 0.05,
            regrowth_rate: 0.0,
            regrowth_weight: 0.05,
            target_sum: 3.0,
            synaptic_scaling: false,
            scaling_interval: 100,
            adaptive_threshold: false,
            adaptation_speed: 0.01,
            target_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct ModuleDescriptor {
    pub id: ModuleId,
    pub kind: ModuleKind,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub node_count: usize,

    /// Number of columns (feed-forward only).
    pub depth: usize,
    /// Spiral radius (recurrent only).
    pub radius: f32,
    /// Column spacing (feed-forward only).
    pub width: f32,
    /// Vertical extent of a column (feed-forward only).
    pub height: f32,

    pub params: NodeParams,
    pub input_mode: InputMode,
    pub input_frequency: f32,
    /// Total drive a sustained actuator receives, split across its inputs.
    pub sustained_gain: f32,

    pub wiring: WiringConfig,
    pub learning: LearningConfig,
}

impl Default for ModuleDescriptor {
    fn default() -> Self {
        Self {
            id: 0,
            kind: ModuleKind::Recurrent,
            name: String::new(),
            x: 0.0,
            y: 0.0,
            node_count: 0,
            depth: 1,
            radius: 100.0,
            width: 60.0,
            height: 200.0,
            params: NodeParams::default(),
            input_mode: InputMode::Pulse,
            input_frequency: 1.0,
            sustained_gain: 1.0,
            wiring: WiringConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl ModuleDescriptor {
    pub const MAX_NODES: usize = 1 << 20;

    pub fn new(kind: ModuleKind, name: &str, node_count: usize) -> Self {
        Self {
            kind,
            name: name.to_string(),
            node_count,
            ..Default::default()
        }
    }

    pub fn recurrent(name: &str, node_count: usize) -> Self {
        Self::new(ModuleKind::Recurrent, name, node_count)
    }

    pub fn sensor(name: &str, node_count: usize) -> Self {
        Self::new(ModuleKind::Sensor, name, node_count)
    }

    pub fn actuator(name: &str, node_count: usize) -> Self {
        Self::new(ModuleKind::Actuator, name, node_count)
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn with_params(mut self, params: NodeParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_input(mut self, mode: InputMode, frequency: f32) -> Self {
        self.input_mode = mode;
        self.input_frequency = frequency;
        self
    }

    pub fn with_wiring(mut self, wiring: WiringConfig) -> Self {
        self.wiring = wiring;
        self
    }

    pub fn with_learning(mut self, learning: LearningConfig) -> Self {
        self.learning = learning;
        self
    }

    /// Switch to sustained activation (sustained actuators for output layers).
    pub fn sustained(mut self) -> Self {
        self.params.activation_mode = ActivationMode::Sustained;
        self
    }

    /// Node kind for a node generated in `column` of this module.
    pub fn node_kind(&self, column: usize) -> NodeKind {
        match self.kind {
            ModuleKind::Recurrent => NodeKind::Recurrent,
            ModuleKind::Sensor if column == 0 => NodeKind::Sensor,
            ModuleKind::Sensor => NodeKind::Recurrent,
            ModuleKind::Actuator | ModuleKind::Interpretation => {
                match self.params.activation_mode {
                    ActivationMode::Sustained => NodeKind::SustainedActuator,
                    ActivationMode::Pulse => NodeKind::Actuator,
                }
            }
        }
    }

    /// Column count actually used by the layout.
    #[inline]
    pub fn columns(&self) -> usize {
        if self.kind.is_feed_forward() {
            self.depth.max(1)
        } else {
            1
        }
    }

    /// True when the sustained-actuator weight normalization applies to inputs.
    #[inline]
    pub fn is_sustained_output(&self) -> bool {
        self.kind.is_feed_forward() && self.node_kind(self.columns() - 1) == NodeKind::SustainedActuator
    }

    /// Whether switching from `self` to `next` changes the generated topology.
    pub fn needs_regeneration(&self, next: &ModuleDescriptor) -> bool {
        self.kind != next.kind
            || self.node_count != next.node_count
            || self.columns() != next.columns()
            || self.radius != next.radius
            || self.width != next.width
            || self.height != next.height
            || self.wiring != next.wiring
            || self.node_kind(0) != next.node_kind(0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_count > Self::MAX_NODES {
            return Err(ConfigError::Module("node_count too large"));
        }
        if !(0.0..=100.0).contains(&self.wiring.leak) {
            return Err(ConfigError::Module("leak must be in [0, 100]"));
        }
        if self.wiring.target_activation <= 0.0 || self.wiring.target_activation > 1.0 {
            return Err(ConfigError::Module("target_activation must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.wiring.inhibitory_fraction) {
            return Err(ConfigError::Module("inhibitory_fraction must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.params.decay) {
            return Err(ConfigError::Module("decay must be in [0, 1]"));
        }
        if self.params.max_potential <= 0.0 {
            return Err(ConfigError::Module("max_potential must be > 0"));
        }
        if self.learning.pruning_threshold < 0.0 {
            return Err(ConfigError::Module("pruning_threshold must be >= 0"));
        }
        if self.learning.regrowth_rate < 0.0 {
            return Err(ConfigError::Module("regrowth_rate must be >= 0"));
        }
        Ok(())
    }
}

/// Which half of the target module a link may land on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum LinkSide {
    #[default]
    All,
    Left,
    Right,
}

/// Stored configuration of a module-to-module link, re-applied after regeneration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ModuleLink {
    pub source_id: ModuleId,
    pub target_id: ModuleId,
    /// Percent of the target pool each source node connects to.
    pub coverage: f32,
    /// Percent chance per edge of ignoring locality.
    pub leak: f32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sides: LinkSide,
}

impl ModuleLink {
    pub fn new(source_id: ModuleId, target_id: ModuleId, coverage: f32, leak: f32) -> Self {
        Self {
            source_id,
            target_id,
            coverage,
            leak,
            sides: LinkSide::All,
        }
    }

    pub fn on_side(mut self, sides: LinkSide) -> Self {
        self.sides = sides;
        self
    }

    /// Key under which the link is stored.
    pub fn key(&self) -> String {
        link_key(self.source_id, self.target_id)
    }

    #[inline]
    pub fn touches(&self, module: ModuleId) -> bool {
        self.source_id == module || self.target_id == module
    }
}

pub fn link_key(source: ModuleId, target: ModuleId) -> String {
    format!("{source}->{target}")
}
