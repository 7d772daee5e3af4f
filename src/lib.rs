//! Spiking-neuron network simulator.
//!
//! Nodes are leaky integrate-and-fire units grouped into modules (recurrent
//! clusters, sensor and actuator layers) and wired by weighted directed edges.
//! A [`network::Network`] advances them in discrete ticks with Hebbian
//! plasticity, pruning/regrowth and homeostatic regulation.

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/node.rs"]
pub mod node;

#[path = "core/connection.rs"]
pub mod connection;

#[path = "core/module.rs"]
pub mod module;

#[path = "core/topology.rs"]
pub mod topology;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/plasticity.rs"]
mod plasticity;

#[path = "core/storage.rs"]
pub mod storage;

#[cfg(feature = "serde")]
#[path = "core/snapshot.rs"]
pub mod snapshot;

#[cfg(feature = "serde")]
#[path = "core/trainer.rs"]
pub mod trainer;

pub mod observer;

pub use module::{LinkSide, ModuleDescriptor, ModuleId, ModuleKind, ModuleLink};
pub use network::{EngineConfig, Network};
pub use node::{ActivationMode, InputMode, NeuronType, NodeId, NodeKind, NodeParams};
