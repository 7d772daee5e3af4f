use crate::module::{ModuleId, ModuleKind};
use crate::network::{Connectivity, Diagnostics, Network};
use crate::node::NodeId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A read-only snapshot of what the network is doing.
///
/// Design intent:
/// - Observers cannot mutate or steer the network.
/// - Snapshotting is *on-demand* and can allocate; the tick loop stays unchanged.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct NetworkReport {
    pub diagnostics: Diagnostics,
    pub modules: Vec<ModuleReport>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ModuleReport {
    pub id: ModuleId,
    pub name: String,
    pub kind: ModuleKind,
    pub node_count: usize,
    pub firing: Vec<NodeId>,
    pub mean_firing_rate: f32,
    pub connectivity: Connectivity,
}

pub struct NetworkAdapter<'a> {
    net: &'a Network,
}

impl<'a> NetworkAdapter<'a> {
    pub fn new(net: &'a Network) -> Self {
        Self { net }
    }

    pub fn snapshot(&self) -> NetworkReport {
        let modules = self
            .net
            .modules()
            .iter()
            .filter_map(|m| self.module_report(m.id))
            .collect();

        NetworkReport {
            diagnostics: self.net.diagnostics(),
            modules,
        }
    }

    pub fn module_report(&self, id: ModuleId) -> Option<ModuleReport> {
        let desc = self.net.module(id)?;
        let nodes = self.net.module_nodes(id);
        let mean_firing_rate = if nodes.is_empty() {
            0.0
        } else {
            nodes.iter().map(|n| n.firing_rate).sum::<f32>() / nodes.len() as f32
        };

        Some(ModuleReport {
            id,
            name: desc.name.clone(),
            kind: desc.kind,
            node_count: nodes.len(),
            firing: nodes.iter().filter(|n| n.is_firing).map(|n| n.id).collect(),
            mean_firing_rate,
            connectivity: self.net.connectivity(id).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleDescriptor, ModuleLink};
    use crate::network::EngineConfig;

    #[test]
    fn report_partitions_edges_per_module() {
        let mut net = Network::new(EngineConfig::with_seed(1));
        let a = net.add_module(ModuleDescriptor::sensor("a", 2)).unwrap();
        let b = net
            .add_module(ModuleDescriptor::recurrent("b", 10).at(300.0, 0.0))
            .unwrap();
        net.connect_modules(ModuleLink::new(a, b, 50.0, 0.0));
        let first = net.module_nodes(a)[0].id;
        net.set_sensor_input(first, 1.0);

        let report = NetworkAdapter::new(&net).snapshot();
        assert_eq!(report.modules.len(), 2);

        let ra = &report.modules[0];
        assert_eq!(ra.firing, vec![first]);
        assert_eq!(ra.connectivity.outgoing_count, 10);
        assert_eq!(ra.connectivity.internal_count, 0);

        let rb = &report.modules[1];
        assert_eq!(rb.connectivity.incoming_count, 10);
        assert_eq!(rb.connectivity.internal_count, 20);
        assert_eq!(
            report.diagnostics.connection_count,
            rb.connectivity.internal_count + rb.connectivity.incoming_count
        );
    }
}
