#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Identity of an edge: at most one connection exists per ordered pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectionId {
    pub source: NodeId,
    pub target: NodeId,
}

impl ConnectionId {
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self { source, target }
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// A directed weighted edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub source: NodeId,
    pub target: NodeId,
    /// Signed; the sign follows the source's neuron type for engine-made edges.
    pub weight: f32,
    /// Last-tick |signal| carried by this edge. Inspection only.
    pub signal_strength: f32,
}

impl Connection {
    pub fn new(source: NodeId, target: NodeId, weight: f32) -> Self {
        Self {
            source,
            target,
            weight,
            signal_strength: 0.0,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        ConnectionId::new(self.source, self.target)
    }
}

/// Read-only view of an edge handed to inspectors.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EdgeView {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub weight: f32,
    pub signal_strength: f32,
}

impl From<&Connection> for EdgeView {
    fn from(c: &Connection) -> Self {
        Self {
            source_id: c.source,
            target_id: c.target,
            weight: c.weight,
            signal_strength: c.signal_strength,
        }
    }
}

/// Drop repeated (source, target) pairs, keeping the last occurrence.
pub fn dedup_last_wins(connections: &mut Vec<Connection>) -> usize {
    let before = connections.len();
    let mut seen: hashbrown::HashSet<ConnectionId> = hashbrown::HashSet::with_capacity(before);
    let mut kept: Vec<Connection> = Vec::with_capacity(before);
    for c in connections.drain(..).rev() {
        if seen.insert(c.id()) {
            kept.push(c);
        }
    }
    kept.reverse();
    *connections = kept;
    before - connections.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_last_weight_and_order() {
        let mut conns = vec![
            Connection::new(1, 2, 0.1),
            Connection::new(2, 3, 0.2),
            Connection::new(1, 2, 0.7),
        ];
        assert_eq!(dedup_last_wins(&mut conns), 1);
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[0].id(), ConnectionId::new(2, 3));
        assert_eq!(conns[1].weight, 0.7);
    }

    #[test]
    fn id_display() {
        assert_eq!(ConnectionId::new(4, 9).to_string(), "4->9");
    }
}
