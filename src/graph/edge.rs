use serde::{Deserialize, Serialize};

use crate::graph::node::OwnerRef;
use crate::utils::allocator::NodeId;

/// The kind of relationship an edge models between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// A potentially-touching contact pair (payload: contact manager).
    Contact,
    /// A joint/constraint between two bodies (payload: constraint).
    Constraint,
    /// An internal link of an articulation.
    Articulation,
}

/// Solver payload attached to an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePayload {
    None,
    ContactManager(OwnerRef),
    Constraint(OwnerRef),
}

/// One connection of the graph: a contact, a joint, or an articulation link.
///
/// Either endpoint may be `None`, meaning the other end rests against the
/// static world. An edge exists as soon as the pair does (a contact manager
/// can be allocated before the shapes touch); only a `connected` edge binds
/// its endpoints into one island.
#[derive(Debug, Clone)]
pub struct Edge {
    pub kind: EdgeKind,
    pub nodes: [Option<NodeId>; 2],
    pub payload: EdgePayload,
    connected: bool,
}

impl Edge {
    pub fn new(kind: EdgeKind, node_a: Option<NodeId>, node_b: Option<NodeId>) -> Self {
        // Pairs always start unconnected; narrow phase or the joint layer
        // reports the first touch via `set_edge_connected`.
        Self {
            kind,
            nodes: [node_a, node_b],
            payload: EdgePayload::None,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// The endpoint opposite to `node`, if the edge has one.
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        match self.nodes {
            [Some(a), b] if a == node => b,
            [a, Some(b)] if b == node => a,
            _ => None,
        }
    }

    pub fn contact_manager(&self) -> Option<OwnerRef> {
        match self.payload {
            EdgePayload::ContactManager(cm) => Some(cm),
            _ => None,
        }
    }

    pub fn constraint(&self) -> Option<OwnerRef> {
        match self.payload {
            EdgePayload::Constraint(c) => Some(c),
            _ => None,
        }
    }
}
