use std::collections::HashMap;

use crate::graph::edge::Edge;
use crate::graph::node::Node;
use crate::utils::allocator::{Arena, EdgeId, IslandId, NodeId};

/// Tracks, per kinematic node, the distinct islands that currently reference
/// it through a connected edge.
///
/// Kinematics never merge islands (they are connectivity cuts), but the
/// solver processes islands in parallel, so every island touching a kinematic
/// needs its own read-only duplicate of it. The tracker is re-derived from
/// the live edge set on every island update; it is not maintained
/// incrementally across steps.
#[derive(Debug, Default)]
pub struct KinematicTracker {
    /// Distinct referencing islands per kinematic node, in first-seen order.
    refs: HashMap<NodeId, Vec<IslandId>>,
    /// Total number of (island, kinematic) pairs; the number of solver-visible
    /// duplicates required.
    total_duplicates: usize,
}

impl KinematicTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the reference table from the current edge set.
    pub fn rebuild(&mut self, nodes: &Arena<NodeId, Node>, edges: &Arena<EdgeId, Edge>) {
        self.refs.clear();
        self.total_duplicates = 0;

        for (_, edge) in edges.iter() {
            if !edge.is_connected() {
                continue;
            }
            let [a, b] = edge.nodes;
            self.note_endpoint(nodes, a, b);
            self.note_endpoint(nodes, b, a);
        }
    }

    fn note_endpoint(
        &mut self,
        nodes: &Arena<NodeId, Node>,
        kinematic: Option<NodeId>,
        other: Option<NodeId>,
    ) {
        let Some(kin_id) = kinematic else { return };
        let Some(kin) = nodes.get(kin_id) else { return };
        if !kin.is_kinematic() {
            return;
        }
        let Some(island) = other
            .and_then(|id| nodes.get(id))
            .filter(|n| !n.is_kinematic())
            .and_then(|n| n.island)
        else {
            return;
        };

        let islands = self.refs.entry(kin_id).or_default();
        if !islands.contains(&island) {
            islands.push(island);
            self.total_duplicates += 1;
        }
    }

    /// Number of distinct islands currently referencing `kinematic`.
    pub fn duplication_count(&self, kinematic: NodeId) -> usize {
        self.refs.get(&kinematic).map_or(0, Vec::len)
    }

    /// The islands referencing `kinematic`, in first-seen order.
    pub fn islands_of(&self, kinematic: NodeId) -> &[IslandId] {
        self.refs.get(&kinematic).map_or(&[], Vec::as_slice)
    }

    /// Total solver-visible duplicate entries required across all kinematics.
    pub fn total_duplicates(&self) -> usize {
        self.total_duplicates
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[IslandId])> {
        self.refs.iter().map(|(&k, v)| (k, v.as_slice()))
    }
}
