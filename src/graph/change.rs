use std::collections::HashSet;

use parking_lot::Mutex;

use crate::utils::allocator::{EdgeId, NodeId};

/// Per-step log of node lifecycle and sleep-state events. Consumed and
/// cleared by each island update; never read across steps.
#[derive(Debug, Default)]
pub struct NodeChangeManager {
    pub created: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    /// Nodes whose ready/not-ready-for-sleeping state changed this step.
    pub state_changed: Vec<NodeId>,
    /// Nodes explicitly woken this step (`set_awake` or a wake-forcing event).
    pub activated: Vec<NodeId>,
    /// Nodes explicitly put to sleep this step (`set_asleep`).
    pub deactivated: Vec<NodeId>,
    /// Nodes whose kinematic flag flipped this step.
    pub kinematic_changed: Vec<NodeId>,
}

impl NodeChangeManager {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.removed.is_empty()
            && self.state_changed.is_empty()
            && self.activated.is_empty()
            && self.deactivated.is_empty()
            && self.kinematic_changed.is_empty()
    }

    pub fn clear(&mut self) {
        self.created.clear();
        self.removed.clear();
        self.state_changed.clear();
        self.activated.clear();
        self.deactivated.clear();
        self.kinematic_changed.clear();
    }
}

/// Per-step log of edge lifecycle and connectivity events.
#[derive(Debug, Default)]
pub struct EdgeChangeManager {
    pub created: Vec<EdgeId>,
    pub removed: Vec<EdgeId>,
    /// Edges that transitioned to connected this step.
    pub joined: Vec<EdgeId>,
    /// Edges that transitioned to unconnected this step.
    pub broken: Vec<EdgeId>,
}

impl EdgeChangeManager {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.removed.is_empty()
            && self.joined.is_empty()
            && self.broken.is_empty()
    }

    /// Cancels join/break pairs that refer to the same edge within one step.
    ///
    /// A contact can be reported touching and then lost again before the next
    /// island update (or vice versa); processing both events would first merge
    /// and then re-split an island for nothing. Only the edge's net transition
    /// relative to its state at the previous update survives: an edge present
    /// in both lists cancels out of both.
    pub fn cleanup_edge_events(&mut self) {
        if self.joined.is_empty() || self.broken.is_empty() {
            return;
        }
        let joined: HashSet<EdgeId> = self.joined.iter().copied().collect();
        let broken: HashSet<EdgeId> = self.broken.iter().copied().collect();
        self.joined.retain(|e| !broken.contains(e));
        self.broken.retain(|e| !joined.contains(e));
    }

    /// Drops broken-edge events that refer to edges removed in the same step;
    /// the removal already detaches them from their islands.
    pub fn cleanup_broken_edge_events(&mut self) {
        if self.removed.is_empty() || self.broken.is_empty() {
            return;
        }
        let removed: HashSet<EdgeId> = self.removed.iter().copied().collect();
        self.broken.retain(|e| !removed.contains(e));
    }

    pub fn clear(&mut self) {
        self.created.clear();
        self.removed.clear();
        self.joined.clear();
        self.broken.clear();
    }
}

/// A touch report produced by the narrow phase between the two island update
/// passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEvent {
    Found(EdgeId),
    Lost(EdgeId),
}

/// Thread-safe queue for narrow-phase touch reports.
///
/// The narrow phase runs between `update_islands` and
/// `update_islands_second_pass`, typically fanned out over worker threads;
/// workers push through `&self` and the second pass drains the queue on the
/// simulation thread.
#[derive(Debug, Default)]
pub struct TouchEventQueue {
    events: Mutex<Vec<TouchEvent>>,
}

impl TouchEventQueue {
    pub fn push(&self, event: TouchEvent) {
        self.events.lock().push(event);
    }

    pub fn drain(&self) -> Vec<TouchEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::allocator::{ArenaKey, GenerationalId};

    fn edge(index: u32) -> EdgeId {
        EdgeId::from_id(GenerationalId::new(index, 0))
    }

    #[test]
    fn join_break_pairs_cancel() {
        let mut changes = EdgeChangeManager::default();
        changes.joined.push(edge(0));
        changes.joined.push(edge(1));
        changes.broken.push(edge(1));
        changes.broken.push(edge(2));

        changes.cleanup_edge_events();

        assert_eq!(changes.joined, vec![edge(0)]);
        assert_eq!(changes.broken, vec![edge(2)]);
    }

    #[test]
    fn broken_events_on_removed_edges_are_culled() {
        let mut changes = EdgeChangeManager::default();
        changes.broken.push(edge(3));
        changes.removed.push(edge(3));

        changes.cleanup_broken_edge_events();

        assert!(changes.broken.is_empty());
        assert_eq!(changes.removed, vec![edge(3)]);
    }

    #[test]
    fn clear_resets_both_logs() {
        let mut edges = EdgeChangeManager::default();
        edges.created.push(edge(0));
        edges.broken.push(edge(1));
        assert!(!edges.is_empty());
        edges.clear();
        assert!(edges.is_empty());

        let mut nodes = NodeChangeManager::default();
        assert!(nodes.is_empty());
        nodes.kinematic_changed.push(NodeId::from_id(GenerationalId::new(0, 0)));
        assert!(!nodes.is_empty());
        nodes.clear();
        assert!(nodes.is_empty());
    }

    #[test]
    fn touch_queue_drains_in_order() {
        let queue = TouchEventQueue::default();
        queue.push(TouchEvent::Found(edge(0)));
        queue.push(TouchEvent::Lost(edge(1)));
        assert_eq!(
            queue.drain(),
            vec![TouchEvent::Found(edge(0)), TouchEvent::Lost(edge(1))]
        );
        assert!(queue.is_empty());
    }
}
