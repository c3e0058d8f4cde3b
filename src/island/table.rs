use crate::graph::node::Node;
use crate::utils::allocator::{Arena, IslandId, NodeId};

/// A maximal set of dynamic bodies and articulation links transitively
/// connected by active contacts or joints. The unit of sleep/wake decisions.
#[derive(Debug, Clone)]
pub struct Island {
    /// Member nodes. May contain stale handles between an edge/node removal
    /// and the recompute that prunes them; consumers must liveness-check.
    pub nodes: Vec<NodeId>,
    asleep: bool,
}

impl Island {
    pub fn singleton(node: NodeId, asleep: bool) -> Self {
        Self {
            nodes: vec![node],
            asleep,
        }
    }

    pub fn from_nodes(nodes: Vec<NodeId>, asleep: bool) -> Self {
        Self { nodes, asleep }
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub fn set_asleep(&mut self, asleep: bool) {
        self.asleep = asleep;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The connected-components result: an arena of islands plus the merge
/// primitive. Splitting is deferred and performed by the manager's
/// affected-island recompute.
#[derive(Debug, Default)]
pub struct IslandTable {
    islands: Arena<IslandId, Island>,
}

impl IslandTable {
    pub fn new() -> Self {
        Self {
            islands: Arena::new(),
        }
    }

    /// Creates a fresh singleton island for `node` and links the node to it.
    pub fn create_singleton(
        &mut self,
        node_id: NodeId,
        node: &mut Node,
        asleep: bool,
    ) -> IslandId {
        let id = self.islands.insert(Island::singleton(node_id, asleep));
        node.island = Some(id);
        id
    }

    pub fn insert(&mut self, island: Island) -> IslandId {
        self.islands.insert(island)
    }

    pub fn remove(&mut self, id: IslandId) -> Option<Island> {
        self.islands.remove(id)
    }

    pub fn get(&self, id: IslandId) -> Option<&Island> {
        self.islands.get(id)
    }

    pub fn get_mut(&mut self, id: IslandId) -> Option<&mut Island> {
        self.islands.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (IslandId, &Island)> {
        self.islands.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (IslandId, &mut Island)> {
        self.islands.iter_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = IslandId> + '_ {
        self.islands.ids()
    }

    pub fn len(&self) -> usize {
        self.islands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.islands.is_empty()
    }

    pub fn is_valid(&self, id: IslandId) -> bool {
        self.islands.is_valid(id)
    }

    /// Merges the islands `a` and `b`, moving the members of the smaller into
    /// the larger to bound the relabelling cost. Returns `(kept, removed)`.
    ///
    /// The merged island is awake if either operand was awake; two sleeping
    /// islands merge into a sleeping one. Waking the members of a formerly
    /// sleeping operand is the caller's job (the sleep decision pass reports
    /// the transition).
    pub fn merge(
        &mut self,
        a: IslandId,
        b: IslandId,
        nodes: &mut Arena<NodeId, Node>,
    ) -> (IslandId, IslandId) {
        debug_assert!(a != b);

        let len_a = self.islands.get(a).map_or(0, Island::len);
        let len_b = self.islands.get(b).map_or(0, Island::len);
        let (kept, removed) = if len_a >= len_b { (a, b) } else { (b, a) };

        let Some(absorbed) = self.islands.remove(removed) else {
            return (kept, removed);
        };

        for &member in &absorbed.nodes {
            if let Some(node) = nodes.get_mut(member) {
                node.island = Some(kept);
            }
        }

        if let Some(island) = self.islands.get_mut(kept) {
            island.nodes.extend(absorbed.nodes);
            island.asleep = island.asleep && absorbed.asleep;
        }

        (kept, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{NodeOwner, OwnerRef};

    fn spawn(nodes: &mut Arena<NodeId, Node>, key: u64) -> NodeId {
        nodes.insert(Node::new(NodeOwner::RigidBody(OwnerRef(key)), false))
    }

    #[test]
    fn merge_moves_smaller_into_larger() {
        let mut nodes: Arena<NodeId, Node> = Arena::new();
        let mut table = IslandTable::new();

        let a = spawn(&mut nodes, 0);
        let b = spawn(&mut nodes, 1);
        let c = spawn(&mut nodes, 2);

        let big = table.insert(Island::from_nodes(vec![a, b], false));
        for &n in &[a, b] {
            nodes.get_mut(n).unwrap().island = Some(big);
        }
        let small = table.create_singleton(c, nodes.get_mut(c).unwrap(), false);

        let (kept, removed) = table.merge(big, small, &mut nodes);
        assert_eq!(kept, big);
        assert_eq!(removed, small);
        assert_eq!(table.get(big).unwrap().len(), 3);
        assert_eq!(nodes.get(c).unwrap().island, Some(big));
        assert!(!table.is_valid(small));
    }

    #[test]
    fn merge_with_awake_operand_is_awake() {
        let mut nodes: Arena<NodeId, Node> = Arena::new();
        let mut table = IslandTable::new();

        let a = spawn(&mut nodes, 0);
        let b = spawn(&mut nodes, 1);
        let sleeping = table.create_singleton(a, nodes.get_mut(a).unwrap(), true);
        let awake = table.create_singleton(b, nodes.get_mut(b).unwrap(), false);

        let (kept, _) = table.merge(sleeping, awake, &mut nodes);
        assert!(!table.get(kept).unwrap().is_asleep());

        let c = spawn(&mut nodes, 2);
        let d = spawn(&mut nodes, 3);
        let s1 = table.create_singleton(c, nodes.get_mut(c).unwrap(), true);
        let s2 = table.create_singleton(d, nodes.get_mut(d).unwrap(), true);
        let (kept, _) = table.merge(s1, s2, &mut nodes);
        assert!(table.get(kept).unwrap().is_asleep());
    }
}
