use std::collections::{HashMap, HashSet};
use std::mem;

use log::debug;

use crate::config::SCRATCH_SOFT_CAP;
use crate::graph::change::{EdgeChangeManager, NodeChangeManager, TouchEvent, TouchEventQueue};
use crate::graph::edge::{Edge, EdgeKind, EdgePayload};
use crate::graph::node::{Node, NodeOwner, OwnerRef};
use crate::graph::union_find::UnionFind;
use crate::island::kinematics::KinematicTracker;
use crate::island::outputs::{
    ActiveKinematic, IndexedConstraint, IndexedContactManager, IslandBody, IslandSpan,
    NarrowPhaseContactManager, SolverBodyRef, SolverOutputs,
};
use crate::island::table::{Island, IslandTable};
use crate::utils::allocator::{Arena, EdgeId, IslandId, NodeId};
use crate::utils::logging::ScopedTimer;

/// Proof that phase 1 of the island update ran. Must be handed to
/// [`IslandManager::update_islands_second_pass`] after the narrow phase to
/// complete the step; the ordering dependency lives in the type system
/// instead of a calling convention.
#[must_use = "pass the token to update_islands_second_pass to complete the step"]
pub struct SecondPassToken {
    /// Members of islands provisionally woken in phase 1.
    pending_nodes: Vec<NodeId>,
    /// Nodes reported asleep→awake in phase 1; the report is cancelled if the
    /// second pass puts them straight back to sleep.
    woken_from_sleep: HashSet<NodeId>,
}

impl SecondPassToken {
    /// True when phase 1 left nothing for the second pass to reconcile.
    pub fn is_empty(&self) -> bool {
        self.pending_nodes.is_empty()
    }
}

/// Mutation counters, kept per manager instance so multiple simulation
/// worlds can coexist.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeCounters {
    pub added_bodies: u32,
    pub removed_bodies: u32,
    pub added_articulation_links: u32,
    pub removed_articulation_links: u32,
    pub added_edges: u32,
    pub removed_edges: u32,
}

/// Step-scoped scratch state, retained across steps to amortize allocation.
#[derive(Default)]
struct WorkBuffers {
    /// Islands created, merged, or otherwise disturbed this step; sleeping
    /// islands outside this set are skipped by the decision pass.
    touched: HashSet<IslandId>,
    /// Pending wake requests, by node.
    wake_requests: HashSet<NodeId>,
    /// Edge dedup set for island emission.
    seen_edges: HashSet<EdgeId>,
    /// (island, kinematic) → index into the active-kinematics list.
    active_kinematic_index: HashMap<(IslandId, NodeId), u32>,
    /// Islands whose connectivity must be re-derived.
    dirty: Vec<IslandId>,
}

impl WorkBuffers {
    fn clear_step(&mut self) {
        self.touched.clear();
        self.wake_requests.clear();
        self.seen_edges.clear();
        self.active_kinematic_index.clear();
        self.dirty.clear();
    }
}

/// Reserves `additional` entries, falling back to an exact-size reservation
/// with a warning once past the scratch soft cap.
fn reserve_scratch<T>(buffer: &mut Vec<T>, additional: usize) {
    if buffer.len() + additional > SCRATCH_SOFT_CAP {
        log::warn!(
            "island scratch reservation of {additional} entries exceeds soft cap {SCRATCH_SOFT_CAP}; \
             falling back to exact-size allocation"
        );
        buffer.reserve_exact(additional);
    } else {
        buffer.reserve(additional);
    }
}

/// The simulation-island connectivity manager.
///
/// Partitions dynamic bodies and articulation links into islands based on
/// which ones are transitively connected through contacts, joints, and
/// articulation links, and decides island by island whether the group is
/// simulated this step or left dormant.
///
/// Mutations (`add_body`, `add_edge`, sleep notifications, ...) are buffered
/// and only reflected in the partition by the next [`update_islands`] /
/// [`update_islands_second_pass`] pair. Solver outputs are valid between the
/// second pass and [`free_buffers`].
///
/// [`update_islands`]: IslandManager::update_islands
/// [`update_islands_second_pass`]: IslandManager::update_islands_second_pass
/// [`free_buffers`]: IslandManager::free_buffers
#[derive(Default)]
pub struct IslandManager {
    nodes: Arena<NodeId, Node>,
    edges: Arena<EdgeId, Edge>,
    islands: IslandTable,
    node_changes: NodeChangeManager,
    edge_changes: EdgeChangeManager,
    touch_events: TouchEventQueue,
    kinematics: KinematicTracker,
    outputs: SolverOutputs,
    /// Islands invalidated by removals/disconnects since the last update.
    dirty_islands: HashSet<IslandId>,
    scratch: WorkBuffers,
    counters: ChangeCounters,
    outputs_ready: bool,
    second_pass_pending: bool,
}

impl IslandManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------
    // Node mutation
    // ---------------------------------------------------------------

    /// Registers a rigid body and returns its node handle.
    pub fn add_body(&mut self, owner: OwnerRef, kinematic: bool) -> NodeId {
        self.counters.added_bodies += 1;
        let id = self
            .nodes
            .insert(Node::new(NodeOwner::RigidBody(owner), kinematic));
        self.node_changes.created.push(id);
        id
    }

    /// Registers one articulation link. Links are never kinematic.
    pub fn add_articulation_link(&mut self, articulation: OwnerRef, link: u32) -> NodeId {
        self.counters.added_articulation_links += 1;
        let id = self
            .nodes
            .insert(Node::new(NodeOwner::ArticulationLink { articulation, link }, false));
        self.node_changes.created.push(id);
        id
    }

    /// Removes a node. All incident edges must have been removed first.
    pub fn remove_node(&mut self, node: NodeId) {
        let Some(n) = self.nodes.get(node) else {
            debug_assert!(false, "remove_node on an invalid handle");
            return;
        };
        debug_assert!(
            n.edges.is_empty(),
            "remove_node called while edges are still attached"
        );
        match n.owner {
            NodeOwner::RigidBody(_) => self.counters.removed_bodies += 1,
            NodeOwner::ArticulationLink { .. } => self.counters.removed_articulation_links += 1,
        }
        if let Some(island) = n.island {
            self.dirty_islands.insert(island);
        }
        self.nodes.remove(node);
        self.node_changes.removed.push(node);
    }

    /// Switches a body between kinematic and dynamic. This changes the node's
    /// connectivity role (kinematics never merge islands), so it behaves like
    /// a removal plus re-insertion at the next update.
    pub fn set_kinematic(&mut self, node: NodeId, kinematic: bool) {
        let Some(n) = self.nodes.get_mut(node) else {
            debug_assert!(false, "set_kinematic on an invalid handle");
            return;
        };
        debug_assert!(
            !n.owner.is_articulation_link(),
            "articulation links cannot be kinematic"
        );
        if n.is_kinematic() == kinematic {
            return;
        }
        n.set_kinematic(kinematic);
        if kinematic {
            if let Some(island) = n.island.take() {
                self.dirty_islands.insert(island);
            }
        } else {
            // The node's connected edges become island-merging; replay them
            // as joins so the next update unions across them.
            let incident = n.edges.clone();
            for e in incident {
                if self.edges.get(e).is_some_and(Edge::is_connected) {
                    self.edge_changes.joined.push(e);
                }
            }
        }
        self.node_changes.kinematic_changed.push(node);
    }

    // ---------------------------------------------------------------
    // Edge mutation
    // ---------------------------------------------------------------

    /// Registers an edge between two nodes. `None` endpoints anchor against
    /// the static world. Edges always start unconnected.
    pub fn add_edge(
        &mut self,
        kind: EdgeKind,
        node_a: Option<NodeId>,
        node_b: Option<NodeId>,
    ) -> EdgeId {
        debug_assert!(
            node_a.is_some() || node_b.is_some(),
            "an edge needs at least one endpoint"
        );
        self.counters.added_edges += 1;
        let id = self.edges.insert(Edge::new(kind, node_a, node_b));
        for endpoint in [node_a, node_b].into_iter().flatten() {
            if let Some(n) = self.nodes.get_mut(endpoint) {
                n.edges.push(id);
            } else {
                debug_assert!(false, "add_edge endpoint is not a live node");
            }
        }
        self.edge_changes.created.push(id);
        id
    }

    /// Removes an edge, detaching it from both endpoints.
    pub fn remove_edge(&mut self, edge: EdgeId) {
        let Some(e) = self.edges.get(edge) else {
            debug_assert!(false, "remove_edge on an invalid handle");
            return;
        };
        self.counters.removed_edges += 1;
        let endpoints = e.nodes;
        let was_connected = e.is_connected();
        for endpoint in endpoints.into_iter().flatten() {
            if let Some(n) = self.nodes.get_mut(endpoint) {
                n.unlink_edge(edge);
                if was_connected {
                    if let Some(island) = n.island {
                        self.dirty_islands.insert(island);
                    }
                }
            }
        }
        self.edges.remove(edge);
        self.edge_changes.removed.push(edge);
    }

    /// Marks an edge as touching/active. No-op if already connected; the
    /// narrow phase may re-report a touch it reported before.
    pub fn set_edge_connected(&mut self, edge: EdgeId) {
        let Some(e) = self.edges.get_mut(edge) else {
            debug_assert!(false, "set_edge_connected on an invalid handle");
            return;
        };
        if e.is_connected() {
            return;
        }
        e.set_connected(true);
        self.edge_changes.joined.push(edge);
    }

    /// Marks an edge as no longer touching/active. No-op if already
    /// unconnected.
    pub fn set_edge_unconnected(&mut self, edge: EdgeId) {
        let Some(e) = self.edges.get_mut(edge) else {
            debug_assert!(false, "set_edge_unconnected on an invalid handle");
            return;
        };
        if !e.is_connected() {
            return;
        }
        e.set_connected(false);
        self.edge_changes.broken.push(edge);
    }

    /// Attaches a contact-manager payload to a contact edge.
    pub fn set_edge_contact_manager(&mut self, edge: EdgeId, contact_manager: OwnerRef) {
        let Some(e) = self.edges.get_mut(edge) else {
            debug_assert!(false, "set_edge_contact_manager on an invalid handle");
            return;
        };
        debug_assert!(e.kind == EdgeKind::Contact);
        e.payload = EdgePayload::ContactManager(contact_manager);
    }

    /// Attaches a constraint payload to a constraint edge.
    pub fn set_edge_constraint(&mut self, edge: EdgeId, constraint: OwnerRef) {
        let Some(e) = self.edges.get_mut(edge) else {
            debug_assert!(false, "set_edge_constraint on an invalid handle");
            return;
        };
        debug_assert!(e.kind == EdgeKind::Constraint);
        e.payload = EdgePayload::Constraint(constraint);
    }

    // ---------------------------------------------------------------
    // Sleep-state notifications
    // ---------------------------------------------------------------

    /// Reports that a body's wake counter reached zero; the body can sleep as
    /// soon as the rest of its island agrees.
    pub fn notify_ready_for_sleeping(&mut self, node: NodeId) {
        let Some(n) = self.nodes.get_mut(node) else {
            debug_assert!(false, "notify_ready_for_sleeping on an invalid handle");
            return;
        };
        if n.is_ready_for_sleeping() {
            return;
        }
        n.set_ready_for_sleeping();
        self.node_changes.state_changed.push(node);
    }

    /// Reports that a body is moving again (positive wake counter or non-zero
    /// velocity). A sleeping island containing the node wakes at the next
    /// update.
    pub fn notify_not_ready_for_sleeping(&mut self, node: NodeId) {
        let Some(n) = self.nodes.get_mut(node) else {
            debug_assert!(false, "notify_not_ready_for_sleeping on an invalid handle");
            return;
        };
        if !n.is_ready_for_sleeping() {
            return;
        }
        n.set_not_ready_for_sleeping();
        self.node_changes.state_changed.push(node);
    }

    /// External wake request (user API or solver). Wakes the node's whole
    /// island at the next update.
    pub fn set_awake(&mut self, node: NodeId) {
        let Some(n) = self.nodes.get_mut(node) else {
            debug_assert!(false, "set_awake on an invalid handle");
            return;
        };
        n.set_not_ready_for_sleeping();
        self.node_changes.state_changed.push(node);
        self.node_changes.activated.push(node);
    }

    /// External sleep request. Only legal on a node that is ready for
    /// sleeping; the island sleeps once every member agrees.
    pub fn set_asleep(&mut self, node: NodeId) {
        let Some(n) = self.nodes.get(node) else {
            debug_assert!(false, "set_asleep on an invalid handle");
            return;
        };
        debug_assert!(
            n.is_ready_for_sleeping(),
            "set_asleep on a node that is not ready for sleeping"
        );
        self.node_changes.state_changed.push(node);
        self.node_changes.deactivated.push(node);
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// The narrow phase pushes touch reports here between the two update
    /// passes; lost touches split islands in the second pass, found touches
    /// are buffered for the next step.
    pub fn touch_queue(&self) -> &TouchEventQueue {
        &self.touch_events
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn island_count(&self) -> usize {
        self.islands.len()
    }

    pub fn counters(&self) -> ChangeCounters {
        self.counters
    }

    pub fn is_kinematic(&self, node: NodeId) -> bool {
        self.nodes.get(node).is_some_and(Node::is_kinematic)
    }

    pub fn is_asleep(&self, node: NodeId) -> bool {
        self.nodes.get(node).is_some_and(Node::is_asleep)
    }

    /// Island currently holding `node`. `None` for kinematics and for nodes
    /// added since the last update.
    pub fn island_of(&self, node: NodeId) -> Option<IslandId> {
        self.nodes.get(node).and_then(|n| n.island)
    }

    /// Number of distinct islands referencing a kinematic node, as of the
    /// last completed update.
    pub fn duplication_count(&self, kinematic: NodeId) -> usize {
        self.kinematics.duplication_count(kinematic)
    }

    pub fn kinematic_tracker(&self) -> &KinematicTracker {
        &self.kinematics
    }

    /// Per-island span table (one trailing sentinel entry), valid after the
    /// second pass and until `free_buffers`.
    pub fn island_indices(&self) -> &[IslandSpan] {
        debug_assert!(self.outputs_ready && !self.second_pass_pending);
        &self.outputs.spans
    }

    /// Flat solver object arrays sliced by [`island_indices`](Self::island_indices).
    pub fn island_objects(&self) -> &crate::island::outputs::IslandObjects {
        debug_assert!(self.outputs_ready && !self.second_pass_pending);
        &self.outputs.objects
    }

    /// Bodies that transitioned asleep→awake this step.
    pub fn bodies_to_wake(&self) -> &[(NodeId, NodeOwner)] {
        debug_assert!(self.outputs_ready && !self.second_pass_pending);
        &self.outputs.bodies_to_wake
    }

    /// Bodies that transitioned awake→asleep this step.
    pub fn bodies_to_sleep(&self) -> &[(NodeId, NodeOwner)] {
        debug_assert!(self.outputs_ready && !self.second_pass_pending);
        &self.outputs.bodies_to_sleep
    }

    /// Solver-visible kinematic duplicates, one per (island, kinematic) pair.
    pub fn active_kinematics(&self) -> &[ActiveKinematic] {
        debug_assert!(self.outputs_ready && !self.second_pass_pending);
        &self.outputs.active_kinematics
    }

    /// Contact managers that need a narrow-phase pass before the solver may
    /// run; readable between the two update passes.
    pub fn narrow_phase_contact_managers(&self) -> &[NarrowPhaseContactManager] {
        debug_assert!(self.outputs_ready);
        &self.outputs.narrow_phase_contact_managers
    }

    // ---------------------------------------------------------------
    // The two-phase update
    // ---------------------------------------------------------------

    /// Phase 1: consumes the step's change logs, merges/splits islands, and
    /// decides sleep state. Islands woken this step are only provisional,
    /// since their contact set is unknown until the narrow phase runs, so their
    /// solver spans are withheld until the second pass.
    pub fn update_islands(&mut self) -> SecondPassToken {
        let _timer = ScopedTimer::new("islands::update");
        debug_assert!(
            !self.second_pass_pending,
            "previous update's second pass never ran"
        );

        self.outputs.clear();
        self.scratch.clear_step();

        self.edge_changes.cleanup_edge_events();
        self.edge_changes.cleanup_broken_edge_events();

        let node_changes = mem::take(&mut self.node_changes);
        let edge_changes = mem::take(&mut self.edge_changes);

        for &n in &node_changes.activated {
            if self.nodes.get(n).is_some() {
                self.scratch.wake_requests.insert(n);
            }
        }

        // Broken edges invalidate the islands at both endpoints; the lazy
        // recompute below decides whether a split actually happened.
        for &e in &edge_changes.broken {
            let Some(edge) = self.edges.get(e) else { continue };
            if edge.is_connected() {
                continue;
            }
            for endpoint in edge.nodes.into_iter().flatten() {
                if let Some(island) = self.nodes.get(endpoint).and_then(|n| n.island) {
                    self.dirty_islands.insert(island);
                }
            }
        }

        self.process_joined_edges(&edge_changes.joined);

        // Remaining new or re-dynamiced nodes become singleton islands.
        for &n in node_changes
            .created
            .iter()
            .chain(node_changes.kinematic_changed.iter())
        {
            let Some(node) = self.nodes.get_mut(n) else { continue };
            if node.is_kinematic() {
                node.clear_new();
                continue;
            }
            if node.island.is_none() {
                let asleep = node.is_asleep();
                node.clear_new();
                let id = self.islands.create_singleton(n, node, asleep);
                self.scratch.touched.insert(id);
            } else {
                node.clear_new();
            }
        }

        // Re-derive connectivity for every island that lost an edge or node.
        let mut dirty = mem::take(&mut self.scratch.dirty);
        dirty.extend(self.dirty_islands.drain());
        self.recompute_islands(&dirty);
        dirty.clear();
        self.scratch.dirty = dirty;

        // Islands holding nodes with sleep-state changes join the decision set.
        for &n in node_changes
            .state_changed
            .iter()
            .chain(node_changes.activated.iter())
            .chain(node_changes.deactivated.iter())
        {
            if let Some(island) = self.nodes.get(n).and_then(|node| node.island) {
                self.scratch.touched.insert(island);
            }
        }

        let woken = self.sleep_decision();

        self.kinematics.rebuild(&self.nodes, &self.edges);

        let token = self.collect_pending_and_emit(&woken);
        self.outputs.push_sentinel();

        debug!(
            "islands::update: {} islands, {} awake-pending second pass, {} to wake, {} to sleep",
            self.islands.len(),
            token.pending_nodes.len(),
            self.outputs.bodies_to_wake.len(),
            self.outputs.bodies_to_sleep.len()
        );

        self.outputs_ready = true;
        self.second_pass_pending = true;
        token
    }

    /// Phase 2: runs after the narrow phase. Lost touches reported since
    /// phase 1 split the provisionally-woken islands; pairs that went back
    /// to sleep have their contact managers culled from the solver output.
    pub fn update_islands_second_pass(&mut self, token: SecondPassToken) {
        let _timer = ScopedTimer::new("islands::second_pass");
        debug_assert!(self.outputs_ready && self.second_pass_pending);

        self.outputs.pop_sentinel();

        let SecondPassToken {
            pending_nodes,
            woken_from_sleep,
        } = token;

        // Apply narrow-phase touch reports. Lost touches break edges now;
        // found touches are buffered into the next step's change log, since
        // merging here would invalidate spans already emitted in phase 1.
        // Islands dirtied by other mutations between the passes stay buffered
        // in `dirty_islands` for the next update; only islands hit by a lost
        // touch are recomputed here.
        let mut dirty = mem::take(&mut self.scratch.dirty);
        for event in self.touch_events.drain() {
            match event {
                TouchEvent::Lost(e) => {
                    let Some(edge) = self.edges.get_mut(e) else { continue };
                    if !edge.is_connected() {
                        continue;
                    }
                    edge.set_connected(false);
                    let endpoints = edge.nodes;
                    for endpoint in endpoints.into_iter().flatten() {
                        if let Some(island) = self.nodes.get(endpoint).and_then(|n| n.island) {
                            if !dirty.contains(&island) {
                                dirty.push(island);
                            }
                        }
                    }
                }
                TouchEvent::Found(e) => {
                    let Some(edge) = self.edges.get_mut(e) else { continue };
                    if !edge.is_connected() {
                        edge.set_connected(true);
                        self.edge_changes.joined.push(e);
                    }
                }
            }
        }

        let structural_change = !dirty.is_empty();
        self.scratch.touched.clear();
        self.recompute_islands(&dirty);
        dirty.clear();
        self.scratch.dirty = dirty;

        // Islands to finalize: wherever the pending nodes ended up.
        let mut pending_islands: Vec<IslandId> = Vec::new();
        for &n in &pending_nodes {
            if let Some(island) = self.nodes.get(n).and_then(|node| node.island) {
                if !pending_islands.contains(&island) {
                    pending_islands.push(island);
                }
            }
        }

        // Sleep decision restricted to the pending islands. A member put
        // back to sleep that was only provisionally woken in phase 1 is
        // cancelled out of the wake list instead of entering the sleep list.
        let mut cancelled: HashSet<NodeId> = HashSet::new();
        for &id in &pending_islands {
            let Some(island) = self.islands.get_mut(id) else { continue };
            let mut all_ready = true;
            for &m in &island.nodes {
                if let Some(n) = self.nodes.get(m) {
                    if !n.is_ready_for_sleeping() {
                        all_ready = false;
                        break;
                    }
                }
            }
            if !all_ready || island.is_asleep() {
                continue;
            }
            island.set_asleep(true);
            for &m in &island.nodes {
                let Some(n) = self.nodes.get_mut(m) else { continue };
                if n.is_asleep() {
                    continue;
                }
                n.set_asleep();
                if woken_from_sleep.contains(&m) {
                    cancelled.insert(m);
                } else {
                    self.outputs.bodies_to_sleep.push((m, n.owner));
                }
            }
        }
        if !cancelled.is_empty() {
            self.outputs
                .bodies_to_wake
                .retain(|(n, _)| !cancelled.contains(n));
        }

        // Drop contact managers whose pair ended up asleep; the solver never
        // receives dead work.
        let nodes = &self.nodes;
        let edges = &self.edges;
        self.outputs.narrow_phase_contact_managers.retain(|np| {
            let Some(edge) = edges.get(np.edge) else {
                return false;
            };
            edge.nodes.into_iter().flatten().any(|endpoint| {
                nodes
                    .get(endpoint)
                    .is_some_and(|n| !n.is_kinematic() && !n.is_asleep())
            })
        });

        // Emit spans for the surviving awake islands of the pending set.
        for &id in &pending_islands {
            if self.islands.get(id).is_some_and(|i| !i.is_asleep()) {
                self.emit_island(id);
            }
        }

        if structural_change {
            self.kinematics.rebuild(&self.nodes, &self.edges);
        }

        self.outputs.push_sentinel();
        self.second_pass_pending = false;

        debug!(
            "islands::second_pass: {} islands finalized, {} wake reports cancelled",
            pending_islands.len(),
            cancelled.len()
        );
    }

    /// Releases the step's output buffers. Outputs are invalid afterwards
    /// until the next completed update.
    pub fn free_buffers(&mut self) {
        debug_assert!(
            !self.second_pass_pending,
            "free_buffers before the second pass completed"
        );
        self.outputs.clear();
        self.scratch.clear_step();
        self.outputs_ready = false;
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    /// Returns the island of a dynamic node, materializing a singleton island
    /// if the node has none yet.
    fn ensure_island(&mut self, node: NodeId) -> Option<IslandId> {
        let n = self.nodes.get_mut(node)?;
        if n.is_kinematic() {
            return None;
        }
        if let Some(island) = n.island {
            return Some(island);
        }
        let asleep = n.is_asleep();
        n.clear_new();
        Some(self.islands.create_singleton(node, n, asleep))
    }

    /// Unions islands across the step's joined edges. Kinematic and static
    /// endpoints never union; they only mark the dynamic side as touched.
    fn process_joined_edges(&mut self, joined: &[EdgeId]) {
        for &e in joined {
            let Some(edge) = self.edges.get(e) else { continue };
            if !edge.is_connected() {
                continue;
            }
            let [a, b] = edge.nodes;
            let a_dynamic = a.filter(|&id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| !n.is_kinematic())
            });
            let b_dynamic = b.filter(|&id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| !n.is_kinematic())
            });

            match (a_dynamic, b_dynamic) {
                (Some(x), Some(y)) => {
                    let (Some(ix), Some(iy)) = (self.ensure_island(x), self.ensure_island(y))
                    else {
                        continue;
                    };
                    if ix == iy {
                        self.scratch.touched.insert(ix);
                        continue;
                    }
                    let (kept, removed) = self.islands.merge(ix, iy, &mut self.nodes);
                    if self.dirty_islands.remove(&removed) {
                        self.dirty_islands.insert(kept);
                    }
                    self.scratch.touched.remove(&removed);
                    self.scratch.touched.insert(kept);
                }
                (Some(x), None) | (None, Some(x)) => {
                    if let Some(island) = self.ensure_island(x) {
                        self.scratch.touched.insert(island);
                    }
                }
                (None, None) => {}
            }
        }
    }

    /// Re-derives the connected components of each island in `dirty`,
    /// splitting islands whose members are no longer transitively connected.
    /// Cost is bounded by the size of the affected islands, not the world.
    fn recompute_islands(&mut self, dirty: &[IslandId]) {
        #[cfg(feature = "parallel")]
        let computed: Vec<(IslandId, Vec<Vec<NodeId>>)> = {
            use rayon::prelude::*;
            let nodes = &self.nodes;
            let islands = &self.islands;
            let edges = &self.edges;
            dirty
                .par_iter()
                .filter_map(|&id| {
                    islands
                        .get(id)
                        .map(|island| (id, island_components(id, island, nodes, edges)))
                })
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let computed: Vec<(IslandId, Vec<Vec<NodeId>>)> = dirty
            .iter()
            .filter_map(|&id| {
                self.islands
                    .get(id)
                    .map(|island| (id, island_components(id, island, &self.nodes, &self.edges)))
            })
            .collect();

        for (id, components) in computed {
            if components.is_empty() {
                // All members were removed or turned kinematic.
                self.islands.remove(id);
                self.scratch.touched.remove(&id);
                continue;
            }
            let mut components = components.into_iter();
            let Some(first) = components.next() else { continue };

            // The first component keeps the island's identity.
            if let Some(island) = self.islands.get_mut(id) {
                let asleep = component_asleep(&first, &self.nodes);
                island.nodes = first;
                island.set_asleep(asleep);
            }
            self.scratch.touched.insert(id);

            for component in components {
                let asleep = component_asleep(&component, &self.nodes);
                let new_id = self.islands.insert(Island::from_nodes(component, asleep));
                if let Some(island) = self.islands.get(new_id) {
                    for &m in &island.nodes {
                        if let Some(n) = self.nodes.get_mut(m) {
                            n.island = Some(new_id);
                        }
                    }
                }
                self.scratch.touched.insert(new_id);
            }
        }
    }

    /// Walks every island in the decision set and flips whole islands
    /// between awake and asleep. Returns the islands woken this pass.
    fn sleep_decision(&mut self) -> Vec<IslandId> {
        let mut woken = Vec::new();
        let nodes = &mut self.nodes;
        let outputs = &mut self.outputs;
        let touched = &self.scratch.touched;
        let wake_requests = &self.scratch.wake_requests;

        for (id, island) in self.islands.iter_mut() {
            if island.is_asleep() && !touched.contains(&id) {
                continue;
            }

            let mut all_ready = true;
            let mut any_wake_request = false;
            for &m in &island.nodes {
                let Some(n) = nodes.get(m) else { continue };
                if !n.is_ready_for_sleeping() {
                    all_ready = false;
                }
                if wake_requests.contains(&m) {
                    any_wake_request = true;
                }
            }
            let eligible = all_ready && !any_wake_request;

            if island.is_asleep() {
                if !eligible {
                    // Waking one member wakes the whole island; every member
                    // restarts not-ready so a freshly woken body cannot
                    // immediately report back to sleep.
                    island.set_asleep(false);
                    woken.push(id);
                    for &m in &island.nodes {
                        let Some(n) = nodes.get_mut(m) else { continue };
                        if n.is_asleep() {
                            n.set_awake();
                            outputs.bodies_to_wake.push((m, n.owner));
                        } else {
                            n.set_not_ready_for_sleeping();
                        }
                    }
                }
            } else if eligible {
                // The island sleep bit flips once; members follow atomically.
                island.set_asleep(true);
                for &m in &island.nodes {
                    let Some(n) = nodes.get_mut(m) else { continue };
                    if !n.is_asleep() {
                        n.set_asleep();
                        outputs.bodies_to_sleep.push((m, n.owner));
                    }
                }
            } else {
                // An awake island can still hold members flagged asleep when
                // a sleeping island was merged into it this step; connecting
                // an edge to an awake node wakes the whole absorbed island.
                let mut woke_member = false;
                for &m in &island.nodes {
                    let Some(n) = nodes.get_mut(m) else { continue };
                    if n.is_asleep() {
                        n.set_awake();
                        outputs.bodies_to_wake.push((m, n.owner));
                        woke_member = true;
                    }
                }
                if woke_member {
                    woken.push(id);
                }
            }
        }
        woken
    }

    /// Gathers the contact managers of provisionally-woken islands for the
    /// narrow phase, and emits solver spans for every awake island that does
    /// not need a second pass.
    fn collect_pending_and_emit(&mut self, woken: &[IslandId]) -> SecondPassToken {
        let mut token = SecondPassToken {
            pending_nodes: Vec::new(),
            woken_from_sleep: self.outputs.bodies_to_wake.iter().map(|&(n, _)| n).collect(),
        };
        let mut pending_islands: HashSet<IslandId> = HashSet::new();

        // One dedup set across all woken islands: an unconnected contact
        // edge can be reachable from two of them.
        self.scratch.seen_edges.clear();
        for &id in woken {
            let Some(island) = self.islands.get(id) else { continue };
            let mut has_contact_work = false;
            for &m in &island.nodes {
                let Some(n) = self.nodes.get(m) else { continue };
                for &e in &n.edges {
                    if !self.scratch.seen_edges.insert(e) {
                        continue;
                    }
                    let Some(edge) = self.edges.get(e) else { continue };
                    if edge.kind != EdgeKind::Contact {
                        continue;
                    }
                    if let Some(cm) = edge.contact_manager() {
                        self.outputs
                            .narrow_phase_contact_managers
                            .push(NarrowPhaseContactManager {
                                contact_manager: cm,
                                edge: e,
                            });
                        has_contact_work = true;
                    }
                }
            }
            if has_contact_work {
                reserve_scratch(&mut token.pending_nodes, island.len());
                token.pending_nodes.extend(island.nodes.iter().copied());
                pending_islands.insert(id);
            }
        }

        let emit: Vec<IslandId> = self
            .islands
            .iter()
            .filter(|(id, island)| !island.is_asleep() && !pending_islands.contains(id))
            .map(|(id, _)| id)
            .collect();
        for id in emit {
            self.emit_island(id);
        }

        token
    }

    /// Appends one island's solver span and object slices to the outputs.
    fn emit_island(&mut self, id: IslandId) {
        let Some(island) = self.islands.get(id) else { return };
        let objects = &mut self.outputs.objects;

        let mut span = IslandSpan {
            island: id,
            bodies: objects.bodies.len() as u32,
            articulations: objects.articulations.len() as u32,
            contact_managers: objects.contact_managers.len() as u32,
            constraints: objects.constraints.len() as u32,
            has_static_contact: false,
        };

        // Island-local indices for members.
        let mut local: HashMap<NodeId, SolverBodyRef> = HashMap::with_capacity(island.len());
        let mut local_bodies = 0u32;
        let mut local_articulations: HashMap<OwnerRef, u32> = HashMap::new();
        for &m in &island.nodes {
            let Some(n) = self.nodes.get(m) else { continue };
            match n.owner {
                NodeOwner::RigidBody(owner) => {
                    local.insert(m, SolverBodyRef::Body { index: local_bodies });
                    local_bodies += 1;
                    objects.bodies.push(IslandBody { node: m, owner });
                }
                NodeOwner::ArticulationLink { articulation, link } => {
                    let next = local_articulations.len() as u32;
                    let index = *local_articulations.entry(articulation).or_insert_with(|| {
                        objects.articulations.push(articulation);
                        next
                    });
                    local.insert(m, SolverBodyRef::Articulation { index, link });
                }
            }
        }

        self.scratch.seen_edges.clear();
        for &m in &island.nodes {
            let Some(n) = self.nodes.get(m) else { continue };
            for &e in &n.edges {
                if !self.scratch.seen_edges.insert(e) {
                    continue;
                }
                let Some(edge) = self.edges.get(e) else { continue };
                if !edge.is_connected() {
                    continue;
                }
                if edge.nodes.iter().any(Option::is_none) {
                    span.has_static_contact = true;
                }
                let payload = edge.payload;
                match payload {
                    EdgePayload::ContactManager(cm) => {
                        let body_a = classify_endpoint(
                            edge.nodes[0],
                            id,
                            &local,
                            &self.nodes,
                            &mut self.scratch.active_kinematic_index,
                            &mut self.outputs.active_kinematics,
                        );
                        let body_b = classify_endpoint(
                            edge.nodes[1],
                            id,
                            &local,
                            &self.nodes,
                            &mut self.scratch.active_kinematic_index,
                            &mut self.outputs.active_kinematics,
                        );
                        objects.contact_managers.push(IndexedContactManager {
                            contact_manager: cm,
                            edge: e,
                            body_a,
                            body_b,
                        });
                    }
                    EdgePayload::Constraint(constraint) => {
                        let body_a = classify_endpoint(
                            edge.nodes[0],
                            id,
                            &local,
                            &self.nodes,
                            &mut self.scratch.active_kinematic_index,
                            &mut self.outputs.active_kinematics,
                        );
                        let body_b = classify_endpoint(
                            edge.nodes[1],
                            id,
                            &local,
                            &self.nodes,
                            &mut self.scratch.active_kinematic_index,
                            &mut self.outputs.active_kinematics,
                        );
                        objects.constraints.push(IndexedConstraint {
                            constraint,
                            edge: e,
                            body_a,
                            body_b,
                        });
                    }
                    // Articulation-internal links carry no solver payload.
                    EdgePayload::None => {}
                }
            }
        }

        self.outputs.spans.push(span);
    }
}

/// Resolves one interaction endpoint to its solver-visible reference,
/// materializing an active-kinematic duplicate entry on first use per island.
fn classify_endpoint(
    endpoint: Option<NodeId>,
    island: IslandId,
    local: &HashMap<NodeId, SolverBodyRef>,
    nodes: &Arena<NodeId, Node>,
    active_index: &mut HashMap<(IslandId, NodeId), u32>,
    active_kinematics: &mut Vec<ActiveKinematic>,
) -> SolverBodyRef {
    let Some(node_id) = endpoint else {
        return SolverBodyRef::World;
    };
    let Some(node) = nodes.get(node_id) else {
        return SolverBodyRef::World;
    };
    if node.is_kinematic() {
        let NodeOwner::RigidBody(owner) = node.owner else {
            debug_assert!(false, "kinematic articulation link");
            return SolverBodyRef::World;
        };
        let next = active_kinematics.len() as u32;
        let index = *active_index.entry((island, node_id)).or_insert_with(|| {
            active_kinematics.push(ActiveKinematic {
                node: node_id,
                owner,
                island,
            });
            next
        });
        return SolverBodyRef::Kinematic { index };
    }
    match local.get(&node_id) {
        Some(&body_ref) => body_ref,
        None => {
            // A connected edge endpoint outside the island violates the
            // closure invariant.
            debug_assert!(false, "connected edge crosses island boundary");
            SolverBodyRef::World
        }
    }
}

/// Labels the connected components of one island's live dynamic members.
/// Kinematic endpoints cut connectivity, so they never appear as members.
fn island_components(
    id: IslandId,
    island: &Island,
    nodes: &Arena<NodeId, Node>,
    edges: &Arena<EdgeId, Edge>,
) -> Vec<Vec<NodeId>> {
    let mut members: Vec<NodeId> = Vec::with_capacity(island.len());
    for &m in &island.nodes {
        if nodes
            .get(m)
            .is_some_and(|n| !n.is_kinematic() && n.island == Some(id))
        {
            members.push(m);
        }
    }
    if members.is_empty() {
        return Vec::new();
    }

    let mut local: HashMap<NodeId, u32> = HashMap::with_capacity(members.len());
    for (i, &m) in members.iter().enumerate() {
        local.insert(m, i as u32);
    }

    let mut forest = UnionFind::new();
    forest.reset(members.len());
    for (i, &m) in members.iter().enumerate() {
        let Some(node) = nodes.get(m) else { continue };
        for &e in &node.edges {
            let Some(edge) = edges.get(e) else { continue };
            if !edge.is_connected() {
                continue;
            }
            let Some(other) = edge.other(m) else { continue };
            if let Some(&j) = local.get(&other) {
                forest.union(i as u32, j);
            }
        }
    }

    // Bucket members by root, in root order for determinism.
    let mut roots: HashMap<u32, usize> = HashMap::new();
    let mut components: Vec<Vec<NodeId>> = Vec::new();
    for (i, &m) in members.iter().enumerate() {
        let root = forest.find(i as u32);
        let slot = *roots.entry(root).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[slot].push(m);
    }
    components
}

/// A recomputed component keeps its observed sleep state: it is asleep only
/// if every member was asleep.
fn component_asleep(component: &[NodeId], nodes: &Arena<NodeId, Node>) -> bool {
    component
        .iter()
        .all(|&m| nodes.get(m).is_some_and(Node::is_asleep))
}
