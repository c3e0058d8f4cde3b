use crate::graph::node::{NodeOwner, OwnerRef};
use crate::utils::allocator::{EdgeId, IslandId, NodeId};

/// How a solver-bound interaction endpoint is addressed.
///
/// Dynamic bodies are island-local indices into the island's slice of the
/// flat body array; kinematics are indices into the active-kinematics list;
/// articulation links are addressed through their island-local articulation
/// entry; `World` is a static anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverBodyRef {
    Body { index: u32 },
    Kinematic { index: u32 },
    Articulation { index: u32, link: u32 },
    World,
}

/// One dynamic rigid-body entry in the flat solver body array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IslandBody {
    pub node: NodeId,
    pub owner: OwnerRef,
}

/// A contact manager scheduled for the solver, with both endpoints resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedContactManager {
    pub contact_manager: OwnerRef,
    pub edge: EdgeId,
    pub body_a: SolverBodyRef,
    pub body_b: SolverBodyRef,
}

/// A constraint scheduled for the solver, with both endpoints resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedConstraint {
    pub constraint: OwnerRef,
    pub edge: EdgeId,
    pub body_a: SolverBodyRef,
    pub body_b: SolverBodyRef,
}

/// Start offsets of one island's slices into the flat arrays of
/// [`IslandObjects`]. The spans vector always carries one trailing sentinel
/// entry holding the end offsets, so island `i` spans `spans[i]..spans[i+1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IslandSpan {
    pub island: IslandId,
    pub bodies: u32,
    pub articulations: u32,
    pub contact_managers: u32,
    pub constraints: u32,
    pub has_static_contact: bool,
}

/// One solver-visible duplicate of a kinematic body, owned by one island.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveKinematic {
    pub node: NodeId,
    pub owner: OwnerRef,
    pub island: IslandId,
}

/// A contact manager that needs a narrow-phase pass before the solver may
/// consume it, because its pair was woken by this island update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrowPhaseContactManager {
    pub contact_manager: OwnerRef,
    pub edge: EdgeId,
}

/// Flat per-island object arrays, sliced by [`IslandSpan`]s.
#[derive(Debug, Default)]
pub struct IslandObjects {
    pub bodies: Vec<IslandBody>,
    /// Distinct articulations per island, in first-seen member order.
    pub articulations: Vec<OwnerRef>,
    pub contact_managers: Vec<IndexedContactManager>,
    pub constraints: Vec<IndexedConstraint>,
}

impl IslandObjects {
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.articulations.clear();
        self.contact_managers.clear();
        self.constraints.clear();
    }
}

/// All outputs of one two-phase island update, consumed by the solver and by
/// the sleep/wake callback layer. Cleared by `free_buffers`.
#[derive(Debug, Default)]
pub struct SolverOutputs {
    pub spans: Vec<IslandSpan>,
    pub objects: IslandObjects,
    pub active_kinematics: Vec<ActiveKinematic>,
    pub bodies_to_wake: Vec<(NodeId, NodeOwner)>,
    pub bodies_to_sleep: Vec<(NodeId, NodeOwner)>,
    pub narrow_phase_contact_managers: Vec<NarrowPhaseContactManager>,
}

impl SolverOutputs {
    pub fn clear(&mut self) {
        self.spans.clear();
        self.objects.clear();
        self.active_kinematics.clear();
        self.bodies_to_wake.clear();
        self.bodies_to_sleep.clear();
        self.narrow_phase_contact_managers.clear();
    }

    /// Number of islands described by the span table (excludes the sentinel).
    pub fn island_count(&self) -> usize {
        self.spans.len().saturating_sub(1)
    }

    pub(crate) fn push_sentinel(&mut self) {
        use crate::utils::allocator::{ArenaKey, GenerationalId};
        self.spans.push(IslandSpan {
            island: IslandId::from_id(GenerationalId::new(u32::MAX, u32::MAX)),
            bodies: self.objects.bodies.len() as u32,
            articulations: self.objects.articulations.len() as u32,
            contact_managers: self.objects.contact_managers.len() as u32,
            constraints: self.objects.constraints.len() as u32,
            has_static_contact: false,
        });
    }

    pub(crate) fn pop_sentinel(&mut self) {
        if !self.spans.is_empty() {
            self.spans.pop();
        }
    }
}
