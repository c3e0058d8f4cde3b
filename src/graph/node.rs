use serde::{Deserialize, Serialize};

use crate::utils::allocator::{EdgeId, IslandId};

/// Opaque caller-side key identifying an externally owned object (a rigid
/// body, an articulation, a contact manager, or a constraint). The manager
/// never dereferences these; it only hands them back in solver output lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct OwnerRef(pub u64);

/// Back-reference from a graph node to the simulation object that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeOwner {
    /// A dynamic or kinematic rigid body.
    RigidBody(OwnerRef),
    /// One link of an articulation, identified by the owning articulation
    /// and the link's position within it.
    ArticulationLink { articulation: OwnerRef, link: u32 },
}

impl NodeOwner {
    pub fn is_articulation_link(&self) -> bool {
        matches!(self, NodeOwner::ArticulationLink { .. })
    }
}

const KINEMATIC: u8 = 1 << 0;
const NEW: u8 = 1 << 1;
const NOT_READY_FOR_SLEEPING: u8 = 1 << 2;
const IN_SLEEPING_ISLAND: u8 = 1 << 3;

/// One vertex of the connectivity graph: a dynamic rigid body or an
/// articulation link. Kinematic bodies are nodes too, but never members of
/// an island; they act as connectivity cuts.
#[derive(Debug, Clone)]
pub struct Node {
    pub owner: NodeOwner,
    /// Island this node currently belongs to. `None` for kinematic nodes and
    /// for nodes created since the last island update.
    pub island: Option<IslandId>,
    /// Edges incident to this node.
    pub edges: Vec<EdgeId>,
    flags: u8,
}

impl Node {
    pub fn new(owner: NodeOwner, kinematic: bool) -> Self {
        // Fresh bodies enter the world awake with a full wake counter, so
        // they start out not ready for sleeping.
        let mut flags = NEW | NOT_READY_FOR_SLEEPING;
        if kinematic {
            flags |= KINEMATIC;
        }
        Self {
            owner,
            island: None,
            edges: Vec::new(),
            flags,
        }
    }

    pub fn is_kinematic(&self) -> bool {
        self.flags & KINEMATIC != 0
    }

    pub fn set_kinematic(&mut self, kinematic: bool) {
        if kinematic {
            self.flags |= KINEMATIC;
        } else {
            self.flags &= !KINEMATIC;
        }
    }

    pub fn is_new(&self) -> bool {
        self.flags & NEW != 0
    }

    pub fn clear_new(&mut self) {
        self.flags &= !NEW;
    }

    pub fn is_ready_for_sleeping(&self) -> bool {
        self.flags & NOT_READY_FOR_SLEEPING == 0
    }

    pub fn set_ready_for_sleeping(&mut self) {
        self.flags &= !NOT_READY_FOR_SLEEPING;
    }

    pub fn set_not_ready_for_sleeping(&mut self) {
        self.flags |= NOT_READY_FOR_SLEEPING;
    }

    pub fn is_asleep(&self) -> bool {
        self.flags & IN_SLEEPING_ISLAND != 0
    }

    /// Marks the node awake and not ready for sleeping in one transition.
    pub fn set_awake(&mut self) {
        self.flags = (self.flags | NOT_READY_FOR_SLEEPING) & !IN_SLEEPING_ISLAND;
    }

    /// Marks the node asleep; asleep implies ready for sleeping.
    pub fn set_asleep(&mut self) {
        self.flags = (self.flags | IN_SLEEPING_ISLAND) & !NOT_READY_FOR_SLEEPING;
    }

    pub fn clear_asleep(&mut self) {
        self.flags &= !IN_SLEEPING_ISLAND;
    }

    pub(crate) fn unlink_edge(&mut self, edge: EdgeId) {
        if let Some(pos) = self.edges.iter().position(|&e| e == edge) {
            self.edges.swap_remove(pos);
        }
    }
}
