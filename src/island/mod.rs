//! Island partitioning: the island table, kinematic duplication tracking,
//! solver output layout, and the two-phase update orchestrator.

pub mod kinematics;
pub mod manager;
pub mod outputs;
pub mod table;

pub use kinematics::KinematicTracker;
pub use manager::{ChangeCounters, IslandManager, SecondPassToken};
pub use outputs::{
    ActiveKinematic, IndexedConstraint, IndexedContactManager, IslandBody, IslandObjects,
    IslandSpan, NarrowPhaseContactManager, SolverBodyRef, SolverOutputs,
};
pub use table::{Island, IslandTable};
