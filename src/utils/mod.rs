//! Utility helpers: generational allocation and logging.

pub mod allocator;
pub mod logging;

pub use allocator::{Arena, ArenaKey, EdgeId, GenerationalId, IslandId, NodeId};
pub use logging::ScopedTimer;
