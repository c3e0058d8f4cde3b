//! Connectivity graph primitives: node and edge records, per-step change
//! logs, and the union-find forest used for island recomputation.

pub mod change;
pub mod edge;
pub mod node;
pub mod union_find;

pub use change::{EdgeChangeManager, NodeChangeManager, TouchEvent, TouchEventQueue};
pub use edge::{Edge, EdgeKind, EdgePayload};
pub use node::{Node, NodeOwner, OwnerRef};
pub use union_find::UnionFind;
