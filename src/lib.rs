//! Archipelago – simulation-island management for Rust physics engines.
//!
//! This crate keeps the island partition of a rigid-body world consistent as
//! contacts and joints come and go, and decides island by island which bodies
//! are simulated and which stay dormant, without recomputing connectivity
//! from scratch every step.

pub mod config;
pub mod graph;
pub mod island;
pub mod sleep;
pub mod utils;

pub use glam::{Quat, Vec3};

pub use graph::{Edge, EdgeKind, EdgePayload, Node, NodeOwner, OwnerRef, TouchEvent};
pub use island::{
    ActiveKinematic, IndexedConstraint, IndexedContactManager, IslandBody, IslandManager,
    IslandObjects, IslandSpan, NarrowPhaseContactManager, SecondPassToken, SolverBodyRef,
};
pub use sleep::{BodyMotion, SleepCheckOutcome, SleepConfig, SleepFilter};
pub use utils::allocator::{Arena, EdgeId, GenerationalId, IslandId, NodeId};

use std::collections::HashMap;

/// High-level convenience wrapper that owns an [`IslandManager`] together
/// with one [`SleepFilter`] per body, wiring sleep-check outcomes into the
/// manager's notifications.
pub struct IslandWorld {
    manager: IslandManager,
    filters: HashMap<NodeId, SleepFilter>,
    sleep_config: SleepConfig,
}

impl Default for IslandWorld {
    fn default() -> Self {
        Self::new(SleepConfig::default())
    }
}

impl IslandWorld {
    pub fn new(sleep_config: SleepConfig) -> Self {
        Self {
            manager: IslandManager::new(),
            filters: HashMap::new(),
            sleep_config,
        }
    }

    /// Adds a rigid body with a fresh sleep filter.
    pub fn add_body(&mut self, owner: OwnerRef, kinematic: bool) -> NodeId {
        let node = self.manager.add_body(owner, kinematic);
        self.filters
            .insert(node, SleepFilter::new(&self.sleep_config));
        node
    }

    pub fn remove_body(&mut self, node: NodeId) {
        self.manager.remove_node(node);
        self.filters.remove(&node);
    }

    /// Feeds one motion sample through the body's hysteresis and forwards the
    /// resulting readiness transitions to the island manager.
    pub fn observe_motion(&mut self, node: NodeId, motion: &BodyMotion, dt: f32) -> SleepCheckOutcome {
        let Some(filter) = self.filters.get_mut(&node) else {
            debug_assert!(false, "observe_motion on an unknown body");
            return SleepCheckOutcome::default();
        };
        let outcome = filter.sleep_check(motion, dt, 1.0 / dt, &self.sleep_config);
        if outcome.not_ready_for_sleeping {
            self.manager.notify_not_ready_for_sleeping(node);
        } else if outcome.ready_for_sleeping {
            self.manager.notify_ready_for_sleeping(node);
        }
        outcome
    }

    /// Runs both phases of the island update back to back. Callers with a
    /// real narrow phase drive the manager directly instead.
    pub fn update(&mut self) {
        let token = self.manager.update_islands();
        self.manager.update_islands_second_pass(token);

        // Seed the wake counters of bodies the manager just woke, so they
        // cannot report ready-for-sleeping on the next sample.
        let woken: Vec<NodeId> = self
            .manager
            .bodies_to_wake()
            .iter()
            .map(|&(node, _)| node)
            .collect();
        let slept: Vec<NodeId> = self
            .manager
            .bodies_to_sleep()
            .iter()
            .map(|&(node, _)| node)
            .collect();
        for node in woken {
            if let Some(filter) = self.filters.get_mut(&node) {
                filter.wake_up(self.sleep_config.wake_counter_reset);
            }
        }
        for node in slept {
            if let Some(filter) = self.filters.get_mut(&node) {
                filter.put_to_sleep();
            }
        }
    }

    pub fn manager(&self) -> &IslandManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut IslandManager {
        &mut self.manager
    }

    pub fn sleep_filter(&self, node: NodeId) -> Option<&SleepFilter> {
        self.filters.get(&node)
    }
}
