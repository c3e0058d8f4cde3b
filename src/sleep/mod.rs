//! Per-body sleep readiness: wake-counter hysteresis over normalized kinetic
//! energy, with the freeze/stabilization damping mode.
//!
//! The filter is owned by the body simulation object; the island manager only
//! consumes the resulting ready/not-ready notifications.

pub mod filter;

pub use filter::{BodyMotion, SleepCheckOutcome, SleepConfig, SleepFilter};
