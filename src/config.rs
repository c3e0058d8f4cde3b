//! Global configuration constants for the Archipelago island manager.

/// Default value a body's wake counter is reset to when it wakes up (in seconds).
pub const DEFAULT_WAKE_COUNTER_RESET: f32 = 0.4;

/// Default normalized-energy threshold below which a body may fall asleep.
pub const DEFAULT_SLEEP_THRESHOLD: f32 = 5.0e-5;

/// Default normalized-energy threshold below which a resting body may freeze.
pub const DEFAULT_FREEZE_THRESHOLD: f32 = 2.5e-5;

/// Time a body must stay below the freeze threshold before it is frozen (in seconds).
pub const FREEZE_INTERVAL: f32 = 1.0;

/// Velocity damping coefficient applied to bodies that are about to go to sleep.
pub const SLEEP_DAMPING: f32 = 0.5;

/// Acceleration scale retained by a frozen body between steps.
pub const FREEZE_SCALE: f32 = 0.9;

/// Default simulation timestep assumed by the sleep hysteresis (in seconds).
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;

/// Soft cap on per-step scratch buffer reservations, in entries. Reservations
/// beyond the cap fall back to exact-size allocation with a warning.
pub const SCRATCH_SOFT_CAP: usize = 1 << 20;
