use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_FREEZE_THRESHOLD, DEFAULT_SLEEP_THRESHOLD, DEFAULT_WAKE_COUNTER_RESET, FREEZE_INTERVAL,
    FREEZE_SCALE, SLEEP_DAMPING,
};

/// Tunables of the sleep/freeze hysteresis. The damping curve and thresholds
/// are empirical; they shape sleep quality, not correctness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SleepConfig {
    /// Value the wake counter is seeded with on wake-up (seconds).
    pub wake_counter_reset: f32,
    /// Normalized-energy threshold below which the wake counter may decay.
    pub sleep_threshold: f32,
    /// Normalized-energy threshold below which a statically supported body
    /// may freeze.
    pub freeze_threshold: f32,
    /// Time below the freeze threshold required before freezing (seconds).
    pub freeze_interval: f32,
    /// Velocity damping coefficient for bodies about to sleep.
    pub sleep_damping: f32,
    /// Acceleration scale retained by a frozen body.
    pub freeze_scale: f32,
    /// Enables the freeze/stabilization path.
    pub stabilization: bool,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            wake_counter_reset: DEFAULT_WAKE_COUNTER_RESET,
            sleep_threshold: DEFAULT_SLEEP_THRESHOLD,
            freeze_threshold: DEFAULT_FREEZE_THRESHOLD,
            freeze_interval: FREEZE_INTERVAL,
            sleep_damping: SLEEP_DAMPING,
            freeze_scale: FREEZE_SCALE,
            stabilization: true,
        }
    }
}

/// Motion sample for one body, fed to the filter every step.
#[derive(Debug, Clone, Copy)]
pub struct BodyMotion {
    pub linear_velocity: Vec3,
    /// World-space angular velocity.
    pub angular_velocity: Vec3,
    /// Body-to-world rotation, used to express angular motion in the inertia
    /// frame.
    pub rotation: Quat,
    pub inverse_mass: f32,
    /// Principal inverse inertia diagonal.
    pub inverse_inertia: Vec3,
    /// Number of unique interactions on the body (contacts and joints).
    pub interaction_count: u32,
    /// True when the body rests on static geometry.
    pub has_static_touch: bool,
}

/// Result of one sleep check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepCheckOutcome {
    pub wake_counter: f32,
    /// The wake counter reached zero; report `notify_ready_for_sleeping`.
    pub ready_for_sleeping: bool,
    /// The body crossed back over the energy threshold after having been
    /// processed with a zero wake counter; report
    /// `notify_not_ready_for_sleeping`.
    pub not_ready_for_sleeping: bool,
    /// The body is frozen: clamp its integrated pose to the last transform.
    pub frozen: bool,
    /// When set, scale both velocities by this factor before integration.
    pub velocity_damping: Option<f32>,
}

/// Per-body sleep hysteresis: a decaying wake counter gated by normalized
/// kinetic energy accumulated over a rolling window.
///
/// A body hovering near the threshold does not flicker: crossing the
/// accumulated threshold resets the counter proportionally to the overshoot
/// (capped at twice the reset value) and clears the window.
#[derive(Debug, Clone, Copy)]
pub struct SleepFilter {
    wake_counter: f32,
    lin_vel_acc: Vec3,
    ang_vel_acc: Vec3,
    freeze_count: f32,
    accel_scale: f32,
    frozen: bool,
}

impl Default for SleepFilter {
    fn default() -> Self {
        Self::new(&SleepConfig::default())
    }
}

impl SleepFilter {
    pub fn new(config: &SleepConfig) -> Self {
        Self {
            wake_counter: config.wake_counter_reset,
            lin_vel_acc: Vec3::ZERO,
            ang_vel_acc: Vec3::ZERO,
            freeze_count: config.freeze_interval,
            accel_scale: 0.0,
            frozen: false,
        }
    }

    pub fn wake_counter(&self) -> f32 {
        self.wake_counter
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Scale factor for externally applied acceleration while the body is in
    /// the stabilization regime.
    pub fn accel_scale(&self) -> f32 {
        self.accel_scale
    }

    /// External wake-up. Can only raise the counter, never lower it.
    pub fn wake_up(&mut self, wake_counter_value: f32) {
        debug_assert!(wake_counter_value > 0.0);
        if self.wake_counter < wake_counter_value {
            self.wake_counter = wake_counter_value;
        }
        self.frozen = false;
    }

    /// Forces the counter to zero, e.g. when the island manager puts the
    /// whole island to sleep.
    pub fn put_to_sleep(&mut self) {
        self.wake_counter = 0.0;
        self.reset_accumulators();
    }

    fn reset_accumulators(&mut self) {
        self.lin_vel_acc = Vec3::ZERO;
        self.ang_vel_acc = Vec3::ZERO;
    }

    /// Runs one step of the hysteresis and reports the transitions the caller
    /// must forward to the island manager.
    pub fn sleep_check(
        &mut self,
        motion: &BodyMotion,
        dt: f32,
        inv_dt: f32,
        config: &SleepConfig,
    ) -> SleepCheckOutcome {
        let mut outcome = SleepCheckOutcome::default();

        let wake_counter = self.update_wake_counter(motion, dt, inv_dt, config, &mut outcome);
        outcome.wake_counter = wake_counter;
        outcome.frozen = self.frozen;

        if wake_counter == 0.0 {
            outcome.ready_for_sleeping = true;
            self.reset_accumulators();
        }
        outcome
    }

    fn update_wake_counter(
        &mut self,
        motion: &BodyMotion,
        dt: f32,
        inv_dt: f32,
        config: &SleepConfig,
        outcome: &mut SleepCheckOutcome,
    ) -> f32 {
        let reset = config.wake_counter_reset;
        let mut wc = self.wake_counter;

        // Normalized kinetic energy: kinetic energy divided by mass. Zero
        // inverse mass/inertia (infinite mass) normalizes with 1 instead.
        let inertia = recip_or_one(motion.inverse_inertia);
        let inv_mass = if motion.inverse_mass == 0.0 {
            1.0
        } else {
            motion.inverse_mass
        };
        let lin = motion.linear_velocity;
        let ang = motion.rotation.inverse() * motion.angular_velocity;

        let angular = (ang * ang).dot(inertia) * inv_mass;
        let frame_energy = 0.5 * (angular + lin.length_squared());

        if config.stabilization {
            let cluster_factor = motion.interaction_count;

            // More static contacts raise the freeze threshold: a stack
            // settles as a cluster, not body by body.
            let cf = if motion.has_static_touch && cluster_factor > 1 {
                cluster_factor as f32
            } else {
                0.0
            };
            let freeze_threshold = cf * config.freeze_threshold;

            self.freeze_count = (self.freeze_count - dt).max(0.0);
            let mut settled = true;
            if frame_energy >= freeze_threshold {
                settled = false;
                self.freeze_count = config.freeze_interval;
                if frame_energy >= freeze_threshold * cf {
                    self.accel_scale = 0.0;
                }
            }

            let mut frozen = false;
            if settled || self.accel_scale > 0.0 {
                // Dampen bodies that are just about to go to sleep.
                let d = 1.0 - config.sleep_damping * dt;
                outcome.velocity_damping = Some(d);
                self.accel_scale = inv_dt * config.freeze_scale;
                frozen = self.freeze_count == 0.0 && frame_energy < config.freeze_threshold;
            }
            self.frozen = frozen;

            // Sleeping requires the energy of this frame and the energy
            // accumulated over the preparation window to both stay low.
            if wc < reset * 0.5 || wc < dt {
                self.lin_vel_acc += lin;
                self.ang_vel_acc += ang;

                if frame_energy >= config.sleep_threshold {
                    let acc_angular =
                        (self.ang_vel_acc * self.ang_vel_acc).dot(inertia) * inv_mass;
                    let acc_linear = self.lin_vel_acc.length_squared();
                    let normalized_energy = 0.5 * (acc_angular + acc_linear);

                    let sleep_cluster_factor = cluster_factor as f32 + 1.0;
                    let threshold = sleep_cluster_factor * config.sleep_threshold;

                    if normalized_energy >= threshold {
                        self.reset_accumulators();
                        let factor = if config.sleep_threshold == 0.0 {
                            2.0
                        } else {
                            (normalized_energy / threshold).min(2.0)
                        };
                        let old_wc = wc;
                        wc = factor * 0.5 * reset + dt * (sleep_cluster_factor - 1.0);
                        self.wake_counter = wc;
                        if old_wc == 0.0 {
                            // The body was activated by the system and already
                            // processed by the solver with a zero counter.
                            outcome.not_ready_for_sleeping = true;
                        }
                        return wc;
                    }
                }
            }
        } else if wc < reset * 0.5 || wc < dt {
            self.lin_vel_acc += lin;
            self.ang_vel_acc += ang;

            let acc_angular = (self.ang_vel_acc * self.ang_vel_acc).dot(inertia) * inv_mass;
            let acc_linear = self.lin_vel_acc.length_squared();
            let normalized_energy = 0.5 * (acc_angular + acc_linear);

            let cluster_factor = 1.0 + motion.interaction_count as f32;
            let threshold = cluster_factor * config.sleep_threshold;

            if normalized_energy >= threshold {
                self.reset_accumulators();
                let factor = if threshold == 0.0 {
                    2.0
                } else {
                    (normalized_energy / threshold).min(2.0)
                };
                let old_wc = wc;
                wc = factor * 0.5 * reset + dt * (cluster_factor - 1.0);
                self.wake_counter = wc;
                if old_wc == 0.0 {
                    outcome.not_ready_for_sleeping = true;
                }
                return wc;
            }
        }

        wc = (wc - dt).max(0.0);
        self.wake_counter = wc;
        wc
    }
}

fn recip_or_one(v: Vec3) -> Vec3 {
    Vec3::new(
        if v.x > 0.0 { 1.0 / v.x } else { 1.0 },
        if v.y > 0.0 { 1.0 / v.y } else { 1.0 },
        if v.z > 0.0 { 1.0 / v.z } else { 1.0 },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quiescent_motion() -> BodyMotion {
        BodyMotion {
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            inverse_mass: 1.0,
            inverse_inertia: Vec3::ONE,
            interaction_count: 0,
            has_static_touch: false,
        }
    }

    #[test]
    fn wake_counter_decays_to_zero_when_quiescent() {
        let config = SleepConfig::default();
        let mut filter = SleepFilter::new(&config);
        let dt = 1.0 / 60.0;
        let motion = quiescent_motion();

        let mut ready = false;
        for _ in 0..30 {
            let outcome = filter.sleep_check(&motion, dt, 60.0, &config);
            if outcome.ready_for_sleeping {
                ready = true;
                break;
            }
        }
        assert!(ready, "a motionless body must become ready for sleeping");
        assert_relative_eq!(filter.wake_counter(), 0.0);
    }

    #[test]
    fn energy_spike_resets_counter_proportionally() {
        let config = SleepConfig::default();
        let mut filter = SleepFilter::new(&config);
        let dt = 1.0 / 60.0;

        let quiet = quiescent_motion();
        while filter.wake_counter() > 0.0 {
            filter.sleep_check(&quiet, dt, 60.0, &config);
        }

        let mut moving = quiescent_motion();
        moving.linear_velocity = Vec3::new(1.0, 0.0, 0.0);
        let outcome = filter.sleep_check(&moving, dt, 60.0, &config);

        assert!(!outcome.ready_for_sleeping);
        assert!(outcome.not_ready_for_sleeping);
        // The overshoot factor is capped at 2, so the counter never exceeds
        // the reset value (plus the cluster term, zero here).
        assert!(outcome.wake_counter > 0.0);
        assert!(outcome.wake_counter <= config.wake_counter_reset + dt);
    }

    #[test]
    fn near_threshold_body_does_not_flicker() {
        let config = SleepConfig::default();
        let mut filter = SleepFilter::new(&config);
        let dt = 1.0 / 60.0;

        // Per-frame energy just above the sleep threshold: accumulation keeps
        // resetting the counter instead of letting it oscillate through zero.
        let speed = (2.0 * config.sleep_threshold).sqrt() * 1.1;
        let mut motion = quiescent_motion();
        motion.linear_velocity = Vec3::new(speed, 0.0, 0.0);

        for _ in 0..600 {
            let outcome = filter.sleep_check(&motion, dt, 60.0, &config);
            assert!(
                !outcome.ready_for_sleeping,
                "a body above threshold must never report ready"
            );
        }
    }

    #[test]
    fn freeze_requires_sustained_static_rest() {
        let config = SleepConfig::default();
        let mut filter = SleepFilter::new(&config);
        let dt = 1.0 / 60.0;

        let mut motion = quiescent_motion();
        motion.interaction_count = 3;
        motion.has_static_touch = true;

        let mut frozen_at = None;
        for step in 0..120 {
            let outcome = filter.sleep_check(&motion, dt, 60.0, &config);
            if outcome.frozen {
                frozen_at = Some(step);
                break;
            }
        }
        let frozen_at = frozen_at.expect("a resting body must eventually freeze");
        // Roughly one freeze interval of sustained rest.
        assert!(frozen_at as f32 * dt >= config.freeze_interval - dt * 2.0);
    }

    #[test]
    fn infinite_mass_normalizes_without_dividing_by_zero() {
        let config = SleepConfig::default();
        let mut filter = SleepFilter::new(&config);
        let mut motion = quiescent_motion();
        motion.inverse_mass = 0.0;
        motion.inverse_inertia = Vec3::ZERO;
        motion.angular_velocity = Vec3::new(0.5, 0.0, 0.0);

        let outcome = filter.sleep_check(&motion, 1.0 / 60.0, 60.0, &config);
        assert!(outcome.wake_counter.is_finite());
    }

    #[test]
    fn external_wake_up_only_raises_the_counter() {
        let config = SleepConfig::default();
        let mut filter = SleepFilter::new(&config);
        filter.put_to_sleep();
        assert_relative_eq!(filter.wake_counter(), 0.0);

        filter.wake_up(config.wake_counter_reset);
        assert_relative_eq!(filter.wake_counter(), config.wake_counter_reset);

        // A smaller value must not lower it.
        filter.wake_up(0.1);
        assert_relative_eq!(filter.wake_counter(), config.wake_counter_reset);
    }
}
