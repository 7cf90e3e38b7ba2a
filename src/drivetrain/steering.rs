// ==============================================================================
// steering.rs - ACKERMANN STEERING GEOMETRY + RATE-LIMITED STEER ANGLE
// ==============================================================================
// Responsibilities:
// - Move the axle's base steer angle toward steer_input * max_steer_angle at a
//   bounded rate (steer_speed, deg/s)
// - Optionally fade steering authority with speed (to 35% at fade speed)
// - Split the base angle into left/right wheel angles with Ackermann geometry,
//   blended against parallel steer
// - Rotate the chassis heading into per-wheel forward directions
// ------------------------------------------------------------------------------
// Sign convention: positive angle = right turn. Chassis +X is left, so a right
// turn rotates the heading by a NEGATIVE angle around +Y.
// ==============================================================================

use crate::config::AxleConfig;
use crate::drivetrain::types::{Vec3, clamp01, clamp_signed, sanitize, v_norm, v_rotate};

/// Authority left at `steer_fade_speed_kmh`.
const FADE_FLOOR: f32 = 0.35;

#[derive(Debug, Clone, Copy, Default)]
pub struct Steering {
    angle: f32, // deg, base (bicycle) angle
}

impl Steering {
    /// Rate-limits the base angle toward the driver's request. Returns degrees.
    pub fn update(&mut self, steer_input: f32, speed_kmh: f32, cfg: &AxleConfig, dt: f32) -> f32 {
        if !cfg.steered {
            self.angle = 0.0;
            return 0.0;
        }

        let mut authority = 1.0;
        if cfg.steer_fade_speed_kmh > 0.0 {
            let t = clamp01(sanitize(speed_kmh, 0.0).abs() / cfg.steer_fade_speed_kmh);
            authority = 1.0 + (FADE_FLOOR - 1.0) * t;
        }

        let target = clamp_signed(steer_input) * cfg.max_steer_angle * cfg.steer_multiplier * authority;

        // rate limit (deg/s)
        let max_step = cfg.steer_speed.max(0.0) * sanitize(dt, 0.0).max(0.0);
        let delta = (target - self.angle).clamp(-max_step, max_step);
        self.angle = sanitize(self.angle + delta, 0.0);
        self.angle
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn reset(&mut self) {
        self.angle = 0.0;
    }

    /// Left/right wheel angles in radians.
    pub fn wheel_angles(&self, wheelbase: f32, track: f32, ackermann: f32) -> (f32, f32) {
        let base = self.angle.to_radians();
        let (ack_l, ack_r) = ackermann_angles(base, wheelbase, track);
        let blend = clamp01(ackermann);
        (
            (1.0 - blend) * base + blend * ack_l,
            (1.0 - blend) * base + blend * ack_r,
        )
    }
}

/// Inner/outer wheel angles for a bicycle-model angle `base` (radians).
/// Returns (left, right).
pub fn ackermann_angles(base: f32, wheelbase: f32, track: f32) -> (f32, f32) {
    let eps = 1e-4;
    if base.abs() < eps || wheelbase <= eps {
        return (base, base);
    }

    let sign = base.signum();
    let a = base.abs();

    // turning radius at the axle centerline
    let r = wheelbase / a.tan();

    let r_in = (r - track * 0.5).max(0.01);
    let r_out = (r + track * 0.5).max(0.01);

    let inner = (wheelbase / r_in).atan() * sign;
    let outer = (wheelbase / r_out).atan() * sign;

    if sign > 0.0 {
        (outer, inner) // right turn: right wheel is inner
    } else {
        (inner, outer)
    }
}

/// Chassis heading rotated by a steer angle (radians, positive = right).
pub fn steer_direction(forward: Vec3, up: Vec3, angle: f32) -> Vec3 {
    v_norm(v_rotate(forward, up, -angle))
}
