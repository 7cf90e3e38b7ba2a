//! Core shared types for the drivetrain (engine-agnostic).
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Vec3 = [f32; 3];

// ----- tiny vec helpers (keep rigid-body math types out of the core) -----
#[inline] pub fn v_add(a: Vec3, b: Vec3) -> Vec3 { [a[0]+b[0], a[1]+b[1], a[2]+b[2]] }
#[inline] pub fn v_sub(a: Vec3, b: Vec3) -> Vec3 { [a[0]-b[0], a[1]-b[1], a[2]-b[2]] }
#[inline] pub fn v_scale(v: Vec3, s: f32) -> Vec3 { [v[0]*s, v[1]*s, v[2]*s] }
#[inline] pub fn v_dot(a: Vec3, b: Vec3) -> f32 { a[0]*b[0] + a[1]*b[1] + a[2]*b[2] }
#[inline] pub fn v_mag(v: Vec3) -> f32 { v_dot(v, v).sqrt() }

#[inline]
pub fn v_norm(v: Vec3) -> Vec3 {
    let m = v_mag(v);
    if m > 1e-6 { v_scale(v, 1.0 / m) } else { [0.0, 0.0, 0.0] }
}

#[inline]
pub fn v_cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1]*b[2] - a[2]*b[1],
        a[2]*b[0] - a[0]*b[2],
        a[0]*b[1] - a[1]*b[0],
    ]
}

/// Removes the component of `v` along the unit vector `n`.
#[inline]
pub fn v_project_plane(v: Vec3, n: Vec3) -> Vec3 {
    v_sub(v, v_scale(n, v_dot(v, n)))
}

/// Rotates `v` around the unit axis `axis` by `angle` radians (Rodrigues).
pub fn v_rotate(v: Vec3, axis: Vec3, angle: f32) -> Vec3 {
    let (s, c) = angle.sin_cos();
    let k_cross_v = v_cross(axis, v);
    let k_dot_v = v_dot(axis, v);
    v_add(
        v_add(v_scale(v, c), v_scale(k_cross_v, s)),
        v_scale(axis, k_dot_v * (1.0 - c)),
    )
}

// ============================================
// Scalar hygiene
// ============================================

/// Replaces NaN/inf with `fallback`.
#[inline]
pub fn sanitize(x: f32, fallback: f32) -> f32 {
    if x.is_finite() { x } else { fallback }
}

#[inline]
pub fn clamp01(x: f32) -> f32 {
    sanitize(x, 0.0).clamp(0.0, 1.0)
}

#[inline]
pub fn clamp_signed(x: f32) -> f32 {
    sanitize(x, 0.0).clamp(-1.0, 1.0)
}

/// Critically damped approach of `current` toward `target`.
///
/// `velocity` carries the rate between calls. Never overshoots the target,
/// so a bounded target keeps the result bounded.
pub fn smooth_damp(current: f32, target: f32, velocity: &mut f32, smooth_time: f32, dt: f32) -> f32 {
    let smooth_time = smooth_time.max(1e-4);
    let omega = 2.0 / smooth_time;
    let x = omega * dt;
    let exp = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);

    let change = current - target;
    let temp = (*velocity + omega * change) * dt;
    *velocity = (*velocity - omega * temp) * exp;
    let mut out = target + (change + temp) * exp;

    // overshoot guard
    if (target - current > 0.0) == (out > target) {
        out = target;
        *velocity = (out - target) / dt.max(1e-6);
    }
    sanitize(out, target)
}

/// First-order lag with a per-second convergence `rate`.
#[inline]
pub fn approach(current: f32, target: f32, rate: f32, dt: f32) -> f32 {
    let k = (rate * dt).clamp(0.0, 1.0);
    current + (target - current) * k
}

// ============================================
// Sampled curves
// ============================================

/// Piecewise-linear curve over `(x, y)` samples sorted by `x`.
/// Outside the sampled range the end values are held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub points: Vec<(f32, f32)>,
}

impl Curve {
    pub fn new(mut points: Vec<(f32, f32)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn sample(&self, x: f32) -> f32 {
        let Some(&(x0, y0)) = self.points.first() else { return 0.0 };
        let x = sanitize(x, x0);
        if x <= x0 {
            return y0;
        }

        for pair in self.points.windows(2) {
            let (xa, ya) = pair[0];
            let (xb, yb) = pair[1];
            if x <= xb {
                let span = xb - xa;
                if span <= 1e-6 {
                    return yb;
                }
                return ya + (yb - ya) * (x - xa) / span;
            }
        }

        self.points.last().map(|p| p.1).unwrap_or(0.0)
    }
}

// ============================================
// Wheel identification
// ============================================

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side { Left, Right }

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    /// +1 for left, -1 for right.
    pub fn sign(self) -> f32 {
        match self {
            Side::Left => 1.0,
            Side::Right => -1.0,
        }
    }
}

/// Typed handle to a wheel: axle index plus side, resolved at configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WheelId {
    pub axle: usize,
    pub side: Side,
}

impl WheelId {
    pub fn new(axle: usize, side: Side) -> Self {
        Self { axle, side }
    }
}

impl fmt::Display for WheelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.side {
            Side::Left => "L",
            Side::Right => "R",
        };
        write!(f, "A{}{s}", self.axle)
    }
}

// ============================================
// ----- host boundary ------------------------
// ============================================

/// Chassis kinematics as reported by the rigid-body host, in world space.
#[derive(Debug, Clone, Copy)]
pub struct ChassisState {
    pub linvel: Vec3,  // m/s
    pub angvel: Vec3,  // rad/s
    pub forward: Vec3, // unit
    pub up: Vec3,      // unit
    pub right: Vec3,   // unit
    pub mass: f32,     // kg
}

impl Default for ChassisState {
    fn default() -> Self {
        Self {
            linvel: [0.0; 3],
            angvel: [0.0; 3],
            forward: [0.0, 0.0, 1.0],
            up: [0.0, 1.0, 0.0],
            right: [-1.0, 0.0, 0.0],
            mass: 1350.0,
        }
    }
}

impl ChassisState {
    /// Signed speed along the chassis heading, km/h.
    pub fn forward_speed_kmh(&self) -> f32 {
        v_dot(self.linvel, self.forward) * 3.6
    }

    /// Yaw rate around chassis up, rad/s.
    pub fn yaw_rate(&self) -> f32 {
        v_dot(self.angvel, self.up)
    }
}

/// Per-wheel ground contact reported by the host's suspension pass.
#[derive(Debug, Clone, Copy)]
pub struct WheelContact {
    pub grounded: bool,
    pub point: Vec3,
    pub normal: Vec3,
    pub point_velocity: Vec3, // m/s, chassis velocity at the contact point
    pub compression: f32,     // m of suspension travel used
    pub normal_force: f32,    // N
    pub material: usize,
}

impl WheelContact {
    pub fn airborne() -> Self {
        Self {
            grounded: false,
            point: [0.0; 3],
            normal: [0.0, 1.0, 0.0],
            point_velocity: [0.0; 3],
            compression: 0.0,
            normal_force: 0.0,
            material: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Impulse {
    /// Linear impulse in world space (N*s).
    pub impulse: Vec3,

    /// Optional application point (world). If None => apply at COM.
    pub at_point: Option<Vec3>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn curve_interpolates_and_holds_ends() {
        let c = Curve::new(vec![(1.0, 1.0), (0.0, 0.0), (2.0, 0.5)]);
        assert_abs_diff_eq!(c.sample(-1.0), 0.0);
        assert_abs_diff_eq!(c.sample(0.5), 0.5);
        assert_abs_diff_eq!(c.sample(1.5), 0.75);
        assert_abs_diff_eq!(c.sample(9.0), 0.5);
        assert_abs_diff_eq!(c.sample(f32::NAN), 0.0);
    }

    #[test]
    fn smooth_damp_never_overshoots() {
        let mut v = 0.0;
        let mut x = 0.0;
        for _ in 0..600 {
            x = smooth_damp(x, 100.0, &mut v, 0.1, 1.0 / 60.0);
            assert!(x <= 100.0);
        }
        assert_abs_diff_eq!(x, 100.0, epsilon = 1e-2);
    }

    #[test]
    fn rotate_quarter_turn_about_up() {
        let r = v_rotate([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], std::f32::consts::FRAC_PI_2);
        assert_abs_diff_eq!(r[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(r[2], 0.0, epsilon = 1e-5);
    }
}
