// ==============================================================================
// anti_roll.rs - ANTI-ROLL BAR (ARB) IMPULSE PAIR
// ------------------------------------------------------------------------------
// Anti-roll bars create NO net vertical force; they push the more compressed
// side of the chassis up and the other side down by the same amount.
//
// compute_arb_impulses(left, right, stiffness, up, dt):
// - Requires both wheels grounded
// - delta = compression_l - compression_r
// - force = stiffness * delta, applied as +/- up at the two contact points
//
// Output is a contribution for the rigid-body integrator, not a torque stage.
// ==============================================================================

use crate::drivetrain::types::{Impulse, Vec3, WheelContact, sanitize, v_scale};

/// Compression differences below this are ignored (m).
const DEADZONE: f32 = 1e-4;

pub fn compute_arb_impulses(
    left: &WheelContact,
    right: &WheelContact,
    stiffness: f32,
    up: Vec3,
    dt: f32,
) -> Option<[Impulse; 2]> {
    if !(left.grounded && right.grounded) || stiffness <= 0.0 {
        return None;
    }

    let delta = sanitize(left.compression - right.compression, 0.0);
    if delta.abs() < DEADZONE {
        return None;
    }

    let force = stiffness * delta;
    let impulse = v_scale(up, force * dt);

    Some([
        Impulse { impulse, at_point: Some(left.point) },
        Impulse { impulse: v_scale(impulse, -1.0), at_point: Some(right.point) },
    ])
}
