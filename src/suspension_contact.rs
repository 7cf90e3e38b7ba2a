// ==============================================================================
// suspension_contact.rs - RAYCAST SUSPENSION -> WheelContact
// ------------------------------------------------------------------------------
// One ray per wheel, cast along chassis-down from just above the mount point.
// The hit gives compression, ground normal and the ground material (collider
// user_data). Spring + one-way damper turn compression into a normal force.
//
// Notes:
// - This file does NOT apply impulses. It only measures contact data; the
//   physics host applies the suspension impulse and hands the contact to the
//   drivetrain core.
// - A miss, or a ray that stops short of rest length, reports an airborne
//   wheel.
// ==============================================================================

use rapier3d::prelude::*;

use crate::config::WheelConfig;
use crate::drivetrain::types::{Vec3, WheelContact};

/// Ray origin sits this far above the mount so a fully compressed wheel still hits.
const RAY_LIFT: f32 = 0.02;

/// Suspension velocities below this are treated as rest (m/s).
const VELOCITY_DEADZONE: f32 = 0.05;

/// Fraction of rebound velocity the damper sees.
const REBOUND_FACTOR: f32 = 0.4;

/// Damper force is limited to this share of the spring force.
const DAMPER_CLAMP: f32 = 0.6;

#[inline] pub(crate) fn v3(v: Vector<Real>) -> Vec3 { [v.x, v.y, v.z] }
#[inline] pub(crate) fn p3(p: Point<Real>) -> Vec3 { [p.x, p.y, p.z] }

/// Spring + one-way damper. `suspension_vel` is positive while extending.
pub fn compute_suspension_force(compression: f32, suspension_vel: f32, k: f32, c: f32) -> f32 {
    let v = if suspension_vel.abs() < VELOCITY_DEADZONE { 0.0 } else { suspension_vel };
    let v = if v > 0.0 { v * REBOUND_FACTOR } else { v };

    let spring = k * compression;
    let damper = (-c * v).clamp(-spring * DAMPER_CLAMP, spring * DAMPER_CLAMP);

    (spring + damper).max(0.0)
}

/// Wheel-side inputs that change at runtime (deflation).
#[derive(Debug, Clone, Copy)]
pub struct WheelGeometry<'a> {
    pub cfg: &'a WheelConfig,
    pub radius: f32,
    pub stiffness_multiplier: f32,
}

/// Casts the suspension ray for one wheel and measures its contact.
pub fn build_wheel_contact(
    wheel: WheelGeometry<'_>,
    body: &RigidBody,
    handle: RigidBodyHandle,
    query: &QueryPipeline,
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
) -> WheelContact {
    let pos = body.position();
    let up = pos.rotation * vector![0.0, 1.0, 0.0];
    let down = -up;
    let [mx, my, mz] = wheel.cfg.mount;
    let susp = &wheel.cfg.suspension;

    let origin = pos * point![mx, my, mz] + up * RAY_LIFT;
    let ray = Ray::new(origin, down);
    let max_dist = RAY_LIFT + susp.rest_length + wheel.radius;
    let filter = QueryFilter::default().exclude_rigid_body(handle);

    let Some((collider, hit)) = query.cast_ray_and_get_normal(bodies, colliders, &ray, max_dist, true, filter)
    else {
        return WheelContact::airborne();
    };

    let toi = hit.time_of_impact;
    let suspension_length = toi - RAY_LIFT - wheel.radius;
    let compression = (susp.rest_length - suspension_length).clamp(0.0, susp.max_length);
    if compression <= 0.0 {
        return WheelContact::airborne();
    }

    let hit_point = ray.point_at(toi);
    let normal = if hit.normal.norm() > 1e-6 { hit.normal.normalize() } else { up };

    let com = *body.center_of_mass();
    let r = hit_point - com;
    let point_vel = body.linvel() + body.angvel().cross(&r);
    let suspension_vel = point_vel.dot(&up);

    let normal_force = compute_suspension_force(
        compression,
        suspension_vel,
        susp.stiffness * wheel.stiffness_multiplier,
        susp.damping,
    );

    let material = colliders.get(collider).map(|c| c.user_data as usize).unwrap_or(0);

    WheelContact {
        grounded: true,
        point: p3(hit_point),
        normal: v3(normal),
        point_velocity: v3(point_vel),
        compression,
        normal_force,
        material,
    }
}
