// ==============================================================================
// wheel.rs - WHEEL CONTACT MODEL (SPIN + SLIP + TIRE IMPULSES)
// ==============================================================================
// Per tick, per wheel:
//
// 0) Consume the torque accumulators (single-tick buffers):
//      motor = motor_acc * (1 - tcs_cut)
//      brake = brake_acc * (1 - abs_cut)
//    Cuts were written by stability LAST tick; both buffers and cuts reset.
//
// 1) Spin integration (I = 0.5 * m * r^2):
//      drive   : w += motor / I * dt
//      brake   : |w| -= brake / I * dt, never through zero
//      friction: w moves toward ground speed (v_long / r), limited by
//                mu(slip) * Fz * r, and never past ground speed
//
// 2) Longitudinal force on the chassis = what the tire took out of the spin:
//      Fx = -I * dw_friction / (r * dt)
//    so drive and brake forces always match the spin they changed.
//
// 3) Lateral force: mu(alpha) * Fz against v_lat, capped to the impulse that
//    cancels this wheel's share of lateral velocity (-v_lat * mass_share).
//
// 4) Friction ellipse on (Fx, Fy) against the material peaks.
//
// 5) Slip observation: raw forward/sideways slip smoothed at ~10/s,
//    combined = (|fwd| + |side|) / 2, skidding = combined > material threshold.
//
// Impulses: longitudinal at COM, lateral at the contact point (yaw moment).
// ==============================================================================

use std::f32::consts::PI;
use tracing::debug;

use crate::config::WheelConfig;
use crate::drivetrain::friction::GroundMaterial;
use crate::drivetrain::steering::steer_direction;
use crate::drivetrain::types::{
    ChassisState, Impulse, Vec3, WheelContact, WheelId, approach, clamp01, sanitize, v_cross, v_dot,
    v_mag, v_norm, v_project_plane, v_scale,
};

/// Per-second convergence of the observed slip toward its raw value.
pub const SLIP_SMOOTHING: f32 = 10.0;

/// Floor on |v_long| in slip denominators (m/s).
const MIN_SLIP_SPEED: f32 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct WheelStep<'a> {
    pub contact: &'a WheelContact,
    pub chassis: &'a ChassisState,
    /// Wheel steer angle, radians, positive = right.
    pub steer_angle: f32,
    /// Share of the chassis mass carried by this wheel (kg).
    pub mass_share: f32,
}

#[derive(Debug, Clone)]
pub struct Wheel {
    id: WheelId,
    cfg: WheelConfig,
    deflated: bool,

    angular_velocity: f32, // rad/s, + rolls forward

    // single-tick buffers
    motor_acc: f32,
    brake_acc: f32,
    tcs_cut: f32,
    abs_cut: f32,
    sideways_grip: f32,

    applied_motor: f32,
    applied_brake: f32,

    grounded: bool,
    material: usize,
    normal_force: f32,
    forward_slip: f32,
    sideways_slip: f32,
    skidding: bool,
    force_long: f32,
    force_lat: f32,
}

impl Wheel {
    pub fn new(id: WheelId, cfg: WheelConfig) -> Self {
        Self {
            id,
            cfg,
            deflated: false,
            angular_velocity: 0.0,
            motor_acc: 0.0,
            brake_acc: 0.0,
            tcs_cut: 0.0,
            abs_cut: 0.0,
            sideways_grip: 1.0,
            applied_motor: 0.0,
            applied_brake: 0.0,
            grounded: false,
            material: 0,
            normal_force: 0.0,
            forward_slip: 0.0,
            sideways_slip: 0.0,
            skidding: false,
            force_long: 0.0,
            force_lat: 0.0,
        }
    }

    // ---------------------------------------------------------
    // Inputs for this tick
    // ---------------------------------------------------------

    pub fn add_motor_torque(&mut self, torque: f32) {
        self.motor_acc += sanitize(torque, 0.0);
    }

    /// Brake torque is a magnitude; the sign is ignored.
    pub fn add_brake_torque(&mut self, torque: f32) {
        self.brake_acc += sanitize(torque, 0.0).abs();
    }

    /// Drive-torque reduction applied on the next step (0..1).
    pub fn set_tcs_cut(&mut self, cut: f32) {
        self.tcs_cut = clamp01(cut);
    }

    /// Brake-torque reduction applied on the next step (0..1).
    pub fn set_abs_cut(&mut self, cut: f32) {
        self.abs_cut = clamp01(cut);
    }

    /// Sideways stiffness factor for the next step (traction helper).
    pub fn set_sideways_grip(&mut self, factor: f32) {
        self.sideways_grip = clamp01(factor);
    }

    pub fn deflate(&mut self) -> bool {
        if self.deflated {
            return false;
        }
        self.deflated = true;
        debug!(wheel = %self.id, "tire deflated");
        true
    }

    pub fn inflate(&mut self) -> bool {
        if !self.deflated {
            return false;
        }
        self.deflated = false;
        debug!(wheel = %self.id, "tire inflated");
        true
    }

    /// Used by locked differentials to share one spin speed across an axle.
    pub fn set_angular_velocity(&mut self, w: f32) {
        self.angular_velocity = sanitize(w, 0.0);
    }

    // ---------------------------------------------------------
    // Step
    // ---------------------------------------------------------

    pub fn step(&mut self, input: &WheelStep, materials: &[GroundMaterial], out: &mut Vec<Impulse>, dt: f32) {
        let dt = sanitize(dt, 0.0);

        let motor = self.motor_acc * (1.0 - self.tcs_cut);
        let brake = self.brake_acc * (1.0 - self.abs_cut);
        let sideways_grip = self.sideways_grip;
        self.applied_motor = motor;
        self.applied_brake = brake;
        self.motor_acc = 0.0;
        self.brake_acc = 0.0;
        self.tcs_cut = 0.0;
        self.abs_cut = 0.0;
        self.sideways_grip = 1.0;

        if dt <= 0.0 {
            return;
        }

        let r = self.effective_radius();
        let inertia = self.inertia();

        // 1) drive + brake
        let mut w = self.angular_velocity + motor / inertia * dt;
        let brake_dw = brake / inertia * dt;
        w = if w.abs() <= brake_dw { 0.0 } else { w - brake_dw * w.signum() };

        let contact = input.contact;
        self.grounded = contact.grounded && contact.normal_force > 0.0;
        if !self.grounded {
            self.angular_velocity = sanitize(w, 0.0);
            self.normal_force = 0.0;
            self.force_long = 0.0;
            self.force_lat = 0.0;
            self.skidding = false;
            self.forward_slip = approach(self.forward_slip, 0.0, SLIP_SMOOTHING, dt);
            self.sideways_slip = approach(self.sideways_slip, 0.0, SLIP_SMOOTHING, dt);
            return;
        }

        self.material = if contact.material < materials.len() { contact.material } else { 0 };
        let Some(material) = materials.get(self.material) else {
            self.angular_velocity = sanitize(w, 0.0);
            return;
        };

        let fz = sanitize(contact.normal_force, 0.0).max(0.0);
        self.normal_force = fz;

        // contact basis, on the ground plane
        let normal = v_norm(contact.normal);
        let heading = steer_direction(input.chassis.forward, input.chassis.up, input.steer_angle);
        let fwd = v_norm(v_project_plane(heading, normal));
        let side = v_norm(v_cross(normal, fwd)); // +left

        let v_long = v_dot(contact.point_velocity, fwd);
        let v_lat = v_dot(contact.point_velocity, side);
        let denom = v_long.abs().max(MIN_SLIP_SPEED);

        let stiffness = self.stiffness_multiplier();

        // 2) friction on the spin, capped at ground speed
        let slip_before = (w * r - v_long) / denom;
        let mu_long = material.forward.evaluate(slip_before, stiffness);
        let max_dw = mu_long * fz * r / inertia * dt;
        let to_ground = v_long / r - w;
        let dw_friction = to_ground.clamp(-max_dw, max_dw);
        w += dw_friction;

        // material drag on the spin, implicit
        w /= 1.0 + material.damping.max(0.0) * dt / inertia;
        self.angular_velocity = sanitize(w, 0.0);

        let mut fx = -inertia * dw_friction / (r * dt);

        // rolling resistance, never reverses the roll
        let rr = self.cfg.rolling_resistance.max(0.0) * fz;
        let rr_cap = v_long.abs() * input.mass_share.max(0.0) / dt;
        fx -= v_long.signum() * rr.min(rr_cap);

        // 3) lateral
        let alpha = v_lat.atan2(denom);
        let mu_lat = material.sideways.evaluate(alpha, stiffness * sideways_grip);
        let lat_cap = v_lat.abs() * input.mass_share.max(0.0) / dt;
        let mut fy = -v_lat.signum() * (mu_lat * fz).min(lat_cap);

        // 4) friction ellipse
        let peak_x = (material.forward.peak(stiffness) * fz).max(1e-6);
        let peak_y = (material.sideways.peak(stiffness * sideways_grip) * fz).max(1e-6);
        let nx = fx / peak_x;
        let ny = fy / peak_y;
        let ellipse = nx * nx + ny * ny;
        if ellipse > 1.0 {
            let scale = 1.0 / ellipse.sqrt();
            fx *= scale;
            fy *= scale;
        }
        self.force_long = sanitize(fx, 0.0);
        self.force_lat = sanitize(fy, 0.0);

        // 5) observed slip
        let raw_forward = (self.angular_velocity * r - v_long) / denom;
        self.forward_slip = approach(self.forward_slip, sanitize(raw_forward, 0.0), SLIP_SMOOTHING, dt);
        self.sideways_slip = approach(self.sideways_slip, sanitize(alpha, 0.0), SLIP_SMOOTHING, dt);
        self.skidding = self.combined_slip() > material.slip_threshold;

        let long_impulse = v_scale(fwd, self.force_long * dt);
        if v_mag(long_impulse) > 1e-6 {
            out.push(Impulse { impulse: long_impulse, at_point: None });
        }
        let lat_impulse = v_scale(side, self.force_lat * dt);
        if v_mag(lat_impulse) > 1e-6 {
            out.push(Impulse { impulse: lat_impulse, at_point: Some(contact.point) });
        }
    }

    // ---------------------------------------------------------
    // Queries
    // ---------------------------------------------------------

    pub fn id(&self) -> WheelId { self.id }
    pub fn config(&self) -> &WheelConfig { &self.cfg }
    pub fn mount(&self) -> Vec3 { self.cfg.mount }
    pub fn is_deflated(&self) -> bool { self.deflated }
    pub fn is_grounded(&self) -> bool { self.grounded }
    pub fn is_skidding(&self) -> bool { self.skidding }
    pub fn material(&self) -> usize { self.material }
    pub fn normal_force(&self) -> f32 { self.normal_force }
    pub fn angular_velocity(&self) -> f32 { self.angular_velocity }
    pub fn forward_slip(&self) -> f32 { self.forward_slip }
    pub fn sideways_slip(&self) -> f32 { self.sideways_slip }
    pub fn applied_motor_torque(&self) -> f32 { self.applied_motor }
    pub fn applied_brake_torque(&self) -> f32 { self.applied_brake }
    pub fn longitudinal_force(&self) -> f32 { self.force_long }
    pub fn lateral_force(&self) -> f32 { self.force_lat }

    /// Motor torque queued for the next step, before any cut.
    pub fn pending_motor_torque(&self) -> f32 { self.motor_acc }

    pub fn combined_slip(&self) -> f32 {
        (self.forward_slip.abs() + self.sideways_slip.abs()) * 0.5
    }

    pub fn rpm(&self) -> f32 {
        self.angular_velocity * 60.0 / (2.0 * PI)
    }

    pub fn effective_radius(&self) -> f32 {
        let m = if self.deflated { self.cfg.deflated_radius_multiplier } else { 1.0 };
        (self.cfg.radius * m).max(1e-3)
    }

    pub fn stiffness_multiplier(&self) -> f32 {
        if self.deflated { self.cfg.deflated_stiffness_multiplier.max(0.0) } else { 1.0 }
    }

    pub fn inertia(&self) -> f32 {
        (0.5 * self.cfg.mass * self.cfg.radius * self.cfg.radius).max(1e-3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivetrain::types::Side;
    use approx::assert_abs_diff_eq;

    const DT: f32 = 1.0 / 60.0;

    fn wheel() -> Wheel {
        Wheel::new(WheelId::new(1, Side::Left), WheelConfig::default())
    }

    fn ground(v: Vec3) -> WheelContact {
        WheelContact {
            grounded: true,
            point: [0.76, 0.0, -1.3],
            point_velocity: v,
            compression: 0.1,
            normal_force: 3_300.0,
            ..WheelContact::airborne()
        }
    }

    fn step(w: &mut Wheel, contact: &WheelContact) -> Vec<Impulse> {
        let chassis = ChassisState::default();
        let mut out = Vec::new();
        let input = WheelStep { contact, chassis: &chassis, steer_angle: 0.0, mass_share: 340.0 };
        w.step(&input, &GroundMaterial::defaults(), &mut out, DT);
        out
    }

    #[test]
    fn accumulators_are_consumed_once() {
        let mut w = wheel();
        w.add_motor_torque(200.0);
        w.add_motor_torque(100.0);
        step(&mut w, &WheelContact::airborne());
        assert_abs_diff_eq!(w.applied_motor_torque(), 300.0);
        step(&mut w, &WheelContact::airborne());
        assert_eq!(w.applied_motor_torque(), 0.0);
    }

    #[test]
    fn tcs_cut_reduces_applied_torque_for_one_step() {
        let mut w = wheel();
        w.set_tcs_cut(0.5);
        w.add_motor_torque(200.0);
        step(&mut w, &WheelContact::airborne());
        assert_abs_diff_eq!(w.applied_motor_torque(), 100.0);

        w.add_motor_torque(200.0);
        step(&mut w, &WheelContact::airborne());
        assert_abs_diff_eq!(w.applied_motor_torque(), 200.0);
    }

    #[test]
    fn brake_never_reverses_spin() {
        let mut w = wheel();
        w.set_angular_velocity(5.0);
        w.add_brake_torque(10_000.0);
        step(&mut w, &WheelContact::airborne());
        assert_eq!(w.angular_velocity(), 0.0);

        w.set_angular_velocity(-5.0);
        w.add_brake_torque(1.0);
        step(&mut w, &WheelContact::airborne());
        assert!(w.angular_velocity() < 0.0);
    }

    #[test]
    fn drive_torque_pushes_chassis_forward() {
        let mut w = wheel();
        w.add_motor_torque(400.0);
        let out = step(&mut w, &ground([0.0; 3]));
        let push: f32 = out.iter().filter(|i| i.at_point.is_none()).map(|i| i.impulse[2]).sum();
        assert!(push > 0.0);
        // cannot deliver more than the torque allows
        assert!(push <= 400.0 / w.effective_radius() * DT + 1e-3);
    }

    #[test]
    fn free_rolling_wheel_matches_ground_speed() {
        let mut w = wheel();
        let v = 20.0;
        for _ in 0..120 {
            step(&mut w, &ground([0.0, 0.0, v]));
        }
        assert_abs_diff_eq!(w.angular_velocity() * w.effective_radius(), v, epsilon = 0.05);
        assert!(!w.is_skidding());
    }

    #[test]
    fn locked_wheel_skids_and_brakes_chassis() {
        let mut w = wheel();
        w.set_angular_velocity(20.0 / w.effective_radius());
        let mut last = Vec::new();
        for _ in 0..30 {
            w.add_brake_torque(20_000.0);
            last = step(&mut w, &ground([0.0, 0.0, 20.0]));
        }
        assert!(w.forward_slip() < -0.5);
        assert!(w.is_skidding());
        let push: f32 = last.iter().map(|i| i.impulse[2]).sum();
        assert!(push < 0.0);
    }

    #[test]
    fn lateral_impulse_never_exceeds_velocity_cancel() {
        let mut w = wheel();
        let v_lat = 0.3;
        let out = step(&mut w, &ground([v_lat, 0.0, 10.0]));
        let lat: f32 = out.iter().filter(|i| i.at_point.is_some()).map(|i| i.impulse[0]).sum();
        assert!(lat < 0.0, "opposes sliding to the left");
        assert!(lat.abs() <= v_lat * 340.0 + 1e-3);
    }

    #[test]
    fn deflation_is_idempotent_and_shrinks_radius() {
        let mut w = wheel();
        let r = w.effective_radius();
        assert!(w.deflate());
        assert!(!w.deflate());
        assert!(w.effective_radius() < r);
        assert!(w.stiffness_multiplier() < 1.0);
        assert!(w.inflate());
        assert!(!w.inflate());
        assert_abs_diff_eq!(w.effective_radius(), r);
    }

    #[test]
    fn unknown_material_falls_back_to_first() {
        let mut w = wheel();
        let mut c = ground([0.0, 0.0, 5.0]);
        c.material = 99;
        step(&mut w, &c);
        assert_eq!(w.material(), 0);
    }

    #[test]
    fn slip_is_smoothed_not_raw() {
        let mut w = wheel();
        w.set_angular_velocity(60.0);
        step(&mut w, &ground([0.0, 0.0, 0.0]));
        let first = w.forward_slip();
        let raw = w.angular_velocity() * w.effective_radius() / MIN_SLIP_SPEED;
        assert!(first > 0.0 && first < raw);
    }
}
