//! Axle: owns its wheel pair, resolves steering and brakes from the
//! aggregated input, and forwards differential torque to the wheels.

use crate::config::AxleConfig;
use crate::drivetrain::anti_roll::compute_arb_impulses;
use crate::drivetrain::friction::GroundMaterial;
use crate::drivetrain::steering::Steering;
use crate::drivetrain::types::{ChassisState, Impulse, Side, WheelContact, WheelId, clamp01, clamp_signed};
use crate::drivetrain::wheel::{Wheel, WheelStep};

/// Per-tick controls, already resolved by the vehicle's input step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxleControls {
    pub steer: f32,
    pub brake: f32,
    pub handbrake: f32,
    pub speed_kmh: f32,
    /// Transmission is in Park.
    pub park: bool,
}

#[derive(Debug, Clone)]
pub struct Axle {
    index: usize,
    cfg: AxleConfig,
    wheels: [Wheel; 2],
    steering: Steering,
    wheel_angles: (f32, f32), // rad
    brake_input: f32,
}

impl Axle {
    /// `cfg` must hold exactly two wheels (checked by config validation).
    pub fn new(index: usize, cfg: AxleConfig) -> Self {
        let left = cfg.wheels.first().cloned().unwrap_or_default();
        let right = cfg.wheels.get(1).cloned().unwrap_or_default();
        Self {
            index,
            wheels: [
                Wheel::new(WheelId::new(index, Side::Left), left),
                Wheel::new(WheelId::new(index, Side::Right), right),
            ],
            cfg,
            steering: Steering::default(),
            wheel_angles: (0.0, 0.0),
            brake_input: 0.0,
        }
    }

    /// Steering and brake torque for this tick.
    pub fn apply_controls(&mut self, controls: &AxleControls, wheelbase: f32, dt: f32) {
        self.steering.update(clamp_signed(controls.steer), controls.speed_kmh, &self.cfg, dt);
        self.wheel_angles = self.steering.wheel_angles(wheelbase, self.cfg.track_width(), self.cfg.ackermann);

        let mut brake_input = 0.0_f32;
        let mut torque = 0.0;

        if self.cfg.braked {
            let brake = if controls.park { 1.0 } else { clamp01(controls.brake) };
            brake_input = brake_input.max(brake);
            torque += brake * self.cfg.max_brake_torque * self.cfg.brake_multiplier;
        }
        if self.cfg.handbraked {
            let handbrake = clamp01(controls.handbrake);
            brake_input = brake_input.max(handbrake);
            torque += handbrake * self.cfg.max_handbrake_torque * self.cfg.handbrake_multiplier;
        }

        self.brake_input = brake_input;
        if torque > 0.0 {
            for w in &mut self.wheels {
                w.add_brake_torque(torque);
            }
        }
    }

    /// Differential output into the wheels.
    pub fn apply_drive(&mut self, left: f32, right: f32) {
        if !self.cfg.powered {
            return;
        }
        let m = self.cfg.power_multiplier;
        self.wheels[0].add_motor_torque(left * m);
        self.wheels[1].add_motor_torque(right * m);
    }

    /// Steps both wheels and appends their tire impulses plus the anti-roll pair.
    pub fn step(
        &mut self,
        chassis: &ChassisState,
        contacts: [&WheelContact; 2],
        mass_shares: [f32; 2],
        materials: &[GroundMaterial],
        out: &mut Vec<Impulse>,
        dt: f32,
    ) {
        let angles = [self.wheel_angles.0, self.wheel_angles.1];
        for (i, wheel) in self.wheels.iter_mut().enumerate() {
            let input = WheelStep {
                contact: contacts[i],
                chassis,
                steer_angle: angles[i],
                mass_share: mass_shares[i],
            };
            wheel.step(&input, materials, out, dt);
        }

        if let Some(pair) = compute_arb_impulses(contacts[0], contacts[1], self.cfg.anti_roll, chassis.up, dt) {
            out.extend(pair);
        }
    }

    /// Locked differential: both wheels share the mean spin.
    pub fn couple_spin(&mut self) {
        let mean = (self.wheels[0].angular_velocity() + self.wheels[1].angular_velocity()) * 0.5;
        for w in &mut self.wheels {
            w.set_angular_velocity(mean);
        }
    }

    pub fn index(&self) -> usize { self.index }
    pub fn config(&self) -> &AxleConfig { &self.cfg }
    pub fn is_powered(&self) -> bool { self.cfg.powered }
    pub fn is_steered(&self) -> bool { self.cfg.steered }
    pub fn is_braked(&self) -> bool { self.cfg.braked }
    pub fn brake_input(&self) -> f32 { self.brake_input }
    pub fn steer_angle(&self) -> f32 { self.steering.angle() }
    pub fn wheel_angles(&self) -> (f32, f32) { self.wheel_angles }
    pub fn max_brake_torque(&self) -> f32 { self.cfg.max_brake_torque * self.cfg.brake_multiplier }

    pub fn wheel(&self, side: Side) -> &Wheel { &self.wheels[side.index()] }
    pub fn wheel_mut(&mut self, side: Side) -> &mut Wheel { &mut self.wheels[side.index()] }
    pub fn wheels(&self) -> &[Wheel; 2] { &self.wheels }
    pub fn wheels_mut(&mut self) -> &mut [Wheel; 2] { &mut self.wheels }

    /// Signed mean wheel rpm.
    pub fn mean_rpm(&self) -> f32 {
        (self.wheels[0].rpm() + self.wheels[1].rpm()) * 0.5
    }

    pub fn sideways_slip_sum(&self) -> f32 {
        self.wheels.iter().map(|w| w.sideways_slip()).sum()
    }

    pub fn reset(&mut self) {
        self.steering.reset();
        self.wheel_angles = (0.0, 0.0);
        for w in &mut self.wheels {
            w.set_angular_velocity(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleConfig;
    use approx::assert_abs_diff_eq;

    const DT: f32 = 1.0 / 60.0;

    fn rear() -> Axle {
        Axle::new(1, VehicleConfig::gt86().axles[1].clone())
    }

    fn step_airborne(axle: &mut Axle) {
        let air = WheelContact::airborne();
        let mut out = Vec::new();
        axle.step(&ChassisState::default(), [&air, &air], [300.0, 300.0], &GroundMaterial::defaults(), &mut out, DT);
    }

    #[test]
    fn brake_torque_scales_with_input_and_multiplier() {
        let mut axle = rear();
        axle.apply_controls(&AxleControls { brake: 0.5, ..AxleControls::default() }, 2.55, DT);
        step_airborne(&mut axle);
        let cfg = axle.config();
        let expected = 0.5 * cfg.max_brake_torque * cfg.brake_multiplier;
        assert_abs_diff_eq!(axle.wheel(Side::Left).applied_brake_torque(), expected);
    }

    #[test]
    fn park_forces_full_brake() {
        let mut axle = rear();
        axle.apply_controls(&AxleControls { park: true, ..AxleControls::default() }, 2.55, DT);
        assert_eq!(axle.brake_input(), 1.0);
        step_airborne(&mut axle);
        assert_abs_diff_eq!(axle.wheel(Side::Right).applied_brake_torque(), axle.max_brake_torque());
    }

    #[test]
    fn unpowered_axle_ignores_drive() {
        let mut front = Axle::new(0, VehicleConfig::gt86().axles[0].clone());
        front.apply_drive(100.0, 100.0);
        step_airborne(&mut front);
        assert_eq!(front.wheel(Side::Left).applied_motor_torque(), 0.0);
    }

    #[test]
    fn coupling_equalises_spin() {
        let mut axle = rear();
        axle.wheel_mut(Side::Left).set_angular_velocity(10.0);
        axle.wheel_mut(Side::Right).set_angular_velocity(30.0);
        axle.couple_spin();
        assert_abs_diff_eq!(axle.wheel(Side::Left).angular_velocity(), 20.0);
        assert_abs_diff_eq!(axle.wheel(Side::Right).angular_velocity(), 20.0);
    }
}
