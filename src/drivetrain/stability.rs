// ==============================================================================
// stability.rs - ABS / TCS / ESP + STEERING AND TRACTION HELPERS
// ------------------------------------------------------------------------------
// Runs after the wheels have stepped. Reads this tick's slip and writes
// corrections the wheels consume on their NEXT step (one tick of delay):
//
//   ABS : braked wheel, |fwd slip| * brake_input >= threshold -> abs_cut
//   TCS : powered wheel, fwd slip * direction > threshold     -> tcs_cut
//   ESP : front sideways slip sum beyond threshold (understeer)
//           -> brake the rear wheel on the inside of the slide
//         rear sideways slip sum beyond threshold (oversteer)
//           -> brake the front wheel on the outside
//
// Helpers (each at most once per tick):
//   steering helper : rotate planar velocity toward the heading change
//   traction helper : soften front sideways grip while yawing against steer
//
// Nothing here touches engine, clutch or gearbox state.
// ==============================================================================

use tracing::debug;

use crate::config::StabilityConfig;
use crate::drivetrain::axle::Axle;
use crate::drivetrain::types::{ChassisState, Side, Vec3, clamp01, v_add, v_dot, v_project_plane, v_rotate, v_scale};

/// Steering helper only acts on heading changes smaller than this per tick.
const HELPER_MAX_YAW_DELTA: f32 = 10.0 * std::f32::consts::PI / 180.0;

/// ESP stays quiet below this speed (km/h).
const ESP_MIN_SPEED_KMH: f32 = 5.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct StabilityInput {
    pub throttle: f32,
    /// +1 forward, -1 in reverse.
    pub direction: f32,
    pub speed_kmh: f32,
    /// Park holds with full brake; ABS leaves it alone.
    pub park: bool,
}

#[derive(Debug, Clone)]
pub struct Stability {
    cfg: StabilityConfig,
    front_axle: usize,
    rear_axle: usize,

    abs_engaged: bool,
    tcs_engaged: bool,
    esp_engaged: bool,
    understeer: bool,
    oversteer: bool,

    last_heading: Option<f32>,
}

impl Stability {
    pub fn new(cfg: StabilityConfig, front_axle: usize, rear_axle: usize) -> Self {
        Self {
            cfg,
            front_axle,
            rear_axle,
            abs_engaged: false,
            tcs_engaged: false,
            esp_engaged: false,
            understeer: false,
            oversteer: false,
            last_heading: None,
        }
    }

    /// Clears per-tick observations and the helper's heading history.
    pub fn reset(&mut self) {
        self.abs_engaged = false;
        self.tcs_engaged = false;
        self.esp_engaged = false;
        self.understeer = false;
        self.oversteer = false;
        self.last_heading = None;
    }

    pub fn set_abs(&mut self, on: bool) { self.cfg.abs = on; }
    pub fn set_tcs(&mut self, on: bool) { self.cfg.tcs = on; }
    pub fn set_esp(&mut self, on: bool) { self.cfg.esp = on; }

    /// Returns the steering helper's corrected chassis velocity, if it acted.
    pub fn update(
        &mut self,
        axles: &mut [Axle],
        chassis: &ChassisState,
        input: &StabilityInput,
    ) -> Option<Vec3> {
        let abs = self.cfg.abs && !input.park && self.run_abs(axles);
        let tcs = self.cfg.tcs && self.run_tcs(axles, input);
        let esp = self.cfg.esp && self.run_esp(axles, input);

        if abs && !self.abs_engaged { debug!("abs engaged"); }
        if tcs && !self.tcs_engaged { debug!("tcs engaged"); }
        if esp && !self.esp_engaged {
            debug!(understeer = self.understeer, oversteer = self.oversteer, "esp engaged");
        }
        self.abs_engaged = abs;
        self.tcs_engaged = tcs;
        self.esp_engaged = esp;
        if !esp {
            self.understeer = false;
            self.oversteer = false;
        }

        if self.cfg.traction_helper {
            self.traction_helper(axles, chassis);
        }
        self.steering_helper(axles, chassis)
    }

    fn run_abs(&self, axles: &mut [Axle]) -> bool {
        let mut engaged = false;
        for axle in axles.iter_mut().filter(|a| a.is_braked()) {
            let brake_input = axle.brake_input();
            for w in axle.wheels_mut() {
                if w.is_grounded() && w.forward_slip().abs() * brake_input >= self.cfg.abs_threshold {
                    w.set_abs_cut(self.cfg.abs_intensity);
                    engaged = true;
                }
            }
        }
        engaged
    }

    fn run_tcs(&self, axles: &mut [Axle], input: &StabilityInput) -> bool {
        if input.throttle <= 0.0 {
            return false;
        }
        let direction = if input.direction < 0.0 { -1.0 } else { 1.0 };
        let mut engaged = false;
        for axle in axles.iter_mut().filter(|a| a.is_powered()) {
            for w in axle.wheels_mut() {
                if w.is_grounded() && w.forward_slip() * direction > self.cfg.tcs_threshold {
                    w.set_tcs_cut(self.cfg.tcs_intensity);
                    engaged = true;
                }
            }
        }
        engaged
    }

    fn run_esp(&mut self, axles: &mut [Axle], input: &StabilityInput) -> bool {
        if self.front_axle == self.rear_axle || input.speed_kmh.abs() < ESP_MIN_SPEED_KMH {
            return false;
        }
        let (Some(front), Some(rear)) = (axles.get(self.front_axle), axles.get(self.rear_axle)) else {
            return false;
        };
        let front_slip = front.sideways_slip_sum();
        let rear_slip = rear.sideways_slip_sum();
        let threshold = self.cfg.esp_threshold;

        self.understeer = front_slip.abs() > threshold;
        self.oversteer = rear_slip.abs() > threshold;

        // positive slip = sliding left: inside rear is right, outside front is left
        if self.understeer {
            self.esp_brake(axles, self.rear_axle, front_slip);
        }
        if self.oversteer {
            self.esp_brake(axles, self.front_axle, -rear_slip);
        }
        self.understeer || self.oversteer
    }

    fn esp_brake(&self, axles: &mut [Axle], axle: usize, slip: f32) {
        let Some(axle) = axles.get_mut(axle) else { return };
        let max = axle.max_brake_torque() * self.cfg.esp_intensity;
        axle.wheel_mut(Side::Right).add_brake_torque(max * clamp01(slip));
        axle.wheel_mut(Side::Left).add_brake_torque(max * clamp01(-slip));
    }

    fn traction_helper(&self, axles: &mut [Axle], chassis: &ChassisState) {
        let Some(front) = axles.get_mut(self.front_axle) else { return };
        let yaw_rate = chassis.yaw_rate();
        // positive steer turns right, which is negative yaw about +Y
        if front.steer_angle() * yaw_rate <= 0.0 {
            return;
        }
        let grip = 1.0 - clamp01(self.cfg.traction_helper_strength * yaw_rate.abs());
        for w in front.wheels_mut() {
            w.set_sideways_grip(grip);
        }
    }

    fn steering_helper(&mut self, axles: &[Axle], chassis: &ChassisState) -> Option<Vec3> {
        let heading = chassis.forward[0].atan2(chassis.forward[2]);
        let previous = self.last_heading.replace(heading)?;

        if !self.cfg.steering_helper {
            return None;
        }
        let all_grounded = axles.iter().all(|a| a.wheels().iter().all(|w| w.is_grounded()));
        if !all_grounded {
            return None;
        }

        let delta = wrap_angle(heading - previous);
        if delta.abs() >= HELPER_MAX_YAW_DELTA || delta == 0.0 {
            return None;
        }

        let up = chassis.up;
        let vertical = v_scale(up, v_dot(chassis.linvel, up));
        let planar = v_project_plane(chassis.linvel, up);
        let rotated = v_rotate(planar, up, delta * self.cfg.steer_helper_strength);
        Some(v_add(rotated, vertical))
    }

    pub fn abs_engaged(&self) -> bool { self.abs_engaged }
    pub fn tcs_engaged(&self) -> bool { self.tcs_engaged }
    pub fn esp_engaged(&self) -> bool { self.esp_engaged }
    pub fn understeer(&self) -> bool { self.understeer }
    pub fn oversteer(&self) -> bool { self.oversteer }
    pub fn config(&self) -> &StabilityConfig { &self.cfg }
}

fn wrap_angle(a: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let a = (a + PI).rem_euclid(TAU) - PI;
    if a.is_finite() { a } else { 0.0 }
}
