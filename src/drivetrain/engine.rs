// ==============================================================================
// engine.rs - POWER SOURCE (TORQUE CURVE + RPM DYNAMICS)
// ==============================================================================
// Per tick:
//   fuel    = clamp01(throttle + idle)           (0 while the rev limiter cuts)
//   wanted += (1 - clutch) * (wheel_rpm - wanted) * coupling_rate * dt
//           + fuel * curve(rpm) * acceleration * max_rpm * dt
//           - friction * max_rpm * dt
//   wanted  = clamp(wanted, floor, max_rpm)      (floor = min_rpm while running)
//   rpm     = smooth_damp(rpm, wanted, inertia)
//   torque  = curve(rpm) * max_torque * fuel * multiplier * boost_gain
//
// The engine never fails: bad inputs are clamped, never propagated.
// ==============================================================================

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::drivetrain::types::{approach, clamp01, sanitize, smooth_damp};

/// Fraction of max rpm at which the rev limiter cuts fuel.
pub const REV_LIMIT_FRACTION: f32 = 0.975;

/// Idle fuel never exceeds this, so idle alone cannot raise rpm past the floor.
const IDLE_FUEL_MAX: f32 = 0.15;

/// Boost fraction above which a later falling edge counts as blow-off.
const BLOW_OFF_ARM_FRACTION: f32 = 0.3;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineInput {
    pub throttle: f32,
    /// Clutch engagement fraction from the previous tick (0 = locked).
    pub clutch: f32,
    /// Engine rpm implied by the driven wheels through the engaged gear.
    pub wheel_rpm: f32,
    /// False while neutral, parked or mid-shift.
    pub in_gear: bool,
    /// External torque multiplier (NOS and other short boosts), 1 = none.
    pub multiplier: f32,
}

#[derive(Debug, Clone)]
pub struct Engine {
    cfg: EngineConfig,

    rpm: f32,
    wanted_rpm: f32,
    rpm_velocity: f32,

    running: bool,
    starting: bool,
    start_timer: f32,

    fuel_input: f32,
    idle_input: f32,
    cut_fuel: bool,
    multiplier: f32,

    boost_psi: f32,
    blow_off_armed: bool,
    blow_off: bool,

    produced_torque: f32,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        let running = cfg.start_running;
        let mut engine = Self {
            cfg,
            rpm: 0.0,
            wanted_rpm: 0.0,
            rpm_velocity: 0.0,
            running,
            starting: false,
            start_timer: 0.0,
            fuel_input: 0.0,
            idle_input: 0.0,
            cut_fuel: false,
            multiplier: 1.0,
            boost_psi: 0.0,
            blow_off_armed: false,
            blow_off: false,
            produced_torque: 0.0,
        };
        engine.reset();
        engine
    }

    /// Back to idle (or rest when stopped) on vehicle (re)activation.
    pub fn reset(&mut self) {
        let rpm = if self.running { self.cfg.min_rpm } else { 0.0 };
        self.rpm = rpm;
        self.wanted_rpm = rpm;
        self.rpm_velocity = 0.0;
        self.fuel_input = 0.0;
        self.idle_input = 0.0;
        self.cut_fuel = false;
        self.boost_psi = 0.0;
        self.blow_off_armed = false;
        self.blow_off = false;
        self.produced_torque = 0.0;
    }

    pub fn start_engine(&mut self) {
        if self.running || self.starting {
            return;
        }
        self.starting = true;
        self.start_timer = self.cfg.starting_delay.max(0.0);
        info!(delay = self.start_timer, "engine starting");
    }

    pub fn kill_engine(&mut self) {
        if !self.running && !self.starting {
            return;
        }
        self.running = false;
        self.starting = false;
        self.fuel_input = 0.0;
        info!("engine stopped");
    }

    pub fn update(&mut self, input: &EngineInput, dt: f32) -> f32 {
        let dt = sanitize(dt, 0.0).max(0.0);
        self.advance_starter(dt);

        let max = self.cfg.max_rpm;
        let throttle = clamp01(input.throttle);
        let clutch = clamp01(input.clutch);
        let wheel_rpm = sanitize(input.wheel_rpm.abs(), 0.0).min(max * 2.0);
        self.multiplier = sanitize(input.multiplier, 1.0).max(0.0);

        // ---------------------------------
        // Fuel: throttle + idle, rev limiter
        // ---------------------------------
        self.idle_input = if self.running {
            clamp01((self.cfg.min_rpm - self.rpm) / self.cfg.min_rpm.max(1.0)) * IDLE_FUEL_MAX
        } else {
            0.0
        };

        self.cut_fuel = self.cfg.rev_limiter && self.rpm >= max * REV_LIMIT_FRACTION;

        self.fuel_input = if !self.running || self.cut_fuel {
            0.0
        } else {
            clamp01(throttle + self.idle_input)
        };

        // ---------------------------------
        // RPM integration
        // ---------------------------------
        let curve = self.torque_curve_at(self.rpm);
        let coupling = if input.in_gear { 1.0 - clutch } else { 0.0 };

        let mut wanted = self.wanted_rpm;
        wanted += coupling * (wheel_rpm - wanted) * (self.cfg.coupling_rate * dt).min(1.0);
        wanted += self.fuel_input * curve * self.cfg.acceleration * max * dt;
        wanted -= self.cfg.friction * max * dt;

        let floor = if self.running { self.cfg.min_rpm } else { 0.0 };
        self.wanted_rpm = sanitize(wanted, floor).clamp(floor, max);

        self.rpm = smooth_damp(self.rpm, self.wanted_rpm, &mut self.rpm_velocity, self.cfg.inertia, dt)
            .clamp(0.0, max);

        self.update_turbo(dt);

        // ---------------------------------
        // Torque
        // ---------------------------------
        self.produced_torque = if self.running {
            self.torque_curve_at(self.rpm)
                * self.cfg.max_torque
                * self.fuel_input
                * self.multiplier
                * self.boost_gain()
        } else {
            0.0
        };

        self.produced_torque
    }

    fn advance_starter(&mut self, dt: f32) {
        if !self.starting {
            return;
        }
        self.start_timer -= dt;
        if self.start_timer <= 0.0 {
            self.starting = false;
            self.running = true;
            info!("engine running");
        }
    }

    fn update_turbo(&mut self, dt: f32) {
        self.blow_off = false;
        let turbo = &self.cfg.turbo;
        if !turbo.enabled {
            self.boost_psi = 0.0;
            return;
        }

        let prev = self.boost_psi;
        let target = turbo.max_psi * self.fuel_input * self.rpm_fraction();
        self.boost_psi = approach(prev, target, turbo.spool_rate, dt).clamp(0.0, turbo.max_psi);

        // re-arming needs fuel, so one lift gives one blow-off
        if self.fuel_input > 0.0 && self.boost_psi > turbo.max_psi * BLOW_OFF_ARM_FRACTION {
            self.blow_off_armed = true;
        }
        if self.blow_off_armed && self.fuel_input <= 0.0 && self.boost_psi < prev {
            self.blow_off = true;
            self.blow_off_armed = false;
            debug!(psi = prev, "turbo blow-off");
        }
    }

    fn boost_gain(&self) -> f32 {
        let turbo = &self.cfg.turbo;
        if !turbo.enabled || turbo.max_psi <= 0.0 {
            return 1.0;
        }
        1.0 + (self.boost_psi / turbo.max_psi) * turbo.torque_gain
    }

    fn torque_curve_at(&self, rpm: f32) -> f32 {
        self.cfg.torque_curve.sample(rpm / self.cfg.max_rpm).max(0.0)
    }

    pub fn rpm(&self) -> f32 { self.rpm }
    pub fn min_rpm(&self) -> f32 { self.cfg.min_rpm }
    pub fn max_rpm(&self) -> f32 { self.cfg.max_rpm }
    pub fn rpm_fraction(&self) -> f32 { clamp01(self.rpm / self.cfg.max_rpm) }
    pub fn fuel_input(&self) -> f32 { self.fuel_input }
    pub fn idle_input(&self) -> f32 { self.idle_input }
    pub fn is_running(&self) -> bool { self.running }
    pub fn is_starting(&self) -> bool { self.starting }
    pub fn limiter_active(&self) -> bool { self.cut_fuel }
    pub fn produced_torque(&self) -> f32 { self.produced_torque }
    pub fn boost_psi(&self) -> f32 { self.boost_psi }
    pub fn blow_off(&self) -> bool { self.blow_off }
    pub fn multiplier(&self) -> f32 { self.multiplier }
}
