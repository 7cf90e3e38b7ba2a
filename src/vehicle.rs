// ==============================================================================
// vehicle.rs - VEHICLE ENTITY (COMPONENT OWNER + PER-TICK PIPELINE)
// ==============================================================================
// One fixed tick, strictly in this order:
//
//   1) feedback  : wheel-implied engine rpm and speed (one tick stale)
//   2) gearbox   : shift timer + automatic policy
//   3) input     : override or player surface, clamp, drain commands,
//                  auto-reverse selection and throttle/brake swap
//   4) engine    : rpm integration against LAST tick's clutch, torque out
//   5) clutch    : engagement, torque through
//   6) gearbox   : torque * ratio (0 while neutral / parked / shifting)
//   7) diffs     : left/right split per powered axle
//   8) axles     : steering, brakes (Park = full brake), drive into wheels
//   9) wheels    : spin, slip, tire + anti-roll impulses
//  10) stability : cuts for NEXT tick, ESP brake, helpers
//  11) state     : VehicleState rebuilt from component outputs
//
// The host feeds ChassisState + one WheelContact per wheel (axle-major,
// left then right) and applies the returned impulses.
// ==============================================================================

use serde::Serialize;
use tracing::{info, trace};

use crate::config::VehicleConfig;
use crate::drivetrain::axle::{Axle, AxleControls};
use crate::drivetrain::clutch::{Clutch, ClutchInput};
use crate::drivetrain::differential::Differential;
use crate::drivetrain::engine::{Engine, EngineInput};
use crate::drivetrain::gearbox::{Gearbox, GearboxInput, GearState};
use crate::drivetrain::input::{DriverCommand, InputSource, InputState, InputSurface};
use crate::drivetrain::nos::Nos;
use crate::drivetrain::stability::{Stability, StabilityInput};
use crate::drivetrain::types::{ChassisState, Impulse, Vec3, WheelContact, WheelId};
use crate::error::ConfigError;

/// Below this speed (km/h) brake selects reverse and throttle selects drive.
pub const AUTO_REVERSE_SPEED_KMH: f32 = 3.0;

/// Pedal travel that counts as "pressed" for auto-reverse.
const PEDAL_DEADZONE: f32 = 0.1;

/// What the host applies to the chassis after a tick.
#[derive(Debug, Clone, Default)]
pub struct TickOutput {
    pub impulses: Vec<Impulse>,
    /// Bounded velocity correction from the steering helper.
    pub linvel_correction: Option<Vec3>,
}

/// Input echo; one copy as the driver sent it, one as the components saw it.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InputEcho {
    pub fuel: f32,
    pub throttle: f32,
    pub brake: f32,
    pub steer: f32,
    pub handbrake: f32,
    pub clutch: f32,
    pub gear: usize,
    pub nos: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WheelState {
    pub id: WheelId,
    pub grounded: bool,
    pub rpm: f32,
    pub forward_slip: f32,
    pub sideways_slip: f32,
    pub skidding: bool,
    pub deflated: bool,
    pub material: usize,
}

/// Read-only snapshot published after every tick.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleState {
    pub speed: f32, // km/h, signed
    pub abs_speed: f32,
    pub engine_rpm: f32,
    pub min_rpm: f32,
    pub max_rpm: f32,
    pub gear: usize,
    pub gear_state: GearState,
    pub gear_ratio: f32,
    pub differential_ratio: f32,
    pub direction: i8,
    pub engine_running: bool,
    pub engine_starting: bool,
    pub shifting: bool,
    pub reversing: bool,
    pub clutch: f32,
    pub rev_limiter: bool,
    pub boost_psi: f32,
    pub blow_off: bool,
    pub nos_in_use: bool,
    pub nos_remaining: f32,
    pub input_source: InputSource,
    pub player: InputEcho,
    pub component: InputEcho,
    pub grounded: bool,
    pub abs: bool,
    pub tcs: bool,
    pub esp: bool,
    pub understeer: bool,
    pub oversteer: bool,
    pub wheels: Vec<WheelState>,
}

pub struct Vehicle {
    cfg: VehicleConfig,

    engine: Engine,
    nos: Nos,
    clutch: Clutch,
    gearbox: Gearbox,
    differentials: Vec<Differential>,
    axles: Vec<Axle>,
    stability: Stability,
    input: InputState,

    wheelbase: f32,
    speed_kmh: f32,
    source: InputSource,
    player: InputEcho,
    component: InputEcho,
    state: VehicleState,
}

impl Vehicle {
    /// Builds a vehicle from a validated configuration.
    pub fn new(cfg: VehicleConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let axles: Vec<Axle> = cfg.axles.iter().cloned().enumerate().map(|(i, a)| Axle::new(i, a)).collect();
        let by_position = |a: &&Axle| a.config().longitudinal_position();
        let front = axles.iter().max_by(|a, b| by_position(a).total_cmp(&by_position(b))).map(|a| a.index()).unwrap_or(0);
        let rear = axles.iter().min_by(|a, b| by_position(a).total_cmp(&by_position(b))).map(|a| a.index()).unwrap_or(0);

        let mut vehicle = Self {
            engine: Engine::new(cfg.engine.clone()),
            nos: Nos::new(cfg.nos.clone()),
            clutch: Clutch::new(cfg.clutch.clone()),
            gearbox: Gearbox::new(cfg.gearbox.clone(), cfg.theoretical_top_speed_kmh()),
            differentials: cfg.differentials.iter().map(Differential::new).collect(),
            axles,
            stability: Stability::new(cfg.stability.clone(), front, rear),
            input: InputState::default(),
            wheelbase: cfg.wheelbase(),
            speed_kmh: 0.0,
            source: InputSource::Player,
            player: InputEcho::default(),
            component: InputEcho::default(),
            state: placeholder_state(),
            cfg,
        };
        vehicle.state = vehicle.aggregate(&ChassisState::default());
        info!(vehicle = %vehicle.cfg.name, wheels = vehicle.wheel_count(), "vehicle configured");
        Ok(vehicle)
    }

    /// Wheel handles in the order `step` expects contacts.
    pub fn wheel_ids(&self) -> Vec<WheelId> {
        self.axles.iter().flat_map(|a| a.wheels().iter().map(|w| w.id())).collect()
    }

    pub fn wheel_count(&self) -> usize {
        self.axles.len() * 2
    }

    /// Back to rest on (re)activation; configuration and toggles are kept.
    pub fn reset(&mut self) {
        self.engine.reset();
        for a in &mut self.axles {
            a.reset();
        }
        self.stability.reset();
        self.speed_kmh = 0.0;
    }

    pub fn input_mut(&mut self) -> &mut InputState { &mut self.input }
    pub fn state(&self) -> &VehicleState { &self.state }
    pub fn config(&self) -> &VehicleConfig { &self.cfg }
    pub fn engine(&self) -> &Engine { &self.engine }
    pub fn clutch(&self) -> &Clutch { &self.clutch }
    pub fn gearbox(&self) -> &Gearbox { &self.gearbox }
    pub fn differentials(&self) -> &[Differential] { &self.differentials }
    pub fn axles(&self) -> &[Axle] { &self.axles }
    pub fn axles_mut(&mut self) -> &mut [Axle] { &mut self.axles }
    pub fn stability(&self) -> &Stability { &self.stability }

    // ---------------------------------------------------------
    // Fixed tick
    // ---------------------------------------------------------

    pub fn step(&mut self, chassis: &ChassisState, contacts: &[WheelContact], dt: f32) -> TickOutput {
        let mut out = TickOutput::default();
        if !(dt.is_finite() && dt > 0.0) {
            return out;
        }

        // 1) feedback from last tick's wheels
        self.speed_kmh = chassis.forward_speed_kmh();
        let (wheel_rpm, wheel_speed_kmh) = self.driven_wheel_feedback();

        // 2) gearbox timer + automatic policy
        self.gearbox.update(
            &GearboxInput {
                engine_rpm: self.engine.rpm(),
                wheel_speed_kmh,
                body_speed_kmh: self.speed_kmh,
            },
            dt,
        );

        // 3) input; shifts requested here start after the timer has advanced
        let (raw, source) = self.input.resolve();
        self.source = source;
        let commands: Vec<DriverCommand> = self.input.drain_commands().collect();
        for cmd in commands {
            self.apply_command(cmd);
        }
        let input = self.resolve_controls(raw);

        let nos_multiplier = self.nos.update(input.nos, input.throttle, self.engine.is_running(), dt);

        // 4) engine
        let engine_torque = self.engine.update(
            &EngineInput {
                throttle: input.throttle,
                clutch: self.clutch.engagement(),
                wheel_rpm,
                in_gear: self.gearbox.gear_input() > 0.0,
                multiplier: nos_multiplier,
            },
            dt,
        );

        // 5) clutch
        self.clutch.update(
            &ClutchInput {
                driver_clutch: input.clutch,
                throttle: input.throttle,
                handbrake: input.handbrake,
                engine_rpm: self.engine.rpm(),
                speed_kmh: self.speed_kmh,
                shifting: self.gearbox.is_shifting(),
            },
            dt,
        );
        let clutch_torque = self.clutch.transmit(engine_torque);

        // 6) gearbox
        let gear_torque = self.gearbox.transmit(clutch_torque);

        // 7) differentials
        let share = gear_torque / self.differentials.len().max(1) as f32;
        for diff in &mut self.differentials {
            let Some(axle) = self.axles.get_mut(diff.axle()) else { continue };
            let [l, r] = axle.wheels();
            let (left, right) = diff.split(share, l.rpm(), r.rpm());
            axle.apply_drive(left, right);
        }

        // 8) axles
        let controls = AxleControls {
            steer: input.steer,
            brake: input.brake,
            handbrake: input.handbrake,
            speed_kmh: self.speed_kmh,
            park: self.gearbox.is_park(),
        };
        for axle in &mut self.axles {
            axle.apply_controls(&controls, self.wheelbase, dt);
        }

        // 9) wheels
        let airborne = WheelContact::airborne();
        let contact = |i: usize| contacts.get(i).unwrap_or(&airborne);
        let total_load: f32 = (0..self.wheel_count())
            .map(|i| contact(i))
            .filter(|c| c.grounded)
            .map(|c| c.normal_force.max(0.0))
            .sum();
        let wheels = self.wheel_count().max(1) as f32;
        let mass_share = |c: &WheelContact| {
            if total_load > 1e-3 {
                chassis.mass * c.normal_force.max(0.0) / total_load
            } else {
                chassis.mass / wheels
            }
        };
        for (i, axle) in self.axles.iter_mut().enumerate() {
            let pair = [contact(2 * i), contact(2 * i + 1)];
            let shares = [mass_share(pair[0]), mass_share(pair[1])];
            axle.step(chassis, pair, shares, &self.cfg.materials, &mut out.impulses, dt);
        }
        for diff in self.differentials.iter().filter(|d| d.couples_wheels()) {
            if let Some(axle) = self.axles.get_mut(diff.axle()) {
                axle.couple_spin();
            }
        }

        // 10) stability
        out.linvel_correction = self.stability.update(
            &mut self.axles,
            chassis,
            &StabilityInput {
                throttle: input.throttle,
                direction: self.gearbox.direction(),
                speed_kmh: self.speed_kmh,
                park: self.gearbox.is_park(),
            },
        );

        // 11) aggregate
        self.player = InputEcho {
            fuel: raw.throttle,
            throttle: raw.throttle,
            brake: raw.brake,
            steer: raw.steer,
            handbrake: raw.handbrake,
            clutch: raw.clutch,
            gear: self.gearbox.current_gear(),
            nos: raw.nos,
        };
        self.component = InputEcho {
            fuel: self.engine.fuel_input(),
            throttle: input.throttle,
            brake: input.brake,
            steer: self.normalized_steer(),
            handbrake: input.handbrake,
            clutch: self.clutch.engagement(),
            gear: self.gearbox.current_gear(),
            nos: self.nos.in_use(),
        };
        self.state = self.aggregate(chassis);
        out
    }

    /// Auto-reverse selection, then the throttle/brake swap while reversing.
    fn resolve_controls(&mut self, raw: InputSurface) -> InputSurface {
        let mut input = raw;
        if !self.gearbox.auto_reverse() {
            return input;
        }

        let slow = self.speed_kmh.abs() < AUTO_REVERSE_SPEED_KMH;
        if slow && !self.gearbox.is_shifting() {
            if !self.gearbox.is_reverse() && raw.brake > PEDAL_DEADZONE && raw.throttle < PEDAL_DEADZONE {
                self.gearbox.shift_reverse(self.speed_kmh);
            } else if self.gearbox.is_reverse() && raw.throttle > PEDAL_DEADZONE {
                self.gearbox.select_drive();
            }
        }

        if self.gearbox.is_reverse() {
            std::mem::swap(&mut input.throttle, &mut input.brake);
        }
        input
    }

    fn apply_command(&mut self, cmd: DriverCommand) {
        trace!(?cmd, "driver command");
        let speed = self.speed_kmh;
        match cmd {
            DriverCommand::StartEngine => self.engine.start_engine(),
            DriverCommand::KillEngine => self.engine.kill_engine(),
            DriverCommand::ShiftUp => {
                self.gearbox.shift_up();
            }
            DriverCommand::ShiftDown => {
                self.gearbox.shift_down(speed);
            }
            DriverCommand::ShiftToGear(n) => {
                self.gearbox.shift_to_gear(n);
            }
            DriverCommand::ShiftReverse => {
                self.gearbox.shift_reverse(speed);
            }
            DriverCommand::ShiftNeutral => {
                self.gearbox.shift_neutral();
            }
            DriverCommand::SelectPark => {
                self.gearbox.select_park(speed);
            }
            DriverCommand::SelectDrive => {
                self.gearbox.select_drive();
            }
            DriverCommand::Deflate(id) => {
                if let Some(axle) = self.axles.get_mut(id.axle) {
                    axle.wheel_mut(id.side).deflate();
                }
            }
            DriverCommand::Inflate(id) => {
                if let Some(axle) = self.axles.get_mut(id.axle) {
                    axle.wheel_mut(id.side).inflate();
                }
            }
            DriverCommand::SetAbs(on) => self.stability.set_abs(on),
            DriverCommand::SetTcs(on) => self.stability.set_tcs(on),
            DriverCommand::SetEsp(on) => self.stability.set_esp(on),
        }
    }

    /// (engine rpm implied by the driven wheels, their ground speed in km/h)
    fn driven_wheel_feedback(&self) -> (f32, f32) {
        let mut rpm = 0.0;
        let mut speed = 0.0;
        let mut n = 0usize;
        for diff in &self.differentials {
            let Some(axle) = self.axles.get(diff.axle()) else { continue };
            for w in axle.wheels() {
                rpm += w.rpm().abs() * diff.final_drive();
                speed += w.angular_velocity() * w.effective_radius() * 3.6;
                n += 1;
            }
        }
        if n == 0 {
            return (0.0, 0.0);
        }
        let n = n as f32;
        (rpm / n * self.gearbox.gear_ratio(), speed / n)
    }

    fn normalized_steer(&self) -> f32 {
        self.axles
            .iter()
            .find(|a| a.is_steered())
            .map(|a| {
                let max = a.config().max_steer_angle * a.config().steer_multiplier;
                if max > 0.0 { a.steer_angle() / max } else { 0.0 }
            })
            .unwrap_or(0.0)
    }

    fn aggregate(&self, chassis: &ChassisState) -> VehicleState {
        let speed = chassis.forward_speed_kmh();
        let wheels: Vec<WheelState> = self
            .axles
            .iter()
            .flat_map(|a| a.wheels().iter())
            .map(|w| WheelState {
                id: w.id(),
                grounded: w.is_grounded(),
                rpm: w.rpm(),
                forward_slip: w.forward_slip(),
                sideways_slip: w.sideways_slip(),
                skidding: w.is_skidding(),
                deflated: w.is_deflated(),
                material: w.material(),
            })
            .collect();

        VehicleState {
            speed,
            abs_speed: speed.abs(),
            engine_rpm: self.engine.rpm(),
            min_rpm: self.engine.min_rpm(),
            max_rpm: self.engine.max_rpm(),
            gear: self.gearbox.current_gear(),
            gear_state: self.gearbox.state(),
            gear_ratio: self.gearbox.gear_ratio(),
            differential_ratio: self.cfg.final_drive(),
            direction: if self.gearbox.is_reverse() { -1 } else { 1 },
            engine_running: self.engine.is_running(),
            engine_starting: self.engine.is_starting(),
            shifting: self.gearbox.is_shifting(),
            reversing: self.gearbox.is_reverse(),
            clutch: self.clutch.engagement(),
            rev_limiter: self.engine.limiter_active(),
            boost_psi: self.engine.boost_psi(),
            blow_off: self.engine.blow_off(),
            nos_in_use: self.nos.in_use(),
            nos_remaining: self.nos.remaining_fraction(),
            input_source: self.source,
            player: self.player,
            component: self.component,
            grounded: wheels.iter().any(|w| w.grounded),
            abs: self.stability.abs_engaged(),
            tcs: self.stability.tcs_engaged(),
            esp: self.stability.esp_engaged(),
            understeer: self.stability.understeer(),
            oversteer: self.stability.oversteer(),
            wheels,
        }
    }
}

fn placeholder_state() -> VehicleState {
    VehicleState {
        speed: 0.0,
        abs_speed: 0.0,
        engine_rpm: 0.0,
        min_rpm: 0.0,
        max_rpm: 0.0,
        gear: 0,
        gear_state: GearState::Neutral,
        gear_ratio: 0.0,
        differential_ratio: 0.0,
        direction: 1,
        engine_running: false,
        engine_starting: false,
        shifting: false,
        reversing: false,
        clutch: 1.0,
        rev_limiter: false,
        boost_psi: 0.0,
        blow_off: false,
        nos_in_use: false,
        nos_remaining: 0.0,
        input_source: InputSource::Player,
        player: InputEcho::default(),
        component: InputEcho::default(),
        grounded: false,
        abs: false,
        tcs: false,
        esp: false,
        understeer: false,
        oversteer: false,
        wheels: Vec::new(),
    }
}
