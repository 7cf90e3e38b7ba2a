// ==============================================================================
// gearbox.rs - TRANSMISSION + SHIFT STATE MACHINE
// ==============================================================================
// Gear states (mutually exclusive): Park | Reverse | Neutral | Forward(i)
//
// Shift machine, shared by every mode:
//
//   Idle --request--> Shifting { target, remaining = shifting_time }
//        (gear input 0, torque out 0)
//   Shifting --timer--> Idle (target committed, cooldown armed)
//
// Guards (rejections are silent no-ops returning false):
//   - no request while a shift is in flight
//   - reverse only below reverse_speed_limit_kmh (either direction)
//   - DNRP: up/down/to-gear only in Drive; Park only near standstill
//
// Automatic policy (Automatic, and DNRP while in Drive):
//   target_speed[i] = top_speed * shift_threshold * (i + 1) / gears
//   up   : rpm >= shift_up_rpm and wheel AND body speed > target_speed[gear]
//   down : rpm <= shift_down_rpm and eligible_gear(speed) != gear
//
// torque_out = torque_in * ratio[gear] * gear_input, negated in Reverse.
// ==============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::GearboxConfig;
use crate::drivetrain::types::sanitize;

/// Shifts into Park are refused above this speed.
pub const PARK_SPEED_LIMIT_KMH: f32 = 5.0;

/// Timer slack so an exact multiple of dt completes on the expected tick.
const TIMER_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionMode {
    Manual,
    Automatic,
    /// Automatic with a Drive/Neutral/Reverse/Park selector.
    AutomaticDnrp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GearState {
    Park,
    Reverse,
    Neutral,
    Forward(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingShift {
    target: GearState,
    remaining: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GearboxInput {
    pub engine_rpm: f32,
    /// Speed implied by the driven wheels, km/h (signed).
    pub wheel_speed_kmh: f32,
    /// Rigid-body speed along the heading, km/h (signed).
    pub body_speed_kmh: f32,
}

#[derive(Debug, Clone)]
pub struct Gearbox {
    cfg: GearboxConfig,
    state: GearState,
    pending: Option<PendingShift>,
    cooldown: f32,
    target_speeds: Vec<f32>,
    received_torque: f32,
    output_torque: f32,
}

impl Gearbox {
    /// `top_speed_kmh` is the theoretical speed at max rpm in the top gear.
    pub fn new(cfg: GearboxConfig, top_speed_kmh: f32) -> Self {
        let gears = cfg.gear_ratios.len().max(1);
        let ceiling = sanitize(top_speed_kmh, 0.0).max(0.0) * cfg.shift_threshold.clamp(0.0, 1.0);
        let target_speeds = (0..gears)
            .map(|i| ceiling * (i + 1) as f32 / gears as f32)
            .collect();

        let state = match cfg.mode {
            TransmissionMode::AutomaticDnrp => GearState::Park,
            TransmissionMode::Manual | TransmissionMode::Automatic => GearState::Forward(0),
        };

        Self {
            cfg,
            state,
            pending: None,
            cooldown: 0.0,
            target_speeds,
            received_torque: 0.0,
            output_torque: 0.0,
        }
    }

    // ---------------------------------------------------------
    // Requests
    // ---------------------------------------------------------

    pub fn shift_up(&mut self) -> bool {
        let target = match self.state {
            GearState::Forward(g) if g + 1 < self.gear_count() => GearState::Forward(g + 1),
            GearState::Forward(_) => return self.reject("already in top gear"),
            GearState::Neutral | GearState::Reverse if !self.is_dnrp() => GearState::Forward(0),
            _ => return self.reject("shift up outside drive"),
        };
        self.begin(target)
    }

    /// Below first gear a manual box drops into reverse, subject to the speed guard.
    pub fn shift_down(&mut self, speed_kmh: f32) -> bool {
        let target = match self.state {
            GearState::Forward(g) if g > 0 => GearState::Forward(g - 1),
            GearState::Forward(0) | GearState::Neutral if self.cfg.mode == TransmissionMode::Manual => {
                return self.shift_reverse(speed_kmh);
            }
            _ => return self.reject("no lower gear"),
        };
        self.begin(target)
    }

    pub fn shift_to_gear(&mut self, gear: usize) -> bool {
        if gear >= self.gear_count() {
            return self.reject("gear index out of range");
        }
        if self.is_dnrp() && !matches!(self.state, GearState::Forward(_)) {
            return self.reject("gear selection outside drive");
        }
        if self.state == GearState::Forward(gear) {
            return false;
        }
        self.begin(GearState::Forward(gear))
    }

    pub fn shift_reverse(&mut self, speed_kmh: f32) -> bool {
        if self.state == GearState::Reverse {
            return false;
        }
        if sanitize(speed_kmh, 0.0).abs() > self.cfg.reverse_speed_limit_kmh {
            return self.reject("reverse above speed limit");
        }
        self.begin(GearState::Reverse)
    }

    pub fn shift_neutral(&mut self) -> bool {
        if self.state == GearState::Neutral {
            return false;
        }
        self.begin(GearState::Neutral)
    }

    pub fn select_park(&mut self, speed_kmh: f32) -> bool {
        if !self.is_dnrp() {
            return self.reject("park needs a DNRP selector");
        }
        if self.state == GearState::Park {
            return false;
        }
        if sanitize(speed_kmh, 0.0).abs() > PARK_SPEED_LIMIT_KMH {
            return self.reject("park while moving");
        }
        self.begin(GearState::Park)
    }

    pub fn select_drive(&mut self) -> bool {
        if matches!(self.state, GearState::Forward(_)) {
            return false;
        }
        self.begin(GearState::Forward(0))
    }

    fn begin(&mut self, target: GearState) -> bool {
        if self.pending.is_some() {
            return self.reject("shift already in progress");
        }
        debug!(from = ?self.state, to = ?target, "shift started");
        if self.cfg.shifting_time <= 0.0 {
            self.commit(target);
        } else {
            self.pending = Some(PendingShift { target, remaining: self.cfg.shifting_time });
        }
        true
    }

    fn commit(&mut self, target: GearState) {
        self.state = target;
        self.pending = None;
        self.cooldown = self.cfg.shift_cooldown;
        debug!(gear = ?target, "shift committed");
    }

    fn reject(&self, reason: &'static str) -> bool {
        trace!(state = ?self.state, reason, "shift request ignored");
        false
    }

    // ---------------------------------------------------------
    // Per tick
    // ---------------------------------------------------------

    /// Advances the shift timer, then runs the automatic policy.
    pub fn update(&mut self, input: &GearboxInput, dt: f32) {
        let dt = sanitize(dt, 0.0).max(0.0);
        self.cooldown = (self.cooldown - dt).max(0.0);

        if let Some(p) = self.pending.as_mut() {
            p.remaining -= dt;
            if p.remaining <= TIMER_EPSILON {
                let target = p.target;
                self.commit(target);
            }
            return;
        }

        if self.is_automatic() && self.cooldown <= 0.0 {
            self.automatic_policy(input);
        }
    }

    fn automatic_policy(&mut self, input: &GearboxInput) {
        let GearState::Forward(gear) = self.state else { return };

        let rpm = sanitize(input.engine_rpm, 0.0);
        let wheel_speed = sanitize(input.wheel_speed_kmh, 0.0);
        let body_speed = sanitize(input.body_speed_kmh, 0.0);
        let ceiling = self.target_speeds[gear];

        if rpm >= self.cfg.shift_up_rpm
            && gear + 1 < self.gear_count()
            && wheel_speed > ceiling
            && body_speed > ceiling
        {
            self.begin(GearState::Forward(gear + 1));
            return;
        }

        if rpm <= self.cfg.shift_down_rpm {
            let eligible = self.eligible_gear(body_speed);
            if eligible != gear {
                self.begin(GearState::Forward(eligible));
            }
        }
    }

    /// First gear whose target speed exceeds `speed_kmh`, else the top gear.
    pub fn eligible_gear(&self, speed_kmh: f32) -> usize {
        self.target_speeds
            .iter()
            .position(|&t| t > speed_kmh)
            .unwrap_or(self.gear_count() - 1)
    }

    pub fn transmit(&mut self, torque: f32) -> f32 {
        self.received_torque = sanitize(torque, 0.0);
        self.output_torque = self.received_torque * self.gear_ratio() * self.gear_input() * self.direction();
        self.output_torque
    }

    // ---------------------------------------------------------
    // Queries
    // ---------------------------------------------------------

    pub fn state(&self) -> GearState { self.state }
    pub fn mode(&self) -> TransmissionMode { self.cfg.mode }
    pub fn gear_count(&self) -> usize { self.cfg.gear_ratios.len().max(1) }
    pub fn is_shifting(&self) -> bool { self.pending.is_some() }
    pub fn shift_target(&self) -> Option<GearState> { self.pending.map(|p| p.target) }
    pub fn target_speeds(&self) -> &[f32] { &self.target_speeds }
    pub fn output_torque(&self) -> f32 { self.output_torque }
    /// Brake-to-reverse only applies without a DNRP selector.
    pub fn auto_reverse(&self) -> bool { self.cfg.auto_reverse && self.cfg.mode == TransmissionMode::Automatic }

    pub fn is_reverse(&self) -> bool { self.state == GearState::Reverse }
    pub fn is_neutral(&self) -> bool { self.state == GearState::Neutral }
    pub fn is_park(&self) -> bool { self.state == GearState::Park }
    pub fn is_drive(&self) -> bool { matches!(self.state, GearState::Forward(_)) }

    /// Index into the ratio table of the gear in use (reverse shares first gear).
    pub fn current_gear(&self) -> usize {
        match self.state {
            GearState::Forward(g) => g.min(self.gear_count() - 1),
            _ => 0,
        }
    }

    pub fn gear_ratio(&self) -> f32 {
        self.cfg.gear_ratios.get(self.current_gear()).copied().unwrap_or(1.0)
    }

    /// 1 while a gear is engaged and no shift is in flight, else 0.
    pub fn gear_input(&self) -> f32 {
        if self.is_shifting() {
            return 0.0;
        }
        match self.state {
            GearState::Forward(_) | GearState::Reverse => 1.0,
            GearState::Neutral | GearState::Park => 0.0,
        }
    }

    pub fn direction(&self) -> f32 {
        if self.is_reverse() { -1.0 } else { 1.0 }
    }

    fn is_dnrp(&self) -> bool {
        self.cfg.mode == TransmissionMode::AutomaticDnrp
    }

    fn is_automatic_mode(&self) -> bool {
        matches!(self.cfg.mode, TransmissionMode::Automatic | TransmissionMode::AutomaticDnrp)
    }

    fn is_automatic(&self) -> bool {
        self.is_automatic_mode() && self.is_drive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    const DT: f32 = 1.0 / 60.0;
    const TOP: f32 = 240.0;

    fn gearbox(mode: TransmissionMode) -> Gearbox {
        Gearbox::new(GearboxConfig { mode, ..GearboxConfig::default() }, TOP)
    }

    #[test]
    fn target_speeds_partition_top_speed() {
        let g = gearbox(TransmissionMode::Automatic);
        let cfg = GearboxConfig::default();
        let n = cfg.gear_ratios.len() as f32;
        let ceiling = TOP * cfg.shift_threshold;
        assert_abs_diff_eq!(g.target_speeds()[0], ceiling / n, epsilon = 1e-3);
        assert_abs_diff_eq!(*g.target_speeds().last().unwrap(), ceiling, epsilon = 1e-3);
    }

    #[test]
    fn shifting_lasts_exactly_shifting_time() {
        let mut g = gearbox(TransmissionMode::Manual);
        let expected_ticks = (GearboxConfig::default().shifting_time / DT).round() as usize;

        assert!(g.shift_up());
        let mut ticks = 0;
        while g.is_shifting() {
            assert_eq!(g.transmit(100.0), 0.0);
            g.update(&GearboxInput::default(), DT);
            ticks += 1;
            assert!(ticks < 1000);
        }
        assert_eq!(ticks, expected_ticks);
        assert_eq!(g.state(), GearState::Forward(1));
    }

    #[test]
    fn no_second_shift_while_shifting() {
        let mut g = gearbox(TransmissionMode::Manual);
        assert!(g.shift_up());
        assert!(!g.shift_up());
        assert!(!g.shift_neutral());
        assert_eq!(g.shift_target(), Some(GearState::Forward(1)));
    }

    #[test]
    fn gear_index_stays_in_bounds_for_random_requests() {
        let mut rng = StdRng::seed_from_u64(11);
        for mode in [TransmissionMode::Manual, TransmissionMode::Automatic, TransmissionMode::AutomaticDnrp] {
            let mut g = gearbox(mode);
            for _ in 0..5_000 {
                let speed = rng.gen_range(-30.0..250.0);
                match rng.gen_range(0..8) {
                    0 => { g.shift_up(); }
                    1 => { g.shift_down(speed); }
                    2 => { g.shift_to_gear(rng.gen_range(0..10)); }
                    3 => { g.shift_reverse(speed); }
                    4 => { g.shift_neutral(); }
                    5 => { g.select_park(speed); }
                    6 => { g.select_drive(); }
                    _ => {}
                }
                let input = GearboxInput {
                    engine_rpm: rng.gen_range(0.0..8000.0),
                    wheel_speed_kmh: speed,
                    body_speed_kmh: speed,
                };
                g.update(&input, DT);
                assert!(g.current_gear() < g.gear_count());
                if let GearState::Forward(i) = g.state() {
                    assert!(i < g.gear_count());
                }
            }
        }
    }

    #[test]
    fn reverse_is_blocked_at_speed() {
        let mut g = gearbox(TransmissionMode::Manual);
        assert!(!g.shift_reverse(60.0));
        assert!(g.shift_reverse(5.0));
    }

    #[test]
    fn reverse_negates_torque() {
        let mut g = gearbox(TransmissionMode::Manual);
        g.shift_reverse(0.0);
        for _ in 0..60 {
            g.update(&GearboxInput::default(), DT);
        }
        let ratio = GearboxConfig::default().gear_ratios[0];
        assert_abs_diff_eq!(g.transmit(100.0), -100.0 * ratio, epsilon = 1e-3);
    }

    #[test]
    fn neutral_outputs_no_torque() {
        let mut g = gearbox(TransmissionMode::Manual);
        g.shift_neutral();
        for _ in 0..60 {
            g.update(&GearboxInput::default(), DT);
        }
        assert_eq!(g.transmit(250.0), 0.0);
    }

    #[test]
    fn dnrp_only_shifts_gears_in_drive() {
        let mut g = gearbox(TransmissionMode::AutomaticDnrp);
        assert!(g.is_park());
        assert!(!g.shift_up());
        assert!(!g.shift_to_gear(2));
        assert!(g.select_drive());
        for _ in 0..60 {
            g.update(&GearboxInput::default(), DT);
        }
        assert!(g.is_drive());
        assert!(g.shift_up());
    }

    #[test]
    fn park_refused_while_moving() {
        let mut g = gearbox(TransmissionMode::AutomaticDnrp);
        g.select_drive();
        for _ in 0..60 {
            g.update(&GearboxInput::default(), DT);
        }
        assert!(!g.select_park(40.0));
        assert!(g.select_park(0.0));
    }

    #[test]
    fn automatic_upshift_starts_within_one_tick_and_commits() {
        let mut g = gearbox(TransmissionMode::Automatic);
        let ceiling = g.target_speeds()[0];
        let cfg = GearboxConfig::default();

        // below the ceiling: no shift even at high rpm
        g.update(&GearboxInput { engine_rpm: cfg.shift_up_rpm, wheel_speed_kmh: ceiling - 1.0, body_speed_kmh: ceiling - 1.0 }, DT);
        assert!(!g.is_shifting());

        let fast = GearboxInput { engine_rpm: cfg.shift_up_rpm, wheel_speed_kmh: ceiling + 1.0, body_speed_kmh: ceiling + 1.0 };
        g.update(&fast, DT);
        assert!(g.is_shifting());
        assert_eq!(g.shift_target(), Some(GearState::Forward(1)));

        let ticks = (cfg.shifting_time / DT).round() as usize;
        for _ in 0..ticks {
            g.update(&fast, DT);
        }
        assert!(!g.is_shifting());
        assert_eq!(g.current_gear(), 1);
    }

    #[test]
    fn upshift_needs_both_wheel_and_body_speed() {
        let mut g = gearbox(TransmissionMode::Automatic);
        let ceiling = g.target_speeds()[0];
        let spinning = GearboxInput { engine_rpm: 7000.0, wheel_speed_kmh: ceiling + 20.0, body_speed_kmh: 2.0 };
        g.update(&spinning, DT);
        assert!(!g.is_shifting());
    }

    #[test]
    fn automatic_downshift_picks_eligible_gear() {
        let mut g = gearbox(TransmissionMode::Automatic);
        g.shift_to_gear(4);
        for _ in 0..60 {
            g.update(&GearboxInput { engine_rpm: 4000.0, ..GearboxInput::default() }, DT);
        }
        assert_eq!(g.current_gear(), 4);

        g.update(&GearboxInput { engine_rpm: 1000.0, wheel_speed_kmh: 10.0, body_speed_kmh: 10.0 }, DT);
        assert_eq!(g.shift_target(), Some(GearState::Forward(g.eligible_gear(10.0))));
        assert_eq!(g.eligible_gear(10.0), 0);
    }

    #[test]
    fn cooldown_delays_next_automatic_shift() {
        let mut g = gearbox(TransmissionMode::Automatic);
        let fast = GearboxInput { engine_rpm: 7000.0, wheel_speed_kmh: 200.0, body_speed_kmh: 200.0 };
        g.update(&fast, DT);
        while g.is_shifting() {
            g.update(&fast, DT);
        }
        g.update(&fast, DT);
        assert!(!g.is_shifting(), "cooldown should hold the next shift");
    }
}
