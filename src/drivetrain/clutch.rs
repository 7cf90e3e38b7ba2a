// ==============================================================================
// clutch.rs - ENGAGEMENT BETWEEN POWER SOURCE AND TRANSMISSION
// ------------------------------------------------------------------------------
// Engagement fraction: 0 = locked (no slip), 1 = fully disengaged.
//
// Manual:    the driver's clutch pedal passes straight through.
// Automatic: engage when rpm > engage_rpm AND (throttle OR rolling), else
//            disengage so the engine cannot stall.
//
// Either way the pedal is forced down while shifting or under heavy handbrake.
// The automatic target is smoothed; values within SNAP_EPSILON of 0 or 1 snap
// exactly so the filter never creeps asymptotically.
//
// torque_out = torque_in * (1 - engagement)
// ==============================================================================

use crate::config::ClutchConfig;
use crate::drivetrain::types::{clamp01, sanitize, smooth_damp};

pub const SNAP_EPSILON: f32 = 0.02;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClutchInput {
    pub driver_clutch: f32,
    pub throttle: f32,
    pub handbrake: f32,
    pub engine_rpm: f32,
    pub speed_kmh: f32,
    pub shifting: bool,
}

#[derive(Debug, Clone)]
pub struct Clutch {
    cfg: ClutchConfig,
    engagement: f32,
    target: f32,
    velocity: f32,
    received_torque: f32,
    output_torque: f32,
}

impl Clutch {
    pub fn new(cfg: ClutchConfig) -> Self {
        Self {
            cfg,
            engagement: 1.0,
            target: 1.0,
            velocity: 0.0,
            received_torque: 0.0,
            output_torque: 0.0,
        }
    }

    /// Resolves this tick's engagement. Runs once per tick, before `transmit`.
    pub fn update(&mut self, input: &ClutchInput, dt: f32) -> f32 {
        let forced = (self.cfg.press_while_shifting && input.shifting)
            || (self.cfg.press_while_handbraking && clamp01(input.handbrake) >= self.cfg.handbrake_threshold);

        if forced {
            self.target = 1.0;
            self.engagement = 1.0;
            self.velocity = 0.0;
            return self.engagement;
        }

        if !self.cfg.automatic {
            self.target = clamp01(input.driver_clutch);
            self.engagement = self.target;
            self.velocity = 0.0;
            return self.engagement;
        }

        let rpm = sanitize(input.engine_rpm, 0.0);
        let moving = sanitize(input.speed_kmh, 0.0).abs() >= self.cfg.low_speed_kmh;
        let pressing = clamp01(input.throttle) >= self.cfg.throttle_threshold;

        self.target = if rpm > self.cfg.engage_rpm && (pressing || moving) { 0.0 } else { 1.0 };

        let smoothed = smooth_damp(self.engagement, self.target, &mut self.velocity, self.cfg.inertia, dt);
        self.engagement = snap(clamp01(smoothed));
        if self.engagement == self.target {
            self.velocity = 0.0;
        }
        self.engagement
    }

    pub fn transmit(&mut self, torque: f32) -> f32 {
        self.received_torque = sanitize(torque, 0.0);
        self.output_torque = self.received_torque * (1.0 - self.engagement);
        self.output_torque
    }

    pub fn engagement(&self) -> f32 { self.engagement }
    pub fn target(&self) -> f32 { self.target }
    pub fn output_torque(&self) -> f32 { self.output_torque }
}

fn snap(x: f32) -> f32 {
    if x < SNAP_EPSILON {
        0.0
    } else if x > 1.0 - SNAP_EPSILON {
        1.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const DT: f32 = 1.0 / 60.0;

    fn launching() -> ClutchInput {
        ClutchInput { throttle: 1.0, engine_rpm: 3000.0, ..ClutchInput::default() }
    }

    #[test]
    fn automatic_engages_under_throttle_and_snaps() {
        let mut c = Clutch::new(ClutchConfig::default());
        for _ in 0..120 {
            c.update(&launching(), DT);
        }
        assert_eq!(c.engagement(), 0.0);
    }

    #[test]
    fn automatic_disengages_below_engage_rpm() {
        let mut c = Clutch::new(ClutchConfig::default());
        for _ in 0..120 {
            c.update(&launching(), DT);
        }
        let stalling = ClutchInput { engine_rpm: 900.0, ..launching() };
        for _ in 0..120 {
            c.update(&stalling, DT);
        }
        assert_eq!(c.engagement(), 1.0);
    }

    #[test]
    fn rolling_without_throttle_stays_engaged() {
        let mut c = Clutch::new(ClutchConfig::default());
        let coasting = ClutchInput { throttle: 0.0, engine_rpm: 2500.0, speed_kmh: 60.0, ..ClutchInput::default() };
        for _ in 0..120 {
            c.update(&coasting, DT);
        }
        assert_eq!(c.engagement(), 0.0);
    }

    #[test]
    fn near_bounds_snap_exactly_on_consecutive_ticks() {
        let mut c = Clutch::new(ClutchConfig::default());
        let near = |e: f32| e <= SNAP_EPSILON || e >= 1.0 - SNAP_EPSILON;
        let mut prev = c.engagement();
        for i in 0..240 {
            // alternate targets so both ends are approached
            let input = if (i / 60) % 2 == 0 {
                launching()
            } else {
                ClutchInput { engine_rpm: 900.0, ..launching() }
            };
            let e = c.update(&input, DT);
            if near(prev) && near(e) {
                assert!(e == 0.0 || e == 1.0, "engagement {e} left unsnapped");
            }
            prev = e;
        }
    }

    #[test]
    fn shifting_forces_full_disengagement() {
        let mut c = Clutch::new(ClutchConfig::default());
        for _ in 0..120 {
            c.update(&launching(), DT);
        }
        let e = c.update(&ClutchInput { shifting: true, ..launching() }, DT);
        assert_eq!(e, 1.0);
        assert_eq!(c.transmit(100.0), 0.0);
    }

    #[test]
    fn manual_passes_pedal_through() {
        let cfg = ClutchConfig { automatic: false, ..ClutchConfig::default() };
        let mut c = Clutch::new(cfg);
        let e = c.update(&ClutchInput { driver_clutch: 0.25, ..ClutchInput::default() }, DT);
        assert_abs_diff_eq!(e, 0.25);
        assert_abs_diff_eq!(c.transmit(200.0), 150.0);
    }
}
