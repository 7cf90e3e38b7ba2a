//! Nitrous reservoir: while in use it hands the engine a torque multiplier.

use crate::config::NosConfig;
use crate::drivetrain::types::sanitize;

/// Throttle needed before nitrous will flow.
const MIN_THROTTLE: f32 = 0.25;

#[derive(Debug, Clone)]
pub struct Nos {
    cfg: NosConfig,
    remaining: f32,   // s
    regen_timer: f32, // s until refilling starts
    in_use: bool,
}

impl Nos {
    pub fn new(cfg: NosConfig) -> Self {
        let remaining = cfg.capacity.max(0.0);
        Self { cfg, remaining, regen_timer: 0.0, in_use: false }
    }

    /// Advances the reservoir and returns the engine torque multiplier.
    pub fn update(&mut self, requested: bool, throttle: f32, engine_running: bool, dt: f32) -> f32 {
        let dt = sanitize(dt, 0.0).max(0.0);
        self.in_use = self.cfg.enabled
            && requested
            && engine_running
            && throttle >= MIN_THROTTLE
            && self.remaining > 0.0;

        if self.in_use {
            self.remaining = (self.remaining - dt).max(0.0);
            self.regen_timer = self.cfg.regen_delay;
            return self.cfg.torque_multiplier.max(1.0);
        }

        if self.regen_timer > 0.0 {
            self.regen_timer -= dt;
        } else {
            self.remaining = (self.remaining + self.cfg.regen_rate * dt).min(self.cfg.capacity);
        }
        1.0
    }

    pub fn in_use(&self) -> bool { self.in_use }

    pub fn remaining_fraction(&self) -> f32 {
        if self.cfg.capacity <= 0.0 { 0.0 } else { self.remaining / self.cfg.capacity }
    }
}
