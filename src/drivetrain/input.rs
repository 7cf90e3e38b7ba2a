//! Driver input surface, atomic override, and queued command intents.
//!
//! Writers (the network task, AI, replay) only touch [`InputState`]; the fixed
//! tick reads it once in its input-resolution step.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

use crate::drivetrain::types::{WheelId, clamp01, clamp_signed};

const MAX_QUEUED_COMMANDS: usize = 32;

/// Raw control values for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSurface {
    pub throttle: f32,  // 0..1
    pub brake: f32,     // 0..1
    pub steer: f32,     // -1..1, + right
    pub handbrake: f32, // 0..1
    pub clutch: f32,    // 0..1, manual clutch only
    pub nos: bool,
}

impl InputSurface {
    /// Clamps every axis into range; NaN reads as released.
    pub fn clamped(self) -> Self {
        Self {
            throttle: clamp01(self.throttle),
            brake: clamp01(self.brake),
            steer: clamp_signed(self.steer),
            handbrake: clamp01(self.handbrake),
            clutch: clamp01(self.clutch),
            nos: self.nos,
        }
    }
}

/// Discrete driver intents, consumed by the next fixed tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "value", rename_all = "snake_case")]
pub enum DriverCommand {
    StartEngine,
    KillEngine,
    ShiftUp,
    ShiftDown,
    ShiftToGear(usize),
    ShiftReverse,
    ShiftNeutral,
    SelectPark,
    SelectDrive,
    Deflate(WheelId),
    Inflate(WheelId),
    SetAbs(bool),
    SetTcs(bool),
    SetEsp(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    Player,
    Override,
}

#[derive(Debug, Clone, Default)]
pub struct InputState {
    player: InputSurface,
    override_input: Option<InputSurface>,
    commands: VecDeque<DriverCommand>,
}

impl InputState {
    pub fn set_player(&mut self, input: InputSurface) {
        self.player = input;
    }

    /// Replaces the whole surface until released.
    pub fn set_override(&mut self, input: InputSurface) {
        self.override_input = Some(input);
    }

    pub fn release_override(&mut self) {
        self.override_input = None;
    }

    pub fn is_overridden(&self) -> bool {
        self.override_input.is_some()
    }

    pub fn player(&self) -> InputSurface {
        self.player
    }

    /// Hands this snapshot to the state a tick reads: surfaces are copied,
    /// queued commands move across.
    pub fn transfer_to(&mut self, dst: &mut InputState) {
        dst.player = self.player;
        dst.override_input = self.override_input;
        for cmd in self.commands.drain(..) {
            dst.push_command(cmd);
        }
    }

    pub fn push_command(&mut self, cmd: DriverCommand) {
        if self.commands.len() >= MAX_QUEUED_COMMANDS {
            warn!(?cmd, "command queue full, dropping oldest");
            self.commands.pop_front();
        }
        self.commands.push_back(cmd);
    }

    /// The surface this tick runs on: override if present, else player input.
    pub fn resolve(&self) -> (InputSurface, InputSource) {
        match self.override_input {
            Some(o) => (o.clamped(), InputSource::Override),
            None => (self.player.clamped(), InputSource::Player),
        }
    }

    pub fn drain_commands(&mut self) -> impl Iterator<Item = DriverCommand> + '_ {
        self.commands.drain(..)
    }
}
