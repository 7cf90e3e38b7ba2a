//! drivetrain - engine-agnostic torque pipeline (pure types + per-stage state)
//!
//! Engine -> Clutch -> Gearbox -> Differential -> Axle -> Wheel -> Stability

pub mod types;
pub mod engine;
pub mod nos;
pub mod clutch;
pub mod gearbox;
pub mod differential;
pub mod steering;
pub mod anti_roll;
pub mod friction;
pub mod wheel;
pub mod axle;
pub mod stability;
pub mod input;

pub use types::*;
pub use input::{DriverCommand, InputSource, InputState, InputSurface};
