pub mod config;
pub mod error;
pub mod drivetrain;
pub mod vehicle;
pub mod suspension_contact;
pub mod physics;
pub mod state;
pub mod net;

pub use config::VehicleConfig;
pub use error::ConfigError;
pub use vehicle::{TickOutput, Vehicle, VehicleState};
