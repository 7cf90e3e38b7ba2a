//! Configuration errors.
//!
//! Only configuration problems are reported as errors. Numeric anomalies
//! inside a tick are clamped where they occur and guard rejections (shift
//! while shifting, reverse at speed) are silent no-ops.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("gear ratio table is empty")]
    EmptyGearRatios,

    #[error("gear ratio {index} is invalid ({ratio})")]
    InvalidGearRatio { index: usize, ratio: f32 },

    #[error("final drive ratio of differential {index} must be positive (got {ratio})")]
    InvalidFinalDrive { index: usize, ratio: f32 },

    #[error("vehicle has no axles")]
    NoAxles,

    #[error("axle {axle} must carry exactly two wheels (got {count})")]
    AxleWheelCount { axle: usize, count: usize },

    #[error("no ground materials configured")]
    NoGroundMaterials,

    #[error("ground material index {index} out of range (materials = {count})")]
    InvalidGroundMaterial { index: usize, count: usize },

    #[error("differential {index} is bound to axle {axle}, which does not exist")]
    DifferentialAxleMissing { index: usize, axle: usize },

    #[error("differential {index} is bound to axle {axle}, which is not powered")]
    DifferentialAxleUnpowered { index: usize, axle: usize },

    #[error("powered axle {axle} has no differential")]
    PoweredAxleWithoutDifferential { axle: usize },

    #[error("engine rpm bounds are inverted (min {min}, max {max})")]
    InvalidRpmBounds { min: f32, max: f32 },

    #[error("engine torque curve has no samples")]
    EmptyTorqueCurve,

    #[error("limited slip lock percentage {0} is outside 0..=100")]
    LockPercentage(f32),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("failed to parse vehicle config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read vehicle config: {0}")]
    Io(#[from] std::io::Error),
}
