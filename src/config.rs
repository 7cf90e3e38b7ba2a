// ==============================================================================
// config.rs - VEHICLE CONFIGURATION SURFACE
// ------------------------------------------------------------------------------
// Everything here is set once when a vehicle is built and stays immutable for
// the life of the simulation (reconfiguring means building a new Vehicle).
//
// - VehicleConfig::validate() rejects configurations the pipeline cannot run
// - gt86() / tank() are the stock presets used by the server
// - from_json_str() / from_json_file() load overrides, missing fields fall back
//   to the preset defaults
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;
use tracing::warn;

use crate::drivetrain::differential::DifferentialType;
use crate::drivetrain::friction::{FrictionCurve, GroundMaterial};
use crate::drivetrain::gearbox::TransmissionMode;
use crate::drivetrain::types::Curve;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_rpm: f32,
    pub max_rpm: f32,
    pub max_torque: f32,        // N*m
    /// Torque multiplier sampled by rpm / max_rpm.
    pub torque_curve: Curve,
    pub inertia: f32,           // s, rpm smoothing time
    pub friction: f32,          // fraction of max rpm lost per second
    pub acceleration: f32,      // fraction of max rpm gained per second at full fuel
    pub coupling_rate: f32,     // 1/s, pull toward wheel-implied rpm when engaged
    pub rev_limiter: bool,
    pub starting_delay: f32,    // s
    pub start_running: bool,
    pub turbo: TurboConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_rpm: 800.0,
            max_rpm: 7500.0,
            max_torque: 210.0,
            torque_curve: Curve::new(vec![
                (0.0, 0.35),
                (0.25, 0.75),
                (0.55, 1.0),
                (0.85, 0.92),
                (1.0, 0.75),
            ]),
            inertia: 0.15,
            friction: 0.2,
            acceleration: 1.0,
            coupling_rate: 12.0,
            rev_limiter: true,
            starting_delay: 1.0,
            start_running: true,
            turbo: TurboConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurboConfig {
    pub enabled: bool,
    pub max_psi: f32,
    pub spool_rate: f32,  // 1/s
    pub torque_gain: f32, // extra torque fraction at full boost
}

impl Default for TurboConfig {
    fn default() -> Self {
        Self { enabled: false, max_psi: 12.0, spool_rate: 2.5, torque_gain: 0.3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NosConfig {
    pub enabled: bool,
    pub torque_multiplier: f32,
    pub capacity: f32,     // s of continuous use
    pub regen_delay: f32,  // s after release before refilling
    pub regen_rate: f32,   // s of capacity restored per s
}

impl Default for NosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            torque_multiplier: 1.6,
            capacity: 3.0,
            regen_delay: 2.0,
            regen_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClutchConfig {
    pub automatic: bool,
    pub engage_rpm: f32,
    pub inertia: f32,              // s, settling time of the engagement filter
    pub low_speed_kmh: f32,        // above this the clutch stays engaged without throttle
    pub throttle_threshold: f32,
    pub press_while_shifting: bool,
    pub press_while_handbraking: bool,
    pub handbrake_threshold: f32,
}

impl Default for ClutchConfig {
    fn default() -> Self {
        Self {
            automatic: true,
            engage_rpm: 1400.0,
            inertia: 0.1,
            low_speed_kmh: 10.0,
            throttle_threshold: 0.05,
            press_while_shifting: true,
            press_while_handbraking: true,
            handbrake_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GearboxConfig {
    pub mode: TransmissionMode,
    pub gear_ratios: Vec<f32>,
    pub shifting_time: f32,          // s
    pub shift_cooldown: f32,         // s, automatic policy only
    pub shift_threshold: f32,        // 0..1
    pub shift_up_rpm: f32,
    pub shift_down_rpm: f32,
    pub reverse_speed_limit_kmh: f32,
    pub auto_reverse: bool,
}

impl Default for GearboxConfig {
    fn default() -> Self {
        Self {
            mode: TransmissionMode::Automatic,
            gear_ratios: vec![3.626, 2.188, 1.541, 1.213, 1.0, 0.767],
            shifting_time: 0.25,
            shift_cooldown: 0.5,
            shift_threshold: 0.85,
            shift_up_rpm: 6500.0,
            shift_down_rpm: 3000.0,
            reverse_speed_limit_kmh: 20.0,
            auto_reverse: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialConfig {
    pub kind: DifferentialType,
    pub lock_percentage: f32, // 0..100, Limited only
    pub final_drive: f32,
    pub axle: usize,
}

impl Default for DifferentialConfig {
    fn default() -> Self {
        Self { kind: DifferentialType::Limited, lock_percentage: 50.0, final_drive: 4.1, axle: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspensionConfig {
    pub rest_length: f32, // m
    pub max_length: f32,  // m of travel
    pub stiffness: f32,   // N/m
    pub damping: f32,     // N*s/m
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self { rest_length: 0.35, max_length: 0.3, stiffness: 35_000.0, damping: 3_500.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelConfig {
    /// Mount point in chassis space (+Z forward, +Y up, +X left).
    pub mount: [f32; 3],
    pub radius: f32,
    pub mass: f32,
    pub rolling_resistance: f32,
    pub deflated_radius_multiplier: f32,
    pub deflated_stiffness_multiplier: f32,
    pub suspension: SuspensionConfig,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            mount: [0.0, -0.2, 0.0],
            radius: 0.32,
            mass: 20.0,
            rolling_resistance: 0.015,
            deflated_radius_multiplier: 0.85,
            deflated_stiffness_multiplier: 0.5,
            suspension: SuspensionConfig::default(),
        }
    }
}

impl WheelConfig {
    pub fn at(mount: [f32; 3]) -> Self {
        Self { mount, ..Self::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxleConfig {
    /// Exactly two wheels: left then right.
    pub wheels: Vec<WheelConfig>,

    pub powered: bool,
    pub steered: bool,
    pub braked: bool,
    pub handbraked: bool,

    pub power_multiplier: f32,
    pub steer_multiplier: f32,
    pub brake_multiplier: f32,
    pub handbrake_multiplier: f32,

    pub max_steer_angle: f32,     // degrees
    pub steer_speed: f32,         // degrees per second
    /// 0 disables; otherwise steering authority fades to 35% at this speed (km/h).
    pub steer_fade_speed_kmh: f32,
    pub ackermann: f32,           // 0 = parallel, 1 = full Ackermann

    pub max_brake_torque: f32,     // N*m per wheel
    pub max_handbrake_torque: f32, // N*m per wheel
    pub anti_roll: f32,            // N/m
}

impl Default for AxleConfig {
    fn default() -> Self {
        Self {
            wheels: vec![WheelConfig::default(), WheelConfig::default()],
            powered: false,
            steered: false,
            braked: true,
            handbraked: false,
            power_multiplier: 1.0,
            steer_multiplier: 1.0,
            brake_multiplier: 1.0,
            handbrake_multiplier: 1.0,
            max_steer_angle: 35.0,
            steer_speed: 250.0,
            steer_fade_speed_kmh: 0.0,
            ackermann: 0.8,
            max_brake_torque: 2_500.0,
            max_handbrake_torque: 4_000.0,
            anti_roll: 8_000.0,
        }
    }
}

impl AxleConfig {
    pub fn track_width(&self) -> f32 {
        match self.wheels.as_slice() {
            [l, r] => (l.mount[0] - r.mount[0]).abs(),
            _ => 0.0,
        }
    }

    pub fn longitudinal_position(&self) -> f32 {
        if self.wheels.is_empty() {
            return 0.0;
        }
        self.wheels.iter().map(|w| w.mount[2]).sum::<f32>() / self.wheels.len() as f32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub abs: bool,
    pub tcs: bool,
    pub esp: bool,
    pub steering_helper: bool,
    pub traction_helper: bool,

    pub abs_threshold: f32,
    pub abs_intensity: f32,
    pub tcs_threshold: f32,
    pub tcs_intensity: f32,
    pub esp_threshold: f32,
    pub esp_intensity: f32,

    pub steer_helper_strength: f32,
    pub traction_helper_strength: f32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            abs: true,
            tcs: true,
            esp: true,
            steering_helper: true,
            traction_helper: true,
            abs_threshold: 0.35,
            abs_intensity: 0.5,
            tcs_threshold: 0.35,
            tcs_intensity: 0.5,
            esp_threshold: 0.5,
            esp_intensity: 0.3,
            steer_helper_strength: 0.1,
            traction_helper_strength: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChassisConfig {
    pub mass: f32,                      // kg
    pub half_extents: [f32; 3],         // m
    pub com_offset: [f32; 3],           // local offset from collider center
    pub linear_damping: f32,
    pub angular_damping: f32,
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            mass: 1350.0,
            half_extents: [0.9, 0.35, 2.1],
            com_offset: [0.0, -0.15, 0.0],
            linear_damping: 0.05,
            angular_damping: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub name: String,
    pub chassis: ChassisConfig,
    pub engine: EngineConfig,
    pub nos: NosConfig,
    pub clutch: ClutchConfig,
    pub gearbox: GearboxConfig,
    pub differentials: Vec<DifferentialConfig>,
    pub axles: Vec<AxleConfig>,
    pub materials: Vec<GroundMaterial>,
    pub stability: StabilityConfig,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self::gt86()
    }
}

impl VehicleConfig {
    /// Rear-drive coupe with a limited-slip rear differential.
    pub fn gt86() -> Self {
        let front = AxleConfig {
            wheels: vec![
                WheelConfig::at([0.76, -0.2, 1.25]),
                WheelConfig::at([-0.76, -0.2, 1.25]),
            ],
            steered: true,
            braked: true,
            brake_multiplier: 1.0,
            anti_roll: 9_000.0,
            ..AxleConfig::default()
        };
        let rear = AxleConfig {
            wheels: vec![
                WheelConfig::at([0.76, -0.2, -1.3]),
                WheelConfig::at([-0.76, -0.2, -1.3]),
            ],
            powered: true,
            braked: true,
            handbraked: true,
            brake_multiplier: 0.7,
            anti_roll: 6_000.0,
            ..AxleConfig::default()
        };

        Self {
            name: "gt86".to_string(),
            chassis: ChassisConfig::default(),
            engine: EngineConfig::default(),
            nos: NosConfig::default(),
            clutch: ClutchConfig::default(),
            gearbox: GearboxConfig::default(),
            differentials: vec![DifferentialConfig {
                kind: DifferentialType::Limited,
                lock_percentage: 40.0,
                final_drive: 4.1,
                axle: 1,
            }],
            axles: vec![front, rear],
            materials: GroundMaterial::defaults(),
            stability: StabilityConfig::default(),
        }
    }

    /// Heavy all-wheel-drive carrier with locked differentials.
    pub fn tank() -> Self {
        let wheel = |mount: [f32; 3]| WheelConfig {
            mount,
            radius: 0.55,
            mass: 120.0,
            rolling_resistance: 0.03,
            suspension: SuspensionConfig {
                rest_length: 0.45,
                max_length: 0.35,
                stiffness: 450_000.0,
                damping: 45_000.0,
            },
            ..WheelConfig::default()
        };
        let axle = |z: f32, steered: bool| AxleConfig {
            wheels: vec![wheel([1.2, -0.4, z]), wheel([-1.2, -0.4, z])],
            powered: true,
            steered,
            braked: true,
            handbraked: !steered,
            max_steer_angle: 28.0,
            steer_speed: 90.0,
            max_brake_torque: 40_000.0,
            max_handbrake_torque: 40_000.0,
            anti_roll: 60_000.0,
            ..AxleConfig::default()
        };

        Self {
            name: "tank".to_string(),
            chassis: ChassisConfig {
                mass: 32_000.0,
                half_extents: [1.6, 0.8, 3.5],
                com_offset: [0.0, -0.3, 0.0],
                linear_damping: 0.2,
                angular_damping: 2.0,
            },
            engine: EngineConfig {
                min_rpm: 600.0,
                max_rpm: 2800.0,
                max_torque: 3_000.0,
                inertia: 0.4,
                ..EngineConfig::default()
            },
            nos: NosConfig::default(),
            clutch: ClutchConfig { engage_rpm: 900.0, ..ClutchConfig::default() },
            gearbox: GearboxConfig {
                gear_ratios: vec![4.8, 2.9, 1.9, 1.3, 1.0],
                shift_up_rpm: 2500.0,
                shift_down_rpm: 1300.0,
                shifting_time: 0.5,
                ..GearboxConfig::default()
            },
            differentials: vec![
                DifferentialConfig { kind: DifferentialType::FullLocked, lock_percentage: 100.0, final_drive: 7.5, axle: 0 },
                DifferentialConfig { kind: DifferentialType::FullLocked, lock_percentage: 100.0, final_drive: 7.5, axle: 1 },
            ],
            axles: vec![axle(2.0, true), axle(-2.0, false)],
            materials: GroundMaterial::defaults(),
            stability: StabilityConfig { esp: false, ..StabilityConfig::default() },
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Rejects configurations that cannot be simulated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let result = self.check();
        if let Err(e) = &result {
            warn!(vehicle = %self.name, error = %e, "rejected vehicle config");
        }
        result
    }

    fn check(&self) -> Result<(), ConfigError> {
        let e = &self.engine;
        if !(e.min_rpm >= 0.0 && e.max_rpm > e.min_rpm && e.max_rpm.is_finite()) {
            return Err(ConfigError::InvalidRpmBounds { min: e.min_rpm, max: e.max_rpm });
        }
        if e.torque_curve.is_empty() {
            return Err(ConfigError::EmptyTorqueCurve);
        }
        if !(e.max_torque >= 0.0 && e.inertia > 0.0) {
            return Err(ConfigError::Invalid("engine max_torque must be >= 0 and inertia > 0"));
        }

        let g = &self.gearbox;
        if g.gear_ratios.is_empty() {
            return Err(ConfigError::EmptyGearRatios);
        }
        for (index, &ratio) in g.gear_ratios.iter().enumerate() {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(ConfigError::InvalidGearRatio { index, ratio });
            }
        }
        if !(g.shifting_time >= 0.0 && g.shift_up_rpm > g.shift_down_rpm) {
            return Err(ConfigError::Invalid("shift rpm window or shifting time is invalid"));
        }

        if self.chassis.mass <= 0.0 {
            return Err(ConfigError::Invalid("chassis mass must be positive"));
        }

        if self.materials.is_empty() {
            return Err(ConfigError::NoGroundMaterials);
        }

        if self.axles.is_empty() {
            return Err(ConfigError::NoAxles);
        }
        for (axle, a) in self.axles.iter().enumerate() {
            if a.wheels.len() != 2 {
                return Err(ConfigError::AxleWheelCount { axle, count: a.wheels.len() });
            }
            if a.wheels.iter().any(|w| !(w.radius > 0.0 && w.mass > 0.0)) {
                return Err(ConfigError::Invalid("wheel radius and mass must be positive"));
            }
        }

        for (index, d) in self.differentials.iter().enumerate() {
            if !(d.final_drive.is_finite() && d.final_drive > 0.0) {
                return Err(ConfigError::InvalidFinalDrive { index, ratio: d.final_drive });
            }
            if !(0.0..=100.0).contains(&d.lock_percentage) {
                return Err(ConfigError::LockPercentage(d.lock_percentage));
            }
            let Some(axle) = self.axles.get(d.axle) else {
                return Err(ConfigError::DifferentialAxleMissing { index, axle: d.axle });
            };
            if !axle.powered {
                return Err(ConfigError::DifferentialAxleUnpowered { index, axle: d.axle });
            }
        }
        for (axle, a) in self.axles.iter().enumerate() {
            if a.powered && !self.differentials.iter().any(|d| d.axle == axle) {
                return Err(ConfigError::PoweredAxleWithoutDifferential { axle });
            }
        }

        Ok(())
    }

    /// Checks a ground-material index against the configured table.
    pub fn material(&self, index: usize) -> Result<&GroundMaterial, ConfigError> {
        self.materials.get(index).ok_or(ConfigError::InvalidGroundMaterial {
            index,
            count: self.materials.len(),
        })
    }

    /// Distance between the frontmost and rearmost axle.
    pub fn wheelbase(&self) -> f32 {
        let zs = self.axles.iter().map(|a| a.longitudinal_position());
        let (min, max) = zs.fold((f32::MAX, f32::MIN), |(lo, hi), z| (lo.min(z), hi.max(z)));
        if max > min { max - min } else { 2.5 }
    }

    /// Radius of the first powered wheel, used for speed <-> rpm conversion.
    pub fn drive_wheel_radius(&self) -> f32 {
        self.axles
            .iter()
            .find(|a| a.powered)
            .and_then(|a| a.wheels.first())
            .map(|w| w.radius)
            .unwrap_or(0.32)
    }

    /// Average final drive across the differentials.
    pub fn final_drive(&self) -> f32 {
        if self.differentials.is_empty() {
            return 1.0;
        }
        self.differentials.iter().map(|d| d.final_drive).sum::<f32>() / self.differentials.len() as f32
    }

    /// Speed at max rpm in the tallest gear, km/h.
    pub fn theoretical_top_speed_kmh(&self) -> f32 {
        let top_ratio = self.gearbox.gear_ratios.last().copied().unwrap_or(1.0);
        let wheel_rpm = self.engine.max_rpm / (top_ratio * self.final_drive()).max(1e-3);
        wheel_rpm * 2.0 * PI * self.drive_wheel_radius() * 60.0 / 1000.0
    }
}

impl GroundMaterial {
    /// Asphalt (0), grass (1), gravel (2).
    pub fn defaults() -> Vec<GroundMaterial> {
        vec![
            GroundMaterial {
                name: "asphalt".to_string(),
                forward: FrictionCurve::default(),
                sideways: FrictionCurve { extremum_slip: 0.25, asymptote_slip: 0.6, ..FrictionCurve::default() },
                slip_threshold: 0.35,
                damping: 0.0,
            },
            GroundMaterial {
                name: "grass".to_string(),
                forward: FrictionCurve { stiffness: 0.6, ..FrictionCurve::default() },
                sideways: FrictionCurve { stiffness: 0.55, extremum_slip: 0.25, asymptote_slip: 0.6, ..FrictionCurve::default() },
                slip_threshold: 0.25,
                damping: 2.0,
            },
            GroundMaterial {
                name: "gravel".to_string(),
                forward: FrictionCurve { stiffness: 0.75, ..FrictionCurve::default() },
                sideways: FrictionCurve { stiffness: 0.7, extremum_slip: 0.3, asymptote_slip: 0.7, ..FrictionCurve::default() },
                slip_threshold: 0.3,
                damping: 1.0,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        VehicleConfig::gt86().validate().unwrap();
        VehicleConfig::tank().validate().unwrap();
    }

    #[test]
    fn empty_gear_table_is_rejected() {
        let mut cfg = VehicleConfig::gt86();
        cfg.gearbox.gear_ratios.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyGearRatios)));
    }

    #[test]
    fn axle_without_wheel_pair_is_rejected() {
        let mut cfg = VehicleConfig::gt86();
        cfg.axles[0].wheels.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::AxleWheelCount { axle: 0, count: 0 })));
    }

    #[test]
    fn differential_must_target_powered_axle() {
        let mut cfg = VehicleConfig::gt86();
        cfg.differentials[0].axle = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DifferentialAxleUnpowered { .. })
        ));
    }

    #[test]
    fn material_lookup_reports_bad_index() {
        let cfg = VehicleConfig::gt86();
        assert!(cfg.material(0).is_ok());
        assert!(matches!(
            cfg.material(42),
            Err(ConfigError::InvalidGroundMaterial { index: 42, .. })
        ));
    }

    #[test]
    fn json_overrides_fall_back_to_defaults() {
        let cfg = VehicleConfig::from_json_str(r#"{ "name": "custom", "engine": { "max_rpm": 9000.0 } }"#).unwrap();
        assert_eq!(cfg.name, "custom");
        assert_eq!(cfg.engine.max_rpm, 9000.0);
        assert_eq!(cfg.axles.len(), 2);
    }

    #[test]
    fn top_speed_is_plausible() {
        let v = VehicleConfig::gt86().theoretical_top_speed_kmh();
        assert!(v > 150.0 && v < 400.0, "top speed {v}");
    }
}
