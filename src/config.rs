// Timings, limits, topics and the drivetrain configuration file
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::drive::{GuardConfig, PerSide, ReflectanceSensor, TouchSensor, WheelModel};

// Hardware velocity ceiling (command units, either direction)
pub const MAX_VELOCITY: f64 = 1500.0;

// Active-brake hold before cutting motor power
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

// Alignment polling period
pub const ALIGN_TICK: Duration = Duration::from_millis(10);

// Inertial guard defaults
pub const GUARD_TOLERANCE: f32 = 0.1;
pub const GUARD_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
pub const GUARD_BUDGET: Duration = Duration::from_secs(5);

// Sensor frames older than this are rejected
pub const SENSOR_STALE_AFTER: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "cbc/cmd/drive"; // motion commands
pub const TOPIC_SENSORS: &str = "cbc/state/sensors"; // sensor frames from the hw side
pub const TOPIC_STATUS: &str = "cbc/state/motion"; // motion results

// Serial port for the Feetech wheel servos
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";

/// Errors raised while loading or validating drivetrain configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Everything one side of the robot needs: wheel geometry plus its sensors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideConfig {
    pub wheel: WheelModel,
    pub tophat: ReflectanceSensor,
    pub touch: TouchSensor,
}

/// Inertial guard settings as written in the config file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub tolerance: f32,
    pub sample_interval_ms: u64,
    pub budget_ms: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            tolerance: GUARD_TOLERANCE,
            sample_interval_ms: GUARD_SAMPLE_INTERVAL.as_millis() as u64,
            budget_ms: GUARD_BUDGET.as_millis() as u64,
        }
    }
}

impl From<GuardSettings> for GuardConfig {
    fn from(settings: GuardSettings) -> Self {
        Self {
            tolerance: settings.tolerance,
            sample_interval: Duration::from_millis(settings.sample_interval_ms.max(1)),
            budget: Duration::from_millis(settings.budget_ms),
        }
    }
}

/// Full drivetrain configuration, supplied once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    pub left: SideConfig,
    pub right: SideConfig,
    #[serde(default)]
    pub guard: GuardSettings,
}

impl DriveConfig {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading drive config from {}", path.display());
        let text = fs::read_to_string(path)?;
        let config: DriveConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that per-type validation cannot see
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.left.wheel.port() == self.right.wheel.port() {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "left and right wheels share actuator port {}",
                    self.left.wheel.port()
                ),
            });
        }
        if !(self.guard.tolerance > 0.0) {
            return Err(ConfigError::Invalid {
                reason: format!("guard tolerance must be positive, got {}", self.guard.tolerance),
            });
        }
        for (name, side) in [("left", &self.left), ("right", &self.right)] {
            let skew = (side.wheel.speed_proportion() - 1.0).abs();
            if skew > 0.25 {
                warn!(
                    "{} speed proportion {} is outside the nominal 1.0 ± 0.25",
                    name,
                    side.wheel.speed_proportion()
                );
            }
        }
        Ok(())
    }

    pub fn wheels(&self) -> PerSide<WheelModel> {
        PerSide::new(self.left.wheel.clone(), self.right.wheel.clone())
    }

    pub fn tophats(&self) -> PerSide<ReflectanceSensor> {
        PerSide::new(self.left.tophat, self.right.tophat)
    }

    pub fn touches(&self) -> PerSide<TouchSensor> {
        PerSide::new(self.left.touch, self.right.touch)
    }
}

impl DriveConfig {
    /// Nominal robot used by `--sim` when no file is given
    pub fn nominal() -> Result<Self, ConfigError> {
        let side = |wheel_port: u8, sensor_port: u8| -> Result<SideConfig, ConfigError> {
            Ok(SideConfig {
                wheel: WheelModel::new(wheel_port, 1100, 1.0, 56.0, 75.0)?,
                tophat: ReflectanceSensor::new(sensor_port, 200, 800, 50, 3000)?,
                touch: TouchSensor::new(sensor_port + 8, 3000),
            })
        };
        let config = Self {
            left: side(0, 0)?,
            right: side(3, 1)?,
            guard: GuardSettings::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "left": {
            "wheel": { "port": 0, "ticks_per_revolution": 1100, "speed_proportion": 1.0,
                       "wheel_diameter_mm": 80.0, "radial_distance_mm": 70.0 },
            "tophat": { "port": 0, "white_threshold": 150, "black_threshold": 850,
                        "error_margin": 40, "timeout_ms": 2000 },
            "touch": { "port": 8, "timeout_ms": 2000 }
        },
        "right": {
            "wheel": { "port": 3, "ticks_per_revolution": 1100, "speed_proportion": 0.95,
                       "wheel_diameter_mm": 80.0, "radial_distance_mm": 70.0 },
            "tophat": { "port": 1, "white_threshold": 150, "black_threshold": 850,
                        "error_margin": 40, "timeout_ms": 2000 },
            "touch": { "port": 9, "timeout_ms": 1500 }
        }
    }"#;

    #[test]
    fn test_parse_sample_config() {
        let config: DriveConfig = serde_json::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.right.wheel.port(), 3);
        assert_eq!(config.right.touch.timeout_ms, 1500);
        // ticks_per_mm is derived on load, never read from the file
        let expected = 1100.0 / (80.0 * std::f64::consts::PI);
        assert!((config.left.wheel.ticks_per_mm() - expected).abs() < 1e-9);
        // Guard section is optional
        assert_eq!(config.guard.tolerance, GUARD_TOLERANCE);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let bad = SAMPLE.replacen("\"white_threshold\": 150", "\"white_threshold\": 900", 1);
        let result: Result<DriveConfig, _> = serde_json::from_str(&bad);
        assert!(result.is_err(), "white above black must not parse");
    }

    #[test]
    fn test_rejects_zero_diameter() {
        let bad = SAMPLE.replacen("\"wheel_diameter_mm\": 80.0", "\"wheel_diameter_mm\": 0.0", 1);
        let result: Result<DriveConfig, _> = serde_json::from_str(&bad);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_shared_port() {
        let mut config = DriveConfig::nominal().unwrap();
        config.right.wheel = config.left.wheel.clone();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_nominal_config_is_valid() {
        let config = DriveConfig::nominal().unwrap();
        config.validate().unwrap();
        assert_ne!(config.left.wheel.port(), config.right.wheel.port());
        assert_eq!(config.left.touch.port, 8);
        assert_eq!(config.right.tophat.port, 1);
    }

    #[test]
    fn test_guard_settings_conversion() {
        let guard: GuardConfig = GuardSettings {
            tolerance: 0.2,
            sample_interval_ms: 0,
            budget_ms: 400,
        }
        .into();
        assert_eq!(guard.sample_interval, Duration::from_millis(1));
        assert_eq!(guard.budget, Duration::from_millis(400));
    }
}
