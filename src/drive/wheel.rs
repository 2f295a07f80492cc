// Per-side geometry, calibration and sensor thresholds

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];
}

/// A value held once per side of the drivetrain
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerSide<T> {
    pub left: T,
    pub right: T,
}

impl<T> PerSide<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> PerSide<U> {
        PerSide {
            left: f(self.left),
            right: f(self.right),
        }
    }

    pub fn as_ref(&self) -> PerSide<&T> {
        PerSide {
            left: &self.left,
            right: &self.right,
        }
    }
}

/// Wheel geometry as written in a config file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WheelConfig {
    pub port: u8,
    pub ticks_per_revolution: u32,
    pub speed_proportion: f64,
    pub wheel_diameter_mm: f64,
    pub radial_distance_mm: f64,
}

/// Static geometry of one wheel plus the velocity last sent to it
///
/// `ticks_per_mm` is derived from the revolution count and diameter and is
/// refreshed by every constructor and by `reconfigure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WheelConfig", into = "WheelConfig")]
pub struct WheelModel {
    port: u8,
    ticks_per_revolution: u32,
    speed_proportion: f64,
    wheel_diameter_mm: f64,
    radial_distance_mm: f64,
    ticks_per_mm: f64,
    last_commanded_velocity: i16,
}

impl WheelModel {
    /// # Arguments
    /// * `port` - Actuator channel (servo ID on the Feetech bus)
    /// * `ticks_per_revolution` - Encoder counts per wheel turn (~1100)
    /// * `speed_proportion` - Skew correction, nominally 1.0 ± 0.25
    /// * `wheel_diameter_mm` - Wheel diameter in mm
    /// * `radial_distance_mm` - Drivetrain center to wheel contact in mm
    pub fn new(
        port: u8,
        ticks_per_revolution: u32,
        speed_proportion: f64,
        wheel_diameter_mm: f64,
        radial_distance_mm: f64,
    ) -> Result<Self, ConfigError> {
        let mut wheel = Self {
            port,
            ticks_per_revolution: 1,
            speed_proportion: 1.0,
            wheel_diameter_mm: 1.0,
            radial_distance_mm: 1.0,
            ticks_per_mm: 0.0,
            last_commanded_velocity: 0,
        };
        wheel.reconfigure(WheelConfig {
            port,
            ticks_per_revolution,
            speed_proportion,
            wheel_diameter_mm,
            radial_distance_mm,
        })?;
        Ok(wheel)
    }

    /// Replace the geometry, keeping the last commanded velocity
    pub fn reconfigure(&mut self, config: WheelConfig) -> Result<(), ConfigError> {
        if config.ticks_per_revolution == 0 {
            return Err(invalid(config.port, "ticks_per_revolution must be positive"));
        }
        if !(config.wheel_diameter_mm > 0.0) {
            return Err(invalid(config.port, "wheel_diameter_mm must be positive"));
        }
        if !(config.radial_distance_mm > 0.0) {
            return Err(invalid(config.port, "radial_distance_mm must be positive"));
        }
        if !config.speed_proportion.is_finite() {
            return Err(invalid(config.port, "speed_proportion must be finite"));
        }

        self.port = config.port;
        self.ticks_per_revolution = config.ticks_per_revolution;
        self.speed_proportion = config.speed_proportion;
        self.wheel_diameter_mm = config.wheel_diameter_mm;
        self.radial_distance_mm = config.radial_distance_mm;
        self.ticks_per_mm = config.ticks_per_revolution as f64 / (config.wheel_diameter_mm * PI);
        Ok(())
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn ticks_per_revolution(&self) -> u32 {
        self.ticks_per_revolution
    }

    pub fn speed_proportion(&self) -> f64 {
        self.speed_proportion
    }

    pub fn wheel_diameter_mm(&self) -> f64 {
        self.wheel_diameter_mm
    }

    pub fn radial_distance_mm(&self) -> f64 {
        self.radial_distance_mm
    }

    pub fn ticks_per_mm(&self) -> f64 {
        self.ticks_per_mm
    }

    pub fn last_commanded_velocity(&self) -> i16 {
        self.last_commanded_velocity
    }

    pub(crate) fn record_velocity(&mut self, velocity: i16) {
        self.last_commanded_velocity = velocity;
    }
}

fn invalid(port: u8, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: format!("wheel on port {}: {}", port, reason),
    }
}

impl TryFrom<WheelConfig> for WheelModel {
    type Error = ConfigError;

    fn try_from(config: WheelConfig) -> Result<Self, Self::Error> {
        WheelModel::new(
            config.port,
            config.ticks_per_revolution,
            config.speed_proportion,
            config.wheel_diameter_mm,
            config.radial_distance_mm,
        )
    }
}

impl From<WheelModel> for WheelConfig {
    fn from(wheel: WheelModel) -> Self {
        Self {
            port: wheel.port,
            ticks_per_revolution: wheel.ticks_per_revolution,
            speed_proportion: wheel.speed_proportion,
            wheel_diameter_mm: wheel.wheel_diameter_mm,
            radial_distance_mm: wheel.radial_distance_mm,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawReflectance {
    port: u8,
    white_threshold: u16,
    black_threshold: u16,
    error_margin: u16,
    timeout_ms: u64,
}

/// Floor-facing reflectance sensor ("tophat")
///
/// Readings grow with darkness, so `white_threshold < black_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReflectance")]
pub struct ReflectanceSensor {
    pub port: u8,
    pub white_threshold: u16,
    pub black_threshold: u16,
    pub error_margin: u16,
    pub timeout_ms: u64,
}

impl ReflectanceSensor {
    pub fn new(
        port: u8,
        white_threshold: u16,
        black_threshold: u16,
        error_margin: u16,
        timeout_ms: u64,
    ) -> Result<Self, ConfigError> {
        if white_threshold >= black_threshold {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "tophat on port {}: white threshold {} must be below black threshold {}",
                    port, white_threshold, black_threshold
                ),
            });
        }
        Ok(Self {
            port,
            white_threshold,
            black_threshold,
            error_margin,
            timeout_ms,
        })
    }

    /// Reading is past the black edge: `reading > black - error`
    pub fn sees_black(&self, reading: u16) -> bool {
        i32::from(reading) > i32::from(self.black_threshold) - i32::from(self.error_margin)
    }

    /// Reading is past the white edge: `reading < white + error`
    pub fn sees_white(&self, reading: u16) -> bool {
        i32::from(reading) < i32::from(self.white_threshold) + i32::from(self.error_margin)
    }
}

impl TryFrom<RawReflectance> for ReflectanceSensor {
    type Error = ConfigError;

    fn try_from(raw: RawReflectance) -> Result<Self, Self::Error> {
        ReflectanceSensor::new(
            raw.port,
            raw.white_threshold,
            raw.black_threshold,
            raw.error_margin,
            raw.timeout_ms,
        )
    }
}

/// Bumper switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchSensor {
    pub port: u8,
    pub timeout_ms: u64,
}

impl TouchSensor {
    pub fn new(port: u8, timeout_ms: u64) -> Self {
        Self { port, timeout_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_per_mm_formula() {
        let wheel = WheelModel::new(0, 1100, 1.0, 80.0, 70.0).unwrap();
        let expected = 1100.0 / (80.0 * PI);
        assert!((wheel.ticks_per_mm() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_reconfigure_refreshes_derived_ticks() {
        let mut wheel = WheelModel::new(0, 1100, 1.0, 80.0, 70.0).unwrap();
        wheel.record_velocity(400);

        wheel
            .reconfigure(WheelConfig {
                port: 1,
                ticks_per_revolution: 2200,
                speed_proportion: 0.9,
                wheel_diameter_mm: 40.0,
                radial_distance_mm: 60.0,
            })
            .unwrap();

        assert_eq!(wheel.port(), 1);
        assert!((wheel.ticks_per_mm() - 2200.0 / (40.0 * PI)).abs() < 1e-12);
        assert_eq!(wheel.last_commanded_velocity(), 400);
    }

    #[test]
    fn test_failed_reconfigure_leaves_wheel_untouched() {
        let mut wheel = WheelModel::new(0, 1100, 1.0, 80.0, 70.0).unwrap();
        let before = wheel.clone();
        let result = wheel.reconfigure(WheelConfig {
            port: 0,
            ticks_per_revolution: 1100,
            speed_proportion: 1.0,
            wheel_diameter_mm: -5.0,
            radial_distance_mm: 70.0,
        });
        assert!(result.is_err());
        assert_eq!(wheel, before);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(WheelModel::new(0, 0, 1.0, 80.0, 70.0).is_err());
        assert!(WheelModel::new(0, 1100, 1.0, 80.0, 0.0).is_err());
        assert!(WheelModel::new(0, 1100, f64::NAN, 80.0, 70.0).is_err());
    }

    #[test]
    fn test_reflectance_edges() {
        let tophat = ReflectanceSensor::new(0, 200, 800, 50, 1000).unwrap();
        assert!(tophat.sees_black(751));
        assert!(!tophat.sees_black(750));
        assert!(tophat.sees_white(249));
        assert!(!tophat.sees_white(250));
    }

    #[test]
    fn test_reflectance_margin_larger_than_threshold() {
        // black - error goes negative: every reading counts as black
        let tophat = ReflectanceSensor::new(0, 10, 20, 30, 1000).unwrap();
        assert!(tophat.sees_black(0));
    }

    #[test]
    fn test_reflectance_requires_ordered_thresholds() {
        assert!(ReflectanceSensor::new(0, 800, 200, 50, 1000).is_err());
        assert!(ReflectanceSensor::new(0, 500, 500, 50, 1000).is_err());
    }

    #[test]
    fn test_per_side_access() {
        let mut pair = PerSide::new(1, 2);
        *pair.get_mut(Side::Right) += 10;
        assert_eq!(*pair.get(Side::Left), 1);
        assert_eq!(pair.map(|v| v * 2), PerSide::new(2, 24));
    }
}
