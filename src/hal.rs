// Hardware abstraction boundary
//
// The drive core only talks to hardware through these traits:
// - ActuatorPort: queued wheel commands, delivered together on flush
// - SensorPort: digital (touch) and analog (reflectance) reads
// - Accelerometer: single-axis acceleration reads

use serde::{Deserialize, Serialize};

use crate::motor::FeetechError;

/// Faults raised by hardware collaborators, passed through the core unchanged
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("Motor bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("No reading available for sensor port {port}")]
    NoReading { port: u8 },

    #[error("No accelerometer reading available")]
    NoAccel,

    #[error("Sensor data stale ({age_ms}ms old)")]
    StaleSensor { age_ms: u128 },

    #[error("Actuator port {port} is not configured")]
    UnknownPort { port: u8 },
}

pub type Result<T> = std::result::Result<T, HalError>;

/// Command channel to the wheel actuators
///
/// `set_velocity`, `freeze` and `power_off` only enqueue. Nothing reaches the
/// hardware until `flush`, which must deliver the whole queue as one unit.
/// `discard` drops anything queued since the last flush.
pub trait ActuatorPort: Send {
    fn set_velocity(&mut self, port: u8, velocity: i16) -> Result<()>;

    /// Active brake
    fn freeze(&mut self, port: u8) -> Result<()>;

    /// Cut power, letting the wheel coast
    fn power_off(&mut self, port: u8) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn discard(&mut self);
}

impl<T: ActuatorPort + ?Sized> ActuatorPort for Box<T> {
    fn set_velocity(&mut self, port: u8, velocity: i16) -> Result<()> {
        (**self).set_velocity(port, velocity)
    }

    fn freeze(&mut self, port: u8) -> Result<()> {
        (**self).freeze(port)
    }

    fn power_off(&mut self, port: u8) -> Result<()> {
        (**self).power_off(port)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn discard(&mut self) {
        (**self).discard()
    }
}

/// Touch and reflectance inputs
pub trait SensorPort: Send {
    fn read_digital(&mut self, port: u8) -> Result<bool>;

    /// Reflectance on a 0-1023 scale, higher = darker
    fn read_analog(&mut self, port: u8) -> Result<u16>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

pub trait Accelerometer: Send {
    fn read_axis(&mut self, axis: Axis) -> Result<f32>;

    /// All three axes in x, y, z order
    fn read_all(&mut self) -> Result<[f32; 3]> {
        Ok([
            self.read_axis(Axis::X)?,
            self.read_axis(Axis::Y)?,
            self.read_axis(Axis::Z)?,
        ])
    }
}
