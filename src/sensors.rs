// Latest-value sensor store
// Frames arrive from the network; the drive core reads them through the
// SensorPort / Accelerometer traits. Frames older than SENSOR_STALE_AFTER
// are refused rather than silently reused.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::SENSOR_STALE_AFTER;
use crate::hal::{self, Accelerometer, Axis, HalError, SensorPort};
use crate::messages::SensorFrame;

#[derive(Debug, Default)]
struct Latest {
    frame: SensorFrame,
    received_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct SensorCache {
    latest: Arc<Mutex<Latest>>,
    stale_after: Duration,
}

impl Default for SensorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorCache {
    pub fn new() -> Self {
        Self::with_stale_after(SENSOR_STALE_AFTER)
    }

    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            latest: Arc::new(Mutex::new(Latest::default())),
            stale_after,
        }
    }

    /// Merge a new frame; ports missing from it keep their previous value
    pub fn update(&self, frame: SensorFrame) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        latest.frame.analog.extend(frame.analog);
        latest.frame.digital.extend(frame.digital);
        if frame.accel.is_some() {
            latest.frame.accel = frame.accel;
        }
        latest.received_at = Some(Instant::now());
    }

    fn read<T>(&self, pick: impl FnOnce(&SensorFrame) -> Option<T>, missing: HalError) -> hal::Result<T> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(received_at) = latest.received_at else {
            return Err(missing);
        };
        let age = received_at.elapsed();
        if age > self.stale_after {
            return Err(HalError::StaleSensor {
                age_ms: age.as_millis(),
            });
        }
        pick(&latest.frame).ok_or(missing)
    }
}

impl SensorPort for SensorCache {
    fn read_digital(&mut self, port: u8) -> hal::Result<bool> {
        self.read(|f| f.digital.get(&port).copied(), HalError::NoReading { port })
    }

    fn read_analog(&mut self, port: u8) -> hal::Result<u16> {
        self.read(|f| f.analog.get(&port).copied(), HalError::NoReading { port })
    }
}

impl Accelerometer for SensorCache {
    fn read_axis(&mut self, axis: Axis) -> hal::Result<f32> {
        Ok(self.read_all()?[axis.index()])
    }

    // One lock for all three axes so they come from the same frame
    fn read_all(&mut self) -> hal::Result<[f32; 3]> {
        self.read(|f| f.accel, HalError::NoAccel)
    }
}
