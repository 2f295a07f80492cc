// Simulated hardware
//
// SimActuator records every flushed batch and tracks the state each wheel
// ends up in; SimSensors / SimAccelerometer replay scripted readings.
// Clones share state, so a test can keep one clone for inspection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::hal::{self, Accelerometer, ActuatorPort, Axis, HalError, SensorPort};

/// Actuator channels available on the controller board
pub const SIM_PORTS: [u8; 4] = [0, 1, 2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    Velocity { port: u8, velocity: i16 },
    Freeze { port: u8 },
    PowerOff { port: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WheelState {
    #[default]
    Off,
    Frozen,
    Driving(i16),
}

#[derive(Debug, Default)]
struct ActuatorInner {
    ports: Vec<u8>,
    pending: Vec<ActuatorCommand>,
    flushes: Vec<Vec<ActuatorCommand>>,
    wheels: BTreeMap<u8, WheelState>,
}

#[derive(Debug, Clone)]
pub struct SimActuator {
    inner: Arc<Mutex<ActuatorInner>>,
}

impl Default for SimActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimActuator {
    pub fn new() -> Self {
        Self::with_ports(&SIM_PORTS)
    }

    pub fn with_ports(ports: &[u8]) -> Self {
        let inner = ActuatorInner {
            ports: ports.to_vec(),
            ..Default::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn inner(&self) -> MutexGuard<'_, ActuatorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&mut self, command: ActuatorCommand, port: u8) -> hal::Result<()> {
        let mut inner = self.inner();
        if !inner.ports.contains(&port) {
            return Err(HalError::UnknownPort { port });
        }
        inner.pending.push(command);
        Ok(())
    }

    /// Every batch delivered so far, oldest first
    pub fn flushes(&self) -> Vec<Vec<ActuatorCommand>> {
        self.inner().flushes.clone()
    }

    /// Commands queued but not yet flushed
    pub fn pending(&self) -> usize {
        self.inner().pending.len()
    }

    pub fn wheel(&self, port: u8) -> WheelState {
        self.inner().wheels.get(&port).copied().unwrap_or_default()
    }

    pub fn clear_history(&self) {
        self.inner().flushes.clear();
    }
}

impl ActuatorPort for SimActuator {
    fn set_velocity(&mut self, port: u8, velocity: i16) -> hal::Result<()> {
        self.enqueue(ActuatorCommand::Velocity { port, velocity }, port)
    }

    fn freeze(&mut self, port: u8) -> hal::Result<()> {
        self.enqueue(ActuatorCommand::Freeze { port }, port)
    }

    fn power_off(&mut self, port: u8) -> hal::Result<()> {
        self.enqueue(ActuatorCommand::PowerOff { port }, port)
    }

    fn flush(&mut self) -> hal::Result<()> {
        let mut inner = self.inner();
        let batch = std::mem::take(&mut inner.pending);
        for command in &batch {
            let (port, state) = match *command {
                ActuatorCommand::Velocity { port, velocity } => (port, WheelState::Driving(velocity)),
                ActuatorCommand::Freeze { port } => (port, WheelState::Frozen),
                ActuatorCommand::PowerOff { port } => (port, WheelState::Off),
            };
            inner.wheels.insert(port, state);
        }
        debug!("Sim actuator applied {:?}", batch);
        inner.flushes.push(batch);
        Ok(())
    }

    fn discard(&mut self) {
        self.inner().pending.clear();
    }
}

/// Readings handed out in order; the last one repeats forever
#[derive(Debug, Clone, Default)]
struct Script<T> {
    values: VecDeque<T>,
    reads: usize,
}

impl<T: Copy> Script<T> {
    fn new(values: impl IntoIterator<Item = T>) -> Self {
        Self {
            values: values.into_iter().collect(),
            reads: 0,
        }
    }

    fn next(&mut self) -> Option<T> {
        self.reads += 1;
        if self.values.len() > 1 {
            self.values.pop_front()
        } else {
            self.values.front().copied()
        }
    }
}

#[derive(Debug, Default)]
struct SensorsInner {
    analog: BTreeMap<u8, Script<u16>>,
    digital: BTreeMap<u8, Script<bool>>,
}

#[derive(Debug, Clone, Default)]
pub struct SimSensors {
    inner: Arc<Mutex<SensorsInner>>,
}

impl SimSensors {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, SensorsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn script_analog(&self, port: u8, values: impl IntoIterator<Item = u16>) -> &Self {
        self.inner().analog.insert(port, Script::new(values));
        self
    }

    pub fn script_digital(&self, port: u8, values: impl IntoIterator<Item = bool>) -> &Self {
        self.inner().digital.insert(port, Script::new(values));
        self
    }

    pub fn analog_reads(&self, port: u8) -> usize {
        self.inner().analog.get(&port).map_or(0, |s| s.reads)
    }

    pub fn digital_reads(&self, port: u8) -> usize {
        self.inner().digital.get(&port).map_or(0, |s| s.reads)
    }
}

impl SensorPort for SimSensors {
    fn read_digital(&mut self, port: u8) -> hal::Result<bool> {
        self.inner()
            .digital
            .get_mut(&port)
            .and_then(Script::next)
            .ok_or(HalError::NoReading { port })
    }

    fn read_analog(&mut self, port: u8) -> hal::Result<u16> {
        self.inner()
            .analog
            .get_mut(&port)
            .and_then(Script::next)
            .ok_or(HalError::NoReading { port })
    }
}

/// Scripted accelerometer, one x/y/z sample per `read_all`
#[derive(Debug, Clone, Default)]
pub struct SimAccelerometer {
    samples: Arc<Mutex<Script<[f32; 3]>>>,
}

impl SimAccelerometer {
    pub fn new(samples: impl IntoIterator<Item = [f32; 3]>) -> Self {
        Self {
            samples: Arc::new(Mutex::new(Script::new(samples))),
        }
    }

    pub fn samples_taken(&self) -> usize {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).reads
    }

    fn next_sample(&self) -> hal::Result<[f32; 3]> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next()
            .ok_or(HalError::NoAccel)
    }
}

impl Accelerometer for SimAccelerometer {
    fn read_axis(&mut self, axis: Axis) -> hal::Result<f32> {
        Ok(self.next_sample()?[axis.index()])
    }

    fn read_all(&mut self) -> hal::Result<[f32; 3]> {
        self.next_sample()
    }
}
