// Wheel actuator backed by Feetech servos in velocity mode
//
// Commands are held until flush, then sent as at most two broadcast sync
// writes: goal velocity for every wheel that should move or brake, then
// torque enable for every wheel that changed power state. Both wheels are
// always updated by the same packet.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serialport::SerialPort;
use tracing::{debug, info, warn};

use super::feetech::{FeetechBus, FeetechError, OperatingMode};
use crate::hal::{self, ActuatorPort, HalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queued {
    Velocity(u8, i16),
    Freeze(u8),
    Off(u8),
}

/// What one flush writes to the bus
#[derive(Debug, Default, PartialEq, Eq)]
struct Flush {
    velocities: Vec<(u8, i16)>,
    torque: Vec<(u8, bool)>,
}

/// Collapse a queue so the last command per motor wins
fn resolve(queue: &[Queued]) -> Flush {
    let mut velocity: BTreeMap<u8, i16> = BTreeMap::new();
    let mut torque: BTreeMap<u8, bool> = BTreeMap::new();

    for &cmd in queue {
        match cmd {
            Queued::Velocity(id, v) => {
                velocity.insert(id, v);
                torque.insert(id, true);
            }
            // Zero goal with torque held is an active brake
            Queued::Freeze(id) => {
                velocity.insert(id, 0);
                torque.insert(id, true);
            }
            Queued::Off(id) => {
                velocity.remove(&id);
                torque.insert(id, false);
            }
        }
    }

    Flush {
        velocities: velocity.into_iter().collect(),
        torque: torque.into_iter().collect(),
    }
}

pub struct FeetechActuator<P: Read + Write = Box<dyn SerialPort>> {
    bus: FeetechBus<P>,
    motor_ids: Vec<u8>,
    queue: Vec<Queued>,
}

impl FeetechActuator {
    /// Connect to the servo bus on the given serial port
    pub fn open(port: &str, motor_ids: &[u8]) -> Result<Self, FeetechError> {
        info!("Opening motor bus on {}", port);
        Ok(Self::new(FeetechBus::open(port)?, motor_ids))
    }
}

impl<P: Read + Write> FeetechActuator<P> {
    pub fn new(bus: FeetechBus<P>, motor_ids: &[u8]) -> Self {
        Self {
            bus,
            motor_ids: motor_ids.to_vec(),
            queue: Vec::new(),
        }
    }

    /// Check every motor answers and put it in velocity mode, unpowered
    pub fn initialize(&mut self) -> Result<(), FeetechError> {
        info!("Initializing wheel motors {:?} for velocity control", self.motor_ids);

        for &id in &self.motor_ids {
            if !self.bus.ping(id)? {
                warn!("Motor {} not responding to ping", id);
                return Err(FeetechError::Timeout { id });
            }
            debug!("Motor {} responding", id);
        }

        // Mode changes need torque off, and the wheels should start unpowered anyway
        for &id in &self.motor_ids {
            self.bus.set_torque(id, false)?;
            self.bus.set_operating_mode(id, OperatingMode::Velocity)?;
        }

        info!("Wheel motors initialized");
        Ok(())
    }

    pub fn bus(&mut self) -> &mut FeetechBus<P> {
        &mut self.bus
    }

    fn enqueue(&mut self, cmd: Queued, id: u8) -> hal::Result<()> {
        if !self.motor_ids.contains(&id) {
            return Err(HalError::UnknownPort { port: id });
        }
        self.queue.push(cmd);
        Ok(())
    }
}

impl<P: Read + Write + Send> ActuatorPort for FeetechActuator<P> {
    fn set_velocity(&mut self, port: u8, velocity: i16) -> hal::Result<()> {
        self.enqueue(Queued::Velocity(port, velocity), port)
    }

    fn freeze(&mut self, port: u8) -> hal::Result<()> {
        self.enqueue(Queued::Freeze(port), port)
    }

    fn power_off(&mut self, port: u8) -> hal::Result<()> {
        self.enqueue(Queued::Off(port), port)
    }

    fn flush(&mut self) -> hal::Result<()> {
        let flush = resolve(&self.queue);
        self.queue.clear();
        debug!(
            "Flushing to bus: velocities={:?}, torque={:?}",
            flush.velocities, flush.torque
        );
        // Velocity first so a wheel regaining torque starts at its new goal
        self.bus.sync_write_velocity(&flush.velocities)?;
        self.bus.sync_write_torque(&flush.torque)?;
        Ok(())
    }

    fn discard(&mut self) {
        self.queue.clear();
    }
}

impl<P: Read + Write> Drop for FeetechActuator<P> {
    fn drop(&mut self) {
        // Leave the wheels unpowered whatever state the drive was in
        let off: Vec<(u8, bool)> = self.motor_ids.iter().map(|&id| (id, false)).collect();
        if let Err(e) = self.bus.sync_write_torque(&off) {
            warn!("Failed to power off wheels on drop: {}", e);
        }
    }
}
