// Differential drive core
//
// Provides:
// - Wheel geometry and sensor thresholds (wheel)
// - Straight / arc / spin planning (planner)
// - Batched actuation, timed waits and the two-phase stop (sequencer)
// - Touch and line alignment loops (align)
// - Background accelerometer bump guard (guard)
//
// All actuator access goes through `Drive`, a cloneable handle around one
// mutex. A `BatchScope` can only be opened while holding that lock, so two
// flows can never interleave commands inside a batch.

pub mod align;
pub mod guard;
pub mod planner;
pub mod sequencer;
pub mod wheel;

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::debug;

use crate::hal::{self, ActuatorPort, HalError};

pub use align::{AlignReport, AlignmentController, LineTarget, SideOutcome};
pub use guard::{GuardConfig, GuardHandle, GuardOutcome, InertialBaseline, InertialGuard};
pub use planner::{MotionPlan, PlanError, plan_arc, plan_direct, plan_spin, plan_straight};
pub use sequencer::{ExecuteOutcome, MotionSequencer};
pub use wheel::{PerSide, ReflectanceSensor, Side, TouchSensor, WheelConfig, WheelModel};

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Hardware fault: {0}")]
    Hal(#[from] HalError),

    #[error("Inertial guard task failed: {0}")]
    GuardTask(#[from] tokio::task::JoinError),
}

/// Wheel state and the actuator channel, only reachable through the lock
pub struct DriveState {
    wheels: PerSide<WheelModel>,
    actuator: Box<dyn ActuatorPort>,
}

impl DriveState {
    pub fn wheels(&self) -> &PerSide<WheelModel> {
        &self.wheels
    }

    pub(crate) fn wheels_mut(&mut self) -> &mut PerSide<WheelModel> {
        &mut self.wheels
    }

    /// Open a batch on the actuator channel
    pub fn batch(&mut self) -> BatchScope<'_> {
        BatchScope {
            actuator: &mut *self.actuator,
            queued: 0,
            committed: false,
        }
    }
}

/// Commands queued here reach the hardware together on `commit`, or not at all
pub struct BatchScope<'a> {
    actuator: &'a mut dyn ActuatorPort,
    queued: usize,
    committed: bool,
}

impl BatchScope<'_> {
    pub fn set_velocity(&mut self, port: u8, velocity: i16) -> hal::Result<()> {
        self.actuator.set_velocity(port, velocity)?;
        self.queued += 1;
        Ok(())
    }

    pub fn freeze(&mut self, port: u8) -> hal::Result<()> {
        self.actuator.freeze(port)?;
        self.queued += 1;
        Ok(())
    }

    pub fn power_off(&mut self, port: u8) -> hal::Result<()> {
        self.actuator.power_off(port)?;
        self.queued += 1;
        Ok(())
    }

    pub fn commit(mut self) -> hal::Result<()> {
        self.committed = true;
        debug!("Flushing batch of {} actuator commands", self.queued);
        self.actuator.flush()
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("Discarding uncommitted batch of {} commands", self.queued);
            self.actuator.discard();
        }
    }
}

struct Shared {
    state: Mutex<DriveState>,
    // Bumped after every completed stop
    halts: watch::Sender<u64>,
}

/// Shared drivetrain handle, constructed once at startup
#[derive(Clone)]
pub struct Drive {
    shared: Arc<Shared>,
}

impl Drive {
    pub fn new(wheels: PerSide<WheelModel>, actuator: impl ActuatorPort + 'static) -> Self {
        let (halts, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DriveState {
                    wheels,
                    actuator: Box::new(actuator),
                }),
                halts,
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, DriveState> {
        self.shared.state.lock().await
    }

    /// Snapshot of the current wheel models
    pub async fn wheels(&self) -> PerSide<WheelModel> {
        self.lock().await.wheels.clone()
    }

    /// Receiver that sees every stop completed after this call
    pub fn subscribe_halts(&self) -> watch::Receiver<u64> {
        self.shared.halts.subscribe()
    }

    pub fn halt_count(&self) -> u64 {
        *self.shared.halts.borrow()
    }

    pub(crate) fn notify_halt(&self) {
        self.shared.halts.send_modify(|count| *count += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ActuatorCommand, SimActuator, WheelState};

    fn drive() -> (Drive, SimActuator) {
        let sim = SimActuator::new();
        let wheels = PerSide::new(
            WheelModel::new(0, 1100, 1.0, 80.0, 70.0).unwrap(),
            WheelModel::new(3, 1100, 1.0, 80.0, 70.0).unwrap(),
        );
        (Drive::new(wheels, sim.clone()), sim)
    }

    #[tokio::test]
    async fn test_batch_commit_flushes_once() {
        let (drive, sim) = drive();
        {
            let mut state = drive.lock().await;
            let mut batch = state.batch();
            batch.set_velocity(0, 300).unwrap();
            batch.freeze(3).unwrap();
            batch.commit().unwrap();
        }

        assert_eq!(
            sim.flushes(),
            vec![vec![
                ActuatorCommand::Velocity { port: 0, velocity: 300 },
                ActuatorCommand::Freeze { port: 3 },
            ]]
        );
        assert_eq!(sim.wheel(0), WheelState::Driving(300));
        assert_eq!(sim.wheel(3), WheelState::Frozen);
    }

    #[tokio::test]
    async fn test_dropped_batch_reaches_nothing() {
        let (drive, sim) = drive();
        {
            let mut state = drive.lock().await;
            let mut batch = state.batch();
            batch.set_velocity(0, 300).unwrap();
            batch.set_velocity(3, 300).unwrap();
        }

        assert!(sim.flushes().is_empty());
        assert_eq!(sim.pending(), 0);
        assert_eq!(sim.wheel(0), WheelState::Off);
    }

    #[tokio::test]
    async fn test_queue_error_discards_partial_batch() {
        let (drive, sim) = drive();
        let result: hal::Result<()> = async {
            let mut state = drive.lock().await;
            let mut batch = state.batch();
            batch.set_velocity(0, 300)?;
            // Port 7 is unknown to the simulator
            batch.set_velocity(7, 300)?;
            batch.commit()
        }
        .await;

        assert!(matches!(result, Err(HalError::UnknownPort { port: 7 })));
        assert!(sim.flushes().is_empty());
        assert_eq!(sim.pending(), 0);
    }

    #[tokio::test]
    async fn test_halt_subscription() {
        let (drive, _sim) = drive();
        let mut halts = drive.subscribe_halts();
        assert!(!halts.has_changed().unwrap());
        drive.notify_halt();
        assert!(halts.has_changed().unwrap());
        halts.mark_unchanged();
        assert_eq!(drive.halt_count(), 1);
    }
}
