// Zenoh drive service
// Commands arrive on TOPIC_CMD_DRIVE and run one at a time on this task.
// Sensor frames are cached by a side task, and the inertial guard runs as
// its own task when armed. Every command gets one status on TOPIC_STATUS.

use std::time::Duration;

use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{DriveConfig, TOPIC_CMD_DRIVE, TOPIC_SENSORS, TOPIC_STATUS};
use crate::drive::{
    AlignmentController, Drive, DriveError, ExecuteOutcome, GuardConfig, GuardHandle,
    InertialGuard, MotionSequencer,
};
use crate::hal::ActuatorPort;
use crate::messages::{MotionCommand, MotionStatus, SensorFrame};
use crate::sensors::SensorCache;

// How often to check whether an armed guard has finished on its own
const GUARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Runtime {
    sequencer: MotionSequencer,
    align: AlignmentController<SensorCache>,
    sensors: SensorCache,
    guard: Option<GuardHandle>,
    guard_config: GuardConfig,
}

impl Runtime {
    pub fn new(config: &DriveConfig, actuator: impl ActuatorPort + 'static, sensors: SensorCache) -> Self {
        let sequencer = MotionSequencer::new(Drive::new(config.wheels(), actuator));
        let align = AlignmentController::new(
            sequencer.clone(),
            sensors.clone(),
            config.touches(),
            config.tophats(),
        );
        Self {
            sequencer,
            align,
            sensors,
            guard: None,
            guard_config: config.guard.into(),
        }
    }

    pub fn sequencer(&self) -> &MotionSequencer {
        &self.sequencer
    }

    /// Run one command to completion and report how it went
    pub async fn on_command(&mut self, cmd: MotionCommand) -> MotionStatus {
        info!("Received command: {:?}", &cmd);
        match self.dispatch(cmd).await {
            Ok(status) => status,
            Err(DriveError::Plan(e)) => MotionStatus::Rejected {
                reason: e.to_string(),
            },
            Err(e) => {
                warn!("Command failed: {}", e);
                MotionStatus::Fault {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn dispatch(&mut self, cmd: MotionCommand) -> Result<MotionStatus, DriveError> {
        let status = match cmd {
            MotionCommand::Straight { speed, distance_mm } => {
                executed(self.sequencer.straight(speed, distance_mm).await?)
            }
            MotionCommand::Arc {
                speed,
                radius_mm,
                angle_deg,
            } => executed(self.sequencer.arc(speed, radius_mm, angle_deg).await?),
            MotionCommand::Spin { speed, angle_deg } => {
                executed(self.sequencer.spin(speed, angle_deg).await?)
            }
            MotionCommand::Direct { left, right } => {
                self.sequencer.direct(left, right).await?;
                MotionStatus::Done
            }
            MotionCommand::AlignTouch => MotionStatus::Aligned {
                report: self.align.touch_stop().await?,
            },
            MotionCommand::AlignBlack => MotionStatus::Aligned {
                report: self.align.align_black().await?,
            },
            MotionCommand::AlignWhite => MotionStatus::Aligned {
                report: self.align.align_white().await?,
            },
            MotionCommand::Stop => {
                self.sequencer.stop().await?;
                MotionStatus::Done
            }
            MotionCommand::GuardStart {
                tolerance,
                budget_ms,
            } => {
                if let Some(previous) = self.guard.take() {
                    let outcome = previous.cancel().await?;
                    info!("Replaced running guard ({:?})", outcome);
                }
                let mut config = self.guard_config;
                if let Some(tolerance) = tolerance {
                    config.tolerance = tolerance;
                }
                if let Some(budget_ms) = budget_ms {
                    config.budget = Duration::from_millis(budget_ms);
                }
                let handle =
                    InertialGuard::start(self.sequencer.clone(), self.sensors.clone(), config)?;
                self.guard = Some(handle);
                MotionStatus::GuardArmed
            }
            MotionCommand::GuardCancel => match self.guard.take() {
                Some(handle) => MotionStatus::GuardFinished {
                    outcome: handle.cancel().await?,
                },
                None => MotionStatus::Done,
            },
        };
        Ok(status)
    }

    /// Collect the outcome of a guard that tripped or expired by itself
    pub async fn poll_guard(&mut self) -> Option<MotionStatus> {
        if !self.guard.as_ref().is_some_and(GuardHandle::is_finished) {
            return None;
        }
        let handle = self.guard.take()?;
        Some(match handle.join().await {
            Ok(outcome) => MotionStatus::GuardFinished { outcome },
            Err(e) => {
                warn!("Inertial guard failed: {}", e);
                MotionStatus::Fault {
                    reason: e.to_string(),
                }
            }
        })
    }
}

fn executed(outcome: ExecuteOutcome) -> MotionStatus {
    match outcome {
        ExecuteOutcome::Completed => MotionStatus::Done,
        ExecuteOutcome::Interrupted => MotionStatus::Interrupted,
    }
}

pub async fn run(
    config: DriveConfig,
    actuator: Box<dyn ActuatorPort>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let commands = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let sensor_frames = session.declare_subscriber(TOPIC_SENSORS).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;

    let sensors = SensorCache::new();
    let feed = sensors.clone();
    tokio::spawn(async move {
        while let Ok(sample) = sensor_frames.recv_async().await {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<SensorFrame>(&payload) {
                Ok(frame) => feed.update(frame),
                Err(e) => warn!("Failed to parse sensor frame: {}", e),
            }
        }
        warn!("Sensor subscription closed");
    });

    let mut runtime = Runtime::new(&config, actuator, sensors);
    let mut guard_poll = interval(GUARD_POLL_INTERVAL);

    info!("Drive runtime started");
    info!("Subscribed to: {}, {}", TOPIC_CMD_DRIVE, TOPIC_SENSORS);
    info!("Publishing to: {}", TOPIC_STATUS);

    loop {
        let status = tokio::select! {
            sample = commands.recv_async() => {
                let payload = sample?.payload().to_bytes().into_owned();
                match serde_json::from_slice::<MotionCommand>(&payload) {
                    Ok(cmd) => Some(runtime.on_command(cmd).await),
                    Err(e) => {
                        warn!("Failed to parse command: {}", e);
                        Some(MotionStatus::Rejected { reason: e.to_string() })
                    }
                }
            }
            _ = guard_poll.tick() => runtime.poll_guard().await,
        };

        if let Some(status) = status {
            let status_json = serde_json::to_string(&status)?;
            pub_status.put(status_json).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{Side, SideOutcome};
    use crate::sim::{SimActuator, WheelState};

    fn runtime() -> (Runtime, SimActuator, SensorCache) {
        let sim = SimActuator::new();
        let sensors = SensorCache::new();
        (
            Runtime::new(&DriveConfig::nominal().unwrap(), sim.clone(), sensors.clone()),
            sim,
            sensors,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_straight_reports_done() {
        let (mut rt, sim, _) = runtime();
        let status = rt
            .on_command(MotionCommand::Straight {
                speed: 300.0,
                distance_mm: 50.0,
            })
            .await;
        assert_eq!(status, MotionStatus::Done);
        assert_eq!(sim.wheel(0), WheelState::Off);
        assert_eq!(sim.wheel(3), WheelState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_is_rejected() {
        let (mut rt, sim, _) = runtime();
        let status = rt
            .on_command(MotionCommand::Spin {
                speed: 4000.0,
                angle_deg: 90.0,
            })
            .await;
        assert!(matches!(status, MotionStatus::Rejected { .. }));
        assert!(sim.flushes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sensor_data_is_a_fault() {
        let (mut rt, _, _) = runtime();
        let status = rt.on_command(MotionCommand::AlignBlack).await;
        assert!(matches!(status, MotionStatus::Fault { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_align_from_cached_frame() {
        let (mut rt, sim, sensors) = runtime();
        let mut frame = SensorFrame::default();
        // Default config: tophats on analog 0 and 1, black edge at 750
        frame.analog.insert(0, 900);
        frame.analog.insert(1, 900);
        sensors.update(frame);
        rt.on_command(MotionCommand::Direct { left: 200, right: 200 }).await;

        let status = rt.on_command(MotionCommand::AlignBlack).await;

        let MotionStatus::Aligned { report } = status else {
            panic!("unexpected status {:?}", status);
        };
        assert_eq!(report.left, SideOutcome::Reached { tick: 1 });
        assert_eq!(report.right, SideOutcome::Reached { tick: 1 });
        let wheels = rt.sequencer().drive().wheels().await;
        assert_eq!(sim.wheel(wheels.get(Side::Left).port()), WheelState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_lifecycle() {
        let (mut rt, _, sensors) = runtime();
        assert_eq!(rt.on_command(MotionCommand::GuardCancel).await, MotionStatus::Done);

        let mut frame = SensorFrame::default();
        frame.accel = Some([0.0, 0.0, 1.0]);
        sensors.update(frame);

        let armed = rt
            .on_command(MotionCommand::GuardStart {
                tolerance: None,
                budget_ms: Some(1000),
            })
            .await;
        assert_eq!(armed, MotionStatus::GuardArmed);
        assert_eq!(rt.poll_guard().await, None);

        let cancelled = rt.on_command(MotionCommand::GuardCancel).await;
        assert!(matches!(
            cancelled,
            MotionStatus::GuardFinished {
                outcome: crate::drive::GuardOutcome::Cancelled
            }
        ));
    }
}
