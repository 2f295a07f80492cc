// Inertial bump guard
// Samples the accelerometer in the background and forces a full stop when
// any axis drifts from the baseline captured at start.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::DriveError;
use super::sequencer::MotionSequencer;
use crate::config::{GUARD_BUDGET, GUARD_SAMPLE_INTERVAL, GUARD_TOLERANCE};
use crate::hal::{Accelerometer, Axis};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardConfig {
    /// Largest allowed per-axis deviation from the baseline
    pub tolerance: f32,
    pub sample_interval: Duration,
    /// Total monitoring time before the guard expires on its own
    pub budget: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            tolerance: GUARD_TOLERANCE,
            sample_interval: GUARD_SAMPLE_INTERVAL,
            budget: GUARD_BUDGET,
        }
    }
}

/// Acceleration captured at start plus the monitoring time left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertialBaseline {
    pub accel: [f32; 3],
    pub remaining: Duration,
}

impl InertialBaseline {
    /// First axis whose reading is more than `tolerance` off the baseline
    pub fn deviation(&self, reading: [f32; 3], tolerance: f32) -> Option<Axis> {
        Axis::ALL
            .into_iter()
            .find(|axis| (reading[axis.index()] - self.accel[axis.index()]).abs() > tolerance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GuardOutcome {
    /// Deviation detected and the drivetrain stopped
    Tripped { axis: Axis, baseline: f32, reading: f32 },
    /// Budget ran out without incident
    Expired,
    Cancelled,
}

pub struct InertialGuard;

impl InertialGuard {
    /// Capture the baseline now and start monitoring in the background
    ///
    /// The returned handle owns the task. Dropping it cancels the guard at
    /// its next sample.
    pub fn start<A>(
        sequencer: MotionSequencer,
        mut accel: A,
        config: GuardConfig,
    ) -> Result<GuardHandle, DriveError>
    where
        A: Accelerometer + 'static,
    {
        let baseline = InertialBaseline {
            accel: accel.read_all()?,
            remaining: config.budget,
        };
        info!(
            "Inertial guard armed: baseline={:?}, tolerance={}, budget={}ms",
            baseline.accel,
            config.tolerance,
            config.budget.as_millis()
        );

        let (cancel, cancelled) = oneshot::channel();
        let task = tokio::spawn(monitor(sequencer, accel, config, baseline, cancelled));
        Ok(GuardHandle {
            cancel: Some(cancel),
            task,
        })
    }
}

async fn monitor<A: Accelerometer>(
    sequencer: MotionSequencer,
    mut accel: A,
    config: GuardConfig,
    mut baseline: InertialBaseline,
    mut cancelled: oneshot::Receiver<()>,
) -> Result<GuardOutcome, DriveError> {
    let mut ticker = interval(config.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Cancellation is only observed between samples, never mid-stop
        tokio::select! {
            biased;
            _ = &mut cancelled => {
                debug!("Inertial guard cancelled");
                return Ok(GuardOutcome::Cancelled);
            }
            _ = ticker.tick() => {}
        }

        if baseline.remaining.is_zero() {
            info!("Inertial guard budget exhausted");
            return Ok(GuardOutcome::Expired);
        }

        let reading = accel.read_all()?;
        if let Some(axis) = baseline.deviation(reading, config.tolerance) {
            let i = axis.index();
            warn!(
                "Acceleration on {:?} moved {} -> {}, stopping drivetrain",
                axis, baseline.accel[i], reading[i]
            );
            sequencer.stop().await?;
            return Ok(GuardOutcome::Tripped {
                axis,
                baseline: baseline.accel[i],
                reading: reading[i],
            });
        }

        baseline.remaining = baseline.remaining.saturating_sub(config.sample_interval);
    }
}

/// Owned handle to a running guard
pub struct GuardHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<GuardOutcome, DriveError>>,
}

impl GuardHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the guard to stop and wait for it
    ///
    /// A stop already in progress runs to completion first, so the
    /// returned outcome may still be `Tripped` or `Expired`.
    pub async fn cancel(mut self) -> Result<GuardOutcome, DriveError> {
        if let Some(cancel) = self.cancel.take() {
            // Err means the task already returned
            let _ = cancel.send(());
        }
        self.join().await
    }

    /// Wait for the guard to trip or expire
    pub async fn join(self) -> Result<GuardOutcome, DriveError> {
        // Keep the sender alive until the task ends
        let _cancel = self.cancel;
        self.task.await?
    }
}
