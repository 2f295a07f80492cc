// Closed-loop alignment
//
// Each loop re-issues the motion already underway, then polls its sensors
// every ALIGN_TICK until both sides have either reached their target or run
// out of time. Sides are tracked independently: a wheel that reaches the
// line is powered off while the other keeps going. Line loops also end once
// neither tophat is still over the colour they started from.
// A sensor fault aborts the loop with a full stop before the error returns.

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::sequencer::MotionSequencer;
use super::wheel::{PerSide, ReflectanceSensor, Side, TouchSensor};
use super::DriveError;
use crate::config::ALIGN_TICK;
use crate::hal::SensorPort;

/// Where one side ended up when an alignment loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SideOutcome {
    /// Condition met on the given poll (1-based)
    Reached { tick: u32 },
    TimedOut,
    /// Loop ended before this side resolved
    Pending,
}

impl SideOutcome {
    fn is_pending(self) -> bool {
        self == SideOutcome::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignReport {
    /// Completed 10ms waits
    pub ticks: u32,
    pub left: SideOutcome,
    pub right: SideOutcome,
    /// A stop from another flow ended the loop
    pub interrupted: bool,
}

impl AlignReport {
    fn new() -> Self {
        Self {
            ticks: 0,
            left: SideOutcome::Pending,
            right: SideOutcome::Pending,
            interrupted: false,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideOutcome {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn side(&self, side: Side) -> SideOutcome {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTarget {
    /// Drive until each sensor reads past `black - error`
    Black,
    /// Drive until each sensor reads under `white + error`
    White,
}

impl LineTarget {
    fn reached(self, tophat: &ReflectanceSensor, reading: u16) -> bool {
        match self {
            LineTarget::Black => tophat.sees_black(reading),
            LineTarget::White => tophat.sees_white(reading),
        }
    }

    /// Still over the opposite colour, so the crossing has not begun
    fn in_start_zone(self, tophat: &ReflectanceSensor, reading: u16) -> bool {
        match self {
            LineTarget::Black => tophat.sees_white(reading),
            LineTarget::White => tophat.sees_black(reading),
        }
    }
}

pub struct AlignmentController<S> {
    sequencer: MotionSequencer,
    sensors: S,
    touch: PerSide<TouchSensor>,
    tophats: PerSide<ReflectanceSensor>,
}

impl<S: SensorPort> AlignmentController<S> {
    pub fn new(
        sequencer: MotionSequencer,
        sensors: S,
        touch: PerSide<TouchSensor>,
        tophats: PerSide<ReflectanceSensor>,
    ) -> Self {
        Self {
            sequencer,
            sensors,
            touch,
            tophats,
        }
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    /// Keep driving until either bumper closes or either side times out,
    /// then run the full stop.
    pub async fn touch_stop(&mut self) -> Result<AlignReport, DriveError> {
        let mut report = AlignReport::new();
        if let Err(e) = self.touch_loop(&mut report).await {
            return Err(self.abort(e).await);
        }

        info!(
            "Touch alignment finished after {} ticks: left={:?}, right={:?}",
            report.ticks, report.left, report.right
        );
        self.sequencer.stop().await?;
        Ok(report)
    }

    async fn touch_loop(&mut self, report: &mut AlignReport) -> Result<(), DriveError> {
        let mut remaining = self.touch.map(|t| t.timeout_ms as i64);
        let mut halts = self.sequencer.drive().subscribe_halts();

        self.sequencer.reissue().await?;

        loop {
            let mut expired = false;
            for side in Side::BOTH {
                if *remaining.get(side) <= 0 {
                    *report.side_mut(side) = SideOutcome::TimedOut;
                    expired = true;
                }
            }
            if expired {
                return Ok(());
            }

            let mut contact = false;
            for side in Side::BOTH {
                if self.sensors.read_digital(self.touch.get(side).port)? {
                    *report.side_mut(side) = SideOutcome::Reached {
                        tick: report.ticks + 1,
                    };
                    contact = true;
                }
            }
            if contact {
                return Ok(());
            }

            if halts.has_changed().unwrap_or(true) {
                report.interrupted = true;
                return Ok(());
            }

            sleep(ALIGN_TICK).await;
            report.ticks += 1;
            remaining.left -= ALIGN_TICK.as_millis() as i64;
            remaining.right -= ALIGN_TICK.as_millis() as i64;
        }
    }

    /// Drive until both tophats reach black, powering each wheel off as
    /// its sensor crosses.
    pub async fn align_black(&mut self) -> Result<AlignReport, DriveError> {
        self.align_line(LineTarget::Black).await
    }

    /// Drive until both tophats reach white, powering each wheel off as
    /// its sensor crosses.
    pub async fn align_white(&mut self) -> Result<AlignReport, DriveError> {
        self.align_line(LineTarget::White).await
    }

    /// Shared reflectance loop. Wheels are only ever powered off here; a
    /// side that times out, or is left mid-crossing when both tophats have
    /// moved off their start colour, keeps running as commanded.
    pub async fn align_line(&mut self, target: LineTarget) -> Result<AlignReport, DriveError> {
        let mut report = AlignReport::new();
        if let Err(e) = self.line_loop(target, &mut report).await {
            return Err(self.abort(e).await);
        }

        info!(
            "{:?} alignment finished after {} ticks: left={:?}, right={:?}",
            target, report.ticks, report.left, report.right
        );
        Ok(report)
    }

    async fn line_loop(
        &mut self,
        target: LineTarget,
        report: &mut AlignReport,
    ) -> Result<(), DriveError> {
        let mut remaining = self.tophats.map(|t| t.timeout_ms as i64);
        let mut halts = self.sequencer.drive().subscribe_halts();

        self.sequencer.reissue().await?;

        loop {
            for side in Side::BOTH {
                if report.side(side).is_pending() && *remaining.get(side) <= 0 {
                    debug!("{:?} tophat timed out looking for {:?}", side, target);
                    *report.side_mut(side) = SideOutcome::TimedOut;
                }
            }
            if !report.left.is_pending() && !report.right.is_pending() {
                return Ok(());
            }

            // Both tophats are read every tick; only unresolved sides act on theirs
            let mut starting = false;
            for side in Side::BOTH {
                let tophat = *self.tophats.get(side);
                let reading = self.sensors.read_analog(tophat.port)?;
                starting |= target.in_start_zone(&tophat, reading);

                if report.side(side).is_pending() && target.reached(&tophat, reading) {
                    self.sequencer.power_off(side).await?;
                    let tick = report.ticks + 1;
                    debug!("{:?} tophat reached {:?} ({}) on tick {}", side, target, reading, tick);
                    *report.side_mut(side) = SideOutcome::Reached { tick };
                }
            }

            if !report.left.is_pending() && !report.right.is_pending() {
                return Ok(());
            }
            if !starting {
                debug!("Both tophats left their start colour, ending {:?} alignment", target);
                return Ok(());
            }

            if halts.has_changed().unwrap_or(true) {
                report.interrupted = true;
                return Ok(());
            }

            sleep(ALIGN_TICK).await;
            report.ticks += 1;
            for side in Side::BOTH {
                if report.side(side).is_pending() {
                    *remaining.get_mut(side) -= ALIGN_TICK.as_millis() as i64;
                }
            }
        }
    }

    /// Bring the wheels down after a failed loop and hand back the cause
    async fn abort(&self, cause: DriveError) -> DriveError {
        warn!("Alignment aborted: {}, stopping drivetrain", cause);
        if let Err(e) = self.sequencer.stop().await {
            warn!("Stop after alignment fault failed: {}", e);
        }
        cause
    }
}
