// Open-loop motion execution
// Issues planned wheel velocities in one batch, waits out the plan, then
// brakes and powers the wheels down.

use tokio::time::sleep;
use tracing::{debug, info};

use super::planner::{self, MotionPlan, PlanError};
use super::wheel::{PerSide, Side};
use super::{Drive, DriveError};
use crate::config::SETTLE_DELAY;

/// How an `execute` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The full planned wait elapsed
    Completed,
    /// Another flow stopped the drivetrain during the wait
    Interrupted,
}

#[derive(Clone)]
pub struct MotionSequencer {
    drive: Drive,
}

impl MotionSequencer {
    pub fn new(drive: Drive) -> Self {
        Self { drive }
    }

    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    pub async fn straight(&self, speed: f64, distance_mm: f64) -> Result<ExecuteOutcome, DriveError> {
        let wheels = self.drive.wheels().await;
        self.execute(planner::plan_straight(&wheels, speed, distance_mm)).await
    }

    pub async fn arc(
        &self,
        speed: f64,
        radius_mm: f64,
        angle_deg: f64,
    ) -> Result<ExecuteOutcome, DriveError> {
        let wheels = self.drive.wheels().await;
        self.execute(planner::plan_arc(&wheels, speed, radius_mm, angle_deg)).await
    }

    pub async fn spin(&self, speed: f64, angle_deg: f64) -> Result<ExecuteOutcome, DriveError> {
        let wheels = self.drive.wheels().await;
        self.execute(planner::plan_spin(&wheels, speed, angle_deg)).await
    }

    /// Run a plan: actuate, wait for `plan.wait`, then `stop`
    ///
    /// A rejected plan is returned as-is without touching the hardware.
    /// The wait ends early if a stop completes elsewhere (the inertial
    /// guard); the closing stop is still issued.
    pub async fn execute(
        &self,
        plan: Result<MotionPlan, PlanError>,
    ) -> Result<ExecuteOutcome, DriveError> {
        let plan = plan?;
        let mut halts = self.drive.subscribe_halts();

        info!(
            "Executing plan: left={}, right={}, wait={}ms",
            plan.left_velocity,
            plan.right_velocity,
            plan.wait_ms()
        );
        self.direct(plan.left_velocity, plan.right_velocity).await?;

        let outcome = tokio::select! {
            _ = sleep(plan.wait) => ExecuteOutcome::Completed,
            _ = halts.changed() => ExecuteOutcome::Interrupted,
        };
        if outcome == ExecuteOutcome::Interrupted {
            info!("Motion interrupted by an external stop");
        }

        self.stop().await?;
        Ok(outcome)
    }

    /// Send raw wheel velocities in one batch
    ///
    /// A zero side is frozen rather than commanded to zero. Both velocities
    /// are recorded as the last commanded values once the batch lands.
    pub async fn direct(&self, left: i16, right: i16) -> Result<(), DriveError> {
        let mut state = self.drive.lock().await;
        let ports = state.wheels().as_ref().map(|w| w.port());
        let velocities = PerSide::new(left, right);

        let mut batch = state.batch();
        for side in Side::BOTH {
            let port = *ports.get(side);
            match *velocities.get(side) {
                0 => batch.freeze(port)?,
                velocity => batch.set_velocity(port, velocity)?,
            }
        }
        batch.commit()?;

        let wheels = state.wheels_mut();
        wheels.left.record_velocity(left);
        wheels.right.record_velocity(right);
        debug!("Direct drive: left={}, right={}", left, right);
        Ok(())
    }

    /// Re-send the last commanded velocities
    pub async fn reissue(&self) -> Result<(), DriveError> {
        let last = self
            .drive
            .wheels()
            .await
            .map(|w| w.last_commanded_velocity());
        self.direct(last.left, last.right).await
    }

    /// Cut power to one wheel on its own
    pub async fn power_off(&self, side: Side) -> Result<(), DriveError> {
        let mut state = self.drive.lock().await;
        let port = state.wheels().get(side).port();
        let mut batch = state.batch();
        batch.power_off(port)?;
        batch.commit()?;
        Ok(())
    }

    /// Two-phase halt: brake both wheels, let them settle, then cut power
    ///
    /// Each phase is a single batch. Safe to call repeatedly and from any
    /// flow holding a clone of the drive.
    pub async fn stop(&self) -> Result<(), DriveError> {
        {
            let mut state = self.drive.lock().await;
            let ports = state.wheels().as_ref().map(|w| w.port());
            let mut batch = state.batch();
            batch.freeze(ports.left)?;
            batch.freeze(ports.right)?;
            batch.commit()?;
        }
        debug!("Brakes set, settling for {}ms", SETTLE_DELAY.as_millis());

        sleep(SETTLE_DELAY).await;

        {
            let mut state = self.drive.lock().await;
            let ports = state.wheels().as_ref().map(|w| w.port());
            let mut batch = state.batch();
            batch.power_off(ports.left)?;
            batch.power_off(ports.right)?;
            batch.commit()?;
        }
        debug!("Wheels powered off");

        self.drive.notify_halt();
        Ok(())
    }

    /// Wait needed to cover `distance_mm` at the left wheel's last commanded velocity
    pub async fn calc_wait(&self, distance_mm: f64) -> std::time::Duration {
        let wheels = self.drive.wheels().await;
        planner::wait_for(
            wheels.left.ticks_per_mm(),
            distance_mm,
            wheels.left.last_commanded_velocity(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::drive::WheelModel;
    use crate::sim::{ActuatorCommand, SimActuator, WheelState};

    fn sequencer() -> (MotionSequencer, SimActuator) {
        let sim = SimActuator::new();
        let wheels = PerSide::new(
            WheelModel::new(0, 1100, 1.0, 80.0, 70.0).unwrap(),
            WheelModel::new(3, 1100, 1.0, 80.0, 70.0).unwrap(),
        );
        (MotionSequencer::new(Drive::new(wheels, sim.clone())), sim)
    }

    fn halt_batches() -> Vec<Vec<ActuatorCommand>> {
        vec![
            vec![
                ActuatorCommand::Freeze { port: 0 },
                ActuatorCommand::Freeze { port: 3 },
            ],
            vec![
                ActuatorCommand::PowerOff { port: 0 },
                ActuatorCommand::PowerOff { port: 3 },
            ],
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_straight_runs_for_planned_wait() {
        let (seq, sim) = sequencer();
        let start = Instant::now();

        let outcome = seq.straight(500.0, 300.0).await.unwrap();

        assert_eq!(outcome, ExecuteOutcome::Completed);
        assert_eq!(start.elapsed(), Duration::from_millis(2626) + SETTLE_DELAY);

        let mut expected = vec![vec![
            ActuatorCommand::Velocity { port: 0, velocity: 500 },
            ActuatorCommand::Velocity { port: 3, velocity: 500 },
        ]];
        expected.extend(halt_batches());
        assert_eq!(sim.flushes(), expected);
        assert_eq!(sim.wheel(0), WheelState::Off);
        assert_eq!(sim.wheel(3), WheelState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_plan_touches_nothing() {
        let (seq, sim) = sequencer();
        seq.direct(200, 200).await.unwrap();
        sim.clear_history();

        let result = seq.straight(1600.0, 100.0).await;

        assert!(matches!(
            result,
            Err(DriveError::Plan(PlanError::VelocityOutOfRange { .. }))
        ));
        assert!(sim.flushes().is_empty());
        assert_eq!(sim.wheel(0), WheelState::Driving(200));
        assert_eq!(sim.wheel(3), WheelState::Driving(200));
        assert_eq!(seq.drive().wheels().await.left.last_commanded_velocity(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_side_is_frozen() {
        let (seq, sim) = sequencer();
        seq.direct(0, -250).await.unwrap();

        assert_eq!(
            sim.flushes(),
            vec![vec![
                ActuatorCommand::Freeze { port: 0 },
                ActuatorCommand::Velocity { port: 3, velocity: -250 },
            ]]
        );
        let wheels = seq.drive().wheels().await;
        assert_eq!(wheels.left.last_commanded_velocity(), 0);
        assert_eq!(wheels.right.last_commanded_velocity(), -250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (seq, sim) = sequencer();
        seq.direct(300, 300).await.unwrap();
        sim.clear_history();

        seq.stop().await.unwrap();
        let once = (sim.wheel(0), sim.wheel(3));
        seq.stop().await.unwrap();

        assert_eq!(once, (WheelState::Off, WheelState::Off));
        assert_eq!((sim.wheel(0), sim.wheel(3)), once);

        let mut expected = halt_batches();
        expected.extend(halt_batches());
        assert_eq!(sim.flushes(), expected);
        assert_eq!(seq.drive().halt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_settles_under_brake() {
        let (seq, sim) = sequencer();
        seq.direct(300, 300).await.unwrap();

        let stopper = seq.clone();
        let task = tokio::spawn(async move { stopper.stop().await });

        tokio::time::sleep(SETTLE_DELAY / 2).await;
        assert_eq!(sim.wheel(0), WheelState::Frozen);
        assert_eq!(sim.wheel(3), WheelState::Frozen);

        task.await.unwrap().unwrap();
        assert_eq!(sim.wheel(0), WheelState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_stop_interrupts_wait() {
        let (seq, sim) = sequencer();
        let start = Instant::now();

        let stopper = seq.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            stopper.stop().await
        });

        let outcome = seq.straight(500.0, 300.0).await.unwrap();

        assert_eq!(outcome, ExecuteOutcome::Interrupted);
        // 500ms drive + external settle + own settle
        assert_eq!(start.elapsed(), Duration::from_millis(500) + SETTLE_DELAY * 2);
        assert_eq!(sim.wheel(0), WheelState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calc_wait_uses_last_left_velocity() {
        let (seq, _sim) = sequencer();
        assert_eq!(seq.calc_wait(300.0).await, Duration::ZERO);

        seq.direct(500, 100).await.unwrap();
        assert_eq!(seq.calc_wait(300.0).await, Duration::from_millis(2626));
        assert_eq!(seq.calc_wait(-300.0).await, Duration::from_millis(2626));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reissue_repeats_last_command() {
        let (seq, sim) = sequencer();
        seq.direct(120, -80).await.unwrap();
        seq.stop().await.unwrap();
        sim.clear_history();

        seq.reissue().await.unwrap();

        assert_eq!(sim.wheel(0), WheelState::Driving(120));
        assert_eq!(sim.wheel(3), WheelState::Driving(-80));
    }
}
