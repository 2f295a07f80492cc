// Differential-drive motion planning
// Converts straight / arc / spin intents into per-wheel velocity commands
// and the time the left wheel needs to cover its share of the path.

use std::f64::consts::PI;
use std::time::Duration;

use tracing::warn;

use super::wheel::{PerSide, Side, WheelModel};
use crate::config::MAX_VELOCITY;

const DEG_TO_RAD: f64 = PI / 180.0;

/// Everything the sequencer needs to run one open-loop motion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionPlan {
    pub left_velocity: i16,
    pub right_velocity: i16,
    /// Signed path length of each wheel's contact point (mm)
    pub left_distance_mm: f64,
    pub right_distance_mm: f64,
    pub wait: Duration,
}

impl MotionPlan {
    pub fn velocities(&self) -> PerSide<i16> {
        PerSide::new(self.left_velocity, self.right_velocity)
    }

    pub fn wait_ms(&self) -> u64 {
        self.wait.as_millis() as u64
    }

    fn idle() -> Self {
        Self {
            left_velocity: 0,
            right_velocity: 0,
            left_distance_mm: 0.0,
            right_distance_mm: 0.0,
            wait: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid velocity {velocity} on {side:?} wheel (limit ±{limit})")]
    VelocityOutOfRange { side: Side, velocity: f64, limit: f64 },
}

/// Time for a wheel with the given ticks/mm to cover `distance_mm` at
/// `velocity` (ticks per second).
///
/// Zero velocity, distance, or ticks/mm yields zero rather than an error or
/// an infinite wait.
pub fn wait_for(ticks_per_mm: f64, distance_mm: f64, velocity: i16) -> Duration {
    if velocity == 0 || distance_mm == 0.0 || ticks_per_mm == 0.0 {
        return Duration::ZERO;
    }
    let ms = (1000.0 * distance_mm * ticks_per_mm / f64::from(velocity)).abs();
    Duration::from_millis(ms as u64)
}

/// Move the drivetrain center `distance_mm` in a straight line
///
/// # Arguments
/// * `speed` - Nominal wheel speed (command units, 0..=1000 typical)
/// * `distance_mm` - Signed distance; the sign sets direction for both wheels
pub fn plan_straight(
    wheels: &PerSide<WheelModel>,
    speed: f64,
    distance_mm: f64,
) -> Result<MotionPlan, PlanError> {
    let left = speed * wheels.left.speed_proportion();
    let right = speed * wheels.right.speed_proportion();

    let left_velocity = checked(Side::Left, left.abs().copysign(distance_mm))?;
    let right_velocity = checked(Side::Right, right.abs().copysign(distance_mm))?;

    Ok(MotionPlan {
        left_velocity,
        right_velocity,
        left_distance_mm: distance_mm,
        right_distance_mm: distance_mm,
        wait: wait_for(wheels.left.ticks_per_mm(), distance_mm, left_velocity),
    })
}

/// Drive the drivetrain center along an arc of constant radius
///
/// Positive radius with positive angle puts the left wheel on the inside.
/// Each wheel's velocity is scaled by its path length over the center arc
/// so both finish together. A zero radius degenerates to `plan_spin`.
pub fn plan_arc(
    wheels: &PerSide<WheelModel>,
    speed: f64,
    radius_mm: f64,
    angle_deg: f64,
) -> Result<MotionPlan, PlanError> {
    if angle_deg == 0.0 {
        return Ok(MotionPlan::idle());
    }
    if radius_mm == 0.0 {
        return plan_spin(wheels, speed, angle_deg);
    }

    let theta = angle_deg * DEG_TO_RAD;
    let arc_length = radius_mm * theta;
    let left_distance = (radius_mm - wheels.left.radial_distance_mm()) * theta;
    let right_distance = (radius_mm + wheels.right.radial_distance_mm()) * theta;

    let left = speed * wheels.left.speed_proportion() * left_distance / arc_length;
    let right = speed * wheels.right.speed_proportion() * right_distance / arc_length;

    let left_velocity = checked(Side::Left, left.abs().copysign(left_distance))?;
    let right_velocity = checked(Side::Right, right.abs().copysign(right_distance))?;

    Ok(MotionPlan {
        left_velocity,
        right_velocity,
        left_distance_mm: left_distance,
        right_distance_mm: right_distance,
        wait: wait_for(wheels.left.ticks_per_mm(), left_distance, left_velocity),
    })
}

/// Rotate in place by `angle_deg` (positive = counter-clockwise)
///
/// Both wheels run at half the requested speed in opposite directions,
/// whatever their radial distances.
pub fn plan_spin(
    wheels: &PerSide<WheelModel>,
    speed: f64,
    angle_deg: f64,
) -> Result<MotionPlan, PlanError> {
    let theta = angle_deg * DEG_TO_RAD;
    let left_distance = -wheels.left.radial_distance_mm() * theta;
    let right_distance = wheels.right.radial_distance_mm() * theta;

    let left = speed * wheels.left.speed_proportion() * 0.5;
    let right = speed * wheels.right.speed_proportion() * 0.5;

    let left_velocity = checked(Side::Left, -left.abs().copysign(angle_deg))?;
    let right_velocity = checked(Side::Right, right.abs().copysign(angle_deg))?;

    Ok(MotionPlan {
        left_velocity,
        right_velocity,
        left_distance_mm: left_distance,
        right_distance_mm: right_distance,
        wait: wait_for(wheels.left.ticks_per_mm(), left_distance, left_velocity),
    })
}

/// Raw wheel velocities held to the same bound as planned motion
pub fn plan_direct(left: f64, right: f64) -> Result<PerSide<i16>, PlanError> {
    Ok(PerSide::new(checked(Side::Left, left)?, checked(Side::Right, right)?))
}

/// Single validation gate before anything reaches the hardware
fn checked(side: Side, velocity: f64) -> Result<i16, PlanError> {
    if !velocity.is_finite() || velocity.abs() > MAX_VELOCITY {
        warn!("Invalid wheel velocity {} on {:?} side, plan rejected", velocity, side);
        return Err(PlanError::VelocityOutOfRange {
            side,
            velocity,
            limit: MAX_VELOCITY,
        });
    }
    Ok(velocity.round() as i16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheels(left_proportion: f64, right_proportion: f64) -> PerSide<WheelModel> {
        PerSide::new(
            WheelModel::new(0, 1100, left_proportion, 80.0, 70.0).unwrap(),
            WheelModel::new(3, 1100, right_proportion, 80.0, 70.0).unwrap(),
        )
    }

    #[test]
    fn test_straight_forward_scenario() {
        let plan = plan_straight(&wheels(1.0, 1.0), 500.0, 300.0).unwrap();
        assert_eq!(plan.left_velocity, 500);
        assert_eq!(plan.right_velocity, 500);

        // 1000 * 300mm * (1100 / (80 * pi)) ticks/mm / 500 ticks/s
        let expected_ms = 1000.0 * 300.0 * (1100.0 / (80.0 * PI)) / 500.0;
        assert_eq!(plan.wait_ms(), expected_ms as u64);
        assert_eq!(plan.wait_ms(), 2626);
    }

    #[test]
    fn test_straight_reverse_copies_distance_sign() {
        let plan = plan_straight(&wheels(1.1, 0.9), 400.0, -250.0).unwrap();
        assert_eq!(plan.left_velocity, -440);
        assert_eq!(plan.right_velocity, -360);
        assert!(plan.wait > Duration::ZERO);
    }

    #[test]
    fn test_straight_scales_each_side_independently() {
        for &(speed, lp, rp) in &[(100.0, 1.0, 1.0), (800.0, 1.2, 0.8), (1000.0, 0.75, 1.25)] {
            let plan = plan_straight(&wheels(lp, rp), speed, 120.0).unwrap();
            assert_eq!(plan.left_velocity, (speed * lp).round() as i16);
            assert_eq!(plan.right_velocity, (speed * rp).round() as i16);
        }
    }

    #[test]
    fn test_straight_zero_distance_waits_zero() {
        let plan = plan_straight(&wheels(1.0, 1.0), 500.0, 0.0).unwrap();
        assert_eq!(plan.wait, Duration::ZERO);
    }

    #[test]
    fn test_velocity_boundary() {
        assert!(plan_straight(&wheels(1.0, 1.0), 1500.0, 10.0).is_ok());

        let err = plan_straight(&wheels(1.0, 1.0), 1500.0001, 10.0).unwrap_err();
        assert!(matches!(
            err,
            PlanError::VelocityOutOfRange { side: Side::Left, .. }
        ));
    }

    #[test]
    fn test_proportion_pushes_one_side_out_of_range() {
        let err = plan_straight(&wheels(1.0, 1.25), 1250.0, -10.0).unwrap_err();
        assert!(matches!(
            err,
            PlanError::VelocityOutOfRange { side: Side::Right, .. }
        ));
    }

    #[test]
    fn test_arc_track_width_separation() {
        let w = wheels(1.0, 1.0);
        for &(radius, angle) in &[(300.0, 90.0), (150.0, -45.0), (-400.0, 30.0), (1000.0, 180.0)] {
            let plan = plan_arc(&w, 200.0, radius, angle).unwrap();
            let separation = plan.right_distance_mm - plan.left_distance_mm;
            let expected = 2.0 * 70.0 * angle * DEG_TO_RAD;
            assert!(
                (separation - expected).abs() < 1e-9,
                "radius {} angle {}: separation {} != {}",
                radius,
                angle,
                separation,
                expected
            );
        }
    }

    #[test]
    fn test_arc_outer_wheel_faster() {
        let plan = plan_arc(&wheels(1.0, 1.0), 300.0, 210.0, 90.0).unwrap();
        // (210 - 70) / 210 and (210 + 70) / 210
        assert_eq!(plan.left_velocity, 200);
        assert_eq!(plan.right_velocity, 400);

        let expected = wait_for(1100.0 / (80.0 * PI), plan.left_distance_mm, 200);
        assert_eq!(plan.wait, expected);
    }

    #[test]
    fn test_arc_inner_wheel_reverses_inside_track() {
        // Radius smaller than the radial distance: inner wheel backs up
        let plan = plan_arc(&wheels(1.0, 1.0), 300.0, 35.0, 90.0).unwrap();
        assert!(plan.left_velocity < 0);
        assert!(plan.right_velocity > 0);
    }

    #[test]
    fn test_arc_rejects_tight_fast_turn() {
        // outer ratio (20 + 70) / 20 = 4.5, 4.5 * 400 > 1500
        let result = plan_arc(&wheels(1.0, 1.0), 400.0, 20.0, 90.0);
        assert!(matches!(
            result,
            Err(PlanError::VelocityOutOfRange { side: Side::Right, .. })
        ));
    }

    #[test]
    fn test_arc_degenerate_inputs() {
        let w = wheels(1.0, 1.0);
        let idle = plan_arc(&w, 500.0, 300.0, 0.0).unwrap();
        assert_eq!(idle.velocities(), PerSide::new(0, 0));
        assert_eq!(idle.wait, Duration::ZERO);

        assert_eq!(plan_arc(&w, 500.0, 0.0, 90.0), plan_spin(&w, 500.0, 90.0));
    }

    #[test]
    fn test_spin_half_speed_opposite_signs() {
        for &(speed, angle) in &[(400.0, 90.0), (1000.0, -180.0), (250.0, 45.0)] {
            let plan = plan_spin(&wheels(1.0, 1.0), speed, angle).unwrap();
            let half = (0.5 * speed).round() as i16;
            assert_eq!(plan.right_velocity.abs(), half);
            assert_eq!(plan.left_velocity, -plan.right_velocity);
            assert_eq!(plan.right_velocity > 0, angle > 0.0);
        }
    }

    #[test]
    fn test_spin_ignores_radial_distance() {
        let w = PerSide::new(
            WheelModel::new(0, 1100, 1.0, 80.0, 50.0).unwrap(),
            WheelModel::new(3, 1100, 1.0, 80.0, 120.0).unwrap(),
        );
        let plan = plan_spin(&w, 600.0, 90.0).unwrap();
        assert_eq!(plan.left_velocity, -300);
        assert_eq!(plan.right_velocity, 300);
        assert!((plan.left_distance_mm + 50.0 * PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_wait_for_degenerate() {
        assert_eq!(wait_for(4.3, 100.0, 0), Duration::ZERO);
        assert_eq!(wait_for(4.3, 0.0, 500), Duration::ZERO);
        assert_eq!(wait_for(0.0, 100.0, 500), Duration::ZERO);
        assert_eq!(wait_for(4.0, -100.0, 400), Duration::from_millis(1000));
    }

    #[test]
    fn test_direct_velocities_bounded() {
        let v = plan_direct(400.4, -1500.0).unwrap();
        assert_eq!((v.left, v.right), (400, -1500));

        let err = plan_direct(200.0, 40_000.0).unwrap_err();
        assert!(matches!(
            err,
            PlanError::VelocityOutOfRange {
                side: Side::Right,
                ..
            }
        ));
        assert!(plan_direct(f64::NAN, 0.0).is_err());
    }
}
