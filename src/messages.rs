// Message types exchanged with the runtime over zenoh

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::drive::{AlignReport, GuardOutcome};

// Command from scripts/planner -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotionCommand {
    Straight {
        speed: f64,
        distance_mm: f64,
    },
    Arc {
        speed: f64,
        radius_mm: f64,
        angle_deg: f64,
    },
    Spin {
        speed: f64,
        angle_deg: f64,
    },
    /// Raw wheel velocities, left running until the next command
    Direct {
        left: i16,
        right: i16,
    },
    AlignTouch,
    AlignBlack,
    AlignWhite,
    Stop,
    GuardStart {
        #[serde(default)]
        tolerance: Option<f32>,
        #[serde(default)]
        budget_ms: Option<u64>,
    },
    GuardCancel,
}

/// Result of one command, published by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MotionStatus {
    Done,
    Interrupted,
    Aligned { report: AlignReport },
    GuardArmed,
    GuardFinished { outcome: GuardOutcome },
    Rejected { reason: String },
    Fault { reason: String },
}

impl MotionStatus {
    /// Whether this status can be the reply to `cmd`
    ///
    /// A guard that trips or expires on its own publishes `GuardFinished`
    /// unprompted, so that status only answers a `GuardCancel`.
    pub fn answers(&self, cmd: &MotionCommand) -> bool {
        match self {
            MotionStatus::GuardFinished { .. } => matches!(cmd, MotionCommand::GuardCancel),
            _ => true,
        }
    }
}

// Sensor snapshot from the hardware side -> runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    #[serde(default)]
    pub analog: BTreeMap<u8, u16>,
    #[serde(default)]
    pub digital: BTreeMap<u8, bool>,
    #[serde(default)]
    pub accel: Option<[f32; 3]>,
}
