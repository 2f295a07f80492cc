// Scripted drive: publish a fixed motion sequence and wait for each status
//
// Usage: cargo run --example drive_script -- [--speed 400]
// Start the runtime first (e.g. `cargo run -- --sim`).

use std::time::Duration;

use cbc_drive_runtime::config::{TOPIC_CMD_DRIVE, TOPIC_STATUS};
use cbc_drive_runtime::drive::plan_direct;
use cbc_drive_runtime::messages::{MotionCommand, MotionStatus};
use clap::Parser;
use tracing::{info, warn};

// Longest any single step in the script should take
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
struct Args {
    /// Base wheel speed in ticks per second
    #[arg(long, default_value_t = 400.0)]
    speed: f64,

    /// Side length of the square, in mm
    #[arg(long, default_value_t = 300.0)]
    side_mm: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();
    // Refuse speeds the runtime would reject before anything moves
    let cruise = plan_direct(args.speed, args.speed)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_DRIVE).await?;
    let statuses = session.declare_subscriber(TOPIC_STATUS).await?;

    let mut script = vec![MotionCommand::GuardStart {
        tolerance: None,
        budget_ms: Some(60_000),
    }];
    for _ in 0..4 {
        script.push(MotionCommand::Straight {
            speed: args.speed,
            distance_mm: args.side_mm,
        });
        script.push(MotionCommand::Spin {
            speed: args.speed,
            angle_deg: 90.0,
        });
    }
    script.push(MotionCommand::Arc {
        speed: args.speed,
        radius_mm: args.side_mm / 2.0,
        angle_deg: 180.0,
    });
    script.push(MotionCommand::Direct {
        left: cruise.left,
        right: cruise.right,
    });
    script.push(MotionCommand::AlignBlack);
    script.push(MotionCommand::GuardCancel);

    for cmd in script {
        info!("Sending {:?}", cmd);
        publisher.put(serde_json::to_string(&cmd)?).await?;

        let status = tokio::time::timeout(STEP_TIMEOUT, reply_to(&statuses, &cmd)).await??;
        match status {
            MotionStatus::Rejected { .. } | MotionStatus::Fault { .. } => {
                warn!("Aborting script: {:?}", status);
                publisher
                    .put(serde_json::to_string(&MotionCommand::Stop)?)
                    .await?;
                break;
            }
            _ => info!("  -> {:?}", status),
        }
    }

    Ok(())
}

// Next status that belongs to `cmd`; a guard finishing on its own is only logged
async fn reply_to(
    statuses: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
    cmd: &MotionCommand,
) -> Result<MotionStatus, Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let sample = statuses.recv_async().await?;
        let payload = sample.payload().to_bytes();
        let status: MotionStatus = serde_json::from_slice(&payload)?;
        if status.answers(cmd) {
            return Ok(status);
        }
        info!("  (guard) {:?}", status);
    }
}
