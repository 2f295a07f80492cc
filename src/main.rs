use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cbc_drive_runtime::config::{DriveConfig, MOTOR_PORT};
use cbc_drive_runtime::hal::ActuatorPort;
use cbc_drive_runtime::motor::FeetechActuator;
use cbc_drive_runtime::runtime;
use cbc_drive_runtime::sim::SimActuator;

#[derive(Parser, Debug)]
#[command(about = "Differential drive runtime over Zenoh")]
struct Args {
    /// JSON drive config; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the wheel servo bus
    #[arg(short, long, default_value = MOTOR_PORT)]
    port: String,

    /// Drive a simulated actuator instead of real motors
    #[arg(long)]
    sim: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    if let Err(e) = start(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match &args.config {
        Some(path) => DriveConfig::load(path)?,
        None => {
            info!("No config given, using default drive geometry");
            DriveConfig::nominal()?
        }
    };

    let wheels = config.wheels();
    let actuator: Box<dyn ActuatorPort> = if args.sim {
        let ports = [wheels.left.port(), wheels.right.port()];
        info!("Using simulated actuator on ports {:?}", ports);
        Box::new(SimActuator::with_ports(&ports))
    } else {
        let mut motors = FeetechActuator::open(&args.port, &[wheels.left.port(), wheels.right.port()])?;
        motors.initialize()?;
        Box::new(motors)
    };

    runtime::run(config, actuator).await
}
