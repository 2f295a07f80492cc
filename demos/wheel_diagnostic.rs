// Wheel diagnostic: READ-ONLY check of the two drive servos
//
// Nothing is written to the motors, so the robot will not move.
//
// Usage: cargo run --example wheel_diagnostic -- [--port /dev/ttyUSB0] [--ids 0 3]

use cbc_drive_runtime::config::MOTOR_PORT;
use cbc_drive_runtime::motor::feetech::{FeetechBus, Register};
use clap::Parser;
use std::io::{self, Write};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = MOTOR_PORT)]
    port: String,

    /// Servo IDs, left wheel first
    #[arg(long, num_args = 2, default_values_t = [0u8, 3u8])]
    ids: Vec<u8>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();
    let args = Args::parse();

    println!("Wheel diagnostic (read-only)");
    println!("Serial port: {}", args.port);
    println!("Wheel IDs: {:?}", args.ids);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match FeetechBus::open(&args.port) {
        Ok(bus) => {
            println!("  ok");
            bus
        }
        Err(e) => {
            println!("  failed: {}", e);
            println!("  - check the port path and that the USB cable is connected");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging wheels...");
    let names = ["Left", "Right"];
    let mut found = Vec::new();
    for (name, &id) in names.iter().zip(&args.ids) {
        print!("  {} (ID {}): ", name, id);
        io::stdout().flush()?;
        match bus.ping(id) {
            Ok(true) => {
                println!("responding");
                found.push((*name, id));
            }
            Ok(false) => println!("no response"),
            Err(e) => println!("error: {}", e),
        }
    }
    println!();

    println!("Step 3: Reading registers...");
    for (name, id) in found {
        println!("  === {} (ID {}) ===", name, id);
        match bus.read_u8(id, Register::OperatingMode) {
            Ok(mode) => {
                let label = match mode {
                    0 => "Position",
                    1 => "Velocity",
                    _ => "Other",
                };
                println!("    Operating mode: {} ({})", mode, label);
            }
            Err(e) => println!("    Operating mode: ERROR - {}", e),
        }
        match bus.read_u8(id, Register::TorqueEnable) {
            Ok(on) => println!("    Torque: {}", if on == 1 { "ON" } else { "OFF" }),
            Err(e) => println!("    Torque: ERROR - {}", e),
        }
        match bus.get_velocity(id) {
            Ok(v) => println!("    Present velocity: {}", v),
            Err(e) => println!("    Present velocity: ERROR - {}", e),
        }
    }

    Ok(())
}
