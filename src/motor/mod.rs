// Motor bus for the wheel servos
//
// Provides:
// - Feetech STS serial protocol (ping, register reads/writes, sync write)
// - FeetechActuator, the ActuatorPort used on the real robot

mod driver;
pub mod feetech;

pub use driver::FeetechActuator;
pub use feetech::{FeetechBus, FeetechError};
