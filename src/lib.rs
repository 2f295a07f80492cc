pub mod config;
pub mod drive;
pub mod hal;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod sensors;
pub mod sim;
