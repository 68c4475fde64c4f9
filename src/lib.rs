pub mod config;
pub mod diagnostic;
pub mod messages;
pub mod odrive;
