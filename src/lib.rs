//! PWM Fan Controller
//!
//! Reads the CPU temperature of a single-board computer, maps it to a fan duty
//! with a linear ramp and drives a hardware PWM output until interrupted.

pub mod args;
pub mod config;
pub mod cpu_temp;
pub mod daemon;
pub mod errors;
pub mod fan;
pub mod fan_control;
pub mod logging;

// Re-export commonly used types
pub use config::{ConfigResolver, ControllerConfig};
pub use cpu_temp::{ThermalZone, Thermometer};
pub use daemon::{FanDaemon, HardwareState, LoopState, RunSignal};
pub use errors::{FanControlError, Result};
pub use fan_control::{PinMode, PwmHardware, SysfsPwm};
