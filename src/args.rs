//! Command line argument parsing for the fan controller

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// PWM fan controller
///
/// Reads the CPU temperature and drives a hardware PWM fan with a linear speed ramp.
#[derive(Parser, Debug)]
#[command(name = "pwm-fan-control")]
#[command(about = "Thermal-to-PWM fan speed controller")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file (defaults to /opt/gpio/fan/params.conf)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the controller until interrupted (default)
    Run,
    /// Print the resolved configuration as JSON
    ShowConfig,
    /// Sample the temperature once and print the speed the policy would pick
    Probe,
}

impl Args {
    /// The command to execute, `Run` when none was given
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
