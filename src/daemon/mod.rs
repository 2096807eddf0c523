//! Daemon lifecycle: hardware startup, the control loop and shutdown

pub mod control_loop;
pub mod signal;

pub use control_loop::{ControlLoop, LoopState, Step};
pub use signal::{listen_for_interrupt, RunSignal};

use crate::{
    config::ControllerConfig,
    cpu_temp::Thermometer,
    errors::{FanControlError, Result},
    fan_control::{PinMode, PwmHardware},
};
use log::{debug, error, info, warn};

/// What startup changed on the hardware and shutdown must put back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareState {
    /// Mode of the PWM pin before we took it over, `None` if it could not be read
    pub original_pin_mode: Option<PinMode>,
}

/// Owns the configuration, the PWM hardware and the temperature source for one run
pub struct FanDaemon<H, T> {
    config: ControllerConfig,
    hardware: H,
    thermometer: T,
}

impl<H: PwmHardware, T: Thermometer> FanDaemon<H, T> {
    /// Create a new daemon instance
    pub fn new(config: ControllerConfig, hardware: H, thermometer: T) -> Self {
        Self {
            config,
            hardware,
            thermometer,
        }
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Initialize the hardware and hand the PWM pin over to the controller,
    /// starting with the fan off. Every failure here is a `HardwareInit` error.
    pub fn startup(&mut self) -> Result<HardwareState> {
        if let Err(e) = self.hardware.initialize() {
            error!("PWM hardware initialization failed: {}", e);
            return Err(match e {
                FanControlError::HardwareInit(_) => e,
                other => FanControlError::HardwareInit(other.to_string()),
            });
        }

        let pin = self.config.pwm_pin;
        let state = HardwareState {
            original_pin_mode: match self.hardware.pin_mode(pin) {
                Ok(mode) => Some(mode),
                Err(e) => {
                    warn!("Cannot read mode of GPIO {}, it will not be restored: {}", pin, e);
                    None
                }
            },
        };

        if let Err(e) = self.setup_pwm() {
            error!("PWM setup on GPIO {} failed: {}", pin, e);
            self.shutdown(state);
            return Err(FanControlError::HardwareInit(e.to_string()));
        }

        debug!(
            "[PWM] GPIO:Mode | {}:{:?}",
            pin,
            state.original_pin_mode.map(PinMode::raw)
        );
        info!("Initialized and running ...");
        Ok(state)
    }

    fn setup_pwm(&mut self) -> Result<()> {
        let pin = self.config.pwm_pin;
        self.hardware.set_pin_mode(pin, PinMode::Output)?;
        self.hardware.set_pwm_frequency(pin, self.config.frequency_hz)?;
        self.hardware.set_pwm_range(pin, self.config.rpm_max)?;
        self.hardware.write_pwm_duty(pin, self.config.rpm_off)
    }

    /// Run the control loop until `run_signal` is set
    pub async fn run(&mut self, run_signal: &RunSignal) -> LoopState {
        let mut control = ControlLoop::new(&self.config, &mut self.hardware, &mut self.thermometer);
        control.run(run_signal).await;
        control.into_state()
    }

    /// Turn the fan off, give the pin back and release the hardware.
    /// Best effort: failures are logged and the remaining steps still run.
    pub fn shutdown(&mut self, state: HardwareState) {
        let pin = self.config.pwm_pin;

        if let Err(e) = self.hardware.write_pwm_duty(pin, self.config.rpm_off) {
            error!("Failed to stop the fan: {}", e);
        }

        match state.original_pin_mode {
            Some(mode) => {
                if let Err(e) = self.hardware.set_pin_mode(pin, mode) {
                    error!("Failed to restore GPIO {} to {:?}: {}", pin, mode, e);
                }
            }
            None => warn!("Original mode of GPIO {} unknown, leaving it as is", pin),
        }

        self.hardware.terminate();
        info!("Cleaned up - Exiting ...");
    }

    /// Full lifecycle: startup, loop until stopped, shutdown
    pub async fn run_until_stopped(&mut self, run_signal: &RunSignal) -> Result<LoopState> {
        let state = self.startup()?;
        let loop_state = self.run(run_signal).await;
        self.shutdown(state);
        Ok(loop_state)
    }
}
