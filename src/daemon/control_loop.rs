//! Sample -> decide -> actuate -> wait

use super::signal::RunSignal;
use crate::config::ControllerConfig;
use crate::cpu_temp::Thermometer;
use crate::fan::{band_coverage_pct, decide};
use crate::fan_control::PwmHardware;
use log::{debug, error, info, log, Level};
use tokio::time::{sleep, Duration};

/// Consecutive sensor failures before they are reported as errors
const SENSOR_FAILURE_ALERT: u32 = 10;

/// Log level for the latest sensor failure, given how many happened in a row
pub fn sensor_failure_level(streak: u32) -> Level {
    if streak >= SENSOR_FAILURE_ALERT {
        Level::Error
    } else {
        Level::Warn
    }
}

/// State carried from one iteration to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopState {
    /// Duty last written to the hardware, `None` until the first write
    pub last_applied_speed: Option<u32>,
    /// Sensor reads failed in a row
    pub sensor_failures: u32,
    pub iterations: u64,
}

/// Outcome of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A new duty was written
    Applied(u32),
    /// Target equals the duty already applied, nothing written
    Unchanged(u32),
    /// Temperature could not be read, iteration skipped
    SensorFailed,
    /// The duty write failed and will be retried next iteration
    WriteFailed(u32),
}

/// Drives the fan from temperature readings until a stop is requested
pub struct ControlLoop<'a, H, T> {
    config: &'a ControllerConfig,
    hardware: &'a mut H,
    thermometer: &'a mut T,
    state: LoopState,
}

impl<'a, H: PwmHardware, T: Thermometer> ControlLoop<'a, H, T> {
    pub fn new(config: &'a ControllerConfig, hardware: &'a mut H, thermometer: &'a mut T) -> Self {
        Self {
            config,
            hardware,
            thermometer,
            state: LoopState::default(),
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn into_state(self) -> LoopState {
        self.state
    }

    /// Run one iteration without waiting
    pub fn step(&mut self) -> Step {
        self.state.iterations += 1;

        let temp_c = match self.thermometer.sample_celsius() {
            Ok(t) => t,
            Err(e) => {
                self.state.sensor_failures += 1;
                log!(
                    sensor_failure_level(self.state.sensor_failures),
                    "Skipping iteration, {} consecutive sensor failures: {}",
                    self.state.sensor_failures,
                    e
                );
                return Step::SensorFailed;
            }
        };

        if self.state.sensor_failures > 0 {
            info!(
                "Temperature readable again after {} failed samples",
                self.state.sensor_failures
            );
            self.state.sensor_failures = 0;
        }

        let speed = decide(temp_c, self.config);
        debug!(
            "[PWM] Temp: {} | TempDiff: {:.1}% | RPM: {}",
            temp_c,
            band_coverage_pct(temp_c, self.config),
            speed
        );

        if self.state.last_applied_speed == Some(speed) {
            return Step::Unchanged(speed);
        }

        match self.hardware.write_pwm_duty(self.config.pwm_pin, speed) {
            Ok(()) => {
                info!("Fan duty set to {} at {}°C", speed, temp_c);
                self.state.last_applied_speed = Some(speed);
                Step::Applied(speed)
            }
            Err(e) => {
                error!("Failed to set fan duty to {}: {}", speed, e);
                Step::WriteFailed(speed)
            }
        }
    }

    /// Loop until `run_signal` is set. The flag is checked before each
    /// iteration only; a stop requested during the wait takes effect once the
    /// wait has finished.
    pub async fn run(&mut self, run_signal: &RunSignal) {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        info!("Control loop running, polling every {:?}", interval);

        while !run_signal.is_stop_requested() {
            self.step();
            sleep(interval).await;
        }

        info!(
            "Stop requested, control loop finished after {} iterations",
            self.state.iterations
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{FanControlError, Result};
    use crate::fan_control::PinMode;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct RecordingPwm {
        writes: Vec<u32>,
        failing_writes: u32,
    }

    impl PwmHardware for RecordingPwm {
        fn initialize(&mut self) -> Result<()> {
            Ok(())
        }
        fn pin_mode(&self, _pin: u8) -> Result<PinMode> {
            Ok(PinMode::Input)
        }
        fn set_pin_mode(&mut self, _pin: u8, _mode: PinMode) -> Result<()> {
            Ok(())
        }
        fn set_pwm_frequency(&mut self, _pin: u8, _hz: u32) -> Result<()> {
            Ok(())
        }
        fn set_pwm_range(&mut self, _pin: u8, _range: u32) -> Result<()> {
            Ok(())
        }
        fn write_pwm_duty(&mut self, _pin: u8, value: u32) -> Result<()> {
            if self.failing_writes > 0 {
                self.failing_writes -= 1;
                return Err(FanControlError::hardware("write_pwm_duty", "unplugged"));
            }
            self.writes.push(value);
            Ok(())
        }
        fn terminate(&mut self) {}
    }

    /// Replays readings and requests a stop once they run out
    struct Script {
        readings: VecDeque<Option<i32>>,
        stop: RunSignal,
    }

    impl Script {
        fn new(readings: &[Option<i32>]) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
                stop: RunSignal::new(),
            }
        }
    }

    impl Thermometer for Script {
        fn sample_celsius(&mut self) -> Result<i32> {
            let next = self.readings.pop_front().flatten();
            if self.readings.is_empty() {
                self.stop.request_stop();
            }
            next.ok_or_else(|| FanControlError::SensorRead {
                path: "script".to_string(),
                reason: "no reading".to_string(),
            })
        }
    }

    #[test]
    fn test_first_sample_always_writes() {
        // Even when the target equals rpm_off
        let config = ControllerConfig::default();
        let mut pwm = RecordingPwm::default();
        let mut thermo = Script::new(&[Some(30)]);
        let mut control = ControlLoop::new(&config, &mut pwm, &mut thermo);

        assert_eq!(control.step(), Step::Applied(0));
        assert_eq!(control.state().last_applied_speed, Some(0));
        assert_eq!(pwm.writes, vec![0]);
    }

    #[test]
    fn test_equal_targets_write_once() {
        let config = ControllerConfig::default();
        let mut pwm = RecordingPwm::default();
        let mut thermo = Script::new(&[Some(47), Some(47), Some(60)]);
        let mut control = ControlLoop::new(&config, &mut pwm, &mut thermo);

        assert_eq!(control.step(), Step::Applied(2333));
        assert_eq!(control.step(), Step::Unchanged(2333));
        assert_eq!(control.step(), Step::Applied(5000));
        assert_eq!(pwm.writes, vec![2333, 5000]);
    }

    #[test]
    fn test_sensor_failure_skips_iteration() {
        let config = ControllerConfig::default();
        let mut pwm = RecordingPwm::default();
        let mut thermo = Script::new(&[Some(50), None, None, Some(50)]);
        let mut control = ControlLoop::new(&config, &mut pwm, &mut thermo);

        assert!(matches!(control.step(), Step::Applied(_)));
        assert_eq!(control.step(), Step::SensorFailed);
        assert_eq!(control.step(), Step::SensorFailed);
        assert_eq!(control.state().sensor_failures, 2);
        assert!(matches!(control.step(), Step::Unchanged(_)));
        assert_eq!(control.state().sensor_failures, 0);
        assert_eq!(pwm.writes.len(), 1);
    }

    #[test]
    fn test_sensor_failure_streak_escalates_to_error() {
        assert_eq!(sensor_failure_level(1), Level::Warn);
        assert_eq!(sensor_failure_level(9), Level::Warn);
        assert_eq!(sensor_failure_level(10), Level::Error);
        assert_eq!(sensor_failure_level(250), Level::Error);

        let config = ControllerConfig::default();
        let mut pwm = RecordingPwm::default();
        let mut readings = vec![None; 10];
        readings.push(Some(50));
        let mut thermo = Script::new(&readings);
        let mut control = ControlLoop::new(&config, &mut pwm, &mut thermo);

        for _ in 0..10 {
            assert_eq!(control.step(), Step::SensorFailed);
        }
        assert_eq!(control.state().sensor_failures, 10);
        assert_eq!(
            sensor_failure_level(control.state().sensor_failures),
            Level::Error
        );

        // A good sample ends the streak
        assert_eq!(control.step(), Step::Applied(3333));
        assert_eq!(control.state().sensor_failures, 0);
    }

    #[test]
    fn test_failed_write_is_retried() {
        let config = ControllerConfig::default();
        let mut pwm = RecordingPwm {
            failing_writes: 1,
            ..Default::default()
        };
        let mut thermo = Script::new(&[Some(50), Some(50)]);
        let mut control = ControlLoop::new(&config, &mut pwm, &mut thermo);

        assert_eq!(control.step(), Step::WriteFailed(3333));
        assert_eq!(control.state().last_applied_speed, None);
        assert_eq!(control.step(), Step::Applied(3333));
        assert_eq!(pwm.writes, vec![3333]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_signal() {
        let config = ControllerConfig::default();
        let mut pwm = RecordingPwm::default();
        let mut thermo = Script::new(&[Some(35), Some(45), Some(45), Some(58)]);
        let stop = thermo.stop.clone();

        let mut control = ControlLoop::new(&config, &mut pwm, &mut thermo);
        control.run(&stop).await;

        assert_eq!(control.state().iterations, 4);
        assert_eq!(pwm.writes, vec![0, 1666, 5000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_stop_already_requested_does_nothing() {
        let config = ControllerConfig::default();
        let mut pwm = RecordingPwm::default();
        let mut thermo = Script::new(&[Some(50)]);
        let stop = RunSignal::new();
        stop.request_stop();

        let mut control = ControlLoop::new(&config, &mut pwm, &mut thermo);
        control.run(&stop).await;

        assert_eq!(control.into_state().iterations, 0);
        assert!(pwm.writes.is_empty());
    }
}
