use crate::errors::{FanControlError, Result};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;

/// GPIO function mode, numbered the way pigpio reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

impl PinMode {
    /// Decode a raw mode number (INPUT=0, OUTPUT=1, ALT0=4, ALT1=5, ALT2=6, ALT3=7, ALT4=3, ALT5=2)
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PinMode::Input),
            1 => Some(PinMode::Output),
            2 => Some(PinMode::Alt5),
            3 => Some(PinMode::Alt4),
            4 => Some(PinMode::Alt0),
            5 => Some(PinMode::Alt1),
            6 => Some(PinMode::Alt2),
            7 => Some(PinMode::Alt3),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            PinMode::Input => 0,
            PinMode::Output => 1,
            PinMode::Alt5 => 2,
            PinMode::Alt4 => 3,
            PinMode::Alt0 => 4,
            PinMode::Alt1 => 5,
            PinMode::Alt2 => 6,
            PinMode::Alt3 => 7,
        }
    }
}

/// Hardware access needed to drive one PWM fan
pub trait PwmHardware {
    /// Bring up the access layer. Must not install signal handlers.
    fn initialize(&mut self) -> Result<()>;
    fn pin_mode(&self, pin: u8) -> Result<PinMode>;
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()>;
    fn set_pwm_frequency(&mut self, pin: u8, hz: u32) -> Result<()>;
    /// Set the value that corresponds to a 100% duty cycle
    fn set_pwm_range(&mut self, pin: u8, range: u32) -> Result<()>;
    fn write_pwm_duty(&mut self, pin: u8, value: u32) -> Result<()>;
    fn terminate(&mut self);
}

/// Default sysfs location of the first PWM controller
pub const DEFAULT_PWM_CHIP: &str = "/sys/class/pwm/pwmchip0";

/// Hardware PWM channel wired to a GPIO on the Raspberry Pi header
pub fn pwm_channel_for_pin(pin: u8) -> Option<u8> {
    match pin {
        12 | 18 => Some(0),
        13 | 19 => Some(1),
        _ => None,
    }
}

/// PWM driver for the Linux pwm sysfs class (`/sys/class/pwm/pwmchipN`)
///
/// A channel that is exported and enabled reports [`PinMode::Output`], anything
/// else reports [`PinMode::Input`]. Switching to `Output` exports and enables the
/// channel; switching away disables it and releases it again if we exported it.
#[derive(Debug)]
pub struct SysfsPwm {
    chip_path: PathBuf,
    period_ns: u64,
    range: u32,
    exported_by_us: bool,
    initialized: bool,
}

impl SysfsPwm {
    /// Create a driver for the given pwmchip directory
    pub fn new(chip_path: impl Into<PathBuf>) -> Self {
        Self {
            chip_path: chip_path.into(),
            period_ns: 0,
            range: 0,
            exported_by_us: false,
            initialized: false,
        }
    }

    fn channel(&self, pin: u8) -> Result<u8> {
        pwm_channel_for_pin(pin).ok_or_else(|| {
            FanControlError::hardware("channel", format!("GPIO {} has no hardware PWM", pin))
        })
    }

    fn channel_path(&self, channel: u8) -> PathBuf {
        self.chip_path.join(format!("pwm{}", channel))
    }

    fn ensure_initialized(&self, op: &'static str) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(FanControlError::hardware(op, "PWM driver not initialized"))
        }
    }

    fn write_attr(&self, op: &'static str, channel: u8, attr: &str, value: impl ToString) -> Result<()> {
        let path = self.channel_path(channel).join(attr);
        fs::write(&path, value.to_string())
            .map_err(|e| FanControlError::hardware(op, format!("{}: {}", path.display(), e)))
    }

    fn read_attr(&self, channel: u8, attr: &str) -> Option<String> {
        fs::read_to_string(self.channel_path(channel).join(attr))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn export(&mut self, channel: u8) -> Result<()> {
        if self.channel_path(channel).is_dir() {
            return Ok(());
        }
        fs::write(self.chip_path.join("export"), channel.to_string())
            .map_err(|e| FanControlError::hardware("export", e))?;
        self.exported_by_us = true;
        debug!("Exported PWM channel {}", channel);
        Ok(())
    }

    fn unexport(&mut self, channel: u8) -> Result<()> {
        fs::write(self.chip_path.join("unexport"), channel.to_string())
            .map_err(|e| FanControlError::hardware("unexport", e))?;
        self.exported_by_us = false;
        debug!("Unexported PWM channel {}", channel);
        Ok(())
    }
}

impl Default for SysfsPwm {
    fn default() -> Self {
        Self::new(DEFAULT_PWM_CHIP)
    }
}

impl PwmHardware for SysfsPwm {
    fn initialize(&mut self) -> Result<()> {
        if !self.chip_path.join("export").exists() {
            return Err(FanControlError::HardwareInit(format!(
                "PWM controller not found at {} (is the pwm overlay enabled?)",
                self.chip_path.display()
            )));
        }
        self.initialized = true;
        info!("PWM driver ready on {}", self.chip_path.display());
        Ok(())
    }

    fn pin_mode(&self, pin: u8) -> Result<PinMode> {
        self.ensure_initialized("pin_mode")?;
        let channel = self.channel(pin)?;
        let enabled = self.read_attr(channel, "enable").as_deref() == Some("1");
        Ok(if enabled { PinMode::Output } else { PinMode::Input })
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        self.ensure_initialized("set_pin_mode")?;
        let channel = self.channel(pin)?;

        if mode == PinMode::Output {
            self.export(channel)?;
            // The kernel rejects enable while the period is still zero
            if self.period_ns > 0 {
                self.write_attr("set_pin_mode", channel, "enable", 1)?;
            }
            return Ok(());
        }

        if self.channel_path(channel).is_dir() {
            self.write_attr("set_pin_mode", channel, "enable", 0)?;
            if self.exported_by_us {
                self.unexport(channel)?;
            }
        }
        Ok(())
    }

    fn set_pwm_frequency(&mut self, pin: u8, hz: u32) -> Result<()> {
        self.ensure_initialized("set_pwm_frequency")?;
        if hz == 0 {
            return Err(FanControlError::hardware("set_pwm_frequency", "frequency must be non-zero"));
        }
        let channel = self.channel(pin)?;
        self.period_ns = 1_000_000_000 / u64::from(hz);
        self.write_attr("set_pwm_frequency", channel, "period", self.period_ns)?;
        self.write_attr("set_pwm_frequency", channel, "enable", 1)?;
        debug!("PWM channel {} period {} ns", channel, self.period_ns);
        Ok(())
    }

    fn set_pwm_range(&mut self, pin: u8, range: u32) -> Result<()> {
        self.ensure_initialized("set_pwm_range")?;
        self.channel(pin)?;
        if range == 0 {
            return Err(FanControlError::hardware("set_pwm_range", "range must be non-zero"));
        }
        self.range = range;
        Ok(())
    }

    fn write_pwm_duty(&mut self, pin: u8, value: u32) -> Result<()> {
        self.ensure_initialized("write_pwm_duty")?;
        let channel = self.channel(pin)?;
        if self.range == 0 || self.period_ns == 0 {
            return Err(FanControlError::hardware(
                "write_pwm_duty",
                "frequency and range must be set first",
            ));
        }
        let value = value.min(self.range);
        let duty_ns = self.period_ns * u64::from(value) / u64::from(self.range);
        self.write_attr("write_pwm_duty", channel, "duty_cycle", duty_ns)
    }

    fn terminate(&mut self) {
        self.initialized = false;
        self.period_ns = 0;
        self.range = 0;
        debug!("PWM driver released");
    }
}
