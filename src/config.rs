//! Controller configuration: built-in defaults, the optional params file and
//! the values derived from them.
//!
//! The params file is a flat run of whitespace-separated `KEY=value` tokens in
//! a fixed order:
//!
//! ```text
//! PWM_PIN=18 RPM_MAX=5000 RPM_MIN=1500 RPM_OFF=0 TEMP_MAX=55 TEMP_LOW=40 WAIT=5000 THERMAL_FILE=/sys/class/thermal/thermal_zone0/temp
//! ```
//!
//! Tokens are consumed in that order and parsing stops at the first token that
//! is out of sequence or malformed. Everything from that point on keeps its
//! default, so a file holding only a prefix of the keys is a valid partial
//! override.

use crate::errors::{FanControlError, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Well-known location of the params file
pub const DEFAULT_CONFIG_PATH: &str = "/opt/gpio/fan/params.conf";

/// Default thermal source on Raspberry Pi OS
pub const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Keys of the params file, in the order they must appear
pub const FIELD_ORDER: [&str; 8] = [
    "PWM_PIN",
    "RPM_MAX",
    "RPM_MIN",
    "RPM_OFF",
    "TEMP_MAX",
    "TEMP_LOW",
    "WAIT",
    "THERMAL_FILE",
];

/// Resolved controller parameters. Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerConfig {
    /// GPIO pin carrying the hardware PWM signal
    pub pwm_pin: u8,
    /// PWM carrier frequency (Noctua fans expect 25 kHz)
    pub frequency_hz: u32,
    /// Top of the duty range; the fan runs flat out here
    pub rpm_max: u32,
    /// Lowest duty used while the fan is on
    pub rpm_min: u32,
    /// Duty written while the fan is off
    pub rpm_off: u32,
    /// At or above this temperature the fan runs at `rpm_max`
    pub temp_max_c: i32,
    /// At or below this temperature the fan is off
    pub temp_low_c: i32,
    /// Wait between two samples
    pub poll_interval_ms: u64,
    /// File holding the temperature in millidegrees
    pub thermal_source_path: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pwm_pin: 18,
            frequency_hz: 25_000,
            rpm_max: 5000,
            rpm_min: 1500,
            rpm_off: 0,
            temp_max_c: 55,
            temp_low_c: 40,
            poll_interval_ms: 5000,
            thermal_source_path: PathBuf::from(DEFAULT_THERMAL_PATH),
        }
    }
}

impl ControllerConfig {
    /// Width of the temperature band in degrees, widened so extreme bounds
    /// cannot overflow
    pub fn temp_span(&self) -> i64 {
        i64::from(self.temp_max_c) - i64::from(self.temp_low_c)
    }

    /// Width of the temperature band expressed in hundredths, used as the
    /// denominator when turning a temperature into a band percentage.
    pub fn temp_span_pct(&self) -> f64 {
        self.temp_span() as f64 / 100.0
    }

    /// Check the invariants the speed policy relies on
    pub fn validate(&self) -> Result<()> {
        self.validate_duty_range()?;
        self.validate_temp_band()
    }

    /// `RPM_MAX`, `RPM_MIN` and `RPM_OFF` must describe a usable duty range
    pub fn validate_duty_range(&self) -> Result<()> {
        if self.rpm_max == 0 {
            return Err(FanControlError::InvalidConfig(
                "RPM_MAX must be greater than zero".to_string(),
            ));
        }
        if self.rpm_min > self.rpm_max {
            return Err(FanControlError::InvalidConfig(format!(
                "RPM_MIN ({}) exceeds RPM_MAX ({})",
                self.rpm_min, self.rpm_max
            )));
        }
        if self.rpm_off > self.rpm_max {
            return Err(FanControlError::InvalidConfig(format!(
                "RPM_OFF ({}) exceeds RPM_MAX ({})",
                self.rpm_off, self.rpm_max
            )));
        }
        Ok(())
    }

    /// `TEMP_LOW` must lie strictly below `TEMP_MAX`
    pub fn validate_temp_band(&self) -> Result<()> {
        if self.temp_low_c >= self.temp_max_c {
            return Err(FanControlError::InvalidConfig(format!(
                "TEMP_LOW ({}) must be below TEMP_MAX ({})",
                self.temp_low_c, self.temp_max_c
            )));
        }
        Ok(())
    }

    /// Put back the defaults of any field group that breaks its invariant.
    /// The duty range and the temperature band are checked independently, so
    /// the pin, the wait and the thermal file always survive.
    pub fn repair(&mut self) {
        let defaults = ControllerConfig::default();

        if let Err(e) = self.validate_duty_range() {
            warn!("{} - default RPM values loaded", e);
            self.rpm_max = defaults.rpm_max;
            self.rpm_min = defaults.rpm_min;
            self.rpm_off = defaults.rpm_off;
        }
        if let Err(e) = self.validate_temp_band() {
            warn!("{} - default TEMP values loaded", e);
            self.temp_max_c = defaults.temp_max_c;
            self.temp_low_c = defaults.temp_low_c;
        }
    }

    /// Apply a params file body on top of `self`, stopping at the first token
    /// that is out of order or cannot be parsed.
    pub fn apply_overrides(&mut self, content: &str) {
        let mut tokens = content.split_whitespace();

        for key in FIELD_ORDER {
            let Some(token) = tokens.next() else {
                debug!("Config ends before {}", key);
                return;
            };

            if let Err(e) = self.apply_token(key, token) {
                debug!("Stopped reading config: {}", e);
                return;
            }
        }
    }

    fn apply_token(&mut self, key: &'static str, token: &str) -> Result<()> {
        let value = match token.split_once('=') {
            Some((k, v)) if k == key && !v.is_empty() => v,
            _ => {
                return Err(FanControlError::ConfigParse {
                    key,
                    value: token.to_string(),
                })
            }
        };

        match key {
            "PWM_PIN" => self.pwm_pin = parse_number(key, value)?,
            "RPM_MAX" => self.rpm_max = parse_number(key, value)?,
            "RPM_MIN" => self.rpm_min = parse_number(key, value)?,
            "RPM_OFF" => self.rpm_off = parse_number(key, value)?,
            "TEMP_MAX" => self.temp_max_c = parse_number(key, value)?,
            "TEMP_LOW" => self.temp_low_c = parse_number(key, value)?,
            "WAIT" => self.poll_interval_ms = parse_number(key, value)?,
            "THERMAL_FILE" => self.thermal_source_path = PathBuf::from(value),
            _ => {
                return Err(FanControlError::ConfigParse {
                    key,
                    value: value.to_string(),
                })
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T> {
    value.parse().map_err(|_| FanControlError::ConfigParse {
        key,
        value: value.to_string(),
    })
}

impl fmt::Display for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PWM_PIN={} | FREQUENCY={} | RPM_MAX={} | RPM_MIN={} | RPM_OFF={} | TEMP_MAX={} | TEMP_LOW={} | WAIT={} | THERMAL_FILE={}",
            self.pwm_pin,
            self.frequency_hz,
            self.rpm_max,
            self.rpm_min,
            self.rpm_off,
            self.temp_max_c,
            self.temp_low_c,
            self.poll_interval_ms,
            self.thermal_source_path.display()
        )
    }
}

/// Produces the [`ControllerConfig`] for this run
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    path: PathBuf,
}

impl ConfigResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load overrides from the params file if it can be read, otherwise keep
    /// the defaults. A field group that breaks an invariant falls back to its
    /// defaults.
    pub fn resolve(&self) -> ControllerConfig {
        let mut config = ControllerConfig::default();

        match fs::read_to_string(&self.path) {
            Ok(content) => config.apply_overrides(&content),
            Err(e) => warn!(
                "{} not readable ({}) - default values loaded",
                self.path.display(),
                e
            ),
        }

        config.repair();

        info!("Config values loaded: {}", config);
        config
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn resolve_from(content: &str) -> ControllerConfig {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        ConfigResolver::new(file.path()).resolve()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigResolver::new(dir.path().join("params.conf")).resolve();

        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.pwm_pin, 18);
        assert_eq!(config.frequency_hz, 25_000);
        assert_eq!(config.rpm_max, 5000);
        assert_eq!(config.rpm_min, 1500);
        assert_eq!(config.rpm_off, 0);
        assert_eq!(config.temp_max_c, 55);
        assert_eq!(config.temp_low_c, 40);
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(
            config.thermal_source_path,
            PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
        );
    }

    #[test]
    fn test_full_override() {
        let config = resolve_from(
            "PWM_PIN=12 RPM_MAX=4000 RPM_MIN=1000 RPM_OFF=0\nTEMP_MAX=60 TEMP_LOW=45 WAIT=2000 THERMAL_FILE=/tmp/temp\n",
        );

        assert_eq!(config.pwm_pin, 12);
        assert_eq!(config.rpm_max, 4000);
        assert_eq!(config.rpm_min, 1000);
        assert_eq!(config.temp_max_c, 60);
        assert_eq!(config.temp_low_c, 45);
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.thermal_source_path, PathBuf::from("/tmp/temp"));
        // Not settable from the file
        assert_eq!(config.frequency_hz, 25_000);
    }

    #[test]
    fn test_prefix_is_partial_override() {
        let config = resolve_from("PWM_PIN=13 RPM_MAX=4500");

        assert_eq!(config.pwm_pin, 13);
        assert_eq!(config.rpm_max, 4500);
        assert_eq!(config.rpm_min, 1500);
        assert_eq!(config.poll_interval_ms, 5000);
    }

    #[test]
    fn test_parse_stops_at_first_bad_token() {
        // RPM_MIN is malformed, so it and everything after keep defaults
        let config = resolve_from("PWM_PIN=19 RPM_MAX=4800 RPM_MIN=fast RPM_OFF=0 TEMP_MAX=70");
        assert_eq!(config.pwm_pin, 19);
        assert_eq!(config.rpm_max, 4800);
        assert_eq!(config.rpm_min, 1500);
        assert_eq!(config.temp_max_c, 55);

        // Out of order keys stop the scan as well
        let config = resolve_from("RPM_MAX=3000 PWM_PIN=12");
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_invalid_groups_fall_back_independently() {
        // Broken temperature band: only the TEMP values revert
        let config = resolve_from(
            "PWM_PIN=12 RPM_MAX=4000 RPM_MIN=1000 RPM_OFF=0 TEMP_MAX=40 TEMP_LOW=40 WAIT=1000 THERMAL_FILE=/tmp/t",
        );
        assert_eq!(config.pwm_pin, 12);
        assert_eq!(config.rpm_max, 4000);
        assert_eq!(config.rpm_min, 1000);
        assert_eq!(config.temp_max_c, 55);
        assert_eq!(config.temp_low_c, 40);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.thermal_source_path, PathBuf::from("/tmp/t"));

        // RPM_MAX below the default RPM_MIN: duty range reverts, pin is kept
        let config = resolve_from("PWM_PIN=12 RPM_MAX=1000");
        assert_eq!(config.pwm_pin, 12);
        assert_eq!(config.rpm_max, 5000);
        assert_eq!(config.rpm_min, 1500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_repair_fixes_both_groups() {
        let mut config = ControllerConfig {
            pwm_pin: 19,
            rpm_max: 0,
            temp_low_c: 60,
            temp_max_c: 50,
            ..ControllerConfig::default()
        };
        config.repair();

        assert_eq!(
            config,
            ControllerConfig {
                pwm_pin: 19,
                ..ControllerConfig::default()
            }
        );
    }

    #[test]
    fn test_validate() {
        assert!(ControllerConfig::default().validate().is_ok());

        let zero_range = ControllerConfig {
            rpm_max: 0,
            rpm_min: 0,
            ..ControllerConfig::default()
        };
        assert!(matches!(
            zero_range.validate(),
            Err(FanControlError::InvalidConfig(_))
        ));

        let off_above_max = ControllerConfig {
            rpm_off: 6000,
            ..ControllerConfig::default()
        };
        assert!(off_above_max.validate().is_err());
    }

    #[test]
    fn test_temp_span_pct() {
        let config = ControllerConfig::default();
        assert_eq!(config.temp_span(), 15);
        assert!((config.temp_span_pct() - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_wide_band_span_does_not_overflow() {
        let config = ControllerConfig {
            temp_low_c: -2_000_000_000,
            temp_max_c: 2_000_000_000,
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.temp_span(), 4_000_000_000);
        assert!((config.temp_span_pct() - 40_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_serializes_for_show_config() {
        let json = serde_json::to_value(ControllerConfig::default()).unwrap();
        assert_eq!(json["pwm_pin"], 18);
        assert_eq!(json["poll_interval_ms"], 5000);
        assert_eq!(
            json["thermal_source_path"],
            "/sys/class/thermal/thermal_zone0/temp"
        );
    }
}
