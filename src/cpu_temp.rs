use crate::errors::{FanControlError, Result};
use log::debug;
use std::fs;
use std::path::PathBuf;

/// Source of whole-degree CPU temperature readings
pub trait Thermometer {
    /// Take one reading in degrees Celsius
    fn sample_celsius(&mut self) -> Result<i32>;
}

/// Thermal zone file exposing millidegrees Celsius as text
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    /// Create a sampler for the given thermal file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the raw millidegree value
    pub fn read_millidegrees(&self) -> Result<i64> {
        let content = fs::read_to_string(&self.path).map_err(|e| self.read_error(e))?;

        content
            .split_whitespace()
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| self.read_error(format!("not an integer: {:?}", content.trim())))
    }

    fn read_error(&self, reason: impl std::fmt::Display) -> FanControlError {
        FanControlError::SensorRead {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Thermometer for ThermalZone {
    fn sample_celsius(&mut self) -> Result<i32> {
        let raw = self.read_millidegrees()?;
        let celsius = millidegrees_to_celsius(raw);
        debug!("Read {} m°C from {} -> {}°C", raw, self.path.display(), celsius);
        Ok(celsius)
    }
}

/// Round millidegrees to the nearest whole degree, halves going up
pub fn millidegrees_to_celsius(raw: i64) -> i32 {
    (raw as f64 / 1000.0 + 0.5).floor() as i32
}
