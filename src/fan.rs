//! Temperature to fan duty mapping.
//!
//! The fan is off at or below `temp_low_c`. Above it the duty follows a linear
//! ramp over the `[temp_low_c, temp_max_c]` band, scaled to `rpm_max` and
//! clamped to `[rpm_min, rpm_max]`. There is no dead zone: one degree above the
//! low threshold already jumps from `rpm_off` straight to `rpm_min`.

use crate::config::ControllerConfig;

/// Degrees above the low threshold, widened so extreme inputs cannot overflow
fn degrees_above_low(temp_c: i32, config: &ControllerConfig) -> i64 {
    i64::from(temp_c) - i64::from(config.temp_low_c)
}

/// Share of the temperature band covered at `temp_c`, in percent.
/// Zero or negative when the fan should be off; can exceed 100.
/// Only used for reporting; `decide` works in exact integers.
pub fn band_coverage_pct(temp_c: i32, config: &ControllerConfig) -> f64 {
    degrees_above_low(temp_c, config) as f64 / config.temp_span_pct()
}

/// Calculate the PWM duty for a given temperature
pub fn decide(temp_c: i32, config: &ControllerConfig) -> u32 {
    let diff = degrees_above_low(temp_c, config);
    if diff <= 0 {
        return config.rpm_off;
    }

    // floor(diff / span * 100 * rpm_max / 100), kept in integers
    let raw = i128::from(diff) * i128::from(config.rpm_max) / i128::from(config.temp_span());

    raw.clamp(i128::from(config.rpm_min), i128::from(config.rpm_max)) as u32
}
