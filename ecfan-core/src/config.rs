//! Daemon configuration
//!
//! Every recognized option with its default, loadable from a JSON file
//! and overridable field-by-field from the command line. Interval and
//! target temperature out of range are hard errors; the adaptive and
//! activity parameters are clamped into their documented ranges instead,
//! matching how the firmware-replacement tools this descends from treat
//! them.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ecfan_error::{EcfanError, Result};

use crate::constants::control;
use crate::control::{ActivityConfig, AdaptiveConfig};

/// Default location of the optional config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ecfan/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Tick period in seconds (0.1-60.0)
    pub interval: f64,
    /// Target temperature in °C (40-100)
    pub target_temp: u8,

    /// PID control vs the simple proportional-step fallback
    pub pid_enabled: bool,
    pub pid_kp: f64,
    pub pid_ki: f64,
    pub pid_kd: f64,
    pub pid_output_min: f64,
    pub pid_output_max: f64,

    /// Online gain tuning
    pub adaptive_enabled: bool,
    pub adaptive_tuning_interval: u32,
    pub adaptive_target_performance: f64,
    pub adaptive_rapid_cycles: u32,
    pub adaptive_rapid_multiplier: f64,
    pub adaptive_steady_threshold: f64,
    pub adaptive_steady_cycles: u32,

    /// Learning inhibition thresholds
    pub activity_temp_threshold: u8,
    pub activity_fan_threshold: u8,
    pub activity_stable_period: u64,
    pub activity_max_idle_cycles: u32,

    /// Trace every controller/tuner decision
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: control::DEFAULT_INTERVAL_SECS,
            target_temp: control::DEFAULT_TARGET_TEMP,
            pid_enabled: true,
            pid_kp: control::DEFAULT_KP,
            pid_ki: control::DEFAULT_KI,
            pid_kd: control::DEFAULT_KD,
            pid_output_min: control::DEFAULT_OUTPUT_MIN,
            pid_output_max: control::DEFAULT_OUTPUT_MAX,
            adaptive_enabled: true,
            adaptive_tuning_interval: control::DEFAULT_TUNING_INTERVAL,
            adaptive_target_performance: control::DEFAULT_TARGET_PERFORMANCE,
            adaptive_rapid_cycles: control::DEFAULT_RAPID_CYCLES,
            adaptive_rapid_multiplier: control::DEFAULT_RAPID_MULTIPLIER,
            adaptive_steady_threshold: control::DEFAULT_STEADY_THRESHOLD,
            adaptive_steady_cycles: control::DEFAULT_STEADY_CYCLES,
            activity_temp_threshold: control::DEFAULT_ACTIVITY_TEMP_DELTA,
            activity_fan_threshold: control::DEFAULT_ACTIVITY_FAN_DELTA,
            activity_stable_period: control::DEFAULT_STABLE_PERIOD_SECS,
            activity_max_idle_cycles: control::DEFAULT_MAX_IDLE_CYCLES,
            debug: false,
        }
    }
}

fn clamp_u8(value: u8, range: (u8, u8)) -> u8 {
    value.clamp(range.0, range.1)
}

fn clamp_u32(value: u32, range: (u32, u32)) -> u32 {
    value.clamp(range.0, range.1)
}

fn clamp_u64(value: u64, range: (u64, u64)) -> u64 {
    value.clamp(range.0, range.1)
}

fn clamp_f64(value: f64, range: (f64, f64)) -> f64 {
    value.clamp(range.0, range.1)
}

impl Config {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content).map_err(|e| {
            EcfanError::invalid_argument(format!(
                "failed to parse {}: {e}",
                path.display()
            ))
        })?;
        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the hard-error options and clamp the rest into range.
    pub fn sanitize(mut self) -> Result<Self> {
        if !(control::MIN_INTERVAL_SECS..=control::MAX_INTERVAL_SECS).contains(&self.interval) {
            return Err(EcfanError::invalid_argument(format!(
                "interval {} out of range ({}-{} seconds)",
                self.interval,
                control::MIN_INTERVAL_SECS,
                control::MAX_INTERVAL_SECS
            )));
        }
        if !(control::MIN_TARGET_TEMP..=control::MAX_TARGET_TEMP).contains(&self.target_temp) {
            return Err(EcfanError::invalid_argument(format!(
                "target temperature {} out of range ({}-{}°C)",
                self.target_temp,
                control::MIN_TARGET_TEMP,
                control::MAX_TARGET_TEMP
            )));
        }
        if self.pid_output_min >= self.pid_output_max {
            return Err(EcfanError::invalid_argument(
                "pid_output_min must be below pid_output_max",
            ));
        }

        self.adaptive_tuning_interval =
            clamp_u32(self.adaptive_tuning_interval, control::TUNING_INTERVAL_RANGE);
        self.adaptive_target_performance = clamp_f64(
            self.adaptive_target_performance,
            control::TARGET_PERFORMANCE_RANGE,
        );
        self.adaptive_rapid_cycles =
            clamp_u32(self.adaptive_rapid_cycles, control::RAPID_CYCLES_RANGE);
        self.adaptive_rapid_multiplier = clamp_f64(
            self.adaptive_rapid_multiplier,
            control::RAPID_MULTIPLIER_RANGE,
        );
        self.adaptive_steady_threshold = clamp_f64(
            self.adaptive_steady_threshold,
            control::STEADY_THRESHOLD_RANGE,
        );
        self.adaptive_steady_cycles =
            clamp_u32(self.adaptive_steady_cycles, control::STEADY_CYCLES_RANGE);

        self.activity_temp_threshold =
            clamp_u8(self.activity_temp_threshold, control::ACTIVITY_TEMP_DELTA_RANGE);
        self.activity_fan_threshold =
            clamp_u8(self.activity_fan_threshold, control::ACTIVITY_FAN_DELTA_RANGE);
        self.activity_stable_period =
            clamp_u64(self.activity_stable_period, control::STABLE_PERIOD_RANGE);
        self.activity_max_idle_cycles =
            clamp_u32(self.activity_max_idle_cycles, control::MAX_IDLE_CYCLES_RANGE);

        Ok(self)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    pub fn adaptive(&self) -> AdaptiveConfig {
        AdaptiveConfig {
            tuning_interval: self.adaptive_tuning_interval,
            target_performance: self.adaptive_target_performance,
            rapid_cycles: self.adaptive_rapid_cycles,
            rapid_multiplier: self.adaptive_rapid_multiplier,
            steady_threshold: self.adaptive_steady_threshold,
            steady_cycles: self.adaptive_steady_cycles,
        }
    }

    pub fn activity(&self) -> ActivityConfig {
        ActivityConfig {
            temp_delta: self.activity_temp_threshold,
            fan_delta: self.activity_fan_threshold,
            stable_period: Duration::from_secs(self.activity_stable_period),
            max_idle_cycles: self.activity_max_idle_cycles,
        }
    }
}
