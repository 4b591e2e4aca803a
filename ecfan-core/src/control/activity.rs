//! Activity detector
//!
//! Gates the adaptive tuner: when temperatures and fan duty sit still for
//! long enough, gain mutation is inhibited so the learning loop cannot
//! drift while the machine idles. The flag is advisory only - sampling and
//! history growth continue regardless.

use std::time::{Duration, Instant};

/// Thresholds for what counts as thermal/actuator activity.
#[derive(Debug, Clone, Copy)]
pub struct ActivityConfig {
    /// Minimum temperature change in °C to count as activity
    pub temp_delta: u8,
    /// Minimum fan duty change in percent to count as activity
    pub fan_delta: u8,
    /// Quiet period after which learning is inhibited
    pub stable_period: Duration,
    /// Consecutive idle ticks after which learning is inhibited
    pub max_idle_cycles: u32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        use crate::constants::control;
        Self {
            temp_delta: control::DEFAULT_ACTIVITY_TEMP_DELTA,
            fan_delta: control::DEFAULT_ACTIVITY_FAN_DELTA,
            stable_period: Duration::from_secs(control::DEFAULT_STABLE_PERIOD_SECS),
            max_idle_cycles: control::DEFAULT_MAX_IDLE_CYCLES,
        }
    }
}

#[derive(Debug)]
pub struct ActivityDetector {
    config: ActivityConfig,
    prev: Option<(u8, u8)>,
    last_activity: Option<Instant>,
    idle_cycles: u32,
    inhibited: bool,
}

impl ActivityDetector {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            config,
            prev: None,
            last_activity: None,
            idle_cycles: 0,
            inhibited: false,
        }
    }

    /// Feed one sample. Returns whether the sample showed activity.
    ///
    /// `now` is passed in rather than read here so the stable-period rule
    /// is testable without wall-clock sleeps.
    pub fn observe(&mut self, cpu_temp: u8, fan_duty: u8, now: Instant) -> bool {
        let active = match self.prev {
            // The very first sample has nothing to diff against; treat it
            // as activity so learning starts uninhibited.
            None => true,
            Some((prev_temp, prev_duty)) => {
                let temp_change = cpu_temp.abs_diff(prev_temp);
                let fan_change = fan_duty.abs_diff(prev_duty);
                temp_change >= self.config.temp_delta || fan_change >= self.config.fan_delta
            }
        };
        self.prev = Some((cpu_temp, fan_duty));

        if active {
            self.last_activity = Some(now);
            self.idle_cycles = 0;
            self.inhibited = false;
        } else {
            self.idle_cycles += 1;
            let quiet_too_long = self
                .last_activity
                .map(|t| now.duration_since(t) > self.config.stable_period)
                .unwrap_or(false);
            self.inhibited =
                quiet_too_long || self.idle_cycles >= self.config.max_idle_cycles;
        }

        active
    }

    /// Whether gain mutation is currently suppressed.
    pub fn learning_inhibited(&self) -> bool {
        self.inhibited
    }

    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles
    }

    /// Forget everything (mode change / explicit reset).
    pub fn reset(&mut self) {
        self.prev = None;
        self.last_activity = None;
        self.idle_cycles = 0;
        self.inhibited = false;
    }
}
