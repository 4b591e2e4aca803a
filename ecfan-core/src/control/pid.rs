//! Discrete-time PID controller
//!
//! Runs once per sampling tick against the error between the hottest
//! sensor and the target temperature. The integral accumulator is hard
//! clamped before the gain multiply so actuator saturation cannot wind it
//! up; the final output is clamped to the configured bounds and rounded to
//! a duty percentage.

use crate::constants::control;

/// Gains plus the per-tick accumulator state.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    integral: f64,
    prev_error: f64,
    output_min: f64,
    output_max: f64,
    enabled: bool,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            prev_error: 0.0,
            output_min: control::DEFAULT_OUTPUT_MIN,
            output_max: control::DEFAULT_OUTPUT_MAX,
            enabled: true,
        }
    }

    pub fn with_output_bounds(mut self, min: f64, max: f64) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    /// Replace the gains (adaptive tuner only).
    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// One controller step. `error` is hottest temperature minus target,
    /// so a positive error drives the fan harder. Returns the commanded
    /// duty in percent.
    pub fn update(&mut self, error: f64) -> u8 {
        let proportional = self.kp * error;

        self.integral = (self.integral + error)
            .clamp(-control::INTEGRAL_LIMIT, control::INTEGRAL_LIMIT);
        let integral = self.ki * self.integral;

        let derivative = self.kd * (error - self.prev_error);
        self.prev_error = error;

        let output = (proportional + integral + derivative)
            .clamp(self.output_min, self.output_max);

        (output.round() as i32).clamp(0, 100) as u8
    }

    /// Fallback proportional-step controller used while PID is disabled:
    /// nudge the current duty 2% toward the right side of the setpoint.
    pub fn fallback_step(current_duty: u8, error: f64) -> u8 {
        let duty = current_duty as i32;
        let next = if error >= 0.0 {
            (duty + 2).max(10)
        } else {
            (duty - 2).max(0)
        };
        next.clamp(0, 100) as u8
    }

    /// Zero the accumulator state. Gains are untouched.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
    }
}
