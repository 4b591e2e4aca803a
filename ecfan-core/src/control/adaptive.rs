//! Adaptive PID tuner
//!
//! Observes closed-loop performance over a rolling temperature window and
//! nudges the PID gains online. Tuning runs in three regimes: a rapid
//! phase right after (re)start with enlarged steps, a normal phase, and a
//! conservative steady-state phase once the performance score stops
//! moving. The step sizes are signed; a performance regression negates
//! them and damps their magnitude, turning the search around.
//!
//! The tuner only ever mutates [`PidController`] gains - it never touches
//! the fan.

use tracing::debug;

use crate::constants::control;

use super::pid::PidController;

/// Tuning cadence and regime parameters.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    /// Control cycles between tuning passes
    pub tuning_interval: u32,
    /// Performance score the tuner drives toward
    pub target_performance: f64,
    /// Length of the rapid learning phase in tuning passes
    pub rapid_cycles: u32,
    /// Step multiplier during the rapid phase
    pub rapid_multiplier: f64,
    /// |Δscore| below which a pass counts as stable
    pub steady_threshold: f64,
    /// Consecutive stable passes before the steady regime kicks in
    pub steady_cycles: u32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            tuning_interval: control::DEFAULT_TUNING_INTERVAL,
            target_performance: control::DEFAULT_TARGET_PERFORMANCE,
            rapid_cycles: control::DEFAULT_RAPID_CYCLES,
            rapid_multiplier: control::DEFAULT_RAPID_MULTIPLIER,
            steady_threshold: control::DEFAULT_STEADY_THRESHOLD,
            steady_cycles: control::DEFAULT_STEADY_CYCLES,
        }
    }
}

/// Learning regime of the current tuning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningPhase {
    Rapid,
    Normal,
    Steady,
}

impl LearningPhase {
    fn multiplier(self, config: &AdaptiveConfig) -> f64 {
        match self {
            LearningPhase::Rapid => config.rapid_multiplier,
            LearningPhase::Normal => 1.0,
            LearningPhase::Steady => control::STEADY_MULTIPLIER,
        }
    }
}

/// Fixed-capacity ring of recent temperatures.
#[derive(Debug, Clone)]
struct TempHistory {
    samples: [f64; control::TEMP_HISTORY_LEN],
    index: usize,
    len: usize,
}

impl TempHistory {
    fn new() -> Self {
        Self {
            samples: [0.0; control::TEMP_HISTORY_LEN],
            index: 0,
            len: 0,
        }
    }

    fn push(&mut self, temp: f64) {
        self.samples[self.index] = temp;
        self.index = (self.index + 1) % control::TEMP_HISTORY_LEN;
        if self.len < control::TEMP_HISTORY_LEN {
            self.len += 1;
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Standard deviation over the window; 0 until enough samples exist.
    fn stddev(&self) -> f64 {
        if self.len < control::OSCILLATION_MIN_SAMPLES {
            return 0.0;
        }
        let n = self.len as f64;
        let mean = self.samples[..self.len].iter().sum::<f64>() / n;
        let variance = self.samples[..self.len]
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / n;
        variance.sqrt()
    }

    fn clear(&mut self) {
        self.index = 0;
        self.len = 0;
    }
}

#[derive(Debug)]
pub struct AdaptiveTuner {
    config: AdaptiveConfig,
    history: TempHistory,
    performance_score: f64,
    prev_score: f64,
    learning_cycles: u64,
    cycles_since_tuning: u32,
    rapid_cycles_done: u32,
    consecutive_stable_cycles: u32,
    // Signed step sizes: the sign is the current search direction.
    kp_step: f64,
    ki_step: f64,
    kd_step: f64,
}

impl AdaptiveTuner {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            config,
            history: TempHistory::new(),
            performance_score: 0.0,
            prev_score: 0.0,
            learning_cycles: 0,
            cycles_since_tuning: 0,
            rapid_cycles_done: 0,
            consecutive_stable_cycles: 0,
            kp_step: control::DEFAULT_KP_STEP,
            ki_step: control::DEFAULT_KI_STEP,
            kd_step: control::DEFAULT_KD_STEP,
        }
    }

    /// Record one auto-mode temperature sample and advance the tuning
    /// countdown.
    pub fn record_temperature(&mut self, temp: u8) {
        self.history.push(temp as f64);
        self.cycles_since_tuning += 1;
    }

    /// Whether enough cycles have elapsed for a tuning pass.
    pub fn due(&self) -> bool {
        self.cycles_since_tuning >= self.config.tuning_interval
    }

    /// Oscillation measure: standard deviation of the temperature window.
    pub fn oscillation(&self) -> f64 {
        self.history.stddev()
    }

    pub fn performance_score(&self) -> f64 {
        self.performance_score
    }

    pub fn learning_cycles(&self) -> u64 {
        self.learning_cycles
    }

    pub fn steps(&self) -> (f64, f64, f64) {
        (self.kp_step, self.ki_step, self.kd_step)
    }

    /// Regime the next tuning pass will run under.
    pub fn phase(&self) -> LearningPhase {
        if self.rapid_cycles_done < self.config.rapid_cycles {
            LearningPhase::Rapid
        } else if self.consecutive_stable_cycles >= self.config.steady_cycles {
            LearningPhase::Steady
        } else {
            LearningPhase::Normal
        }
    }

    /// Score how well the loop is doing: proximity to setpoint, lack of
    /// oscillation, and (near the setpoint) fan frugality.
    pub fn score(&self, max_temp: u8, target: u8, fan_duty: u8) -> f64 {
        let error = (max_temp as f64 - target as f64).abs();

        let error_score = (1.0 - error / 50.0).clamp(0.0, 1.0);
        let oscillation_component = 1.0 - (self.oscillation() / 10.0).clamp(0.0, 1.0);
        let fan_efficiency = if error < control::ERROR_HIGH {
            1.0 - fan_duty as f64 / 100.0
        } else {
            0.0
        };

        error_score * 0.6 + oscillation_component * 0.3 + fan_efficiency * 0.1
    }

    /// One tuning pass: evaluate performance, update the search direction,
    /// and mutate the PID gains under their clamps.
    pub fn tune(&mut self, pid: &mut PidController, max_temp: u8, target: u8, fan_duty: u8) {
        let score = self.score(max_temp, target, fan_duty);
        let score_change = score - self.prev_score;

        let phase = self.phase();
        let multiplier = phase.multiplier(&self.config);

        if score_change.abs() < self.config.steady_threshold {
            self.consecutive_stable_cycles += 1;
        } else {
            self.consecutive_stable_cycles = 0;
        }

        // Regression: flip the search direction and damp the step sizes.
        // An improvement (or a wash) keeps the current direction.
        if score_change < -control::SCORE_CHANGE_SIGNIFICANT {
            self.kp_step *= -control::REVERSAL_DAMPING;
            self.ki_step *= -control::REVERSAL_DAMPING;
            self.kd_step *= -control::REVERSAL_DAMPING;
        }

        let (mut kp, mut ki, mut kd) = pid.gains();

        if score < self.config.target_performance {
            kp = (kp + multiplier * self.kp_step)
                .clamp(control::KP_RANGE.0, control::KP_RANGE.1);
        }

        let oscillation = self.oscillation();
        let error = (max_temp as f64 - target as f64).abs();
        if oscillation > control::OSCILLATION_HIGH {
            // Oscillating: back off the integral action, add damping.
            ki -= multiplier * self.ki_step;
            kd += multiplier * self.kd_step;
        } else if error > control::ERROR_HIGH {
            // Persistent offset: lean on the integral term.
            ki += multiplier * self.ki_step;
        }

        ki = ki.clamp(control::KI_RANGE.0, control::KI_RANGE.1);
        kd = kd.clamp(control::KD_RANGE.0, control::KD_RANGE.1);
        pid.set_gains(kp, ki, kd);

        self.prev_score = score;
        self.performance_score = score;
        self.learning_cycles += 1;
        if phase == LearningPhase::Rapid {
            self.rapid_cycles_done += 1;
        }
        self.cycles_since_tuning = 0;

        debug!(
            score,
            score_change,
            ?phase,
            oscillation,
            kp,
            ki,
            kd,
            "adaptive tuning pass"
        );
    }

    /// Forget all learned state. Gains are the PID's problem; step sizes
    /// and counters go back to their defaults.
    pub fn reset(&mut self) {
        self.history.clear();
        self.performance_score = 0.0;
        self.prev_score = 0.0;
        self.learning_cycles = 0;
        self.cycles_since_tuning = 0;
        self.rapid_cycles_done = 0;
        self.consecutive_stable_cycles = 0;
        self.kp_step = control::DEFAULT_KP_STEP;
        self.ki_step = control::DEFAULT_KI_STEP;
        self.kd_step = control::DEFAULT_KD_STEP;
    }
}

impl Default for AdaptiveTuner {
    fn default() -> Self {
        Self::new(AdaptiveConfig::default())
    }
}
