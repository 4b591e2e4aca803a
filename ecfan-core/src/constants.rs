//! Constants and configuration values for ecfan
//!
//! Centralizes all magic numbers, register addresses, and configuration
//! defaults. This is the SINGLE SOURCE OF TRUTH for all tunable ranges -
//! never use magic numbers in other files, add them here first.

use std::time::Duration;

/// Embedded Controller register map and handshake parameters
pub mod ec {
    use super::Duration;

    /// Status/command port of the EC (legacy ISA-style interface)
    pub const SC_PORT: u16 = 0x66;

    /// Data port of the EC
    pub const DATA_PORT: u16 = 0x62;

    /// Input-buffer-full bit on the status port (must read 0 before a send)
    pub const IBF: u8 = 1;

    /// Output-buffer-full bit on the status port (must read 1 before a read)
    pub const OBF: u8 = 0;

    /// Command byte initiating a register read
    pub const READ_CMD: u8 = 0x80;

    /// Command byte initiating a fan-duty write
    pub const FAN_WRITE_CMD: u8 = 0x99;

    /// Port byte selecting the fan for a duty write
    pub const FAN_WRITE_PORT: u8 = 0x01;

    /// Size of the EC register file
    pub const REG_SIZE: usize = 0x100;

    pub const REG_CPU_TEMP: u8 = 0x07;
    pub const REG_GPU_TEMP: u8 = 0xCD;
    pub const REG_FAN_DUTY: u8 = 0xCE;
    pub const REG_FAN_RPM_HI: u8 = 0xD0;
    pub const REG_FAN_RPM_LO: u8 = 0xD1;

    /// Maximum number of status-port polls before a handshake times out
    pub const WAIT_MAX_POLLS: u32 = 100;

    /// Interval between status-port polls
    pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Kernel-exposed bulk image of the EC register file (requires ec_sys)
    pub const SYSFS_IMAGE_PATH: &str = "/sys/kernel/debug/ec/ec0/io";

    /// Dividend of the fan tachometer: rpm = RPM_DIVIDEND / divisor
    pub const RPM_DIVIDEND: u32 = 2_156_220;
}

/// Control engine defaults and clamp ranges
pub mod control {
    /// Tick period in seconds
    pub const DEFAULT_INTERVAL_SECS: f64 = 2.0;
    pub const MIN_INTERVAL_SECS: f64 = 0.1;
    pub const MAX_INTERVAL_SECS: f64 = 60.0;

    /// Target temperature in °C
    pub const DEFAULT_TARGET_TEMP: u8 = 65;
    pub const MIN_TARGET_TEMP: u8 = 40;
    pub const MAX_TARGET_TEMP: u8 = 100;

    /// Initial PID gains
    pub const DEFAULT_KP: f64 = 2.0;
    pub const DEFAULT_KI: f64 = 0.1;
    pub const DEFAULT_KD: f64 = 0.5;

    /// Hard clamps the adaptive tuner keeps the gains inside
    pub const KP_RANGE: (f64, f64) = (0.5, 5.0);
    pub const KI_RANGE: (f64, f64) = (0.01, 0.5);
    pub const KD_RANGE: (f64, f64) = (0.1, 2.0);

    /// Anti-windup clamp on the integral accumulator
    pub const INTEGRAL_LIMIT: f64 = 100.0;

    /// PID output bounds
    pub const DEFAULT_OUTPUT_MIN: f64 = 0.0;
    pub const DEFAULT_OUTPUT_MAX: f64 = 100.0;

    /// Initial adaptive step sizes (signed at runtime: sign is the
    /// current search direction)
    pub const DEFAULT_KP_STEP: f64 = 0.1;
    pub const DEFAULT_KI_STEP: f64 = 0.01;
    pub const DEFAULT_KD_STEP: f64 = 0.05;

    /// Capacity of the rolling temperature history
    pub const TEMP_HISTORY_LEN: usize = 60;

    /// Minimum history samples before oscillation is meaningful
    pub const OSCILLATION_MIN_SAMPLES: usize = 10;

    /// Tuning cadence in control cycles
    pub const DEFAULT_TUNING_INTERVAL: u32 = 30;
    pub const TUNING_INTERVAL_RANGE: (u32, u32) = (10, 300);

    /// Performance score the tuner drives toward
    pub const DEFAULT_TARGET_PERFORMANCE: f64 = 0.8;
    pub const TARGET_PERFORMANCE_RANGE: (f64, f64) = (0.1, 1.0);

    /// Rapid learning phase
    pub const DEFAULT_RAPID_CYCLES: u32 = 10;
    pub const RAPID_CYCLES_RANGE: (u32, u32) = (1, 50);
    pub const DEFAULT_RAPID_MULTIPLIER: f64 = 3.0;
    pub const RAPID_MULTIPLIER_RANGE: (f64, f64) = (1.0, 10.0);

    /// Steady-state detection
    pub const DEFAULT_STEADY_THRESHOLD: f64 = 0.05;
    pub const STEADY_THRESHOLD_RANGE: (f64, f64) = (0.01, 0.2);
    pub const DEFAULT_STEADY_CYCLES: u32 = 5;
    pub const STEADY_CYCLES_RANGE: (u32, u32) = (1, 20);

    /// Step multiplier applied once steady state is reached
    pub const STEADY_MULTIPLIER: f64 = 0.3;

    /// Score delta beyond which the search direction is kept/reversed
    pub const SCORE_CHANGE_SIGNIFICANT: f64 = 0.05;

    /// Damping applied when the search direction reverses
    pub const REVERSAL_DAMPING: f64 = 0.8;

    /// Oscillation (stddev °C) above which Ki is cut and Kd raised
    pub const OSCILLATION_HIGH: f64 = 3.0;

    /// Absolute error (°C) above which Ki is raised
    pub const ERROR_HIGH: f64 = 5.0;

    /// Activity detector defaults and ranges
    pub const DEFAULT_ACTIVITY_TEMP_DELTA: u8 = 2;
    pub const ACTIVITY_TEMP_DELTA_RANGE: (u8, u8) = (1, 10);
    pub const DEFAULT_ACTIVITY_FAN_DELTA: u8 = 5;
    pub const ACTIVITY_FAN_DELTA_RANGE: (u8, u8) = (1, 20);
    pub const DEFAULT_STABLE_PERIOD_SECS: u64 = 300;
    pub const STABLE_PERIOD_RANGE: (u64, u64) = (60, 1800);
    pub const DEFAULT_MAX_IDLE_CYCLES: u32 = 5;
    pub const MAX_IDLE_CYCLES_RANGE: (u32, u32) = (1, 20);
}

/// IPC surface. The frame size lives in the protocol crate; only the
/// server-side deadlines belong here.
pub mod ipc {
    use std::time::Duration;

    /// Per-connection read deadline
    pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

    /// Per-connection write deadline
    pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
}
