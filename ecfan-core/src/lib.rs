//! ecfan core library
//!
//! The hardware access layer and control engine of the ecfan daemon: a
//! thermal-management loop for laptops whose Embedded Controller exposes
//! sensor and fan registers over a legacy two-port interface.
//!
//! # Module Structure
//!
//! - `ec/` - EC transport: port-level handshake protocol, bulk register
//!   image, in-memory mock for tests
//! - `sensors` - typed reads of temperatures/fan state and the duty write
//! - `control/` - PID core, activity detector, adaptive tuner
//! - `config` - the daemon's configuration surface
//! - `constants` - register map, defaults, clamp ranges

pub mod config;
pub mod constants;
pub mod control;
pub mod ec;
pub mod sensors;

pub use config::Config;
pub use control::{
    ActivityConfig, ActivityDetector, AdaptiveConfig, AdaptiveTuner, LearningPhase,
    PidController,
};
pub use ec::{Ec, EcTransport};
pub use sensors::{Sample, Sensors};

pub use ecfan_error::{EcfanError, Result};
