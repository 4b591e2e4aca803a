//! Closed-loop control engine
//!
//! - `pid` - the discrete PID controller and its disabled-mode fallback
//! - `activity` - idle detection that gates learning
//! - `adaptive` - online gain tuning over a rolling performance window

pub mod activity;
pub mod adaptive;
pub mod pid;

pub use activity::{ActivityConfig, ActivityDetector};
pub use adaptive::{AdaptiveConfig, AdaptiveTuner, LearningPhase};
pub use pid::PidController;
