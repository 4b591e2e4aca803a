//! Unified error handling for ecfan
//!
//! This crate provides the single error type used across all ecfan
//! components. It uses thiserror for ergonomic error definitions with
//! proper Display and Error trait impls.

use std::io;

/// Result type alias using EcfanError
pub type Result<T> = std::result::Result<T, EcfanError>;

/// Unified error type for all ecfan operations
#[derive(thiserror::Error, Debug)]
pub enum EcfanError {
    // ============================================================================
    // EC Transport Errors
    // ============================================================================
    #[error("EC handshake timeout on port 0x{port:02x} waiting for flag bit {flag}")]
    EcTimeout {
        port: u16,
        flag: u8,
    },

    #[error("EC register image short read: got {len} bytes, expected {expected}")]
    EcShortRead {
        len: usize,
        expected: usize,
    },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ============================================================================
    // Startup Errors
    // ============================================================================
    #[error("Permission denied for EC port access: {0}")]
    PrivilegeDenied(String),

    #[error("Another instance is already running (PID {pid})")]
    AlreadyRunning {
        pid: i32,
    },

    // ============================================================================
    // IPC Errors
    // ============================================================================
    #[error("IPC error: {0}")]
    Ipc(String),

    // ============================================================================
    // Internal Invariant Violations
    // ============================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EcfanError {
    /// Create an invalid-argument error from a string
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a privilege error from a string
    pub fn privilege(msg: impl Into<String>) -> Self {
        Self::PrivilegeDenied(msg.into())
    }

    /// Create an IPC error from a string
    pub fn ipc(msg: impl Into<String>) -> Self {
        Self::Ipc(msg.into())
    }

    /// Create an internal error from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors the control loop handles locally by skipping the
    /// current tick (the next tick retries from scratch).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EcTimeout { .. } | Self::EcShortRead { .. })
    }
}

// Allow converting from String to EcfanError
impl From<String> for EcfanError {
    fn from(s: String) -> Self {
        Self::Internal(s)
    }
}

// Allow converting from &str to EcfanError
impl From<&str> for EcfanError {
    fn from(s: &str) -> Self {
        Self::Internal(s.to_string())
    }
}
