//! Common error types for daqnet-gateware.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from the component-level error types.

use thiserror::Error;

use crate::frame::FrameError;
use crate::handshake::ProtocolViolation;

/// Main error type for daqnet-gateware operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors while loading configs or writing traces
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration and composition errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Handshake protocol violations caught by a monitor or a block
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Frames that cannot exist on the wire
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
