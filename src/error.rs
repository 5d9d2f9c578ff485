//! # Error Types
//!
//! This module defines error types used throughout the niimbot library.
//!
//! Codec and session errors are never recovered locally. They travel up
//! through the command layer unchanged and abort whatever print job issued
//! the command.

use std::time::Duration;

use thiserror::Error;

/// Main error type for niimbot operations
#[derive(Debug, Error)]
pub enum NiimbotError {
    /// Packet is too short, lacks its start/end markers, or its length byte
    /// disagrees with the buffer
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// Trailing checksum byte disagrees with the computed one
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// No notification arrived before the command deadline
    #[error("Command timed out after {}ms", .0.as_millis())]
    CommandTimeout(Duration),

    /// A command was issued while another one was still awaiting its response
    #[error("Session busy: another command is awaiting a response")]
    SessionBusy,

    /// Operation attempted without an open connection
    #[error("Not connected to printer")]
    NotConnected,

    /// Out-of-range argument, rejected before any I/O
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The link dropped while the connection was open
    #[error("Connection lost")]
    ConnectionLost,

    /// A polling loop exceeded its configured ceiling
    #[error("Timed out while waiting for {stage}")]
    PollTimeout { stage: &'static str },

    /// Transport-level errors (scan, connect, GATT)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Image processing error
    #[error("Image error: {0}")]
    Image(String),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using NiimbotError.
pub type Result<T> = std::result::Result<T, NiimbotError>;
