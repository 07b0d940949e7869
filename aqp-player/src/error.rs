//! Error types for aqp-player
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. End of stream is deliberately absent: a read that returns
//! zero packets is the normal signal that drives the session into Stopping.

use thiserror::Error;

/// Main error type for aqp-player
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or zero format fields, unopenable source, degenerate buffer sizing.
    /// Fatal at initialize; the session never reaches Primed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Queue or buffer allocation, enqueue, start or stop failed.
    #[error("Audio device error: {0}")]
    Device(String),

    /// Non-EOF failure while reading packets from the source.
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Shared configuration loading errors
    #[error(transparent)]
    Common(#[from] aqp_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the playback session.
    ///
    /// Every runtime failure from the source or device stops playback;
    /// partial playback is worse than a clean stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::InvalidState(_))
    }
}

/// Convenience Result type using aqp-player Error
pub type Result<T> = std::result::Result<T, Error>;
