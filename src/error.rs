//! Error types for the virtual device controller

use std::time::Duration;
use thiserror::Error;

use crate::server::StreamId;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Audio server error: {0}")]
    Server(#[from] ServerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error names a device that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Device(DeviceError::NotFound(_)))
    }
}

/// Connection bring-up and state errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Initialization failed: {0}")]
    InitializationFailure(String),

    #[error("Timed out after {0:?} waiting for the audio server")]
    ConnectTimeout(Duration),

    #[error("Not connected to the audio server")]
    NotConnected,
}

/// Device slot and stream lifecycle errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to create stream for {name}: {reason}")]
    StreamCreateFailure { name: String, reason: String },

    #[error("Stream for {name} not ready after {timeout:?}")]
    StreamReadyTimeout { name: String, timeout: Duration },

    #[error("No free device slot (capacity {0})")]
    CapacityExceeded(usize),

    #[error("Device not found: {0}")]
    NotFound(String),
}

/// Volume and mute control errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Volume {0} outside [0.0, 1.0]")]
    OutOfRange(f32),

    #[error("Server rejected control update: {0}")]
    ServerRejected(String),
}

/// Failures reported by an audio server implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    #[error("Audio server unavailable: {0}")]
    Unavailable(String),

    #[error("No context; connect first")]
    NoContext,

    #[error("Unknown stream {0}")]
    UnknownStream(StreamId),

    #[error("Request failed ({code}): {message}")]
    Failed { code: i32, message: String },
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
