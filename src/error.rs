use thiserror::Error;

/// Result type for P300 operations
pub type Result<T> = std::result::Result<T, DspError>;

/// Errors that can occur when talking to a P300
#[derive(Error, Debug)]
pub enum DspError {
    /// I/O error on the underlying transport or config file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection was closed, writes can no longer be queued
    #[error("Connection closed")]
    ConnectionClosed,

    /// A report line could not be decoded
    #[error("Malformed report {line:?}: {reason}")]
    Malformed {
        /// The offending line, trimmed
        line: String,
        /// What was wrong with it
        reason: String,
    },

    /// A report named a channel that has no fader
    #[error("Unknown channel: {0}")]
    UnknownChannel(u16),

    /// No configured preset matches the requested name
    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    /// Configuration file is not in the expected shape
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Replacement address failed validation
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    /// Replacement address is the one already configured
    #[error("Address unchanged: {0}")]
    AddressUnchanged(String),

    /// A ramp was pressed with no tokio runtime to run it on
    #[error("No tokio runtime available")]
    NoRuntime,
}

impl DspError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line: line.trim().to_string(),
            reason: reason.into(),
        }
    }
}
