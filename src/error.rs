//! Error types for VimanaIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// VimanaIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Parameter failed local validation (never reaches the wire)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Per-call receive timeout elapsed
    #[error("Receive timed out")]
    Timeout,

    /// Cancellation signal fired, deadline passed, socket closed or queue stopped
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Drone answered `error`
    #[error("Command rejected by drone: {0}")]
    CommandRejected(String),

    /// Drone answered something that is neither `ok` nor `error`
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Telemetry packet could not be parsed
    #[error("Malformed telemetry: {0}")]
    MalformedTelemetry(String),

    /// Command queue is at capacity
    #[error("Command queue full")]
    QueueFull,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}
