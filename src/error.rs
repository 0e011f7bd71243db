use thiserror::Error;

/// Errors produced by the relay core and its broker transports.
///
/// Connectivity failures (`Connect`, `Session`) are absorbed by the session
/// supply and only ever show up in logs. The remaining variants describe a
/// single session going bad; the owning loop discards that session and asks
/// for a fresh one.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Dialing the broker failed or timed out.
    #[error("broker connection failed: {0}")]
    Connect(String),

    /// Opening a session (channel + queue declaration) failed.
    #[error("session setup failed: {0}")]
    Session(String),

    /// The broker refused to put the session into confirm mode.
    #[error("publisher confirms not supported: {0}")]
    ConfirmsUnsupported(String),

    /// Writing a message onto an established session failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Starting a consumer on the session failed.
    #[error("consume failed: {0}")]
    Consume(String),

    /// Acknowledging a delivery back to the broker failed.
    #[error("ack failed: {0}")]
    Ack(String),

    /// The session died underneath an outstanding operation.
    #[error("session closed")]
    SessionClosed,

    /// A downstream sink rejected a payload.
    #[error("sink `{sink}` failed: {reason}")]
    Sink { sink: String, reason: String },

    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error (sink writers, listeners).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
