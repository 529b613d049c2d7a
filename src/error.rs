use thiserror::Error;

/// All errors produced by the rdtstream transport layer.
#[derive(Debug, Error)]
pub enum RdtError {
    /// Window or refresh-rate bounds were violated. Raised at construction
    /// time; the offending configuration is never partially applied.
    #[error("invalid transport configuration: {0}")]
    ConfigInvalid(String),

    /// A read/write/connect/flush deadline elapsed without progress.
    /// Recoverable: callers may retry or abandon the operation.
    #[error("operation timed out")]
    Timeout,

    /// The operation is not legal for the current role, direction or state.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// The connection was closed while the operation was waiting.
    #[error("connection closed")]
    Closed,

    /// A raw packet carried no header byte.
    #[error("empty datagram")]
    EmptyDatagram,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RdtError>;
