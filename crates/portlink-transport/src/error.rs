use std::path::PathBuf;

/// Errors raised by transport adapters.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Frame header magic bytes did not match.
    #[error("invalid frame magic")]
    InvalidMagic,

    /// Frame declared an unknown payload kind byte.
    #[error("unknown payload kind: {0:#04x}")]
    UnknownPayloadKind(u8),

    /// Frame payload exceeds the configured maximum.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A text frame carried bytes that are not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidText(#[from] std::string::FromUtf8Error),

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind a listener.
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to a listener.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept a connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// Socket path exceeds the platform limit.
    #[error("socket path too long: {path} ({len} bytes, max {max})")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
