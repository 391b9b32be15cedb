use crate::port::PortError;

/// Errors that can occur in channel protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Buffer-level encode/decode or format lookup error.
    #[error("buffer error: {0}")]
    Buffer(#[from] portlink_buffer::BufferError),

    /// Transport port error.
    #[error("port error: {0}")]
    Port(#[from] PortError),

    /// No transport port is bound to the channel.
    #[error("no port bound to channel '{0}'")]
    NoPort(String),

    /// A message or pipeline context had an unexpected shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The method name routes to a different entry point.
    #[error("method '{0}' routes by name: event methods via subscribe, others via request")]
    EventMethod(String),

    /// The protocol instance has been disposed.
    #[error("channel disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
