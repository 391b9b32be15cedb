/// Errors from buffer encode/decode and format lookup.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// Encoding a structured value failed.
    #[error("encode failed ({format}): {source}")]
    Encode {
        format: &'static str,
        source: serde_json::Error,
    },

    /// Decoding a wire payload failed.
    #[error("decode failed ({format}): {source}")]
    Decode {
        format: &'static str,
        source: serde_json::Error,
    },

    /// The payload kind does not match what the buffer expects.
    #[error("unsupported payload kind for format '{format}'")]
    UnsupportedPayload { format: &'static str },

    /// No buffer factory registered for the requested format.
    #[error(
        "no buffer registered for format '{0}'; register a custom \
         implementation with BufferRegistry::register"
    )]
    UnknownFormat(String),
}

pub type Result<T> = std::result::Result<T, BufferError>;
