//! Error types for the ember speech pipeline.

/// Top-level error type for the streaming speech pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Audio device, context, or scheduling error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Audio payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Language model request or stream error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Wire-format or HTTP transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A per-conversation limit was exceeded.
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the oldest request leaves the window.
        retry_after_secs: u64,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;
