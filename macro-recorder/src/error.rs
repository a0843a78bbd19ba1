use thiserror::Error;

/// Error types for macro recording and playback
#[derive(Debug, Error)]
pub enum MacroRecorderError {
    /// Error when setting up an input source or sink
    #[error("Failed to initialize input backend: {0}")]
    InitializationError(String),

    /// Error reported by the global input hook
    #[error("Input listener error: {0}")]
    ListenerError(String),

    /// Error when applying a macro event to the OS
    #[error("Failed to apply macro event: {0}")]
    PlaybackError(String),

    /// The other end of an internal channel went away
    #[error("Input channel closed")]
    ChannelClosed,

    /// Error when serializing or deserializing JSON
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O error, including failures to spawn worker threads
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for macro recorder operations
pub type Result<T> = std::result::Result<T, MacroRecorderError>;
