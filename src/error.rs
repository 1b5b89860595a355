//! Error types for the lip-sync engine.

/// Top-level error type for analysis, scheduling and the producer backends.
#[derive(Debug, thiserror::Error)]
pub enum LipSyncError {
    /// Invalid configuration, unsupported language or undecodable audio.
    #[error("config error: {0}")]
    Config(String),

    /// The lip-sync target is missing or lacks shape channel support.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// A remote producer (speech-to-text, generation, text-to-speech) failed.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Upload listener or folder monitor error.
    #[error("intake error: {0}")]
    Intake(String),

    /// Worker handoff channel closed.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, LipSyncError>;
