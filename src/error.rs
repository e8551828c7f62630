use thiserror::Error;

/// Unified error type for the fingerprint engine.
///
/// Mirrors the six error kinds called out by the error-handling design:
/// decode failures, bad configuration, storage I/O and corruption, lookup
/// misses that callers must distinguish from empty-but-valid results, and
/// cooperative cancellation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage io error: {0}")]
    StorageIo(String),

    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::StorageIo(e.to_string())
    }
}

impl From<symphonia::core::errors::Error> for EngineError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        EngineError::Decode(e.to_string())
    }
}

impl From<diesel::result::Error> for EngineError {
    fn from(e: diesel::result::Error) -> Self {
        EngineError::StorageIo(e.to_string())
    }
}

impl From<diesel::ConnectionError> for EngineError {
    fn from(e: diesel::ConnectionError) -> Self {
        EngineError::StorageIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
