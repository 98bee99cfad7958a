use thiserror::Error;

/// Errors raised by cache adapters and the façade.
///
/// In the default fail-open mode adapters never return the `Timeout` or
/// `Backend` variants; they are only surfaced when strict mode is enabled.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache operation `{op}` timed out")]
    Timeout { op: &'static str },
    #[error("cache backend failed during `{op}`: {message}")]
    Backend { op: &'static str, message: String },
    #[error("cache payload (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache payload compression failed: {0}")]
    Compression(String),
    #[error("structured storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("cache configuration error: {message}")]
    Configuration { message: String },
}

impl CacheError {
    pub fn backend(op: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            op,
            message: message.into(),
        }
    }

    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(error: redis::RedisError) -> Self {
        Self::backend("redis", error.to_string())
    }
}
