//! Error types shared across the indexing and review pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input: missing path, unsupported language, malformed id.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration (e.g. chunk overlap >= chunk size).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("language detection failed: {0}")]
    LanguageDetection(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Connection, timeout, or protocol failure talking to the LLM service.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("registry error: {0}")]
    Registry(String),

    /// The model response could not be coaxed into JSON.
    #[error("could not decode model response: {0}")]
    ResponseDecode(String),

    #[error("circuit breaker is open for {service}; retry after {retry_after_secs}s")]
    CircuitOpen { service: String, retry_after_secs: u64 },

    #[error("analysis failed: {0}")]
    Analysis(String),
}

impl Error {
    /// Whether a retry with backoff may succeed. Validation and argument
    /// errors bypass retry; only transient I/O and transport failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Transport(_))
    }

    /// Errors that the circuit breaker must not count as service failures.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::Config(_) | Error::LanguageDetection(_)
        )
    }
}
