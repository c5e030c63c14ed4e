use thiserror::Error;

/// Broad category of a failure, used by callers to decide between retrying,
/// degrading and giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Alignment,
    ProviderTransient,
    Provider,
    NotConfigured,
    Store,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{stage} count mismatch: expected {expected}, got {actual}")]
    Alignment { stage: &'static str, expected: usize, actual: usize },

    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String, retryable: bool },

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Vector store error: {0}")]
    Store(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::DimensionMismatch { .. } => ErrorKind::Configuration,
            Self::Alignment { .. } => ErrorKind::Alignment,
            Self::Provider { retryable: true, .. } => ErrorKind::ProviderTransient,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::NotConfigured(_) => ErrorKind::NotConfigured,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ProviderTransient
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into(), retryable: false }
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into(), retryable: true }
    }

    /// 429 and 5xx are transient. 401 and 403 mean the credentials were
    /// rejected. Any other status is a permanent rejection.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        let body = body.trim();
        match status {
            401 | 403 => {
                Self::Configuration(format!("{provider} rejected credentials ({status}): {body}"))
            }
            429 | 500..=599 => Self::transient(provider, format!("HTTP {status}: {body}")),
            _ => Self::provider(provider, format!("HTTP {status}: {body}")),
        }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
