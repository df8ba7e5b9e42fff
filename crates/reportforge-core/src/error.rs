use thiserror::Error;

/// Core error taxonomy for ReportForge.
///
/// Configuration and provider errors surface before any run starts; stream
/// and protocol errors abort the current run and require an explicit new one.
#[derive(Debug, Error)]
pub enum ReportForgeError {
    #[error("unsupported model provider: {0}")]
    UnsupportedProvider(String),
    #[error("invalid configuration value for `{field}`: {value:?}")]
    InvalidConfigurationValue { field: &'static str, value: String },
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("event stream failure: {source}")]
    StreamConsumption {
        #[source]
        source: anyhow::Error,
    },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl ReportForgeError {
    pub fn stream(source: impl Into<anyhow::Error>) -> Self {
        Self::StreamConsumption {
            source: source.into(),
        }
    }

    pub fn invalid_value(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidConfigurationValue {
            field,
            value: value.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Whether a retry could ever succeed. None of the current variants are
    /// retryable: a failed stream leaves the graph's suspended state unknown.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

pub type Result<T> = std::result::Result<T, ReportForgeError>;
