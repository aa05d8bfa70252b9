//! Error types for Batch pool provisioning

use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported OS type: {0} (expected 'linux' or 'windows')")]
    UnsupportedOs(String),

    #[error("Missing configuration value: [{section}] {key}")]
    MissingConfig { section: String, key: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pool {pool_id} creation rejected: {code}: {message}")]
    PoolCreation {
        pool_id: String,
        code: String,
        message: String,
        #[source]
        source: RemoteError,
    },

    #[error("Pool {pool_id} nodes not ready after {waited:?}")]
    PoolTimeout { pool_id: String, waited: Duration },

    #[error("Batch service call '{operation}' timed out after {after:?}")]
    RequestTimeout { operation: &'static str, after: Duration },

    #[error("Batch service error: {0}")]
    Remote(#[from] RemoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn missing(section: &str, key: &str) -> Self {
        Error::MissingConfig {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    /// The remote error behind this failure, if any
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Error::PoolCreation { source, .. } => Some(source),
            Error::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// Error reported by the Batch service (or the transport in front of it)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteError {
    /// HTTP status, when a response was received
    pub status: Option<u16>,
    /// Service error code such as `PoolExists` or `AuthenticationFailed`
    pub code: Option<String>,
    pub message: Option<String>,
    /// Extra key/value details attached to the error body
    pub values: Vec<(String, String)>,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Error with no service code, e.g. a connection or decode failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push((key.into(), value.into()));
        self
    }

    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or("Unknown")
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    pub fn is_pool_exists(&self) -> bool {
        self.code.as_deref() == Some("PoolExists")
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "[{}] ", status)?;
        }
        write!(f, "{}", self.code())?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}
