//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("command not defined in check")]
    CommandNotDefined,

    #[error("handler '{name}' failed: {source}")]
    Handler {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Queue store error: {0}")]
    QueueStore(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("service not ready: {0}")]
    ServiceNotReady(String),

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<Error>),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn queue_store(msg: impl Into<String>) -> Self {
        Self::QueueStore(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Collapse a list of errors into `Ok(())`, the single error, or
    /// an `Error::Multiple` preserving every member.
    pub fn combined(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}
