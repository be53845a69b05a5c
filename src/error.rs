//! Error types for Provisionr

use thiserror::Error;

use crate::cloud::ProviderError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid pool specification: {0}")]
    Validation(String),

    #[error("Image lookup for {filters} matched {matches} rows, expected exactly one")]
    AmbiguousImage { filters: String, matches: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Pool already exists: {0}")]
    AlreadyExists(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Bootstrap of pool {key} did not complete within {seconds}s")]
    BootstrapTimeout { key: String, seconds: u32 },

    #[error("Only {running} of {required} machines became reachable for pool {key}")]
    MachineTimeout {
        key: String,
        running: usize,
        required: usize,
    },

    #[error("Bootstrap failed on {machine}: {message}")]
    Bootstrap { machine: String, message: String },

    #[error("Pool {0} received a termination signal")]
    Preempted(String),

    #[error("Invalid pool transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// True for unknown business keys and signals nobody waits on
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_preempted(&self) -> bool {
        matches!(self, Error::Preempted(_))
    }
}
