//! Provider error taxonomy

use thiserror::Error;

/// How a provider failure should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// The resource is already there; reconcilers treat this as success
    AlreadyExists,
    NotFound,
    /// Throttling and short outages; retried with backoff
    Transient,
    InvalidRequest,
    Other,
}

impl ProviderErrorKind {
    /// Classify a provider error code such as `InvalidGroup.Duplicate`
    pub fn from_code(code: &str) -> Self {
        match code {
            "RequestLimitExceeded" | "Throttling" | "ThrottlingException" | "InternalError"
            | "InternalFailure" | "ServiceUnavailable" | "Unavailable" | "RequestTimeout" => {
                ProviderErrorKind::Transient
            }
            "AlreadyExists" => ProviderErrorKind::AlreadyExists,
            "NotFound" => ProviderErrorKind::NotFound,
            c if c.ends_with(".Duplicate") => ProviderErrorKind::AlreadyExists,
            c if c.ends_with(".NotFound") => ProviderErrorKind::NotFound,
            c if c.starts_with("Invalid") || c.starts_with("Missing") => {
                ProviderErrorKind::InvalidRequest
            }
            _ => ProviderErrorKind::Other,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub code: String,
    pub message: String,
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build an error whose kind is derived from the provider code
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: ProviderErrorKind::from_code(&code),
            code,
            message: message.into(),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ProviderErrorKind::AlreadyExists
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}
