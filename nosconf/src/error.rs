//! Error types for the reconciliation engine.

use thiserror::Error;

/// Errors surfaced by a reconciliation run.
#[derive(Debug, Error)]
pub enum Error {
    /// Declared intent is malformed or contradicts itself. Raised before any
    /// device call.
    #[error("{0}")]
    Validation(String),

    /// The device rejected a call or answered with a failure payload.
    #[error("{message}")]
    Device { code: Option<u16>, message: String },

    /// An asynchronous workflow did not reach a terminal state in time.
    #[error("{message}")]
    Timeout { message: String, elapsed: u64 },

    /// The connected endpoint plays a role that does not support the operation.
    #[error("{0}")]
    RoleMismatch(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Device failure without a status code (e.g. a 2xx wrapping "Failed.").
    pub fn device(msg: impl Into<String>) -> Self {
        Error::Device {
            code: None,
            message: msg.into(),
        }
    }

    pub fn device_status(code: u16, msg: impl Into<String>) -> Self {
        Error::Device {
            code: Some(code),
            message: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
