//! Common error types for Switchboard components.
//!
//! Every variant maps onto an HTTP status and a classification string so the
//! HTTP surfaces can render a structured [`ErrorBody`] without inspecting the
//! message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A specialized Result type for Switchboard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Switchboard operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotRegistered(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("{message}")]
    UpstreamError { status: u16, message: String },

    #[error("{0}")]
    Misconfiguration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new validation error.
    pub fn validation(msg: impl fmt::Display) -> Self {
        Error::Validation(msg.to_string())
    }

    /// Create a new "service not registered" error.
    pub fn not_registered(service: impl fmt::Display) -> Self {
        Error::NotRegistered(format!(
            "Service {} is not registered or unavailable",
            service
        ))
    }

    /// Create a new unauthorized error.
    pub fn unauthorized(msg: impl fmt::Display) -> Self {
        Error::Unauthorized(msg.to_string())
    }

    /// Create a new forbidden error.
    pub fn forbidden(msg: impl fmt::Display) -> Self {
        Error::Forbidden(msg.to_string())
    }

    /// Create a new upstream-unavailable error.
    pub fn upstream_unavailable(msg: impl fmt::Display) -> Self {
        Error::UpstreamUnavailable(msg.to_string())
    }

    /// Create a new upstream error carrying the backend status.
    pub fn upstream(status: u16, msg: impl fmt::Display) -> Self {
        Error::UpstreamError {
            status,
            message: msg.to_string(),
        }
    }

    /// Create a new misconfiguration error.
    pub fn misconfiguration(msg: impl fmt::Display) -> Self {
        Error::Misconfiguration(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotRegistered(_) => 404,
            Error::UpstreamUnavailable(_) => 503,
            Error::UpstreamError { status, .. } if (400..600).contains(status) => *status,
            Error::UpstreamError { .. } => 500,
            Error::Misconfiguration(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Serialization(_) => 500,
        }
    }

    /// Classification label rendered in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationFailure",
            Error::NotRegistered(_) => "NotRegistered",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Forbidden(_) => "Forbidden",
            Error::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Error::UpstreamError { .. } => "UpstreamError",
            Error::Misconfiguration(_) => "Misconfiguration",
            Error::Config(_) | Error::Io(_) | Error::Serialization(_) => "Internal",
        }
    }

    /// Render the structured body for this error.
    pub fn to_body(&self, timestamp: impl Into<String>) -> ErrorBody {
        ErrorBody {
            status_code: self.status_code(),
            message: self.to_string(),
            error: self.kind().to_string(),
            timestamp: Some(timestamp.into()),
        }
    }
}

/// Structured error payload returned by every HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub message: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}
