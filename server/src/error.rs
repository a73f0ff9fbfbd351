//! Error types for the Comanda server.
//!
//! This module defines the error hierarchy used throughout the server.
//!
//! # Error Types
//!
//! - [`ApiError`] - Failures raised while answering an HTTP request
//! - [`ServerError`] - Top-level failures that stop the process
//!
//! Realtime protocol failures live next to the connection state machine
//! ([`crate::connection::SignalError`]) and never become HTTP errors.
//!
//! # Error Rendering
//!
//! `ApiError` does not write its own body. Converting it into a response
//! yields the status code plus an [`ErrorReport`] extension; the pipeline's
//! error stage turns that report into the JSON body. This keeps the
//! conversion to a structured response in one place, however deep in the
//! stack the error was raised.

use std::error::Error;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::config::ConfigError;

/// Errors raised by pipeline stages and route handlers.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No route matches the request path.
    #[error("route not found")]
    NotFound,

    /// The path exists but not for this method.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The request's `Origin` is not on the trusted list.
    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),

    /// The route needs a tenant but none was resolved for the caller.
    #[error("no empresa could be resolved for this request")]
    MissingTenant,

    /// The body could not be decoded.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The body's content type is not JSON or form-encoded.
    #[error("unsupported content type")]
    UnsupportedMediaType,

    /// The body exceeded the configured limit.
    #[error("request body too large")]
    PayloadTooLarge,

    /// The body decoded but its content was rejected.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unexpected server-side failure.
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Creates a new invalid body error.
    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::InvalidBody(message.into())
    }

    /// Creates a new validation error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use comanda_server::error::ApiError;
    ///
    /// let err = ApiError::validation("event name cannot be empty");
    /// assert!(matches!(err, ApiError::Validation(_)));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::MissingTenant => StatusCode::UNAUTHORIZED,
            Self::InvalidBody(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code included in the response body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::OriginNotAllowed(_) => "origin_not_allowed",
            Self::MissingTenant => "missing_tenant",
            Self::InvalidBody(_) => "invalid_body",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Validation(_) => "validation_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Internal errors are reported generically; their detail is only logged.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Builds the report the error stage renders for this error.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            status: self.status(),
            code: self.code(),
            message: self.public_message(),
            detail: match self {
                Self::Internal(detail) => Some(detail.clone()),
                _ => None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        response.extensions_mut().insert(self.report());
        response
    }
}

/// Error description attached to a response for the error stage to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Response status.
    pub status: StatusCode,
    /// Machine-readable code.
    pub code: &'static str,
    /// Caller-facing message.
    pub message: String,
    /// Server-side detail, logged but never sent.
    pub detail: Option<String>,
}

/// JSON error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<&ErrorReport> for ErrorResponse {
    fn from(report: &ErrorReport) -> Self {
        Self::new(report.message.clone()).with_code(report.code)
    }
}

/// Top-level error type for the Comanda server process.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration could not be loaded.
    Config(ConfigError),

    /// The listener could not be bound.
    Bind {
        /// Address that failed to bind.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The HTTP server stopped with an I/O error.
    Serve(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Bind { address, source } => write!(f, "failed to bind {address}: {source}"),
            Self::Serve(err) => write!(f, "server error: {err}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Bind { source, .. } => Some(source),
            Self::Serve(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// A specialized Result type for route handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
