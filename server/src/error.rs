//! Error types for the registration server.
//!
//! This module defines the error hierarchy used throughout the server and
//! how each failure is rendered as an HTTP response.
//!
//! # Error Types
//!
//! - [`ConfigError`] - Configuration values that fail to parse or validate
//! - [`ServerError`] - Request-level failures of the registration flow
//!
//! # Example
//!
//! ```rust
//! use modl_signup::error::ServerError;
//!
//! fn check_plan(plan: &str) -> Result<(), ServerError> {
//!     if plan != "free" && plan != "premium" {
//!         return Err(ServerError::internal("unexpected plan"));
//!     }
//!     Ok(())
//! }
//! ```

use std::error::Error;
use std::fmt;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error as ThisError;
use tracing::error;

use crate::store::StoreError;
use crate::types::{DuplicateField, ErrorResponse, FieldError};

/// Message returned for failed challenge verification.
pub const CHALLENGE_FAILED_MESSAGE: &str = "Security verification failed. Please try again.";

/// Message returned for unexpected failures. Details stay in the server logs.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred during registration. \
     Please try again later. If the issue persists, contact support.";

/// Errors that occur during configuration loading and validation.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration value failed to parse or is invalid.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat {
        /// The environment variable holding the bad value.
        var: String,
        /// Description of why the value is invalid.
        message: String,
    },
}

impl ConfigError {
    /// Creates a new invalid format error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use modl_signup::error::ConfigError;
    ///
    /// let err = ConfigError::invalid("PORT", "must be a number between 1 and 65535");
    /// assert!(matches!(err, ConfigError::InvalidFormat { .. }));
    /// ```
    pub fn invalid(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            var: var.into(),
            message: message.into(),
        }
    }
}

/// Top-level error type for the registration server.
///
/// Each variant corresponds to one terminal state of the registration flow
/// and maps to exactly one HTTP status code.
///
/// # Error Categories
///
/// - **Client-fixable**: [`Validation`](Self::Validation), [`Duplicate`](Self::Duplicate)
/// - **Client-retry**: [`ChallengeFailed`](Self::ChallengeFailed), [`RateLimit`](Self::RateLimit)
/// - **Server-side**: [`Internal`](Self::Internal)
#[derive(Debug)]
pub enum ServerError {
    /// The registration payload violated one or more field constraints.
    ///
    /// Carries every violated field, not just the first.
    Validation(Vec<FieldError>),

    /// The challenge token was rejected or could not be verified.
    ChallengeFailed,

    /// The tenant store reported a uniqueness conflict.
    Duplicate {
        /// Which unique field collided.
        field: DuplicateField,
        /// User-facing message supplied by the store.
        message: String,
    },

    /// Rate limit exceeded.
    ///
    /// The `retry_after` field indicates how many seconds the client
    /// should wait before retrying.
    RateLimit {
        /// Identifier for the rate-limited source (the client IP).
        source: String,
        /// Number of seconds until the rate limit resets.
        retry_after: u64,
    },

    /// Unexpected internal server error.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(errors) => {
                write!(f, "validation error: {}", FieldError::summarize(errors))
            }
            Self::ChallengeFailed => write!(f, "challenge verification failed"),
            Self::Duplicate { field, message } => {
                write!(f, "duplicate {}: {message}", field.as_str())
            }
            Self::RateLimit {
                source,
                retry_after,
            } => {
                write!(
                    f,
                    "rate limit exceeded for {source}, retry after {retry_after} seconds"
                )
            }
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { field, message } => Self::Duplicate { field, message },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl ServerError {
    /// Creates a new validation error from the collected field errors.
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }

    /// Creates a new rate limit error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use modl_signup::error::ServerError;
    ///
    /// let err = ServerError::rate_limit("192.168.1.1", 540);
    /// assert!(matches!(err, ServerError::RateLimit { .. }));
    /// ```
    pub fn rate_limit(source: impl Into<String>, retry_after: u64) -> Self {
        Self::RateLimit {
            source: source.into(),
            retry_after,
        }
    }

    /// Creates a new internal error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use modl_signup::error::ServerError;
    ///
    /// let err = ServerError::internal("tenant store unreachable");
    /// assert!(matches!(err, ServerError::Internal(_)));
    /// ```
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::ChallengeFailed => StatusCode::BAD_REQUEST,
            Self::Duplicate { .. } => StatusCode::CONFLICT,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Builds the human-readable 429 message, with the wait rounded up to whole minutes.
pub fn rate_limit_message(retry_after_secs: u64) -> String {
    let minutes = retry_after_secs.div_ceil(60).max(1);
    let plural = if minutes == 1 { "" } else { "s" };
    format!(
        "Rate limit exceeded. You can only register one server every 10 minutes. \
         Please try again in {minutes} minute{plural}."
    )
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            Self::Validation(errors) => {
                let message = format!("Validation failed: {}", FieldError::summarize(&errors));
                (status, Json(ErrorResponse::new(message).with_errors(errors))).into_response()
            }
            Self::ChallengeFailed => {
                (status, Json(ErrorResponse::new(CHALLENGE_FAILED_MESSAGE))).into_response()
            }
            Self::Duplicate { message, .. } => {
                (status, Json(ErrorResponse::new(message))).into_response()
            }
            Self::RateLimit { retry_after, .. } => (
                status,
                [(header::RETRY_AFTER, retry_after.to_string())],
                Json(ErrorResponse::new(rate_limit_message(retry_after)).with_retry_after(retry_after)),
            )
                .into_response(),
            Self::Internal(_) => {
                error!(error = %self, "Registration failed unexpectedly");
                (status, Json(ErrorResponse::new(INTERNAL_ERROR_MESSAGE))).into_response()
            }
        }
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
