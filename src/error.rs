//! Error handling for playhost.
//!
//! Provides a unified error type whose kind follows the session manager's
//! failure taxonomy, with mapping from the underlying transport, parsing and
//! I/O errors to appropriate categories.
//!
//! # Error Categories
//!
//! * Connectivity and credentials: [`Offline`], [`NoToken`], [`AuthExpired`]
//! * Remote API answers: [`RateLimitExceeded`], [`RequestFailed`]
//! * Playback content and devices: [`UnsupportedContent`],
//!   [`DeviceResolutionFailed`]
//! * Playback engine reports: [`Sdk`]
//! * Infrastructure: [`Cancelled`], [`InvalidArgument`], [`Unavailable`],
//!   [`Internal`], [`Unknown`]
//!
//! Kinds are `Copy` so that the reconciler can carry fetch outcomes around
//! without owning the underlying error.
//!
//! # Example
//!
//! ```rust
//! use playhost::error::{Error, ErrorKind, Result};
//!
//! fn check(online: bool) -> Result<()> {
//!     if !online {
//!         return Err(Error::offline("no network connection"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`Offline`]: ErrorKind::Offline
//! [`NoToken`]: ErrorKind::NoToken
//! [`AuthExpired`]: ErrorKind::AuthExpired
//! [`RateLimitExceeded`]: ErrorKind::RateLimitExceeded
//! [`RequestFailed`]: ErrorKind::RequestFailed
//! [`UnsupportedContent`]: ErrorKind::UnsupportedContent
//! [`DeviceResolutionFailed`]: ErrorKind::DeviceResolutionFailed
//! [`Sdk`]: ErrorKind::Sdk
//! [`Cancelled`]: ErrorKind::Cancelled
//! [`InvalidArgument`]: ErrorKind::InvalidArgument
//! [`Unavailable`]: ErrorKind::Unavailable
//! [`Internal`]: ErrorKind::Internal
//! [`Unknown`]: ErrorKind::Unknown

#![allow(clippy::enum_glob_use)]

use std::fmt;

use http::StatusCode;
use thiserror::Error;

use crate::engine::SdkError;

/// Main error type combining error kind and details.
///
/// Provides:
/// * Categorized error types ([`ErrorKind`])
/// * Underlying error details
/// * Conversion from common error types
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// Used to get at the [`StatusError`] behind a
    /// [`RequestFailed`](ErrorKind::RequestFailed) or the [`SdkError`] behind
    /// an [`Sdk`](ErrorKind::Sdk) error.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for playhost operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories of the playback session manager.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// The host reports no network connectivity.
    #[error("offline")]
    Offline,

    /// No bearer token is available in session storage.
    #[error("no access token")]
    NoToken,

    /// The remote API rejected the bearer token (HTTP 401).
    #[error("access token expired")]
    AuthExpired,

    /// The local admission gate or the remote API (HTTP 429) refused the
    /// request.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// The remote API answered with an unexpected status.
    #[error("request failed")]
    RequestFailed,

    /// The current item is not a track.
    #[error("unsupported content")]
    UnsupportedContent,

    /// A device could not be resolved from the device list.
    #[error("device resolution failed")]
    DeviceResolutionFailed,

    /// The playback engine reported an error.
    #[error("playback engine error")]
    Sdk,

    /// The request was aborted by the session's abort signal.
    #[error("operation was cancelled")]
    Cancelled,

    /// Input did not meet validation requirements.
    #[error("invalid argument specified")]
    InvalidArgument,

    /// The remote service could not be reached.
    #[error("service unavailable")]
    Unavailable,

    /// Unexpected internal failure.
    #[error("internal error")]
    Internal,

    /// Anything else.
    #[error("unknown error")]
    Unknown,
}

impl ErrorKind {
    /// Whether this kind counts against the polling loop's consecutive
    /// failure budget.
    ///
    /// Rate limiting skips a cycle and unsupported content is a display
    /// concern. An expired token has already been reloaded by the time the
    /// poll fails; only a missing token after that stops polling.
    #[must_use]
    pub fn is_poll_failure(self) -> bool {
        !matches!(
            self,
            Self::RateLimitExceeded
                | Self::UnsupportedContent
                | Self::Cancelled
                | Self::AuthExpired
        )
    }
}

/// Details of a [`RequestFailed`](ErrorKind::RequestFailed) error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to retrieve data from endpoint {endpoint}: {status}")]
pub struct StatusError {
    /// Endpoint path relative to the API base, e.g. `/me/player`.
    pub endpoint: String,
    /// Status the server answered with.
    pub status: StatusCode,
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for requests attempted without connectivity.
    pub fn offline<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Offline, error)
    }

    /// Creates an error for requests attempted without a bearer token.
    pub fn no_token<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NoToken, error)
    }

    /// Creates an error for a bearer token the server refused.
    pub fn auth_expired<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::AuthExpired, error)
    }

    /// Creates an error for requests refused by local or remote rate
    /// limiting.
    pub fn rate_limit_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::RateLimitExceeded, error)
    }

    /// Creates an error for an unexpected status from `endpoint`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::request_failed("/me/player", StatusCode::NOT_FOUND);
    /// assert_eq!(err.kind, ErrorKind::RequestFailed);
    /// ```
    pub fn request_failed(endpoint: impl Into<String>, status: StatusCode) -> Self {
        Self::new(
            ErrorKind::RequestFailed,
            StatusError {
                endpoint: endpoint.into(),
                status,
            },
        )
    }

    /// Creates an error for content other than tracks.
    pub fn unsupported_content<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::UnsupportedContent, error)
    }

    /// Creates an error for a device that cannot be found or addressed.
    pub fn device_resolution_failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeviceResolutionFailed, error)
    }

    /// Wraps an error reported by the playback engine.
    #[must_use]
    pub fn sdk(error: SdkError) -> Self {
        Self::new(ErrorKind::Sdk, error)
    }

    /// Creates an error for requests aborted by the session.
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// Creates an error for invalid arguments.
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Creates an error for an unreachable service.
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    /// Creates an error for internal errors.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Creates an error for unknown conditions.
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound | PermissionDenied => Self::no_token(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            InvalidInput | InvalidData | UnexpectedEof => Self::invalid_argument(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Maps HTTP errors based on their nature:
/// * Decode errors -> `InvalidArgument`
/// * Builder errors -> `Internal`
/// * Connect and timeout errors -> `Unavailable`
/// * etc.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_body() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() || err.is_timeout() || err.is_redirect() {
            return Self::unavailable(err);
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors to `InvalidArgument`.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_argument(err)
    }
}

/// Converts TOML errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_argument(err)
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `Internal`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_failed_carries_endpoint_and_status() {
        let err = Error::request_failed("/me/player/devices", StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind, ErrorKind::RequestFailed);

        let details = err.downcast::<StatusError>().expect("status details");
        assert_eq!(details.endpoint, "/me/player/devices");
        assert_eq!(details.status, StatusCode::BAD_GATEWAY);
        assert!(err.to_string().starts_with("request failed: "));
    }

    #[test]
    fn rate_limiting_does_not_count_as_poll_failure() {
        assert!(!ErrorKind::RateLimitExceeded.is_poll_failure());
        assert!(!ErrorKind::UnsupportedContent.is_poll_failure());
        assert!(!ErrorKind::AuthExpired.is_poll_failure());
        assert!(ErrorKind::Offline.is_poll_failure());
        assert!(ErrorKind::RequestFailed.is_poll_failure());
    }
}
