use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde::{Serialize, Serializer};
use thiserror::Error;
use url::Url;

/// Possible errors when coordinating requests with `callgate_lib`
///
/// The type is [`Clone`] because a single failure of a shared execution is
/// delivered to every caller attached to it. Sources which are not
/// themselves cloneable are kept behind an [`Arc`].
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The request was aborted through a cancellation token before it
    /// produced a response.
    #[error("Request {method} {url} was cancelled")]
    Cancelled {
        /// Method of the cancelled request
        method: Method,
        /// Target of the cancelled request
        url: Url,
    },

    /// The underlying network call failed (DNS, connection reset, TLS, ...)
    #[error("Network error while trying to connect to an endpoint via reqwest")]
    NetworkRequest(#[source] Arc<reqwest::Error>),

    /// The connection broke while the response body was being read
    #[error("Error reading response body")]
    ReadResponseBody(#[source] Arc<reqwest::Error>),

    /// The request did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be assembled, e.g. because of an invalid header
    #[error("Cannot build request")]
    BuildRequest(#[source] Arc<reqwest::Error>),

    /// The request body could not be serialized as JSON
    #[error("Cannot serialize request body as JSON")]
    SerializeBody(#[source] Arc<serde_json::Error>),

    /// The response body is not valid JSON for the requested type
    #[error("Cannot parse response body as JSON")]
    ParseJson(#[source] Arc<serde_json::Error>),

    /// The given string can not be parsed into a valid URL
    #[error("Cannot parse URL")]
    InvalidUrl(#[from] url::ParseError),

    /// The underlying HTTP client could not be created
    #[error("Failed to build HTTP client")]
    BuildClient(#[source] Arc<reqwest::Error>),

    /// A configuration file could not be read
    #[error("Failed to read config file `{}`", .0.display())]
    ReadConfig(PathBuf, #[source] Arc<std::io::Error>),

    /// A configuration file is not valid TOML for [`crate::CoordinatorConfig`]
    #[error("Cannot parse config")]
    ParseConfig(#[source] Arc<toml::de::Error>),

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A coordination task ended without settling its request
    #[error("Request task failed: {0}")]
    TaskFailed(String),
}

impl ErrorKind {
    /// Whether this error stems from a cancellation token rather than a
    /// failing network call
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the request ran into the configured timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the error was raised by the transport while talking to the
    /// remote endpoint
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::NetworkRequest(_) | Self::ReadResponseBody(_))
    }

    pub(crate) fn cancelled(method: &Method, url: &Url) -> Self {
        Self::Cancelled {
            method: method.clone(),
            url: url.clone(),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<Infallible> for ErrorKind {
    fn from(_: Infallible) -> Self {
        // tautological
        unreachable!()
    }
}

impl From<tokio::task::JoinError> for ErrorKind {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::TaskFailed(e.to_string())
    }
}
