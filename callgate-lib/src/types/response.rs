use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use http::header::AsHeaderName;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{ErrorKind, Result};

/// Immutable snapshot of a completed transport call.
///
/// The body is read from the network exactly once and stored, which
/// decouples the one-shot body stream of [`reqwest::Response`] from the
/// number of callers that consume it. This also makes the type [`Clone`],
/// which [`reqwest::Response`] is not.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl CapturedResponse {
    /// Create a snapshot from its parts. The status text is the canonical
    /// reason phrase of `status`.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            url,
            body: body.into(),
        }
    }

    pub(crate) async fn from_response(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ErrorKind::ReadResponseBody(Arc::new(e)))?;

        Ok(Self::new(status, headers, url, body))
    }

    /// Produce an independent response for one caller.
    ///
    /// Every replay owns its own handle to the captured buffer and its own
    /// copy of the metadata, so any number of callers can consume the body
    /// fully without observing each other.
    #[must_use]
    pub fn replay(&self) -> Response {
        Response {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            url: self.url.clone(),
            body: self.body.clone(),
        }
    }

    /// Status code of the captured response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Size of the captured body in bytes
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// The response handed to a caller of [`crate::Coordinator::request`].
///
/// A non-success status is not an error at this layer; interpreting
/// [`Response::status`] is up to the caller.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl Response {
    #[inline]
    #[must_use]
    /// Status code of the response
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    #[must_use]
    /// Reason phrase belonging to the status code, e.g. `Not Found`
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    #[inline]
    #[must_use]
    /// All response headers
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Look up a single header value, if present and valid UTF-8
    #[must_use]
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    #[inline]
    #[must_use]
    /// Final URL of the response, after redirects
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// The raw body
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// The body decoded as UTF-8, replacing invalid sequences
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ParseJson`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| ErrorKind::ParseJson(Arc::new(e)))
    }

    /// Consume the response and return its body
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.body
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status.as_u16(), self.url)?;
        if !self.status_text.is_empty() {
            write!(f, " | {}", self.status_text)?;
        }
        Ok(())
    }
}
