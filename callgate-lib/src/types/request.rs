use std::{convert::TryFrom, fmt::Display};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use url::Url;

use crate::{ErrorKind, RequestBody, RequestKey};

/// A request that goes through a [`crate::Coordinator`]
#[derive(Debug, Clone)]
pub struct ManagedRequest {
    /// HTTP method, e.g. `GET` or `DELETE`
    pub method: Method,

    /// Fully qualified target URL
    pub url: Url,

    /// Optional payload
    pub body: Option<RequestBody>,

    /// Extra headers for this request. They do not take part in
    /// deduplication: two requests that differ only in headers share one
    /// network call. A `content-type` header is overridden by the body:
    /// JSON bodies are always sent as `application/json` and multipart
    /// bodies carry the boundary chosen by the transport.
    pub headers: HeaderMap,
}

impl ManagedRequest {
    /// Instantiate a new `ManagedRequest` without body or extra headers
    #[inline]
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        ManagedRequest {
            method,
            url,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// Attach a payload
    #[must_use]
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a single header.
    ///
    /// `content-type` is replaced by the body's own content type when the
    /// request has a body.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace all extra headers
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// The deduplication key of this request; see [`RequestKey::build`]
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey::build(&self.method, &self.url, self.body.as_ref())
    }
}

impl Display for ManagedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl From<Url> for ManagedRequest {
    fn from(url: Url) -> Self {
        ManagedRequest::new(Method::GET, url)
    }
}

impl TryFrom<&str> for ManagedRequest {
    type Error = ErrorKind;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Ok(ManagedRequest::from(Url::parse(s)?))
    }
}

impl TryFrom<String> for ManagedRequest {
    type Error = ErrorKind;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ManagedRequest::try_from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use http::header::AUTHORIZATION;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_str_defaults_to_get() {
        let request = ManagedRequest::try_from("https://example.com/dashboard").unwrap();
        assert_eq!(request.method, Method::GET);
        assert!(request.body.is_none());
        assert_eq!(request.to_string(), "GET https://example.com/dashboard");
    }

    #[test]
    fn test_invalid_url() {
        let err = ManagedRequest::try_from("not a url").unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidUrl(_)));
    }

    #[test]
    fn test_headers_do_not_affect_key() {
        let url = Url::parse("https://example.com/orders").unwrap();
        let plain = ManagedRequest::new(Method::POST, url.clone()).with_body(json!({"id": 7}));
        let authorized = plain.clone().with_header(
            AUTHORIZATION,
            HeaderValue::from_static("Bearer token"),
        );

        assert_eq!(plain.key(), authorized.key());
        assert_eq!(authorized.headers.len(), 1);
    }
}
