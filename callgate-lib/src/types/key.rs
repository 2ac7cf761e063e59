use std::fmt;

use http::Method;
use url::Url;

use crate::types::Result;
use crate::RequestBody;

/// Placeholder substituted for a body that cannot be serialized.
///
/// All such bodies share this placeholder, so two different unserializable
/// bodies sent with the same method to the same URL produce the same key.
pub const UNSERIALIZABLE_BODY: &str = "<unserializable body>";

/// A stable identity for a logical request, derived from its method, URL and
/// body.
///
/// Two requests with the same key are treated as the same request while one
/// of them is in flight, regardless of which caller issued them. Headers are
/// not part of the key.
///
/// # Examples
///
/// ```
/// use callgate_lib::{RequestBody, RequestKey};
/// use http::Method;
/// use url::Url;
///
/// let url = Url::parse("https://api.example.com/dashboard").unwrap();
/// let body = RequestBody::json(serde_json::json!({"page": 1}));
/// let key = RequestKey::build(&Method::POST, &url, Some(&body));
/// assert_eq!(key.as_str(), r#"POST https://api.example.com/dashboard {"page":1}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    /// Derive the key for a request.
    ///
    /// This never fails: a body that cannot be serialized is replaced by
    /// [`UNSERIALIZABLE_BODY`] and a warning is logged, since such requests
    /// can no longer be told apart from each other.
    #[must_use]
    pub fn build(method: &Method, url: &Url, body: Option<&RequestBody>) -> Self {
        Self::try_build(method, url, body).unwrap_or_else(|e| {
            log::warn!(
                "Cannot serialize body of {method} {url} for deduplication, using placeholder key: {e}"
            );
            Self::compose(method, url, UNSERIALIZABLE_BODY)
        })
    }

    /// Derive the key for a request, surfacing body serialization errors.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::SerializeBody`] if the body cannot be
    /// serialized.
    pub fn try_build(method: &Method, url: &Url, body: Option<&RequestBody>) -> Result<Self> {
        let fragment = match body {
            Some(body) => body.key_fragment()?,
            None => String::new(),
        };
        Ok(Self::compose(method, url, &fragment))
    }

    fn compose(method: &Method, url: &Url, fragment: &str) -> Self {
        RequestKey(format!("{method} {url} {fragment}"))
    }

    /// Whether this key was built with the [`UNSERIALIZABLE_BODY`] placeholder
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.0.ends_with(UNSERIALIZABLE_BODY)
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
