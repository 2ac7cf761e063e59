use std::fmt::{self, Debug, Write};
use std::sync::Arc;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{ErrorKind, Result};

/// Content type attached to JSON bodies
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Object-safe JSON encoding, so that any `Serialize` value can be stored
/// behind a shared pointer and encoded as many times as needed.
trait EncodeJson: Send + Sync {
    fn encode(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T: Serialize + Send + Sync> EncodeJson for T {
    fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let value = canonicalize(serde_json::to_value(self)?);
        serde_json::to_vec(&value)
    }
}

/// Rebuild every object with its keys in sorted order.
///
/// Maps such as `HashMap` serialize their entries in an arbitrary order
/// that differs between equal instances. Sorting makes the encoding a
/// function of the content alone, whether or not `serde_json` keeps
/// insertion order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// A JSON payload which is serialized lazily.
///
/// Encoding is deferred until the body is needed, once for computing the
/// request key and once more when the request is sent. Both use the same
/// value, so they either agree or both fail. Object keys are always emitted
/// in sorted order, so equal values encode to equal bytes.
#[derive(Clone)]
pub struct JsonBody(Arc<dyn EncodeJson>);

impl JsonBody {
    /// Serialize the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::SerializeBody`] if the value refuses to
    /// serialize, e.g. a map with non-string keys.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.0
            .encode()
            .map_err(|e| ErrorKind::SerializeBody(Arc::new(e)))
    }
}

impl Debug for JsonBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.encode() {
            Ok(bytes) => write!(f, "JsonBody({})", String::from_utf8_lossy(&bytes)),
            Err(_) => f.write_str("JsonBody(<unserializable>)"),
        }
    }
}

/// The payload of a [`crate::ManagedRequest`]
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Sent as `application/json`
    Json(JsonBody),
    /// Sent as `multipart/form-data`; the transport picks the boundary
    Multipart(MultipartBody),
}

impl RequestBody {
    /// Wrap any serializable value as a JSON body
    #[must_use]
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self::Json(JsonBody(Arc::new(value)))
    }

    /// The content type the coordinator sets for this body, if any.
    /// Multipart bodies return `None` because the boundary is only known
    /// once the transport assembles the form.
    #[must_use]
    pub const fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Json(_) => Some(JSON_CONTENT_TYPE),
            Self::Multipart(_) => None,
        }
    }

    /// Deterministic textual rendering used as part of a request key
    pub(crate) fn key_fragment(&self) -> Result<String> {
        match self {
            Self::Json(json) => Ok(String::from_utf8_lossy(&json.to_vec()?).into_owned()),
            Self::Multipart(form) => Ok(form.key_fragment()),
        }
    }
}

impl From<MultipartBody> for RequestBody {
    fn from(form: MultipartBody) -> Self {
        Self::Multipart(form)
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::json(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PartValue {
    Text(String),
    Bytes(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FormPart {
    name: String,
    value: PartValue,
    file_name: Option<String>,
    mime: Option<String>,
}

/// A cloneable description of a multipart form.
///
/// [`reqwest::multipart::Form`] can be sent only once and cannot be
/// inspected, so the coordinator keeps this description around and turns it
/// into a form right before sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartBody {
    parts: Vec<FormPart>,
}

impl MultipartBody {
    /// Create an empty form
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text field
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            value: PartValue::Text(value.into()),
            file_name: None,
            mime: None,
        });
        self
    }

    /// Append a binary field, optionally announced as a file upload
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        content: impl Into<Bytes>,
        file_name: Option<String>,
        mime: Option<String>,
    ) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            value: PartValue::Bytes(content.into()),
            file_name,
            mime,
        });
        self
    }

    /// Number of fields in the form
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the form has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Assemble a sendable form.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::BuildRequest`] if a part carries an invalid MIME type.
    pub fn to_form(&self) -> Result<Form> {
        let mut form = Form::new();
        for part in &self.parts {
            let mut assembled = match &part.value {
                PartValue::Text(text) => Part::text(text.clone()),
                PartValue::Bytes(bytes) => Part::bytes(bytes.to_vec()),
            };
            if let Some(file_name) = &part.file_name {
                assembled = assembled.file_name(file_name.clone());
            }
            if let Some(mime) = &part.mime {
                assembled = assembled
                    .mime_str(mime)
                    .map_err(|e| ErrorKind::BuildRequest(Arc::new(e)))?;
            }
            form = form.part(part.name.clone(), assembled);
        }
        Ok(form)
    }

    // Binary content is written out in full as hex: two different uploads
    // must never share a key.
    fn key_fragment(&self) -> String {
        let mut out = String::from("multipart:");
        for part in &self.parts {
            let _ = write!(out, "{}=", part.name);
            match &part.value {
                PartValue::Text(text) => {
                    let _ = write!(out, "{text:?}");
                }
                PartValue::Bytes(bytes) => {
                    let _ = write!(out, "<{} bytes ", bytes.len());
                    for byte in bytes {
                        let _ = write!(out, "{byte:02x}");
                    }
                    out.push('>');
                }
            }
            if let Some(file_name) = &part.file_name {
                let _ = write!(out, ";filename={file_name:?}");
            }
            if let Some(mime) = &part.mime {
                let _ = write!(out, ";type={mime}");
            }
            out.push('&');
        }
        out
    }
}
