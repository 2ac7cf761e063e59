#![allow(unreachable_pub)]

mod body;
mod error;
mod key;
mod request;
mod response;

pub use body::{JSON_CONTENT_TYPE, JsonBody, MultipartBody, RequestBody};
pub use error::ErrorKind;
pub use key::{RequestKey, UNSERIALIZABLE_BODY};
pub use request::ManagedRequest;
pub use response::{CapturedResponse, Response};

/// The callgate `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
