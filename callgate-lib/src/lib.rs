//! `callgate` coordinates the requests an application sends to its backend.
//!
//! Identical requests (same method, URL and body) which are in flight at the
//! same time share a single network call, at most a fixed number of calls
//! execute concurrently, and every request can be cancelled.
//!
//! ```no_run
//! use callgate_lib::{CoordinatorBuilder, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let coordinator = CoordinatorBuilder::default().coordinator()?;
//!   let response = coordinator.get("https://example.com/api/dashboard").await?;
//!   println!("{response}");
//!   Ok(())
//! }
//! ```
//!
//! Requests with a body or a cancellation token go through
//! [`Coordinator::request`]:
//!
//! ```no_run
//! use callgate_lib::{CoordinatorBuilder, ManagedRequest, Result};
//! use http::Method;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let coordinator = CoordinatorBuilder::builder()
//!       .max_concurrent_requests(10_usize)
//!       .build()
//!       .coordinator()?;
//!
//!   let url = "https://example.com/api/orders".parse()?;
//!   let request = ManagedRequest::new(Method::POST, url).with_body(json!({"item": "lamp"}));
//!   let token = CancellationToken::new();
//!   let response = coordinator.request(request, Some(token)).await?;
//!   assert!(response.status().is_success());
//!   Ok(())
//! }
//! ```
#![warn(missing_docs)]

#[cfg(doctest)]
doc_comment::doctest!("../../README.md");

mod config;
mod coordinator;
mod queue;
mod registry;
mod stats;
mod types;

pub mod transport;
#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{CoordinatorConfig, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_USER_AGENT};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use stats::CoordinatorStats;
pub use transport::{ReqwestTransport, Transport};
pub use types::*;
