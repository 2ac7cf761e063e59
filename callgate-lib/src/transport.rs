//! The network side of the coordinator.
//!
//! A [`Transport`] performs one call and captures its full response. The
//! coordinator never talks to the network directly, which keeps it testable
//! with in-process fakes.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::{CONTENT_TYPE, HeaderValue};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::{CapturedResponse, ErrorKind, ManagedRequest, RequestBody, Result};

/// Performs a single network call.
///
/// Implementations must honour `token`: once it is cancelled, the call has
/// to stop and return [`ErrorKind::Cancelled`], so that callers can tell a
/// cancellation apart from a failed request.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Send `request` and capture the complete response
    async fn execute(
        &self,
        request: ManagedRequest,
        token: CancellationToken,
    ) -> Result<CapturedResponse>;
}

/// [`Transport`] backed by a [`reqwest::Client`]
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wrap an existing client, keeping its default headers, TLS settings
    /// and connection pool
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: ManagedRequest) -> Result<CapturedResponse> {
        let ManagedRequest {
            method,
            url,
            body,
            mut headers,
        } = request;

        if let Some(body) = &body {
            match body.content_type() {
                // Replaces whatever the caller set
                Some(content_type) => {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                // reqwest sets the content type including the boundary
                None => {
                    headers.remove(CONTENT_TYPE);
                }
            }
        }

        let builder = self.client.request(method, url).headers(headers);
        let builder = match body {
            Some(RequestBody::Json(json)) => builder.body(json.to_vec()?),
            Some(RequestBody::Multipart(form)) => builder.multipart(form.to_form()?),
            None => builder,
        };

        let request = builder
            .build()
            .map_err(|e| ErrorKind::BuildRequest(Arc::new(e)))?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| ErrorKind::NetworkRequest(Arc::new(e)))?;

        CapturedResponse::from_response(response).await
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: ManagedRequest,
        token: CancellationToken,
    ) -> Result<CapturedResponse> {
        let (method, url) = (request.method.clone(), request.url.clone());
        if token.is_cancelled() {
            return Err(ErrorKind::cancelled(&method, &url));
        }

        // Dropping the in-progress call aborts it, including a partially
        // read body.
        tokio::select! {
            biased;
            () = token.cancelled() => {
                log::debug!("Aborting {method} {url} on cancellation");
                Err(ErrorKind::cancelled(&method, &url))
            }
            result = self.send(request) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use http::{Method, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use test_utils::{json_template, mock_server, mock_url};
    use url::Url;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::MultipartBody;

    #[tokio::test]
    async fn test_captures_status_headers_and_body() {
        let mock_server = mock_server!(
            StatusCode::NOT_FOUND,
            insert_header("x-request-id", "abc"),
            set_body_string("missing")
        );
        let transport = ReqwestTransport::default();

        let request = ManagedRequest::new(Method::GET, mock_url!(mock_server, "/dashboard"));
        let captured = transport
            .execute(request, CancellationToken::new())
            .await
            .unwrap();

        // Non-success statuses are data, not errors
        assert_eq!(captured.status(), StatusCode::NOT_FOUND);
        let response = captured.replay();
        assert_eq!(response.status_text(), "Not Found");
        assert_eq!(response.header("x-request-id"), Some("abc"));
        assert_eq!(response.text(), "missing");
    }

    #[tokio::test]
    async fn test_json_body_sets_content_type() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"item": "lamp", "qty": 2})))
            .respond_with(json_template!(json!({"id": 42})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = ManagedRequest::new(Method::POST, mock_url!(mock_server, "/orders"))
            .with_body(json!({"item": "lamp", "qty": 2}));
        let response = ReqwestTransport::default()
            .execute(request, CancellationToken::new())
            .await
            .unwrap()
            .replay();

        assert_eq!(response.json::<Value>().unwrap(), json!({"id": 42}));
    }

    #[tokio::test]
    async fn test_json_body_replaces_caller_content_type() {
        let mock_server = mock_server!(StatusCode::OK);

        let request = ManagedRequest::new(Method::POST, mock_url!(mock_server, "/notes"))
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_body(json!({"text": "hello"}));
        ReqwestTransport::default()
            .execute(request, CancellationToken::new())
            .await
            .unwrap();

        let received = mock_server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let content_types: Vec<_> = received[0]
            .headers
            .get_all(CONTENT_TYPE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(content_types, vec!["application/json"]);
        assert_eq!(
            serde_json::from_slice::<Value>(&received[0].body).unwrap(),
            json!({"text": "hello"})
        );
    }

    #[tokio::test]
    async fn test_multipart_body_lets_transport_set_boundary() {
        let mock_server = mock_server!(StatusCode::CREATED);

        let form = MultipartBody::new().text("title", "avatar").file(
            "upload",
            Bytes::from_static(b"\x89PNG"),
            Some("avatar.png".to_string()),
            Some("image/png".to_string()),
        );
        let request = ManagedRequest::new(Method::POST, mock_url!(mock_server, "/profile"))
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(form);
        let captured = ReqwestTransport::default()
            .execute(request, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(captured.status(), StatusCode::CREATED);

        let received = mock_server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let content_type = received[0]
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"title\""));
        assert!(body.contains("filename=\"avatar.png\""));
    }

    #[tokio::test]
    async fn test_cancellation_during_call() {
        let mock_server = mock_server!(StatusCode::OK, set_delay(Duration::from_secs(5)));
        let token = CancellationToken::new();
        let request = ManagedRequest::new(Method::GET, mock_url!(mock_server, "/slow"));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = ReqwestTransport::default()
            .execute(request, token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(StatusCode::NO_CONTENT))
            .expect(0)
            .mount(&mock_server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let request = ManagedRequest::new(Method::DELETE, mock_url!(mock_server, "/session/5"));
        let err = ReqwestTransport::default()
            .execute(request, token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_unserializable_body_is_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(StatusCode::OK))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut map = HashMap::new();
        map.insert(vec![0u8], "circular");
        let request = ManagedRequest::new(Method::POST, mock_url!(mock_server, "/items"))
            .with_body(RequestBody::json(map));
        let err = ReqwestTransport::default()
            .execute(request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ErrorKind::SerializeBody(_)));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        // Nothing listens on port 1
        let request = ManagedRequest::new(Method::GET, Url::parse("http://127.0.0.1:1/").unwrap());
        let err = ReqwestTransport::default()
            .execute(request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(!err.is_cancelled());
    }
}
