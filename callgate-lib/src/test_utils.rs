use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::transport::Transport;
use crate::{CapturedResponse, Coordinator, CoordinatorBuilder, ErrorKind, ManagedRequest, Result};

/// In-process transport which records every call it receives.
///
/// A gated transport holds each call until [`FakeTransport::open`] hands
/// out a permit, which lets tests observe queued and active requests.
/// Responses are JSON objects naming the requested path and the sequence
/// number of the call that produced them.
#[derive(Debug)]
pub(crate) struct FakeTransport {
    gate: Option<Semaphore>,
    failure: Option<ErrorKind>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl FakeTransport {
    /// Answers every call immediately
    pub(crate) fn instant() -> Arc<Self> {
        Arc::new(Self::with_gate(None))
    }

    /// Holds every call until a permit is released with [`FakeTransport::open`]
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self::with_gate(Some(Semaphore::new(0))))
    }

    /// Holds every call like [`FakeTransport::gated`], then fails with `error`
    pub(crate) fn failing(error: ErrorKind) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(error),
            ..Self::with_gate(Some(Semaphore::new(0)))
        })
    }

    fn with_gate(gate: Option<Semaphore>) -> Self {
        Self {
            gate,
            failure: None,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Let `n` held calls complete
    pub(crate) fn open(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Number of calls received so far
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls currently held
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever held at the same time
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Paths of all calls, in the order they reached the transport
    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(
        &self,
        request: ManagedRequest,
        token: CancellationToken,
    ) -> Result<CapturedResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.lock().unwrap().push(request.url.path().to_string());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        let held = async {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
        };
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Err(ErrorKind::cancelled(&request.method, &request.url)),
            () = held => match &self.failure {
                Some(error) => Err(error.clone()),
                None => Ok(CapturedResponse::new(
                    StatusCode::OK,
                    HeaderMap::new(),
                    request.url.clone(),
                    json!({"path": request.url.path(), "call": call}).to_string(),
                )),
            },
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// A coordinator on top of the given fake transport
pub(crate) fn coordinator(transport: &Arc<FakeTransport>, max_concurrent_requests: usize) -> Coordinator {
    let transport: Arc<dyn Transport> = transport.clone();
    CoordinatorBuilder::builder()
        .max_concurrent_requests(max_concurrent_requests)
        .transport(transport)
        .build()
        .coordinator()
        .unwrap()
}

/// A genuine `reqwest` error, produced without touching the network
pub(crate) fn network_error() -> ErrorKind {
    let error = reqwest::Client::new()
        .get("http://[invalid")
        .build()
        .unwrap_err();
    ErrorKind::NetworkRequest(Arc::new(error))
}
