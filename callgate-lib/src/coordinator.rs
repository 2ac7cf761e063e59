use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use http::{HeaderMap, HeaderValue, Method, header};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;
use url::Url;

use crate::config::{DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_USER_AGENT, validate_limits};
use crate::queue::{AdmissionQueue, Executor, JobId, JobOutcome, QueuedJob};
use crate::registry::{InFlightEntry, InFlightRegistry, Lookup};
use crate::stats::{CoordinatorStats, Counters};
use crate::transport::{ReqwestTransport, Transport};
use crate::{CoordinatorConfig, ErrorKind, ManagedRequest, RequestKey, Response, Result};

/// Builder for [`Coordinator`].
///
/// See the fields for all configurable options. The defaults match
/// [`CoordinatorConfig::default`].
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `CoordinatorBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create an instance of `CoordinatorBuilder`.
"))]
pub struct CoordinatorBuilder {
    /// Maximum number of network calls executing at the same time.
    ///
    /// Requests beyond this number wait in arrival order.
    #[builder(default = DEFAULT_MAX_CONCURRENT_REQUESTS)]
    max_concurrent_requests: usize,

    /// Upper bound for a single network call, including reading the body.
    ///
    /// Expiry fails the call with [`ErrorKind::Timeout`] for every caller
    /// attached to it. Without a timeout, calls may take arbitrarily long.
    timeout: Option<Duration>,

    /// User agent sent with every request.
    ///
    /// Ignored when a custom `client` or `transport` is given.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,

    /// Headers sent with every request.
    ///
    /// Ignored when a custom `client` or `transport` is given.
    headers: HeaderMap,

    /// Pre-configured `reqwest` client to send requests with
    client: Option<reqwest::Client>,

    /// Custom transport, replacing the `reqwest` based one entirely
    transport: Option<Arc<dyn Transport>>,
}

impl Default for CoordinatorBuilder {
    #[must_use]
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<CoordinatorConfig> for CoordinatorBuilder {
    fn from(config: CoordinatorConfig) -> Self {
        Self::builder()
            .max_concurrent_requests(config.max_concurrent_requests)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .headers(config.headers)
            .build()
    }
}

impl CoordinatorBuilder {
    /// Instantiates a [`Coordinator`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The concurrency ceiling or the timeout is zero.
    /// - The user-agent is not a valid header value.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn coordinator(self) -> Result<Coordinator> {
        let Self {
            max_concurrent_requests,
            timeout,
            user_agent,
            mut headers,
            client,
            transport,
        } = self;

        validate_limits(max_concurrent_requests, timeout)?;

        let transport: Arc<dyn Transport> = match (transport, client) {
            (Some(transport), _) => transport,
            (None, Some(client)) => Arc::new(ReqwestTransport::new(client)),
            (None, None) => {
                headers.insert(
                    header::USER_AGENT,
                    HeaderValue::from_str(&user_agent).map_err(|e| {
                        ErrorKind::InvalidConfig(format!("Invalid user agent '{user_agent}': {e}"))
                    })?,
                );
                let client = reqwest::ClientBuilder::new()
                    .gzip(true)
                    .default_headers(headers)
                    .build()
                    .map_err(|e| ErrorKind::BuildClient(Arc::new(e)))?;
                Arc::new(ReqwestTransport::new(client))
            }
        };

        Ok(Coordinator {
            inner: Arc::new(Inner {
                transport,
                timeout,
                registry: Arc::new(InFlightRegistry::new()),
                queue: Arc::new(AdmissionQueue::new(max_concurrent_requests)),
                counters: Counters::default(),
            }),
        })
    }
}

/// Coordinates requests: identical in-flight requests share a single
/// network call and at most `max_concurrent_requests` calls run at once.
///
/// Cloning a `Coordinator` is cheap and yields a handle to the same
/// registry and queue. Independent coordinators share nothing.
///
/// See [`CoordinatorBuilder`] for the available configuration options.
#[derive(Debug, Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
    registry: Arc<InFlightRegistry>,
    queue: Arc<AdmissionQueue>,
    counters: Counters,
}

impl Coordinator {
    /// Create a coordinator from a loaded configuration
    ///
    /// # Errors
    ///
    /// See [`CoordinatorBuilder::coordinator`].
    pub fn from_config(config: CoordinatorConfig) -> Result<Self> {
        CoordinatorBuilder::from(config).coordinator()
    }

    /// Send a request, or attach to an identical one already in flight.
    ///
    /// Two requests are identical if method, URL and body agree, see
    /// [`RequestKey`]. Every caller receives its own replay of the shared
    /// response, so bodies can be consumed independently.
    ///
    /// Cancellation works as follows:
    /// - The token passed by the caller that starts a request owns the
    ///   execution. Cancelling it rejects every attached caller: a queued
    ///   request is dropped without ever reaching the network, a running
    ///   one is aborted.
    /// - The token of a caller that attaches to a running request only
    ///   detaches that caller. The shared execution continues for everybody
    ///   else.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Cancelled`] if the request was cancelled,
    /// [`ErrorKind::Timeout`] if it exceeded the configured timeout, and
    /// the transport error otherwise. All callers attached to one execution
    /// see the same error. A non-success status code is not an error.
    pub async fn request(
        &self,
        request: ManagedRequest,
        token: Option<CancellationToken>,
    ) -> Result<Response> {
        let counters = &self.inner.counters;
        counters.record_request();

        let outcome = self.dispatch(request, token).await;
        match &outcome {
            Err(e) if e.is_cancelled() => counters.record_cancellation(),
            Err(_) => counters.record_failure(),
            Ok(_) => {}
        }
        outcome.map(|captured| captured.replay())
    }

    /// Send a `GET` request for `url`
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid URL, or for the same
    /// reasons as [`Coordinator::request`].
    pub async fn get<T, E>(&self, url: T) -> Result<Response>
    where
        ManagedRequest: TryFrom<T, Error = E>,
        ErrorKind: From<E>,
    {
        let request = ManagedRequest::try_from(url)?;
        self.request(request, None).await
    }

    async fn dispatch(
        &self,
        request: ManagedRequest,
        token: Option<CancellationToken>,
    ) -> JobOutcome {
        let inner = &self.inner;
        let key = request.key();
        if key.is_fallback() {
            inner.counters.record_key_fallback();
        }

        let (method, url) = (request.method.clone(), request.url.clone());
        if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            log::debug!("Not sending {key}: already cancelled");
            return Err(ErrorKind::cancelled(&method, &url));
        }

        let mut pending = None;
        let lookup = inner.registry.acquire_or_register(&key, || {
            let owner = token.clone().unwrap_or_default();
            let (entry, job) = inner.start(key.clone(), request, owner);
            pending = Some(job);
            entry
        });

        match lookup {
            Lookup::Registered(entry) => {
                // Registered before queueing, so an identical request
                // arriving now attaches instead of starting a second call.
                if let Some(job) = pending {
                    inner.queue.push(job);
                }
                entry.outcome().await
            }
            Lookup::Attached(entry) => {
                inner.counters.record_dedup_hit();
                log::debug!("Attaching to request {key} already in flight as job {}", entry.id());
                match token {
                    Some(token) => {
                        tokio::select! {
                            biased;
                            outcome = entry.outcome() => outcome,
                            () = token.cancelled() => {
                                log::debug!("Detached caller from {key} on cancellation");
                                Err(ErrorKind::cancelled(&method, &url))
                            }
                        }
                    }
                    None => entry.outcome().await,
                }
            }
        }
    }

    /// Number of distinct requests which are queued or executing
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of requests waiting for a free slot
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.inner.queue.queued()
    }

    /// Number of requests currently executing
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.inner.queue.active()
    }

    /// The concurrency ceiling of this coordinator
    #[must_use]
    pub fn max_concurrent_requests(&self) -> usize {
        self.inner.queue.max_concurrent()
    }

    /// Whether a request with this key is queued or executing
    #[must_use]
    pub fn is_in_flight(&self, key: &RequestKey) -> bool {
        self.inner.registry.acquire(key).is_some()
    }

    /// Snapshot of the request statistics so far
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        self.inner.counters.snapshot()
    }
}

impl Inner {
    /// Create the in-flight entry and the queued job for a new execution.
    ///
    /// This runs with the registry lock held. The settle task it spawns
    /// takes the lock itself when releasing, so it cannot observe the
    /// registry before the entry is inserted.
    fn start(
        &self,
        key: RequestKey,
        request: ManagedRequest,
        token: CancellationToken,
    ) -> (InFlightEntry, QueuedJob) {
        let id = JobId::next();
        let (method, url) = (request.method.clone(), request.url.clone());
        let execute = self.executor(request, token.clone());
        let (job, settled) = QueuedJob::new(id, key.clone(), token.clone(), execute);

        let settle = Settle {
            id,
            key,
            method,
            url,
            token: token.clone(),
            registry: Arc::clone(&self.registry),
            queue: Arc::clone(&self.queue),
        };
        let outcome = tokio::spawn(settle.run(settled))
            .map(|joined| joined.unwrap_or_else(|e| Err(e.into())))
            .boxed()
            .shared();

        (InFlightEntry::new(id, outcome, token), job)
    }

    fn executor(&self, request: ManagedRequest, token: CancellationToken) -> Executor {
        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        Box::new(move || {
            async move {
                let call = transport.execute(request, token);
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, call)
                        .await
                        .unwrap_or(Err(ErrorKind::Timeout(limit))),
                    None => call.await,
                }
            }
            .boxed()
        })
    }
}

/// Waits for one execution and removes it from the registry before its
/// outcome becomes visible to any caller
struct Settle {
    id: JobId,
    key: RequestKey,
    method: Method,
    url: Url,
    token: CancellationToken,
    registry: Arc<InFlightRegistry>,
    queue: Arc<AdmissionQueue>,
}

impl Settle {
    async fn run(self, mut settled: oneshot::Receiver<JobOutcome>) -> JobOutcome {
        let outcome = tokio::select! {
            biased;
            received = &mut settled => match received {
                Ok(outcome) => outcome,
                // The job was dropped without settling: it was skipped at
                // admission or its executor panicked
                Err(_) if self.token.is_cancelled() => Err(self.cancelled()),
                Err(_) => Err(ErrorKind::TaskFailed(format!(
                    "Request {} {} ended without a response",
                    self.method, self.url
                ))),
            },
            () = self.token.cancelled() => {
                if self.queue.remove(self.id) {
                    log::debug!("Cancelled {} before it started", self.key);
                } else {
                    log::debug!("Cancelled {} while executing", self.key);
                }
                Err(self.cancelled())
            }
        };

        self.registry.release(&self.key, self.id);
        log::debug!(
            "Settled {} ({})",
            self.key,
            if outcome.is_ok() { "ok" } else { "error" }
        );
        outcome
    }

    fn cancelled(&self) -> ErrorKind {
        ErrorKind::cancelled(&self.method, &self.url)
    }
}
