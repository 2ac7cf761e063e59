//! Bookkeeping of requests which are currently in flight.
//!
//! Each [`RequestKey`] maps to at most one [`InFlightEntry`]. The entry
//! carries the shared outcome every attached caller awaits and the
//! cancellation token that owns the execution.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;

use crate::queue::{JobId, JobOutcome};
use crate::RequestKey;

/// The outcome of one execution, awaitable by any number of callers
pub(crate) type SharedOutcome = Shared<BoxFuture<'static, JobOutcome>>;

/// A single execution shared by every caller with the same key
#[derive(Clone)]
pub(crate) struct InFlightEntry {
    id: JobId,
    outcome: SharedOutcome,
    token: CancellationToken,
}

impl InFlightEntry {
    pub(crate) const fn new(id: JobId, outcome: SharedOutcome, token: CancellationToken) -> Self {
        InFlightEntry { id, outcome, token }
    }

    pub(crate) const fn id(&self) -> JobId {
        self.id
    }

    /// A handle on the shared outcome
    pub(crate) fn outcome(&self) -> SharedOutcome {
        self.outcome.clone()
    }
}

impl fmt::Debug for InFlightEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightEntry")
            .field("id", &self.id)
            .field("settled", &self.outcome.peek().is_some())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Result of [`InFlightRegistry::acquire_or_register`]
#[derive(Debug)]
pub(crate) enum Lookup {
    /// Another caller already started this request
    Attached(InFlightEntry),
    /// The caller created a new entry and is responsible for queueing it
    Registered(InFlightEntry),
}

/// Map from request key to the execution currently serving it
#[derive(Debug, Default)]
pub(crate) struct InFlightRegistry {
    entries: Mutex<HashMap<RequestKey, InFlightEntry>>,
}

impl InFlightRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestKey, InFlightEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the entry currently serving `key`, if any
    pub(crate) fn acquire(&self, key: &RequestKey) -> Option<InFlightEntry> {
        self.lock().get(key).cloned()
    }

    /// Attach to the entry for `key`, or register the one produced by
    /// `create` if there is none.
    ///
    /// Lookup and insertion happen under a single lock, so two concurrent
    /// identical requests can never both register. `create` runs with the
    /// lock held and must not call back into the registry.
    pub(crate) fn acquire_or_register<F>(&self, key: &RequestKey, create: F) -> Lookup
    where
        F: FnOnce() -> InFlightEntry,
    {
        match self.lock().entry(key.clone()) {
            Entry::Occupied(entry) => Lookup::Attached(entry.get().clone()),
            Entry::Vacant(entry) => Lookup::Registered(entry.insert(create()).clone()),
        }
    }

    /// Remove the entry for `key`, but only if it is still the entry with
    /// the given id.
    ///
    /// A fresh entry registered under the same key after this one settled
    /// is left alone, which makes release idempotent. Returns whether an
    /// entry was removed.
    pub(crate) fn release(&self, key: &RequestKey, id: JobId) -> bool {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.id == id => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Number of requests in flight
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
