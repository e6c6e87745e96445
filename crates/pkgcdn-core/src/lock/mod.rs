//! Keyed single-flight execution.
//!
//! Every package gets one [`PackageLock`] for the life of the process. The
//! lock runs at most one metadata fetch and at most one download per archive
//! version at a time; callers arriving while one is running wait for it and
//! share its outcome instead of starting their own. The work itself runs on
//! its own task, so a caller that goes away does not cancel it for the others.
//! Every flight is bounded by a budget and driven to completion even when
//! all of its callers are gone, so a stalled upstream never pins a key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use crate::error::{CdnError, CdnResult};
use crate::types::PackageMetadata;

/// Default bound on waiting for someone else's flight
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// Default bound on a whole flight, retries included
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(300);

type Flight<T> = Shared<BoxFuture<'static, CdnResult<T>>>;

/// Collapses concurrent executions under the same key into one
pub struct SingleFlight<T> {
    /// Package the flights belong to, for diagnostics
    owner: String,
    /// What the flights do ("metadata", "tarball")
    operation: &'static str,
    /// Longest a flight may run before it lands as a timeout
    budget: Duration,
    flights: DashMap<String, Flight<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(owner: impl Into<String>, operation: &'static str, budget: Duration) -> Self {
        Self {
            owner: owner.into(),
            operation,
            budget,
            flights: DashMap::new(),
        }
    }

    /// Check whether a flight is currently running under `key`
    pub fn is_busy(&self, key: &str) -> bool {
        self.flights
            .get(key)
            .map_or(false, |flight| flight.peek().is_none())
    }

    /// Run `work` under `key` unless a flight is already running there, in
    /// which case wait up to `wait` for that flight's outcome instead.
    ///
    /// `work` is only invoked when this caller starts the flight.
    pub async fn run<F, Fut>(&self, key: &str, wait: Duration, work: F) -> CdnResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CdnResult<T>> + Send + 'static,
    {
        let (flight, leader) = match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().peek().is_none() => (entry.get().clone(), false),
            Entry::Occupied(mut entry) => {
                let flight = self.launch(key, work());
                entry.insert(flight.clone());
                (flight, true)
            },
            Entry::Vacant(entry) => {
                let flight = self.launch(key, work());
                entry.insert(flight.clone());
                (flight, true)
            },
        };

        let outcome = if leader {
            trace!("Started {} flight {}/{}", self.operation, self.owner, key);
            flight.clone().await
        } else {
            debug!("Joining in-flight {} of {}/{}", self.operation, self.owner, key);
            match tokio::time::timeout(wait, flight.clone()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(CdnError::Timeout {
                        operation: self.operation.to_string(),
                        key: format!("{}/{}", self.owner, key),
                        waited: wait,
                    })
                },
            }
        };

        // Whoever sees the flight land clears it, unless a newer one replaced it
        self.flights
            .remove_if(key, |_, current| Shared::ptr_eq(current, &flight));

        outcome
    }

    /// Spawn `work` under the flight budget.
    ///
    /// A second task polls the shared outcome so it is recorded even when
    /// every caller was cancelled, which lets [`is_busy`](Self::is_busy)
    /// clear and the next caller start over.
    fn launch<Fut>(&self, key: &str, work: Fut) -> Flight<T>
    where
        Fut: Future<Output = CdnResult<T>> + Send + 'static,
    {
        let budget = self.budget;
        let expired = CdnError::Timeout {
            operation: self.operation.to_string(),
            key: format!("{}/{}", self.owner, key),
            waited: budget,
        };

        let handle = tokio::spawn(async move {
            match tokio::time::timeout(budget, work).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("{}", expired);
                    Err(expired)
                },
            }
        });

        let flight = async move {
            handle.await.unwrap_or_else(|e| {
                Err(CdnError::io(
                    "Single-flight task failed".to_string(),
                    std::io::Error::new(std::io::ErrorKind::Other, e),
                ))
            })
        }
        .boxed()
        .shared();

        tokio::spawn(flight.clone().map(drop));
        flight
    }
}

/// Per-package lock with independent metadata and tarball flights
pub struct PackageLock {
    name: String,
    wait: Duration,
    metadata: SingleFlight<Arc<PackageMetadata>>,
    tarball: SingleFlight<()>,
}

impl PackageLock {
    pub fn new(name: impl Into<String>, wait: Duration) -> Self {
        Self::with_budget(name, wait, DEFAULT_BUDGET)
    }

    /// Create a lock whose flights give up after `budget`
    pub fn with_budget(name: impl Into<String>, wait: Duration, budget: Duration) -> Self {
        let name = name.into();
        Self {
            metadata: SingleFlight::new(name.clone(), "metadata", budget),
            tarball: SingleFlight::new(name.clone(), "tarball", budget),
            name,
            wait,
        }
    }

    /// Package this lock guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a metadata fetch, or join the one already running
    pub async fn metadata<F, Fut>(&self, work: F) -> CdnResult<Arc<PackageMetadata>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CdnResult<Arc<PackageMetadata>>> + Send + 'static,
    {
        self.metadata.run("metadata", self.wait, work).await
    }

    /// Run the download of one archive version, or join the one already running
    pub async fn tarball<F, Fut>(&self, version: &str, work: F) -> CdnResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CdnResult<()>> + Send + 'static,
    {
        self.tarball.run(version, self.wait, work).await
    }

    pub fn is_refreshing(&self) -> bool {
        self.metadata.is_busy("metadata")
    }

    pub fn is_downloading(&self, version: &str) -> bool {
        self.tarball.is_busy(version)
    }
}

/// Registry of package locks, created lazily and kept for the process lifetime
pub struct LockRegistry {
    locks: DashMap<String, Arc<PackageLock>>,
    wait: Duration,
    budget: Duration,
}

impl LockRegistry {
    /// Create a registry whose locks wait at most `wait` for another flight
    pub fn new(wait: Duration) -> Self {
        Self::with_budget(wait, DEFAULT_BUDGET)
    }

    /// Create a registry whose flights also give up after `budget`
    pub fn with_budget(wait: Duration, budget: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            wait,
            budget,
        }
    }

    /// Get the lock of a package, creating it on first use
    pub fn get(&self, fullname: &str) -> Arc<PackageLock> {
        if let Some(lock) = self.locks.get(fullname) {
            return lock.clone();
        }
        self.locks
            .entry(fullname.to_string())
            .or_insert_with(|| Arc::new(PackageLock::with_budget(fullname, self.wait, self.budget)))
            .clone()
    }

    /// Number of packages a lock has been handed out for
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT)
    }
}
