//! Shared, periodically refreshed allow-list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::error::{AllowlistError, AllowlistResult};
use super::list::Allowlist;
use super::range::CidrRange;
use super::resolver::{AllowlistProvider, AllowlistResolver};
use super::source::{HttpMetaSource, MetaSource};

#[derive(Debug, Clone)]
struct Snapshot {
    list: Arc<Allowlist>,
    fetched_at: Instant,
}

/// Refresh statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Successful refreshes.
    pub refreshes: AtomicU64,
    /// Failed refreshes.
    pub refresh_failures: AtomicU64,
    /// Requests served from the snapshot.
    pub hits: AtomicU64,
}

/// Allow-list shared by all connections.
///
/// A background task refreshes the snapshot; connections only read it.
/// When the snapshot is missing or older than the staleness bound, the
/// first caller refreshes inline and concurrent callers wait for that
/// attempt instead of issuing their own.
#[derive(Debug)]
pub struct CachedAllowlist<S = HttpMetaSource> {
    resolver: AllowlistResolver<S>,
    snapshot: RwLock<Option<Snapshot>>,
    last_error: RwLock<Option<AllowlistError>>,
    refresh_lock: Mutex<()>,
    attempts: AtomicU64,
    refresh_interval: Duration,
    max_staleness: Duration,
    stats: CacheStats,
}

impl<S: MetaSource> CachedAllowlist<S> {
    /// Create an empty cache around `resolver`.
    #[must_use]
    pub fn new(resolver: AllowlistResolver<S>, config: &CacheConfig) -> Self {
        Self {
            resolver,
            snapshot: RwLock::new(None),
            last_error: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            attempts: AtomicU64::new(0),
            refresh_interval: config.refresh_interval(),
            max_staleness: config.max_staleness(),
            stats: CacheStats::default(),
        }
    }

    /// The wrapped resolver.
    #[must_use]
    pub fn resolver(&self) -> &AllowlistResolver<S> {
        &self.resolver
    }

    /// Refresh statistics.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Fetch a new allow-list and replace the snapshot.
    ///
    /// On failure the previous snapshot is kept.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error.
    pub async fn refresh(&self) -> AllowlistResult<Arc<Allowlist>> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        match self.resolver.fetch().await {
            Ok(list) => {
                let list = Arc::new(list);
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Snapshot {
                    list: Arc::clone(&list),
                    fetched_at: Instant::now(),
                });
                *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = None;
                self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
                debug!(ranges = list.len(), "Allow-list snapshot refreshed");
                Ok(list)
            },
            Err(e) => {
                *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = Some(e.clone());
                self.stats.refresh_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            },
        }
    }

    /// Current snapshot if it is within the staleness bound.
    #[must_use]
    pub fn fresh_snapshot(&self) -> Option<Arc<Allowlist>> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|s| s.fetched_at.elapsed() <= self.max_staleness)
            .map(|s| Arc::clone(&s.list))
    }

    /// Number of ranges in the current snapshot, fresh or not.
    #[must_use]
    pub fn snapshot_len(&self) -> Option<usize> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|s| s.list.len())
    }

    /// Age of the current snapshot.
    #[must_use]
    pub fn snapshot_age(&self) -> Option<Duration> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|s| s.fetched_at.elapsed())
    }

    /// Error of the most recent refresh, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<AllowlistError> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Error to report when no fresh snapshot is available after `err`.
    fn unavailable(&self, err: AllowlistError) -> AllowlistError {
        match self.snapshot_age() {
            Some(age) => AllowlistError::Stale {
                age_secs: age.as_secs(),
                max_staleness_secs: self.max_staleness.as_secs(),
            },
            None => err,
        }
    }
}

impl<S: MetaSource + 'static> CachedAllowlist<S> {
    /// Start the background refresh task.
    ///
    /// The first refresh happens immediately. Must be called from within a
    /// tokio runtime.
    #[must_use]
    pub fn spawn_refresh(self: &Arc<Self>) -> RefreshHandle {
        let cache = Arc::clone(self);
        let (shutdown, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_secs = cache.refresh_interval.as_secs(),
                "Allow-list refresh task started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = cache.refresh().await {
                            warn!(
                                error = %e,
                                snapshot_age_secs = cache.snapshot_age().map(|a| a.as_secs()),
                                "Allow-list refresh failed, keeping last known good list"
                            );
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }

            debug!("Allow-list refresh task stopped");
        });

        RefreshHandle { shutdown, task }
    }
}

#[async_trait]
impl<S: MetaSource> AllowlistProvider for CachedAllowlist<S> {
    async fn resolve(&self) -> AllowlistResult<Arc<Allowlist>> {
        if let Some(list) = self.fresh_snapshot() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(list);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if let Some(list) = self.fresh_snapshot() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(list);
        }

        // Someone else attempted while we waited and it failed; share that
        // outcome instead of hitting the endpoint again.
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(err) = self.last_error() {
                return Err(self.unavailable(err));
            }
        }

        self.refresh().await.map_err(|e| self.unavailable(e))
    }

    fn static_ranges(&self) -> &[CidrRange] {
        self.resolver.static_ranges()
    }
}

/// Handle to the background refresh task.
#[derive(Debug)]
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Ask the task to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
