//! Session pool
//!
//! Sessions are shared by [`ConnectionKey`]. Concurrent requests for a key
//! that is not pooled yet share one connect attempt. The pool is bounded;
//! when full, the least frequently used session is closed, preferring
//! sessions nobody currently leases. Unleased sessions idle past the
//! configured timeout are closed by a background sweep.

pub mod config;
mod entry;
pub mod lease;
pub mod metrics;

pub use config::PoolConfig;
pub use lease::SessionLease;
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, WeakShared};
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::error::{Result, SessionError};
use crate::model::ConnectionKey;
use crate::transport::Session;
use entry::PoolEntry;

type ConnectAttempt = BoxFuture<'static, Result<Arc<PoolEntry>>>;
type PendingAttempts = HashMap<ConnectionKey, (u64, WeakShared<ConnectAttempt>)>;

/// Pool of shared sessions
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    entries: DashMap<ConnectionKey, Arc<PoolEntry>>,
    /// Connects in flight, one per key
    pending: Mutex<PendingAttempts>,
    /// Serializes the capacity check with the insert
    insert_lock: Mutex<()>,
    epoch: Instant,
    next_attempt: AtomicU64,
    disposed: AtomicBool,
    running: AtomicBool,
    metrics: Arc<PoolMetrics>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.inner.config)
            .field("len", &self.inner.entries.len())
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum EvictionReason {
    Capacity,
    Disconnected,
    Idle,
    Replaced,
}

impl EvictionReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Disconnected => "disconnected",
            Self::Idle => "idle",
            Self::Replaced => "replaced",
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionPool {
    /// Create a pool
    ///
    /// When called inside a tokio runtime and idle eviction is enabled, the
    /// background sweep starts right away. It stops once the pool is
    /// disposed or dropped.
    pub fn new(config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            config,
            entries: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            insert_lock: Mutex::new(()),
            epoch: Instant::now(),
            next_attempt: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            running: AtomicBool::new(true),
            metrics: Arc::new(PoolMetrics::default()),
        });
        if inner.config.idle_eviction_enabled() {
            match Handle::try_current() {
                Ok(handle) => start_maintenance(&handle, &inner),
                Err(_) => tracing::debug!("No runtime, idle sweep runs only on demand"),
            }
        }
        Self { inner }
    }

    /// Lease the session for `key`, connecting if needed
    ///
    /// `connect` runs only when no live session is pooled and no connect for
    /// `key` is in flight. Every concurrent caller receives the outcome of
    /// that one connect. A failed connect is forgotten, so the next call
    /// tries again.
    pub async fn get_or_connect<F, Fut>(
        &self,
        key: &ConnectionKey,
        connect: F,
    ) -> Result<SessionLease>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Arc<dyn Session>>> + Send + 'static,
    {
        let mut connect = Some(connect);
        loop {
            self.inner.ensure_open()?;
            if let Some(lease) = self.inner.lookup(key) {
                return Ok(lease);
            }

            let attempt = {
                let mut pending = lock(&self.inner.pending);
                let joined = pending.get(key).and_then(|(_, weak)| weak.upgrade());
                match joined {
                    Some(attempt) => {
                        PoolMetrics::incr(&self.inner.metrics.joined);
                        attempt
                    }
                    None => {
                        // A connect may have finished since the lookup above
                        if let Some(lease) = self.inner.lookup(key) {
                            return Ok(lease);
                        }
                        let Some(connect) = connect.take() else {
                            // Our own earlier attempt produced an entry that was evicted
                            // before we could lease it
                            return Err(SessionError::connect_failure(
                                key.endpoint.url.clone(),
                                "session evicted before it could be leased",
                            ));
                        };
                        PoolMetrics::incr(&self.inner.metrics.misses);
                        let id = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
                        let attempt =
                            connect_attempt(self.inner.clone(), key.clone(), id, connect())
                                .shared();
                        if let Some(weak) = attempt.downgrade() {
                            pending.insert(key.clone(), (id, weak));
                        }
                        attempt
                    }
                }
            };

            let entry = attempt.await?;
            entry.acquire();
            if entry.is_evicted() {
                entry.release();
                continue;
            }
            return Ok(SessionLease::new(entry));
        }
    }

    /// Close unleased sessions idle past the timeout, returning how many
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle()
    }

    /// Close every session and refuse further requests
    ///
    /// Close failures are collected, not raised.
    pub async fn dispose_all(&self) -> Vec<SessionError> {
        self.inner.disposed.store(true, Ordering::Release);
        self.inner.running.store(false, Ordering::Release);
        lock(&self.inner.pending).clear();

        let keys: Vec<ConnectionKey> =
            self.inner.entries.iter().map(|e| e.key().clone()).collect();
        let mut errors = Vec::new();
        for key in keys {
            let Some((_, entry)) = self.inner.entries.remove(&key) else {
                continue;
            };
            if !entry.mark_evicted() {
                continue;
            }
            if let Err(err) = entry.session.close().await {
                PoolMetrics::incr(&self.inner.metrics.close_failures);
                tracing::warn!(key = %key, error = %err, "Closing pooled session failed");
                errors.push(SessionError::Close {
                    session: entry.session.session_name().to_string(),
                    message: err.to_string(),
                });
            }
        }
        tracing::info!(failures = errors.len(), "Session pool disposed");
        errors
    }

    /// Number of pooled sessions
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether the pool holds no sessions
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Whether [`dispose_all`](Self::dispose_all) ran
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Pool settings
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Pool counters
    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }
}

/// The shared future every caller for one key awaits
fn connect_attempt<Fut>(
    inner: Arc<PoolInner>,
    key: ConnectionKey,
    id: u64,
    connect: Fut,
) -> ConnectAttempt
where
    Fut: Future<Output = Result<Arc<dyn Session>>> + Send + 'static,
{
    async move {
        match connect.await {
            Ok(session) => {
                PoolMetrics::incr(&inner.metrics.connects);
                inner.insert(key, id, session)
            }
            Err(err) => {
                forget_attempt(&mut lock(&inner.pending), &key, id);
                PoolMetrics::incr(&inner.metrics.connect_failures);
                tracing::warn!(key = %key, error = %err, "Pooled connect failed");
                Err(err)
            }
        }
    }
    .boxed()
}

/// Drop the pending record of attempt `id`, leaving a newer attempt alone
fn forget_attempt(pending: &mut PendingAttempts, key: &ConnectionKey, id: u64) {
    if pending.get(key).is_some_and(|(pending_id, _)| *pending_id == id) {
        pending.remove(key);
    }
}

fn start_maintenance(handle: &Handle, inner: &Arc<PoolInner>) {
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    let period = inner.config.maintenance_interval.max(std::time::Duration::from_millis(10));
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if !inner.running.load(Ordering::Acquire) {
                break;
            }
            let evicted = inner.evict_idle();
            if evicted > 0 {
                tracing::debug!(evicted, remaining = inner.entries.len(), "Idle sweep finished");
            }
        }
        tracing::debug!("Session pool maintenance stopped");
    });
}

impl PoolInner {
    fn ensure_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(SessionError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Lease a live pooled session, dropping a disconnected one
    fn lookup(&self, key: &ConnectionKey) -> Option<SessionLease> {
        let entry = self.entries.get(key).map(|entry| entry.value().clone())?;
        if !entry.session.is_connected() {
            tracing::info!(key = %key, "Pooled session disconnected, reconnecting");
            self.remove(&entry, EvictionReason::Disconnected);
            return None;
        }
        entry.acquire();
        if entry.is_evicted() {
            entry.release();
            return None;
        }
        PoolMetrics::incr(&self.metrics.hits);
        Some(SessionLease::new(entry))
    }

    /// Pool the session produced by attempt `id`
    ///
    /// The entry is visible in `entries` before the attempt leaves
    /// `pending`, so no caller can find neither and connect again.
    fn insert(
        &self,
        key: ConnectionKey,
        id: u64,
        session: Arc<dyn Session>,
    ) -> Result<Arc<PoolEntry>> {
        let entry = Arc::new(PoolEntry::new(key.clone(), session, self.epoch));
        let _guard = lock(&self.insert_lock);
        if self.disposed.load(Ordering::Acquire) {
            forget_attempt(&mut lock(&self.pending), &key, id);
            entry.mark_evicted();
            spawn_close(entry.session.clone(), key, EvictionReason::Replaced, &self.metrics);
            return Err(SessionError::Disposed);
        }

        let previous = self.entries.get(&key).map(|e| e.value().clone());
        if let Some(previous) = previous {
            self.remove(&previous, EvictionReason::Replaced);
        }
        while self.entries.len() >= self.config.effective_capacity() {
            let Some(victim) = self.lfu_victim() else {
                break;
            };
            self.remove(&victim, EvictionReason::Capacity);
        }
        {
            let mut pending = lock(&self.pending);
            self.entries.insert(key.clone(), entry.clone());
            forget_attempt(&mut pending, &key, id);
        }
        tracing::debug!(
            key = %key,
            session = entry.session.session_name(),
            pooled = self.entries.len(),
            "Session pooled"
        );
        Ok(entry)
    }

    /// Least frequently used entry, unleased first, oldest use breaks ties
    fn lfu_victim(&self) -> Option<Arc<PoolEntry>> {
        self.entries
            .iter()
            .map(|e| e.value().clone())
            .min_by_key(|entry| (entry.leases() > 0, entry.access_count(), entry.last_used_ms()))
    }

    /// Remove `entry` if it is still pooled and close it
    fn remove(&self, entry: &Arc<PoolEntry>, reason: EvictionReason) {
        let removed = self
            .entries
            .remove_if(&entry.key, |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        if !removed || !entry.mark_evicted() {
            return;
        }
        match reason {
            EvictionReason::Idle => PoolMetrics::incr(&self.metrics.idle_evictions),
            _ => PoolMetrics::incr(&self.metrics.evictions),
        }
        tracing::info!(
            key = %entry.key,
            session = entry.session.session_name(),
            reason = reason.as_str(),
            leases = entry.leases(),
            uses = entry.access_count(),
            "Evicting pooled session"
        );
        spawn_close(entry.session.clone(), entry.key.clone(), reason, &self.metrics);
    }

    fn evict_idle(&self) -> usize {
        if !self.config.idle_eviction_enabled() {
            return 0;
        }
        let timeout_ms = self.config.idle_timeout.as_millis() as u64;
        let idle: Vec<Arc<PoolEntry>> = self
            .entries
            .iter()
            .filter(|e| e.leases() == 0 && e.idle_ms() >= timeout_ms)
            .map(|e| e.value().clone())
            .collect();
        let mut evicted = 0;
        for entry in idle {
            // Leased again since the scan
            if entry.leases() > 0 {
                continue;
            }
            if !entry.is_evicted() {
                self.remove(&entry, EvictionReason::Idle);
                evicted += 1;
            }
        }
        evicted
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        for entry in self.entries.iter() {
            if entry.mark_evicted() {
                spawn_close(
                    entry.session.clone(),
                    entry.key.clone(),
                    EvictionReason::Replaced,
                    &self.metrics,
                );
            }
        }
    }
}

/// Close `session` in the background, logging failures
fn spawn_close(
    session: Arc<dyn Session>,
    key: ConnectionKey,
    reason: EvictionReason,
    metrics: &Arc<PoolMetrics>,
) {
    let metrics = metrics.clone();
    let close = async move {
        match session.close().await {
            Ok(()) => {
                tracing::debug!(key = %key, reason = reason.as_str(), "Evicted session closed");
            }
            Err(err) => {
                PoolMetrics::incr(&metrics.close_failures);
                tracing::warn!(
                    key = %key,
                    reason = reason.as_str(),
                    error = %err,
                    "Closing evicted session failed"
                );
            }
        }
    };
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(close);
        }
        Err(_) => futures::executor::block_on(close),
    }
}
