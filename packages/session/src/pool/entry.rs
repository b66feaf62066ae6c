//! Pooled session bookkeeping

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::time::Instant;

use crate::model::ConnectionKey;
use crate::transport::Session;

/// A pooled session with its lease count and usage statistics
pub(crate) struct PoolEntry {
    pub(crate) key: ConnectionKey,
    pub(crate) session: Arc<dyn Session>,
    epoch: Instant,
    leases: AtomicUsize,
    access_count: AtomicU64,
    last_used_ms: AtomicU64,
    evicted: AtomicBool,
}

impl PoolEntry {
    pub(crate) fn new(key: ConnectionKey, session: Arc<dyn Session>, epoch: Instant) -> Self {
        let entry = Self {
            key,
            session,
            epoch,
            leases: AtomicUsize::new(0),
            access_count: AtomicU64::new(0),
            last_used_ms: AtomicU64::new(0),
            evicted: AtomicBool::new(false),
        };
        entry.touch();
        entry
    }

    fn now_ms(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_millis() as u64
    }

    fn touch(&self) {
        self.last_used_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn acquire(&self) {
        self.leases.fetch_add(1, Ordering::AcqRel);
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn release(&self) {
        let _ = self
            .leases
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.touch();
    }

    pub(crate) fn leases(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }

    pub(crate) fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub(crate) fn last_used_ms(&self) -> u64 {
        self.last_used_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn idle_ms(&self) -> u64 {
        self.now_ms().saturating_sub(self.last_used_ms())
    }

    /// Mark removed; true only for the first caller
    pub(crate) fn mark_evicted(&self) -> bool {
        !self.evicted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }
}
