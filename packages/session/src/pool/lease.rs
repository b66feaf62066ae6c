//! Temporary use of a pooled session

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::entry::PoolEntry;
use crate::model::ConnectionKey;
use crate::transport::Session;

/// Borrowed use of a pooled session
///
/// Dropping the lease hands the session back to the pool. It stays open
/// until the pool evicts or disposes it.
pub struct SessionLease {
    entry: Arc<PoolEntry>,
}

impl SessionLease {
    pub(crate) fn new(entry: Arc<PoolEntry>) -> Self {
        Self { entry }
    }

    /// The shared session
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.entry.session
    }

    /// Key the session is pooled under
    pub fn key(&self) -> &ConnectionKey {
        &self.entry.key
    }

    /// Whether two leases share one session
    pub fn same_session(&self, other: &SessionLease) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Deref for SessionLease {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.entry.session.as_ref()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.entry.release();
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("key", &self.entry.key)
            .field("session", &self.entry.session.session_name())
            .field("leases", &self.entry.leases())
            .finish()
    }
}
