//! Sessions owned by one caller

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::error::Result;
use crate::transport::Session;

/// A session outside the pool
///
/// Closed by [`close`](Self::close), or in the background when dropped.
pub struct UnpooledSession {
    session: Arc<dyn Session>,
    closed: bool,
}

impl UnpooledSession {
    pub(crate) fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Close the session now
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.session.close().await
    }
}

impl Deref for UnpooledSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for UnpooledSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let session = self.session.clone();
        let close = async move {
            if let Err(err) = session.close().await {
                tracing::warn!(
                    session = session.session_name(),
                    error = %err,
                    "Closing dropped session failed"
                );
            }
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close);
            }
            Err(_) => futures::executor::block_on(close),
        }
    }
}

impl fmt::Debug for UnpooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnpooledSession")
            .field("session", &self.session.session_name())
            .field("closed", &self.closed)
            .finish()
    }
}
