//! The client facade
//!
//! [`SessionManager`] ties the pool, endpoint selection, reverse connect and
//! the resilience policy together and exposes the trust manager of the
//! application it was built for.

pub mod attempt;
pub mod unpooled;

pub use attempt::AttemptState;
pub use unpooled::UnpooledSession;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use ualink_trust::{ApplicationIdentity, IdentityHandle, TrustManager};

use crate::builder::ClientBuilder;
use crate::error::{Result, SessionError};
use crate::model::{ConnectionKey, EndpointDescriptor, SessionOptions, UserIdentity};
use crate::pool::{SessionLease, SessionPool};
use crate::resilience::ResilientConnector;
use crate::reverse_connect::ReverseConnectWaiter;
use crate::transport::{SessionTransport, TransportContext};
use attempt::{ConnectRequest, establish};

/// Pooled, resilient sessions for one client application
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pub(crate) transport: Arc<dyn SessionTransport>,
    pub(crate) identity: IdentityHandle,
    pub(crate) trust: TrustManager,
    pub(crate) pool: SessionPool,
    pub(crate) connector: ResilientConnector,
    pub(crate) reverse: Option<Arc<ReverseConnectWaiter>>,
    pub(crate) stack_log_level: tracing::Level,
    pub(crate) reconnect_period: Duration,
    pub(crate) disposed: AtomicBool,
}

impl ManagerInner {
    pub(crate) fn transport_context(&self) -> TransportContext {
        TransportContext {
            identity: self.identity.load(),
            trust: self.trust.clone(),
            stack_log_level: self.stack_log_level,
            reconnect_period: self.reconnect_period,
        }
    }

    pub(crate) fn reverse_waiter(&self) -> Result<Arc<ReverseConnectWaiter>> {
        self.reverse.clone().ok_or_else(|| {
            SessionError::ReverseConnectUnavailable("reverse connect is not configured".to_string())
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(SessionError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("application_uri", &self.inner.identity.load().application_uri)
            .field("pool", &self.inner.pool)
            .field("connector", &self.inner.connector)
            .field("reverse_connect", &self.inner.reverse.is_some())
            .finish()
    }
}

impl SessionManager {
    /// Start configuring a client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_inner(inner: ManagerInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Lease the pooled session for `key`, connecting if needed
    pub async fn get_or_connect(&self, key: &ConnectionKey) -> Result<SessionLease> {
        self.inner.ensure_open()?;
        let inner = self.inner.clone();
        let request = ConnectRequest {
            endpoint: key.endpoint.clone(),
            options: key.options.clone(),
            user: key.user.clone(),
            reverse: key.use_reverse_connect,
        };
        self.inner
            .pool
            .get_or_connect(key, move || {
                let connector = inner.connector.clone();
                establish(inner, request, connector)
            })
            .await
    }

    /// Open a session the caller owns, bypassing the pool
    pub async fn connect(
        &self,
        endpoint: EndpointDescriptor,
        options: SessionOptions,
        user: UserIdentity,
        use_reverse_connect: bool,
    ) -> Result<UnpooledSession> {
        self.inner.ensure_open()?;
        let request = ConnectRequest {
            endpoint,
            options,
            user,
            reverse: use_reverse_connect,
        };
        let session = establish(self.inner.clone(), request, self.inner.connector.clone()).await?;
        Ok(UnpooledSession::new(session))
    }

    /// Check that `endpoint` accepts a session
    ///
    /// Runs once without the resilience policy, using short lived session
    /// options, and closes the session again. Every failure, including a
    /// panic inside the transport, comes back as an error value.
    pub async fn test(
        &self,
        endpoint: EndpointDescriptor,
        use_reverse_connect: bool,
    ) -> Result<()> {
        self.inner.ensure_open()?;
        let url = endpoint.url.clone();
        let request = ConnectRequest {
            endpoint,
            options: SessionOptions::connectivity_test(),
            user: UserIdentity::Anonymous,
            reverse: use_reverse_connect,
        };
        let inner = self.inner.clone();
        let probe = async move {
            let session = establish(inner, request, ResilientConnector::passthrough()).await?;
            if let Err(err) = session.close().await {
                tracing::warn!(
                    session = session.session_name(),
                    error = %err,
                    "Closing test session failed"
                );
            }
            Ok(())
        };

        match AssertUnwindSafe(probe).catch_unwind().await {
            Ok(result) => {
                tracing::info!(endpoint = %url, ok = result.is_ok(), "Connectivity test finished");
                result
            }
            Err(_) => {
                tracing::error!(endpoint = %url, "Connectivity test panicked");
                Err(SessionError::connect_failure(url, "connectivity test panicked"))
            }
        }
    }

    /// Certificate stores and trust operations
    pub fn certificates(&self) -> &TrustManager {
        &self.inner.trust
    }

    /// Current application identity
    pub fn identity(&self) -> Arc<ApplicationIdentity> {
        self.inner.identity.load()
    }

    /// Handle observing certificate rotation
    pub fn identity_handle(&self) -> &IdentityHandle {
        &self.inner.identity
    }

    /// The session pool
    pub fn pool(&self) -> &SessionPool {
        &self.inner.pool
    }

    /// Close every pooled session and refuse further requests
    ///
    /// Close failures are returned, not raised.
    pub async fn dispose(&self) -> Vec<SessionError> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        let errors = self.inner.pool.dispose_all().await;
        tracing::info!(close_failures = errors.len(), "Session manager disposed");
        errors
    }
}
