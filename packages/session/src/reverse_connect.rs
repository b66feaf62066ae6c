//! Reverse connect coordination
//!
//! Servers behind firewalls dial the client instead of being dialed. The
//! [`ReverseConnectWaiter`] starts one listener on first use, hands every
//! inbound connection to the request waiting for it and holds unclaimed
//! connections for a while in case a matching request shows up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, mpsc, oneshot};
use tokio::time::Instant;
use ualink_trust::options::duration_ms;
use url::Url;

use crate::error::{Result, SessionError};
use crate::transport::{ReverseConnectHost, WaitingConnection};

/// Capacity of the channel between the host and the dispatcher
const INBOUND_QUEUE: usize = 64;

/// Reverse connect listener settings, fixed once the listener starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReverseConnectConfig {
    /// Urls the listener binds
    pub listen_urls: Vec<String>,
    /// How long a request waits for its server
    #[serde(with = "duration_ms")]
    pub wait_timeout: Duration,
    /// How long an unclaimed inbound connection is kept
    #[serde(with = "duration_ms")]
    pub hold_time: Duration,
}

impl Default for ReverseConnectConfig {
    fn default() -> Self {
        Self {
            listen_urls: vec!["opc.tcp://localhost:65300".to_string()],
            wait_timeout: Duration::from_secs(20),
            hold_time: Duration::from_secs(15),
        }
    }
}

/// What a waiting request will accept
#[derive(Debug, Clone)]
struct Target {
    scheme: String,
    host: Option<String>,
    port: Option<u16>,
    server_uri: Option<String>,
}

impl Target {
    fn new(endpoint_url: &str, server_uri: Option<&str>) -> Result<Self> {
        let url = Url::parse(endpoint_url)?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str().map(str::to_ascii_lowercase),
            port: url.port_or_known_default(),
            server_uri: server_uri.filter(|uri| !uri.is_empty()).map(str::to_string),
        })
    }

    /// Same scheme, and either the same server or the same authority
    fn accepts(&self, connection: &WaitingConnection) -> bool {
        let Ok(url) = Url::parse(&connection.endpoint_url) else {
            return false;
        };
        if url.scheme() != self.scheme {
            return false;
        }
        let same_server = self
            .server_uri
            .as_deref()
            .is_some_and(|uri| uri == connection.server_uri);
        let same_authority = self.host.is_some()
            && url.host_str().map(str::to_ascii_lowercase) == self.host
            && url.port_or_known_default() == self.port;
        same_server || same_authority
    }
}

struct Registration {
    id: u64,
    target: Target,
    tx: oneshot::Sender<WaitingConnection>,
}

struct Held {
    connection: WaitingConnection,
    arrived: Instant,
}

#[derive(Default)]
struct ListenerState {
    waiting: Vec<Registration>,
    held: Vec<Held>,
}

/// Matching state shared by requests and the dispatcher task
struct Listener {
    state: Mutex<ListenerState>,
    next_id: AtomicU64,
    hold_time: Duration,
}

impl Listener {
    fn new(hold_time: Duration) -> Self {
        Self {
            state: Mutex::new(ListenerState::default()),
            next_id: AtomicU64::new(1),
            hold_time,
        }
    }

    fn state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand an inbound connection to a waiting request or hold it
    fn offer(&self, mut connection: WaitingConnection) {
        let mut state = self.state();
        while let Some(index) = state
            .waiting
            .iter()
            .position(|registration| registration.target.accepts(&connection))
        {
            let registration = state.waiting.swap_remove(index);
            match registration.tx.send(connection) {
                Ok(()) => {
                    tracing::debug!(id = registration.id, "Reverse connection handed to request");
                    return;
                }
                // Request gave up in the meantime
                Err(returned) => connection = returned,
            }
        }
        tracing::debug!(
            endpoint = %connection.endpoint_url,
            server_uri = %connection.server_uri,
            "Holding unclaimed reverse connection"
        );
        state.held.push(Held {
            connection,
            arrived: Instant::now(),
        });
    }

    /// Claim a held connection or register for the next matching one
    fn register(
        &self,
        target: Target,
    ) -> std::result::Result<WaitingConnection, (u64, oneshot::Receiver<WaitingConnection>)> {
        let mut state = self.state();
        if let Some(index) = state
            .held
            .iter()
            .position(|held| target.accepts(&held.connection))
        {
            return Ok(state.held.remove(index).connection);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        state.waiting.push(Registration { id, target, tx });
        Err((id, rx))
    }

    fn unregister(&self, id: u64) {
        self.state().waiting.retain(|registration| registration.id != id);
    }

    /// Reject held connections older than the hold time
    fn expire(&self) {
        let now = Instant::now();
        let expired: Vec<Held> = {
            let mut state = self.state();
            let (expired, kept): (Vec<Held>, Vec<Held>) = std::mem::take(&mut state.held)
                .into_iter()
                .partition(|held| now.duration_since(held.arrived) >= self.hold_time);
            state.held = kept;
            expired
        };
        for held in expired {
            tracing::warn!(
                endpoint = %held.connection.endpoint_url,
                server_uri = %held.connection.server_uri,
                "Rejecting reverse connection nobody claimed"
            );
            held.connection.channel.reject();
        }
    }

    fn reject_all(&self) {
        let held = std::mem::take(&mut self.state().held);
        for held in held {
            held.connection.channel.reject();
        }
    }
}

/// A request's slot in the waiting list
///
/// Dropping it unregisters the request. A connection handed over but never
/// received goes back to the listener.
struct Registered<'a> {
    listener: &'a Listener,
    id: u64,
    rx: oneshot::Receiver<WaitingConnection>,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.listener.unregister(self.id);
        if let Ok(connection) = self.rx.try_recv() {
            self.listener.offer(connection);
        }
    }
}

async fn dispatch(
    listener: Weak<Listener>,
    mut inbound: mpsc::Receiver<WaitingConnection>,
    hold_time: Duration,
) {
    let period = (hold_time / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            received = inbound.recv() => {
                let Some(connection) = received else {
                    tracing::debug!("Reverse connect host closed its channel");
                    break;
                };
                let Some(listener) = listener.upgrade() else {
                    connection.channel.reject();
                    break;
                };
                listener.offer(connection);
            }
            _ = interval.tick() => {
                let Some(listener) = listener.upgrade() else {
                    break;
                };
                listener.expire();
            }
        }
    }
}

/// Waits for servers to connect back
///
/// One listener per waiter. The listener starts on the first request; a
/// failed start is remembered and returned to every later request.
pub struct ReverseConnectWaiter {
    host: Arc<dyn ReverseConnectHost>,
    config: ReverseConnectConfig,
    listener: OnceCell<std::result::Result<Arc<Listener>, SessionError>>,
}

impl std::fmt::Debug for ReverseConnectWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseConnectWaiter")
            .field("config", &self.config)
            .field("started", &self.listener.initialized())
            .finish_non_exhaustive()
    }
}

impl ReverseConnectWaiter {
    /// Waiter using `host` to accept connections
    pub fn new(host: Arc<dyn ReverseConnectHost>, config: ReverseConnectConfig) -> Self {
        Self {
            host,
            config,
            listener: OnceCell::new(),
        }
    }

    /// Settings in effect
    pub fn config(&self) -> &ReverseConnectConfig {
        &self.config
    }

    /// Wait for the server behind `endpoint_url` to connect
    ///
    /// A connection matches when it uses the same scheme and either announces
    /// `server_uri` or comes from the same host and port.
    pub async fn wait_for_connection(
        &self,
        endpoint_url: &str,
        server_uri: Option<&str>,
    ) -> Result<WaitingConnection> {
        let target = Target::new(endpoint_url, server_uri)?;
        let listener = self.listener().await?;

        let (id, rx) = match listener.register(target) {
            Ok(connection) => {
                tracing::debug!(endpoint = endpoint_url, "Using held reverse connection");
                return Ok(connection);
            }
            Err(registration) => registration,
        };
        // Unregisters when this future is dropped before a connection arrives
        let mut registration = Registered {
            listener: &listener,
            id,
            rx,
        };

        match tokio::time::timeout(self.config.wait_timeout, &mut registration.rx).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(_)) => Err(SessionError::ReverseConnectUnavailable(
                "listener stopped while waiting".to_string(),
            )),
            Err(_) => {
                listener.unregister(id);
                // Delivered between the deadline and unregistering
                if let Ok(connection) = registration.rx.try_recv() {
                    return Ok(connection);
                }
                tracing::warn!(
                    endpoint = endpoint_url,
                    timeout_ms = self.config.wait_timeout.as_millis() as u64,
                    "No reverse connection arrived"
                );
                Err(SessionError::Timeout(format!(
                    "waiting for reverse connection from {endpoint_url}"
                )))
            }
        }
    }

    async fn listener(&self) -> Result<Arc<Listener>> {
        self.listener
            .get_or_init(|| self.start())
            .await
            .clone()
    }

    async fn start(&self) -> std::result::Result<Arc<Listener>, SessionError> {
        if self.config.listen_urls.is_empty() {
            return Err(SessionError::ReverseConnectUnavailable(
                "no listen urls configured".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        if let Err(err) = self.host.start(&self.config.listen_urls, tx).await {
            tracing::error!(
                urls = ?self.config.listen_urls,
                error = %err,
                "Reverse connect listener failed to start"
            );
            return Err(SessionError::ReverseConnectUnavailable(err.to_string()));
        }

        let listener = Arc::new(Listener::new(self.config.hold_time));
        tokio::spawn(dispatch(Arc::downgrade(&listener), rx, self.config.hold_time));
        tracing::info!(urls = ?self.config.listen_urls, "Reverse connect listener started");
        Ok(listener)
    }
}

impl Drop for ReverseConnectWaiter {
    fn drop(&mut self) {
        if let Some(Ok(listener)) = self.listener.get() {
            listener.reject_all();
        }
    }
}
