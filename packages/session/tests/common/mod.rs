//! Fake stack used by the session integration tests

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use ualink_session::endpoint::SECURITY_POLICY_NAMESPACE;
use ualink_session::{
    ClientBuilder, EndpointDescription, InboundChannel, PoolConfig, ReverseConnectHost,
    SecurityMode, Session, SessionError, SessionManager, SessionOptions, SessionTransport,
    TransportContext, UserIdentity, WaitingConnection,
};
use ualink_trust::{ApplicationOptions, HostEnvironment, SecurityOptions};

pub const TCP_PROFILE: &str = "http://opcfoundation.org/UA-Profile/Transport/uatcp-uasc-uabinary";
pub const SERVER_URI: &str = "urn:test:server";

pub fn endpoint(url: &str, mode: SecurityMode, policy: &str, level: u8) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: url.to_string(),
        security_mode: mode,
        security_policy_uri: format!("{SECURITY_POLICY_NAMESPACE}{policy}"),
        security_level: level,
        transport_profile_uri: TCP_PROFILE.to_string(),
        server_certificate: Vec::new(),
        server_uri: SERVER_URI.to_string(),
    }
}

pub struct FakeSession {
    pub name: String,
    pub connected: AtomicBool,
    pub closes: AtomicUsize,
    pub fail_close: AtomicBool,
}

#[async_trait]
impl Session for FakeSession {
    fn session_name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> ualink_session::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            Err(SessionError::connect_failure(self.name.clone(), "close refused"))
        } else {
            Ok(())
        }
    }
}

/// Transport recording every call
pub struct FakeTransport {
    pub endpoints: Mutex<Vec<EndpointDescription>>,
    pub opens: AtomicUsize,
    pub discoveries: AtomicUsize,
    pub open_delay: Mutex<Duration>,
    /// Number of upcoming opens that fail with a connect failure
    pub failing_opens: AtomicUsize,
    /// Sessions come up disconnected
    pub open_disconnected: AtomicBool,
    pub panic_on_open: AtomicBool,
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
    pub opened_endpoints: Mutex<Vec<EndpointDescription>>,
    pub opened_options: Mutex<Vec<SessionOptions>>,
    pub reverse_opens: AtomicUsize,
}

impl FakeTransport {
    pub fn new(endpoints: Vec<EndpointDescription>) -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(endpoints),
            opens: AtomicUsize::new(0),
            discoveries: AtomicUsize::new(0),
            open_delay: Mutex::new(Duration::ZERO),
            failing_opens: AtomicUsize::new(0),
            open_disconnected: AtomicBool::new(false),
            panic_on_open: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
            opened_endpoints: Mutex::new(Vec::new()),
            opened_options: Mutex::new(Vec::new()),
            reverse_opens: AtomicUsize::new(0),
        })
    }

    /// One unsecured endpoint at `url`
    pub fn plain(url: &str) -> Arc<Self> {
        Self::new(vec![endpoint(url, SecurityMode::None, "None", 0)])
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.open_delay.lock().expect("lock") = delay;
        self
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().expect("lock").clone()
    }

    pub fn opened(&self) -> Vec<EndpointDescription> {
        self.opened_endpoints.lock().expect("lock").clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn discover(
        &self,
        _context: &TransportContext,
        _url: &str,
        _reverse: Option<&WaitingConnection>,
    ) -> ualink_session::Result<Vec<EndpointDescription>> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        Ok(self.endpoints.lock().expect("lock").clone())
    }

    async fn open(
        &self,
        _context: &TransportContext,
        endpoint: &EndpointDescription,
        options: &SessionOptions,
        _user: &UserIdentity,
        reverse: Option<WaitingConnection>,
    ) -> ualink_session::Result<Arc<dyn Session>> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        if reverse.is_some() {
            self.reverse_opens.fetch_add(1, Ordering::SeqCst);
        }
        if self.panic_on_open.load(Ordering::SeqCst) {
            panic!("stack bug");
        }
        let delay = *self.open_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(SessionError::connect_failure(
                endpoint.endpoint_url.clone(),
                "connection refused",
            ));
        }

        self.opened_endpoints
            .lock()
            .expect("lock")
            .push(endpoint.clone());
        self.opened_options.lock().expect("lock").push(options.clone());
        let session = Arc::new(FakeSession {
            name: format!("session-{n}"),
            connected: AtomicBool::new(!self.open_disconnected.load(Ordering::SeqCst)),
            closes: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
        });
        self.sessions.lock().expect("lock").push(session.clone());
        Ok(session)
    }
}

#[derive(Default)]
pub struct FakeChannel {
    pub rejected: AtomicBool,
}

impl InboundChannel for FakeChannel {
    fn reject(&self) {
        self.rejected.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reverse connect host whose connections are injected by the test
#[derive(Default)]
pub struct FakeReverseHost {
    pub sink: Mutex<Option<mpsc::Sender<WaitingConnection>>>,
    pub starts: AtomicUsize,
    pub fail_start: AtomicBool,
}

impl FakeReverseHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let host = Self::default();
        host.fail_start.store(true, Ordering::SeqCst);
        Arc::new(host)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Simulate a server dialing in
    pub async fn dial(&self, endpoint_url: &str, server_uri: &str) -> Arc<FakeChannel> {
        let channel = Arc::new(FakeChannel::default());
        let sink = self.sink.lock().expect("lock").clone().expect("listener started");
        sink.send(WaitingConnection {
            endpoint_url: endpoint_url.to_string(),
            server_uri: server_uri.to_string(),
            channel: channel.clone(),
        })
        .await
        .expect("dispatcher running");
        channel
    }

    /// Wait until the listener was started
    pub async fn started(&self) {
        for _ in 0..200 {
            if self.sink.lock().expect("lock").is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("listener never started");
    }
}

#[async_trait]
impl ReverseConnectHost for FakeReverseHost {
    async fn start(
        &self,
        _listen_urls: &[String],
        sink: mpsc::Sender<WaitingConnection>,
    ) -> ualink_session::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SessionError::Configuration("port in use".to_string()));
        }
        *self.sink.lock().expect("lock") = Some(sink);
        Ok(())
    }
}

pub struct OnlineHost;

#[async_trait]
impl HostEnvironment for OnlineHost {
    async fn is_network_available(&self) -> bool {
        true
    }

    fn host_name(&self) -> ualink_trust::Result<String> {
        Ok("test-client".to_string())
    }
}

/// Builder with in-memory stores and an online fake host
pub fn builder(transport: Arc<FakeTransport>) -> ClientBuilder {
    SessionManager::builder()
        .configure(|options| {
            options.application = ApplicationOptions {
                security: SecurityOptions::in_memory(),
                configuration_attempts: 2,
                configuration_retry_delay: Duration::from_millis(5),
                network_poll_interval: Duration::from_millis(5),
                ..ApplicationOptions::default()
            };
        })
        .host_environment(Arc::new(OnlineHost))
        .pool(PoolConfig::with_capacity(8).with_idle_timeout(Duration::ZERO))
        .transport(transport)
}

pub async fn manager(transport: Arc<FakeTransport>) -> SessionManager {
    builder(transport).build().await.expect("manager builds")
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
