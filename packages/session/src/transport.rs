//! Seams to the OPC UA stack
//!
//! The wire encoding, channel framing and discovery round trip live behind
//! these traits. A [`SessionTransport`] opens sessions and runs discovery, a
//! [`ReverseConnectHost`] accepts server initiated connections.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use ualink_trust::{ApplicationIdentity, TrustManager};

use crate::error::Result;
use crate::model::{EndpointDescription, SessionOptions, UserIdentity};

/// Everything the stack needs from the client runtime for one attempt
#[derive(Clone)]
pub struct TransportContext {
    /// Identity snapshot taken when the attempt started
    pub identity: Arc<ApplicationIdentity>,
    /// Certificate stores used to validate server certificates
    pub trust: TrustManager,
    /// Verbosity requested for the stack's own logging
    pub stack_log_level: tracing::Level,
    /// Interval between automatic reconnects of an established session
    pub reconnect_period: Duration,
}

impl fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportContext")
            .field("application_uri", &self.identity.application_uri)
            .field("stack_log_level", &self.stack_log_level)
            .field("reconnect_period", &self.reconnect_period)
            .finish_non_exhaustive()
    }
}

/// An open session
#[async_trait]
pub trait Session: Send + Sync {
    /// Name the session was created with
    fn session_name(&self) -> &str;

    /// Whether the underlying channel is still usable
    fn is_connected(&self) -> bool;

    /// Close the session and its channel
    async fn close(&self) -> Result<()>;
}

/// Server side of a connection accepted by the reverse connect listener
pub trait InboundChannel: Send + Sync {
    /// Refuse the connection
    fn reject(&self);

    /// Downcast hook for transports that need their concrete channel back
    fn as_any(&self) -> &dyn Any;
}

/// A server initiated connection waiting to be used
#[derive(Clone)]
pub struct WaitingConnection {
    /// Endpoint url announced by the server
    pub endpoint_url: String,
    /// Application uri announced by the server
    pub server_uri: String,
    /// The accepted channel
    pub channel: Arc<dyn InboundChannel>,
}

impl fmt::Debug for WaitingConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingConnection")
            .field("endpoint_url", &self.endpoint_url)
            .field("server_uri", &self.server_uri)
            .finish_non_exhaustive()
    }
}

/// Opens sessions and runs discovery
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Fetch the endpoints offered at `url`
    ///
    /// With a reverse connection the request travels over that channel.
    async fn discover(
        &self,
        context: &TransportContext,
        url: &str,
        reverse: Option<&WaitingConnection>,
    ) -> Result<Vec<EndpointDescription>>;

    /// Create and activate a session on `endpoint`
    async fn open(
        &self,
        context: &TransportContext,
        endpoint: &EndpointDescription,
        options: &SessionOptions,
        user: &UserIdentity,
        reverse: Option<WaitingConnection>,
    ) -> Result<Arc<dyn Session>>;
}

/// Listener for server initiated connections
#[async_trait]
pub trait ReverseConnectHost: Send + Sync {
    /// Bind `listen_urls` and forward every accepted connection to `sink`
    async fn start(
        &self,
        listen_urls: &[String],
        sink: mpsc::Sender<WaitingConnection>,
    ) -> Result<()>;
}
