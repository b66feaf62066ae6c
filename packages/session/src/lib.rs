//! Pooled, resilient OPC UA client sessions
//!
//! The [`SessionManager`] is the entry point. It is built with
//! [`SessionManager::builder`], which bootstraps the application identity
//! through `ualink_trust` and wires up:
//!
//! - [`pool`]: sessions shared by [`ConnectionKey`], single connect per key,
//!   LFU and idle eviction
//! - [`endpoint`]: choosing the strongest matching endpoint from discovery
//! - [`reverse_connect`]: waiting for servers that dial in
//! - [`resilience`]: retry policies around connects
//!
//! The OPC UA stack itself is plugged in through the [`transport`] traits.

pub mod builder;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod manager;
pub mod model;
pub mod pool;
pub mod resilience;
pub mod reverse_connect;
pub mod transport;

pub use builder::ClientBuilder;
pub use config::ClientOptions;
pub use endpoint::select_endpoint;
pub use error::{Result, SessionError};
pub use manager::{AttemptState, SessionManager, UnpooledSession};
pub use model::{
    ConnectionKey, EndpointDescription, EndpointDescriptor, SecurityMode, SessionOptions,
    UserIdentity,
};
pub use pool::{PoolConfig, PoolMetricsSnapshot, SessionLease, SessionPool};
pub use resilience::{ResilienceContext, ResiliencePolicy, ResilientConnector, RetryPolicy};
pub use reverse_connect::{ReverseConnectConfig, ReverseConnectWaiter};
pub use transport::{
    InboundChannel, ReverseConnectHost, Session, SessionTransport, TransportContext,
    WaitingConnection,
};
