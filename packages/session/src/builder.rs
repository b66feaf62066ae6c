//! Fluent construction of a [`SessionManager`]

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use ualink_trust::{
    ApplicationConfigurator, CertificatePasswordProvider, CertificateStores, HostEnvironment,
    SecurityOptions, TransportQuotas,
};

use crate::config::ClientOptions;
use crate::error::{Result, SessionError};
use crate::manager::{ManagerInner, SessionManager};
use crate::pool::{PoolConfig, SessionPool};
use crate::resilience::{ResiliencePolicy, ResilientConnector};
use crate::reverse_connect::{ReverseConnectConfig, ReverseConnectWaiter};
use crate::transport::{ReverseConnectHost, SessionTransport};

/// Builder for [`SessionManager`]
///
/// Only the transport is mandatory. Everything else starts from
/// [`ClientOptions::default`].
#[derive(Default)]
pub struct ClientBuilder {
    options: ClientOptions,
    transport: Option<Arc<dyn SessionTransport>>,
    reverse_host: Option<Arc<dyn ReverseConnectHost>>,
    resilience: Option<Arc<dyn ResiliencePolicy>>,
    passwords: Option<Arc<dyn CertificatePasswordProvider>>,
    host_environment: Option<Arc<dyn HostEnvironment>>,
    stores: Option<CertificateStores>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("options", &self.options)
            .field("transport", &self.transport.is_some())
            .field("reverse_host", &self.reverse_host.is_some())
            .field("resilience", &self.resilience.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Builder with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all options
    #[must_use]
    pub fn options(self, options: ClientOptions) -> Self {
        Self { options, ..self }
    }

    /// Edit the options in place
    #[must_use]
    pub fn configure(mut self, edit: impl FnOnce(&mut ClientOptions)) -> Self {
        edit(&mut self.options);
        self
    }

    /// Application name
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.options.application.application_name = name.into();
        self
    }

    /// Application uri, `urn:localhost` is replaced by the host name
    #[must_use]
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.options.application.application_uri = uri.into();
        self
    }

    /// Product uri
    #[must_use]
    pub fn product_uri(mut self, uri: impl Into<String>) -> Self {
        self.options.application.product_uri = uri.into();
        self
    }

    /// Transport limits
    #[must_use]
    pub fn quotas(mut self, quotas: TransportQuotas) -> Self {
        self.options.application.quotas = quotas;
        self
    }

    /// Certificate store and validation settings
    #[must_use]
    pub fn security(mut self, security: SecurityOptions) -> Self {
        self.options.application.security = security;
        self
    }

    /// Interval between reconnects of a broken session
    #[must_use]
    pub fn reconnect_period(mut self, period: Duration) -> Self {
        self.options.reconnect_period = period;
        self
    }

    /// Verbosity requested from the stack
    #[must_use]
    pub fn stack_log_level(mut self, level: tracing::Level) -> Self {
        self.options.stack_log_level = level.to_string();
        self
    }

    /// Session pool settings
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.options.pool = pool;
        self
    }

    /// Accept server initiated connections through `host`
    #[must_use]
    pub fn reverse_connect(
        mut self,
        host: Arc<dyn ReverseConnectHost>,
        config: ReverseConnectConfig,
    ) -> Self {
        self.options.reverse_connect = Some(config);
        self.reverse_host = Some(host);
        self
    }

    /// Policy applied to every connect
    #[must_use]
    pub fn resilience(self, policy: Arc<dyn ResiliencePolicy>) -> Self {
        Self {
            resilience: Some(policy),
            ..self
        }
    }

    /// The OPC UA stack
    #[must_use]
    pub fn transport(self, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            transport: Some(transport),
            ..self
        }
    }

    /// Source of private key passwords
    #[must_use]
    pub fn password_provider(self, passwords: Arc<dyn CertificatePasswordProvider>) -> Self {
        Self {
            passwords: Some(passwords),
            ..self
        }
    }

    /// Network and host name source used during bootstrap
    #[must_use]
    pub fn host_environment(self, host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            host_environment: Some(host),
            ..self
        }
    }

    /// Use already opened certificate stores
    #[must_use]
    pub fn stores(self, stores: CertificateStores) -> Self {
        Self {
            stores: Some(stores),
            ..self
        }
    }

    /// Bootstrap the application identity and create the manager
    ///
    /// # Errors
    ///
    /// `Configuration` when no transport is set, the options are
    /// inconsistent or the identity cannot be established.
    pub async fn build(self) -> Result<SessionManager> {
        let Self {
            options,
            transport,
            reverse_host,
            resilience,
            passwords,
            host_environment,
            stores,
        } = self;

        let transport = transport.ok_or_else(|| {
            SessionError::Configuration("a session transport is required".to_string())
        })?;
        let stack_log_level = options.stack_log_level()?;

        let reverse = match (reverse_host, options.reverse_connect.clone()) {
            (Some(host), Some(config)) => Some(Arc::new(ReverseConnectWaiter::new(host, config))),
            (None, Some(_)) => {
                return Err(SessionError::Configuration(
                    "reverse connect is configured but no listener host was supplied".to_string(),
                ));
            }
            (_, None) => None,
        };

        let mut configurator = ApplicationConfigurator::new(options.application.clone());
        if let Some(passwords) = passwords {
            configurator = configurator.with_password_provider(passwords);
        }
        if let Some(host) = host_environment {
            configurator = configurator.with_host_environment(host);
        }
        if let Some(stores) = stores {
            configurator = configurator.with_stores(stores);
        }
        let configured = configurator.configure().await?;

        {
            let identity = configured.identity.load();
            tracing::info!(
                application = %identity.application_name,
                uri = %identity.application_uri,
                certificate = %identity.certificate.thumbprint(),
                pool_capacity = options.pool.capacity,
                reverse_connect = reverse.is_some(),
                resilience = resilience.is_some(),
                "Session manager ready"
            );
        }

        Ok(SessionManager::from_inner(ManagerInner {
            transport,
            identity: configured.identity,
            trust: configured.trust,
            pool: SessionPool::new(options.pool),
            connector: ResilientConnector::new(resilience),
            reverse,
            stack_log_level,
            reconnect_period: options.reconnect_period,
            disposed: AtomicBool::new(false),
        }))
    }
}
