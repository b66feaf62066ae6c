//! Endpoint, identity and session option types

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ualink_trust::options::duration_ms;

/// Message security mode of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityMode {
    /// No security
    None,
    /// Messages are signed
    Sign,
    /// Messages are signed and encrypted
    SignAndEncrypt,
}

impl SecurityMode {
    /// Rank used for endpoint ordering, higher is stronger
    #[must_use]
    pub fn ordinal(self) -> u32 {
        match self {
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An endpoint as returned by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescription {
    /// Endpoint url
    pub endpoint_url: String,
    /// Security mode
    pub security_mode: SecurityMode,
    /// Full security policy uri
    pub security_policy_uri: String,
    /// Server assigned relative security level
    pub security_level: u8,
    /// Transport profile uri
    pub transport_profile_uri: String,
    /// DER encoded server certificate
    #[serde(default)]
    pub server_certificate: Vec<u8>,
    /// Application uri of the server
    #[serde(default)]
    pub server_uri: String,
}

/// What the caller wants to connect to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Endpoint url
    pub url: String,
    /// Required security mode, any when `None`
    pub security_mode: Option<SecurityMode>,
    /// Required security policy, full uri or short name
    pub security_policy: Option<String>,
    /// Required transport profile uri
    pub transport_profile_uri: Option<String>,
}

impl EndpointDescriptor {
    /// Descriptor accepting any security
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            security_mode: None,
            security_policy: None,
            transport_profile_uri: None,
        }
    }

    /// Require a security mode
    #[must_use]
    pub fn with_security_mode(self, mode: SecurityMode) -> Self {
        Self {
            security_mode: Some(mode),
            ..self
        }
    }

    /// Require a security policy
    #[must_use]
    pub fn with_security_policy(self, policy: impl Into<String>) -> Self {
        Self {
            security_policy: Some(policy.into()),
            ..self
        }
    }

    /// Require a transport profile
    #[must_use]
    pub fn with_transport_profile(self, profile: impl Into<String>) -> Self {
        Self {
            transport_profile_uri: Some(profile.into()),
            ..self
        }
    }
}

/// User identity presented when activating a session
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UserIdentity {
    /// No user
    #[default]
    Anonymous,
    /// User name and password
    UserName {
        /// User name
        user: String,
        /// Password
        password: String,
    },
    /// X.509 user certificate from the User store
    X509 {
        /// Certificate thumbprint
        thumbprint: String,
    },
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UserName { user, .. } => f
                .debug_struct("UserName")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::X509 { thumbprint } => f
                .debug_struct("X509")
                .field("thumbprint", thumbprint)
                .finish(),
        }
    }
}

/// Session creation options
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
    /// Session name, generated when `None`
    pub session_name: Option<String>,
    /// Requested session timeout
    #[serde(with = "duration_ms")]
    pub session_timeout: Duration,
    /// Keep alive interval
    #[serde(with = "duration_ms")]
    pub keep_alive_interval: Duration,
    /// Preferred locales
    pub preferred_locales: Vec<String>,
    /// Skip loading complex type definitions after activation
    pub disable_complex_type_loading: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            session_name: None,
            session_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(10),
            preferred_locales: Vec::new(),
            disable_complex_type_loading: false,
        }
    }
}

impl SessionOptions {
    /// Short lived options used for connectivity tests
    #[must_use]
    pub fn connectivity_test() -> Self {
        Self {
            session_name: Some("ualink connectivity test".to_string()),
            session_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(5),
            preferred_locales: Vec::new(),
            disable_complex_type_loading: true,
        }
    }
}

/// Identifies a pooled session
///
/// Two requests with equal keys share one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    /// Target endpoint
    pub endpoint: EndpointDescriptor,
    /// User identity
    pub user: UserIdentity,
    /// Session options
    pub options: SessionOptions,
    /// Wait for the server to connect back
    pub use_reverse_connect: bool,
}

impl ConnectionKey {
    /// Anonymous key with default options
    pub fn new(endpoint: EndpointDescriptor) -> Self {
        Self {
            endpoint,
            user: UserIdentity::Anonymous,
            options: SessionOptions::default(),
            use_reverse_connect: false,
        }
    }

    /// Present a user identity
    #[must_use]
    pub fn with_user(self, user: UserIdentity) -> Self {
        Self { user, ..self }
    }

    /// Use specific session options
    #[must_use]
    pub fn with_options(self, options: SessionOptions) -> Self {
        Self { options, ..self }
    }

    /// Connect through reverse connect
    #[must_use]
    pub fn with_reverse_connect(self, use_reverse_connect: bool) -> Self {
        Self {
            use_reverse_connect,
            ..self
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint.url)?;
        if let Some(mode) = self.endpoint.security_mode {
            write!(f, " [{mode}]")?;
        }
        if self.use_reverse_connect {
            f.write_str(" (reverse)")?;
        }
        Ok(())
    }
}
