//! One connect attempt from request to open session

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use super::ManagerInner;
use crate::endpoint::select_endpoint;
use crate::error::{Result, SessionError};
use crate::model::{EndpointDescription, EndpointDescriptor, SessionOptions, UserIdentity};
use crate::resilience::{ConnectOperation, ResilienceContext, ResilientConnector};
use crate::reverse_connect::ReverseConnectWaiter;
use crate::transport::{Session, SessionTransport, TransportContext};

/// Progress of a connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Accepted, nothing done yet
    Requested,
    /// Waiting for the server to connect back
    ReverseConnectWait,
    /// Discovering and choosing an endpoint
    Selecting,
    /// Opening and activating the session
    Connecting,
    /// Session ready
    Open,
    /// Gave up
    Failed,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything that identifies what to connect to
#[derive(Debug, Clone)]
pub(crate) struct ConnectRequest {
    pub(crate) endpoint: EndpointDescriptor,
    pub(crate) options: SessionOptions,
    pub(crate) user: UserIdentity,
    pub(crate) reverse: bool,
}

struct Attempt<'a> {
    request: &'a ConnectRequest,
    state: AttemptState,
}

impl Attempt<'_> {
    fn advance(&mut self, next: AttemptState) {
        tracing::debug!(
            endpoint = %self.request.endpoint.url,
            from = %self.state,
            to = %next,
            "Connect attempt state"
        );
        self.state = next;
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    endpoint: &str,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout(format!("{what} {endpoint}"))),
    }
}

/// Run one attempt through selection and the resilient connect
pub(crate) async fn establish(
    inner: Arc<ManagerInner>,
    request: ConnectRequest,
    connector: ResilientConnector,
) -> Result<Arc<dyn Session>> {
    let mut attempt = Attempt {
        request: &request,
        state: AttemptState::Requested,
    };
    let result = run(&inner, &mut attempt, &connector).await;
    match &result {
        Ok(session) => {
            attempt.advance(AttemptState::Open);
            tracing::info!(
                endpoint = %request.endpoint.url,
                session = session.session_name(),
                reverse = request.reverse,
                "Session open"
            );
        }
        Err(err) => {
            let failed_in = attempt.state;
            attempt.advance(AttemptState::Failed);
            tracing::warn!(
                endpoint = %request.endpoint.url,
                state = %failed_in,
                error = %err,
                "Connect attempt failed"
            );
        }
    }
    result
}

async fn run(
    inner: &Arc<ManagerInner>,
    attempt: &mut Attempt<'_>,
    connector: &ResilientConnector,
) -> Result<Arc<dyn Session>> {
    let request = attempt.request;
    let context = inner.transport_context();
    let limit = context.identity.security.quotas.operation_timeout;
    let url = request.endpoint.url.as_str();

    let waiter = if request.reverse {
        Some(inner.reverse_waiter()?)
    } else {
        None
    };

    let discovered = match &waiter {
        Some(waiter) => {
            attempt.advance(AttemptState::ReverseConnectWait);
            let connection = waiter.wait_for_connection(url, None).await?;
            attempt.advance(AttemptState::Selecting);
            bounded(
                limit,
                "discovery over reverse connection to",
                url,
                inner.transport.discover(&context, url, Some(&connection)),
            )
            .await?
        }
        None => {
            attempt.advance(AttemptState::Selecting);
            bounded(limit, "discovery at", url, inner.transport.discover(&context, url, None))
                .await?
        }
    };
    let selected = select_endpoint(&request.endpoint, &discovered, url, request.reverse)?;

    attempt.advance(AttemptState::Connecting);
    let operation = open_operation(
        inner.transport.clone(),
        context,
        selected.clone(),
        request.clone(),
        waiter,
        limit,
    );
    connector
        .execute(
            ResilienceContext {
                operation: "connect",
                endpoint: selected.endpoint_url.clone(),
            },
            operation,
        )
        .await
}

/// The restartable part of an attempt
///
/// Each run waits for its own reverse connection; one consumed by a failed
/// open cannot be reused.
fn open_operation(
    transport: Arc<dyn SessionTransport>,
    context: TransportContext,
    endpoint: EndpointDescription,
    request: ConnectRequest,
    waiter: Option<Arc<ReverseConnectWaiter>>,
    limit: Duration,
) -> ConnectOperation<'static> {
    Box::new(move || {
        let transport = transport.clone();
        let context = context.clone();
        let endpoint = endpoint.clone();
        let request = request.clone();
        let waiter = waiter.clone();
        async move {
            let url = endpoint.endpoint_url.clone();
            let waiting = match &waiter {
                Some(waiter) => Some(
                    waiter
                        .wait_for_connection(&url, Some(&endpoint.server_uri))
                        .await?,
                ),
                None => None,
            };
            let session = bounded(
                limit,
                "opening session on",
                &url,
                transport.open(&context, &endpoint, &request.options, &request.user, waiting),
            )
            .await?;

            if !session.is_connected() {
                if let Err(err) = session.close().await {
                    tracing::warn!(
                        endpoint = %url,
                        session = session.session_name(),
                        error = %err,
                        "Closing half-open session failed"
                    );
                }
                return Err(SessionError::connect_failure(
                    url,
                    "session not connected after activation",
                ));
            }
            Ok(session)
        }
        .boxed()
    })
}
