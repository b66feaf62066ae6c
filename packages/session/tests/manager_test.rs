//! Session manager flows over a fake stack

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeTransport, builder, endpoint, eventually, manager};
use ualink_session::{
    ClientOptions, ConnectionKey, EndpointDescriptor, ReverseConnectConfig, RetryPolicy,
    SecurityMode, SessionError, SessionManager, SessionOptions, UserIdentity,
};
use ualink_trust::CertificateStoreName;

const PLC: &str = "opc.tcp://plc:4840";

fn key(url: &str) -> ConnectionKey {
    ConnectionKey::new(EndpointDescriptor::new(url))
}

fn fast_retry() -> Arc<RetryPolicy> {
    Arc::new(RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    })
}

#[tokio::test]
async fn concurrent_requests_open_one_session() {
    let transport = FakeTransport::plain(PLC).with_delay(Duration::from_millis(50));
    let manager = manager(transport.clone()).await;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.get_or_connect(&key(PLC)).await
        }));
    }
    let mut leases = Vec::new();
    for task in tasks {
        leases.push(task.await.expect("join").expect("lease"));
    }

    assert_eq!(transport.opens(), 1);
    assert_eq!(transport.discoveries.load(Ordering::SeqCst), 1);
    assert!(leases.iter().all(|lease| lease.same_session(&leases[0])));
    assert_eq!(manager.pool().len(), 1);
}

#[tokio::test]
async fn highest_security_level_is_opened() {
    let transport = FakeTransport::new(vec![
        endpoint(PLC, SecurityMode::SignAndEncrypt, "Basic256Sha256", 10),
        endpoint(PLC, SecurityMode::SignAndEncrypt, "Aes256_Sha256_RsaPss", 20),
        endpoint(PLC, SecurityMode::None, "None", 250),
    ]);
    let manager = manager(transport.clone()).await;

    let key = ConnectionKey::new(
        EndpointDescriptor::new(PLC).with_security_mode(SecurityMode::SignAndEncrypt),
    );
    manager.get_or_connect(&key).await.expect("lease");

    let opened = transport.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].security_level, 20);
}

#[tokio::test]
async fn advertised_host_is_replaced_by_requested_address() {
    let transport = FakeTransport::plain("opc.tcp://internal-name:4841/ua");
    let manager = manager(transport.clone()).await;

    manager
        .get_or_connect(&key("opc.tcp://10.1.2.3:50000/ua"))
        .await
        .expect("lease");
    assert_eq!(transport.opened()[0].endpoint_url, "opc.tcp://10.1.2.3:50000/ua");
}

#[tokio::test]
async fn scheme_only_match_is_accepted_for_direct_connect() {
    let transport = FakeTransport::plain("opc.tcp://plc:4840/server");
    let manager = manager(transport.clone()).await;

    manager
        .get_or_connect(&key("opc.tcp://plc:4840/other"))
        .await
        .expect("scheme match suffices");
    assert_eq!(transport.opens(), 1);
}

#[tokio::test]
async fn unmatched_security_mode_fails_with_discovered_list() {
    let transport = FakeTransport::plain(PLC);
    let manager = manager(transport.clone()).await;

    let key =
        ConnectionKey::new(EndpointDescriptor::new(PLC).with_security_mode(SecurityMode::Sign));
    let err = manager.get_or_connect(&key).await.expect_err("no signed endpoint");
    match err {
        SessionError::NoMatchingEndpoint { requested, discovered } => {
            assert_eq!(requested, PLC);
            assert_eq!(discovered.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.opens(), 0);
}

#[tokio::test]
async fn resilience_policy_retries_connect_without_reselecting() {
    let transport = FakeTransport::plain(PLC);
    transport.failing_opens.store(2, Ordering::SeqCst);
    let manager = builder(transport.clone())
        .resilience(fast_retry())
        .build()
        .await
        .expect("manager");

    manager.get_or_connect(&key(PLC)).await.expect("third open succeeds");
    assert_eq!(transport.opens(), 3);
    assert_eq!(transport.discoveries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failure_without_policy_surfaces_and_is_forgotten() {
    let transport = FakeTransport::plain(PLC);
    transport.failing_opens.store(1, Ordering::SeqCst);
    let manager = manager(transport.clone()).await;

    let err = manager.get_or_connect(&key(PLC)).await.expect_err("refused");
    assert!(err.is_retryable());
    manager.get_or_connect(&key(PLC)).await.expect("second call reconnects");
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn session_that_never_connects_is_closed_before_error() {
    let transport = FakeTransport::plain(PLC);
    transport.open_disconnected.store(true, Ordering::SeqCst);
    let manager = manager(transport.clone()).await;

    let err = manager
        .connect(
            EndpointDescriptor::new(PLC),
            SessionOptions::default(),
            UserIdentity::Anonymous,
            false,
        )
        .await
        .expect_err("not connected");
    assert!(matches!(err, SessionError::ConnectFailure { .. }));
    let sessions = transport.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unpooled_sessions_bypass_pool_and_close() {
    let transport = FakeTransport::plain(PLC);
    let manager = manager(transport.clone()).await;

    let owned = manager
        .connect(
            EndpointDescriptor::new(PLC),
            SessionOptions::default(),
            UserIdentity::UserName {
                user: "operator".to_string(),
                password: "pw".to_string(),
            },
            false,
        )
        .await
        .expect("connect");
    assert!(owned.is_connected());
    assert!(manager.pool().is_empty());
    owned.close().await.expect("close");

    let dropped = manager
        .connect(
            EndpointDescriptor::new(PLC),
            SessionOptions::default(),
            UserIdentity::Anonymous,
            false,
        )
        .await
        .expect("connect");
    drop(dropped);

    let sessions = transport.sessions();
    assert_eq!(sessions[0].closes.load(Ordering::SeqCst), 1);
    assert!(eventually(|| sessions[1].closes.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn connectivity_test_closes_session_and_skips_policy() {
    let transport = FakeTransport::plain(PLC);
    let manager = builder(transport.clone())
        .resilience(fast_retry())
        .build()
        .await
        .expect("manager");

    manager
        .test(EndpointDescriptor::new(PLC), false)
        .await
        .expect("reachable");
    let sessions = transport.sessions();
    assert_eq!(sessions[0].closes.load(Ordering::SeqCst), 1);
    let options = transport.opened_options.lock().expect("lock")[0].clone();
    assert_eq!(options, SessionOptions::connectivity_test());
    assert!(manager.pool().is_empty());

    transport.failing_opens.store(1, Ordering::SeqCst);
    let err = manager
        .test(EndpointDescriptor::new(PLC), false)
        .await
        .expect_err("single attempt fails");
    assert!(matches!(err, SessionError::ConnectFailure { .. }));
    assert_eq!(transport.opens(), 2, "no retry during tests");
}

#[tokio::test]
async fn connectivity_test_turns_panics_into_errors() {
    let transport = FakeTransport::plain(PLC);
    transport.panic_on_open.store(true, Ordering::SeqCst);
    let manager = manager(transport).await;

    let err = manager
        .test(EndpointDescriptor::new(PLC), false)
        .await
        .expect_err("panic reported as error");
    assert!(matches!(err, SessionError::ConnectFailure { .. }));
}

#[tokio::test]
async fn dispose_reports_close_failures_and_refuses_work() {
    let transport = FakeTransport::new(vec![
        endpoint(PLC, SecurityMode::None, "None", 0),
    ]);
    let manager = manager(transport.clone()).await;
    manager.get_or_connect(&key(PLC)).await.expect("lease");
    transport.sessions()[0].fail_close.store(true, Ordering::SeqCst);

    let errors = manager.dispose().await;
    assert_eq!(errors.len(), 1);
    assert!(manager.dispose().await.is_empty(), "second dispose is a no-op");

    assert!(matches!(
        manager.get_or_connect(&key(PLC)).await,
        Err(SessionError::Disposed)
    ));
    assert!(matches!(
        manager.test(EndpointDescriptor::new(PLC), false).await,
        Err(SessionError::Disposed)
    ));
}

#[tokio::test]
async fn manager_exposes_identity_and_certificates() {
    let manager = manager(FakeTransport::plain(PLC)).await;

    let identity = manager.identity();
    assert_eq!(identity.host_name, "test-client");
    assert!(identity.certificate.has_private_key());

    let own = manager
        .certificates()
        .list_certificates(CertificateStoreName::Application, false)
        .await
        .expect("list");
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].thumbprint(), identity.certificate.thumbprint());
}

#[tokio::test]
async fn build_requires_transport_and_reverse_host() {
    let err = SessionManager::builder().build().await.expect_err("no transport");
    assert!(matches!(err, SessionError::Configuration(_)));

    let err = builder(FakeTransport::plain(PLC))
        .configure(|options: &mut ClientOptions| {
            options.reverse_connect = Some(ReverseConnectConfig::default());
        })
        .build()
        .await
        .expect_err("reverse connect without host");
    assert!(matches!(err, SessionError::Configuration(_)));
}

#[tokio::test]
async fn reverse_request_without_listener_is_unavailable() {
    let manager = manager(FakeTransport::plain(PLC)).await;
    let err = manager
        .get_or_connect(&key(PLC).with_reverse_connect(true))
        .await
        .expect_err("not configured");
    assert!(matches!(err, SessionError::ReverseConnectUnavailable(_)));
}
