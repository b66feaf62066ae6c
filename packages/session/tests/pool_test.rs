//! Session pool sharing, single-flight and eviction

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeSession, eventually};
use futures::future::BoxFuture;
use ualink_session::{
    ConnectionKey, EndpointDescriptor, PoolConfig, Session, SessionError, SessionPool,
};

fn key(url: &str) -> ConnectionKey {
    ConnectionKey::new(EndpointDescriptor::new(url))
}

fn session(name: &str) -> Arc<FakeSession> {
    Arc::new(FakeSession {
        name: name.to_string(),
        connected: AtomicBool::new(true),
        closes: AtomicUsize::new(0),
        fail_close: AtomicBool::new(false),
    })
}

fn pool(capacity: usize) -> SessionPool {
    SessionPool::new(PoolConfig::with_capacity(capacity).with_idle_timeout(Duration::ZERO))
}

type ConnectFuture = BoxFuture<'static, ualink_session::Result<Arc<dyn Session>>>;

/// Connect closure handing out `session` and counting calls
fn connect_to(
    session: &Arc<FakeSession>,
    calls: &Arc<AtomicUsize>,
) -> impl FnOnce() -> ConnectFuture + Send + 'static {
    let session = session.clone();
    let calls = calls.clone();
    move || -> ConnectFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(session as Arc<dyn Session>) })
    }
}

#[tokio::test]
async fn concurrent_callers_share_one_connect() {
    let pool = pool(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let shared = session("shared");
    let key = key("opc.tcp://plc:4840");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        let key = key.clone();
        let calls = calls.clone();
        let shared = shared.clone();
        tasks.push(tokio::spawn(async move {
            pool.get_or_connect(&key, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(shared as Arc<dyn Session>)
                }
            })
            .await
        }));
    }

    let mut leases = Vec::new();
    for task in tasks {
        leases.push(task.await.expect("join").expect("lease"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.len(), 1);
    assert!(leases.iter().all(|lease| lease.same_session(&leases[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_callers_never_connect_twice() {
    for round in 0..300 {
        let pool = pool(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = key("opc.tcp://plc:4840");

        let mut tasks = Vec::new();
        for caller in 0..16 {
            let pool = pool.clone();
            let key = key.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                // Spread arrivals across the connect's completion
                for _ in 0..caller % 4 {
                    tokio::task::yield_now().await;
                }
                pool.get_or_connect(&key, move || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::task::yield_now().await;
                        Ok(session(&format!("session-{n}")) as Arc<dyn Session>)
                    }
                })
                .await
            }));
        }

        let mut leases = Vec::new();
        for task in tasks {
            leases.push(task.await.expect("join").expect("lease"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "round {round}");
        assert!(leases.iter().all(|lease| lease.same_session(&leases[0])));
        assert!(leases[0].is_connected(), "leased session was closed");
    }
}

#[tokio::test]
async fn leases_share_session_and_release_without_closing() {
    let pool = pool(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let s = session("a");
    let key = key("opc.tcp://plc:4840");

    let first = pool.get_or_connect(&key, connect_to(&s, &calls)).await.expect("first");
    let second = pool.get_or_connect(&key, connect_to(&s, &calls)).await.expect("second");
    assert!(first.same_session(&second));
    assert_eq!(first.session_name(), "a");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop(first);
    drop(second);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(s.closes.load(Ordering::SeqCst), 0);
    assert_eq!(pool.len(), 1);

    let metrics = pool.metrics().snapshot();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
}

#[tokio::test]
async fn failed_connect_is_shared_then_forgotten() {
    let pool = pool(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = key("opc.tcp://down:4840");

    let attempt = |calls: Arc<AtomicUsize>| {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err::<Arc<dyn Session>, _>(SessionError::connect_failure(
                    "opc.tcp://down:4840",
                    "refused",
                ))
            }
        }
    };

    let (a, b) = tokio::join!(
        pool.get_or_connect(&key, attempt(calls.clone())),
        pool.get_or_connect(&key, attempt(calls.clone())),
    );
    assert!(matches!(a, Err(SessionError::ConnectFailure { .. })));
    assert!(matches!(b, Err(SessionError::ConnectFailure { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let s = session("recovered");
    pool.get_or_connect(&key, connect_to(&s, &calls))
        .await
        .expect("retry after failure connects again");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn eviction_past_capacity_closes_least_used_exactly_once() {
    let pool = pool(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let (a, b, c) = (session("a"), session("b"), session("c"));

    for _ in 0..3 {
        pool.get_or_connect(&key("opc.tcp://a:4840"), connect_to(&a, &calls))
            .await
            .expect("a");
    }
    pool.get_or_connect(&key("opc.tcp://b:4840"), connect_to(&b, &calls))
        .await
        .expect("b");
    pool.get_or_connect(&key("opc.tcp://c:4840"), connect_to(&c, &calls))
        .await
        .expect("c");

    assert_eq!(pool.len(), 2);
    assert!(eventually(|| b.closes.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(b.closes.load(Ordering::SeqCst), 1, "closed exactly once");
    assert_eq!(a.closes.load(Ordering::SeqCst), 0);
    assert_eq!(c.closes.load(Ordering::SeqCst), 0);
    assert_eq!(pool.metrics().snapshot().evictions, 1);
}

#[tokio::test]
async fn eviction_prefers_unleased_sessions() {
    let pool = pool(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let (busy, popular, late) = (session("busy"), session("popular"), session("late"));

    let _held = pool
        .get_or_connect(&key("opc.tcp://busy:4840"), connect_to(&busy, &calls))
        .await
        .expect("busy");
    for _ in 0..5 {
        pool.get_or_connect(&key("opc.tcp://popular:4840"), connect_to(&popular, &calls))
            .await
            .expect("popular");
    }
    pool.get_or_connect(&key("opc.tcp://late:4840"), connect_to(&late, &calls))
        .await
        .expect("late");

    assert!(eventually(|| popular.closes.load(Ordering::SeqCst) == 1).await);
    assert_eq!(busy.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disconnected_session_is_replaced() {
    let pool = pool(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = key("opc.tcp://flaky:4840");
    let (old, new) = (session("old"), session("new"));

    drop(pool.get_or_connect(&key, connect_to(&old, &calls)).await.expect("old"));
    old.connected.store(false, Ordering::SeqCst);

    let lease = pool.get_or_connect(&key, connect_to(&new, &calls)).await.expect("new");
    assert_eq!(lease.session_name(), "new");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(eventually(|| old.closes.load(Ordering::SeqCst) == 1).await);
    assert_eq!(pool.len(), 1);
}

#[tokio::test]
async fn idle_sessions_without_leases_are_evicted() {
    let pool = SessionPool::new(PoolConfig {
        capacity: 4,
        idle_timeout: Duration::from_millis(40),
        maintenance_interval: Duration::from_secs(3600),
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let (idle, leased) = (session("idle"), session("leased"));

    drop(
        pool.get_or_connect(&key("opc.tcp://idle:4840"), connect_to(&idle, &calls))
            .await
            .expect("idle"),
    );
    let _lease = pool
        .get_or_connect(&key("opc.tcp://leased:4840"), connect_to(&leased, &calls))
        .await
        .expect("leased");

    assert_eq!(pool.evict_idle(), 0, "nothing idle yet");
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(pool.evict_idle(), 1);
    assert_eq!(pool.len(), 1);
    assert!(eventually(|| idle.closes.load(Ordering::SeqCst) == 1).await);
    assert_eq!(leased.closes.load(Ordering::SeqCst), 0);
    assert_eq!(pool.metrics().snapshot().idle_evictions, 1);
}

#[tokio::test]
async fn background_sweep_evicts_idle_sessions() {
    let pool = SessionPool::new(PoolConfig {
        capacity: 4,
        idle_timeout: Duration::from_millis(20),
        maintenance_interval: Duration::from_millis(10),
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let s = session("sweep");
    drop(
        pool.get_or_connect(&key("opc.tcp://sweep:4840"), connect_to(&s, &calls))
            .await
            .expect("lease"),
    );

    assert!(eventually(|| pool.is_empty()).await);
    assert!(eventually(|| s.closes.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn abandoned_waiter_does_not_cancel_shared_connect() {
    let pool = pool(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = key("opc.tcp://slow:4840");
    let slow = session("slow");

    let connect = |calls: Arc<AtomicUsize>, s: Arc<FakeSession>| {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(s as Arc<dyn Session>)
            }
        }
    };

    let abandoned = {
        let pool = pool.clone();
        let key = key.clone();
        let f = connect(calls.clone(), slow.clone());
        tokio::spawn(async move { pool.get_or_connect(&key, f).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let patient = {
        let pool = pool.clone();
        let key = key.clone();
        let f = connect(calls.clone(), slow.clone());
        tokio::spawn(async move { pool.get_or_connect(&key, f).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    abandoned.abort();

    patient.await.expect("join").expect("shared connect completes");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn attempt_dropped_by_every_waiter_is_restarted() {
    let pool = pool(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = key("opc.tcp://slow:4840");
    let s = session("fresh");

    let slow = {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err::<Arc<dyn Session>, _>(SessionError::Timeout("never".to_string()))
            }
        }
    };
    let gave_up =
        tokio::time::timeout(Duration::from_millis(20), pool.get_or_connect(&key, slow)).await;
    assert!(gave_up.is_err());

    pool.get_or_connect(&key, connect_to(&s, &calls))
        .await
        .expect("fresh attempt");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dispose_collects_close_errors_and_refuses_new_work() {
    let pool = pool(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let (good, bad) = (session("good"), session("bad"));
    bad.fail_close.store(true, Ordering::SeqCst);

    for (url, s) in [("opc.tcp://good:4840", &good), ("opc.tcp://bad:4840", &bad)] {
        pool.get_or_connect(&key(url), connect_to(s, &calls))
            .await
            .expect("lease");
    }

    let errors = pool.dispose_all().await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], SessionError::Close { session, .. } if session == "bad"));
    assert_eq!(good.closes.load(Ordering::SeqCst), 1);
    assert_eq!(bad.closes.load(Ordering::SeqCst), 1);
    assert!(pool.is_empty());

    let err = pool
        .get_or_connect(&key("opc.tcp://good:4840"), connect_to(&good, &calls))
        .await
        .expect_err("disposed");
    assert!(matches!(err, SessionError::Disposed));
}
