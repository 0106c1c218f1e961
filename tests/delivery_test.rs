//! 投递通道测试 - 上报过滤和连接重试

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use validator_monitor::{
    ConnectionListener, DeliveryChannel, DeliveryOutcome, MonitorError, Result, RetryPolicy,
    ServiceStatus, Transition, TransitionKind, Transport,
};

/// Accepts every connection and records emitted payloads
#[derive(Default)]
struct FakeCollector {
    emitted: Mutex<Vec<(String, serde_json::Value)>>,
    listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
}

impl FakeCollector {
    fn drop_connection(&self) {
        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            listener.on_disconnect("collector went away");
        }
    }

    fn emitted_count(&self) -> usize {
        self.emitted.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeCollector {
    async fn connect(
        &self,
        _url: &str,
        _credential: &str,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<()> {
        listener.on_connect();
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        self.emitted
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
        Ok(())
    }

    async fn close(&self) {}
}

/// Refuses every connection, remembering when each attempt happened
#[derive(Default)]
struct UnreachableCollector {
    attempts: AtomicU32,
    attempted_at: Mutex<Vec<Instant>>,
    credentials: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for UnreachableCollector {
    async fn connect(
        &self,
        _url: &str,
        credential: &str,
        _listener: Arc<dyn ConnectionListener>,
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempted_at.lock().unwrap().push(Instant::now());
        self.credentials.lock().unwrap().push(credential.to_string());
        Err(MonitorError::Transport("connection refused".into()))
    }

    async fn emit(&self, _event: &str, _payload: serde_json::Value) -> Result<()> {
        Err(MonitorError::Transport("not connected".into()))
    }

    async fn close(&self) {}
}

/// Fails the first `failures` attempts, then accepts
struct FlakyCollector {
    failures: u32,
    attempts: AtomicU32,
}

#[async_trait]
impl Transport for FlakyCollector {
    async fn connect(
        &self,
        _url: &str,
        _credential: &str,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(MonitorError::Transport("connection reset".into()));
        }
        listener.on_connect();
        Ok(())
    }

    async fn emit(&self, _event: &str, _payload: serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

fn changed_to(current: ServiceStatus) -> Transition {
    Transition {
        previous: Some(ServiceStatus::Activating),
        current,
        kind: TransitionKind::Changed,
        timestamp: Utc::now(),
    }
}

fn new_channel(transport: Arc<dyn Transport>, policy: RetryPolicy) -> DeliveryChannel {
    DeliveryChannel::new("solana", "tcp://collector:7070", "s3cret", transport, policy)
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_millis(1), Duration::ZERO)
}

#[tokio::test]
async fn test_gating_every_combination() {
    let statuses = [
        ServiceStatus::Active,
        ServiceStatus::Inactive,
        ServiceStatus::Deactivating,
        ServiceStatus::Failed,
    ];

    for connected in [false, true] {
        for was_active in [false, true] {
            for status in statuses {
                // Given: a channel in the combination under test
                let collector = Arc::new(FakeCollector::default());
                let channel = new_channel(collector.clone(), quick_policy());
                if connected {
                    channel.connect_with_retry().await.unwrap();
                }
                if was_active {
                    channel.mark_active();
                }

                // When: notifying a transition into `status`
                let outcome = channel.notify(&changed_to(status)).await;

                // Then: emission iff connected, once active, and degraded
                let should_emit = connected && was_active && status != ServiceStatus::Active;
                assert_eq!(
                    collector.emitted_count(),
                    usize::from(should_emit),
                    "connected={} was_active={} status={}",
                    connected,
                    was_active,
                    status
                );
                assert_eq!(outcome == DeliveryOutcome::Sent, should_emit);
            }
        }
    }
}

#[tokio::test]
async fn test_emitted_event_name_and_payload() {
    let collector = Arc::new(FakeCollector::default());
    let channel = new_channel(collector.clone(), quick_policy());
    channel.connect_with_retry().await.unwrap();
    channel.mark_active();

    channel.notify(&changed_to(ServiceStatus::Deactivating)).await;

    let emitted = collector.emitted.lock().unwrap();
    let (event, payload) = &emitted[0];
    assert_eq!(event, "service_status");
    assert_eq!(payload["service"], "solana");
    assert_eq!(payload["status"], "deactivating");
    let ts = payload["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
}

#[tokio::test]
async fn test_disconnect_turns_notify_into_no_op() {
    // Given: a connected channel for a service that was active
    let collector = Arc::new(FakeCollector::default());
    let channel = new_channel(collector.clone(), quick_policy());
    channel.connect_with_retry().await.unwrap();
    channel.mark_active();

    // When: the transport reports a disconnect
    collector.drop_connection();

    // Then: degradations are no longer forwarded and nothing errors
    assert!(!channel.is_connected());
    let outcome = channel.notify(&changed_to(ServiceStatus::Failed)).await;
    assert!(matches!(outcome, DeliveryOutcome::Suppressed(_)));
    assert_eq!(collector.emitted_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_after_max_attempts() {
    // Given: a collector that never accepts and a five-attempt linear policy
    let collector = Arc::new(UnreachableCollector::default());
    let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_millis(500));
    let channel = new_channel(collector.clone(), policy);

    // When: connecting
    let err = channel.connect_with_retry().await.unwrap_err();

    // Then: exactly five attempts, then a fatal error with exit code 1
    assert_eq!(collector.attempts.load(Ordering::SeqCst), 5);
    assert!(matches!(err, MonitorError::ConnectionExhausted { attempts: 5 }));
    assert_eq!(err.exit_code(), 1);
    assert!(!channel.is_connected());
    assert!(!channel.is_connecting());

    // And: the waits between attempts follow base + (attempt - 1) * increment
    let at = collector.attempted_at.lock().unwrap();
    let gaps: Vec<Duration> = at.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(1500),
            Duration::from_millis(2000),
            Duration::from_millis(2500),
        ]
    );

    // And: every attempt carried the shared secret
    assert!(collector
        .credentials
        .lock()
        .unwrap()
        .iter()
        .all(|c| c == "s3cret"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_before_exhaustion() {
    let collector = Arc::new(FlakyCollector {
        failures: 2,
        attempts: AtomicU32::new(0),
    });
    let channel = new_channel(collector.clone(), RetryPolicy::default());

    channel.connect_with_retry().await.unwrap();

    assert_eq!(collector.attempts.load(Ordering::SeqCst), 3);
    assert!(channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_background_reconnect_after_drop() {
    // Given: a reconnect-enabled channel whose connection dropped
    let collector = Arc::new(FakeCollector::default());
    let channel = Arc::new(new_channel(collector.clone(), quick_policy()).with_reconnect(true));
    channel.connect_with_retry().await.unwrap();
    collector.drop_connection();
    assert!(!channel.is_connected());

    // When: the loop asks for reconnection twice in a row
    let first = channel.maybe_reconnect();
    let second = channel.maybe_reconnect();

    // Then: only one attempt is in flight
    assert!(first);
    assert!(!second);

    // And: the connection comes back
    for _ in 0..10 {
        if channel.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(channel.is_connected());
    assert!(!channel.maybe_reconnect());
}

#[tokio::test(start_paused = true)]
async fn test_background_reconnect_exhaustion_is_not_fatal() {
    let collector = Arc::new(UnreachableCollector::default());
    let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::ZERO);
    let channel = Arc::new(new_channel(collector.clone(), policy).with_reconnect(true));

    assert!(channel.maybe_reconnect());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(collector.attempts.load(Ordering::SeqCst), 2);
    assert!(!channel.is_connecting());
    // A later tick may try again
    assert!(channel.maybe_reconnect());
}
