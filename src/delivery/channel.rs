//! 投递通道 - 连接生命周期管理和上报过滤

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::retry::RetryPolicy;
use super::transport::{ConnectionListener, ServiceStatusEvent, Transport, SERVICE_STATUS_EVENT};
use crate::detector::{RestartCheck, Transition};
use crate::error::{MonitorError, Result};

/// Flags shared between the polling loop and transport callbacks
#[derive(Debug, Default)]
pub struct ConnectionState {
    connected: AtomicBool,
    was_active: AtomicBool,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn was_active(&self) -> bool {
        self.was_active.load(Ordering::SeqCst)
    }

    /// Monotonic, false -> true only
    pub fn mark_active(&self) {
        if !self.was_active.swap(true, Ordering::SeqCst) {
            debug!("Service confirmed active, degradation reports enabled");
        }
    }
}

impl ConnectionListener for ConnectionState {
    fn on_connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        info!("Collector connection up");
    }

    fn on_disconnect(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(reason = %reason, "Collector connection lost, reports suppressed");
        } else {
            debug!(reason = %reason, "Disconnect while already disconnected");
        }
    }
}

/// Why `notify` did not emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Disconnected,
    NeverActive,
    NotDegraded,
}

/// Result of one `notify`
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Sent,
    Suppressed(SuppressReason),
    Failed(String),
}

/// Clears the in-flight flag when an attempt sequence ends
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the single collector connection
pub struct DeliveryChannel {
    service: String,
    url: String,
    credential: String,
    transport: Arc<dyn Transport>,
    state: Arc<ConnectionState>,
    policy: RetryPolicy,
    reconnect: bool,
    connecting: Arc<AtomicBool>,
    /// 关闭后不再建立新连接
    closed: AtomicBool,
}

impl DeliveryChannel {
    pub fn new(
        service: impl Into<String>,
        url: impl Into<String>,
        credential: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service: service.into(),
            url: url.into(),
            credential: credential.into(),
            transport,
            state: Arc::new(ConnectionState::new()),
            policy,
            reconnect: false,
            connecting: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    /// Enable background reconnection after a post-startup disconnect
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn mark_active(&self) {
        self.state.mark_active();
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    /// Open the connection, retrying with linear back-off.
    ///
    /// Exhaustion returns `ConnectionExhausted`; the caller is expected to exit.
    pub async fn connect_with_retry(&self) -> Result<()> {
        let _guard = InFlight::acquire(&self.connecting).ok_or_else(|| {
            MonitorError::Transport("connection attempt already in flight".to_string())
        })?;
        self.retry_connect().await
    }

    async fn retry_connect(&self) -> Result<()> {
        let max = self.policy.max_attempts;
        for attempt in 1..=max {
            if self.is_closed() {
                return Err(MonitorError::Transport("channel closed".to_string()));
            }
            let listener: Arc<dyn ConnectionListener> = self.state.clone();
            match self.transport.connect(&self.url, &self.credential, listener).await {
                Ok(()) if self.is_closed() => {
                    // close() ran while this attempt was in progress
                    debug!(url = %self.url, "Channel closed during connect, dropping connection");
                    self.transport.close().await;
                    return Err(MonitorError::Transport("channel closed".to_string()));
                }
                Ok(()) => {
                    info!(url = %self.url, attempt, "Collector connection established");
                    return Ok(());
                }
                Err(e) => {
                    warn!(url = %self.url, attempt, max, error = %e, "Collector connection attempt failed");
                    if self.policy.has_next(attempt) {
                        let delay = self.policy.delay_after(attempt);
                        debug!(delay_ms = delay.as_millis() as u64, "Retrying collector connection");
                        sleep(delay).await;
                    }
                }
            }
        }

        error!(url = %self.url, attempts = max, "Giving up on collector connection");
        Err(MonitorError::ConnectionExhausted { attempts: max })
    }

    /// Start a background reconnection if enabled, disconnected and none is running.
    ///
    /// Returns whether a reconnection task was spawned.
    pub fn maybe_reconnect(self: &Arc<Self>) -> bool {
        if !self.reconnect || self.is_connected() || self.is_closed() {
            return false;
        }
        let Some(guard) = InFlight::acquire(&self.connecting) else {
            return false;
        };

        info!(url = %self.url, "Reconnecting to collector in background");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = this.retry_connect().await {
                error!(error = %e, "Background reconnection gave up, will retry next tick");
            }
        });
        true
    }

    /// Forward a transition if connected, the service was once active, and the new state is degraded
    pub async fn notify(&self, transition: &Transition) -> DeliveryOutcome {
        if !self.state.is_connected() {
            debug!(status = %transition.current, "Not connected, transition not forwarded");
            return DeliveryOutcome::Suppressed(SuppressReason::Disconnected);
        }
        if !self.state.was_active() {
            debug!(status = %transition.current, "Service never active, transition not forwarded");
            return DeliveryOutcome::Suppressed(SuppressReason::NeverActive);
        }
        if !transition.current.is_degraded() {
            return DeliveryOutcome::Suppressed(SuppressReason::NotDegraded);
        }

        self.emit(ServiceStatusEvent::from_transition(&self.service, transition))
            .await
    }

    /// Timestamp mode: forward a detected restart if connected
    pub async fn notify_restart(&self, check: &RestartCheck) -> DeliveryOutcome {
        if !matches!(check, RestartCheck::Restarted { .. }) {
            return DeliveryOutcome::Suppressed(SuppressReason::NotDegraded);
        }
        if !self.state.is_connected() {
            debug!("Not connected, restart not forwarded");
            return DeliveryOutcome::Suppressed(SuppressReason::Disconnected);
        }
        self.emit(ServiceStatusEvent::restarted(&self.service, chrono::Utc::now()))
            .await
    }

    async fn emit(&self, event: ServiceStatusEvent) -> DeliveryOutcome {
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => return DeliveryOutcome::Failed(e.to_string()),
        };
        match self.transport.emit(SERVICE_STATUS_EVENT, payload).await {
            Ok(()) => {
                info!(service = %event.service, status = %event.status, "Status event sent");
                DeliveryOutcome::Sent
            }
            Err(e) => {
                warn!(service = %event.service, status = %event.status, error = %e, "Status event not delivered");
                DeliveryOutcome::Failed(e.to_string())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the transport; no connection is opened afterwards
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::TransitionKind;
    use crate::status::ServiceStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        emitted: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn connect(
            &self,
            _url: &str,
            _credential: &str,
            listener: Arc<dyn ConnectionListener>,
        ) -> Result<()> {
            listener.on_connect();
            Ok(())
        }

        async fn emit(&self, _event: &str, payload: serde_json::Value) -> Result<()> {
            self.emitted.lock().unwrap().push(payload);
            Ok(())
        }

        async fn close(&self) {}
    }

    fn changed(current: ServiceStatus) -> Transition {
        Transition {
            previous: Some(ServiceStatus::Active),
            current,
            kind: TransitionKind::Changed,
            timestamp: chrono::Utc::now(),
        }
    }

    fn channel(transport: Arc<RecordingTransport>) -> DeliveryChannel {
        DeliveryChannel::new(
            "solana",
            "tcp://127.0.0.1:7070",
            "secret",
            transport,
            RetryPolicy::new(3, Duration::from_millis(1), Duration::ZERO),
        )
    }

    #[test]
    fn test_connection_state_flags() {
        let state = ConnectionState::new();
        assert!(!state.is_connected());
        state.on_connect();
        assert!(state.is_connected());
        state.on_disconnect("test");
        assert!(!state.is_connected());
        state.on_disconnect("again");
        assert!(!state.is_connected());
    }

    #[test]
    fn test_was_active_is_monotonic() {
        let state = ConnectionState::new();
        state.mark_active();
        state.on_disconnect("x");
        state.mark_active();
        assert!(state.was_active());
    }

    #[tokio::test]
    async fn test_notify_sends_payload() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = channel(Arc::clone(&transport));
        channel.connect_with_retry().await.unwrap();
        channel.mark_active();

        let outcome = channel.notify(&changed(ServiceStatus::Failed)).await;
        assert_eq!(outcome, DeliveryOutcome::Sent);

        let emitted = transport.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0]["service"], "solana");
        assert_eq!(emitted[0]["status"], "failed");
    }

    #[tokio::test]
    async fn test_notify_suppression_reasons() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = channel(Arc::clone(&transport));

        assert_eq!(
            channel.notify(&changed(ServiceStatus::Failed)).await,
            DeliveryOutcome::Suppressed(SuppressReason::Disconnected)
        );

        channel.connect_with_retry().await.unwrap();
        assert_eq!(
            channel.notify(&changed(ServiceStatus::Failed)).await,
            DeliveryOutcome::Suppressed(SuppressReason::NeverActive)
        );

        channel.mark_active();
        assert_eq!(
            channel.notify(&changed(ServiceStatus::Activating)).await,
            DeliveryOutcome::Suppressed(SuppressReason::NotDegraded)
        );
        assert!(transport.emitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notify_restart_needs_connection_only() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = channel(Arc::clone(&transport));
        let check = RestartCheck::Restarted {
            previous: "a".into(),
            current: "b".into(),
        };

        assert_eq!(
            channel.notify_restart(&check).await,
            DeliveryOutcome::Suppressed(SuppressReason::Disconnected)
        );
        channel.connect_with_retry().await.unwrap();
        assert_eq!(channel.notify_restart(&check).await, DeliveryOutcome::Sent);
        assert_eq!(
            channel.notify_restart(&RestartCheck::NoRestart).await,
            DeliveryOutcome::Suppressed(SuppressReason::NotDegraded)
        );
        assert_eq!(transport.emitted.lock().unwrap()[0]["status"], "restarted");
    }

    #[tokio::test]
    async fn test_in_flight_flag_released_after_connect() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = channel(transport);
        channel.connect_with_retry().await.unwrap();
        assert!(!channel.is_connecting());
    }

    #[tokio::test]
    async fn test_second_connect_while_in_flight_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = channel(transport);
        let _held = InFlight::acquire(&channel.connecting).unwrap();
        let err = channel.connect_with_retry().await.unwrap_err();
        assert!(matches!(err, MonitorError::Transport(_)));
    }

    /// connect() 阻塞直到测试放行
    #[derive(Default)]
    struct GatedTransport {
        gate: tokio::sync::Notify,
        entered: AtomicBool,
        listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
        closes: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn connect(
            &self,
            _url: &str,
            _credential: &str,
            listener: Arc<dyn ConnectionListener>,
        ) -> Result<()> {
            self.entered.store(true, Ordering::SeqCst);
            self.gate.notified().await;
            listener.on_connect();
            *self.listener.lock().unwrap() = Some(listener);
            Ok(())
        }

        async fn emit(&self, _event: &str, _payload: serde_json::Value) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if let Some(listener) = self.listener.lock().unwrap().take() {
                listener.on_disconnect("closed locally");
            }
        }
    }

    #[tokio::test]
    async fn test_reconnect_finishing_after_close_does_not_reopen() {
        // Given: a background reconnect stuck inside connect()
        let transport = Arc::new(GatedTransport::default());
        let channel = Arc::new(
            DeliveryChannel::new(
                "solana",
                "tcp://127.0.0.1:7070",
                "secret",
                transport.clone(),
                RetryPolicy::new(3, Duration::from_millis(1), Duration::ZERO),
            )
            .with_reconnect(true),
        );
        assert!(channel.maybe_reconnect());
        while !transport.entered.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        // When: the channel closes, then the pending connect completes
        channel.close().await;
        transport.gate.notify_one();
        for _ in 0..100 {
            if !channel.is_connecting() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Then: the late connection is torn down and no new attempt starts
        assert!(!channel.is_connecting());
        assert!(!channel.is_connected());
        assert_eq!(transport.closes.load(Ordering::SeqCst), 2);
        assert!(!channel.maybe_reconnect());
    }

    #[tokio::test]
    async fn test_maybe_reconnect_disabled_by_default() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = Arc::new(channel(transport));
        assert!(!channel.maybe_reconnect());
    }
}
