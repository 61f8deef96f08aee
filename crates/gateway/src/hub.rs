//! Subscriber registry and fan-out.
//!
//! Uses lock-free DashMap for concurrent register/unregister/broadcast.
//! Every connection owns a bounded outbound queue drained by its socket task
//! and a heartbeat task that probes liveness and tears the connection down
//! when probes fail or acknowledgments stop arriving.

use crate::error::Result;
use axum::extract::ws::{Message, Utf8Bytes};
use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Interval between liveness probes.
    pub heartbeat_interval: Duration,
    /// A connection with no acknowledgment for this long is torn down.
    pub connection_timeout: Duration,
    /// Outbound queue capacity per connection.
    pub queue_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(90),
            queue_size: 1000,
        }
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// A single subscriber connection.
pub struct Connection {
    pub id: ConnectionId,
    /// Outbound queue, drained by the socket task.
    tx: mpsc::Sender<Message>,
    /// Timestamp when the connection was opened (ms).
    pub connected_at: i64,
    /// Timestamp of the last liveness acknowledgment (ms).
    last_pong_at: AtomicI64,
    state: AtomicU8,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    closed: Notify,
}

impl Connection {
    /// Create an open connection writing to `tx`.
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            tx,
            connected_at: now,
            last_pong_at: AtomicI64::new(now),
            state: AtomicU8::new(ConnectionState::Open as u8),
            heartbeat: Mutex::new(None),
            closed: Notify::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Record a liveness acknowledgment.
    pub fn record_pong(&self) {
        self.last_pong_at
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_pong_at(&self) -> i64 {
        self.last_pong_at.load(Ordering::Relaxed)
    }

    /// Queue a message without waiting.
    pub fn send(&self, msg: Message) -> Result<()> {
        self.tx.try_send(msg)?;
        Ok(())
    }

    /// Queue a text frame without waiting.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into().into()))
    }

    /// Mark the connection as closing; broadcasts skip it from now on.
    pub fn begin_close(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Open as u8,
            ConnectionState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Resolves once the hub has closed this connection.
    pub async fn closed(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.closed.notified().await;
    }

    /// Transition to `Closed`, stopping the heartbeat. Returns false if it
    /// was already closed.
    fn close(&self) -> bool {
        let previous = self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(previous) == ConnectionState::Closed {
            return false;
        }

        if let Ok(mut heartbeat) = self.heartbeat.lock() {
            if let Some(handle) = heartbeat.take() {
                handle.abort();
            }
        }
        self.closed.notify_one();
        true
    }
}

/// Summary of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// Registry of live subscribers.
pub struct BroadcastHub {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    config: HubConfig,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Create a connection with a queue of the configured size and register it.
    pub fn connect(self: &Arc<Self>) -> (Arc<Connection>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(self.config.queue_size);
        let connection = Arc::new(Connection::new(tx));
        self.register(connection.clone());
        (connection, rx)
    }

    /// Add a connection and start its heartbeat.
    pub fn register(self: &Arc<Self>, connection: Arc<Connection>) {
        let id = connection.id;

        let handle = tokio::spawn(heartbeat(
            Arc::downgrade(self),
            connection.clone(),
            self.config.heartbeat_interval,
            self.config.connection_timeout,
        ));
        if let Ok(mut slot) = connection.heartbeat.lock() {
            *slot = Some(handle);
        }

        self.connections.insert(id, connection);

        counter!("gateway_connections_total").increment(1);
        gauge!("gateway_active_connections").set(self.connections.len() as f64);
        info!("Connection {} registered", id);
    }

    /// Remove a connection and stop its heartbeat. Safe to call repeatedly.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let Some((_, connection)) = self.connections.remove(id) else {
            return false;
        };
        connection.close();

        counter!("gateway_disconnections_total").increment(1);
        gauge!("gateway_active_connections").set(self.connections.len() as f64);
        info!("Connection {} unregistered", id);
        true
    }

    /// Get a connection by ID.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| c.clone())
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver `payload` to every open connection.
    ///
    /// Each delivery is independent: a full queue drops the message for that
    /// connection only, and a closed queue unregisters the connection.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        // Serialize once
        let text: Utf8Bytes = match serde_json::to_string(payload) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to serialize broadcast payload: {}", e);
                return outcome;
            }
        };

        // Snapshot so no shard lock is held while unregistering
        let targets: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.value().clone())
            .collect();

        for connection in targets {
            match connection.tx.try_send(Message::Text(text.clone())) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    outcome.failed += 1;
                    warn!("Connection {} queue full, dropping message", connection.id);
                    counter!("gateway_broadcast_failures_total", "reason" => "full").increment(1);
                }
                Err(TrySendError::Closed(_)) => {
                    outcome.failed += 1;
                    warn!("Connection {} closed during broadcast", connection.id);
                    counter!("gateway_broadcast_failures_total", "reason" => "closed").increment(1);
                    self.unregister(&connection.id);
                }
            }
        }

        counter!("gateway_broadcast_deliveries_total").increment(outcome.delivered as u64);
        debug!(
            "Broadcast delivered to {} connections ({} failed)",
            outcome.delivered, outcome.failed
        );
        outcome
    }

    /// Close every connection.
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.unregister(&id);
        }
    }
}

/// Periodic liveness probe for one connection.
async fn heartbeat(
    hub: Weak<BroadcastHub>,
    connection: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let timeout_ms = timeout.as_millis() as i64;

    loop {
        ticker.tick().await;

        let Some(hub) = hub.upgrade() else {
            return;
        };
        if !connection.is_open() {
            return;
        }

        let idle_ms = Utc::now().timestamp_millis() - connection.last_pong_at();
        if idle_ms > timeout_ms {
            warn!(
                "Connection {} missed heartbeats for {}ms, closing",
                connection.id, idle_ms
            );
            counter!("gateway_heartbeat_timeouts_total").increment(1);
            hub.unregister(&connection.id);
            return;
        }

        if let Err(e) = connection.tx.try_send(Message::Ping(Vec::new().into())) {
            warn!("Heartbeat to {} failed: {}", connection.id, e);
            counter!("gateway_heartbeat_failures_total").increment(1);
            hub.unregister(&connection.id);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Arc<BroadcastHub> {
        BroadcastHub::new(HubConfig {
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(90),
            queue_size: 4,
        })
    }

    fn text_of(msg: Message) -> String {
        match msg {
            Message::Text(text) => text.as_str().to_string(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_and_unregister_is_idempotent() {
        let hub = hub();
        let (connection, _rx) = hub.connect();

        assert_eq!(hub.connection_count(), 1);
        assert!(connection.is_open());

        assert!(hub.unregister(&connection.id));
        assert!(!hub.unregister(&connection.id));
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_broadcast_serializes_once_for_all() {
        let hub = hub();
        let (_a, mut rx_a) = hub.connect();
        let (_b, mut rx_b) = hub.connect();

        let outcome = hub.broadcast(&serde_json::json!([{"id": "e1"}]));

        assert_eq!(outcome, BroadcastOutcome { delivered: 2, failed: 0 });
        assert_eq!(text_of(rx_a.recv().await.unwrap()), r#"[{"id":"e1"}]"#);
        assert_eq!(text_of(rx_b.recv().await.unwrap()), r#"[{"id":"e1"}]"#);
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failed_connection() {
        let hub = hub();
        let (_a, mut rx_a) = hub.connect();
        let (dead, rx_dead) = hub.connect();
        let (_c, mut rx_c) = hub.connect();
        drop(rx_dead);

        let outcome = hub.broadcast(&"hello");

        assert_eq!(outcome, BroadcastOutcome { delivered: 2, failed: 1 });
        assert_eq!(text_of(rx_a.recv().await.unwrap()), "\"hello\"");
        assert_eq!(text_of(rx_c.recv().await.unwrap()), "\"hello\"");
        assert!(hub.get(&dead.id).is_none());
        assert_eq!(dead.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_full_queue_drops_message_but_keeps_connection() {
        let hub = hub();
        let (slow, _rx_slow) = hub.connect();
        let (_fast, mut rx_fast) = hub.connect();

        for i in 0..4 {
            hub.broadcast(&i);
        }
        for _ in 0..4 {
            rx_fast.recv().await.unwrap();
        }
        let outcome = hub.broadcast(&"overflow");

        assert_eq!(outcome, BroadcastOutcome { delivered: 1, failed: 1 });
        assert!(hub.get(&slow.id).is_some());
        assert!(slow.is_open());
        assert_eq!(text_of(rx_fast.recv().await.unwrap()), "\"overflow\"");
    }

    #[tokio::test]
    async fn test_closing_connection_is_skipped() {
        let hub = hub();
        let (closing, mut rx_closing) = hub.connect();
        let (_open, mut rx_open) = hub.connect();

        closing.begin_close();
        let outcome = hub.broadcast(&"x");

        assert_eq!(outcome, BroadcastOutcome { delivered: 1, failed: 0 });
        assert_eq!(closing.state(), ConnectionState::Closing);
        assert!(rx_closing.try_recv().is_err());
        assert!(rx_open.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_connections() {
        let hub = hub();
        assert_eq!(hub.broadcast(&"x"), BroadcastOutcome::default());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_unregister() {
        let hub = hub();
        let (connection, _rx) = hub.connect();

        let waiter = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.closed().await })
        };
        hub.unregister(&connection.id);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sends_ping() {
        let hub = BroadcastHub::new(HubConfig {
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(3600),
            queue_size: 4,
        });
        let (_connection, mut rx) = hub.connect();

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(matches!(rx.recv().await.unwrap(), Message::Ping(_)));
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_send_failure_tears_down() {
        let hub = hub();
        let (connection, rx) = hub.connect();
        drop(rx);

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(hub.connection_count(), 0);
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_tears_down() {
        let hub = BroadcastHub::new(HubConfig {
            heartbeat_interval: Duration::from_millis(20),
            connection_timeout: Duration::from_millis(0),
            queue_size: 16,
        });
        let (connection, _rx) = hub.connect();
        connection
            .last_pong_at
            .store(Utc::now().timestamp_millis() - 1_000, Ordering::Relaxed);

        tokio::time::timeout(Duration::from_secs(2), connection.closed())
            .await
            .unwrap();
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all() {
        let hub = hub();
        let (a, _rx_a) = hub.connect();
        let (b, _rx_b) = hub.connect();

        hub.close_all();

        assert_eq!(hub.connection_count(), 0);
        assert!(!a.is_open());
        assert!(!b.is_open());
    }
}
