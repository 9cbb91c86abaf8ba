//! Connection liveness primitive.
//!
//! Sends a heartbeat on a fixed interval through the connection's outbound
//! channel, answers peer-initiated heartbeats in kind, and tracks when the
//! last ack arrived. It knows nothing about market data — the engine uses
//! [`KeepaliveHandler::is_alive`] to decide when to force a reconnect.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use dw_core::time_util;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

pub struct KeepaliveHandler {
    interval: Duration,
    /// Heartbeat text we originate.
    ping_payload: String,
    /// Reply to a peer-initiated heartbeat.
    pong_payload: String,
    outbound: mpsc::Sender<String>,
    last_ack_ms: Arc<AtomicU64>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl KeepaliveHandler {
    pub fn new(
        interval_ms: u64,
        ping_payload: String,
        pong_payload: String,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            ping_payload,
            pong_payload,
            outbound,
            last_ack_ms: Arc::new(AtomicU64::new(0)),
            shutdown_tx: None,
            task: None,
        }
    }

    /// Begin sending heartbeats. The ack clock starts now, so a connection
    /// is considered alive until a full silence window has elapsed.
    pub fn start(&mut self) {
        self.last_ack_ms.store(time_util::now_ms(), Ordering::Relaxed);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let outbound = self.outbound.clone();
        let payload = self.ping_payload.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if outbound.send(payload.clone()).await.is_err() {
                            debug!("keepalive: outbound channel closed, stopping");
                            return;
                        }
                    }
                    _ = shutdown_rx.changed() => return,
                }
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
    }

    /// Answer a peer-initiated heartbeat. Synchronous — safe on the
    /// dispatch path.
    pub fn handle_peer_heartbeat(&self) {
        if self.outbound.try_send(self.pong_payload.clone()).is_err() {
            warn!("keepalive: could not queue heartbeat reply");
        }
    }

    /// Record that the peer acknowledged one of our heartbeats.
    pub fn handle_heartbeat_ack(&self) {
        self.last_ack_ms.store(time_util::now_ms(), Ordering::Relaxed);
    }

    /// Whether an ack arrived within the silence budget.
    pub fn is_alive(&self, max_silence_ms: u64) -> bool {
        time_util::now_ms().saturating_sub(self.last_ack_ms.load(Ordering::Relaxed))
            < max_silence_ms
    }

    /// Cancel the heartbeat timer and wait for the task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(interval_ms: u64) -> (KeepaliveHandler, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let ka = KeepaliveHandler::new(interval_ms, r#"{"op":"ping"}"#.into(), r#"{"op":"pong"}"#.into(), tx);
        (ka, rx)
    }

    #[tokio::test]
    async fn sends_heartbeats_on_interval() {
        let (mut ka, mut rx) = handler(10);
        ka.start();
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first.unwrap(), r#"{"op":"ping"}"#);
        ka.stop().await;
    }

    #[tokio::test]
    async fn peer_heartbeat_gets_replied_in_kind() {
        let (ka, mut rx) = handler(60_000);
        ka.handle_peer_heartbeat();
        assert_eq!(rx.try_recv().unwrap(), r#"{"op":"pong"}"#);
    }

    #[tokio::test]
    async fn ack_recency_drives_liveness() {
        let (mut ka, _rx) = handler(60_000);
        // Never started, never acked: dead.
        assert!(!ka.is_alive(1_000));

        ka.start();
        assert!(ka.is_alive(1_000)); // clock starts at start()

        ka.handle_heartbeat_ack();
        assert!(ka.is_alive(1_000));
        ka.stop().await;
    }
}
