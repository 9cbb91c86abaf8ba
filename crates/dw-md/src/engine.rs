//! Ingestion engine — connection lifecycle, message dispatch, sampling.
//!
//! One engine owns one feed connection and everything downstream of it:
//! the per-symbol replica/tracker map, the three bounded queues, the batch
//! writer, and the keepalive handler for the live connection.
//!
//! The dispatch path is synchronous end to end: a parsed message is routed
//! into its queue or applied to its replica without ever awaiting, so
//! messages cannot reorder relative to timer firings. The only places this
//! engine waits are the reconnect backoff and the shutdown grace period.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use dw_core::config::FeedConfig;
use dw_core::error::DwError;
use dw_core::queue::BoundedQueue;
use dw_core::time_util;
use dw_core::types::{CandleRecord, FeedMessage, OrderBookSample, Side, TradeTick};
use dw_core::ws;
use dw_store::{BatchWriter, MarketStore};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::keepalive::KeepaliveHandler;
use crate::replica::{BookSnapshot, OrderBookReplica};
use crate::walls::{WallCluster, WallLifetime, WallTracker, WallTrackerConfig};

/// The transport-message parser: raw text frame -> parsed messages.
///
/// Injected per stream; the engine never touches raw payloads itself.
pub type MessageParser = Box<dyn Fn(&str) -> Vec<FeedMessage> + Send + Sync>;

/// Everything needed to drive one feed connection.
pub struct StreamSpec {
    /// Human-readable label used in logs (e.g. `"bybit_spot"`).
    pub label: String,
    /// Subscription requests sent immediately after connect.
    pub subscribe_msgs: Vec<String>,
    /// Heartbeat text we originate.
    pub ping_payload: String,
    /// Reply to a peer-initiated heartbeat.
    pub pong_payload: String,
    /// Extra HTTP headers for the WS handshake.
    pub extra_headers: HashMap<String, String>,
    pub parser: MessageParser,
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
    /// Terminal: the reconnect budget is exhausted. External supervision
    /// has to restart the process.
    GivenUp,
}

/// One symbol's mutable market state. Mutated only on the dispatch path.
struct SymbolState {
    replica: OrderBookReplica,
    tracker: WallTracker,
}

impl SymbolState {
    fn new(cfg: &FeedConfig) -> Self {
        Self {
            replica: OrderBookReplica::new(cfg.max_levels, cfg.staleness_threshold_ms),
            tracker: WallTracker::new(WallTrackerConfig {
                spoofing_threshold_ms: cfg.spoofing_threshold_ms,
                min_lifetime_ms: cfg.min_lifetime_ms,
                min_refills_for_iceberg: cfg.min_refills_for_iceberg,
                cluster_proximity_percent: cfg.cluster_proximity_percent,
                cluster_min_walls: cfg.cluster_min_walls,
                history_capacity: cfg.history_capacity,
            }),
        }
    }
}

struct EngineShared {
    cfg: FeedConfig,
    states: RwLock<AHashMap<String, SymbolState>>,
    candles: Arc<BoundedQueue<CandleRecord>>,
    samples: Arc<BoundedQueue<OrderBookSample>>,
    ticks: Arc<BoundedQueue<TradeTick>>,
    conn_state: Mutex<ConnState>,
    connecting: AtomicBool,
    stopping: AtomicBool,
}

impl EngineShared {
    fn set_state(&self, state: ConnState) {
        *self.conn_state.lock() = state;
    }

    /// Route one parsed message. Synchronous by contract — no suspension
    /// points on this path.
    fn dispatch(&self, msg: FeedMessage, keepalive: &KeepaliveHandler) {
        match msg {
            FeedMessage::SubscriptionAck { topic } => {
                debug!("subscription acknowledged: {topic}");
            }
            FeedMessage::HeartbeatIn => keepalive.handle_peer_heartbeat(),
            FeedMessage::HeartbeatAck => keepalive.handle_heartbeat_ack(),
            FeedMessage::Candle(candle) => self.candles.enqueue(candle),
            FeedMessage::TradeTicks(ticks) => {
                for tick in ticks {
                    self.ticks.enqueue(tick);
                }
            }
            FeedMessage::Book(update) => {
                let now_ms = time_util::now_ms();
                let mut states = self.states.write();
                match states.get_mut(&update.symbol) {
                    Some(state) => {
                        let SymbolState { replica, tracker } = state;
                        replica.apply_update(
                            update.kind,
                            &update.bids,
                            &update.asks,
                            update.update_id,
                            now_ms,
                            tracker,
                        );
                    }
                    None => trace!("book update for unknown symbol {}", update.symbol),
                }
            }
            FeedMessage::Unhandled { topic } => trace!("unhandled message: {topic}"),
        }
    }

    /// Sample every current (non-stale) replica into the sample queue.
    fn sample_books(&self) {
        let now_ms = time_util::now_ms();
        let states = self.states.read();
        for (symbol, state) in states.iter() {
            let Some(snap) = state.replica.get_snapshot(now_ms) else {
                continue;
            };
            let (Ok(bids_json), Ok(asks_json)) =
                (serde_json::to_string(&snap.bids), serde_json::to_string(&snap.asks))
            else {
                warn!("[{symbol}] could not encode book sample");
                continue;
            };
            self.samples.enqueue(OrderBookSample {
                symbol: symbol.clone(),
                timestamp_ms: now_ms,
                bids_json,
                asks_json,
            });
        }
    }
}

/// The ingestion orchestrator.
pub struct FeedEngine {
    shared: Arc<EngineShared>,
    writer: BatchWriter,
    conn_shutdown: Option<watch::Sender<bool>>,
    sampler_shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl FeedEngine {
    /// Build an engine for the configured symbols. The per-symbol state map
    /// is constructed here, at subscription scope, and torn down with the
    /// engine.
    pub fn new(cfg: FeedConfig, store: Arc<MarketStore>) -> Self {
        let mut states = AHashMap::new();
        for symbol in &cfg.symbols {
            states.insert(symbol.clone(), SymbolState::new(&cfg));
        }

        let writer = BatchWriter::new(store, cfg.batch_interval_ms, cfg.max_batch_rows);
        let shared = Arc::new(EngineShared {
            candles: Arc::new(BoundedQueue::new("candles", cfg.max_queue_size, cfg.warn_queue_size)),
            samples: Arc::new(BoundedQueue::new("book_samples", cfg.max_queue_size, cfg.warn_queue_size)),
            ticks: Arc::new(BoundedQueue::new("trade_ticks", cfg.max_queue_size, cfg.warn_queue_size)),
            states: RwLock::new(states),
            conn_state: Mutex::new(ConnState::Disconnected),
            connecting: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            cfg,
        });

        Self {
            shared,
            writer,
            conn_shutdown: None,
            sampler_shutdown: None,
            tasks: Vec::new(),
        }
    }

    /// Start the writer, the sampling timer, and the connection task.
    pub fn start(&mut self, spec: StreamSpec) {
        self.writer.start(
            Arc::clone(&self.shared.candles),
            Arc::clone(&self.shared.samples),
            Arc::clone(&self.shared.ticks),
        );

        // Sampling timer — decouples high-frequency book mutation from the
        // lower-frequency durable sampling rate.
        let (sampler_tx, mut sampler_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(shared.cfg.sample_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => shared.sample_books(),
                    _ = sampler_rx.changed() => return,
                }
            }
        }));
        self.sampler_shutdown = Some(sampler_tx);

        let (conn_tx, conn_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(connection_loop(shared, spec, conn_rx)));
        self.conn_shutdown = Some(conn_tx);

        info!("feed engine started ({} symbols)", self.shared.cfg.symbols.len());
    }

    /// Graceful drain: timers stop, the writer flushes once more, in-flight
    /// work gets a grace window, then the connection closes and the queues
    /// are cleared.
    pub async fn stop(&mut self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping feed engine");

        if let Some(tx) = self.sampler_shutdown.take() {
            let _ = tx.send(true);
        }
        self.writer.stop().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        if let Some(tx) = self.conn_shutdown.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        self.shared.candles.clear();
        self.shared.samples.clear();
        self.shared.ticks.clear();
        info!("feed engine stopped");
    }

    // -----------------------------------------------------------------------
    // Read API for downstream strategy/analytics code
    // -----------------------------------------------------------------------

    pub fn conn_state(&self) -> ConnState {
        *self.shared.conn_state.lock()
    }

    pub fn get_snapshot(&self, symbol: &str) -> Option<BookSnapshot> {
        let now_ms = time_util::now_ms();
        self.shared.states.read().get(symbol)?.replica.get_snapshot(now_ms)
    }

    pub fn is_ready(&self, symbol: &str) -> bool {
        self.shared
            .states
            .read()
            .get(symbol)
            .is_some_and(|s| s.replica.is_ready())
    }

    pub fn get_active_walls(&self, symbol: &str) -> Vec<WallLifetime> {
        self.shared
            .states
            .read()
            .get(symbol)
            .map(|s| s.tracker.active_walls())
            .unwrap_or_default()
    }

    pub fn get_cluster_at(&self, symbol: &str, price: f64, side: Side) -> Option<WallCluster> {
        let now_ms = time_util::now_ms();
        self.shared
            .states
            .read()
            .get(symbol)?
            .tracker
            .get_cluster_at(price, side, now_ms)
    }

    pub fn get_wall_strength(&self, symbol: &str, price: f64, side: Side) -> f64 {
        let now_ms = time_util::now_ms();
        self.shared
            .states
            .read()
            .get(symbol)
            .map(|s| s.tracker.get_wall_strength(price, side, now_ms))
            .unwrap_or(0.0)
    }

    pub fn is_wall_real(&self, symbol: &str, price: f64, side: Side) -> bool {
        let now_ms = time_util::now_ms();
        self.shared
            .states
            .read()
            .get(symbol)
            .is_some_and(|s| s.tracker.is_wall_real(price, side, now_ms))
    }

    pub fn is_spoofing(&self, symbol: &str, price: f64, side: Side) -> bool {
        self.shared
            .states
            .read()
            .get(symbol)
            .is_some_and(|s| s.tracker.is_spoofing(price, side))
    }

    pub fn is_iceberg(&self, symbol: &str, price: f64, side: Side) -> bool {
        self.shared
            .states
            .read()
            .get(symbol)
            .is_some_and(|s| s.tracker.is_iceberg(price, side))
    }

    /// Operator-triggered reset: the symbol's replica drops back to
    /// uninitialized and waits for the next snapshot.
    pub fn reset_symbol(&self, symbol: &str) {
        if let Some(state) = self.shared.states.write().get_mut(symbol) {
            state.replica.reset();
            info!("[{symbol}] replica reset");
        }
    }

    /// Current buffered counts: (candles, samples, ticks).
    pub fn queue_sizes(&self) -> (usize, usize, usize) {
        (
            self.shared.candles.len(),
            self.shared.samples.len(),
            self.shared.ticks.len(),
        )
    }

    /// Items lost to overload since start: (candles, samples, ticks).
    pub fn dropped_counts(&self) -> (u64, u64, u64) {
        (
            self.shared.candles.dropped(),
            self.shared.samples.dropped(),
            self.shared.ticks.dropped(),
        )
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

/// Connect, subscribe, read, reconnect — the feed's whole transport life.
async fn connection_loop(
    shared: Arc<EngineShared>,
    spec: StreamSpec,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let label = spec.label.clone();
    let mut attempts: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shared.connecting.swap(true, Ordering::SeqCst) {
            warn!("[{label}] connection attempt already in flight");
            return;
        }
        shared.set_state(ConnState::Connecting);
        info!("[{label}] connecting to {}", shared.cfg.ws_url);

        let result = ws::connect(&shared.cfg.ws_url, &spec.extra_headers).await;
        shared.connecting.store(false, Ordering::SeqCst);

        let ws_stream = match result {
            Ok(stream) => {
                attempts = 0; // budget resets on every successful connect
                shared.set_state(ConnState::Connected);
                info!("[{label}] connected");
                stream
            }
            Err(e) => {
                error!("[{label}] connection failed: {e:#}");
                shared.set_state(ConnState::Disconnected);
                if !schedule_reconnect(&shared, &label, &mut attempts, &mut shutdown_rx).await {
                    return;
                }
                continue;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let mut subscribed = true;
        for sub in &spec.subscribe_msgs {
            debug!("[{label}] subscribing: {sub}");
            if let Err(e) = ws_write.send(Message::Text(sub.clone().into())).await {
                error!("[{label}] subscribe send failed: {e}");
                subscribed = false;
                break;
            }
        }
        if !subscribed {
            shared.set_state(ConnState::Disconnected);
            if !schedule_reconnect(&shared, &label, &mut attempts, &mut shutdown_rx).await {
                return;
            }
            continue;
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
        let mut keepalive = KeepaliveHandler::new(
            shared.cfg.ping_interval_ms,
            spec.ping_payload.clone(),
            spec.pong_payload.clone(),
            outbound_tx,
        );
        keepalive.start();

        // The connection counts as dead after three silent ping windows.
        let max_silence_ms = shared.cfg.ping_interval_ms * 3;
        let mut liveness =
            tokio::time::interval(Duration::from_millis(shared.cfg.ping_interval_ms));
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        liveness.tick().await;

        // Main read/write loop
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("[{label}] shutdown signal received");
                    keepalive.stop().await;
                    let _ = ws_write.close().await;
                    return;
                }

                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for parsed in (spec.parser)(&text) {
                                shared.dispatch(parsed, &keepalive);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("[{label}] received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("[{label}] read error: {e}");
                            break;
                        }
                        None => {
                            warn!("[{label}] stream ended");
                            break;
                        }
                        _ => {} // Binary, Pong, Frame — ignore
                    }
                }

                Some(out) = outbound_rx.recv() => {
                    if let Err(e) = ws_write.send(Message::Text(out.into())).await {
                        error!("[{label}] send error: {e}");
                        break;
                    }
                }

                _ = liveness.tick() => {
                    if !keepalive.is_alive(max_silence_ms) {
                        warn!("[{label}] no heartbeat ack in {max_silence_ms}ms, forcing reconnect");
                        break;
                    }
                }
            }
        }

        keepalive.stop().await;
        shared.set_state(ConnState::Disconnected);
        if !schedule_reconnect(&shared, &label, &mut attempts, &mut shutdown_rx).await {
            return;
        }
    }
}

/// Linear backoff: attempt `n` waits `n × base`. Returns `false` once the
/// budget is exhausted or shutdown was requested during the wait.
async fn schedule_reconnect(
    shared: &EngineShared,
    label: &str,
    attempts: &mut u32,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    *attempts += 1;
    if *attempts > shared.cfg.max_reconnect_attempts {
        shared.set_state(ConnState::GivenUp);
        error!("[{label}] {}", DwError::GivenUp(shared.cfg.max_reconnect_attempts));
        return false;
    }
    shared.set_state(ConnState::ReconnectScheduled);
    let delay = Duration::from_millis(shared.cfg.reconnect_base_delay_ms * u64::from(*attempts));
    warn!("[{label}] reconnect attempt {attempts} in {delay:?}");
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown_rx.changed() => false,
    }
}
