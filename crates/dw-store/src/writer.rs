//! Timer-driven batch writer.
//!
//! Drains the three bounded queues on a fixed interval and writes each
//! batch in chunks bounded by `max_batch_rows`. A failed chunk costs
//! exactly that chunk: the error is logged, the remaining chunks and the
//! timer loop continue. On shutdown the writer performs one final
//! drain-and-write pass, best effort, so a clean stop loses nothing that
//! reached the queues.

use std::sync::Arc;
use std::time::Duration;

use dw_core::queue::BoundedQueue;
use dw_core::types::{CandleRecord, OrderBookSample, TradeTick};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::store::MarketStore;

pub struct BatchWriter {
    store: Arc<MarketStore>,
    interval: Duration,
    max_rows: usize,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl BatchWriter {
    pub fn new(store: Arc<MarketStore>, batch_interval_ms: u64, max_batch_rows: usize) -> Self {
        Self {
            store,
            interval: Duration::from_millis(batch_interval_ms),
            max_rows: max_batch_rows,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Begin the periodic drain-and-write loop over the three queues.
    pub fn start(
        &mut self,
        candles: Arc<BoundedQueue<CandleRecord>>,
        samples: Arc<BoundedQueue<OrderBookSample>>,
        ticks: Arc<BoundedQueue<TradeTick>>,
    ) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let interval = self.interval;
        let max_rows = self.max_rows;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        flush_once(&store, &candles, &samples, &ticks, max_rows);
                    }
                    _ = shutdown_rx.changed() => {
                        // Final flush: whatever accumulated since the last
                        // tick still gets one write attempt.
                        flush_once(&store, &candles, &samples, &ticks, max_rows);
                        info!("batch writer stopped after final flush");
                        return;
                    }
                }
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
    }

    /// Stop the timer and wait for the final flush to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// One full drain-and-write pass across all three queues.
fn flush_once(
    store: &MarketStore,
    candles: &BoundedQueue<CandleRecord>,
    samples: &BoundedQueue<OrderBookSample>,
    ticks: &BoundedQueue<TradeTick>,
    max_rows: usize,
) {
    write_chunked("candles", &candles.drain_all(), max_rows, |chunk| {
        store.insert_candles(chunk)
    });
    write_chunked("book_samples", &samples.drain_all(), max_rows, |chunk| {
        store.insert_book_samples(chunk)
    });
    write_chunked("trade_ticks", &ticks.drain_all(), max_rows, |chunk| {
        store.insert_ticks(chunk)
    });
}

/// Write a batch in `max_rows`-sized chunks, isolating failures per chunk.
fn write_chunked<T>(
    label: &str,
    batch: &[T],
    max_rows: usize,
    insert: impl Fn(&[T]) -> anyhow::Result<usize>,
) {
    if batch.is_empty() {
        return;
    }
    let mut written = 0;
    for chunk in batch.chunks(max_rows) {
        match insert(chunk) {
            Ok(n) => written += n,
            Err(e) => warn!("[{label}] chunk of {} rows failed: {e:#}", chunk.len()),
        }
    }
    debug!("[{label}] wrote {written} of {} drained rows", batch.len());
}
