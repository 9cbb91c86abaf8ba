//! Local order-book replica maintained from snapshot and delta messages.
//!
//! The replica mirrors the feed: it preserves whatever the feed says, even a
//! crossed book — market-logic validation is not its job. Memory stays
//! bounded by evicting past `max_levels` per side (bids keep the highest
//! prices, asks the lowest), and a replica that has gone silent past the
//! staleness threshold refuses to present itself as current.
//!
//! Every individual level mutation is reported to an injected
//! [`BookObserver`] as it is applied, so analytics are computed
//! incrementally from the mutation stream rather than by diffing whole
//! books.

use dw_core::types::{BookLevel, BookUpdateKind, Side};
use tracing::trace;

/// Tolerance for floating-point price comparison.
pub const PRICE_EPS: f64 = 1e-10;

/// Receiver of per-level mutations from the replica.
///
/// Injected rather than referenced directly so the replica is testable on
/// its own and additional observers can be attached later.
pub trait BookObserver {
    /// A level was inserted or its size changed.
    fn on_level_mutated(&mut self, price: f64, size: f64, side: Side, now_ms: u64);
    /// A level disappeared (explicit delete, snapshot turnover, or eviction).
    fn on_level_removed(&mut self, price: f64, side: Side, now_ms: u64);
}

/// Observer that ignores all mutations.
pub struct NoopObserver;

impl BookObserver for NoopObserver {
    fn on_level_mutated(&mut self, _price: f64, _size: f64, _side: Side, _now_ms: u64) {}
    fn on_level_removed(&mut self, _price: f64, _side: Side, _now_ms: u64) {}
}

/// Point-in-time read view of a replica.
#[derive(Debug, Clone)]
pub struct BookSnapshot {
    /// Sorted descending — best bid first.
    pub bids: Vec<BookLevel>,
    /// Sorted ascending — best ask first.
    pub asks: Vec<BookLevel>,
    pub timestamp_ms: u64,
    pub update_id: u64,
}

/// Per-symbol authoritative in-memory book state.
pub struct OrderBookReplica {
    max_levels: usize,
    staleness_threshold_ms: u64,
    /// Bid levels, sorted descending by price.
    bids: Vec<BookLevel>,
    /// Ask levels, sorted ascending by price.
    asks: Vec<BookLevel>,
    last_update_id: u64,
    last_mutation_ms: u64,
    initialized: bool,
}

impl OrderBookReplica {
    pub fn new(max_levels: usize, staleness_threshold_ms: u64) -> Self {
        Self {
            max_levels,
            staleness_threshold_ms,
            bids: Vec::new(),
            asks: Vec::new(),
            last_update_id: 0,
            last_mutation_ms: 0,
            initialized: false,
        }
    }

    /// Apply a snapshot or delta.
    ///
    /// Snapshots replace both sides (size-0 entries are ignored) and mark
    /// the replica initialized. Deltas before the first snapshot are
    /// discarded — the feed delivers a snapshot shortly after subscription,
    /// and pre-snapshot deltas are not buffered or replayed. `update_id` is
    /// recorded as-is; contiguity between consecutive deltas is not checked,
    /// so a transport-dropped delta goes unnoticed until the next snapshot.
    pub fn apply_update(
        &mut self,
        kind: BookUpdateKind,
        bids: &[BookLevel],
        asks: &[BookLevel],
        update_id: u64,
        now_ms: u64,
        observer: &mut dyn BookObserver,
    ) {
        match kind {
            BookUpdateKind::Snapshot => {
                let old_bids = std::mem::take(&mut self.bids);
                let old_asks = std::mem::take(&mut self.asks);

                self.bids = build_side(bids, Side::Bid, self.max_levels);
                self.asks = build_side(asks, Side::Ask, self.max_levels);

                for level in &self.bids {
                    observer.on_level_mutated(level.price, level.size, Side::Bid, now_ms);
                }
                for level in &self.asks {
                    observer.on_level_mutated(level.price, level.size, Side::Ask, now_ms);
                }
                report_vanished(&old_bids, &self.bids, Side::Bid, now_ms, observer);
                report_vanished(&old_asks, &self.asks, Side::Ask, now_ms, observer);

                self.initialized = true;
            }
            BookUpdateKind::Delta => {
                if !self.initialized {
                    trace!("delta before snapshot discarded (update_id={update_id})");
                    return;
                }
                for level in bids {
                    apply_level(&mut self.bids, Side::Bid, level.price, level.size, now_ms, observer);
                }
                evict_excess(&mut self.bids, Side::Bid, self.max_levels, now_ms, observer);

                for level in asks {
                    apply_level(&mut self.asks, Side::Ask, level.price, level.size, now_ms, observer);
                }
                evict_excess(&mut self.asks, Side::Ask, self.max_levels, now_ms, observer);
            }
        }

        self.last_update_id = update_id;
        self.last_mutation_ms = now_ms;
    }

    /// Current book state, or `None` when there is nothing trustworthy to
    /// show: not yet initialized, or silent past the staleness threshold.
    pub fn get_snapshot(&self, now_ms: u64) -> Option<BookSnapshot> {
        if !self.initialized {
            return None;
        }
        if now_ms.saturating_sub(self.last_mutation_ms) > self.staleness_threshold_ms {
            return None;
        }
        Some(BookSnapshot {
            bids: self.bids.clone(),
            asks: self.asks.clone(),
            timestamp_ms: self.last_mutation_ms,
            update_id: self.last_update_id,
        })
    }

    /// Initialized with at least one level on each side.
    pub fn is_ready(&self) -> bool {
        self.initialized && !self.bids.is_empty() && !self.asks.is_empty()
    }

    /// Clear all state back to uninitialized.
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.last_mutation_ms = 0;
        self.initialized = false;
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }
}

// ---------------------------------------------------------------------------
// Side helpers
// ---------------------------------------------------------------------------

fn is_better(side: Side, a: f64, b: f64) -> bool {
    match side {
        Side::Bid => a > b,
        Side::Ask => a < b,
    }
}

/// Build a freshly sorted, bounded side from snapshot levels.
fn build_side(levels: &[BookLevel], side: Side, max_levels: usize) -> Vec<BookLevel> {
    let mut out: Vec<BookLevel> = levels.iter().copied().filter(|l| l.size > 0.0).collect();
    out.sort_by(|a, b| {
        if is_better(side, a.price, b.price) {
            std::cmp::Ordering::Less
        } else if is_better(side, b.price, a.price) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });
    out.truncate(max_levels);
    out
}

/// Apply one delta level to a sorted side.
///
/// `size == 0` removes the level (no-op if absent); `size > 0` overwrites in
/// place or inserts at the correct sorted position.
fn apply_level(
    levels: &mut Vec<BookLevel>,
    side: Side,
    price: f64,
    size: f64,
    now_ms: u64,
    observer: &mut dyn BookObserver,
) {
    if let Some(idx) = levels.iter().position(|l| (l.price - price).abs() < PRICE_EPS) {
        if size == 0.0 {
            levels.remove(idx);
            observer.on_level_removed(price, side, now_ms);
        } else {
            levels[idx].size = size;
            observer.on_level_mutated(price, size, side, now_ms);
        }
    } else if size > 0.0 {
        let pos = levels
            .iter()
            .position(|l| is_better(side, price, l.price))
            .unwrap_or(levels.len());
        levels.insert(pos, BookLevel::new(price, size));
        observer.on_level_mutated(price, size, side, now_ms);
    }
}

/// Trim a side past `max_levels`, reporting each evicted (worst) level.
fn evict_excess(
    levels: &mut Vec<BookLevel>,
    side: Side,
    max_levels: usize,
    now_ms: u64,
    observer: &mut dyn BookObserver,
) {
    while levels.len() > max_levels {
        if let Some(worst) = levels.pop() {
            observer.on_level_removed(worst.price, side, now_ms);
        }
    }
}

/// Report removals for prices present before a snapshot but absent after.
fn report_vanished(
    old: &[BookLevel],
    new: &[BookLevel],
    side: Side,
    now_ms: u64,
    observer: &mut dyn BookObserver,
) {
    for level in old {
        let survives = new.iter().any(|l| (l.price - level.price).abs() < PRICE_EPS);
        if !survives {
            observer.on_level_removed(level.price, side, now_ms);
        }
    }
}
