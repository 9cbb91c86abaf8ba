//! Resting-order ("wall") analytics derived from the book mutation stream.
//!
//! The tracker observes every level insert/update/delete the replica
//! applies and maintains one [`WallLifetime`] per live `(side, price)`.
//! From that it classifies behavior:
//!
//! - **spoofing** — a wall pulled shortly after it appeared
//! - **iceberg** — a wall that keeps refilling after being eaten into
//! - **clusters** — groups of nearby walls acting as one zone
//!
//! Both classification flags are sticky: once set on a wall they are never
//! re-evaluated downward. All events also land in a single bounded history
//! ring, so a removed wall's trail stays inspectable after its active
//! record is gone.

use std::collections::VecDeque;

use ahash::AHashMap;
use dw_core::types::Side;
use tracing::debug;

use crate::replica::BookObserver;

/// Denominator for the cluster size sub-score (average wall size at which
/// the 0–50 score saturates).
const CLUSTER_REF_SIZE: f64 = 10_000.0;

/// Denominator for the cluster lifetime sub-score.
const CLUSTER_REF_LIFETIME_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What happened to a wall at one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallEventKind {
    Added,
    Refilled,
    Absorbed,
    Removed,
}

/// Why a wall was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Spoofing,
    FilledOrCancelled,
}

/// One entry in a wall's event trail and the global history ring.
#[derive(Debug, Clone)]
pub struct WallEvent {
    pub timestamp_ms: u64,
    pub kind: WallEventKind,
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub reason: Option<RemovalReason>,
}

// ---------------------------------------------------------------------------
// Wall lifetime record
// ---------------------------------------------------------------------------

/// Lifetime record for one resting order, keyed by `(side, price)`.
#[derive(Debug, Clone)]
pub struct WallLifetime {
    pub price: f64,
    pub side: Side,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub max_size: f64,
    pub current_size: f64,
    /// Cumulative size decreases — volume eaten out of the wall.
    pub absorbed_volume: f64,
    pub refill_count: u32,
    /// Sticky — set at removal, never cleared.
    pub is_spoofing: bool,
    /// Sticky — set on the qualifying refill, never cleared.
    pub is_iceberg: bool,
    pub events: Vec<WallEvent>,
}

impl WallLifetime {
    fn new(price: f64, size: f64, side: Side, now_ms: u64) -> Self {
        Self {
            price,
            side,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            max_size: size,
            current_size: size,
            absorbed_volume: 0.0,
            refill_count: 0,
            is_spoofing: false,
            is_iceberg: false,
            events: Vec::new(),
        }
    }

    pub fn lifetime_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.first_seen_ms)
    }
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

/// A transient grouping of nearby active walls on one side.
///
/// Recomputed on demand, never stored or persisted.
#[derive(Debug, Clone)]
pub struct WallCluster {
    pub side: Side,
    pub price_low: f64,
    pub price_high: f64,
    pub total_size: f64,
    pub wall_count: usize,
    pub avg_lifetime_ms: u64,
    /// 0–100: a size sub-score and a lifetime sub-score, each capped at 50.
    pub strength: f64,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Tuning knobs for wall classification.
#[derive(Debug, Clone)]
pub struct WallTrackerConfig {
    pub spoofing_threshold_ms: u64,
    pub min_lifetime_ms: u64,
    pub min_refills_for_iceberg: u32,
    pub cluster_proximity_percent: f64,
    pub cluster_min_walls: usize,
    pub history_capacity: usize,
}

impl Default for WallTrackerConfig {
    fn default() -> Self {
        Self {
            spoofing_threshold_ms: 5_000,
            min_lifetime_ms: 30_000,
            min_refills_for_iceberg: 3,
            cluster_proximity_percent: 0.5,
            cluster_min_walls: 2,
            history_capacity: 1_000,
        }
    }
}

/// Observer of one symbol's replica; owns that symbol's wall state.
pub struct WallTracker {
    cfg: WallTrackerConfig,
    walls: AHashMap<(Side, u64), WallLifetime>,
    history: VecDeque<WallEvent>,
}

fn key(side: Side, price: f64) -> (Side, u64) {
    (side, price.to_bits())
}

impl WallTracker {
    pub fn new(cfg: WallTrackerConfig) -> Self {
        Self {
            cfg,
            walls: AHashMap::new(),
            history: VecDeque::new(),
        }
    }

    /// Record an insert/update observation at a price level.
    pub fn observe_mutation(&mut self, price: f64, size: f64, side: Side, now_ms: u64) {
        let min_refills = self.cfg.min_refills_for_iceberg;
        match self.walls.entry(key(side, price)) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                let wall = slot.insert(WallLifetime::new(price, size, side, now_ms));
                let event = WallEvent {
                    timestamp_ms: now_ms,
                    kind: WallEventKind::Added,
                    price,
                    size,
                    side,
                    reason: None,
                };
                wall.events.push(event.clone());
                push_history(&mut self.history, self.cfg.history_capacity, event);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let wall = slot.get_mut();
                if size < wall.current_size {
                    wall.absorbed_volume += wall.current_size - size;
                    let event = WallEvent {
                        timestamp_ms: now_ms,
                        kind: WallEventKind::Absorbed,
                        price,
                        size,
                        side,
                        reason: None,
                    };
                    wall.events.push(event.clone());
                    push_history(&mut self.history, self.cfg.history_capacity, event);
                } else if size > wall.current_size {
                    wall.refill_count += 1;
                    let event = WallEvent {
                        timestamp_ms: now_ms,
                        kind: WallEventKind::Refilled,
                        price,
                        size,
                        side,
                        reason: None,
                    };
                    wall.events.push(event.clone());
                    push_history(&mut self.history, self.cfg.history_capacity, event);
                    if wall.refill_count >= min_refills && !wall.is_iceberg {
                        wall.is_iceberg = true;
                        debug!("iceberg detected: {side} {price} after {} refills", wall.refill_count);
                    }
                }
                // Equal size: just a liveness touch, no event.
                wall.current_size = size;
                wall.max_size = wall.max_size.max(size);
                wall.last_seen_ms = now_ms;
            }
        }
    }

    /// Record that a price level disappeared from the replica.
    ///
    /// Classifies spoofing by total lifetime, appends the terminal event to
    /// the history, and drops the active record. The wall's earlier events
    /// stay in the bounded history until evicted by newer entries.
    pub fn observe_removal(&mut self, price: f64, side: Side, now_ms: u64) {
        let Some(mut wall) = self.walls.remove(&key(side, price)) else {
            return;
        };

        if wall.lifetime_ms(now_ms) < self.cfg.spoofing_threshold_ms {
            wall.is_spoofing = true;
        }
        let reason = if wall.is_spoofing {
            RemovalReason::Spoofing
        } else {
            RemovalReason::FilledOrCancelled
        };
        let event = WallEvent {
            timestamp_ms: now_ms,
            kind: WallEventKind::Removed,
            price,
            size: wall.current_size,
            side,
            reason: Some(reason),
        };
        push_history(&mut self.history, self.cfg.history_capacity, event);
        if wall.is_spoofing {
            debug!("spoofing wall pulled: {side} {price} after {}ms", wall.lifetime_ms(now_ms));
        }
    }

    // -----------------------------------------------------------------------
    // Read API
    // -----------------------------------------------------------------------

    /// All currently active walls, best-price ordering left to the caller.
    pub fn active_walls(&self) -> Vec<WallLifetime> {
        let mut walls: Vec<WallLifetime> = self.walls.values().cloned().collect();
        walls.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        walls
    }

    pub fn wall_at(&self, price: f64, side: Side) -> Option<&WallLifetime> {
        self.walls.get(&key(side, price))
    }

    /// Lifetime at least `min_lifetime_ms` and not flagged as spoofing.
    pub fn is_wall_real(&self, price: f64, side: Side, now_ms: u64) -> bool {
        match self.wall_at(price, side) {
            Some(wall) => wall.lifetime_ms(now_ms) >= self.cfg.min_lifetime_ms && !wall.is_spoofing,
            None => false,
        }
    }

    /// Composite wall strength in `[0, 1]`.
    ///
    /// `min(lifetime/min_lifetime, 1) × 0.4 + (current/max) × 0.3 +
    /// 0.3 if iceberg`, capped at 1. Absent or spoofing walls score 0.
    pub fn get_wall_strength(&self, price: f64, side: Side, now_ms: u64) -> f64 {
        let Some(wall) = self.wall_at(price, side) else {
            return 0.0;
        };
        if wall.is_spoofing {
            return 0.0;
        }
        let lifetime_part =
            (wall.lifetime_ms(now_ms) as f64 / self.cfg.min_lifetime_ms as f64).min(1.0) * 0.4;
        let size_part = if wall.max_size > 0.0 {
            wall.current_size / wall.max_size * 0.3
        } else {
            0.0
        };
        let iceberg_part = if wall.is_iceberg { 0.3 } else { 0.0 };
        (lifetime_part + size_part + iceberg_part).min(1.0)
    }

    pub fn is_spoofing(&self, price: f64, side: Side) -> bool {
        self.wall_at(price, side).is_some_and(|w| w.is_spoofing)
    }

    pub fn is_iceberg(&self, price: f64, side: Side) -> bool {
        self.wall_at(price, side).is_some_and(|w| w.is_iceberg)
    }

    /// Group active walls into proximity clusters, per side.
    ///
    /// Walls are scanned in price order; a wall joins the running group
    /// when its distance to the previous wall is within
    /// `cluster_proximity_percent` of that wall's price. Groups smaller
    /// than `cluster_min_walls` are discarded.
    pub fn detect_clusters(&self, now_ms: u64) -> Vec<WallCluster> {
        let mut clusters = Vec::new();
        for side in [Side::Bid, Side::Ask] {
            let mut walls: Vec<&WallLifetime> =
                self.walls.values().filter(|w| w.side == side).collect();
            walls.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));

            let mut group: Vec<&WallLifetime> = Vec::new();
            for wall in walls {
                match group.last() {
                    Some(prev)
                        if wall.price - prev.price
                            <= prev.price * self.cfg.cluster_proximity_percent / 100.0 =>
                    {
                        group.push(wall);
                    }
                    Some(_) => {
                        if let Some(cluster) = self.build_cluster(&group, side, now_ms) {
                            clusters.push(cluster);
                        }
                        group = vec![wall];
                    }
                    None => group.push(wall),
                }
            }
            if let Some(cluster) = self.build_cluster(&group, side, now_ms) {
                clusters.push(cluster);
            }
        }
        clusters
    }

    /// The cluster whose price range contains `price`, if any.
    pub fn get_cluster_at(&self, price: f64, side: Side, now_ms: u64) -> Option<WallCluster> {
        self.detect_clusters(now_ms)
            .into_iter()
            .find(|c| c.side == side && c.price_low <= price && price <= c.price_high)
    }

    /// Recent wall events, oldest first, bounded by `history_capacity`.
    pub fn history(&self) -> impl Iterator<Item = &WallEvent> {
        self.history.iter()
    }

    pub fn active_count(&self) -> usize {
        self.walls.len()
    }

    fn build_cluster(
        &self,
        group: &[&WallLifetime],
        side: Side,
        now_ms: u64,
    ) -> Option<WallCluster> {
        if group.is_empty() || group.len() < self.cfg.cluster_min_walls {
            return None;
        }
        let total_size: f64 = group.iter().map(|w| w.current_size).sum();
        let avg_size = total_size / group.len() as f64;
        let avg_lifetime_ms =
            group.iter().map(|w| w.lifetime_ms(now_ms)).sum::<u64>() / group.len() as u64;

        let size_score = (avg_size / CLUSTER_REF_SIZE * 50.0).min(50.0);
        let lifetime_score =
            (avg_lifetime_ms as f64 / CLUSTER_REF_LIFETIME_MS as f64 * 50.0).min(50.0);

        Some(WallCluster {
            side,
            price_low: group.first().map(|w| w.price).unwrap_or_default(),
            price_high: group.last().map(|w| w.price).unwrap_or_default(),
            total_size,
            wall_count: group.len(),
            avg_lifetime_ms,
            strength: size_score + lifetime_score,
        })
    }
}

impl BookObserver for WallTracker {
    fn on_level_mutated(&mut self, price: f64, size: f64, side: Side, now_ms: u64) {
        self.observe_mutation(price, size, side, now_ms);
    }

    fn on_level_removed(&mut self, price: f64, side: Side, now_ms: u64) {
        self.observe_removal(price, side, now_ms);
    }
}

fn push_history(history: &mut VecDeque<WallEvent>, capacity: usize, event: WallEvent) {
    history.push_back(event);
    while history.len() > capacity {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> WallTracker {
        WallTracker::new(WallTrackerConfig::default())
    }

    #[test]
    fn new_wall_records_added_event() {
        let mut t = tracker();
        t.observe_mutation(100.0, 50_000.0, Side::Bid, 1_000);

        let wall = t.wall_at(100.0, Side::Bid).unwrap();
        assert_eq!(wall.first_seen_ms, 1_000);
        assert_eq!(wall.max_size, 50_000.0);
        assert_eq!(wall.events.len(), 1);
        assert_eq!(wall.events[0].kind, WallEventKind::Added);
        assert_eq!(t.history().count(), 1);
    }

    #[test]
    fn fast_removal_is_spoofing() {
        let mut t = tracker();
        t.observe_mutation(100.0, 50_000.0, Side::Bid, 1_000);
        t.observe_removal(100.0, Side::Bid, 4_000); // lived 3s < 5s threshold

        assert!(t.wall_at(100.0, Side::Bid).is_none());
        let last = t.history().last().unwrap();
        assert_eq!(last.kind, WallEventKind::Removed);
        assert_eq!(last.reason, Some(RemovalReason::Spoofing));
    }

    #[test]
    fn slow_removal_is_not_spoofing() {
        let mut t = tracker();
        t.observe_mutation(100.0, 50_000.0, Side::Ask, 1_000);
        t.observe_removal(100.0, Side::Ask, 10_000);

        let last = t.history().last().unwrap();
        assert_eq!(last.reason, Some(RemovalReason::FilledOrCancelled));
    }

    #[test]
    fn removal_of_unknown_level_is_noop() {
        let mut t = tracker();
        t.observe_removal(100.0, Side::Bid, 1_000);
        assert_eq!(t.history().count(), 0);
    }

    #[test]
    fn three_refills_make_an_iceberg_two_do_not() {
        let mut t = tracker();
        t.observe_mutation(100.0, 50_000.0, Side::Bid, 1_000);
        // Two absorb/refill rounds: not yet an iceberg.
        for i in 0..2u64 {
            t.observe_mutation(100.0, 40_000.0, Side::Bid, 2_000 + i * 100);
            t.observe_mutation(100.0, 50_000.0, Side::Bid, 2_050 + i * 100);
        }
        assert!(!t.is_iceberg(100.0, Side::Bid));

        // Third round crosses the threshold.
        t.observe_mutation(100.0, 40_000.0, Side::Bid, 3_000);
        t.observe_mutation(100.0, 50_000.0, Side::Bid, 3_050);
        assert!(t.is_iceberg(100.0, Side::Bid));

        let wall = t.wall_at(100.0, Side::Bid).unwrap();
        assert_eq!(wall.refill_count, 3);
        assert!(wall.absorbed_volume > 0.0);
        assert_eq!(wall.absorbed_volume, 30_000.0);
    }

    #[test]
    fn absorbed_volume_accumulates_decreases_only() {
        let mut t = tracker();
        t.observe_mutation(100.0, 10_000.0, Side::Ask, 1_000);
        t.observe_mutation(100.0, 7_000.0, Side::Ask, 2_000);
        t.observe_mutation(100.0, 6_500.0, Side::Ask, 3_000);
        t.observe_mutation(100.0, 9_000.0, Side::Ask, 4_000); // refill, not absorption

        let wall = t.wall_at(100.0, Side::Ask).unwrap();
        assert_eq!(wall.absorbed_volume, 3_500.0);
        assert_eq!(wall.max_size, 10_000.0);
        assert_eq!(wall.current_size, 9_000.0);
    }

    #[test]
    fn equal_size_touch_updates_last_seen_without_event() {
        let mut t = tracker();
        t.observe_mutation(100.0, 10_000.0, Side::Bid, 1_000);
        t.observe_mutation(100.0, 10_000.0, Side::Bid, 5_000);

        let wall = t.wall_at(100.0, Side::Bid).unwrap();
        assert_eq!(wall.last_seen_ms, 5_000);
        assert_eq!(wall.events.len(), 1); // just the Added
    }

    #[test]
    fn history_ring_is_bounded_oldest_first_out() {
        let mut t = WallTracker::new(WallTrackerConfig {
            history_capacity: 4,
            ..Default::default()
        });
        for i in 0..6u64 {
            let price = 100.0 + i as f64;
            t.observe_mutation(price, 1_000.0, Side::Bid, 1_000 + i);
        }
        assert_eq!(t.history().count(), 4);
        // The two earliest Added events were evicted.
        let first = t.history().next().unwrap();
        assert_eq!(first.price, 102.0);
    }

    #[test]
    fn removed_wall_events_survive_in_history() {
        let mut t = tracker();
        t.observe_mutation(100.0, 5_000.0, Side::Bid, 1_000);
        t.observe_removal(100.0, Side::Bid, 10_000);

        assert_eq!(t.active_count(), 0);
        let kinds: Vec<WallEventKind> = t.history().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![WallEventKind::Added, WallEventKind::Removed]);
    }

    #[test]
    fn clusters_merge_adjacent_walls_only() {
        let mut t = tracker();
        // Two walls 0.1% apart, one far away.
        t.observe_mutation(100.0, 20_000.0, Side::Bid, 1_000);
        t.observe_mutation(100.1, 20_000.0, Side::Bid, 1_000);
        t.observe_mutation(150.0, 20_000.0, Side::Bid, 1_000);

        let clusters = t.detect_clusters(61_000);
        assert_eq!(clusters.len(), 1);
        let c = &clusters[0];
        assert_eq!(c.wall_count, 2);
        assert_eq!(c.price_low, 100.0);
        assert_eq!(c.price_high, 100.1);
        assert_eq!(c.total_size, 40_000.0);
        // Both sub-scores saturated: avg size >= reference, lifetime >= reference.
        assert_eq!(c.strength, 100.0);
    }

    #[test]
    fn cluster_lookup_by_price() {
        let mut t = tracker();
        t.observe_mutation(100.0, 20_000.0, Side::Ask, 1_000);
        t.observe_mutation(100.2, 20_000.0, Side::Ask, 1_000);

        assert!(t.get_cluster_at(100.1, Side::Ask, 2_000).is_some());
        assert!(t.get_cluster_at(100.1, Side::Bid, 2_000).is_none());
        assert!(t.get_cluster_at(101.0, Side::Ask, 2_000).is_none());
    }

    #[test]
    fn lone_wall_is_not_a_cluster() {
        let mut t = tracker();
        t.observe_mutation(100.0, 20_000.0, Side::Bid, 1_000);
        assert!(t.detect_clusters(2_000).is_empty());
    }

    #[test]
    fn wall_strength_bounds_and_components() {
        let mut t = tracker();
        assert_eq!(t.get_wall_strength(100.0, Side::Bid, 1_000), 0.0);

        t.observe_mutation(100.0, 10_000.0, Side::Bid, 1_000);
        // Young wall at full size: only a sliver of lifetime credit.
        let young = t.get_wall_strength(100.0, Side::Bid, 1_100);
        assert!(young > 0.3 && young < 0.4);

        // Old enough for full lifetime credit.
        let aged = t.get_wall_strength(100.0, Side::Bid, 31_000);
        assert!((aged - 0.7).abs() < 1e-9);

        // Iceberg flag adds the last component, capped at 1.
        t.observe_mutation(100.0, 8_000.0, Side::Bid, 31_100);
        t.observe_mutation(100.0, 10_000.0, Side::Bid, 31_200);
        t.observe_mutation(100.0, 8_000.0, Side::Bid, 31_300);
        t.observe_mutation(100.0, 10_000.0, Side::Bid, 31_400);
        t.observe_mutation(100.0, 8_000.0, Side::Bid, 31_500);
        t.observe_mutation(100.0, 10_000.0, Side::Bid, 31_600);
        assert!(t.is_iceberg(100.0, Side::Bid));
        assert_eq!(t.get_wall_strength(100.0, Side::Bid, 40_000), 1.0);
    }

    #[test]
    fn wall_real_requires_min_lifetime() {
        let mut t = tracker();
        t.observe_mutation(100.0, 10_000.0, Side::Ask, 1_000);
        assert!(!t.is_wall_real(100.0, Side::Ask, 10_000));
        assert!(t.is_wall_real(100.0, Side::Ask, 31_000));
        assert!(!t.is_wall_real(99.0, Side::Ask, 31_000));
    }
}
