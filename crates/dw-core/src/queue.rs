//! Fixed-capacity FIFO buffers decoupling ingestion from persistence.
//!
//! The producer (the dispatch path) must never block on the consumer (disk
//! I/O), so under sustained overload a [`BoundedQueue`] degrades by dropping
//! the newest excess items and counting how many were lost — never by
//! growing without bound and never by blocking.
//!
//! The consumer takes whole batches: [`BoundedQueue::drain_all`] swaps the
//! internal buffer for an empty one under the lock, so a concurrent
//! `enqueue` lands either in the old batch or the new one — never lost,
//! never duplicated, and the consumer never sees a half-drained buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

/// Bounded FIFO with drop-on-full semantics and atomic drain.
pub struct BoundedQueue<T> {
    label: String,
    capacity: usize,
    warn_size: usize,
    items: Mutex<Vec<T>>,
    dropped: AtomicU64,
    growth_warned: AtomicBool,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items, logging a growth
    /// warning once its length crosses `warn_size`.
    pub fn new(label: impl Into<String>, capacity: usize, warn_size: usize) -> Self {
        Self {
            label: label.into(),
            capacity,
            warn_size,
            items: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            growth_warned: AtomicBool::new(false),
        }
    }

    /// Append an item, or drop it if the queue is full.
    ///
    /// Dropping increments the lost-item counter; every 100th drop emits a
    /// warning so a flooded log cannot itself become the bottleneck.
    pub fn enqueue(&self, item: T) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            drop(items);
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 100 == 1 {
                warn!("[{}] queue full ({}), dropped {n} total", self.label, self.capacity);
            }
            return;
        }
        items.push(item);
        if items.len() >= self.warn_size && !self.growth_warned.swap(true, Ordering::Relaxed) {
            info!("[{}] queue growing: {} of {} slots used", self.label, items.len(), self.capacity);
        }
    }

    /// Atomically take everything enqueued since the previous drain,
    /// in insertion order, leaving the queue empty.
    pub fn drain_all(&self) -> Vec<T> {
        let batch = std::mem::take(&mut *self.items.lock());
        self.growth_warned.store(false, Ordering::Relaxed);
        batch
    }

    /// Current number of buffered items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard all buffered items without returning them.
    pub fn clear(&self) {
        self.items.lock().clear();
        self.growth_warned.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_then_drain_preserves_order() {
        let q = BoundedQueue::new("test", 10, 8);
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.drain_all(), vec![1, 2, 3]);
        assert_eq!(q.len(), 0);
        assert!(q.drain_all().is_empty());
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let q = BoundedQueue::new("test", 3, 2);
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 2);
        // The oldest items survive; the newest excess was dropped.
        assert_eq!(q.drain_all(), vec![0, 1, 2]);
    }

    #[test]
    fn drain_resets_and_accepts_new_items() {
        let q = BoundedQueue::new("test", 2, 2);
        q.enqueue("a");
        q.enqueue("b");
        q.enqueue("c"); // dropped
        assert_eq!(q.drain_all(), vec!["a", "b"]);
        q.enqueue("d");
        assert_eq!(q.drain_all(), vec!["d"]);
        assert_eq!(q.dropped(), 1);
    }

    #[test]
    fn clear_discards_without_draining() {
        let q = BoundedQueue::new("test", 4, 4);
        q.enqueue(1);
        q.enqueue(2);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.dropped(), 0);
    }

    #[test]
    fn concurrent_enqueue_and_drain_loses_nothing() {
        use std::sync::Arc;

        let q = Arc::new(BoundedQueue::new("test", 1_000_000, 1_000_000));
        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for i in 0..10_000u64 {
                    q.enqueue(i);
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 10_000 {
            seen.extend(q.drain_all());
        }
        producer.join().unwrap();

        // Every item arrived exactly once, and batches preserved order.
        assert_eq!(seen.len(), 10_000);
        for (i, v) in seen.iter().enumerate() {
            assert_eq!(*v, i as u64);
        }
    }
}
