//! Per-user FIFO priority order queue.
//!
//! One `PerUserOrderQueue` is owned per active user by `ntx-runtime`. Items
//! are enqueued as strategy signals resolve through risk/conflict checks;
//! a single-flight worker drains each user's queue, one item at a time, no
//! faster than `min_handler_gap_ms` apart. This struct only does the pure
//! bookkeeping (ordering, dedup, depth cap, gap enforcement); the actual
//! "call the handler" loop lives in `ntx-runtime` since it needs async I/O.

use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub strategy_id: String,
    pub minute_bucket: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub dedup_key: DedupKey,
    /// Higher priority values are served first; ties broken FIFO.
    pub priority: i32,
    /// Monotonic enqueue sequence, used as the FIFO tiebreaker and as the
    /// eviction target (lowest priority, then oldest, drops first).
    pub seq: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub depth_cap: usize,
    pub dedup_window_secs: i64,
    pub min_handler_gap_ms: i64,
}

impl QueueConfig {
    pub fn sane_defaults() -> Self {
        Self {
            depth_cap: 10,
            dedup_window_secs: 60,
            min_handler_gap_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    DroppedDuplicate,
    DroppedLowestPriorityEvicted,
}

#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub enqueued: u64,
    pub processed: u64,
    pub dropped_duplicates: u64,
    pub dropped_overflow: u64,
    pub errors: u64,
}

pub struct PerUserOrderQueue {
    cfg: QueueConfig,
    items: VecDeque<QueueItem>,
    seen: BTreeMap<DedupKey, ()>,
    next_seq: u64,
    last_dequeue_ms: Option<i64>,
    metrics: QueueMetrics,
}

impl PerUserOrderQueue {
    pub fn new(cfg: QueueConfig) -> Self {
        Self {
            cfg,
            items: VecDeque::new(),
            seen: BTreeMap::new(),
            next_seq: 0,
            last_dequeue_ms: None,
            metrics: QueueMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    /// Drop dedup entries outside the current window. Callers pass the
    /// current minute bucket; entries whose bucket is more than
    /// `dedup_window_secs / 60` behind are forgotten.
    pub fn expire_dedup(&mut self, now_minute_bucket: i64) {
        let window_minutes = (self.cfg.dedup_window_secs / 60).max(1);
        self.seen
            .retain(|k, _| now_minute_bucket - k.minute_bucket < window_minutes);
    }

    /// Enqueue a new item. Returns the outcome: accepted, rejected as a
    /// duplicate within the dedup window, or accepted by evicting the
    /// current lowest-priority item because the queue was at depth cap.
    pub fn enqueue(&mut self, dedup_key: DedupKey, priority: i32, payload: Vec<u8>) -> EnqueueOutcome {
        if self.seen.contains_key(&dedup_key) {
            self.metrics.dropped_duplicates += 1;
            return EnqueueOutcome::DroppedDuplicate;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let item = QueueItem {
            dedup_key: dedup_key.clone(),
            priority,
            seq,
            payload,
        };

        if self.items.len() >= self.cfg.depth_cap {
            if let Some((idx, _)) = self
                .items
                .iter()
                .enumerate()
                .min_by_key(|(_, it)| (it.priority, it.seq))
            {
                let evicted = self.items.remove(idx).expect("idx in bounds");
                self.seen.remove(&evicted.dedup_key);
                self.metrics.dropped_overflow += 1;
                self.seen.insert(dedup_key, ());
                self.items.push_back(item);
                self.metrics.enqueued += 1;
                return EnqueueOutcome::DroppedLowestPriorityEvicted;
            }
        }

        self.seen.insert(dedup_key, ());
        self.items.push_back(item);
        self.metrics.enqueued += 1;
        EnqueueOutcome::Enqueued
    }

    /// Pop the next item to hand to the single-flight worker, honoring the
    /// minimum handler gap. Returns `None` if the queue is empty or the gap
    /// since the last dequeue hasn't elapsed yet.
    pub fn try_dequeue(&mut self, now_ms: i64) -> Option<QueueItem> {
        if let Some(last) = self.last_dequeue_ms {
            if now_ms - last < self.cfg.min_handler_gap_ms {
                return None;
            }
        }
        // Priority first (descending), then FIFO (ascending seq) among ties.
        let (idx, _) = self
            .items
            .iter()
            .enumerate()
            .max_by_key(|(_, it)| (it.priority, std::cmp::Reverse(it.seq)))?;
        let item = self.items.remove(idx)?;
        self.last_dequeue_ms = Some(now_ms);
        self.metrics.processed += 1;
        Some(item)
    }

    pub fn record_handler_error(&mut self) {
        self.metrics.errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str, symbol: &str, strategy: &str, bucket: i64) -> DedupKey {
        DedupKey {
            user_id: user.to_string(),
            symbol: symbol.to_string(),
            side: "BUY".to_string(),
            strategy_id: strategy.to_string(),
            minute_bucket: bucket,
        }
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let mut q = PerUserOrderQueue::new(QueueConfig::sane_defaults());
        assert_eq!(
            q.enqueue(key("u1", "RELIANCE", "s1", 0), 1, vec![]),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            q.enqueue(key("u1", "RELIANCE", "s1", 0), 1, vec![]),
            EnqueueOutcome::DroppedDuplicate
        );
    }

    #[test]
    fn fifo_order_among_equal_priority() {
        let mut q = PerUserOrderQueue::new(QueueConfig::sane_defaults());
        q.enqueue(key("u1", "A", "s1", 0), 1, b"first".to_vec());
        q.enqueue(key("u1", "B", "s1", 0), 1, b"second".to_vec());
        let first = q.try_dequeue(0).unwrap();
        assert_eq!(first.payload, b"first");
        let second = q.try_dequeue(1_000).unwrap();
        assert_eq!(second.payload, b"second");
    }

    #[test]
    fn higher_priority_served_first() {
        let mut q = PerUserOrderQueue::new(QueueConfig::sane_defaults());
        q.enqueue(key("u1", "A", "s1", 0), 1, b"low".to_vec());
        q.enqueue(key("u1", "B", "s1", 0), 5, b"high".to_vec());
        let first = q.try_dequeue(0).unwrap();
        assert_eq!(first.payload, b"high");
    }

    #[test]
    fn min_handler_gap_blocks_early_dequeue() {
        let mut q = PerUserOrderQueue::new(QueueConfig::sane_defaults());
        q.enqueue(key("u1", "A", "s1", 0), 1, vec![]);
        q.enqueue(key("u1", "B", "s1", 0), 1, vec![]);
        assert!(q.try_dequeue(0).is_some());
        assert!(q.try_dequeue(100).is_none());
        assert!(q.try_dequeue(300).is_some());
    }

    #[test]
    fn depth_cap_evicts_lowest_priority() {
        let cfg = QueueConfig {
            depth_cap: 2,
            ..QueueConfig::sane_defaults()
        };
        let mut q = PerUserOrderQueue::new(cfg);
        q.enqueue(key("u1", "A", "s1", 0), 1, vec![]);
        q.enqueue(key("u1", "B", "s1", 0), 5, vec![]);
        let outcome = q.enqueue(key("u1", "C", "s1", 0), 3, vec![]);
        assert_eq!(outcome, EnqueueOutcome::DroppedLowestPriorityEvicted);
        assert_eq!(q.depth(), 2);
    }

    #[test]
    fn expire_dedup_forgets_old_buckets() {
        let mut q = PerUserOrderQueue::new(QueueConfig::sane_defaults());
        q.enqueue(key("u1", "A", "s1", 0), 1, vec![]);
        q.expire_dedup(120);
        let outcome = q.enqueue(key("u1", "A", "s1", 0), 1, vec![]);
        assert_eq!(outcome, EnqueueOutcome::Enqueued);
    }
}
