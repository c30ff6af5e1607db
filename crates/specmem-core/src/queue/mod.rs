//! Change Queue (spec C11 / section 4.11)
//!
//! A bounded, priority-ordered, deduplicating FIFO sitting between the file
//! watcher (C10) and the ingestion handler (C12). Events for the same path
//! collapse into the newest one; overflow is rejected rather than grown
//! unbounded, per spec section 5's bounded-memory policy.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Queue error kinds (spec section 7)
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue is at capacity and cannot accept another event.
    #[error("change queue is full")]
    Full,
}

/// The kind of filesystem change that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// Relative priority; higher drains first within the same dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// A single normalized filesystem change awaiting ingestion.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub priority: Priority,
    pub detected_at: Instant,
    pub attempts: u32,
    /// Set by `retry()`; the event isn't eligible for `pop()` until this
    /// instant has passed.
    pub retry_after: Option<Instant>,
}

impl ChangeEvent {
    pub fn new(path: PathBuf, kind: ChangeKind, priority: Priority) -> Self {
        Self {
            path,
            kind,
            priority,
            detected_at: Instant::now(),
            attempts: 0,
            retry_after: None,
        }
    }
}

/// Point-in-time counters for observability (spec section 6, queue stats).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub enqueued_total: u64,
    pub deduplicated_total: u64,
    pub rejected_total: u64,
    pub dequeued_total: u64,
    pub retried_total: u64,
    pub dropped_total: u64,
}

/// Bounded priority queue of pending filesystem changes, deduplicated by path.
pub struct ChangeQueue {
    capacity: usize,
    max_retries: u32,
    retry_backoff: Duration,
    entries: VecDeque<ChangeEvent>,
    index: HashMap<PathBuf, usize>,
    stats: QueueStats,
}

impl ChangeQueue {
    pub fn new(capacity: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            capacity,
            max_retries,
            retry_backoff,
            entries: VecDeque::new(),
            index: HashMap::new(),
            stats: QueueStats::default(),
        }
    }

    /// Enqueue `event`. If an event for the same path is already queued, the
    /// newer one replaces it in place (dedup) rather than growing the queue.
    /// Errs with `QueueError::Full` only when the path is genuinely new and
    /// the queue is already at capacity.
    pub fn push(&mut self, mut event: ChangeEvent) -> Result<(), QueueError> {
        if let Some(&pos) = self.index.get(&event.path) {
            event.priority = event.priority.max(self.entries[pos].priority);
            self.entries[pos] = event;
            self.stats.deduplicated_total += 1;
            self.resort();
            return Ok(());
        }

        if self.entries.len() >= self.capacity {
            self.stats.rejected_total += 1;
            return Err(QueueError::Full);
        }

        self.entries.push_back(event);
        self.stats.enqueued_total += 1;
        self.reindex();
        self.resort();
        Ok(())
    }

    /// Pop the highest-priority, oldest-detected event that is past its
    /// retry backoff (if any), skipping over events still waiting one out.
    pub fn pop(&mut self) -> Option<ChangeEvent> {
        let now = Instant::now();
        let pos = self.entries.iter().position(|e| e.retry_after.map_or(true, |t| now >= t))?;
        let event = self.entries.remove(pos);
        if event.is_some() {
            self.stats.dequeued_total += 1;
            self.reindex();
        }
        event
    }

    /// Re-enqueue a failed event for retry if it hasn't exceeded
    /// `max_retries`, backing off so repeated failures don't spin-loop.
    pub fn retry(&mut self, mut event: ChangeEvent) -> bool {
        event.attempts += 1;
        if event.attempts > self.max_retries {
            self.stats.dropped_total += 1;
            return false;
        }
        event.retry_after = Some(Instant::now() + self.retry_backoff * event.attempts);
        self.stats.retried_total += 1;
        self.entries.push_back(event);
        self.reindex();
        self.resort();
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, e) in self.entries.iter().enumerate() {
            self.index.insert(e.path.clone(), i);
        }
    }

    /// Stable sort by priority (desc) then detection time (asc), keeping
    /// same-priority events in arrival order.
    fn resort(&mut self) {
        let mut v: Vec<ChangeEvent> = self.entries.drain(..).collect();
        v.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.detected_at.cmp(&b.detected_at))
        });
        self.entries = v.into();
        self.reindex();
    }
}
