//! Two-tier queue discipline: one default FIFO for keyless operations and a
//! per-key FIFO with a lock flag for operations that must not run
//! concurrently.
//!
//! Keyed queues are created on first enqueue and deleted once empty and
//! unlocked — keys come and go with workload skew, nothing is pre-allocated.
//! Each queue also carries a `draining` flag so at most one drain task exists
//! per queue; the dispatcher arms a drain on enqueue and disarms it through
//! [`QueueManager::finish_default_drain`] / [`QueueManager::finish_keyed_drain`],
//! which atomically re-check for work that raced in.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// QueueManager
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct KeyedQueue<T> {
    entries: VecDeque<T>,
    /// True while an operation for this key is in flight.
    locked: bool,
    /// True while a drain task for this key is running.
    draining: bool,
}

impl<T> Default for KeyedQueue<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            locked: false,
            draining: false,
        }
    }
}

#[derive(Debug)]
struct QueueInner<T> {
    default_queue: VecDeque<T>,
    default_draining: bool,
    keyed: HashMap<String, KeyedQueue<T>>,
}

/// Holds all pending operations and the per-key lock state.
///
/// FIFO order is preserved within the default queue and within each keyed
/// queue; there is no ordering across queues.
#[derive(Debug)]
pub struct QueueManager<T> {
    inner: Mutex<QueueInner<T>>,
}

impl<T> Default for QueueManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueueManager<T> {
    /// Create an empty queue manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                default_queue: VecDeque::new(),
                default_draining: false,
                keyed: HashMap::new(),
            }),
        }
    }

    /// Append to the default queue. Returns `true` when the caller should
    /// spawn the default drain task (none was running).
    pub fn push_default(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        inner.default_queue.push_back(item);
        if inner.default_draining {
            false
        } else {
            inner.default_draining = true;
            true
        }
    }

    /// Append to the queue for `key`, creating it if absent. Returns `true`
    /// when the caller should spawn a drain task for this key.
    pub fn push_keyed(&self, key: &str, item: T) -> bool {
        let mut inner = self.inner.lock();
        let queue = inner.keyed.entry(key.to_string()).or_default();
        queue.entries.push_back(item);
        if queue.draining {
            false
        } else {
            queue.draining = true;
            true
        }
    }

    /// Whether the default queue currently has entries.
    #[must_use]
    pub fn default_has_work(&self) -> bool {
        !self.inner.lock().default_queue.is_empty()
    }

    /// Whether the queue for `key` currently has entries.
    #[must_use]
    pub fn key_has_work(&self, key: &str) -> bool {
        self.inner
            .lock()
            .keyed
            .get(key)
            .is_some_and(|q| !q.entries.is_empty())
    }

    /// Remove and return the oldest default-queue entry.
    pub fn take_default(&self) -> Option<T> {
        self.inner.lock().default_queue.pop_front()
    }

    /// Remove and return the oldest entry for `key`, but only if the key is
    /// not locked. Taking the entry locks the key.
    pub fn take_for_key(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock();
        let queue = inner.keyed.get_mut(key)?;
        if queue.locked {
            return None;
        }
        let item = queue.entries.pop_front()?;
        queue.locked = true;
        Some(item)
    }

    /// Unlock `key` after its in-flight operation finished.
    pub fn release_key(&self, key: &str) {
        if let Some(queue) = self.inner.lock().keyed.get_mut(key) {
            queue.locked = false;
        }
    }

    /// Called by the default drain when it finds the queue empty. Returns
    /// `true` if work raced in and the drain must keep going; otherwise the
    /// drain flag is cleared and the task exits.
    pub fn finish_default_drain(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.default_queue.is_empty() {
            inner.default_draining = false;
            false
        } else {
            true
        }
    }

    /// Called by a keyed drain when it finds its queue empty. Clears the
    /// drain flag and deletes the queue once it is empty and unlocked;
    /// returns `true` if work raced in and the drain must keep going.
    pub fn finish_keyed_drain(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(queue) = inner.keyed.get_mut(key) else {
            return false;
        };
        if !queue.entries.is_empty() {
            return true;
        }
        queue.draining = false;
        if !queue.locked {
            inner.keyed.remove(key);
        }
        false
    }

    /// Number of entries in the default queue.
    #[must_use]
    pub fn default_len(&self) -> usize {
        self.inner.lock().default_queue.len()
    }

    /// Number of live keyed queues (locked or holding entries).
    #[must_use]
    pub fn keyed_queue_count(&self) -> usize {
        self.inner.lock().keyed.len()
    }

    /// Total entries pending across the default and all keyed queues.
    #[must_use]
    pub fn pending_total(&self) -> usize {
        let inner = self.inner.lock();
        inner.default_queue.len() + inner.keyed.values().map(|q| q.entries.len()).sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_is_fifo() {
        let queues = QueueManager::new();
        assert!(queues.push_default(1));
        assert!(!queues.push_default(2));
        assert!(!queues.push_default(3));
        assert_eq!(queues.take_default(), Some(1));
        assert_eq!(queues.take_default(), Some(2));
        assert_eq!(queues.take_default(), Some(3));
        assert_eq!(queues.take_default(), None);
    }

    #[test]
    fn first_push_arms_the_drain_until_finished() {
        let queues = QueueManager::new();
        assert!(queues.push_default("a"));
        queues.take_default();
        // Drain still armed: new work must not spawn a second drain.
        assert!(!queues.push_default("b"));
        queues.take_default();
        assert!(!queues.finish_default_drain());
        assert!(queues.push_default("c"));
    }

    #[test]
    fn keyed_queue_is_fifo_within_one_key() {
        let queues = QueueManager::new();
        queues.push_keyed("a", 1);
        queues.push_keyed("a", 2);
        assert_eq!(queues.take_for_key("a"), Some(1));
        queues.release_key("a");
        assert_eq!(queues.take_for_key("a"), Some(2));
    }

    #[test]
    fn locked_key_yields_nothing_until_released() {
        let queues = QueueManager::new();
        queues.push_keyed("a", 1);
        queues.push_keyed("a", 2);
        assert_eq!(queues.take_for_key("a"), Some(1));
        // Key is locked: the next entry is invisible.
        assert_eq!(queues.take_for_key("a"), None);
        queues.release_key("a");
        assert_eq!(queues.take_for_key("a"), Some(2));
    }

    #[test]
    fn independent_keys_do_not_block_each_other() {
        let queues = QueueManager::new();
        queues.push_keyed("a", 1);
        queues.push_keyed("b", 2);
        assert_eq!(queues.take_for_key("a"), Some(1));
        assert_eq!(queues.take_for_key("b"), Some(2));
    }

    #[test]
    fn empty_unlocked_key_is_deleted_on_drain_finish() {
        let queues = QueueManager::new();
        queues.push_keyed("a", 1);
        assert_eq!(queues.keyed_queue_count(), 1);
        queues.take_for_key("a");
        queues.release_key("a");
        assert!(!queues.finish_keyed_drain("a"));
        assert_eq!(queues.keyed_queue_count(), 0);
        // The key springs back on next enqueue, with a fresh drain.
        assert!(queues.push_keyed("a", 2));
    }

    #[test]
    fn drain_finish_detects_raced_in_work() {
        let queues = QueueManager::new();
        assert!(queues.push_keyed("a", 1));
        queues.take_for_key("a");
        queues.release_key("a");
        // Work arrives before the drain gets to disarm itself.
        assert!(!queues.push_keyed("a", 2));
        assert!(queues.finish_keyed_drain("a"));
        assert_eq!(queues.take_for_key("a"), Some(2));
    }

    #[test]
    fn pending_total_spans_both_tiers() {
        let queues = QueueManager::new();
        queues.push_default(0);
        queues.push_keyed("a", 1);
        queues.push_keyed("a", 2);
        queues.push_keyed("b", 3);
        assert_eq!(queues.pending_total(), 4);
        assert_eq!(queues.default_len(), 1);
        assert_eq!(queues.keyed_queue_count(), 2);
    }
}
