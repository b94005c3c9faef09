//! Process-wide metrics registry for the dispatch controller.
//!
//! Zero-initialized at start, mutated by the dispatcher and drain loops,
//! snapshotted by the periodic reporter, never reset during a run. Every
//! terminal and every retried attempt increments exactly one classification
//! counter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Per-function counters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FunctionCounters {
    submitted_keyed: AtomicU64,
    submitted_default: AtomicU64,
    succeeded: AtomicU64,
    conflicted: AtomicU64,
}

/// Snapshot of one function's tallies.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FunctionSnapshot {
    pub submitted_keyed: u64,
    pub submitted_default: u64,
    pub succeeded: u64,
    pub conflicted: u64,
}

// ---------------------------------------------------------------------------
// MetricsRegistry
// ---------------------------------------------------------------------------

/// Counters and duration accumulators shared by the whole dispatch path.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    per_function: DashMap<String, FunctionCounters>,
    completed: AtomicU64,
    conflicts: AtomicU64,
    overload_errors: AtomicU64,
    endorsement_errors: AtomicU64,
    other_errors: AtomicU64,
    keyed_dequeues: AtomicU64,
    default_drain_micros: AtomicU64,
    keyed_drain_micros: AtomicU64,
}

/// Full registry snapshot, serialized as one reporter line.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub completed: u64,
    pub conflicts: u64,
    pub overload_errors: u64,
    pub endorsement_errors: u64,
    pub other_errors: u64,
    pub keyed_dequeues: u64,
    pub submitted_keyed_total: u64,
    pub submitted_default_total: u64,
    pub default_drain_micros: u64,
    pub keyed_drain_micros: u64,
    pub per_function: BTreeMap<String, FunctionSnapshot>,
}

impl MetricsRegistry {
    /// Create a zeroed registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn function(&self, name: &str) -> dashmap::mapref::one::Ref<'_, String, FunctionCounters> {
        if let Some(entry) = self.per_function.get(name) {
            return entry;
        }
        self.per_function
            .entry(name.to_string())
            .or_default()
            .downgrade()
    }

    /// An entry was dequeued from a keyed queue.
    pub fn note_keyed_dequeue(&self) {
        self.keyed_dequeues.fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt of a keyed-queue operation was sent to the ledger.
    /// Retried attempts count again, so the submitted totals reconcile with
    /// the attempts the backend actually saw.
    pub fn note_submitted_keyed(&self, function: &str) {
        self.function(function)
            .submitted_keyed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt of a default-queue operation was sent to the ledger.
    pub fn note_submitted_default(&self, function: &str) {
        self.function(function)
            .submitted_default
            .fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt committed.
    pub fn note_success(&self, function: &str) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.function(function)
            .succeeded
            .fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt hit an optimistic-concurrency conflict (terminal or not).
    pub fn note_conflict(&self, function: &str) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        self.function(function)
            .conflicted
            .fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt was rejected for overload.
    pub fn note_overload(&self) {
        self.overload_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt failed with an endorsement mismatch.
    pub fn note_endorsement_error(&self) {
        self.endorsement_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// An attempt failed with an unclassified error.
    pub fn note_other_error(&self) {
        self.other_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulate time spent in one default-drain iteration.
    pub fn note_default_drain(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.default_drain_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Accumulate time spent in one keyed-drain iteration.
    pub fn note_keyed_drain(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.keyed_drain_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Completed operations so far.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Conflicted attempts so far.
    #[must_use]
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Build a consistent-enough view for the reporter. Counters are read
    /// individually; the snapshot is not a transaction.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut per_function = BTreeMap::new();
        let mut submitted_keyed_total = 0;
        let mut submitted_default_total = 0;
        for entry in &self.per_function {
            let counters = FunctionSnapshot {
                submitted_keyed: entry.submitted_keyed.load(Ordering::Relaxed),
                submitted_default: entry.submitted_default.load(Ordering::Relaxed),
                succeeded: entry.succeeded.load(Ordering::Relaxed),
                conflicted: entry.conflicted.load(Ordering::Relaxed),
            };
            submitted_keyed_total += counters.submitted_keyed;
            submitted_default_total += counters.submitted_default;
            per_function.insert(entry.key().clone(), counters);
        }
        MetricsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            overload_errors: self.overload_errors.load(Ordering::Relaxed),
            endorsement_errors: self.endorsement_errors.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
            keyed_dequeues: self.keyed_dequeues.load(Ordering::Relaxed),
            submitted_keyed_total,
            submitted_default_total,
            default_drain_micros: self.default_drain_micros.load(Ordering::Relaxed),
            keyed_drain_micros: self.keyed_drain_micros.load(Ordering::Relaxed),
            per_function,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
