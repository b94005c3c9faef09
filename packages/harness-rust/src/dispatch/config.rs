//! Dispatch controller configuration and the process-wide client deadline.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// CongestionConfig
// ---------------------------------------------------------------------------

/// Tunables for the AIMD admission window.
#[derive(Debug, Clone)]
pub struct CongestionConfig {
    /// Starting window: maximum operations in flight before any adjustment.
    pub initial_window: f64,
    /// Slow-start threshold: below it the window doubles on saturation,
    /// at or above it the window grows by `1/window`.
    pub ssthresh: f64,
    /// Minimum time between two multiplicative decreases. Bursts of overload
    /// signals inside this cooldown collapse into a single halving.
    pub decrease_cooldown: Duration,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            initial_window: 32.0,
            ssthresh: 256.0,
            decrease_cooldown: Duration::from_millis(5000),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

/// Tunables for the dispatcher's drain loops and retry path.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Admission window settings.
    pub congestion: CongestionConfig,
    /// Backoff between admission retries when the window is full.
    pub admission_backoff: Duration,
    /// Exclusive upper bound of the randomized pre-submission jitter.
    /// Zero disables the jitter entirely (used by deterministic tests).
    pub submit_jitter: Duration,
    /// Cap of the conflict backoff base, reached at resend count 4.
    pub max_conflict_backoff: Duration,
    /// Budget from the configured start time to the process-wide deadline.
    /// Once the deadline passes, every pending and future attempt resolves
    /// to a timeout without contacting the ledger.
    pub client_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            congestion: CongestionConfig::default(),
            admission_backoff: Duration::from_millis(100),
            submit_jitter: Duration::from_millis(1000),
            max_conflict_backoff: Duration::from_secs(16),
            client_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Process-wide client deadline.
///
/// Unset until the harness arms it at workload start; while unset it never
/// expires. This is the run's only cancellation mechanism — an in-flight
/// remote call is not interrupted, it hits the deadline check at its next
/// decision point.
#[derive(Debug, Default)]
pub struct Deadline {
    expires_at: RwLock<Option<Instant>>,
}

impl Deadline {
    /// Create an unarmed deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the deadline at `start + budget`.
    pub fn arm(&self, start: Instant, budget: Duration) {
        *self.expires_at.write() = Some(start + budget);
    }

    /// Whether the deadline has passed. Unarmed deadlines never expire.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.expires_at
            .read()
            .is_some_and(|at| Instant::now() >= at)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
