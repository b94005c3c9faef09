//! In-process simulated ledger backend.
//!
//! Implements the core ledger traits with configurable latency and fault
//! injection so the binary and the integration tests can exercise the
//! dispatch controller without a real network. The simulator also keeps
//! concurrency watermarks — global and per argument value — which is how the
//! tests observe the mutual-exclusion and admission-bound properties from the
//! outside.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use ledgerbench_core::{
    classify, LedgerContract, LedgerOperation, SubmitError,
};

// ---------------------------------------------------------------------------
// Behavior & scripting
// ---------------------------------------------------------------------------

/// Tunable behavior of the simulated ledger.
#[derive(Debug, Clone)]
pub struct SimBehavior {
    /// Fixed service time per submission.
    pub latency: Duration,
    /// Probability that an unscripted submission fails with a conflict.
    pub conflict_rate: f64,
    /// Probability that an unscripted submission is rejected for overload.
    pub overload_rate: f64,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            conflict_rate: 0.0,
            overload_rate: 0.0,
        }
    }
}

/// Forced outcome for a scripted submission.
#[derive(Debug, Clone)]
pub enum SimOutcome {
    Success,
    Conflict,
    Overload,
    EndorsementMismatch,
    Fail(String),
}

/// One observed submission, in arrival order.
#[derive(Debug, Clone)]
pub struct SubmitEvent {
    pub seq: u64,
    pub operation_id: String,
    pub function: String,
    pub args: Vec<String>,
}

// ---------------------------------------------------------------------------
// SimLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ConcurrencyWatermark {
    active: u64,
    max: u64,
}

struct SimInner {
    behavior: SimBehavior,
    /// Per-function queues of forced outcomes, consumed before the random
    /// fault rates apply.
    scripts: Mutex<HashMap<String, VecDeque<SimOutcome>>>,
    attempts: AtomicU64,
    seq: AtomicU64,
    events: Mutex<Vec<SubmitEvent>>,
    global: Mutex<ConcurrencyWatermark>,
    by_arg: Mutex<HashMap<String, ConcurrencyWatermark>>,
}

/// Handle to the simulated ledger; clone-cheap via its inner `Arc`.
#[derive(Clone)]
pub struct SimLedger {
    inner: Arc<SimInner>,
}

impl SimLedger {
    /// Create a simulator with the given behavior.
    #[must_use]
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            inner: Arc::new(SimInner {
                behavior,
                scripts: Mutex::new(HashMap::new()),
                attempts: AtomicU64::new(0),
                seq: AtomicU64::new(0),
                events: Mutex::new(Vec::new()),
                global: Mutex::new(ConcurrencyWatermark::default()),
                by_arg: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The contract handle the dispatcher consumes.
    #[must_use]
    pub fn contract(&self) -> Arc<dyn LedgerContract> {
        Arc::new(SimContract {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Force the outcome of the next unscripted submission of `function`.
    /// Repeated calls queue up in order.
    pub fn script_next(&self, function: &str, outcome: SimOutcome) {
        self.inner
            .scripts
            .lock()
            .entry(function.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Total submissions that reached the simulator, including retries.
    #[must_use]
    pub fn total_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Highest number of submissions ever simultaneously in service.
    #[must_use]
    pub fn max_concurrency(&self) -> u64 {
        self.inner.global.lock().max
    }

    /// Highest simultaneous submissions that shared the argument `value`.
    #[must_use]
    pub fn max_concurrency_for(&self, value: &str) -> u64 {
        self.inner.by_arg.lock().get(value).map_or(0, |w| w.max)
    }

    /// All observed submissions in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<SubmitEvent> {
        self.inner.events.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Contract & operation
// ---------------------------------------------------------------------------

struct SimContract {
    inner: Arc<SimInner>,
}

#[async_trait]
impl LedgerContract for SimContract {
    fn contract_id(&self) -> &str {
        "smallbank"
    }

    async fn create_operation(&self, function: &str) -> anyhow::Result<Box<dyn LedgerOperation>> {
        Ok(Box::new(SimOperation {
            id: Uuid::new_v4().to_string(),
            function: function.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct SimOperation {
    id: String,
    function: String,
    inner: Arc<SimInner>,
}

impl SimInner {
    fn enter(&self, args: &[String]) {
        let mut global = self.global.lock();
        global.active += 1;
        global.max = global.max.max(global.active);
        drop(global);

        let mut by_arg = self.by_arg.lock();
        for arg in args {
            let watermark = by_arg.entry(arg.clone()).or_default();
            watermark.active += 1;
            watermark.max = watermark.max.max(watermark.active);
        }
    }

    fn exit(&self, args: &[String]) {
        self.global.lock().active -= 1;
        let mut by_arg = self.by_arg.lock();
        for arg in args {
            if let Some(watermark) = by_arg.get_mut(arg) {
                watermark.active -= 1;
            }
        }
    }

    fn decide(&self, function: &str) -> SimOutcome {
        if let Some(outcome) = self
            .scripts
            .lock()
            .get_mut(function)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        let roll: f64 = rand::Rng::random(&mut rand::rng());
        if roll < self.behavior.conflict_rate {
            SimOutcome::Conflict
        } else if roll < self.behavior.conflict_rate + self.behavior.overload_rate {
            SimOutcome::Overload
        } else {
            SimOutcome::Success
        }
    }
}

#[async_trait]
impl LedgerOperation for SimOperation {
    fn operation_id(&self) -> &str {
        &self.id
    }

    fn function(&self) -> &str {
        &self.function
    }

    async fn submit(&self, args: &[String]) -> Result<Vec<u8>, SubmitError> {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner.events.lock().push(SubmitEvent {
            seq,
            operation_id: self.id.clone(),
            function: self.function.clone(),
            args: args.to_vec(),
        });

        self.inner.enter(args);
        tokio::time::sleep(self.inner.behavior.latency).await;
        let outcome = self.inner.decide(&self.function);
        self.inner.exit(args);

        match outcome {
            SimOutcome::Success => Ok(format!("{} ok", self.function).into_bytes()),
            SimOutcome::Conflict => Err(SubmitError::new(format!(
                "endorsement failure: {}",
                classify::CONFLICT_MARKER
            ))),
            SimOutcome::Overload => Err(SubmitError::new(format!(
                "submission rejected: {}",
                classify::CONCURRENCY_LIMIT_MARKER
            ))),
            SimOutcome::EndorsementMismatch => Err(SubmitError::new(format!(
                "proposal responses: {}",
                classify::ENDORSEMENT_MISMATCH_MARKER
            ))),
            SimOutcome::Fail(message) => Err(SubmitError::new(message)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use ledgerbench_core::ErrorClass;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn unscripted_submissions_succeed_by_default() {
        let ledger = SimLedger::new(SimBehavior::default());
        let contract = ledger.contract();
        let op = contract.create_operation("Query").await.unwrap();
        let payload = op.submit(&["acct_1".into()]).await.unwrap();
        assert_eq!(payload, b"Query ok");
        assert_eq!(ledger.total_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_outcomes_apply_in_order() {
        let ledger = SimLedger::new(SimBehavior::default());
        ledger.script_next("Query", SimOutcome::Conflict);
        ledger.script_next("Query", SimOutcome::Overload);

        let contract = ledger.contract();
        let op = contract.create_operation("Query").await.unwrap();
        let err = op.submit(&[]).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);

        let op = contract.create_operation("Query").await.unwrap();
        let err = op.submit(&[]).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Overload);

        let op = contract.create_operation("Query").await.unwrap();
        assert!(op.submit(&[]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_watermarks_track_overlap() {
        let ledger = SimLedger::new(SimBehavior::default());
        let contract = ledger.contract();
        let a = contract.create_operation("Query").await.unwrap();
        let b = contract.create_operation("Query").await.unwrap();
        let args_a = ["x".into()];
        let args_b = ["x".into()];
        let (ra, rb) = tokio::join!(a.submit(&args_a), b.submit(&args_b));
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(ledger.max_concurrency(), 2);
        assert_eq!(ledger.max_concurrency_for("x"), 2);
        assert_eq!(ledger.max_concurrency_for("y"), 0);
    }
}
