//! The dispatcher: admission-gated drain loops, submission, outcome
//! classification, and the conflict/overload retry path.
//!
//! Two kinds of drain tasks pull work out of the [`QueueManager`]: one for the
//! default queue, which fans submissions out into spawned tasks, and one per
//! active conflict key, which submits serially so at most one operation per
//! key is ever outstanding. Both gate every dequeue on
//! [`CongestionController::try_admit`] and back off 100 ms when the window is
//! full. Each submission waits a randomized jitter before sending so a burst
//! of simultaneously admitted operations does not hit the ledger as a
//! synchronized wavefront.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ledgerbench_core::{
    AttemptRecord, AttemptSink, ConflictKey, ErrorClass, LedgerContract, LedgerOperation,
    NullSink, OutcomeTag, RetransmissionPolicy, SubmitOutcome,
};

use super::config::{Deadline, DispatchConfig};
use super::congestion::CongestionController;
use super::metrics::MetricsRegistry;
use super::queues::QueueManager;
use super::retry;

// ---------------------------------------------------------------------------
// DispatchRequest
// ---------------------------------------------------------------------------

/// Which queue tier an operation was admitted through. Stamped on the
/// request so retried attempts keep counting against the right tier.
#[derive(Debug, Clone, Copy)]
enum QueueTier {
    Default,
    Keyed,
}

/// One enqueued operation moving through the controller.
struct DispatchRequest {
    contract: Arc<dyn LedgerContract>,
    operation: Box<dyn LedgerOperation>,
    function: String,
    args: Vec<String>,
    policy: RetransmissionPolicy,
    resend_count: u32,
    tier: QueueTier,
    /// Completion channel; `None` for fire-and-forget callers.
    result_tx: Option<oneshot::Sender<SubmitOutcome>>,
}

/// Point-in-time controller state for the reporter.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatcherStatus {
    pub window: f64,
    pub in_flight: u64,
    pub default_queue_len: usize,
    pub keyed_queue_count: usize,
    pub pending_total: usize,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Client-side admission-control, queueing, and retry engine.
///
/// All shared mutable state lives behind this struct; the drain loops and
/// retry paths only touch it through the component APIs, each of which is a
/// single critical section.
pub struct Dispatcher {
    config: DispatchConfig,
    queues: QueueManager<DispatchRequest>,
    congestion: CongestionController,
    metrics: MetricsRegistry,
    deadline: Deadline,
    sink: Arc<dyn AttemptSink>,
}

impl Dispatcher {
    /// Create a dispatcher with no transaction log.
    #[must_use]
    pub fn new(config: DispatchConfig) -> Arc<Self> {
        Self::with_sink(config, Arc::new(NullSink))
    }

    /// Create a dispatcher that pushes every attempt record into `sink`.
    #[must_use]
    pub fn with_sink(config: DispatchConfig, sink: Arc<dyn AttemptSink>) -> Arc<Self> {
        let congestion = CongestionController::new(config.congestion.clone());
        Arc::new(Self {
            config,
            queues: QueueManager::new(),
            congestion,
            metrics: MetricsRegistry::new(),
            deadline: Deadline::new(),
            sink,
        })
    }

    /// The shared metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// The process-wide client deadline; arm it when the workload starts.
    #[must_use]
    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Snapshot the controller state for the reporter.
    #[must_use]
    pub fn status(&self) -> DispatcherStatus {
        let congestion = self.congestion.snapshot();
        DispatcherStatus {
            window: congestion.window,
            in_flight: congestion.in_flight,
            default_queue_len: self.queues.default_len(),
            keyed_queue_count: self.queues.keyed_queue_count(),
            pending_total: self.queues.pending_total(),
        }
    }

    /// Enqueue one operation.
    ///
    /// Mints a fresh operation handle from `contract`, routes it by the
    /// resolved conflict key, and arms the matching drain task. When
    /// `need_response` is true the returned receiver resolves to the terminal
    /// [`SubmitOutcome`]; otherwise the outcome only reaches the attempt log.
    ///
    /// # Errors
    ///
    /// Returns an error if the contract cannot mint an operation handle.
    pub async fn enqueue(
        self: &Arc<Self>,
        contract: Arc<dyn LedgerContract>,
        function: &str,
        key: ConflictKey,
        policy: RetransmissionPolicy,
        need_response: bool,
        args: Vec<String>,
    ) -> anyhow::Result<Option<oneshot::Receiver<SubmitOutcome>>> {
        let operation = contract.create_operation(function).await?;
        let resolved = key.resolve(contract.contract_id(), function);
        let (result_tx, result_rx) = if need_response {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let request = DispatchRequest {
            contract,
            operation,
            function: function.to_string(),
            args,
            policy,
            resend_count: 0,
            tier: if resolved.is_some() {
                QueueTier::Keyed
            } else {
                QueueTier::Default
            },
            result_tx,
        };

        match resolved {
            None => {
                if self.queues.push_default(request) {
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.default_drain().await });
                }
            }
            Some(key) => {
                if self.queues.push_keyed(&key, request) {
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.keyed_drain(key).await });
                }
            }
        }
        Ok(result_rx)
    }

    // -----------------------------------------------------------------------
    // Drain loops
    // -----------------------------------------------------------------------

    /// Drain the default queue: admit, dequeue, fan each submission out into
    /// its own task. Exits when the queue is empty; re-armed by `enqueue`.
    async fn default_drain(self: Arc<Self>) {
        loop {
            if !self.queues.default_has_work() {
                if self.queues.finish_default_drain() {
                    continue;
                }
                return;
            }
            if !self.congestion.try_admit() {
                tokio::time::sleep(self.config.admission_backoff).await;
                continue;
            }
            let iteration_start = Instant::now();
            let Some(request) = self.queues.take_default() else {
                self.congestion.cancel_admit();
                continue;
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.run_submission(request).await;
            });
            self.metrics.note_default_drain(iteration_start.elapsed());
        }
    }

    /// Drain one key's queue serially: admit, dequeue (locking the key),
    /// submit inline, unlock, repeat. The per-key lock makes same-key
    /// conflicts impossible by construction.
    async fn keyed_drain(self: Arc<Self>, key: String) {
        loop {
            if !self.queues.key_has_work(&key) {
                if self.queues.finish_keyed_drain(&key) {
                    continue;
                }
                return;
            }
            if !self.congestion.try_admit() {
                tokio::time::sleep(self.config.admission_backoff).await;
                continue;
            }
            let iteration_start = Instant::now();
            let Some(request) = self.queues.take_for_key(&key) else {
                self.congestion.cancel_admit();
                continue;
            };
            self.metrics.note_keyed_dequeue();
            self.run_submission(request).await;
            self.queues.release_key(&key);
            self.metrics.note_keyed_drain(iteration_start.elapsed());
        }
    }

    /// Jittered wait, then the submission/retry loop, then outcome delivery.
    async fn run_submission(&self, mut request: DispatchRequest) {
        let jitter = self.submit_jitter();
        if !jitter.is_zero() {
            tokio::time::sleep(jitter).await;
        }
        let outcome = self.submit_with_retries(&mut request).await;
        debug!(
            function = %request.function,
            outcome = ?outcome.tag(),
            resend_count = request.resend_count,
            "operation finished"
        );
        if let Some(tx) = request.result_tx.take() {
            // The caller may have dropped the receiver; that is their choice.
            let _ = tx.send(outcome);
        }
    }

    // -----------------------------------------------------------------------
    // Submission & classification
    // -----------------------------------------------------------------------

    /// Submit until a terminal outcome.
    ///
    /// Every iteration holds exactly one admission slot: terminal paths
    /// release it once, retry paths release on classification and re-claim
    /// via `readmit` after their backoff.
    async fn submit_with_retries(&self, request: &mut DispatchRequest) -> SubmitOutcome {
        loop {
            if self.deadline.expired() {
                self.congestion.release();
                return SubmitOutcome::Timeout;
            }

            // Counted here, not at dequeue, so every attempt the ledger
            // actually sees is tallied — retries included.
            match request.tier {
                QueueTier::Default => self.metrics.note_submitted_default(&request.function),
                QueueTier::Keyed => self.metrics.note_submitted_keyed(&request.function),
            }

            let started_at_ms = unix_millis();
            let result = request.operation.submit(&request.args).await;
            let finished_at_ms = unix_millis();

            if self.deadline.expired() {
                self.congestion.release();
                return SubmitOutcome::Timeout;
            }

            match result {
                Ok(payload) => {
                    self.metrics.note_success(&request.function);
                    self.congestion.release();
                    self.record(request, OutcomeTag::Success, started_at_ms, finished_at_ms);
                    return SubmitOutcome::Success {
                        operation_id: request.operation.operation_id().to_string(),
                        payload,
                        resend_count: request.resend_count,
                    };
                }
                Err(err) => match err.class() {
                    ErrorClass::Conflict => {
                        self.metrics.note_conflict(&request.function);
                        self.congestion.release();
                        self.record(request, OutcomeTag::Conflict, started_at_ms, finished_at_ms);
                        if request.policy.allows_retransmit() {
                            let wait = retry::conflict_backoff(
                                request.policy,
                                request.resend_count + 1,
                                self.config.max_conflict_backoff,
                            );
                            info!(
                                operation_id = %request.operation.operation_id(),
                                function = %request.function,
                                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                                resend_count = request.resend_count + 1,
                                "conflict, resending"
                            );
                            if let Some(outcome) = self.rearm_for_retry(request, wait).await {
                                return outcome;
                            }
                        } else {
                            info!(
                                operation_id = %request.operation.operation_id(),
                                function = %request.function,
                                "conflict, policy forbids resend"
                            );
                            return SubmitOutcome::Conflict {
                                operation_id: request.operation.operation_id().to_string(),
                                resend_count: request.resend_count,
                            };
                        }
                    }
                    ErrorClass::Overload => {
                        self.metrics.note_overload();
                        self.congestion.signal_overload();
                        self.congestion.release();
                        self.record(request, OutcomeTag::Overload, started_at_ms, finished_at_ms);
                        // Overload is a systemic signal, not a per-key
                        // conflict: always resubmit, ignoring the operation's
                        // configured policy.
                        warn!(
                            operation_id = %request.operation.operation_id(),
                            function = %request.function,
                            "overload rejection, resending"
                        );
                        if let Some(outcome) =
                            self.rearm_for_retry(request, retry::overload_backoff()).await
                        {
                            return outcome;
                        }
                    }
                    ErrorClass::EndorsementMismatch => {
                        self.metrics.note_endorsement_error();
                        self.congestion.release();
                        self.record(
                            request,
                            OutcomeTag::EndorsementMismatch,
                            started_at_ms,
                            finished_at_ms,
                        );
                        return SubmitOutcome::EndorsementMismatch {
                            operation_id: request.operation.operation_id().to_string(),
                            resend_count: request.resend_count,
                        };
                    }
                    ErrorClass::Other => {
                        self.metrics.note_other_error();
                        self.congestion.release();
                        self.record(request, OutcomeTag::Error, started_at_ms, finished_at_ms);
                        return SubmitOutcome::Failed {
                            operation_id: request.operation.operation_id().to_string(),
                            message: err.message,
                            resend_count: request.resend_count,
                        };
                    }
                },
            }
        }
    }

    /// Backoff, re-claim an admission slot, and mint a fresh operation handle
    /// for the next attempt. Returns a terminal outcome only if the new
    /// handle cannot be created.
    async fn rearm_for_retry(
        &self,
        request: &mut DispatchRequest,
        wait: std::time::Duration,
    ) -> Option<SubmitOutcome> {
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.congestion.readmit();
        request.resend_count += 1;
        match request.contract.create_operation(&request.function).await {
            Ok(operation) => {
                request.operation = operation;
                None
            }
            Err(err) => {
                self.metrics.note_other_error();
                self.congestion.release();
                Some(SubmitOutcome::Failed {
                    operation_id: request.operation.operation_id().to_string(),
                    message: format!("failed to recreate operation: {err}"),
                    resend_count: request.resend_count,
                })
            }
        }
    }

    fn record(
        &self,
        request: &DispatchRequest,
        outcome: OutcomeTag,
        started_at_ms: u64,
        finished_at_ms: u64,
    ) {
        self.sink.record(&AttemptRecord {
            operation_id: request.operation.operation_id().to_string(),
            function: request.function.clone(),
            args: request.args.clone(),
            outcome,
            resend_count: request.resend_count,
            started_at_ms,
            finished_at_ms,
        });
    }

    fn submit_jitter(&self) -> std::time::Duration {
        let bound = u64::try_from(self.config.submit_jitter.as_millis()).unwrap_or(u64::MAX);
        if bound == 0 {
            return std::time::Duration::ZERO;
        }
        let millis = rand::Rng::random_range(&mut rand::rng(), 0..bound);
        std::time::Duration::from_millis(millis)
    }
}

/// Wall-clock milliseconds since the Unix epoch.
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::dispatch::config::CongestionConfig;
    use crate::sim::{SimBehavior, SimLedger};

    fn test_config(window: f64) -> DispatchConfig {
        DispatchConfig {
            congestion: CongestionConfig {
                initial_window: window,
                ..CongestionConfig::default()
            },
            // Deterministic tests: no jitter.
            submit_jitter: Duration::ZERO,
            ..DispatchConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fire_and_forget_returns_no_receiver() {
        let ledger = SimLedger::new(SimBehavior::default());
        let dispatcher = Dispatcher::new(test_config(4.0));
        let rx = dispatcher
            .enqueue(
                ledger.contract(),
                "Query",
                ConflictKey::None,
                RetransmissionPolicy::None,
                false,
                vec!["acct_1".into()],
            )
            .await
            .unwrap();
        assert!(rx.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn success_outcome_carries_resend_count_zero() {
        let ledger = SimLedger::new(SimBehavior::default());
        let dispatcher = Dispatcher::new(test_config(4.0));
        let rx = dispatcher
            .enqueue(
                ledger.contract(),
                "Query",
                ConflictKey::None,
                RetransmissionPolicy::None,
                true,
                vec!["acct_1".into()],
            )
            .await
            .unwrap()
            .unwrap();
        match rx.await.unwrap() {
            SubmitOutcome::Success { resend_count, .. } => assert_eq!(resend_count, 0),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auto_key_serializes_per_contract_function() {
        let ledger = SimLedger::new(SimBehavior::default());
        let dispatcher = Dispatcher::new(test_config(8.0));
        let mut receivers = Vec::new();
        for i in 0..4 {
            let rx = dispatcher
                .enqueue(
                    ledger.contract(),
                    "TransactSavings",
                    ConflictKey::Auto,
                    RetransmissionPolicy::None,
                    true,
                    vec![format!("acct_{i}")],
                )
                .await
                .unwrap()
                .unwrap();
            receivers.push(rx);
        }
        for rx in receivers {
            assert!(matches!(
                rx.await.unwrap(),
                SubmitOutcome::Success { .. }
            ));
        }
        // All four share the derived key, so none ever overlapped.
        assert_eq!(ledger.max_concurrency(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_times_out_without_touching_the_ledger() {
        let ledger = SimLedger::new(SimBehavior::default());
        let dispatcher = Dispatcher::new(test_config(4.0));
        dispatcher
            .deadline()
            .arm(Instant::now() - Duration::from_secs(120), Duration::from_secs(60));

        let rx = dispatcher
            .enqueue(
                ledger.contract(),
                "Query",
                ConflictKey::None,
                RetransmissionPolicy::WithDelay,
                true,
                vec!["acct_1".into()],
            )
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(rx.await.unwrap(), SubmitOutcome::Timeout));
        assert_eq!(ledger.total_attempts(), 0);
        // The slot claimed for the timed-out request was given back.
        assert_eq!(dispatcher.status().in_flight, 0);
    }
}
