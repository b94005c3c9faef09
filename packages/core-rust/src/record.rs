//! Terminal outcomes and the structured per-attempt transaction log.
//!
//! Every submission attempt — successful, retried, or terminal — produces one
//! [`AttemptRecord`] pushed through an [`AttemptSink`]. The harness crate
//! supplies sinks (JSONL file, latency histogram); fire-and-forget callers can
//! still reconstruct the run from the log.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SubmitOutcome
// ---------------------------------------------------------------------------

/// Terminal result of an enqueued operation, delivered to the caller's
/// completion channel when one was requested.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The operation committed. Carries the backend payload and how many
    /// resubmissions it took.
    Success {
        operation_id: String,
        payload: Vec<u8>,
        resend_count: u32,
    },
    /// Optimistic-concurrency conflict with a policy that forbids
    /// retransmission.
    Conflict {
        operation_id: String,
        resend_count: u32,
    },
    /// Endorsing peers disagreed; never retried.
    EndorsementMismatch {
        operation_id: String,
        resend_count: u32,
    },
    /// The process-wide client deadline passed before (or while) this
    /// attempt ran. Terminal for every future attempt of the operation.
    Timeout,
    /// Unclassified backend failure; the raw message is preserved.
    Failed {
        operation_id: String,
        message: String,
        resend_count: u32,
    },
}

impl SubmitOutcome {
    /// Tag used in logs and attempt records.
    #[must_use]
    pub fn tag(&self) -> OutcomeTag {
        match self {
            Self::Success { .. } => OutcomeTag::Success,
            Self::Conflict { .. } => OutcomeTag::Conflict,
            Self::EndorsementMismatch { .. } => OutcomeTag::EndorsementMismatch,
            Self::Timeout => OutcomeTag::Timeout,
            Self::Failed { .. } => OutcomeTag::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// OutcomeTag / AttemptRecord
// ---------------------------------------------------------------------------

/// Classification tag of a single submission attempt.
///
/// `Conflict` and `Overload` appear for retried attempts as well as terminal
/// ones; the record's `resend_count` tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTag {
    Success,
    Conflict,
    Overload,
    EndorsementMismatch,
    Timeout,
    Error,
}

/// One structured transaction-log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Id of the operation instance that was submitted.
    pub operation_id: String,
    /// Logical function name.
    pub function: String,
    /// Arguments the operation was submitted with.
    pub args: Vec<String>,
    /// How the attempt ended.
    pub outcome: OutcomeTag,
    /// Resend counter at the time of this attempt (0 for the first send).
    pub resend_count: u32,
    /// Wall-clock start of the attempt, ms since the Unix epoch.
    pub started_at_ms: u64,
    /// Wall-clock end of the attempt, ms since the Unix epoch.
    pub finished_at_ms: u64,
}

/// Sink for per-attempt records. Implementations must be cheap: the
/// dispatcher calls this inline on every classification.
pub trait AttemptSink: Send + Sync {
    fn record(&self, record: &AttemptRecord);
}

/// Sink that drops every record; the default when no log is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AttemptSink for NullSink {
    fn record(&self, _record: &AttemptRecord) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_tags_match_variants() {
        let success = SubmitOutcome::Success {
            operation_id: "op-1".into(),
            payload: b"ok".to_vec(),
            resend_count: 2,
        };
        assert_eq!(success.tag(), OutcomeTag::Success);
        assert_eq!(SubmitOutcome::Timeout.tag(), OutcomeTag::Timeout);
    }

    #[test]
    fn attempt_record_round_trips_as_json() {
        let record = AttemptRecord {
            operation_id: "op-7".into(),
            function: "SendPayment".into(),
            args: vec!["1".into(), "acct_2".into(), "acct_3".into()],
            outcome: OutcomeTag::Conflict,
            resend_count: 1,
            started_at_ms: 1000,
            finished_at_ms: 1042,
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"conflict\""));
        let back: AttemptRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.operation_id, "op-7");
        assert_eq!(back.outcome, OutcomeTag::Conflict);
    }
}
