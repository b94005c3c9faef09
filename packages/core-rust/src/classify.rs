//! Marker-based classification of ledger submission errors.
//!
//! Ledger SDKs report endorsement and validation failures as message strings.
//! The dispatcher's whole error taxonomy hangs off substring markers in those
//! messages, so the markers live here as named constants rather than inline
//! literals scattered through the dispatch path.

use serde::{Deserialize, Serialize};

/// Optimistic-concurrency violation: the record set read by the transaction
/// was modified before it could commit.
pub const CONFLICT_MARKER: &str = "MVCC_READ_CONFLICT";

/// The service rejected the submission because too many operations were
/// already in flight.
pub const CONCURRENCY_LIMIT_MARKER: &str = "exceeding concurrency limit";

/// The service could not assemble an endorsement plan, which in practice
/// means it is saturated; treated the same as the concurrency-limit marker.
pub const NO_PLAN_MARKER: &str = "No endorsement plan available";

/// Endorsing peers returned diverging results; terminal, never retried.
pub const ENDORSEMENT_MISMATCH_MARKER: &str = "endorsements do not match";

// ---------------------------------------------------------------------------
// ErrorClass
// ---------------------------------------------------------------------------

/// Classification of a failed submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Optimistic-concurrency conflict; recoverable via the retry policy.
    Conflict,
    /// Capacity / no-plan rejection; always retried, feeds the congestion
    /// controller's overload signal.
    Overload,
    /// Endorsement mismatch; terminal.
    EndorsementMismatch,
    /// Anything unrecognized; terminal.
    Other,
}

/// Classify a backend error message by its known markers.
///
/// Conflict takes precedence over the overload markers, matching the order in
/// which the taxonomy is probed everywhere else.
#[must_use]
pub fn classify_message(message: &str) -> ErrorClass {
    if message.contains(CONFLICT_MARKER) {
        ErrorClass::Conflict
    } else if message.contains(CONCURRENCY_LIMIT_MARKER) || message.contains(NO_PLAN_MARKER) {
        ErrorClass::Overload
    } else if message.contains(ENDORSEMENT_MISMATCH_MARKER) {
        ErrorClass::EndorsementMismatch
    } else {
        ErrorClass::Other
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_marker_classifies_as_conflict() {
        let msg = "endorsement failure: MVCC_READ_CONFLICT on key acct_17";
        assert_eq!(classify_message(msg), ErrorClass::Conflict);
    }

    #[test]
    fn both_overload_markers_classify_as_overload() {
        assert_eq!(
            classify_message("rejected: exceeding concurrency limit (500)"),
            ErrorClass::Overload
        );
        assert_eq!(
            classify_message("No endorsement plan available for channel1"),
            ErrorClass::Overload
        );
    }

    #[test]
    fn mismatch_marker_classifies_as_endorsement_mismatch() {
        assert_eq!(
            classify_message("proposal responses: endorsements do not match"),
            ErrorClass::EndorsementMismatch
        );
    }

    #[test]
    fn unknown_message_classifies_as_other() {
        assert_eq!(classify_message("connection reset by peer"), ErrorClass::Other);
        assert_eq!(classify_message(""), ErrorClass::Other);
    }

    #[test]
    fn conflict_wins_over_overload_when_both_present() {
        let msg = "MVCC_READ_CONFLICT while exceeding concurrency limit";
        assert_eq!(classify_message(msg), ErrorClass::Conflict);
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_prefix_and_suffix_never_change_conflict_class(
            prefix in "[a-z ]{0,32}",
            suffix in "[a-z ]{0,32}",
        ) {
            let msg = format!("{prefix}{CONFLICT_MARKER}{suffix}");
            proptest::prop_assert_eq!(classify_message(&msg), ErrorClass::Conflict);
        }

        #[test]
        fn marker_free_messages_classify_as_other(msg in "[a-z0-9 ]{0,64}") {
            proptest::prop_assert_eq!(classify_message(&msg), ErrorClass::Other);
        }
    }
}
