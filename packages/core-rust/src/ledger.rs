//! Ledger capability traits consumed by the dispatch controller.
//!
//! The harness never talks to a ledger SDK directly. It receives an opaque
//! contract handle, mints submittable operations from it, and submits them.
//! Network bootstrap (identity enrollment, connection profiles, gateway and
//! channel binding) happens behind these traits and is out of scope here.

use async_trait::async_trait;

use crate::classify::{classify_message, ErrorClass};

// ---------------------------------------------------------------------------
// SubmitError
// ---------------------------------------------------------------------------

/// Error returned by a ledger backend for a failed submission attempt.
///
/// Ledger SDKs surface failures as strings; classification is driven entirely
/// by known markers inside the message (see [`classify_message`]).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SubmitError {
    /// Raw error message from the backend, inspected for known markers.
    pub message: String,
}

impl SubmitError {
    /// Wrap a backend error message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Classify this error by its message markers.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        classify_message(&self.message)
    }
}

// ---------------------------------------------------------------------------
// LedgerContract / LedgerOperation
// ---------------------------------------------------------------------------

/// Handle to a deployed contract from which operations are minted.
///
/// A fresh [`LedgerOperation`] must be created for every submission attempt,
/// including retries: ledger transactions carry a one-shot identity and cannot
/// be resubmitted under the same id.
#[async_trait]
pub trait LedgerContract: Send + Sync {
    /// Stable identifier of the deployed contract (e.g. chaincode id).
    fn contract_id(&self) -> &str;

    /// Mint a submittable operation bound to `function`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot create a transaction proposal
    /// (e.g. the connection is gone).
    async fn create_operation(&self, function: &str) -> anyhow::Result<Box<dyn LedgerOperation>>;
}

/// A single submittable unit: one function invocation with bound arguments.
#[async_trait]
pub trait LedgerOperation: Send + Sync {
    /// Unique id of this operation instance, used in logs and records.
    fn operation_id(&self) -> &str;

    /// Logical function name, used for metrics bucketing.
    fn function(&self) -> &str;

    /// Submit the operation to the ledger and await its result payload.
    ///
    /// # Errors
    ///
    /// Returns a [`SubmitError`] whose message carries the backend's failure
    /// markers; the dispatcher classifies it via [`SubmitError::class`].
    async fn submit(&self, args: &[String]) -> Result<Vec<u8>, SubmitError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_error_display_is_raw_message() {
        let err = SubmitError::new("MVCC_READ_CONFLICT at key 42");
        assert_eq!(err.to_string(), "MVCC_READ_CONFLICT at key 42");
    }

    #[test]
    fn submit_error_classifies_through_markers() {
        assert_eq!(
            SubmitError::new("error: MVCC_READ_CONFLICT").class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            SubmitError::new("gateway said no").class(),
            ErrorClass::Other
        );
    }
}
