//! Ledgerbench Core — ledger capability traits, outcome classification,
//! retransmission policies, and per-attempt records.
//!
//! Everything in this crate is runtime-agnostic: the harness crate owns the
//! tokio side (queues, congestion window, drain loops). This crate defines the
//! seam between the dispatch controller and whatever ledger backend it drives.

pub mod classify;
pub mod ledger;
pub mod policy;
pub mod record;

pub use classify::{classify_message, ErrorClass};
pub use ledger::{LedgerContract, LedgerOperation, SubmitError};
pub use policy::{ConflictKey, RetransmissionPolicy};
pub use record::{AttemptRecord, AttemptSink, NullSink, OutcomeTag, SubmitOutcome};
