//! Ledgerbench Harness — contention-aware load generation against a ledger.
//!
//! The centerpiece is the [`dispatch`] module: a client-side admission-control,
//! queueing, and retry engine that paces submissions through a TCP-style
//! congestion window, serializes operations that share a conflict key, and
//! recovers from optimistic-concurrency conflicts and transient overload.
//! [`workload`] generates smallbank traffic, [`report`] snapshots the run, and
//! [`sim`] provides an in-process ledger backend for the binary and the tests.

pub mod dispatch;
pub mod report;
pub mod sim;
pub mod workload;

pub use dispatch::{DispatchConfig, Dispatcher, DispatcherStatus};
