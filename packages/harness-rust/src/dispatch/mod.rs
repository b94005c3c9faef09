//! Transaction dispatch controller.
//!
//! Decides when and in what order outstanding operations are sent to the
//! ledger: a shared AIMD admission window bounds the number of operations in
//! flight, a two-tier queue discipline keeps keyless traffic globally FIFO
//! while serializing same-key traffic, and a conflict-driven retry path
//! resubmits with randomized exponential backoff.

pub mod config;
pub mod congestion;
pub mod dispatcher;
pub mod metrics;
pub mod queues;
pub mod retry;

pub use config::{CongestionConfig, Deadline, DispatchConfig};
pub use congestion::CongestionController;
pub use dispatcher::{Dispatcher, DispatcherStatus};
pub use metrics::{FunctionSnapshot, MetricsRegistry, MetricsSnapshot};
pub use queues::QueueManager;
