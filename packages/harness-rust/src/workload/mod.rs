//! Synthetic smallbank workload generation.
//!
//! Produces the stream of submission requests the dispatch controller
//! consumes: uniform or Zipf-skewed account sampling, a configurable
//! read/write mix, and fixed-rate open-loop pacing.

pub mod sampler;
pub mod smallbank;

pub use sampler::{AccountSampler, HotAccount};
pub use smallbank::{FunctionMix, QueueRoute, SmallBankWorkload, WorkloadConfig};
