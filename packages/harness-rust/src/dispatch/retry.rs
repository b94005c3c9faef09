//! Backoff computation for resubmitted operations.
//!
//! Conflicts under `WithDelay` wait a uniformly random duration below
//! `min(2^resend_count, 16)` seconds. `WithoutDelay` resubmits with zero
//! wait. Overload retries also wait zero: the shrunken admission window, not
//! a sleep, provides the pacing.

use std::time::Duration;

use rand::Rng;

use ledgerbench_core::RetransmissionPolicy;

/// Base (exclusive upper bound) of the conflict backoff for a given resend
/// count: `min(2^resend_count, cap)`.
#[must_use]
pub fn conflict_backoff_base(resend_count: u32, cap: Duration) -> Duration {
    let exp = resend_count.min(32);
    let doubled = Duration::from_secs(2u64.saturating_pow(exp));
    doubled.min(cap)
}

/// Randomized wait before resubmitting a conflicted operation.
///
/// `resend_count` is the value *after* incrementing for the upcoming attempt.
/// Policy `None` never reaches this path.
#[must_use]
pub fn conflict_backoff(
    policy: RetransmissionPolicy,
    resend_count: u32,
    cap: Duration,
) -> Duration {
    match policy {
        RetransmissionPolicy::None | RetransmissionPolicy::WithoutDelay => Duration::ZERO,
        RetransmissionPolicy::WithDelay => {
            let base = conflict_backoff_base(resend_count, cap);
            if base.is_zero() {
                Duration::ZERO
            } else {
                let bound = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
                let millis = rand::rng().random_range(0..bound);
                Duration::from_millis(millis)
            }
        }
    }
}

/// Wait before resubmitting after an overload rejection: zero, regardless of
/// the operation's configured policy.
#[must_use]
pub fn overload_backoff() -> Duration {
    Duration::ZERO
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
