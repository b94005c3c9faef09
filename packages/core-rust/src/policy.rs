//! Retransmission policy and conflict-key routing for enqueued operations.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RetransmissionPolicy
// ---------------------------------------------------------------------------

/// Per-operation policy applied when a submission fails with an
/// optimistic-concurrency conflict.
///
/// Overload failures ignore this policy entirely: they are a systemic signal
/// and are always resubmitted (see the dispatcher's retry path).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetransmissionPolicy {
    /// Never resubmit; the first conflict is terminal for the operation.
    #[default]
    None,
    /// Resubmit immediately with zero wait.
    WithoutDelay,
    /// Resubmit after a randomized exponential backoff,
    /// uniform in `[0, min(2^resend_count, 16))` seconds.
    WithDelay,
}

impl RetransmissionPolicy {
    /// Whether a conflicted operation may be resubmitted at all.
    #[must_use]
    pub fn allows_retransmit(self) -> bool {
        !matches!(self, Self::None)
    }
}

// ---------------------------------------------------------------------------
// ConflictKey
// ---------------------------------------------------------------------------

/// Routing decision for an enqueued operation.
///
/// Operations sharing a resolved key are serialized: at most one of them is
/// in flight at any time. Keyless operations share the global admission
/// window but not any mutual-exclusion constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKey {
    /// No key: route to the default queue.
    None,
    /// Derive the key as `{contract_id}_{function}`, serializing all
    /// invocations of one function on one contract.
    Auto,
    /// Serialize on an explicit key, typically the mutated record's id.
    Explicit(String),
}

impl ConflictKey {
    /// Resolve to the concrete queue key, or `None` for the default queue.
    #[must_use]
    pub fn resolve(&self, contract_id: &str, function: &str) -> Option<String> {
        match self {
            Self::None => None,
            Self::Auto => Some(format!("{contract_id}_{function}")),
            Self::Explicit(key) => Some(key.clone()),
        }
    }
}

impl From<Option<String>> for ConflictKey {
    fn from(key: Option<String>) -> Self {
        key.map_or(Self::None, Self::Explicit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_forbids_retransmit() {
        assert!(!RetransmissionPolicy::None.allows_retransmit());
        assert!(RetransmissionPolicy::WithoutDelay.allows_retransmit());
        assert!(RetransmissionPolicy::WithDelay.allows_retransmit());
    }

    #[test]
    fn conflict_key_resolution() {
        assert_eq!(ConflictKey::None.resolve("smallbank", "Query"), None);
        assert_eq!(
            ConflictKey::Auto.resolve("smallbank", "Query"),
            Some("smallbank_Query".to_string())
        );
        assert_eq!(
            ConflictKey::Explicit("acct_9".into()).resolve("smallbank", "Query"),
            Some("acct_9".to_string())
        );
    }

    #[test]
    fn conflict_key_from_option() {
        assert_eq!(ConflictKey::from(None), ConflictKey::None);
        assert_eq!(
            ConflictKey::from(Some("k".to_string())),
            ConflictKey::Explicit("k".into())
        );
    }
}
