//! Account-id sampling: uniform or Zipf-skewed.
//!
//! The Zipfian sampler precomputes the normalized cumulative distribution of
//! `1/(rank+1)^skew` once and answers each sample with a binary search over
//! it, so a draw is `O(log n)` with no allocation.

use rand::Rng;

// ---------------------------------------------------------------------------
// HotAccount
// ---------------------------------------------------------------------------

/// Which side of an operation draws from the skewed distribution.
///
/// Under `Sender`/`Recipient` only that side of a payment is hot; the other
/// side is uniform. `None` disables skew entirely regardless of the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HotAccount {
    All,
    Sender,
    Recipient,
    None,
}

// ---------------------------------------------------------------------------
// AccountSampler
// ---------------------------------------------------------------------------

/// Samples account ids in `[0, accounts)`.
#[derive(Debug, Clone)]
pub enum AccountSampler {
    Uniform {
        accounts: u64,
    },
    Zipfian {
        accounts: u64,
        /// Cumulative probabilities, ascending, last entry 1.0.
        cdf: Vec<f64>,
    },
}

impl AccountSampler {
    /// Uniform sampler over `accounts` ids.
    #[must_use]
    pub fn uniform(accounts: u64) -> Self {
        Self::Uniform {
            accounts: accounts.max(1),
        }
    }

    /// Zipfian sampler with the given skew. Skew 0 degenerates to uniform
    /// weights (still built as a table).
    ///
    /// # Panics
    ///
    /// Panics if `accounts` is 0.
    #[must_use]
    pub fn zipfian(accounts: u64, skew: f64) -> Self {
        assert!(accounts > 0, "zipfian sampler needs at least one account");
        let accounts_usize = usize::try_from(accounts).unwrap_or(usize::MAX);
        let mut weights = Vec::with_capacity(accounts_usize);
        for rank in 0..accounts_usize {
            #[allow(clippy::cast_precision_loss)]
            let weight = 1.0 / ((rank as f64) + 1.0).powf(skew);
            weights.push(weight);
        }
        let total: f64 = weights.iter().sum();
        let mut cdf = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for weight in &weights {
            acc += weight / total;
            cdf.push(acc);
        }
        // Guard against floating-point shortfall at the tail.
        if let Some(last) = cdf.last_mut() {
            *last = 1.0;
        }
        Self::Zipfian { accounts, cdf }
    }

    /// Draw one account id.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        match self {
            Self::Uniform { accounts } => rng.random_range(0..*accounts),
            Self::Zipfian { cdf, .. } => {
                let roll: f64 = rng.random();
                let idx = cdf.partition_point(|&cum| cum <= roll).min(cdf.len() - 1);
                u64::try_from(idx).unwrap_or(u64::MAX)
            }
        }
    }

    /// Draw uniformly regardless of the sampler's own distribution; used for
    /// the cold side of hot-account modes.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let accounts = match self {
            Self::Uniform { accounts } | Self::Zipfian { accounts, .. } => *accounts,
        };
        rng.random_range(0..accounts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_stays_in_range() {
        let sampler = AccountSampler::uniform(10);
        let mut rng = rand::rng();
        for _ in 0..1000 {
            assert!(sampler.sample(&mut rng) < 10);
        }
    }

    #[test]
    fn zipfian_stays_in_range() {
        let sampler = AccountSampler::zipfian(100, 1.0);
        let mut rng = rand::rng();
        for _ in 0..1000 {
            assert!(sampler.sample(&mut rng) < 100);
        }
    }

    #[test]
    fn zipfian_skews_toward_low_ranks() {
        let sampler = AccountSampler::zipfian(1000, 1.2);
        let mut rng = rand::rng();
        let draws = 20_000;
        let mut head = 0u32;
        for _ in 0..draws {
            if sampler.sample(&mut rng) < 10 {
                head += 1;
            }
        }
        // With skew 1.2 over 1000 accounts, the top 10 ranks carry well over
        // a third of the mass; uniform would give 1%.
        assert!(head > draws / 5, "head draws: {head}");
    }

    #[test]
    fn zipfian_cdf_is_monotone_and_ends_at_one() {
        let AccountSampler::Zipfian { cdf, .. } = AccountSampler::zipfian(50, 0.8) else {
            panic!("expected zipfian");
        };
        for pair in cdf.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!((cdf.last().unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_account_always_samples_zero() {
        let sampler = AccountSampler::zipfian(1, 1.5);
        let mut rng = rand::rng();
        assert_eq!(sampler.sample(&mut rng), 0);
    }
}
