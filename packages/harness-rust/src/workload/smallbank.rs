//! Smallbank operation builders and the fixed-rate driver.
//!
//! Mirrors the classic smallbank mix: five write functions plus a balance
//! query, issued open-loop at a target rate. Writes and reads route
//! independently to the keyed or default queue; for payments and
//! amalgamations the conflict key follows the hot side of the transfer.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, info};

use ledgerbench_core::{ConflictKey, LedgerContract, RetransmissionPolicy};

use crate::dispatch::Dispatcher;

use super::sampler::{AccountSampler, HotAccount};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which queue tier a class of operations is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum QueueRoute {
    /// Serialize on the account's conflict key.
    Keyed,
    /// Keyless: global FIFO, no mutual exclusion.
    Default,
}

/// Which write functions the generator draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FunctionMix {
    /// All five smallbank writes, uniformly.
    All,
    /// `SendPayment` only.
    PaymentOnly,
}

/// Generator settings.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Number of accounts preloaded and addressed by the run.
    pub accounts: u64,
    /// Zipf skew for hot-account sampling; 0 means uniform.
    pub skew: f64,
    /// Operations issued per one-second frame.
    pub rps: u32,
    /// Total generation time; the client deadline bounds completion
    /// separately.
    pub total_duration: Duration,
    /// Percentage of operations that are writes; the rest are queries.
    pub write_percent: u8,
    /// Write function selection.
    pub function_mix: FunctionMix,
    /// Hot-account mode.
    pub hot_account: HotAccount,
    /// Queue routing for queries.
    pub read_route: QueueRoute,
    /// Queue routing for writes.
    pub write_route: QueueRoute,
    /// Retransmission policy stamped on every generated operation.
    pub policy: RetransmissionPolicy,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            accounts: 1000,
            skew: 1.0,
            rps: 100,
            total_duration: Duration::from_secs(30),
            write_percent: 50,
            function_mix: FunctionMix::All,
            hot_account: HotAccount::All,
            read_route: QueueRoute::Default,
            write_route: QueueRoute::Keyed,
            policy: RetransmissionPolicy::WithDelay,
        }
    }
}

// ---------------------------------------------------------------------------
// SmallBankWorkload
// ---------------------------------------------------------------------------

/// Drives the dispatcher with smallbank traffic.
pub struct SmallBankWorkload {
    dispatcher: Arc<Dispatcher>,
    contract: Arc<dyn LedgerContract>,
    sampler: AccountSampler,
    config: WorkloadConfig,
}

impl SmallBankWorkload {
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        contract: Arc<dyn LedgerContract>,
        config: WorkloadConfig,
    ) -> Self {
        let sampler = if config.skew > 0.0 && config.hot_account != HotAccount::None {
            AccountSampler::zipfian(config.accounts, config.skew)
        } else {
            AccountSampler::uniform(config.accounts)
        };
        Self {
            dispatcher,
            contract,
            sampler,
            config,
        }
    }

    /// Enqueue a `CreateAccount` for every account id, fire-and-forget.
    pub async fn preload_accounts(&self) {
        info!(accounts = self.config.accounts, "preloading accounts");
        for id in 0..self.config.accounts {
            let account = account_name(id);
            self.submit_write(
                "CreateAccount",
                vec![
                    account.clone(),
                    format!("holder_{id}"),
                    "1000000".to_string(),
                    "1000000".to_string(),
                ],
                account,
            )
            .await;
        }
    }

    /// Run the fixed-rate loop until `total_duration` elapses. Returns the
    /// number of operations issued.
    pub async fn run(&self) -> u64 {
        let started = Instant::now();
        let mut issued = 0u64;
        info!(
            rps = self.config.rps,
            duration_secs = self.config.total_duration.as_secs(),
            "workload started"
        );
        while started.elapsed() < self.config.total_duration {
            let frame_start = Instant::now();
            for _ in 0..self.config.rps {
                self.issue_one().await;
                issued += 1;
                // Spread issues across the frame instead of bursting at its
                // start.
                tokio::time::sleep(Duration::from_micros(500)).await;
            }
            let frame_elapsed = frame_start.elapsed();
            if frame_elapsed < Duration::from_secs(1) {
                tokio::time::sleep(Duration::from_secs(1) - frame_elapsed).await;
            }
        }
        info!(issued, "workload finished issuing");
        issued
    }

    async fn issue_one(&self) {
        let is_write = {
            let mut rng = rand::rng();
            rng.random_range(1..=100) <= i32::from(self.config.write_percent)
        };
        if is_write {
            self.issue_write().await;
        } else {
            let id = self.sample_hot();
            let account = account_name(id);
            self.submit_read("Query", vec![account.clone()], account).await;
        }
    }

    async fn issue_write(&self) {
        let (from, to, id) = self.sample_parties();
        let function = match self.config.function_mix {
            FunctionMix::PaymentOnly => 1,
            FunctionMix::All => rand::rng().random_range(1..=5),
        };
        match function {
            1 => {
                let key = self.payment_key(from, to);
                self.submit_write(
                    "SendPayment",
                    vec!["1".to_string(), account_name(to), account_name(from)],
                    key,
                )
                .await;
            }
            2 => {
                let account = account_name(id);
                self.submit_write(
                    "WriteCheck",
                    vec!["1".to_string(), account.clone()],
                    account,
                )
                .await;
            }
            3 => {
                let account = account_name(id);
                self.submit_write(
                    "TransactSavings",
                    vec!["1".to_string(), account.clone()],
                    account,
                )
                .await;
            }
            4 => {
                let account = account_name(id);
                self.submit_write(
                    "DepositChecking",
                    vec!["1".to_string(), account.clone()],
                    account,
                )
                .await;
            }
            _ => {
                let key = self.payment_key(from, to);
                self.submit_write(
                    "Amalgamate",
                    vec![account_name(to), account_name(from)],
                    key,
                )
                .await;
            }
        }
    }

    /// Hot side of a transfer becomes its conflict key.
    fn payment_key(&self, from: u64, to: u64) -> String {
        match self.config.hot_account {
            HotAccount::Recipient => account_name(to),
            _ => account_name(from),
        }
    }

    /// Sample (from, to, id) according to the hot-account mode.
    fn sample_parties(&self) -> (u64, u64, u64) {
        let mut rng = rand::rng();
        match self.config.hot_account {
            HotAccount::All => (
                self.sampler.sample(&mut rng),
                self.sampler.sample(&mut rng),
                self.sampler.sample(&mut rng),
            ),
            HotAccount::Sender => (
                self.sampler.sample(&mut rng),
                self.sampler.sample_uniform(&mut rng),
                self.sampler.sample(&mut rng),
            ),
            HotAccount::Recipient => (
                self.sampler.sample_uniform(&mut rng),
                self.sampler.sample(&mut rng),
                self.sampler.sample(&mut rng),
            ),
            HotAccount::None => (
                self.sampler.sample_uniform(&mut rng),
                self.sampler.sample_uniform(&mut rng),
                self.sampler.sample_uniform(&mut rng),
            ),
        }
    }

    fn sample_hot(&self) -> u64 {
        let mut rng = rand::rng();
        match self.config.hot_account {
            HotAccount::All => self.sampler.sample(&mut rng),
            _ => self.sampler.sample_uniform(&mut rng),
        }
    }

    async fn submit_write(&self, function: &str, args: Vec<String>, key: String) {
        let conflict_key = match self.config.write_route {
            QueueRoute::Keyed => ConflictKey::Explicit(key),
            QueueRoute::Default => ConflictKey::None,
        };
        self.enqueue(function, conflict_key, args).await;
    }

    async fn submit_read(&self, function: &str, args: Vec<String>, key: String) {
        let conflict_key = match self.config.read_route {
            QueueRoute::Keyed => ConflictKey::Explicit(key),
            QueueRoute::Default => ConflictKey::None,
        };
        self.enqueue(function, conflict_key, args).await;
    }

    async fn enqueue(&self, function: &str, key: ConflictKey, args: Vec<String>) {
        // Fire-and-forget: outcomes reach the attempt log, and a single
        // failure never aborts the run.
        if let Err(err) = self
            .dispatcher
            .enqueue(
                Arc::clone(&self.contract),
                function,
                key,
                self.config.policy,
                false,
                args,
            )
            .await
        {
            error!(function, %err, "enqueue failed");
        }
    }
}

/// Canonical account id string.
#[must_use]
pub fn account_name(id: u64) -> String {
    format!("acct_{id}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchConfig;
    use crate::sim::{SimBehavior, SimLedger};

    fn quick_config() -> WorkloadConfig {
        WorkloadConfig {
            accounts: 8,
            skew: 1.0,
            rps: 20,
            total_duration: Duration::from_secs(2),
            ..WorkloadConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn preload_issues_one_create_per_account() {
        let ledger = SimLedger::new(SimBehavior::default());
        let dispatcher = Dispatcher::new(DispatchConfig {
            submit_jitter: Duration::ZERO,
            ..DispatchConfig::default()
        });
        let workload =
            SmallBankWorkload::new(dispatcher, ledger.contract(), quick_config());
        workload.preload_accounts().await;

        // Let the dispatcher drain everything.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let creates = ledger
            .events()
            .iter()
            .filter(|e| e.function == "CreateAccount")
            .count();
        assert_eq!(creates, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_rate_run_issues_roughly_rps_times_duration() {
        let ledger = SimLedger::new(SimBehavior::default());
        let dispatcher = Dispatcher::new(DispatchConfig {
            submit_jitter: Duration::ZERO,
            ..DispatchConfig::default()
        });
        let workload =
            SmallBankWorkload::new(dispatcher, ledger.contract(), quick_config());
        let issued = workload.run().await;
        assert_eq!(issued, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn generated_functions_come_from_the_smallbank_set() {
        let ledger = SimLedger::new(SimBehavior::default());
        let dispatcher = Dispatcher::new(DispatchConfig {
            submit_jitter: Duration::ZERO,
            ..DispatchConfig::default()
        });
        let workload =
            SmallBankWorkload::new(dispatcher, ledger.contract(), quick_config());
        workload.run().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let known = [
            "SendPayment",
            "WriteCheck",
            "TransactSavings",
            "DepositChecking",
            "Amalgamate",
            "Query",
        ];
        let events = ledger.events();
        assert!(!events.is_empty());
        for event in events {
            assert!(known.contains(&event.function.as_str()), "{}", event.function);
        }
    }
}
