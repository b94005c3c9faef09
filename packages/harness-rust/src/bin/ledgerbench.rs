//! Ledgerbench CLI: wires the dispatch controller, the smallbank workload,
//! and the reporter against the simulated ledger backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledgerbench_core::RetransmissionPolicy;
use ledgerbench_harness::dispatch::{CongestionConfig, DispatchConfig, Dispatcher};
use ledgerbench_harness::report::{FanoutSink, JsonlSink, LatencySink, Reporter};
use ledgerbench_harness::sim::{SimBehavior, SimLedger};
use ledgerbench_harness::workload::{
    FunctionMix, HotAccount, QueueRoute, SmallBankWorkload, WorkloadConfig,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// CLI-facing mirror of [`RetransmissionPolicy`].
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    None,
    WithoutDelay,
    WithDelay,
}

impl From<PolicyArg> for RetransmissionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::None => Self::None,
            PolicyArg::WithoutDelay => Self::WithoutDelay,
            PolicyArg::WithDelay => Self::WithDelay,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "ledgerbench", about = "Contention-aware ledger load harness")]
struct Args {
    /// Number of accounts to preload and address.
    #[arg(long, env = "LB_ACCOUNTS", default_value_t = 1000)]
    accounts: u64,

    /// Zipf skew for hot-account sampling (0 = uniform).
    #[arg(long, env = "LB_SKEW", default_value_t = 1.0)]
    skew: f64,

    /// Operations issued per second.
    #[arg(long, env = "LB_RPS", default_value_t = 100)]
    rps: u32,

    /// Total workload duration in seconds.
    #[arg(long, env = "LB_DURATION_SECS", default_value_t = 30)]
    duration_secs: u64,

    /// Percentage of operations that are writes.
    #[arg(long, env = "LB_WRITE_PERCENT", default_value_t = 50)]
    write_percent: u8,

    /// Write function selection.
    #[arg(long, env = "LB_FUNCTION_MIX", value_enum, default_value = "all")]
    function_mix: FunctionMix,

    /// Hot-account mode.
    #[arg(long, env = "LB_HOT_ACCOUNT", value_enum, default_value = "all")]
    hot_account: HotAccount,

    /// Queue routing for queries.
    #[arg(long, env = "LB_READ_ROUTE", value_enum, default_value = "default")]
    read_route: QueueRoute,

    /// Queue routing for writes.
    #[arg(long, env = "LB_WRITE_ROUTE", value_enum, default_value = "keyed")]
    write_route: QueueRoute,

    /// Retransmission policy for conflicted operations.
    #[arg(long, env = "LB_POLICY", value_enum, default_value = "with-delay")]
    policy: PolicyArg,

    /// Initial admission window.
    #[arg(long, default_value_t = 32.0)]
    initial_window: f64,

    /// Slow-start threshold.
    #[arg(long, default_value_t = 256.0)]
    ssthresh: f64,

    /// Cooldown between window decreases, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    decrease_cooldown_ms: u64,

    /// Client deadline budget from workload start, in seconds.
    #[arg(long, default_value_t = 60)]
    client_timeout_secs: u64,

    /// Reporter sampling interval, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    report_interval_ms: u64,

    /// Directory for attempt and snapshot logs.
    #[arg(long, env = "LB_OUTPUT_DIR", default_value = "data")]
    output_dir: PathBuf,

    /// Simulated ledger service time, in milliseconds.
    #[arg(long, default_value_t = 10)]
    sim_latency_ms: u64,

    /// Simulated conflict probability.
    #[arg(long, default_value_t = 0.0)]
    sim_conflict_rate: f64,

    /// Simulated overload probability.
    #[arg(long, default_value_t = 0.0)]
    sim_overload_rate: f64,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.output_dir)?;

    let run_id = {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let rand_part: u32 = rand::Rng::random_range(&mut rand::rng(), 0..1_000_000);
        format!("{now}_{rand_part}")
    };

    let attempt_log = Arc::new(JsonlSink::create(
        &args.output_dir.join(format!("{run_id}_attempts.jsonl")),
    )?);
    let latency = Arc::new(LatencySink::new());
    let fanout: Vec<Arc<dyn ledgerbench_core::AttemptSink>> =
        vec![
            Arc::clone(&attempt_log) as Arc<dyn ledgerbench_core::AttemptSink>,
            Arc::clone(&latency) as Arc<dyn ledgerbench_core::AttemptSink>,
        ];
    let sink = Arc::new(FanoutSink::new(fanout));

    let dispatch_config = DispatchConfig {
        congestion: CongestionConfig {
            initial_window: args.initial_window,
            ssthresh: args.ssthresh,
            decrease_cooldown: Duration::from_millis(args.decrease_cooldown_ms),
        },
        client_timeout: Duration::from_secs(args.client_timeout_secs),
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::with_sink(dispatch_config, sink);

    let ledger = SimLedger::new(SimBehavior {
        latency: Duration::from_millis(args.sim_latency_ms),
        conflict_rate: args.sim_conflict_rate,
        overload_rate: args.sim_overload_rate,
    });

    let workload_config = WorkloadConfig {
        accounts: args.accounts,
        skew: args.skew,
        rps: args.rps,
        total_duration: Duration::from_secs(args.duration_secs),
        write_percent: args.write_percent,
        function_mix: args.function_mix,
        hot_account: args.hot_account,
        read_route: args.read_route,
        write_route: args.write_route,
        policy: args.policy.into(),
    };
    let workload = SmallBankWorkload::new(
        Arc::clone(&dispatcher),
        ledger.contract(),
        workload_config,
    );

    let snapshot_log = std::io::BufWriter::new(std::fs::File::create(
        args.output_dir.join(format!("{run_id}_snapshots.jsonl")),
    )?);
    let reporter = Reporter::new(
        Arc::clone(&dispatcher),
        Duration::from_millis(args.report_interval_ms),
        Box::new(snapshot_log),
    );
    let reporter_handle = reporter.spawn();

    workload.preload_accounts().await;

    dispatcher
        .deadline()
        .arm(Instant::now(), Duration::from_secs(args.client_timeout_secs));

    tokio::select! {
        issued = workload.run() => {
            info!(issued, "workload completed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, draining");
        }
    }

    // Let the backlog drain until the client deadline cuts it off.
    loop {
        let status = dispatcher.status();
        if (status.pending_total == 0 && status.in_flight == 0) || dispatcher.deadline().expired()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    reporter_handle.stop().await;
    attempt_log.flush();

    let summary = latency.summary();
    info!(
        attempts = ledger.total_attempts(),
        latency_count = summary.count,
        p50_ms = summary.p50_ms,
        p95_ms = summary.p95_ms,
        p99_ms = summary.p99_ms,
        max_ms = summary.max_ms,
        "run complete"
    );
    Ok(())
}
