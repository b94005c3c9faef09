//! Run reporting: periodic metrics snapshots, the structured transaction
//! log, and a latency histogram.
//!
//! The reporter task pulls a full metrics + congestion snapshot from the
//! dispatcher on a fixed interval (and once more at shutdown), derives
//! interval throughput and conflict rates, and emits one JSON line per
//! sample. Attempt records flow through [`AttemptSink`] implementations:
//! a JSONL writer for the per-attempt transaction log and an HDR histogram
//! for latency percentiles.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use ledgerbench_core::{AttemptRecord, AttemptSink};

use crate::dispatch::{Dispatcher, DispatcherStatus, MetricsSnapshot};

// ---------------------------------------------------------------------------
// Attempt sinks
// ---------------------------------------------------------------------------

/// Writes one JSON line per attempt record.
pub struct JsonlSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlSink {
    /// Wrap any writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Create (truncating) a log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(std::io::BufWriter::new(file))))
    }

    /// Flush buffered lines to the underlying writer.
    pub fn flush(&self) {
        if let Err(err) = self.writer.lock().flush() {
            warn!(%err, "failed to flush attempt log");
        }
    }
}

impl AttemptSink for JsonlSink {
    fn record(&self, record: &AttemptRecord) {
        let mut writer = self.writer.lock();
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(err) = writeln!(writer, "{line}") {
                    warn!(%err, "failed to write attempt record");
                }
            }
            Err(err) => warn!(%err, "failed to serialize attempt record"),
        }
    }
}

/// Accumulates attempt latencies into an HDR histogram.
pub struct LatencySink {
    histogram: Mutex<Histogram<u64>>,
}

/// Percentile summary reported at shutdown.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

impl LatencySink {
    /// Histogram from 1 ms to 10 min, 3 significant digits.
    ///
    /// # Panics
    ///
    /// Never: the bounds are constants accepted by `hdrhistogram`.
    #[must_use]
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, 600_000, 3).expect("static histogram bounds");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    /// Current percentile summary.
    #[must_use]
    pub fn summary(&self) -> LatencySummary {
        let histogram = self.histogram.lock();
        LatencySummary {
            count: histogram.len(),
            p50_ms: histogram.value_at_quantile(0.50),
            p95_ms: histogram.value_at_quantile(0.95),
            p99_ms: histogram.value_at_quantile(0.99),
            max_ms: histogram.max(),
        }
    }
}

impl Default for LatencySink {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptSink for LatencySink {
    fn record(&self, record: &AttemptRecord) {
        let latency_ms = record.finished_at_ms.saturating_sub(record.started_at_ms);
        // saturating_record clamps to the histogram's upper bound.
        self.histogram.lock().saturating_record(latency_ms.max(1));
    }
}

/// Duplicates every record into each wrapped sink.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AttemptSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn AttemptSink>>) -> Self {
        Self { sinks }
    }
}

impl AttemptSink for FanoutSink {
    fn record(&self, record: &AttemptRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// One periodic snapshot line.
#[derive(Debug, Serialize)]
pub struct ReportLine {
    /// Milliseconds since the previous sample.
    pub interval_ms: u64,
    /// Completions per second over the interval.
    pub tps: f64,
    /// Conflicted attempts per second over the interval.
    pub conflicts_per_sec: f64,
    /// `conflicts / (completions + conflicts)` over the interval.
    pub conflict_ratio: f64,
    pub status: DispatcherStatus,
    pub metrics: MetricsSnapshot,
}

/// Samples the dispatcher on a fixed interval and writes JSON lines.
pub struct Reporter {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    writer: Box<dyn Write + Send>,
    prev_at: Instant,
    prev_completed: u64,
    prev_conflicts: u64,
}

/// Handle to a spawned reporter task.
pub struct ReporterHandle {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl ReporterHandle {
    /// Signal shutdown and wait for the final sample to be written.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

impl Reporter {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, interval: Duration, writer: Box<dyn Write + Send>) -> Self {
        Self {
            dispatcher,
            interval,
            writer,
            prev_at: Instant::now(),
            prev_completed: 0,
            prev_conflicts: 0,
        }
    }

    /// Take one sample: derive interval rates, log, and write the JSON line.
    pub fn sample(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.prev_at);
        let interval_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let metrics = self.dispatcher.metrics().snapshot();
        let status = self.dispatcher.status();

        let secs = elapsed.as_secs_f64().max(1e-9);
        #[allow(clippy::cast_precision_loss)]
        let tps = (metrics.completed - self.prev_completed) as f64 / secs;
        #[allow(clippy::cast_precision_loss)]
        let conflicts_per_sec = (metrics.conflicts - self.prev_conflicts) as f64 / secs;
        let denominator = tps + conflicts_per_sec;
        let conflict_ratio = if denominator > 0.0 {
            conflicts_per_sec / denominator
        } else {
            0.0
        };

        self.prev_at = now;
        self.prev_completed = metrics.completed;
        self.prev_conflicts = metrics.conflicts;

        info!(
            tps,
            conflicts_per_sec,
            window = status.window,
            in_flight = status.in_flight,
            pending = status.pending_total,
            completed = metrics.completed,
            "periodic snapshot"
        );

        let line = ReportLine {
            interval_ms,
            tps,
            conflicts_per_sec,
            conflict_ratio,
            status,
            metrics,
        };
        match serde_json::to_string(&line) {
            Ok(json) => {
                if let Err(err) = writeln!(self.writer, "{json}") {
                    warn!(%err, "failed to write snapshot line");
                }
                let _ = self.writer.flush();
            }
            Err(err) => warn!(%err, "failed to serialize snapshot line"),
        }
    }

    /// Spawn the periodic sampling task. A final sample is taken when the
    /// handle is stopped.
    #[must_use]
    pub fn spawn(mut self) -> ReporterHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // Skip the immediate first tick so the first sample covers a
            // full interval.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sample();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            self.sample();
                            return;
                        }
                    }
                }
            }
        });
        ReporterHandle { shutdown, handle }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use ledgerbench_core::OutcomeTag;

    use super::*;
    use crate::dispatch::DispatchConfig;

    /// Shared in-memory writer for asserting on emitted lines.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn record(started: u64, finished: u64) -> AttemptRecord {
        AttemptRecord {
            operation_id: "op".into(),
            function: "Query".into(),
            args: vec![],
            outcome: OutcomeTag::Success,
            resend_count: 0,
            started_at_ms: started,
            finished_at_ms: finished,
        }
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_record() {
        let buf = SharedBuf::default();
        let sink = JsonlSink::new(Box::new(buf.clone()));
        sink.record(&record(0, 5));
        sink.record(&record(10, 30));
        sink.flush();
        let contents = buf.contents();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().all(|l| l.contains("\"success\"")));
    }

    #[test]
    fn latency_sink_summarizes_percentiles() {
        let sink = LatencySink::new();
        for latency in [10u64, 20, 30, 40, 1000] {
            sink.record(&record(0, latency));
        }
        let summary = sink.summary();
        assert_eq!(summary.count, 5);
        assert!(summary.p50_ms >= 20 && summary.p50_ms <= 30);
        assert!(summary.max_ms >= 999);
    }

    #[test]
    fn fanout_duplicates_records() {
        let buf_a = SharedBuf::default();
        let buf_b = SharedBuf::default();
        let fanout = FanoutSink::new(vec![
            Arc::new(JsonlSink::new(Box::new(buf_a.clone()))),
            Arc::new(JsonlSink::new(Box::new(buf_b.clone()))),
        ]);
        fanout.record(&record(0, 1));
        assert_eq!(buf_a.contents().lines().count(), 1);
        assert_eq!(buf_b.contents().lines().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sample_derives_interval_rates() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let buf = SharedBuf::default();
        let mut reporter = Reporter::new(
            Arc::clone(&dispatcher),
            Duration::from_millis(1000),
            Box::new(buf.clone()),
        );

        dispatcher.metrics().note_success("Query");
        dispatcher.metrics().note_success("Query");
        dispatcher.metrics().note_conflict("Query");
        tokio::time::sleep(Duration::from_secs(2)).await;
        reporter.sample();

        let contents = buf.contents();
        let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert!((line["tps"].as_f64().unwrap() - 1.0).abs() < 0.1);
        assert!((line["conflict_ratio"].as_f64().unwrap() - (1.0 / 3.0)).abs() < 0.05);
        assert_eq!(line["metrics"]["completed"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_reporter_emits_lines_and_final_sample() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let buf = SharedBuf::default();
        let reporter = Reporter::new(
            Arc::clone(&dispatcher),
            Duration::from_millis(1000),
            Box::new(buf.clone()),
        );
        let handle = reporter.spawn();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.stop().await;
        // Three ticks plus the shutdown sample.
        assert_eq!(buf.contents().lines().count(), 4);
    }
}
