//! AIMD admission window over the ledger's RPC channel.
//!
//! TCP Reno-style congestion control with the remote ledger's overload
//! rejections standing in for packet loss: the window doubles per saturated
//! completion below the slow-start threshold, grows by `1/window` at or above
//! it, and halves (floor 1) when an overload signal has accrued and the
//! decrease cooldown has elapsed. The single mutex around the state is the
//! serialization point required for the counters to stay coherent when the
//! drain loops run on separate workers.

use parking_lot::Mutex;
use tokio::time::Instant;
use serde::Serialize;

use super::config::CongestionConfig;

// ---------------------------------------------------------------------------
// CongestionController
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CongestionState {
    /// Current admission window; fractional because congestion avoidance
    /// grows it by `1/window` per completion.
    window: f64,
    /// Operations currently in flight.
    in_flight: u64,
    /// Overload signals accrued since the last decrease.
    overload_signals: u32,
    /// Time of the last multiplicative decrease; `None` until the first one,
    /// so the very first overload signal halves without waiting out the
    /// cooldown.
    last_decrease: Option<Instant>,
}

/// Shared admission window with AIMD adjustment on every release.
#[derive(Debug)]
pub struct CongestionController {
    config: CongestionConfig,
    state: Mutex<CongestionState>,
}

/// Point-in-time view of the window, embedded in reporter snapshots.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CongestionSnapshot {
    pub window: f64,
    pub in_flight: u64,
}

impl CongestionController {
    /// Create a controller with the given tunables.
    #[must_use]
    pub fn new(config: CongestionConfig) -> Self {
        let window = config.initial_window;
        Self {
            config,
            state: Mutex::new(CongestionState {
                window,
                in_flight: 0,
                overload_signals: 0,
                last_decrease: None,
            }),
        }
    }

    /// Try to claim an in-flight slot. Returns `true` and increments the
    /// in-flight count iff it is below the current window.
    pub fn try_admit(&self) -> bool {
        let mut state = self.state.lock();
        #[allow(clippy::cast_precision_loss)]
        if (state.in_flight as f64) < state.window {
            state.in_flight += 1;
            true
        } else {
            false
        }
    }

    /// Re-claim a slot for a retry without checking the window.
    ///
    /// Retries conceptually keep the slot they released when their previous
    /// attempt was classified, so the window may transiently overshoot by the
    /// number of concurrently retrying operations.
    pub fn readmit(&self) {
        self.state.lock().in_flight += 1;
    }

    /// Give back a slot claimed by `try_admit` that was never used because
    /// the queue turned out to be empty. No AIMD update.
    pub fn cancel_admit(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Record one overload rejection from the ledger.
    pub fn signal_overload(&self) {
        self.state.lock().overload_signals += 1;
    }

    /// Release a slot and run the AIMD update.
    ///
    /// Decrease is checked before growth so a saturated window cannot grow
    /// and halve in the same completion.
    pub fn release(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();

        let cooldown_over = state
            .last_decrease
            .is_none_or(|at| now.duration_since(at) >= self.config.decrease_cooldown);

        #[allow(clippy::cast_precision_loss)]
        let saturated = (state.in_flight as f64) >= state.window;

        if state.overload_signals > 0 && cooldown_over {
            let halved = (state.window / 2.0).max(1.0);
            tracing::info!(
                window = state.window,
                halved,
                signals = state.overload_signals,
                "admission window halved on overload"
            );
            state.window = halved;
            state.overload_signals = 0;
            state.last_decrease = Some(now);
        } else if saturated {
            if state.window >= self.config.ssthresh {
                // Congestion avoidance: near-linear growth.
                state.window += 1.0 / state.window;
            } else {
                // Slow start.
                state.window *= 2.0;
            }
        }

        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Current window value.
    #[must_use]
    pub fn window(&self) -> f64 {
        self.state.lock().window
    }

    /// Current in-flight count.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.state.lock().in_flight
    }

    /// Snapshot both counters atomically.
    #[must_use]
    pub fn snapshot(&self) -> CongestionSnapshot {
        let state = self.state.lock();
        CongestionSnapshot {
            window: state.window,
            in_flight: state.in_flight,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn controller(initial: f64, ssthresh: f64, cooldown_ms: u64) -> CongestionController {
        CongestionController::new(CongestionConfig {
            initial_window: initial,
            ssthresh,
            decrease_cooldown: Duration::from_millis(cooldown_ms),
        })
    }

    #[test]
    fn admits_up_to_window_then_refuses() {
        let cc = controller(2.0, 256.0, 5000);
        assert!(cc.try_admit());
        assert!(cc.try_admit());
        assert!(!cc.try_admit());
        assert_eq!(cc.in_flight(), 2);
    }

    #[test]
    fn release_without_saturation_keeps_window() {
        let cc = controller(8.0, 256.0, 5000);
        assert!(cc.try_admit());
        cc.release();
        assert!((cc.window() - 8.0).abs() < f64::EPSILON);
        assert_eq!(cc.in_flight(), 0);
    }

    #[test]
    fn slow_start_doubles_on_saturated_release() {
        let cc = controller(1.0, 256.0, 5000);
        assert!(cc.try_admit());
        cc.release();
        assert!((cc.window() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn congestion_avoidance_grows_by_reciprocal() {
        let cc = controller(4.0, 4.0, 5000);
        for _ in 0..4 {
            assert!(cc.try_admit());
        }
        cc.release();
        assert!((cc.window() - 4.25).abs() < 1e-9);
    }

    #[test]
    fn window_is_non_decreasing_under_constant_saturation() {
        let cc = controller(1.0, 8.0, 5000);
        let mut previous = cc.window();
        for _ in 0..32 {
            while cc.try_admit() {}
            cc.release();
            let current = cc.window();
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn first_overload_halves_immediately() {
        let cc = controller(32.0, 256.0, 5000);
        assert!(cc.try_admit());
        cc.signal_overload();
        cc.release();
        assert!((cc.window() - 16.0).abs() < f64::EPSILON);
    }

    #[test]
    fn overload_burst_inside_cooldown_halves_exactly_once() {
        let cc = controller(32.0, 256.0, 60_000);
        assert!(cc.try_admit());
        cc.signal_overload();
        cc.release();
        assert!((cc.window() - 16.0).abs() < f64::EPSILON);

        // Ten more signals, still within the cooldown: no further decrease,
        // and no growth because the window is not saturated.
        for _ in 0..10 {
            cc.signal_overload();
            assert!(cc.try_admit());
            cc.release();
        }
        assert!((cc.window() - 16.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_never_halves_below_one() {
        let cc = controller(1.0, 256.0, 0);
        for _ in 0..4 {
            assert!(cc.try_admit());
            cc.signal_overload();
            cc.release();
        }
        assert!((cc.window() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn readmit_bypasses_the_window_check() {
        let cc = controller(1.0, 256.0, 5000);
        assert!(cc.try_admit());
        cc.readmit();
        assert_eq!(cc.in_flight(), 2);
        assert!(!cc.try_admit());
    }

    #[test]
    fn cancel_admit_returns_the_slot_without_aimd() {
        let cc = controller(1.0, 256.0, 5000);
        assert!(cc.try_admit());
        cc.cancel_admit();
        assert_eq!(cc.in_flight(), 0);
        // A saturated release would have doubled; cancel must not.
        assert!((cc.window() - 1.0).abs() < f64::EPSILON);
    }
}
