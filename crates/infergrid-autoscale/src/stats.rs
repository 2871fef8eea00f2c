//! Cumulative inference counters and their interval arithmetic.
//!
//! Nodes report counters that only grow while the node is up. The scaler
//! keeps the last report per node and subtracts it from the next one to
//! get what happened during the interval. Deltas from all nodes of a
//! deployment are then summed into one deployment-level window.
//!
//! Pending is a queue length rather than a counter, so its delta is
//! signed: a draining queue gives a negative pending delta, and the
//! request count of an interval is the number of arrivals.
//!
//! Counts combine by plain addition and subtraction. The average
//! inference time combines as a success-weighted mean, and is NaN
//! whenever the combined success count is zero.

use std::ops::{Add, AddAssign};

use infergrid_state::NodeInferenceStats;

/// A snapshot (or interval delta) of inference counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsWindow {
    pub success_count: u64,
    /// Queue length in a snapshot, change in queue length in a delta.
    pub pending_count: i64,
    pub failed_count: u64,
    /// Average time per successful inference, in seconds.
    ///
    /// Only meaningful when `success_count > 0`; NaN otherwise.
    pub avg_inference_time_secs: f64,
}

impl StatsWindow {
    pub fn new(
        success_count: u64,
        pending_count: i64,
        failed_count: u64,
        avg_inference_time_secs: f64,
    ) -> Self {
        Self {
            success_count,
            pending_count,
            failed_count,
            avg_inference_time_secs,
        }
    }

    /// Requests that arrived: completed plus the growth of the queue.
    pub fn request_count(&self) -> u64 {
        let completed = self.success_count.saturating_add(self.failed_count);
        let completed = i64::try_from(completed).unwrap_or(i64::MAX);
        completed.saturating_add(self.pending_count).max(0) as u64
    }

    /// Seconds spent on successful inferences.
    pub fn total_inference_time_secs(&self) -> f64 {
        if self.success_count == 0 {
            return 0.0;
        }
        self.success_count as f64 * self.avg_inference_time_secs
    }

    /// The average inference time, or `None` if nothing succeeded.
    pub fn avg_inference_time(&self) -> Option<f64> {
        (self.success_count > 0 && self.avg_inference_time_secs.is_finite())
            .then_some(self.avg_inference_time_secs)
    }

    /// Subtract an earlier window of the same node from this one.
    ///
    /// Returns `None` if the success or failure count went backwards, which
    /// happens when the node restarted and its counters were reset.
    pub fn checked_sub(&self, earlier: &StatsWindow) -> Option<StatsWindow> {
        let success_count = self.success_count.checked_sub(earlier.success_count)?;
        let pending_count = self.pending_count.saturating_sub(earlier.pending_count);
        let failed_count = self.failed_count.checked_sub(earlier.failed_count)?;
        let avg_inference_time_secs = weighted_avg(
            self.total_inference_time_secs() - earlier.total_inference_time_secs(),
            success_count,
        );
        Some(StatsWindow {
            success_count,
            pending_count,
            failed_count,
            avg_inference_time_secs,
        })
    }

    /// The interval delta between two consecutive reports of one node.
    pub fn delta(previous: &StatsWindow, current: &StatsWindow) -> Option<StatsWindow> {
        current.checked_sub(previous)
    }
}

fn weighted_avg(total_time: f64, success_count: u64) -> f64 {
    if success_count > 0 {
        total_time / success_count as f64
    } else {
        f64::NAN
    }
}

impl Add for StatsWindow {
    type Output = StatsWindow;

    fn add(self, other: StatsWindow) -> StatsWindow {
        let success_count = self.success_count + other.success_count;
        StatsWindow {
            success_count,
            pending_count: self.pending_count.saturating_add(other.pending_count),
            failed_count: self.failed_count + other.failed_count,
            avg_inference_time_secs: weighted_avg(
                self.total_inference_time_secs() + other.total_inference_time_secs(),
                success_count,
            ),
        }
    }
}

impl AddAssign for StatsWindow {
    fn add_assign(&mut self, other: StatsWindow) {
        *self = *self + other;
    }
}

impl From<&NodeInferenceStats> for StatsWindow {
    /// Errors, timeouts and rejected executions all count as failures.
    fn from(stats: &NodeInferenceStats) -> Self {
        StatsWindow {
            success_count: stats.inference_count.unwrap_or(0),
            pending_count: stats
                .pending_count
                .map_or(0, |p| i64::try_from(p).unwrap_or(i64::MAX)),
            failed_count: stats.error_count + stats.timeout_count + stats.rejected_execution_count,
            avg_inference_time_secs: stats.avg_inference_time_ms.unwrap_or(0.0) / 1000.0,
        }
    }
}
