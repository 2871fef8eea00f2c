//! Allocation deciders — turn an interval of load into a target allocation count.
//!
//! The control loop owns one decider per tracked deployment and feeds it the
//! deployment-level [`StatsWindow`] delta once per cycle. Whatever a decider
//! needs to remember between cycles lives inside it and is never shared with
//! another deployment.
//!
//! [`UtilizationDecider`] is the bundled implementation:
//!
//! ```text
//! load        = request_rate * avg_inference_time     (busy allocations)
//! utilization = load / current_allocations
//!
//! if utilization > target * 1.1:
//!     ScaleTo(min(ceil(load / target), max))
//!
//! if utilization < target * 0.5 and current > min:
//!     ScaleTo(max(ceil(load / target), min))
//! ```

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::DecisionError;
use crate::stats::StatsWindow;

/// What a decider sees for one deployment in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    /// Deployment-wide delta since the previous cycle.
    pub stats: &'a StatsWindow,
    /// Wall-clock seconds covered by `stats`.
    pub interval_secs: f64,
    /// Allocation count reported alongside the stats.
    pub current_allocations: u32,
}

/// Per-deployment scaling heuristic.
pub trait AllocationDecider: Send {
    /// Update the allocation bounds. Called on every topology change.
    fn set_bounds(&mut self, min: u32, max: u32);

    /// Propose a new allocation count, or `None` to keep the current one.
    ///
    /// Proposals are expected to lie within the last bounds given to
    /// [`set_bounds`](Self::set_bounds).
    fn decide(&mut self, input: DecisionInput<'_>) -> Result<Option<u32>, DecisionError>;
}

/// Creates the decider for a newly tracked deployment.
///
/// Called with (deployment_id, current target allocations).
pub type DeciderFactory = Arc<dyn Fn(&str, u32) -> Box<dyn AllocationDecider> + Send + Sync>;

/// Tuning for [`UtilizationDecider`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UtilizationConfig {
    /// Desired fraction of allocation time spent inferring.
    pub target_utilization: f64,
    /// Scale up once utilization exceeds `target * scale_up_headroom`.
    pub scale_up_headroom: f64,
    /// Scale down once utilization drops below `target * scale_down_threshold`.
    pub scale_down_threshold: f64,
}

impl Default for UtilizationConfig {
    fn default() -> Self {
        Self {
            target_utilization: 0.7,
            scale_up_headroom: 1.1,
            scale_down_threshold: 0.5,
        }
    }
}

/// Scales a deployment to keep its allocations at a target utilization.
#[derive(Debug)]
pub struct UtilizationDecider {
    deployment_id: String,
    config: UtilizationConfig,
    min: u32,
    max: u32,
    /// Last known inference time, reused for intervals with no successes.
    last_inference_time_secs: Option<f64>,
}

impl UtilizationDecider {
    pub fn new(deployment_id: &str, config: UtilizationConfig) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            config,
            min: 1,
            max: u32::MAX,
            last_inference_time_secs: None,
        }
    }

    /// A factory that builds a `UtilizationDecider` for every deployment.
    pub fn factory(config: UtilizationConfig) -> DeciderFactory {
        Arc::new(move |deployment_id: &str, _current: u32| -> Box<dyn AllocationDecider> {
            Box::new(UtilizationDecider::new(deployment_id, config.clone()))
        })
    }

    fn desired_allocations(&self, load: f64) -> u32 {
        let desired = (load / self.config.target_utilization).ceil().max(1.0) as u32;
        desired.clamp(self.min, self.max)
    }
}

impl AllocationDecider for UtilizationDecider {
    fn set_bounds(&mut self, min: u32, max: u32) {
        self.min = min;
        self.max = max.max(min);
    }

    fn decide(&mut self, input: DecisionInput<'_>) -> Result<Option<u32>, DecisionError> {
        if !(input.interval_secs.is_finite() && input.interval_secs > 0.0) {
            return Err(DecisionError::InvalidInput(format!(
                "interval must be positive, got {}",
                input.interval_secs
            )));
        }
        if !(self.config.target_utilization > 0.0) {
            return Err(DecisionError::Internal(format!(
                "target utilization must be positive, got {}",
                self.config.target_utilization
            )));
        }

        let current = input.current_allocations;

        // Bounds changed underneath us.
        if current < self.min {
            return Ok(Some(self.min));
        }
        if current > self.max {
            return Ok(Some(self.max));
        }

        if let Some(t) = input.stats.avg_inference_time() {
            self.last_inference_time_secs = Some(t);
        }
        let Some(inference_time) = self.last_inference_time_secs else {
            debug!(deployment = %self.deployment_id, "no inference time observed yet");
            return Ok(None);
        };

        let request_rate = input.stats.request_count() as f64 / input.interval_secs;
        let load = request_rate * inference_time;
        let utilization = if current == 0 {
            if load > 0.0 { f64::INFINITY } else { 0.0 }
        } else {
            load / current as f64
        };
        let target = self.config.target_utilization;

        if utilization > target * self.config.scale_up_headroom {
            let clamped = self.desired_allocations(load);
            if clamped > current {
                debug!(
                    deployment = %self.deployment_id,
                    from = current,
                    to = clamped,
                    utilization,
                    target,
                    "proposing scale up"
                );
                return Ok(Some(clamped));
            }
        }

        if utilization < target * self.config.scale_down_threshold && current > self.min {
            let clamped = self.desired_allocations(load);
            if clamped < current {
                debug!(
                    deployment = %self.deployment_id,
                    from = current,
                    to = clamped,
                    utilization,
                    target,
                    "proposing scale down"
                );
                return Ok(Some(clamped));
            }
        }

        Ok(None)
    }
}
