//! infergrid-autoscale — adaptive allocations for model deployments.
//!
//! Periodically samples per-node inference counters, turns them into
//! interval deltas, asks a per-deployment decider for a new allocation
//! count, and issues scale commands. A scale-up holds back scale-downs
//! of the same deployment for a cooldown window to prevent thrashing.
//!
//! # Architecture
//!
//! ```text
//! AdaptiveAllocationsScalerService
//!   ├── cluster_changed() ← topology snapshots, starts/stops the timer
//!   ├── trigger()         ← timer, at most one cycle in flight
//!   └── ScalerState (one lock)
//!       ├── DeploymentRegistry
//!       │   └── DeploymentScalingState (bounds, decider, node baselines)
//!       └── CooldownPolicy (last scale-up per deployment)
//! ```

pub mod busy;
pub mod client;
pub mod config;
pub mod cooldown;
pub mod cycle;
pub mod decider;
pub mod error;
pub mod registry;
pub mod service;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use client::{BoxFuture, DeploymentClient, Notifier, TracingNotifier};
pub use config::ScalerConfig;
pub use cooldown::CooldownPolicy;
pub use cycle::{CycleReport, ScaleCommand, ScalerState};
pub use decider::{
    AllocationDecider, DeciderFactory, DecisionInput, UtilizationConfig, UtilizationDecider,
};
pub use error::{DecisionError, ScalerError, ScalerResult};
pub use registry::{DeploymentRegistry, DeploymentScalingState, ReconcileOutcome};
pub use service::{AdaptiveAllocationsScalerService, LoopState};
pub use stats::StatsWindow;
