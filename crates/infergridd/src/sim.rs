//! Simulated cluster — synthetic load against in-memory deployments.
//!
//! Each deployment receives a request rate that swings between `base_rps`
//! and `peak_rps` over `period_secs`. Its allocations serve at most
//! `allocations / inference_time` requests per second; the rest are
//! rejected. Counters are cumulative per node, like a real node reports.

use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use infergrid_autoscale::{BoxFuture, DeploymentClient};
use infergrid_state::{
    ClientError, ClientResult, DeploymentStats, DeploymentStatsRequest, DeploymentStatsResponse,
    NodeInferenceStats, UpdateDeploymentRequest,
};

use crate::config::SimDeploymentConfig;

/// Cumulative counters of one node. Fractions are kept so that
/// rounding never makes a counter go backwards.
#[derive(Debug, Default, Clone)]
struct NodeCounters {
    served: f64,
    rejected: f64,
    busy_secs: f64,
}

impl NodeCounters {
    fn report(&self, node_id: String) -> NodeInferenceStats {
        let inference_count = self.served.floor() as u64;
        NodeInferenceStats {
            node_id,
            inference_count: (inference_count > 0).then_some(inference_count),
            pending_count: Some(0),
            error_count: 0,
            timeout_count: 0,
            rejected_execution_count: self.rejected.floor() as u64,
            avg_inference_time_ms: (self.served > 0.0)
                .then(|| self.busy_secs / self.served * 1000.0),
        }
    }
}

struct SimDeployment {
    config: SimDeploymentConfig,
    allocations: u32,
    nodes: Vec<NodeCounters>,
    started_at: Instant,
    advanced_to: Instant,
}

impl SimDeployment {
    fn new(config: SimDeploymentConfig, now: Instant) -> Self {
        let nodes = vec![NodeCounters::default(); config.nodes as usize];
        Self {
            allocations: config.initial_allocations,
            config,
            nodes,
            started_at: now,
            advanced_to: now,
        }
    }

    fn request_rate(&self, at: Instant) -> f64 {
        let period = self.config.period_secs.max(1) as f64;
        let phase = at.saturating_duration_since(self.started_at).as_secs_f64() / period;
        let swing = (1.0 - (TAU * phase).cos()) / 2.0;
        self.config.base_rps + (self.config.peak_rps - self.config.base_rps) * swing
    }

    /// Run the load model forward to `now`.
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.advanced_to).as_secs_f64();
        if dt <= 0.0 {
            return;
        }
        let inference_secs = self.config.inference_time_ms / 1000.0;
        let capacity = self.allocations as f64 / inference_secs;
        let rate = self.request_rate(now);
        let requests = rate * dt;
        let served = requests.min(capacity * dt);
        let rejected = requests - served;

        let share = self.nodes.len().max(1) as f64;
        for node in &mut self.nodes {
            node.served += served / share;
            node.rejected += rejected / share;
            node.busy_secs += served / share * inference_secs;
        }
        self.advanced_to = now;
    }

    fn stats(&self) -> DeploymentStats {
        DeploymentStats {
            deployment_id: self.config.id.clone(),
            number_of_allocations: self.allocations,
            node_stats: self
                .nodes
                .iter()
                .enumerate()
                .map(|(i, n)| n.report(format!("node-{i}")))
                .collect(),
        }
    }
}

/// In-memory cluster serving the scaler's stats fetches and updates.
pub struct SimCluster {
    deployments: Mutex<HashMap<String, SimDeployment>>,
    fetches: AtomicU64,
    /// Fail every Nth stats fetch. Zero disables.
    fail_every: u64,
}

impl SimCluster {
    pub fn new(configs: &[SimDeploymentConfig], fail_every: u64) -> Self {
        let now = Instant::now();
        let deployments = configs
            .iter()
            .map(|c| (c.id.clone(), SimDeployment::new(c.clone(), now)))
            .collect();
        Self {
            deployments: Mutex::new(deployments),
            fetches: AtomicU64::new(0),
            fail_every,
        }
    }

    pub async fn allocations(&self, deployment_id: &str) -> Option<u32> {
        let deployments = self.deployments.lock().await;
        deployments.get(deployment_id).map(|d| d.allocations)
    }
}

impl DeploymentClient for SimCluster {
    fn get_deployment_stats(
        &self,
        request: DeploymentStatsRequest,
    ) -> BoxFuture<'_, ClientResult<DeploymentStatsResponse>> {
        Box::pin(async move {
            let n = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(ClientError::Transport(format!("injected failure on fetch {n}")));
            }

            let now = Instant::now();
            let mut deployments = self.deployments.lock().await;
            let mut stats = Vec::new();
            for id in request.ids() {
                if let Some(d) = deployments.get_mut(id) {
                    d.advance(now);
                    debug!(
                        deployment = %id,
                        allocations = d.allocations,
                        rps = d.request_rate(now),
                        "simulated load"
                    );
                    stats.push(d.stats());
                }
            }
            Ok(DeploymentStatsResponse { stats })
        })
    }

    fn update_deployment(&self, request: UpdateDeploymentRequest) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async move {
            if request.number_of_allocations == 0 {
                return Err(ClientError::Rejected(format!(
                    "{} needs at least one allocation",
                    request.deployment_id
                )));
            }
            let now = Instant::now();
            let mut deployments = self.deployments.lock().await;
            let d = deployments
                .get_mut(&request.deployment_id)
                .ok_or_else(|| ClientError::NotFound(request.deployment_id.clone()))?;
            // Settle load at the old allocation count first.
            d.advance(now);
            d.allocations = request.number_of_allocations;
            Ok(())
        })
    }
}
