//! Domain types for the InferGrid cluster interfaces.
//!
//! These types describe what the adaptive allocations scaler consumes
//! (topology snapshots, per-node inference stats) and what it produces
//! (update commands). All types are serializable to/from JSON.

use serde::{Deserialize, Serialize};

/// Unique identifier for a model deployment.
pub type DeploymentId = String;

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

// ── Topology ──────────────────────────────────────────────────────

/// Adaptive allocation settings attached to a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdaptiveAllocationsSettings {
    pub enabled: bool,
    /// Lower bound for the allocation count.
    pub min_number_of_allocations: u32,
    /// Upper bound for the allocation count.
    pub max_number_of_allocations: u32,
}

impl AdaptiveAllocationsSettings {
    /// Enabled settings with the given bounds.
    pub fn enabled(min: u32, max: u32) -> Self {
        Self {
            enabled: true,
            min_number_of_allocations: min,
            max_number_of_allocations: max,
        }
    }
}

/// One deployment as reported by the cluster topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentAssignment {
    pub deployment_id: DeploymentId,
    /// `None` when the deployment was created without adaptive allocations.
    #[serde(default)]
    pub adaptive_allocations: Option<AdaptiveAllocationsSettings>,
    /// Sum of target allocations across all nodes.
    pub total_target_allocations: u32,
}

impl DeploymentAssignment {
    /// Whether this deployment should be tracked by the scaler.
    pub fn adaptive_allocations_enabled(&self) -> bool {
        self.adaptive_allocations
            .as_ref()
            .is_some_and(|settings| settings.enabled)
    }
}

/// The set of deployments known to the cluster at one point in time.
///
/// Delivered with every cluster-state change notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub assignments: Vec<DeploymentAssignment>,
}

impl TopologySnapshot {
    pub fn new(assignments: Vec<DeploymentAssignment>) -> Self {
        Self { assignments }
    }

    /// Look up a deployment by id.
    pub fn get(&self, deployment_id: &str) -> Option<&DeploymentAssignment> {
        self.assignments
            .iter()
            .find(|a| a.deployment_id == deployment_id)
    }
}

// ── Deployment stats ──────────────────────────────────────────────

/// Request for the serving stats of a set of deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentStatsRequest {
    /// Comma-separated deployment ids.
    pub deployment_ids: String,
}

impl DeploymentStatsRequest {
    /// Build a request covering every given deployment.
    pub fn for_deployments<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self {
            deployment_ids: ids.join(","),
        }
    }

    /// The individual deployment ids in this request.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.deployment_ids.split(',').filter(|s| !s.is_empty())
    }
}

/// Cumulative inference counters for one deployment on one node.
///
/// Counters are cumulative since the node's process started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInferenceStats {
    pub node_id: NodeId,
    /// Successful inferences. Absent before the first inference.
    #[serde(default)]
    pub inference_count: Option<u64>,
    #[serde(default)]
    pub pending_count: Option<u64>,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub timeout_count: u64,
    #[serde(default)]
    pub rejected_execution_count: u64,
    /// Average inference time in milliseconds. Absent before the first inference.
    #[serde(default)]
    pub avg_inference_time_ms: Option<f64>,
}

impl NodeInferenceStats {
    /// Stats for a node that has not served anything yet.
    pub fn idle(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            inference_count: None,
            pending_count: None,
            error_count: 0,
            timeout_count: 0,
            rejected_execution_count: 0,
            avg_inference_time_ms: None,
        }
    }
}

/// Stats for one deployment across all of its nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentStats {
    pub deployment_id: DeploymentId,
    /// Current number of allocations for the deployment.
    pub number_of_allocations: u32,
    #[serde(default)]
    pub node_stats: Vec<NodeInferenceStats>,
}

/// Response to a [`DeploymentStatsRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeploymentStatsResponse {
    pub stats: Vec<DeploymentStats>,
}

// ── Update command ────────────────────────────────────────────────

/// Command to change the allocation count of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateDeploymentRequest {
    pub deployment_id: DeploymentId,
    pub number_of_allocations: u32,
}
