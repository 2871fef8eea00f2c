//! Deployment registry — the set of deployments under adaptive allocation.
//!
//! Entries are created, updated and removed only by reconciling against a
//! topology snapshot. Each entry owns its decider and the last stats
//! window seen from every node serving the deployment.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use infergrid_state::{DeploymentId, NodeId, TopologySnapshot};

use crate::decider::{AllocationDecider, DeciderFactory, DecisionInput};
use crate::error::DecisionError;
use crate::stats::StatsWindow;

/// Scaling state for one tracked deployment.
pub struct DeploymentScalingState {
    deployment_id: DeploymentId,
    min_allocations: u32,
    max_allocations: u32,
    decider: Box<dyn AllocationDecider>,
    /// Baseline per node for the next delta.
    last_stats_by_node: HashMap<NodeId, StatsWindow>,
}

impl DeploymentScalingState {
    fn new(
        deployment_id: &str,
        min: u32,
        max: u32,
        mut decider: Box<dyn AllocationDecider>,
    ) -> Self {
        decider.set_bounds(min, max);
        Self {
            deployment_id: deployment_id.to_string(),
            min_allocations: min,
            max_allocations: max,
            decider,
            last_stats_by_node: HashMap::new(),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn min_allocations(&self) -> u32 {
        self.min_allocations
    }

    pub fn max_allocations(&self) -> u32 {
        self.max_allocations
    }

    /// Returns true if the bounds changed.
    fn set_bounds(&mut self, min: u32, max: u32) -> bool {
        if self.min_allocations == min && self.max_allocations == max {
            return false;
        }
        self.min_allocations = min;
        self.max_allocations = max;
        self.decider.set_bounds(min, max);
        true
    }

    /// Record a node's cumulative window and return its delta since the
    /// previous one.
    ///
    /// The first window from a node only establishes its baseline. A window
    /// whose success or failure count went backwards replaces the baseline
    /// and yields no delta. A shrinking queue is not a reset.
    pub fn observe_node(&mut self, node_id: &str, window: StatsWindow) -> Option<StatsWindow> {
        let previous = self.last_stats_by_node.insert(node_id.to_string(), window)?;
        let delta = StatsWindow::delta(&previous, &window);
        if delta.is_none() {
            debug!(
                deployment = %self.deployment_id,
                node = %node_id,
                "inference counters went backwards, resetting baseline"
            );
        }
        delta
    }

    pub fn baseline(&self, node_id: &str) -> Option<&StatsWindow> {
        self.last_stats_by_node.get(node_id)
    }

    pub fn node_count(&self) -> usize {
        self.last_stats_by_node.len()
    }

    pub fn decide(&mut self, input: DecisionInput<'_>) -> Result<Option<u32>, DecisionError> {
        self.decider.decide(input)
    }

    /// Clamp a proposal into the current bounds.
    pub fn clamp(&self, allocations: u32) -> u32 {
        allocations.clamp(self.min_allocations, self.max_allocations)
    }
}

/// What a reconcile changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: Vec<DeploymentId>,
    pub updated: Vec<DeploymentId>,
    pub removed: Vec<DeploymentId>,
}

impl ReconcileOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Deployment id → scaling state.
pub struct DeploymentRegistry {
    deployments: HashMap<DeploymentId, DeploymentScalingState>,
    decider_factory: DeciderFactory,
}

impl DeploymentRegistry {
    pub fn new(decider_factory: DeciderFactory) -> Self {
        Self {
            deployments: HashMap::new(),
            decider_factory,
        }
    }

    /// Bring the registry in line with a topology snapshot.
    ///
    /// Deployments with adaptive allocations enabled are added or have
    /// their bounds updated in place; stats history and decider state are
    /// kept on update. Every other tracked deployment is removed together
    /// with its history. Applying the same snapshot twice changes nothing.
    pub fn reconcile(&mut self, snapshot: &TopologySnapshot) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for assignment in &snapshot.assignments {
            let Some(settings) = assignment
                .adaptive_allocations
                .as_ref()
                .filter(|s| s.enabled)
            else {
                continue;
            };

            let id = &assignment.deployment_id;
            let mut min = settings.min_number_of_allocations;
            if min == 0 {
                warn!(deployment = %id, "min allocations is 0, using 1");
                min = 1;
            }
            let mut max = settings.max_number_of_allocations;
            if max < min {
                warn!(
                    deployment = %id,
                    min,
                    max,
                    "max allocations below min, using min as max"
                );
                max = min;
            }

            match self.deployments.get_mut(id) {
                Some(state) => {
                    if state.set_bounds(min, max) {
                        debug!(deployment = %id, min, max, "updated allocation bounds");
                        outcome.updated.push(id.clone());
                    }
                }
                None => {
                    let decider =
                        (self.decider_factory)(id, assignment.total_target_allocations);
                    self.deployments.insert(
                        id.clone(),
                        DeploymentScalingState::new(id, min, max, decider),
                    );
                    info!(deployment = %id, min, max, "tracking deployment for adaptive allocations");
                    outcome.added.push(id.clone());
                }
            }
        }

        let stale: Vec<DeploymentId> = self
            .deployments
            .keys()
            .filter(|id| {
                !snapshot
                    .get(id)
                    .is_some_and(|a| a.adaptive_allocations_enabled())
            })
            .cloned()
            .collect();
        for id in stale {
            self.deployments.remove(&id);
            info!(deployment = %id, "stopped tracking deployment for adaptive allocations");
            outcome.removed.push(id);
        }

        outcome
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn contains(&self, deployment_id: &str) -> bool {
        self.deployments.contains_key(deployment_id)
    }

    /// Tracked deployment ids, sorted.
    pub fn deployment_ids(&self) -> Vec<DeploymentId> {
        let mut ids: Vec<DeploymentId> = self.deployments.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, deployment_id: &str) -> Option<&DeploymentScalingState> {
        self.deployments.get(deployment_id)
    }

    pub fn get_mut(&mut self, deployment_id: &str) -> Option<&mut DeploymentScalingState> {
        self.deployments.get_mut(deployment_id)
    }
}
