//! One scaling cycle's bookkeeping: stats in, scale commands out.
//!
//! [`ScalerState`] is everything the control loop mutates under its lock:
//! the registry, the cooldown history and the timestamp of the last
//! successful stats fetch. [`ScalerState::process_stats`] is synchronous
//! and never awaits; the caller performs I/O before and after.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tokio::time::Instant;
use tracing::debug;

use infergrid_state::{DeploymentId, DeploymentStatsResponse, TopologySnapshot};

use crate::cooldown::CooldownPolicy;
use crate::decider::{DeciderFactory, DecisionInput};
use crate::error::DecisionError;
use crate::registry::{DeploymentRegistry, DeploymentScalingState, ReconcileOutcome};
use crate::stats::StatsWindow;

/// A scale action decided during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleCommand {
    pub deployment_id: DeploymentId,
    pub from: u32,
    pub to: u32,
}

impl ScaleCommand {
    pub fn is_scale_up(&self) -> bool {
        self.to > self.from
    }
}

/// Outcome of processing one stats response.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// False for the first successful fetch, which only records baselines.
    pub had_interval: bool,
    pub commands: Vec<ScaleCommand>,
    /// Scale-downs held back by the cooldown.
    pub suppressed: Vec<DeploymentId>,
    pub failures: Vec<(DeploymentId, DecisionError)>,
}

/// Scaler state guarded by the control loop's lock.
pub struct ScalerState {
    pub(crate) registry: DeploymentRegistry,
    pub(crate) cooldown: CooldownPolicy,
    last_stats_at: Option<Instant>,
}

impl ScalerState {
    pub fn new(decider_factory: DeciderFactory, cooldown: CooldownPolicy) -> Self {
        Self {
            registry: DeploymentRegistry::new(decider_factory),
            cooldown,
            last_stats_at: None,
        }
    }

    pub fn registry(&self) -> &DeploymentRegistry {
        &self.registry
    }

    pub fn cooldown(&self) -> &CooldownPolicy {
        &self.cooldown
    }

    /// Reconcile the registry and drop cooldown history of removed deployments.
    pub fn reconcile(&mut self, snapshot: &TopologySnapshot) -> ReconcileOutcome {
        let outcome = self.registry.reconcile(snapshot);
        for id in &outcome.removed {
            self.cooldown.forget(id);
        }
        outcome
    }

    /// Turn a stats response into scale commands.
    ///
    /// Baselines are updated for every node of every tracked deployment.
    /// Decisions need an interval, so the first call makes none. A decider
    /// that errors or panics fails only its own deployment, and cooldowns
    /// are recorded only once every deployment has been decided.
    pub fn process_stats(&mut self, response: &DeploymentStatsResponse, now: Instant) -> CycleReport {
        let interval_secs = self
            .last_stats_at
            .map(|last| now.saturating_duration_since(last).as_secs_f64());
        self.last_stats_at = Some(now);

        let mut recent: HashMap<&str, StatsWindow> = HashMap::new();
        let mut allocations: HashMap<&str, u32> = HashMap::new();

        for deployment in &response.stats {
            let id = deployment.deployment_id.as_str();
            let Some(state) = self.registry.get_mut(id) else {
                debug!(deployment = %id, "ignoring stats for untracked deployment");
                continue;
            };
            allocations.insert(id, deployment.number_of_allocations);

            for node in &deployment.node_stats {
                let window = StatsWindow::from(node);
                if let Some(delta) = state.observe_node(&node.node_id, window) {
                    recent
                        .entry(id)
                        .and_modify(|total| *total += delta)
                        .or_insert(delta);
                }
            }
        }

        let mut report = CycleReport::default();
        let Some(interval_secs) = interval_secs else {
            debug!("first stats sample recorded, waiting for the next one");
            return report;
        };
        report.had_interval = true;

        for (id, stats) in recent {
            let (Some(state), Some(&current)) = (self.registry.get_mut(id), allocations.get(id))
            else {
                continue;
            };

            let input = DecisionInput {
                stats: &stats,
                interval_secs,
                current_allocations: current,
            };
            let proposal = match decide_contained(state, input) {
                Ok(Some(n)) => n,
                Ok(None) => continue,
                Err(e) => {
                    report.failures.push((id.to_string(), e));
                    continue;
                }
            };

            let target = state.clamp(proposal);
            if target != proposal {
                debug!(
                    deployment = %id,
                    proposal,
                    target,
                    "clamped proposal to allocation bounds"
                );
            }
            if target == current {
                continue;
            }

            if target < current && !self.cooldown.can_scale_down(id, now) {
                debug!(
                    deployment = %id,
                    from = current,
                    to = target,
                    "adaptive allocations scaler: skipping scaling down because of recent scale up"
                );
                report.suppressed.push(id.to_string());
                continue;
            }
            report.commands.push(ScaleCommand {
                deployment_id: id.to_string(),
                from: current,
                to: target,
            });
        }

        for command in report.commands.iter().filter(|c| c.is_scale_up()) {
            self.cooldown.record_scale_up(&command.deployment_id, now);
        }

        report
    }
}

/// Run a decider, turning a panic into a [`DecisionError::Internal`].
fn decide_contained(
    state: &mut DeploymentScalingState,
    input: DecisionInput<'_>,
) -> Result<Option<u32>, DecisionError> {
    panic::catch_unwind(AssertUnwindSafe(|| state.decide(input))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(DecisionError::Internal(format!("decider panicked: {message}")))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{
        assignment, deployment_stats, node, node_with_pending, ScriptedDeciders,
    };

    fn scaler_state(deciders: &ScriptedDeciders, ids: &[&str]) -> ScalerState {
        let mut state = ScalerState::new(deciders.factory(), CooldownPolicy::default());
        let assignments = ids.iter().map(|id| assignment(id, 1, 4, 1)).collect();
        state.reconcile(&TopologySnapshot::new(assignments));
        state
    }

    fn response(stats: Vec<infergrid_state::DeploymentStats>) -> DeploymentStatsResponse {
        DeploymentStatsResponse { stats }
    }

    #[test]
    fn first_sample_only_records_baselines() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);

        let report = state.process_stats(
            &response(vec![deployment_stats("svc1", 1, vec![node("n1", 100, 20.0)])]),
            Instant::now(),
        );

        assert!(!report.had_interval);
        assert!(report.commands.is_empty());
        assert!(deciders.inputs("svc1").is_empty());
        let baseline = state.registry().get("svc1").unwrap().baseline("n1").unwrap();
        assert_eq!(baseline.success_count, 100);
    }

    #[test]
    fn deltas_from_all_nodes_are_combined() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);
        let t0 = Instant::now();

        state.process_stats(
            &response(vec![deployment_stats(
                "svc1",
                2,
                vec![node("n1", 100, 10.0), node("n2", 50, 10.0)],
            )]),
            t0,
        );
        state.process_stats(
            &response(vec![deployment_stats(
                "svc1",
                2,
                vec![node("n1", 130, 10.0), node("n2", 60, 10.0)],
            )]),
            t0 + Duration::from_secs(5),
        );

        let inputs = deciders.inputs("svc1");
        assert_eq!(inputs.len(), 1);
        let (stats, interval, current) = inputs[0];
        assert_eq!(stats.success_count, 40);
        assert_eq!(interval, 5.0);
        assert_eq!(current, 2);
    }

    #[test]
    fn new_node_contributes_from_its_second_sample() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);
        let t0 = Instant::now();

        state.process_stats(
            &response(vec![deployment_stats("svc1", 1, vec![node("n1", 100, 10.0)])]),
            t0,
        );
        state.process_stats(
            &response(vec![deployment_stats(
                "svc1",
                2,
                vec![node("n1", 110, 10.0), node("n2", 500, 10.0)],
            )]),
            t0 + Duration::from_secs(10),
        );

        assert_eq!(deciders.inputs("svc1")[0].0.success_count, 10);
    }

    #[test]
    fn untracked_deployments_are_ignored() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);
        let t0 = Instant::now();

        for (i, count) in [100, 150].into_iter().enumerate() {
            state.process_stats(
                &response(vec![deployment_stats("gone", 1, vec![node("n1", count, 10.0)])]),
                t0 + Duration::from_secs(10 * i as u64),
            );
        }

        assert!(!state.registry().contains("gone"));
        assert!(deciders.inputs("gone").is_empty());
    }

    #[test]
    fn proposals_are_clamped_to_bounds() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);
        deciders.propose("svc1", Ok(Some(9)));
        let t0 = Instant::now();

        state.process_stats(
            &response(vec![deployment_stats("svc1", 1, vec![node("n1", 100, 10.0)])]),
            t0,
        );
        let report = state.process_stats(
            &response(vec![deployment_stats("svc1", 1, vec![node("n1", 200, 10.0)])]),
            t0 + Duration::from_secs(10),
        );

        assert_eq!(
            report.commands,
            vec![ScaleCommand {
                deployment_id: "svc1".to_string(),
                from: 1,
                to: 4,
            }]
        );
    }

    #[test]
    fn proposal_equal_to_current_is_dropped() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);
        deciders.propose("svc1", Ok(Some(2)));
        let t0 = Instant::now();

        state.process_stats(
            &response(vec![deployment_stats("svc1", 2, vec![node("n1", 100, 10.0)])]),
            t0,
        );
        let report = state.process_stats(
            &response(vec![deployment_stats("svc1", 2, vec![node("n1", 200, 10.0)])]),
            t0 + Duration::from_secs(10),
        );

        assert!(report.commands.is_empty());
        assert!(state.cooldown().last_scale_up("svc1").is_none());
    }

    #[test]
    fn decision_failure_is_isolated() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1", "svc2"]);
        deciders.propose("svc1", Err("boom".to_string()));
        deciders.propose("svc2", Ok(Some(3)));
        let t0 = Instant::now();

        let sample = |count| {
            response(vec![
                deployment_stats("svc1", 1, vec![node("n1", count, 10.0)]),
                deployment_stats("svc2", 1, vec![node("n1", count, 10.0)]),
            ])
        };
        state.process_stats(&sample(100), t0);
        let report = state.process_stats(&sample(200), t0 + Duration::from_secs(10));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "svc1");
        assert_eq!(report.commands.len(), 1);
        assert_eq!(report.commands[0].deployment_id, "svc2");
    }

    #[test]
    fn decider_panic_is_isolated() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1", "svc2", "svc3"]);
        deciders.panic_next("svc2");
        deciders.propose("svc1", Ok(Some(2)));
        deciders.propose("svc3", Ok(Some(3)));
        let t0 = Instant::now();

        let sample = |count| {
            response(vec![
                deployment_stats("svc1", 1, vec![node("n1", count, 10.0)]),
                deployment_stats("svc2", 1, vec![node("n1", count, 10.0)]),
                deployment_stats("svc3", 1, vec![node("n1", count, 10.0)]),
            ])
        };
        state.process_stats(&sample(100), t0);
        let report = state.process_stats(&sample(200), t0 + Duration::from_secs(10));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "svc2");
        assert!(matches!(report.failures[0].1, DecisionError::Internal(_)));
        let mut scaled: Vec<&str> = report
            .commands
            .iter()
            .map(|c| c.deployment_id.as_str())
            .collect();
        scaled.sort();
        assert_eq!(scaled, vec!["svc1", "svc3"]);
        assert!(state.cooldown().last_scale_up("svc1").is_some());
        assert!(state.cooldown().last_scale_up("svc2").is_none());
    }

    #[test]
    fn draining_queue_still_reaches_decider() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);
        let t0 = Instant::now();

        state.process_stats(
            &response(vec![deployment_stats(
                "svc1",
                1,
                vec![node_with_pending("n1", 100, 5, 20.0)],
            )]),
            t0,
        );
        state.process_stats(
            &response(vec![deployment_stats(
                "svc1",
                1,
                vec![node_with_pending("n1", 150, 0, 20.0)],
            )]),
            t0 + Duration::from_secs(10),
        );

        let inputs = deciders.inputs("svc1");
        assert_eq!(inputs.len(), 1);
        let (stats, interval, _) = inputs[0];
        assert_eq!(stats.success_count, 50);
        assert_eq!(stats.pending_count, -5);
        assert_eq!(stats.request_count() as f64 / interval, 4.5);
    }

    #[test]
    fn scale_up_starts_cooldown_for_scale_down() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);
        let t0 = Instant::now();
        let sample = |count, allocations| {
            response(vec![deployment_stats("svc1", allocations, vec![node("n1", count, 10.0)])])
        };

        state.process_stats(&sample(100, 1), t0);

        deciders.propose("svc1", Ok(Some(2)));
        let up = state.process_stats(&sample(200, 1), t0 + Duration::from_secs(10));
        assert_eq!(up.commands.len(), 1);
        assert!(up.commands[0].is_scale_up());
        assert_eq!(
            state.cooldown().last_scale_up("svc1"),
            Some(t0 + Duration::from_secs(10))
        );

        deciders.propose("svc1", Ok(Some(1)));
        let held = state.process_stats(&sample(210, 2), t0 + Duration::from_secs(20));
        assert!(held.commands.is_empty());
        assert_eq!(held.suppressed, vec!["svc1"]);

        deciders.propose("svc1", Ok(Some(1)));
        let down = state.process_stats(&sample(220, 2), t0 + Duration::from_secs(310));
        assert_eq!(down.commands.len(), 1);
        assert_eq!(down.commands[0].to, 1);
    }

    #[test]
    fn removal_forgets_cooldown() {
        let deciders = ScriptedDeciders::default();
        let mut state = scaler_state(&deciders, &["svc1"]);
        state.cooldown.record_scale_up("svc1", Instant::now());

        let outcome = state.reconcile(&TopologySnapshot::default());
        assert_eq!(outcome.removed, vec!["svc1"]);
        assert!(state.cooldown().last_scale_up("svc1").is_none());
    }
}
