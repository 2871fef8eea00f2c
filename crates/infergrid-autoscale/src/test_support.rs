//! Fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use infergrid_state::*;

use crate::client::{BoxFuture, DeploymentClient, Notifier};
use crate::decider::{AllocationDecider, DeciderFactory, DecisionInput};
use crate::error::DecisionError;
use crate::stats::StatsWindow;

pub fn assignment(id: &str, min: u32, max: u32, allocations: u32) -> DeploymentAssignment {
    DeploymentAssignment {
        deployment_id: id.to_string(),
        adaptive_allocations: Some(AdaptiveAllocationsSettings::enabled(min, max)),
        total_target_allocations: allocations,
    }
}

pub fn disabled_assignment(id: &str, allocations: u32) -> DeploymentAssignment {
    DeploymentAssignment {
        deployment_id: id.to_string(),
        adaptive_allocations: Some(AdaptiveAllocationsSettings {
            enabled: false,
            min_number_of_allocations: 1,
            max_number_of_allocations: 1,
        }),
        total_target_allocations: allocations,
    }
}

pub fn node(node_id: &str, inference_count: u64, avg_inference_time_ms: f64) -> NodeInferenceStats {
    NodeInferenceStats {
        node_id: node_id.to_string(),
        inference_count: Some(inference_count),
        pending_count: Some(0),
        error_count: 0,
        timeout_count: 0,
        rejected_execution_count: 0,
        avg_inference_time_ms: Some(avg_inference_time_ms),
    }
}

pub fn node_with_pending(
    node_id: &str,
    inference_count: u64,
    pending_count: u64,
    avg_inference_time_ms: f64,
) -> NodeInferenceStats {
    NodeInferenceStats {
        pending_count: Some(pending_count),
        ..node(node_id, inference_count, avg_inference_time_ms)
    }
}

pub fn deployment_stats(
    id: &str,
    number_of_allocations: u32,
    node_stats: Vec<NodeInferenceStats>,
) -> DeploymentStats {
    DeploymentStats {
        deployment_id: id.to_string(),
        number_of_allocations,
        node_stats,
    }
}

// ── Deciders ──────────────────────────────────────────────────────

#[derive(Default)]
struct DeciderLog {
    created: usize,
    bounds: Option<(u32, u32)>,
    proposals: VecDeque<Result<Option<u32>, String>>,
    panics: usize,
    inputs: Vec<(StatsWindow, f64, u32)>,
}

/// Deciders that replay scripted proposals and record their inputs.
#[derive(Clone, Default)]
pub struct ScriptedDeciders {
    logs: Arc<Mutex<HashMap<String, DeciderLog>>>,
}

impl ScriptedDeciders {
    pub fn factory(&self) -> DeciderFactory {
        let logs = Arc::clone(&self.logs);
        Arc::new(move |id: &str, _current: u32| -> Box<dyn AllocationDecider> {
            logs.lock().unwrap().entry(id.to_string()).or_default().created += 1;
            Box::new(ScriptedDecider {
                id: id.to_string(),
                logs: Arc::clone(&logs),
            })
        })
    }

    /// Queue the next answer for a deployment. Unscripted calls return `Ok(None)`.
    pub fn propose(&self, id: &str, proposal: Result<Option<u32>, String>) {
        self.logs
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .proposals
            .push_back(proposal);
    }

    /// Make the next decision for a deployment panic.
    pub fn panic_next(&self, id: &str) {
        self.logs.lock().unwrap().entry(id.to_string()).or_default().panics += 1;
    }

    pub fn inputs(&self, id: &str) -> Vec<(StatsWindow, f64, u32)> {
        self.logs
            .lock()
            .unwrap()
            .get(id)
            .map(|log| log.inputs.clone())
            .unwrap_or_default()
    }

    pub fn bounds(&self, id: &str) -> Option<(u32, u32)> {
        self.logs.lock().unwrap().get(id).and_then(|log| log.bounds)
    }

    pub fn created(&self, id: &str) -> usize {
        self.logs.lock().unwrap().get(id).map_or(0, |log| log.created)
    }
}

struct ScriptedDecider {
    id: String,
    logs: Arc<Mutex<HashMap<String, DeciderLog>>>,
}

impl AllocationDecider for ScriptedDecider {
    fn set_bounds(&mut self, min: u32, max: u32) {
        self.logs.lock().unwrap().entry(self.id.clone()).or_default().bounds = Some((min, max));
    }

    fn decide(&mut self, input: DecisionInput<'_>) -> Result<Option<u32>, DecisionError> {
        let mut logs = self.logs.lock().unwrap();
        let log = logs.entry(self.id.clone()).or_default();
        log.inputs
            .push((*input.stats, input.interval_secs, input.current_allocations));
        if log.panics > 0 {
            log.panics -= 1;
            drop(logs);
            panic!("scripted decider failure for {}", self.id);
        }
        match log.proposals.pop_front() {
            Some(Ok(p)) => Ok(p),
            Some(Err(msg)) => Err(DecisionError::Internal(msg)),
            None => Ok(None),
        }
    }
}

// ── Client ────────────────────────────────────────────────────────

/// Replays scripted stats responses and records every call.
///
/// An empty script answers with an empty response. With the gate armed,
/// fetches wait for [`FakeClient::release_fetch`].
#[derive(Default)]
pub struct FakeClient {
    responses: Mutex<VecDeque<ClientResult<DeploymentStatsResponse>>>,
    stats_requests: Mutex<Vec<DeploymentStatsRequest>>,
    updates: Mutex<Vec<UpdateDeploymentRequest>>,
    fetch_count: AtomicUsize,
    fail_updates: AtomicBool,
    gated: AtomicBool,
    gate: Notify,
}

impl FakeClient {
    pub fn respond(&self, stats: Vec<DeploymentStats>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(DeploymentStatsResponse { stats }));
    }

    pub fn fail_fetch(&self, error: ClientError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn gate_fetches(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release_fetch(&self) {
        self.gate.notify_one();
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn stats_requests(&self) -> Vec<DeploymentStatsRequest> {
        self.stats_requests.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<UpdateDeploymentRequest> {
        self.updates.lock().unwrap().clone()
    }
}

impl DeploymentClient for FakeClient {
    fn get_deployment_stats(
        &self,
        request: DeploymentStatsRequest,
    ) -> BoxFuture<'_, ClientResult<DeploymentStatsResponse>> {
        Box::pin(async move {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            self.stats_requests.lock().unwrap().push(request);
            if self.gated.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(DeploymentStatsResponse::default()))
        })
    }

    fn update_deployment(&self, request: UpdateDeploymentRequest) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async move {
            let id = request.deployment_id.clone();
            self.updates.lock().unwrap().push(request);
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(ClientError::Transport(format!("update of {id} failed")));
            }
            Ok(())
        })
    }
}

// ── Notifier ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    infos: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }

    fn warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}
