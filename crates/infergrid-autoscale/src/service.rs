//! Adaptive allocations scaler service — the periodic control loop.
//!
//! ```text
//! cluster_changed(snapshot) ──► reconcile registry ──► start / stop timer
//!
//! timer ─► trigger ─► claim busy flag ─┬─► fetch stats (no lock held)
//!                      (skip if held)  ├─► process_stats (under lock)
//!                                      ├─► dispatch scale commands
//!                                      └─► release busy flag (guard drop)
//! ```
//!
//! Registry mutation and timer start/stop share one lock. The cycle only
//! takes that lock for its synchronous parts, so topology changes can land
//! while a fetch is in flight. A deployment removed mid-cycle is skipped
//! when the stats come back.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use infergrid_state::{DeploymentId, DeploymentStatsRequest, TopologySnapshot, UpdateDeploymentRequest};

use crate::busy::{BusyFlag, BusyGuard};
use crate::client::{DeploymentClient, Notifier};
use crate::config::ScalerConfig;
use crate::cooldown::CooldownPolicy;
use crate::cycle::{CycleReport, ScaleCommand, ScalerState};
use crate::decider::DeciderFactory;
use crate::error::{ScalerError, ScalerResult};

/// Observable state of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    /// Timer scheduled, no cycle in flight.
    Idle,
    /// Timer scheduled, a cycle is in flight.
    Running,
}

/// Handle to the running timer task.
struct ScheduleSlot {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

struct Control {
    state: ScalerState,
    schedule: Option<ScheduleSlot>,
}

/// Keeps the allocation count of adaptive deployments matched to load.
///
/// Cheap to clone; clones share the same loop.
#[derive(Clone)]
pub struct AdaptiveAllocationsScalerService {
    config: ScalerConfig,
    client: Arc<dyn DeploymentClient>,
    notifier: Arc<dyn Notifier>,
    busy: BusyFlag,
    control: Arc<Mutex<Control>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl AdaptiveAllocationsScalerService {
    pub fn new(
        config: ScalerConfig,
        client: Arc<dyn DeploymentClient>,
        notifier: Arc<dyn Notifier>,
        decider_factory: DeciderFactory,
    ) -> Self {
        let cooldown = CooldownPolicy::new(config.scale_up_cooldown);
        Self {
            config,
            client,
            notifier,
            busy: BusyFlag::default(),
            control: Arc::new(Mutex::new(Control {
                state: ScalerState::new(decider_factory, cooldown),
                schedule: None,
            })),
            shutdown: None,
        }
    }

    /// Stop scheduling once the process-wide shutdown signal fires.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    /// Reconcile against the current topology and start the timer if any
    /// deployment is tracked. Calling it again is harmless.
    pub async fn start(&self, snapshot: &TopologySnapshot) -> ScalerResult<()> {
        let mut control = self.control.lock().await;
        self.reconcile_locked(&mut control, snapshot);
        if !control.state.registry().is_empty() {
            self.start_scheduling(&mut control)?;
        }
        Ok(())
    }

    /// Cancel the timer. A cycle already in flight runs to completion.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        stop_scheduling(&mut control);
    }

    /// Handle a cluster-state change notification.
    pub async fn cluster_changed(&self, snapshot: &TopologySnapshot) -> ScalerResult<()> {
        let mut control = self.control.lock().await;
        self.reconcile_locked(&mut control, snapshot);
        if control.state.registry().is_empty() {
            stop_scheduling(&mut control);
        } else {
            self.start_scheduling(&mut control)?;
        }
        Ok(())
    }

    pub async fn state(&self) -> LoopState {
        let control = self.control.lock().await;
        match &control.schedule {
            None => LoopState::Stopped,
            Some(slot) if slot.handle.is_finished() => LoopState::Stopped,
            Some(_) if self.busy.is_claimed() => LoopState::Running,
            Some(_) => LoopState::Idle,
        }
    }

    pub async fn tracked_deployments(&self) -> Vec<DeploymentId> {
        self.control.lock().await.state.registry().deployment_ids()
    }

    /// Run one cycle unless one is already in flight.
    ///
    /// Returns the handle of the spawned cycle, or `None` if skipped.
    pub fn trigger(&self) -> Option<JoinHandle<()>> {
        let Some(guard) = self.busy.try_claim() else {
            debug!("skipping adaptive allocations scaling, previous cycle still busy");
            return None;
        };
        let this = self.clone();
        Some(tokio::spawn(async move { this.run_cycle(guard).await }))
    }

    fn reconcile_locked(&self, control: &mut Control, snapshot: &TopologySnapshot) {
        if !self.config.enabled {
            return;
        }
        let outcome = control.state.reconcile(snapshot);
        if !outcome.is_unchanged() {
            debug!(
                added = outcome.added.len(),
                updated = outcome.updated.len(),
                removed = outcome.removed.len(),
                tracked = control.state.registry().len(),
                "reconciled adaptive allocations registry"
            );
        }
    }

    fn start_scheduling(&self, control: &mut Control) -> ScalerResult<()> {
        if control
            .schedule
            .as_ref()
            .is_some_and(|slot| !slot.handle.is_finished())
        {
            return Ok(());
        }
        if self.shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
            debug!("not scheduling adaptive allocations scaler, shutting down");
            control.schedule = None;
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|e| ScalerError::Scheduling(e.to_string()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let this = self.clone();
        let handle = runtime.spawn(async move { this.run_schedule(stop_rx).await });
        control.schedule = Some(ScheduleSlot { handle, stop_tx });

        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            "adaptive allocations scaler started"
        );
        Ok(())
    }

    /// Fixed-delay timer: trigger, then wait a full interval again.
    async fn run_schedule(self, mut stop: watch::Receiver<bool>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    self.trigger();
                }
                _ = stop.changed() => break,
                _ = shutdown_signalled(&mut shutdown) => {
                    debug!("adaptive allocations scaler timer exiting on shutdown");
                    break;
                }
            }
        }
    }

    async fn run_cycle(&self, _guard: BusyGuard) {
        let request = {
            let control = self.control.lock().await;
            DeploymentStatsRequest::for_deployments(control.state.registry().deployment_ids())
        };
        if request.ids().next().is_none() {
            debug!("no deployments tracked, nothing to scale");
            return;
        }

        let response = match self.client.get_deployment_stats(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "error in adaptive allocations scaling, stats fetch failed");
                return;
            }
        };

        let report = {
            let mut control = self.control.lock().await;
            control.state.process_stats(&response, Instant::now())
        };
        self.report_failures(&report);
        self.dispatch(report.commands).await;
    }

    fn report_failures(&self, report: &CycleReport) {
        for (deployment_id, e) in &report.failures {
            warn!(
                deployment = %deployment_id,
                error = %e,
                "adaptive allocations scaler: decision failed"
            );
            self.notifier.warning(&format!(
                "adaptive allocations scaler: processing [{deployment_id}] failed: {e}"
            ));
        }
    }

    /// Issue all scale commands concurrently and wait for them to finish.
    async fn dispatch(&self, commands: Vec<ScaleCommand>) {
        let mut tasks = JoinSet::new();
        for command in commands {
            let client = Arc::clone(&self.client);
            let notifier = Arc::clone(&self.notifier);
            tasks.spawn(async move {
                let ScaleCommand {
                    deployment_id,
                    from,
                    to,
                } = command;
                let request = UpdateDeploymentRequest {
                    deployment_id: deployment_id.clone(),
                    number_of_allocations: to,
                };
                match client.update_deployment(request).await {
                    Ok(()) => {
                        info!(
                            deployment = %deployment_id,
                            from,
                            to,
                            "adaptive allocations scaler: scaled deployment"
                        );
                        notifier.info(&format!(
                            "adaptive allocations scaler: scaled [{deployment_id}] to [{to}] allocations."
                        ));
                    }
                    Err(e) => {
                        warn!(
                            deployment = %deployment_id,
                            from,
                            to,
                            error = %e,
                            "adaptive allocations scaler: scaling failed"
                        );
                        notifier.warning(&format!(
                            "adaptive allocations scaler: scaling [{deployment_id}] to [{to}] allocations failed."
                        ));
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "scale command task failed");
            }
        }
    }
}

fn stop_scheduling(control: &mut Control) {
    if let Some(slot) = control.schedule.take() {
        let _ = slot.stop_tx.send(true);
        slot.handle.abort();
        info!("adaptive allocations scaler stopped");
    }
}

/// Resolves once the shutdown signal reads true. Never resolves without one.
async fn shutdown_signalled(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        let signalled = rx.wait_for(|down| *down).await.is_ok();
        if signalled {
            return;
        }
    }
    std::future::pending::<()>().await
}
