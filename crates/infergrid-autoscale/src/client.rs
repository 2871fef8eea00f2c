//! Collaborators the scaler talks to.
//!
//! The transport behind [`DeploymentClient`] and the audit sink behind
//! [`Notifier`] are supplied by the embedding process.

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use infergrid_state::{
    ClientResult, DeploymentStatsRequest, DeploymentStatsResponse, UpdateDeploymentRequest,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fetches deployment stats and issues allocation updates.
pub trait DeploymentClient: Send + Sync {
    /// Fetch per-node stats for every deployment named in the request.
    fn get_deployment_stats(
        &self,
        request: DeploymentStatsRequest,
    ) -> BoxFuture<'_, ClientResult<DeploymentStatsResponse>>;

    /// Change the number of allocations of a deployment.
    fn update_deployment(&self, request: UpdateDeploymentRequest) -> BoxFuture<'_, ClientResult<()>>;
}

/// Audit sink for scale actions.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
}

/// Writes notifications to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        info!(target: "audit", "{message}");
    }

    fn warning(&self, message: &str) {
        warn!(target: "audit", "{message}");
    }
}
