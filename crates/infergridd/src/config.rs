//! infergridd.toml configuration parser.

use std::path::Path;

use serde::Deserialize;

use infergrid_autoscale::{ScalerConfig, UtilizationConfig};
use infergrid_state::{AdaptiveAllocationsSettings, DeploymentAssignment, TopologySnapshot};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub scaler: ScalerConfig,
    #[serde(default)]
    pub decider: UtilizationConfig,
    #[serde(default, rename = "deployment")]
    pub deployments: Vec<SimDeploymentConfig>,
}

/// A simulated deployment and the load it receives.
#[derive(Debug, Clone, Deserialize)]
pub struct SimDeploymentConfig {
    pub id: String,
    #[serde(default = "default_min")]
    pub min_allocations: u32,
    #[serde(default = "default_max")]
    pub max_allocations: u32,
    #[serde(default = "default_min")]
    pub initial_allocations: u32,
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    /// Request rate at the quietest point of the cycle.
    pub base_rps: f64,
    /// Request rate at the busiest point of the cycle.
    pub peak_rps: f64,
    /// Length of one quiet → busy → quiet cycle.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    pub inference_time_ms: f64,
}

fn default_min() -> u32 {
    1
}

fn default_max() -> u32 {
    8
}

fn default_nodes() -> u32 {
    2
}

fn default_period_secs() -> u64 {
    600
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.scaler.validate()?;
        for d in &config.deployments {
            anyhow::ensure!(d.nodes > 0, "deployment {} needs at least one node", d.id);
            anyhow::ensure!(
                d.inference_time_ms > 0.0,
                "deployment {} needs a positive inference time",
                d.id
            );
        }
        Ok(config)
    }

    /// A two-deployment setup used when no config file is given.
    pub fn demo() -> Self {
        DaemonConfig {
            scaler: ScalerConfig::default(),
            decider: UtilizationConfig::default(),
            deployments: vec![
                SimDeploymentConfig {
                    id: "elser-small".to_string(),
                    min_allocations: 1,
                    max_allocations: 8,
                    initial_allocations: 1,
                    nodes: 2,
                    base_rps: 2.0,
                    peak_rps: 120.0,
                    period_secs: 600,
                    inference_time_ms: 40.0,
                },
                SimDeploymentConfig {
                    id: "e5-multilingual".to_string(),
                    min_allocations: 2,
                    max_allocations: 4,
                    initial_allocations: 2,
                    nodes: 1,
                    base_rps: 10.0,
                    peak_rps: 30.0,
                    period_secs: 300,
                    inference_time_ms: 25.0,
                },
            ],
        }
    }

    /// The topology the simulated cluster starts with.
    pub fn topology(&self) -> TopologySnapshot {
        TopologySnapshot::new(
            self.deployments
                .iter()
                .map(|d| DeploymentAssignment {
                    deployment_id: d.id.clone(),
                    adaptive_allocations: Some(AdaptiveAllocationsSettings::enabled(
                        d.min_allocations,
                        d.max_allocations,
                    )),
                    total_target_allocations: d.initial_allocations,
                })
                .collect(),
        )
    }
}
