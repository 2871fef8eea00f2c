//! infergrid-state — the types exchanged with the cluster.
//!
//! Everything the adaptive allocations scaler reads from or writes to
//! the outside world lives here:
//!
//! ```text
//! cluster state ──► TopologySnapshot ──► registry reconcile
//! stats fetch   ──► DeploymentStatsResponse ──► interval deltas
//! scale command ◄── UpdateDeploymentRequest
//! ```
//!
//! All types are serde-serializable so a transport can map them onto
//! its own wire format without an intermediate layer.

pub mod error;
pub mod types;

pub use error::{ClientError, ClientResult};
pub use types::*;
