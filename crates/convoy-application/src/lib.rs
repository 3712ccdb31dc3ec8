//! Application reconciliation for convoy
//!
//! - **Workload**: env resolution, config mounts, volume provisioning,
//!   affinity, plugins and pod template synthesis
//! - **Driver**: one active pass over every component, dependency gated
//! - **Controller**: finalizer lifecycle, status and the kube client seam

pub mod children;
pub mod controller;
pub mod driver;
pub mod error;
pub mod workload;

#[cfg(test)]
mod testing;

pub use controller::{
    error_policy, reconcile, ApplicationContext, ApplicationKubeClient, ApplicationKubeClientImpl,
    ReconcilerConfig,
};
pub use error::CompilationError;
