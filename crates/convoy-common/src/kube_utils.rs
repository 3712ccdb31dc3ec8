//! Naming, labeling and ownership helpers for Application children
//!
//! Every generated artifact carries the same two labels and an owner
//! reference back to its Application. List calls select on the
//! application label, so these helpers are the single source of truth
//! for how children are found again.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::Application;
use crate::{Error, Result};

/// Label key holding the owning Application's name
pub const APPLICATION_LABEL: &str = "application";

/// Label key holding the component name
pub const COMPONENT_LABEL: &str = "component";

/// Labels identifying one component's artifacts
pub fn component_labels(app: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APPLICATION_LABEL.to_string(), app.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
    ])
}

/// Label selector matching every artifact of an Application
pub fn application_selector(app: &str) -> String {
    format!("{}={}", APPLICATION_LABEL, app)
}

/// Deployment name for a component
pub fn deployment_name(app: &str, component: &str) -> String {
    format!("{}-{}", app, component)
}

/// Service name for a component
///
/// Prefixed so component names starting with a digit still form a valid
/// DNS-1035 label.
pub fn service_name(app: &str, component: &str) -> String {
    format!("svc-{}-{}", app, component)
}

/// Stable claim name for a persistent volume without an explicit name
pub fn claim_name(component: &str, volume_path: &str) -> String {
    format!(
        "{}-{}",
        component,
        deterministic_hash(&format!("{}:{}", component, volume_path))
    )
}

/// Pod volume name for a config mount directory
pub fn config_volume_name(mount_path: &str) -> String {
    format!("configs-{}", deterministic_hash(mount_path))
}

/// Controller owner reference pointing at the Application
///
/// Children are garbage collected by the platform once the Application is
/// gone, independent of the finalizer teardown.
pub fn owner_reference(app: &Application) -> Result<OwnerReference> {
    let uid = app
        .uid()
        .ok_or_else(|| Error::validation_for(app.name_any(), "application has no uid"))?;
    Ok(OwnerReference {
        api_version: Application::api_version(&()).to_string(),
        kind: Application::kind(&()).to_string(),
        name: app.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Compute a deterministic hash of a string, as 16 hex chars.
///
/// SHA-256 truncated to 8 bytes. Used for derived resource names that must
/// stay stable across reconciliations.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}
