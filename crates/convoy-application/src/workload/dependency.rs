//! Dependency readiness gate
//!
//! A component rolls out only when every sibling it depends on has a live
//! Deployment with all desired replicas ready. Evaluated against the live
//! snapshot on every pass.

use std::collections::BTreeMap;

use convoy_common::crd::ComponentSpec;
use convoy_common::kube_utils::deployment_name;
use k8s_openapi::api::apps::v1::Deployment;

/// Whether a live Deployment has all of its desired replicas ready
///
/// A Deployment without status has not been observed by its controller yet
/// and is not ready.
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
        .max(status.replicas.unwrap_or(0));
    status.ready_replicas.unwrap_or(0) >= desired
}

/// Dependencies of `component` that block its rollout, in declaration order
pub fn unready_dependencies<'a>(
    app_name: &str,
    component: &'a ComponentSpec,
    live: &BTreeMap<String, Deployment>,
) -> Vec<&'a str> {
    component
        .dependencies
        .iter()
        .filter(|dep| {
            !matches!(
                live.get(&deployment_name(app_name, dep)),
                Some(d) if deployment_ready(d)
            )
        })
        .map(String::as_str)
        .collect()
}

/// Whether every dependency of `component` is ready
pub fn is_ready(
    app_name: &str,
    component: &ComponentSpec,
    live: &BTreeMap<String, Deployment>,
) -> bool {
    unready_dependencies(app_name, component, live).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};

    fn deployment(replicas: i32, ready: Option<i32>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: ready.map(|r| DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(r),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn web() -> ComponentSpec {
        ComponentSpec {
            name: "web".to_string(),
            image: "web:1".to_string(),
            dependencies: vec!["api".to_string(), "cache".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn components_without_dependencies_are_always_ready() {
        let api = ComponentSpec {
            name: "api".to_string(),
            ..Default::default()
        };
        assert!(is_ready("shop", &api, &BTreeMap::new()));
    }

    #[test]
    fn missing_dependency_deployment_blocks_rollout() {
        let live = BTreeMap::from([("shop-api".to_string(), deployment(2, Some(2)))]);
        assert_eq!(unready_dependencies("shop", &web(), &live), vec!["cache"]);
        assert!(!is_ready("shop", &web(), &live));
    }

    /// Story: the api is still rolling out (1 of 2 ready), so the frontend
    /// waits. Once both replicas report ready the frontend is released.
    #[test]
    fn story_partial_readiness_defers_until_all_replicas_ready() {
        let mut live = BTreeMap::from([
            ("shop-api".to_string(), deployment(2, Some(1))),
            ("shop-cache".to_string(), deployment(1, Some(1))),
        ]);
        assert!(!is_ready("shop", &web(), &live));

        live.insert("shop-api".to_string(), deployment(2, Some(2)));
        assert!(is_ready("shop", &web(), &live));
    }

    #[test]
    fn deployment_without_status_is_not_ready() {
        assert!(!deployment_ready(&deployment(1, None)));
        assert!(deployment_ready(&deployment(0, Some(0))));
    }
}
