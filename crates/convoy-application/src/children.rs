//! Live child artifacts of one Application, indexed by name

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

/// Snapshot of the label-selected children an active pass converges
///
/// CronJobs are only ever deleted, so teardown lists them itself.
#[derive(Clone, Debug, Default)]
pub struct LiveChildren {
    pub deployments: BTreeMap<String, Deployment>,
    pub services: BTreeMap<String, Service>,
}

impl LiveChildren {
    pub fn new(deployments: Vec<Deployment>, services: Vec<Service>) -> Self {
        Self {
            deployments: index(deployments),
            services: index(services),
        }
    }

    /// Replace the Service index after Services were reconciled
    pub fn replace_services(&mut self, services: Vec<Service>) {
        self.services = index(services);
    }
}

fn index<K: ResourceExt>(items: Vec<K>) -> BTreeMap<String, K> {
    items.into_iter().map(|o| (o.name_any(), o)).collect()
}
