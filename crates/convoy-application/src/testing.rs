//! Test fixtures and an in-memory cluster for multi-pass scenarios

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use convoy_common::crd::{
    Application, ApplicationSpec, ApplicationStatus, ComponentSpec, Port, Volume, VolumeType,
};
use convoy_common::files::encode_file_path;
use convoy_common::kube_utils::{component_labels, deployment_name, APPLICATION_LABEL};
use convoy_common::{Error, DEFAULT_FILES_CONFIG_MAP};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::controller::ApplicationKubeClient;

// =============================================================================
// Fixtures
// =============================================================================

/// Application "shop" in namespace "shop"
pub fn app_with(components: Vec<ComponentSpec>) -> Application {
    let mut app = Application::new(
        "shop",
        ApplicationSpec {
            components,
            shared_env: vec![],
            image_pull_secret_name: None,
            is_active: true,
        },
    );
    app.metadata.namespace = Some("shop".to_string());
    app.metadata.uid = Some("6f1c2a8e-shop".to_string());
    app.metadata.generation = Some(1);
    app
}

pub fn component(name: &str) -> ComponentSpec {
    ComponentSpec {
        name: name.to_string(),
        image: "nginx:1.27".to_string(),
        ..Default::default()
    }
}

pub fn port(name: &str, container_port: i32) -> Port {
    Port {
        name: name.to_string(),
        container_port,
        ..Default::default()
    }
}

/// 1Gi volume of the given type
pub fn volume(path: &str, type_: VolumeType) -> Volume {
    Volume {
        path: path.to_string(),
        type_,
        size: Some(Quantity("1Gi".to_string())),
        storage_class_name: None,
        persistent_volume_claim_name: None,
    }
}

fn server_error() -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn conflict() -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "the object has been modified".to_string(),
        reason: "Conflict".to_string(),
        code: 409,
    }))
}

// =============================================================================
// Fake cluster
// =============================================================================

struct State {
    app: Application,
    resource_version: u64,
    deployments: BTreeMap<String, Deployment>,
    services: BTreeMap<String, Service>,
    cron_jobs: BTreeMap<String, CronJob>,
    pvcs: BTreeMap<String, PersistentVolumeClaim>,
    config_maps: BTreeMap<String, ConfigMap>,
    fail_deletes: bool,
    calls: Vec<String>,
}

impl State {
    fn bump(&mut self) {
        self.resource_version += 1;
        self.app.metadata.resource_version = Some(self.resource_version.to_string());
    }
}

/// One namespace holding a single Application and its children
///
/// Writes to the Application bump its resource version the way the API
/// server does, and `patch_components` enforces it.
pub struct FakeCluster {
    state: Mutex<State>,
}

fn labeled_for<K: ResourceExt>(obj: &K, app: &str) -> bool {
    obj.labels().get(APPLICATION_LABEL).map(String::as_str) == Some(app)
}

impl FakeCluster {
    pub fn new(app: Application) -> Self {
        let mut state = State {
            app,
            resource_version: 0,
            deployments: BTreeMap::new(),
            services: BTreeMap::new(),
            cron_jobs: BTreeMap::new(),
            pvcs: BTreeMap::new(),
            config_maps: BTreeMap::new(),
            fail_deletes: false,
            calls: Vec::new(),
        };
        state.bump();
        Self {
            state: Mutex::new(state),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// The Application as the watcher would deliver it next
    pub fn application(&self) -> Application {
        self.with(|s| s.app.clone())
    }

    /// Simulate a user edit of the Application
    pub fn edit(&self, f: impl FnOnce(&mut Application)) {
        self.with(|s| {
            f(&mut s.app);
            s.bump();
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.with(|s| s.fail_deletes = fail)
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.with(|s| s.deployments.get(name).cloned())
    }

    pub fn deployment_names(&self) -> Vec<String> {
        self.with(|s| s.deployments.keys().cloned().collect())
    }

    pub fn service_names(&self) -> Vec<String> {
        self.with(|s| s.services.keys().cloned().collect())
    }

    pub fn cron_job_names(&self) -> Vec<String> {
        self.with(|s| s.cron_jobs.keys().cloned().collect())
    }

    pub fn pvc_names(&self) -> Vec<String> {
        self.with(|s| s.pvcs.keys().cloned().collect())
    }

    /// Report every desired replica of a Deployment as ready
    pub fn mark_ready(&self, name: &str) {
        self.with(|s| {
            if let Some(d) = s.deployments.get_mut(name) {
                let replicas = d.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
                d.status = Some(DeploymentStatus {
                    replicas: Some(replicas),
                    ready_replicas: Some(replicas),
                    ..Default::default()
                });
            }
        })
    }

    /// Seed a Deployment created by an earlier controller run
    pub fn add_deployment_for(&self, app: &str, component: &str) {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(deployment_name(app, component)),
                labels: Some(component_labels(app, component)),
                ..Default::default()
            },
            ..Default::default()
        };
        self.with(|s| {
            s.deployments.insert(deployment.name_any(), deployment);
        })
    }

    /// Seed a CronJob labeled for the application
    pub fn add_cron_job(&self, name: &str, app: &str, component: &str) {
        let job = CronJob {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(component_labels(app, component)),
                ..Default::default()
            },
            ..Default::default()
        };
        self.with(|s| {
            s.cron_jobs.insert(name.to_string(), job);
        })
    }

    /// Create the file store ConfigMap holding the given raw paths
    pub fn set_file_store(&self, paths: &[&str]) {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(DEFAULT_FILES_CONFIG_MAP.to_string()),
                ..Default::default()
            },
            data: Some(
                paths
                    .iter()
                    .map(|p| (encode_file_path(p), String::new()))
                    .collect(),
            ),
            ..Default::default()
        };
        self.with(|s| {
            s.config_maps.insert(DEFAULT_FILES_CONFIG_MAP.to_string(), cm);
        })
    }
}

#[async_trait]
impl ApplicationKubeClient for FakeCluster {
    async fn list_deployments(&self, _namespace: &str, app: &str) -> Result<Vec<Deployment>, Error> {
        Ok(self.with(|s| {
            s.deployments
                .values()
                .filter(|d| labeled_for(*d, app))
                .cloned()
                .collect()
        }))
    }

    async fn list_services(&self, _namespace: &str, app: &str) -> Result<Vec<Service>, Error> {
        Ok(self.with(|s| {
            s.services
                .values()
                .filter(|svc| labeled_for(*svc, app))
                .cloned()
                .collect()
        }))
    }

    async fn list_cron_jobs(&self, _namespace: &str, app: &str) -> Result<Vec<CronJob>, Error> {
        Ok(self.with(|s| {
            s.cron_jobs
                .values()
                .filter(|c| labeled_for(*c, app))
                .cloned()
                .collect()
        }))
    }

    async fn get_config_map(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.with(|s| s.config_maps.get(name).cloned()))
    }

    async fn get_pvc(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        Ok(self.with(|s| s.pvcs.get(name).cloned()))
    }

    async fn create_pvc(&self, _namespace: &str, pvc: &PersistentVolumeClaim) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("create_pvc {}", pvc.name_any()));
            s.pvcs.entry(pvc.name_any()).or_insert_with(|| pvc.clone());
        });
        Ok(())
    }

    async fn create_deployment(
        &self,
        _namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("create_deployment {}", deployment.name_any()));
            s.deployments.insert(deployment.name_any(), deployment.clone());
        });
        Ok(())
    }

    async fn replace_deployment(
        &self,
        _namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("replace_deployment {}", deployment.name_any()));
            let status = s
                .deployments
                .get(&deployment.name_any())
                .and_then(|d| d.status.clone());
            let mut stored = deployment.clone();
            stored.status = status;
            s.deployments.insert(deployment.name_any(), stored);
        });
        Ok(())
    }

    async fn delete_deployment(&self, _namespace: &str, name: &str) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("delete_deployment {}", name));
            if s.fail_deletes {
                return Err(server_error());
            }
            s.deployments.remove(name);
            Ok(())
        })
    }

    async fn create_service(&self, _namespace: &str, service: &Service) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("create_service {}", service.name_any()));
            s.services.insert(service.name_any(), service.clone());
        });
        Ok(())
    }

    async fn replace_service(&self, _namespace: &str, service: &Service) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("replace_service {}", service.name_any()));
            s.services.insert(service.name_any(), service.clone());
        });
        Ok(())
    }

    async fn delete_service(&self, _namespace: &str, name: &str) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("delete_service {}", name));
            if s.fail_deletes {
                return Err(server_error());
            }
            s.services.remove(name);
            Ok(())
        })
    }

    async fn delete_cron_job(&self, _namespace: &str, name: &str) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("delete_cron_job {}", name));
            if s.fail_deletes {
                return Err(server_error());
            }
            s.cron_jobs.remove(name);
            Ok(())
        })
    }

    async fn add_finalizer(
        &self,
        _name: &str,
        _namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("add_finalizer {}", finalizer));
            let finalizers = s.app.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_string());
            }
            s.bump();
        });
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        _name: &str,
        _namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("remove_finalizer {}", finalizer));
            if let Some(finalizers) = s.app.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
            s.bump();
        });
        Ok(())
    }

    async fn patch_components(
        &self,
        _name: &str,
        _namespace: &str,
        resource_version: Option<String>,
        components: &[ComponentSpec],
    ) -> Result<Option<String>, Error> {
        self.with(|s| {
            s.calls.push("patch_components".to_string());
            if let Some(rv) = resource_version {
                if s.app.metadata.resource_version.as_deref() != Some(rv.as_str()) {
                    return Err(conflict());
                }
            }
            s.app.spec.components = components.to_vec();
            s.bump();
            Ok(s.app.metadata.resource_version.clone())
        })
    }

    async fn patch_status(
        &self,
        _name: &str,
        _namespace: &str,
        status: &ApplicationStatus,
    ) -> Result<(), Error> {
        self.with(|s| {
            s.calls.push(format!("patch_status {}", status.phase));
            s.app.status = Some(status.clone());
            s.bump();
        });
        Ok(())
    }
}
