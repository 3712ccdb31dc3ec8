//! Application controller
//!
//! Entry point for the kube-runtime `Controller`. Each pass picks one of
//! three paths from the Application's lifecycle:
//!
//! - Deleting: tear down every child, then strip the cleanup finalizer
//! - Inactive: tear down every child, finalizer left in place
//! - Active: reconcile Services, then each component's Deployment
//!
//! The finalizer is attached on the first pass of a live Application. Every
//! pass re-derives its work from the Application and the listed children,
//! so a crash at any point is recovered by simply running again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info, instrument, warn};

use convoy_common::crd::{
    Application, ApplicationPhase, ApplicationStatus, ComponentSpec, Condition, ConditionStatus,
    Lifecycle,
};
use convoy_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use convoy_common::kube_utils::application_selector;
use convoy_common::{
    Error, APPLICATION_FINALIZER, DEFAULT_FILES_CONFIG_MAP, FIELD_MANAGER,
};

use crate::driver::{self, PassOutcome};

/// Requeue interval for retryable errors
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Condition type summarizing rollout state
pub const READY_CONDITION: &str = "Ready";

// =============================================================================
// Traits for dependency injection and testability
// =============================================================================

/// Kubernetes operations the Application controller performs
///
/// Lookups return `Ok(None)` for missing objects and deletes succeed when the
/// object is already gone.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplicationKubeClient: Send + Sync {
    /// Deployments labeled with the application's name
    async fn list_deployments(&self, namespace: &str, app: &str) -> Result<Vec<Deployment>, Error>;

    /// Services labeled with the application's name
    async fn list_services(&self, namespace: &str, app: &str) -> Result<Vec<Service>, Error>;

    /// CronJobs labeled with the application's name
    async fn list_cron_jobs(&self, namespace: &str, app: &str) -> Result<Vec<CronJob>, Error>;

    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;

    /// Create a claim; an existing claim with the same name counts as success
    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<(), Error>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
        -> Result<(), Error>;

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error>;

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), Error>;

    async fn replace_service(&self, namespace: &str, service: &Service) -> Result<(), Error>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Add a finalizer to an Application
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from an Application
    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Persist the component list (resolved claim names) onto the Application
    ///
    /// Guarded by `resource_version` when given. Returns the new resource
    /// version.
    async fn patch_components(
        &self,
        name: &str,
        namespace: &str,
        resource_version: Option<String>,
        components: &[ComponentSpec],
    ) -> Result<Option<String>, Error>;

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ApplicationStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct ApplicationKubeClientImpl {
    client: Client,
}

impl ApplicationKubeClientImpl {
    /// Create a new ApplicationKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

fn selected(app: &str) -> ListParams {
    ListParams::default().labels(&application_selector(app))
}

fn ignore_not_found(result: Result<(), kube::Error>, kind: &str, name: &str) -> Result<(), Error> {
    match result {
        Ok(()) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(kind, name, "Already deleted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ApplicationKubeClient for ApplicationKubeClientImpl {
    async fn list_deployments(&self, namespace: &str, app: &str) -> Result<Vec<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&selected(app)).await?.items)
    }

    async fn list_services(&self, namespace: &str, app: &str) -> Result<Vec<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&selected(app)).await?.items)
    }

    async fn list_cron_jobs(&self, namespace: &str, app: &str) -> Result<Vec<CronJob>, Error> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&selected(app)).await?.items)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(Some(cm)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(pvc) => Ok(Some(pvc)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<(), Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&Self::post_params(), pvc).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(claim = %pvc.name_any(), "Claim already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), deployment).await?;
        Ok(())
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&deployment.name_any(), &Self::post_params(), deployment)
            .await?;
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let result = api.delete(name, &DeleteParams::background()).await.map(|_| ());
        ignore_not_found(result, "Deployment", name)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), service).await?;
        Ok(())
    }

    async fn replace_service(&self, namespace: &str, service: &Service) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&service.name_any(), &Self::post_params(), service)
            .await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let result = api.delete(name, &DeleteParams::default()).await.map(|_| ());
        ignore_not_found(result, "Service", name)
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        let result = api.delete(name, &DeleteParams::background()).await.map(|_| ());
        ignore_not_found(result, "CronJob", name)
    }

    async fn add_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<Application> = Api::namespaced(self.client.clone(), namespace);

        let app = api.get(name).await?;
        let mut finalizers = app.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": app.metadata.resource_version,
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<Application> = Api::namespaced(self.client.clone(), namespace);

        let app = match api.get(name).await {
            Ok(app) => app,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let finalizers: Vec<String> = app
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": app.metadata.resource_version,
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_components(
        &self,
        name: &str,
        namespace: &str,
        resource_version: Option<String>,
        components: &[ComponentSpec],
    ) -> Result<Option<String>, Error> {
        let api: Api<Application> = Api::namespaced(self.client.clone(), namespace);
        let mut patch = serde_json::json!({
            "spec": { "components": serde_json::to_value(components)? }
        });
        if let Some(rv) = resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
        }
        let updated = api
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(updated.metadata.resource_version)
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ApplicationStatus,
    ) -> Result<(), Error> {
        let api: Api<Application> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": serde_json::to_value(status)? });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }
}

// =============================================================================
// Controller context
// =============================================================================

/// Tunables for the Application controller
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// ConfigMap backing the file store, in the Application's namespace
    pub files_config_map: String,
    /// Resync interval once every component is rolled out
    pub requeue_interval: Duration,
    /// Resync interval while a component waits on a dependency
    pub deferred_requeue_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            files_config_map: DEFAULT_FILES_CONFIG_MAP.to_string(),
            requeue_interval: Duration::from_secs(300),
            deferred_requeue_interval: Duration::from_secs(10),
        }
    }
}

/// Shared state for the Application controller
pub struct ApplicationContext {
    /// Kubernetes client for API operations
    pub kube: Arc<dyn ApplicationKubeClient>,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    pub config: ReconcilerConfig,
}

impl ApplicationContext {
    /// Create a new context with the given dependencies
    pub fn new(
        kube: Arc<dyn ApplicationKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
        }
    }

    /// Create a context from a Kubernetes client
    pub fn from_client(client: Client, config: ReconcilerConfig) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER));
        Self {
            kube: Arc::new(ApplicationKubeClientImpl::new(client)),
            events,
            config,
        }
    }

    /// Create a context for testing with a custom client and no-op events
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn ApplicationKubeClient>) -> Self {
        Self {
            kube,
            events: Arc::new(convoy_common::events::NoopEventPublisher),
            config: ReconcilerConfig::default(),
        }
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// Reconcile an Application
#[instrument(skip(app, ctx), fields(app = %app.name_any()))]
pub async fn reconcile(app: Arc<Application>, ctx: Arc<ApplicationContext>) -> Result<Action, Error> {
    let name = app.name_any();
    let namespace = app
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "application has no namespace"))?;

    let lifecycle = app.lifecycle();
    if lifecycle == Lifecycle::Deleting {
        return handle_deletion(&app, &namespace, &ctx).await;
    }

    if !app.has_finalizer(APPLICATION_FINALIZER) {
        ctx.kube
            .add_finalizer(&name, &namespace, APPLICATION_FINALIZER)
            .await?;
        info!(app = %name, namespace = %namespace, "Added cleanup finalizer");
        publish(&ctx, &app, EventType::Normal, reasons::FINALIZER_ADDED, actions::RECONCILE, None).await;
        // The patch bumped the resource version; continue from the fresh object
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    match lifecycle {
        Lifecycle::Inactive => {
            let summary = driver::teardown(ctx.kube.as_ref(), &namespace, &name).await?;
            if summary.total() > 0 {
                info!(app = %name, deleted = summary.total(), "Tore down inactive application");
                publish(
                    &ctx,
                    &app,
                    EventType::Normal,
                    reasons::TEARDOWN_COMPLETE,
                    actions::TEARDOWN,
                    Some(summary.to_string()),
                )
                .await;
            }
            let status = build_status(&app, ApplicationPhase::Inactive, None, Vec::new());
            update_status(&ctx, &app, &namespace, status).await?;
            Ok(Action::requeue(ctx.config.requeue_interval))
        }
        _ => match driver::reconcile_active(&app, &namespace, &ctx).await {
            Ok(outcome) => finish_active_pass(&app, &namespace, &ctx, outcome).await,
            Err(e) => {
                if let Some(component) = e.component() {
                    warn!(app = %name, component, error = %e, "Component build failed");
                    publish(
                        &ctx,
                        &app,
                        EventType::Warning,
                        reasons::RESOLUTION_FAILED,
                        actions::RECONCILE,
                        Some(e.to_string()),
                    )
                    .await;
                    let status =
                        build_status(&app, ApplicationPhase::Failed, Some(e.to_string()), Vec::new());
                    if let Err(status_err) = update_status(&ctx, &app, &namespace, status).await {
                        warn!(app = %name, error = %status_err, "Failed to record failure status");
                    }
                }
                Err(e)
            }
        },
    }
}

async fn finish_active_pass(
    app: &Application,
    namespace: &str,
    ctx: &ApplicationContext,
    outcome: PassOutcome,
) -> Result<Action, Error> {
    let name = app.name_any();
    if outcome.deferred.is_empty() {
        debug!(app = %name, applied = outcome.applied.len(), "All components reconciled");
    } else {
        publish(
            ctx,
            app,
            EventType::Normal,
            reasons::COMPONENT_DEFERRED,
            actions::RECONCILE,
            Some(format!("waiting on dependencies: {}", outcome.deferred.join(", "))),
        )
        .await;
    }

    let previously_ready = app
        .status
        .as_ref()
        .is_some_and(|s| s.phase == ApplicationPhase::Active && s.deferred_components.is_empty());
    if outcome.deferred.is_empty() && !previously_ready {
        publish(
            ctx,
            app,
            EventType::Normal,
            reasons::COMPONENTS_RECONCILED,
            actions::RECONCILE,
            None,
        )
        .await;
    }

    let requeue = if outcome.deferred.is_empty() {
        ctx.config.requeue_interval
    } else {
        ctx.config.deferred_requeue_interval
    };
    let status = build_status(app, ApplicationPhase::Active, None, outcome.deferred);
    update_status(ctx, app, namespace, status).await?;
    Ok(Action::requeue(requeue))
}

/// Error policy for the controller
///
/// Retryable errors requeue after a short delay; anything else waits for
/// the Application to change.
pub fn error_policy(app: Arc<Application>, error: &Error, _ctx: Arc<ApplicationContext>) -> Action {
    if error.is_retryable() {
        warn!(app = %app.name_any(), error = %error, "Reconciliation failed, retrying");
        Action::requeue(ERROR_REQUEUE)
    } else {
        error!(app = %app.name_any(), error = %error, "Reconciliation failed permanently");
        Action::await_change()
    }
}

// =============================================================================
// Finalizer
// =============================================================================

/// Tear down children, then release the Application for deletion
///
/// A failed delete leaves the finalizer in place so the next pass retries.
async fn handle_deletion(
    app: &Application,
    namespace: &str,
    ctx: &ApplicationContext,
) -> Result<Action, Error> {
    let name = app.name_any();
    if !app.has_finalizer(APPLICATION_FINALIZER) {
        return Ok(Action::await_change());
    }

    info!(app = %name, namespace, "Application deleting, tearing down children");
    let status = build_status(app, ApplicationPhase::Deleting, None, Vec::new());
    update_status(ctx, app, namespace, status).await?;

    let summary = driver::teardown(ctx.kube.as_ref(), namespace, &name).await?;
    publish(
        ctx,
        app,
        EventType::Normal,
        reasons::TEARDOWN_COMPLETE,
        actions::DELETE,
        Some(summary.to_string()),
    )
    .await;

    ctx.kube
        .remove_finalizer(&name, namespace, APPLICATION_FINALIZER)
        .await?;
    info!(app = %name, namespace, "Removed cleanup finalizer");
    publish(ctx, app, EventType::Normal, reasons::FINALIZER_REMOVED, actions::DELETE, None).await;

    Ok(Action::await_change())
}

// =============================================================================
// Events and status
// =============================================================================

async fn publish(
    ctx: &ApplicationContext,
    app: &Application,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&app.object_ref(&()), type_, reason, action, note)
        .await;
}

/// Status for the given phase
///
/// The Ready condition keeps its transition time while its state is
/// unchanged.
pub fn build_status(
    app: &Application,
    phase: ApplicationPhase,
    message: Option<String>,
    deferred: Vec<String>,
) -> ApplicationStatus {
    let (status, reason, text) = match phase {
        ApplicationPhase::Active if deferred.is_empty() => (
            ConditionStatus::True,
            "Reconciled",
            "all components rolled out".to_string(),
        ),
        ApplicationPhase::Active => (
            ConditionStatus::False,
            "DependenciesNotReady",
            format!("waiting on dependencies: {}", deferred.join(", ")),
        ),
        ApplicationPhase::Failed => (
            ConditionStatus::False,
            "ResolutionFailed",
            message.clone().unwrap_or_default(),
        ),
        ApplicationPhase::Inactive => (
            ConditionStatus::False,
            "Inactive",
            "application is inactive".to_string(),
        ),
        ApplicationPhase::Deleting => (
            ConditionStatus::False,
            "Deleting",
            "application is being deleted".to_string(),
        ),
        ApplicationPhase::Pending => (ConditionStatus::Unknown, "Pending", String::new()),
    };

    let mut condition = Condition::new(READY_CONDITION, status, reason, text);
    if let Some(previous) = app
        .status
        .as_ref()
        .and_then(|s| s.conditions.iter().find(|c| c.type_ == READY_CONDITION))
    {
        if previous.same_state(&condition) {
            condition.last_transition_time = previous.last_transition_time;
        }
    }

    ApplicationStatus {
        phase,
        message,
        observed_generation: app.metadata.generation,
        deferred_components: deferred,
        conditions: vec![condition],
    }
}

/// Whether `next` would change nothing on the recorded status
pub fn is_status_unchanged(current: Option<&ApplicationStatus>, next: &ApplicationStatus) -> bool {
    let Some(current) = current else {
        return false;
    };
    current.phase == next.phase
        && current.message == next.message
        && current.observed_generation == next.observed_generation
        && current.deferred_components == next.deferred_components
        && current.conditions.len() == next.conditions.len()
        && current
            .conditions
            .iter()
            .zip(&next.conditions)
            .all(|(a, b)| a.same_state(b))
}

async fn update_status(
    ctx: &ApplicationContext,
    app: &Application,
    namespace: &str,
    status: ApplicationStatus,
) -> Result<(), Error> {
    if is_status_unchanged(app.status.as_ref(), &status) {
        debug!(app = %app.name_any(), "Status unchanged, skipping patch");
        return Ok(());
    }
    ctx.kube
        .patch_status(&app.name_any(), namespace, &status)
        .await
}
