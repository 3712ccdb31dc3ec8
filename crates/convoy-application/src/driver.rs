//! Reconciliation passes over an Application's children
//!
//! An active pass runs in a fixed order:
//!
//! 1. List live Deployments and Services by application label
//! 2. Create, update or delete each component's Service
//! 3. Re-list Services so linked env vars resolve against current addresses
//! 4. Per component: dependency gate, volume provisioning and claim
//!    write-back, pod template, plugins, then create or update the Deployment
//!
//! Any API failure aborts the pass. Nothing is rolled back; the next pass
//! converges from whatever state was reached.

use std::fmt;

use convoy_common::crd::Application;
use convoy_common::files::FileStore;
use convoy_common::kube_utils::{deployment_name, service_name};
use convoy_common::{Error, Result};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::children::LiveChildren;
use crate::controller::{ApplicationContext, ApplicationKubeClient};
use crate::workload::pod_template::{
    build_deployment, build_pod_template, build_service, merge_deployment, merge_service,
};
use crate::workload::{dependency, plugin, volume, EnvResolver, TemplateInputs};

/// What an active pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Components whose Deployment was created or updated
    pub applied: Vec<String>,
    /// Components skipped because a dependency was not ready
    pub deferred: Vec<String>,
}

/// Run one active pass
pub async fn reconcile_active(
    app: &Application,
    namespace: &str,
    ctx: &ApplicationContext,
) -> Result<PassOutcome> {
    validate(app)?;
    let kube = ctx.kube.as_ref();
    let name = app.name_any();

    let mut children = LiveChildren::new(
        kube.list_deployments(namespace, &name).await?,
        kube.list_services(namespace, &name).await?,
    );

    reconcile_services(kube, app, namespace, &children).await?;
    children.replace_services(kube.list_services(namespace, &name).await?);

    let file_store = if app.spec.components.iter().any(|c| !c.configs.is_empty()) {
        kube.get_config_map(namespace, &ctx.config.files_config_map)
            .await?
            .map(|cm| FileStore::from_config_map(&cm))
    } else {
        None
    };

    let env = EnvResolver::new(&name, namespace, &app.spec.shared_env, &children.services);
    let inputs = TemplateInputs {
        app_name: &name,
        image_pull_secret: app.spec.image_pull_secret_name.as_deref(),
        env: &env,
        file_store: file_store.as_ref(),
    };

    // Components as persisted, including claim names written back this pass
    let mut persisted = app.spec.components.clone();
    let mut resource_version = app.metadata.resource_version.clone();
    let mut outcome = PassOutcome::default();

    for (index, component) in app.spec.components.iter().enumerate() {
        let waiting = dependency::unready_dependencies(&name, component, &children.deployments);
        if !waiting.is_empty() {
            info!(
                component = %component.name,
                waiting_on = ?waiting,
                "Dependencies not ready, deferring component"
            );
            outcome.deferred.push(component.name.clone());
            continue;
        }

        let provisioned = volume::provision(kube, app, component).await?;
        if provisioned.needs_write_back()
            && volume::apply_resolved(&mut persisted[index], &provisioned.resolved)
        {
            resource_version = kube
                .patch_components(&name, namespace, resource_version.take(), &persisted)
                .await?;
            info!(
                component = %component.name,
                claims = provisioned.resolved.len(),
                "Persisted resolved claim names"
            );
        }

        let template = build_pod_template(&inputs, component, &provisioned)
            .map_err(|e| e.for_component(&component.name))?;
        let mut desired = build_deployment(app, component, template)?;
        plugin::apply_to_deployment(&plugin::decode_all(&component.plugins), &mut desired);

        let deployment = deployment_name(&name, &component.name);
        match children.deployments.get(&deployment) {
            None => {
                kube.create_deployment(namespace, &desired).await?;
                info!(component = %component.name, deployment = %deployment, "Created deployment");
            }
            Some(live) => {
                kube.replace_deployment(namespace, &merge_deployment(live, &desired))
                    .await?;
                debug!(component = %component.name, deployment = %deployment, "Updated deployment");
            }
        }
        outcome.applied.push(component.name.clone());
    }

    Ok(outcome)
}

/// Make Service existence match "component declares ports"
async fn reconcile_services(
    kube: &dyn ApplicationKubeClient,
    app: &Application,
    namespace: &str,
    children: &LiveChildren,
) -> Result<()> {
    let name = app.name_any();
    for component in &app.spec.components {
        let svc = service_name(&name, &component.name);
        match (build_service(app, component)?, children.services.get(&svc)) {
            (Some(desired), None) => {
                kube.create_service(namespace, &desired).await?;
                info!(component = %component.name, service = %svc, "Created service");
            }
            (Some(desired), Some(live)) => {
                if let Some(merged) = merge_service(live, &desired) {
                    kube.replace_service(namespace, &merged).await?;
                    info!(component = %component.name, service = %svc, "Updated service");
                }
            }
            (None, Some(_)) => {
                kube.delete_service(namespace, &svc).await?;
                info!(component = %component.name, service = %svc, "Deleted service of portless component");
            }
            (None, None) => {}
        }
    }
    Ok(())
}

/// Counts of children removed by a teardown
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    pub deployments: usize,
    pub services: usize,
    pub cron_jobs: usize,
}

impl TeardownSummary {
    pub fn total(&self) -> usize {
        self.deployments + self.services + self.cron_jobs
    }
}

impl fmt::Display for TeardownSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted {} deployments, {} services, {} cron jobs",
            self.deployments, self.services, self.cron_jobs
        )
    }
}

/// Delete every Deployment, Service and CronJob labeled with the application
///
/// Stops at the first failed delete.
pub async fn teardown(
    kube: &dyn ApplicationKubeClient,
    namespace: &str,
    app_name: &str,
) -> Result<TeardownSummary> {
    let mut summary = TeardownSummary::default();

    for d in kube.list_deployments(namespace, app_name).await? {
        kube.delete_deployment(namespace, &d.name_any()).await?;
        summary.deployments += 1;
    }
    for s in kube.list_services(namespace, app_name).await? {
        kube.delete_service(namespace, &s.name_any()).await?;
        summary.services += 1;
    }
    for c in kube.list_cron_jobs(namespace, app_name).await? {
        kube.delete_cron_job(namespace, &c.name_any()).await?;
        summary.cron_jobs += 1;
    }

    if summary.total() > 0 {
        debug!(app = app_name, %summary, "Teardown finished");
    }
    Ok(summary)
}

/// Reject specs the pass cannot work with
///
/// Component names key every derived name, so duplicates would make two
/// components fight over one Deployment.
pub fn validate(app: &Application) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for component in &app.spec.components {
        if !seen.insert(component.name.as_str()) {
            return Err(Error::validation_for(
                app.name_any(),
                format!("duplicate component name {}", component.name),
            ));
        }
    }
    Ok(())
}
