//! Desired state for one component
//!
//! Composes env resolution, config mounts, provisioned volumes and affinity
//! into a pod template, and wraps it in the component's Deployment and
//! Service. Merge helpers carry desired fields onto live objects so other
//! live fields (cluster IP, strategy, annotations) survive an update.

use std::collections::BTreeMap;

use convoy_common::crd::{Application, ComponentSpec};
use convoy_common::files::FileStore;
use convoy_common::kube_utils::{component_labels, deployment_name, owner_reference, service_name};
use convoy_common::Result;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, LocalObjectReference, PodSpec, PodTemplateSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use super::env::EnvResolver;
use super::volume::ProvisionedVolumes;
use super::{affinity, files};
use crate::error::CompilationError;

const DEFAULT_PROTOCOL: &str = "TCP";

/// Inputs shared by every component of one pass
pub struct TemplateInputs<'a> {
    pub app_name: &'a str,
    pub image_pull_secret: Option<&'a str>,
    pub env: &'a EnvResolver<'a>,
    pub file_store: Option<&'a FileStore>,
}

/// Build the pod template for a component
///
/// Fails only when an env entry cannot be resolved.
pub fn build_pod_template(
    inputs: &TemplateInputs<'_>,
    component: &ComponentSpec,
    volumes: &ProvisionedVolumes,
) -> std::result::Result<PodTemplateSpec, CompilationError> {
    let labels = component_labels(inputs.app_name, &component.name);
    let env = inputs.env.resolve_all(&component.env)?;
    let configs = files::compile(&component.name, &component.configs, inputs.file_store);

    let mut pod_volumes = volumes.volumes.clone();
    pod_volumes.extend(configs.volumes);
    let mut mounts = volumes.volume_mounts.clone();
    mounts.extend(configs.volume_mounts);

    let container = Container {
        name: component.name.clone(),
        image: Some(component.image.clone()),
        command: non_empty(component.command.clone()),
        args: non_empty(component.args.clone()),
        env: non_empty(env),
        ports: non_empty(
            component
                .ports
                .iter()
                .map(|p| ContainerPort {
                    name: Some(p.name.clone()),
                    container_port: p.container_port,
                    protocol: Some(protocol(p.protocol.as_deref())),
                    ..Default::default()
                })
                .collect(),
        ),
        resources: resources(component),
        readiness_probe: component.readiness_probe.clone(),
        liveness_probe: component.liveness_probe.clone(),
        volume_mounts: non_empty(mounts),
        ..Default::default()
    };

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: non_empty(pod_volumes),
            affinity: affinity::plan(
                &component.node_selector_labels,
                component.pod_affinity_type,
                &labels,
            ),
            image_pull_secrets: inputs.image_pull_secret.map(|name| {
                vec![LocalObjectReference {
                    name: name.to_string(),
                }]
            }),
            ..Default::default()
        }),
    })
}

/// CPU and memory go to both requests and limits
fn resources(component: &ComponentSpec) -> Option<ResourceRequirements> {
    let mut quantities = BTreeMap::new();
    if let Some(cpu) = &component.cpu {
        quantities.insert("cpu".to_string(), cpu.clone());
    }
    if let Some(memory) = &component.memory {
        quantities.insert("memory".to_string(), memory.clone());
    }
    if quantities.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: Some(quantities.clone()),
        limits: Some(quantities),
        ..Default::default()
    })
}

fn protocol(declared: Option<&str>) -> String {
    match declared {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => DEFAULT_PROTOCOL.to_string(),
    }
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

/// Deployment for a component around an already built template
pub fn build_deployment(
    app: &Application,
    component: &ComponentSpec,
    template: PodTemplateSpec,
) -> Result<Deployment> {
    let app_name = app.name_any();
    let labels = component_labels(&app_name, &component.name);
    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(&app_name, &component.name)),
            namespace: app.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(app)?]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(component.replica_count()),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Carry the desired template and replica count onto a live Deployment
pub fn merge_deployment(live: &Deployment, desired: &Deployment) -> Deployment {
    let mut merged = live.clone();
    if let Some(desired_spec) = desired.spec.as_ref() {
        let spec = merged.spec.get_or_insert_with(|| desired_spec.clone());
        spec.template = desired_spec.template.clone();
        spec.replicas = desired_spec.replicas;
    }
    merged.status = None;
    merged
}

/// Service for a component, `None` when it declares no ports
pub fn build_service(app: &Application, component: &ComponentSpec) -> Result<Option<Service>> {
    if !component.has_ports() {
        return Ok(None);
    }
    let app_name = app.name_any();
    let labels = component_labels(&app_name, &component.name);
    let ports = component
        .ports
        .iter()
        .map(|p| ServicePort {
            name: Some(p.name.clone()),
            port: p.effective_service_port(),
            target_port: Some(IntOrString::Int(p.container_port)),
            protocol: Some(protocol(p.protocol.as_deref())),
            ..Default::default()
        })
        .collect();

    Ok(Some(Service {
        metadata: ObjectMeta {
            name: Some(service_name(&app_name, &component.name)),
            namespace: app.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(app)?]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }))
}

/// Carry desired ports and selector onto a live Service
///
/// Returns `None` when the live Service already matches.
pub fn merge_service(live: &Service, desired: &Service) -> Option<Service> {
    let desired_spec = desired.spec.as_ref()?;
    let live_spec = live.spec.as_ref();

    let ports_match = live_spec.and_then(|s| s.ports.as_ref()).map(|ports| {
        ports
            .iter()
            .map(|p| (&p.name, p.port, &p.target_port, &p.protocol))
            .eq(desired_spec
                .ports
                .iter()
                .flatten()
                .map(|p| (&p.name, p.port, &p.target_port, &p.protocol)))
    });
    let selector_match = live_spec.map(|s| s.selector == desired_spec.selector);
    if ports_match == Some(true) && selector_match == Some(true) {
        return None;
    }

    let mut merged = live.clone();
    let spec = merged.spec.get_or_insert_with(ServiceSpec::default);
    spec.ports = desired_spec.ports.clone();
    spec.selector = desired_spec.selector.clone();
    merged.status = None;
    Some(merged)
}
