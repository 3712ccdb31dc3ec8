//! Volume provisioning
//!
//! Persistent volumes are backed by a claim whose name is either declared
//! or derived from the component and mount path. Claims are created when
//! missing. The resolved names come back as [`ResolvedVolume`] values so the
//! caller can persist them onto the Application before any Deployment refers
//! to them.

use std::collections::BTreeMap;

use convoy_common::crd::{Application, ComponentSpec, Volume as VolumeSpec, VolumeType};
use convoy_common::kube_utils::{claim_name, component_labels, owner_reference};
use convoy_common::{Error, Result};
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::ApplicationKubeClient;

/// Claim name resolved for one declared volume
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedVolume {
    /// Index into the component's volume list
    pub index: usize,
    /// Mount path of the volume, for logging
    pub path: String,
    /// Claim backing the volume
    pub claim_name: String,
}

/// Volumes and mounts for a component, plus claim names to persist
#[derive(Clone, Debug, Default)]
pub struct ProvisionedVolumes {
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
    /// Claim names that differ from what the Application currently records
    pub resolved: Vec<ResolvedVolume>,
}

impl ProvisionedVolumes {
    /// Whether claim names must be written back before rollout
    pub fn needs_write_back(&self) -> bool {
        !self.resolved.is_empty()
    }
}

/// Merge resolved claim names into a component's volume entries
///
/// Returns true when any entry changed.
pub fn apply_resolved(component: &mut ComponentSpec, resolved: &[ResolvedVolume]) -> bool {
    let mut changed = false;
    for r in resolved {
        if let Some(volume) = component.volumes.get_mut(r.index) {
            if volume.persistent_volume_claim_name.as_deref() != Some(r.claim_name.as_str()) {
                volume.persistent_volume_claim_name = Some(r.claim_name.clone());
                changed = true;
            }
        }
    }
    changed
}

/// Claim name a persistent volume resolves to
pub fn candidate_claim_name(component: &str, volume: &VolumeSpec) -> String {
    match volume.persistent_volume_claim_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => claim_name(component, &volume.path),
    }
}

/// Build the claim for a persistent volume
pub fn build_claim(
    app: &Application,
    component: &ComponentSpec,
    volume: &VolumeSpec,
    name: &str,
) -> Result<PersistentVolumeClaim> {
    let size = volume.size.clone().ok_or_else(|| {
        Error::validation_for(
            app.name_any(),
            format!(
                "component {}: persistent volume at {} has no size",
                component.name, volume.path
            ),
        )
    })?;

    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: app.namespace(),
            labels: Some(component_labels(&app.name_any(), &component.name)),
            owner_references: Some(vec![owner_reference(app)?]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: volume.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Provision every declared volume of a component
///
/// Claims that do not exist yet are created. Unknown volume types produce
/// neither a volume nor a mount.
pub async fn provision(
    kube: &dyn ApplicationKubeClient,
    app: &Application,
    component: &ComponentSpec,
) -> Result<ProvisionedVolumes> {
    let namespace = app
        .namespace()
        .ok_or_else(|| Error::validation_for(app.name_any(), "application has no namespace"))?;
    let mut out = ProvisionedVolumes::default();

    for (index, volume) in component.volumes.iter().enumerate() {
        let volume_name = claim_name(&component.name, &volume.path);
        let mut pod_volume = Volume {
            name: volume_name.clone(),
            ..Default::default()
        };

        match &volume.type_ {
            VolumeType::PersistentClaim => {
                let name = candidate_claim_name(&component.name, volume);
                if kube.get_pvc(&namespace, &name).await?.is_none() {
                    let claim = build_claim(app, component, volume, &name)?;
                    kube.create_pvc(&namespace, &claim).await?;
                    info!(
                        component = %component.name,
                        claim = %name,
                        path = %volume.path,
                        "Created persistent volume claim"
                    );
                } else {
                    debug!(component = %component.name, claim = %name, "Reusing persistent volume claim");
                }

                if volume.persistent_volume_claim_name.as_deref() != Some(name.as_str()) {
                    out.resolved.push(ResolvedVolume {
                        index,
                        path: volume.path.clone(),
                        claim_name: name.clone(),
                    });
                }
                pod_volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                    claim_name: name,
                    read_only: None,
                });
            }
            VolumeType::TemporaryDisk => {
                pod_volume.empty_dir = Some(EmptyDirVolumeSource::default());
            }
            VolumeType::TemporaryMemory => {
                pod_volume.empty_dir = Some(EmptyDirVolumeSource {
                    medium: Some("Memory".to_string()),
                    ..Default::default()
                });
            }
            VolumeType::Other(t) => {
                warn!(
                    component = %component.name,
                    path = %volume.path,
                    type_ = %t,
                    "Unknown volume type, skipping"
                );
                continue;
            }
        }

        out.volumes.push(pod_volume);
        out.volume_mounts.push(VolumeMount {
            name: volume_name,
            mount_path: volume.path.clone(),
            ..Default::default()
        });
    }

    Ok(out)
}
