//! Application CRD types
//!
//! An `Application` is a set of named components. Each component becomes a
//! Deployment, and a Service when it declares ports. Persistent volumes are
//! claimed per component and their resolved claim names are written back
//! into the component's volume entries.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject, SingleOrVec};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::types::Condition;
use super::{default_true, string_schema};

// =============================================================================
// Spec
// =============================================================================

/// Specification for an Application
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "convoy.dev",
    version = "v1alpha1",
    kind = "Application",
    plural = "applications",
    shortname = "app",
    namespaced,
    status = "ApplicationStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".spec.isActive"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Components in declaration order
    #[serde(default)]
    pub components: Vec<ComponentSpec>,

    /// Environment entries that components can reference with `external` env vars
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_env: Vec<EnvVar>,

    /// Image pull secret attached to every generated pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret_name: Option<String>,

    /// Inactive applications keep their record but have every child torn down
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// One workload within an Application
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Component name, unique within the application
    pub name: String,

    /// Container image
    pub image: String,

    /// Entrypoint override
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Arguments to the entrypoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// CPU, applied as both request and limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Quantity>,

    /// Memory, applied as both request and limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Quantity>,

    /// Replica count, 1 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<Config>,

    /// Names of sibling components that must be ready before this one rolls out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Tagged plugin payloads, decoded by the application controller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "plugin_list_schema")]
    pub plugins: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "PodAffinityType::is_none")]
    pub pod_affinity_type: PodAffinityType,

    /// Required node labels, one `In` match per entry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector_labels: BTreeMap<String, String>,
}

impl ComponentSpec {
    /// Declared replica count, defaulting to 1
    pub fn replica_count(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }

    /// A Service exists for this component exactly when this is true
    pub fn has_ports(&self) -> bool {
        !self.ports.is_empty()
    }
}

fn plugin_list_schema(_gen: &mut schemars::gen::SchemaGenerator) -> Schema {
    let mut item = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    item.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(SingleOrVec::Single(Box::new(Schema::Object(item)))),
            ..Default::default()
        })),
        ..Default::default()
    })
}

// =============================================================================
// Env
// =============================================================================

/// How an env var value is produced
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EnvVarType {
    /// Literal value (also the meaning of an empty type)
    #[default]
    Static,
    /// Value taken from the application's shared env
    External,
    /// `<component>/<port>` reference to a sibling's Service address
    Linked,
    /// Unrecognized type, skipped at resolution time
    Other(String),
}

impl EnvVarType {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Static => "static",
            Self::External => "external",
            Self::Linked => "linked",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for EnvVarType {
    fn from(s: &str) -> Self {
        match s {
            "" | "static" => Self::Static,
            "external" => Self::External,
            "linked" => Self::Linked,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EnvVarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EnvVarType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnvVarType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

impl JsonSchema for EnvVarType {
    fn schema_name() -> String {
        "EnvVarType".to_string()
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> Schema {
        string_schema("Env var type: 'static' (or empty), 'external', or 'linked'", None)
    }
}

/// A declared environment entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,

    #[serde(rename = "type", default)]
    pub type_: EnvVarType,

    /// Literal value, shared env name, or `<component>/<port>` depending on type
    #[serde(default)]
    pub value: String,

    /// Prepended to a resolved linked address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Appended to a resolved linked address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

// =============================================================================
// Volumes and configs
// =============================================================================

/// Backing for a declared volume
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeType {
    /// PersistentVolumeClaim with a stable name
    PersistentClaim,
    /// Node-local scratch disk
    TemporaryDisk,
    /// Memory-backed scratch space
    TemporaryMemory,
    /// Unrecognized type, skipped at provisioning time
    Other(String),
}

impl VolumeType {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::PersistentClaim => "pvc",
            Self::TemporaryDisk => "emptyDir",
            Self::TemporaryMemory => "emptyDirMemory",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for VolumeType {
    fn from(s: &str) -> Self {
        match s {
            "pvc" => Self::PersistentClaim,
            "emptyDir" => Self::TemporaryDisk,
            "emptyDirMemory" => Self::TemporaryMemory,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for VolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for VolumeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VolumeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

impl JsonSchema for VolumeType {
    fn schema_name() -> String {
        "VolumeType".to_string()
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> Schema {
        string_schema("Volume type: 'pvc', 'emptyDir', or 'emptyDirMemory'", None)
    }
}

/// A disk mounted into the component's container
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Mount path inside the container
    pub path: String,

    #[serde(rename = "type")]
    pub type_: VolumeType,

    /// Requested storage for persistent claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Explicit claim name; filled in by the controller once a claim is resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,
}

/// Files from the file store mounted under one directory
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub mount_path: String,

    /// File store paths; a path ending in `/` selects a directory
    #[serde(default)]
    pub paths: Vec<String>,
}

// =============================================================================
// Ports and scheduling
// =============================================================================

/// A container port, exposed through the component's Service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Port name, referenced by linked env vars
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    pub container_port: i32,

    /// Service-facing port, the container port when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,
}

impl Port {
    /// Port the Service listens on
    pub fn effective_service_port(&self) -> i32 {
        match self.service_port {
            Some(p) if p != 0 => p,
            _ => self.container_port,
        }
    }
}

/// Pod placement preference relative to other replicas of the same component
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PodAffinityType {
    #[default]
    None,
    /// Prefer co-locating replicas on one node
    PreferGather,
    /// Prefer spreading replicas across nodes
    PreferFanout,
}

impl PodAffinityType {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PreferGather => "prefer-gather",
            Self::PreferFanout => "prefer-fanout",
        }
    }

    /// True for the default, used to omit the field when serializing
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl std::str::FromStr for PodAffinityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Self::None),
            "prefer-gather" => Ok(Self::PreferGather),
            "prefer-fanout" => Ok(Self::PreferFanout),
            other => Err(format!("invalid pod affinity type: {}", other)),
        }
    }
}

impl std::fmt::Display for PodAffinityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PodAffinityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PodAffinityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for PodAffinityType {
    fn schema_name() -> String {
        "PodAffinityType".to_string()
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> Schema {
        string_schema(
            "Pod affinity preference",
            Some(&["", "none", "prefer-gather", "prefer-fanout"]),
        )
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle phase of an Application
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ApplicationPhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// Components are reconciled
    Active,
    /// Spec marks the application inactive; children are torn down
    Inactive,
    /// Deletion requested, teardown in progress
    Deleting,
    /// Last pass failed to build a component
    Failed,
}

impl std::fmt::Display for ApplicationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Active => write!(f, "Active"),
            Self::Inactive => write!(f, "Inactive"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Observed state of an Application
///
/// `message` and `deferredComponents` are always serialized so a merge patch
/// clears stale values.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub phase: ApplicationPhase,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Components skipped in the last pass because a dependency was not ready
    #[serde(default)]
    pub deferred_components: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Which path a reconciliation pass takes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Components are built and applied
    Active,
    /// Children are torn down, finalizer left alone
    Inactive,
    /// Deletion requested
    Deleting,
}

impl Application {
    /// Current lifecycle state; a deletion request wins over the active flag
    pub fn lifecycle(&self) -> Lifecycle {
        if self.metadata.deletion_timestamp.is_some() {
            Lifecycle::Deleting
        } else if self.spec.is_active {
            Lifecycle::Active
        } else {
            Lifecycle::Inactive
        }
    }

    /// Whether the given finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }
}
