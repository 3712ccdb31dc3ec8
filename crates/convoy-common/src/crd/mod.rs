//! Custom Resource Definitions for convoy

mod application;
mod types;

pub use application::{
    Application, ApplicationPhase, ApplicationSpec, ApplicationStatus, ComponentSpec, Config,
    EnvVar, EnvVarType, Lifecycle, PodAffinityType, Port, Volume, VolumeType,
};
pub use types::{Condition, ConditionStatus};

use schemars::schema::{InstanceType, Metadata, Schema, SchemaObject};

/// Serde default helper returning `true`
pub(crate) fn default_true() -> bool {
    true
}

/// Plain string schema, optionally restricted to a fixed set of values.
///
/// Used for enums that must accept values serde alone would reject
/// (empty strings, open-ended tags).
pub(crate) fn string_schema(description: &str, values: Option<&[&str]>) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: values.map(|vs| {
            vs.iter()
                .map(|v| serde_json::Value::String((*v).to_string()))
                .collect()
        }),
        metadata: Some(Box::new(Metadata {
            description: Some(description.to_string()),
            ..Default::default()
        })),
        ..Default::default()
    })
}
