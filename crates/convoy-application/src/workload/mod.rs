//! Desired-state synthesis for Application components
//!
//! Each submodule handles one slice of a component's pod template. The
//! controller drives them in order: dependency gate, volume provisioning,
//! pod template, plugins.

pub mod affinity;
pub mod dependency;
pub mod env;
pub mod files;
pub mod plugin;
pub mod pod_template;
pub mod volume;

pub use env::EnvResolver;
pub use plugin::{ingress_plugins, IngressPlugin, Plugin};
pub use pod_template::TemplateInputs;
pub use volume::{ProvisionedVolumes, ResolvedVolume};
