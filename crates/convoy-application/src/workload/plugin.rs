//! Component plugins
//!
//! Plugin payloads are stored untyped on the component. They are decoded
//! once per pass into [`Plugin`] by probing the `name`/`type` envelope:
//! `name: manual-scaler` selects [`ManualScaler`], `type` equal to
//! [`INGRESS_PLUGIN_TYPE`] selects [`IngressPlugin`]. Anything else is
//! ignored.

use convoy_common::crd::{Application, ComponentSpec};
use convoy_common::kube_utils::service_name;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
    ServiceBackendPort,
};
use kube::ResourceExt;
use serde::Deserialize;
use tracing::{debug, warn};

/// Name selecting the replica override plugin
pub const MANUAL_SCALER_NAME: &str = "manual-scaler";

/// Type tag selecting the ingress plugin
pub const INGRESS_PLUGIN_TYPE: &str = "plugins.convoy.dev/v1alpha1.ingress";

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    type_: String,
}

/// Overrides the Deployment's replica count
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ManualScaler {
    pub replicas: i32,
}

/// Exposes a component through ingress hosts
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressPlugin {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub path: String,
    /// Hosts are served over TLS; selects the scheme of [`IngressPlugin::urls`]
    #[serde(default)]
    pub enable_https: bool,

    /// Filled in from the owning component
    #[serde(skip)]
    pub service_name: String,
    #[serde(skip)]
    pub service_port: i32,
    #[serde(skip)]
    pub namespace: String,
}

/// A decoded plugin
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Plugin {
    ManualScaler(ManualScaler),
    Ingress(IngressPlugin),
}

impl Plugin {
    /// Decode one payload; unknown tags and malformed payloads yield `None`
    pub fn decode(raw: &serde_json::Value) -> Option<Plugin> {
        let envelope = match Envelope::deserialize(raw) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Plugin payload is not an object, ignoring");
                return None;
            }
        };

        let decoded = if envelope.name == MANUAL_SCALER_NAME {
            ManualScaler::deserialize(raw).map(Plugin::ManualScaler)
        } else if envelope.type_ == INGRESS_PLUGIN_TYPE {
            IngressPlugin::deserialize(raw).map(Plugin::Ingress)
        } else {
            debug!(name = %envelope.name, type_ = %envelope.type_, "Ignoring unknown plugin");
            return None;
        };

        match decoded {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(name = %envelope.name, type_ = %envelope.type_, error = %e, "Malformed plugin payload, ignoring");
                None
            }
        }
    }
}

/// Decode every plugin payload of a component
pub fn decode_all(raw: &[serde_json::Value]) -> Vec<Plugin> {
    raw.iter().filter_map(Plugin::decode).collect()
}

/// Apply Deployment mutations from a component's own plugins
pub fn apply_to_deployment(plugins: &[Plugin], deployment: &mut Deployment) {
    for plugin in plugins {
        if let Plugin::ManualScaler(scaler) = plugin {
            if let Some(spec) = deployment.spec.as_mut() {
                spec.replicas = Some(scaler.replicas);
            }
        }
    }
}

/// Ingress plugins of a component, enriched with its Service address
///
/// The first declared port is exposed; a component without ports has no
/// Service to route to and yields nothing.
pub fn component_ingress_plugins(
    app_name: &str,
    namespace: &str,
    component: &ComponentSpec,
) -> Vec<IngressPlugin> {
    let ingresses: Vec<IngressPlugin> = decode_all(&component.plugins)
        .into_iter()
        .filter_map(|p| match p {
            Plugin::Ingress(i) => Some(i),
            Plugin::ManualScaler(_) => None,
        })
        .collect();
    if ingresses.is_empty() {
        return ingresses;
    }

    let Some(port) = component.ports.first() else {
        warn!(component = %component.name, "Ingress plugin on component without ports, ignoring");
        return Vec::new();
    };

    ingresses
        .into_iter()
        .map(|mut i| {
            i.service_name = service_name(app_name, &component.name);
            i.service_port = port.effective_service_port();
            i.namespace = namespace.to_string();
            i
        })
        .collect()
}

/// Every ingress plugin declared across an Application's components
pub fn ingress_plugins(app: &Application) -> Vec<IngressPlugin> {
    let app_name = app.name_any();
    let namespace = app.namespace().unwrap_or_default();
    app.spec
        .components
        .iter()
        .flat_map(|c| component_ingress_plugins(&app_name, &namespace, c))
        .collect()
}

impl IngressPlugin {
    fn effective_path(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.clone()
        }
    }

    /// Public address of each host, for status and display
    pub fn urls(&self) -> Vec<String> {
        let scheme = if self.enable_https { "https" } else { "http" };
        let path = self.effective_path();
        self.hosts
            .iter()
            .map(|host| format!("{scheme}://{host}{path}"))
            .collect()
    }

    /// One rule per host routing `path` to the component's Service
    pub fn rules(&self) -> Vec<IngressRule> {
        let path = self.effective_path();
        self.hosts
            .iter()
            .map(|host| IngressRule {
                host: Some(host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(path.clone()),
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: self.service_name.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(self.service_port),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            })
            .collect()
    }
}
