//! Environment variable resolution
//!
//! Turns declared env entries into literal values:
//! - `static`: the raw value
//! - `external`: a static or linked entry of the application's shared env
//! - `linked`: `<component>/<port>` becomes `<service>.<namespace>:<port>`
//!   of the sibling's generated Service, wrapped in prefix and suffix
//!
//! Shared env entries are resolved one level deep; a shared entry cannot
//! point at another shared entry.

use std::collections::BTreeMap;

use convoy_common::crd::{EnvVar, EnvVarType};
use convoy_common::kube_utils::service_name;
use k8s_openapi::api::core::v1::{EnvVar as K8sEnvVar, Service};
use tracing::warn;

use crate::error::CompilationError;

/// Resolves env entries for the components of one Application
pub struct EnvResolver<'a> {
    app_name: &'a str,
    namespace: &'a str,
    shared_env: &'a [EnvVar],
    services: &'a BTreeMap<String, Service>,
}

impl<'a> EnvResolver<'a> {
    pub fn new(
        app_name: &'a str,
        namespace: &'a str,
        shared_env: &'a [EnvVar],
        services: &'a BTreeMap<String, Service>,
    ) -> Self {
        Self {
            app_name,
            namespace,
            shared_env,
            services,
        }
    }

    /// Resolve every entry in order, dropping soft-skipped ones
    pub fn resolve_all(&self, env: &[EnvVar]) -> Result<Vec<K8sEnvVar>, CompilationError> {
        let mut resolved = Vec::with_capacity(env.len());
        for var in env {
            if let Some(value) = self.resolve(var)? {
                resolved.push(K8sEnvVar {
                    name: var.name.clone(),
                    value: Some(value),
                    ..Default::default()
                });
            }
        }
        Ok(resolved)
    }

    /// Resolve a single entry. `Ok(None)` means the entry is omitted.
    pub fn resolve(&self, var: &EnvVar) -> Result<Option<String>, CompilationError> {
        match &var.type_ {
            EnvVarType::Static => Ok(Some(var.value.clone())),
            EnvVarType::External => self.resolve_external(var),
            EnvVarType::Linked => self.resolve_linked(var).map(Some),
            EnvVarType::Other(t) => {
                warn!(env = %var.name, type_ = %t, "Unknown env type, skipping");
                Ok(None)
            }
        }
    }

    /// The shared entry is named by the value, or by the env name when the value is empty
    fn resolve_external(&self, var: &EnvVar) -> Result<Option<String>, CompilationError> {
        let key = if var.value.is_empty() {
            var.name.as_str()
        } else {
            var.value.as_str()
        };

        let Some(shared) = self.shared_env.iter().find(|s| s.name == key) else {
            warn!(env = %var.name, shared = %key, "Shared env not found, skipping");
            return Ok(None);
        };

        match &shared.type_ {
            EnvVarType::Static => Ok(Some(shared.value.clone())),
            EnvVarType::Linked => self.resolve_linked(shared).map(Some),
            other => {
                warn!(
                    env = %var.name,
                    shared = %key,
                    type_ = %other,
                    "Shared env cannot reference another shared env, skipping"
                );
                Ok(None)
            }
        }
    }

    fn resolve_linked(&self, var: &EnvVar) -> Result<String, CompilationError> {
        let malformed = || CompilationError::MalformedLink {
            env: var.name.clone(),
            value: var.value.clone(),
        };

        let mut parts = var.value.split('/');
        let (component, port_name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(c), Some(p), None) if !c.is_empty() && !p.is_empty() => (c, p),
            _ => return Err(malformed()),
        };

        let svc_name = service_name(self.app_name, component);
        let service = self
            .services
            .get(&svc_name)
            .ok_or_else(|| CompilationError::UnknownService {
                env: var.name.clone(),
                service: svc_name.clone(),
            })?;

        let port = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| ports.iter().find(|p| p.name.as_deref() == Some(port_name)))
            .ok_or_else(|| CompilationError::UnknownPort {
                env: var.name.clone(),
                service: svc_name.clone(),
                port: port_name.to_string(),
            })?;

        Ok(format!(
            "{}{}.{}:{}{}",
            var.prefix.as_deref().unwrap_or_default(),
            svc_name,
            self.namespace,
            port.port,
            var.suffix.as_deref().unwrap_or_default()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use kube::api::ObjectMeta;

    fn env(name: &str, type_: EnvVarType, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            type_,
            value: value.to_string(),
            ..Default::default()
        }
    }

    fn services() -> BTreeMap<String, Service> {
        let svc = Service {
            metadata: ObjectMeta {
                name: Some("svc-shop-api".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: 8080,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        BTreeMap::from([("svc-shop-api".to_string(), svc)])
    }

    #[test]
    fn static_values_pass_through() {
        let services = services();
        let resolver = EnvResolver::new("shop", "shop", &[], &services);
        let out = resolver
            .resolve_all(&[env("MODE", EnvVarType::Static, "prod")])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "MODE");
        assert_eq!(out[0].value.as_deref(), Some("prod"));
    }

    /// Story: a web frontend learns its API address from the api component's
    /// Service, with a scheme prefix and a path suffix.
    #[test]
    fn story_linked_env_resolves_to_sibling_service_address() {
        let services = services();
        let resolver = EnvResolver::new("shop", "shop", &[], &services);
        let mut var = env("API_URL", EnvVarType::Linked, "api/http");
        var.prefix = Some("http://".to_string());
        var.suffix = Some("/v1".to_string());

        assert_eq!(
            resolver.resolve(&var).unwrap().as_deref(),
            Some("http://svc-shop-api.shop:8080/v1")
        );
    }

    #[test]
    fn linked_env_without_separator_is_a_hard_error() {
        let services = services();
        let resolver = EnvResolver::new("shop", "shop", &[], &services);
        for value in ["api", "", "api/http/extra", "/http", "api/"] {
            let err = resolver
                .resolve_all(&[env("API_ADDR", EnvVarType::Linked, value)])
                .unwrap_err();
            assert!(
                matches!(err, CompilationError::MalformedLink { .. }),
                "{value:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn linked_env_to_missing_service_or_port_fails() {
        let services = services();
        let resolver = EnvResolver::new("shop", "shop", &[], &services);

        let err = resolver
            .resolve(&env("DB", EnvVarType::Linked, "db/sql"))
            .unwrap_err();
        assert_eq!(
            err,
            CompilationError::UnknownService {
                env: "DB".to_string(),
                service: "svc-shop-db".to_string(),
            }
        );

        let err = resolver
            .resolve(&env("API", EnvVarType::Linked, "api/grpc"))
            .unwrap_err();
        assert!(matches!(err, CompilationError::UnknownPort { .. }));
    }

    #[test]
    fn external_env_missing_from_shared_env_is_omitted() {
        let services = services();
        let resolver = EnvResolver::new("shop", "shop", &[], &services);
        let out = resolver
            .resolve_all(&[
                env("REGION", EnvVarType::External, "region"),
                env("MODE", EnvVarType::Static, "prod"),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "MODE");
    }

    #[test]
    fn external_env_reads_static_and_linked_shared_entries() {
        let services = services();
        let shared = vec![
            env("region", EnvVarType::Static, "eu-west-1"),
            env("api", EnvVarType::Linked, "api/http"),
            env("nested", EnvVarType::External, "region"),
        ];
        let resolver = EnvResolver::new("shop", "shop", &shared, &services);

        assert_eq!(
            resolver
                .resolve(&env("REGION", EnvVarType::External, "region"))
                .unwrap()
                .as_deref(),
            Some("eu-west-1")
        );
        assert_eq!(
            resolver
                .resolve(&env("API", EnvVarType::External, "api"))
                .unwrap()
                .as_deref(),
            Some("svc-shop-api.shop:8080")
        );
        // one level deep only
        assert_eq!(
            resolver
                .resolve(&env("NESTED", EnvVarType::External, "nested"))
                .unwrap(),
            None
        );
    }

    #[test]
    fn external_env_with_empty_value_uses_its_own_name() {
        let services = services();
        let shared = vec![env("region", EnvVarType::Static, "eu-west-1")];
        let resolver = EnvResolver::new("shop", "shop", &shared, &services);
        assert_eq!(
            resolver
                .resolve(&env("region", EnvVarType::External, ""))
                .unwrap()
                .as_deref(),
            Some("eu-west-1")
        );
    }

    #[test]
    fn unknown_env_types_are_skipped() {
        let services = services();
        let resolver = EnvResolver::new("shop", "shop", &[], &services);
        let out = resolver
            .resolve_all(&[env("X", EnvVarType::Other("secret".to_string()), "x")])
            .unwrap();
        assert!(out.is_empty());
    }
}
