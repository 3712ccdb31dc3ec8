//! Component build errors
//!
//! Only linked env resolution can fail a component build outright. Every
//! other gap (missing shared env, unresolved config path, unknown volume
//! type) is logged and skipped by the step that finds it.

use thiserror::Error;

/// Hard failure while building a component's desired state
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompilationError {
    /// A linked value is not of the form `<component>/<port>`
    #[error("env {env}: linked value '{value}' is not of the form <component>/<port>")]
    MalformedLink {
        /// Env var name
        env: String,
        /// Raw value as declared
        value: String,
    },

    /// The referenced component has no Service
    #[error("env {env}: service {service} does not exist")]
    UnknownService {
        /// Env var name
        env: String,
        /// Derived Service name that was looked up
        service: String,
    },

    /// The referenced Service has no port with that name
    #[error("env {env}: service {service} has no port named {port}")]
    UnknownPort {
        /// Env var name
        env: String,
        /// Service that was found
        service: String,
        /// Port name that was looked up
        port: String,
    },
}

impl CompilationError {
    /// Attach the component being built, producing the controller error
    pub fn for_component(self, component: &str) -> convoy_common::Error {
        convoy_common::Error::resolution(component, self.to_string())
    }
}
