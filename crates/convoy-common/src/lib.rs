//! Shared types for convoy: the Application CRD, errors, and Kubernetes helpers

pub mod crd;
pub mod error;
pub mod events;
pub mod files;
pub mod kube_utils;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer guarding child teardown before an Application is removed
pub const APPLICATION_FINALIZER: &str = "convoy.dev/cleanup";

/// Field manager used for every write the controller makes
pub const FIELD_MANAGER: &str = "convoy-application-controller";

/// Default ConfigMap backing the file store
pub const DEFAULT_FILES_CONFIG_MAP: &str = "convoy-files";
