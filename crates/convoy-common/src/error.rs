//! Error types for the convoy operator
//!
//! Variants carry the application or component they concern so log lines and
//! status messages can point at the offending object without extra context.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for convoy operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A component reference (linked env, sibling service, port) could not be resolved
    #[error("resolution error for component {component}: {message}")]
    Resolution {
        /// Component whose build step failed
        component: String,
        /// Description of what could not be resolved
        message: String,
    },

    /// Application spec is unusable as written
    #[error("validation error for {application}: {message}")]
    Validation {
        /// Name of the application with invalid configuration
        application: String,
        /// Description of what's invalid
        message: String,
    },

    /// A patch body could not be serialized
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a resolution error for a component
    pub fn resolution(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Resolution {
            component: component.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            application: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with application context
    pub fn validation_for(application: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            application: application.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Whether the controller should requeue after this error
    ///
    /// API rejections (4xx) will not fix themselves, except conflicts,
    /// throttling and missing objects which typically clear on the next pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || matches!(ae.code, 404 | 409 | 429)
                }
                _ => true,
            },
            Error::Resolution { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
        }
    }

    /// The component this error concerns, when there is one
    pub fn component(&self) -> Option<&str> {
        match self {
            Error::Resolution { component, .. } => Some(component),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
