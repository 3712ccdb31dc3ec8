//! Kubernetes Event recording for the Application controller.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so reconcile logic
//! can be exercised without an API server. Publishing is fire-and-forget: a
//! failed event is logged and never fails a reconciliation pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about a resource
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production publisher backed by a `Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Cleanup finalizer attached on first reconcile
    pub const FINALIZER_ADDED: &str = "FinalizerAdded";
    /// A component waits for a dependency to become ready
    pub const COMPONENT_DEFERRED: &str = "ComponentDeferred";
    /// A linked env var could not be resolved
    pub const RESOLUTION_FAILED: &str = "ResolutionFailed";
    /// All rollable components were applied
    pub const COMPONENTS_RECONCILED: &str = "ComponentsReconciled";
    /// Every child artifact was deleted
    pub const TEARDOWN_COMPLETE: &str = "TeardownComplete";
    /// Cleanup finalizer removed, deletion may proceed
    pub const FINALIZER_REMOVED: &str = "FinalizerRemoved";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Regular reconciliation
    pub const RECONCILE: &str = "Reconcile";
    /// Child teardown
    pub const TEARDOWN: &str = "Teardown";
    /// Deletion handling
    pub const DELETE: &str = "Delete";
}
