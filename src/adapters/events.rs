//! Kubernetes Event recording
//!
//! Events are fire-and-forget: a failed publish is logged and dropped, it
//! never changes the outcome of a reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Reporting component shown on published Events
pub const REPORTER: &str = "newdep-operator";

/// Action recorded on every Event
const ACTION: &str = "Reconcile";

/// Sink for operator-visible Events
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record an event about `subject`. Never fails.
    async fn record(&self, subject: &ObjectReference, type_: EventType, reason: &str, note: String);
}

/// [`EventRecorder`] publishing through `kube::runtime::events::Recorder`
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: REPORTER.into(),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, subject: &ObjectReference, type_: EventType, reason: &str, note: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), subject.clone());
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: ACTION.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(
                reason,
                name = subject.name.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Event reason codes, shown under REASON in `kubectl get events`
pub mod reasons {
    /// Managed Deployment created
    pub const SUCCESS_CREATE_DEPLOYMENT: &str = "SuccessCreateDeployment";
    /// Managed Deployment could not be created
    pub const FAILED_CREATE_DEPLOYMENT: &str = "FailedCreateDeployment";
    /// Managed Deployment brought back in line with the NewDep
    pub const SUCCESS_UPDATE_DEPLOYMENT: &str = "SuccessUpdateDeployment";
    /// Managed Deployment could not be updated
    pub const FAILED_UPDATE_DEPLOYMENT: &str = "FailedUpdateDeployment";
    /// NewDep status could not be written
    pub const FAILED_UPDATE_STATUS: &str = "FailedUpdateStatus";
    /// NewDep could not be read
    pub const FAILED_GET_NEW_DEP: &str = "FailedGetNewDep";
    /// Managed Deployment could not be read
    pub const FAILED_GET_DEPLOYMENT: &str = "FailedGetDeployment";
    /// NewDep spec rejected
    pub const INVALID_SPEC: &str = "InvalidSpec";
    /// Managed Deployment has a shape the operator cannot reconcile
    pub const INVALID_DEPLOYMENT: &str = "InvalidDeployment";
}
