//! NewDep reconciler
//!
//! Drives the Deployment owned by a NewDep towards the NewDep's spec:
//! - Spec validation
//! - Deployment creation with a controller owner reference
//! - Replica and image drift correction
//! - Status updates through the status subresource
//!
//! Every decision is re-derived from the current store state, so running the
//! same reconciliation twice converges to the same result.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, ObjectReference, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{
    runtime::{controller::Action, events::EventType},
    Resource, ResourceExt,
};
use tracing::{debug, info, warn};

use crate::adapters::{reasons, DeploymentStore, EventRecorder, ObjectIdentity};
use crate::crd::{NewDep, NewDepStatus};
use crate::error::{Error, Result};
use crate::metrics;

/// Label key shared by the Deployment selector and its pod template
pub const APP_LABEL: &str = "app";

/// Port exposed by the managed container
pub const CONTAINER_PORT: i32 = 80;

/// Validate the NewDep spec
pub fn validate(new_dep: &NewDep) -> Result<()> {
    if new_dep.spec.replica < 0 {
        return Err(Error::validation(format!(
            "Invalid replica count {}: must not be negative",
            new_dep.spec.replica
        )));
    }

    if new_dep.spec.image.trim().is_empty() {
        return Err(Error::validation("A container image must be specified"));
    }

    Ok(())
}

/// Selector and pod labels for the Deployment managed on behalf of `name`
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), name.to_string())])
}

/// Build the Deployment for a NewDep.
///
/// The controller owner reference is attached here, before the object is
/// ever sent to the API server.
pub fn build_deployment(new_dep: &NewDep) -> Result<Deployment> {
    let name = new_dep.name_any();
    let owner = new_dep
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("uid"))?;
    let labels = selector_labels(&name);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: new_dep.namespace(),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(new_dep.spec.replica),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.clone(),
                        image: Some(new_dep.spec.image.clone()),
                        ports: Some(vec![ContainerPort {
                            name: Some(name),
                            protocol: Some("TCP".to_string()),
                            container_port: CONTAINER_PORT,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Fields of a live Deployment that differ from the NewDep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Drift {
    /// Live replica count, when it differs
    pub replicas: Option<Option<i32>>,
    /// Live image of the first container, when it differs
    pub image: Option<Option<String>>,
}

impl Drift {
    pub fn is_empty(&self) -> bool {
        self.replicas.is_none() && self.image.is_none()
    }
}

/// The container whose image the operator manages
fn managed_container(deployment: &Deployment) -> Result<&Container> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .ok_or_else(|| {
            Error::precondition(format!(
                "Deployment '{}' has no containers",
                deployment.name_any()
            ))
        })
}

/// Compare a live Deployment against the NewDep spec.
///
/// Only the first container is inspected; a Deployment without containers is
/// a precondition failure.
pub fn detect_drift(deployment: &Deployment, new_dep: &NewDep) -> Result<Drift> {
    let container = managed_container(deployment)?;
    let live_replicas = deployment.spec.as_ref().and_then(|spec| spec.replicas);

    let mut drift = Drift::default();
    if live_replicas != Some(new_dep.spec.replica) {
        drift.replicas = Some(live_replicas);
    }
    if container.image.as_deref() != Some(new_dep.spec.image.as_str()) {
        drift.image = Some(container.image.clone());
    }
    Ok(drift)
}

/// Overwrite replicas and the first container's image with the NewDep spec
pub fn apply_spec(deployment: &mut Deployment, new_dep: &NewDep) -> Result<()> {
    let name = deployment.name_any();
    let spec = deployment
        .spec
        .as_mut()
        .ok_or_else(|| Error::precondition(format!("Deployment '{}' has no spec", name)))?;
    let container = spec
        .template
        .spec
        .as_mut()
        .and_then(|pod| pod.containers.first_mut())
        .ok_or_else(|| Error::precondition(format!("Deployment '{}' has no containers", name)))?;

    container.image = Some(new_dep.spec.image.clone());
    spec.replicas = Some(new_dep.spec.replica);
    Ok(())
}

/// Action returned when nothing is left to do
fn settled(resync: Option<Duration>) -> Action {
    match resync {
        Some(interval) => Action::requeue(interval),
        None => Action::await_change(),
    }
}

/// Reconcile the NewDep identified by `id`.
///
/// Errors returned here go to the controller's error policy for a requeue.
/// A missing or unreadable NewDep and an invalid spec are not errors: they
/// are reported and end the reconciliation with an idle action.
pub async fn reconcile<S, R>(
    id: &ObjectIdentity,
    store: &S,
    recorder: &R,
    resync: Option<Duration>,
) -> Result<Action>
where
    S: DeploymentStore + ?Sized,
    R: EventRecorder + ?Sized,
{
    let mut new_dep = match store.get_new_dep(id).await {
        Ok(Some(new_dep)) => new_dep,
        Ok(None) => {
            debug!(name = %id.name, namespace = %id.namespace, "NewDep not found, nothing to do");
            return Ok(Action::await_change());
        }
        Err(e) => {
            warn!(name = %id.name, namespace = %id.namespace, error = %e, "Failed to get NewDep");
            recorder
                .record(
                    &id.object_reference(),
                    EventType::Warning,
                    reasons::FAILED_GET_NEW_DEP,
                    e.to_string(),
                )
                .await;
            return Ok(Action::await_change());
        }
    };
    let subject = new_dep.object_ref(&());

    if let Err(e) = validate(&new_dep) {
        warn!(name = %id.name, namespace = %id.namespace, error = %e, "Validation failed");
        recorder
            .record(&subject, EventType::Warning, reasons::INVALID_SPEC, e.to_string())
            .await;
        return Ok(Action::await_change());
    }

    let deployment = match store.get_deployment(id).await {
        Ok(deployment) => deployment,
        Err(e) => {
            return Err(fail(recorder, &subject, reasons::FAILED_GET_DEPLOYMENT, e).await);
        }
    };

    match deployment {
        None => create(id, &mut new_dep, &subject, store, recorder).await?,
        Some(deployment) => {
            converge(id, &mut new_dep, deployment, &subject, store, recorder).await?
        }
    }

    Ok(settled(resync))
}

/// Create the Deployment and record the applied replica count in status
async fn create<S, R>(
    id: &ObjectIdentity,
    new_dep: &mut NewDep,
    subject: &ObjectReference,
    store: &S,
    recorder: &R,
) -> Result<()>
where
    S: DeploymentStore + ?Sized,
    R: EventRecorder + ?Sized,
{
    info!(name = %id.name, namespace = %id.namespace, "Deployment not found, creating");

    let deployment = match build_deployment(new_dep) {
        Ok(deployment) => deployment,
        Err(e) => return Err(fail(recorder, subject, reasons::FAILED_CREATE_DEPLOYMENT, e).await),
    };
    if let Err(e) = store.create_deployment(&deployment).await {
        return Err(fail(recorder, subject, reasons::FAILED_CREATE_DEPLOYMENT, e).await);
    }

    metrics::DEPLOYMENTS_CREATED
        .with_label_values(&[id.namespace.as_str()])
        .inc();
    recorder
        .record(
            subject,
            EventType::Normal,
            reasons::SUCCESS_CREATE_DEPLOYMENT,
            format!("success create deployment: {}", id.name),
        )
        .await;

    update_status(id, new_dep, subject, store, recorder).await
}

/// Bring status and an existing Deployment in line with the NewDep spec
async fn converge<S, R>(
    id: &ObjectIdentity,
    new_dep: &mut NewDep,
    mut deployment: Deployment,
    subject: &ObjectReference,
    store: &S,
    recorder: &R,
) -> Result<()>
where
    S: DeploymentStore + ?Sized,
    R: EventRecorder + ?Sized,
{
    if !new_dep.status_in_sync() {
        update_status(id, new_dep, subject, store, recorder).await?;
    }

    let drift = match detect_drift(&deployment, new_dep) {
        Ok(drift) => drift,
        Err(e) => return Err(fail(recorder, subject, reasons::INVALID_DEPLOYMENT, e).await),
    };
    if drift.is_empty() {
        debug!(name = %id.name, namespace = %id.namespace, "Deployment up to date");
        return Ok(());
    }

    info!(
        name = %id.name,
        namespace = %id.namespace,
        live_replicas = ?drift.replicas,
        live_image = ?drift.image,
        replicas = new_dep.spec.replica,
        image = %new_dep.spec.image,
        "Deployment drifted, updating"
    );

    apply_spec(&mut deployment, new_dep)?;
    if let Err(e) = store.replace_deployment(&deployment).await {
        return Err(fail(recorder, subject, reasons::FAILED_UPDATE_DEPLOYMENT, e).await);
    }

    metrics::DEPLOYMENTS_UPDATED
        .with_label_values(&[id.namespace.as_str()])
        .inc();
    recorder
        .record(
            subject,
            EventType::Normal,
            reasons::SUCCESS_UPDATE_DEPLOYMENT,
            format!(
                "success update deployment: {} (replicas={}, image={})",
                id.name, new_dep.spec.replica, new_dep.spec.image
            ),
        )
        .await;
    Ok(())
}

/// Write `status.realReplica` through the status subresource
async fn update_status<S, R>(
    id: &ObjectIdentity,
    new_dep: &mut NewDep,
    subject: &ObjectReference,
    store: &S,
    recorder: &R,
) -> Result<()>
where
    S: DeploymentStore + ?Sized,
    R: EventRecorder + ?Sized,
{
    new_dep.status = Some(NewDepStatus {
        real_replica: new_dep.spec.replica,
    });

    match store.replace_new_dep_status(new_dep).await {
        Ok(_) => {
            metrics::STATUS_UPDATES
                .with_label_values(&[id.namespace.as_str()])
                .inc();
            Ok(())
        }
        Err(e) => Err(fail(recorder, subject, reasons::FAILED_UPDATE_STATUS, e).await),
    }
}

/// Record a Warning event for `error` and hand the error back
async fn fail<R>(recorder: &R, subject: &ObjectReference, reason: &str, error: Error) -> Error
where
    R: EventRecorder + ?Sized,
{
    warn!(
        reason,
        name = subject.name.as_deref().unwrap_or_default(),
        conflict = error.is_conflict(),
        error = %error,
        "Reconciliation step failed"
    );
    recorder
        .record(subject, EventType::Warning, reason, error.to_string())
        .await;
    error
}
