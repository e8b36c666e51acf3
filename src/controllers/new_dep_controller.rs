//! NewDep controller
//!
//! Watches NewDep resources and the Deployments they own, and triggers
//! reconciliation.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller, Error as ControllerError},
        reflector::ObjectRef,
        watcher::{self, Config as WatcherConfig},
    },
    Api, Client, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::ObjectIdentity;
use crate::controllers::{Backoff, Context};
use crate::crd::NewDep;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::new_dep as new_dep_reconciler;

const KIND: &str = "NewDep";

/// Run the NewDep controller
pub async fn run(client: Client, context: Arc<Context>) {
    let (new_deps, deployments): (Api<NewDep>, Api<Deployment>) =
        match context.config.watch_namespace.as_deref() {
            Some(namespace) => (
                Api::namespaced(client.clone(), namespace),
                Api::namespaced(client.clone(), namespace),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };

    // Verify CRD is installed
    if let Err(e) = new_deps.list(&ListParams::default().limit(1)).await {
        error!("NewDep CRD not installed: {}", e);
        return;
    }

    info!(
        namespace = context.config.watch_namespace.as_deref().unwrap_or("*"),
        "Starting NewDep controller"
    );

    Controller::new(new_deps, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context.clone())
        .for_each(|result| {
            let context = context.clone();
            async move { handle_result(result, &context.backoff) }
        })
        .await;
}

type ReconcileResult =
    std::result::Result<(ObjectRef<NewDep>, Action), ControllerError<Error, watcher::Error>>;

/// Log the outcome of one reconciliation.
///
/// The runtime never reconciles an object that has left its cache, so retry
/// state for deleted NewDeps is dropped here.
fn handle_result(result: ReconcileResult, backoff: &Backoff) {
    match result {
        Ok((obj, _action)) => {
            info!(
                name = %obj.name,
                namespace = obj.namespace.as_deref().unwrap_or("default"),
                "Reconciled NewDep"
            );
        }
        Err(ControllerError::ObjectNotFound(obj_ref)) => {
            let id = ObjectIdentity::from(&obj_ref);
            debug!(name = %id.name, namespace = %id.namespace, "NewDep gone, dropping retry state");
            backoff.reset(&id);
        }
        Err(e) => {
            error!(error = %e, "Reconciliation error");
        }
    }
}

/// Main reconciliation function
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<NewDep>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let id = ObjectIdentity::from_resource(&obj);
    let action = new_dep_reconciler::reconcile(
        &id,
        &ctx.store,
        &ctx.recorder,
        ctx.config.resync_interval,
    )
    .await?;

    ctx.backoff.reset(&id);
    Ok(action)
}

/// Error policy for the controller
fn error_policy(obj: Arc<NewDep>, error: &Error, ctx: Arc<Context>) -> Action {
    metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();

    let id = ObjectIdentity::from_resource(&obj);
    let requeue_after = if error.is_retryable() {
        ctx.backoff.next_delay(&id)
    } else {
        ctx.backoff.max_delay()
    };

    if error.is_conflict() {
        warn!(name = %id.name, namespace = %id.namespace, "Write conflict, retrying with fresh state");
    }
    error!(
        name = %id.name,
        namespace = %id.namespace,
        error = %error,
        retryable = error.is_retryable(),
        requeue_secs = requeue_after.as_secs(),
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_after)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn deleted_objects_drop_their_retry_state() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(300));
        let web = ObjectIdentity::new("default", "web");
        let api = ObjectIdentity::new("default", "api");
        backoff.next_delay(&web);
        backoff.next_delay(&web);
        backoff.next_delay(&api);
        assert_eq!(backoff.tracked(), 2);

        let gone = ObjectRef::<NewDep>::new("web").within("default").erase();
        handle_result(Err(ControllerError::ObjectNotFound(gone)), &backoff);

        assert_eq!(backoff.tracked(), 1);
        assert_eq!(backoff.next_delay(&web), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(&api), Duration::from_secs(10));
    }

    #[test]
    fn successful_results_leave_retry_state_alone() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(300));
        backoff.next_delay(&ObjectIdentity::new("default", "api"));

        let done = ObjectRef::<NewDep>::new("web").within("default");
        handle_result(Ok((done, Action::await_change())), &backoff);

        assert_eq!(backoff.tracked(), 1);
    }
}
