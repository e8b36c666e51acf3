//! NewDep Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// NewDep resource specification
///
/// Declares a replicated workload; the operator keeps a Deployment of the
/// same name in sync with it.
#[derive(CustomResource, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.newcrd.com",
    version = "v1beta1",
    kind = "NewDep",
    plural = "newdeps",
    singular = "newdep",
    shortname = "nd",
    namespaced,
    status = "NewDepStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Replicas", "type": "integer", "jsonPath": ".spec.replica"}"#,
    printcolumn = r#"{"name": "Real", "type": "integer", "jsonPath": ".status.realReplica"}"#,
    printcolumn = r#"{"name": "Image", "type": "string", "jsonPath": ".spec.image"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NewDepSpec {
    /// Number of replicas for the managed Deployment
    #[schemars(range(min = 0))]
    pub replica: i32,

    /// Container image for the managed Deployment
    pub image: String,
}

/// NewDep status, written through the status subresource only
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewDepStatus {
    /// Replica count last applied to the managed Deployment
    #[serde(default)]
    pub real_replica: i32,
}

impl NewDep {
    /// Replica count currently recorded in status, if any
    pub fn real_replica(&self) -> Option<i32> {
        self.status.as_ref().map(|s| s.real_replica)
    }

    /// Whether status already reflects the requested replica count
    pub fn status_in_sync(&self) -> bool {
        self.real_replica() == Some(self.spec.replica)
    }
}
