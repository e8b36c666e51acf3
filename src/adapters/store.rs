//! State store access for NewDep and its managed Deployment
//!
//! The reconciler only talks to the cluster through [`DeploymentStore`], so it
//! can run against the API server in production and an in-memory store in
//! tests.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    api::PostParams,
    runtime::reflector::{Lookup, ObjectRef},
    Api, Client, Resource, ResourceExt,
};

use crate::crd::NewDep;
use crate::error::{Error, Result};

/// Namespace and name of a NewDep; its Deployment shares the same identity
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    pub namespace: String,
    pub name: String,
}

impl ObjectIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a NewDep delivered by the controller
    pub fn from_resource(new_dep: &NewDep) -> Self {
        Self::new(
            ResourceExt::namespace(new_dep).unwrap_or_else(|| "default".to_string()),
            new_dep.name_any(),
        )
    }

    /// Reference to the NewDep, used as the subject of recorded events
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(<NewDep as Resource>::api_version(&()).to_string()),
            kind: Some(<NewDep as Resource>::kind(&()).to_string()),
            namespace: Some(self.namespace.clone()),
            name: Some(self.name.clone()),
            ..Default::default()
        }
    }
}

/// Accepts typed and type-erased references; the controller runtime reports
/// missing objects with the latter
impl<K: Lookup + ?Sized> From<&ObjectRef<K>> for ObjectIdentity {
    fn from(obj: &ObjectRef<K>) -> Self {
        Self::new(
            obj.namespace.clone().unwrap_or_else(|| "default".to_string()),
            obj.name.clone(),
        )
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reads and writes against the cluster state backend.
///
/// Lookups return `Ok(None)` when the object does not exist; every other
/// failure is an error. Writes rely on the API server's optimistic
/// concurrency, so a stale `resourceVersion` surfaces as a 409 error.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Fetch the NewDep with the given identity
    async fn get_new_dep(&self, id: &ObjectIdentity) -> Result<Option<NewDep>>;

    /// Fetch the Deployment with the given identity
    async fn get_deployment(&self, id: &ObjectIdentity) -> Result<Option<Deployment>>;

    /// Create a Deployment
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Replace a whole Deployment
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Replace the status subresource of a NewDep
    async fn replace_new_dep_status(&self, new_dep: &NewDep) -> Result<NewDep>;
}

/// [`DeploymentStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn new_deps(&self, namespace: &str) -> Api<NewDep> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Name and namespace of an object about to be written
fn write_target<K: Resource>(obj: &K) -> Result<(String, String)> {
    let meta = obj.meta();
    let name = meta.name.clone().ok_or(Error::MissingObjectKey("name"))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or(Error::MissingObjectKey("namespace"))?;
    Ok((namespace, name))
}

#[async_trait]
impl DeploymentStore for KubeStore {
    async fn get_new_dep(&self, id: &ObjectIdentity) -> Result<Option<NewDep>> {
        Ok(self.new_deps(&id.namespace).get_opt(&id.name).await?)
    }

    async fn get_deployment(&self, id: &ObjectIdentity) -> Result<Option<Deployment>> {
        Ok(self.deployments(&id.namespace).get_opt(&id.name).await?)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let (namespace, _) = write_target(deployment)?;
        Ok(self
            .deployments(&namespace)
            .create(&PostParams::default(), deployment)
            .await?)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let (namespace, name) = write_target(deployment)?;
        Ok(self
            .deployments(&namespace)
            .replace(&name, &PostParams::default(), deployment)
            .await?)
    }

    async fn replace_new_dep_status(&self, new_dep: &NewDep) -> Result<NewDep> {
        let (namespace, name) = write_target(new_dep)?;
        let body = serde_json::to_vec(new_dep)?;
        Ok(self
            .new_deps(&namespace)
            .replace_status(&name, &PostParams::default(), body)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NewDepSpec;
    use kube::core::{ApiResource, DynamicObject};

    #[test]
    fn object_reference_points_at_new_dep() {
        let id = ObjectIdentity::new("apps", "web");
        let reference = id.object_reference();

        assert_eq!(reference.api_version.as_deref(), Some("apps.newcrd.com/v1beta1"));
        assert_eq!(reference.kind.as_deref(), Some("NewDep"));
        assert_eq!(reference.namespace.as_deref(), Some("apps"));
        assert_eq!(reference.name.as_deref(), Some("web"));
        assert_eq!(id.to_string(), "apps/web");
    }

    #[test]
    fn identity_defaults_namespace() {
        let nd = NewDep::new(
            "web",
            NewDepSpec {
                replica: 1,
                image: "nginx".to_string(),
            },
        );
        assert_eq!(ObjectIdentity::from_resource(&nd), ObjectIdentity::new("default", "web"));
    }

    #[test]
    fn identity_from_object_refs() {
        let typed = ObjectRef::<NewDep>::new("web").within("apps");
        assert_eq!(ObjectIdentity::from(&typed), ObjectIdentity::new("apps", "web"));

        let erased = ObjectRef::<DynamicObject>::new_with("web", ApiResource::erase::<NewDep>(&()))
            .within("apps");
        assert_eq!(ObjectIdentity::from(&erased), ObjectIdentity::new("apps", "web"));

        let cluster_scoped = ObjectRef::<NewDep>::new("web");
        assert_eq!(
            ObjectIdentity::from(&cluster_scoped),
            ObjectIdentity::new("default", "web")
        );
    }

    #[test]
    fn write_target_requires_namespace() {
        let nd = NewDep::new(
            "web",
            NewDepSpec {
                replica: 1,
                image: "nginx".to_string(),
            },
        );
        assert!(matches!(
            write_target(&nd),
            Err(Error::MissingObjectKey("namespace"))
        ));
    }
}
