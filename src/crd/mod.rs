//! Custom Resource Definitions for the NewDep Operator

mod new_dep;

pub use new_dep::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&NewDep::crd())?])
}
