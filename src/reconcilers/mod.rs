//! Reconcilers for NewDep CRDs
//!
//! This module contains the business logic for reconciling each CRD type.
//! Reconcilers are responsible for:
//! - Validating CRD specs
//! - Creating and updating managed Deployments
//! - Updating resource status

pub mod new_dep;
