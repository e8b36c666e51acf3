//! NewDep Kubernetes Operator
//!
//! This operator keeps a Deployment in sync with each NewDep custom
//! resource and reports the applied replica count back on its status.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
