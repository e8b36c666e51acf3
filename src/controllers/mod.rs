//! Kubernetes controllers for NewDep CRDs
//!
//! This module contains the controller implementations that watch for CRD changes
//! and trigger reconciliation.

mod backoff;
mod new_dep_controller;

pub use backoff::{backoff_delay, Backoff};
pub use new_dep_controller::run as run_new_dep_controller;

use kube::Client;

use crate::adapters::{KubeEventRecorder, KubeStore};
use crate::config::OperatorConfig;

/// Shared context for all controllers
pub struct Context {
    /// State store used by the reconciler
    pub store: KubeStore,

    /// Event sink used by the reconciler
    pub recorder: KubeEventRecorder,

    /// Operator configuration
    pub config: OperatorConfig,

    /// Retry delays for failing objects
    pub backoff: Backoff,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            store: KubeStore::new(client.clone()),
            recorder: KubeEventRecorder::new(client),
            backoff: Backoff::new(config.error_backoff_base, config.error_backoff_max),
            config,
        }
    }
}
