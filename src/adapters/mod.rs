//! Adapters between the reconciler and the cluster: state store access and
//! event recording

mod events;
mod store;

pub use events::*;
pub use store::*;
