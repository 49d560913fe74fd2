//! In-process registry of local capability instances.
//!
//! The registry holds at most one LOCAL descriptor per capability together
//! with the instance serving it. Remote instances are tracked by discovery,
//! never here.

pub mod local_registry;

pub use local_registry::LocalRegistry;
