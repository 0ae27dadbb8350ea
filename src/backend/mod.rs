//! Service backends
//!
//! A backend wraps one streaming service. Backends are registered by name in
//! a [`BackendRegistry`] together with a [`BackendFactory`] and a list of
//! account settings; the registry builds at most one instance per
//! `(name, account)` and hands out shared handles.
//!
//! - [`Backend`]: metadata lookups, download descriptors, covers, lyrics, credits
//! - [`BackendFactory`]: builds authenticated instances from a [`BackendContext`]
//! - [`BackendRegistry`]: name resolution, capability checks, URL routing

mod registry;
mod traits;

pub use registry::BackendRegistry;
pub use traits::{Backend, BackendContext, BackendDescriptor, BackendFactory, TrackQuery};
