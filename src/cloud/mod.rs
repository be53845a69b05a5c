//! Cloud provider ports
//!
//! Reconcilers talk to a provider through the traits in [`api`]. Each backend
//! maps its native failures onto [`ProviderError`] so that callers can tell
//! "already exists" and "not found" apart from real failures.

pub mod api;
pub mod cache;
pub mod error;
pub mod memory;
pub mod types;

pub use api::{CloudClient, InstanceApi, KeyPairApi, NetworkApi, SecurityGroupApi};
#[cfg(test)]
pub use api::{MockInstanceApi, MockKeyPairApi, MockNetworkApi, MockSecurityGroupApi};
pub use cache::{ClientCache, ClientFactory};
pub use error::{ProviderError, ProviderErrorKind, ProviderResult};
pub use memory::{InMemoryCloud, LaunchRecord, Operation};
pub use types::*;
