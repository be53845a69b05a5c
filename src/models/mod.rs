//! Pool specification model
//!
//! Immutable value types built through validating builders. Everything here is
//! structurally comparable and serializable so a spec can be copied into a
//! running pool without aliasing the caller's value.

mod access;
mod hardware;
mod machine;
mod network;
mod pool;
mod provider;
mod software;

pub use access::*;
pub use hardware::*;
pub use machine::*;
pub use network::*;
pub use pool::*;
pub use provider::*;
pub use software::*;
