//! Seams to the externally-owned collaborators: float configuration, the
//! best-effort cache, fire-and-forget event publication and the synchronous
//! accrual distributor. The defaults here run in-process; deployments swap in
//! network-backed implementations behind the same traits.

mod cache;
mod config_source;
mod distributor;
mod publisher;

pub use cache::*;
pub use config_source::*;
pub use distributor::*;
pub use publisher::*;
