//! Session management.
//!
//! A [`Session`] pairs one agent connection with its metadata. The
//! [`SessionRegistry`] tracks active sessions behind a lock, and the
//! [`Controller`] drives it: one periodic task accepts new agents, another
//! probes every session and drops those that no longer answer.
//!
//! # See Also
//!
//! - [`scheduler`](crate::scheduler): The periodic tasks behind accept and reap.
mod controller;
mod registry;
#[allow(clippy::module_inception)]
mod session;

pub use controller::{Controller, ControllerConfig, ControllerError, Hooks, SessionHook};
pub use registry::SessionRegistry;
pub use session::Session;
