//! Service definitions, contexts, and the plug protocol.
//!
//! A service is registered as an async start function `(Context) -> value`
//! plus an optional async stop function `(value) -> ()`. Values are
//! type-erased behind [`ServiceInstance`] and recovered through the guarded
//! typed accessors.

mod context;
mod definition;
mod plug;

pub use context::Context;
pub use definition::{service, stopper, NamedService, NamedStopper, ServiceInstance};
pub use plug::Plug;

pub(crate) use definition::{ServiceDefinition, StartFn, StopFn};
