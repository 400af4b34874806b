//! Lifecycle events published by the registry and its traversals.
//!
//! Every observable step of the orchestrator — registry start/stop, per-service
//! initialization and destruction, plugin merges, shutdown progress — is
//! published as an [`Event`] on the [`Bus`] and fanned out to subscribers.
//!
//! ```text
//! Traversal ── publish(Event) ──► Bus ──► forwarder ──► SubscriberSet
//!                                              │
//!                                              └──► raw receivers (tests, tooling)
//! ```

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
