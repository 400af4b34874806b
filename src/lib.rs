//! # servisor
//!
//! **Servisor** is a service lifecycle orchestrator for a single long-running
//! process: named service definitions are registered in ordered *levels*,
//! started ascending and stopped descending with configurable within-level
//! concurrency, wired together with forward references (*plugs*), composed
//! with independently built sub-registries (*plugins*), and wrapped in a
//! timeout-bounded graceful shutdown with a forced-termination fallback.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   up(L0: {a, b})   up(L1: {c})   mount(plugin)   up(L2: {d})
//!        │                │              │              │
//!        ▼                ▼              ▼              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Registry                                                         │
//! │  - definitions (declaration order, one level per up() call)       │
//! │  - plugin bindings (anchored at level boundaries)                 │
//! │  - ServiceMap (shared read view: name → running instance)         │
//! │  - Bus (broadcast events) ──► SubscriberSet ──► LogWriter / ...   │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//!   start():  L0 ─► merge due plugins ─► L1 ─► ... ─► Ln
//!   stop():   Ln ─► ... ─► L1 ─► teardown due plugins ─► L0
//! ```
//!
//! ### Lifecycle
//! ```text
//! start() traversal, per level:
//!   ├─► merge plugins bound before this level
//!   │     ├─ materialize (factory with read-only host context, or reuse)
//!   │     ├─ check every plugin key against host names (collision = fatal)
//!   │     ├─ run the sub-registry's own start()
//!   │     └─ copy definitions + instances into the host
//!   ├─► publish ServiceInitializing per definition
//!   ├─► parallel: all futures awaited together (join_all)
//!   │   sequential: strict declaration order
//!   └─► commit instances, resolve pending plug overrides, publish
//!       ServiceReady (or ServiceUnresolved for an unresolved plug)
//!
//! shutdown(reason):
//!   ├─► resolve grace period (warn + default 60s if unset)
//!   └─► race stop(reason) against the deadline
//!         ├─ stop wins, Ok  → return (or terminate(0) if configured)
//!         ├─ stop wins, Err → log, terminate(1)
//!         └─ deadline wins  → log timeout, terminate(1)
//! ```
//!
//! ## Features
//! | Area           | Description                                              | Key types                                 |
//! |----------------|----------------------------------------------------------|-------------------------------------------|
//! | **Registration** | Leveled definitions, groups, stop handlers.            | [`Registry`], [`service`], [`stopper`]    |
//! | **Traversal**  | Concurrent or sequential waves, bounded starts.          | [`Registry::start`], [`Registry::only`]   |
//! | **Plugs**      | Forward references resolved by a later override.         | [`Plug`], [`Context::plug`]               |
//! | **Plugins**    | Sub-registries merged at level boundaries.               | [`plugin`], [`Registry::mount`]           |
//! | **Shutdown**   | Signals, grace deadline, forced termination.             | [`Registry::launch`], [`ProcessHandle`]   |
//! | **Events**     | Broadcast lifecycle events, pluggable sinks.             | [`Event`], [`Subscribe`], [`LogWriter`]   |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use servisor::{service, stopper, Config, Context, Registry, ServiceError};
//!
//! struct Db;
//! struct Api {
//!     db: Arc<Db>,
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = Registry::new(Config::default());
//!
//!     registry.up([service("db", |ctx: Context| async move {
//!         ctx.log("connecting");
//!         Ok::<_, ServiceError>(Db)
//!     })])?;
//!
//!     registry.up([service("api", |ctx: Context| async move {
//!         let db: Arc<Db> = ctx.get("db")?;
//!         Ok(Api { db })
//!     })])?;
//!
//!     registry.down([stopper("api", |_api: Arc<Api>| async move { Ok(()) })])?;
//!
//!     registry.start().await?;
//!     let api: Arc<Api> = registry.get("api")?;
//!     let _ = &api.db;
//!     registry.stop(Some("example done")).await?;
//!     Ok(())
//! }
//! ```

mod core;
mod env;
mod error;
mod events;
mod services;
mod subscribers;

// ---- Public re-exports ----

pub use self::core::{
    plugin, Config, Lookup, OsProcess, PluginFactory, PluginSource, ProcessHandle, Registry,
    RegistryBuilder,
};
pub use env::{EnvSource, NullEnv, ProcessEnv};
pub use error::{AccessError, LifecycleError, OverrideFault, RegistryError, ServiceError};
pub use events::{Bus, Event, EventKind};
pub use services::{service, stopper, Context, NamedService, NamedStopper, Plug, ServiceInstance};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
