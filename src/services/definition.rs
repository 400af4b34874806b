//! Service definitions and the closure adapters that build them.
//!
//! [`service`] wraps an async closure `Fn(Context) -> Fut<Result<T, _>>` into
//! a type-erased start function, producing a fresh future per invocation —
//! no shared mutable state, no `Mutex` required. [`stopper`] does the same
//! for stop functions, downcasting the erased instance back to `Arc<T>`
//! before handing it to the closure.
//!
//! ## Concurrency semantics
//! - Every start invocation creates a **new** future owning its own state.
//! - If a service needs state shared across restarts, capture an `Arc<...>`
//!   explicitly inside the closure.

use std::any::Any;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::ServiceError;
use crate::services::context::Context;
use crate::services::plug::Plug;

/// Type-erased value produced by a start function.
///
/// Recovered through the typed accessors (`get::<T>`), which downcast and
/// forward through resolved plugs.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Type-erased start function: `(Context) -> future of instance`.
pub(crate) type StartFn =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<ServiceInstance, ServiceError>> + Send + Sync>;

/// Type-erased stop function: `(instance) -> future of ()`.
pub(crate) type StopFn =
    Arc<dyn Fn(ServiceInstance) -> BoxFuture<'static, Result<(), ServiceError>> + Send + Sync>;

/// A named start function, ready to be registered with `Registry::up`.
pub struct NamedService {
    pub(crate) name: Cow<'static, str>,
    pub(crate) start: StartFn,
}

/// A named stop function, ready to be attached with `Registry::down`.
pub struct NamedStopper {
    pub(crate) name: Cow<'static, str>,
    pub(crate) stop: StopFn,
}

/// Wraps an async closure into a [`NamedService`].
///
/// The closure receives the service [`Context`] and returns any
/// `Send + Sync` value; the value is erased behind [`ServiceInstance`].
///
/// ## Example
/// ```rust
/// use servisor::{service, Context, ServiceError};
///
/// let def = service("answer", |_ctx: Context| async move {
///     Ok::<_, ServiceError>(42u32)
/// });
/// ```
pub fn service<F, Fut, T>(name: impl Into<Cow<'static, str>>, f: F) -> NamedService
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    T: Send + Sync + 'static,
{
    NamedService {
        name: name.into(),
        start: Arc::new(move |ctx| {
            let fut = f(ctx);
            Box::pin(async move { fut.await.map(|v| Arc::new(v) as ServiceInstance) })
        }),
    }
}

/// Wraps an async closure into a [`NamedStopper`].
///
/// The closure receives the typed instance the matching start function
/// produced. A type mismatch at stop time is reported as a
/// [`ServiceError::Failed`].
///
/// ## Example
/// ```rust
/// use std::sync::Arc;
/// use servisor::{stopper, ServiceError};
///
/// let def = stopper("answer", |v: Arc<u32>| async move {
///     assert_eq!(*v, 42);
///     Ok::<_, ServiceError>(())
/// });
/// ```
pub fn stopper<F, Fut, T>(name: impl Into<Cow<'static, str>>, f: F) -> NamedStopper
where
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    T: Send + Sync + 'static,
{
    NamedStopper {
        name: name.into(),
        stop: Arc::new(move |instance: ServiceInstance| match instance.downcast::<T>() {
            Ok(v) => Box::pin(f(v)),
            Err(_) => Box::pin(futures::future::ready(Err(ServiceError::failed(
                "stop handler expected a different instance type",
            )))),
        }),
    }
}

/// One registered service: name, level placement, start/stop functions, and
/// runtime flags.
///
/// The current instance lives in the shared service map; `running` mirrors
/// its presence there.
#[derive(Clone)]
pub(crate) struct ServiceDefinition {
    /// Unique service name.
    pub(crate) name: Arc<str>,
    /// The wave this definition starts in.
    pub(crate) level: u32,
    /// Group label of the level, if any.
    pub(crate) group: Option<Arc<str>>,
    /// Start function.
    pub(crate) start: StartFn,
    /// Optional stop function, attached via `down`.
    pub(crate) stop: Option<StopFn>,
    /// True while an instance is materialized.
    pub(crate) running: bool,
    /// Plug cell awaiting resolution, set when this definition overrides a
    /// plug registered at an earlier level.
    pub(crate) pending_plug: Option<Plug>,
    /// Index of the plugin binding that contributed this definition, if any.
    /// Such definitions are started and stopped through the plugin's own
    /// registry, never directly by the host.
    pub(crate) from_plugin: Option<usize>,
}

impl ServiceDefinition {
    pub(crate) fn new(
        name: Arc<str>,
        level: u32,
        group: Option<Arc<str>>,
        start: StartFn,
    ) -> Self {
        Self {
            name,
            level,
            group,
            start,
            stop: None,
            running: false,
            pending_plug: None,
            from_plugin: None,
        }
    }
}
