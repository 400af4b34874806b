//! The service registry and its definition builder.
//!
//! A [`Registry`] accumulates named service definitions in ordered levels
//! (`up`/`up_grouped`), attaches stop functions (`down`), records plugin
//! bindings (`mount`), and owns the shared runtime pieces: the service map,
//! the event bus, and the collaborator handles (environment, process).
//!
//! ## Registration rules
//! - Each `up` call opens one new level; levels increase monotonically
//!   across registration calls, including those interleaved with plugin
//!   binds.
//! - A group name may be attached to at most one level.
//! - Re-registering an existing name succeeds only if the existing entry is
//!   a plug; this is verified by dry-invoking its start function with a
//!   restricted context (only the plug factory usable) and polling the
//!   future exactly once. Any other outcome rejects the registration with a
//!   diagnostic naming the offending key and the likely cause.
//! - `down` for a name that was never registered fails.
//!
//! Traversal (`start`/`stop`/`only`) lives in the engine module; plugin
//! merge/teardown in the plugin module; `launch`/`shutdown` in the shutdown
//! module.

use std::borrow::Cow;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::core::accessor::{Lookup, ServiceMap};
use crate::core::config::Config;
use crate::core::plugin::{PluginBinding, PluginSource};
use crate::core::shutdown::{OsProcess, ProcessHandle};
use crate::env::{EnvSource, ProcessEnv};
use crate::error::{AccessError, OverrideFault, RegistryError};
use crate::events::{Bus, Event};
use crate::services::{
    Context, NamedService, NamedStopper, Plug, ServiceDefinition, ServiceInstance, StartFn,
};
use crate::subscribers::{LogWriter, Subscribe, SubscriberSet};

/// A leveled graph of service definitions plus the runtime it runs on.
pub struct Registry {
    pub(crate) cfg: Config,
    pub(crate) defs: Vec<ServiceDefinition>,
    pub(crate) groups: Vec<(Arc<str>, u32)>,
    pub(crate) bindings: Vec<PluginBinding>,
    pub(crate) next_level: u32,
    pub(crate) map: Arc<ServiceMap>,
    pub(crate) bus: Bus,
    pub(crate) subscribers: Vec<Arc<dyn Subscribe>>,
    pub(crate) env: Arc<dyn EnvSource>,
    pub(crate) process: Arc<dyn ProcessHandle>,
    pub(crate) forwarder: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("defs", &self.defs.len())
            .field("groups", &self.groups)
            .field("bindings", &self.bindings.len())
            .field("next_level", &self.next_level)
            .field("subscribers", &self.subscribers.len())
            .field("forwarder", &self.forwarder.is_some())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Creates a registry with the given configuration and default
    /// collaborators (real environment, real process).
    pub fn new(cfg: Config) -> Self {
        Self::builder().with_config(cfg).build()
    }

    /// Returns a builder for a registry with custom collaborators.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Adds one level of named start functions.
    pub fn up(
        &mut self,
        services: impl IntoIterator<Item = NamedService>,
    ) -> Result<&mut Self, RegistryError> {
        self.up_level(None, services)
    }

    /// Adds one level of named start functions under a group label.
    ///
    /// Fails if the group name is already used by an earlier level.
    pub fn up_grouped(
        &mut self,
        group: impl Into<Arc<str>>,
        services: impl IntoIterator<Item = NamedService>,
    ) -> Result<&mut Self, RegistryError> {
        self.up_level(Some(group.into()), services)
    }

    fn up_level(
        &mut self,
        group: Option<Arc<str>>,
        services: impl IntoIterator<Item = NamedService>,
    ) -> Result<&mut Self, RegistryError> {
        if let Some(g) = &group {
            if let Some((taken, level)) = self.groups.iter().find(|(name, _)| name == g) {
                return Err(RegistryError::DuplicateGroup {
                    group: taken.to_string(),
                    level: *level,
                });
            }
        }

        let level = self.next_level;
        for svc in services {
            let name: Arc<str> = Arc::from(svc.name.as_ref());
            match self.defs.iter().position(|d| d.name == name) {
                Some(pos) => {
                    let plug = dry_check_plug(&name, &self.defs[pos].start)?;
                    self.defs.remove(pos);
                    let mut def =
                        ServiceDefinition::new(name.clone(), level, group.clone(), svc.start);
                    def.pending_plug = Some(plug.clone());
                    self.defs.push(def);
                    self.map.set_pending(&name, plug);
                }
                None => {
                    self.defs.push(ServiceDefinition::new(
                        name.clone(),
                        level,
                        group.clone(),
                        svc.start,
                    ));
                    self.map.register(name);
                }
            }
        }

        if let Some(g) = group {
            self.groups.push((g, level));
        }
        self.next_level += 1;
        Ok(self)
    }

    /// Attaches stop functions to existing names.
    ///
    /// A second `down` for the same name replaces its stop function.
    pub fn down(
        &mut self,
        stoppers: impl IntoIterator<Item = NamedStopper>,
    ) -> Result<&mut Self, RegistryError> {
        for s in stoppers {
            let name: Cow<'_, str> = s.name;
            match self.defs.iter_mut().find(|d| *d.name == *name) {
                Some(def) => def.stop = Some(s.stop),
                None => {
                    return Err(RegistryError::UnknownService {
                        name: name.into_owned(),
                    })
                }
            }
        }
        Ok(self)
    }

    /// Records a plugin binding at the current level boundary, with host
    /// configuration propagation enabled.
    ///
    /// Nothing is built until a start traversal reaches the boundary.
    pub fn mount(&mut self, source: impl Into<PluginSource>) -> &mut Self {
        self.mount_with(source, true)
    }

    /// Records a plugin binding, choosing whether host configuration is
    /// copied onto the sub-registry when it materializes.
    pub fn mount_with(&mut self, source: impl Into<PluginSource>, push_config: bool) -> &mut Self {
        self.bindings
            .push(PluginBinding::new(source.into(), self.next_level, push_config));
        self
    }

    /// Adjusts the configuration in place.
    ///
    /// Call before the first traversal; `bus_capacity` changes after
    /// construction have no effect on the already-created bus.
    pub fn configure(&mut self, apply: impl FnOnce(&mut Config)) -> &mut Self {
        apply(&mut self.cfg);
        self
    }

    // ---- read accessors ----

    /// Typed read access to a running service.
    ///
    /// Fails synchronously if the name is unregistered, not started, an
    /// unresolved plug, or holds a different type.
    pub fn get<T: std::any::Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, AccessError> {
        self.map.get(name)
    }

    /// Untyped read access to a running service.
    pub fn instance(&self, name: &str) -> Result<ServiceInstance, AccessError> {
        self.map.instance(name)
    }

    /// Tagged lookup distinguishing the failure modes.
    pub fn lookup(&self, name: &str) -> Lookup {
        self.map.lookup(name)
    }

    /// True if the named definition is currently running.
    pub fn is_running(&self, name: &str) -> bool {
        self.defs.iter().any(|d| *d.name == *name && d.running)
    }

    /// Subscribes a raw receiver to the event bus.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    // ---- internals shared with the engine ----

    /// Spawns the bus → subscriber forwarder once.
    ///
    /// Installs the built-in [`LogWriter`] when the registry is verbose and
    /// no custom subscribers were provided. Must run inside a tokio runtime,
    /// which is why it happens at the first traversal rather than at
    /// construction.
    pub(crate) fn ensure_forwarder(&mut self) {
        if self.forwarder.is_some() {
            return;
        }
        let mut subs = self.subscribers.clone();
        if subs.is_empty() && self.cfg.verbose {
            subs.push(Arc::new(LogWriter));
        }
        let set = SubscriberSet::new(subs);
        let mut rx = self.bus.subscribe();
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Builds the context a start function of `name` receives.
    pub(crate) fn service_context(&self, name: Arc<str>) -> Context {
        Context::new(name, self.map.clone(), self.env.clone(), self.bus.clone())
    }
}

/// Verifies that an existing start function is a plug initializer.
///
/// The function is invoked with a restricted context and polled exactly
/// once: a pending future means the initializer is async, an error means it
/// raised, and any value that is not a plug marker rejects the override.
fn dry_check_plug(name: &Arc<str>, start: &StartFn) -> Result<Plug, RegistryError> {
    let ctx = Context::restricted(name.clone());
    match (start)(ctx).now_or_never() {
        None => Err(RegistryError::InvalidOverride {
            name: name.to_string(),
            fault: OverrideFault::AsyncInit,
        }),
        Some(Err(e)) => Err(RegistryError::InvalidOverride {
            name: name.to_string(),
            fault: OverrideFault::Raised {
                error: e.to_string(),
            },
        }),
        Some(Ok(instance)) => match instance.downcast::<Plug>() {
            Ok(plug) => Ok((*plug).clone()),
            Err(_) => Err(RegistryError::InvalidOverride {
                name: name.to_string(),
                fault: OverrideFault::NotAPlug,
            }),
        },
    }
}

/// Builder for a [`Registry`] with custom collaborators.
pub struct RegistryBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    env: Arc<dyn EnvSource>,
    process: Arc<dyn ProcessHandle>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            cfg: Config::default(),
            subscribers: Vec::new(),
            env: Arc::new(ProcessEnv),
            process: Arc::new(OsProcess),
        }
    }
}

impl RegistryBuilder {
    /// Sets the configuration.
    pub fn with_config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets event subscribers.
    ///
    /// Providing any subscriber suppresses the default [`LogWriter`].
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the environment collaborator.
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    /// Replaces the process-termination collaborator.
    pub fn with_process(mut self, process: Arc<dyn ProcessHandle>) -> Self {
        self.process = process;
        self
    }

    /// Builds the registry.
    pub fn build(self) -> Registry {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        Registry {
            cfg: self.cfg,
            defs: Vec::new(),
            groups: Vec::new(),
            bindings: Vec::new(),
            next_level: 0,
            map: Arc::new(ServiceMap::default()),
            bus,
            subscribers: self.subscribers,
            env: self.env,
            process: self.process,
            forwarder: None,
        }
    }
}
