//! Plugin composition: merging an externally built registry into a host.
//!
//! A plugin is an independently constructed [`Registry`] (or an async factory
//! producing one) bound to the host at a level boundary. `mount` only records
//! the binding; the first start traversal that reaches the boundary
//! materializes it:
//!
//! ```text
//! start:  ... level L-1 ──► materialize ─► collision check ─► sub.start()
//!                                ─► copy defs + instances into host ──► level L ...
//! stop:   ... level L ──► sub.stop() ─► remove merged entries ──► level L-1 ...
//! ```
//!
//! ## Rules
//! - A binding materializes at most once per traversal cycle.
//! - Collisions with host names are fatal before any plugin service starts.
//! - Bindings at the same boundary merge in bind order and tear down in
//!   reverse bind order.
//! - Merged definitions are never started or stopped by the host directly;
//!   the sub-registry's own traversal handles them.
//! - Teardown discards a factory product so the next start rebuilds it; a
//!   directly bound registry is reused.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::core::registry::Registry;
use crate::error::{LifecycleError, ServiceError};
use crate::events::{Event, EventKind};
use crate::services::Context;

/// Async factory producing a sub-registry from a read-only host context.
pub type PluginFactory =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Registry, ServiceError>> + Send + Sync>;

/// What `mount` accepts: a ready registry or a factory.
pub enum PluginSource {
    /// An already-built registry, moved into the binding and reused across
    /// start/stop cycles.
    Direct(Box<Registry>),
    /// A factory invoked on each cycle's first traversal reach.
    Factory(PluginFactory),
}

impl From<Registry> for PluginSource {
    fn from(registry: Registry) -> Self {
        PluginSource::Direct(Box::new(registry))
    }
}

/// Wraps an async closure into a plugin factory source.
///
/// ## Example
/// ```rust
/// use servisor::{plugin, service, Config, Context, Registry, ServiceError};
///
/// let source = plugin(|_ctx: Context| async move {
///     let mut sub = Registry::new(Config::default());
///     sub.up([service("worker", |_: Context| async { Ok(1u32) })])
///         .map_err(|e| ServiceError::failed(e.to_string()))?;
///     Ok(sub)
/// });
/// ```
pub fn plugin<F, Fut>(f: F) -> PluginSource
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Registry, ServiceError>> + Send + 'static,
{
    PluginSource::Factory(Arc::new(move |ctx| Box::pin(f(ctx))))
}

/// Where a binding keeps its sub-registry between traversal phases.
enum SubSlot {
    Direct(Option<Box<Registry>>),
    Factory {
        factory: PluginFactory,
        built: Option<Box<Registry>>,
    },
}

/// One recorded `mount` call.
pub(crate) struct PluginBinding {
    repr: SubSlot,
    /// The host level this binding merges before (= level count at bind time).
    pub(crate) merge_before: u32,
    push_config: bool,
    pub(crate) merged: bool,
    merged_names: Vec<Arc<str>>,
}

impl PluginBinding {
    pub(crate) fn new(source: PluginSource, merge_before: u32, push_config: bool) -> Self {
        let repr = match source {
            PluginSource::Direct(reg) => SubSlot::Direct(Some(reg)),
            PluginSource::Factory(factory) => SubSlot::Factory {
                factory,
                built: None,
            },
        };
        Self {
            repr,
            merge_before,
            push_config,
            merged: false,
            merged_names: Vec::new(),
        }
    }
}

enum MergePlan {
    Ready(Box<Registry>),
    Build(PluginFactory),
    Skip,
}

impl Registry {
    /// Merges every unmerged binding due before `level`, in bind order.
    pub(crate) async fn merge_due(&mut self, level: u32) -> Result<(), LifecycleError> {
        for idx in 0..self.bindings.len() {
            if self.bindings[idx].merge_before == level && !self.bindings[idx].merged {
                self.merge_binding(idx, level).await?;
            }
        }
        Ok(())
    }

    /// Tears down every merged binding due before `level`, in reverse bind
    /// order.
    pub(crate) async fn teardown_due(
        &mut self,
        level: u32,
        reason: Option<&str>,
    ) -> Result<(), LifecycleError> {
        for idx in (0..self.bindings.len()).rev() {
            if self.bindings[idx].merge_before == level && self.bindings[idx].merged {
                self.teardown_binding(idx, level, reason).await?;
            }
        }
        Ok(())
    }

    async fn merge_binding(&mut self, idx: usize, level: u32) -> Result<(), LifecycleError> {
        self.bus
            .publish(Event::new(EventKind::PluginMerging).with_level(level));

        let plan = {
            let binding = &mut self.bindings[idx];
            match &mut binding.repr {
                SubSlot::Direct(slot) => slot.take().map(MergePlan::Ready).unwrap_or(MergePlan::Skip),
                SubSlot::Factory { factory, built } => built
                    .take()
                    .map(MergePlan::Ready)
                    .unwrap_or_else(|| MergePlan::Build(factory.clone())),
            }
        };
        let push_config = self.bindings[idx].push_config;

        let mut sub = match plan {
            MergePlan::Ready(sub) => sub,
            MergePlan::Build(factory) => {
                let ctx = self.service_context(Arc::from("plugin"));
                match factory(ctx).await {
                    Ok(registry) => Box::new(registry),
                    Err(source) => {
                        self.bus.publish(
                            Event::new(EventKind::MergeFailed).with_reason(source.to_string()),
                        );
                        return Err(LifecycleError::PluginBuildFailed { source });
                    }
                }
            }
            MergePlan::Skip => return Ok(()),
        };

        if push_config {
            sub.cfg = self.cfg.clone();
            sub.env = self.env.clone();
        }

        // every plugin key is checked before anything starts
        let collision = sub
            .defs
            .iter()
            .find(|def| self.defs.iter().any(|host| host.name == def.name))
            .map(|def| def.name.to_string());
        if let Some(name) = collision {
            self.bus.publish(
                Event::new(EventKind::MergeFailed)
                    .with_reason(format!("name collision on {name:?}")),
            );
            self.restore_slot(idx, sub);
            return Err(LifecycleError::MergeCollision { name });
        }

        if let Err(e) = sub.start().await {
            self.restore_slot(idx, sub);
            return Err(e);
        }

        let mut names = Vec::with_capacity(sub.defs.len());
        for def in &sub.defs {
            names.push(def.name.clone());
            let mut copy = def.clone();
            copy.from_plugin = Some(idx);
            copy.level = level;
            self.map.register(def.name.clone());
            if let Some(instance) = sub.map.raw(&def.name) {
                self.map.commit(&def.name, instance);
            }
            self.defs.push(copy);
        }

        self.restore_slot(idx, sub);
        let binding = &mut self.bindings[idx];
        binding.merged = true;
        binding.merged_names = names;
        self.bus
            .publish(Event::new(EventKind::PluginMerged).with_level(level));
        Ok(())
    }

    async fn teardown_binding(
        &mut self,
        idx: usize,
        level: u32,
        reason: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let taken = {
            let binding = &mut self.bindings[idx];
            match &mut binding.repr {
                SubSlot::Direct(slot) => slot.take(),
                SubSlot::Factory { built, .. } => built.take(),
            }
        };
        let Some(mut sub) = taken else {
            self.bindings[idx].merged = false;
            return Ok(());
        };

        let res = sub.stop(reason).await;

        // merged entries leave the host either way, so a later start rebuilds
        let names = std::mem::take(&mut self.bindings[idx].merged_names);
        for name in &names {
            self.map.remove(name);
        }
        self.defs.retain(|d| d.from_plugin != Some(idx));
        self.bindings[idx].merged = false;

        if let SubSlot::Direct(slot) = &mut self.bindings[idx].repr {
            *slot = Some(sub);
        }

        self.bus
            .publish(Event::new(EventKind::PluginRemoved).with_level(level));
        res
    }

    fn restore_slot(&mut self, idx: usize, sub: Box<Registry>) {
        match &mut self.bindings[idx].repr {
            SubSlot::Direct(slot) => *slot = Some(sub),
            SubSlot::Factory { built, .. } => *built = Some(sub),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::services::{service, stopper};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn quiet() -> Config {
        Config {
            verbose: false,
            ..Config::default()
        }
    }

    type Log = Arc<Mutex<Vec<i32>>>;

    fn recording(log: &Log, n: i32) -> crate::services::NamedService {
        let log = log.clone();
        service(format!("test{n}"), move |_: Context| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(n);
                Ok(n)
            }
        })
    }

    fn recording_stop(log: &Log, n: i32) -> crate::services::NamedStopper {
        let log = log.clone();
        stopper(format!("test{n}"), move |_: Arc<i32>| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(-n);
                Ok(())
            }
        })
    }

    fn two_service_plugin(log: &Log) -> Registry {
        let mut sub = Registry::new(quiet());
        sub.up([recording(log, 11), recording(log, 12)]).unwrap();
        sub.down([recording_stop(log, 11), recording_stop(log, 12)])
            .unwrap();
        sub
    }

    #[tokio::test]
    async fn plugin_merges_between_levels_and_unwinds_in_reverse() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());

        let slow = {
            let log = log.clone();
            service("test1", move |_: Context| {
                let log = log.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    log.lock().unwrap().push(1);
                    Ok(1)
                }
            })
        };
        reg.up([slow, recording(&log, 2)]).unwrap();
        reg.mount(two_service_plugin(&log));
        reg.up([recording(&log, 3), recording(&log, 4)]).unwrap();
        reg.down([
            recording_stop(&log, 1),
            recording_stop(&log, 2),
            recording_stop(&log, 3),
            recording_stop(&log, 4),
        ])
        .unwrap();

        reg.start().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 11, 12, 3, 4]);

        reg.stop(Some("test")).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![2, 1, 11, 12, 3, 4, -4, -3, -12, -11, -2, -1]
        );
    }

    #[tokio::test]
    async fn later_host_levels_read_merged_services() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());
        reg.up([recording(&log, 1)]).unwrap();
        reg.mount(two_service_plugin(&log));
        reg.up([service("reader", |ctx: Context| async move {
            let v: Arc<i32> = ctx.get("test11")?;
            Ok(*v)
        })])
        .unwrap();

        reg.start().await.unwrap();
        assert_eq!(*reg.get::<i32>("reader").unwrap(), 11);
        assert_eq!(*reg.get::<i32>("test11").unwrap(), 11);
    }

    #[tokio::test]
    async fn name_collision_aborts_the_merge_before_anything_starts() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());
        reg.up([recording(&log, 11)]).unwrap();
        reg.mount(two_service_plugin(&log));
        reg.up([recording(&log, 3)]).unwrap();

        let err = reg.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::MergeCollision { name } if name == "test11"));
        // the plugin contributed nothing
        assert_eq!(*log.lock().unwrap(), vec![11]);
    }

    #[tokio::test]
    async fn factory_plugins_rebuild_on_every_cycle() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut reg = Registry::new(quiet());
        reg.up([service("base", |_: Context| async { Ok(0u32) })])
            .unwrap();

        let counter = builds.clone();
        reg.mount(plugin(move |_ctx: Context| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut sub = Registry::new(Config::default());
                sub.up([service("worker", |_: Context| async { Ok(1u32) })])
                    .map_err(|e| ServiceError::failed(e.to_string()))?;
                Ok(sub)
            }
        }));

        reg.start().await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(*reg.get::<u32>("worker").unwrap(), 1);

        reg.stop(None).await.unwrap();
        assert!(matches!(
            reg.lookup("worker"),
            crate::core::accessor::Lookup::NotFound
        ));

        reg.start().await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(*reg.get::<u32>("worker").unwrap(), 1);
    }

    #[tokio::test]
    async fn direct_plugins_are_reused_across_cycles() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());
        reg.up([recording(&log, 1)]).unwrap();
        reg.mount(two_service_plugin(&log));

        reg.start().await.unwrap();
        reg.stop(None).await.unwrap();
        reg.start().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![1, 11, 12, -12, -11, 1, 11, 12]
        );
    }
}
