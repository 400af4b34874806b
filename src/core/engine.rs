//! Level traversal: start ascending, stop descending.
//!
//! ```text
//! start():                                  stop(reason):
//!   for level in 0..n                         teardown plugins due after level n-1
//!     merge plugins due before level          for level in (0..n).rev()
//!     run level's start functions               run level's stop functions (reversed)
//!   merge trailing plugins                      teardown plugins due before level
//! ```
//!
//! ## Rules
//! - Level N+1 never begins until every targeted definition in 0..N settled.
//! - Parallel mode guarantees only "all initiated together, all awaited
//!   together"; sequential mode guarantees strict declaration order. Stop
//!   reverses the declaration order in both modes.
//! - Re-starting a running definition is a no-op (`ServiceAlreadyRunning`).
//! - A failing start or stop commits its finished siblings, aborts the rest
//!   of the traversal, and propagates.
//! - A start function returning an unresolved plug flags a readiness warning
//!   (`ServiceUnresolved`) instead of a success log.
//! - Definitions contributed by merged plugins are skipped here; their own
//!   registry traversal handles them.
//!
//! There is no mid-flight cancellation: once a start or stop function is
//! invoked it is awaited (or abandoned wholesale by the shutdown deadline).

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};

use crate::core::registry::Registry;
use crate::error::LifecycleError;
use crate::events::{Event, EventKind};
use crate::services::{Plug, ServiceInstance};

fn is_unresolved_plug(instance: &ServiceInstance) -> bool {
    instance
        .downcast_ref::<Plug>()
        .map(|p| !p.is_ready())
        .unwrap_or(false)
}

impl Registry {
    /// Starts every level ascending, merging due plugins at level boundaries.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        self.ensure_forwarder();
        self.bus.publish(Event::new(EventKind::Starting));
        self.traverse_start(self.next_level, true).await
    }

    /// Stops every level descending, tearing down plugins at level
    /// boundaries. The reason appears in the `Stopping` log line.
    pub async fn stop(&mut self, reason: Option<&str>) -> Result<(), LifecycleError> {
        self.ensure_forwarder();
        self.bus.publish(
            Event::new(EventKind::Stopping).with_reason(reason.unwrap_or("no reason")),
        );
        self.traverse_stop(reason).await
    }

    /// Starts only the levels at or below `name`'s level, then returns the
    /// target's materialized value. Idempotent: if the target already runs,
    /// nothing is traversed.
    pub async fn only(&mut self, name: &str) -> Result<ServiceInstance, LifecycleError> {
        self.ensure_forwarder();
        let Some(def) = self.defs.iter().find(|d| *d.name == *name) else {
            return Err(LifecycleError::UnknownService {
                name: name.to_string(),
            });
        };
        let (level, running) = (def.level, def.running);
        if !running {
            self.bus.publish(Event::new(EventKind::Starting));
            self.traverse_start(level + 1, false).await?;
        }
        match self.map.raw(name) {
            Some(instance) => Ok(instance),
            None => Err(LifecycleError::UnknownService {
                name: name.to_string(),
            }),
        }
    }

    /// Ascending walk over levels `0..bound`. With `trailing`, plugins bound
    /// after the last level are merged too (full start); `only` leaves them
    /// out.
    ///
    /// Boxed because plugin merges start sub-registries recursively.
    pub(crate) fn traverse_start(
        &mut self,
        bound: u32,
        trailing: bool,
    ) -> BoxFuture<'_, Result<(), LifecycleError>> {
        Box::pin(async move {
            for level in 0..bound {
                self.merge_due(level).await?;
                self.start_level(level).await?;
            }
            if trailing {
                self.merge_due(bound).await?;
            }
            Ok(())
        })
    }

    /// Descending walk mirroring [`Registry::traverse_start`] exactly.
    pub(crate) fn traverse_stop<'a>(
        &'a mut self,
        reason: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), LifecycleError>> {
        Box::pin(async move {
            let top = self.next_level;
            self.teardown_due(top, reason).await?;
            for level in (0..top).rev() {
                self.stop_level(level).await?;
                self.teardown_due(level, reason).await?;
            }
            Ok(())
        })
    }

    async fn start_level(&mut self, level: u32) -> Result<(), LifecycleError> {
        let idxs: Vec<usize> = self
            .defs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.level == level && d.from_plugin.is_none())
            .map(|(i, _)| i)
            .collect();
        if idxs.is_empty() {
            return Ok(());
        }
        if self.cfg.parallel_start_groups {
            self.start_level_parallel(idxs).await
        } else {
            self.start_level_sequential(idxs).await
        }
    }

    async fn start_level_parallel(&mut self, idxs: Vec<usize>) -> Result<(), LifecycleError> {
        let mut pending: Vec<usize> = Vec::with_capacity(idxs.len());
        let mut futs = Vec::with_capacity(idxs.len());

        for &i in &idxs {
            let name = self.defs[i].name.clone();
            if self.defs[i].running {
                self.publish_service(EventKind::ServiceAlreadyRunning, &name);
                continue;
            }
            self.bus.publish(
                Event::new(EventKind::ServiceInitializing)
                    .with_service(name.clone())
                    .with_level(self.defs[i].level),
            );
            let fut = (self.defs[i].start)(self.service_context(name.clone()));
            let bus = self.bus.clone();
            pending.push(i);
            futs.push(async move {
                let res = fut.await;
                publish_start_outcome(&bus, &name, &res);
                res
            });
        }

        let results = join_all(futs).await;

        let mut first_err: Option<LifecycleError> = None;
        for (&i, res) in pending.iter().zip(results) {
            match res {
                Ok(instance) => self.commit_start(i, instance),
                Err(source) => {
                    if first_err.is_none() {
                        first_err = Some(LifecycleError::StartFailed {
                            service: self.defs[i].name.to_string(),
                            source,
                        });
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn start_level_sequential(&mut self, idxs: Vec<usize>) -> Result<(), LifecycleError> {
        for i in idxs {
            let name = self.defs[i].name.clone();
            if self.defs[i].running {
                self.publish_service(EventKind::ServiceAlreadyRunning, &name);
                continue;
            }
            self.bus.publish(
                Event::new(EventKind::ServiceInitializing)
                    .with_service(name.clone())
                    .with_level(self.defs[i].level),
            );
            let fut = (self.defs[i].start)(self.service_context(name.clone()));
            let res = fut.await;
            publish_start_outcome(&self.bus, &name, &res);
            match res {
                Ok(instance) => self.commit_start(i, instance),
                Err(source) => {
                    return Err(LifecycleError::StartFailed {
                        service: name.to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    /// Records a started instance: resolves a pending plug override, flips
    /// the running flag, and materializes the instance in the shared map.
    fn commit_start(&mut self, i: usize, instance: ServiceInstance) {
        if let Some(plug) = self.defs[i].pending_plug.clone() {
            plug.resolve(instance.clone());
        }
        let name = self.defs[i].name.clone();
        self.defs[i].running = true;
        self.map.commit(&name, instance);
    }

    async fn stop_level(&mut self, level: u32) -> Result<(), LifecycleError> {
        let mut idxs: Vec<usize> = self
            .defs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.level == level && d.from_plugin.is_none() && d.running)
            .map(|(i, _)| i)
            .collect();
        idxs.reverse();
        if idxs.is_empty() {
            return Ok(());
        }
        if self.cfg.parallel_stop_groups {
            self.stop_level_parallel(idxs).await
        } else {
            self.stop_level_sequential(idxs).await
        }
    }

    async fn stop_level_parallel(&mut self, idxs: Vec<usize>) -> Result<(), LifecycleError> {
        let mut pending: Vec<usize> = Vec::with_capacity(idxs.len());
        let mut futs = Vec::with_capacity(idxs.len());

        for &i in &idxs {
            let name = self.defs[i].name.clone();
            match (self.defs[i].stop.clone(), self.map.raw(&name)) {
                (Some(stop), Some(instance)) => {
                    self.publish_service(EventKind::ServiceDestroying, &name);
                    let fut = (stop)(instance);
                    let bus = self.bus.clone();
                    pending.push(i);
                    futs.push(async move {
                        let res = fut.await;
                        publish_stop_outcome(&bus, &name, &res);
                        res
                    });
                }
                // no stop function: skipped silently, instance still cleared
                _ => self.clear_stopped(i),
            }
        }

        let results = join_all(futs).await;

        let mut first_err: Option<LifecycleError> = None;
        for (&i, res) in pending.iter().zip(results) {
            match res {
                Ok(()) => self.clear_stopped(i),
                Err(source) => {
                    if first_err.is_none() {
                        first_err = Some(LifecycleError::StopFailed {
                            service: self.defs[i].name.to_string(),
                            source,
                        });
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn stop_level_sequential(&mut self, idxs: Vec<usize>) -> Result<(), LifecycleError> {
        for i in idxs {
            let name = self.defs[i].name.clone();
            match (self.defs[i].stop.clone(), self.map.raw(&name)) {
                (Some(stop), Some(instance)) => {
                    self.publish_service(EventKind::ServiceDestroying, &name);
                    let res = (stop)(instance).await;
                    publish_stop_outcome(&self.bus, &name, &res);
                    match res {
                        Ok(()) => self.clear_stopped(i),
                        Err(source) => {
                            return Err(LifecycleError::StopFailed {
                                service: name.to_string(),
                                source,
                            })
                        }
                    }
                }
                _ => self.clear_stopped(i),
            }
        }
        Ok(())
    }

    /// Clears a stopped definition: running flag, shared instance, and the
    /// pending plug cell (so a restart re-resolves fresh state).
    fn clear_stopped(&mut self, i: usize) {
        let name = self.defs[i].name.clone();
        self.defs[i].running = false;
        if let Some(plug) = self.defs[i].pending_plug.clone() {
            plug.reset();
        }
        self.map.clear(&name);
    }

    fn publish_service(&self, kind: EventKind, name: &Arc<str>) {
        self.bus.publish(Event::new(kind).with_service(name.clone()));
    }
}

fn publish_start_outcome(
    bus: &crate::events::Bus,
    name: &Arc<str>,
    res: &Result<ServiceInstance, crate::error::ServiceError>,
) {
    match res {
        Ok(instance) => {
            let kind = if is_unresolved_plug(instance) {
                EventKind::ServiceUnresolved
            } else {
                EventKind::ServiceReady
            };
            bus.publish(Event::new(kind).with_service(name.clone()));
        }
        Err(e) => {
            bus.publish(
                Event::new(EventKind::ServiceFailed)
                    .with_service(name.clone())
                    .with_reason(e.to_string()),
            );
        }
    }
}

fn publish_stop_outcome(
    bus: &crate::events::Bus,
    name: &Arc<str>,
    res: &Result<(), crate::error::ServiceError>,
) {
    match res {
        Ok(()) => bus.publish(Event::new(EventKind::ServiceDestroyed).with_service(name.clone())),
        Err(e) => bus.publish(
            Event::new(EventKind::ServiceFailed)
                .with_service(name.clone())
                .with_reason(e.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::accessor::Lookup;
    use crate::core::config::Config;
    use crate::error::{AccessError, ServiceError};
    use crate::services::{service, stopper, Context};
    use std::sync::Mutex;
    use std::time::Duration;

    fn quiet() -> Config {
        Config {
            verbose: false,
            ..Config::default()
        }
    }

    type Log = Arc<Mutex<Vec<i32>>>;

    fn slow_service(log: &Log, n: i32, delay_ms: u64) -> crate::services::NamedService {
        let log = log.clone();
        service(format!("test{n}"), move |_: Context| {
            let log = log.clone();
            async move {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
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

    fn scenario_graph(log: &Log, reg: &mut Registry) {
        reg.up([slow_service(log, 1, 50), slow_service(log, 2, 0)])
            .unwrap();
        let reader = {
            let log = log.clone();
            service("test3", move |ctx: Context| {
                let log = log.clone();
                async move {
                    let one: Arc<i32> = ctx.get("test1")?;
                    assert_eq!(*one, 1);
                    log.lock().unwrap().push(3);
                    Ok(3)
                }
            })
        };
        reg.up([reader, slow_service(log, 4, 0)]).unwrap();
        reg.down([
            recording_stop(log, 1),
            recording_stop(log, 2),
            recording_stop(log, 3),
            recording_stop(log, 4),
        ])
        .unwrap();
    }

    #[tokio::test]
    async fn parallel_levels_start_together_and_stop_reversed() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());
        scenario_graph(&log, &mut reg);

        reg.start().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 3, 4]);

        reg.stop(Some("test")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 3, 4, -4, -3, -2, -1]);
    }

    #[tokio::test]
    async fn sequential_levels_follow_declaration_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(Config {
            parallel_start_groups: false,
            parallel_stop_groups: false,
            ..quiet()
        });
        scenario_graph(&log, &mut reg);

        reg.start().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4]);

        reg.stop(None).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, -4, -3, -2, -1]);
    }

    #[tokio::test]
    async fn restarting_a_running_definition_is_a_noop() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());
        reg.up([slow_service(&log, 1, 0)]).unwrap();

        let mut rx = reg.subscribe();
        reg.start().await.unwrap();
        reg.start().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1]);

        let mut already = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::ServiceAlreadyRunning {
                already += 1;
            }
        }
        assert_eq!(already, 1);
    }

    #[tokio::test]
    async fn only_starts_exactly_the_levels_at_or_below_the_target() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());
        reg.up([slow_service(&log, 1, 0)]).unwrap();
        reg.up([slow_service(&log, 2, 0)]).unwrap();
        reg.up([slow_service(&log, 3, 0)]).unwrap();

        let instance = reg.only("test2").await.unwrap();
        assert_eq!(*instance.downcast::<i32>().unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        assert!(matches!(reg.lookup("test3"), Lookup::NotStarted));

        // idempotent: a second call traverses nothing
        let again = reg.only("test2").await.unwrap();
        assert_eq!(*again.downcast::<i32>().unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn only_for_an_unknown_name_fails() {
        let mut reg = Registry::new(quiet());
        let err = reg.only("ghost").await.unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownService { name } if name == "ghost"));
    }

    #[tokio::test]
    async fn a_failing_start_aborts_the_traversal_but_commits_siblings() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());
        reg.up([
            slow_service(&log, 1, 0),
            service("bad", |_: Context| async {
                Err::<i32, _>(ServiceError::failed("refused"))
            }),
        ])
        .unwrap();
        reg.up([slow_service(&log, 2, 0)]).unwrap();

        let err = reg.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::StartFailed { service, .. } if service == "bad"));
        // the sibling finished and is readable for cleanup
        assert_eq!(*reg.get::<i32>("test1").unwrap(), 1);
        // the next level never began
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert!(matches!(reg.lookup("test2"), Lookup::NotStarted));
    }

    struct Holder(crate::services::Plug);

    #[tokio::test]
    async fn an_override_resolves_previously_distributed_plugs() {
        let mut reg = Registry::new(quiet());
        reg.up([service("svc", |ctx: Context| async move { Ok(ctx.plug()) })])
            .unwrap();
        reg.up([service("consumer", |ctx: Context| async move {
            let plug = match ctx.lookup("svc") {
                Lookup::Unresolved(p) => p,
                other => return Err(ServiceError::failed(format!("expected plug, got {other:?}"))),
            };
            assert!(!plug.is_ready());
            Ok(Holder(plug))
        })])
        .unwrap();
        reg.up([service("svc", |_: Context| async { Ok(42u32) })])
            .unwrap();

        reg.start().await.unwrap();

        let holder: Arc<Holder> = reg.get("consumer").unwrap();
        assert!(holder.0.is_ready());
        assert_eq!(*holder.0.get_as::<u32>().unwrap(), 42);
        assert_eq!(*reg.get::<u32>("svc").unwrap(), 42);
    }

    #[tokio::test]
    async fn an_unoverridden_plug_flags_a_readiness_warning() {
        let mut reg = Registry::new(quiet());
        reg.up([service("svc", |ctx: Context| async move { Ok(ctx.plug()) })])
            .unwrap();

        let mut rx = reg.subscribe();
        reg.start().await.unwrap();

        assert_eq!(
            reg.get::<u32>("svc").unwrap_err(),
            AccessError::UnresolvedPlug {
                name: "svc".to_string()
            }
        );
        let plug = match reg.lookup("svc") {
            Lookup::Unresolved(p) => p,
            other => panic!("expected unresolved plug, got {other:?}"),
        };
        assert!(!plug.is_ready());

        let mut warned = 0;
        let mut ready = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev.kind {
                EventKind::ServiceUnresolved => warned += 1,
                EventKind::ServiceReady => ready += 1,
                _ => {}
            }
        }
        assert_eq!(warned, 1);
        assert_eq!(ready, 0);
    }

    #[tokio::test]
    async fn definitions_persist_and_restart_after_stop() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = Registry::new(quiet());
        reg.up([slow_service(&log, 1, 0)]).unwrap();
        reg.down([recording_stop(&log, 1)]).unwrap();

        reg.start().await.unwrap();
        reg.stop(None).await.unwrap();
        assert!(matches!(reg.lookup("test1"), Lookup::NotStarted));

        reg.start().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, -1, 1]);
        assert_eq!(*reg.get::<i32>("test1").unwrap(), 1);
    }

    #[tokio::test]
    async fn accessor_fails_synchronously_for_unknown_names() {
        let reg = Registry::new(quiet());
        // no traversal has run and no runtime work happens: the error is
        // produced by the call itself
        assert_eq!(
            reg.get::<u32>("never-registered").unwrap_err(),
            AccessError::NotRegistered {
                name: "never-registered".to_string()
            }
        );
    }
}
