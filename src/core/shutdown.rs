//! Graceful shutdown: signal handling, the deadline race, and forced
//! termination.
//!
//! ```text
//! launch():
//!   start() ── Ok ──► wait_for_shutdown_signal() ──► shutdown("signal")
//!          └── Err ─► publish StartAborted ────────► shutdown("startup failure")
//!                     (the start error is not re-thrown)
//!
//! shutdown(reason):
//!   resolve grace (warn + default 60s if unset)
//!   select! {
//!     stop(reason) ── Ok ──► force_exit_after_shutdown ? terminate(0) : return
//!                └── Err ─► publish StopFailed ─► terminate(1)
//!     sleep(grace) ────────► publish ShutdownTimedOut ─► terminate(1)
//!   }
//! ```
//!
//! The deadline abandons the racing stop future without cancelling the
//! individual stop functions still pending inside it; a process about to be
//! terminated has no use for them.
//!
//! Termination goes through the [`ProcessHandle`] collaborator so tests can
//! observe it instead of dying.

use crate::core::config::DEFAULT_GRACE;
use crate::core::registry::Registry;
use crate::error::LifecycleError;
use crate::events::{Event, EventKind};

/// Process-termination collaborator.
///
/// The orchestrator never calls `std::process::exit` directly; the shutdown
/// controller invokes this handle. [`OsProcess`] is the production
/// implementation; tests inject a recording fake.
pub trait ProcessHandle: Send + Sync + 'static {
    /// Ends the process with the given status.
    fn terminate(&self, status: i32);
}

/// Terminates the real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcess;

impl ProcessHandle for OsProcess {
    fn terminate(&self, status: i32) {
        std::process::exit(status);
    }
}

/// Waits for a termination signal.
///
/// Unix: `SIGINT`, `SIGTERM`, `SIGQUIT` (plus Ctrl-C). Elsewhere: Ctrl-C.
/// Each call creates independent signal listeners.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal (Ctrl-C only on this platform).
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

impl Registry {
    /// Starts the graph and keeps the process running until a termination
    /// signal arrives, then shuts down gracefully.
    ///
    /// A start failure is caught and logged; the already-started services
    /// are cleaned up through [`Registry::shutdown`] and the error is not
    /// re-thrown.
    pub async fn launch(&mut self) -> Result<(), LifecycleError> {
        match self.start().await {
            Ok(()) => {
                let _ = wait_for_shutdown_signal().await;
                self.bus.publish(Event::new(EventKind::ShutdownRequested));
                self.shutdown(Some("signal")).await
            }
            Err(e) => {
                self.bus
                    .publish(Event::new(EventKind::StartAborted).with_reason(e.to_string()));
                self.shutdown(Some("startup failure")).await
            }
        }
    }

    /// Races a full stop against the configured grace period.
    ///
    /// - The timer fires first: the timeout is logged once and the process
    ///   is terminated with a failure status, abandoning pending stop
    ///   functions.
    /// - `stop` completes first: the timer is dropped; the process is
    ///   terminated with a success status only when
    ///   `force_exit_after_shutdown` is set.
    /// - `stop` fails: the failure is logged and the process is terminated
    ///   with a failure status.
    pub async fn shutdown(&mut self, reason: Option<&str>) -> Result<(), LifecycleError> {
        self.ensure_forwarder();
        let grace = match self.cfg.graceful_shutdown_timeout {
            Some(grace) => grace,
            None => {
                self.bus.publish(Event::new(EventKind::GraceDefaulted));
                self.cfg.graceful_shutdown_timeout = Some(DEFAULT_GRACE);
                DEFAULT_GRACE
            }
        };

        let bus = self.bus.clone();
        let process = self.process.clone();
        let force_exit = self.cfg.force_exit_after_shutdown;
        let reason = reason.unwrap_or("shutdown").to_string();

        let stop_fut = self.stop(Some(&reason));
        tokio::pin!(stop_fut);
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);

        tokio::select! {
            res = &mut stop_fut => match res {
                Ok(()) => {
                    if force_exit {
                        bus.publish(Event::new(EventKind::ForcingExit).with_status(0));
                        process.terminate(0);
                    }
                    Ok(())
                }
                Err(e) => {
                    bus.publish(
                        Event::new(EventKind::StopFailed).with_reason(e.to_string()),
                    );
                    bus.publish(Event::new(EventKind::ForcingExit).with_status(1));
                    process.terminate(1);
                    Err(e)
                }
            },
            _ = &mut deadline => {
                bus.publish(Event::new(EventKind::ShutdownTimedOut));
                bus.publish(Event::new(EventKind::ForcingExit).with_status(1));
                process.terminate(1);
                Err(LifecycleError::ShutdownTimedOut { grace })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::error::ServiceError;
    use crate::services::{service, stopper, Context};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeProcess {
        exits: Mutex<Vec<i32>>,
    }

    impl FakeProcess {
        fn recorded(&self) -> Vec<i32> {
            self.exits.lock().unwrap().clone()
        }
    }

    impl ProcessHandle for FakeProcess {
        fn terminate(&self, status: i32) {
            self.exits.lock().unwrap().push(status);
        }
    }

    fn quiet() -> Config {
        Config {
            verbose: false,
            ..Config::default()
        }
    }

    fn harness(cfg: Config) -> (Registry, Arc<FakeProcess>) {
        let process = Arc::new(FakeProcess::default());
        let reg = Registry::builder()
            .with_config(cfg)
            .with_process(process.clone())
            .build();
        (reg, process)
    }

    #[tokio::test]
    async fn exceeding_the_grace_period_forces_termination() {
        let (mut reg, process) = harness(Config {
            graceful_shutdown_timeout: Some(Duration::from_millis(20)),
            ..quiet()
        });
        reg.up([service("stuck", |_: Context| async { Ok(0u32) })])
            .unwrap();
        reg.down([stopper("stuck", |_: Arc<u32>| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })])
        .unwrap();

        let mut rx = reg.subscribe();
        reg.start().await.unwrap();

        let err = reg.shutdown(Some("test")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ShutdownTimedOut { .. }));
        assert_eq!(process.recorded(), vec![1]);

        let mut timeouts = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::ShutdownTimedOut {
                timeouts += 1;
            }
        }
        assert_eq!(timeouts, 1);
    }

    #[tokio::test]
    async fn a_clean_shutdown_returns_without_terminating() {
        let (mut reg, process) = harness(Config {
            graceful_shutdown_timeout: Some(Duration::from_secs(5)),
            ..quiet()
        });
        reg.up([service("svc", |_: Context| async { Ok(0u32) })])
            .unwrap();

        reg.start().await.unwrap();
        reg.shutdown(None).await.unwrap();
        assert_eq!(process.recorded(), Vec::<i32>::new());
    }

    #[tokio::test]
    async fn force_exit_after_shutdown_terminates_with_success() {
        let (mut reg, process) = harness(Config {
            graceful_shutdown_timeout: Some(Duration::from_secs(5)),
            force_exit_after_shutdown: true,
            ..quiet()
        });
        reg.up([service("svc", |_: Context| async { Ok(0u32) })])
            .unwrap();

        reg.start().await.unwrap();
        reg.shutdown(None).await.unwrap();
        assert_eq!(process.recorded(), vec![0]);
    }

    #[tokio::test]
    async fn a_failing_stop_terminates_with_failure() {
        let (mut reg, process) = harness(Config {
            graceful_shutdown_timeout: Some(Duration::from_secs(5)),
            ..quiet()
        });
        reg.up([service("svc", |_: Context| async { Ok(0u32) })])
            .unwrap();
        reg.down([stopper("svc", |_: Arc<u32>| async {
            Err(ServiceError::failed("will not die"))
        })])
        .unwrap();

        reg.start().await.unwrap();
        let err = reg.shutdown(None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::StopFailed { .. }));
        assert_eq!(process.recorded(), vec![1]);
    }

    #[tokio::test]
    async fn launch_with_a_start_failure_cleans_up_without_terminating() {
        let stopped: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let (mut reg, process) = harness(quiet());

        reg.up([service("good", |_: Context| async { Ok(0u32) })])
            .unwrap();
        let log = stopped.clone();
        reg.down([stopper("good", move |_: Arc<u32>| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push("good");
                Ok(())
            }
        })])
        .unwrap();
        reg.up([service("bad", |_: Context| async {
            Err::<u32, _>(ServiceError::failed("refused"))
        })])
        .unwrap();

        let mut rx = reg.subscribe();
        // the start error is caught, cleanup runs, nothing terminates
        reg.launch().await.unwrap();
        assert_eq!(*stopped.lock().unwrap(), vec!["good"]);
        assert_eq!(process.recorded(), Vec::<i32>::new());

        let mut aborted = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::StartAborted {
                aborted += 1;
            }
        }
        assert_eq!(aborted, 1);
    }

    #[tokio::test]
    async fn an_unset_grace_period_is_warned_about_once_and_defaulted() {
        let (mut reg, _process) = harness(quiet());
        reg.up([service("svc", |_: Context| async { Ok(0u32) })])
            .unwrap();

        let mut rx = reg.subscribe();
        reg.start().await.unwrap();
        reg.shutdown(None).await.unwrap();
        assert_eq!(
            reg.cfg.graceful_shutdown_timeout,
            Some(crate::core::config::DEFAULT_GRACE)
        );

        reg.start().await.unwrap();
        reg.shutdown(None).await.unwrap();

        let mut defaulted = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::GraceDefaulted {
                defaulted += 1;
            }
        }
        assert_eq!(defaulted, 1);
    }
}
