//! Built-in logging subscriber.
//!
//! [`LogWriter`] renders lifecycle events as human-readable lines on stdout.
//! Per-service lines are prefixed with the service name.
//!
//! ## Output format
//! ```text
//! Starting...
//! [db] Initializing...
//! [db] Ready
//! [cache] Already initialized
//! Stopping (signal)...
//! [db] Destroying...
//! [db] Destroyed
//! ```
//!
//! For structured logging or metrics, implement a custom
//! [`Subscribe`](super::Subscribe) instead.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Renders lifecycle events to stdout.
pub struct LogWriter;

fn scope(e: &Event) -> &str {
    e.service.as_deref().unwrap_or("?")
}

fn reason(e: &Event) -> &str {
    e.reason.as_deref().unwrap_or("no reason")
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::Starting => println!("Starting..."),
            EventKind::Stopping => println!("Stopping ({})...", reason(e)),
            EventKind::ServiceInitializing => println!("[{}] Initializing...", scope(e)),
            EventKind::ServiceReady => println!("[{}] Ready", scope(e)),
            EventKind::ServiceUnresolved => {
                println!("[{}] Started as an unresolved plug; value not ready", scope(e));
            }
            EventKind::ServiceAlreadyRunning => println!("[{}] Already initialized", scope(e)),
            EventKind::ServiceFailed => println!("[{}] Failed: {}", scope(e), reason(e)),
            EventKind::ServiceDestroying => println!("[{}] Destroying...", scope(e)),
            EventKind::ServiceDestroyed => println!("[{}] Destroyed", scope(e)),
            EventKind::ServiceMessage => println!("[{}] {}", scope(e), reason(e)),
            EventKind::PluginMerging => {
                println!("Merging plugin before level {}", e.level.unwrap_or(0));
            }
            EventKind::PluginMerged => {
                println!("Plugin merged before level {}", e.level.unwrap_or(0));
            }
            EventKind::PluginRemoved => {
                println!("Plugin removed before level {}", e.level.unwrap_or(0));
            }
            EventKind::MergeFailed => println!("Plugin merge failed: {}", reason(e)),
            EventKind::ShutdownRequested => println!("Shutdown requested"),
            EventKind::GraceDefaulted => {
                println!("Graceful shutdown timeout not configured; defaulting to 60s");
            }
            EventKind::ShutdownTimedOut => {
                println!("Graceful shutdown timed out; forcing termination");
            }
            EventKind::StartAborted => {
                println!("Start failed: {}; shutting down", reason(e));
            }
            EventKind::StopFailed => println!("Stop failed: {}", reason(e)),
            EventKind::ForcingExit => println!("Exiting (status {})", e.status.unwrap_or(0)),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
