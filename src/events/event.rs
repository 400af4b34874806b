//! Event vocabulary of the orchestrator.
//!
//! [`EventKind`] classifies events into four groups:
//! - **Registry events**: a traversal began (`Starting`, `Stopping`).
//! - **Service events**: one definition's progress through its lifecycle.
//! - **Plugin events**: sub-registry merge/unmerge progress.
//! - **Shutdown events**: signal arrival, grace handling, forced termination.
//!
//! [`Event`] carries the kind plus optional metadata (service name, reason,
//! level, exit status). Each event gets a globally unique, monotonically
//! increasing sequence number for ordering.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Registry events ===
    /// A start traversal began.
    Starting,

    /// A stop traversal began.
    ///
    /// Sets `reason`.
    Stopping,

    // === Service events ===
    /// A service's start function is being invoked.
    ///
    /// Sets `service`, `level`.
    ServiceInitializing,

    /// A service's start function completed with a usable value.
    ///
    /// Sets `service`.
    ServiceReady,

    /// A service's start function completed, but the value is an unresolved
    /// plug — consumers cannot dereference it yet. Ordering hazard.
    ///
    /// Sets `service`.
    ServiceUnresolved,

    /// A start traversal reached a definition that is already running.
    ///
    /// Sets `service`.
    ServiceAlreadyRunning,

    /// A start or stop function returned an error.
    ///
    /// Sets `service`, `reason`.
    ServiceFailed,

    /// A service's stop function is being invoked.
    ///
    /// Sets `service`.
    ServiceDestroying,

    /// A service's stop function completed.
    ///
    /// Sets `service`.
    ServiceDestroyed,

    /// A scoped log message from a service's context.
    ///
    /// Sets `service`, `reason` (the message).
    ServiceMessage,

    // === Plugin events ===
    /// A plugin binding is being materialized and merged.
    ///
    /// Sets `level` (the level the merge precedes).
    PluginMerging,

    /// A plugin's definitions were copied into the host.
    ///
    /// Sets `level`.
    PluginMerged,

    /// A plugin was torn down and its definitions removed from the host.
    ///
    /// Sets `level`.
    PluginRemoved,

    /// A plugin merge was aborted (name collision or factory failure).
    ///
    /// Sets `reason`.
    MergeFailed,

    // === Shutdown events ===
    /// A termination signal was observed.
    ShutdownRequested,

    /// No grace period was configured; the default is being applied.
    GraceDefaulted,

    /// The grace period elapsed before `stop` settled.
    ShutdownTimedOut,

    /// `launch` caught a start failure and is shutting down as cleanup.
    ///
    /// Sets `reason`.
    StartAborted,

    /// `shutdown` caught a stop failure and will force termination.
    ///
    /// Sets `reason`.
    StopFailed,

    /// The process is about to be terminated through the process handle.
    ///
    /// Sets `status`.
    ForcingExit,
}

/// A lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - remaining optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the service, if applicable.
    pub service: Option<Arc<str>>,
    /// Human-readable reason or message.
    pub reason: Option<Arc<str>>,
    /// Level the event relates to, if applicable.
    pub level: Option<u32>,
    /// Process exit status, for [`EventKind::ForcingExit`].
    pub status: Option<i32>,
}

impl Event {
    /// Creates a new event of the given kind with the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            reason: None,
            level: None,
            status: None,
        }
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attaches a human-readable reason or message.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a level number.
    #[inline]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    /// Attaches a process exit status.
    #[inline]
    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::Starting);
        let b = Event::new(EventKind::Starting);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::new(EventKind::ServiceFailed)
            .with_service("db")
            .with_reason("boom")
            .with_level(2);
        assert_eq!(ev.service.as_deref(), Some("db"));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
        assert_eq!(ev.level, Some(2));
    }
}
