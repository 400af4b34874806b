//! Registry configuration.
//!
//! [`Config`] centralizes the traversal and shutdown knobs. It is set at
//! construction (`Registry::new` / `RegistryBuilder::with_config`) and may be
//! adjusted before the first traversal through `Registry::configure`.
//!
//! ## Field semantics
//! - `parallel_start_groups` / `parallel_stop_groups`: within-level policy —
//!   parallel ("all initiated together, all awaited together") versus strict
//!   declaration order.
//! - `graceful_shutdown_timeout`: `None` means unset; the first
//!   `launch`/`shutdown` warns and fixes it at [`DEFAULT_GRACE`].
//! - `force_exit_after_shutdown`: terminate the process with status 0 even
//!   after a clean stop.
//! - `verbose`: install the built-in log writer when no custom subscribers
//!   were provided.
//! - `bus_capacity`: ring buffer size of the event channel (min 1).

use std::time::Duration;

/// Grace period applied when none was configured.
pub(crate) const DEFAULT_GRACE: Duration = Duration::from_secs(60);

/// Configuration for a registry.
#[derive(Clone, Debug)]
pub struct Config {
    /// Start the services of a level concurrently.
    pub parallel_start_groups: bool,

    /// Stop the services of a level concurrently.
    pub parallel_stop_groups: bool,

    /// Maximum time `shutdown` waits for `stop` before forcing termination.
    ///
    /// `None` = unset; a warning is published and [`DEFAULT_GRACE`] applied
    /// when `launch` or `shutdown` first needs it.
    pub graceful_shutdown_timeout: Option<Duration>,

    /// Terminate the process with status 0 after a clean shutdown.
    pub force_exit_after_shutdown: bool,

    /// Emit human-readable log lines through the built-in writer.
    pub verbose: bool,

    /// Capacity of the event bus ring buffer.
    ///
    /// Slow subscribers lagging behind more than this many events skip the
    /// oldest ones. Minimum value is 1 (enforced by the bus).
    pub bus_capacity: usize,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `parallel_start_groups = true`
    /// - `parallel_stop_groups = true`
    /// - `graceful_shutdown_timeout = None` (warned and defaulted to 60s)
    /// - `force_exit_after_shutdown = false`
    /// - `verbose = true`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            parallel_start_groups: true,
            parallel_stop_groups: true,
            graceful_shutdown_timeout: None,
            force_exit_after_shutdown: false,
            verbose: true,
            bus_capacity: 1024,
        }
    }
}
