//! Error types used by the servisor registry and runtime.
//!
//! This module defines four error enums, split by the phase that raises them:
//!
//! - [`RegistryError`] — synchronous, fatal errors during graph construction.
//! - [`LifecycleError`] — errors raised while traversing levels (start/stop/shutdown).
//! - [`AccessError`] — synchronous errors from the read accessor.
//! - [`ServiceError`] — errors raised by individual service start/stop functions.
//!
//! The runtime-facing enums provide `as_label` helpers for logging/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors raised while building the service graph.
///
/// All of these are synchronous and fatal: the registration call that caused
/// them has no effect on the registry.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The group name is already attached to an earlier level.
    #[error("group {group:?} is already used by level {level}")]
    DuplicateGroup {
        /// The rejected group name.
        group: String,
        /// The level that already carries it.
        level: u32,
    },

    /// A registration tried to replace an existing service that is not a plug.
    ///
    /// The diagnostic names the offending key and the likely cause, determined
    /// by dry-invoking the existing start function (see `Registry::up`).
    #[error("cannot override {name:?}: {fault}")]
    InvalidOverride {
        /// The service name under dispute.
        name: String,
        /// Why the existing entry cannot be treated as a plug.
        fault: OverrideFault,
    },

    /// A stop handler referenced a name that was never registered.
    #[error("no service registered under {name:?}")]
    UnknownService {
        /// The unknown name.
        name: String,
    },
}

/// Why an existing entry was rejected as a plug override target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverrideFault {
    /// The existing start function did not complete on a single poll.
    #[error("its start function is async")]
    AsyncInit,

    /// The existing start function completed but produced a non-plug value.
    #[error("its start function did not return a plug")]
    NotAPlug,

    /// The existing start function returned an error when dry-invoked.
    #[error("its start function raised an error: {error}")]
    Raised {
        /// The error message produced by the dry invocation.
        error: String,
    },
}

/// # Errors raised by a level traversal.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A start function failed; the remaining traversal was aborted.
    #[error("service {service:?} failed to start: {source}")]
    StartFailed {
        /// Name of the failing service.
        service: String,
        /// The underlying failure.
        source: ServiceError,
    },

    /// A stop function failed; the remaining traversal was aborted.
    #[error("service {service:?} failed to stop: {source}")]
    StopFailed {
        /// Name of the failing service.
        service: String,
        /// The underlying failure.
        source: ServiceError,
    },

    /// A plugin definition collides with a name already present in the host.
    ///
    /// Raised before any plugin service starts.
    #[error("plugin service {name:?} collides with an existing registration")]
    MergeCollision {
        /// The conflicting key.
        name: String,
    },

    /// A plugin factory failed to produce a sub-registry.
    #[error("plugin factory failed: {source}")]
    PluginBuildFailed {
        /// The underlying failure.
        source: ServiceError,
    },

    /// A traversal was asked for a name that was never registered.
    #[error("no service registered under {name:?}")]
    UnknownService {
        /// The unknown name.
        name: String,
    },

    /// The shutdown grace period elapsed before `stop` settled.
    #[error("graceful shutdown exceeded {grace:?}; forcing termination")]
    ShutdownTimedOut {
        /// The configured grace duration.
        grace: Duration,
    },
}

impl LifecycleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleError::StartFailed { .. } => "start_failed",
            LifecycleError::StopFailed { .. } => "stop_failed",
            LifecycleError::MergeCollision { .. } => "merge_collision",
            LifecycleError::PluginBuildFailed { .. } => "plugin_build_failed",
            LifecycleError::UnknownService { .. } => "unknown_service",
            LifecycleError::ShutdownTimedOut { .. } => "shutdown_timed_out",
        }
    }
}

/// # Errors raised by the read accessor.
///
/// All of these surface synchronously at access time, before any
/// asynchronous work happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The name was never registered.
    #[error("no service registered under {name:?}")]
    NotRegistered {
        /// The unknown name.
        name: String,
    },

    /// The service is registered but has not been started (or was stopped).
    #[error("service {name:?} has not been started")]
    NotStarted {
        /// The service name.
        name: String,
    },

    /// The service currently resolves to a plug that no override has filled.
    ///
    /// Probe [`Plug::is_ready`](crate::Plug::is_ready) before dereferencing.
    #[error("service {name:?} is an unresolved plug")]
    UnresolvedPlug {
        /// The service name.
        name: String,
    },

    /// The instance exists but holds a value of a different type.
    #[error("service {name:?} holds a value of a different type")]
    WrongType {
        /// The service name.
        name: String,
    },
}

impl AccessError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            AccessError::NotRegistered { .. } => "not_registered",
            AccessError::NotStarted { .. } => "not_started",
            AccessError::UnresolvedPlug { .. } => "unresolved_plug",
            AccessError::WrongType { .. } => "wrong_type",
        }
    }
}

/// # Errors produced by service start/stop functions.
///
/// User code returns these from the async closures registered via
/// [`service`](crate::service) and [`stopper`](crate::stopper).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The service could not start or stop.
    #[error("{error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },

    /// An environment variable was missing or failed validation.
    #[error("environment variable {name} is invalid: {reason}")]
    Env {
        /// The variable name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl ServiceError {
    /// Shorthand for [`ServiceError::Failed`].
    pub fn failed(error: impl Into<String>) -> Self {
        ServiceError::Failed {
            error: error.into(),
        }
    }
}

impl From<AccessError> for ServiceError {
    /// Lets start functions propagate accessor failures with `?`.
    fn from(err: AccessError) -> Self {
        ServiceError::Failed {
            error: err.to_string(),
        }
    }
}
