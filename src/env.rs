//! Environment access collaborator.
//!
//! Environment parsing and validation are external to the orchestrator; the
//! seam is the [`EnvSource`] trait. Production code uses [`ProcessEnv`] (the
//! real process environment); the restricted context used for plug-override
//! dry runs uses [`NullEnv`]; tests may supply a map-backed fake.
//!
//! Typed, validated accessors are built on top of the raw `var` lookup by
//! [`Context`](crate::Context) (`env_require`, `env_parse`).

/// Source of environment variables.
///
/// Implementations must be cheap to call; the orchestrator performs no
/// caching of its own.
pub trait EnvSource: Send + Sync + 'static {
    /// Returns the raw value of `name`, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment via `std::env`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// An environment with no variables.
///
/// Used by the restricted context handed to plug-override dry runs, where
/// only the plug factory capability is meant to be usable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEnv;

impl EnvSource for NullEnv {
    fn var(&self, _name: &str) -> Option<String> {
        None
    }
}
