//! The context handed to every start function.
//!
//! A [`Context`] bundles what a starting service may touch:
//! - a read view of already-started services (guarded, synchronous access),
//! - the environment collaborator with typed validated accessors,
//! - a logging function scoped to the service name,
//! - the plug factory for forward references.
//!
//! The `restricted` variant is used for plug-override dry runs: it carries an
//! empty service map and a [`NullEnv`], leaving only the plug factory usable.

use std::any::Any;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::accessor::{Lookup, ServiceMap};
use crate::env::{EnvSource, NullEnv};
use crate::error::{AccessError, ServiceError};
use crate::events::{Bus, Event, EventKind};
use crate::services::definition::ServiceInstance;
use crate::services::plug::Plug;

/// Capabilities available to a service while it starts.
#[derive(Clone)]
pub struct Context {
    service: Arc<str>,
    services: Arc<ServiceMap>,
    env: Arc<dyn EnvSource>,
    bus: Bus,
}

impl Context {
    pub(crate) fn new(
        service: Arc<str>,
        services: Arc<ServiceMap>,
        env: Arc<dyn EnvSource>,
        bus: Bus,
    ) -> Self {
        Self {
            service,
            services,
            env,
            bus,
        }
    }

    /// Builds the restricted context used for plug-override dry runs.
    ///
    /// Only the plug factory is usable: the service map is empty and the
    /// environment has no variables. Published log messages go nowhere.
    pub(crate) fn restricted(service: Arc<str>) -> Self {
        Self {
            service,
            services: Arc::new(ServiceMap::default()),
            env: Arc::new(NullEnv),
            bus: Bus::new(1),
        }
    }

    /// Name of the service this context belongs to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Typed read access to an already-started service.
    ///
    /// Fails synchronously if the name is unregistered, not started, an
    /// unresolved plug, or holds a different type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, AccessError> {
        self.services.get(name)
    }

    /// Untyped read access to an already-started service.
    pub fn instance(&self, name: &str) -> Result<ServiceInstance, AccessError> {
        self.services.instance(name)
    }

    /// Tagged lookup distinguishing the failure modes.
    ///
    /// Returns the plug handle for unresolved forward references so the
    /// caller can hold it and probe readiness later.
    pub fn lookup(&self, name: &str) -> Lookup {
        self.services.lookup(name)
    }

    /// Raw access to the environment collaborator.
    pub fn env(&self) -> &dyn EnvSource {
        self.env.as_ref()
    }

    /// Value of an environment variable, if set.
    pub fn env_var(&self, name: &str) -> Option<String> {
        self.env.var(name)
    }

    /// Value of an environment variable, failing if unset.
    pub fn env_require(&self, name: &str) -> Result<String, ServiceError> {
        self.env.var(name).ok_or_else(|| ServiceError::Env {
            name: name.to_string(),
            reason: "not set".to_string(),
        })
    }

    /// Parsed value of an environment variable, failing if unset or invalid.
    pub fn env_parse<T>(&self, name: &str) -> Result<T, ServiceError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.env_require(name)?
            .parse()
            .map_err(|e: T::Err| ServiceError::Env {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Publishes a log message scoped to this service.
    pub fn log(&self, message: impl Into<String>) {
        self.bus.publish(
            Event::new(EventKind::ServiceMessage)
                .with_service(self.service.clone())
                .with_reason(message.into()),
        );
    }

    /// Creates a plug for this service: a forward-reference placeholder to
    /// be resolved by a later override.
    pub fn plug(&self) -> Plug {
        Plug::new(self.service.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restricted() -> Context {
        Context::restricted(Arc::from("svc"))
    }

    #[test]
    fn restricted_context_exposes_only_the_plug_factory() {
        let ctx = restricted();
        assert!(ctx.get::<u32>("anything").is_err());
        assert_eq!(ctx.env_var("PATH"), None);

        let plug = ctx.plug();
        assert_eq!(plug.name(), "svc");
        assert!(!plug.is_ready());
    }

    #[test]
    fn env_parse_validates() {
        struct Fixed;
        impl EnvSource for Fixed {
            fn var(&self, name: &str) -> Option<String> {
                (name == "PORT").then(|| "not-a-number".to_string())
            }
        }

        let ctx = Context::new(
            Arc::from("svc"),
            Arc::new(ServiceMap::default()),
            Arc::new(Fixed),
            Bus::new(1),
        );
        assert!(matches!(
            ctx.env_parse::<u16>("PORT"),
            Err(ServiceError::Env { .. })
        ));
        assert!(matches!(
            ctx.env_parse::<u16>("MISSING"),
            Err(ServiceError::Env { .. })
        ));
    }
}
