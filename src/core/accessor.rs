//! The read accessor over the live service map.
//!
//! Every context and the registry itself read running instances through
//! [`ServiceMap`]. The map is written only by the single active traversal
//! (and by the registration phase), so a synchronous `RwLock` suffices and
//! access failures surface synchronously, before any asynchronous work.
//!
//! [`Lookup`] is the tagged result of a guarded lookup; `get::<T>` is the
//! throwing typed accessor built on top of it. Unresolved forward references
//! are reported as [`Lookup::Unresolved`] carrying the plug handle, so
//! probe-first consumers can hold it and check readiness later; the typed
//! accessor fails on them instead.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::AccessError;
use crate::services::{Plug, ServiceInstance};

/// Result of a guarded service lookup.
#[derive(Clone)]
pub enum Lookup {
    /// The service is running and its value is dereferenceable.
    ///
    /// A resolved plug is forwarded: the carried instance is the real value.
    Ready(ServiceInstance),
    /// The name was never registered.
    NotFound,
    /// The name is registered but currently has no instance.
    NotStarted,
    /// The name currently resolves to an unresolved plug; the handle can be
    /// held and probed.
    Unresolved(Plug),
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Ready(_) => f.write_str("Ready"),
            Lookup::NotFound => f.write_str("NotFound"),
            Lookup::NotStarted => f.write_str("NotStarted"),
            Lookup::Unresolved(p) => f.debug_tuple("Unresolved").field(p).finish(),
        }
    }
}

/// Per-name slot: the live instance plus, for overridden plugs, the cell
/// that earlier-level consumers share until the override starts.
#[derive(Default)]
struct Slot {
    instance: Option<ServiceInstance>,
    pending: Option<Plug>,
}

/// Shared name → instance view.
#[derive(Default)]
pub(crate) struct ServiceMap {
    slots: RwLock<HashMap<Arc<str>, Slot>>,
}

impl ServiceMap {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Arc<str>, Slot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Arc<str>, Slot>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a name with no instance yet. Keeps an existing slot intact.
    pub(crate) fn register(&self, name: Arc<str>) {
        self.write().entry(name).or_default();
    }

    /// Attaches the pending plug cell for an overridden name.
    pub(crate) fn set_pending(&self, name: &str, plug: Plug) {
        if let Some(slot) = self.write().get_mut(name) {
            slot.pending = Some(plug);
        }
    }

    /// Materializes the instance for a started service.
    pub(crate) fn commit(&self, name: &str, instance: ServiceInstance) {
        if let Some(slot) = self.write().get_mut(name) {
            slot.instance = Some(instance);
        }
    }

    /// Clears the instance of a stopped service; the slot persists so the
    /// name stays registered for a later restart.
    pub(crate) fn clear(&self, name: &str) {
        if let Some(slot) = self.write().get_mut(name) {
            slot.instance = None;
        }
    }

    /// Removes a name entirely (plugin unmerge).
    pub(crate) fn remove(&self, name: &str) {
        self.write().remove(name);
    }

    /// Raw slot instance, without plug forwarding.
    pub(crate) fn raw(&self, name: &str) -> Option<ServiceInstance> {
        self.read().get(name).and_then(|s| s.instance.clone())
    }

    /// Guarded lookup with plug forwarding.
    pub(crate) fn lookup(&self, name: &str) -> Lookup {
        let slots = self.read();
        let Some(slot) = slots.get(name) else {
            return Lookup::NotFound;
        };
        match &slot.instance {
            Some(instance) => match instance.downcast_ref::<Plug>() {
                Some(plug) => match plug.get() {
                    Ok(value) => Lookup::Ready(value),
                    Err(_) => Lookup::Unresolved(plug.clone()),
                },
                None => Lookup::Ready(instance.clone()),
            },
            None => match &slot.pending {
                Some(plug) => Lookup::Unresolved(plug.clone()),
                None => Lookup::NotStarted,
            },
        }
    }

    /// Untyped throwing accessor.
    pub(crate) fn instance(&self, name: &str) -> Result<ServiceInstance, AccessError> {
        match self.lookup(name) {
            Lookup::Ready(instance) => Ok(instance),
            Lookup::NotFound => Err(AccessError::NotRegistered {
                name: name.to_string(),
            }),
            Lookup::NotStarted => Err(AccessError::NotStarted {
                name: name.to_string(),
            }),
            Lookup::Unresolved(_) => Err(AccessError::UnresolvedPlug {
                name: name.to_string(),
            }),
        }
    }

    /// Typed throwing accessor.
    pub(crate) fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, AccessError> {
        self.instance(name)?
            .downcast::<T>()
            .map_err(|_| AccessError::WrongType {
                name: name.to_string(),
            })
    }
}
