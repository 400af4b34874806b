//! Forward-reference placeholders.
//!
//! A [`Plug`] stands in for a service whose real value is produced by an
//! override at a later level. Every clone of a plug shares one indirection
//! cell, so resolving the cell rewires all previously distributed handles at
//! once. Resolution is a single guarded write performed only by the engine
//! when the overriding definition's start function completes.
//!
//! Consumers that receive a plug should probe [`Plug::is_ready`] before
//! dereferencing; dereferencing an unresolved plug fails.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::AccessError;
use crate::services::definition::ServiceInstance;

/// Shared indirection cell: empty until the engine resolves it.
struct PlugCell {
    value: RwLock<Option<ServiceInstance>>,
}

/// A forward-reference handle to a not-yet-existing service value.
///
/// Cheap to clone; all clones observe the same resolution.
#[derive(Clone)]
pub struct Plug {
    name: Arc<str>,
    cell: Arc<PlugCell>,
}

impl Plug {
    pub(crate) fn new(name: Arc<str>) -> Self {
        Self {
            name,
            cell: Arc::new(PlugCell {
                value: RwLock::new(None),
            }),
        }
    }

    /// Name of the service this plug stands in for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once an override has resolved the plug.
    pub fn is_ready(&self) -> bool {
        self.cell
            .value
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Dereferences the plug, failing if it is unresolved.
    pub fn get(&self) -> Result<ServiceInstance, AccessError> {
        self.cell
            .value
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AccessError::UnresolvedPlug {
                name: self.name.to_string(),
            })
    }

    /// Dereferences and downcasts the plug to a concrete type.
    pub fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>, AccessError> {
        self.get()?
            .downcast::<T>()
            .map_err(|_| AccessError::WrongType {
                name: self.name.to_string(),
            })
    }

    /// Resolves the cell. First write wins; returns whether it took effect.
    pub(crate) fn resolve(&self, value: ServiceInstance) -> bool {
        let mut slot = self.cell.value.write().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    /// Clears the cell back to unresolved (on stop, so a restart re-resolves).
    pub(crate) fn reset(&self) {
        let mut slot = self.cell.value.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

impl fmt::Debug for Plug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plug")
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plug(name: &str) -> Plug {
        Plug::new(Arc::from(name))
    }

    #[test]
    fn unresolved_plug_fails_to_dereference() {
        let p = plug("svc");
        assert!(!p.is_ready());
        assert_eq!(
            p.get().unwrap_err(),
            AccessError::UnresolvedPlug {
                name: "svc".to_string()
            }
        );
    }

    #[test]
    fn resolution_reaches_every_clone() {
        let p = plug("svc");
        let held_before = p.clone();

        assert!(p.resolve(Arc::new(7u32)));
        assert!(held_before.is_ready());
        assert_eq!(*held_before.get_as::<u32>().unwrap(), 7);
        assert_eq!(*p.clone().get_as::<u32>().unwrap(), 7);
    }

    #[test]
    fn first_resolution_wins() {
        let p = plug("svc");
        assert!(p.resolve(Arc::new(1u32)));
        assert!(!p.resolve(Arc::new(2u32)));
        assert_eq!(*p.get_as::<u32>().unwrap(), 1);
    }

    #[test]
    fn reset_returns_to_unresolved() {
        let p = plug("svc");
        p.resolve(Arc::new(1u32));
        p.reset();
        assert!(!p.is_ready());
        assert!(p.get().is_err());
    }

    #[test]
    fn wrong_type_is_reported() {
        let p = plug("svc");
        p.resolve(Arc::new("text".to_string()));
        assert_eq!(
            p.get_as::<u32>().unwrap_err(),
            AccessError::WrongType {
                name: "svc".to_string()
            }
        );
    }
}
