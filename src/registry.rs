//! # Registries (orientation)
//!
//! A [`Registry`] maps ids to shared handles (`Arc<T>`) and display names to
//! ids. The same type backs the tool, agent and guardrail registries.
//!
//! - Only the owning [`Authority`] may register or unregister.
//! - Names are unique among live entries only. Unregistering frees the name.
//! - The id list is append-only. An unregistered id stays enumerable through
//!   [`Registry::id_at`] but no longer resolves to a handle.
//! - Ids derive from the handle and its registration order, never from the
//!   name, so re-registering under a freed name yields a fresh id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::auth::{Authority, Principal};
use crate::error::{AgentsError, Result};
use crate::events::{Event, SharedSink};
use crate::ids::{Id, IdAllocator};

/// Something that can live in a [`Registry`].
pub trait Registrable: Send + Sync {
    /// Name the handle currently answers to.
    fn display_name(&self) -> String;

    /// Capability metadata published with the registration event.
    fn metadata(&self) -> Value {
        Value::Null
    }
}

struct Entries<T: ?Sized> {
    ids: Vec<Id>,
    handles: HashMap<Id, Option<Arc<T>>>,
    names: HashMap<String, Id>,
}

impl<T: ?Sized> Default for Entries<T> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            handles: HashMap::new(),
            names: HashMap::new(),
        }
    }
}

/// Name → id → handle lookup with append-only id history.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    authority: Authority,
    ids: Arc<IdAllocator>,
    events: SharedSink,
    entries: RwLock<Entries<T>>,
}

impl<T: ?Sized + Registrable> Registry<T> {
    /// `kind` names the registry in errors and events ("tool", "agent", ...).
    pub fn new(
        kind: &'static str,
        authority: Authority,
        ids: Arc<IdAllocator>,
        events: SharedSink,
    ) -> Self {
        Self {
            kind,
            authority,
            ids,
            events,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Register `handle` and return its new id.
    pub fn register(&self, caller: &Principal, handle: Arc<T>) -> Result<Id> {
        self.authority
            .ensure(caller, &format!("register {}", self.kind))?;
        let name = handle.display_name();
        let metadata = handle.metadata();

        let id = {
            let mut entries = self.entries.write();
            if entries.names.contains_key(&name) {
                return Err(AgentsError::DuplicateName { name });
            }
            let mut context = (entries.ids.len() as u64).to_be_bytes().to_vec();
            let addr = Arc::as_ptr(&handle).cast::<()>() as usize;
            context.extend_from_slice(&(addr as u64).to_be_bytes());
            context.extend_from_slice(self.kind.as_bytes());

            let id = self.ids.next(caller, &context);
            entries.ids.push(id);
            entries.handles.insert(id, Some(handle));
            entries.names.insert(name.clone(), id);
            id
        };

        debug!(registry = self.kind, id = %id.short(), name = %name, "Handle registered");
        self.events.emit(Event::Registered {
            registry: self.kind.to_string(),
            id,
            name,
            metadata,
        });
        Ok(id)
    }

    /// Clear the handle behind `id` and free its name.
    pub fn unregister(&self, caller: &Principal, id: &Id) -> Result<()> {
        self.authority
            .ensure(caller, &format!("unregister {}", self.kind))?;

        let name = {
            let mut entries = self.entries.write();
            let handle = entries
                .handles
                .get_mut(id)
                .and_then(Option::take)
                .ok_or_else(|| AgentsError::not_found(self.kind, id))?;
            let name = handle.display_name();
            if entries.names.get(&name) == Some(id) {
                entries.names.remove(&name);
            }
            name
        };

        debug!(registry = self.kind, id = %id.short(), name = %name, "Handle unregistered");
        self.events.emit(Event::Unregistered {
            registry: self.kind.to_string(),
            id: *id,
            name,
        });
        Ok(())
    }

    pub fn resolve(&self, id: &Id) -> Result<Arc<T>> {
        self.entries
            .read()
            .handles
            .get(id)
            .and_then(|h| h.clone())
            .ok_or_else(|| AgentsError::not_found(self.kind, id))
    }

    pub fn resolve_by_name(&self, name: &str) -> Result<Id> {
        self.entries
            .read()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| AgentsError::not_found(self.kind, name))
    }

    /// Number of ids ever registered, live or not.
    pub fn count(&self) -> usize {
        self.entries.read().ids.len()
    }

    pub fn id_at(&self, index: usize) -> Result<Id> {
        let entries = self.entries.read();
        entries
            .ids
            .get(index)
            .copied()
            .ok_or(AgentsError::IndexOutOfBounds {
                index,
                len: entries.ids.len(),
            })
    }

    pub fn is_live(&self, id: &Id) -> bool {
        matches!(self.entries.read().handles.get(id), Some(Some(_)))
    }

    /// Live entries in registration order.
    pub fn live(&self) -> Vec<(Id, Arc<T>)> {
        let entries = self.entries.read();
        entries
            .ids
            .iter()
            .filter_map(|id| {
                entries
                    .handles
                    .get(id)
                    .and_then(|h| h.clone())
                    .map(|h| (*id, h))
            })
            .collect()
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("count", &entries.ids.len())
            .field("live", &entries.names.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use pretty_assertions::assert_eq;

    struct Named(String);

    impl Registrable for Named {
        fn display_name(&self) -> String {
            self.0.clone()
        }

        fn metadata(&self) -> Value {
            serde_json::json!({"kind": "named"})
        }
    }

    fn registry(sink: MemorySink) -> Registry<Named> {
        Registry::new(
            "thing",
            Authority::new(Principal::new("owner")),
            Arc::new(IdAllocator::new()),
            Arc::new(sink),
        )
    }

    fn owner() -> Principal {
        Principal::new("owner")
    }

    #[test]
    fn test_register_and_resolve() {
        let reg = registry(MemorySink::new());
        let id = reg
            .register(&owner(), Arc::new(Named("alpha".into())))
            .unwrap();

        assert_eq!(reg.resolve(&id).unwrap().0, "alpha");
        assert_eq!(reg.resolve_by_name("alpha").unwrap(), id);
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.id_at(0).unwrap(), id);
        assert!(reg.is_live(&id));
    }

    #[test]
    fn test_register_requires_owner() {
        let reg = registry(MemorySink::new());
        let err = reg
            .register(&Principal::new("mallory"), Arc::new(Named("x".into())))
            .unwrap_err();
        assert!(matches!(err, AgentsError::Unauthorized { .. }));
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn test_duplicate_live_name_rejected() {
        let reg = registry(MemorySink::new());
        reg.register(&owner(), Arc::new(Named("dup".into())))
            .unwrap();
        let err = reg
            .register(&owner(), Arc::new(Named("dup".into())))
            .unwrap_err();
        assert!(matches!(err, AgentsError::DuplicateName { ref name } if name == "dup"));
    }

    #[test]
    fn test_unregister_frees_name_and_keeps_history() {
        let sink = MemorySink::new();
        let reg = registry(sink.clone());
        let first = reg
            .register(&owner(), Arc::new(Named("calc".into())))
            .unwrap();
        reg.unregister(&owner(), &first).unwrap();

        assert!(!reg.is_live(&first));
        assert!(matches!(
            reg.resolve(&first),
            Err(AgentsError::NotFound { .. })
        ));
        assert!(reg.resolve_by_name("calc").is_err());

        let second = reg
            .register(&owner(), Arc::new(Named("calc".into())))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(reg.count(), 2);
        assert_eq!(reg.id_at(0).unwrap(), first);
        assert_eq!(reg.id_at(1).unwrap(), second);
        assert_eq!(reg.live().len(), 1);

        assert_eq!(sink.count(|e| matches!(e, Event::Registered { .. })), 2);
        assert_eq!(sink.count(|e| matches!(e, Event::Unregistered { .. })), 1);
    }

    #[test]
    fn test_unregister_unknown_or_twice() {
        let reg = registry(MemorySink::new());
        let id = reg
            .register(&owner(), Arc::new(Named("once".into())))
            .unwrap();
        reg.unregister(&owner(), &id).unwrap();
        assert!(matches!(
            reg.unregister(&owner(), &id),
            Err(AgentsError::NotFound { .. })
        ));
        assert!(matches!(
            reg.unregister(&Principal::new("mallory"), &id),
            Err(AgentsError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_index_out_of_bounds() {
        let reg = registry(MemorySink::new());
        reg.register(&owner(), Arc::new(Named("a".into())))
            .unwrap();
        let err = reg.id_at(1).unwrap_err();
        assert!(matches!(
            err,
            AgentsError::IndexOutOfBounds { index: 1, len: 1 }
        ));
    }

    #[test]
    fn test_registration_event_carries_metadata() {
        let sink = MemorySink::new();
        let reg = registry(sink.clone());
        reg.register(&owner(), Arc::new(Named("m".into())))
            .unwrap();
        match &sink.events()[0] {
            Event::Registered {
                registry,
                name,
                metadata,
                ..
            } => {
                assert_eq!(registry, "thing");
                assert_eq!(name, "m");
                assert_eq!(metadata["kind"], "named");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
