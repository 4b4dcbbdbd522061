//! Routing-key extraction.
//!
//! A node's filter pulls the "handler" a given event pertains to (a player, a
//! block, an instance id). The extracted key drives the per-node predicate
//! gate and the mapped-children routing table. Keys are ordinary hashable
//! values; they are lent to a visitor so the dispatch path never clones or
//! boxes them.

use std::any::{Any, TypeId};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::event::{Event, EventType};

/// A routing key extracted from an event.
///
/// Blanket-implemented for every `Eq + Hash + Send + Sync + 'static` value;
/// `dyn HandlerKey` is itself `Eq + Hash`, which lets the mapped-children
/// table be probed by reference.
pub trait HandlerKey: Any + Send + Sync {
    fn dyn_eq(&self, other: &dyn HandlerKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<K: Eq + Hash + Send + Sync + 'static> HandlerKey for K {
    fn dyn_eq(&self, other: &dyn HandlerKey) -> bool {
        let any: &dyn Any = other;
        any.downcast_ref::<K>().is_some_and(|other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        // Two keys of different types never compare equal, so their hashes
        // must diverge as well.
        TypeId::of::<K>().hash(&mut state);
        self.hash(&mut state);
    }
}

impl PartialEq for dyn HandlerKey {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(other)
    }
}

impl Eq for dyn HandlerKey {}

impl Hash for dyn HandlerKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dyn_hash(state);
    }
}

impl dyn HandlerKey {
    /// Borrows the erased key back as a `K`.
    #[inline]
    pub fn downcast_ref<K: HandlerKey>(&self) -> Option<&K> {
        let any: &dyn Any = self;
        any.downcast_ref::<K>()
    }
}

/// Extracts the routing key an event pertains to.
///
/// The filter also fixes the base event type of any node built from it.
pub trait EventFilter: Send + Sync {
    /// The greatest event type this filter accepts.
    fn event_type(&self) -> &'static EventType;

    /// Extracts the key from `event` and lends it to `visit`. `visit` is not
    /// called when `event` is neither of the filtered type nor a descendant
    /// exposing a view of it.
    fn visit_handler(&self, event: &dyn Event, visit: &mut dyn FnMut(&dyn HandlerKey));
}

struct FromFn<E, K, F> {
    extract: F,
    _marker: PhantomData<fn(&E) -> K>,
}

impl<E, K, F> EventFilter for FromFn<E, K, F>
where
    E: Event,
    K: HandlerKey,
    F: Fn(&E) -> K + Send + Sync,
{
    fn event_type(&self) -> &'static EventType {
        E::event_type()
    }

    fn visit_handler(&self, event: &dyn Event, visit: &mut dyn FnMut(&dyn HandlerKey)) {
        // A node admits every descendant of its filtered type, so the
        // extraction must reach subtype events through their super views.
        if let Some(event) = event.view::<E>() {
            let key = (self.extract)(event);
            visit(&key);
        }
    }
}

/// Filter keyed by the value `extract` pulls out of each event.
pub fn from_fn<E, K, F>(extract: F) -> Arc<dyn EventFilter>
where
    E: Event,
    K: HandlerKey,
    F: Fn(&E) -> K + Send + Sync + 'static,
{
    Arc::new(FromFn {
        extract,
        _marker: PhantomData,
    })
}

/// Filter with no meaningful handler; every event maps to the unit key.
pub fn unit<E: Event>() -> Arc<dyn EventFilter> {
    from_fn(|_: &E| ())
}
