use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::binding::{BindingConsumer, EventBinding};
use crate::error::NodeError;
use crate::event::{Event, EventType};
use crate::filter::{EventFilter, HandlerKey};
use crate::handle::ListenerHandle;
use crate::listener::{EventListener, ListenerResult, from_fn};
use crate::lock;

/// Per-node gate consulted before each direct listener runs, with the event
/// and the key the node's filter extracted from it.
pub type Predicate = dyn Fn(&dyn Event, &dyn HandlerKey) -> bool + Send + Sync;

/// Per-event-type bag of listeners attached directly to a node. Direct
/// listeners keep insertion order; binding consumers are an identity set.
#[derive(Default)]
pub(crate) struct ListenerEntry {
    pub(crate) listeners: Vec<Arc<dyn EventListener>>,
    pub(crate) binding_consumers: Vec<BindingConsumer>,
}

/// A named vertex of the dispatch tree.
///
/// Nodes are created detached and shared behind `Arc`; attaching via
/// [`add_child`](EventNode::add_child) or [`map`](EventNode::map) sets the
/// parent back-reference. Every structural mutation runs under one
/// process-wide reentrant lock; dispatch reads a lock-free snapshot through
/// the node's [`ListenerHandle`]s.
pub struct EventNode {
    name: String,
    filter: Arc<dyn EventFilter>,
    predicate: Option<Arc<Predicate>>,
    event_type: &'static EventType,
    priority: AtomicI32,
    parent: Mutex<Weak<EventNode>>,
    children: Mutex<Vec<Arc<EventNode>>>,
    mapped: Mutex<HashMap<Arc<dyn HandlerKey>, Arc<EventNode>>>,
    listener_map: Mutex<HashMap<TypeId, ListenerEntry>>,
    handle_map: papaya::HashMap<TypeId, Arc<ListenerHandle>>,
}

impl EventNode {
    /// Node accepting every event of `E`, with no meaningful routing key.
    pub fn all<E: Event>(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), crate::filter::unit::<E>(), None)
    }

    /// Node whose base type and routing key come from `filter`.
    pub fn new(name: impl Into<String>, filter: Arc<dyn EventFilter>) -> Arc<Self> {
        Self::build(name.into(), filter, None)
    }

    /// Node that gates every direct listener behind `predicate`, called with
    /// the event and its extracted key.
    pub fn filtered(
        name: impl Into<String>,
        filter: Arc<dyn EventFilter>,
        predicate: impl Fn(&dyn Event, &dyn HandlerKey) -> bool + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::build(name.into(), filter, Some(Arc::new(predicate)))
    }

    /// Node that gates direct listeners on the extracted key alone.
    pub fn value<K: HandlerKey>(
        name: impl Into<String>,
        filter: Arc<dyn EventFilter>,
        predicate: impl Fn(&K) -> bool + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::filtered(name, filter, move |_event, key| {
            key.downcast_ref::<K>().is_some_and(|key| predicate(key))
        })
    }

    fn build(
        name: String,
        filter: Arc<dyn EventFilter>,
        predicate: Option<Arc<Predicate>>,
    ) -> Arc<Self> {
        let event_type = filter.event_type();
        Arc::new(Self {
            name,
            filter,
            predicate,
            event_type,
            priority: AtomicI32::new(0),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            mapped: Mutex::new(HashMap::new()),
            listener_map: Mutex::new(HashMap::new()),
            handle_map: papaya::HashMap::new(),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The greatest event type this node will ever observe.
    #[inline]
    pub fn event_type(&self) -> &'static EventType {
        self.event_type
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    /// Sets the sibling ordering weight. The new value takes effect the next
    /// time an affected handle is rebuilt; changing the priority does not by
    /// itself invalidate any handle.
    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn parent(&self) -> Option<Arc<EventNode>> {
        self.parent.lock().upgrade()
    }

    /// Snapshot of the direct children.
    pub fn children(&self) -> Vec<Arc<EventNode>> {
        self.children.lock().clone()
    }

    pub(crate) fn filter(&self) -> Arc<dyn EventFilter> {
        self.filter.clone()
    }

    pub(crate) fn predicate(&self) -> Option<Arc<Predicate>> {
        self.predicate.clone()
    }

    pub(crate) fn with_entry(&self, type_id: TypeId, read: impl FnOnce(&ListenerEntry)) {
        let map = self.listener_map.lock();
        if let Some(entry) = map.get(&type_id) {
            read(entry);
        }
    }

    pub(crate) fn has_entry(&self, type_id: TypeId) -> bool {
        self.listener_map.lock().contains_key(&type_id)
    }

    pub(crate) fn has_any_entry(&self) -> bool {
        !self.listener_map.lock().is_empty()
    }

    pub(crate) fn mapped_children(&self) -> Vec<Arc<EventNode>> {
        self.mapped.lock().values().cloned().collect()
    }

    pub(crate) fn mapped_child(&self, key: &dyn HandlerKey) -> Option<Arc<EventNode>> {
        self.mapped.lock().get(key).cloned()
    }

    /// Returns (creating if absent) the handle dispatching `E` from this
    /// node. Fails when `E` is not covered by the node's base type.
    pub fn get_handle<E: Event>(self: &Arc<Self>) -> Result<Arc<ListenerHandle>, NodeError> {
        self.get_handle_of(E::event_type())
    }

    pub fn get_handle_of(
        self: &Arc<Self>,
        event_type: &'static EventType,
    ) -> Result<Arc<ListenerHandle>, NodeError> {
        if !self.event_type.admits(event_type) {
            return Err(NodeError::TypeMismatch {
                base: self.event_type.name(),
                requested: event_type.name(),
            });
        }
        let handles = self.handle_map.pin();
        let handle = handles.get_or_insert_with(event_type.id(), || {
            Arc::new(ListenerHandle::new(Arc::downgrade(self), event_type))
        });
        Ok(handle.clone())
    }

    /// Dispatches `event` through `handle`. The steady-state path takes no
    /// lock: one validity load, one list snapshot, then the listeners.
    pub fn call(&self, event: &dyn Event, handle: &ListenerHandle) -> Result<(), NodeError> {
        if !handle.is_owned_by(self) {
            return Err(NodeError::WrongOwner(self.name.clone()));
        }
        if !handle.is_valid() {
            handle.update();
        }
        let listeners = handle.snapshot();
        for listener in listeners.iter() {
            listener(event);
        }
        Ok(())
    }

    /// Fetches (creating if absent) the handle for `E` and dispatches
    /// through it.
    pub fn call_event<E: Event>(self: &Arc<Self>, event: &E) -> Result<(), NodeError> {
        let handle = self.get_handle_of(E::event_type())?;
        self.call(event, &handle)
    }

    /// Whether `handle` currently flattens to at least one listener,
    /// rebuilding it first if needed.
    pub fn has_listener(&self, handle: &ListenerHandle) -> bool {
        if !handle.is_valid() {
            handle.update();
        }
        !handle.snapshot().is_empty()
    }

    /// Appends a direct listener. Re-adding the same listener is a no-op.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        let _guard = lock::structure();
        let event_type = listener.event_type();
        if !self.event_type.admits(event_type) {
            warn!(
                node = %self.name,
                listener_type = event_type.name(),
                base = self.event_type.name(),
                "listener type is outside the node's base type and will never run"
            );
        }
        {
            let mut map = self.listener_map.lock();
            let entry = map.entry(event_type.id()).or_default();
            if entry
                .listeners
                .iter()
                .any(|known| Arc::ptr_eq(known, &listener))
            {
                return;
            }
            entry.listeners.push(listener);
        }
        self.propagate(event_type.id());
    }

    /// Registers a closure for `E` and returns the removable listener.
    pub fn add_listener_fn<E: Event>(
        &self,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> Arc<dyn EventListener> {
        let listener: Arc<dyn EventListener> = Arc::new(from_fn(move |event: &E| {
            handler(event);
            ListenerResult::Success
        }));
        self.add_listener(listener.clone());
        listener
    }

    /// Removes a direct listener by identity. Unknown listeners are ignored.
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        let _guard = lock::structure();
        let event_type = listener.event_type();
        let removed = {
            let mut map = self.listener_map.lock();
            let Some(entry) = map.get_mut(&event_type.id()) else {
                return;
            };
            let before = entry.listeners.len();
            entry.listeners.retain(|known| !Arc::ptr_eq(known, listener));
            entry.listeners.len() != before
        };
        if removed {
            self.propagate(event_type.id());
        }
    }

    /// Attaches `child` under this node. Re-adding a child already attached
    /// here is a no-op.
    pub fn add_child(self: &Arc<Self>, child: &Arc<EventNode>) -> Result<(), NodeError> {
        let _guard = lock::structure();
        if self
            .children
            .lock()
            .iter()
            .any(|known| Arc::ptr_eq(known, child))
        {
            return Ok(());
        }
        if Arc::ptr_eq(self, child) {
            return Err(NodeError::Cycle {
                parent: self.name.clone(),
                child: child.name.clone(),
            });
        }
        if !self.event_type.admits(child.event_type) {
            return Err(NodeError::TypeMismatch {
                base: self.event_type.name(),
                requested: child.event_type.name(),
            });
        }
        if child.parent.lock().upgrade().is_some() {
            return Err(NodeError::AlreadyParented(child.name.clone()));
        }
        if let Some(parent) = self.parent.lock().upgrade() {
            if Arc::ptr_eq(&parent, child) {
                return Err(NodeError::Cycle {
                    parent: self.name.clone(),
                    child: child.name.clone(),
                });
            }
        }
        self.children.lock().push(child.clone());
        *child.parent.lock() = Arc::downgrade(self);
        // The new subtree exposes its whole listener set at once.
        self.propagate_types(&child.subtree_listener_type_ids());
        Ok(())
    }

    /// Detaches `child`. Unknown children are ignored.
    pub fn remove_child(&self, child: &Arc<EventNode>) {
        let _guard = lock::structure();
        let removed = {
            let mut children = self.children.lock();
            let position = children.iter().position(|known| Arc::ptr_eq(known, child));
            match position {
                Some(position) => {
                    children.remove(position);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return;
        }
        self.propagate_types(&child.subtree_listener_type_ids());
        *child.parent.lock() = Weak::new();
    }

    /// Attaches `node` under `key`: events whose extracted key equals `key`
    /// are routed through it. A node previously mapped at `key` is evicted
    /// and detached.
    pub fn map(
        self: &Arc<Self>,
        node: &Arc<EventNode>,
        key: impl HandlerKey,
    ) -> Result<(), NodeError> {
        let _guard = lock::structure();
        if node.parent.lock().upgrade().is_some() {
            return Err(NodeError::AlreadyParented(node.name.clone()));
        }
        if Arc::ptr_eq(self, node) {
            return Err(NodeError::SelfMap(node.name.clone()));
        }
        if let Some(parent) = self.parent.lock().upgrade() {
            if Arc::ptr_eq(&parent, node) {
                return Err(NodeError::SelfMap(node.name.clone()));
            }
        }
        if !self.event_type.admits(node.event_type) {
            return Err(NodeError::TypeMismatch {
                base: self.event_type.name(),
                requested: node.event_type.name(),
            });
        }
        let previous = self
            .mapped
            .lock()
            .insert(Arc::new(key) as Arc<dyn HandlerKey>, node.clone());
        if let Some(previous) = previous {
            // The incoming node's propagation covers the same handle types.
            debug!(node = %self.name, evicted = previous.name(), "mapped node replaced");
            *previous.parent.lock() = Weak::new();
        }
        *node.parent.lock() = Arc::downgrade(self);
        self.propagate_types(&node.subtree_listener_type_ids());
        Ok(())
    }

    /// Removes the mapping at `key`, detaching its node. Returns whether a
    /// mapping existed.
    pub fn unmap(&self, key: &dyn HandlerKey) -> bool {
        let _guard = lock::structure();
        let Some(node) = self.mapped.lock().remove(key) else {
            return false;
        };
        self.propagate_types(&node.subtree_listener_type_ids());
        *node.parent.lock() = Weak::new();
        true
    }

    /// Inserts one consumer per event type the binding covers. Consumers
    /// already present (by identity) are skipped.
    pub fn register(&self, binding: &dyn EventBinding) {
        let _guard = lock::structure();
        for event_type in binding.event_types() {
            let Some(consumer) = binding.consumer(event_type) else {
                continue;
            };
            let inserted = {
                let mut map = self.listener_map.lock();
                let entry = map.entry(event_type.id()).or_default();
                if entry
                    .binding_consumers
                    .iter()
                    .any(|known| Arc::ptr_eq(known, &consumer))
                {
                    false
                } else {
                    entry.binding_consumers.push(consumer);
                    true
                }
            };
            if inserted {
                self.propagate(event_type.id());
            }
        }
    }

    /// Removes the binding's consumers by identity. Missing consumers are
    /// ignored.
    pub fn unregister(&self, binding: &dyn EventBinding) {
        let _guard = lock::structure();
        for event_type in binding.event_types() {
            let Some(consumer) = binding.consumer(event_type) else {
                continue;
            };
            let removed = {
                let mut map = self.listener_map.lock();
                let Some(entry) = map.get_mut(&event_type.id()) else {
                    continue;
                };
                let before = entry.binding_consumers.len();
                entry
                    .binding_consumers
                    .retain(|known| !Arc::ptr_eq(known, &consumer));
                entry.binding_consumers.len() != before
            };
            if removed {
                self.propagate(event_type.id());
            }
        }
    }

    /// Depth-first search for descendants named `name` whose base type is
    /// covered by `event_type`.
    pub fn find_children(
        &self,
        name: &str,
        event_type: &'static EventType,
    ) -> Vec<Arc<EventNode>> {
        let _guard = lock::structure();
        let mut found = Vec::new();
        self.collect_matches(name, event_type, &mut found);
        found
    }

    fn collect_matches(
        &self,
        name: &str,
        event_type: &'static EventType,
        out: &mut Vec<Arc<EventNode>>,
    ) {
        for child in self.children() {
            if child.matches(name, event_type) {
                out.push(child.clone());
            }
            child.collect_matches(name, event_type, out);
        }
    }

    /// Swaps every matching descendant for `replacement`. The replacement
    /// attaches only once; when matches sit under several different parents
    /// the later attach fails with `AlreadyParented`.
    pub fn replace_children(
        self: &Arc<Self>,
        name: &str,
        event_type: &'static EventType,
        replacement: &Arc<EventNode>,
    ) -> Result<(), NodeError> {
        let _guard = lock::structure();
        for child in self.children() {
            if child.matches(name, event_type) {
                self.remove_child(&child);
                self.add_child(replacement)?;
                continue;
            }
            child.replace_children(name, event_type, replacement)?;
        }
        Ok(())
    }

    /// Detaches every matching descendant, searching under this node's own
    /// base type.
    pub fn remove_children(self: &Arc<Self>, name: &str) {
        self.remove_children_of(name, self.event_type);
    }

    pub fn remove_children_of(self: &Arc<Self>, name: &str, event_type: &'static EventType) {
        let _guard = lock::structure();
        for child in self.children() {
            if child.matches(name, event_type) {
                self.remove_child(&child);
                continue;
            }
            child.remove_children_of(name, event_type);
        }
    }

    fn matches(&self, name: &str, event_type: &'static EventType) -> bool {
        self.name == name && event_type.admits(self.event_type)
    }

    /// Invalidates every affected handle from this node up to the root.
    /// Callers hold the structural lock.
    fn propagate(&self, edited: TypeId) {
        self.invalidate_handles(edited);
        let mut current = self.parent.lock().upgrade();
        while let Some(node) = current {
            node.invalidate_handles(edited);
            current = node.parent.lock().upgrade();
        }
    }

    fn propagate_types(&self, edited: &[TypeId]) {
        for type_id in edited {
            self.propagate(*type_id);
        }
    }

    fn invalidate_handles(&self, edited: TypeId) {
        let handles = self.handle_map.pin();
        for (_, handle) in handles.iter() {
            if handle.covers(edited) {
                handle.invalidate();
            }
        }
    }

    /// Every event type with a listener entry anywhere in this subtree,
    /// mapped children included.
    fn subtree_listener_type_ids(&self) -> Vec<TypeId> {
        let mut ids = Vec::new();
        self.collect_listener_type_ids(&mut ids);
        ids
    }

    fn collect_listener_type_ids(&self, out: &mut Vec<TypeId>) {
        {
            let map = self.listener_map.lock();
            for type_id in map.keys() {
                if !out.contains(type_id) {
                    out.push(*type_id);
                }
            }
        }
        for child in self.children() {
            child.collect_listener_type_ids(out);
        }
        for mapped in self.mapped_children() {
            mapped.collect_listener_type_ids(out);
        }
    }
}

impl fmt::Debug for EventNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventNode")
            .field("name", &self.name)
            .field("event_type", &self.event_type.name())
            .field("priority", &self.priority())
            .field("children", &self.children.lock().len())
            .finish_non_exhaustive()
    }
}
