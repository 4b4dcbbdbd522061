use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use crossbeam_utils::CachePadded;
use tracing::trace;

use crate::error::report_panic;
use crate::event::{Event, EventType};
use crate::filter::EventFilter;
use crate::listener::{EventListener, ListenerResult};
use crate::lock;
use crate::node::{EventNode, ListenerEntry};

/// Erased invocation stored in a flattened handle.
pub(crate) type FlatListener = Arc<dyn Fn(&dyn Event) + Send + Sync>;

/// Cached, flattened listener list for one (node, event type) pair.
///
/// A handle is created lazily by `EventNode::get_handle` and lives as long as
/// its node. The `valid` flag is the only synchronization the dispatch fast
/// path touches: it is stored with release ordering at the end of a rebuild
/// and loaded with acquire ordering before every call, publishing the swapped
/// `flattened` list. Structural edits anywhere in the owner's subtree clear
/// the flag; the next call rebuilds under the structural lock.
pub struct ListenerHandle {
    node: Weak<EventNode>,
    event_type: &'static EventType,
    flattened: ArcSwap<Vec<FlatListener>>,
    valid: CachePadded<AtomicBool>,
}

impl ListenerHandle {
    pub(crate) fn new(node: Weak<EventNode>, event_type: &'static EventType) -> Self {
        Self {
            node,
            event_type,
            flattened: ArcSwap::from_pointee(Vec::new()),
            valid: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// The event type this handle dispatches.
    #[inline]
    pub fn event_type(&self) -> &'static EventType {
        self.event_type
    }

    /// Whether the flattened list currently reflects the owner's subtree.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub(crate) fn is_owned_by(&self, node: &EventNode) -> bool {
        std::ptr::eq(self.node.as_ptr(), node)
    }

    /// Whether a rebuild of this handle reads the listener entry keyed by
    /// `edited`: true when `edited` appears in this handle's target walk.
    pub(crate) fn covers(&self, edited: std::any::TypeId) -> bool {
        self.event_type.targets().any(|ty| ty.id() == edited)
    }

    #[inline]
    pub(crate) fn snapshot(&self) -> arc_swap::Guard<Arc<Vec<FlatListener>>> {
        self.flattened.load()
    }

    /// Rebuilds the flattened list from the owner's subtree and marks the
    /// handle valid.
    pub(crate) fn update(&self) {
        let _guard = lock::structure();
        let mut flattened = Vec::new();
        if let Some(owner) = self.node.upgrade() {
            self.recursive_update(&owner, &mut flattened);
            trace!(
                node = owner.name(),
                event_type = self.event_type.name(),
                listeners = flattened.len(),
                "rebuilt listener handle"
            );
        }
        self.flattened.store(Arc::new(flattened));
        self.valid.store(true, Ordering::Release);
    }

    fn recursive_update(&self, node: &Arc<EventNode>, out: &mut Vec<FlatListener>) {
        // Listeners attached directly to this node, across the target walk.
        for ty in self.event_type.targets() {
            node.with_entry(ty.id(), |entry| append_entries(out, entry, node));
        }
        // Mapped children route through a single closure.
        self.append_mapped(node, out);
        // Children in ascending priority; the sort is stable, so siblings of
        // equal priority keep their attachment order.
        let mut children = node.children();
        children.retain(|child| child.event_type().admits(self.event_type));
        children.sort_by_key(|child| child.priority());
        for child in &children {
            self.recursive_update(child, out);
        }
    }

    /// Collects the filters of mapped children that could receive this
    /// handle's event type and appends one router closure over them. The
    /// router resolves the key against the live mapping table, so a key
    /// remapped between rebuilds routes to its current node.
    fn append_mapped(&self, node: &Arc<EventNode>, out: &mut Vec<FlatListener>) {
        let mapped = node.mapped_children();
        if mapped.is_empty() {
            return;
        }
        let mut filters: Vec<Arc<dyn EventFilter>> = Vec::new();
        for mapped_node in &mapped {
            if !mapped_node.event_type().admits(self.event_type) {
                continue;
            }
            if !mapped_node.has_any_entry() {
                trace!(node = mapped_node.name(), "mapped node without listeners skipped");
                continue;
            }
            if self.event_type.targets().any(|ty| mapped_node.has_entry(ty.id())) {
                let filter = mapped_node.filter();
                if !filters.iter().any(|known| Arc::ptr_eq(known, &filter)) {
                    filters.push(filter);
                }
            }
        }
        if filters.is_empty() {
            return;
        }
        let owner = Arc::downgrade(node);
        let event_type = self.event_type;
        out.push(Arc::new(move |event: &dyn Event| {
            let Some(node) = owner.upgrade() else { return };
            for filter in &filters {
                let mut target = None;
                filter.visit_handler(event, &mut |key| target = node.mapped_child(key));
                if let Some(mapped_node) = target {
                    if let Ok(handle) = mapped_node.get_handle_of(event_type) {
                        let _ = mapped_node.call(event, &handle);
                    }
                }
            }
        }));
    }
}

/// Appends the direct listeners and binding consumers of one node.
fn append_entries(out: &mut Vec<FlatListener>, entry: &ListenerEntry, node: &Arc<EventNode>) {
    for listener in &entry.listeners {
        let target = Arc::downgrade(node);
        let listener = listener.clone();
        if let Some(predicate) = node.predicate() {
            let filter = node.filter();
            out.push(Arc::new(move |event: &dyn Event| {
                let mut pass = false;
                filter.visit_handler(event, &mut |key| pass = predicate(event, key));
                if !pass {
                    return;
                }
                let Some(node) = target.upgrade() else { return };
                call_listener(&node, &listener, event);
            }));
        } else {
            out.push(Arc::new(move |event: &dyn Event| {
                let Some(node) = target.upgrade() else { return };
                call_listener(&node, &listener, event);
            }));
        }
    }
    // Binding consumers go in verbatim; they carry their own gates and
    // panic isolation.
    for consumer in &entry.binding_consumers {
        out.push(consumer.clone());
    }
}

fn call_listener(node: &Arc<EventNode>, listener: &Arc<dyn EventListener>, event: &dyn Event) {
    let result = match catch_unwind(AssertUnwindSafe(|| listener.run(event))) {
        Ok(result) => result,
        Err(payload) => {
            report_panic(payload);
            ListenerResult::Exception
        }
    };
    if result == ListenerResult::Expired {
        node.remove_listener(listener);
    }
}
