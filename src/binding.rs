use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::report_panic;
use crate::event::{Event, EventType};
use crate::filter::{EventFilter, HandlerKey};

/// Erased consumer stored for a binding; compared by identity.
pub type BindingConsumer = Arc<dyn Fn(&dyn Event) + Send + Sync>;

/// Bulk registration covering several event types at once.
///
/// Registering a binding on a node inserts one consumer per covered type;
/// unregistering removes them by identity. `consumer` must therefore return
/// the same `Arc` on every call for a given type.
pub trait EventBinding: Send + Sync {
    fn event_types(&self) -> Vec<&'static EventType>;

    fn consumer(&self, event_type: &'static EventType) -> Option<BindingConsumer>;
}

/// Builder for bindings whose consumers share one filter/predicate gate.
///
/// Consumers carry their own panic isolation: a panicking consumer is
/// reported through the exception sink and dispatch continues.
pub struct BindingBuilder {
    filter: Arc<dyn EventFilter>,
    predicate: Arc<dyn Fn(&dyn HandlerKey) -> bool + Send + Sync>,
    consumers: Vec<(&'static EventType, BindingConsumer)>,
}

impl BindingBuilder {
    /// Starts a binding whose consumers only run when `predicate` accepts the
    /// key `filter` extracts from the event.
    pub fn filtered(
        filter: Arc<dyn EventFilter>,
        predicate: impl Fn(&dyn HandlerKey) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            filter,
            predicate: Arc::new(predicate),
            consumers: Vec::new(),
        }
    }

    /// Adds a consumer for `E`, wrapped with the shared gate.
    ///
    /// `E` is typically the filter's own type or one of its descendants;
    /// the gate and the consumer both reach subtype events through their
    /// super views.
    pub fn map<E: Event>(mut self, consumer: impl Fn(&E) + Send + Sync + 'static) -> Self {
        let filter = self.filter.clone();
        let predicate = self.predicate.clone();
        let wrapped: BindingConsumer = Arc::new(move |event: &dyn Event| {
            let mut pass = false;
            filter.visit_handler(event, &mut |key| pass = predicate(key));
            if !pass {
                return;
            }
            let Some(event) = event.view::<E>() else {
                return;
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| consumer(event))) {
                report_panic(payload);
            }
        });
        self.consumers.push((E::event_type(), wrapped));
        self
    }

    pub fn build(self) -> Arc<dyn EventBinding> {
        Arc::new(FilteredBinding {
            consumers: self.consumers,
        })
    }
}

struct FilteredBinding {
    consumers: Vec<(&'static EventType, BindingConsumer)>,
}

impl EventBinding for FilteredBinding {
    fn event_types(&self) -> Vec<&'static EventType> {
        self.consumers.iter().map(|(ty, _)| *ty).collect()
    }

    fn consumer(&self, event_type: &'static EventType) -> Option<BindingConsumer> {
        self.consumers
            .iter()
            .find(|(ty, _)| ty.id() == event_type.id())
            .map(|(_, consumer)| consumer.clone())
    }
}
