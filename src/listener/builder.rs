use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{EventListener, ListenerResult};
use crate::event::{Event, EventType};

type Gate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Builder for listeners carrying their own filters and expiration.
///
/// ```ignore
/// let listener = ListenerBuilder::new()
///     .filter(|event: &DamageEvent| event.amount > 0.0)
///     .expire_count(3)
///     .handler(|event| log_damage(event));
/// ```
pub struct ListenerBuilder<E> {
    filters: Vec<Gate<E>>,
    expire_when: Option<Gate<E>>,
    expire_count: Option<usize>,
    _marker: PhantomData<fn(&E)>,
}

impl<E: Event> ListenerBuilder<E> {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            expire_when: None,
            expire_count: None,
            _marker: PhantomData,
        }
    }

    /// Every filter must pass for the handler to run; a failing filter yields
    /// [`ListenerResult::Invalid`] without consuming an expiration charge.
    pub fn filter(mut self, filter: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Expires the listener, without running the handler, the first time
    /// `condition` holds for an event that passed the filters.
    pub fn expire_when(mut self, condition: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.expire_when = Some(Box::new(condition));
        self
    }

    /// Expires the listener after `count` runs of the handler.
    pub fn expire_count(mut self, count: usize) -> Self {
        assert!(count > 0, "expiration count must be greater than zero");
        self.expire_count = Some(count);
        self
    }

    /// Finishes the builder with the handler to run.
    pub fn handler(self, handler: impl Fn(&E) + Send + Sync + 'static) -> BuiltListener<E> {
        BuiltListener {
            filters: self.filters,
            expire_when: self.expire_when,
            remaining: self.expire_count.map(AtomicUsize::new),
            handler: Box::new(handler),
        }
    }
}

impl<E: Event> Default for ListenerBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener produced by [`ListenerBuilder`].
pub struct BuiltListener<E> {
    filters: Vec<Gate<E>>,
    expire_when: Option<Gate<E>>,
    remaining: Option<AtomicUsize>,
    handler: Box<dyn Fn(&E) + Send + Sync>,
}

impl<E: Event> EventListener for BuiltListener<E> {
    fn event_type(&self) -> &'static EventType {
        E::event_type()
    }

    fn run(&self, event: &dyn Event) -> ListenerResult {
        let Some(event) = event.view::<E>() else {
            return ListenerResult::Invalid;
        };
        if !self.filters.iter().all(|filter| filter(event)) {
            return ListenerResult::Invalid;
        }
        if let Some(condition) = &self.expire_when {
            if condition(event) {
                return ListenerResult::Expired;
            }
        }
        (self.handler)(event);
        if let Some(remaining) = &self.remaining {
            if remaining.fetch_sub(1, Ordering::AcqRel) <= 1 {
                return ListenerResult::Expired;
            }
        }
        ListenerResult::Success
    }
}
