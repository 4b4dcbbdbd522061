use std::marker::PhantomData;

use super::{EventListener, ListenerResult};
use crate::event::{Event, EventType};

pub struct FromFn<E, F>(F, PhantomData<fn(&E)>);

impl<E, F> FromFn<E, F> {
    #[inline]
    pub fn new(f: F) -> Self {
        Self(f, PhantomData)
    }
}

impl<E, F> EventListener for FromFn<E, F>
where
    E: Event,
    F: Fn(&E) -> ListenerResult + Send + Sync,
{
    fn event_type(&self) -> &'static EventType {
        E::event_type()
    }

    fn run(&self, event: &dyn Event) -> ListenerResult {
        match event.view::<E>() {
            Some(event) => (self.0)(event),
            None => ListenerResult::Invalid,
        }
    }
}

/// Listener for the event type `E`.
///
/// The listener also runs for events of `E`'s descendants that declare a
/// view of `E` (`extends ... => ...`); an event with no such view yields
/// [`ListenerResult::Invalid`].
#[inline]
pub fn from_fn<E, F>(f: F) -> FromFn<E, F>
where
    FromFn<E, F>: EventListener,
{
    FromFn::new(f)
}

pub struct FromFnDyn<F>(&'static EventType, F);

impl<F> FromFnDyn<F> {
    #[inline]
    pub fn new(event_type: &'static EventType, f: F) -> Self {
        Self(event_type, f)
    }
}

impl<F> EventListener for FromFnDyn<F>
where
    F: Fn(&dyn Event) -> ListenerResult + Send + Sync,
{
    fn event_type(&self) -> &'static EventType {
        self.0
    }

    fn run(&self, event: &dyn Event) -> ListenerResult {
        (self.1)(event)
    }
}

/// Listener keyed by an explicit event type, receiving events erased.
///
/// Use this when the handler wants the concrete event rather than a super
/// view, or for super-type subscriptions in hierarchies that declare no
/// views.
#[inline]
pub fn from_fn_dyn<F>(event_type: &'static EventType, f: F) -> FromFnDyn<F>
where
    FromFnDyn<F>: EventListener,
{
    FromFnDyn::new(event_type, f)
}
