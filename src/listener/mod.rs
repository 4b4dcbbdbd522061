mod builder;
mod from_fn;
mod with_times;

use crate::event::{Event, EventType};

pub use builder::{BuiltListener, ListenerBuilder};
pub use from_fn::{FromFn, FromFnDyn, from_fn, from_fn_dyn};
pub use with_times::{WithTimes, once};

/// Outcome of a single listener invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerResult {
    /// The listener ran.
    Success,
    /// The event did not pass the listener's own filters.
    Invalid,
    /// The listener is done and wants to be removed from its node.
    Expired,
    /// The listener panicked; the panic was reported and swallowed.
    Exception,
}

/// A callback subscribed to a single event type.
///
/// Listeners are owned behind `Arc` and removed by identity, so the `Arc`
/// returned at registration is the removal token.
pub trait EventListener: Send + Sync {
    /// The listener-entry key this listener is registered under.
    fn event_type(&self) -> &'static EventType;

    fn run(&self, event: &dyn Event) -> ListenerResult;
}
