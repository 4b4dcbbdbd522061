use std::sync::atomic::{AtomicUsize, Ordering};

use super::{EventListener, ListenerResult};
use crate::event::{Event, EventType};

/// Wraps a listener and expires it after a fixed number of invocations.
pub struct WithTimes<L> {
    listener: L,
    remaining: AtomicUsize,
}

impl<L> WithTimes<L> {
    #[inline]
    pub fn new(times: usize, listener: L) -> Self {
        assert!(times > 0, "limit must be greater than zero, got {times}");
        Self {
            listener,
            remaining: AtomicUsize::new(times),
        }
    }
}

impl<L: EventListener> EventListener for WithTimes<L> {
    fn event_type(&self) -> &'static EventType {
        self.listener.event_type()
    }

    fn run(&self, event: &dyn Event) -> ListenerResult {
        // Acquire a charge before running. Concurrent dispatches on a stale
        // handle snapshot may race here; the saturating decrement keeps the
        // inner listener bounded by the configured count.
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 0 {
            return ListenerResult::Expired;
        }
        let result = self.listener.run(event);
        if result == ListenerResult::Expired || previous == 1 {
            ListenerResult::Expired
        } else {
            result
        }
    }
}

/// One-shot form of [`WithTimes`].
#[inline]
pub fn once<L: EventListener>(listener: L) -> WithTimes<L> {
    WithTimes::new(1, listener)
}
