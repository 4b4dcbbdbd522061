mod binding;
mod error;
mod event;
pub mod filter;
mod handle;
mod listener;
mod lock;
mod node;

pub use {
    binding::{BindingBuilder, BindingConsumer, EventBinding},
    error::{NodeError, PanicPayload, panic_message, set_exception_sink},
    event::{Event, EventType, TargetTypes},
    filter::{EventFilter, HandlerKey},
    handle::ListenerHandle,
    listener::*,
    node::{EventNode, Predicate},
};
