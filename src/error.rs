use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::error;

/// Errors raised by structural operations on the dispatch tree.
///
/// Dispatch itself never fails: a panicking listener is reported through the
/// exception sink and the remaining listeners still run.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node passed to `add_child` or `map` is already attached somewhere.
    #[error("node `{0}` already has a parent")]
    AlreadyParented(String),

    /// Attaching the node would make it its own ancestor.
    #[error("cannot attach `{child}` under `{parent}`: the nodes form a cycle")]
    Cycle { parent: String, child: String },

    /// The handle passed to `call` belongs to a different node.
    #[error("listener handle is not owned by node `{0}`")]
    WrongOwner(String),

    /// The requested event type falls outside the node's base type.
    #[error("event type `{requested}` is not covered by `{base}`")]
    TypeMismatch {
        base: &'static str,
        requested: &'static str,
    },

    /// `map` was asked to attach a node under itself.
    #[error("cannot map node `{0}` under itself")]
    SelfMap(String),
}

/// Payload of a panic that escaped a listener.
pub type PanicPayload = Box<dyn Any + Send>;

type Sink = Arc<dyn Fn(&PanicPayload) + Send + Sync>;

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

/// Installs the process-wide sink consulted when a listener panics,
/// replacing any previous sink.
pub fn set_exception_sink(sink: impl Fn(&PanicPayload) + Send + Sync + 'static) {
    *SINK.lock() = Some(Arc::new(sink));
}

pub(crate) fn report_panic(payload: PanicPayload) {
    let sink = SINK.lock().clone();
    match sink {
        Some(sink) => sink(&payload),
        None => error!("listener panicked: {}", panic_message(&payload)),
    }
}

/// Best-effort extraction of the human-readable message from a panic payload.
pub fn panic_message(payload: &PanicPayload) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}
