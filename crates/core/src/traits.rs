//! State machine traits.

use crate::{Action, Event};
use basalt_types::Timestamp;

/// A complete, runnable state machine: the node.
pub trait StateMachine {
    /// Process one event, returning the actions it provokes.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Inject the current time. The runner calls this before every
    /// `handle`; tests drive it directly for deterministic timeouts.
    fn set_time(&mut self, now: Timestamp);
}

/// A component state machine composed into the node.
///
/// `try_handle` returns `None` for events the component does not care
/// about, letting the node route each event to every interested part.
pub trait SubStateMachine {
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>>;

    fn set_time(&mut self, now: Timestamp);
}
