//! Core types for the Basalt consensus architecture.
//!
//! This crate provides the contract between the deterministic state
//! machines and the runner that drives them:
//!
//! - [`Event`]: all possible inputs to a state machine
//! - [`Action`]: all possible outputs from a state machine
//! - [`EventPriority`]: ordering of events that are ready at once
//! - [`StateMachine`] / [`SubStateMachine`]: the traits the node and its
//!   components implement
//!
//! # Architecture
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: no async, no `.await`
//! - **Deterministic**: same state + event = same actions
//! - **Pure-ish**: mutates itself, performs no I/O
//!
//! All I/O is handled by the runner, which delivers events, executes the
//! returned actions, and converts action results back into events. Time
//! is injected through [`StateMachine::set_time`], so tests drive the
//! clock explicitly.

mod action;
mod event;
mod message;
mod traits;

pub use action::Action;
pub use event::{Event, EventPriority, MessageSource};
pub use message::OutboundMessage;
pub use traits::{StateMachine, SubStateMachine};

/// The step a consensus timeout belongs to. The state machine ignores a
/// delivered timeout whose coordinates no longer match its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    NewHeight,
    NewRound,
    Propose,
    Prevote,
    PrevoteWait,
    Precommit,
    PrecommitWait,
    Commit,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::NewHeight => "new-height",
            Step::NewRound => "new-round",
            Step::Propose => "propose",
            Step::Prevote => "prevote",
            Step::PrevoteWait => "prevote-wait",
            Step::Precommit => "precommit",
            Step::PrecommitWait => "precommit-wait",
            Step::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// A scheduled consensus timeout.
///
/// Carries the (height, round, step) it was scheduled for so a late
/// delivery is recognizably stale. `duration` is in milliseconds of
/// injected time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutInfo {
    pub duration_ms: u64,
    pub height: i64,
    pub round: i32,
    pub step: Step,
}

impl std::fmt::Display for TimeoutInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "timeout {}ms @ {}/{}/{}",
            self.duration_ms, self.height, self.round, self.step
        )
    }
}
