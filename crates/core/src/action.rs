//! Action types for the deterministic state machine.

use basalt_types::{Block, Commit, DuplicateVoteEvidence, PeerId};

use crate::{Event, OutboundMessage, TimeoutInfo};

/// Actions the state machine wants performed.
///
/// Actions are commands; the runner executes them and may convert results
/// back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ── Network ───────────────────────────────────────────────────────
    /// Hand a message to the peer reactor for broadcast.
    Broadcast(OutboundMessage),

    // ── Timers ────────────────────────────────────────────────────────
    /// Schedule the consensus timeout. The ticker keeps a single slot:
    /// scheduling replaces whatever was pending.
    ScheduleTimeout(TimeoutInfo),

    // ── Internal (fed back with Internal priority) ────────────────────
    /// Enqueue an event for processing before any external input.
    EnqueueInternal(Event),

    // ── Delegated work (async, returns a callback event) ──────────────
    /// Run `check_tx` against the application.
    /// Returns [`Event::TxVerdict`] when complete.
    CheckTx { tx: Vec<u8>, from: Option<PeerId> },

    /// Apply a decided block: deliver every transaction, commit the
    /// application, persist the resulting state.
    /// Returns [`Event::BlockApplied`] when complete.
    ApplyBlock {
        height: i64,
        block: Box<Block>,
        commit: Commit,
    },

    // ── Collaborators ─────────────────────────────────────────────────
    /// Hand a detected double sign to the evidence pool.
    SubmitEvidence(DuplicateVoteEvidence),

    /// Record peer misbehavior for the reactor to act on.
    FlagPeer { peer_id: PeerId, reason: &'static str },
}

impl Action {
    /// True for actions the runner performs asynchronously and answers
    /// with a callback event.
    pub fn is_delegated(&self) -> bool {
        matches!(self, Action::CheckTx { .. } | Action::ApplyBlock { .. })
    }

    /// The action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast(m) => m.type_name(),
            Action::ScheduleTimeout(_) => "ScheduleTimeout",
            Action::EnqueueInternal(_) => "EnqueueInternal",
            Action::CheckTx { .. } => "CheckTx",
            Action::ApplyBlock { .. } => "ApplyBlock",
            Action::SubmitEvidence(_) => "SubmitEvidence",
            Action::FlagPeer { .. } => "FlagPeer",
        }
    }
}
