//! Mempool for Basalt.
//!
//! The heart of the crate is [`UnappliedTxQueue`], a multi-indexed
//! container of checked-but-unapplied transactions bounded by a byte
//! budget. [`MempoolState`] wraps a shared queue handle as a component
//! state machine: it routes submissions through the application's
//! `check_tx`, admits verdicts into the queue and evicts transactions
//! committed in blocks.

mod queue;
mod state;

pub use queue::UnappliedTxQueue;
pub use state::{MempoolState, SharedQueue};
