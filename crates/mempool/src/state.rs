//! Mempool state machine.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::instrument;

use basalt_core::{Action, Event, MessageSource, SubStateMachine};
use basalt_types::{Timestamp, TxId, WrappedTx};

use crate::UnappliedTxQueue;

/// Handle to the queue, shared with the consensus proposer path.
///
/// The mempool mutates the queue; consensus only reads a bounded ordered
/// slice while building a proposal. The lock is scoped to single calls.
pub type SharedQueue = Arc<Mutex<UnappliedTxQueue>>;

/// Mempool state machine.
///
/// Routes submissions through the application's `check_tx`, admits
/// verdicts into the shared queue and evicts transactions included in
/// committed blocks.
pub struct MempoolState {
    queue: SharedQueue,
    now: Timestamp,
}

impl MempoolState {
    pub fn new(queue: SharedQueue) -> Self {
        Self { queue, now: 0 }
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    /// Handle a raw submission: hand it to the application for checking.
    fn on_tx_submitted(&mut self, tx: Vec<u8>) -> Vec<Action> {
        vec![Action::CheckTx { tx, from: None }]
    }

    /// Handle a `check_tx` verdict. A non-zero code drops the
    /// transaction before it touches the queue.
    #[instrument(skip(self, tx), fields(tx = %tx.id(), code))]
    fn on_tx_verdict(&mut self, code: u32, mut tx: WrappedTx, source: &MessageSource) -> Vec<Action> {
        if code != 0 {
            tracing::debug!(code, peer = ?source.peer(), "check_tx rejected transaction");
            return vec![];
        }
        tx.added_at = self.now;
        let admitted = self.queue.lock().add(Arc::new(tx));
        if !admitted {
            tracing::debug!("transaction not admitted (duplicate or budget)");
        }
        vec![]
    }

    /// Evict everything a committed block applied.
    #[instrument(skip(self, tx_ids), fields(height, evicted = tx_ids.len()))]
    fn on_block_committed(&mut self, height: i64, tx_ids: &[TxId]) -> Vec<Action> {
        let mut queue = self.queue.lock();
        let mut evicted = 0usize;
        for id in tx_ids {
            if queue.erase(id) {
                evicted += 1;
            }
        }
        tracing::debug!(
            height,
            evicted,
            remaining = queue.len(),
            "evicted committed transactions"
        );
        vec![]
    }
}

impl SubStateMachine for MempoolState {
    fn try_handle(&mut self, event: &Event) -> Option<Vec<Action>> {
        match event {
            Event::TxSubmitted { tx } => Some(self.on_tx_submitted(tx.clone())),
            Event::TxVerdict { code, tx, source } => {
                Some(self.on_tx_verdict(*code, tx.clone(), source))
            }
            Event::BlockCommitted { height, tx_ids, .. } => {
                Some(self.on_block_committed(*height, tx_ids))
            }
            _ => None,
        }
    }

    fn set_time(&mut self, now: Timestamp) {
        self.now = now;
    }
}
