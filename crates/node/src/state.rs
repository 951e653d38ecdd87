//! Node state machine.

use basalt_consensus::ConsensusState;
use basalt_core::{Action, Event, StateMachine, SubStateMachine};
use basalt_mempool::MempoolState;
use basalt_types::Timestamp;

/// Combined node state machine: consensus plus mempool behind one
/// `handle` entry point. Each event is offered to every component; a
/// component ignores what it does not care about.
pub struct NodeStateMachine {
    consensus: ConsensusState,
    mempool: MempoolState,
    now: Timestamp,
}

impl NodeStateMachine {
    pub fn new(consensus: ConsensusState, mempool: MempoolState) -> Self {
        Self {
            consensus,
            mempool,
            now: 0,
        }
    }

    pub fn consensus(&self) -> &ConsensusState {
        &self.consensus
    }

    pub fn mempool(&self) -> &MempoolState {
        &self.mempool
    }

    /// Start consensus; returns the initial actions (the first new-height
    /// timeout).
    pub fn start(&mut self) -> Vec<Action> {
        self.consensus.start()
    }
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("height", &self.consensus.height())
            .field("round", &self.consensus.round())
            .field("step", &self.consensus.step())
            .field("now", &self.now)
            .finish()
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(mut a) = self.consensus.try_handle(&event) {
            actions.append(&mut a);
        }
        if let Some(mut a) = self.mempool.try_handle(&event) {
            actions.append(&mut a);
        }
        actions
    }

    fn set_time(&mut self, now: Timestamp) {
        self.now = now;
        self.consensus.set_time(now);
        self.mempool.set_time(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_consensus::testing::ValidatorFixture;
    use basalt_consensus::{ConsensusConfig, ConsensusState, InMemoryEvidencePool};
    use basalt_mempool::UnappliedTxQueue;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn node() -> (NodeStateMachine, basalt_mempool::SharedQueue) {
        let fx = ValidatorFixture::new("node-test", &[10]);
        let queue: basalt_mempool::SharedQueue = Arc::new(Mutex::new(UnappliedTxQueue::new()));
        let consensus = ConsensusState::new(
            ConsensusConfig::default(),
            fx.chain_state(),
            fx.pairs[0].clone(),
            queue.clone(),
            Arc::new(InMemoryEvidencePool::new()),
        );
        let mempool = MempoolState::new(queue.clone());
        (NodeStateMachine::new(consensus, mempool), queue)
    }

    #[test]
    fn start_schedules_the_first_height() {
        let (mut node, _) = node();
        node.set_time(10);
        let actions = node.start();
        assert!(matches!(
            actions.as_slice(),
            [Action::ScheduleTimeout(ti)] if ti.height == 1 && ti.round == 0
        ));
    }

    #[test]
    fn submissions_are_routed_to_the_mempool() {
        let (mut node, _) = node();
        node.set_time(10);
        let actions = node.handle(Event::TxSubmitted {
            tx: b"payload".to_vec(),
        });
        assert!(matches!(actions.as_slice(), [Action::CheckTx { .. }]));
    }

    #[test]
    fn verdicts_land_in_the_shared_queue() {
        let (mut node, queue) = node();
        node.set_time(10);
        node.handle(Event::TxVerdict {
            code: 0,
            tx: basalt_types::WrappedTx {
                sender: basalt_types::Address([1; 20]),
                nonce: 0,
                gas: 9,
                height: 1,
                added_at: 0,
                tx: b"payload".to_vec(),
            },
            source: basalt_core::MessageSource::Internal,
        });
        assert_eq!(queue.lock().len(), 1);
    }
}
