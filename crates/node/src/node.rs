//! Node assembly.

use std::sync::Arc;

use parking_lot::Mutex;

use basalt_consensus::{
    ChainState, ConsensusConfig, ConsensusError, ConsensusState, InMemoryEvidencePool,
};
use basalt_mempool::{MempoolState, SharedQueue, UnappliedTxQueue};
use basalt_types::{GenesisDoc, KeyPair};

use crate::state::NodeStateMachine;
use crate::store::{PersistedState, StateStore};

/// Everything a runner needs, wired together.
pub struct NodeParts {
    pub machine: NodeStateMachine,
    pub mempool: SharedQueue,
    pub evidence: Arc<InMemoryEvidencePool>,
}

/// Build a node state machine from a validated genesis document and the
/// validator's signing key. A previously persisted state, when present,
/// supersedes the genesis chain state so a restarted node resumes where
/// it stopped.
pub fn build_node(
    genesis: &GenesisDoc,
    key: KeyPair,
    config: ConsensusConfig,
    store: &impl StateStore,
) -> Result<NodeParts, ConsensusError> {
    let (chain, last_commit) = match store.load() {
        Ok(Some(PersistedState { chain, last_commit })) => (chain, last_commit),
        Ok(None) => (ChainState::from_genesis(genesis)?, None),
        Err(e) => {
            return Err(ConsensusError::InvalidBlock(format!(
                "state store unreadable: {e}"
            )))
        }
    };

    let mempool: SharedQueue = Arc::new(Mutex::new(UnappliedTxQueue::new()));
    let evidence = Arc::new(InMemoryEvidencePool::new());
    let mut consensus = ConsensusState::new(config, chain, key, mempool.clone(), evidence.clone());
    if let Some(commit) = &last_commit {
        consensus.restore_last_commit(commit)?;
    }
    let machine = NodeStateMachine::new(consensus, MempoolState::new(mempool.clone()));
    Ok(NodeParts {
        machine,
        mempool,
        evidence,
    })
}
