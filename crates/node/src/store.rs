//! State-store collaborator interface.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

use basalt_consensus::ChainState;
use basalt_types::Commit;

/// What survives a restart: the chain state after the latest commit plus
/// the commit itself.
#[derive(Debug, Clone)]
pub struct PersistedState {
    pub chain: ChainState,
    pub last_commit: Option<Commit>,
}

/// Store failures. Corruption is the one fatal error in the system: the
/// runner terminates on it rather than continue from unknown state.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("state store corrupt: {0}")]
    Corrupt(String),

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Persists consensus state after every commit; queried at startup.
pub trait StateStore: Send {
    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError>;

    fn load(&self) -> Result<Option<PersistedState>, StoreError>;
}

/// An in-memory store, shared so tests can observe what was persisted.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    state: Arc<Mutex<Option<PersistedState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Height of the latest persisted commit, 0 when empty.
    pub fn height(&self) -> i64 {
        self.state
            .lock()
            .as_ref()
            .map(|s| s.chain.last_block_height)
            .unwrap_or(0)
    }
}

impl StateStore for InMemoryStateStore {
    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        Ok(self.state.lock().clone())
    }
}
