//! Committed chain state.

use std::sync::Arc;

use basalt_types::{
    Block, BlockId, ConsensusParams, GenesisDoc, Hash, Timestamp, Validator, ValidatorSet,
};

use crate::error::ConsensusError;

/// The state a node carries between heights: what the last commit
/// decided plus the validator sets for the surrounding heights. Persisted
/// by the state-store collaborator after every commit.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub chain_id: String,
    pub initial_height: i64,
    /// Height of the last committed block, 0 before the first commit.
    pub last_block_height: i64,
    pub last_block_id: BlockId,
    pub last_block_time: Timestamp,
    /// Validators for height `last_block_height + 1`.
    pub validators: Arc<ValidatorSet>,
    /// Validators for the height after that.
    pub next_validators: Arc<ValidatorSet>,
    /// Validators that signed the last commit.
    pub last_validators: Arc<ValidatorSet>,
    pub app_hash: Hash,
    pub last_results_hash: Hash,
    pub consensus_params: ConsensusParams,
}

impl ChainState {
    /// Build the initial state from a validated genesis document.
    pub fn from_genesis(genesis: &GenesisDoc) -> Result<ChainState, ConsensusError> {
        let validators = Arc::new(ValidatorSet::new(
            genesis
                .validators
                .iter()
                .map(|gv| Ok(Validator::new(gv.public_key()?, gv.power)))
                .collect::<Result<Vec<_>, ConsensusError>>()?,
        )?);
        let mut next = (*validators).clone();
        next.increment_proposer_priority(1);

        let app_hash = if genesis.app_hash.is_empty() {
            Hash::ZERO
        } else {
            let bytes = hex::decode(&genesis.app_hash).map_err(|_| {
                ConsensusError::InvalidBlock("genesis app hash is not hex".into())
            })?;
            Hash::from_slice(&bytes)?
        };

        Ok(ChainState {
            chain_id: genesis.chain_id.clone(),
            initial_height: genesis.initial_height,
            last_block_height: 0,
            last_block_id: BlockId::nil(),
            last_block_time: genesis.genesis_time,
            last_validators: validators.clone(),
            validators,
            next_validators: Arc::new(next),
            app_hash,
            last_results_hash: Hash::ZERO,
            consensus_params: genesis.consensus_params.clone().unwrap_or_default(),
        })
    }

    /// The height the node is currently deciding.
    pub fn deciding_height(&self) -> i64 {
        if self.last_block_height == 0 {
            self.initial_height
        } else {
            self.last_block_height + 1
        }
    }

    /// Fold a committed block into the state. Validator sets rotate one
    /// height forward; the application's hashes become the ones the next
    /// proposer must carry.
    pub fn apply_block(
        &mut self,
        block: &Block,
        block_id: BlockId,
        app_hash: Hash,
        results_hash: Hash,
    ) {
        self.last_block_height = block.header.height;
        self.last_block_id = block_id;
        self.last_block_time = block.header.time;
        self.last_validators = self.validators.clone();
        self.validators = self.next_validators.clone();
        let mut next = (*self.next_validators).clone();
        next.increment_proposer_priority(1);
        self.next_validators = Arc::new(next);
        self.app_hash = app_hash;
        self.last_results_hash = results_hash;
    }
}
