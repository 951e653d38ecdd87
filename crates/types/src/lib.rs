//! Core types for Basalt consensus.
//!
//! This crate provides the foundational types used throughout the
//! consensus implementation:
//!
//! - **Primitives**: [`Hash`], [`Address`], ed25519 keys and signatures
//! - **Collections**: [`BitArray`], Merkle trees and proofs
//! - **Consensus types**: [`Block`], [`Part`], [`PartSet`], [`Vote`],
//!   [`Commit`], [`Proposal`], [`ValidatorSet`]
//! - **On-disk artifacts**: [`GenesisDoc`], [`NodeKey`], [`ConsensusParams`]
//!
//! The crate is self-contained apart from the wire codec: every record
//! that contributes to a hash or a signature declares its own canonical
//! encoding with explicit field tags.

mod bit_array;
mod block;
mod crypto;
mod error;
mod evidence;
mod genesis;
mod hash;
mod light_block;
mod node_key;
mod params;
mod part_set;
mod proposal;
mod time;
mod transaction;
mod validator;
mod vote;

pub mod merkle;

pub use bit_array::BitArray;
pub use block::{Block, BlockData, BlockHeader, BlockId, PartSetHeader};
pub use crypto::{KeyPair, PublicKey, Signature, SIGNATURE_LENGTH};
pub use error::TypesError;
pub use evidence::{DuplicateVoteEvidence, EvidenceData, EvidenceList};
pub use genesis::{GenesisDoc, GenesisValidator, KeyJson, MAX_CHAIN_ID_LEN};
pub use hash::{sha256, Address, Hash, ADDRESS_LENGTH, HASH_LENGTH};
pub use light_block::{LightBlock, SignedHeader};
pub use node_key::NodeKey;
pub use params::{
    BlockParams, ConsensusParams, EvidenceParams, ValidatorParams, VersionParams,
    MAX_BLOCK_SIZE_BYTES,
};
pub use part_set::{Part, PartSet, BLOCK_PART_SIZE_BYTES};
pub use proposal::Proposal;
pub use time::{weighted_median_time, Timestamp, WeightedTime};
pub use transaction::{TxId, WrappedTx};
pub use validator::{Validator, ValidatorSet, ValidatorUpdate};
pub use vote::{BlockIdFlag, Commit, CommitSig, Vote, VoteType};

/// Identifies a peer on the network, derived from its node key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_owned())
    }
}
