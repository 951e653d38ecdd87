//! Votes and commits.

use basalt_codec::wire::{WireReader, WireWriter};
use basalt_codec::CodecError;

use crate::block::BlockId;
use crate::crypto::Signature;
use crate::hash::{Address, Hash};
use crate::merkle;
use crate::time::Timestamp;
use crate::TypesError;

/// The two signed vote kinds of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteType {
    Prevote,
    Precommit,
}

impl VoteType {
    fn wire_value(self) -> u64 {
        match self {
            VoteType::Prevote => 1,
            VoteType::Precommit => 2,
        }
    }
}

impl std::fmt::Display for VoteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteType::Prevote => f.write_str("prevote"),
            VoteType::Precommit => f.write_str("precommit"),
        }
    }
}

/// A signed vote for a block (or nil) at one (height, round).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: i64,
    pub round: i32,
    /// Nil when the validator votes for no block.
    pub block_id: BlockId,
    pub timestamp: Timestamp,
    pub validator_address: Address,
    pub validator_index: i32,
    /// Unset until the vote has been signed.
    pub signature: Option<Signature>,
}

impl Vote {
    /// The canonical bytes covered by the signature. The validator's
    /// address and index are deliberately absent: the signature binds the
    /// vote content, the validator set binds the signer.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.field_u64(1, self.vote_type.wire_value());
        w.field_i64(2, self.height);
        w.field_i64(3, self.round as i64);
        w.field_msg(4, |m| self.block_id.encode(m));
        w.field_i64(5, self.timestamp);
        w.field_str(6, chain_id);
        w.finish()
    }

    pub fn validate_basic(&self) -> Result<(), TypesError> {
        if self.height < 1 {
            return Err(TypesError::Invalid {
                what: "vote",
                reason: format!("non-positive height {}", self.height),
            });
        }
        if self.round < 0 {
            return Err(TypesError::Invalid {
                what: "vote",
                reason: format!("negative round {}", self.round),
            });
        }
        if self.validator_index < 0 {
            return Err(TypesError::Invalid {
                what: "vote",
                reason: "negative validator index".into(),
            });
        }
        if !self.block_id.is_nil() && !self.block_id.is_complete() {
            return Err(TypesError::Invalid {
                what: "vote",
                reason: "block id neither nil nor complete".into(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}/{} by {} for {}",
            self.vote_type, self.height, self.round, self.validator_index, self.block_id
        )
    }
}

/// How a validator's slot in a commit was filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIdFlag {
    /// No precommit from this validator was seen.
    Absent,
    /// The validator precommitted the committed block.
    ForBlock,
    /// The validator precommitted nil or a different block.
    Nil,
}

impl BlockIdFlag {
    fn wire_value(self) -> u64 {
        match self {
            BlockIdFlag::Absent => 1,
            BlockIdFlag::ForBlock => 2,
            BlockIdFlag::Nil => 3,
        }
    }

    fn from_wire(v: u64) -> Result<Self, CodecError> {
        match v {
            1 => Ok(BlockIdFlag::Absent),
            2 => Ok(BlockIdFlag::ForBlock),
            3 => Ok(BlockIdFlag::Nil),
            _ => Err(CodecError::OutOfRange("block id flag")),
        }
    }
}

/// One validator's slot in a [`Commit`]. Slots are positional: slot `i`
/// belongs to validator index `i` of the set at the commit's height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSig {
    pub flag: BlockIdFlag,
    pub validator_address: Address,
    pub timestamp: Timestamp,
    pub signature: Option<Signature>,
}

impl CommitSig {
    pub fn absent() -> CommitSig {
        CommitSig {
            flag: BlockIdFlag::Absent,
            validator_address: Address::default(),
            timestamp: 0,
            signature: None,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.flag == BlockIdFlag::Absent
    }

    /// The block id this slot's vote was cast for, reconstructed against
    /// the commit's block id.
    pub fn block_id(&self, commit_block_id: &BlockId) -> BlockId {
        match self.flag {
            BlockIdFlag::ForBlock => *commit_block_id,
            _ => BlockId::nil(),
        }
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.field_u64(1, self.flag.wire_value());
        w.field_bytes(2, self.validator_address.as_bytes());
        w.field_i64(3, self.timestamp);
        w.field_bytes(4, self.signature.as_ref().map(|s| s.as_bytes()).unwrap_or(&[]));
    }

    pub(crate) fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let flag = BlockIdFlag::from_wire(r.field_u64(1)?)?;
        let validator_address = Address::from_slice(&r.field_bytes(2)?)
            .map_err(|_| CodecError::Corrupt("commit sig address"))?;
        let timestamp = r.field_i64(3)?;
        let sig_bytes = r.field_bytes(4)?;
        let signature = if sig_bytes.is_empty() {
            None
        } else {
            Some(
                Signature::from_slice(&sig_bytes)
                    .map_err(|_| CodecError::Corrupt("commit sig signature"))?,
            )
        };
        Ok(CommitSig {
            flag,
            validator_address,
            timestamp,
            signature,
        })
    }
}

/// The set of precommits that proves a block was decided at a height.
/// `signatures` holds exactly one slot per validator of that height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub height: i64,
    pub round: i32,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// Merkle root over the canonical encoding of every slot.
    pub fn hash(&self) -> Hash {
        let items: Vec<Vec<u8>> = self
            .signatures
            .iter()
            .map(|sig| {
                let mut w = WireWriter::new();
                sig.encode(&mut w);
                w.finish()
            })
            .collect();
        merkle::hash_from_byte_slices(&items)
    }

    /// Materialize the precommit vote behind slot `index`, or `None` for
    /// an absent slot.
    pub fn vote(&self, index: i32) -> Option<Vote> {
        let sig = self.signatures.get(usize::try_from(index).ok()?)?;
        if sig.is_absent() {
            return None;
        }
        Some(Vote {
            vote_type: VoteType::Precommit,
            height: self.height,
            round: self.round,
            block_id: sig.block_id(&self.block_id),
            timestamp: sig.timestamp,
            validator_address: sig.validator_address,
            validator_index: index,
            signature: sig.signature,
        })
    }

    /// Number of non-absent slots.
    pub fn signed_count(&self) -> usize {
        self.signatures.iter().filter(|s| !s.is_absent()).count()
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.field_i64(1, self.height);
        w.field_i64(2, self.round as i64);
        w.field_msg(3, |m| self.block_id.encode(m));
        for sig in &self.signatures {
            w.field_msg(4, |m| sig.encode(m));
        }
    }

    pub(crate) fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let height = r.field_i64(1)?;
        let round = i32::try_from(r.field_i64(2)?).map_err(|_| CodecError::OutOfRange("round"))?;
        let block_id = r.field_msg(3, BlockId::decode)?;
        let signatures = r.field_repeated_msg(4, CommitSig::decode)?;
        Ok(Commit {
            height,
            round,
            block_id,
            signatures,
        })
    }

    pub fn validate_basic(&self) -> Result<(), TypesError> {
        if self.height < 1 {
            return Err(TypesError::Invalid {
                what: "commit",
                reason: format!("non-positive height {}", self.height),
            });
        }
        if self.block_id.is_nil() {
            return Err(TypesError::Invalid {
                what: "commit",
                reason: "commit for nil block".into(),
            });
        }
        if self.signatures.is_empty() {
            return Err(TypesError::Invalid {
                what: "commit",
                reason: "no signatures".into(),
            });
        }
        Ok(())
    }
}
