//! Byzantine-fault evidence records.
//!
//! The consensus core only detects double signing and hands the paired
//! votes to the evidence collaborator; ageing, verification against
//! historical validator sets and gossip live outside the core.

use basalt_codec::wire::{WireReader, WireWriter};
use basalt_codec::CodecError;

use crate::hash::Hash;
use crate::merkle;
use crate::time::Timestamp;
use crate::vote::Vote;
use crate::TypesError;

/// Two conflicting votes signed by one validator at the same
/// (height, round, type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateVoteEvidence {
    pub vote_a: Vote,
    pub vote_b: Vote,
    /// Total voting power at the offending height.
    pub total_voting_power: i64,
    /// The offender's voting power.
    pub validator_power: i64,
    pub timestamp: Timestamp,
}

impl DuplicateVoteEvidence {
    /// Pair two conflicting votes, ordering them canonically by block id
    /// so (a, b) and (b, a) produce the same record.
    pub fn new(vote_a: Vote, vote_b: Vote, timestamp: Timestamp) -> Result<Self, TypesError> {
        if vote_a.height != vote_b.height
            || vote_a.round != vote_b.round
            || vote_a.vote_type != vote_b.vote_type
            || vote_a.validator_address != vote_b.validator_address
        {
            return Err(TypesError::Invalid {
                what: "duplicate vote evidence",
                reason: "votes are not from one validator at one (height, round, type)".into(),
            });
        }
        if vote_a.block_id == vote_b.block_id {
            return Err(TypesError::Invalid {
                what: "duplicate vote evidence",
                reason: "votes agree".into(),
            });
        }
        let (vote_a, vote_b) = if vote_a.block_id.hash <= vote_b.block_id.hash {
            (vote_a, vote_b)
        } else {
            (vote_b, vote_a)
        };
        Ok(Self {
            vote_a,
            vote_b,
            total_voting_power: 0,
            validator_power: 0,
            timestamp,
        })
    }

    pub fn height(&self) -> i64 {
        self.vote_a.height
    }

    /// Canonical bytes contributing to the evidence hash.
    fn hash_bytes(&self) -> Vec<u8> {
        fn vote_bytes(w: &mut WireWriter, vote: &Vote) {
            w.field_i64(1, vote.height);
            w.field_i64(2, vote.round as i64);
            w.field_bytes(3, vote.block_id.hash.as_bytes());
            w.field_bytes(4, vote.validator_address.as_bytes());
        }
        let mut w = WireWriter::new();
        w.field_msg(1, |m| vote_bytes(m, &self.vote_a));
        w.field_msg(2, |m| vote_bytes(m, &self.vote_b));
        w.finish()
    }

    pub fn hash(&self) -> Hash {
        crate::hash::sha256(&self.hash_bytes())
    }
}

/// The evidence carried by one block. Only hashes cross the core's
/// boundary; the full records are serialized opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvidenceList {
    pub hashes: Vec<Hash>,
}

impl EvidenceList {
    pub fn hash(&self) -> Hash {
        merkle::hash_from_byte_slices(
            &self.hashes.iter().map(|h| h.to_vec()).collect::<Vec<_>>(),
        )
    }
}

/// Evidence section of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvidenceData {
    pub evidence: EvidenceList,
}

impl EvidenceData {
    pub fn hash(&self) -> Hash {
        self.evidence.hash()
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        for h in &self.evidence.hashes {
            w.field_bytes(1, h.as_bytes());
        }
    }

    pub(crate) fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let hashes = r
            .field_repeated_bytes(1)?
            .iter()
            .map(|b| Hash::from_slice(b).map_err(|_| CodecError::Corrupt("evidence hash")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EvidenceData {
            evidence: EvidenceList { hashes },
        })
    }
}
