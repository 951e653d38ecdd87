//! Block proposals.

use basalt_codec::wire::WireWriter;

use crate::block::BlockId;
use crate::crypto::Signature;
use crate::time::Timestamp;
use crate::TypesError;

/// A proposal refers to a block by id and must be signed by the correct
/// proposer for its (height, round). `pol_round >= 0` declares that the
/// block carries a proof of lock: +2/3 prevoted for it at that round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub height: i64,
    pub round: i32,
    /// Round of the proof of lock, or -1 when there is none.
    pub pol_round: i32,
    pub block_id: BlockId,
    pub timestamp: Timestamp,
    pub signature: Option<Signature>,
}

impl Proposal {
    pub fn new(
        height: i64,
        round: i32,
        pol_round: i32,
        block_id: BlockId,
        timestamp: Timestamp,
    ) -> Proposal {
        Proposal {
            height,
            round,
            pol_round,
            block_id,
            timestamp,
            signature: None,
        }
    }

    /// Canonical bytes covered by the proposer's signature.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.field_u64(1, 32); // message kind marker, distinct from any vote type
        w.field_i64(2, self.height);
        w.field_i64(3, self.round as i64);
        w.field_i64(4, self.pol_round as i64);
        w.field_msg(5, |m| self.block_id.encode(m));
        w.field_i64(6, self.timestamp);
        w.field_str(7, chain_id);
        w.finish()
    }

    pub fn validate_basic(&self) -> Result<(), TypesError> {
        if self.height < 1 {
            return Err(TypesError::Invalid {
                what: "proposal",
                reason: format!("non-positive height {}", self.height),
            });
        }
        if self.round < 0 {
            return Err(TypesError::Invalid {
                what: "proposal",
                reason: "negative round".into(),
            });
        }
        if self.pol_round < -1 || self.pol_round >= self.round {
            return Err(TypesError::Invalid {
                what: "proposal",
                reason: format!(
                    "pol round {} out of range for round {}",
                    self.pol_round, self.round
                ),
            });
        }
        if !self.block_id.is_complete() {
            return Err(TypesError::Invalid {
                what: "proposal",
                reason: "incomplete block id".into(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Proposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "proposal {}/{} (pol {}) for {}",
            self.height, self.round, self.pol_round, self.block_id
        )
    }
}
