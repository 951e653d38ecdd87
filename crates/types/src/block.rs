//! Blocks and block identities.

use basalt_codec::wire::{WireReader, WireWriter};
use basalt_codec::CodecError;

use crate::evidence::EvidenceData;
use crate::hash::{Address, Hash};
use crate::merkle;
use crate::part_set::PartSet;
use crate::time::Timestamp;
use crate::vote::Commit;
use crate::TypesError;

/// Identifies the part set of one block: how many parts there are and the
/// Merkle root over their bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

impl PartSetHeader {
    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash.is_zero()
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.field_u64(1, self.total as u64);
        w.field_bytes(2, self.hash.as_bytes());
    }

    pub(crate) fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let total = r.field_u64(1)? as u32;
        let hash = Hash::from_slice(&r.field_bytes(2)?)
            .map_err(|_| CodecError::Corrupt("part set hash"))?;
        Ok(PartSetHeader { total, hash })
    }
}

/// Identity of a block: its header hash plus its part-set header. The
/// zero value stands for "nil", a vote for no block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockId {
    pub hash: Hash,
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    /// The nil block id: a vote for nothing.
    pub fn nil() -> BlockId {
        BlockId::default()
    }

    pub fn is_nil(&self) -> bool {
        self.hash.is_zero() && self.part_set_header.is_zero()
    }

    /// A non-nil id must carry a complete part-set header.
    pub fn is_complete(&self) -> bool {
        !self.hash.is_zero() && self.part_set_header.total > 0
    }

    pub(crate) fn encode(&self, w: &mut WireWriter) {
        w.field_bytes(1, self.hash.as_bytes());
        w.field_msg(2, |m| self.part_set_header.encode(m));
    }

    pub(crate) fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let hash =
            Hash::from_slice(&r.field_bytes(1)?).map_err(|_| CodecError::Corrupt("block hash"))?;
        let part_set_header = r.field_msg(2, PartSetHeader::decode)?;
        Ok(BlockId {
            hash,
            part_set_header,
        })
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_nil() {
            f.write_str("nil")
        } else {
            write!(f, "{}#{}", self.hash, self.part_set_header.total)
        }
    }
}

/// Consensus metadata of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: i64,
    pub time: Timestamp,
    /// Identity of the previous block; nil only at the initial height.
    pub last_block_id: BlockId,
    pub last_commit_hash: Hash,
    pub data_hash: Hash,
    pub validators_hash: Hash,
    pub next_validators_hash: Hash,
    pub consensus_hash: Hash,
    pub app_hash: Hash,
    pub last_results_hash: Hash,
    pub evidence_hash: Hash,
    pub proposer_address: Address,
}

impl BlockHeader {
    /// The header hash: a Merkle root over the canonical encoding of each
    /// field, so collaborators can prove individual fields against it.
    pub fn hash(&self) -> Hash {
        fn enc(f: impl FnOnce(&mut WireWriter)) -> Vec<u8> {
            let mut w = WireWriter::new();
            f(&mut w);
            w.finish()
        }
        let items: Vec<Vec<u8>> = vec![
            enc(|w| w.field_i64(1, self.height)),
            enc(|w| w.field_i64(1, self.time)),
            enc(|w| w.field_bytes(1, self.last_commit_hash.as_bytes())),
            enc(|w| w.field_bytes(1, self.data_hash.as_bytes())),
            enc(|w| w.field_bytes(1, self.validators_hash.as_bytes())),
            enc(|w| w.field_bytes(1, self.next_validators_hash.as_bytes())),
            enc(|w| w.field_bytes(1, self.consensus_hash.as_bytes())),
            enc(|w| w.field_bytes(1, self.app_hash.as_bytes())),
            enc(|w| w.field_bytes(1, self.last_results_hash.as_bytes())),
            enc(|w| w.field_bytes(1, self.evidence_hash.as_bytes())),
            enc(|w| w.field_bytes(1, self.proposer_address.as_bytes())),
        ];
        merkle::hash_from_byte_slices(&items)
    }

    fn encode(&self, w: &mut WireWriter) {
        w.field_str(1, &self.chain_id);
        w.field_i64(2, self.height);
        w.field_i64(3, self.time);
        w.field_msg(4, |m| self.last_block_id.encode(m));
        w.field_bytes(5, self.last_commit_hash.as_bytes());
        w.field_bytes(6, self.data_hash.as_bytes());
        w.field_bytes(7, self.validators_hash.as_bytes());
        w.field_bytes(8, self.next_validators_hash.as_bytes());
        w.field_bytes(9, self.consensus_hash.as_bytes());
        w.field_bytes(10, self.app_hash.as_bytes());
        w.field_bytes(11, self.last_results_hash.as_bytes());
        w.field_bytes(12, self.evidence_hash.as_bytes());
        w.field_bytes(13, self.proposer_address.as_bytes());
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let chain_id = r.field_str(1)?;
        let height = r.field_i64(2)?;
        let time = r.field_i64(3)?;
        let last_block_id = r.field_msg(4, BlockId::decode)?;
        let mut hash_field = |tag| -> Result<Hash, CodecError> {
            Hash::from_slice(&r.field_bytes(tag)?).map_err(|_| CodecError::Corrupt("header hash"))
        };
        let last_commit_hash = hash_field(5)?;
        let data_hash = hash_field(6)?;
        let validators_hash = hash_field(7)?;
        let next_validators_hash = hash_field(8)?;
        let consensus_hash = hash_field(9)?;
        let app_hash = hash_field(10)?;
        let last_results_hash = hash_field(11)?;
        let evidence_hash = hash_field(12)?;
        let proposer_address = Address::from_slice(&r.field_bytes(13)?)
            .map_err(|_| CodecError::Corrupt("proposer address"))?;
        Ok(BlockHeader {
            chain_id,
            height,
            time,
            last_block_id,
            last_commit_hash,
            data_hash,
            validators_hash,
            next_validators_hash,
            consensus_hash,
            app_hash,
            last_results_hash,
            evidence_hash,
            proposer_address,
        })
    }

    pub fn validate_basic(&self) -> Result<(), TypesError> {
        if self.chain_id.is_empty() {
            return Err(TypesError::Invalid {
                what: "header",
                reason: "empty chain id".into(),
            });
        }
        if self.height < 1 {
            return Err(TypesError::Invalid {
                what: "header",
                reason: format!("non-positive height {}", self.height),
            });
        }
        Ok(())
    }
}

/// The transaction payload of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockData {
    pub txs: Vec<Vec<u8>>,
}

impl BlockData {
    /// Merkle root over the raw transactions.
    pub fn hash(&self) -> Hash {
        merkle::hash_from_byte_slices(&self.txs)
    }

    fn encode(&self, w: &mut WireWriter) {
        for tx in &self.txs {
            w.field_bytes(1, tx);
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(BlockData {
            txs: r.field_repeated_bytes(1)?,
        })
    }
}

/// A complete block: header, payload, evidence and the commit that
/// finalized the previous height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub data: BlockData,
    pub evidence: EvidenceData,
    /// Absent only in the block at the initial height.
    pub last_commit: Option<Commit>,
}

impl Block {
    /// The block hash is the header hash; the part-set half of the block
    /// id comes from [`Block::make_part_set`].
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Canonical serialization, the input to part chunking.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.field_msg(1, |m| self.header.encode(m));
        w.field_msg(2, |m| self.data.encode(m));
        w.field_msg(3, |m| self.evidence.encode(m));
        if let Some(commit) = &self.last_commit {
            w.field_msg(4, |m| commit.encode(m));
        }
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Block, TypesError> {
        let mut r = WireReader::new(bytes);
        let header = r.field_msg(1, BlockHeader::decode)?;
        let data = r.field_msg(2, BlockData::decode)?;
        let evidence = r.field_msg(3, EvidenceData::decode)?;
        let last_commit = r.field_opt_msg(4, Commit::decode)?;
        r.expect_end()?;
        Ok(Block {
            header,
            data,
            evidence,
            last_commit,
        })
    }

    /// Chunk the canonical serialization into `part_size`-byte parts.
    pub fn make_part_set(&self, part_size: u32) -> PartSet {
        PartSet::from_data(&self.encode(), part_size)
    }

    /// Reassemble a block from a completed part set.
    pub fn from_part_set(parts: &PartSet) -> Result<Block, TypesError> {
        let data = parts.assemble().ok_or(TypesError::Invalid {
            what: "part set",
            reason: "incomplete".into(),
        })?;
        Block::decode(&data)
    }

    /// The block id a proposer advertises: header hash plus the header of
    /// the given part set.
    pub fn block_id(&self, parts: &PartSet) -> BlockId {
        BlockId {
            hash: self.hash(),
            part_set_header: parts.header(),
        }
    }

    pub fn validate_basic(&self) -> Result<(), TypesError> {
        self.header.validate_basic()?;
        if self.header.data_hash != self.data.hash() {
            return Err(TypesError::Invalid {
                what: "block",
                reason: "data hash mismatch".into(),
            });
        }
        match &self.last_commit {
            None if self.header.height > 1 => Err(TypesError::Invalid {
                what: "block",
                reason: "missing last commit".into(),
            }),
            Some(commit) if self.header.height > 1 => {
                if commit.height != self.header.height - 1 {
                    return Err(TypesError::Invalid {
                        what: "block",
                        reason: "last commit height mismatch".into(),
                    });
                }
                if self.header.last_commit_hash != commit.hash() {
                    return Err(TypesError::Invalid {
                        what: "block",
                        reason: "last commit hash mismatch".into(),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part_set::BLOCK_PART_SIZE_BYTES;

    fn test_header(height: i64) -> BlockHeader {
        BlockHeader {
            chain_id: "basalt-test".into(),
            height,
            time: 1_700_000_000_000,
            last_block_id: BlockId::nil(),
            last_commit_hash: Hash::ZERO,
            data_hash: Hash::ZERO,
            validators_hash: Hash([1; 32]),
            next_validators_hash: Hash([1; 32]),
            consensus_hash: Hash([2; 32]),
            app_hash: Hash([3; 32]),
            last_results_hash: Hash::ZERO,
            evidence_hash: Hash::ZERO,
            proposer_address: Address([7; 20]),
        }
    }

    fn test_block(height: i64, txs: Vec<Vec<u8>>) -> Block {
        let data = BlockData { txs };
        let mut header = test_header(height);
        header.data_hash = data.hash();
        Block {
            header,
            data,
            evidence: EvidenceData::default(),
            last_commit: None,
        }
    }

    #[test]
    fn nil_block_id() {
        assert!(BlockId::nil().is_nil());
        assert!(!BlockId::nil().is_complete());
        let id = BlockId {
            hash: Hash([9; 32]),
            part_set_header: PartSetHeader {
                total: 2,
                hash: Hash([8; 32]),
            },
        };
        assert!(!id.is_nil());
        assert!(id.is_complete());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let block = test_block(1, vec![b"tx-1".to_vec(), b"tx-2".to_vec()]);
        let decoded = Block::decode(&block.encode()).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn part_set_roundtrip_matches_block_id() {
        let txs: Vec<Vec<u8>> = (0..100).map(|i| vec![i as u8; 200]).collect();
        let block = test_block(1, txs);
        for part_size in [128u32, 1024, BLOCK_PART_SIZE_BYTES] {
            let parts = block.make_part_set(part_size);
            let rebuilt = Block::from_part_set(&parts).unwrap();
            assert_eq!(rebuilt, block);
            assert_eq!(
                block.block_id(&parts).part_set_header.hash,
                parts.header().hash
            );
        }
    }

    #[test]
    fn header_hash_is_field_sensitive() {
        let a = test_header(1);
        let mut b = a.clone();
        b.app_hash = Hash([0xaa; 32]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn validate_basic_checks_data_hash() {
        let mut block = test_block(1, vec![b"tx".to_vec()]);
        block.validate_basic().unwrap();
        block.header.data_hash = Hash::ZERO;
        assert!(block.validate_basic().is_err());
    }

    #[test]
    fn validate_basic_requires_last_commit_past_initial_height() {
        let block = test_block(2, vec![]);
        assert!(block.validate_basic().is_err());
    }
}
