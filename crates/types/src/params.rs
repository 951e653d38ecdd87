//! Consensus parameters.

use serde::{Deserialize, Serialize};

use crate::hash::{sha256, Hash};
use crate::TypesError;

/// Hard cap on `block.max_bytes`.
pub const MAX_BLOCK_SIZE_BYTES: i64 = 104_857_600;

/// Limits on block size and gas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParams {
    pub max_bytes: i64,
    /// -1 means unlimited.
    pub max_gas: i64,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            max_bytes: 22_020_096,
            max_gas: -1,
        }
    }
}

/// Limits on evidence age and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceParams {
    pub max_age_num_blocks: i64,
    /// Maximum evidence age in milliseconds.
    pub max_age_duration: i64,
    pub max_bytes: i64,
}

impl Default for EvidenceParams {
    fn default() -> Self {
        Self {
            max_age_num_blocks: 100_000,
            max_age_duration: 48 * 60 * 60 * 1000,
            max_bytes: 1_048_576,
        }
    }
}

/// Accepted validator key types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorParams {
    pub pub_key_types: Vec<String>,
}

impl Default for ValidatorParams {
    fn default() -> Self {
        Self {
            pub_key_types: vec!["ed25519".to_owned()],
        }
    }
}

/// Application version pinned by consensus.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionParams {
    pub app_version: u64,
}

/// All consensus parameters of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block: BlockParams,
    pub evidence: EvidenceParams,
    pub validator: ValidatorParams,
    pub version: VersionParams,
}

impl ConsensusParams {
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.block.max_bytes <= 0 {
            return Err(TypesError::Invalid {
                what: "consensus params",
                reason: "block.max_bytes must be greater than 0".into(),
            });
        }
        if self.block.max_bytes > MAX_BLOCK_SIZE_BYTES {
            return Err(TypesError::Invalid {
                what: "consensus params",
                reason: format!(
                    "block.max_bytes {} exceeds cap {MAX_BLOCK_SIZE_BYTES}",
                    self.block.max_bytes
                ),
            });
        }
        if self.block.max_gas < -1 {
            return Err(TypesError::Invalid {
                what: "consensus params",
                reason: "block.max_gas must be greater or equal to -1".into(),
            });
        }
        Ok(())
    }

    /// Hash pinned into every block header.
    pub fn hash(&self) -> Hash {
        let mut w = basalt_codec::wire::WireWriter::new();
        w.field_i64(1, self.block.max_bytes);
        w.field_i64(2, self.block.max_gas);
        w.field_i64(3, self.evidence.max_age_num_blocks);
        w.field_i64(4, self.evidence.max_age_duration);
        w.field_i64(5, self.evidence.max_bytes);
        w.field_u64(6, self.version.app_version);
        sha256(&w.finish())
    }
}
