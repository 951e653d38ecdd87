//! Header-with-commit shapes consumed by light collaborators.

use crate::block::BlockHeader;
use crate::validator::ValidatorSet;
use crate::vote::Commit;
use crate::TypesError;

/// A header along with the commit that proves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeader {
    pub header: BlockHeader,
    pub commit: Option<Commit>,
}

impl SignedHeader {
    pub fn validate_basic(&self, chain_id: &str) -> Result<(), TypesError> {
        self.header.validate_basic()?;
        if self.header.chain_id != chain_id {
            return Err(TypesError::Invalid {
                what: "signed header",
                reason: format!(
                    "chain id {} does not match {chain_id}",
                    self.header.chain_id
                ),
            });
        }
        if let Some(commit) = &self.commit {
            commit.validate_basic()?;
            if commit.height != self.header.height {
                return Err(TypesError::Invalid {
                    what: "signed header",
                    reason: "commit height mismatch".into(),
                });
            }
            if commit.block_id.hash != self.header.hash() {
                return Err(TypesError::Invalid {
                    what: "signed header",
                    reason: "commit is for a different header".into(),
                });
            }
        }
        Ok(())
    }
}

/// A signed header plus the validator set that signed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightBlock {
    pub signed_header: SignedHeader,
    pub validator_set: ValidatorSet,
}

impl LightBlock {
    pub fn validate_basic(&self, chain_id: &str) -> Result<(), TypesError> {
        self.signed_header.validate_basic(chain_id)?;
        self.validator_set.validate_basic()?;
        if self.validator_set.hash() != self.signed_header.header.validators_hash {
            return Err(TypesError::Invalid {
                what: "light block",
                reason: "validator set hash does not match header".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;
    use crate::crypto::KeyPair;
    use crate::hash::{Address, Hash};
    use crate::validator::Validator;

    fn header_for(set: &ValidatorSet) -> BlockHeader {
        BlockHeader {
            chain_id: "light-test".into(),
            height: 1,
            time: 0,
            last_block_id: BlockId::nil(),
            last_commit_hash: Hash::ZERO,
            data_hash: Hash::ZERO,
            validators_hash: set.hash(),
            next_validators_hash: set.hash(),
            consensus_hash: Hash::ZERO,
            app_hash: Hash::ZERO,
            last_results_hash: Hash::ZERO,
            evidence_hash: Hash::ZERO,
            proposer_address: Address([1; 20]),
        }
    }

    #[test]
    fn validates_matching_set() {
        let set =
            ValidatorSet::new(vec![Validator::new(KeyPair::generate().public_key(), 5)]).unwrap();
        let lb = LightBlock {
            signed_header: SignedHeader {
                header: header_for(&set),
                commit: None,
            },
            validator_set: set,
        };
        lb.validate_basic("light-test").unwrap();
        assert!(lb.validate_basic("other-chain").is_err());
    }

    #[test]
    fn rejects_foreign_validator_set() {
        let set =
            ValidatorSet::new(vec![Validator::new(KeyPair::generate().public_key(), 5)]).unwrap();
        let other =
            ValidatorSet::new(vec![Validator::new(KeyPair::generate().public_key(), 5)]).unwrap();
        let lb = LightBlock {
            signed_header: SignedHeader {
                header: header_for(&set),
                commit: None,
            },
            validator_set: other,
        };
        assert!(lb.validate_basic("light-test").is_err());
    }
}
