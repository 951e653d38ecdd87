//! Validator sets and proposer rotation.

use basalt_codec::wire::WireWriter;

use crate::crypto::PublicKey;
use crate::hash::{Address, Hash};
use crate::merkle;
use crate::TypesError;

/// Cap on the sum of voting power, leaving headroom for priority
/// arithmetic in `i64`.
pub const MAX_TOTAL_VOTING_POWER: i64 = i64::MAX / 8;

/// A single consensus participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    pub address: Address,
    pub pub_key: PublicKey,
    pub voting_power: i64,
    pub proposer_priority: i64,
}

impl Validator {
    pub fn new(pub_key: PublicKey, voting_power: i64) -> Self {
        Self {
            address: pub_key.address(),
            pub_key,
            voting_power,
            proposer_priority: 0,
        }
    }

    /// Canonical bytes contributing to the validator-set hash.
    fn hash_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.field_bytes(1, self.pub_key.as_bytes());
        w.field_i64(2, self.voting_power);
        w.finish()
    }
}

/// A change applied by [`ValidatorSet::update_with_change_set`]. Power
/// zero removes the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorUpdate {
    pub pub_key: PublicKey,
    pub power: i64,
}

/// An ordered set of validators with cached total power and proposer.
///
/// The set is immutable from the state machine's point of view within a
/// height: each height takes a snapshot and rotates the proposer on a
/// copy. Validators are kept sorted by address so the hash is canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    total_voting_power: i64,
    /// Index of the cached proposer.
    proposer: usize,
}

impl ValidatorSet {
    /// Build a set from a non-empty list. Addresses must be unique and
    /// every power positive. Runs one priority increment so the proposer
    /// for the first round is cached.
    pub fn new(mut validators: Vec<Validator>) -> Result<Self, TypesError> {
        if validators.is_empty() {
            return Err(TypesError::Invalid {
                what: "validator set",
                reason: "must not be empty".into(),
            });
        }
        validators.sort_by_key(|v| v.address);
        for pair in validators.windows(2) {
            if pair[0].address == pair[1].address {
                return Err(TypesError::Invalid {
                    what: "validator set",
                    reason: format!("duplicate address {}", pair[0].address),
                });
            }
        }
        let total_voting_power = Self::compute_total(&validators)?;
        let mut set = Self {
            validators,
            total_voting_power,
            proposer: 0,
        };
        set.increment_proposer_priority(1);
        Ok(set)
    }

    fn compute_total(validators: &[Validator]) -> Result<i64, TypesError> {
        let mut total: i64 = 0;
        for v in validators {
            if v.voting_power <= 0 {
                return Err(TypesError::Invalid {
                    what: "validator",
                    reason: format!("{} has non-positive power", v.address),
                });
            }
            total = total
                .checked_add(v.voting_power)
                .filter(|&t| t <= MAX_TOTAL_VOTING_POWER)
                .ok_or_else(|| TypesError::Invalid {
                    what: "validator set",
                    reason: "total voting power overflow".into(),
                })?;
        }
        Ok(total)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_voting_power(&self) -> i64 {
        self.total_voting_power
    }

    /// Voting power strictly above which +2/3 is reached.
    pub fn two_thirds_threshold(&self) -> i64 {
        self.total_voting_power * 2 / 3
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// The validator with the greatest proposer priority.
    pub fn proposer(&self) -> &Validator {
        &self.validators[self.proposer]
    }

    pub fn get_by_index(&self, index: i32) -> Option<&Validator> {
        usize::try_from(index).ok().and_then(|i| self.validators.get(i))
    }

    pub fn get_by_address(&self, address: &Address) -> Option<(i32, &Validator)> {
        self.validators
            .binary_search_by_key(address, |v| v.address)
            .ok()
            .map(|i| (i as i32, &self.validators[i]))
    }

    pub fn has_address(&self, address: &Address) -> bool {
        self.get_by_address(address).is_some()
    }

    /// Advance the rotation by `times` increments: every priority grows by
    /// its validator's power, the maximum becomes proposer (ties broken by
    /// lowest address) and pays the total back down.
    pub fn increment_proposer_priority(&mut self, times: i32) {
        for _ in 0..times.max(0) {
            for v in &mut self.validators {
                v.proposer_priority = v.proposer_priority.saturating_add(v.voting_power);
            }
            let proposer = self.max_priority_index();
            self.validators[proposer].proposer_priority = self.validators[proposer]
                .proposer_priority
                .saturating_sub(self.total_voting_power);
            self.proposer = proposer;
        }
    }

    /// Index of the maximum-priority validator; the address order of the
    /// backing vec breaks ties toward the lowest address.
    fn max_priority_index(&self) -> usize {
        let mut best = 0;
        for (i, v) in self.validators.iter().enumerate().skip(1) {
            if v.proposer_priority > self.validators[best].proposer_priority {
                best = i;
            }
        }
        best
    }

    /// Merge a change set: positive powers add or update, zero powers
    /// remove (only when `allow_deletions`). Afterwards the total is
    /// recomputed and priorities are centered on zero and rescaled so that
    /// no two differ by more than `2 * total_voting_power`.
    pub fn update_with_change_set(
        &mut self,
        changes: &[ValidatorUpdate],
        allow_deletions: bool,
    ) -> Result<(), TypesError> {
        for change in changes {
            let address = change.pub_key.address();
            if change.power < 0 {
                return Err(TypesError::Invalid {
                    what: "validator update",
                    reason: format!("{address} has negative power"),
                });
            }
            if change.power == 0 {
                if !allow_deletions {
                    return Err(TypesError::Invalid {
                        what: "validator update",
                        reason: format!("deletion of {address} not allowed"),
                    });
                }
                let before = self.validators.len();
                self.validators.retain(|v| v.address != address);
                if self.validators.len() == before {
                    return Err(TypesError::UnknownValidator(address));
                }
                continue;
            }
            match self.get_by_address(&address) {
                Some((index, _)) => {
                    self.validators[index as usize].voting_power = change.power;
                }
                None => {
                    self.validators.push(Validator::new(change.pub_key, change.power));
                    self.validators.sort_by_key(|v| v.address);
                }
            }
        }
        if self.validators.is_empty() {
            return Err(TypesError::Invalid {
                what: "validator set",
                reason: "change set removed every validator".into(),
            });
        }
        self.total_voting_power = Self::compute_total(&self.validators)?;
        self.center_priorities();
        self.rescale_priorities();
        self.proposer = self.max_priority_index();
        Ok(())
    }

    /// Subtract the mean so priorities stay centered on zero.
    fn center_priorities(&mut self) {
        let sum: i128 = self.validators.iter().map(|v| v.proposer_priority as i128).sum();
        let avg = (sum / self.validators.len() as i128) as i64;
        for v in &mut self.validators {
            v.proposer_priority -= avg;
        }
    }

    /// Scale priorities down until the spread fits `2 * total`.
    fn rescale_priorities(&mut self) {
        let max = self.validators.iter().map(|v| v.proposer_priority).max().unwrap_or(0);
        let min = self.validators.iter().map(|v| v.proposer_priority).min().unwrap_or(0);
        let diff = max.saturating_sub(min);
        let cap = 2 * self.total_voting_power;
        if cap > 0 && diff > cap {
            let ratio = (diff + cap - 1) / cap;
            for v in &mut self.validators {
                v.proposer_priority /= ratio;
            }
        }
    }

    /// Merkle root over the canonical encoding of each validator.
    pub fn hash(&self) -> Hash {
        let items: Vec<Vec<u8>> = self.validators.iter().map(|v| v.hash_bytes()).collect();
        merkle::hash_from_byte_slices(&items)
    }

    pub fn validate_basic(&self) -> Result<(), TypesError> {
        if self.validators.is_empty() {
            return Err(TypesError::Invalid {
                what: "validator set",
                reason: "empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn set_of(powers: &[i64]) -> (ValidatorSet, Vec<KeyPair>) {
        let mut pairs: Vec<KeyPair> = powers.iter().map(|_| KeyPair::generate()).collect();
        pairs.sort_by_key(|p| p.address());
        let validators = pairs
            .iter()
            .zip(powers)
            .map(|(p, &power)| Validator::new(p.public_key(), power))
            .collect();
        (ValidatorSet::new(validators).unwrap(), pairs)
    }

    #[test]
    fn rejects_empty_and_duplicates() {
        assert!(ValidatorSet::new(vec![]).is_err());

        let pair = KeyPair::generate();
        let v = Validator::new(pair.public_key(), 1);
        assert!(ValidatorSet::new(vec![v.clone(), v]).is_err());
    }

    #[test]
    fn rejects_non_positive_power() {
        let pair = KeyPair::generate();
        let v = Validator::new(pair.public_key(), 0);
        assert!(ValidatorSet::new(vec![v]).is_err());
    }

    #[test]
    fn equal_powers_rotate_fairly() {
        let (mut set, _) = set_of(&[10, 10, 10]);
        let mut seen = std::collections::HashMap::new();
        for _ in 0..9 {
            *seen.entry(set.proposer().address).or_insert(0) += 1;
            set.increment_proposer_priority(1);
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.values().all(|&n| n == 3), "rotation uneven: {seen:?}");
    }

    #[test]
    fn proposer_frequency_tracks_power() {
        let (mut set, pairs) = set_of(&[1, 1, 8]);
        let heavy = pairs
            .iter()
            .map(|p| p.address())
            .find(|a| set.get_by_address(a).unwrap().1.voting_power == 8)
            .unwrap();
        let mut heavy_count = 0;
        for _ in 0..100 {
            if set.proposer().address == heavy {
                heavy_count += 1;
            }
            set.increment_proposer_priority(1);
        }
        assert_eq!(heavy_count, 80);
    }

    #[test]
    fn lookup_by_address_and_index_agree() {
        let (set, _) = set_of(&[5, 7, 9]);
        for (i, v) in set.validators().iter().enumerate() {
            let (index, found) = set.get_by_address(&v.address).unwrap();
            assert_eq!(index as usize, i);
            assert_eq!(found, set.get_by_index(index).unwrap());
        }
        assert!(set.get_by_index(3).is_none());
        assert!(set.get_by_index(-1).is_none());
    }

    #[test]
    fn update_changes_power_and_total() {
        let (mut set, pairs) = set_of(&[5, 5, 5]);
        set.update_with_change_set(
            &[ValidatorUpdate {
                pub_key: pairs[0].public_key(),
                power: 20,
            }],
            false,
        )
        .unwrap();
        assert_eq!(set.total_voting_power(), 30);
        assert_eq!(
            set.get_by_address(&pairs[0].address()).unwrap().1.voting_power,
            20
        );
    }

    #[test]
    fn update_adds_and_removes() {
        let (mut set, pairs) = set_of(&[5, 5]);
        let newcomer = KeyPair::generate();
        set.update_with_change_set(
            &[ValidatorUpdate {
                pub_key: newcomer.public_key(),
                power: 5,
            }],
            false,
        )
        .unwrap();
        assert_eq!(set.len(), 3);

        set.update_with_change_set(
            &[ValidatorUpdate {
                pub_key: pairs[0].public_key(),
                power: 0,
            }],
            true,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert!(!set.has_address(&pairs[0].address()));

        // Deletion without permission is rejected.
        assert!(set
            .update_with_change_set(
                &[ValidatorUpdate {
                    pub_key: newcomer.public_key(),
                    power: 0,
                }],
                false,
            )
            .is_err());
    }

    #[test]
    fn priorities_stay_bounded_after_updates() {
        let (mut set, _) = set_of(&[1, 2, 3]);
        for round in 0..50 {
            set.increment_proposer_priority(1);
            if round % 10 == 0 {
                set.update_with_change_set(&[], false).unwrap();
                let cap = 2 * set.total_voting_power();
                for v in set.validators() {
                    assert!(v.proposer_priority.abs() <= cap);
                }
            }
        }
    }

    #[test]
    fn hash_changes_with_membership() {
        let (set_a, _) = set_of(&[5, 5]);
        let (set_b, _) = set_of(&[5, 5]);
        assert_ne!(set_a.hash(), set_b.hash());
        assert_eq!(set_a.hash(), set_a.clone().hash());
    }
}
