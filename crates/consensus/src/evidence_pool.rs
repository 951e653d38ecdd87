//! Evidence pool collaborator interface.

use parking_lot::Mutex;

use basalt_types::DuplicateVoteEvidence;

/// The evidence subsystem as the consensus core sees it: a sink for
/// detected double signs and a source of pending evidence at proposal
/// time. Verification, ageing and gossip live behind this trait.
pub trait EvidencePool: Send + Sync {
    /// Record newly detected evidence.
    fn add_evidence(&self, evidence: DuplicateVoteEvidence);

    /// Evidence ready for inclusion, up to `max_bytes` worth.
    fn pending_evidence(&self, max_bytes: i64) -> Vec<DuplicateVoteEvidence>;
}

/// A minimal in-memory pool: keeps everything, dedupes by hash.
#[derive(Default)]
pub struct InMemoryEvidencePool {
    pending: Mutex<Vec<DuplicateVoteEvidence>>,
}

impl InMemoryEvidencePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl EvidencePool for InMemoryEvidencePool {
    fn add_evidence(&self, evidence: DuplicateVoteEvidence) {
        let mut pending = self.pending.lock();
        if pending.iter().all(|e| e.hash() != evidence.hash()) {
            pending.push(evidence);
        }
    }

    fn pending_evidence(&self, max_bytes: i64) -> Vec<DuplicateVoteEvidence> {
        // Rough per-record cost: two votes and their signatures.
        const APPROX_EVIDENCE_BYTES: i64 = 512;
        let max = if max_bytes < 0 {
            usize::MAX
        } else {
            (max_bytes / APPROX_EVIDENCE_BYTES) as usize
        };
        self.pending.lock().iter().take(max).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block_id, ValidatorFixture};
    use basalt_types::VoteType;

    fn evidence(fx: &ValidatorFixture, seed_a: u8, seed_b: u8) -> DuplicateVoteEvidence {
        let a = fx.signed_vote(0, VoteType::Precommit, 1, 0, block_id(seed_a));
        let b = fx.signed_vote(0, VoteType::Precommit, 1, 0, block_id(seed_b));
        DuplicateVoteEvidence::new(a, b, 0).unwrap()
    }

    #[test]
    fn dedupes_by_hash() {
        let fx = ValidatorFixture::new("ev-test", &[1]);
        let pool = InMemoryEvidencePool::new();
        pool.add_evidence(evidence(&fx, 1, 2));
        pool.add_evidence(evidence(&fx, 2, 1));
        pool.add_evidence(evidence(&fx, 1, 3));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn pending_respects_byte_budget() {
        let fx = ValidatorFixture::new("ev-test", &[1]);
        let pool = InMemoryEvidencePool::new();
        for seed in 2..8 {
            pool.add_evidence(evidence(&fx, 1, seed));
        }
        assert_eq!(pool.pending_evidence(1024).len(), 2);
        assert_eq!(pool.pending_evidence(-1).len(), 6);
        assert!(pool.pending_evidence(0).is_empty());
    }
}
