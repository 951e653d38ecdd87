//! Transactions as seen by the mempool and the proposer.

use crate::hash::{sha256, Address, Hash};
use crate::time::Timestamp;

/// Unique transaction identifier: the SHA-256 of the raw bytes.
pub type TxId = Hash;

/// A transaction that passed `check_tx` but has not been applied yet.
///
/// The application's verdict supplies the `(sender, nonce, gas)` triple the
/// queue indexes on; `height` records when the transaction entered the
/// pool so stale entries can be swept by height range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedTx {
    pub sender: Address,
    pub nonce: u64,
    pub gas: u64,
    pub height: i64,
    /// When the transaction entered the pool.
    pub added_at: Timestamp,
    /// The raw transaction bytes as submitted.
    pub tx: Vec<u8>,
}

impl WrappedTx {
    /// The queue key: SHA-256 of the raw bytes.
    pub fn id(&self) -> TxId {
        sha256(&self.tx)
    }

    /// In-memory footprint used against the queue's byte budget.
    pub fn size(&self) -> u64 {
        (std::mem::size_of::<WrappedTx>() + self.tx.len()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_over_metadata() {
        let a = WrappedTx {
            sender: Address([1; 20]),
            nonce: 0,
            gas: 10,
            height: 1,
            added_at: 0,
            tx: b"payload".to_vec(),
        };
        let mut b = a.clone();
        b.nonce = 9;
        b.gas = 0;
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), sha256(b"payload"));
    }

    #[test]
    fn size_exceeds_payload() {
        let tx = WrappedTx {
            sender: Address([0; 20]),
            nonce: 0,
            gas: 0,
            height: 0,
            added_at: 0,
            tx: vec![0u8; 100],
        };
        assert!(tx.size() > 100);
    }
}
