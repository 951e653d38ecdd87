//! The unapplied-transaction queue.
//!
//! A container of transactions that passed `check_tx` but have not been
//! applied, indexed simultaneously by id, gas, sender, (sender, nonce)
//! and entry height. Insertion is bounded by a byte budget; every
//! mutation maintains the `size_in_bytes` and `incoming_count` counters.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;

use basalt_types::{Address, Hash, TxId, WrappedTx};

/// Default byte budget: 1 GiB.
const DEFAULT_MAX_QUEUE_BYTES: u64 = 1024 * 1024 * 1024;

/// Multi-indexed queue of unapplied transactions.
///
/// `txs` is the primary ordered-unique index; the secondary maps hold
/// only keys and ids. Both unique indices, id and (sender, nonce),
/// reject duplicates on insertion.
#[derive(Debug, Default)]
pub struct UnappliedTxQueue {
    txs: BTreeMap<TxId, Arc<WrappedTx>>,
    by_gas: BTreeMap<(u64, TxId), ()>,
    by_sender_nonce: BTreeMap<(Address, u64), TxId>,
    by_height: BTreeMap<(i64, TxId), ()>,
    sender_counts: HashMap<Address, usize>,
    max_bytes: u64,
    size_in_bytes: u64,
    incoming_count: u64,
}

impl UnappliedTxQueue {
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_QUEUE_BYTES)
    }

    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Bytes currently held against the budget.
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    /// Number of entries admitted and still queued.
    pub fn incoming_count(&self) -> u64 {
        self.incoming_count
    }

    pub fn clear(&mut self) {
        *self = Self::with_max_bytes(self.max_bytes);
    }

    pub fn has(&self, id: &TxId) -> bool {
        self.txs.contains_key(id)
    }

    pub fn get_by_id(&self, id: &TxId) -> Option<Arc<WrappedTx>> {
        self.txs.get(id).cloned()
    }

    /// The sender's queued transaction with the lowest nonce.
    pub fn get_first_by_sender(&self, sender: &Address) -> Option<Arc<WrappedTx>> {
        self.by_sender_nonce
            .range((*sender, 0)..=(*sender, u64::MAX))
            .next()
            .and_then(|(_, id)| self.txs.get(id).cloned())
    }

    /// Number of queued transactions from `sender`.
    pub fn count_by_sender(&self, sender: &Address) -> usize {
        self.sender_counts.get(sender).copied().unwrap_or(0)
    }

    /// Admit a transaction.
    ///
    /// Returns `false` without mutating when the id or the (sender,
    /// nonce) pair is already present, or when admitting it would exceed
    /// the byte budget.
    pub fn add(&mut self, tx: Arc<WrappedTx>) -> bool {
        let id = tx.id();
        if self.txs.contains_key(&id) {
            return false;
        }
        if self.by_sender_nonce.contains_key(&(tx.sender, tx.nonce)) {
            return false;
        }
        let size = tx.size();
        if self.size_in_bytes + size > self.max_bytes {
            tracing::debug!(
                tx = %id,
                size,
                used = self.size_in_bytes,
                budget = self.max_bytes,
                "queue byte budget exceeded"
            );
            return false;
        }

        self.by_gas.insert((tx.gas, id), ());
        self.by_sender_nonce.insert((tx.sender, tx.nonce), id);
        self.by_height.insert((tx.height, id), ());
        *self.sender_counts.entry(tx.sender).or_insert(0) += 1;
        self.size_in_bytes += size;
        self.incoming_count += 1;
        self.txs.insert(id, tx);
        true
    }

    /// Remove a transaction by id. Returns `false` when absent.
    pub fn erase(&mut self, id: &TxId) -> bool {
        let Some(tx) = self.txs.remove(id) else {
            return false;
        };
        self.by_gas.remove(&(tx.gas, *id));
        self.by_sender_nonce.remove(&(tx.sender, tx.nonce));
        self.by_height.remove(&(tx.height, *id));
        if let Some(count) = self.sender_counts.get_mut(&tx.sender) {
            *count -= 1;
            if *count == 0 {
                self.sender_counts.remove(&tx.sender);
            }
        }
        self.size_in_bytes -= tx.size();
        self.incoming_count -= 1;
        true
    }

    /// All transactions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<WrappedTx>> {
        self.txs.values()
    }

    /// Transactions in ascending gas order.
    pub fn by_gas_asc(&self) -> impl Iterator<Item = &Arc<WrappedTx>> {
        self.by_gas.keys().map(|(_, id)| &self.txs[id])
    }

    /// Transactions in descending gas order.
    pub fn by_gas_desc(&self) -> impl Iterator<Item = &Arc<WrappedTx>> {
        self.by_gas.keys().rev().map(|(_, id)| &self.txs[id])
    }

    /// One sender's transactions with nonces in `range`, ascending.
    pub fn by_nonce(
        &self,
        sender: &Address,
        range: RangeInclusive<u64>,
    ) -> impl Iterator<Item = &Arc<WrappedTx>> {
        let (lo, hi) = (*range.start(), *range.end());
        self.by_sender_nonce
            .range((*sender, lo)..=(*sender, hi))
            .map(|(_, id)| &self.txs[id])
    }

    /// Transactions whose entry height is in `range`, ascending.
    pub fn by_height(&self, range: RangeInclusive<i64>) -> impl Iterator<Item = &Arc<WrappedTx>> {
        let (lo, hi) = (*range.start(), *range.end());
        self.by_height
            .range((lo, TxId::ZERO)..=(hi, Hash([0xff; 32])))
            .map(|((_, id), ())| &self.txs[id])
    }

    /// The proposer's read path: highest-gas transactions first, bounded
    /// by byte and gas budgets. `max_gas < 0` means unlimited gas.
    pub fn collect_for_block(&self, max_bytes: i64, max_gas: i64) -> Vec<Arc<WrappedTx>> {
        let mut total_bytes: i64 = 0;
        let mut total_gas: i64 = 0;
        let mut out = Vec::new();
        for tx in self.by_gas_desc() {
            let tx_bytes = tx.tx.len() as i64;
            if total_bytes + tx_bytes > max_bytes {
                continue;
            }
            if max_gas >= 0 && total_gas + tx.gas as i64 > max_gas {
                continue;
            }
            total_bytes += tx_bytes;
            total_gas += tx.gas as i64;
            out.push(tx.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: u8, nonce: u64, gas: u64, height: i64, payload: &[u8]) -> Arc<WrappedTx> {
        Arc::new(WrappedTx {
            sender: Address([sender; 20]),
            nonce,
            gas,
            height,
            added_at: 0,
            tx: payload.to_vec(),
        })
    }

    #[test]
    fn add_and_lookup() {
        let mut q = UnappliedTxQueue::new();
        let t = tx(1, 0, 100, 1, b"alpha");
        assert!(q.add(t.clone()));
        assert!(q.has(&t.id()));
        assert_eq!(q.get_by_id(&t.id()).unwrap(), t);
        assert_eq!(q.len(), 1);
        assert_eq!(q.incoming_count(), 1);
        assert_eq!(q.size_in_bytes(), t.size());
    }

    #[test]
    fn rejects_duplicate_id_and_sender_nonce() {
        let mut q = UnappliedTxQueue::new();
        assert!(q.add(tx(1, 0, 100, 1, b"alpha")));
        // Same bytes, same id.
        assert!(!q.add(tx(1, 0, 100, 1, b"alpha")));
        // Different bytes but same (sender, nonce).
        assert!(!q.add(tx(1, 0, 50, 2, b"beta")));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn byte_budget_bounds_admission() {
        let overhead = tx(0, 0, 0, 0, &[]).size();
        let mut q = UnappliedTxQueue::with_max_bytes(2 * overhead + 800);

        let first = tx(1, 0, 10, 1, &[0u8; 700]);
        let second = tx(2, 0, 10, 1, &[1u8; 700]);
        assert!(q.add(first.clone()));
        assert!(!q.add(second.clone()), "second 700-byte tx must not fit");
        assert_eq!(q.size_in_bytes(), first.size());

        // Freeing the first slot makes room for a new 700-byte tx.
        assert!(q.erase(&first.id()));
        assert_eq!(q.size_in_bytes(), 0);
        assert!(q.add(second));
    }

    #[test]
    fn erase_unknown_is_false() {
        let mut q = UnappliedTxQueue::new();
        assert!(!q.erase(&TxId::ZERO));
    }

    #[test]
    fn counters_track_mutations() {
        let mut q = UnappliedTxQueue::new();
        let a = tx(1, 0, 5, 1, b"a");
        let b = tx(1, 1, 5, 1, b"b");
        q.add(a.clone());
        q.add(b.clone());
        assert_eq!(q.incoming_count(), 2);
        assert_eq!(q.size_in_bytes(), a.size() + b.size());
        q.erase(&a.id());
        assert_eq!(q.incoming_count(), 1);
        assert_eq!(q.size_in_bytes(), b.size());
        q.clear();
        assert_eq!(q.incoming_count(), 0);
        assert_eq!(q.size_in_bytes(), 0);
    }

    #[test]
    fn gas_iteration_both_directions() {
        let mut q = UnappliedTxQueue::new();
        q.add(tx(1, 0, 30, 1, b"m"));
        q.add(tx(2, 0, 10, 1, b"l"));
        q.add(tx(3, 0, 20, 1, b"k"));
        // Equal gas from two senders keeps both entries.
        q.add(tx(4, 0, 20, 1, b"j"));

        let asc: Vec<u64> = q.by_gas_asc().map(|t| t.gas).collect();
        assert_eq!(asc, vec![10, 20, 20, 30]);
        let desc: Vec<u64> = q.by_gas_desc().map(|t| t.gas).collect();
        assert_eq!(desc, vec![30, 20, 20, 10]);
    }

    #[test]
    fn nonce_range_for_one_sender() {
        let mut q = UnappliedTxQueue::new();
        for nonce in 0..5 {
            q.add(tx(1, nonce, 1, 1, format!("s1-{nonce}").as_bytes()));
        }
        q.add(tx(2, 2, 1, 1, b"other-sender"));

        let sender = Address([1; 20]);
        let nonces: Vec<u64> = q.by_nonce(&sender, 1..=3).map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![1, 2, 3]);
        assert_eq!(q.get_first_by_sender(&sender).unwrap().nonce, 0);
        assert_eq!(q.count_by_sender(&sender), 5);
    }

    #[test]
    fn height_range() {
        let mut q = UnappliedTxQueue::new();
        for (i, height) in [3i64, 5, 5, 9].iter().enumerate() {
            q.add(tx(i as u8, 0, 1, *height, format!("h{i}").as_bytes()));
        }
        let heights: Vec<i64> = q.by_height(4..=8).map(|t| t.height).collect();
        assert_eq!(heights, vec![5, 5]);
        let all: Vec<i64> = q.by_height(i64::MIN..=i64::MAX).map(|t| t.height).collect();
        assert_eq!(all, vec![3, 5, 5, 9]);
    }

    #[test]
    fn collect_for_block_honors_budgets() {
        let mut q = UnappliedTxQueue::new();
        q.add(tx(1, 0, 50, 1, &[0u8; 100]));
        q.add(tx(2, 0, 40, 1, &[0u8; 100]));
        q.add(tx(3, 0, 30, 1, &[0u8; 100]));

        // Byte budget fits two transactions.
        let picked = q.collect_for_block(250, -1);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].gas, 50);
        assert_eq!(picked[1].gas, 40);

        // Gas budget cuts off after the first.
        let picked = q.collect_for_block(1000, 60);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].gas, 50);

        // Unlimited gas takes everything.
        assert_eq!(q.collect_for_block(1000, -1).len(), 3);
    }
}
