//! Application collaborator interface.

use basalt_types::{sha256, Address, Hash};

/// Verdict of `check_tx`: admission code plus the metadata the mempool
/// indexes the transaction by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTxResult {
    /// Zero accepts the transaction.
    pub code: u32,
    pub sender: Address,
    pub nonce: u64,
    pub gas: u64,
}

/// Verdict of `deliver_tx`. A non-zero code is recorded in the block
/// results; it never stalls consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverTxResult {
    pub code: u32,
}

/// The execution layer as consensus sees it. Exactly four verbs; state
/// lives entirely on the application's side of the boundary.
pub trait Application: Send {
    /// Called once before the first height.
    fn init_chain(&mut self, chain_id: &str, app_state: &[u8]);

    /// Admission check for a transaction entering the mempool.
    fn check_tx(&mut self, tx: &[u8]) -> CheckTxResult;

    /// Execute one transaction of a decided block.
    fn deliver_tx(&mut self, tx: &[u8]) -> DeliverTxResult;

    /// Finish the block; the returned hash is pinned into the next
    /// header.
    fn commit(&mut self) -> Hash;
}

/// A deterministic toy application: accepts everything, counts delivered
/// transactions, and hashes the count. Each raw transaction's first
/// twenty bytes double as the sender, the next eight as the nonce.
#[derive(Debug, Default)]
pub struct CounterApp {
    delivered: u64,
    height: u64,
}

impl CounterApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl Application for CounterApp {
    fn init_chain(&mut self, _chain_id: &str, _app_state: &[u8]) {
        self.delivered = 0;
        self.height = 0;
    }

    fn check_tx(&mut self, tx: &[u8]) -> CheckTxResult {
        let mut sender = [0u8; 20];
        for (i, b) in tx.iter().take(20).enumerate() {
            sender[i] = *b;
        }
        let mut nonce_bytes = [0u8; 8];
        for (i, b) in tx.iter().skip(20).take(8).enumerate() {
            nonce_bytes[i] = *b;
        }
        CheckTxResult {
            code: 0,
            sender: Address(sender),
            nonce: u64::from_le_bytes(nonce_bytes),
            gas: tx.len() as u64,
        }
    }

    fn deliver_tx(&mut self, _tx: &[u8]) -> DeliverTxResult {
        self.delivered += 1;
        DeliverTxResult { code: 0 }
    }

    fn commit(&mut self) -> Hash {
        self.height += 1;
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.delivered.to_le_bytes());
        sha256(&bytes)
    }
}
