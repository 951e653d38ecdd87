//! A single-validator chain run through the real runner and ticker.
//!
//! One validator holds every vote, so it decides each height alone: the
//! full propose → prevote → precommit → commit loop exercises the
//! router, the single-slot ticker, the application calls and state
//! persistence, all under tokio's paused clock.

use std::sync::Arc;

use basalt_consensus::ConsensusConfig;
use basalt_core::Event;
use basalt_node::{
    build_node, spawn_node, CounterApp, InMemoryStateStore, StateStore, SystemClock,
};
use basalt_types::{GenesisDoc, GenesisValidator, KeyJson, KeyPair};

fn solo_genesis(key: &KeyPair) -> GenesisDoc {
    let mut doc = GenesisDoc {
        genesis_time: 0,
        chain_id: "solo-chain".into(),
        initial_height: 0,
        consensus_params: None,
        validators: vec![GenesisValidator {
            address: String::new(),
            pub_key: KeyJson::ed25519(&key.public_key()),
            power: 10,
            name: "solo".into(),
        }],
        app_hash: String::new(),
        app_state: serde_json::Value::Null,
    };
    doc.validate_and_complete(1).unwrap();
    doc
}

async fn wait_for_height(store: &InMemoryStateStore, height: i64) {
    tokio::time::timeout(std::time::Duration::from_secs(300), async {
        loop {
            if store.height() >= height {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("chain never reached height {height}"));
}

#[tokio::test(start_paused = true)]
async fn solo_validator_commits_heights() {
    let key = KeyPair::generate();
    let genesis = solo_genesis(&key);
    let store = InMemoryStateStore::new();
    let parts = build_node(&genesis, key, ConsensusConfig::default(), &store).unwrap();

    let handle = spawn_node(
        parts.machine,
        CounterApp::new(),
        store.clone(),
        parts.evidence.clone(),
        Arc::new(SystemClock),
    );

    wait_for_height(&store, 3).await;

    let persisted = store.load().unwrap().unwrap();
    assert!(persisted.chain.last_block_height >= 3);
    let commit = persisted.last_commit.unwrap();
    assert_eq!(commit.signatures.len(), 1);
    assert_eq!(commit.signed_count(), 1);

    handle.shutdown_tx.send(true).unwrap();
    handle.join.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn submitted_transaction_flows_into_a_block() {
    let key = KeyPair::generate();
    let genesis = solo_genesis(&key);
    let store = InMemoryStateStore::new();
    let parts = build_node(&genesis, key, ConsensusConfig::default(), &store).unwrap();
    let mempool = parts.mempool.clone();

    let mut handle = spawn_node(
        parts.machine,
        CounterApp::new(),
        store.clone(),
        parts.evidence.clone(),
        Arc::new(SystemClock),
    );

    // A client submission: checked by the application, queued, proposed,
    // committed and finally evicted from the queue.
    let mut tx = vec![9u8; 20];
    tx.extend_from_slice(&1u64.to_le_bytes());
    tx.extend_from_slice(b"pay 5 to b");
    handle
        .peer_tx
        .send(Event::TxSubmitted { tx: tx.clone() })
        .await
        .unwrap();

    let start_height = store.height();
    wait_for_height(&store, start_height + 3).await;
    assert!(
        mempool.lock().is_empty(),
        "committed transaction must be evicted"
    );

    // The proposal carrying the transaction crossed the outbound queue.
    let mut proposed_tx = false;
    while let Ok(message) = handle.outbound_rx.try_recv() {
        if let basalt_core::OutboundMessage::BlockPart { part, .. } = message {
            if part
                .bytes
                .windows(tx.len())
                .any(|window| window == tx.as_slice())
            {
                proposed_tx = true;
            }
        }
    }
    assert!(proposed_tx, "transaction bytes never appeared in a block part");

    handle.shutdown_tx.send(true).unwrap();
    handle.join.await.unwrap();
}
