//! The node runner: message router plus action executor.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use basalt_consensus::EvidencePool;
use basalt_core::{Action, Event, MessageSource, OutboundMessage, StateMachine};
use basalt_types::{merkle, Commit, WrappedTx};

use crate::app::Application;
use crate::clock::Clock;
use crate::state::NodeStateMachine;
use crate::store::{PersistedState, StateStore};
use crate::ticker::TimeoutTicker;

/// Handle to a running node.
///
/// The peer reactor feeds inbound consensus messages through `peer_tx`
/// and drains `outbound_rx` for broadcast; dropping `shutdown_tx` (or
/// sending on it) stops the runner.
pub struct NodeHandle {
    pub peer_tx: mpsc::Sender<Event>,
    pub outbound_rx: mpsc::Receiver<OutboundMessage>,
    pub shutdown_tx: watch::Sender<bool>,
    pub join: JoinHandle<()>,
}

/// Spawn the node's owning task.
///
/// One cooperative owner drains three queues with fixed priority:
/// timeouts, then internal messages, then peer messages. A flood of
/// gossip can never starve the machine's own follow-ups.
pub fn spawn_node(
    mut node: NodeStateMachine,
    mut app: impl Application + 'static,
    mut store: impl StateStore + 'static,
    evidence: Arc<dyn EvidencePool>,
    clock: Arc<dyn Clock>,
) -> NodeHandle {
    let (peer_tx, mut peer_rx) = mpsc::channel::<Event>(1024);
    // Only the runner itself produces internal events, so the queue is
    // unbounded: an await here would deadlock the single consumer.
    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<Event>();
    let (timeout_tx, mut timeout_rx) = mpsc::channel::<Event>(64);
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(1024);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        let ticker = TimeoutTicker::spawn(timeout_tx);
        app_init(&mut node, &mut app);
        let mut ctx = RunnerContext {
            app: &mut app,
            store: &mut store,
            evidence,
            ticker,
            internal_tx,
            outbound_tx,
            last_commit: None,
        };

        node.set_time(clock.now_ms());
        let actions = node.start();
        if execute(&mut node, actions, &mut ctx).await.is_err() {
            return;
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("node runner shutting down");
                    break;
                }
                Some(event) = timeout_rx.recv() => event,
                Some(event) = internal_rx.recv() => event,
                Some(event) = peer_rx.recv() => event,
                else => break,
            };
            node.set_time(clock.now_ms());
            debug!(event = event.type_name(), "handling event");
            let persist_after = matches!(event, Event::BlockApplied { .. });
            let actions = node.handle(event);
            if execute(&mut node, actions, &mut ctx).await.is_err() {
                break;
            }
            if persist_after {
                // The state machine has folded the block in by now;
                // persist the post-commit chain state.
                let state = PersistedState {
                    chain: node.consensus().chain().clone(),
                    last_commit: ctx.last_commit.clone(),
                };
                if let Err(e) = ctx.store.save(&state) {
                    error!(error = %e, "state store failure is fatal");
                    break;
                }
            }
        }
    });

    NodeHandle {
        peer_tx,
        outbound_rx,
        shutdown_tx,
        join,
    }
}

fn app_init(node: &mut NodeStateMachine, app: &mut impl Application) {
    let chain = node.consensus().chain();
    if chain.last_block_height == 0 {
        app.init_chain(&chain.chain_id, &[]);
    }
}

struct RunnerContext<'a, A: Application, S: StateStore> {
    app: &'a mut A,
    store: &'a mut S,
    evidence: Arc<dyn EvidencePool>,
    ticker: TimeoutTicker,
    internal_tx: mpsc::UnboundedSender<Event>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    /// The commit of the block currently being applied, kept for
    /// persistence once the state machine confirms the apply.
    last_commit: Option<Commit>,
}

/// Execute one batch of actions. An error means the internal channel is
/// closed and the node should stop.
async fn execute<A: Application, S: StateStore>(
    node: &mut NodeStateMachine,
    actions: Vec<Action>,
    ctx: &mut RunnerContext<'_, A, S>,
) -> Result<(), ()> {
    for action in actions {
        match action {
            Action::Broadcast(message) => {
                // A saturated or absent reactor must not stall consensus.
                if ctx.outbound_tx.try_send(message).is_err() {
                    debug!("outbound queue full, dropping broadcast");
                }
            }
            Action::ScheduleTimeout(ti) => ctx.ticker.schedule(ti).await,
            Action::EnqueueInternal(event) => {
                ctx.internal_tx.send(event).map_err(|_| ())?;
            }
            Action::CheckTx { tx, from } => {
                let result = ctx.app.check_tx(&tx);
                let wrapped = WrappedTx {
                    sender: result.sender,
                    nonce: result.nonce,
                    gas: result.gas,
                    height: node.consensus().height(),
                    added_at: 0,
                    tx,
                };
                let source = match from {
                    Some(peer_id) => MessageSource::Peer(peer_id),
                    None => MessageSource::Internal,
                };
                ctx.internal_tx
                    .send(Event::TxVerdict {
                        code: result.code,
                        tx: wrapped,
                        source,
                    })
                    .map_err(|_| ())?;
            }
            Action::ApplyBlock {
                height,
                block,
                commit,
            } => {
                let mut result_bytes = Vec::with_capacity(block.data.txs.len());
                for tx in &block.data.txs {
                    let result = ctx.app.deliver_tx(tx);
                    if result.code != 0 {
                        // Recorded in the results, never fatal.
                        debug!(code = result.code, "deliver_tx reported an error");
                    }
                    result_bytes.push(result.code.to_le_bytes().to_vec());
                }
                let app_hash = ctx.app.commit();
                let results_hash = merkle::hash_from_byte_slices(&result_bytes);
                ctx.last_commit = Some(commit);
                ctx.internal_tx
                    .send(Event::BlockApplied {
                        height,
                        app_hash,
                        results_hash,
                    })
                    .map_err(|_| ())?;
            }
            Action::SubmitEvidence(evidence) => {
                warn!(height = evidence.height(), "submitting duplicate-vote evidence");
                ctx.evidence.add_evidence(evidence);
            }
            Action::FlagPeer { peer_id, reason } => {
                warn!(peer = %peer_id, reason, "flagging peer for misbehavior");
            }
        }
    }
    Ok(())
}
