//! The single-slot timeout ticker.
//!
//! The consensus state machine's wall-clock deadline moves monotonically
//! with its state, so a single logical timer suffices: scheduling a new
//! timeout replaces whatever was pending. A late delivery whose
//! (height, round, step) no longer matches is ignored by the state
//! machine, so the ticker never needs to cancel precisely.

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use basalt_core::{Event, TimeoutInfo};

/// Handle to the ticker task.
pub struct TimeoutTicker {
    schedule_tx: mpsc::Sender<TimeoutInfo>,
}

impl TimeoutTicker {
    /// Spawn the ticker. Expired timeouts are delivered on `event_tx` as
    /// [`Event::TimeoutExpired`].
    pub fn spawn(event_tx: mpsc::Sender<Event>) -> TimeoutTicker {
        let (schedule_tx, mut schedule_rx) = mpsc::channel::<TimeoutInfo>(64);
        tokio::spawn(async move {
            let mut pending: Option<(Instant, TimeoutInfo)> = None;
            loop {
                match pending {
                    None => match schedule_rx.recv().await {
                        Some(ti) => pending = Some(Self::arm(ti)),
                        None => break,
                    },
                    Some((due, ti)) => {
                        tokio::select! {
                            scheduled = schedule_rx.recv() => match scheduled {
                                Some(next) => {
                                    trace!(replaced = %ti, by = %next, "replacing pending timeout");
                                    pending = Some(Self::arm(next));
                                }
                                None => break,
                            },
                            _ = tokio::time::sleep_until(due) => {
                                pending = None;
                                debug!(%ti, "timeout fired");
                                if event_tx.send(Event::TimeoutExpired(ti)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });
        TimeoutTicker { schedule_tx }
    }

    fn arm(ti: TimeoutInfo) -> (Instant, TimeoutInfo) {
        (Instant::now() + Duration::from_millis(ti.duration_ms), ti)
    }

    /// Schedule a timeout, replacing any pending one.
    pub async fn schedule(&self, ti: TimeoutInfo) {
        // A closed ticker means the node is shutting down.
        let _ = self.schedule_tx.send(ti).await;
    }
}
