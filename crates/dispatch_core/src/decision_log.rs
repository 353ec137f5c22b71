//! Decision-log writer: analytics rows off the dispatch critical path.
//!
//! The engine posts events into a bounded channel; one background task
//! drains it into the store. A full channel or a failed write costs a `warn`
//! and nothing else — dispatch never waits on analytics I/O.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::store::Store;
use crate::types::{AutoAcceptLogRow, DispatchLogRow, OutcomeSample};

/// Analytics events that may lag the dispatch path. Rejection rows are not
/// carried here: they are written in-path so the profile worker observes
/// them as soon as it is woken.
#[derive(Debug)]
pub enum LogEvent {
    /// One executed offer batch.
    Batch(DispatchLogRow),
    /// The accept landed on this batch; stamp its row.
    BatchAccepted {
        order_id: String,
        batch_number: u32,
        driver_id: String,
        accepted_at: DateTime<Utc>,
        response_ms: u64,
    },
    Outcome(OutcomeSample),
    AutoAccept(AutoAcceptLogRow),
}

/// Cheap-to-clone posting handle.
#[derive(Clone)]
pub struct DecisionLog {
    tx: mpsc::Sender<LogEvent>,
}

impl DecisionLog {
    /// Start the background writer. Dropping every handle ends the task once
    /// the queue drains.
    pub fn spawn(store: Arc<dyn Store>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LogEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                write_event(store.as_ref(), event).await;
            }
        });
        (Self { tx }, handle)
    }

    /// Fire-and-forget post. Never blocks the caller.
    pub fn post(&self, event: LogEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!(error = %e, "decision log channel full, dropping event");
        }
    }
}

async fn write_event(store: &dyn Store, event: LogEvent) {
    let result = match event {
        LogEvent::Batch(row) => store.insert_dispatch_log(&row).await,
        LogEvent::BatchAccepted {
            order_id,
            batch_number,
            driver_id,
            accepted_at,
            response_ms,
        } => {
            store
                .mark_dispatch_log_accepted(
                    &order_id,
                    batch_number,
                    &driver_id,
                    accepted_at,
                    response_ms,
                )
                .await
        }
        LogEvent::Outcome(sample) => store.insert_outcome(&sample).await,
        LogEvent::AutoAccept(row) => store.insert_auto_accept_log(&row).await,
    };
    if let Err(e) = result {
        warn!(error = %e, "decision log write failed");
    }
}
