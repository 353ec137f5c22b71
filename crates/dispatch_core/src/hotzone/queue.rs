//! Overflow-queue position maintenance.
//!
//! All functions here assume the caller holds the zone's critical section;
//! they only sequence the store writes that keep WAITING positions a dense
//! 1..N permutation.

use chrono::{DateTime, Utc};

use crate::error::DispatchError;
use crate::store::Store;
use crate::types::{QueueEntry, QueueEntryStatus};

type Result<T> = std::result::Result<T, DispatchError>;

/// Move one entry out of WAITING into `status` and close the position gap it
/// leaves behind.
pub(crate) async fn remove_and_reposition(
    store: &dyn Store,
    order_id: &str,
    status: QueueEntryStatus,
) -> Result<Option<QueueEntry>> {
    let Some(mut entry) = store.queue_entry_by_order(order_id).await? else {
        return Ok(None);
    };
    if entry.status != QueueEntryStatus::Waiting {
        return Ok(None);
    }
    let removed_position = entry.position;
    entry.status = status;
    store.update_queue_entry(&entry).await?;

    let waiting = store.waiting_entries(&entry.zone_id).await?;
    for mut other in waiting {
        if other.position > removed_position {
            other.position -= 1;
            store.update_queue_entry(&other).await?;
        }
    }
    Ok(Some(entry))
}

/// Release the head of the zone's queue (position 1), repositioning the
/// rest. Returns the released entry.
pub(crate) async fn release_head(
    store: &dyn Store,
    zone_id: &str,
) -> Result<Option<QueueEntry>> {
    let waiting = store.waiting_entries(zone_id).await?;
    let Some(head) = waiting.first().cloned() else {
        return Ok(None);
    };
    remove_and_reposition(store, &head.order_id, QueueEntryStatus::Released).await
}

/// Expire every WAITING entry in the zone queued before `cutoff`; remaining
/// entries are re-packed densely from 1. Returns the expired entries.
pub(crate) async fn expire_before(
    store: &dyn Store,
    zone_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<QueueEntry>> {
    let waiting = store.waiting_entries(zone_id).await?;
    let mut expired = Vec::new();
    let mut next_position = 1;
    for mut entry in waiting {
        if entry.queued_at < cutoff {
            entry.status = QueueEntryStatus::Expired;
            store.update_queue_entry(&entry).await?;
            expired.push(entry);
        } else {
            if entry.position != next_position {
                entry.position = next_position;
                store.update_queue_entry(&entry).await?;
            }
            next_position += 1;
        }
    }
    Ok(expired)
}
