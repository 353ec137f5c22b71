//! Hot-zone admission control: hourly quotas, staircase surge pricing, and
//! the FIFO overflow queue.
//!
//! Zones are priority-ordered circles; the first active zone whose center is
//! within radius of the pickup wins. Quota rows live in the store (one per
//! zone/date/hour, created lazily); queue position maintenance runs under a
//! per-zone critical section so WAITING positions stay dense.

pub mod queue;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{QueueConfig, SurgeConfig};
use crate::error::DispatchError;
use crate::geo::{haversine_km, Point};
use crate::store::Store;
use crate::types::{
    HotZoneConfig, OrderId, QueueEntry, QueueEntryStatus, ZoneAdmission, ZoneId,
};

type Result<T> = std::result::Result<T, DispatchError>;

/// Staircase surge multiplier for a partially used quota.
///
/// Right-continuous at the threshold: utilization exactly at the threshold
/// already pays one step. Fixed increment per step, capped at `max`.
pub fn surge_multiplier(
    used: u32,
    limit: u32,
    threshold: f64,
    max: f64,
    step: f64,
    increment: f64,
) -> f64 {
    if limit == 0 {
        return max;
    }
    let u = f64::from(used) / f64::from(limit);
    if u < threshold {
        return 1.0;
    }
    // Float fuzz guard: 0.9 - 0.8 must land in the second step, not the first.
    let steps = ((u - threshold) / step + 1e-9).floor() as u32 + 1;
    (1.0 + f64::from(steps) * increment).min(max)
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionKind {
    Normal,
    Surge,
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRef {
    pub zone_id: ZoneId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePreview {
    /// Current WAITING length.
    pub length: u32,
    /// Wait estimate for the next enqueued order.
    pub est_wait_min: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub kind: AdmissionKind,
    pub surge: f64,
    pub zone: Option<ZoneRef>,
    pub queue: Option<QueuePreview>,
}

impl Admission {
    fn open_city() -> Self {
        Self {
            kind: AdmissionKind::Normal,
            surge: 1.0,
            zone: None,
            queue: None,
        }
    }
}

pub struct HotZoneController {
    /// Sorted by descending priority at construction.
    zones: Vec<HotZoneConfig>,
    zone_locks: HashMap<ZoneId, Mutex<()>>,
    surge_config: SurgeConfig,
    queue_config: QueueConfig,
    utc_offset_hours: i32,
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
}

impl HotZoneController {
    pub fn new(
        mut zones: Vec<HotZoneConfig>,
        surge_config: SurgeConfig,
        queue_config: QueueConfig,
        utc_offset_hours: i32,
        clock: Arc<dyn Clock>,
        store: Arc<dyn Store>,
    ) -> Self {
        zones.sort_by(|a, b| b.priority.cmp(&a.priority));
        let zone_locks = zones
            .iter()
            .map(|z| (z.zone_id.clone(), Mutex::new(())))
            .collect();
        Self {
            zones,
            zone_locks,
            surge_config,
            queue_config,
            utc_offset_hours,
            clock,
            store,
        }
    }

    fn zone_by_id(&self, zone_id: &str) -> Option<&HotZoneConfig> {
        self.zones.iter().find(|z| z.zone_id == zone_id)
    }

    /// Highest-priority active zone covering the point.
    pub fn match_zone(&self, p: Point) -> Option<&HotZoneConfig> {
        self.zones
            .iter()
            .filter(|z| z.active)
            .find(|z| haversine_km(p, z.center) <= z.radius_km)
    }

    /// Is the pickup inside a zone currently in its peak hours?
    pub fn is_peak_zone(&self, p: Point) -> bool {
        let hour = self.clock.local_hour(self.utc_offset_hours);
        self.match_zone(p)
            .map(|z| z.peak_hours.contains(&hour))
            .unwrap_or(false)
    }

    fn zone_surge(&self, zone: &HotZoneConfig, used: u32, limit: u32) -> f64 {
        surge_multiplier(
            used,
            limit,
            zone.surge_threshold,
            zone.surge_max,
            zone.surge_step,
            self.surge_config.increment,
        )
    }

    /// Classify an incoming pickup: NORMAL, SURGE with the current
    /// multiplier, or QUEUE when the hour is full and the zone queues.
    pub async fn check_admission(
        &self,
        pickup: Point,
        _base_fare: Option<f64>,
    ) -> Result<Admission> {
        let Some(zone) = self.match_zone(pickup) else {
            return Ok(Admission::open_city());
        };
        let date = self.clock.local_date(self.utc_offset_hours);
        let hour = self.clock.local_hour(self.utc_offset_hours);
        let limit = zone.quota_limit(hour);
        let quota = self
            .store
            .fetch_or_create_quota(&zone.zone_id, date, hour, limit)
            .await?;

        let zone_ref = ZoneRef {
            zone_id: zone.zone_id.clone(),
            name: zone.name.clone(),
        };

        if quota.used >= limit {
            let waiting = self.store.waiting_entries(&zone.zone_id).await?.len() as u32;
            if zone.queue_enabled && waiting < zone.max_queue {
                let est_wait = (waiting + 1) * self.queue_config.avg_wait_per_order_min;
                return Ok(Admission {
                    kind: AdmissionKind::Queue,
                    surge: self.persist_surge(zone, &quota, zone.surge_max).await,
                    zone: Some(zone_ref),
                    queue: Some(QueuePreview {
                        length: waiting,
                        est_wait_min: est_wait,
                    }),
                });
            }
            return Ok(Admission {
                kind: AdmissionKind::Surge,
                surge: self.persist_surge(zone, &quota, zone.surge_max).await,
                zone: Some(zone_ref),
                queue: None,
            });
        }

        let surge = self.zone_surge(zone, quota.used, limit);
        let surge = self.persist_surge(zone, &quota, surge).await;
        if surge > 1.0 {
            Ok(Admission {
                kind: AdmissionKind::Surge,
                surge,
                zone: Some(zone_ref),
                queue: None,
            })
        } else {
            Ok(Admission {
                kind: AdmissionKind::Normal,
                surge: 1.0,
                zone: Some(zone_ref),
                queue: None,
            })
        }
    }

    /// Persist the recomputed multiplier when it moved.
    async fn persist_surge(
        &self,
        zone: &HotZoneConfig,
        quota: &crate::types::HourQuota,
        surge: f64,
    ) -> f64 {
        if (quota.surge - surge).abs() > f64::EPSILON {
            if let Err(e) = self
                .store
                .set_quota_surge(&zone.zone_id, quota.date, quota.hour, surge)
                .await
            {
                warn!(zone = %zone.zone_id, error = %e, "surge persistence failed");
            }
        }
        surge
    }

    /// Atomically take one quota slot. `false` means the hour filled up
    /// between check and consume; the caller re-checks admission.
    pub async fn consume(
        &self,
        zone_id: &str,
        order_id: &str,
        _base_fare: Option<f64>,
        surge: f64,
    ) -> Result<bool> {
        let Some(zone) = self.zone_by_id(zone_id) else {
            return Err(DispatchError::NotFound {
                what: format!("hot zone {zone_id}"),
            });
        };
        let date = self.clock.local_date(self.utc_offset_hours);
        let hour = self.clock.local_hour(self.utc_offset_hours);
        let limit = zone.quota_limit(hour);

        if !self
            .store
            .try_consume_quota(zone_id, date, hour, limit)
            .await?
        {
            return Ok(false);
        }
        self.store
            .insert_zone_admission(&ZoneAdmission {
                order_id: order_id.to_string(),
                zone_id: zone_id.to_string(),
                date,
                hour,
                surge,
            })
            .await?;
        // Recompute after the increment so the persisted row tracks reads.
        if let Ok(Some(quota)) = self.store.quota(zone_id, date, hour).await {
            let surge_now = self.zone_surge(zone, quota.used, quota.limit);
            self.persist_surge(zone, &quota, surge_now).await;
        }
        Ok(true)
    }

    /// Give back a consumed slot (cancel path) and promote the queue head.
    /// Returns the order released from the queue, if any.
    pub async fn release(&self, order_id: &str) -> Result<Option<OrderId>> {
        let Some(admission) = self.store.remove_zone_admission(order_id).await? else {
            return Ok(None);
        };
        self.store
            .release_quota_slot(&admission.zone_id, admission.date, admission.hour)
            .await?;

        let _guard = match self.zone_locks.get(&admission.zone_id) {
            Some(lock) => lock.lock().await,
            None => return Ok(None),
        };
        let released = queue::release_head(self.store.as_ref(), &admission.zone_id).await?;
        if let Some(entry) = &released {
            debug!(zone = %admission.zone_id, order = %entry.order_id, "queue head released");
        }
        Ok(released.map(|e| e.order_id))
    }

    /// Completion keeps the slot used for the hour; only the counter moves.
    pub async fn mark_completed(&self, order_id: &str) -> Result<()> {
        if let Some(admission) = self.store.remove_zone_admission(order_id).await? {
            self.store
                .mark_quota_completed(&admission.zone_id, admission.date, admission.hour)
                .await?;
        }
        Ok(())
    }

    /// Append an order to the zone's overflow queue.
    pub async fn enqueue(
        &self,
        zone_id: &str,
        order_id: &str,
        rider_id: &str,
        base_fare: Option<f64>,
    ) -> Result<QueueEntry> {
        let Some(zone) = self.zone_by_id(zone_id) else {
            return Err(DispatchError::NotFound {
                what: format!("hot zone {zone_id}"),
            });
        };
        let date = self.clock.local_date(self.utc_offset_hours);
        let hour = self.clock.local_hour(self.utc_offset_hours);
        let limit = zone.quota_limit(hour);
        let quota = self
            .store
            .fetch_or_create_quota(zone_id, date, hour, limit)
            .await?;
        let surge = self.zone_surge(zone, quota.used, limit.max(1));

        let _guard = match self.zone_locks.get(zone_id) {
            Some(lock) => lock.lock().await,
            None => {
                return Err(DispatchError::NotFound {
                    what: format!("hot zone {zone_id}"),
                })
            }
        };
        let position = self.store.waiting_entries(zone_id).await?.len() as u32 + 1;
        let entry = QueueEntry {
            queue_id: Uuid::new_v4().to_string(),
            zone_id: zone_id.to_string(),
            order_id: order_id.to_string(),
            rider_id: rider_id.to_string(),
            position,
            est_wait_min: position * self.queue_config.avg_wait_per_order_min,
            surge_at_enqueue: surge,
            base_fare,
            surged_fare: base_fare.map(|f| f * surge),
            queued_at: self.clock.now(),
            status: QueueEntryStatus::Waiting,
        };
        self.store.insert_queue_entry(&entry).await?;
        Ok(entry)
    }

    /// Pull a waiting order out of the queue (rider cancel).
    pub async fn dequeue(&self, order_id: &str) -> Result<()> {
        let Some(entry) = self.store.queue_entry_by_order(order_id).await? else {
            return Ok(());
        };
        let _guard = match self.zone_locks.get(&entry.zone_id) {
            Some(lock) => lock.lock().await,
            None => return Ok(()),
        };
        queue::remove_and_reposition(self.store.as_ref(), order_id, QueueEntryStatus::Cancelled)
            .await?;
        Ok(())
    }

    pub async fn queue_status(&self, order_id: &str) -> Result<Option<QueueEntry>> {
        self.store.queue_entry_by_order(order_id).await
    }

    /// Expire WAITING entries past their zone's timeout, across all zones.
    /// Returns the expired entries so the engine can finalize their orders.
    pub async fn expire_timed_out(&self) -> Result<Vec<QueueEntry>> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for zone in &self.zones {
            if !zone.queue_enabled {
                continue;
            }
            let timeout = if zone.queue_timeout_min > 0 {
                zone.queue_timeout_min
            } else {
                self.queue_config.default_timeout_min
            };
            let cutoff = now - Duration::minutes(i64::from(timeout));
            let _guard = match self.zone_locks.get(&zone.zone_id) {
                Some(lock) => lock.lock().await,
                None => continue,
            };
            let mut zone_expired =
                queue::expire_before(self.store.as_ref(), &zone.zone_id, cutoff).await?;
            expired.append(&mut zone_expired);
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn zone(id: &str, center: Point, radius_km: f64, priority: i32) -> HotZoneConfig {
        HotZoneConfig {
            zone_id: id.to_string(),
            name: format!("zone {id}"),
            center,
            radius_km,
            peak_hours: vec![7, 8, 17, 18, 19],
            quota_normal: 10,
            quota_peak: 20,
            surge_threshold: 0.8,
            surge_max: 1.5,
            surge_step: 0.1,
            queue_enabled: true,
            max_queue: 5,
            queue_timeout_min: 15,
            priority,
            active: true,
        }
    }

    fn controller(zones: Vec<HotZoneConfig>) -> (HotZoneController, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_hour(12));
        let controller = HotZoneController::new(
            zones,
            SurgeConfig::default(),
            QueueConfig::default(),
            0,
            clock.clone(),
            store.clone(),
        );
        (controller, store, clock)
    }

    const CENTER: Point = Point {
        lat: 25.0478,
        lng: 121.5170,
    };

    #[test]
    fn surge_staircase_values() {
        // limit 10, threshold 0.8, step 0.1, max 1.5
        assert_eq!(surge_multiplier(7, 10, 0.8, 1.5, 0.1, 0.1), 1.0);
        assert!((surge_multiplier(8, 10, 0.8, 1.5, 0.1, 0.1) - 1.10).abs() < 1e-9);
        assert!((surge_multiplier(9, 10, 0.8, 1.5, 0.1, 0.1) - 1.20).abs() < 1e-9);
        // Cap.
        assert_eq!(surge_multiplier(100, 100, 0.5, 1.5, 0.05, 0.1), 1.5);
        // Degenerate limit.
        assert_eq!(surge_multiplier(0, 0, 0.8, 1.5, 0.1, 0.1), 1.5);
    }

    #[test]
    fn highest_priority_zone_wins_overlap() {
        let low = zone("low", CENTER, 5.0, 1);
        let high = zone("high", CENTER, 1.0, 9);
        let (controller, _, _) = controller(vec![low, high]);
        let matched = controller.match_zone(CENTER).unwrap();
        assert_eq!(matched.zone_id, "high");

        // Outside the small zone but inside the big one.
        let edge = Point::new(25.0478, 121.5450);
        let matched = controller.match_zone(edge).unwrap();
        assert_eq!(matched.zone_id, "low");
    }

    #[test]
    fn inactive_zones_never_match() {
        let mut z = zone("z1", CENTER, 5.0, 1);
        z.active = false;
        let (controller, _, _) = controller(vec![z]);
        assert!(controller.match_zone(CENTER).is_none());
    }

    #[tokio::test]
    async fn admission_tiers_follow_utilization() {
        let (controller, store, clock) = controller(vec![zone("z1", CENTER, 5.0, 1)]);
        let date = clock.local_date(0);

        // Empty hour: NORMAL.
        let a = controller.check_admission(CENTER, Some(100.0)).await.unwrap();
        assert_eq!(a.kind, AdmissionKind::Normal);
        assert_eq!(a.surge, 1.0);

        // 8/10 used: SURGE 1.10.
        for _ in 0..8 {
            assert!(store.try_consume_quota("z1", date, 12, 10).await.unwrap());
        }
        let a = controller.check_admission(CENTER, Some(100.0)).await.unwrap();
        assert_eq!(a.kind, AdmissionKind::Surge);
        assert!((a.surge - 1.10).abs() < 1e-9);

        // 9/10: SURGE 1.20.
        assert!(store.try_consume_quota("z1", date, 12, 10).await.unwrap());
        let a = controller.check_admission(CENTER, Some(100.0)).await.unwrap();
        assert!((a.surge - 1.20).abs() < 1e-9);

        // Full with queue enabled: QUEUE.
        assert!(store.try_consume_quota("z1", date, 12, 10).await.unwrap());
        let a = controller.check_admission(CENTER, Some(100.0)).await.unwrap();
        assert_eq!(a.kind, AdmissionKind::Queue);
        let preview = a.queue.unwrap();
        assert_eq!(preview.length, 0);
        assert_eq!(preview.est_wait_min, 3);
    }

    #[tokio::test]
    async fn full_zone_without_queue_surges_at_max() {
        let mut z = zone("z1", CENTER, 5.0, 1);
        z.queue_enabled = false;
        let (controller, store, clock) = controller(vec![z]);
        let date = clock.local_date(0);
        for _ in 0..10 {
            store.try_consume_quota("z1", date, 12, 10).await.unwrap();
        }
        let a = controller.check_admission(CENTER, Some(100.0)).await.unwrap();
        assert_eq!(a.kind, AdmissionKind::Surge);
        assert_eq!(a.surge, 1.5);
    }

    #[tokio::test]
    async fn consume_tracks_admission_and_respects_limit() {
        let (controller, store, clock) = controller(vec![zone("z1", CENTER, 5.0, 1)]);
        for i in 0..10 {
            assert!(controller
                .consume("z1", &format!("o{i}"), Some(100.0), 1.0)
                .await
                .unwrap());
        }
        assert!(!controller.consume("z1", "o10", Some(100.0), 1.0).await.unwrap());
        let quota = store.quota("z1", clock.local_date(0), 12).await.unwrap().unwrap();
        assert_eq!(quota.used, 10);
        assert!(store.zone_admission("o3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_decrements_and_promotes_head() {
        let (controller, store, clock) = controller(vec![zone("z1", CENTER, 5.0, 1)]);
        for i in 0..10 {
            controller
                .consume("z1", &format!("o{i}"), Some(100.0), 1.0)
                .await
                .unwrap();
        }
        let first = controller.enqueue("z1", "q1", "r1", Some(100.0)).await.unwrap();
        let second = controller.enqueue("z1", "q2", "r2", Some(100.0)).await.unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
        assert_eq!(second.est_wait_min, 6);

        let released = controller.release("o3").await.unwrap();
        assert_eq!(released.as_deref(), Some("q1"));

        let quota = store.quota("z1", clock.local_date(0), 12).await.unwrap().unwrap();
        assert_eq!(quota.used, 9);
        assert_eq!(quota.cancelled, 1);

        // q2 moved up to position 1.
        let q2 = controller.queue_status("q2").await.unwrap().unwrap();
        assert_eq!(q2.position, 1);
        let q1 = controller.queue_status("q1").await.unwrap().unwrap();
        assert_eq!(q1.status, QueueEntryStatus::Released);
    }

    #[tokio::test]
    async fn dequeue_keeps_positions_dense() {
        let (controller, _, _) = controller(vec![zone("z1", CENTER, 5.0, 1)]);
        controller.enqueue("z1", "q1", "r1", None).await.unwrap();
        controller.enqueue("z1", "q2", "r2", None).await.unwrap();
        controller.enqueue("z1", "q3", "r3", None).await.unwrap();

        controller.dequeue("q2").await.unwrap();
        let q1 = controller.queue_status("q1").await.unwrap().unwrap();
        let q3 = controller.queue_status("q3").await.unwrap().unwrap();
        assert_eq!(q1.position, 1);
        assert_eq!(q3.position, 2);
        assert_eq!(
            controller.queue_status("q2").await.unwrap().unwrap().status,
            QueueEntryStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn expiry_marks_old_waiters_and_repacks() {
        let (controller, _, clock) = controller(vec![zone("z1", CENTER, 5.0, 1)]);
        controller.enqueue("z1", "q1", "r1", None).await.unwrap();
        clock.advance(Duration::minutes(20));
        controller.enqueue("z1", "q2", "r2", None).await.unwrap();

        let expired = controller.expire_timed_out().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].order_id, "q1");
        let q2 = controller.queue_status("q2").await.unwrap().unwrap();
        assert_eq!(q2.position, 1);
        assert_eq!(q2.status, QueueEntryStatus::Waiting);
    }

    #[tokio::test]
    async fn mark_completed_keeps_slot_used() {
        let (controller, store, clock) = controller(vec![zone("z1", CENTER, 5.0, 1)]);
        controller.consume("z1", "o1", Some(100.0), 1.0).await.unwrap();
        controller.mark_completed("o1").await.unwrap();
        let quota = store.quota("z1", clock.local_date(0), 12).await.unwrap().unwrap();
        assert_eq!(quota.used, 1);
        assert_eq!(quota.completed, 1);
        assert!(store.zone_admission("o1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn peak_hour_uses_peak_quota() {
        let (controller, _, clock) = controller(vec![zone("z1", CENTER, 5.0, 1)]);
        clock.set(
            chrono::NaiveDate::from_ymd_opt(2024, 6, 3)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap()
                .and_utc(),
        );
        assert!(controller.is_peak_zone(CENTER));
        // 20 slots at peak instead of 10.
        for i in 0..20 {
            assert!(controller
                .consume("z1", &format!("o{i}"), None, 1.0)
                .await
                .unwrap());
        }
        assert!(!controller.consume("z1", "o20", None, 1.0).await.unwrap());
    }
}
