//! In-memory [`Store`] implementation.
//!
//! One mutex over the whole state keeps every compound operation atomic,
//! which is exactly what the quota and queue semantics require. Used by the
//! integration tests and by embedding hosts that run without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::Store;
use crate::error::DispatchError;
use crate::geo::QuantKey;
use crate::types::{
    AutoAcceptLogRow, AutoAcceptSettings, AutoAcceptStats, DispatchLogRow, DriverId, DriverProfile,
    DriverRow, EtaCacheRow, HourQuota, Order, OutcomeSample, QueueEntry, QueueEntryStatus,
    RejectionRow, ZoneAdmission,
};

type Result<T> = std::result::Result<T, DispatchError>;

type QuotaKey = (String, NaiveDate, u8);
type EtaKey = (QuantKey, QuantKey, u8);

#[derive(Debug, Default)]
struct Inner {
    orders: HashMap<String, Order>,
    drivers: HashMap<String, DriverRow>,
    profiles: HashMap<String, DriverProfile>,
    outcomes: Vec<OutcomeSample>,
    rejections: Vec<RejectionRow>,
    dispatch_logs: Vec<DispatchLogRow>,
    quotas: HashMap<QuotaKey, HourQuota>,
    admissions: HashMap<String, ZoneAdmission>,
    queue: HashMap<String, QueueEntry>,
    eta_cache: HashMap<EtaKey, EtaCacheRow>,
    auto_accept_settings: HashMap<String, AutoAcceptSettings>,
    auto_accept_stats: HashMap<(String, NaiveDate), AutoAcceptStats>,
    auto_accept_logs: Vec<AutoAcceptLogRow>,
    daily_earnings: HashMap<(String, NaiveDate), f64>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }

    // -- seeding helpers (tests and embedding hosts) ------------------------

    pub fn seed_driver(&self, row: DriverRow) {
        self.lock().drivers.insert(row.driver_id.clone(), row);
    }

    pub fn seed_auto_accept_settings(&self, settings: AutoAcceptSettings) {
        self.lock()
            .auto_accept_settings
            .insert(settings.driver_id.clone(), settings);
    }

    pub fn seed_auto_accept_stats(&self, driver_id: &str, date: NaiveDate, stats: AutoAcceptStats) {
        self.lock()
            .auto_accept_stats
            .insert((driver_id.to_string(), date), stats);
    }

    /// All auto-accept decision rows, newest last.
    pub fn auto_accept_log_rows(&self) -> Vec<AutoAcceptLogRow> {
        self.lock().auto_accept_logs.clone()
    }

    pub fn rejection_rows(&self) -> Vec<RejectionRow> {
        self.lock().rejections.clone()
    }

    pub fn outcome_rows(&self) -> Vec<OutcomeSample> {
        self.lock().outcomes.clone()
    }

    pub fn daily_earnings_for(&self, driver_id: &str, date: NaiveDate) -> f64 {
        self.lock()
            .daily_earnings
            .get(&(driver_id.to_string(), date))
            .copied()
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    // -- orders -------------------------------------------------------------

    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.lock()
            .orders
            .insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        self.lock()
            .orders
            .insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn order(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.lock().orders.get(order_id).cloned())
    }

    // -- drivers ------------------------------------------------------------

    async fn driver_row(&self, driver_id: &str) -> Result<Option<DriverRow>> {
        Ok(self.lock().drivers.get(driver_id).cloned())
    }

    async fn driver_rows(&self, driver_ids: &[DriverId]) -> Result<Vec<DriverRow>> {
        let inner = self.lock();
        Ok(driver_ids
            .iter()
            .filter_map(|id| inner.drivers.get(id).cloned())
            .collect())
    }

    async fn record_trip_completion(
        &self,
        driver_id: &str,
        date: NaiveDate,
        fare: f64,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(row) = inner.drivers.get_mut(driver_id) {
            row.today_trips += 1;
            row.today_earnings += fare;
        }
        *inner
            .daily_earnings
            .entry((driver_id.to_string(), date))
            .or_insert(0.0) += fare;
        Ok(())
    }

    async fn active_driver_ids(&self) -> Result<Vec<DriverId>> {
        Ok(self.lock().drivers.keys().cloned().collect())
    }

    // -- behavioral profiles ------------------------------------------------

    async fn profile(&self, driver_id: &str) -> Result<Option<DriverProfile>> {
        Ok(self.lock().profiles.get(driver_id).cloned())
    }

    async fn upsert_profile(&self, profile: &DriverProfile) -> Result<()> {
        self.lock()
            .profiles
            .insert(profile.driver_id.clone(), profile.clone());
        Ok(())
    }

    // -- offer outcomes -----------------------------------------------------

    async fn insert_outcome(&self, sample: &OutcomeSample) -> Result<()> {
        self.lock().outcomes.push(sample.clone());
        Ok(())
    }

    async fn outcomes_since(
        &self,
        driver_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<OutcomeSample>> {
        let inner = self.lock();
        Ok(inner
            .outcomes
            .iter()
            .filter(|s| s.created_at >= since)
            .filter(|s| driver_id.map_or(true, |id| s.driver_id == id))
            .cloned()
            .collect())
    }

    // -- rejections ----------------------------------------------------------

    async fn insert_rejection(&self, row: &RejectionRow) -> Result<()> {
        self.lock().rejections.push(row.clone());
        Ok(())
    }

    async fn rejection_count(&self, order_id: &str) -> Result<u32> {
        Ok(self
            .lock()
            .rejections
            .iter()
            .filter(|r| r.order_id == order_id)
            .count() as u32)
    }

    // -- dispatch decision log ----------------------------------------------

    async fn insert_dispatch_log(&self, row: &DispatchLogRow) -> Result<()> {
        self.lock().dispatch_logs.push(row.clone());
        Ok(())
    }

    async fn mark_dispatch_log_accepted(
        &self,
        order_id: &str,
        batch_number: u32,
        driver_id: &str,
        accepted_at: DateTime<Utc>,
        response_ms: u64,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(row) = inner
            .dispatch_logs
            .iter_mut()
            .find(|r| r.order_id == order_id && r.batch_number == batch_number)
        {
            row.accepted_by = Some(driver_id.to_string());
            row.accepted_at = Some(accepted_at);
            row.response_ms = Some(response_ms);
        }
        Ok(())
    }

    async fn dispatch_logs(&self, order_id: &str) -> Result<Vec<DispatchLogRow>> {
        let inner = self.lock();
        let mut rows: Vec<DispatchLogRow> = inner
            .dispatch_logs
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.batch_number);
        Ok(rows)
    }

    // -- hot-zone quotas ----------------------------------------------------

    async fn quota(&self, zone_id: &str, date: NaiveDate, hour: u8) -> Result<Option<HourQuota>> {
        Ok(self
            .lock()
            .quotas
            .get(&(zone_id.to_string(), date, hour))
            .cloned())
    }

    async fn fetch_or_create_quota(
        &self,
        zone_id: &str,
        date: NaiveDate,
        hour: u8,
        limit: u32,
    ) -> Result<HourQuota> {
        let mut inner = self.lock();
        let quota = inner
            .quotas
            .entry((zone_id.to_string(), date, hour))
            .or_insert_with(|| HourQuota {
                zone_id: zone_id.to_string(),
                date,
                hour,
                limit,
                used: 0,
                surge: 1.0,
                cancelled: 0,
                completed: 0,
            });
        Ok(quota.clone())
    }

    async fn try_consume_quota(
        &self,
        zone_id: &str,
        date: NaiveDate,
        hour: u8,
        limit: u32,
    ) -> Result<bool> {
        let mut inner = self.lock();
        let quota = inner
            .quotas
            .entry((zone_id.to_string(), date, hour))
            .or_insert_with(|| HourQuota {
                zone_id: zone_id.to_string(),
                date,
                hour,
                limit,
                used: 0,
                surge: 1.0,
                cancelled: 0,
                completed: 0,
            });
        if quota.used < quota.limit {
            quota.used += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_quota_slot(&self, zone_id: &str, date: NaiveDate, hour: u8) -> Result<()> {
        let mut inner = self.lock();
        if let Some(quota) = inner.quotas.get_mut(&(zone_id.to_string(), date, hour)) {
            quota.used = quota.used.saturating_sub(1);
            quota.cancelled += 1;
        }
        Ok(())
    }

    async fn mark_quota_completed(&self, zone_id: &str, date: NaiveDate, hour: u8) -> Result<()> {
        let mut inner = self.lock();
        if let Some(quota) = inner.quotas.get_mut(&(zone_id.to_string(), date, hour)) {
            quota.completed += 1;
        }
        Ok(())
    }

    async fn set_quota_surge(
        &self,
        zone_id: &str,
        date: NaiveDate,
        hour: u8,
        surge: f64,
    ) -> Result<()> {
        let mut inner = self.lock();
        if let Some(quota) = inner.quotas.get_mut(&(zone_id.to_string(), date, hour)) {
            quota.surge = surge;
        }
        Ok(())
    }

    // -- zone admissions -----------------------------------------------------

    async fn insert_zone_admission(&self, admission: &ZoneAdmission) -> Result<()> {
        self.lock()
            .admissions
            .insert(admission.order_id.clone(), admission.clone());
        Ok(())
    }

    async fn zone_admission(&self, order_id: &str) -> Result<Option<ZoneAdmission>> {
        Ok(self.lock().admissions.get(order_id).cloned())
    }

    async fn remove_zone_admission(&self, order_id: &str) -> Result<Option<ZoneAdmission>> {
        Ok(self.lock().admissions.remove(order_id))
    }

    // -- overflow queue ------------------------------------------------------

    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.lock()
            .queue
            .insert(entry.order_id.clone(), entry.clone());
        Ok(())
    }

    async fn update_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.lock()
            .queue
            .insert(entry.order_id.clone(), entry.clone());
        Ok(())
    }

    async fn queue_entry_by_order(&self, order_id: &str) -> Result<Option<QueueEntry>> {
        Ok(self.lock().queue.get(order_id).cloned())
    }

    async fn waiting_entries(&self, zone_id: &str) -> Result<Vec<QueueEntry>> {
        let inner = self.lock();
        let mut entries: Vec<QueueEntry> = inner
            .queue
            .values()
            .filter(|e| e.zone_id == zone_id && e.status == QueueEntryStatus::Waiting)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.position);
        Ok(entries)
    }

    // -- eta cache -----------------------------------------------------------

    async fn eta_cache_get(
        &self,
        origin: QuantKey,
        dest: QuantKey,
        hour: u8,
    ) -> Result<Option<EtaCacheRow>> {
        let mut inner = self.lock();
        if let Some(row) = inner.eta_cache.get_mut(&(origin, dest, hour)) {
            row.hit_count += 1;
            return Ok(Some(row.clone()));
        }
        Ok(None)
    }

    async fn eta_cache_put(&self, row: &EtaCacheRow) -> Result<()> {
        let origin = QuantKey {
            lat_q: row.origin_lat_q,
            lng_q: row.origin_lng_q,
        };
        let dest = QuantKey {
            lat_q: row.dest_lat_q,
            lng_q: row.dest_lng_q,
        };
        self.lock()
            .eta_cache
            .insert((origin, dest, row.hour_of_day), row.clone());
        Ok(())
    }

    async fn eta_cache_purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.lock();
        let before = inner.eta_cache.len();
        inner.eta_cache.retain(|_, row| row.expires_at > now);
        Ok(before - inner.eta_cache.len())
    }

    // -- auto-accept ---------------------------------------------------------

    async fn auto_accept_settings(&self, driver_id: &str) -> Result<Option<AutoAcceptSettings>> {
        Ok(self.lock().auto_accept_settings.get(driver_id).cloned())
    }

    async fn auto_accept_stats(&self, driver_id: &str, date: NaiveDate) -> Result<AutoAcceptStats> {
        Ok(self
            .lock()
            .auto_accept_stats
            .get(&(driver_id.to_string(), date))
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_auto_accept_log(&self, row: &AutoAcceptLogRow) -> Result<()> {
        self.lock().auto_accept_logs.push(row.clone());
        Ok(())
    }
}
