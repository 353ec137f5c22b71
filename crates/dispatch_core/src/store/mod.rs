//! Persistent-store collaborator surface.
//!
//! The relational store itself (schema migrations, SQL dialect, pooling) is
//! external; the core talks to it through the [`Store`] trait. Semantics the
//! engine depends on:
//!
//! - `try_consume_quota` is atomic: at most `limit` successful consumes per
//!   (zone, date, hour), under any number of concurrent callers.
//! - Order writes are durable before the caller acknowledges a transition.
//! - `eta_cache_get` bumps the row's hit counter.
//!
//! [`MemoryStore`] implements the trait over mutex-guarded maps with the same
//! atomicity guarantees; it is the test substrate and the reference for what
//! each method must do.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::DispatchError;
use crate::geo::QuantKey;
use crate::types::{
    AutoAcceptLogRow, AutoAcceptSettings, AutoAcceptStats, DispatchLogRow, DriverId, DriverProfile,
    DriverRow, EtaCacheRow, HourQuota, Order, OutcomeSample, QueueEntry, RejectionRow,
    ZoneAdmission,
};

type Result<T> = std::result::Result<T, DispatchError>;

#[async_trait]
pub trait Store: Send + Sync {
    // -- orders -------------------------------------------------------------

    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Full-row update. Orders are single-writer (the owning task), so a
    /// last-write-wins upsert is sufficient.
    async fn update_order(&self, order: &Order) -> Result<()>;

    async fn order(&self, order_id: &str) -> Result<Option<Order>>;

    // -- drivers ------------------------------------------------------------

    async fn driver_row(&self, driver_id: &str) -> Result<Option<DriverRow>>;

    async fn driver_rows(&self, driver_ids: &[DriverId]) -> Result<Vec<DriverRow>>;

    /// Bump today's trip count and earnings on trip completion.
    async fn record_trip_completion(
        &self,
        driver_id: &str,
        date: NaiveDate,
        fare: f64,
    ) -> Result<()>;

    async fn active_driver_ids(&self) -> Result<Vec<DriverId>>;

    // -- behavioral profiles ------------------------------------------------

    async fn profile(&self, driver_id: &str) -> Result<Option<DriverProfile>>;

    async fn upsert_profile(&self, profile: &DriverProfile) -> Result<()>;

    // -- offer outcomes (training + profiles) -------------------------------

    async fn insert_outcome(&self, sample: &OutcomeSample) -> Result<()>;

    /// Outcomes since `since`; filtered to one driver when `driver_id` is
    /// set.
    async fn outcomes_since(
        &self,
        driver_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<OutcomeSample>>;

    // -- rejections ----------------------------------------------------------

    async fn insert_rejection(&self, row: &RejectionRow) -> Result<()>;

    async fn rejection_count(&self, order_id: &str) -> Result<u32>;

    // -- dispatch decision log ----------------------------------------------

    async fn insert_dispatch_log(&self, row: &DispatchLogRow) -> Result<()>;

    /// Stamp the accept onto the batch row that produced it.
    async fn mark_dispatch_log_accepted(
        &self,
        order_id: &str,
        batch_number: u32,
        driver_id: &str,
        accepted_at: DateTime<Utc>,
        response_ms: u64,
    ) -> Result<()>;

    async fn dispatch_logs(&self, order_id: &str) -> Result<Vec<DispatchLogRow>>;

    // -- hot-zone quotas ----------------------------------------------------

    async fn quota(&self, zone_id: &str, date: NaiveDate, hour: u8) -> Result<Option<HourQuota>>;

    /// Lazily create the (zone, date, hour) row with the given limit.
    async fn fetch_or_create_quota(
        &self,
        zone_id: &str,
        date: NaiveDate,
        hour: u8,
        limit: u32,
    ) -> Result<HourQuota>;

    /// Atomic `used = used + 1 where used < limit`; false when full.
    async fn try_consume_quota(
        &self,
        zone_id: &str,
        date: NaiveDate,
        hour: u8,
        limit: u32,
    ) -> Result<bool>;

    /// Decrement `used` (never below 0) and bump the cancelled counter.
    async fn release_quota_slot(&self, zone_id: &str, date: NaiveDate, hour: u8) -> Result<()>;

    async fn mark_quota_completed(&self, zone_id: &str, date: NaiveDate, hour: u8) -> Result<()>;

    /// Persist a recomputed surge multiplier.
    async fn set_quota_surge(
        &self,
        zone_id: &str,
        date: NaiveDate,
        hour: u8,
        surge: f64,
    ) -> Result<()>;

    // -- zone admissions (order -> quota slot tracking) ----------------------

    async fn insert_zone_admission(&self, admission: &ZoneAdmission) -> Result<()>;

    async fn zone_admission(&self, order_id: &str) -> Result<Option<ZoneAdmission>>;

    async fn remove_zone_admission(&self, order_id: &str) -> Result<Option<ZoneAdmission>>;

    // -- overflow queue ------------------------------------------------------

    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<()>;

    async fn update_queue_entry(&self, entry: &QueueEntry) -> Result<()>;

    async fn queue_entry_by_order(&self, order_id: &str) -> Result<Option<QueueEntry>>;

    /// WAITING entries of a zone ordered by position.
    async fn waiting_entries(&self, zone_id: &str) -> Result<Vec<QueueEntry>>;

    // -- eta cache -----------------------------------------------------------

    /// Fetch and bump hit_count. Expiry is the caller's concern (stale rows
    /// may be read until swept).
    async fn eta_cache_get(
        &self,
        origin: QuantKey,
        dest: QuantKey,
        hour: u8,
    ) -> Result<Option<EtaCacheRow>>;

    async fn eta_cache_put(&self, row: &EtaCacheRow) -> Result<()>;

    async fn eta_cache_purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    // -- auto-accept ---------------------------------------------------------

    async fn auto_accept_settings(&self, driver_id: &str) -> Result<Option<AutoAcceptSettings>>;

    async fn auto_accept_stats(&self, driver_id: &str, date: NaiveDate) -> Result<AutoAcceptStats>;

    async fn insert_auto_accept_log(&self, row: &AutoAcceptLogRow) -> Result<()>;
}
