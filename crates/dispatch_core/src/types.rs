//! Core data model: orders, drivers, zones, quota rows, queue entries, and
//! the analytics rows persisted through the store.
//!
//! Everything here is a plain serializable value; behavior lives in the
//! component modules. Invariants worth knowing:
//!
//! - `Order.status` transitions are monotonic; once `Accepted`, `driver_id`
//!   is bound and never changes.
//! - `Order.reject_count` equals the number of [`RejectionRow`]s linked to
//!   the order.
//! - Queue positions for `Waiting` entries in one zone are dense (1..N).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Point;

pub type OrderId = String;
pub type RiderId = String;
pub type DriverId = String;
pub type ZoneId = String;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Offered,
    Dispatching,
    Queued,
    Accepted,
    Arrived,
    OnTrip,
    Done,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states release dispatch ownership.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Done | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Cash,
    Card,
    InApp,
}

/// A pickup or destination: coordinates plus the display address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub point: Point,
    pub addr: String,
}

impl Place {
    pub fn new(lat: f64, lng: f64, addr: impl Into<String>) -> Self {
        Self {
            point: Point::new(lat, lng),
            addr: addr.into(),
        }
    }
}

/// Why an order ended in `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    /// No eligible drivers at batch time and nobody had rejected yet.
    NoDrivers,
    /// Every reachable driver rejected or timed out.
    AllRejected,
    /// The batch counter exceeded the configured maximum.
    MaxBatches,
    /// The order-total timer (or a queue timeout) fired.
    Timeout,
    /// The rider cancelled.
    RiderCancelled,
}

impl CancelReason {
    /// Human-readable reason surfaced to the rider.
    pub fn message(self) -> &'static str {
        match self {
            CancelReason::NoDrivers => "no drivers are available right now",
            CancelReason::AllRejected => "no driver took the trip",
            CancelReason::MaxBatches => "all dispatch rounds were exhausted",
            CancelReason::Timeout => "the request timed out",
            CancelReason::RiderCancelled => "cancelled by rider",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub rider_id: RiderId,
    pub pickup: Place,
    pub destination: Option<Place>,
    pub payment_kind: PaymentKind,
    /// Precomputed base fare; surge multiplies this, nothing else prices.
    pub base_fare: Option<f64>,
    pub status: OrderStatus,
    /// Bound on accept; never changes afterwards.
    pub driver_id: Option<DriverId>,
    pub reject_count: u32,
    /// Local hour at creation, 0..=23.
    pub hour_of_day: u8,
    /// Local day of week at creation, 0 = Monday.
    pub day_of_week: u8,
    pub created_at: DateTime<Utc>,
    pub offered_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<CancelReason>,
    /// Call-center origin extras (phone orders), opaque to the engine.
    pub call_origin: Option<String>,
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Available,
    Rest,
    OnTrip,
    Offline,
}

impl Availability {
    /// REST drivers stay eligible for ranking alongside AVAILABLE ones.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Availability::Available | Availability::Rest)
    }
}

/// Behavioral bucket used for efficiency matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverClass {
    FastTurnover,
    LongDistance,
    HighVolume,
}

/// Persistent driver stats, authoritative for identity and long-term numbers
/// (presence is authoritative only for reachability).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRow {
    pub driver_id: DriverId,
    pub acceptance_rate_pct: f64,
    pub driver_class: DriverClass,
    pub today_trips: u32,
    pub today_earnings: f64,
    pub online_hours_today: f64,
}

/// Per-driver behavioral profile recomputed from the last 30 days of
/// outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub driver_id: DriverId,
    /// Acceptance rate per local hour, each in [0, 1].
    pub hourly_acceptance: [f64; 24],
    /// Acceptance rate per hot zone.
    pub zone_acceptance: HashMap<ZoneId, f64>,
    /// Mean pickup distance over accepted offers (km).
    pub accepted_distance_avg_km: f64,
    /// Max pickup distance ever accepted (km).
    pub accepted_distance_max_km: f64,
    pub short_trip_accept_rate: f64,
    pub long_trip_accept_rate: f64,
    /// Daily earnings level beyond which the driver tends to stop accepting.
    pub earnings_saturation: f64,
    pub derived_class: DriverClass,
    pub last_recomputed_at: DateTime<Utc>,
    pub sample_size: u32,
}

// ---------------------------------------------------------------------------
// Hot zones
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotZoneConfig {
    pub zone_id: ZoneId,
    pub name: String,
    pub center: Point,
    pub radius_km: f64,
    /// Hours (local) during which the peak quota applies.
    pub peak_hours: Vec<u8>,
    pub quota_normal: u32,
    pub quota_peak: u32,
    /// Utilization at which surge starts, in [0, 1].
    pub surge_threshold: f64,
    /// Surge ceiling, in [1, 2].
    pub surge_max: f64,
    /// Utilization width of one surge step, in (0, 1].
    pub surge_step: f64,
    pub queue_enabled: bool,
    pub max_queue: u32,
    pub queue_timeout_min: u32,
    /// Overlapping zones resolve to the highest priority.
    pub priority: i32,
    pub active: bool,
}

impl HotZoneConfig {
    pub fn quota_limit(&self, hour: u8) -> u32 {
        if self.peak_hours.contains(&hour) {
            self.quota_peak
        } else {
            self.quota_normal
        }
    }
}

/// Ephemeral per-hour admission counter; created on first demand, kept for
/// the rest of the day (reporting reads it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourQuota {
    pub zone_id: ZoneId,
    pub date: NaiveDate,
    pub hour: u8,
    pub limit: u32,
    pub used: u32,
    pub surge: f64,
    pub cancelled: u32,
    pub completed: u32,
}

/// The admission an order holds while it occupies a quota slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneAdmission {
    pub order_id: OrderId,
    pub zone_id: ZoneId,
    pub date: NaiveDate,
    pub hour: u8,
    pub surge: f64,
}

// ---------------------------------------------------------------------------
// Overflow queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueEntryStatus {
    Waiting,
    Released,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: String,
    pub zone_id: ZoneId,
    pub order_id: OrderId,
    pub rider_id: RiderId,
    /// 1-based; dense across the zone's WAITING entries.
    pub position: u32,
    pub est_wait_min: u32,
    pub surge_at_enqueue: f64,
    pub base_fare: Option<f64>,
    pub surged_fare: Option<f64>,
    pub queued_at: DateTime<Utc>,
    pub status: QueueEntryStatus,
}

// ---------------------------------------------------------------------------
// Analytics rows
// ---------------------------------------------------------------------------

/// Reason a driver gave for declining an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReasonCode {
    TooFar,
    LowFare,
    UnwantedArea,
    OffDuty,
    Timeout,
    Other,
}

/// One explicit driver decline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRow {
    pub order_id: OrderId,
    pub driver_id: DriverId,
    pub reason_code: RejectReasonCode,
    pub distance_to_pickup_km: f64,
    pub trip_distance_km: Option<f64>,
    pub estimated_fare: Option<f64>,
    pub hour_of_day: u8,
    pub driver_today_earnings: f64,
    pub created_at: DateTime<Utc>,
}

/// One row per executed offer batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchLogRow {
    pub order_id: OrderId,
    pub batch_number: u32,
    /// `[{driver_id, score, eta_s, reason, p_reject}]`
    pub candidates_json: serde_json::Value,
    pub weights_json: serde_json::Value,
    pub hour: u8,
    pub dow: u8,
    pub accepted_by: Option<DriverId>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub response_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Auto-accept
// ---------------------------------------------------------------------------

/// Per-driver auto-accept policy, configured by the driver client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoAcceptSettings {
    pub driver_id: DriverId,
    pub enabled: bool,
    pub max_pickup_distance_km: f64,
    pub min_fare: f64,
    pub min_trip_distance_km: f64,
    /// Local hours during which auto-accept may fire; empty = any hour.
    pub active_hours: Vec<u8>,
    pub blacklisted_zones: Vec<ZoneId>,
    pub daily_cap: u32,
    /// Minimum gap between two auto-accepts.
    pub cooldown_min: u32,
    pub max_consecutive: u32,
    /// Completion-rate floor applied once the driver has >= 5 auto-accepted
    /// orders.
    pub min_completion_rate_pct: f64,
}

/// Daily auto-accept counters per driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoAcceptStats {
    pub auto_accepted_today: u32,
    pub consecutive: u32,
    pub last_auto_accept_at: Option<DateTime<Utc>>,
    pub lifetime_auto_accepted: u32,
    pub lifetime_completed: u32,
}

/// The engine's auto-accept feasibility verdict, attached to the offer and
/// logged. The engine never auto-accepts; the driver client does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoAcceptDecision {
    /// 0..=100.
    pub score: f64,
    pub allowed: bool,
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoAcceptLogRow {
    pub order_id: OrderId,
    pub driver_id: DriverId,
    pub batch_number: u32,
    pub decision: AutoAcceptDecision,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ETA cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaCacheRow {
    pub origin_lat_q: i32,
    pub origin_lng_q: i32,
    pub dest_lat_q: i32,
    pub dest_lng_q: i32,
    pub hour_of_day: u8,
    pub distance_m: u32,
    pub duration_s: u32,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u32,
}

// ---------------------------------------------------------------------------
// Outcome samples (training + profiles)
// ---------------------------------------------------------------------------

/// One offer outcome: the features the driver saw and whether they took the
/// trip. Feeds both profile recomputation and model training. Batch timeouts
/// are recorded here as non-accepts without a matching [`RejectionRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSample {
    pub driver_id: DriverId,
    pub order_id: OrderId,
    pub accepted: bool,
    pub distance_to_pickup_km: f64,
    pub trip_distance_km: f64,
    pub estimated_fare: f64,
    pub hour_of_day: u8,
    pub day_of_week: u8,
    pub is_holiday: bool,
    pub driver_today_earnings: f64,
    pub driver_today_trips: u32,
    pub driver_online_hours: f64,
    pub driver_acceptance_rate: f64,
    pub zone_id: Option<ZoneId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Done.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Dispatching.is_terminal());
        assert!(!OrderStatus::Accepted.is_terminal());
    }

    #[test]
    fn quota_limit_switches_on_peak_hours() {
        let zone = HotZoneConfig {
            zone_id: "z1".into(),
            name: "Station".into(),
            center: Point::new(25.0478, 121.5170),
            radius_km: 1.5,
            peak_hours: vec![7, 8, 17, 18, 19],
            quota_normal: 10,
            quota_peak: 20,
            surge_threshold: 0.8,
            surge_max: 1.5,
            surge_step: 0.1,
            queue_enabled: true,
            max_queue: 10,
            queue_timeout_min: 15,
            priority: 1,
            active: true,
        };
        assert_eq!(zone.quota_limit(8), 20);
        assert_eq!(zone.quota_limit(12), 10);
    }

    #[test]
    fn rest_drivers_are_dispatchable() {
        assert!(Availability::Available.is_dispatchable());
        assert!(Availability::Rest.is_dispatchable());
        assert!(!Availability::OnTrip.is_dispatchable());
        assert!(!Availability::Offline.is_dispatchable());
    }
}
