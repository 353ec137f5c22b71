//! Push-channel collaborator surface: the messages the core emits to driver
//! and rider clients.
//!
//! Transport (WebSocket, long-poll, whatever) is external; the engine only
//! needs the [`Notifier`] trait. A send failure means "unreachable right
//! now" — the engine logs and moves on, it never retries or blocks dispatch
//! on delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::eta::EtaSource;
use crate::types::{AutoAcceptDecision, CancelReason, OrderId, OrderStatus, PaymentKind, Place};

/// Zone context attached to offers and rider updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotZoneHint {
    pub zone_id: String,
    pub name: String,
    pub surge: f64,
}

/// `order:offer` — invitation pushed to one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferMessage {
    pub order_id: OrderId,
    pub pickup: Place,
    pub destination: Option<Place>,
    pub payment_kind: PaymentKind,
    pub base_fare: Option<f64>,
    /// Surge-adjusted fare the driver would earn.
    pub final_fare: Option<f64>,
    pub pickup_distance_km: f64,
    pub eta_min: f64,
    pub eta_source: EtaSource,
    pub batch_number: u32,
    /// Absolute deadline, epoch milliseconds.
    pub response_deadline_ms: i64,
    /// Top scoring reasons, e.g. "nearby".
    pub dispatch_reason: String,
    pub hot_zone: Option<HotZoneHint>,
    pub auto_accept: AutoAcceptDecision,
}

/// `order:taken` — the order went to someone else (or went away).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTaken {
    pub order_id: OrderId,
    pub message: String,
}

/// Rider-facing dispatch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Searching,
    Queued,
    Accepted,
    Failed,
}

/// `order:update` — the single surface the rider sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderUpdate {
    pub order_id: OrderId,
    pub status: Option<OrderStatus>,
    pub dispatch_status: DispatchStatus,
    pub batch_number: Option<u32>,
    pub offered_count: Option<usize>,
    pub queue_position: Option<u32>,
    pub estimated_wait_min: Option<u32>,
    pub message: String,
    pub cancel_reason: Option<CancelReason>,
    pub hot_zone_info: Option<HotZoneHint>,
}

impl RiderUpdate {
    /// Bare progress update with everything optional unset.
    pub fn new(order_id: &str, dispatch_status: DispatchStatus, message: impl Into<String>) -> Self {
        Self {
            order_id: order_id.to_string(),
            status: None,
            dispatch_status,
            batch_number: None,
            offered_count: None,
            queue_position: None,
            estimated_wait_min: None,
            message: message.into(),
            cancel_reason: None,
            hot_zone_info: None,
        }
    }
}

/// Push channels to connected clients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn offer(&self, driver_id: &str, offer: OfferMessage) -> Result<(), DispatchError>;

    async fn order_taken(&self, driver_id: &str, taken: OrderTaken) -> Result<(), DispatchError>;

    async fn batch_timeout(&self, driver_id: &str, order_id: &str) -> Result<(), DispatchError>;

    /// Offer withdrawn (rider cancelled a dispatched or accepted order).
    async fn order_cancelled(
        &self,
        driver_id: &str,
        order_id: &str,
        message: &str,
    ) -> Result<(), DispatchError>;

    async fn rider_update(&self, rider_id: &str, update: RiderUpdate) -> Result<(), DispatchError>;
}
