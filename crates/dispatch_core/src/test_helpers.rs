//! Shared fixtures for tests (and for hosts embedding the core without a
//! real push channel).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DispatchError;
use crate::geo::Point;
use crate::notify::{Notifier, OfferMessage, OrderTaken, RiderUpdate};
use crate::presence::PresenceEntry;
use crate::types::{
    Availability, DriverClass, DriverRow, HotZoneConfig,
};

/// Taipei Main Station; the standard test pickup area.
pub const TEST_CENTER: Point = Point {
    lat: 25.0478,
    lng: 121.5170,
};

/// A point roughly `km` kilometres north of `from` (1 degree latitude is
/// ~111 km).
pub fn point_km_north(from: Point, km: f64) -> Point {
    Point {
        lat: from.lat + km / 111.0,
        lng: from.lng,
    }
}

/// A driver row with sane defaults for ranking.
pub fn driver_row(driver_id: &str) -> DriverRow {
    DriverRow {
        driver_id: driver_id.to_string(),
        acceptance_rate_pct: 92.0,
        driver_class: DriverClass::HighVolume,
        today_trips: 4,
        today_earnings: 1_500.0,
        online_hours_today: 5.0,
    }
}

/// A fresh presence entry at the given position.
pub fn presence_entry(driver_id: &str, position: Point, now: DateTime<Utc>) -> PresenceEntry {
    PresenceEntry {
        driver_id: driver_id.to_string(),
        position,
        last_heartbeat: now,
        availability: Availability::Available,
    }
}

/// A permissive hot zone centered on [`TEST_CENTER`].
pub fn test_zone(zone_id: &str) -> HotZoneConfig {
    HotZoneConfig {
        zone_id: zone_id.to_string(),
        name: format!("zone {zone_id}"),
        center: TEST_CENTER,
        radius_km: 3.0,
        peak_hours: vec![7, 8, 17, 18, 19],
        quota_normal: 5,
        quota_peak: 10,
        surge_threshold: 0.8,
        surge_max: 1.5,
        surge_step: 0.1,
        queue_enabled: true,
        max_queue: 10,
        queue_timeout_min: 15,
        priority: 1,
        active: true,
    }
}

/// Everything a driver or rider client would have received, in order.
#[derive(Debug)]
pub enum SentMessage {
    Offer {
        driver_id: String,
        offer: OfferMessage,
    },
    Taken {
        driver_id: String,
        taken: OrderTaken,
    },
    BatchTimeout {
        driver_id: String,
        order_id: String,
    },
    Cancelled {
        driver_id: String,
        order_id: String,
        message: String,
    },
    Rider {
        rider_id: String,
        update: RiderUpdate,
    },
}

/// [`Notifier`] double that records every push.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, message: SentMessage) {
        self.sent.lock().expect("notifier log poisoned").push(message);
    }

    /// Offers pushed so far, as (driver_id, message) pairs.
    pub fn offers(&self) -> Vec<(String, OfferMessage)> {
        self.sent
            .lock()
            .expect("notifier log poisoned")
            .iter()
            .filter_map(|m| match m {
                SentMessage::Offer { driver_id, offer } => {
                    Some((driver_id.clone(), offer.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn taken(&self) -> Vec<(String, OrderTaken)> {
        self.sent
            .lock()
            .expect("notifier log poisoned")
            .iter()
            .filter_map(|m| match m {
                SentMessage::Taken { driver_id, taken } => {
                    Some((driver_id.clone(), taken.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn batch_timeouts(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .expect("notifier log poisoned")
            .iter()
            .filter_map(|m| match m {
                SentMessage::BatchTimeout {
                    driver_id,
                    order_id,
                } => Some((driver_id.clone(), order_id.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn cancellations(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .expect("notifier log poisoned")
            .iter()
            .filter_map(|m| match m {
                SentMessage::Cancelled {
                    driver_id,
                    order_id,
                    ..
                } => Some((driver_id.clone(), order_id.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn rider_updates(&self, rider_id: &str) -> Vec<RiderUpdate> {
        self.sent
            .lock()
            .expect("notifier log poisoned")
            .iter()
            .filter_map(|m| match m {
                SentMessage::Rider {
                    rider_id: r,
                    update,
                } if r == rider_id => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_rider_update(&self, rider_id: &str) -> Option<RiderUpdate> {
        self.rider_updates(rider_id).into_iter().last()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn offer(&self, driver_id: &str, offer: OfferMessage) -> Result<(), DispatchError> {
        self.push(SentMessage::Offer {
            driver_id: driver_id.to_string(),
            offer,
        });
        Ok(())
    }

    async fn order_taken(&self, driver_id: &str, taken: OrderTaken) -> Result<(), DispatchError> {
        self.push(SentMessage::Taken {
            driver_id: driver_id.to_string(),
            taken,
        });
        Ok(())
    }

    async fn batch_timeout(&self, driver_id: &str, order_id: &str) -> Result<(), DispatchError> {
        self.push(SentMessage::BatchTimeout {
            driver_id: driver_id.to_string(),
            order_id: order_id.to_string(),
        });
        Ok(())
    }

    async fn order_cancelled(
        &self,
        driver_id: &str,
        order_id: &str,
        message: &str,
    ) -> Result<(), DispatchError> {
        self.push(SentMessage::Cancelled {
            driver_id: driver_id.to_string(),
            order_id: order_id.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn rider_update(&self, rider_id: &str, update: RiderUpdate) -> Result<(), DispatchError> {
        self.push(SentMessage::Rider {
            rider_id: rider_id.to_string(),
            update,
        });
        Ok(())
    }
}
