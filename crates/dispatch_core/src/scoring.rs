//! Driver ranking: the weighted multi-factor score over the live driver set.
//!
//! Candidates come from the presence snapshot (AVAILABLE or REST, fresh
//! heartbeat, not excluded), are augmented with their persistent driver row,
//! batched through the ETA oracle, filtered by predicted rejection, scored
//! on six components, and returned best-first.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::ScorerConfig;
use crate::eta::{Eta, EtaOracle};
use crate::geo::{haversine_km, Point};
use crate::hotzone::HotZoneController;
use crate::predict::{RejectContext, RejectEstimate, RejectionPredictor};
use crate::presence::PresenceRegistry;
use crate::store::Store;
use crate::types::{DriverClass, DriverId, Order};

/// Trip length bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripClass {
    Short,
    Medium,
    Long,
}

impl TripClass {
    pub fn from_km(km: f64) -> Self {
        if km < 3.0 {
            TripClass::Short
        } else if km <= 10.0 {
            TripClass::Medium
        } else {
            TripClass::Long
        }
    }
}

/// Raw efficiency-match table, scaled to 100 by `efficiency_score`.
/// Rows: trip class; columns: driver class.
fn efficiency_entry(trip: TripClass, class: DriverClass) -> f64 {
    use DriverClass::*;
    use TripClass::*;
    match (trip, class) {
        (Short, FastTurnover) => 15.0,
        (Short, HighVolume) => 10.0,
        (Short, LongDistance) => 7.0,
        (Medium, HighVolume) => 15.0,
        (Medium, FastTurnover) => 10.0,
        (Medium, LongDistance) => 8.0,
        (Long, LongDistance) => 15.0,
        (Long, HighVolume) => 10.0,
        (Long, FastTurnover) => 7.0,
    }
}

fn efficiency_score(trip: TripClass, class: DriverClass) -> f64 {
    efficiency_entry(trip, class) / 15.0 * 100.0
}

/// The six normalized components, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance: f64,
    pub eta: f64,
    pub earnings_balance: f64,
    pub acceptance: f64,
    pub efficiency: f64,
    pub hot_zone: f64,
}

/// One ranked candidate, with everything the offer payload and the decision
/// log need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverScore {
    pub driver_id: DriverId,
    pub total: f64,
    pub breakdown: ScoreBreakdown,
    pub distance_km: f64,
    pub eta: Eta,
    pub estimate: RejectEstimate,
    pub driver_class: DriverClass,
    pub acceptance_rate_pct: f64,
    /// Feature context the estimate was computed from; reused for outcome
    /// logging.
    pub context: RejectContext,
    /// Top component names justifying the pick.
    pub reasons: Vec<String>,
}

pub struct DriverScorer {
    config: ScorerConfig,
    heartbeat_freshness: Duration,
    presence: Arc<PresenceRegistry>,
    store: Arc<dyn Store>,
    eta: Arc<EtaOracle>,
    predictor: Arc<RejectionPredictor>,
    hotzone: Arc<HotZoneController>,
    clock: Arc<dyn Clock>,
}

impl DriverScorer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ScorerConfig,
        heartbeat_freshness: Duration,
        presence: Arc<PresenceRegistry>,
        store: Arc<dyn Store>,
        eta: Arc<EtaOracle>,
        predictor: Arc<RejectionPredictor>,
        hotzone: Arc<HotZoneController>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            heartbeat_freshness,
            presence,
            store,
            eta,
            predictor,
            hotzone,
            clock,
        }
    }

    /// Rank up to `k` candidates for the order, excluding drivers already
    /// tried. Empty when nobody is left.
    pub async fn rank(
        &self,
        order: &Order,
        surge: f64,
        exclude: &HashSet<DriverId>,
        k: usize,
    ) -> Vec<DriverScore> {
        let now = self.clock.now();
        let freshness =
            chrono::Duration::from_std(self.heartbeat_freshness).unwrap_or_else(|_| {
                chrono::Duration::seconds(120)
            });

        let live: Vec<_> = self
            .presence
            .snapshot()
            .into_iter()
            .filter(|e| e.availability.is_dispatchable())
            .filter(|e| !exclude.contains(&e.driver_id))
            .filter(|e| now - e.last_heartbeat <= freshness)
            .collect();
        if live.is_empty() {
            return Vec::new();
        }

        let ids: Vec<DriverId> = live.iter().map(|e| e.driver_id.clone()).collect();
        let rows = match self.store.driver_rows(&ids).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "driver row fetch failed, skipping rank");
                return Vec::new();
            }
        };

        // Keep only drivers with a persistent identity, in presence order.
        let mut candidates = Vec::new();
        for entry in &live {
            if let Some(row) = rows.iter().find(|r| r.driver_id == entry.driver_id) {
                candidates.push((entry.clone(), row.clone()));
            }
        }
        if candidates.is_empty() {
            return Vec::new();
        }

        let pickup = order.pickup.point;
        let origins: Vec<Point> = candidates.iter().map(|(e, _)| e.position).collect();
        let etas = self.eta.eta_batch(&origins, pickup).await;

        let trip_km = order
            .destination
            .as_ref()
            .map(|d| haversine_km(pickup, d.point))
            .unwrap_or(0.0);
        let trip_class = order
            .destination
            .as_ref()
            .map(|_| TripClass::from_km(trip_km))
            .unwrap_or(TripClass::Medium);
        let estimated_fare = order.base_fare.unwrap_or(0.0) * surge;
        let in_peak_zone = self.hotzone.is_peak_zone(pickup);
        let hot_zone_component = if in_peak_zone { 100.0 } else { 0.0 };

        let mut scored = Vec::with_capacity(candidates.len());
        for ((entry, row), eta) in candidates.into_iter().zip(etas) {
            let distance_km = haversine_km(entry.position, pickup);
            let context = RejectContext {
                distance_to_pickup_km: distance_km,
                trip_distance_km: trip_km,
                estimated_fare,
                hour_of_day: order.hour_of_day,
                day_of_week: order.day_of_week,
                is_holiday: false,
                driver_today_earnings: row.today_earnings,
                driver_today_trips: row.today_trips,
                driver_online_hours: row.online_hours_today,
                driver_acceptance_rate: row.acceptance_rate_pct,
            };
            let estimate = self.predictor.p_reject(&row.driver_id, &context).await;
            if estimate.probability >= self.config.reject_threshold {
                continue;
            }

            let breakdown = ScoreBreakdown {
                distance: (100.0 - distance_km * 10.0).max(0.0),
                eta: (100.0 - eta.duration_min() * 5.0).max(0.0),
                earnings_balance: 100.0
                    * (1.0 - row.today_earnings / self.config.earnings_day_target).max(0.0),
                acceptance: 100.0 * (1.0 - estimate.probability),
                efficiency: efficiency_score(trip_class, row.driver_class),
                hot_zone: hot_zone_component,
            };
            let w = &self.config.weights;
            let total = breakdown.distance * w.distance
                + breakdown.eta * w.eta
                + breakdown.earnings_balance * w.earnings_balance
                + breakdown.acceptance * w.acceptance
                + breakdown.efficiency * w.efficiency
                + breakdown.hot_zone * w.hot_zone;

            let reasons = pick_reasons(&breakdown, w);

            scored.push(DriverScore {
                driver_id: row.driver_id.clone(),
                total,
                breakdown,
                distance_km,
                eta,
                estimate,
                driver_class: row.driver_class,
                acceptance_rate_pct: row.acceptance_rate_pct,
                context,
                reasons,
            });
        }

        scored.sort_by(|a, b| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.estimate
                        .probability
                        .partial_cmp(&b.estimate.probability)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    a.distance_km
                        .partial_cmp(&b.distance_km)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        scored.truncate(k);
        scored
    }
}

/// Component names worth surfacing, strongest contribution first, capped at
/// three. Each component has its own "worth mentioning" bar.
fn pick_reasons(breakdown: &ScoreBreakdown, w: &crate::config::ScorerWeights) -> Vec<String> {
    let entries: [(&str, f64, f64, f64); 6] = [
        ("nearby", breakdown.distance, 70.0, w.distance),
        ("quick_eta", breakdown.eta, 70.0, w.eta),
        (
            "earnings_balance",
            breakdown.earnings_balance,
            80.0,
            w.earnings_balance,
        ),
        ("high_acceptance", breakdown.acceptance, 80.0, w.acceptance),
        (
            "efficiency_match",
            breakdown.efficiency,
            100.0 * 10.0 / 15.0 + 1e-9,
            w.efficiency,
        ),
        ("hot_zone", breakdown.hot_zone, 1.0, w.hot_zone),
    ];
    let mut qualifying: Vec<(&str, f64)> = entries
        .iter()
        .filter(|(_, value, bar, _)| value >= bar)
        .map(|(name, value, _, weight)| (*name, value * weight))
        .collect();
    qualifying.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    qualifying
        .into_iter()
        .take(3)
        .map(|(name, _)| name.to_string())
        .collect()
}
