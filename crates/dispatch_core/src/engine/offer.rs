//! Auto-accept feasibility: score plus policy gates.
//!
//! The engine computes whether the driver client *may* auto-accept this
//! offer and why not otherwise; the actual accept is always the client's
//! move. The decision rides along on the offer payload and is logged as the
//! authoritative record.

use chrono::Duration;
use tracing::warn;

use crate::clock::Clock;
use crate::scoring::DriverScore;
use crate::types::{AutoAcceptDecision, AutoAcceptSettings, AutoAcceptStats, Order};

use super::EngineCtx;

/// Feasibility score in [0, 100], independent of the policy gates.
fn feasibility_score(ctx: &EngineCtx, score: &DriverScore, final_fare: Option<f64>) -> f64 {
    let w = &ctx.config.auto_accept;
    let acceptance = 100.0 * (1.0 - score.estimate.probability);
    // Fare saturates at 500 currency units.
    let fare = final_fare.map(|f| (f / 5.0).clamp(0.0, 100.0)).unwrap_or(0.0);
    let hour = ctx.local_hour();
    let time_window = if in_active_hours_default(hour) { 100.0 } else { 40.0 };
    acceptance * w.acceptance
        + score.breakdown.distance * w.distance
        + fare * w.fare
        + time_window * w.time_window
        + score.breakdown.efficiency * w.driver_fit
}

/// Daytime hours score full marks when the driver has no explicit window.
fn in_active_hours_default(hour: u8) -> bool {
    (6..=23).contains(&hour)
}

/// Evaluate the full policy for one candidate. Never fails: store problems
/// degrade to "not allowed" with a diagnostic reason.
pub(crate) async fn evaluate_auto_accept(
    ctx: &EngineCtx,
    order: &Order,
    score: &DriverScore,
    surge: f64,
) -> AutoAcceptDecision {
    let final_fare = order.base_fare.map(|f| f * surge);
    let feasibility = feasibility_score(ctx, score, final_fare);

    let settings = match ctx.store.auto_accept_settings(&score.driver_id).await {
        Ok(settings) => settings,
        Err(e) => {
            warn!(driver_id = %score.driver_id, error = %e, "auto-accept settings read failed");
            return AutoAcceptDecision {
                score: feasibility,
                allowed: false,
                block_reason: Some("settings_unavailable".into()),
            };
        }
    };
    let Some(settings) = settings else {
        return AutoAcceptDecision {
            score: feasibility,
            allowed: false,
            block_reason: Some("not_configured".into()),
        };
    };

    let block_reason = first_block(ctx, order, score, final_fare, &settings).await;
    AutoAcceptDecision {
        score: feasibility,
        allowed: block_reason.is_none(),
        block_reason,
    }
}

/// The gate list, checked in order; the first failure names the block.
async fn first_block(
    ctx: &EngineCtx,
    order: &Order,
    score: &DriverScore,
    final_fare: Option<f64>,
    settings: &AutoAcceptSettings,
) -> Option<String> {
    if !settings.enabled {
        return Some("disabled".into());
    }
    if score.distance_km > settings.max_pickup_distance_km {
        return Some("pickup_too_far".into());
    }
    if settings.min_fare > 0.0 && final_fare.unwrap_or(0.0) < settings.min_fare {
        return Some("fare_below_minimum".into());
    }
    if settings.min_trip_distance_km > 0.0
        && score.context.trip_distance_km < settings.min_trip_distance_km
    {
        return Some("trip_too_short".into());
    }
    let hour = ctx.local_hour();
    if !settings.active_hours.is_empty() && !settings.active_hours.contains(&hour) {
        return Some("outside_active_hours".into());
    }
    if !settings.blacklisted_zones.is_empty() {
        if let Some(zone) = ctx.hotzone.match_zone(order.pickup.point) {
            if settings.blacklisted_zones.contains(&zone.zone_id) {
                return Some("zone_blacklisted".into());
            }
        }
    }

    let date = ctx.clock.local_date(ctx.config.utc_offset_hours);
    let stats: AutoAcceptStats = match ctx.store.auto_accept_stats(&score.driver_id, date).await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(driver_id = %score.driver_id, error = %e, "auto-accept stats read failed");
            return Some("stats_unavailable".into());
        }
    };
    if settings.daily_cap > 0 && stats.auto_accepted_today >= settings.daily_cap {
        return Some("daily_cap_reached".into());
    }
    if settings.cooldown_min > 0 {
        if let Some(last) = stats.last_auto_accept_at {
            if ctx.clock.now() - last < Duration::minutes(i64::from(settings.cooldown_min)) {
                return Some("cooldown_active".into());
            }
        }
    }
    if settings.max_consecutive > 0 && stats.consecutive >= settings.max_consecutive {
        return Some("consecutive_cap_reached".into());
    }
    if stats.lifetime_auto_accepted >= 5 {
        let completion_rate = if stats.lifetime_auto_accepted == 0 {
            100.0
        } else {
            100.0 * f64::from(stats.lifetime_completed) / f64::from(stats.lifetime_auto_accepted)
        };
        if completion_rate < settings.min_completion_rate_pct {
            return Some("completion_rate_low".into());
        }
    }
    None
}
