//! Rule-engine fallback for P(reject).
//!
//! Used when no trained model exists or model inference fails. Accumulates
//! fixed penalties from the driver's behavioral profile and the offer
//! context, clamped to 0.95.

use crate::types::DriverProfile;

use super::RejectContext;

/// Distance cutoffs when the driver has no history.
const NO_HISTORY_FAR_KM: f64 = 8.0;
const NO_HISTORY_MID_KM: f64 = 5.0;

/// Earnings level treated as saturation when no profile exists.
pub(crate) const DEFAULT_EARNINGS_SATURATION: f64 = 6_000.0;

const SHORT_TRIP_KM: f64 = 3.0;
const LONG_TRIP_KM: f64 = 10.0;

const P_CLAMP: f64 = 0.95;

/// Evaluate the penalty stack. `profile` counts as history only when it was
/// built from at least one sample.
pub fn evaluate(profile: Option<&DriverProfile>, ctx: &RejectContext) -> f64 {
    let history = profile.filter(|p| p.sample_size > 0);
    let mut p = 0.0;

    // Pickup distance against what this driver historically accepts.
    let d = ctx.distance_to_pickup_km;
    match history {
        Some(h) => {
            if d > h.accepted_distance_max_km {
                p += 0.35;
            } else if d > h.accepted_distance_avg_km * 1.5 {
                p += 0.20;
            } else if d > h.accepted_distance_avg_km {
                p += 0.10;
            }
        }
        None => {
            if d > NO_HISTORY_FAR_KM {
                p += 0.30;
            } else if d > NO_HISTORY_MID_KM {
                p += 0.15;
            }
        }
    }

    // Earnings saturation.
    let saturation = history
        .map(|h| h.earnings_saturation)
        .unwrap_or(DEFAULT_EARNINGS_SATURATION);
    if ctx.driver_today_earnings > saturation {
        p += 0.25;
    } else if ctx.driver_today_earnings > saturation * 0.8 {
        p += 0.10;
    }

    // Hourly preference.
    if let Some(h) = history {
        let hour = (ctx.hour_of_day as usize).min(23);
        p += (1.0 - h.hourly_acceptance[hour]) * 0.15;
    }

    // Trip-length mismatch, one penalty per axis.
    if let Some(h) = history {
        if ctx.trip_distance_km < SHORT_TRIP_KM && h.short_trip_accept_rate < 0.70 {
            p += 0.15;
        }
        if ctx.trip_distance_km > LONG_TRIP_KM && h.long_trip_accept_rate < 0.70 {
            p += 0.15;
        }
    }

    // Low overall acceptance.
    if ctx.driver_acceptance_rate < 70.0 {
        p += 0.15;
    } else if ctx.driver_acceptance_rate < 85.0 {
        p += 0.05;
    }

    // Fatigue.
    if ctx.driver_online_hours > 10.0 {
        p += 0.10;
    }

    p.min(P_CLAMP)
}
