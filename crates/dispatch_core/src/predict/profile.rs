//! Behavioral profile recomputation.
//!
//! A profile summarizes a driver's last 30 days of offer outcomes into the
//! vectors the rule engine and the efficiency matcher consume.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{DriverClass, DriverProfile, OutcomeSample, ZoneId};

const SHORT_TRIP_KM: f64 = 3.0;
const LONG_TRIP_KM: f64 = 10.0;

/// Hour buckets with no samples fall back to an even prior.
const HOURLY_PRIOR: f64 = 0.5;

/// Saturation floor / fallback (currency units).
const SATURATION_FLOOR: f64 = 3_000.0;
const SATURATION_DEFAULT: f64 = 6_000.0;

/// Build a profile from one driver's outcome window. The sample slice may be
/// empty; the result then carries `sample_size == 0`, which the rule engine
/// treats as "no history".
pub fn build_profile(
    driver_id: &str,
    samples: &[OutcomeSample],
    now: DateTime<Utc>,
) -> DriverProfile {
    let mut hourly_offered = [0u32; 24];
    let mut hourly_accepted = [0u32; 24];
    let mut zone_offered: HashMap<ZoneId, u32> = HashMap::new();
    let mut zone_accepted: HashMap<ZoneId, u32> = HashMap::new();
    let mut short_offered = 0u32;
    let mut short_accepted = 0u32;
    let mut long_offered = 0u32;
    let mut long_accepted = 0u32;
    let mut accepted_distances: Vec<f64> = Vec::new();
    let mut accepted_trip_distances: Vec<f64> = Vec::new();
    let mut accepted_earnings: Vec<f64> = Vec::new();

    for sample in samples {
        let hour = (sample.hour_of_day as usize).min(23);
        hourly_offered[hour] += 1;
        if let Some(zone) = &sample.zone_id {
            *zone_offered.entry(zone.clone()).or_insert(0) += 1;
        }
        if sample.trip_distance_km < SHORT_TRIP_KM {
            short_offered += 1;
        } else if sample.trip_distance_km > LONG_TRIP_KM {
            long_offered += 1;
        }

        if sample.accepted {
            hourly_accepted[hour] += 1;
            if let Some(zone) = &sample.zone_id {
                *zone_accepted.entry(zone.clone()).or_insert(0) += 1;
            }
            if sample.trip_distance_km < SHORT_TRIP_KM {
                short_accepted += 1;
            } else if sample.trip_distance_km > LONG_TRIP_KM {
                long_accepted += 1;
            }
            accepted_distances.push(sample.distance_to_pickup_km);
            accepted_trip_distances.push(sample.trip_distance_km);
            accepted_earnings.push(sample.driver_today_earnings);
        }
    }

    let mut hourly_acceptance = [HOURLY_PRIOR; 24];
    for hour in 0..24 {
        if hourly_offered[hour] > 0 {
            hourly_acceptance[hour] =
                f64::from(hourly_accepted[hour]) / f64::from(hourly_offered[hour]);
        }
    }

    let zone_acceptance: HashMap<ZoneId, f64> = zone_offered
        .iter()
        .map(|(zone, &offered)| {
            let accepted = zone_accepted.get(zone).copied().unwrap_or(0);
            (zone.clone(), f64::from(accepted) / f64::from(offered))
        })
        .collect();

    let rate = |accepted: u32, offered: u32| {
        if offered == 0 {
            1.0
        } else {
            f64::from(accepted) / f64::from(offered)
        }
    };

    let accepted_distance_avg_km = if accepted_distances.is_empty() {
        0.0
    } else {
        accepted_distances.iter().sum::<f64>() / accepted_distances.len() as f64
    };
    let accepted_distance_max_km = accepted_distances.iter().copied().fold(0.0, f64::max);

    let earnings_saturation = if accepted_earnings.is_empty() {
        SATURATION_DEFAULT
    } else {
        let mut sorted = accepted_earnings.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("earnings are finite"));
        let p90 = sorted[((sorted.len() as f64 * 0.9) as usize).min(sorted.len() - 1)];
        p90.max(SATURATION_FLOOR)
    };

    let derived_class = derive_class(&accepted_trip_distances);

    DriverProfile {
        driver_id: driver_id.to_string(),
        hourly_acceptance,
        zone_acceptance,
        accepted_distance_avg_km,
        accepted_distance_max_km,
        short_trip_accept_rate: rate(short_accepted, short_offered),
        long_trip_accept_rate: rate(long_accepted, long_offered),
        earnings_saturation,
        derived_class,
        last_recomputed_at: now,
        sample_size: samples.len() as u32,
    }
}

/// Class from the trips a driver actually takes: mostly-short accepters turn
/// over fast, mostly-long ones are distance riders, everything else is a
/// volume driver.
fn derive_class(accepted_trip_distances: &[f64]) -> DriverClass {
    if accepted_trip_distances.is_empty() {
        return DriverClass::HighVolume;
    }
    let avg =
        accepted_trip_distances.iter().sum::<f64>() / accepted_trip_distances.len() as f64;
    if avg < 4.0 {
        DriverClass::FastTurnover
    } else if avg >= 8.0 {
        DriverClass::LongDistance
    } else {
        DriverClass::HighVolume
    }
}
