//! Hybrid ETA and distance oracle.
//!
//! Strategy, in order:
//!
//! 1. Geodesic distance under 3 km (strict `<`) → formula estimate. No cache
//!    read, no external call.
//! 2. Cache hit (memory tier, then store tier) → cached answer.
//! 3. External road-network call, budgeted by a hard daily counter.
//! 4. Anything else (budget gone, provider error, no provider) → estimate.
//!
//! The oracle never fails: every path degrades to the estimate. Estimates
//! are never written to either cache tier.

pub mod cache;
pub mod provider;

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::EtaConfig;
use crate::geo::{haversine_km, Point, QuantKey};
use crate::store::Store;
use crate::types::EtaCacheRow;

use cache::{CacheKey, MemoryEtaCache};
use provider::{RoadApi, RoadEta as RoadAnswer};

/// Provenance tag carried by every ETA result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EtaSource {
    Estimated,
    Cached,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eta {
    pub duration_s: u32,
    pub distance_m: u32,
    pub source: EtaSource,
}

impl Eta {
    pub fn duration_min(&self) -> f64 {
        f64::from(self.duration_s) / 60.0
    }

    pub fn distance_km(&self) -> f64 {
        f64::from(self.distance_m) / 1000.0
    }
}

/// Daily external-call counter with a local-date guard; resets lazily when
/// the date changes, no scheduler involved.
#[derive(Debug, Default)]
struct DailyBudget {
    date: Option<NaiveDate>,
    used: u32,
}

impl DailyBudget {
    fn try_acquire(&mut self, today: NaiveDate, limit: u32) -> bool {
        if self.date != Some(today) {
            self.date = Some(today);
            self.used = 0;
        }
        if self.used < limit {
            self.used += 1;
            true
        } else {
            false
        }
    }

    fn remaining(&mut self, today: NaiveDate, limit: u32) -> u32 {
        if self.date != Some(today) {
            self.date = Some(today);
            self.used = 0;
        }
        limit.saturating_sub(self.used)
    }
}

pub struct EtaOracle {
    config: EtaConfig,
    utc_offset_hours: i32,
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
    road: Option<Arc<dyn RoadApi>>,
    memory: MemoryEtaCache,
    budget: Mutex<DailyBudget>,
}

impl EtaOracle {
    pub fn new(
        config: EtaConfig,
        utc_offset_hours: i32,
        clock: Arc<dyn Clock>,
        store: Arc<dyn Store>,
        road: Option<Arc<dyn RoadApi>>,
    ) -> Self {
        let memory = MemoryEtaCache::new(config.memory_cache_capacity);
        Self {
            config,
            utc_offset_hours,
            clock,
            store,
            road,
            memory,
            budget: Mutex::new(DailyBudget::default()),
        }
    }

    /// External calls still allowed today.
    pub fn external_calls_remaining(&self) -> u32 {
        let today = self.clock.local_date(self.utc_offset_hours);
        self.budget
            .lock()
            .expect("budget poisoned")
            .remaining(today, self.config.daily_external_call_limit)
    }

    fn acquire_budget(&self) -> bool {
        let today = self.clock.local_date(self.utc_offset_hours);
        self.budget
            .lock()
            .expect("budget poisoned")
            .try_acquire(today, self.config.daily_external_call_limit)
    }

    /// Formula estimate: detour-factored geodesic distance over the hour's
    /// assumed speed, floored at the minimum duration.
    fn estimate(&self, d_geo_km: f64, hour: u8) -> Eta {
        let road_km = d_geo_km * self.config.detour_factor;
        let speed = self.config.speed_kmh(hour);
        let duration = (road_km / speed * 3600.0).ceil() as u32;
        Eta {
            duration_s: duration.max(self.config.min_duration_s),
            distance_m: (road_km * 1000.0).round() as u32,
            source: EtaSource::Estimated,
        }
    }

    fn cache_row(&self, key: CacheKey, eta: RoadAnswer) -> EtaCacheRow {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        EtaCacheRow {
            origin_lat_q: key.origin.lat_q,
            origin_lng_q: key.origin.lng_q,
            dest_lat_q: key.dest.lat_q,
            dest_lng_q: key.dest.lng_q,
            hour_of_day: key.hour,
            distance_m: eta.distance_m,
            duration_s: eta.duration_s,
            cached_at: now,
            expires_at: now + ttl,
            hit_count: 0,
        }
    }

    /// Store an external answer in both tiers. Store-tier failure is logged
    /// and otherwise ignored.
    async fn cache_external(&self, key: CacheKey, eta: RoadAnswer) {
        let row = self.cache_row(key, eta);
        self.memory.put(row.clone());
        if let Err(e) = self.store.eta_cache_put(&row).await {
            warn!(error = %e, "eta cache write failed");
        }
    }

    /// Read-through of both cache tiers; a store hit repopulates the memory
    /// tier.
    async fn cached(&self, key: &CacheKey) -> Option<EtaCacheRow> {
        let now = self.clock.now();
        if let Some(row) = self.memory.get(key, now) {
            return Some(row);
        }
        match self.store.eta_cache_get(key.origin, key.dest, key.hour).await {
            Ok(Some(row)) if row.expires_at > now => {
                self.memory.put(row.clone());
                Some(row)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "eta cache read failed");
                None
            }
        }
    }

    /// ETA for one origin/destination pair. Never fails; the source tag says
    /// which path produced the answer.
    pub async fn eta(&self, origin: Point, dest: Point) -> Eta {
        let d_geo = haversine_km(origin, dest);
        let hour = self.clock.local_hour(self.utc_offset_hours);

        if d_geo < self.config.geodesic_threshold_km {
            return self.estimate(d_geo, hour);
        }

        let key = CacheKey {
            origin: QuantKey::from_point(origin),
            dest: QuantKey::from_point(dest),
            hour,
        };
        if let Some(row) = self.cached(&key).await {
            return Eta {
                duration_s: row.duration_s,
                distance_m: row.distance_m,
                source: EtaSource::Cached,
            };
        }

        if let Some(road) = &self.road {
            if self.acquire_budget() {
                match road.route_matrix(&[origin], dest).await {
                    Ok(rows) => {
                        if let Some(Some(answer)) = rows.first() {
                            let pair = *answer;
                            self.cache_external(key, pair).await;
                            return Eta {
                                duration_s: pair.duration_s,
                                distance_m: pair.distance_m,
                                source: EtaSource::External,
                            };
                        }
                        debug!("road api had no answer for pair, estimating");
                    }
                    Err(e) => warn!(error = %e, "road api call failed, estimating"),
                }
            } else {
                debug!("external eta budget exhausted, estimating");
            }
        }

        self.estimate(d_geo, hour)
    }

    /// Batched variant: estimable origins short-circuit, cached ones hit the
    /// tiers, and the remainder is folded into external matrix calls of at
    /// most `batch_chunk` origins each (one budget unit per call). Partial
    /// provider errors degrade element-wise.
    pub async fn eta_batch(&self, origins: &[Point], dest: Point) -> Vec<Eta> {
        let hour = self.clock.local_hour(self.utc_offset_hours);
        let dest_key = QuantKey::from_point(dest);

        let d_geo: Vec<f64> = origins.iter().map(|o| haversine_km(*o, dest)).collect();
        let mut out: Vec<Option<Eta>> = vec![None; origins.len()];
        let mut external: Vec<usize> = Vec::new();

        for (i, origin) in origins.iter().enumerate() {
            if d_geo[i] < self.config.geodesic_threshold_km {
                out[i] = Some(self.estimate(d_geo[i], hour));
                continue;
            }
            let key = CacheKey {
                origin: QuantKey::from_point(*origin),
                dest: dest_key,
                hour,
            };
            if let Some(row) = self.cached(&key).await {
                out[i] = Some(Eta {
                    duration_s: row.duration_s,
                    distance_m: row.distance_m,
                    source: EtaSource::Cached,
                });
            } else {
                external.push(i);
            }
        }

        if let (Some(road), false) = (&self.road, external.is_empty()) {
            for chunk in external.chunks(self.config.batch_chunk.max(1)) {
                if !self.acquire_budget() {
                    debug!(left_over = chunk.len(), "eta budget exhausted mid-batch");
                    break;
                }
                let points: Vec<Point> = chunk.iter().map(|&i| origins[i]).collect();
                match road.route_matrix(&points, dest).await {
                    Ok(rows) => {
                        for (j, &i) in chunk.iter().enumerate() {
                            if let Some(Some(answer)) = rows.get(j) {
                                let key = CacheKey {
                                    origin: QuantKey::from_point(origins[i]),
                                    dest: dest_key,
                                    hour,
                                };
                                let pair = *answer;
                                self.cache_external(key, pair).await;
                                out[i] = Some(Eta {
                                    duration_s: pair.duration_s,
                                    distance_m: pair.distance_m,
                                    source: EtaSource::External,
                                });
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "road api batch failed, estimating chunk"),
                }
            }
        }

        out.into_iter()
            .enumerate()
            .map(|(i, eta)| eta.unwrap_or_else(|| self.estimate(d_geo[i], hour)))
            .collect()
    }

    /// Evict expired rows from both tiers.
    pub async fn sweep_expired(&self) {
        let now = self.clock.now();
        let from_memory = self.memory.purge_expired(now);
        let from_store = match self.store.eta_cache_purge_expired(now).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "eta cache sweep failed on store tier");
                0
            }
        };
        if from_memory + from_store > 0 {
            debug!(from_memory, from_store, "swept expired eta cache rows");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::provider::{RoadEta, StaticRoadApi};
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn oracle_with(
        road: Option<Arc<StaticRoadApi>>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        config: EtaConfig,
    ) -> EtaOracle {
        let road: Option<Arc<dyn RoadApi>> = match road {
            Some(r) => Some(r),
            None => None,
        };
        EtaOracle::new(config, 0, clock, store, road)
    }

    fn far_pair() -> (Point, Point) {
        // ~5.4 km apart
        (Point::new(25.0330, 121.5654), Point::new(25.0478, 121.5170))
    }

    fn near_pair() -> (Point, Point) {
        // ~1.1 km apart
        (Point::new(25.0330, 121.5654), Point::new(25.0430, 121.5654))
    }

    #[tokio::test]
    async fn estimate_formula_at_noon() {
        let clock = Arc::new(ManualClock::at_hour(12));
        let oracle = oracle_with(None, clock, Arc::new(MemoryStore::new()), EtaConfig::default());
        // 5 km at 25 km/h with 1.3 detour: ceil(6.5 / 25 * 3600) = 936 s
        let eta = oracle.estimate(5.0, 12);
        assert_eq!(eta.duration_s, 936);
        assert_eq!(eta.distance_m, 6500);
        assert_eq!(eta.source, EtaSource::Estimated);
    }

    #[tokio::test]
    async fn estimate_uses_peak_and_night_speeds() {
        let clock = Arc::new(ManualClock::at_hour(12));
        let oracle = oracle_with(None, clock, Arc::new(MemoryStore::new()), EtaConfig::default());
        // peak: ceil(6.5 / 18 * 3600) = 1300
        assert_eq!(oracle.estimate(5.0, 8).duration_s, 1300);
        // night: ceil(6.5 / 35 * 3600) = 669
        assert_eq!(oracle.estimate(5.0, 2).duration_s, 669);
    }

    #[tokio::test]
    async fn estimate_floors_short_trips() {
        let clock = Arc::new(ManualClock::at_hour(12));
        let oracle = oracle_with(None, clock, Arc::new(MemoryStore::new()), EtaConfig::default());
        assert_eq!(oracle.estimate(0.5, 12).duration_s, 180);
    }

    #[tokio::test]
    async fn short_geodesic_never_touches_provider_or_cache() {
        let clock = Arc::new(ManualClock::at_hour(12));
        let road = Arc::new(StaticRoadApi::new());
        let store = Arc::new(MemoryStore::new());
        let oracle = oracle_with(
            Some(road.clone()),
            clock,
            store.clone(),
            EtaConfig::default(),
        );

        let (a, b) = near_pair();
        let eta = oracle.eta(a, b).await;
        assert_eq!(eta.source, EtaSource::Estimated);
        assert_eq!(road.calls(), 0);
    }

    #[tokio::test]
    async fn threshold_is_strict_less_than() {
        let (a, b) = far_pair();
        let d = haversine_km(a, b);
        let clock = Arc::new(ManualClock::at_hour(12));
        let road = Arc::new(StaticRoadApi::new());
        road.insert(
            a,
            b,
            RoadEta {
                distance_m: 6100,
                duration_s: 780,
            },
        );

        // Threshold exactly at d: d < d is false, so the pair goes external.
        let mut config = EtaConfig::default();
        config.geodesic_threshold_km = d;
        let oracle = oracle_with(
            Some(road.clone()),
            clock,
            Arc::new(MemoryStore::new()),
            config,
        );
        let eta = oracle.eta(a, b).await;
        assert_eq!(eta.source, EtaSource::External);
        assert_eq!(road.calls(), 1);
    }

    #[tokio::test]
    async fn external_result_is_cached_in_both_tiers() {
        let (a, b) = far_pair();
        let clock = Arc::new(ManualClock::at_hour(12));
        let road = Arc::new(StaticRoadApi::new());
        road.insert(
            a,
            b,
            RoadEta {
                distance_m: 6100,
                duration_s: 780,
            },
        );
        let store = Arc::new(MemoryStore::new());
        let oracle = oracle_with(
            Some(road.clone()),
            clock.clone(),
            store.clone(),
            EtaConfig::default(),
        );

        let first = oracle.eta(a, b).await;
        assert_eq!(first.source, EtaSource::External);

        let second = oracle.eta(a, b).await;
        assert_eq!(second.source, EtaSource::Cached);
        assert_eq!(second.duration_s, 780);
        assert_eq!(second.distance_m, 6100);
        assert_eq!(road.calls(), 1);

        // A fresh oracle over the same store hits the persistent tier.
        let oracle2 = oracle_with(Some(road.clone()), clock, store, EtaConfig::default());
        let third = oracle2.eta(a, b).await;
        assert_eq!(third.source, EtaSource::Cached);
        assert_eq!(road.calls(), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_degrades_to_estimate_without_cache_pollution() {
        let (a, b) = far_pair();
        let clock = Arc::new(ManualClock::at_hour(12));
        let road = Arc::new(StaticRoadApi::new());
        road.insert(
            a,
            b,
            RoadEta {
                distance_m: 6100,
                duration_s: 780,
            },
        );
        let store = Arc::new(MemoryStore::new());
        let mut config = EtaConfig::default();
        config.daily_external_call_limit = 0;
        let oracle = oracle_with(Some(road.clone()), clock.clone(), store.clone(), config);

        let eta = oracle.eta(a, b).await;
        assert_eq!(eta.source, EtaSource::Estimated);
        assert_eq!(road.calls(), 0);
        assert_eq!(store.eta_cache_purge_expired(clock.now() + chrono::Duration::days(2)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn budget_resets_on_local_date_change() {
        let (a, b) = far_pair();
        let clock = Arc::new(ManualClock::at_hour(12));
        let road = Arc::new(StaticRoadApi::new());
        road.insert(
            a,
            b,
            RoadEta {
                distance_m: 6100,
                duration_s: 780,
            },
        );
        let mut config = EtaConfig::default();
        config.daily_external_call_limit = 1;
        config.cache_ttl = std::time::Duration::from_secs(1);
        let oracle = oracle_with(
            Some(road.clone()),
            clock.clone(),
            Arc::new(MemoryStore::new()),
            config,
        );

        assert_eq!(oracle.eta(a, b).await.source, EtaSource::External);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(oracle.eta(a, b).await.source, EtaSource::Estimated);

        clock.advance(chrono::Duration::days(1));
        assert_eq!(oracle.eta(a, b).await.source, EtaSource::External);
        assert_eq!(road.calls(), 2);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_element_wise() {
        let (a, b) = far_pair();
        let clock = Arc::new(ManualClock::at_hour(12));
        let road = Arc::new(StaticRoadApi::new());
        road.set_failing(true);
        let oracle = oracle_with(
            Some(road),
            clock,
            Arc::new(MemoryStore::new()),
            EtaConfig::default(),
        );
        let eta = oracle.eta(a, b).await;
        assert_eq!(eta.source, EtaSource::Estimated);
    }

    #[tokio::test]
    async fn batch_partitions_and_issues_one_call() {
        let clock = Arc::new(ManualClock::at_hour(12));
        let road = Arc::new(StaticRoadApi::new());
        let store = Arc::new(MemoryStore::new());
        let dest = Point::new(25.0330, 121.5654);
        let near = Point::new(25.0430, 121.5654); // ~1 km, estimable
        let far1 = Point::new(25.0930, 121.5654); // ~6.7 km
        let far2 = Point::new(25.0330, 121.6254); // ~6 km
        road.insert(
            far1,
            dest,
            RoadEta {
                distance_m: 7000,
                duration_s: 900,
            },
        );
        // far2 is missing from the table: element-wise fallback.
        let oracle = oracle_with(
            Some(road.clone()),
            clock,
            store,
            EtaConfig::default(),
        );

        let etas = oracle.eta_batch(&[near, far1, far2], dest).await;
        assert_eq!(etas[0].source, EtaSource::Estimated);
        assert_eq!(etas[1].source, EtaSource::External);
        assert_eq!(etas[1].duration_s, 900);
        assert_eq!(etas[2].source, EtaSource::Estimated);
        assert_eq!(road.calls(), 1);
    }

    #[tokio::test]
    async fn batch_chunks_respect_budget() {
        let clock = Arc::new(ManualClock::at_hour(12));
        let road = Arc::new(StaticRoadApi::new());
        let dest = Point::new(25.0330, 121.5654);
        // Three far origins with a chunk size of 1 and budget of 2: the third
        // chunk falls back to estimation.
        let origins = [
            Point::new(25.0930, 121.5654),
            Point::new(25.0330, 121.6254),
            Point::new(24.9730, 121.5654),
        ];
        for o in &origins {
            road.insert(
                *o,
                dest,
                RoadEta {
                    distance_m: 7000,
                    duration_s: 900,
                },
            );
        }
        let mut config = EtaConfig::default();
        config.batch_chunk = 1;
        config.daily_external_call_limit = 2;
        let oracle = oracle_with(
            Some(road.clone()),
            clock,
            Arc::new(MemoryStore::new()),
            config,
        );

        let etas = oracle.eta_batch(&origins, dest).await;
        assert_eq!(etas[0].source, EtaSource::External);
        assert_eq!(etas[1].source, EtaSource::External);
        assert_eq!(etas[2].source, EtaSource::Estimated);
        assert_eq!(road.calls(), 2);
    }
}
