//! Every tunable of the dispatch core, with the operational defaults.
//!
//! Grouped per component the way the engine consumes them. All groups have
//! `Default` impls; [`DispatchConfig`] aggregates them and offers a few
//! builder-style setters for the knobs tests reach for most.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Batched-offer protocol constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Drivers offered per batch.
    pub batch_size: usize,
    /// Shared response deadline per batch.
    pub batch_timeout: Duration,
    /// Hard ceiling on offer rounds per order.
    pub max_batches: u32,
    /// Overall dispatch deadline per order.
    pub order_total_timeout: Duration,
    /// Interval of the queue-advance / expiry background tick.
    pub queue_tick: Duration,
    /// A presence heartbeat older than this removes the driver from ranking.
    pub heartbeat_freshness: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            batch_timeout: Duration::from_millis(20_000),
            max_batches: 5,
            order_total_timeout: Duration::from_millis(300_000),
            queue_tick: Duration::from_secs(10),
            heartbeat_freshness: Duration::from_secs(120),
        }
    }
}

/// Weights of the six scoring components (§ driver ranking). Each component
/// is normalized to [0, 100] before weighting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScorerWeights {
    pub distance: f64,
    pub eta: f64,
    pub earnings_balance: f64,
    pub acceptance: f64,
    pub efficiency: f64,
    pub hot_zone: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            distance: 0.20,
            eta: 0.20,
            earnings_balance: 0.20,
            acceptance: 0.20,
            efficiency: 0.10,
            hot_zone: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub weights: ScorerWeights,
    /// Candidates at or above this P(reject) are dropped before sorting.
    pub reject_threshold: f64,
    /// Daily earnings level at which the earnings-balance component reaches 0.
    pub earnings_day_target: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScorerWeights::default(),
            reject_threshold: 0.70,
            earnings_day_target: 8_500.0,
        }
    }
}

/// ETA oracle strategy constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtaConfig {
    /// Below this geodesic distance the oracle always estimates (strict `<`).
    pub geodesic_threshold_km: f64,
    /// Hard daily cap on external road-network calls.
    pub daily_external_call_limit: u32,
    pub cache_ttl: Duration,
    /// Max origins folded into one external matrix request.
    pub batch_chunk: usize,
    /// Road-distance detour factor applied to the geodesic distance.
    pub detour_factor: f64,
    pub peak_hours: Vec<u8>,
    pub night_hours: Vec<u8>,
    pub peak_speed_kmh: f64,
    pub night_speed_kmh: f64,
    pub base_speed_kmh: f64,
    /// Floor on every estimated duration.
    pub min_duration_s: u32,
    pub memory_cache_capacity: usize,
    /// Interval of the expired-row sweeper.
    pub sweep_interval: Duration,
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            geodesic_threshold_km: 3.0,
            daily_external_call_limit: 100,
            cache_ttl: Duration::from_secs(3600),
            batch_chunk: 25,
            detour_factor: 1.3,
            peak_hours: vec![7, 8, 17, 18, 19],
            night_hours: vec![23, 0, 1, 2, 3, 4, 5],
            peak_speed_kmh: 18.0,
            night_speed_kmh: 35.0,
            base_speed_kmh: 25.0,
            min_duration_s: 180,
            memory_cache_capacity: 10_000,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl EtaConfig {
    /// Assumed speed for the given local hour.
    pub fn speed_kmh(&self, hour: u8) -> f64 {
        if self.peak_hours.contains(&hour) {
            self.peak_speed_kmh
        } else if self.night_hours.contains(&hour) {
            self.night_speed_kmh
        } else {
            self.base_speed_kmh
        }
    }
}

/// Zone-level defaults used when a zone row leaves them unset; also the
/// staircase increment, which is fixed per step regardless of step width.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SurgeConfig {
    pub default_threshold: f64,
    pub default_max: f64,
    pub default_step: f64,
    /// Fare increment applied per staircase step.
    pub increment: f64,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.80,
            default_max: 1.50,
            default_step: 0.10,
            increment: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Wait estimate per queue position.
    pub avg_wait_per_order_min: u32,
    /// Fallback when a zone row has no queue timeout.
    pub default_timeout_min: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            avg_wait_per_order_min: 3,
            default_timeout_min: 15,
        }
    }
}

/// Weights of the auto-accept feasibility score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoAcceptWeights {
    pub acceptance: f64,
    pub distance: f64,
    pub fare: f64,
    pub time_window: f64,
    pub driver_fit: f64,
}

impl Default for AutoAcceptWeights {
    fn default() -> Self {
        Self {
            acceptance: 0.40,
            distance: 0.20,
            fare: 0.15,
            time_window: 0.15,
            driver_fit: 0.10,
        }
    }
}

/// Rejection-predictor constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Minimum outcome samples before training runs at all.
    pub min_training_samples: usize,
    pub training_epochs: usize,
    pub learning_rate: f64,
    pub dropout_rate: f64,
    /// Outcome window for training and profile recomputation.
    pub history_days: i64,
    /// Where the trained model persists; `None` disables persistence.
    pub model_path: Option<String>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            min_training_samples: 100,
            training_epochs: 30,
            learning_rate: 0.05,
            dropout_rate: 0.2,
            history_days: 30,
            model_path: None,
        }
    }
}

/// Root configuration threaded through construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub engine: EngineConfig,
    pub scorer: ScorerConfig,
    pub eta: EtaConfig,
    pub surge: SurgeConfig,
    pub queue: QueueConfig,
    pub auto_accept: AutoAcceptWeights,
    pub predictor: PredictorConfig,
    /// Capacity of the decision-log work channel.
    pub decision_log_capacity: usize,
    /// Fixed UTC offset of the fleet's region, in hours.
    pub utc_offset_hours: i32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            scorer: ScorerConfig::default(),
            eta: EtaConfig::default(),
            surge: SurgeConfig::default(),
            queue: QueueConfig::default(),
            auto_accept: AutoAcceptWeights::default(),
            predictor: PredictorConfig::default(),
            decision_log_capacity: 256,
            utc_offset_hours: 8,
        }
    }
}

impl DispatchConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.engine.batch_size = batch_size;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.engine.batch_timeout = timeout;
        self
    }

    pub fn with_max_batches(mut self, max_batches: u32) -> Self {
        self.engine.max_batches = max_batches;
        self
    }

    pub fn with_order_total_timeout(mut self, timeout: Duration) -> Self {
        self.engine.order_total_timeout = timeout;
        self
    }

    pub fn with_utc_offset_hours(mut self, hours: i32) -> Self {
        self.utc_offset_hours = hours;
        self
    }

    pub fn with_daily_external_call_limit(mut self, limit: u32) -> Self {
        self.eta.daily_external_call_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults_match_protocol_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.batch_timeout, Duration::from_secs(20));
        assert_eq!(config.max_batches, 5);
        assert_eq!(config.order_total_timeout, Duration::from_secs(300));
    }

    #[test]
    fn scorer_weights_sum_to_one() {
        let w = ScorerWeights::default();
        let sum = w.distance + w.eta + w.earnings_balance + w.acceptance + w.efficiency + w.hot_zone;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn speed_selection_by_hour() {
        let eta = EtaConfig::default();
        assert_eq!(eta.speed_kmh(8), 18.0);
        assert_eq!(eta.speed_kmh(2), 35.0);
        assert_eq!(eta.speed_kmh(12), 25.0);
        assert_eq!(eta.speed_kmh(23), 35.0);
    }

    #[test]
    fn root_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.decision_log_capacity, 256);
        assert_eq!(config.utc_offset_hours, 8);
        assert_eq!(config.scorer.reject_threshold, 0.70);
    }
}
