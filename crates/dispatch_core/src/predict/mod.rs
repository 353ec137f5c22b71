//! Rejection predictor: P(driver rejects this offer).
//!
//! Inference prefers the trained network and degrades to the rule engine;
//! the returned probability is tagged with its source so downstream
//! thresholds can be tuned per source. Exactly one model instance exists per
//! process, swapped atomically on retrain; in-flight inferences keep the old
//! one alive through their `Arc`.

pub mod model;
pub mod profile;
pub mod rules;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::PredictorConfig;
use crate::error::DispatchError;
use crate::store::Store;
use crate::types::{DriverId, DriverProfile, OutcomeSample};

use model::{Mlp, INPUT};

/// Where a probability came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictSource {
    Model,
    Rules,
}

/// A tagged P(reject) in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RejectEstimate {
    pub probability: f64,
    pub source: PredictSource,
}

/// The ten features the predictor consumes, in raw units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RejectContext {
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
}

impl RejectContext {
    /// Min-max normalization with fixed ranges, clamped to [0, 1].
    pub fn normalized(&self) -> [f64; INPUT] {
        fn norm(v: f64, max: f64) -> f64 {
            (v / max).clamp(0.0, 1.0)
        }
        [
            norm(self.distance_to_pickup_km, 30.0),
            norm(self.trip_distance_km, 50.0),
            norm(self.estimated_fare, 1_000.0),
            norm(f64::from(self.hour_of_day), 23.0),
            norm(f64::from(self.day_of_week), 6.0),
            if self.is_holiday { 1.0 } else { 0.0 },
            norm(self.driver_today_earnings, 10_000.0),
            norm(f64::from(self.driver_today_trips), 50.0),
            norm(self.driver_online_hours, 16.0),
            norm(self.driver_acceptance_rate, 100.0),
        ]
    }

    pub fn from_sample(sample: &OutcomeSample) -> Self {
        Self {
            distance_to_pickup_km: sample.distance_to_pickup_km,
            trip_distance_km: sample.trip_distance_km,
            estimated_fare: sample.estimated_fare,
            hour_of_day: sample.hour_of_day,
            day_of_week: sample.day_of_week,
            is_holiday: sample.is_holiday,
            driver_today_earnings: sample.driver_today_earnings,
            driver_today_trips: sample.driver_today_trips,
            driver_online_hours: sample.driver_online_hours,
            driver_acceptance_rate: sample.driver_acceptance_rate,
        }
    }
}

/// Result of a training attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainOutcome {
    Trained { samples: usize, loss: f64 },
    NotEnoughSamples { have: usize },
    AlreadyRunning,
}

pub struct RejectionPredictor {
    config: PredictorConfig,
    utc_offset_hours: i32,
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
    network: RwLock<Option<Arc<Mlp>>>,
    is_training: AtomicBool,
    profiles: Mutex<HashMap<DriverId, Arc<DriverProfile>>>,
}

impl RejectionPredictor {
    pub fn new(
        config: PredictorConfig,
        utc_offset_hours: i32,
        clock: Arc<dyn Clock>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            config,
            utc_offset_hours,
            clock,
            store,
            network: RwLock::new(None),
            is_training: AtomicBool::new(false),
            profiles: Mutex::new(HashMap::new()),
        }
    }

    fn model_path(&self) -> Option<PathBuf> {
        self.config.model_path.as_ref().map(PathBuf::from)
    }

    /// Load a previously persisted network, if configured and present.
    pub fn load_persisted_model(&self) -> bool {
        let Some(path) = self.model_path() else {
            return false;
        };
        match Mlp::load(&path) {
            Ok(net) => {
                *self.network.write().expect("model lock poisoned") = Some(Arc::new(net));
                info!(path = %path.display(), "loaded persisted rejection model");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "no persisted rejection model");
                false
            }
        }
    }

    pub fn has_model(&self) -> bool {
        self.network.read().expect("model lock poisoned").is_some()
    }

    /// P(reject) for this driver/offer pair. Bounded time, no error path:
    /// model when available and sane, rule engine otherwise.
    pub async fn p_reject(&self, driver_id: &str, ctx: &RejectContext) -> RejectEstimate {
        let network = self.network.read().expect("model lock poisoned").clone();
        if let Some(net) = network {
            let p = net.forward(&ctx.normalized());
            if p.is_finite() && (0.0..=1.0).contains(&p) {
                return RejectEstimate {
                    probability: p,
                    source: PredictSource::Model,
                };
            }
            warn!(driver_id, "model produced a non-probability, using rules");
        }

        let profile = self.profile(driver_id).await;
        RejectEstimate {
            probability: rules::evaluate(profile.as_deref(), ctx),
            source: PredictSource::Rules,
        }
    }

    /// Cached profile lookup; falls through to the store.
    pub async fn profile(&self, driver_id: &str) -> Option<Arc<DriverProfile>> {
        if let Some(profile) = self
            .profiles
            .lock()
            .expect("profile cache poisoned")
            .get(driver_id)
        {
            return Some(profile.clone());
        }
        match self.store.profile(driver_id).await {
            Ok(Some(profile)) => {
                let profile = Arc::new(profile);
                self.profiles
                    .lock()
                    .expect("profile cache poisoned")
                    .insert(driver_id.to_string(), profile.clone());
                Some(profile)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(driver_id, error = %e, "profile read failed");
                None
            }
        }
    }

    /// Recompute one driver's profile from the outcome window and invalidate
    /// the cache entry.
    pub async fn update_profile(&self, driver_id: &str) -> Result<(), DispatchError> {
        let since = self.clock.now() - Duration::days(self.config.history_days);
        let samples = self.store.outcomes_since(Some(driver_id), since).await?;
        let profile = profile::build_profile(driver_id, &samples, self.clock.now());
        self.store.upsert_profile(&profile).await?;
        self.profiles
            .lock()
            .expect("profile cache poisoned")
            .insert(driver_id.to_string(), Arc::new(profile));
        Ok(())
    }

    /// Refresh every known driver's profile.
    pub async fn refresh_all_profiles(&self) -> Result<usize, DispatchError> {
        let ids = self.store.active_driver_ids().await?;
        for id in &ids {
            if let Err(e) = self.update_profile(id).await {
                warn!(driver_id = %id, error = %e, "profile refresh failed");
            }
        }
        Ok(ids.len())
    }

    /// Train on the outcome window. Single-flight: a second caller while a
    /// training run is active gets [`TrainOutcome::AlreadyRunning`].
    pub async fn train(&self) -> Result<TrainOutcome, DispatchError> {
        if self
            .is_training
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(TrainOutcome::AlreadyRunning);
        }
        let outcome = self.train_inner().await;
        self.is_training.store(false, Ordering::SeqCst);
        outcome
    }

    async fn train_inner(&self) -> Result<TrainOutcome, DispatchError> {
        let since = self.clock.now() - Duration::days(self.config.history_days);
        let samples = self.store.outcomes_since(None, since).await?;
        if samples.len() < self.config.min_training_samples {
            return Ok(TrainOutcome::NotEnoughSamples {
                have: samples.len(),
            });
        }

        let data: Vec<([f64; INPUT], f64)> = samples
            .iter()
            .map(|s| {
                (
                    RejectContext::from_sample(s).normalized(),
                    if s.accepted { 0.0 } else { 1.0 },
                )
            })
            .collect();

        let (net, loss) = Mlp::train(
            &data,
            self.config.training_epochs,
            self.config.learning_rate,
            self.config.dropout_rate,
        );

        if let Some(path) = self.model_path() {
            if let Err(e) = net.save(&path) {
                warn!(path = %path.display(), error = %e, "model persistence failed");
            }
        }

        *self.network.write().expect("model lock poisoned") = Some(Arc::new(net));
        info!(samples = data.len(), loss, "rejection model trained");
        Ok(TrainOutcome::Trained {
            samples: data.len(),
            loss,
        })
    }

    /// Hour bucket helper for callers assembling a context.
    pub fn local_hour(&self) -> u8 {
        self.clock.local_hour(self.utc_offset_hours)
    }
}
