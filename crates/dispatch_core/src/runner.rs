//! Wiring: construct the dispatch core from its collaborators.
//!
//! No module-level state anywhere in the crate; everything the handlers
//! need hangs off the [`DispatchCore`] built here and is threaded through
//! as ordinary values. Must be called from within a tokio runtime (the
//! decision-log writer and the periodic tasks are spawned immediately).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::decision_log::DecisionLog;
use crate::engine::{BackgroundTasks, Dispatcher};
use crate::eta::provider::RoadApi;
use crate::eta::EtaOracle;
use crate::hotzone::HotZoneController;
use crate::notify::Notifier;
use crate::predict::RejectionPredictor;
use crate::presence::PresenceRegistry;
use crate::scoring::DriverScorer;
use crate::store::Store;
use crate::types::HotZoneConfig;

const PROFILE_QUEUE_CAPACITY: usize = 256;

/// The assembled core: the dispatcher handle plus the long-lived services
/// the embedding host may want to reach directly.
pub struct DispatchCore {
    dispatcher: Dispatcher,
    background: BackgroundTasks,
    presence: Arc<PresenceRegistry>,
    eta: Arc<EtaOracle>,
    predictor: Arc<RejectionPredictor>,
    hotzone: Arc<HotZoneController>,
}

impl DispatchCore {
    /// Build every service and start the background loops.
    pub fn start(
        config: DispatchConfig,
        zones: Vec<HotZoneConfig>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        road: Option<Arc<dyn RoadApi>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let offset = config.utc_offset_hours;
        let presence = Arc::new(PresenceRegistry::new());
        let eta = Arc::new(EtaOracle::new(
            config.eta.clone(),
            offset,
            clock.clone(),
            store.clone(),
            road,
        ));
        let predictor = Arc::new(RejectionPredictor::new(
            config.predictor.clone(),
            offset,
            clock.clone(),
            store.clone(),
        ));
        predictor.load_persisted_model();
        let hotzone = Arc::new(HotZoneController::new(
            zones,
            config.surge,
            config.queue,
            offset,
            clock.clone(),
            store.clone(),
        ));
        let scorer = DriverScorer::new(
            config.scorer.clone(),
            config.engine.heartbeat_freshness,
            presence.clone(),
            store.clone(),
            eta.clone(),
            predictor.clone(),
            hotzone.clone(),
            clock.clone(),
        );
        let (log, log_handle) = DecisionLog::spawn(store.clone(), config.decision_log_capacity);
        let (profile_tx, profile_rx) = mpsc::channel(PROFILE_QUEUE_CAPACITY);

        let dispatcher = Dispatcher::new(
            config,
            clock,
            store,
            eta.clone(),
            predictor.clone(),
            scorer,
            hotzone.clone(),
            notifier,
            log,
            profile_tx,
        );
        let background = BackgroundTasks::spawn(&dispatcher, profile_rx, log_handle);

        Self {
            dispatcher,
            background,
            presence,
            eta,
            predictor,
            hotzone,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// The socket layer writes driver presence here.
    pub fn presence(&self) -> Arc<PresenceRegistry> {
        self.presence.clone()
    }

    pub fn eta(&self) -> Arc<EtaOracle> {
        self.eta.clone()
    }

    pub fn predictor(&self) -> Arc<RejectionPredictor> {
        self.predictor.clone()
    }

    pub fn hotzone(&self) -> Arc<HotZoneController> {
        self.hotzone.clone()
    }

    /// Stop the background loops. In-flight order tasks finish on their own
    /// timers; this only tears down the periodic machinery.
    pub async fn shutdown(self) {
        self.background.shutdown().await;
    }
}
