//! Dispatch engine: turns an admitted order into an accepted driver through
//! bounded offer rounds.
//!
//! Every active order is owned by exactly one tokio task consuming a
//! serialized mailbox; timer fires, driver responses, and queue ticks all
//! arrive as messages there, so per-order state never sees two writers.
//! Cross-order work (ranking, ETA, store I/O) runs wherever it likes.

mod offer;
mod order_task;
mod trip;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::decision_log::DecisionLog;
use crate::error::DispatchError;
use crate::eta::EtaOracle;
use crate::hotzone::{AdmissionKind, HotZoneController, ZoneRef};
use crate::notify::{DispatchStatus, HotZoneHint, Notifier, RiderUpdate};
use crate::predict::RejectionPredictor;
use crate::scoring::DriverScorer;
use crate::store::Store;
use crate::types::{
    DriverId, Order, OrderId, OrderStatus, PaymentKind, Place, RejectReasonCode, RiderId,
};

pub use order_task::{AcceptOutcome, CancelOutcome, RejectOutcome};

// ---------------------------------------------------------------------------
// Public request/response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub rider_id: RiderId,
    pub pickup: Place,
    pub destination: Option<Place>,
    pub payment_kind: PaymentKind,
    pub base_fare: Option<f64>,
    pub call_origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub dispatch_status: DispatchStatus,
    pub hot_zone: Option<HotZoneHint>,
    pub queue_position: Option<u32>,
    pub estimated_wait_min: Option<u32>,
}

// ---------------------------------------------------------------------------
// Engine internals shared with the order tasks
// ---------------------------------------------------------------------------

pub(crate) struct ActiveHandle {
    pub tx: mpsc::Sender<order_task::OrderMsg>,
}

pub(crate) struct EngineCtx {
    pub config: DispatchConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn Store>,
    pub eta: Arc<EtaOracle>,
    pub predictor: Arc<RejectionPredictor>,
    pub scorer: DriverScorer,
    pub hotzone: Arc<HotZoneController>,
    pub notifier: Arc<dyn Notifier>,
    pub log: DecisionLog,
    pub active: Mutex<HashMap<OrderId, ActiveHandle>>,
    pub profile_tx: mpsc::Sender<DriverId>,
}

impl EngineCtx {
    pub(crate) fn register(&self, order_id: &str, handle: ActiveHandle) {
        self.active
            .lock()
            .expect("active registry poisoned")
            .insert(order_id.to_string(), handle);
    }

    pub(crate) fn deregister(&self, order_id: &str) {
        self.active
            .lock()
            .expect("active registry poisoned")
            .remove(order_id);
    }

    pub(crate) fn handle_for(&self, order_id: &str) -> Option<mpsc::Sender<order_task::OrderMsg>> {
        self.active
            .lock()
            .expect("active registry poisoned")
            .get(order_id)
            .map(|h| h.tx.clone())
    }

    pub(crate) fn active_order_ids(&self) -> Vec<OrderId> {
        self.active
            .lock()
            .expect("active registry poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Wake a queued order whose slot just opened.
    pub(crate) fn wake_queued(&self, order_id: &str) {
        if let Some(tx) = self.handle_for(order_id) {
            if tx.try_send(order_task::OrderMsg::QueueReleased).is_err() {
                warn!(order_id, "queue wake dropped (mailbox full or task gone)");
            }
        }
    }

    pub(crate) async fn notify_rider(&self, rider_id: &str, update: RiderUpdate) {
        if let Err(e) = self.notifier.rider_update(rider_id, update).await {
            debug!(rider_id, error = %e, "rider update undeliverable");
        }
    }

    pub(crate) fn local_hour(&self) -> u8 {
        self.clock.local_hour(self.config.utc_offset_hours)
    }

    pub(crate) fn local_dow(&self) -> u8 {
        self.clock.local_dow(self.config.utc_offset_hours)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher: the public API
// ---------------------------------------------------------------------------

/// Handle to the dispatch engine. Cheap to clone; all methods are safe to
/// call from any task.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) ctx: Arc<EngineCtx>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn Store>,
        eta: Arc<EtaOracle>,
        predictor: Arc<RejectionPredictor>,
        scorer: DriverScorer,
        hotzone: Arc<HotZoneController>,
        notifier: Arc<dyn Notifier>,
        log: DecisionLog,
        profile_tx: mpsc::Sender<DriverId>,
    ) -> Self {
        Self {
            ctx: Arc::new(EngineCtx {
                config,
                clock,
                store,
                eta,
                predictor,
                scorer,
                hotzone,
                notifier,
                log,
                active: Mutex::new(HashMap::new()),
                profile_tx,
            }),
        }
    }

    pub fn active_order_count(&self) -> usize {
        self.ctx.active.lock().expect("active registry poisoned").len()
    }

    /// Create a ride request and start dispatch (or queue it). The returned
    /// response reflects the durable state of the order.
    pub async fn create_order(
        &self,
        req: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, DispatchError> {
        let ctx = &self.ctx;
        let now = ctx.clock.now();
        let order_id = Uuid::new_v4().to_string();
        let mut order = Order {
            order_id: order_id.clone(),
            rider_id: req.rider_id.clone(),
            pickup: req.pickup,
            destination: req.destination,
            payment_kind: req.payment_kind,
            base_fare: req.base_fare,
            status: OrderStatus::Offered,
            driver_id: None,
            reject_count: 0,
            hour_of_day: ctx.local_hour(),
            day_of_week: ctx.local_dow(),
            created_at: now,
            offered_at: None,
            accepted_at: None,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            call_origin: req.call_origin,
        };
        ctx.store.insert_order(&order).await?;

        let mut admission = ctx
            .hotzone
            .check_admission(order.pickup.point, order.base_fare)
            .await?;

        loop {
            match admission.kind {
                AdmissionKind::Queue => {
                    let zone = admission.zone.clone().ok_or_else(|| {
                        DispatchError::InvalidArg("queue admission without zone".into())
                    })?;
                    let entry = ctx
                        .hotzone
                        .enqueue(&zone.zone_id, &order.order_id, &order.rider_id, order.base_fare)
                        .await?;
                    order.status = OrderStatus::Queued;
                    ctx.store.update_order(&order).await?;

                    let hint = HotZoneHint {
                        zone_id: zone.zone_id.clone(),
                        name: zone.name.clone(),
                        surge: entry.surge_at_enqueue,
                    };
                    order_task::spawn_queued(ctx.clone(), order.clone(), zone, entry.position);
                    let mut update = RiderUpdate::new(
                        &order.order_id,
                        DispatchStatus::Queued,
                        format!(
                            "the area is at capacity; you are number {} in line",
                            entry.position
                        ),
                    );
                    update.status = Some(OrderStatus::Queued);
                    update.queue_position = Some(entry.position);
                    update.estimated_wait_min = Some(entry.est_wait_min);
                    update.hot_zone_info = Some(hint.clone());
                    ctx.notify_rider(&order.rider_id, update).await;

                    info!(order_id = %order.order_id, zone = %hint.zone_id, position = entry.position, "order queued");
                    return Ok(CreateOrderResponse {
                        order_id: order.order_id,
                        status: OrderStatus::Queued,
                        dispatch_status: DispatchStatus::Queued,
                        hot_zone: Some(hint),
                        queue_position: Some(entry.position),
                        estimated_wait_min: Some(entry.est_wait_min),
                    });
                }
                AdmissionKind::Normal | AdmissionKind::Surge => {
                    let zone: Option<ZoneRef> = admission.zone.clone();
                    let surge = if zone.is_some() { admission.surge } else { 1.0 };
                    if let Some(zone_ref) = &zone {
                        let granted = ctx
                            .hotzone
                            .consume(&zone_ref.zone_id, &order.order_id, order.base_fare, surge)
                            .await?;
                        if !granted {
                            // Lost the race; the admission may have turned
                            // into a queue by now.
                            admission = ctx
                                .hotzone
                                .check_admission(order.pickup.point, order.base_fare)
                                .await?;
                            continue;
                        }
                    }
                    order.status = OrderStatus::Dispatching;
                    order.offered_at = Some(ctx.clock.now());
                    ctx.store.update_order(&order).await?;

                    let hint = zone.as_ref().map(|z| HotZoneHint {
                        zone_id: z.zone_id.clone(),
                        name: z.name.clone(),
                        surge,
                    });
                    order_task::spawn_dispatching(ctx.clone(), order.clone(), zone, surge);

                    info!(order_id = %order.order_id, surge, "order dispatching");
                    return Ok(CreateOrderResponse {
                        order_id: order.order_id,
                        status: OrderStatus::Dispatching,
                        dispatch_status: DispatchStatus::Searching,
                        hot_zone: hint,
                        queue_position: None,
                        estimated_wait_min: None,
                    });
                }
            }
        }
    }

    /// Driver accepts an offer. Idempotent: re-accepts and late accepts get
    /// a truthful no-op answer.
    pub async fn driver_accept(
        &self,
        order_id: &str,
        driver_id: &str,
    ) -> Result<AcceptOutcome, DispatchError> {
        if let Some(tx) = self.ctx.handle_for(order_id) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let msg = order_task::OrderMsg::Accept {
                driver_id: driver_id.to_string(),
                reply: reply_tx,
            };
            if tx.send(msg).await.is_ok() {
                if let Ok(outcome) = reply_rx.await {
                    return Ok(outcome);
                }
            }
        }
        // No live task: answer from durable state.
        match self.ctx.store.order(order_id).await? {
            None => Ok(AcceptOutcome::UnknownOrder),
            Some(order) => match order.status {
                OrderStatus::Accepted | OrderStatus::Arrived | OrderStatus::OnTrip
                | OrderStatus::Done => {
                    if order.driver_id.as_deref() == Some(driver_id) {
                        Ok(AcceptOutcome::Accepted)
                    } else {
                        Ok(AcceptOutcome::AlreadyTaken)
                    }
                }
                _ => Ok(AcceptOutcome::AlreadyTaken),
            },
        }
    }

    /// Driver declines an offer (reason-coded). No-op when the order is no
    /// longer dispatching.
    pub async fn driver_reject(
        &self,
        order_id: &str,
        driver_id: &str,
        reason: RejectReasonCode,
    ) -> Result<RejectOutcome, DispatchError> {
        if let Some(tx) = self.ctx.handle_for(order_id) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let msg = order_task::OrderMsg::Reject {
                driver_id: driver_id.to_string(),
                reason,
                reply: reply_tx,
            };
            if tx.send(msg).await.is_ok() {
                if let Ok(outcome) = reply_rx.await {
                    return Ok(outcome);
                }
            }
        }
        Ok(RejectOutcome {
            ok: true,
            re_dispatched: false,
            next_batch: None,
        })
    }

    /// Rider cancels. Works for queued, dispatching, and accepted (pre-trip)
    /// orders.
    pub async fn cancel_order(
        &self,
        order_id: &str,
        rider_id: &str,
        reason: Option<&str>,
    ) -> Result<CancelOutcome, DispatchError> {
        if let Some(tx) = self.ctx.handle_for(order_id) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let msg = order_task::OrderMsg::Cancel {
                rider_id: rider_id.to_string(),
                reason: reason.map(str::to_string),
                reply: reply_tx,
            };
            if tx.send(msg).await.is_ok() {
                if let Ok(outcome) = reply_rx.await {
                    return Ok(outcome);
                }
            }
        }
        // Accepted orders have no live task; cancel from durable state.
        trip::cancel_after_accept(&self.ctx, order_id, rider_id).await
    }

    /// Driver reached the pickup point.
    pub async fn mark_arrived(&self, order_id: &str, driver_id: &str) -> Result<(), DispatchError> {
        trip::mark_arrived(&self.ctx, order_id, driver_id).await
    }

    /// Trip started (rider on board).
    pub async fn start_trip(&self, order_id: &str, driver_id: &str) -> Result<(), DispatchError> {
        trip::start_trip(&self.ctx, order_id, driver_id).await
    }

    /// Trip completed: accrues earnings, marks the quota slot completed.
    pub async fn complete_trip(&self, order_id: &str, driver_id: &str) -> Result<(), DispatchError> {
        trip::complete_trip(&self.ctx, order_id, driver_id).await
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Owns the engine's periodic work; dropping it (or calling `shutdown`)
/// stops every loop.
pub struct BackgroundTasks {
    shutdown: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(
        dispatcher: &Dispatcher,
        mut profile_rx: mpsc::Receiver<DriverId>,
        log_handle: tokio::task::JoinHandle<()>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let mut handles = vec![log_handle];

        // Queue advance / expiry tick.
        {
            let ctx = dispatcher.ctx.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(ctx.config.engine.queue_tick);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {}
                    }
                    match ctx.hotzone.expire_timed_out().await {
                        Ok(expired) => {
                            for entry in expired {
                                if let Some(tx) = ctx.handle_for(&entry.order_id) {
                                    let _ = tx.try_send(order_task::OrderMsg::QueueExpired);
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "queue expiry scan failed"),
                    }
                    for order_id in ctx.active_order_ids() {
                        if let Some(tx) = ctx.handle_for(&order_id) {
                            let _ = tx.try_send(order_task::OrderMsg::QueueTick);
                        }
                    }
                }
            }));
        }

        // ETA cache sweeper.
        {
            let ctx = dispatcher.ctx.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(ctx.config.eta.sweep_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {}
                    }
                    ctx.eta.sweep_expired().await;
                }
            }));
        }

        // Profile update worker.
        {
            let ctx = dispatcher.ctx.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        driver_id = profile_rx.recv() => {
                            let Some(driver_id) = driver_id else { break };
                            if let Err(e) = ctx.predictor.update_profile(&driver_id).await {
                                warn!(driver_id = %driver_id, error = %e, "profile update failed");
                            }
                        }
                    }
                }
            }));
        }

        Self { shutdown, handles }
    }

    /// Stop every background loop and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            handle.abort();
            let _ = handle.await;
        }
    }
}
