//! Per-order dispatch task.
//!
//! One task owns one order from admission to a terminal transition. All
//! mutations arrive through the mailbox — driver responses, timer fires,
//! queue ticks — one message at a time, so status checks inside a handler
//! are race-free. Timers are spawned sleeps gated on the order's
//! cancellation token; a timer that fires after finalization is dropped by
//! the status and batch-number guards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::decision_log::LogEvent;
use crate::hotzone::ZoneRef;
use crate::notify::{DispatchStatus, HotZoneHint, OfferMessage, OrderTaken, RiderUpdate};
use crate::scoring::DriverScore;
use crate::types::{
    CancelReason, DispatchLogRow, DriverId, Order, OrderStatus, OutcomeSample, QueueEntryStatus,
    RejectReasonCode, RejectionRow, RiderId,
};

use super::{offer, ActiveHandle, EngineCtx};

/// Answer to a driver accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptOutcome {
    Accepted,
    AlreadyTaken,
    UnknownOrder,
}

/// Answer to a driver reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectOutcome {
    pub ok: bool,
    pub re_dispatched: bool,
    pub next_batch: Option<u32>,
}

/// Answer to a rider cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub ok: bool,
    pub message: String,
}

/// Everything that can reach an order's mailbox.
pub(crate) enum OrderMsg {
    Accept {
        driver_id: DriverId,
        reply: oneshot::Sender<AcceptOutcome>,
    },
    Reject {
        driver_id: DriverId,
        reason: RejectReasonCode,
        reply: oneshot::Sender<RejectOutcome>,
    },
    Cancel {
        rider_id: RiderId,
        reason: Option<String>,
        reply: oneshot::Sender<CancelOutcome>,
    },
    BatchTimeout {
        batch_number: u32,
    },
    TotalTimeout,
    QueueReleased,
    QueueExpired,
    QueueTick,
}

/// In-memory record of one offer round.
#[derive(Debug, Clone)]
struct BatchRecord {
    number: u32,
    offered: Vec<DriverId>,
    rejected: Vec<DriverId>,
    timed_out: Vec<DriverId>,
    accepted_by: Option<DriverId>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

struct OrderTask {
    ctx: Arc<EngineCtx>,
    order: Order,
    /// Surge multiplier committed at admission (1.0 outside zones).
    surge: f64,
    /// Zone whose quota slot this order holds, if any.
    slot_zone: Option<ZoneRef>,
    /// Zone context for messages while queued.
    zone_hint: Option<ZoneRef>,
    queued: bool,
    last_queue_position: Option<u32>,

    rx: mpsc::Receiver<OrderMsg>,
    tx: mpsc::Sender<OrderMsg>,
    cancel: CancellationToken,
    batch_cancel: Option<CancellationToken>,

    batch_number: u32,
    batch_started_at: DateTime<Utc>,
    batches: Vec<BatchRecord>,
    current: HashMap<DriverId, DriverScore>,
    current_responded: HashSet<DriverId>,
    all_offered: HashSet<DriverId>,
    all_rejected: HashSet<DriverId>,
    all_timed_out: HashSet<DriverId>,

    done: bool,
}

const MAILBOX_CAPACITY: usize = 32;

/// Start the owning task for an admitted (dispatching) order.
pub(crate) fn spawn_dispatching(
    ctx: Arc<EngineCtx>,
    order: Order,
    zone: Option<ZoneRef>,
    surge: f64,
) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    ctx.register(&order.order_id, ActiveHandle { tx: tx.clone() });
    let task = OrderTask {
        zone_hint: zone.clone(),
        slot_zone: zone,
        surge,
        queued: false,
        last_queue_position: None,
        batch_started_at: ctx.clock.now(),
        ctx,
        order,
        rx,
        tx,
        cancel: CancellationToken::new(),
        batch_cancel: None,
        batch_number: 0,
        batches: Vec::new(),
        current: HashMap::new(),
        current_responded: HashSet::new(),
        all_offered: HashSet::new(),
        all_rejected: HashSet::new(),
        all_timed_out: HashSet::new(),
        done: false,
    };
    tokio::spawn(task.run());
}

/// Start the owning task for a queued order. No timers are armed; the task
/// waits for a release, an expiry, or a cancel.
pub(crate) fn spawn_queued(ctx: Arc<EngineCtx>, order: Order, zone: ZoneRef, position: u32) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    ctx.register(&order.order_id, ActiveHandle { tx: tx.clone() });
    let task = OrderTask {
        zone_hint: Some(zone),
        slot_zone: None,
        surge: 1.0,
        queued: true,
        last_queue_position: Some(position),
        batch_started_at: ctx.clock.now(),
        ctx,
        order,
        rx,
        tx,
        cancel: CancellationToken::new(),
        batch_cancel: None,
        batch_number: 0,
        batches: Vec::new(),
        current: HashMap::new(),
        current_responded: HashSet::new(),
        all_offered: HashSet::new(),
        all_rejected: HashSet::new(),
        all_timed_out: HashSet::new(),
        done: false,
    };
    tokio::spawn(task.run());
}

impl OrderTask {
    async fn run(mut self) {
        if !self.queued {
            self.arm_total_timer();
            self.execute_batch().await;
        }
        while !self.done {
            let Some(msg) = self.rx.recv().await else { break };
            self.handle(msg).await;
        }
    }

    async fn handle(&mut self, msg: OrderMsg) {
        match msg {
            OrderMsg::Accept { driver_id, reply } => {
                let outcome = self.on_accept(&driver_id).await;
                let _ = reply.send(outcome);
            }
            OrderMsg::Reject {
                driver_id,
                reason,
                reply,
            } => {
                let outcome = self.on_reject(&driver_id, reason).await;
                let _ = reply.send(outcome);
            }
            OrderMsg::Cancel {
                rider_id,
                reason,
                reply,
            } => {
                let outcome = self.on_cancel(&rider_id, reason.as_deref()).await;
                let _ = reply.send(outcome);
            }
            OrderMsg::BatchTimeout { batch_number } => self.on_batch_timeout(batch_number).await,
            OrderMsg::TotalTimeout => self.on_total_timeout().await,
            OrderMsg::QueueReleased => self.on_queue_released().await,
            OrderMsg::QueueExpired => self.on_queue_expired().await,
            OrderMsg::QueueTick => self.on_queue_tick().await,
        }
    }

    // -- timers -------------------------------------------------------------

    fn arm_total_timer(&self) {
        let tx = self.tx.clone();
        let token = self.cancel.clone();
        let timeout = self.ctx.config.engine.order_total_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let _ = tx.send(OrderMsg::TotalTimeout).await;
                }
            }
        });
    }

    fn arm_batch_timer(&mut self) {
        let token = self.cancel.child_token();
        self.batch_cancel = Some(token.clone());
        let tx = self.tx.clone();
        let batch_number = self.batch_number;
        let timeout = self.ctx.config.engine.batch_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let _ = tx.send(OrderMsg::BatchTimeout { batch_number }).await;
                }
            }
        });
    }

    fn cancel_batch_timer(&mut self) {
        if let Some(token) = self.batch_cancel.take() {
            token.cancel();
        }
    }

    // -- batch execution ----------------------------------------------------

    async fn execute_batch(&mut self) {
        let next = self.batch_number + 1;
        if next > self.ctx.config.engine.max_batches {
            self.finalize_cancelled(CancelReason::MaxBatches).await;
            return;
        }
        self.batch_number = next;

        let mut exclude: HashSet<DriverId> = self.all_offered.clone();
        exclude.extend(self.all_rejected.iter().cloned());
        exclude.extend(self.all_timed_out.iter().cloned());

        let scores = self
            .ctx
            .scorer
            .rank(
                &self.order,
                self.surge,
                &exclude,
                self.ctx.config.engine.batch_size,
            )
            .await;

        if scores.is_empty() {
            let reason = if self.all_rejected.is_empty() && self.all_timed_out.is_empty() {
                CancelReason::NoDrivers
            } else {
                CancelReason::AllRejected
            };
            self.finalize_cancelled(reason).await;
            return;
        }

        let now = self.ctx.clock.now();
        self.batch_started_at = now;

        let candidates_json = json!(scores
            .iter()
            .map(|s| {
                json!({
                    "driver_id": s.driver_id,
                    "score": (s.total * 100.0).round() / 100.0,
                    "eta_s": s.eta.duration_s,
                    "reason": s.reasons.join(","),
                    "p_reject": (s.estimate.probability * 1000.0).round() / 1000.0,
                })
            })
            .collect::<Vec<_>>());
        let weights_json =
            serde_json::to_value(self.ctx.config.scorer.weights).unwrap_or_else(|_| json!({}));
        self.ctx.log.post(LogEvent::Batch(DispatchLogRow {
            order_id: self.order.order_id.clone(),
            batch_number: self.batch_number,
            candidates_json,
            weights_json,
            hour: self.order.hour_of_day,
            dow: self.order.day_of_week,
            accepted_by: None,
            accepted_at: None,
            response_ms: None,
        }));

        self.current.clear();
        self.current_responded.clear();
        let deadline_ms = now.timestamp_millis()
            + self.ctx.config.engine.batch_timeout.as_millis() as i64;
        let mut record = BatchRecord {
            number: self.batch_number,
            offered: Vec::new(),
            rejected: Vec::new(),
            timed_out: Vec::new(),
            accepted_by: None,
            started_at: now,
            ended_at: None,
        };

        for score in scores {
            let decision = offer::evaluate_auto_accept(&self.ctx, &self.order, &score, self.surge)
                .await;
            self.ctx.log.post(LogEvent::AutoAccept(crate::types::AutoAcceptLogRow {
                order_id: self.order.order_id.clone(),
                driver_id: score.driver_id.clone(),
                batch_number: self.batch_number,
                decision: decision.clone(),
                created_at: now,
            }));

            let message = OfferMessage {
                order_id: self.order.order_id.clone(),
                pickup: self.order.pickup.clone(),
                destination: self.order.destination.clone(),
                payment_kind: self.order.payment_kind,
                base_fare: self.order.base_fare,
                final_fare: self.order.base_fare.map(|f| f * self.surge),
                pickup_distance_km: score.distance_km,
                eta_min: score.eta.duration_min(),
                eta_source: score.eta.source,
                batch_number: self.batch_number,
                response_deadline_ms: deadline_ms,
                dispatch_reason: score.reasons.join(","),
                hot_zone: self.zone_hint.as_ref().map(|z| HotZoneHint {
                    zone_id: z.zone_id.clone(),
                    name: z.name.clone(),
                    surge: self.surge,
                }),
                auto_accept: decision,
            };
            if let Err(e) = self.ctx.notifier.offer(&score.driver_id, message).await {
                // Unreachable socket: the batch timer will promote them to
                // timed-out like any other silent driver.
                warn!(driver_id = %score.driver_id, error = %e, "offer push failed");
            }
            self.all_offered.insert(score.driver_id.clone());
            record.offered.push(score.driver_id.clone());
            self.current.insert(score.driver_id.clone(), score);
        }
        self.batches.push(record);

        let mut update = RiderUpdate::new(
            &self.order.order_id,
            DispatchStatus::Searching,
            format!("contacting nearby drivers (round {})", self.batch_number),
        );
        update.batch_number = Some(self.batch_number);
        update.offered_count = Some(self.all_offered.len());
        self.ctx.notify_rider(&self.order.rider_id, update).await;

        self.arm_batch_timer();
        debug!(order_id = %self.order.order_id, batch = self.batch_number, offered = self.current.len(), "batch issued");
    }

    fn close_batch(&mut self, at: DateTime<Utc>) {
        if let Some(record) = self.batches.last_mut() {
            if record.ended_at.is_some() {
                return;
            }
            record.ended_at = Some(at);
            debug!(
                batch = record.number,
                offered = record.offered.len(),
                rejected = record.rejected.len(),
                timed_out = record.timed_out.len(),
                accepted_by = record.accepted_by.as_deref().unwrap_or("-"),
                duration_ms = (at - record.started_at).num_milliseconds(),
                "offer round closed"
            );
        }
    }

    // -- driver responses ---------------------------------------------------

    async fn on_accept(&mut self, driver_id: &str) -> AcceptOutcome {
        if self.order.status != OrderStatus::Dispatching {
            return AcceptOutcome::AlreadyTaken;
        }
        let Some(score) = self.current.get(driver_id) else {
            // Not in the live batch (earlier batch, or never offered).
            return AcceptOutcome::AlreadyTaken;
        };
        if self.current_responded.contains(driver_id) {
            return AcceptOutcome::AlreadyTaken;
        }

        let now = self.ctx.clock.now();
        let response_ms = (now - self.batch_started_at).num_milliseconds().max(0) as u64;
        let context = score.context;

        self.order.status = OrderStatus::Accepted;
        self.order.driver_id = Some(driver_id.to_string());
        self.order.accepted_at = Some(now);
        if let Err(e) = self.ctx.store.update_order(&self.order).await {
            warn!(order_id = %self.order.order_id, error = %e, "accept persistence failed");
        }

        self.ctx.log.post(LogEvent::BatchAccepted {
            order_id: self.order.order_id.clone(),
            batch_number: self.batch_number,
            driver_id: driver_id.to_string(),
            accepted_at: now,
            response_ms,
        });
        self.ctx.log.post(LogEvent::Outcome(
            self.outcome_sample(driver_id, &context, true, now),
        ));

        self.cancel_batch_timer();
        self.cancel.cancel();
        if let Some(record) = self.batches.last_mut() {
            record.accepted_by = Some(driver_id.to_string());
        }
        self.close_batch(now);

        // Everyone else who ever saw this order learns it is gone.
        for other in self.all_offered.clone() {
            if other == driver_id {
                continue;
            }
            let taken = OrderTaken {
                order_id: self.order.order_id.clone(),
                message: "order taken by another driver".into(),
            };
            if let Err(e) = self.ctx.notifier.order_taken(&other, taken).await {
                debug!(driver_id = %other, error = %e, "order:taken undeliverable");
            }
        }

        let mut update = RiderUpdate::new(
            &self.order.order_id,
            DispatchStatus::Accepted,
            "a driver accepted your ride",
        );
        update.status = Some(OrderStatus::Accepted);
        update.batch_number = Some(self.batch_number);
        self.ctx.notify_rider(&self.order.rider_id, update).await;

        info!(order_id = %self.order.order_id, driver_id, batch = self.batch_number, response_ms, "order accepted");
        self.finish();
        AcceptOutcome::Accepted
    }

    async fn on_reject(&mut self, driver_id: &str, reason: RejectReasonCode) -> RejectOutcome {
        let noop = RejectOutcome {
            ok: true,
            re_dispatched: false,
            next_batch: None,
        };
        if self.order.status != OrderStatus::Dispatching
            || !self.current.contains_key(driver_id)
            || self.current_responded.contains(driver_id)
        {
            return noop;
        }

        let now = self.ctx.clock.now();
        let context = self.current[driver_id].context;
        self.current_responded.insert(driver_id.to_string());
        self.all_rejected.insert(driver_id.to_string());
        if let Some(record) = self.batches.last_mut() {
            record.rejected.push(driver_id.to_string());
        }

        self.order.reject_count += 1;
        if let Err(e) = self.ctx.store.update_order(&self.order).await {
            warn!(order_id = %self.order.order_id, error = %e, "reject count persistence failed");
        }

        // Written in-path, not through the log channel: the profile worker
        // reads these rows and must observe them once it is woken below.
        let rejection = RejectionRow {
            order_id: self.order.order_id.clone(),
            driver_id: driver_id.to_string(),
            reason_code: reason,
            distance_to_pickup_km: context.distance_to_pickup_km,
            trip_distance_km: self
                .order
                .destination
                .as_ref()
                .map(|_| context.trip_distance_km),
            estimated_fare: self.order.base_fare.map(|f| f * self.surge),
            hour_of_day: self.order.hour_of_day,
            driver_today_earnings: context.driver_today_earnings,
            created_at: now,
        };
        if let Err(e) = self.ctx.store.insert_rejection(&rejection).await {
            warn!(order_id = %self.order.order_id, error = %e, "rejection row write failed");
        }
        let sample = self.outcome_sample(driver_id, &context, false, now);
        if let Err(e) = self.ctx.store.insert_outcome(&sample).await {
            warn!(order_id = %self.order.order_id, error = %e, "outcome write failed");
        }
        if self.ctx.profile_tx.try_send(driver_id.to_string()).is_err() {
            debug!(driver_id, "profile update queue full");
        }

        // When the whole batch has answered there is no point waiting for
        // the timer.
        if self.current_responded.len() == self.current.len() {
            self.cancel_batch_timer();
            self.close_batch(now);
            self.execute_batch().await;
            if self.done || self.order.status != OrderStatus::Dispatching {
                return noop;
            }
            return RejectOutcome {
                ok: true,
                re_dispatched: true,
                next_batch: Some(self.batch_number),
            };
        }
        noop
    }

    async fn on_batch_timeout(&mut self, batch_number: u32) {
        if self.order.status != OrderStatus::Dispatching || batch_number != self.batch_number {
            return; // stale timer
        }
        let now = self.ctx.clock.now();
        let silent: Vec<DriverId> = self
            .current
            .keys()
            .filter(|d| !self.current_responded.contains(*d))
            .cloned()
            .collect();
        for driver_id in silent {
            let context = self.current[&driver_id].context;
            self.all_timed_out.insert(driver_id.clone());
            if let Some(record) = self.batches.last_mut() {
                record.timed_out.push(driver_id.clone());
            }
            if let Err(e) = self
                .ctx
                .notifier
                .batch_timeout(&driver_id, &self.order.order_id)
                .await
            {
                debug!(driver_id = %driver_id, error = %e, "batch-timeout undeliverable");
            }
            self.ctx.log.post(LogEvent::Outcome(
                self.outcome_sample(&driver_id, &context, false, now),
            ));
        }
        self.close_batch(now);
        debug!(order_id = %self.order.order_id, batch = batch_number, "batch timed out");
        self.execute_batch().await;
    }

    async fn on_total_timeout(&mut self) {
        if self.order.status != OrderStatus::Dispatching {
            return;
        }
        self.finalize_cancelled(CancelReason::Timeout).await;
    }

    // -- rider cancel -------------------------------------------------------

    async fn on_cancel(&mut self, rider_id: &str, _detail: Option<&str>) -> CancelOutcome {
        if rider_id != self.order.rider_id {
            return CancelOutcome {
                ok: false,
                message: "order belongs to another rider".into(),
            };
        }
        match self.order.status {
            OrderStatus::Queued => {
                if let Err(e) = self.ctx.hotzone.dequeue(&self.order.order_id).await {
                    warn!(order_id = %self.order.order_id, error = %e, "dequeue on cancel failed");
                }
                self.finalize_cancelled(CancelReason::RiderCancelled).await;
                CancelOutcome {
                    ok: true,
                    message: "left the waiting queue".into(),
                }
            }
            OrderStatus::Dispatching => {
                for driver_id in self.current.keys().cloned().collect::<Vec<_>>() {
                    if self.current_responded.contains(&driver_id) {
                        continue;
                    }
                    if let Err(e) = self
                        .ctx
                        .notifier
                        .order_cancelled(&driver_id, &self.order.order_id, "rider cancelled")
                        .await
                    {
                        debug!(driver_id = %driver_id, error = %e, "cancel notice undeliverable");
                    }
                }
                self.finalize_cancelled(CancelReason::RiderCancelled).await;
                CancelOutcome {
                    ok: true,
                    message: "ride request cancelled".into(),
                }
            }
            _ => CancelOutcome {
                ok: false,
                message: "order is not active".into(),
            },
        }
    }

    // -- queue lifecycle ----------------------------------------------------

    async fn on_queue_released(&mut self) {
        if self.order.status == OrderStatus::Queued {
            self.begin_dispatch_from_queue().await;
        }
    }

    async fn on_queue_expired(&mut self) {
        if self.order.status == OrderStatus::Queued {
            self.finalize_cancelled(CancelReason::Timeout).await;
        }
    }

    async fn on_queue_tick(&mut self) {
        if self.order.status != OrderStatus::Queued {
            return;
        }
        let entry = match self.ctx.hotzone.queue_status(&self.order.order_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(e) => {
                warn!(order_id = %self.order.order_id, error = %e, "queue status check failed");
                return;
            }
        };
        match entry.status {
            QueueEntryStatus::Released => self.begin_dispatch_from_queue().await,
            QueueEntryStatus::Expired => {
                self.finalize_cancelled(CancelReason::Timeout).await;
            }
            QueueEntryStatus::Waiting => {
                if self.last_queue_position != Some(entry.position) {
                    self.last_queue_position = Some(entry.position);
                    let mut update = RiderUpdate::new(
                        &self.order.order_id,
                        DispatchStatus::Queued,
                        format!("you are now number {} in line", entry.position),
                    );
                    update.queue_position = Some(entry.position);
                    update.estimated_wait_min = Some(entry.est_wait_min);
                    self.ctx.notify_rider(&self.order.rider_id, update).await;
                }
            }
            QueueEntryStatus::Cancelled => {}
        }
    }

    /// A queue slot opened: take a real quota slot and start offering.
    async fn begin_dispatch_from_queue(&mut self) {
        loop {
            let admission = match self
                .ctx
                .hotzone
                .check_admission(self.order.pickup.point, self.order.base_fare)
                .await
            {
                Ok(admission) => admission,
                Err(e) => {
                    warn!(order_id = %self.order.order_id, error = %e, "re-admission failed, staying queued");
                    return;
                }
            };
            match admission.kind {
                crate::hotzone::AdmissionKind::Queue => {
                    // Someone stole the freed slot; rejoin at the tail.
                    if let Some(zone) = &admission.zone {
                        match self
                            .ctx
                            .hotzone
                            .enqueue(
                                &zone.zone_id,
                                &self.order.order_id,
                                &self.order.rider_id,
                                self.order.base_fare,
                            )
                            .await
                        {
                            Ok(entry) => {
                                self.last_queue_position = Some(entry.position);
                                let mut update = RiderUpdate::new(
                                    &self.order.order_id,
                                    DispatchStatus::Queued,
                                    format!("still waiting, number {} in line", entry.position),
                                );
                                update.queue_position = Some(entry.position);
                                update.estimated_wait_min = Some(entry.est_wait_min);
                                self.ctx.notify_rider(&self.order.rider_id, update).await;
                            }
                            Err(e) => {
                                warn!(order_id = %self.order.order_id, error = %e, "re-enqueue failed");
                                self.finalize_cancelled(CancelReason::Timeout).await;
                            }
                        }
                    }
                    return;
                }
                _ => match &admission.zone {
                    None => {
                        self.slot_zone = None;
                        self.surge = 1.0;
                        break;
                    }
                    Some(zone) => {
                        match self
                            .ctx
                            .hotzone
                            .consume(
                                &zone.zone_id,
                                &self.order.order_id,
                                self.order.base_fare,
                                admission.surge,
                            )
                            .await
                        {
                            Ok(true) => {
                                self.slot_zone = Some(zone.clone());
                                self.zone_hint = Some(zone.clone());
                                self.surge = admission.surge;
                                break;
                            }
                            Ok(false) => continue,
                            Err(e) => {
                                warn!(order_id = %self.order.order_id, error = %e, "consume after release failed");
                                return;
                            }
                        }
                    }
                },
            }
        }

        self.queued = false;
        self.order.status = OrderStatus::Dispatching;
        self.order.offered_at = Some(self.ctx.clock.now());
        if let Err(e) = self.ctx.store.update_order(&self.order).await {
            warn!(order_id = %self.order.order_id, error = %e, "queue release persistence failed");
        }

        let update = RiderUpdate::new(
            &self.order.order_id,
            DispatchStatus::Searching,
            "a slot opened up, contacting drivers now",
        );
        self.ctx.notify_rider(&self.order.rider_id, update).await;

        info!(order_id = %self.order.order_id, "queued order released into dispatch");
        self.arm_total_timer();
        self.execute_batch().await;
    }

    // -- finalization -------------------------------------------------------

    async fn finalize_cancelled(&mut self, reason: CancelReason) {
        let now = self.ctx.clock.now();
        self.order.status = OrderStatus::Cancelled;
        self.order.cancelled_at = Some(now);
        self.order.cancel_reason = Some(reason);
        if let Err(e) = self.ctx.store.update_order(&self.order).await {
            warn!(order_id = %self.order.order_id, error = %e, "cancel persistence failed");
        }

        self.cancel_batch_timer();
        self.cancel.cancel();
        self.close_batch(now);

        if self.slot_zone.is_some() {
            match self.ctx.hotzone.release(&self.order.order_id).await {
                Ok(Some(next_order)) => self.ctx.wake_queued(&next_order),
                Ok(None) => {}
                Err(e) => {
                    warn!(order_id = %self.order.order_id, error = %e, "quota release failed")
                }
            }
        }

        let mut update = RiderUpdate::new(
            &self.order.order_id,
            DispatchStatus::Failed,
            reason.message(),
        );
        update.status = Some(OrderStatus::Cancelled);
        update.cancel_reason = Some(reason);
        self.ctx.notify_rider(&self.order.rider_id, update).await;

        info!(order_id = %self.order.order_id, ?reason, batches = self.batches.len(), "order cancelled");
        self.finish();
    }

    fn finish(&mut self) {
        self.ctx.deregister(&self.order.order_id);
        self.done = true;
    }

    fn outcome_sample(
        &self,
        driver_id: &str,
        context: &crate::predict::RejectContext,
        accepted: bool,
        at: DateTime<Utc>,
    ) -> OutcomeSample {
        OutcomeSample {
            driver_id: driver_id.to_string(),
            order_id: self.order.order_id.clone(),
            accepted,
            distance_to_pickup_km: context.distance_to_pickup_km,
            trip_distance_km: context.trip_distance_km,
            estimated_fare: context.estimated_fare,
            hour_of_day: context.hour_of_day,
            day_of_week: context.day_of_week,
            is_holiday: context.is_holiday,
            driver_today_earnings: context.driver_today_earnings,
            driver_today_trips: context.driver_today_trips,
            driver_online_hours: context.driver_online_hours,
            driver_acceptance_rate: context.driver_acceptance_rate,
            zone_id: self.zone_hint.as_ref().map(|z| z.zone_id.clone()),
            created_at: at,
        }
    }
}
