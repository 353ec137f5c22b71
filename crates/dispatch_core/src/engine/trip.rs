//! Post-accept trip lifecycle.
//!
//! Once an order is ACCEPTED its dispatch task is gone; arrival, trip start,
//! completion, and late cancellation operate on durable state. Transitions
//! stay monotonic: each step requires the exact predecessor status and the
//! bound driver.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::DispatchError;
use crate::notify::{DispatchStatus, RiderUpdate};
use crate::types::{CancelReason, Order, OrderStatus};

use super::{CancelOutcome, EngineCtx};

async fn load_bound_order(
    ctx: &EngineCtx,
    order_id: &str,
    driver_id: &str,
    expected: OrderStatus,
) -> Result<Order, DispatchError> {
    let order = ctx
        .store
        .order(order_id)
        .await?
        .ok_or_else(|| DispatchError::NotFound {
            what: format!("order {order_id}"),
        })?;
    if order.driver_id.as_deref() != Some(driver_id) {
        return Err(DispatchError::InvalidArg(format!(
            "driver {driver_id} is not bound to order {order_id}"
        )));
    }
    if order.status != expected {
        return Err(DispatchError::InvalidTransition {
            from: order.status,
            to: expected,
        });
    }
    Ok(order)
}

pub(crate) async fn mark_arrived(
    ctx: &EngineCtx,
    order_id: &str,
    driver_id: &str,
) -> Result<(), DispatchError> {
    let mut order = load_bound_order(ctx, order_id, driver_id, OrderStatus::Accepted).await?;
    order.status = OrderStatus::Arrived;
    order.arrived_at = Some(ctx.clock.now());
    ctx.store.update_order(&order).await?;

    let mut update = RiderUpdate::new(order_id, DispatchStatus::Accepted, "your driver has arrived");
    update.status = Some(OrderStatus::Arrived);
    ctx.notify_rider(&order.rider_id, update).await;
    debug!(order_id, driver_id, "driver arrived");
    Ok(())
}

pub(crate) async fn start_trip(
    ctx: &EngineCtx,
    order_id: &str,
    driver_id: &str,
) -> Result<(), DispatchError> {
    let mut order = load_bound_order(ctx, order_id, driver_id, OrderStatus::Arrived).await?;
    order.status = OrderStatus::OnTrip;
    order.started_at = Some(ctx.clock.now());
    ctx.store.update_order(&order).await?;

    let mut update = RiderUpdate::new(order_id, DispatchStatus::Accepted, "trip started");
    update.status = Some(OrderStatus::OnTrip);
    ctx.notify_rider(&order.rider_id, update).await;
    debug!(order_id, driver_id, "trip started");
    Ok(())
}

pub(crate) async fn complete_trip(
    ctx: &EngineCtx,
    order_id: &str,
    driver_id: &str,
) -> Result<(), DispatchError> {
    let mut order = load_bound_order(ctx, order_id, driver_id, OrderStatus::OnTrip).await?;
    let now: DateTime<Utc> = ctx.clock.now();
    order.status = OrderStatus::Done;
    order.completed_at = Some(now);
    ctx.store.update_order(&order).await?;

    // Final fare carries the surge committed at admission.
    let surge = match ctx.store.zone_admission(order_id).await {
        Ok(Some(admission)) => admission.surge,
        Ok(None) => 1.0,
        Err(e) => {
            warn!(order_id, error = %e, "admission lookup failed at completion");
            1.0
        }
    };
    let fare = order.base_fare.map(|f| f * surge).unwrap_or(0.0);
    let date = ctx.clock.local_date(ctx.config.utc_offset_hours);
    if let Err(e) = ctx.store.record_trip_completion(driver_id, date, fare).await {
        warn!(order_id, driver_id, error = %e, "earnings accrual failed");
    }
    if let Err(e) = ctx.hotzone.mark_completed(order_id).await {
        warn!(order_id, error = %e, "quota completion mark failed");
    }

    let mut update = RiderUpdate::new(order_id, DispatchStatus::Accepted, "trip completed");
    update.status = Some(OrderStatus::Done);
    ctx.notify_rider(&order.rider_id, update).await;
    info!(order_id, driver_id, fare, "trip completed");
    Ok(())
}

/// Rider cancel for orders that already left dispatch (accepted or arrived,
/// but not yet on trip).
pub(crate) async fn cancel_after_accept(
    ctx: &EngineCtx,
    order_id: &str,
    rider_id: &str,
) -> Result<CancelOutcome, DispatchError> {
    let Some(mut order) = ctx.store.order(order_id).await? else {
        return Ok(CancelOutcome {
            ok: false,
            message: "order not found".into(),
        });
    };
    if order.rider_id != rider_id {
        return Ok(CancelOutcome {
            ok: false,
            message: "order belongs to another rider".into(),
        });
    }
    match order.status {
        OrderStatus::Accepted | OrderStatus::Arrived => {
            order.status = OrderStatus::Cancelled;
            order.cancelled_at = Some(ctx.clock.now());
            order.cancel_reason = Some(CancelReason::RiderCancelled);
            ctx.store.update_order(&order).await?;

            if let Some(driver_id) = &order.driver_id {
                if let Err(e) = ctx
                    .notifier
                    .order_cancelled(driver_id, order_id, "rider cancelled the ride")
                    .await
                {
                    debug!(driver_id = %driver_id, error = %e, "cancel notice undeliverable");
                }
            }
            match ctx.hotzone.release(order_id).await {
                Ok(Some(next_order)) => ctx.wake_queued(&next_order),
                Ok(None) => {}
                Err(e) => warn!(order_id, error = %e, "quota release failed"),
            }

            let mut update =
                RiderUpdate::new(order_id, DispatchStatus::Failed, "ride cancelled");
            update.status = Some(OrderStatus::Cancelled);
            update.cancel_reason = Some(CancelReason::RiderCancelled);
            ctx.notify_rider(&order.rider_id, update).await;
            info!(order_id, "accepted order cancelled by rider");
            Ok(CancelOutcome {
                ok: true,
                message: "ride cancelled".into(),
            })
        }
        OrderStatus::OnTrip => Ok(CancelOutcome {
            ok: false,
            message: "trip already started".into(),
        }),
        OrderStatus::Done | OrderStatus::Cancelled => Ok(CancelOutcome {
            ok: false,
            message: "order already finished".into(),
        }),
        _ => Ok(CancelOutcome {
            ok: false,
            message: "order is not in a cancellable state".into(),
        }),
    }
}
