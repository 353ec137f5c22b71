//! Post-accept lifecycle: arrival, trip start, completion, late cancel.

mod support;

use dispatch_core::clock::Clock;
use dispatch_core::engine::AcceptOutcome;
use dispatch_core::store::Store;
use dispatch_core::test_helpers::test_zone;
use dispatch_core::types::{CancelReason, OrderStatus};
use support::{settle, start_core};

async fn accepted_order(h: &support::Harness, rider: &str, driver: &str) -> String {
    let resp = h.dispatcher.create_order(h.request(rider)).await.unwrap();
    settle().await;
    assert_eq!(
        h.dispatcher.driver_accept(&resp.order_id, driver).await.unwrap(),
        AcceptOutcome::Accepted
    );
    settle().await;
    resp.order_id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_trip_accrues_earnings_and_completes_quota() {
    let h = start_core(Default::default(), vec![test_zone("z1")]);
    h.add_driver("d1", 1.0);
    let order_id = accepted_order(&h, "r1", "d1").await;

    h.dispatcher.mark_arrived(&order_id, "d1").await.unwrap();
    assert_eq!(
        h.store.order(&order_id).await.unwrap().unwrap().status,
        OrderStatus::Arrived
    );

    h.dispatcher.start_trip(&order_id, "d1").await.unwrap();
    assert_eq!(
        h.store.order(&order_id).await.unwrap().unwrap().status,
        OrderStatus::OnTrip
    );

    h.dispatcher.complete_trip(&order_id, "d1").await.unwrap();
    let order = h.store.order(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Done);
    assert!(order.completed_at.is_some());
    assert!(order.cancelled_at.is_none());

    // Earnings accrued at the committed fare; quota row shows a completion
    // while the slot stays used.
    let date = h.clock.local_date(0);
    assert!((h.store.daily_earnings_for("d1", date) - 250.0).abs() < 1e-9);
    let row = h.store.driver_row("d1").await.unwrap().unwrap();
    assert_eq!(row.today_trips, 5);
    let quota = h.store.quota("z1", date, h.clock.local_hour(0)).await.unwrap().unwrap();
    assert_eq!(quota.used, 1);
    assert_eq!(quota.completed, 1);

    h.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transitions_enforce_order_and_driver_binding() {
    let h = start_core(Default::default(), Vec::new());
    h.add_driver("d1", 1.0);
    let order_id = accepted_order(&h, "r1", "d1").await;

    // Cannot start before arriving; cannot complete before starting.
    assert!(h.dispatcher.start_trip(&order_id, "d1").await.is_err());
    assert!(h.dispatcher.complete_trip(&order_id, "d1").await.is_err());
    // Another driver cannot drive this order's lifecycle.
    assert!(h.dispatcher.mark_arrived(&order_id, "d2").await.is_err());

    h.dispatcher.mark_arrived(&order_id, "d1").await.unwrap();
    // Repeating a stage is rejected.
    assert!(h.dispatcher.mark_arrived(&order_id, "d1").await.is_err());

    h.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rider_cancel_after_accept_releases_slot_and_tells_driver() {
    let mut zone = test_zone("z1");
    zone.quota_normal = 1;
    let h = start_core(Default::default(), vec![zone]);
    h.add_driver("d1", 1.0);
    let order_id = accepted_order(&h, "r1", "d1").await;

    let outcome = h
        .dispatcher
        .cancel_order(&order_id, "r1", Some("found another ride"))
        .await
        .unwrap();
    assert!(outcome.ok);

    let order = h.store.order(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.cancel_reason, Some(CancelReason::RiderCancelled));
    assert!(order.completed_at.is_none());

    // The bound driver was told; the quota slot is free again.
    let cancels = h.notifier.cancellations();
    assert_eq!(cancels, vec![("d1".to_string(), order_id.clone())]);
    let quota = h
        .store
        .quota("z1", h.clock.local_date(0), h.clock.local_hour(0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(quota.used, 0);
    assert_eq!(quota.cancelled, 1);

    h.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_is_refused_once_the_trip_runs() {
    let h = start_core(Default::default(), Vec::new());
    h.add_driver("d1", 1.0);
    let order_id = accepted_order(&h, "r1", "d1").await;
    h.dispatcher.mark_arrived(&order_id, "d1").await.unwrap();
    h.dispatcher.start_trip(&order_id, "d1").await.unwrap();

    let outcome = h.dispatcher.cancel_order(&order_id, "r1", None).await.unwrap();
    assert!(!outcome.ok);
    assert_eq!(
        h.store.order(&order_id).await.unwrap().unwrap().status,
        OrderStatus::OnTrip
    );

    h.core.shutdown().await;
}
