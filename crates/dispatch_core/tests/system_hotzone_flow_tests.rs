//! Hot-zone admission through the full engine: surge pricing on the way in,
//! queue overflow, and release on cancel.

mod support;

use dispatch_core::engine::AcceptOutcome;
use dispatch_core::notify::DispatchStatus;
use dispatch_core::store::Store;
use dispatch_core::test_helpers::test_zone;
use dispatch_core::types::{OrderStatus, QueueEntryStatus};
use support::{settle, start_core};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn surge_multiplier_rides_on_offers_and_fares() {
    let mut zone = test_zone("z1");
    zone.quota_normal = 10;
    let h = start_core(Default::default(), vec![zone]);
    h.add_driver("d1", 1.0);
    h.fill_quota("z1", 8, 10).await;

    let resp = h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    // u = 0.8 exactly: one surge step.
    let hint = resp.hot_zone.expect("zone admission");
    assert!((hint.surge - 1.10).abs() < 1e-9);

    let offers = h.notifier.offers();
    assert_eq!(offers.len(), 1);
    let offer = &offers[0].1;
    assert_eq!(offer.base_fare, Some(250.0));
    assert!((offer.final_fare.unwrap() - 275.0).abs() < 1e-9);
    assert!((offer.hot_zone.as_ref().unwrap().surge - 1.10).abs() < 1e-9);

    // The next admission (9 used) pays two steps.
    let resp2 = h.dispatcher.create_order(h.request("r2")).await.unwrap();
    settle().await;
    let hint2 = resp2.hot_zone.expect("zone admission");
    assert!((hint2.surge - 1.20).abs() < 1e-9);

    h.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_zone_queues_and_release_wakes_the_head() {
    let mut zone = test_zone("z1");
    zone.quota_normal = 1;
    let h = start_core(Default::default(), vec![zone]);
    h.add_driver("d1", 1.0);
    h.add_driver("d2", 2.0);

    // First order takes the only slot and gets accepted.
    let first = h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;
    assert_eq!(
        h.dispatcher.driver_accept(&first.order_id, "d1").await.unwrap(),
        AcceptOutcome::Accepted
    );
    settle().await;

    // Second order finds the hour full and queues at position 1.
    let second = h.dispatcher.create_order(h.request("r2")).await.unwrap();
    settle().await;
    assert_eq!(second.status, OrderStatus::Queued);
    assert_eq!(second.dispatch_status, DispatchStatus::Queued);
    assert_eq!(second.queue_position, Some(1));
    assert_eq!(second.estimated_wait_min, Some(3));
    let update = h.notifier.last_rider_update("r2").unwrap();
    assert_eq!(update.dispatch_status, DispatchStatus::Queued);
    assert_eq!(update.queue_position, Some(1));
    // No offers for a queued order.
    let offers_to_r2: Vec<_> = h
        .notifier
        .offers()
        .into_iter()
        .filter(|(_, o)| o.order_id == second.order_id)
        .collect();
    assert!(offers_to_r2.is_empty());

    // The accepted order is cancelled: slot released, head woken straight
    // into dispatch.
    let cancel = h
        .dispatcher
        .cancel_order(&first.order_id, "r1", Some("change of plans"))
        .await
        .unwrap();
    assert!(cancel.ok);
    settle().await;

    let entry = h.store.queue_entry_by_order(&second.order_id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueEntryStatus::Released);
    let order = h.store.order(&second.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Dispatching);

    // An offer batch went out for the released order.
    let offers_to_r2: Vec<_> = h
        .notifier
        .offers()
        .into_iter()
        .filter(|(_, o)| o.order_id == second.order_id)
        .collect();
    assert!(!offers_to_r2.is_empty());
    let searching = h.notifier.last_rider_update("r2").unwrap();
    assert_eq!(searching.dispatch_status, DispatchStatus::Searching);

    h.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_slot_two_orders_loser_queues() {
    let mut zone = test_zone("z1");
    zone.quota_normal = 1;
    let h = start_core(Default::default(), vec![zone]);
    h.add_driver("d1", 1.0);
    h.add_driver("d2", 2.0);

    let a = h.dispatcher.create_order(h.request("ra")).await.unwrap();
    let b = h.dispatcher.create_order(h.request("rb")).await.unwrap();
    settle().await;

    let statuses = [a.status, b.status];
    assert!(statuses.contains(&OrderStatus::Dispatching));
    assert!(statuses.contains(&OrderStatus::Queued));

    h.core.shutdown().await;
}
