//! Tiered escalation: rejects trigger the next batch immediately, bounded by
//! the round limit.

mod support;

use dispatch_core::store::Store;
use dispatch_core::types::{CancelReason, OrderStatus, RejectReasonCode};
use support::{settle, start_core};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejects_escalate_without_waiting_for_the_timer() {
    let h = start_core(Default::default(), Vec::new());
    for i in 0..10 {
        h.add_driver(&format!("d{i}"), 1.0 + i as f64 * 0.5);
    }

    let resp = h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    let first_batch: Vec<String> = h.notifier.offers().iter().map(|(d, _)| d.clone()).collect();
    assert_eq!(first_batch.len(), 3);

    // Two rejects keep the batch open; the third closes it and re-dispatches
    // immediately (no timer involved).
    for (i, driver) in first_batch.iter().enumerate() {
        let outcome = h
            .dispatcher
            .driver_reject(&resp.order_id, driver, RejectReasonCode::TooFar)
            .await
            .unwrap();
        assert!(outcome.ok);
        if i < 2 {
            assert!(!outcome.re_dispatched);
        } else {
            assert!(outcome.re_dispatched);
            assert_eq!(outcome.next_batch, Some(2));
        }
    }
    settle().await;

    // Second batch excludes every rejecter.
    let offers = h.notifier.offers();
    assert_eq!(offers.len(), 6);
    let second_batch: Vec<String> = offers[3..].iter().map(|(d, _)| d.clone()).collect();
    for driver in &first_batch {
        assert!(!second_batch.contains(driver), "{driver} was re-offered");
    }
    assert!(offers[3..].iter().all(|(_, o)| o.batch_number == 2));

    h.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn everyone_rejecting_cancels_with_all_rejected() {
    let h = start_core(Default::default(), Vec::new());
    for i in 0..5 {
        h.add_driver(&format!("d{i}"), 1.0 + i as f64 * 0.5);
    }

    let resp = h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    // Reject every offer as it comes: a batch of 3, then the remaining 2,
    // then nobody is left. Re-rejects are no-ops, so blanket rejection of
    // everything offered so far is safe.
    for _ in 0..4 {
        let order = h.store.order(&resp.order_id).await.unwrap().unwrap();
        if order.status != OrderStatus::Dispatching {
            break;
        }
        for (driver, _) in h.notifier.offers() {
            h.dispatcher
                .driver_reject(&resp.order_id, &driver, RejectReasonCode::LowFare)
                .await
                .unwrap();
        }
        settle().await;
    }

    let order = h.store.order(&resp.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.cancel_reason, Some(CancelReason::AllRejected));

    // Invariant: reject_count equals the rejection rows linked to the order.
    let rejections = h.store.rejection_count(&resp.order_id).await.unwrap();
    assert_eq!(order.reject_count, rejections);
    assert_eq!(rejections, 5);

    h.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn round_limit_cancels_with_max_batches() {
    let h = start_core(Default::default(), Vec::new());
    // Enough drivers that five full batches never run dry.
    for i in 0..20 {
        h.add_driver(&format!("d{i}"), 1.0 + i as f64 * 0.3);
    }

    let resp = h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    for round in 1..=5 {
        let offers = h.notifier.offers();
        let batch: Vec<String> = offers
            .iter()
            .filter(|(_, o)| o.batch_number == round)
            .map(|(d, _)| d.clone())
            .collect();
        assert_eq!(batch.len(), 3, "round {round} should offer 3 drivers");
        for driver in &batch {
            h.dispatcher
                .driver_reject(&resp.order_id, driver, RejectReasonCode::OffDuty)
                .await
                .unwrap();
        }
        settle().await;
    }

    let order = h.store.order(&resp.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.cancel_reason, Some(CancelReason::MaxBatches));
    assert_eq!(order.reject_count, 15);
    assert_eq!(h.store.rejection_count(&resp.order_id).await.unwrap(), 15);

    // One decision-log row per executed batch, none stamped with an accept.
    let logs = h.store.dispatch_logs(&resp.order_id).await.unwrap();
    assert_eq!(logs.len(), 5);
    assert!(logs.iter().all(|l| l.accepted_by.is_none()));

    h.core.shutdown().await;
}
