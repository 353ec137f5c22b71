//! The learning loop around dispatch: outcome samples, profile refresh, and
//! decision-log rejection rows.

mod support;

use dispatch_core::clock::Clock;
use dispatch_core::engine::AcceptOutcome;
use dispatch_core::store::Store;
use dispatch_core::types::RejectReasonCode;
use support::{settle, start_core};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepts_and_rejects_become_outcome_samples() {
    let h = start_core(Default::default(), Vec::new());
    h.add_driver("d1", 1.0);
    h.add_driver("d2", 2.0);

    let resp = h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    h.dispatcher
        .driver_reject(&resp.order_id, "d2", RejectReasonCode::LowFare)
        .await
        .unwrap();
    assert_eq!(
        h.dispatcher.driver_accept(&resp.order_id, "d1").await.unwrap(),
        AcceptOutcome::Accepted
    );
    settle().await;

    let outcomes = h.store.outcome_rows();
    assert_eq!(outcomes.len(), 2);
    let rejected = outcomes.iter().find(|o| o.driver_id == "d2").unwrap();
    assert!(!rejected.accepted);
    assert!(rejected.distance_to_pickup_km > 1.5);
    let accepted = outcomes.iter().find(|o| o.driver_id == "d1").unwrap();
    assert!(accepted.accepted);
    assert_eq!(accepted.order_id, resp.order_id);

    // The rejection row carries the offer context.
    let rejections = h.store.rejection_rows();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].driver_id, "d2");
    assert_eq!(rejections[0].reason_code, RejectReasonCode::LowFare);
    assert_eq!(rejections[0].estimated_fare, Some(250.0));

    // The profile worker picked up the rejecter.
    let profile = h.store.profile("d2").await.unwrap();
    assert!(profile.is_some());
    assert_eq!(profile.unwrap().sample_size, 1);

    h.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trained_model_takes_over_from_rules() {
    let h = start_core(Default::default(), Vec::new());
    let predictor = h.core.predictor();
    assert!(!predictor.has_model());

    // Not enough history yet.
    match predictor.train().await.unwrap() {
        dispatch_core::predict::TrainOutcome::NotEnoughSamples { have } => assert_eq!(have, 0),
        other => panic!("expected NotEnoughSamples, got {other:?}"),
    }

    // Synthesize a month of outcomes straight into the store.
    for i in 0..200 {
        let sample = dispatch_core::types::OutcomeSample {
            driver_id: format!("d{}", i % 10),
            order_id: format!("o{i}"),
            accepted: i % 3 != 0,
            distance_to_pickup_km: if i % 3 == 0 { 12.0 } else { 2.0 },
            trip_distance_km: 5.0,
            estimated_fare: 250.0,
            hour_of_day: (i % 24) as u8,
            day_of_week: (i % 7) as u8,
            is_holiday: false,
            driver_today_earnings: 2_000.0,
            driver_today_trips: 4,
            driver_online_hours: 5.0,
            driver_acceptance_rate: 85.0,
            zone_id: None,
            created_at: h.clock.now(),
        };
        h.store.insert_outcome(&sample).await.unwrap();
    }

    match predictor.train().await.unwrap() {
        dispatch_core::predict::TrainOutcome::Trained { samples, .. } => {
            assert_eq!(samples, 200)
        }
        other => panic!("expected Trained, got {other:?}"),
    }
    assert!(predictor.has_model());

    h.core.shutdown().await;
}
