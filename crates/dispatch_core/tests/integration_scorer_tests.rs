//! Ranking behavior observed through the offer stream: ordering, candidate
//! filtering, and presence freshness.

mod support;

use chrono::Duration;
use dispatch_core::clock::Clock;
use dispatch_core::test_helpers::{driver_row, point_km_north, presence_entry, TEST_CENTER};
use dispatch_core::types::{Availability, DriverClass};
use support::{settle, start_core};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closer_drivers_lead_the_batch() {
    let h = start_core(Default::default(), Vec::new());
    h.add_driver("near", 0.5);
    h.add_driver("mid", 2.0);
    h.add_driver("far", 6.0);
    h.add_driver("farther", 8.0);

    h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    let offers = h.notifier.offers();
    assert_eq!(offers.len(), 3);
    assert_eq!(offers[0].0, "near");
    assert_eq!(offers[1].0, "mid");
    assert_eq!(offers[2].0, "far");
    // The fourth driver waits for a later round.
    assert!(offers.iter().all(|(d, _)| d != "farther"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unavailable_stale_and_unknown_drivers_are_skipped() {
    let h = start_core(Default::default(), Vec::new());
    let now = h.clock.now();

    // Eligible.
    h.add_driver("ok", 1.0);
    // On a trip: ineligible.
    h.store.seed_driver(driver_row("busy"));
    let mut busy = presence_entry("busy", point_km_north(TEST_CENTER, 1.0), now);
    busy.availability = Availability::OnTrip;
    h.core.presence().put(busy);
    // Resting: still eligible.
    h.store.seed_driver(driver_row("resting"));
    let mut resting = presence_entry("resting", point_km_north(TEST_CENTER, 1.5), now);
    resting.availability = Availability::Rest;
    h.core.presence().put(resting);
    // Heartbeat too old.
    h.store.seed_driver(driver_row("stale"));
    h.core.presence().put(presence_entry(
        "stale",
        point_km_north(TEST_CENTER, 1.0),
        now - Duration::minutes(5),
    ));
    // Connected but no persistent row.
    h.core
        .presence()
        .put(presence_entry("ghost", point_km_north(TEST_CENTER, 0.2), now));

    h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    let mut offered: Vec<String> = h.notifier.offers().into_iter().map(|(d, _)| d).collect();
    offered.sort();
    assert_eq!(offered, vec!["ok".to_string(), "resting".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn likely_rejecters_are_filtered_out() {
    let h = start_core(Default::default(), Vec::new());
    h.add_driver("good", 2.0);

    // Saturated, fatigued, low-acceptance driver very far out: the rule
    // stack puts P(reject) past the 0.70 cut.
    let mut row = driver_row("hopeless");
    row.acceptance_rate_pct = 55.0;
    row.today_earnings = 7_500.0;
    row.online_hours_today = 12.0;
    h.store.seed_driver(row);
    h.core.presence().put(presence_entry(
        "hopeless",
        point_km_north(TEST_CENTER, 9.0),
        h.clock.now(),
    ));

    h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    let offered: Vec<String> = h.notifier.offers().into_iter().map(|(d, _)| d).collect();
    assert_eq!(offered, vec!["good".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn efficiency_match_breaks_near_ties() {
    let h = start_core(Default::default(), Vec::new());
    // Same spot, same stats; only the class differs. The request's ~5 km
    // trip is a medium trip, which suits a high-volume driver.
    let mut long_hauler = driver_row("hauler");
    long_hauler.driver_class = DriverClass::LongDistance;
    h.store.seed_driver(long_hauler);
    h.core.presence().put(presence_entry(
        "hauler",
        point_km_north(TEST_CENTER, 1.0),
        h.clock.now(),
    ));
    let mut volume = driver_row("volume");
    volume.driver_class = DriverClass::HighVolume;
    h.store.seed_driver(volume);
    h.core.presence().put(presence_entry(
        "volume",
        point_km_north(TEST_CENTER, 1.0),
        h.clock.now(),
    ));

    h.dispatcher.create_order(h.request("r1")).await.unwrap();
    settle().await;

    let offers = h.notifier.offers();
    assert_eq!(offers.len(), 2);
    assert_eq!(offers[0].0, "volume");
}
