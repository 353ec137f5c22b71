//! Shared harness for the integration tests: a full core over the in-memory
//! store, a recording notifier, and a manual clock pinned to noon.

#![allow(dead_code)]

use std::sync::Arc;

use dispatch_core::clock::{Clock, ManualClock};
use dispatch_core::config::DispatchConfig;
use dispatch_core::engine::{CreateOrderRequest, Dispatcher};
use dispatch_core::geo::Point;
use dispatch_core::runner::DispatchCore;
use dispatch_core::store::{MemoryStore, Store};
use dispatch_core::test_helpers::{
    driver_row, point_km_north, presence_entry, RecordingNotifier, TEST_CENTER,
};
use dispatch_core::types::{HotZoneConfig, PaymentKind, Place};

pub struct Harness {
    pub core: DispatchCore,
    pub dispatcher: Dispatcher,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

/// Build and start a core. The manual clock starts at 12:00 local (offset 0
/// in the test config).
pub fn start_core(config: DispatchConfig, zones: Vec<HotZoneConfig>) -> Harness {
    let config = config.with_utc_offset_hours(0);
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::at_hour(12));
    let core = DispatchCore::start(
        config,
        zones,
        store.clone(),
        notifier.clone(),
        None,
        clock.clone(),
    );
    let dispatcher = core.dispatcher();
    Harness {
        core,
        dispatcher,
        store,
        notifier,
        clock,
    }
}

impl Harness {
    /// Register a driver `km` kilometres north of the test center: a store
    /// row plus a fresh presence entry.
    pub fn add_driver(&self, driver_id: &str, km: f64) {
        self.add_driver_at(driver_id, point_km_north(TEST_CENTER, km));
    }

    pub fn add_driver_at(&self, driver_id: &str, position: Point) {
        self.store.seed_driver(driver_row(driver_id));
        self.core
            .presence()
            .put(presence_entry(driver_id, position, self.clock.now()));
    }

    pub fn request(&self, rider_id: &str) -> CreateOrderRequest {
        CreateOrderRequest {
            rider_id: rider_id.to_string(),
            pickup: Place {
                point: TEST_CENTER,
                addr: "Taipei Main Station".into(),
            },
            destination: Some(Place {
                point: point_km_north(TEST_CENTER, 5.0),
                addr: "Zhongshan District".into(),
            }),
            payment_kind: PaymentKind::Cash,
            base_fare: Some(250.0),
            call_origin: None,
        }
    }

    /// Pre-fill a zone's current hour so the next admission sees `used`
    /// slots taken.
    pub async fn fill_quota(&self, zone_id: &str, used: u32, limit: u32) {
        let date = self.clock.local_date(0);
        let hour = self.clock.local_hour(0);
        for _ in 0..used {
            assert!(self
                .store
                .try_consume_quota(zone_id, date, hour, limit)
                .await
                .unwrap());
        }
    }
}

/// Let spawned order tasks and the decision-log writer drain their ready
/// work. The sleep is instantaneous under paused time and a small real
/// delay on the multi-thread runtime.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
