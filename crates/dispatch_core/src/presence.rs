//! Presence registry: the live view of connected drivers.
//!
//! Owned by the socket collaborator, read by the scorer. Authoritative only
//! for "is this driver reachable right now and where" — long-term stats come
//! from the persistent driver row. The capability set is deliberately small:
//! put, drop, lookup, snapshot.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::geo::Point;
use crate::types::{Availability, DriverId};

/// Live record for one connected driver.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub driver_id: DriverId,
    pub position: Point,
    pub last_heartbeat: DateTime<Utc>,
    pub availability: Availability,
}

/// Concurrent driver presence map. Writes come from the socket layer;
/// dispatch holds only read access through [`snapshot`](Self::snapshot) and
/// [`lookup`](Self::lookup).
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<DriverId, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a driver's live record.
    pub fn put(&self, entry: PresenceEntry) {
        let mut entries = self.entries.write().expect("presence lock poisoned");
        entries.insert(entry.driver_id.clone(), entry);
    }

    /// Remove a driver on disconnect. Atomic with respect to lookups: an
    /// in-flight offer either sees the entry or it doesn't.
    pub fn drop_driver(&self, driver_id: &str) -> Option<PresenceEntry> {
        let mut entries = self.entries.write().expect("presence lock poisoned");
        entries.remove(driver_id)
    }

    pub fn lookup(&self, driver_id: &str) -> Option<PresenceEntry> {
        let entries = self.entries.read().expect("presence lock poisoned");
        entries.get(driver_id).cloned()
    }

    /// Point-in-time copy of every entry, the scorer's candidate source.
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let entries = self.entries.read().expect("presence lock poisoned");
        entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("presence lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
