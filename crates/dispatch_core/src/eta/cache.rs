//! In-process tier of the ETA cache.
//!
//! An LRU map keyed by the same five-tuple as the persistent table
//! (quantized origin, quantized destination, hour of day). Authoritative
//! within the process; the store table is authoritative across restarts.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::geo::QuantKey;
use crate::types::EtaCacheRow;

/// Cache key: the five quantized columns of the persistent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub origin: QuantKey,
    pub dest: QuantKey,
    pub hour: u8,
}

impl CacheKey {
    pub fn from_row(row: &EtaCacheRow) -> Self {
        Self {
            origin: QuantKey {
                lat_q: row.origin_lat_q,
                lng_q: row.origin_lng_q,
            },
            dest: QuantKey {
                lat_q: row.dest_lat_q,
                lng_q: row.dest_lng_q,
            },
            hour: row.hour_of_day,
        }
    }
}

pub struct MemoryEtaCache {
    entries: Mutex<LruCache<CacheKey, EtaCacheRow>>,
}

impl MemoryEtaCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("cache capacity must be > 0"),
            )),
        }
    }

    /// Fresh hit or nothing; expired entries are dropped on read.
    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<EtaCacheRow> {
        let mut entries = self.entries.lock().expect("eta cache poisoned");
        match entries.get(key) {
            Some(row) if row.expires_at > now => Some(row.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, row: EtaCacheRow) {
        let key = CacheKey::from_row(&row);
        self.entries.lock().expect("eta cache poisoned").put(key, row);
    }

    /// Drop every expired entry; returns how many were evicted.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().expect("eta cache poisoned");
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, row)| row.expires_at <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("eta cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
