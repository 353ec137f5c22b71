//! Road-network providers: trait abstraction for the paid ETA backend.
//!
//! Two implementations:
//!
//! - **`HttpRoadApi`** (feature `road-api`): calls the external road-network
//!   HTTP endpoint with a distance-matrix request.
//! - **`StaticRoadApi`**: serves a fixed in-memory table; used by tests and
//!   by hosts that precompute their matrices.
//!
//! Any per-pair failure is reported as `None` in the result row so the oracle
//! can fall back to estimation element-wise.

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::geo::{Point, QuantKey};

/// One road-network answer for an (origin, destination) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoadEta {
    pub distance_m: u32,
    pub duration_s: u32,
}

/// Road-network backend. One call may carry many origins against a single
/// destination; the result has one slot per origin, `None` where the
/// provider had no answer for that pair.
#[async_trait]
pub trait RoadApi: Send + Sync {
    async fn route_matrix(
        &self,
        origins: &[Point],
        dest: Point,
    ) -> Result<Vec<Option<RoadEta>>, DispatchError>;
}

// ---------------------------------------------------------------------------
// HTTP provider (behind `road-api` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "road-api")]
pub mod http {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    /// Calls a distance-matrix HTTP endpoint.
    pub struct HttpRoadApi {
        client: reqwest::Client,
        endpoint: String,
    }

    impl HttpRoadApi {
        pub fn new(endpoint: &str) -> Result<Self, DispatchError> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .map_err(|e| DispatchError::Provider(e.to_string()))?;
            Ok(Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            })
        }
    }

    #[derive(Serialize)]
    struct MatrixRequest<'a> {
        origins: &'a [Point],
        destinations: Vec<Point>,
    }

    /// Minimal response structures; anything non-"OK" per pair is a miss.
    #[derive(Deserialize)]
    struct MatrixResponse {
        rows: Vec<MatrixRow>,
    }

    #[derive(Deserialize)]
    struct MatrixRow {
        elements: Vec<MatrixElement>,
    }

    #[derive(Deserialize)]
    struct MatrixElement {
        status: String,
        distance_m: Option<u32>,
        duration_s: Option<u32>,
    }

    #[async_trait]
    impl RoadApi for HttpRoadApi {
        async fn route_matrix(
            &self,
            origins: &[Point],
            dest: Point,
        ) -> Result<Vec<Option<RoadEta>>, DispatchError> {
            let url = format!("{}/matrix/v1/driving", self.endpoint);
            let body = MatrixRequest {
                origins,
                destinations: vec![dest],
            };
            let resp: MatrixResponse = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| DispatchError::Provider(e.to_string()))?
                .json()
                .await
                .map_err(|e| DispatchError::Provider(e.to_string()))?;

            let mut out = Vec::with_capacity(origins.len());
            for row in resp.rows.into_iter().take(origins.len()) {
                let eta = row.elements.first().and_then(|el| {
                    if el.status == "OK" {
                        Some(RoadEta {
                            distance_m: el.distance_m?,
                            duration_s: el.duration_s?,
                        })
                    } else {
                        None
                    }
                });
                out.push(eta);
            }
            // Short responses leave the tail as misses.
            out.resize(origins.len(), None);
            Ok(out)
        }
    }
}

// ---------------------------------------------------------------------------
// Static table provider
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Serves routes from a fixed table keyed by quantized coordinates. Pairs
/// missing from the table are reported as misses; `set_failing(true)` makes
/// every call error, which is how tests exercise the degradation paths.
#[derive(Debug, Default)]
pub struct StaticRoadApi {
    table: Mutex<HashMap<(QuantKey, QuantKey), RoadEta>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticRoadApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, origin: Point, dest: Point, eta: RoadEta) {
        let key = (QuantKey::from_point(origin), QuantKey::from_point(dest));
        self.table.lock().expect("road table poisoned").insert(key, eta);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `route_matrix` calls issued (one per batch chunk).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoadApi for StaticRoadApi {
    async fn route_matrix(
        &self,
        origins: &[Point],
        dest: Point,
    ) -> Result<Vec<Option<RoadEta>>, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Provider("static provider failing".into()));
        }
        let table = self.table.lock().expect("road table poisoned");
        let dest_key = QuantKey::from_point(dest);
        Ok(origins
            .iter()
            .map(|origin| {
                table
                    .get(&(QuantKey::from_point(*origin), dest_key))
                    .copied()
            })
            .collect())
    }
}
