//! Road-network provider.
//!
//! Owns a directed, weighted multigraph of a metropolitan region. Offers
//! node-nearest-to-coordinate lookup, shortest travel-time path, and a
//! bulk travel-time matrix. Preloads one large bounding-box graph at
//! startup; falls back to on-demand smaller graphs for points outside it.

mod graph;

pub use graph::{BoundingBox, RoadEdge, RoadGraph, RoadNode};

use crate::model::Coordinate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};

/// A travel time result. `approximate` is set when no path could be found
/// and the provider fell back to a great-circle estimate (spec.md §4.1);
/// callers must not cache an approximate result as ground truth.
#[derive(Debug, Clone, Copy)]
pub struct TravelTime {
    pub minutes: f64,
    pub approximate: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkStatus {
    pub preloaded: bool,
    pub on_demand_graphs_cached: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BboxKey(i64, i64, i64, i64);

impl BboxKey {
    fn quantize(bbox: &BoundingBox) -> Self {
        // 1e-4 degree ~= 11m; plenty of precision to dedupe concurrent
        // requests for "the same" on-demand area without floating point
        // equality headaches.
        let q = |v: f64| (v * 10_000.0).round() as i64;
        BboxKey(q(bbox.north), q(bbox.south), q(bbox.east), q(bbox.west))
    }
}

/// Road-network provider: the preloaded primary graph plus a single-flight
/// cache of on-demand graphs for out-of-coverage points.
pub struct RoadNetworkProvider {
    default_speed_kph: f64,
    default_search_radius_m: f64,
    preloaded: RwLock<Option<Arc<RoadGraph>>>,
    on_demand: Mutex<HashMap<BboxKey, Arc<OnceCell<Arc<RoadGraph>>>>>,
}

impl RoadNetworkProvider {
    pub fn new(default_speed_kph: f64, default_search_radius_m: f64) -> Self {
        RoadNetworkProvider {
            default_speed_kph,
            default_search_radius_m,
            preloaded: RwLock::new(None),
            on_demand: Mutex::new(HashMap::new()),
        }
    }

    /// Constructs and retains a drive-network graph spanning `bbox`.
    /// Idempotent: calling it again just replaces the preloaded graph.
    /// Network failure during this step is non-fatal — the provider
    /// degrades to on-demand mode, matching the teacher's graph-load
    /// failure handling in `main.rs` (`Starting with empty graph`).
    pub async fn preload(&self, bbox: BoundingBox) {
        match fetch_graph_for_bbox(bbox, self.default_speed_kph).await {
            Ok(g) => {
                *self.preloaded.write().await = Some(Arc::new(g));
                tracing::info!(?bbox, "road network preloaded");
            }
            Err(e) => {
                tracing::warn!(?bbox, error = %e, "road network preload failed, degrading to on-demand mode");
            }
        }
    }

    /// Returns the preloaded graph if `center` lies within its bbox;
    /// otherwise constructs (and caches) a smaller on-demand graph. Uses a
    /// single-flight per bbox so concurrent requests for the same area
    /// coalesce into one fetch (spec.md §5).
    pub async fn graph_for_area(&self, center: Coordinate, radius_m: f64) -> Arc<RoadGraph> {
        if let Some(g) = self.preloaded.read().await.as_ref() {
            if g.bbox.contains(&center) {
                return Arc::clone(g);
            }
        }

        let bbox = bbox_around(center, radius_m);
        let key = BboxKey::quantize(&bbox);

        let cell = {
            let mut map = self.on_demand.lock().await;
            Arc::clone(map.entry(key).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        cell.get_or_init(|| async {
            match fetch_graph_for_bbox(bbox, self.default_speed_kph).await {
                Ok(g) => Arc::new(g),
                Err(e) => {
                    tracing::warn!(?bbox, error = %e, "on-demand graph fetch failed, using empty graph");
                    Arc::new(RoadGraph::new(bbox, self.default_speed_kph))
                }
            }
        })
        .await
        .clone()
    }

    /// Travel time in minutes between two coordinates. On failure (no path,
    /// or either endpoint outside coverage) falls back to a great-circle
    /// estimate at `DEFAULT_AVG_SPEED_KPH` and flags the result as
    /// approximate; this is not an error at the API boundary.
    pub async fn travel_time(&self, from: Coordinate, to: Coordinate) -> TravelTime {
        let graph = self.graph_for_area(from, self.default_search_radius_m).await;

        let path_result = graph
            .nearest_node(&from)
            .zip(graph.nearest_node(&to))
            .and_then(|(a, b)| graph.shortest_travel_time_min(a, b));

        match path_result {
            Some(minutes) => TravelTime {
                minutes,
                approximate: false,
            },
            None => TravelTime {
                minutes: great_circle_fallback_min(from, to, self.default_speed_kph),
                approximate: true,
            },
        }
    }

    /// Snapshot of the provider's cache state, for the network-status
    /// admin call.
    pub async fn status(&self) -> NetworkStatus {
        NetworkStatus {
            preloaded: self.preloaded.read().await.is_some(),
            on_demand_graphs_cached: self.on_demand.lock().await.len(),
        }
    }

    /// Bulk travel-time matrix, one row per origin.
    pub async fn travel_time_matrix(
        &self,
        origins: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Vec<Vec<TravelTime>> {
        let mut matrix = Vec::with_capacity(origins.len());
        for &o in origins {
            let mut row = Vec::with_capacity(destinations.len());
            for &d in destinations {
                row.push(self.travel_time(o, d).await);
            }
            matrix.push(row);
        }
        matrix
    }
}

fn great_circle_fallback_min(from: Coordinate, to: Coordinate, avg_speed_kph: f64) -> f64 {
    let km = from.great_circle_km(&to);
    (km / avg_speed_kph.max(1.0)) * 60.0
}

fn bbox_around(center: Coordinate, radius_m: f64) -> BoundingBox {
    // ~111_320 m per degree of latitude; longitude degrees shrink with
    // cos(lat). Good enough for carving an on-demand fetch window.
    let dlat = radius_m / 111_320.0;
    let dlon = radius_m / (111_320.0 * center.lat.to_radians().cos().abs().max(0.01));
    BoundingBox {
        north: (center.lat + dlat).min(90.0),
        south: (center.lat - dlat).max(-90.0),
        east: (center.lon + dlon).min(180.0),
        west: (center.lon - dlon).max(-180.0),
    }
}

/// Fetches (or in a real deployment, loads from the graph store) the road
/// network spanning `bbox`. Grounded on the teacher's
/// `db::load_graph_from_surrealdb`: a remote fetch that can fail and whose
/// failure the caller treats as non-fatal. This stub returns an empty,
/// valid graph — it is the integration seam a real deployment wires up to
/// an OSM extract or a graph database; see DESIGN.md.
async fn fetch_graph_for_bbox(bbox: BoundingBox, default_speed_kph: f64) -> anyhow::Result<RoadGraph> {
    Ok(RoadGraph::new(bbox, default_speed_kph))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_graph_falls_back_to_great_circle() {
        let provider = RoadNetworkProvider::new(30.0, 5000.0);
        let a = Coordinate::new(-34.60, -58.38).unwrap();
        let b = Coordinate::new(-34.59, -58.37).unwrap();

        let tt = provider.travel_time(a, b).await;
        assert!(tt.approximate);
        assert!(tt.minutes > 0.0);
    }

    #[tokio::test]
    async fn concurrent_on_demand_requests_for_same_area_coalesce() {
        let provider = Arc::new(RoadNetworkProvider::new(30.0, 5000.0));
        let center = Coordinate::new(-34.60, -58.38).unwrap();

        let mut handles = vec![];
        for _ in 0..8 {
            let p = Arc::clone(&provider);
            handles.push(tokio::spawn(async move {
                p.graph_for_area(center, 5000.0).await
            }));
        }
        let results: Vec<_> = futures_join_all(handles).await;
        let first = &results[0];
        assert!(results.iter().all(|g| Arc::ptr_eq(g, first)));
    }

    // Minimal join-all without pulling in the `futures` crate for one test.
    async fn futures_join_all(
        handles: Vec<tokio::task::JoinHandle<Arc<RoadGraph>>>,
    ) -> Vec<Arc<RoadGraph>> {
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            out.push(h.await.unwrap());
        }
        out
    }
}
