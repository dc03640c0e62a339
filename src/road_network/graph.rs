//! The directed, weighted multigraph backing one bounding box of coverage.

use crate::model::Coordinate;
use pathfinding::directed::dijkstra::dijkstra;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn contains(&self, c: &Coordinate) -> bool {
        c.lat <= self.north && c.lat >= self.south && c.lon <= self.east && c.lon >= self.west
    }
}

#[derive(Debug, Clone)]
pub struct RoadNode {
    pub osm_id: String,
    pub location: Coordinate,
}

#[derive(Debug, Clone)]
pub struct RoadEdge {
    pub length_m: f64,
    pub speed_limit_kph: Option<f64>,
}

impl RoadEdge {
    /// Travel time along this one edge, in minutes.
    pub fn travel_time_min(&self, default_speed_kph: f64) -> f64 {
        let speed = self.speed_limit_kph.unwrap_or(default_speed_kph).max(1.0);
        (self.length_m / 1000.0) / speed * 60.0
    }
}

/// One directed, weighted road graph, covering a single bounding box.
/// One-way streets fall out naturally from `DiGraph` holding only the
/// traversable direction's edge; turn restrictions are modeled as a set of
/// disallowed `(incoming_edge, outgoing_edge)` pairs at a node.
pub struct RoadGraph {
    pub bbox: BoundingBox,
    graph: DiGraph<RoadNode, RoadEdge>,
    node_index: HashMap<String, NodeIndex>,
    turn_restrictions: std::collections::HashSet<(EdgeIndex, EdgeIndex)>,
    default_speed_kph: f64,
}

impl RoadGraph {
    pub fn new(bbox: BoundingBox, default_speed_kph: f64) -> Self {
        RoadGraph {
            bbox,
            graph: DiGraph::new(),
            node_index: HashMap::new(),
            turn_restrictions: std::collections::HashSet::new(),
            default_speed_kph,
        }
    }

    pub fn add_node(&mut self, node: RoadNode) -> NodeIndex {
        let id = node.osm_id.clone();
        let idx = self.graph.add_node(node);
        self.node_index.insert(id, idx);
        idx
    }

    pub fn add_edge(&mut self, from: &str, to: &str, edge: RoadEdge) -> Option<EdgeIndex> {
        let from_idx = *self.node_index.get(from)?;
        let to_idx = *self.node_index.get(to)?;
        Some(self.graph.add_edge(from_idx, to_idx, edge))
    }

    pub fn forbid_turn(&mut self, via_in: EdgeIndex, via_out: EdgeIndex) {
        self.turn_restrictions.insert((via_in, via_out));
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Nearest node to a coordinate by planar (not great-circle) distance —
    /// sufficient at city scale and far cheaper than projecting properly.
    pub fn nearest_node(&self, c: &Coordinate) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .min_by(|&a, &b| {
                let da = planar_dist2(&self.graph[a].location, c);
                let db = planar_dist2(&self.graph[b].location, c);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Shortest travel time in minutes between two nodes, honoring any turn
    /// restrictions. Search state is `(node, last_edge)` when restrictions
    /// exist so a forbidden turn can be excluded as a successor; with no
    /// restrictions this degenerates to plain per-node Dijkstra.
    pub fn shortest_travel_time_min(&self, from: NodeIndex, to: NodeIndex) -> Option<f64> {
        if from == to {
            return Some(0.0);
        }

        let start = (from, None::<EdgeIndex>);
        let result = dijkstra(
            &start,
            |&(node, last_edge)| {
                self.graph
                    .edges(node)
                    .filter(|e| {
                        last_edge
                            .map(|le| !self.turn_restrictions.contains(&(le, e.id())))
                            .unwrap_or(true)
                    })
                    .map(|e| {
                        let cost_micros =
                            (e.weight().travel_time_min(self.default_speed_kph) * 1_000_000.0)
                                .round() as u64;
                        ((e.target(), Some(e.id())), cost_micros)
                    })
                    .collect::<Vec<_>>()
            },
            |&(node, _)| node == to,
        );

        result.map(|(_, cost_micros)| cost_micros as f64 / 1_000_000.0)
    }

    pub fn node_location(&self, idx: NodeIndex) -> Coordinate {
        self.graph[idx].location
    }
}

fn planar_dist2(a: &Coordinate, b: &Coordinate) -> f64 {
    let dlat = a.lat - b.lat;
    let dlon = a.lon - b.lon;
    dlat * dlat + dlon * dlon
}
