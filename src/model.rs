//! Core data model.
//!
//! Every entity here is constructed fresh per request, flows through the
//! evaluation pipeline, and is discarded when the response is written. None
//! of it is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `(lat, lon)` in decimal degrees. Immutable value type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            Some(Coordinate { lat, lon })
        } else {
            None
        }
    }

    /// Great-circle distance in kilometers (haversine formula).
    pub fn great_circle_km(&self, other: &Coordinate) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_KM * c
    }

    /// Bearing in degrees [0, 360) from `self` to `other`.
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        (y.atan2(x).to_degrees() + 360.0) % 360.0
    }
}

/// Structured delivery address. `number` is distinct from `street`: street
/// carries no trailing numeric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: Option<String>,
    pub corner_1: Option<String>,
    pub corner_2: Option<String>,
    pub city: String,
    pub country: String,
    pub postal_code: Option<String>,
    pub coordinate: Option<Coordinate>,
}

impl Address {
    /// An address is resolvable if it already carries a coordinate or has
    /// enough textual fields for the geocoder to plausibly resolve one.
    pub fn is_resolvable(&self) -> bool {
        self.coordinate.is_some() || (!self.street.is_empty() && !self.city.is_empty())
    }
}

/// The two ways a caller may describe a delivery location, recast from the
/// source's dynamically-typed address field into a sum type (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressInput {
    FreeText(String),
    Structured(Address),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Urgency bump applied to the scorer's urgency sub-score (spec.md §4.3).
    pub fn score_bump(&self) -> f64 {
        match self {
            Priority::Low | Priority::Normal => 0.0,
            Priority::High => 0.05,
            Priority::Urgent => 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Assigned,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub address: Address,
    pub deadline: DateTime<Utc>,
    pub priority: Priority,
    pub weight_kg: f64,
    pub estimated_duration_min: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_pending")]
    pub state: OrderState,
}

fn default_pending() -> OrderState {
    OrderState::Pending
}

impl Order {
    /// `deadline > created_at` is the one structural invariant on an order.
    pub fn is_well_formed(&self) -> bool {
        self.deadline > self.created_at && self.weight_kg >= 0.0 && self.estimated_duration_min >= 0.0
    }
}

fn default_performance_score() -> f64 {
    0.70
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: String,
    pub driver_name: String,
    pub location: Coordinate,
    pub capacity: u32,
    pub max_weight_kg: f64,
    #[serde(default = "default_performance_score")]
    pub performance_score: f64,
    #[serde(default)]
    pub current_orders: Vec<Order>,
}

impl Vehicle {
    /// Clamps `performance_score` into `[0, 1]`, logging when it had to.
    /// Resolves the "0-1 real vs 1-5 stars" open question from spec.md §9:
    /// this codebase fixes 0-1 and clamps out-of-range inputs rather than
    /// rejecting them outright (see DESIGN.md).
    pub fn normalize(&mut self) {
        let clamped = self.performance_score.clamp(0.0, 1.0);
        if (clamped - self.performance_score).abs() > f64::EPSILON {
            tracing::warn!(
                vehicle_id = %self.vehicle_id,
                raw = self.performance_score,
                clamped,
                "performance_score out of [0, 1], clamped"
            );
            self.performance_score = clamped;
        }
    }

    pub fn current_load(&self) -> u32 {
        self.current_orders.len() as u32
    }

    pub fn committed_weight_kg(&self) -> f64 {
        self.current_orders.iter().map(|o| o.weight_kg).sum()
    }

    pub fn available_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.current_load())
    }

    pub fn remaining_weight_kg(&self) -> f64 {
        (self.max_weight_kg - self.committed_weight_kg()).max(0.0)
    }

    /// A vehicle is available iff it has at least one unit of remaining
    /// capacity and one kilogram of remaining weight budget.
    pub fn is_available(&self) -> bool {
        self.available_capacity() >= 1 && self.remaining_weight_kg() >= 1.0
    }

    pub fn can_accept(&self, order: &Order) -> bool {
        self.available_capacity() >= 1 && self.remaining_weight_kg() >= order.weight_kg
    }
}

/// The six sub-scores that make up a total score, plus the derived
/// quantities used for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentScore {
    pub vehicle_id: String,
    pub distance_score: f64,
    pub capacity_score: f64,
    pub urgency_score: f64,
    pub compatibility_score: f64,
    pub performance_score: f64,
    pub interference_score: f64,
    pub total: f64,
    pub feasible: bool,
    pub reasoning: Vec<String>,
    pub estimated_arrival_min: f64,
    pub interference_min: f64,
    /// Set when this score was produced by the fast-mode approximation
    /// (spec.md §4.3); approximate and full-mode scores must never be
    /// compared against each other.
    pub approximate: bool,
}

impl AssignmentScore {
    /// Recomputes the total as the weighted sum of sub-scores, exactly the
    /// weights supplied, never a stored authoritative value.
    pub fn weighted_total(
        distance: f64,
        capacity: f64,
        urgency: f64,
        compatibility: f64,
        performance: f64,
        interference: f64,
        weights: &crate::config::ScoreWeights,
    ) -> f64 {
        weights.distance * distance
            + weights.capacity * capacity
            + weights.urgency * urgency
            + weights.compatibility * compatibility
            + weights.performance * performance
            + weights.interference * interference
    }
}

/// A single visit in a route: the start location, or a delivery stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    /// `None` for the start/end sentinel stop.
    pub order_id: Option<String>,
    pub location: Coordinate,
    pub eta_min: f64,
    pub on_time: bool,
    pub is_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub stops: Vec<Stop>,
    pub total_distance_km: f64,
    pub total_duration_min: f64,
    pub all_on_time: bool,
}

impl Route {
    pub fn empty(start: Coordinate) -> Self {
        Route {
            stops: vec![Stop {
                order_id: None,
                location: start,
                eta_min: 0.0,
                on_time: true,
                is_start: true,
            }],
            total_distance_km: 0.0,
            total_duration_min: 0.0,
            all_on_time: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    UnresolvedAddress,
    NoCapacity,
    InfeasibleAll,
    TimeBudgetExceeded,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnresolvedAddress => "unresolved-address",
            FailureReason::NoCapacity => "no-capacity",
            FailureReason::InfeasibleAll => "infeasible-all",
            FailureReason::TimeBudgetExceeded => "time-budget-exceeded",
        }
    }
}

/// A named rectangular partition of the operational area, used for cheap
/// geographic filtering (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub adjacent: Vec<String>,
}

impl Zone {
    pub fn contains(&self, c: &Coordinate) -> bool {
        c.lat <= self.north && c.lat >= self.south && c.lon <= self.east && c.lon >= self.west
    }
}

/// A zone table plus adjacency, looked up by coordinate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneMap {
    pub zones: Vec<Zone>,
}

impl ZoneMap {
    pub fn zone_for(&self, c: &Coordinate) -> Option<&Zone> {
        self.zones.iter().find(|z| z.contains(c))
    }

    pub fn is_adjacent_or_same(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        self.zones
            .iter()
            .find(|z| z.name == a)
            .map(|z| z.adjacent.iter().any(|n| n == b))
            .unwrap_or(false)
    }
}

pub type Fleet = Vec<Vehicle>;

/// Groups vehicles by zone name for fast filtering; built fresh per call.
pub fn index_vehicles_by_zone<'a>(
    fleet: &'a Fleet,
    zones: &ZoneMap,
) -> HashMap<&'a str, Vec<&'a Vehicle>> {
    let mut by_zone: HashMap<&str, Vec<&Vehicle>> = HashMap::new();
    for v in fleet {
        if let Some(z) = zones.zone_for(&v.location) {
            by_zone.entry(z.name.as_str()).or_default().push(v);
        }
    }
    by_zone
}
