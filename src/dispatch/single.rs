//! Single-order dispatcher (spec.md §4.6).

use crate::config::DispatchConfig;
use crate::geocode::{GeocodeAdapter, Geocoder};
use crate::model::{AssignmentScore, FailureReason, Order, Route, Stop, Vehicle};
use crate::road_network::RoadNetworkProvider;
use crate::sequencer::{self, StopInput};
use crate::{scoring, zone};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub fast_mode: bool,
    pub max_candidates: Option<usize>,
    pub time_budget_s: f64,
}

impl DispatchOptions {
    pub fn from_config(config: &DispatchConfig) -> Self {
        DispatchOptions {
            fast_mode: false,
            max_candidates: None,
            time_budget_s: config.single_order_time_budget_s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub assigned_vehicle_id: Option<String>,
    pub winning_score: Option<AssignmentScore>,
    pub route: Option<Route>,
    pub all_scores: Vec<AssignmentScore>,
    pub failure_reason: Option<FailureReason>,
}

impl DispatchOutcome {
    fn failure(reason: FailureReason, all_scores: Vec<AssignmentScore>) -> Self {
        DispatchOutcome {
            assigned_vehicle_id: None,
            winning_score: None,
            route: None,
            all_scores,
            failure_reason: Some(reason),
        }
    }
}

fn order_to_stop_input(order: &Order) -> StopInput {
    StopInput {
        order_id: order.order_id.clone(),
        location: order
            .address
            .coordinate
            .expect("order address must be resolved before sequencing"),
        deadline: order.deadline,
        estimated_duration_min: order.estimated_duration_min,
    }
}

/// End-to-end assignment of `order` against `fleet`. Resolves the address
/// (mutating `order.address.coordinate` in place, per spec.md §4.6 step 1),
/// then runs the zone filter, hard filters, scoring fan-out, and final
/// sequencing. Does not mutate `fleet` — the caller decides whether to
/// commit the assignment (spec.md §4.6, "Observable side effects: none").
pub async fn dispatch_single<G: Geocoder>(
    order: &mut Order,
    fleet: &[Vehicle],
    geocoder: &GeocodeAdapter<G>,
    provider: &Arc<RoadNetworkProvider>,
    config: &Arc<DispatchConfig>,
    options: &DispatchOptions,
    clock: DateTime<Utc>,
) -> DispatchOutcome {
    if order.address.coordinate.is_none() {
        match geocoder.resolve(&order.address).await {
            Ok(result) => order.address.coordinate = Some(result.coordinate),
            Err(_) => return DispatchOutcome::failure(FailureReason::UnresolvedAddress, vec![]),
        }
    }
    let order_coord = order.address.coordinate.unwrap();

    let zoned = zone::filter_by_zone(fleet, order_coord, &config.zones);
    let candidates: Vec<&Vehicle> = zoned.into_iter().filter(|v| v.can_accept(order)).collect();

    if candidates.is_empty() {
        return DispatchOutcome::failure(FailureReason::NoCapacity, vec![]);
    }

    let budget = Duration::from_secs_f64(options.time_budget_s);
    let scoring_fut = score_all(candidates, order, clock, provider, config, options);

    let all_scores = match tokio::time::timeout(budget, scoring_fut).await {
        Ok(scores) => scores,
        Err(_) => return DispatchOutcome::failure(FailureReason::TimeBudgetExceeded, vec![]),
    };

    let (all_scores, winner) = super::pick_winner(all_scores);

    let Some(winner) = winner else {
        return DispatchOutcome::failure(FailureReason::InfeasibleAll, all_scores);
    };

    let winning_vehicle = fleet
        .iter()
        .find(|v| v.vehicle_id == winner.vehicle_id)
        .expect("winning vehicle must be present in the fleet passed in");

    let route = sequence_route(winning_vehicle, order, provider, config).await;

    DispatchOutcome {
        assigned_vehicle_id: Some(winner.vehicle_id.clone()),
        winning_score: Some(winner),
        route: Some(route),
        all_scores,
        failure_reason: None,
    }
}

async fn score_all(
    candidates: Vec<&Vehicle>,
    order: &Order,
    clock: DateTime<Utc>,
    provider: &Arc<RoadNetworkProvider>,
    config: &Arc<DispatchConfig>,
    options: &DispatchOptions,
) -> Vec<AssignmentScore> {
    if !options.fast_mode {
        return fan_out_full(candidates, order, clock, provider, config).await;
    }

    let k = options.max_candidates.unwrap_or(config.fast_mode_k);
    let order_coord = order.address.coordinate.unwrap();

    let mut by_distance: Vec<&Vehicle> = candidates;
    by_distance.sort_by(|a, b| {
        a.location
            .great_circle_km(&order_coord)
            .partial_cmp(&b.location.great_circle_km(&order_coord))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let (top_k, rest) = if by_distance.len() > k {
        by_distance.split_at(k)
    } else {
        (&by_distance[..], &by_distance[0..0])
    };

    let mut scores = fan_out_full(top_k.to_vec(), order, clock, provider, config).await;
    for v in rest {
        scores.push(scoring::approximate_score(v, order, clock, config));
    }
    scores
}

/// Fans each candidate out onto its own task (independent evaluations;
/// spec.md §4.6 step 4 — "ordering of parallel completions must not affect
/// the final choice", enforced here by the tie-break in `pick_winner`
/// rather than by the join order).
async fn fan_out_full(
    candidates: Vec<&Vehicle>,
    order: &Order,
    clock: DateTime<Utc>,
    provider: &Arc<RoadNetworkProvider>,
    config: &Arc<DispatchConfig>,
) -> Vec<AssignmentScore> {
    let mut handles = Vec::with_capacity(candidates.len());
    for vehicle in candidates {
        let vehicle = vehicle.clone();
        let order = order.clone();
        let provider = Arc::clone(provider);
        let config = Arc::clone(config);
        handles.push(tokio::spawn(async move {
            scoring::score_candidate(&vehicle, &order, clock, &provider, &config, false).await
        }));
    }

    let mut scores = Vec::with_capacity(handles.len());
    for h in handles {
        if let Ok(score) = h.await {
            scores.push(score);
        }
    }
    scores
}

async fn sequence_route(
    vehicle: &Vehicle,
    new_order: &Order,
    provider: &Arc<RoadNetworkProvider>,
    config: &Arc<DispatchConfig>,
) -> Route {
    let mut combined = vehicle.current_orders.clone();
    combined.push(new_order.clone());
    let stops: Vec<StopInput> = combined.iter().map(order_to_stop_input).collect();

    let budget = Duration::from_secs_f64(config.sequencer_time_budget_s);
    let seq = sequencer::sequence(vehicle.location, Utc::now(), &stops, provider, config, budget).await;

    let start_stop = Stop {
        order_id: None,
        location: vehicle.location,
        eta_min: 0.0,
        on_time: true,
        is_start: true,
    };

    let mut route_stops = vec![start_stop];
    route_stops.extend(seq.stops);

    Route {
        stops: route_stops,
        total_distance_km: seq.total_distance_km,
        total_duration_min: seq.total_duration_min,
        all_on_time: seq.all_on_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::StubGeocoder;
    use crate::model::{Address, Coordinate, OrderState, Priority};

    fn order_at(id: &str, lat: f64, lon: f64, deadline_min: i64, weight_kg: f64) -> Order {
        Order {
            order_id: id.into(),
            address: Address {
                street: "x".into(),
                city: "y".into(),
                coordinate: Some(Coordinate::new(lat, lon).unwrap()),
                ..Default::default()
            },
            deadline: Utc::now() + chrono::Duration::minutes(deadline_min),
            priority: Priority::Normal,
            weight_kg,
            estimated_duration_min: 1.0,
            created_at: Utc::now(),
            state: OrderState::Pending,
        }
    }

    fn vehicle(id: &str, lat: f64, lon: f64) -> Vehicle {
        Vehicle {
            vehicle_id: id.into(),
            driver_name: "driver".into(),
            location: Coordinate::new(lat, lon).unwrap(),
            capacity: 5,
            max_weight_kg: 100.0,
            performance_score: 0.8,
            current_orders: vec![],
        }
    }

    #[tokio::test]
    async fn empty_fleet_vehicle_wins_on_interference_s1() {
        let provider = Arc::new(RoadNetworkProvider::new(30.0, 5000.0));
        let config = Arc::new(DispatchConfig::default());
        let geocoder = GeocodeAdapter::new(StubGeocoder);
        let options = DispatchOptions::from_config(&config);

        let mut order = order_at("o1", -34.60, -58.38, 120, 2.8);

        let idle = vehicle("v1", -34.59, -58.37);
        let mut busy = vehicle("v2", -34.60, -58.38);
        busy.performance_score = 0.88;
        busy.capacity = 8;
        busy.max_weight_kg = 150.0;
        busy.current_orders = vec![
            order_at("c1", -34.50, -58.38, 30, 1.0),
            order_at("c2", -34.40, -58.38, 60, 1.0),
            order_at("c3", -34.30, -58.38, 105, 1.0),
        ];

        let fleet = vec![idle, busy];
        let outcome = dispatch_single(
            &mut order,
            &fleet,
            &geocoder,
            &provider,
            &config,
            &options,
            Utc::now(),
        )
        .await;

        assert_eq!(outcome.assigned_vehicle_id.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn tight_deadline_fails_infeasible_all_s2() {
        let provider = Arc::new(RoadNetworkProvider::new(30.0, 5000.0));
        let config = Arc::new(DispatchConfig::default());
        let geocoder = GeocodeAdapter::new(StubGeocoder);
        let options = DispatchOptions::from_config(&config);

        let mut order = order_at("o1", 0.10, 0.0, 25, 1.0); // ~12km away
        let mut v = vehicle("v1", 0.0, 0.0);
        v.current_orders = vec![order_at("existing", 0.02, 0.0, 30, 1.0)];

        let fleet = vec![v];
        let outcome = dispatch_single(
            &mut order,
            &fleet,
            &geocoder,
            &provider,
            &config,
            &options,
            Utc::now(),
        )
        .await;

        assert_eq!(outcome.assigned_vehicle_id, None);
        assert_eq!(outcome.failure_reason, Some(FailureReason::InfeasibleAll));
    }

    #[tokio::test]
    async fn out_of_zone_vehicle_absent_from_all_scores_s3() {
        let provider = Arc::new(RoadNetworkProvider::new(30.0, 5000.0));
        let config = Arc::new(DispatchConfig::default());
        let geocoder = GeocodeAdapter::new(StubGeocoder);
        let options = DispatchOptions::from_config(&config);

        let mut order = order_at("o1", -34.60, -58.38, 120, 1.0); // CENTRO
        let in_zone = vehicle("v1", -34.60, -58.38);
        let far = vehicle("v2", -34.35, -58.75); // SUBURBIO_LEJANO

        let fleet = vec![in_zone, far];
        let outcome = dispatch_single(
            &mut order,
            &fleet,
            &geocoder,
            &provider,
            &config,
            &options,
            Utc::now(),
        )
        .await;

        assert!(outcome.all_scores.iter().all(|s| s.vehicle_id != "v2"));
    }

    #[tokio::test]
    async fn empty_capacity_fleet_fails_no_capacity() {
        let provider = Arc::new(RoadNetworkProvider::new(30.0, 5000.0));
        let config = Arc::new(DispatchConfig::default());
        let geocoder = GeocodeAdapter::new(StubGeocoder);
        let options = DispatchOptions::from_config(&config);

        let mut order = order_at("o1", -34.60, -58.38, 120, 1.0);
        let mut v = vehicle("v1", -34.60, -58.38);
        v.capacity = 0;

        let fleet = vec![v];
        let outcome = dispatch_single(
            &mut order,
            &fleet,
            &geocoder,
            &provider,
            &config,
            &options,
            Utc::now(),
        )
        .await;

        assert_eq!(outcome.failure_reason, Some(FailureReason::NoCapacity));
    }
}
