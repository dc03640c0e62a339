//! Candidate scorer (spec.md §4.3).
//!
//! Scores a single (vehicle, order) pair into an `AssignmentScore`.
//! Infeasible candidates short-circuit to a zero total rather than being
//! excluded from the list — the dispatcher decides what to do with a zero
//! score, the scorer never drops a candidate silently.

use crate::config::DispatchConfig;
use crate::feasibility::{self, FeasibilityResult};
use crate::model::{AssignmentScore, Order, Vehicle};
use crate::road_network::RoadNetworkProvider;
use chrono::{DateTime, Utc};

/// Scores `vehicle` against `order` as of `clock`. `approximate` marks
/// whether this call ran in fast mode (spec.md §4.3's top-K approximation);
/// full-mode and approximate scores are never compared against each other.
pub async fn score_candidate(
    vehicle: &Vehicle,
    order: &Order,
    clock: DateTime<Utc>,
    provider: &RoadNetworkProvider,
    config: &DispatchConfig,
    approximate: bool,
) -> AssignmentScore {
    let order_coord = order
        .address
        .coordinate
        .expect("order address must be resolved before scoring");

    if !vehicle.can_accept(order) {
        return zero_score(vehicle, "vehicle lacks capacity or weight budget", approximate);
    }

    let FeasibilityResult {
        feasible,
        baseline_duration_min,
        with_new_duration_min,
        new_order_eta_min,
        violating_order_id,
        reasoning: feasibility_reasoning,
    } = feasibility::evaluate(vehicle, order, clock, provider, config).await;

    if !feasible {
        let mut score = zero_score(vehicle, "route would miss a delivery deadline", approximate);
        if let Some(id) = violating_order_id {
            score.reasoning.push(format!("violating order: {id}"));
        }
        score.reasoning.extend(feasibility_reasoning);
        score.estimated_arrival_min = new_order_eta_min;
        return score;
    }

    let travel_time = provider.travel_time(vehicle.location, order_coord).await;

    let distance_score = distance_sub_score(travel_time.minutes);
    let capacity_score = capacity_sub_score(vehicle);
    let urgency_score = urgency_sub_score(order, clock, new_order_eta_min);
    let compatibility_score = compatibility_sub_score(vehicle, order_coord);
    let performance_score = vehicle.performance_score.clamp(0.0, 1.0);
    let interference_min = (with_new_duration_min - baseline_duration_min).max(0.0);
    let interference_score = interference_sub_score(with_new_duration_min - baseline_duration_min);

    let total = AssignmentScore::weighted_total(
        distance_score,
        capacity_score,
        urgency_score,
        compatibility_score,
        performance_score,
        interference_score,
        &config.weights,
    );

    AssignmentScore {
        vehicle_id: vehicle.vehicle_id.clone(),
        distance_score,
        capacity_score,
        urgency_score,
        compatibility_score,
        performance_score,
        interference_score,
        total,
        feasible: true,
        reasoning: feasibility_reasoning,
        estimated_arrival_min: new_order_eta_min,
        interference_min,
        approximate,
    }
}

/// Cheap, synchronous stand-in for candidates outside fast mode's top-K
/// (spec.md §4.3): skips the feasibility evaluator entirely and derives
/// interference from a straight-line ETA estimate instead of a real
/// sequencer run. Always `approximate = true`; the dispatcher must never
/// let one of these win unless every top-K candidate is infeasible.
pub fn approximate_score(
    vehicle: &Vehicle,
    order: &Order,
    clock: DateTime<Utc>,
    config: &DispatchConfig,
) -> AssignmentScore {
    if !vehicle.can_accept(order) {
        return zero_score(vehicle, "vehicle lacks capacity or weight budget", true);
    }

    let order_coord = order
        .address
        .coordinate
        .expect("order address must be resolved before scoring");

    let distance_km = vehicle.location.great_circle_km(&order_coord);
    let euclidean_eta_min = (distance_km / config.default_avg_speed_kph.max(1.0)) * 60.0;

    let distance_score = distance_sub_score(euclidean_eta_min);
    let capacity_score = capacity_sub_score(vehicle);
    let urgency_score = urgency_sub_score(order, clock, euclidean_eta_min);
    let compatibility_score = compatibility_sub_score(vehicle, order_coord);
    let performance_score = vehicle.performance_score.clamp(0.0, 1.0);
    let interference_score = interference_sub_score(euclidean_eta_min);

    let total = AssignmentScore::weighted_total(
        distance_score,
        capacity_score,
        urgency_score,
        compatibility_score,
        performance_score,
        interference_score,
        &config.weights,
    );

    AssignmentScore {
        vehicle_id: vehicle.vehicle_id.clone(),
        distance_score,
        capacity_score,
        urgency_score,
        compatibility_score,
        performance_score,
        interference_score,
        total,
        feasible: true,
        reasoning: vec!["fast-mode approximation: interference from straight-line ETA".into()],
        estimated_arrival_min: euclidean_eta_min,
        interference_min: euclidean_eta_min,
        approximate: true,
    }
}

fn zero_score(vehicle: &Vehicle, reason: &str, approximate: bool) -> AssignmentScore {
    AssignmentScore {
        vehicle_id: vehicle.vehicle_id.clone(),
        distance_score: 0.0,
        capacity_score: 0.0,
        urgency_score: 0.0,
        compatibility_score: 0.0,
        performance_score: 0.0,
        interference_score: 0.0,
        total: 0.0,
        feasible: false,
        reasoning: vec![reason.to_string()],
        estimated_arrival_min: 0.0,
        interference_min: 0.0,
        approximate,
    }
}

fn distance_sub_score(travel_time_min: f64) -> f64 {
    1.0 / (1.0 + travel_time_min / 30.0)
}

fn capacity_sub_score(vehicle: &Vehicle) -> f64 {
    if vehicle.capacity == 0 {
        return 0.0;
    }
    ((vehicle.capacity - vehicle.current_load()) as f64 / vehicle.capacity as f64).max(0.0)
}

/// Piecewise in time-slack = `deadline - (clock + eta_min)`, plus the
/// priority bump, clipped to 1.0.
fn urgency_sub_score(order: &Order, clock: DateTime<Utc>, eta_min: f64) -> f64 {
    let arrival = clock + chrono::Duration::seconds((eta_min * 60.0) as i64);
    let slack_min = (order.deadline - arrival).num_seconds() as f64 / 60.0;

    let base = if slack_min >= 60.0 {
        1.0
    } else if slack_min >= 30.0 {
        0.85
    } else if slack_min >= 10.0 {
        0.6
    } else if slack_min >= 0.0 {
        0.3
    } else {
        0.0
    };

    (base + order.priority.score_bump()).min(1.0)
}

/// Mean cosine of bearing between each existing-stop direction and the
/// direction to the new stop, rescaled from `[-1, 1]` to `[0, 1]`. Neutral
/// 0.50 when the vehicle has no committed orders.
fn compatibility_sub_score(vehicle: &Vehicle, order_coord: crate::model::Coordinate) -> f64 {
    if vehicle.current_orders.is_empty() {
        return 0.5;
    }

    let to_order = vehicle.location.bearing_to(&order_coord);
    let cosines: Vec<f64> = vehicle
        .current_orders
        .iter()
        .filter_map(|o| o.address.coordinate)
        .map(|c| {
            let heading = vehicle.location.bearing_to(&c);
            (heading - to_order).to_radians().cos()
        })
        .collect();

    if cosines.is_empty() {
        return 0.5;
    }

    let mean_cosine = cosines.iter().sum::<f64>() / cosines.len() as f64;
    (mean_cosine + 1.0) / 2.0
}

fn interference_sub_score(delta_min: f64) -> f64 {
    if delta_min <= 0.0 {
        1.0
    } else if delta_min <= 30.0 {
        1.0 - delta_min / 60.0
    } else {
        (0.5 - (delta_min - 30.0) / 120.0).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, Coordinate, OrderState, Priority};

    fn order_at(id: &str, lat: f64, lon: f64, deadline_min: i64) -> Order {
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
            weight_kg: 1.0,
            estimated_duration_min: 1.0,
            created_at: Utc::now(),
            state: OrderState::Pending,
        }
    }

    fn vehicle_at(lat: f64, lon: f64) -> Vehicle {
        Vehicle {
            vehicle_id: "v1".into(),
            driver_name: "driver".into(),
            location: Coordinate::new(lat, lon).unwrap(),
            capacity: 5,
            max_weight_kg: 100.0,
            performance_score: 0.8,
            current_orders: vec![],
        }
    }

    #[tokio::test]
    async fn feasible_candidate_scores_above_zero() {
        let provider = RoadNetworkProvider::new(30.0, 5000.0);
        let config = DispatchConfig::default();
        let vehicle = vehicle_at(0.0, 0.0);
        let order = order_at("o1", 0.01, 0.0, 120);

        let score = score_candidate(&vehicle, &order, Utc::now(), &provider, &config, false).await;
        assert!(score.feasible);
        assert!(score.total > 0.0);
    }

    #[tokio::test]
    async fn over_capacity_vehicle_scores_zero() {
        let provider = RoadNetworkProvider::new(30.0, 5000.0);
        let config = DispatchConfig::default();
        let mut vehicle = vehicle_at(0.0, 0.0);
        vehicle.max_weight_kg = 0.5; // order weighs 1.0
        let order = order_at("o1", 0.01, 0.0, 120);

        let score = score_candidate(&vehicle, &order, Utc::now(), &provider, &config, false).await;
        assert!(!score.feasible);
        assert_eq!(score.total, 0.0);
    }

    #[tokio::test]
    async fn urgent_priority_scores_at_least_as_high_as_normal() {
        let provider = RoadNetworkProvider::new(30.0, 5000.0);
        let config = DispatchConfig::default();
        let vehicle = vehicle_at(0.0, 0.0);

        let mut urgent_order = order_at("o1", 0.01, 0.0, 120);
        urgent_order.priority = Priority::Urgent;
        let normal_order = order_at("o2", 0.01, 0.0, 120);

        let urgent_score = score_candidate(&vehicle, &urgent_order, Utc::now(), &provider, &config, false).await;
        let normal_score = score_candidate(&vehicle, &normal_order, Utc::now(), &provider, &config, false).await;
        assert!(urgent_score.urgency_score >= normal_score.urgency_score);
    }

    #[tokio::test]
    async fn weighted_total_matches_weighted_sum_invariant_1() {
        let provider = RoadNetworkProvider::new(30.0, 5000.0);
        let config = DispatchConfig::default();
        let vehicle = vehicle_at(0.0, 0.0);
        let order = order_at("o1", 0.01, 0.0, 120);

        let score = score_candidate(&vehicle, &order, Utc::now(), &provider, &config, false).await;
        let recomputed = AssignmentScore::weighted_total(
            score.distance_score,
            score.capacity_score,
            score.urgency_score,
            score.compatibility_score,
            score.performance_score,
            score.interference_score,
            &config.weights,
        );
        assert!((score.total - recomputed).abs() < 1e-9);
    }

    #[tokio::test]
    async fn raising_performance_score_does_not_decrease_total() {
        let provider = RoadNetworkProvider::new(30.0, 5000.0);
        let config = DispatchConfig::default();
        let order = order_at("o1", 0.01, 0.0, 120);

        let mut low_perf = vehicle_at(0.0, 0.0);
        low_perf.performance_score = 0.1;
        let mut high_perf = vehicle_at(0.0, 0.0);
        high_perf.performance_score = 0.9;

        let low_score = score_candidate(&low_perf, &order, Utc::now(), &provider, &config, false).await;
        let high_score = score_candidate(&high_perf, &order, Utc::now(), &provider, &config, false).await;
        assert!(high_score.total >= low_score.total);
    }
}
