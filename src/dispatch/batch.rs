//! Batch dispatcher (spec.md §4.7).
//!
//! Applies the single-order dispatcher sequentially over a shared,
//! mutating fleet copy. The outer loop is deliberately not parallel: each
//! assignment changes what later orders see.

use super::single::{dispatch_single, DispatchOptions};
use crate::config::DispatchConfig;
use crate::geocode::{GeocodeAdapter, Geocoder};
use crate::model::{AssignmentScore, FailureReason, Order, Priority, Route, Vehicle};
use crate::road_network::RoadNetworkProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub priority_sort: bool,
    pub fast_mode: bool,
    pub time_budget_s: f64,
}

impl BatchOptions {
    pub fn from_config(config: &DispatchConfig) -> Self {
        BatchOptions {
            priority_sort: false,
            fast_mode: false,
            time_budget_s: config.batch_time_budget_s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderVerdict {
    pub order_id: String,
    pub assigned_vehicle_id: Option<String>,
    pub winning_score: Option<AssignmentScore>,
    pub route: Option<Route>,
    pub failure_reason: Option<FailureReason>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub assigned_count: usize,
    pub unassigned_count: usize,
    pub total_time_s: f64,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub verdicts: Vec<OrderVerdict>,
    pub summary: BatchSummary,
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Urgent => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

/// Applies `dispatch_single` to each order in `orders` against `fleet`,
/// mutating a private in-memory copy of the fleet as each assignment lands
/// (spec.md §4.7 step 2). Input order is preserved in the returned
/// verdicts regardless of `priority_sort`.
pub async fn dispatch_batch<G: Geocoder>(
    orders: &[Order],
    fleet: &[Vehicle],
    geocoder: &GeocodeAdapter<G>,
    provider: &Arc<RoadNetworkProvider>,
    config: &Arc<DispatchConfig>,
    options: &BatchOptions,
    clock: DateTime<Utc>,
) -> BatchOutcome {
    let started = Instant::now();
    let budget_s = options.time_budget_s;

    let mut processing_order: Vec<usize> = (0..orders.len()).collect();
    if options.priority_sort {
        processing_order.sort_by(|&a, &b| {
            priority_rank(orders[a].priority)
                .cmp(&priority_rank(orders[b].priority))
                .then_with(|| orders[a].deadline.cmp(&orders[b].deadline))
        });
    }

    let mut fleet_copy: Vec<Vehicle> = fleet.to_vec();
    let mut verdicts: Vec<Option<OrderVerdict>> = vec![None; orders.len()];

    let single_options = DispatchOptions {
        fast_mode: options.fast_mode,
        max_candidates: None,
        time_budget_s: config.single_order_time_budget_s,
    };

    for idx in processing_order {
        if started.elapsed().as_secs_f64() >= budget_s {
            verdicts[idx] = Some(OrderVerdict {
                order_id: orders[idx].order_id.clone(),
                assigned_vehicle_id: None,
                winning_score: None,
                route: None,
                failure_reason: Some(FailureReason::TimeBudgetExceeded),
            });
            continue;
        }

        let mut order = orders[idx].clone();
        let outcome = dispatch_single(
            &mut order,
            &fleet_copy,
            geocoder,
            provider,
            config,
            &single_options,
            clock,
        )
        .await;

        if let Some(ref vehicle_id) = outcome.assigned_vehicle_id {
            if let Some(v) = fleet_copy.iter_mut().find(|v| &v.vehicle_id == vehicle_id) {
                v.current_orders.push(order);
            }
        }

        verdicts[idx] = Some(OrderVerdict {
            order_id: orders[idx].order_id.clone(),
            assigned_vehicle_id: outcome.assigned_vehicle_id,
            winning_score: outcome.winning_score,
            route: outcome.route,
            failure_reason: outcome.failure_reason,
        });
    }

    let verdicts: Vec<OrderVerdict> = verdicts.into_iter().map(|v| v.expect("every order index is visited exactly once")).collect();
    let assigned_count = verdicts.iter().filter(|v| v.assigned_vehicle_id.is_some()).count();
    let unassigned_count = verdicts.len() - assigned_count;

    BatchOutcome {
        verdicts,
        summary: BatchSummary {
            assigned_count,
            unassigned_count,
            total_time_s: started.elapsed().as_secs_f64(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::StubGeocoder;
    use crate::model::{Address, Coordinate, OrderState};

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

    fn vehicle(id: &str, lat: f64, lon: f64, capacity: u32) -> Vehicle {
        Vehicle {
            vehicle_id: id.into(),
            driver_name: "driver".into(),
            location: Coordinate::new(lat, lon).unwrap(),
            capacity,
            max_weight_kg: 100.0,
            performance_score: 0.8,
            current_orders: vec![],
        }
    }

    #[tokio::test]
    async fn batch_preserves_fleet_capacity_invariants_s5() {
        let provider = Arc::new(RoadNetworkProvider::new(30.0, 5000.0));
        let config = Arc::new(DispatchConfig::default());
        let geocoder = GeocodeAdapter::new(StubGeocoder);
        let options = BatchOptions::from_config(&config);

        let orders: Vec<Order> = (0..5)
            .map(|i| order_at(&format!("o{i}"), -34.60, -58.38, 180))
            .collect();
        let fleet = vec![
            vehicle("v1", -34.60, -58.38, 2),
            vehicle("v2", -34.60, -58.38, 2),
            vehicle("v3", -34.60, -58.38, 2),
        ];

        let outcome = dispatch_batch(
            &orders,
            &fleet,
            &geocoder,
            &provider,
            &config,
            &options,
            Utc::now(),
        )
        .await;

        let assigned = outcome.summary.assigned_count;
        assert_eq!(assigned + outcome.summary.unassigned_count, 5);
        assert!(assigned <= 6); // total capacity across fleet
    }

    #[tokio::test]
    async fn zero_time_budget_marks_every_order_time_budget_exceeded_s6() {
        let provider = Arc::new(RoadNetworkProvider::new(30.0, 5000.0));
        let config = Arc::new(DispatchConfig::default());
        let geocoder = GeocodeAdapter::new(StubGeocoder);
        let mut options = BatchOptions::from_config(&config);
        options.time_budget_s = 0.0;

        let orders = vec![order_at("o1", -34.60, -58.38, 120)];
        let fleet = vec![vehicle("v1", -34.60, -58.38, 2)];

        let outcome = dispatch_batch(
            &orders,
            &fleet,
            &geocoder,
            &provider,
            &config,
            &options,
            Utc::now(),
        )
        .await;

        assert_eq!(
            outcome.verdicts[0].failure_reason,
            Some(FailureReason::TimeBudgetExceeded)
        );
    }

    #[tokio::test]
    async fn verdicts_preserve_input_order_regardless_of_priority_sort() {
        let provider = Arc::new(RoadNetworkProvider::new(30.0, 5000.0));
        let config = Arc::new(DispatchConfig::default());
        let geocoder = GeocodeAdapter::new(StubGeocoder);
        let mut options = BatchOptions::from_config(&config);
        options.priority_sort = true;

        let mut urgent = order_at("urgent", -34.60, -58.38, 120);
        urgent.priority = Priority::Urgent;
        let normal = order_at("normal", -34.60, -58.38, 120);
        let orders = vec![normal, urgent];
        let fleet = vec![vehicle("v1", -34.60, -58.38, 5)];

        let outcome = dispatch_batch(
            &orders,
            &fleet,
            &geocoder,
            &provider,
            &config,
            &options,
            Utc::now(),
        )
        .await;

        assert_eq!(outcome.verdicts[0].order_id, "normal");
        assert_eq!(outcome.verdicts[1].order_id, "urgent");
    }
}
