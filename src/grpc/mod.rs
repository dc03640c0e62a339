//! gRPC service implementation.
//!
//! Exposes `Dispatch`, `DispatchBatch`, `Resequence`, `GetNetworkStatus`,
//! and `ReloadNetwork` over `DispatchService`. Translates proto messages
//! into the core's internal model, runs the pipeline, and translates the
//! result back — no dispatch logic lives in this module.

use crate::dispatch::{self, BatchOptions, DispatchOptions};
use crate::errors::CoreError;
use crate::model::{
    Address, AddressInput, AssignmentScore, Coordinate, Order, OrderState, Priority, Route, Stop,
    Vehicle,
};
use crate::road_network::BoundingBox;
use crate::sequencer::{self, StopInput};
use crate::AppState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tonic::{Request, Response, Status};

pub mod proto {
    tonic::include_proto!("dispatch.v1");
}

use proto::dispatch_service_server::{DispatchService, DispatchServiceServer};
use proto::*;

pub struct DispatchServiceImpl {
    state: Arc<AppState>,
}

impl DispatchServiceImpl {
    pub fn new(state: Arc<AppState>) -> Self {
        DispatchServiceImpl { state }
    }
}

#[tonic::async_trait]
impl DispatchService for DispatchServiceImpl {
    async fn dispatch(
        &self,
        request: Request<DispatchRequest>,
    ) -> Result<Response<DispatchResponse>, Status> {
        let req = request.into_inner();
        let started = std::time::Instant::now();

        let mut order = parse_order_input(
            req.order
                .ok_or_else(|| Status::invalid_argument("order is required"))?,
        )
        .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let fleet: Vec<Vehicle> = req
            .fleet
            .into_iter()
            .map(parse_vehicle_input)
            .collect::<Result<_, _>>()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let options = parse_dispatch_options(req.options, &self.state.config);

        let outcome = dispatch::dispatch_single(
            &mut order,
            &fleet,
            &self.state.geocoder,
            &self.state.provider,
            &self.state.config,
            &options,
            Utc::now(),
        )
        .await;

        let outcome_label = outcome
            .failure_reason
            .map(|r| r.as_str())
            .unwrap_or("assigned");
        crate::telemetry::metrics()
            .dispatch_total
            .with_label_values(&[outcome_label])
            .inc();
        crate::telemetry::metrics()
            .dispatch_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        self.state
            .audit
            .record(&crate::telemetry::AuditRecord {
                timestamp: Utc::now(),
                kind: "dispatch",
                order_id: Some(order.order_id.clone()),
                assigned_vehicle_id: outcome.assigned_vehicle_id.clone(),
                failure_reason: outcome.failure_reason.map(|r| r.as_str()),
                duration_ms: started.elapsed().as_millis() as u64,
            })
            .await;

        Ok(Response::new(DispatchResponse {
            assigned_vehicle_id: outcome.assigned_vehicle_id,
            winning_score: outcome.winning_score.map(score_to_proto),
            route: outcome.route.map(route_to_proto),
            all_scores: outcome.all_scores.into_iter().map(score_to_proto).collect(),
            failure_reason: outcome.failure_reason.map(|r| r.as_str().to_string()),
        }))
    }

    async fn dispatch_batch(
        &self,
        request: Request<DispatchBatchRequest>,
    ) -> Result<Response<DispatchBatchResponse>, Status> {
        let req = request.into_inner();

        let orders: Vec<Order> = req
            .orders
            .into_iter()
            .map(parse_order_input)
            .collect::<Result<_, _>>()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let fleet: Vec<Vehicle> = req
            .fleet
            .into_iter()
            .map(parse_vehicle_input)
            .collect::<Result<_, _>>()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let options = parse_batch_options(req.options, &self.state.config);

        let outcome = dispatch::dispatch_batch(
            &orders,
            &fleet,
            &self.state.geocoder,
            &self.state.provider,
            &self.state.config,
            &options,
            Utc::now(),
        )
        .await;

        crate::telemetry::metrics()
            .batch_orders_total
            .with_label_values(&["assigned"])
            .inc_by(outcome.summary.assigned_count as u64);
        crate::telemetry::metrics()
            .batch_orders_total
            .with_label_values(&["unassigned"])
            .inc_by(outcome.summary.unassigned_count as u64);

        let verdicts = outcome
            .verdicts
            .into_iter()
            .map(|v| OrderVerdictProto {
                order_id: v.order_id,
                assigned_vehicle_id: v.assigned_vehicle_id,
                winning_score: v.winning_score.map(score_to_proto),
                route: v.route.map(route_to_proto),
                failure_reason: v.failure_reason.map(|r| r.as_str().to_string()),
            })
            .collect();

        Ok(Response::new(DispatchBatchResponse {
            verdicts,
            summary: Some(BatchSummaryProto {
                assigned_count: outcome.summary.assigned_count as u64,
                unassigned_count: outcome.summary.unassigned_count as u64,
                total_time_s: outcome.summary.total_time_s,
            }),
        }))
    }

    async fn resequence(
        &self,
        request: Request<ResequenceRequest>,
    ) -> Result<Response<ResequenceResponse>, Status> {
        let req = request.into_inner();

        let vehicle = parse_vehicle_input(
            req.vehicle
                .ok_or_else(|| Status::invalid_argument("vehicle is required"))?,
        )
        .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let start = req
            .start_location
            .map(proto_to_coordinate)
            .transpose()
            .map_err(|e| Status::invalid_argument(e.to_string()))?
            .unwrap_or(vehicle.location);

        let stops: Vec<StopInput> = vehicle
            .current_orders
            .iter()
            .map(|o| StopInput {
                order_id: o.order_id.clone(),
                location: o.address.coordinate.expect("committed orders always carry a coordinate"),
                deadline: o.deadline,
                estimated_duration_min: o.estimated_duration_min,
            })
            .collect();

        let budget = Duration::from_secs_f64(self.state.config.sequencer_time_budget_s);
        let seq = sequencer::sequence(
            start,
            Utc::now(),
            &stops,
            &self.state.provider,
            &self.state.config,
            budget,
        )
        .await;

        let mut route_stops = vec![Stop {
            order_id: None,
            location: start,
            eta_min: 0.0,
            on_time: true,
            is_start: true,
        }];
        route_stops.extend(seq.stops);

        let route = Route {
            stops: route_stops,
            total_distance_km: seq.total_distance_km,
            total_duration_min: seq.total_duration_min,
            all_on_time: seq.all_on_time,
        };

        Ok(Response::new(ResequenceResponse {
            all_on_time: route.all_on_time,
            route: Some(route_to_proto(route)),
        }))
    }

    async fn get_network_status(
        &self,
        _request: Request<NetworkStatusRequest>,
    ) -> Result<Response<NetworkStatusResponse>, Status> {
        let status = self.state.provider.status().await;
        Ok(Response::new(NetworkStatusResponse {
            preloaded: status.preloaded,
            on_demand_graphs_cached: status.on_demand_graphs_cached as u64,
        }))
    }

    async fn reload_network(
        &self,
        request: Request<ReloadNetworkRequest>,
    ) -> Result<Response<ReloadNetworkResponse>, Status> {
        let req = request.into_inner();
        let bbox = BoundingBox {
            north: req.north,
            south: req.south,
            east: req.east,
            west: req.west,
        };

        self.state.provider.preload(bbox).await;

        Ok(Response::new(ReloadNetworkResponse {
            success: true,
            message: "network reloaded".to_string(),
        }))
    }
}

pub fn dispatch_service_server(state: Arc<AppState>) -> DispatchServiceServer<DispatchServiceImpl> {
    DispatchServiceServer::new(DispatchServiceImpl::new(state))
}

// `tonic_build` generates a message type also named `Coordinate`, colliding
// with our own model type of the same name; alias the generated one at the
// import boundary instead of renaming either side's natural name.
type ProtoCoordinate = proto::Coordinate;

fn proto_to_coordinate(c: ProtoCoordinate) -> Result<Coordinate, CoreError> {
    crate::model::Coordinate::new(c.lat, c.lon)
        .ok_or_else(|| CoreError::MalformedRequest("coordinate out of range".into()))
}

fn parse_priority(p: i32) -> Priority {
    match proto::Priority::try_from(p).unwrap_or(proto::Priority::Unspecified) {
        proto::Priority::Low => Priority::Low,
        proto::Priority::Normal | proto::Priority::Unspecified => Priority::Normal,
        proto::Priority::High => Priority::High,
        proto::Priority::Urgent => Priority::Urgent,
    }
}

fn parse_address(a: proto::Address) -> Result<Address, CoreError> {
    let coordinate = a.coordinate.map(proto_to_coordinate).transpose()?;
    Ok(Address {
        street: a.street,
        number: a.number,
        corner_1: a.corner_1,
        corner_2: a.corner_2,
        city: a.city,
        country: a.country,
        postal_code: a.postal_code,
        coordinate,
    })
}

fn parse_address_input(input: proto::AddressInput) -> Result<AddressInput, CoreError> {
    match input
        .value
        .ok_or_else(|| CoreError::MalformedRequest("address is required".into()))?
    {
        proto::address_input::Value::FreeText(text) => Ok(AddressInput::FreeText(text)),
        proto::address_input::Value::Structured(addr) => {
            Ok(AddressInput::Structured(parse_address(addr)?))
        }
    }
}

/// An `AddressInput::FreeText` with no geocoder call made yet resolves to
/// an `Address` with every field blank except a synthetic `street`, giving
/// the geocoder adapter something to key a cache lookup on; real
/// free-text parsing into street/city/etc. is the geocoder's job, not
/// this module's (spec.md §9 — address resolution is an external
/// collaborator).
fn resolve_address_input(input: AddressInput) -> Address {
    match input {
        AddressInput::Structured(addr) => addr,
        AddressInput::FreeText(text) => Address {
            street: text,
            city: String::new(),
            country: String::new(),
            ..Default::default()
        },
    }
}

fn parse_deadline(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::MalformedRequest(format!("invalid deadline: {e}")))
}

fn parse_order_input(input: proto::OrderInput) -> Result<Order, CoreError> {
    let address_input = parse_address_input(input.address.ok_or_else(|| {
        CoreError::MalformedRequest("order.address is required".into())
    })?)?;
    let address = resolve_address_input(address_input);
    let deadline = parse_deadline(&input.deadline)?;
    let created_at = Utc::now();

    if deadline <= created_at {
        return Err(CoreError::MalformedRequest(format!(
            "order {} has a deadline in the past",
            input.order_id
        )));
    }

    Ok(Order {
        order_id: input.order_id,
        address,
        deadline,
        priority: parse_priority(input.priority),
        weight_kg: input.weight_kg,
        estimated_duration_min: input.estimated_duration_min,
        created_at,
        state: OrderState::Pending,
    })
}

fn parse_committed_order(c: proto::CommittedOrder) -> Result<Order, CoreError> {
    let coordinate = proto_to_coordinate(c.location.ok_or_else(|| {
        CoreError::MalformedRequest("committed order location is required".into())
    })?)?;
    let deadline = parse_deadline(&c.deadline)?;
    Ok(Order {
        order_id: c.order_id,
        address: Address {
            coordinate: Some(coordinate),
            ..Default::default()
        },
        deadline,
        priority: parse_priority(c.priority),
        weight_kg: c.weight_kg,
        estimated_duration_min: c.estimated_duration_min,
        created_at: Utc::now() - chrono::Duration::minutes(1),
        state: OrderState::Assigned,
    })
}

fn parse_vehicle_input(v: proto::VehicleInput) -> Result<Vehicle, CoreError> {
    let location = proto_to_coordinate(
        v.location
            .ok_or_else(|| CoreError::MalformedRequest("vehicle location is required".into()))?,
    )?;
    let current_orders = v
        .current_orders
        .into_iter()
        .map(parse_committed_order)
        .collect::<Result<_, _>>()?;

    let mut vehicle = Vehicle {
        vehicle_id: v.vehicle_id,
        driver_name: v.driver_name,
        location,
        capacity: v.capacity,
        max_weight_kg: v.max_weight_kg,
        performance_score: v.performance_score,
        current_orders,
    };
    vehicle.normalize();
    Ok(vehicle)
}

fn parse_dispatch_options(
    options: Option<proto::DispatchOptionsProto>,
    config: &crate::config::DispatchConfig,
) -> DispatchOptions {
    let mut opts = DispatchOptions::from_config(config);
    if let Some(o) = options {
        opts.fast_mode = o.fast_mode;
        opts.max_candidates = o.max_candidates.map(|k| k as usize);
        if let Some(budget) = o.time_budget_s {
            opts.time_budget_s = budget;
        }
    }
    opts
}

fn parse_batch_options(
    options: Option<proto::BatchOptionsProto>,
    config: &crate::config::DispatchConfig,
) -> BatchOptions {
    let mut opts = BatchOptions::from_config(config);
    if let Some(o) = options {
        opts.priority_sort = o.priority_sort;
        opts.fast_mode = o.fast_mode;
        if o.time_budget_s > 0.0 {
            opts.time_budget_s = o.time_budget_s;
        }
    }
    opts
}

fn coordinate_to_proto(c: Coordinate) -> proto::Coordinate {
    proto::Coordinate { lat: c.lat, lon: c.lon }
}

fn score_to_proto(s: AssignmentScore) -> AssignmentScoreProto {
    AssignmentScoreProto {
        vehicle_id: s.vehicle_id,
        distance_score: s.distance_score,
        capacity_score: s.capacity_score,
        urgency_score: s.urgency_score,
        compatibility_score: s.compatibility_score,
        performance_score: s.performance_score,
        interference_score: s.interference_score,
        total: s.total,
        feasible: s.feasible,
        reasoning: s.reasoning,
        estimated_arrival_min: s.estimated_arrival_min,
        interference_min: s.interference_min,
        approximate: s.approximate,
    }
}

fn stop_to_proto(s: Stop) -> StopProto {
    StopProto {
        order_id: s.order_id,
        location: Some(coordinate_to_proto(s.location)),
        eta_min: s.eta_min,
        on_time: s.on_time,
        is_start: s.is_start,
    }
}

fn route_to_proto(r: Route) -> RouteProto {
    RouteProto {
        stops: r.stops.into_iter().map(stop_to_proto).collect(),
        total_distance_km: r.total_distance_km,
        total_duration_min: r.total_duration_min,
        all_on_time: r.all_on_time,
    }
}
