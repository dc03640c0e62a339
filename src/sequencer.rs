//! Route sequencer (spec.md §4.5).
//!
//! Given a start location and a multiset of stops with deadlines, returns
//! the delivery order minimizing total duration subject to deadline
//! constraints, plus a flag indicating whether any feasible sequence
//! exists. Two modes: exact for `n <= 8` (permutation search), heuristic
//! otherwise (2-opt with a tabu list, wall-clock budgeted).

use crate::config::DispatchConfig;
use crate::model::{Coordinate, Stop};
use crate::road_network::RoadNetworkProvider;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct StopInput {
    pub order_id: String,
    pub location: Coordinate,
    pub deadline: DateTime<Utc>,
    pub estimated_duration_min: f64,
}

#[derive(Debug, Clone)]
pub struct SequenceResult {
    pub stops: Vec<Stop>,
    pub total_distance_km: f64,
    pub total_duration_min: f64,
    pub all_on_time: bool,
    pub feasible: bool,
}

/// Dense pairwise travel-time (minutes) and distance (km) matrices over
/// `[start, stop_0, .., stop_{n-1}]`, computed once up front so the search
/// itself is pure, synchronous arithmetic — the same separation of
/// "fetch the matrix" from "search over it" the teacher's k-shortest-path
/// search uses with its `TransportGraph`.
struct Matrices {
    minutes: Vec<Vec<f64>>,
    distance_km: Vec<Vec<f64>>,
}

async fn build_matrices(
    start: Coordinate,
    stops: &[StopInput],
    provider: &RoadNetworkProvider,
) -> Matrices {
    let mut locations = Vec::with_capacity(stops.len() + 1);
    locations.push(start);
    locations.extend(stops.iter().map(|s| s.location));

    let tt = provider.travel_time_matrix(&locations, &locations).await;
    let minutes = tt
        .iter()
        .map(|row| row.iter().map(|t| t.minutes).collect())
        .collect();

    let n = locations.len();
    let mut distance_km = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            distance_km[i][j] = locations[i].great_circle_km(&locations[j]);
        }
    }

    Matrices { minutes, distance_km }
}

/// Evaluates one candidate ordering (a permutation of `1..=n` indices into
/// the matrix, 0 being the start) and returns `(total_duration, violations,
/// etas_min, on_time_flags)`. ETA formula per spec.md §4.2:
/// `ETA[i] = ETA[i-1] + travel_time + SERVICE_TIME_MIN + order.duration`,
/// with the start's own ETA contributing travel time to the first stop
/// only, never service time.
fn evaluate_order(
    order: &[usize],
    stops: &[StopInput],
    deadlines_min: &[f64],
    matrices: &Matrices,
    service_time_min: f64,
) -> (f64, usize, Vec<f64>, Vec<bool>) {
    let mut etas = Vec::with_capacity(order.len());
    let mut on_time = Vec::with_capacity(order.len());
    let mut prev_idx = 0usize; // start sentinel
    let mut eta = 0.0f64;
    let mut violations = 0usize;

    for &stop_idx in order {
        let travel = matrices.minutes[prev_idx][stop_idx];
        eta += travel + service_time_min + stops[stop_idx - 1].estimated_duration_min;
        let on_time_flag = eta <= deadlines_min[stop_idx - 1];
        if !on_time_flag {
            violations += 1;
        }
        etas.push(eta);
        on_time.push(on_time_flag);
        prev_idx = stop_idx;
    }

    (eta, violations, etas, on_time)
}

fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.is_empty() {
        return vec![vec![]];
    }
    let mut out = Vec::new();
    for (i, &item) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut perm in permutations(&rest) {
            perm.insert(0, item);
            out.push(perm);
        }
    }
    out
}

fn build_result(
    order: &[usize],
    stops: &[StopInput],
    matrices: &Matrices,
    etas: &[f64],
    on_time: &[bool],
    violations: usize,
) -> SequenceResult {
    let mut route_stops = Vec::with_capacity(order.len());
    let mut prev_idx = 0usize;
    let mut total_distance_km = 0.0;

    for (&stop_idx, (&eta, &ok)) in order.iter().zip(etas.iter().zip(on_time.iter())) {
        total_distance_km += matrices.distance_km[prev_idx][stop_idx];
        route_stops.push(Stop {
            order_id: Some(stops[stop_idx - 1].order_id.clone()),
            location: stops[stop_idx - 1].location,
            eta_min: eta,
            on_time: ok,
            is_start: false,
        });
        prev_idx = stop_idx;
    }

    SequenceResult {
        stops: route_stops,
        total_distance_km,
        total_duration_min: etas.last().copied().unwrap_or(0.0),
        all_on_time: violations == 0,
        feasible: violations == 0,
    }
}

/// Exact search: enumerate permutations, pick the minimum-duration one that
/// satisfies all deadlines; if none does, return the one with the fewest
/// violations (ties broken by duration) and `feasible = false`.
fn sequence_exact(
    stops: &[StopInput],
    deadlines_min: &[f64],
    matrices: &Matrices,
    service_time_min: f64,
) -> SequenceResult {
    let indices: Vec<usize> = (1..=stops.len()).collect();
    let mut best: Option<(f64, usize, Vec<usize>, Vec<f64>, Vec<bool>)> = None;

    for perm in permutations(&indices) {
        let (duration, violations, etas, on_time) =
            evaluate_order(&perm, stops, deadlines_min, matrices, service_time_min);

        let better = match &best {
            None => true,
            Some((best_dur, best_viol, ..)) => {
                (violations, duration) < (*best_viol, *best_dur)
            }
        };
        if better {
            best = Some((duration, violations, perm, etas, on_time));
        }
    }

    match best {
        Some((_, violations, order, etas, on_time)) => {
            build_result(&order, stops, matrices, &etas, &on_time, violations)
        }
        None => SequenceResult {
            stops: vec![],
            total_distance_km: 0.0,
            total_duration_min: 0.0,
            all_on_time: true,
            feasible: true,
        },
    }
}

/// Heuristic search for `n > 8`: nearest-neighbor construction followed by
/// 2-opt improvement with a short tabu list of recently broken edge pairs,
/// bounded by `budget`. On timeout, returns the best candidate found so
/// far rather than abandoning the call (spec.md §5: "no work is silently
/// abandoned").
fn sequence_heuristic(
    stops: &[StopInput],
    deadlines_min: &[f64],
    matrices: &Matrices,
    service_time_min: f64,
    budget: Duration,
) -> SequenceResult {
    let deadline_instant = Instant::now() + budget;
    let n = stops.len();
    let mut order: Vec<usize> = nearest_neighbor_order(matrices, n);

    let (mut best_dur, mut best_viol, mut best_etas, mut best_on_time) =
        evaluate_order(&order, stops, deadlines_min, matrices, service_time_min);
    let mut best_order = order.clone();

    let mut tabu: std::collections::HashSet<(usize, usize)> = std::collections::HashSet::new();
    let tabu_horizon = (n * 2).max(10);
    let mut iterations_since_improvement = 0usize;

    while Instant::now() < deadline_instant && iterations_since_improvement < tabu_horizon * 4 {
        let mut improved_this_pass = false;

        'outer: for i in 0..order.len() {
            for j in (i + 1)..order.len() {
                if Instant::now() >= deadline_instant {
                    break 'outer;
                }
                let pair = (order[i], order[j]);
                if tabu.contains(&pair) {
                    continue;
                }

                let mut candidate = order.clone();
                candidate[i..=j].reverse();

                let (dur, viol, etas, on_time) =
                    evaluate_order(&candidate, stops, deadlines_min, matrices, service_time_min);

                if (viol, dur) < (best_viol, best_dur) {
                    best_dur = dur;
                    best_viol = viol;
                    best_etas = etas;
                    best_on_time = on_time;
                    best_order = candidate.clone();
                    order = candidate;
                    tabu.insert(pair);
                    if tabu.len() > tabu_horizon {
                        if let Some(&first) = tabu.iter().next() {
                            tabu.remove(&first);
                        }
                    }
                    improved_this_pass = true;
                    iterations_since_improvement = 0;
                }
            }
        }

        if !improved_this_pass {
            iterations_since_improvement += 1;
            break;
        }
    }

    build_result(&best_order, stops, matrices, &best_etas, &best_on_time, best_viol)
}

fn nearest_neighbor_order(matrices: &Matrices, n: usize) -> Vec<usize> {
    let mut remaining: Vec<usize> = (1..=n).collect();
    let mut order = Vec::with_capacity(n);
    let mut current = 0usize;

    while !remaining.is_empty() {
        let (pos, &next) = remaining
            .iter()
            .enumerate()
            .min_by(|(_, &a), (_, &b)| {
                matrices.minutes[current][a]
                    .partial_cmp(&matrices.minutes[current][b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap();
        order.push(next);
        current = next;
        remaining.remove(pos);
    }

    order
}

/// Entry point used by both the feasibility evaluator and the route
/// resequence call.
pub async fn sequence(
    start: Coordinate,
    start_clock: DateTime<Utc>,
    stops: &[StopInput],
    provider: &RoadNetworkProvider,
    config: &DispatchConfig,
    budget: Duration,
) -> SequenceResult {
    if stops.is_empty() {
        return SequenceResult {
            stops: vec![],
            total_distance_km: 0.0,
            total_duration_min: 0.0,
            all_on_time: true,
            feasible: true,
        };
    }

    let matrices = build_matrices(start, stops, provider).await;
    let deadlines_min: Vec<f64> = stops
        .iter()
        .map(|s| (s.deadline - start_clock).num_seconds() as f64 / 60.0)
        .collect();

    if stops.len() <= config.sequencer_exact_threshold {
        sequence_exact(stops, &deadlines_min, &matrices, config.service_time_min)
    } else {
        sequence_heuristic(
            stops,
            &deadlines_min,
            &matrices,
            config.service_time_min,
            budget,
        )
    }
}
