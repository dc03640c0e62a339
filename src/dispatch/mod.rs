//! Dispatch orchestration (spec.md §4.6, §4.7).
//!
//! `single` is the end-to-end per-order pipeline; `batch` drives it
//! sequentially over a shared, mutating fleet under a wall-clock budget.

pub mod batch;
pub mod single;

pub use batch::{dispatch_batch, BatchOptions, BatchOutcome, BatchSummary, OrderVerdict};
pub use single::{dispatch_single, DispatchOptions, DispatchOutcome};

use crate::model::{AssignmentScore, FailureReason, Route};

fn pick_winner(mut scores: Vec<AssignmentScore>) -> (Vec<AssignmentScore>, Option<AssignmentScore>) {
    scores.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
    });

    if scores.first().map(|s| s.total > 0.0).unwrap_or(false) {
        let winner = scores[0].clone();
        (scores, Some(winner))
    } else {
        (scores, None)
    }
}

/// Shared shape across both dispatch entry points: either a picked vehicle
/// with its score and route, or a structured failure — never an exception.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub assigned_vehicle_id: Option<String>,
    pub winning_score: Option<AssignmentScore>,
    pub route: Option<Route>,
    pub all_scores: Vec<AssignmentScore>,
    pub failure_reason: Option<FailureReason>,
}
