//! Genuine system errors.
//!
//! Infeasibility and dispatch failure reasons are data, not errors (spec.md
//! §7) — they live in `model::FailureReason` and the `dispatch` result
//! types. `CoreError` is reserved for the cases that actually abort a call:
//! corrupted input the type system couldn't prevent, an exhausted upstream,
//! or a configuration that never loaded.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("geocoder exhausted all providers for address {0:?}")]
    GeocoderExhausted(String),

    #[error("road network graph unavailable: {0}")]
    GraphUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
