//! Geocoder adapter.
//!
//! Address resolution (forward/reverse) is an external collaborator: only
//! its contract is specified here (spec.md §1, §6). The core never talks to
//! a concrete vendor; it calls through `GeocodeAdapter`, which owns the
//! rate-limit bucket and the result cache, exactly as spec.md §6 requires
//! ("The adapter holds the rate-limit bucket and the result cache").

mod ratelimit;

pub use ratelimit::TokenBucket;

use crate::model::{Address, Coordinate};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct ForwardResult {
    pub coordinate: Coordinate,
    pub normalized_address: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct GeocodeError {
    pub reason: &'static str,
}

impl GeocodeError {
    pub fn address_not_found() -> Self {
        GeocodeError {
            reason: "address-not-found",
        }
    }
}

/// The narrow contract the core depends on. Production implementations
/// call out to a real geocoding vendor; tests use a fixed-table stub.
#[tonic::async_trait]
pub trait Geocoder: Send + Sync {
    async fn forward(&self, address: &Address) -> Result<ForwardResult, GeocodeError>;
    async fn reverse(&self, coordinate: Coordinate) -> Result<Address, GeocodeError>;
}

/// Wraps any `Geocoder` with a shared token-bucket rate limiter (one call
/// per second per upstream provider, spec.md §5) and an in-process result
/// cache keyed by a normalized lookup string.
pub struct GeocodeAdapter<G: Geocoder> {
    inner: G,
    bucket: TokenBucket,
    forward_cache: RwLock<HashMap<String, ForwardResult>>,
    reverse_cache: RwLock<HashMap<String, Address>>,
}

impl<G: Geocoder> GeocodeAdapter<G> {
    pub fn new(inner: G) -> Self {
        GeocodeAdapter {
            inner,
            bucket: TokenBucket::per_second(1),
            forward_cache: RwLock::new(HashMap::new()),
            reverse_cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(address: &Address) -> String {
        format!(
            "{}|{}|{}|{}",
            address.street, address.number.as_deref().unwrap_or(""), address.city, address.country
        )
    }

    pub async fn resolve(&self, address: &Address) -> Result<ForwardResult, GeocodeError> {
        if let Some(c) = address.coordinate {
            return Ok(ForwardResult {
                coordinate: c,
                normalized_address: Self::cache_key(address),
                confidence: 1.0,
            });
        }

        let key = Self::cache_key(address);
        if let Some(hit) = self.forward_cache.read().unwrap().get(&key).cloned() {
            return Ok(hit);
        }

        self.bucket.acquire().await;
        let result = self.inner.forward(address).await?;
        self.forward_cache
            .write()
            .unwrap()
            .insert(key, result.clone());
        Ok(result)
    }

    pub async fn reverse_lookup(&self, coordinate: Coordinate) -> Result<Address, GeocodeError> {
        let key = format!("{:.5},{:.5}", coordinate.lat, coordinate.lon);
        if let Some(hit) = self.reverse_cache.read().unwrap().get(&key).cloned() {
            return Ok(hit);
        }

        self.bucket.acquire().await;
        let result = self.inner.reverse(coordinate).await?;
        self.reverse_cache
            .write()
            .unwrap()
            .insert(key, result.clone());
        Ok(result)
    }
}

/// Deterministic stub geocoder for tests and for addresses that already
/// carry a resolved coordinate. Production deployments supply a real
/// `Geocoder` backed by an HTTP vendor, following the same narrow-adapter
/// shape.
pub struct StubGeocoder;

#[tonic::async_trait]
impl Geocoder for StubGeocoder {
    async fn forward(&self, address: &Address) -> Result<ForwardResult, GeocodeError> {
        if address.street.is_empty() || address.city.is_empty() {
            return Err(GeocodeError::address_not_found());
        }
        Err(GeocodeError::address_not_found())
    }

    async fn reverse(&self, _coordinate: Coordinate) -> Result<Address, GeocodeError> {
        Err(GeocodeError::address_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedGeocoder {
        coordinate: Coordinate,
    }

    #[tonic::async_trait]
    impl Geocoder for FixedGeocoder {
        async fn forward(&self, _address: &Address) -> Result<ForwardResult, GeocodeError> {
            Ok(ForwardResult {
                coordinate: self.coordinate,
                normalized_address: "123 Main St".into(),
                confidence: 0.95,
            })
        }

        async fn reverse(&self, coordinate: Coordinate) -> Result<Address, GeocodeError> {
            Ok(Address {
                street: "Main St".into(),
                number: Some("123".into()),
                coordinate: Some(coordinate),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn already_resolved_address_skips_geocoder_and_cache() {
        let adapter = GeocodeAdapter::new(FixedGeocoder {
            coordinate: Coordinate::new(1.0, 1.0).unwrap(),
        });
        let addr = Address {
            street: "X".into(),
            city: "Y".into(),
            coordinate: Some(Coordinate::new(-34.6, -58.4).unwrap()),
            ..Default::default()
        };
        let result = adapter.resolve(&addr).await.unwrap();
        assert_eq!(result.coordinate.lat, -34.6);
    }

    #[tokio::test]
    async fn repeated_forward_lookup_hits_cache() {
        let adapter = GeocodeAdapter::new(FixedGeocoder {
            coordinate: Coordinate::new(1.0, 1.0).unwrap(),
        });
        let addr = Address {
            street: "Main St".into(),
            city: "Buenos Aires".into(),
            country: "AR".into(),
            ..Default::default()
        };
        let r1 = adapter.resolve(&addr).await.unwrap();
        let r2 = adapter.resolve(&addr).await.unwrap();
        assert_eq!(r1.coordinate.lat, r2.coordinate.lat);
    }
}
