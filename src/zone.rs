//! Geographic zone pre-filter (spec.md §4.4).
//!
//! Before any scoring, discard vehicles that are demonstrably far from the
//! order. Reduces the candidate set by roughly 70% for metropolitan
//! deployments at no correctness cost, as long as adjacency covers the
//! realistic dispatch reach.

use crate::model::{Coordinate, Vehicle, ZoneMap};

/// Filters `fleet` down to vehicles whose zone is the order's zone or
/// adjacent to it. If the order's location doesn't fall in any configured
/// zone, the filter is disabled for this call (spec.md §4.4) and every
/// vehicle passes through.
pub fn filter_by_zone<'a>(
    fleet: &'a [Vehicle],
    order_location: Coordinate,
    zones: &ZoneMap,
) -> Vec<&'a Vehicle> {
    let Some(order_zone) = zones.zone_for(&order_location) else {
        return fleet.iter().collect();
    };

    fleet
        .iter()
        .filter(|v| match zones.zone_for(&v.location) {
            Some(vz) => zones.is_adjacent_or_same(&order_zone.name, &vz.name),
            None => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;

    fn vehicle_at(id: &str, lat: f64, lon: f64) -> Vehicle {
        Vehicle {
            vehicle_id: id.into(),
            driver_name: "driver".into(),
            location: Coordinate::new(lat, lon).unwrap(),
            capacity: 4,
            max_weight_kg: 100.0,
            performance_score: 0.7,
            current_orders: vec![],
        }
    }

    #[test]
    fn out_of_zone_vehicle_is_filtered_s3() {
        let zones = DispatchConfig::default().zones;
        let order_location = Coordinate::new(-34.60, -58.38).unwrap(); // CENTRO
        let v1 = vehicle_at("v1", -34.60, -58.38); // CENTRO
        let v2 = vehicle_at("v2", -34.35, -58.75); // SUBURBIO_LEJANO, not adjacent

        let fleet = vec![v1, v2];
        let kept = filter_by_zone(&fleet, order_location, &zones);

        let kept_ids: Vec<&str> = kept.iter().map(|v| v.vehicle_id.as_str()).collect();
        assert!(kept_ids.contains(&"v1"));
        assert!(!kept_ids.contains(&"v2"));
    }

    #[test]
    fn adjacency_is_closed_under_held_vehicle() {
        let zones = DispatchConfig::default().zones;
        let v = vehicle_at("v1", -34.50, -58.40); // NORTE
        let fleet = vec![v];

        // Order in CENTRO (adjacent to NORTE): kept.
        let in_centro = Coordinate::new(-34.60, -58.38).unwrap();
        assert_eq!(filter_by_zone(&fleet, in_centro, &zones).len(), 1);

        // Order in any zone adjacent to NORTE must also keep it (invariant 6).
        // NORTE's adjacency set per config is {CENTRO, OESTE}; a point in OESTE:
        let in_oeste = Coordinate::new(-34.60, -58.55).unwrap();
        assert_eq!(filter_by_zone(&fleet, in_oeste, &zones).len(), 1);
    }

    #[test]
    fn adjacency_is_symmetric_for_centro_and_este() {
        let zones = DispatchConfig::default().zones;
        let v = vehicle_at("v1", -34.60, -58.25); // ESTE
        let fleet = vec![v];

        // ESTE's own adjacency set names CENTRO; the filter must hold that
        // fixed regardless of which of the two zones the order falls in.
        let in_este = Coordinate::new(-34.60, -58.25).unwrap();
        assert_eq!(filter_by_zone(&fleet, in_este, &zones).len(), 1);

        let in_centro = Coordinate::new(-34.60, -58.38).unwrap();
        assert_eq!(filter_by_zone(&fleet, in_centro, &zones).len(), 1);
    }

    #[test]
    fn order_outside_partition_disables_filter() {
        let zones = DispatchConfig::default().zones;
        let v = vehicle_at("v1", 10.0, 10.0); // nowhere near any configured zone
        let fleet = vec![v];
        let far_outside = Coordinate::new(89.0, 179.0).unwrap();
        assert_eq!(filter_by_zone(&fleet, far_outside, &zones).len(), 1);
    }
}
