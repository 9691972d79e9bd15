//! # Peer Selection
//!
//! Ranks live peers against a reference location.
//!
//! ## Algorithm
//!
//! 1. Drop records without a location.
//! 2. Drop records at or beyond `max_distance_km`.
//! 3. Order by distance ascending, then latency ascending (absent last),
//!    then total bandwidth descending (absent last), then peer id.
//!
//! The last key makes the comparator a total order, so the winner does not
//! depend on input order.

use std::cmp::Ordering;

use super::geo::{distance_km, Coordinate};
use super::record::PeerRecord;
use super::value_objects::PeerId;

/// Default eligibility radius.
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 1000.0;

/// A live record together with its distance from the reference location.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    /// The peer's published record.
    pub record: PeerRecord,
    /// Great-circle distance from the reference location.
    pub distance_km: f64,
}

impl RankedCandidate {
    /// Id of the candidate peer.
    pub fn peer_id(&self) -> &PeerId {
        &self.record.id
    }
}

/// Filter-and-rank policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    /// Records at this distance or further are ineligible.
    pub max_distance_km: f64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
        }
    }
}

impl SelectionPolicy {
    /// Policy with a custom radius.
    pub fn new(max_distance_km: f64) -> Self {
        Self { max_distance_km }
    }

    /// Eligible candidates, best first.
    pub fn rank<'a, I>(&self, records: I, reference: &Coordinate) -> Vec<RankedCandidate>
    where
        I: IntoIterator<Item = &'a PeerRecord>,
    {
        let mut candidates = self.eligible(records, reference);
        candidates.sort_by(compare_candidates);
        candidates
    }

    /// Best eligible candidate, or `None` if nothing is in range.
    pub fn select_best<'a, I>(&self, records: I, reference: &Coordinate) -> Option<RankedCandidate>
    where
        I: IntoIterator<Item = &'a PeerRecord>,
    {
        self.eligible(records, reference)
            .into_iter()
            .min_by(compare_candidates)
    }

    fn eligible<'a, I>(&self, records: I, reference: &Coordinate) -> Vec<RankedCandidate>
    where
        I: IntoIterator<Item = &'a PeerRecord>,
    {
        records
            .into_iter()
            .filter_map(|record| {
                // Unknown distance: never eligible.
                let coordinate = record.coordinate()?;
                let distance_km = distance_km(coordinate, reference);
                (distance_km < self.max_distance_km).then(|| RankedCandidate {
                    record: record.clone(),
                    distance_km,
                })
            })
            .collect()
    }
}

/// Best candidate among `records` within `max_distance_km` of `reference`.
pub fn select_best(
    records: &[PeerRecord],
    reference: &Coordinate,
    max_distance_km: f64,
) -> Option<RankedCandidate> {
    SelectionPolicy::new(max_distance_km).select_best(records, reference)
}

fn compare_candidates(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| present_first(a.record.latency_ms, b.record.latency_ms, |x, y| x.total_cmp(&y)))
        .then_with(|| {
            present_first(a.record.bandwidth_total(), b.record.bandwidth_total(), |x, y| {
                y.total_cmp(&x)
            })
        })
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Compare two optional metrics, ranking any present value ahead of an absent one.
fn present_first(a: Option<f64>, b: Option<f64>, cmp: impl Fn(f64, f64) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bandwidth, Location, Timestamp};
    use proptest::prelude::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn located(id: &str, lat: f64, lon: f64) -> PeerRecord {
        PeerRecord::new(PeerId::from(id), Timestamp::new(1)).with_location(Location::at(coord(lat, lon)))
    }

    fn near_medium_far() -> Vec<PeerRecord> {
        vec![
            located("far", 40.71, -74.01),
            located("medium", 34.05, -118.24),
            located("near", 37.77, -122.42),
        ]
    }

    #[test]
    fn test_nearest_peer_wins() {
        let reference = coord(37.77, -122.42);
        let best = select_best(&near_medium_far(), &reference, 1000.0).unwrap();
        assert_eq!(best.peer_id(), &PeerId::from("near"));
        assert_eq!(best.distance_km, 0.0);
    }

    #[test]
    fn test_radius_excludes_far_but_keeps_medium() {
        let reference = coord(37.77, -122.42);
        let ranked = SelectionPolicy::new(600.0).rank(&near_medium_far(), &reference);

        let ids: Vec<&str> = ranked.iter().map(|c| c.peer_id().as_str()).collect();
        assert_eq!(ids, vec!["near", "medium"]);
    }

    #[test]
    fn test_nothing_in_range() {
        let reference = coord(-33.87, 151.21);
        assert!(select_best(&near_medium_far(), &reference, 1000.0).is_none());
        assert!(select_best(&[], &reference, 1000.0).is_none());
    }

    #[test]
    fn test_unlocated_record_never_selected() {
        let reference = coord(37.77, -122.42);
        let records = vec![
            PeerRecord::new(PeerId::from("nowhere"), Timestamp::new(1)).with_latency(0.1),
        ];
        assert!(select_best(&records, &reference, f64::INFINITY).is_none());
        assert!(SelectionPolicy::new(f64::MAX).rank(&records, &reference).is_empty());
    }

    #[test]
    fn test_latency_breaks_distance_tie() {
        let reference = coord(0.0, 0.0);
        let records = vec![
            located("slow", 1.0, 1.0).with_latency(80.0),
            located("fast", 1.0, 1.0).with_latency(12.0),
            located("unknown", 1.0, 1.0),
        ];

        let ids: Vec<String> = SelectionPolicy::default()
            .rank(&records, &reference)
            .into_iter()
            .map(|c| c.record.id.to_string())
            .collect();
        assert_eq!(ids, vec!["fast", "slow", "unknown"]);
    }

    #[test]
    fn test_bandwidth_breaks_latency_tie() {
        let reference = coord(0.0, 0.0);
        let records = vec![
            located("thin", 1.0, 1.0)
                .with_latency(10.0)
                .with_bandwidth(Bandwidth::new(50.0, Some(10.0)).unwrap()),
            located("fat", 1.0, 1.0)
                .with_latency(10.0)
                .with_bandwidth(Bandwidth::new(55.0, None).unwrap()),
            located("unmeasured", 1.0, 1.0).with_latency(10.0),
        ];

        let ids: Vec<String> = SelectionPolicy::default()
            .rank(&records, &reference)
            .into_iter()
            .map(|c| c.record.id.to_string())
            .collect();
        // thin: 60 total, fat: 55 down-only.
        assert_eq!(ids, vec!["thin", "fat", "unmeasured"]);
    }

    #[test]
    fn test_peer_id_is_final_tie_break() {
        let reference = coord(0.0, 0.0);
        let records = vec![located("b", 1.0, 1.0), located("a", 1.0, 1.0)];

        let best = SelectionPolicy::default().select_best(&records, &reference).unwrap();
        assert_eq!(best.peer_id(), &PeerId::from("a"));
    }

    #[test]
    fn test_selection_independent_of_input_order() {
        let reference = coord(37.0, -120.0);
        let mut records = near_medium_far();
        let first = select_best(&records, &reference, 1000.0);

        records.reverse();
        assert_eq!(select_best(&records, &reference, 1000.0), first);

        records.rotate_left(1);
        assert_eq!(select_best(&records, &reference, 1000.0), first);
    }

    #[test]
    fn test_record_exactly_at_radius_is_excluded() {
        let reference = coord(37.77, -122.42);
        let medium = located("medium", 34.05, -118.24);
        let exact = distance_km(medium.coordinate().unwrap(), &reference);

        assert!(select_best(&[medium.clone()], &reference, exact).is_none());
        assert!(select_best(&[medium], &reference, exact + 1e-6).is_some());
    }

    proptest! {
        #[test]
        fn prop_selected_peer_is_inside_radius(
            points in proptest::collection::vec((-90.0f64..=90.0, -180.0f64..=180.0), 1..20),
            ref_lat in -90.0f64..=90.0,
            ref_lon in -180.0f64..=180.0,
            max_distance_km in 0.0f64..5000.0,
        ) {
            let reference = coord(ref_lat, ref_lon);
            let records: Vec<PeerRecord> = points
                .iter()
                .enumerate()
                .map(|(i, (lat, lon))| located(&format!("p{i}"), *lat, *lon))
                .collect();

            if let Some(best) = select_best(&records, &reference, max_distance_km) {
                prop_assert!(best.distance_km < max_distance_km);
            }
        }

        #[test]
        fn prop_boundary_record_is_never_selected(
            lat in -90.0f64..=90.0,
            lon in -180.0f64..=180.0,
            ref_lat in -90.0f64..=90.0,
            ref_lon in -180.0f64..=180.0,
        ) {
            let reference = coord(ref_lat, ref_lon);
            let record = located("edge", lat, lon);
            let boundary = distance_km(record.coordinate().unwrap(), &reference);

            prop_assert!(select_best(&[record], &reference, boundary).is_none());
        }

        #[test]
        fn prop_selection_is_deterministic(
            points in proptest::collection::vec((-10.0f64..=10.0, -10.0f64..=10.0, proptest::option::of(0.0f64..100.0)), 1..12),
        ) {
            let reference = coord(0.0, 0.0);
            let records: Vec<PeerRecord> = points
                .iter()
                .enumerate()
                .map(|(i, (lat, lon, latency))| {
                    let r = located(&format!("p{i}"), *lat, *lon);
                    match latency {
                        Some(ms) => r.with_latency(*ms),
                        None => r,
                    }
                })
                .collect();

            let first = select_best(&records, &reference, 5000.0);
            let mut reversed = records.clone();
            reversed.reverse();

            prop_assert_eq!(select_best(&records, &reference, 5000.0), first.clone());
            prop_assert_eq!(select_best(&reversed, &reference, 5000.0), first);
        }
    }
}
