//! Route inference for vehicle-line groups.
//!
//! Each `(vehicle, line)` group is clustered with DBSCAN on raw
//! latitude/longitude degrees. The largest cluster is the canonical route;
//! pings outside it are treated as GPS noise or detours and dropped.

use std::collections::{BTreeMap, HashSet, VecDeque};

use rstar::RTree;
use rstar::primitives::GeomWithData;
use tracing::{debug, warn};

use crate::config::{ClusteringConfig, RouteMatch};
use crate::error::PipelineError;
use crate::ping::Ping;

pub const NOISE: i32 = -1;
const UNVISITED: i32 = -2;

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Clustering unit: all pings of one vehicle on one line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub vehicle_id: String,
    pub line_id: String,
}

impl GroupKey {
    /// `{vehicle}_{line}_cleaned.json`
    pub fn cleaned_file_name(&self) -> String {
        format!(
            "{}_{}_cleaned.json",
            crate::output::file_safe(&self.vehicle_id),
            crate::output::file_safe(&self.line_id)
        )
    }
}

/// Splits pings into vehicle-line groups, keeping sequence order inside each
/// group. Returns the groups and the number of pings without a vehicle id.
pub fn group_by_vehicle<T, I>(pings: I) -> (BTreeMap<GroupKey, Vec<T>>, usize)
where
    T: AsRef<Ping>,
    I: IntoIterator<Item = T>,
{
    let mut groups: BTreeMap<GroupKey, Vec<T>> = BTreeMap::new();
    let mut skipped = 0usize;

    for item in pings {
        let ping = item.as_ref();
        let Some(vehicle_id) = ping.vehicle_id.clone() else {
            skipped += 1;
            continue;
        };
        let key = GroupKey {
            vehicle_id,
            line_id: ping.line_id.clone(),
        };
        groups.entry(key).or_default().push(item);
    }

    (groups, skipped)
}

/// DBSCAN over 2-D points.
///
/// A point's neighbourhood is every point (itself included) within `eps`;
/// a point is core when its neighbourhood has at least `min_samples`
/// members. Points are visited in index order and neighbours in index
/// order, so labels are deterministic. Returns one label per point,
/// [`NOISE`] for points in no cluster.
pub fn dbscan(points: &[[f64; 2]], eps: f64, min_samples: usize) -> Vec<i32> {
    let tree: RTree<IndexedPoint> = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(*p, i))
            .collect(),
    );
    let eps_2 = eps * eps;

    let neighbours = |i: usize| -> Vec<usize> {
        let mut found: Vec<usize> = tree
            .locate_within_distance(points[i], eps_2)
            .map(|p| p.data)
            .collect();
        found.sort_unstable();
        found
    };

    let mut labels = vec![UNVISITED; points.len()];
    // a point enters the expansion queue at most once over the whole run
    let mut queued = vec![false; points.len()];
    let mut cluster = 0i32;

    for i in 0..points.len() {
        if labels[i] != UNVISITED {
            continue;
        }

        let seeds = neighbours(i);
        if seeds.len() < min_samples {
            labels[i] = NOISE;
            continue;
        }

        labels[i] = cluster;
        queued[i] = true;
        let mut queue = VecDeque::new();
        enqueue(&mut queue, &mut queued, &labels, seeds);

        while let Some(j) = queue.pop_front() {
            if labels[j] == NOISE {
                // border point reached from a core point
                labels[j] = cluster;
                continue;
            }

            labels[j] = cluster;
            let reach = neighbours(j);
            if reach.len() >= min_samples {
                enqueue(&mut queue, &mut queued, &labels, reach);
            }
        }

        cluster += 1;
    }

    labels
}

fn enqueue(queue: &mut VecDeque<usize>, queued: &mut [bool], labels: &[i32], found: Vec<usize>) {
    for n in found {
        if !queued[n] && (labels[n] == UNVISITED || labels[n] == NOISE) {
            queued[n] = true;
            queue.push_back(n);
        }
    }
}

/// The most populated non-noise label. Ties go to the lowest label, which
/// is an arbitrary but stable choice.
pub fn canonical_label(labels: &[i32]) -> Option<i32> {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for &label in labels.iter().filter(|&&l| l >= 0) {
        *counts.entry(label).or_default() += 1;
    }

    let mut best: Option<(i32, usize)> = None;
    for (label, count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

/// Result of cleaning one vehicle-line group.
#[derive(Debug)]
pub struct RouteCleaning<T> {
    pub kept: Vec<T>,
    pub dropped: usize,
    /// `None` when no cluster was found and the group passed through as is.
    pub canonical: Option<i32>,
}

/// Keeps the pings of `group` that lie on its canonical route.
///
/// When every point is noise the group is returned unmodified and a warning
/// is logged.
pub fn clean_route<T: AsRef<Ping>>(
    key: &GroupKey,
    group: Vec<T>,
    config: &ClusteringConfig,
) -> RouteCleaning<T> {
    let mut points = Vec::with_capacity(group.len());
    let mut point_owner = Vec::with_capacity(group.len());
    for (idx, item) in group.iter().enumerate() {
        match item.as_ref().position() {
            Ok((lat, lon)) => {
                points.push([lat, lon]);
                point_owner.push(idx);
            }
            Err(e) => debug!(error = %e, "Ping left out of clustering"),
        }
    }

    let labels = dbscan(&points, config.eps, config.min_samples);

    let Some(canonical) = canonical_label(&labels) else {
        let err = PipelineError::EmptyCluster {
            vehicle_id: key.vehicle_id.clone(),
            line_id: key.line_id.clone(),
        };
        warn!(points = group.len(), "{err}; keeping group unmodified");
        return RouteCleaning {
            kept: group,
            dropped: 0,
            canonical: None,
        };
    };

    let on_route: HashSet<usize> = labels
        .iter()
        .zip(&point_owner)
        .filter(|&(&label, _)| label == canonical)
        .map(|(_, &idx)| idx)
        .collect();

    let total = group.len();
    let kept: Vec<T> = match config.route_match {
        RouteMatch::RecordId => group
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| on_route.contains(idx))
            .map(|(_, item)| item)
            .collect(),
        RouteMatch::Coordinates => {
            let route_coordinates: HashSet<(&str, &str)> = group
                .iter()
                .enumerate()
                .filter(|(idx, _)| on_route.contains(idx))
                .filter_map(|(_, item)| item.as_ref().raw_position())
                .map(|(lat, lon)| (lat.raw(), lon.raw()))
                .collect();
            let keep: Vec<bool> = group
                .iter()
                .map(|item| {
                    item.as_ref()
                        .raw_position()
                        .is_some_and(|(lat, lon)| {
                            route_coordinates.contains(&(lat.raw(), lon.raw()))
                        })
                })
                .collect();
            group
                .into_iter()
                .zip(keep)
                .filter(|(_, keep)| *keep)
                .map(|(item, _)| item)
                .collect()
        }
    };

    RouteCleaning {
        dropped: total - kept.len(),
        kept,
        canonical: Some(canonical),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::Coordinate;

    fn ping(vehicle: &str, lat: f64, lon: f64, ts: i64) -> Ping {
        Ping {
            line_id: "107".into(),
            vehicle_id: Some(vehicle.into()),
            timestamp_ms: ts,
            latitude: Some(Coordinate::new(lat.to_string())),
            longitude: Some(Coordinate::new(lon.to_string())),
            speed: None,
        }
    }

    fn key() -> GroupKey {
        GroupKey {
            vehicle_id: "B1".into(),
            line_id: "107".into(),
        }
    }

    fn config(eps: f64, min_samples: usize) -> ClusteringConfig {
        ClusteringConfig {
            eps,
            min_samples,
            route_match: RouteMatch::Coordinates,
        }
    }

    /// A 20-point route along a meridian, two stray points and a 6-point
    /// detour forming a smaller second cluster.
    fn route_with_outliers() -> Vec<Ping> {
        let mut pings = Vec::new();
        for i in 0..20 {
            pings.push(ping("B1", -22.90 + i as f64 * 0.0003, -43.20, i));
        }
        pings.push(ping("B1", -22.50, -43.00, 100));
        pings.push(ping("B1", -21.00, -42.00, 101));
        for i in 0..6 {
            pings.push(ping("B1", -23.10 + i as f64 * 0.0003, -43.60, 200 + i));
        }
        pings
    }

    #[test]
    fn test_dbscan_separates_clusters_and_noise() {
        let points = vec![
            [0.0, 0.0],
            [0.0, 0.0005],
            [0.0, 0.0010],
            [5.0, 5.0],
            [1.0, 1.0],
            [1.0, 1.0005],
            [1.0, 1.0010],
        ];
        let labels = dbscan(&points, 0.001, 2);
        assert_eq!(labels, vec![0, 0, 0, NOISE, 1, 1, 1]);
    }

    #[test]
    fn test_dbscan_border_points_join_cluster() {
        // only the middle point is core with min_samples = 3
        let points = vec![[0.0, 0.0], [0.0, 0.001], [0.0, 0.002]];
        assert_eq!(dbscan(&points, 0.0011, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_dbscan_parked_vehicle() {
        // many identical fixes plus one far point
        let mut points = vec![[-22.9, -43.1]; 1500];
        points.push([-22.0, -43.0]);

        let labels = dbscan(&points, 0.001, 5);
        assert!(labels[..1500].iter().all(|&l| l == 0));
        assert_eq!(labels[1500], NOISE);
    }

    #[test]
    fn test_dbscan_empty_input() {
        assert!(dbscan(&[], 0.001, 5).is_empty());
    }

    #[test]
    fn test_canonical_label() {
        assert_eq!(canonical_label(&[0, 1, 1, -1, -1, -1]), Some(1));
        assert_eq!(canonical_label(&[2, 2, 0, 0, -1]), Some(0));
        assert_eq!(canonical_label(&[-1, -1]), None);
        assert_eq!(canonical_label(&[]), None);
    }

    #[test]
    fn test_clean_route_drops_outliers() {
        let result = clean_route(&key(), route_with_outliers(), &config(0.001, 5));

        assert_eq!(result.canonical, Some(0));
        assert_eq!(result.kept.len(), 20);
        assert_eq!(result.dropped, 8);
        assert!(result.kept.iter().all(|p| p.timestamp_ms < 20));
    }

    #[test]
    fn test_route_selection_is_deterministic() {
        let first = clean_route(&key(), route_with_outliers(), &config(0.001, 5));
        for _ in 0..5 {
            let again = clean_route(&key(), route_with_outliers(), &config(0.001, 5));
            assert_eq!(again.canonical, first.canonical);
            assert_eq!(again.kept, first.kept);
        }
    }

    #[test]
    fn test_all_noise_passes_group_through() {
        let group = vec![
            ping("B1", 0.0, 0.0, 1),
            ping("B1", 1.0, 1.0, 2),
            ping("B1", 2.0, 2.0, 3),
        ];
        let result = clean_route(&key(), group.clone(), &config(0.001, 5));

        assert_eq!(result.canonical, None);
        assert_eq!(result.kept, group);
        assert_eq!(result.dropped, 0);
    }

    #[test]
    fn test_unparseable_points_are_off_route() {
        let mut group = route_with_outliers();
        let mut unparsed = group[0].clone();
        unparsed.latitude = Some(Coordinate::new("bad"));
        group.push(unparsed);

        let by_coordinates = clean_route(&key(), group.clone(), &config(0.001, 5));
        let mut record_cfg = config(0.001, 5);
        record_cfg.route_match = RouteMatch::RecordId;
        let by_record = clean_route(&key(), group, &record_cfg);

        assert_eq!(by_coordinates.kept.len(), 20);
        assert_eq!(by_record.kept.len(), 20);
    }

    #[test]
    fn test_group_by_vehicle() {
        let mut anonymous = ping("X", 0.0, 0.0, 9);
        anonymous.vehicle_id = None;
        let mut other_line = ping("B1", 0.0, 0.0, 4);
        other_line.line_id = "3".into();

        let (groups, skipped) = group_by_vehicle(vec![
            ping("B2", 0.0, 0.0, 1),
            ping("B1", 0.0, 0.0, 2),
            anonymous,
            ping("B1", 0.0, 0.0, 3),
            other_line,
        ]);

        assert_eq!(skipped, 1);
        assert_eq!(groups.len(), 3);
        let b1: Vec<_> = groups[&key()].iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(b1, vec![2, 3]);
    }

    #[test]
    fn test_cleaned_file_name() {
        assert_eq!(key().cleaned_file_name(), "B1_107_cleaned.json");

        let a = GroupKey {
            vehicle_id: "V_1".into(),
            line_id: "2".into(),
        };
        let b = GroupKey {
            vehicle_id: "V".into(),
            line_id: "1_2".into(),
        };
        assert_ne!(a.cleaned_file_name(), b.cleaned_file_name());
    }
}
