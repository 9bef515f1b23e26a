//! Lloyd's k-means over grid points under Manhattan distance.

use ecoweave_netlist::GridLoc;
use itertools::Itertools;

/// A final centroid and the points assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub centroid: GridLoc,
    pub points: Vec<GridLoc>,
}

fn seed_centroids(points: &[GridLoc], k: usize, rng: &mut fastrand::Rng) -> Vec<GridLoc> {
    let (min_x, max_x) = points.iter().map(|p| p.x).minmax().into_option().unwrap_or((0, 0));
    let (min_y, max_y) = points.iter().map(|p| p.y).minmax().into_option().unwrap_or((0, 0));
    (0..k)
        .map(|_| GridLoc::new(rng.i32(min_x..=max_x), rng.i32(min_y..=max_y)))
        .collect()
}

/// Index of the nearest centroid, lowest index on ties.
fn nearest(point: &GridLoc, centroids: &[GridLoc]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by_key(|(i, c)| (point.manhattan(c), *i))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn mean(points: &[GridLoc]) -> GridLoc {
    let n = points.len() as i64;
    let sx: i64 = points.iter().map(|p| p.x as i64).sum();
    let sy: i64 = points.iter().map(|p| p.y as i64).sum();
    GridLoc::new((sx / n) as i32, (sy / n) as i32)
}

/// Partitions `points` into `k` clusters.
///
/// Centroids start uniformly at random inside the bounding box of the
/// input. Each round assigns every point to its nearest centroid and moves
/// each non-empty cluster's centroid to the truncated mean of its members;
/// an empty cluster keeps its centroid. Stops after `max_iters` rounds or
/// once no centroid moves. Every input point ends up in exactly one cluster.
pub fn kmeans_clustering(
    points: &[GridLoc],
    k: usize,
    max_iters: usize,
    rng: &mut fastrand::Rng,
) -> Vec<Cluster> {
    if points.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut centroids = seed_centroids(points, k, rng);
    let mut members: Vec<Vec<GridLoc>> = Vec::new();
    for round in 0..max_iters.max(1) {
        members = vec![Vec::new(); k];
        for p in points {
            members[nearest(p, &centroids)].push(*p);
        }
        let next: Vec<GridLoc> = members
            .iter()
            .zip(&centroids)
            .map(|(m, c)| if m.is_empty() { *c } else { mean(m) })
            .collect();
        let settled = next == centroids;
        centroids = next;
        if settled {
            log::debug!("k-means settled after {} rounds", round + 1);
            break;
        }
    }
    centroids
        .into_iter()
        .zip(members)
        .map(|(centroid, points)| Cluster { centroid, points })
        .collect()
}
