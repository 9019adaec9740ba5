//! Complete-linkage agglomerative clustering of candidate pairs.
//!
//! The distance graph only holds candidate pairs, so the dense matrix built
//! here treats every other pair as infinitely far apart. Complete linkage
//! cannot merge across an infinite distance, so such matrices are rejected
//! instead of producing a partial hierarchy.

use crate::{canonical_pair, DistanceMap, ItemId, ItemPair};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::warn;

/// Errors from clustering.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// Some item pairs have no finite distance (the candidate graph is not
    /// complete over the referenced items).
    #[error("distance matrix over {items} items has {missing} non-finite pairs")]
    NonFiniteDistances {
        /// Items in the matrix.
        items: usize,
        /// Unordered pairs without a finite distance.
        missing: usize,
    },
}

/// Union-Find (Disjoint Set Union) data structure.
///
/// Used to apply dendrogram merges when cutting at a threshold.
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    /// Create a new Union-Find structure with n singleton elements.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Find the root of the set containing x, compressing the path.
    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    /// Union the sets containing x and y (by rank).
    ///
    /// Returns true if x and y were in different sets.
    pub fn union(&mut self, x: usize, y: usize) -> bool {
        let rx = self.find(x);
        let ry = self.find(y);

        if rx == ry {
            return false;
        }

        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }

        true
    }

    /// Check if x and y are in the same set.
    pub fn connected(&mut self, x: usize, y: usize) -> bool {
        self.find(x) == self.find(y)
    }
}

/// One agglomeration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    /// An item of the first merged cluster.
    pub left: ItemId,
    /// An item of the second merged cluster.
    pub right: ItemId,
    /// Complete-linkage distance between the two clusters.
    pub distance: f64,
    /// Size of the merged cluster.
    pub size: usize,
}

/// Full complete-linkage hierarchy over the items of a distance map.
#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    items: Vec<ItemId>,
    merges: Vec<Merge>,
}

impl Dendrogram {
    /// Build the hierarchy.
    ///
    /// Non-finite input distances are dropped (with a warning) and then
    /// count as missing pairs.
    pub fn complete_linkage(distances: &DistanceMap) -> Result<Self, ClusterError> {
        let items: Vec<ItemId> = distances
            .keys()
            .flat_map(|&(i, j)| [i, j])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let n = items.len();
        let index: HashMap<ItemId, usize> = items.iter().enumerate().map(|(k, &i)| (i, k)).collect();

        let mut dist = vec![f64::INFINITY; n * n];
        for k in 0..n {
            dist[k * n + k] = 0.0;
        }
        for (&(i, j), &d) in distances {
            if !d.is_finite() {
                warn!(i, j, distance = d, "Non-finite distance for pair, skipping");
                continue;
            }
            let (a, b) = (index[&i], index[&j]);
            dist[a * n + b] = d;
            dist[b * n + a] = d;
        }

        let missing = (0..n)
            .flat_map(|a| ((a + 1)..n).map(move |b| (a, b)))
            .filter(|&(a, b)| !dist[a * n + b].is_finite())
            .count();
        if missing > 0 {
            warn!(items = n, missing, "Distance matrix has non-finite entries, aborting clustering");
            return Err(ClusterError::NonFiniteDistances { items: n, missing });
        }

        let mut active = vec![true; n];
        let mut size = vec![1usize; n];
        let mut merges = Vec::with_capacity(n.saturating_sub(1));

        for _ in 1..n {
            let mut best: Option<(usize, usize, f64)> = None;
            for a in (0..n).filter(|&a| active[a]) {
                for b in ((a + 1)..n).filter(|&b| active[b]) {
                    let d = dist[a * n + b];
                    if best.map_or(true, |(_, _, bd)| d < bd) {
                        best = Some((a, b, d));
                    }
                }
            }
            let Some((a, b, d)) = best else { break };

            for k in (0..n).filter(|&k| active[k] && k != a && k != b) {
                let merged = dist[a * n + k].max(dist[b * n + k]);
                dist[a * n + k] = merged;
                dist[k * n + a] = merged;
            }
            active[b] = false;
            size[a] += size[b];

            merges.push(Merge {
                left: items[a],
                right: items[b],
                distance: d,
                size: size[a],
            });
        }

        Ok(Self { items, merges })
    }

    /// Items covered by the hierarchy, ascending.
    #[must_use]
    pub fn items(&self) -> &[ItemId] {
        &self.items
    }

    /// Merges in order; distances are non-decreasing.
    #[must_use]
    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Flat clusters whose cophenetic distance is at most `threshold`.
    ///
    /// Labels start at 1 and follow the order of each cluster's smallest item.
    #[must_use]
    pub fn cut(&self, threshold: f64) -> ClusterAssignment {
        let position = |item: ItemId| self.items.binary_search(&item).ok();
        let mut uf = UnionFind::new(self.items.len());

        for merge in self.merges.iter().filter(|m| m.distance <= threshold) {
            if let (Some(a), Some(b)) = (position(merge.left), position(merge.right)) {
                uf.union(a, b);
            }
        }

        let mut labels: HashMap<usize, usize> = HashMap::new();
        let mut clusters: BTreeMap<usize, Vec<ItemId>> = BTreeMap::new();
        for (k, &item) in self.items.iter().enumerate() {
            let root = uf.find(k);
            let next = labels.len() + 1;
            let label = *labels.entry(root).or_insert(next);
            clusters.entry(label).or_default().push(item);
        }

        ClusterAssignment { clusters }
    }
}

/// Cluster label → member items (ascending).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterAssignment {
    clusters: BTreeMap<usize, Vec<ItemId>>,
}

impl ClusterAssignment {
    /// Clusters keyed by label.
    #[must_use]
    pub fn clusters(&self) -> &BTreeMap<usize, Vec<ItemId>> {
        &self.clusters
    }

    /// Number of clusters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// True when no item was clustered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Number of clustered items.
    #[must_use]
    pub fn num_items(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }

    /// Size of the largest cluster (0 when empty).
    #[must_use]
    pub fn largest_cluster_size(&self) -> usize {
        self.clusters.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Label of the cluster containing `item`.
    #[must_use]
    pub fn label_of(&self, item: ItemId) -> Option<usize> {
        self.clusters
            .iter()
            .find(|(_, members)| members.binary_search(&item).is_ok())
            .map(|(&label, _)| label)
    }

    /// Clusters with more than one member.
    pub fn duplicate_groups(&self) -> impl Iterator<Item = &Vec<ItemId>> {
        self.clusters.values().filter(|members| members.len() > 1)
    }

    /// Every within-cluster pair, canonicalised.
    #[must_use]
    pub fn predicted_pairs(&self) -> BTreeSet<ItemPair> {
        let mut pairs = BTreeSet::new();
        for members in self.duplicate_groups() {
            for (k, &i) in members.iter().enumerate() {
                for &j in &members[k + 1..] {
                    pairs.insert(canonical_pair(i, j));
                }
            }
        }
        pairs
    }
}

/// Complete-linkage clustering of the items in `distances`, cut at `threshold`.
///
/// An empty map yields an empty assignment.
pub fn cluster(distances: &DistanceMap, threshold: f64) -> Result<ClusterAssignment, ClusterError> {
    Ok(Dendrogram::complete_linkage(distances)?.cut(threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn complete_map(n: usize, seed: u64) -> DistanceMap {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut map = DistanceMap::new();
        for i in 0..n {
            for j in (i + 1)..n {
                map.insert((i, j), rng.gen_range(0.0..1.0));
            }
        }
        map
    }

    #[test]
    fn test_union_find_basic() {
        let mut uf = UnionFind::new(5);
        assert!(uf.union(0, 1));
        assert!(!uf.union(1, 0));
        uf.union(1, 2);
        assert!(uf.connected(0, 2));
        assert!(!uf.connected(0, 3));
    }

    #[test]
    fn test_union_find_path_compression() {
        let mut uf = UnionFind::new(10);
        for i in 0..9 {
            uf.union(i, i + 1);
        }
        let root = uf.find(0);
        for i in 0..10 {
            uf.find(i);
            assert_eq!(uf.parent[i], root);
        }
    }

    #[test]
    fn test_empty_map() {
        let assignment = cluster(&DistanceMap::new(), 0.5).unwrap();
        assert!(assignment.is_empty());
        assert_eq!(assignment.largest_cluster_size(), 0);
    }

    #[test]
    fn test_single_pair() {
        let map = DistanceMap::from([((3, 7), 0.2)]);

        let joined = cluster(&map, 0.2).unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.clusters()[&1], vec![3, 7]);

        let split = cluster(&map, 0.1).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split.label_of(3), Some(1));
        assert_eq!(split.label_of(7), Some(2));
        assert_eq!(split.label_of(5), None);
    }

    #[test]
    fn test_missing_pair_aborts() {
        // (0, 2) was never a candidate.
        let map = DistanceMap::from([((0, 1), 0.1), ((1, 2), 0.1)]);
        assert_eq!(
            cluster(&map, 0.5).unwrap_err(),
            ClusterError::NonFiniteDistances { items: 3, missing: 1 }
        );
    }

    #[test]
    fn test_non_finite_input_counts_as_missing() {
        let map = DistanceMap::from([((0, 1), f64::NAN)]);
        assert!(matches!(
            cluster(&map, 0.5),
            Err(ClusterError::NonFiniteDistances { missing: 1, .. })
        ));
    }

    #[test]
    fn test_complete_linkage_uses_maximum() {
        // Single linkage would chain 0-1-2 at 0.2; complete linkage must pay 0.9.
        let map = DistanceMap::from([((0, 1), 0.1), ((1, 2), 0.2), ((0, 2), 0.9)]);
        let dendrogram = Dendrogram::complete_linkage(&map).unwrap();

        let merges = dendrogram.merges();
        assert_eq!(merges.len(), 2);
        assert_eq!((merges[0].left, merges[0].right), (0, 1));
        assert_eq!(merges[0].distance, 0.1);
        assert_eq!(merges[1].distance, 0.9);
        assert_eq!(merges[1].size, 3);

        let at_half = dendrogram.cut(0.5);
        assert_eq!(at_half.clusters()[&1], vec![0, 1]);
        assert_eq!(at_half.clusters()[&2], vec![2]);
        assert_eq!(at_half.predicted_pairs(), BTreeSet::from([(0, 1)]));
    }

    #[test]
    fn test_merge_distances_non_decreasing() {
        let map = complete_map(12, 5);
        let dendrogram = Dendrogram::complete_linkage(&map).unwrap();
        assert_eq!(dendrogram.merges().len(), 11);
        for w in dendrogram.merges().windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
    }

    #[test]
    fn test_every_item_assigned_once() {
        let map = complete_map(9, 17);
        let assignment = cluster(&map, 0.4).unwrap();
        assert_eq!(assignment.num_items(), 9);
        for item in 0..9 {
            assert!(assignment.label_of(item).is_some());
        }
    }

    #[test]
    fn test_larger_threshold_never_shrinks_largest_cluster() {
        for seed in 0..5 {
            let dendrogram = Dendrogram::complete_linkage(&complete_map(15, seed)).unwrap();
            let mut previous = 0;
            for step in 0..=20 {
                let threshold = step as f64 / 20.0;
                let largest = dendrogram.cut(threshold).largest_cluster_size();
                assert!(largest >= previous, "seed {seed}, threshold {threshold}");
                previous = largest;
            }
            assert_eq!(previous, 15);
        }
    }
}
