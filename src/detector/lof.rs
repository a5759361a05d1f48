// src/detector/lof.rs
// Local Outlier Factor over a fitted subset, kd-tree accelerated.
//
// Produces negative outlier factors for the training points themselves
// (fit-predict mode): ≈ −1 for inliers, more negative for outliers. The
// caller normalises `−nof − 1` into [0, 1].

use std::collections::BinaryHeap;

use ndarray::ArrayView2;

use crate::error::{AnalysisError, Result};

// ==================== KD-TREE ====================

struct KdNode {
    point: Vec<f64>,
    point_index: usize,
    split_dim: usize,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

struct KdTree {
    root: Option<Box<KdNode>>,
}

#[derive(Clone)]
struct Neighbor {
    index: usize,
    distance: f64,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

impl KdTree {
    fn build(data: ArrayView2<'_, f64>) -> Self {
        if data.nrows() == 0 {
            return KdTree { root: None };
        }
        let dimension = data.ncols();
        let mut indices: Vec<usize> = (0..data.nrows()).collect();
        let root = Self::build_recursive(data, &mut indices, 0, dimension);
        KdTree { root: Some(root) }
    }

    fn build_recursive(
        data: ArrayView2<'_, f64>,
        indices: &mut [usize],
        depth: usize,
        dimension: usize,
    ) -> Box<KdNode> {
        let split_dim = depth % dimension;
        indices.sort_by(|&a, &b| {
            data[[a, split_dim]]
                .partial_cmp(&data[[b, split_dim]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let median = indices.len() / 2;
        let point_index = indices[median];

        let left = if median > 0 {
            let mut left_indices = indices[..median].to_vec();
            Some(Self::build_recursive(data, &mut left_indices, depth + 1, dimension))
        } else {
            None
        };
        let right = if median + 1 < indices.len() {
            let mut right_indices = indices[median + 1..].to_vec();
            Some(Self::build_recursive(data, &mut right_indices, depth + 1, dimension))
        } else {
            None
        };

        Box::new(KdNode {
            point: data.row(point_index).to_vec(),
            point_index,
            split_dim,
            left,
            right,
        })
    }

    fn knn(&self, query: &[f64], k: usize) -> Vec<(usize, f64)> {
        if self.root.is_none() || k == 0 {
            return Vec::new();
        }
        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::new();
        Self::knn_recursive(self.root.as_deref().unwrap(), query, k, &mut heap);
        let mut results: Vec<(usize, f64)> =
            heap.into_iter().map(|n| (n.index, n.distance)).collect();
        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    fn knn_recursive(node: &KdNode, query: &[f64], k: usize, heap: &mut BinaryHeap<Neighbor>) {
        let dist = euclidean(&node.point, query);
        if heap.len() < k {
            heap.push(Neighbor {
                index: node.point_index,
                distance: dist,
            });
        } else if let Some(top) = heap.peek() {
            if dist < top.distance {
                heap.pop();
                heap.push(Neighbor {
                    index: node.point_index,
                    distance: dist,
                });
            }
        }

        let diff = query[node.split_dim] - node.point[node.split_dim];
        let (first, second) = if diff < 0.0 {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };

        if let Some(child) = first {
            Self::knn_recursive(child, query, k, heap);
        }

        let worst = heap.peek().map(|n| n.distance).unwrap_or(f64::INFINITY);
        if heap.len() < k || diff.abs() < worst {
            if let Some(child) = second {
                Self::knn_recursive(child, query, k, heap);
            }
        }
    }
}

// ==================== LOF ====================

pub struct LocalOutlierFactor {
    k: usize,
}

impl LocalOutlierFactor {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }

    /// Negative outlier factors for every training point.
    pub fn fit_negative_outlier_factors(&self, data: ArrayView2<'_, f64>) -> Result<Vec<f64>> {
        let n = data.nrows();
        if n < 2 {
            return Err(AnalysisError::Model(format!(
                "LOF needs at least 2 samples, got {}",
                n
            )));
        }

        let k = self.k.min(n - 1);
        let tree = KdTree::build(data);

        // k nearest neighbours of each point, excluding the point itself
        let mut neighbors: Vec<Vec<(usize, f64)>> = Vec::with_capacity(n);
        let mut k_distances = vec![0.0f64; n];
        for i in 0..n {
            let query = data.row(i).to_vec();
            let found: Vec<(usize, f64)> = tree
                .knn(&query, k + 1)
                .into_iter()
                .filter(|(idx, _)| *idx != i)
                .take(k)
                .collect();
            k_distances[i] = found.last().map(|(_, d)| *d).unwrap_or(0.0);
            neighbors.push(found);
        }

        // Local reachability density
        let mut lrd = vec![0.0f64; n];
        for i in 0..n {
            let reach_sum: f64 = neighbors[i]
                .iter()
                .map(|&(j, dist)| dist.max(k_distances[j]))
                .sum();
            let count = neighbors[i].len().max(1) as f64;
            let avg_reach = reach_sum / count;
            lrd[i] = if avg_reach > 1e-10 { 1.0 / avg_reach } else { 1e10 };
        }

        // LOF = mean ratio of neighbour densities to own density
        let factors = (0..n)
            .map(|i| {
                let count = neighbors[i].len().max(1) as f64;
                let lof = neighbors[i]
                    .iter()
                    .map(|&(j, _)| lrd[j] / lrd[i])
                    .sum::<f64>()
                    / count;
                -lof
            })
            .collect();

        Ok(factors)
    }
}
