// src/detector/forest.rs
// Isolation forest over a fitted feature subset.
//
// Scores follow the standard formulation: s(x) = 2^(-E[h(x)] / c(ψ)) where
// E[h(x)] is the mean path length over the ensemble and c(ψ) the average
// unsuccessful-search path length of a BST of the subsample size. Higher
// score = easier to isolate = more anomalous.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{AnalysisError, Result};

enum Node {
    Internal {
        split_feature: usize,
        split_value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build(
        data: ArrayView2<'_, f64>,
        indices: &mut Vec<usize>,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Self {
        let root = Self::build_recursive(data, indices, 0, height_limit, rng);
        IsolationTree { root }
    }

    fn build_recursive(
        data: ArrayView2<'_, f64>,
        indices: &mut Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Node {
        if indices.len() <= 1 || depth >= height_limit {
            return Node::Leaf { size: indices.len() };
        }
        let dim = data.ncols();
        if dim == 0 {
            return Node::Leaf { size: indices.len() };
        }

        let split_feature = rng.gen_range(0..dim);
        let mut min_val = f64::INFINITY;
        let mut max_val = f64::NEG_INFINITY;
        for &i in indices.iter() {
            let v = data[[i, split_feature]];
            if v < min_val {
                min_val = v;
            }
            if v > max_val {
                max_val = v;
            }
        }
        if (max_val - min_val).abs() < 1e-10 {
            return Node::Leaf { size: indices.len() };
        }

        let split_value = rng.gen_range(min_val..max_val);
        let mut left_indices: Vec<usize> = Vec::new();
        let mut right_indices: Vec<usize> = Vec::new();
        for &i in indices.iter() {
            if data[[i, split_feature]] < split_value {
                left_indices.push(i);
            } else {
                right_indices.push(i);
            }
        }

        Node::Internal {
            split_feature,
            split_value,
            left: Box::new(Self::build_recursive(
                data,
                &mut left_indices,
                depth + 1,
                height_limit,
                rng,
            )),
            right: Box::new(Self::build_recursive(
                data,
                &mut right_indices,
                depth + 1,
                height_limit,
                rng,
            )),
        }
    }

    fn path_length(&self, point: ArrayView1<'_, f64>) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { size } => return depth as f64 + c_factor(*size),
                Node::Internal {
                    split_feature,
                    split_value,
                    left,
                    right,
                } => {
                    node = if point[*split_feature] < *split_value {
                        left
                    } else {
                        right
                    };
                    depth += 1;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful BST search:
/// c(n) = 2·H(n−1) − 2·(n−1)/n
fn c_factor(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n_f = n as f64;
    2.0 * harmonic(n - 1) - 2.0 * (n_f - 1.0) / n_f
}

fn harmonic(n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    // H(n) ≈ ln(n) + Euler-Mascheroni constant
    (n as f64).ln() + 0.577_215_664_9
}

pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    num_trees: usize,
    subsample_size: usize,
    seed: u64,
    trained: bool,
}

impl IsolationForest {
    pub fn new(num_trees: usize, subsample_size: usize, seed: u64) -> Self {
        IsolationForest {
            trees: Vec::new(),
            num_trees,
            subsample_size,
            seed,
            trained: false,
        }
    }

    /// Fit the ensemble. Deterministic for a given seed and input.
    pub fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<()> {
        let n = data.nrows();
        if n == 0 || data.ncols() == 0 {
            return Err(AnalysisError::Model(
                "isolation forest fit on empty matrix".into(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let subsample = self.subsample_size.min(n);
        let height_limit = (subsample as f64).log2().ceil().max(1.0) as usize;
        self.trees.clear();

        let all_indices: Vec<usize> = (0..n).collect();
        for _ in 0..self.num_trees {
            let mut sample: Vec<usize> = if n <= self.subsample_size {
                all_indices.clone()
            } else {
                let mut shuffled = all_indices.clone();
                shuffled.shuffle(&mut rng);
                shuffled.truncate(self.subsample_size);
                shuffled
            };
            self.trees
                .push(IsolationTree::build(data, &mut sample, height_limit, &mut rng));
        }
        self.trained = true;
        Ok(())
    }

    /// Anomaly score in (0, 1); untrained forests answer a neutral 0.5.
    pub fn score(&self, point: ArrayView1<'_, f64>) -> f64 {
        if !self.trained || self.trees.is_empty() {
            return 0.5;
        }
        let avg_path: f64 = self
            .trees
            .iter()
            .map(|t| t.path_length(point))
            .sum::<f64>()
            / self.trees.len() as f64;
        let c_n = c_factor(self.subsample_size);
        if c_n <= 0.0 {
            return 0.5;
        }
        2.0_f64.powf(-avg_path / c_n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn cluster(center: (f64, f64), n: usize, spread: f64, seed: u64) -> Vec<[f64; 2]> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                [
                    center.0 + rng.gen_range(-spread..spread),
                    center.1 + rng.gen_range(-spread..spread),
                ]
            })
            .collect()
    }

    fn matrix(points: &[[f64; 2]]) -> Array2<f64> {
        let flat: Vec<f64> = points.iter().flatten().copied().collect();
        Array2::from_shape_vec((points.len(), 2), flat).unwrap()
    }

    #[test]
    fn test_outlier_scores_higher_than_inlier() {
        let data = matrix(&cluster((0.0, 0.0), 200, 1.0, 7));
        let mut forest = IsolationForest::new(100, 256, 42);
        forest.fit(data.view()).unwrap();

        let inlier = ndarray::arr1(&[0.0, 0.0]);
        let outlier = ndarray::arr1(&[20.0, 20.0]);
        assert!(forest.score(outlier.view()) > forest.score(inlier.view()));
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let data = matrix(&cluster((0.0, 0.0), 100, 1.0, 7));
        let point = ndarray::arr1(&[3.0, -2.0]);

        let mut a = IsolationForest::new(50, 64, 42);
        a.fit(data.view()).unwrap();
        let mut b = IsolationForest::new(50, 64, 42);
        b.fit(data.view()).unwrap();

        assert_eq!(a.score(point.view()), b.score(point.view()));
    }

    #[test]
    fn test_empty_matrix_is_model_error() {
        let data = Array2::<f64>::zeros((0, 2));
        let mut forest = IsolationForest::new(10, 64, 42);
        assert!(forest.fit(data.view()).is_err());
        // untrained forest answers neutral
        assert_eq!(forest.score(ndarray::arr1(&[0.0, 0.0]).view()), 0.5);
    }

    #[test]
    fn test_constant_matrix_scores_uniformly() {
        let data = Array2::<f64>::ones((20, 3));
        let mut forest = IsolationForest::new(20, 64, 42);
        forest.fit(data.view()).unwrap();
        let s = forest.score(ndarray::arr1(&[1.0, 1.0, 1.0]).view());
        assert!(s > 0.0 && s < 1.0);
    }
}
