// src/detector/mod.rs
// Dual-model anomaly detection: Isolation Forest (global structure) +
// Local Outlier Factor (local density), fitted per certificate type.
//
// Every run refits from scratch; no model state survives between runs.
// Scores are min-max normalised within each fitted subset, so each type
// competes only against its own population.

pub mod forest;
pub mod lof;

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use tracing::{info, warn};

use crate::features::FEATURE_NAMES;
use crate::labels;
use crate::population::CertificateType;

use self::forest::IsolationForest;
use self::lof::LocalOutlierFactor;

const NUM_TREES: usize = 200;
const SUBSAMPLE_SIZE: usize = 256;
const FOREST_SEED: u64 = 42;

const EXPLANATION_THRESHOLD: f64 = 0.3;
const EXPLANATION_TOP_K: usize = 5;
const EXPLANATION_MIN_SIGMA: f64 = 1.0;

// ==================== LABELS ====================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyLabel {
    Normal,
    Suspicious,
    Anomalous,
}

impl AnomalyLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyLabel::Normal => "NORMAL",
            AnomalyLabel::Suspicious => "SUSPICIOUS",
            AnomalyLabel::Anomalous => "ANOMALOUS",
        }
    }
}

/// Label thresholds: ≥ 0.7 anomalous, ≥ 0.3 suspicious.
pub fn classify_anomaly(score: f64) -> AnomalyLabel {
    if score >= 0.7 {
        AnomalyLabel::Anomalous
    } else if score >= 0.3 {
        AnomalyLabel::Suspicious
    } else {
        AnomalyLabel::Normal
    }
}

// ==================== PARAMETERS ====================

/// Per-type model parameters. Contamination is carried for parity with the
/// model interface; normalised scores do not depend on it.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    pub contamination: f64,
    pub lof_neighbors: usize,
    pub min_samples: usize,
}

impl DetectorParams {
    /// Unknown types get DSC defaults.
    pub fn for_type(cert_type: Option<CertificateType>) -> Self {
        match cert_type {
            Some(CertificateType::Csca) => DetectorParams {
                contamination: 0.05,
                lof_neighbors: 15,
                min_samples: 30,
            },
            Some(CertificateType::DscNc) => DetectorParams {
                contamination: 0.10,
                lof_neighbors: 15,
                min_samples: 30,
            },
            Some(CertificateType::Mlsc) => DetectorParams {
                contamination: 0.05,
                lof_neighbors: 5,
                min_samples: 10,
            },
            Some(CertificateType::Dsc) | None => DetectorParams {
                contamination: 0.05,
                lof_neighbors: 20,
                min_samples: 30,
            },
        }
    }
}

// ==================== OUTPUT ====================

#[derive(Debug, Clone, Default)]
pub struct DetectionOutput {
    pub combined: Vec<f64>,
    pub isolation_forest: Vec<f64>,
    pub lof: Vec<f64>,
    pub explanations: Vec<Vec<String>>,
}

// ==================== DETECTOR ====================

pub struct AnomalyDetector {
    legacy_contamination: f64,
    legacy_lof_neighbors: usize,
}

impl AnomalyDetector {
    pub fn new(contamination: f64, lof_neighbors: usize) -> Self {
        Self {
            legacy_contamination: contamination,
            legacy_lof_neighbors: lof_neighbors,
        }
    }

    /// Fit models and score every row.
    ///
    /// With `cert_types` (row-aligned) models fit independently per type;
    /// without it a single model fits the whole matrix using the
    /// configured legacy parameters.
    pub fn fit_predict(
        &self,
        features: &Array2<f64>,
        cert_types: Option<&[Option<CertificateType>]>,
    ) -> DetectionOutput {
        let n = features.nrows();
        let mut output = DetectionOutput {
            combined: vec![0.0; n],
            isolation_forest: vec![0.0; n],
            lof: vec![0.0; n],
            explanations: vec![Vec::new(); n],
        };
        if n == 0 {
            return output;
        }

        match cert_types {
            Some(types) => {
                let mut groups: BTreeMap<Option<CertificateType>, Vec<usize>> = BTreeMap::new();
                for (i, t) in types.iter().enumerate() {
                    groups.entry(*t).or_default().push(i);
                }
                for (type_key, indices) in groups {
                    let params = DetectorParams::for_type(type_key);
                    info!(
                        "Fitting anomaly models: type={} samples={}",
                        type_key.map(|t| t.as_str()).unwrap_or("UNKNOWN"),
                        indices.len()
                    );
                    self.fit_subset(features, &indices, &params, &mut output);
                }
            }
            None => {
                let params = DetectorParams {
                    contamination: self.legacy_contamination,
                    lof_neighbors: self.legacy_lof_neighbors,
                    min_samples: 4,
                };
                let indices: Vec<usize> = (0..n).collect();
                info!("Fitting anomaly models on full matrix: samples={}", n);
                self.fit_subset(features, &indices, &params, &mut output);
            }
        }

        let anomalous = output.combined.iter().filter(|s| **s >= 0.7).count();
        let suspicious = output
            .combined
            .iter()
            .filter(|s| **s >= 0.3 && **s < 0.7)
            .count();
        info!(
            "Anomaly detection complete: {:.1}% anomalous, {:.1}% suspicious",
            100.0 * anomalous as f64 / n as f64,
            100.0 * suspicious as f64 / n as f64
        );
        output
    }

    fn fit_subset(
        &self,
        features: &Array2<f64>,
        indices: &[usize],
        params: &DetectorParams,
        output: &mut DetectionOutput,
    ) {
        let m = indices.len();
        if m == 0 {
            return;
        }

        let subset = features.select(Axis(0), indices);
        let scaled = standardize(&subset);

        let (if_scores, lof_scores, combined) = if m < params.min_samples {
            let fallback = normalize(&robust_fallback_scores(&scaled));
            (fallback.clone(), fallback.clone(), fallback)
        } else {
            match self.fit_models(&scaled, params) {
                Ok((if_raw, lof_raw)) => {
                    let if_scores = normalize(&if_raw);
                    let lof_scores = normalize(&lof_raw);
                    let combined: Vec<f64> = if_scores
                        .iter()
                        .zip(lof_scores.iter())
                        .map(|(f, l)| 0.6 * f + 0.4 * l)
                        .collect();
                    (if_scores, lof_scores, combined)
                }
                Err(e) => {
                    warn!("Model fit failed, using rule-based fallback: {}", e);
                    let fallback = normalize(&robust_fallback_scores(&scaled));
                    (fallback.clone(), fallback.clone(), fallback)
                }
            }
        };

        let explanations = generate_explanations(&scaled, &combined);

        for (local, &global) in indices.iter().enumerate() {
            output.isolation_forest[global] = if_scores[local];
            output.lof[global] = lof_scores[local];
            output.combined[global] = combined[local];
            output.explanations[global] = explanations[local].clone();
        }
    }

    fn fit_models(
        &self,
        scaled: &Array2<f64>,
        params: &DetectorParams,
    ) -> crate::error::Result<(Vec<f64>, Vec<f64>)> {
        let m = scaled.nrows();

        let mut forest = IsolationForest::new(NUM_TREES, SUBSAMPLE_SIZE, FOREST_SEED);
        forest.fit(scaled.view())?;
        let if_raw: Vec<f64> = (0..m).map(|i| forest.score(scaled.row(i))).collect();

        let k = params.lof_neighbors.min(m.saturating_sub(1)).max(2);
        let factors = LocalOutlierFactor::new(k).fit_negative_outlier_factors(scaled.view())?;
        // negative_outlier_factor ≈ −1 for inliers; shift so inliers sit at 0
        let lof_raw: Vec<f64> = factors.iter().map(|nof| -nof - 1.0).collect();

        Ok((if_raw, lof_raw))
    }
}

// ==================== SUBSET MATHS ====================

/// Column-wise zero-mean unit-variance scaling; near-constant columns keep
/// their centred values (divisor 1).
fn standardize(subset: &Array2<f64>) -> Array2<f64> {
    let m = subset.nrows() as f64;
    let means = subset.mean_axis(Axis(0)).unwrap_or_else(|| {
        Array1::zeros(subset.ncols())
    });
    let mut stds = Array1::<f64>::zeros(subset.ncols());
    for j in 0..subset.ncols() {
        let variance = subset
            .column(j)
            .iter()
            .map(|v| (v - means[j]).powi(2))
            .sum::<f64>()
            / m;
        stds[j] = variance.sqrt();
    }

    let mut scaled = subset.clone();
    for mut row in scaled.rows_mut() {
        for j in 0..row.len() {
            let std = if stds[j] < 1e-10 { 1.0 } else { stds[j] };
            row[j] = (row[j] - means[j]) / std;
        }
    }
    scaled
}

/// Min-max normalisation into [0, 1]; degenerate ranges collapse to 0.
fn normalize(scores: &[f64]) -> Vec<f64> {
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max - min).is_finite() || max - min < 1e-10 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

/// Rule-based scoring for subsets too small to fit models: mean of the
/// ten largest per-feature robust deviations |x − median| / MAD, scaled
/// by 5 and capped at 1.
fn robust_fallback_scores(scaled: &Array2<f64>) -> Vec<f64> {
    let m = scaled.nrows();
    let d = scaled.ncols();
    if m == 0 {
        return Vec::new();
    }

    let mut medians = vec![0.0f64; d];
    let mut mads = vec![0.0f64; d];
    for j in 0..d {
        let mut column: Vec<f64> = scaled.column(j).to_vec();
        medians[j] = median_of(&mut column);
        let mut abs_dev: Vec<f64> = scaled
            .column(j)
            .iter()
            .map(|v| (v - medians[j]).abs())
            .collect();
        let mad = median_of(&mut abs_dev);
        mads[j] = if mad < 1e-10 { 1.0 } else { mad };
    }

    (0..m)
        .map(|i| {
            let mut deviations: Vec<f64> = (0..d)
                .map(|j| (scaled[[i, j]] - medians[j]).abs() / mads[j])
                .collect();
            deviations.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            let top: &[f64] = &deviations[..deviations.len().min(10)];
            let mean = top.iter().sum::<f64>() / top.len().max(1) as f64;
            (mean / 5.0).min(1.0)
        })
        .collect()
}

fn median_of(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Top-5 σ-deviation explanations for rows scoring ≥ 0.3.
fn generate_explanations(scaled: &Array2<f64>, combined: &[f64]) -> Vec<Vec<String>> {
    let m = scaled.nrows();
    let d = scaled.ncols();
    let means = scaled
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(d));
    let mut stds = vec![0.0f64; d];
    for (j, std) in stds.iter_mut().enumerate() {
        let variance = scaled
            .column(j)
            .iter()
            .map(|v| (v - means[j]).powi(2))
            .sum::<f64>()
            / m as f64;
        *std = variance.sqrt();
        if *std < 1e-10 {
            *std = 1.0;
        }
    }

    (0..m)
        .map(|i| {
            if combined[i] < EXPLANATION_THRESHOLD {
                return Vec::new();
            }

            let mut deviations: Vec<(usize, f64)> = (0..d)
                .map(|j| (j, (scaled[[i, j]] - means[j]).abs() / stds[j]))
                .collect();
            deviations
                .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            deviations
                .iter()
                .take(EXPLANATION_TOP_K)
                .filter(|(_, sigma)| *sigma > EXPLANATION_MIN_SIGMA)
                .map(|(j, sigma)| {
                    let name = FEATURE_NAMES.get(*j).copied().unwrap_or("feature");
                    labels::explanation_line(name, *sigma, scaled[[i, *j]] > means[*j])
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_classify_anomaly_thresholds() {
        assert_eq!(classify_anomaly(0.0), AnomalyLabel::Normal);
        assert_eq!(classify_anomaly(0.29), AnomalyLabel::Normal);
        assert_eq!(classify_anomaly(0.3), AnomalyLabel::Suspicious);
        assert_eq!(classify_anomaly(0.69), AnomalyLabel::Suspicious);
        assert_eq!(classify_anomaly(0.7), AnomalyLabel::Anomalous);
        assert_eq!(classify_anomaly(1.0), AnomalyLabel::Anomalous);
    }

    #[test]
    fn test_per_type_parameters() {
        let csca = DetectorParams::for_type(Some(CertificateType::Csca));
        assert_eq!((csca.lof_neighbors, csca.min_samples), (15, 30));
        let mlsc = DetectorParams::for_type(Some(CertificateType::Mlsc));
        assert_eq!((mlsc.lof_neighbors, mlsc.min_samples), (5, 10));
        let dsc_nc = DetectorParams::for_type(Some(CertificateType::DscNc));
        assert!((dsc_nc.contamination - 0.10).abs() < 1e-9);
        // unknown falls back to DSC defaults
        let unknown = DetectorParams::for_type(None);
        assert_eq!(unknown.lof_neighbors, 20);
    }

    #[test]
    fn test_normalize_endpoints() {
        let scores = normalize(&[3.0, 1.0, 2.0]);
        assert_eq!(scores, vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_normalize_degenerate_range() {
        let scores = normalize(&[2.0, 2.0, 2.0]);
        assert_eq!(scores, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fallback_scores_bounded() {
        let scaled = arr2(&[
            [0.0, 0.0],
            [0.1, -0.1],
            [-0.1, 0.1],
            [5.0, 5.0], // clear outlier
        ]);
        let scores = robust_fallback_scores(&scaled);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores[3] > scores[0]);
    }

    #[test]
    fn test_small_subset_uses_fallback_and_fills_all_scores() {
        // 5 MLSC rows < min_samples(10): fallback fills IF = LOF = combined
        let features = arr2(&[
            [1.0, 0.0, 0.0],
            [1.1, 0.1, 0.0],
            [0.9, -0.1, 0.0],
            [1.0, 0.0, 0.1],
            [9.0, 4.0, 3.0],
        ]);
        let types = vec![Some(CertificateType::Mlsc); 5];
        let detector = AnomalyDetector::new(0.05, 20);
        let output = detector.fit_predict(&features, Some(&types));

        for i in 0..5 {
            assert_eq!(output.combined[i], output.isolation_forest[i]);
            assert_eq!(output.combined[i], output.lof[i]);
            assert!((0.0..=1.0).contains(&output.combined[i]));
        }
        // normalisation endpoints exist
        assert!(output.combined.iter().any(|s| *s == 0.0));
        assert!(output.combined.iter().any(|s| *s == 1.0));
        // the outlier row sits at the top endpoint
        assert_eq!(output.combined[4], 1.0);
    }

    #[test]
    fn test_full_model_path_scores_in_range() {
        // 40 DSC rows: above min_samples, real IF + LOF fit
        let mut rows = Vec::new();
        for i in 0..39 {
            let x = (i % 7) as f64 * 0.1;
            let y = (i % 5) as f64 * 0.1;
            rows.push([x, y, x + y]);
        }
        rows.push([50.0, 50.0, 100.0]);
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let features = Array2::from_shape_vec((40, 3), flat).unwrap();
        let types = vec![Some(CertificateType::Dsc); 40];

        let detector = AnomalyDetector::new(0.05, 20);
        let output = detector.fit_predict(&features, Some(&types));

        assert!(output.combined.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(output.isolation_forest.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(output.lof.iter().all(|s| (0.0..=1.0).contains(s)));
        // the planted outlier dominates
        let max_idx = output
            .combined
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(max_idx, 39);
        // its explanation lines exist and carry the localised format
        assert!(!output.explanations[39].is_empty());
        assert!(output.explanations[39][0].contains("평균 대비"));
    }

    #[test]
    fn test_types_partition_independently() {
        // Scores for one type must not change when another type's rows do
        let base = Array2::from_shape_fn((12, 2), |(i, j)| ((i * 3 + j) % 5) as f64);
        let mut types = vec![Some(CertificateType::Mlsc); 12];
        for t in types.iter_mut().skip(6) {
            *t = Some(CertificateType::DscNc);
        }

        let detector = AnomalyDetector::new(0.05, 20);
        let first = detector.fit_predict(&base, Some(&types));

        let mut perturbed = base.clone();
        for i in 6..12 {
            perturbed[[i, 0]] += 100.0;
        }
        let second = detector.fit_predict(&perturbed, Some(&types));

        for i in 0..6 {
            assert_eq!(first.combined[i], second.combined[i]);
        }
    }

    #[test]
    fn test_legacy_path_runs_without_types() {
        let features = Array2::from_shape_fn((25, 4), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
        let detector = AnomalyDetector::new(0.05, 20);
        let output = detector.fit_predict(&features, None);
        assert_eq!(output.combined.len(), 25);
        assert!(output.combined.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_empty_matrix() {
        let features = Array2::<f64>::zeros((0, 45));
        let detector = AnomalyDetector::new(0.05, 20);
        let output = detector.fit_predict(&features, Some(&[]));
        assert!(output.combined.is_empty());
    }

    #[test]
    fn test_normal_rows_get_no_explanations() {
        let features = Array2::from_shape_fn((30, 3), |(i, _)| (i % 2) as f64);
        let types = vec![Some(CertificateType::Dsc); 30];
        let detector = AnomalyDetector::new(0.05, 20);
        let output = detector.fit_predict(&features, Some(&types));
        for (score, explanation) in output.combined.iter().zip(output.explanations.iter()) {
            if *score < 0.3 {
                assert!(explanation.is_empty());
            }
        }
    }
}
