// src/pipeline.rs
// Pipeline orchestration and the analysis control surface.
//
// Stage order within a run: load → features → detector → extensions →
// issuer → risk → write, with fixed progress checkpoints after each
// stage and linear progress through the writes. The stages between
// features and risk are deterministic and independent given the feature
// matrix.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::config::AnalysisConfig;
use crate::detector::{classify_anomaly, AnomalyDetector, DetectionOutput};
use crate::error::Result;
use crate::extensions;
use crate::features::{self, RowMeta, FEATURE_NAMES};
use crate::issuer;
use crate::job::{JobController, JobState};
use crate::risk::{self, RiskAssessment};
use crate::store::writer::{AnalysisRow, ResultWriter};
use crate::store::PkdStore;

// ==================== SERVICE ====================

/// Control surface consumed by the HTTP collaborator: start a run
/// (accepted or conflict) and read the job-state record.
pub struct AnalysisService {
    store: PkdStore,
    config: AnalysisConfig,
    job: Arc<JobController>,
}

impl AnalysisService {
    pub fn new(store: PkdStore, config: AnalysisConfig) -> Self {
        Self {
            store,
            config,
            job: Arc::new(JobController::new()),
        }
    }

    pub fn job(&self) -> Arc<JobController> {
        self.job.clone()
    }

    /// The job-state record, verbatim.
    pub fn job_status(&self) -> JobState {
        self.job.snapshot()
    }

    /// Start a pipeline run on a background task. Returns immediately;
    /// `StateConflict` when a run is already RUNNING.
    pub fn start_analysis(&self) -> Result<()> {
        self.job.try_start()?;

        let store = self.store.clone();
        let config = self.config.clone();
        let job = self.job.clone();

        tokio::spawn(async move {
            if let Err(e) = run_pipeline(&store, &config, &job).await {
                // Full detail to the log sink only; the job record keeps
                // the generic message.
                error!("Analysis failed: {}", e);
                job.fail();
            }
        });

        Ok(())
    }
}

// ==================== PIPELINE ====================

/// Execute one full analysis run. The caller must already hold the
/// RUNNING transition (see `AnalysisService::start_analysis`).
pub async fn run_pipeline(
    store: &PkdStore,
    config: &AnalysisConfig,
    job: &JobController,
) -> Result<()> {
    info!("Analysis run starting (version {})", config.model_version);

    // Stage 1: load
    let population = store.load_population().await?;
    let total = population.len();
    job.set_total(total);
    job.set_progress(0.10);

    if total == 0 {
        info!("Empty population, nothing to analyse");
        job.complete();
        return Ok(());
    }

    let now = Utc::now();

    // Stage 2: feature engineering
    let (metadata, feature_matrix) = features::engineer(&population, now);
    job.set_progress(0.25);

    // Stage 3: anomaly detection (type-partitioned)
    let detector = AnomalyDetector::new(config.anomaly_contamination, config.lof_neighbors);
    let cert_types = population.certificate_types();
    let detection = detector.fit_predict(&feature_matrix, Some(&cert_types));
    job.set_progress(0.45);

    // Stage 4: extension compliance
    let structural_scores: Vec<f64> = population
        .iter()
        .map(|record| extensions::check(record).structural_score)
        .collect();
    job.set_progress(0.55);

    // Stage 5: issuer profiling
    let profiles = issuer::build_profiles(&population);
    let issuer_scores = issuer::score(&population, &profiles);
    job.set_progress(0.65);

    // Stage 6: composite risk
    let assessments = risk::score(
        &population,
        now,
        &detection.combined,
        &structural_scores,
        &issuer_scores,
    );
    job.set_progress(0.75);

    // Stage 7: persist
    let rows = assemble_rows(
        &metadata,
        &feature_matrix,
        &detection,
        &structural_scores,
        &issuer_scores,
        assessments,
        &config.model_version,
    );
    ResultWriter::new(config.batch_size)
        .write(store, &rows, job)
        .await?;

    job.complete();
    info!("Analysis complete: {} certificates processed", total);
    Ok(())
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

fn assemble_rows(
    metadata: &[RowMeta],
    feature_matrix: &ndarray::Array2<f64>,
    detection: &DetectionOutput,
    structural_scores: &[f64],
    issuer_scores: &[f64],
    assessments: Vec<RiskAssessment>,
    model_version: &str,
) -> Vec<AnalysisRow> {
    metadata
        .iter()
        .zip(assessments)
        .enumerate()
        .map(|(i, (meta, assessment))| {
            let feature_vector: BTreeMap<String, f64> = FEATURE_NAMES
                .iter()
                .enumerate()
                .map(|(j, name)| (name.to_string(), round6(feature_matrix[[i, j]])))
                .collect();

            let combined = detection.combined[i];

            // Derived, never recomputed: temporal category / 10
            let temporal_anomaly_score = assessment
                .forensic
                .categories
                .get("temporal_pattern")
                .copied()
                .unwrap_or(0.0)
                / 10.0;

            AnalysisRow {
                fingerprint: meta.fingerprint.clone(),
                certificate_type: meta
                    .certificate_type
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
                country_code: meta.country_code.clone(),
                anomaly_score: round6(combined),
                anomaly_label: classify_anomaly(combined),
                isolation_forest_score: round6(detection.isolation_forest[i]),
                lof_score: round6(detection.lof[i]),
                structural_anomaly_score: structural_scores[i],
                issuer_anomaly_score: round6(issuer_scores[i]),
                temporal_anomaly_score,
                risk_score: assessment.risk_score,
                risk_level: assessment.risk_level,
                risk_factors: assessment.risk_factors,
                forensic_risk_score: assessment.forensic_risk_score,
                forensic_risk_level: assessment.forensic_risk_level,
                forensic_findings: assessment.forensic,
                feature_vector,
                anomaly_explanations: detection.explanations[i].clone(),
                analysis_version: model_version.to_string(),
            }
        })
        .collect()
}
