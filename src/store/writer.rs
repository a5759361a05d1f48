// src/store/writer.rs
// Result writer: batched upserts keyed on the certificate fingerprint.
//
// Each batch is one transaction; job progress advances only after the
// commit. A failed commit aborts the run and leaves earlier batches in
// place for the next successful run to overwrite.

use std::collections::BTreeMap;

use libsql::params;
use tracing::info;
use uuid::Uuid;

use crate::detector::AnomalyLabel;
use crate::error::{AnalysisError, Result};
use crate::job::JobController;
use crate::risk::{ForensicReport, RiskLevel};
use crate::store::PkdStore;

/// One fully assembled analysis result, ready for persistence.
#[derive(Debug, Clone)]
pub struct AnalysisRow {
    pub fingerprint: String,
    pub certificate_type: String,
    pub country_code: String,

    pub anomaly_score: f64,
    pub anomaly_label: AnomalyLabel,
    pub isolation_forest_score: f64,
    pub lof_score: f64,
    pub structural_anomaly_score: f64,
    pub issuer_anomaly_score: f64,
    pub temporal_anomaly_score: f64,

    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub risk_factors: BTreeMap<String, f64>,

    pub forensic_risk_score: f64,
    pub forensic_risk_level: RiskLevel,
    pub forensic_findings: ForensicReport,

    pub feature_vector: BTreeMap<String, f64>,
    pub anomaly_explanations: Vec<String>,
    pub analysis_version: String,
}

const UPSERT: &str = r#"
    INSERT INTO ai_analysis_result (
        id, fingerprint, certificate_type, country_code,
        anomaly_score, anomaly_label, isolation_forest_score, lof_score,
        structural_anomaly_score, issuer_anomaly_score, temporal_anomaly_score,
        risk_score, risk_level, risk_factors,
        forensic_risk_score, forensic_risk_level, forensic_findings,
        feature_vector, anomaly_explanations, analysis_version, analyzed_at
    ) VALUES (
        ?1, ?2, ?3, ?4,
        ?5, ?6, ?7, ?8,
        ?9, ?10, ?11,
        ?12, ?13, ?14,
        ?15, ?16, ?17,
        ?18, ?19, ?20, CURRENT_TIMESTAMP
    )
    ON CONFLICT(fingerprint) DO UPDATE SET
        anomaly_score = excluded.anomaly_score,
        anomaly_label = excluded.anomaly_label,
        isolation_forest_score = excluded.isolation_forest_score,
        lof_score = excluded.lof_score,
        structural_anomaly_score = excluded.structural_anomaly_score,
        issuer_anomaly_score = excluded.issuer_anomaly_score,
        temporal_anomaly_score = excluded.temporal_anomaly_score,
        risk_score = excluded.risk_score,
        risk_level = excluded.risk_level,
        risk_factors = excluded.risk_factors,
        forensic_risk_score = excluded.forensic_risk_score,
        forensic_risk_level = excluded.forensic_risk_level,
        forensic_findings = excluded.forensic_findings,
        feature_vector = excluded.feature_vector,
        anomaly_explanations = excluded.anomaly_explanations,
        analysis_version = excluded.analysis_version,
        analyzed_at = CURRENT_TIMESTAMP
"#;

pub struct ResultWriter {
    batch_size: usize,
}

impl ResultWriter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Upsert all rows in loader order, committing per batch and advancing
    /// job progress linearly from 0.75 to 1.0.
    pub async fn write(
        &self,
        store: &PkdStore,
        rows: &[AnalysisRow],
        job: &JobController,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let conn = store
            .connection()
            .map_err(|e| AnalysisError::Write(e.to_string()))?;

        let n = rows.len();
        let mut written = 0usize;

        for batch in rows.chunks(self.batch_size) {
            let tx = conn
                .transaction()
                .await
                .map_err(|e| AnalysisError::Write(format!("transaction begin: {}", e)))?;

            for row in batch {
                let risk_factors = serde_json::to_string(&row.risk_factors)
                    .map_err(|e| AnalysisError::Write(format!("risk_factors json: {}", e)))?;
                let feature_vector = serde_json::to_string(&row.feature_vector)
                    .map_err(|e| AnalysisError::Write(format!("feature_vector json: {}", e)))?;
                let explanations = serde_json::to_string(&row.anomaly_explanations)
                    .map_err(|e| AnalysisError::Write(format!("explanations json: {}", e)))?;
                let findings = serde_json::to_string(&row.forensic_findings)
                    .map_err(|e| AnalysisError::Write(format!("forensic_findings json: {}", e)))?;

                tx.execute(
                    UPSERT,
                    params![
                        Uuid::new_v4().to_string(),
                        row.fingerprint.clone(),
                        row.certificate_type.clone(),
                        row.country_code.clone(),
                        row.anomaly_score,
                        row.anomaly_label.as_str(),
                        row.isolation_forest_score,
                        row.lof_score,
                        row.structural_anomaly_score,
                        row.issuer_anomaly_score,
                        row.temporal_anomaly_score,
                        row.risk_score,
                        row.risk_level.as_str(),
                        risk_factors,
                        row.forensic_risk_score,
                        row.forensic_risk_level.as_str(),
                        findings,
                        feature_vector,
                        explanations,
                        row.analysis_version.clone(),
                    ],
                )
                .await
                .map_err(|e| AnalysisError::Write(format!("upsert {}: {}", row.fingerprint, e)))?;
            }

            tx.commit()
                .await
                .map_err(|e| AnalysisError::Write(format!("batch commit: {}", e)))?;

            written += batch.len();
            job.set_processed(written);
            job.set_progress(0.75 + 0.25 * written as f64 / n as f64);
        }

        info!("Saved {} analysis results", n);
        Ok(())
    }
}

/// Stored analysis row as read back from the store. The JSON columns are
/// parsed leniently: both pre-parsed values and text are accepted.
#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub fingerprint: String,
    pub certificate_type: String,
    pub country_code: String,
    pub anomaly_score: f64,
    pub anomaly_label: String,
    pub isolation_forest_score: f64,
    pub lof_score: f64,
    pub structural_anomaly_score: f64,
    pub issuer_anomaly_score: f64,
    pub temporal_anomaly_score: f64,
    pub risk_score: f64,
    pub risk_level: String,
    pub risk_factors: serde_json::Value,
    pub forensic_risk_score: f64,
    pub forensic_risk_level: String,
    pub forensic_findings: serde_json::Value,
    pub feature_vector: serde_json::Value,
    pub anomaly_explanations: serde_json::Value,
    pub analysis_version: String,
    pub analyzed_at: String,
}

/// Parse a JSON text column, treating NULL/empty/garbage as `fallback`.
pub fn lenient_json(raw: Option<String>, fallback: serde_json::Value) -> serde_json::Value {
    match raw {
        Some(s) if !s.trim().is_empty() => serde_json::from_str(&s).unwrap_or(fallback),
        _ => fallback,
    }
}

impl PkdStore {
    /// Fetch one stored analysis row by fingerprint.
    pub async fn fetch_analysis(&self, fingerprint: &str) -> Result<Option<StoredAnalysis>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                r#"
                SELECT fingerprint, certificate_type, country_code,
                       anomaly_score, anomaly_label, isolation_forest_score, lof_score,
                       structural_anomaly_score, issuer_anomaly_score, temporal_anomaly_score,
                       risk_score, risk_level, risk_factors,
                       forensic_risk_score, forensic_risk_level, forensic_findings,
                       feature_vector, anomaly_explanations, analysis_version, analyzed_at
                FROM ai_analysis_result WHERE fingerprint = ?1
                "#,
                params![fingerprint],
            )
            .await
            .map_err(|e| AnalysisError::DataSource(format!("fetch query failed: {}", e)))?;

        let row = match rows
            .next()
            .await
            .map_err(|e| AnalysisError::DataSource(format!("fetch row failed: {}", e)))?
        {
            Some(r) => r,
            None => return Ok(None),
        };

        let get_f64 = |idx: i32| -> f64 {
            row.get::<Option<f64>>(idx).ok().flatten().unwrap_or(0.0)
        };
        let get_str = |idx: i32| -> String {
            row.get::<Option<String>>(idx)
                .ok()
                .flatten()
                .unwrap_or_default()
        };

        Ok(Some(StoredAnalysis {
            fingerprint: get_str(0),
            certificate_type: get_str(1),
            country_code: get_str(2),
            anomaly_score: get_f64(3),
            anomaly_label: get_str(4),
            isolation_forest_score: get_f64(5),
            lof_score: get_f64(6),
            structural_anomaly_score: get_f64(7),
            issuer_anomaly_score: get_f64(8),
            temporal_anomaly_score: get_f64(9),
            risk_score: get_f64(10),
            risk_level: get_str(11),
            risk_factors: lenient_json(
                row.get::<Option<String>>(12).ok().flatten(),
                serde_json::json!({}),
            ),
            forensic_risk_score: get_f64(13),
            forensic_risk_level: get_str(14),
            forensic_findings: lenient_json(
                row.get::<Option<String>>(15).ok().flatten(),
                serde_json::json!({}),
            ),
            feature_vector: lenient_json(
                row.get::<Option<String>>(16).ok().flatten(),
                serde_json::json!({}),
            ),
            anomaly_explanations: lenient_json(
                row.get::<Option<String>>(17).ok().flatten(),
                serde_json::json!([]),
            ),
            analysis_version: get_str(18),
            analyzed_at: get_str(19),
        }))
    }

    /// Number of stored analysis rows.
    pub async fn analysis_count(&self) -> Result<i64> {
        let conn = self.connection()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM ai_analysis_result", ())
            .await
            .map_err(|e| AnalysisError::DataSource(format!("count query failed: {}", e)))?;
        let row = rows
            .next()
            .await
            .map_err(|e| AnalysisError::DataSource(format!("count row failed: {}", e)))?
            .ok_or_else(|| AnalysisError::DataSource("count returned no row".into()))?;
        row.get::<i64>(0)
            .map_err(|e| AnalysisError::DataSource(format!("count column: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_json_accepts_text_and_garbage() {
        let v = lenient_json(Some(r#"{"a": 1}"#.into()), serde_json::json!({}));
        assert_eq!(v["a"], 1);
        let v = lenient_json(Some("not json".into()), serde_json::json!({}));
        assert_eq!(v, serde_json::json!({}));
        let v = lenient_json(None, serde_json::json!([]));
        assert_eq!(v, serde_json::json!([]));
    }
}
