// src/store/schema.rs
// Idempotent schema bootstrap for the analysis store.
//
// The certificate and validation_result tables are owned by the ingestion
// service; they are created here as well so a fresh store (or the
// in-memory test store) is immediately usable. ai_analysis_result is the
// only table this service writes.

use libsql::Connection;
use tracing::debug;

use crate::error::{AnalysisError, Result};

const TABLES: &[(&str, &str)] = &[
    (
        "certificate",
        r#"
        CREATE TABLE IF NOT EXISTS certificate (
            fingerprint_sha256 TEXT PRIMARY KEY,
            certificate_type TEXT NOT NULL,
            country_code TEXT,
            version INTEGER,
            signature_algorithm TEXT,
            public_key_algorithm TEXT,
            public_key_size INTEGER,
            public_key_curve TEXT,
            key_usage TEXT,
            extended_key_usage TEXT,
            is_ca INTEGER,
            path_len_constraint INTEGER,
            is_self_signed INTEGER,
            subject_key_identifier TEXT,
            authority_key_identifier TEXT,
            crl_distribution_points TEXT,
            ocsp_responder_url TEXT,
            not_before TEXT,
            not_after TEXT,
            validation_status TEXT,
            subject_dn TEXT,
            issuer_dn TEXT,
            serial_number TEXT
        );
    "#,
    ),
    (
        "validation_result",
        r#"
        CREATE TABLE IF NOT EXISTS validation_result (
            certificate_id TEXT NOT NULL,
            trust_chain_valid INTEGER,
            icao_compliant INTEGER,
            icao_violations TEXT,
            icao_key_usage_compliant INTEGER,
            icao_algorithm_compliant INTEGER,
            icao_key_size_compliant INTEGER,
            icao_extensions_compliant INTEGER,
            signature_valid INTEGER
        );
    "#,
    ),
    (
        "ai_analysis_result",
        r#"
        CREATE TABLE IF NOT EXISTS ai_analysis_result (
            id TEXT PRIMARY KEY,
            fingerprint TEXT UNIQUE NOT NULL,
            certificate_type TEXT,
            country_code TEXT,
            anomaly_score REAL,
            anomaly_label TEXT,
            isolation_forest_score REAL,
            lof_score REAL,
            structural_anomaly_score REAL,
            issuer_anomaly_score REAL,
            temporal_anomaly_score REAL,
            risk_score REAL,
            risk_level TEXT,
            risk_factors TEXT,
            forensic_risk_score REAL,
            forensic_risk_level TEXT,
            forensic_findings TEXT,
            feature_vector TEXT,
            anomaly_explanations TEXT,
            analysis_version TEXT,
            analyzed_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
    "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_validation_certificate_id ON validation_result (certificate_id);",
    "CREATE INDEX IF NOT EXISTS idx_analysis_country ON ai_analysis_result (country_code);",
    "CREATE INDEX IF NOT EXISTS idx_analysis_anomaly_score ON ai_analysis_result (anomaly_score);",
    "CREATE INDEX IF NOT EXISTS idx_analysis_risk_level ON ai_analysis_result (risk_level);",
];

/// Apply the full schema. Safe to call on every startup.
pub async fn apply_schema(conn: &Connection) -> Result<()> {
    for (name, ddl) in TABLES {
        conn.execute(*ddl, ())
            .await
            .map_err(|e| AnalysisError::DataSource(format!("schema bootstrap ({}): {}", name, e)))?;
        debug!("Schema ensured: {}", name);
    }
    for ddl in INDEXES {
        conn.execute(*ddl, ())
            .await
            .map_err(|e| AnalysisError::DataSource(format!("index bootstrap: {}", e)))?;
    }
    Ok(())
}
