// src/store/loader.rs
// Population loader: one LEFT JOIN over certificate + validation_result,
// filtered to the four supported types, deduplicated by fingerprint
// (keep first). Every column is materialised as a primitive.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::Row;
use tracing::info;

use crate::error::{AnalysisError, Result};
use crate::population::{CertificateRecord, CertificateType, Population};
use crate::store::PkdStore;

// Column order of LOAD_QUERY; the index comments below follow it.
const LOAD_QUERY: &str = r#"
    SELECT c.fingerprint_sha256, c.certificate_type, c.country_code,
           c.version, c.signature_algorithm, c.public_key_algorithm,
           c.public_key_size, c.public_key_curve,
           c.key_usage, c.extended_key_usage,
           c.is_ca, c.path_len_constraint, c.is_self_signed,
           c.subject_key_identifier, c.authority_key_identifier,
           c.crl_distribution_points, c.ocsp_responder_url,
           c.not_before, c.not_after, c.validation_status,
           c.subject_dn, c.issuer_dn, c.serial_number,
           v.trust_chain_valid, v.icao_compliant, v.icao_violations,
           v.icao_key_usage_compliant, v.icao_algorithm_compliant,
           v.icao_key_size_compliant, v.icao_extensions_compliant,
           v.signature_valid
    FROM certificate c
    LEFT JOIN validation_result v ON c.fingerprint_sha256 = v.certificate_id
    WHERE c.certificate_type IN ('CSCA', 'DSC', 'DSC_NC', 'MLSC')
"#;

impl PkdStore {
    /// Load the full certificate population for one pipeline run.
    pub async fn load_population(&self) -> Result<Population> {
        let conn = self.connection()?;

        info!("Loading certificate population...");
        let mut rows = conn
            .query(LOAD_QUERY, ())
            .await
            .map_err(|e| AnalysisError::DataSource(format!("load query failed: {}", e)))?;

        let mut records = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AnalysisError::DataSource(format!("row fetch failed: {}", e)))?
        {
            let record = map_row(&row)?;
            if seen.insert(record.fingerprint.clone()) {
                records.push(record);
            }
        }

        info!("Loaded {} certificates", records.len());
        Ok(Population::new(records))
    }
}

fn map_row(row: &Row) -> Result<CertificateRecord> {
    Ok(CertificateRecord {
        fingerprint: get_string(row, 0)?,
        certificate_type: CertificateType::parse(&get_string(row, 1)?),
        country_code: get_string(row, 2)?,
        version: get_opt_i64(row, 3)?,
        signature_algorithm: get_string(row, 4)?,
        public_key_algorithm: get_string(row, 5)?,
        public_key_size: get_opt_i64(row, 6)?,
        public_key_curve: get_opt_string(row, 7)?,
        key_usage: get_opt_string(row, 8)?,
        extended_key_usage: get_opt_string(row, 9)?,
        is_ca: get_opt_bool(row, 10)?.unwrap_or(false),
        path_len_constraint: get_opt_i64(row, 11)?,
        is_self_signed: get_opt_bool(row, 12)?.unwrap_or(false),
        subject_key_identifier: get_opt_string(row, 13)?,
        authority_key_identifier: get_opt_string(row, 14)?,
        crl_distribution_points: get_opt_string(row, 15)?,
        ocsp_responder_url: get_opt_string(row, 16)?,
        not_before: get_opt_timestamp(row, 17)?,
        not_after: get_opt_timestamp(row, 18)?,
        validation_status: get_opt_string(row, 19)?,
        subject_dn: get_opt_string(row, 20)?.unwrap_or_default(),
        issuer_dn: get_opt_string(row, 21)?.unwrap_or_default(),
        serial_number: get_opt_string(row, 22)?.unwrap_or_default(),
        trust_chain_valid: get_opt_bool(row, 23)?,
        icao_compliant: get_opt_bool(row, 24)?,
        icao_violations: get_opt_string(row, 25)?,
        icao_key_usage_compliant: get_opt_bool(row, 26)?,
        icao_algorithm_compliant: get_opt_bool(row, 27)?,
        icao_key_size_compliant: get_opt_bool(row, 28)?,
        icao_extensions_compliant: get_opt_bool(row, 29)?,
        signature_valid: get_opt_bool(row, 30)?,
    })
}

fn get_string(row: &Row, idx: i32) -> Result<String> {
    row.get::<Option<String>>(idx)
        .map(|v| v.unwrap_or_default())
        .map_err(|e| AnalysisError::DataSource(format!("column {}: {}", idx, e)))
}

fn get_opt_string(row: &Row, idx: i32) -> Result<Option<String>> {
    row.get::<Option<String>>(idx)
        .map_err(|e| AnalysisError::DataSource(format!("column {}: {}", idx, e)))
}

fn get_opt_i64(row: &Row, idx: i32) -> Result<Option<i64>> {
    row.get::<Option<i64>>(idx)
        .map_err(|e| AnalysisError::DataSource(format!("column {}: {}", idx, e)))
}

fn get_opt_bool(row: &Row, idx: i32) -> Result<Option<bool>> {
    Ok(get_opt_i64(row, idx)?.map(|v| v != 0))
}

fn get_opt_timestamp(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    Ok(get_opt_string(row, idx)?.and_then(|s| parse_timestamp(&s)))
}

/// Parse RFC 3339 first, then the two naive layouts older ingesters used.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}
