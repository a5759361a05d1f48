// src/reports.rs
// Population-level report computers.
//
// Two families: pure functions over the loaded population (maturity,
// trends, distributions, issuer profiles, extension anomalies) and
// readers over the analysis store (risk distribution, forensic summary,
// overall statistics).

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;
use tracing::info;

use crate::error::{AnalysisError, Result};
use crate::extensions::{self, ExtensionAnomaly};
use crate::issuer::{self, IssuerProfileEntry};
use crate::population::{ExtensionField, Population};
use crate::store::writer::lenient_json;
use crate::store::PkdStore;

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

// ==================== COUNTRY MATURITY ====================

#[derive(Debug, Clone, Serialize)]
pub struct CountryMaturity {
    pub country_code: String,
    pub maturity_score: f64,
    pub algorithm_score: f64,
    pub key_size_score: f64,
    pub compliance_score: f64,
    pub extension_score: f64,
    pub freshness_score: f64,
    pub certificate_count: usize,
}

fn key_size_quality(public_key_algorithm: &str, key_size: i64) -> f64 {
    let alg = public_key_algorithm.to_lowercase();
    if alg.contains("rsa") {
        if key_size >= 4096 {
            1.0
        } else if key_size >= 3072 {
            0.8
        } else if key_size >= 2048 {
            0.6
        } else {
            0.1
        }
    } else if alg.contains("ec") {
        if key_size >= 384 {
            1.0
        } else if key_size >= 256 {
            0.7
        } else {
            0.2
        }
    } else {
        0.3
    }
}

/// PKI maturity scores per country (0-100), best first. Countries with
/// fewer than 3 certificates are skipped.
pub fn country_maturity(population: &Population) -> Vec<CountryMaturity> {
    let mut by_country: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, record) in population.iter().enumerate() {
        if !record.country_code.is_empty() {
            by_country.entry(&record.country_code).or_default().push(i);
        }
    }

    let mut results = Vec::new();
    for (country, indices) in by_country {
        let n = indices.len();
        if n < 3 {
            continue;
        }
        let nf = n as f64;

        let mut modern = 0usize;
        let mut ecdsa = 0usize;
        let mut ks_quality_sum = 0.0;
        let mut icao_ok = 0usize;
        let mut trust_ok = 0usize;
        let mut has_cdp = 0usize;
        let mut has_aki = 0usize;
        let mut has_ski = 0usize;
        let mut expired = 0usize;

        for &i in &indices {
            let record = &population.rows[i];
            let sig = record.signature_algorithm.to_lowercase();
            if sig.contains("sha256") || sig.contains("sha384") || sig.contains("sha512") || sig.contains("pss") {
                modern += 1;
            }
            if record.public_key_algorithm.to_lowercase().contains("ec") {
                ecdsa += 1;
            }
            ks_quality_sum += key_size_quality(
                &record.public_key_algorithm,
                record.public_key_size.unwrap_or(0),
            );
            if record.is_icao_ok() {
                icao_ok += 1;
            }
            if record.trust_chain_valid == Some(true) {
                trust_ok += 1;
            }
            if record.has_extension(ExtensionField::CrlDistributionPoints) {
                has_cdp += 1;
            }
            if record.has_extension(ExtensionField::AuthorityKeyIdentifier) {
                has_aki += 1;
            }
            if record.has_extension(ExtensionField::SubjectKeyIdentifier) {
                has_ski += 1;
            }
            if record.is_expired_status() {
                expired += 1;
            }
        }

        let algorithm_score =
            (modern as f64 / nf * 100.0 + ecdsa as f64 / nf * 20.0).min(100.0);
        let key_size_score = ks_quality_sum / nf * 100.0;
        let compliance_score = (icao_ok as f64 / nf + trust_ok as f64 / nf) / 2.0 * 100.0;
        let extension_score =
            (has_cdp as f64 / nf + has_aki as f64 / nf + has_ski as f64 / nf) / 3.0 * 100.0;
        let freshness_score = (1.0 - expired as f64 / nf) * 100.0;

        let maturity = 0.25 * algorithm_score
            + 0.20 * key_size_score
            + 0.25 * compliance_score
            + 0.15 * extension_score
            + 0.15 * freshness_score;

        results.push(CountryMaturity {
            country_code: country.to_string(),
            maturity_score: round1(maturity),
            algorithm_score: round1(algorithm_score),
            key_size_score: round1(key_size_score),
            compliance_score: round1(compliance_score),
            extension_score: round1(extension_score),
            freshness_score: round1(freshness_score),
            certificate_count: n,
        });
    }

    results.sort_by(|a, b| {
        b.maturity_score
            .partial_cmp(&a.maturity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!("Computed maturity scores for {} countries", results.len());
    results
}

// ==================== ALGORITHM TRENDS ====================

#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmTrend {
    pub year: i32,
    pub algorithms: BTreeMap<String, usize>,
    pub total: usize,
}

/// Signature-algorithm distribution by issuance year (2000-2030).
pub fn algorithm_trends(population: &Population) -> Vec<AlgorithmTrend> {
    let mut by_year: BTreeMap<i32, BTreeMap<String, usize>> = BTreeMap::new();
    for record in population.iter() {
        let Some(nb) = record.not_before else { continue };
        let year = nb.year();
        if !(2000..=2030).contains(&year) {
            continue;
        }
        *by_year
            .entry(year)
            .or_default()
            .entry(record.signature_algorithm.clone())
            .or_default() += 1;
    }

    by_year
        .into_iter()
        .map(|(year, algorithms)| {
            let total = algorithms.values().sum();
            AlgorithmTrend {
                year,
                algorithms,
                total,
            }
        })
        .collect()
}

// ==================== KEY SIZE DISTRIBUTION ====================

#[derive(Debug, Clone, Serialize)]
pub struct KeySizeBucket {
    pub algorithm: String,
    pub key_size: i64,
    pub count: usize,
    pub percentage: f64,
}

/// Per (algorithm, key size) counts with percentage of total, most
/// common first.
pub fn key_size_distribution(population: &Population) -> Vec<KeySizeBucket> {
    let total = population.len();
    let mut buckets: BTreeMap<(String, i64), usize> = BTreeMap::new();
    for record in population.iter() {
        let Some(ks) = record.public_key_size else { continue };
        if record.public_key_algorithm.is_empty() {
            continue;
        }
        *buckets
            .entry((record.public_key_algorithm.clone(), ks))
            .or_default() += 1;
    }

    let mut results: Vec<KeySizeBucket> = buckets
        .into_iter()
        .map(|((algorithm, key_size), count)| KeySizeBucket {
            algorithm,
            key_size,
            count,
            percentage: if total > 0 {
                round2(100.0 * count as f64 / total as f64)
            } else {
                0.0
            },
        })
        .collect();

    results.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.algorithm.cmp(&b.algorithm))
            .then_with(|| a.key_size.cmp(&b.key_size))
    });
    results
}

// ==================== COUNTRY DETAIL ====================

#[derive(Debug, Clone, Serialize)]
pub struct CountryDetail {
    pub country_code: String,
    pub total_certificates: usize,
    pub type_distribution: BTreeMap<String, usize>,
    pub algorithm_distribution: BTreeMap<String, usize>,
    pub key_size_distribution: BTreeMap<String, usize>,
}

/// Per-country breakdown; `None` when the country has no certificates.
pub fn country_detail(population: &Population, country_code: &str) -> Option<CountryDetail> {
    let rows: Vec<_> = population
        .iter()
        .filter(|r| r.country_code == country_code)
        .collect();
    if rows.is_empty() {
        return None;
    }

    let mut type_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut algorithm_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut key_size_distribution: BTreeMap<String, usize> = BTreeMap::new();

    for record in &rows {
        if let Some(ct) = record.certificate_type {
            *type_distribution.entry(ct.as_str().to_string()).or_default() += 1;
        }
        if !record.signature_algorithm.is_empty() {
            *algorithm_distribution
                .entry(record.signature_algorithm.clone())
                .or_default() += 1;
        }
        if let Some(ks) = record.public_key_size {
            *key_size_distribution.entry(ks.to_string()).or_default() += 1;
        }
    }

    Some(CountryDetail {
        country_code: country_code.to_string(),
        total_certificates: rows.len(),
        type_distribution,
        algorithm_distribution,
        key_size_distribution,
    })
}

// ==================== ISSUER PROFILES / EXTENSION ANOMALIES ====================

/// Issuer profile report with per-issuer risk indicators.
pub fn issuer_profiles(population: &Population) -> Vec<IssuerProfileEntry> {
    let profiles = issuer::build_profiles(population);
    issuer::profile_report(&profiles)
}

/// Extension rule violations, optionally filtered, worst first.
pub fn extension_anomalies(
    population: &Population,
    cert_type: Option<&str>,
    country: Option<&str>,
    limit: usize,
) -> Vec<ExtensionAnomaly> {
    extensions::compute_extension_anomalies(population)
        .into_iter()
        .filter(|a| cert_type.map(|t| a.certificate_type == t).unwrap_or(true))
        .filter(|a| country.map(|c| a.country_code == c).unwrap_or(true))
        .take(limit)
        .collect()
}

// ==================== STORE-BACKED REPORTS ====================

#[derive(Debug, Clone, Serialize)]
pub struct RiskDistributionEntry {
    pub risk_level: String,
    pub count: i64,
    pub percentage: f64,
    pub avg_anomaly_score: f64,
}

/// Stored risk-level distribution, ordered CRITICAL → LOW.
pub async fn risk_distribution(store: &PkdStore) -> Result<Vec<RiskDistributionEntry>> {
    let conn = store.connection()?;
    let total = store.analysis_count().await?;
    if total == 0 {
        return Ok(Vec::new());
    }

    let mut rows = conn
        .query(
            r#"
            SELECT risk_level, COUNT(*) AS cnt, AVG(anomaly_score) AS avg_anomaly
            FROM ai_analysis_result
            GROUP BY risk_level
            ORDER BY CASE risk_level
                WHEN 'CRITICAL' THEN 1
                WHEN 'HIGH' THEN 2
                WHEN 'MEDIUM' THEN 3
                WHEN 'LOW' THEN 4
                ELSE 5
            END
            "#,
            (),
        )
        .await
        .map_err(|e| AnalysisError::DataSource(format!("risk distribution query: {}", e)))?;

    let mut results = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| AnalysisError::DataSource(format!("risk distribution row: {}", e)))?
    {
        let level: Option<String> = row.get(0).ok();
        let count: i64 = row.get(1).unwrap_or(0);
        let avg: f64 = row.get::<Option<f64>>(2).ok().flatten().unwrap_or(0.0);
        results.push(RiskDistributionEntry {
            risk_level: level.unwrap_or_else(|| "UNKNOWN".to_string()),
            count,
            percentage: round2(100.0 * count as f64 / total as f64),
            avg_anomaly_score: round4(avg),
        });
    }
    Ok(results)
}

// ==================== FORENSIC SUMMARY ====================

#[derive(Debug, Clone, Serialize)]
pub struct TopFinding {
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ForensicSummary {
    pub total_analyzed: i64,
    pub forensic_level_distribution: BTreeMap<String, i64>,
    pub category_avg_scores: BTreeMap<String, f64>,
    pub severity_distribution: BTreeMap<String, usize>,
    pub top_findings: Vec<TopFinding>,
}

/// Aggregate stored forensic findings: level distribution, per-category
/// average scores, severity counts and the ten most frequent findings.
pub async fn forensic_summary(store: &PkdStore) -> Result<ForensicSummary> {
    let conn = store.connection()?;

    let mut rows = conn
        .query(
            "SELECT forensic_risk_level, COUNT(*) FROM ai_analysis_result \
             WHERE forensic_risk_level IS NOT NULL GROUP BY forensic_risk_level",
            (),
        )
        .await
        .map_err(|e| AnalysisError::DataSource(format!("forensic level query: {}", e)))?;

    let mut summary = ForensicSummary::default();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| AnalysisError::DataSource(format!("forensic level row: {}", e)))?
    {
        let level: String = row.get::<Option<String>>(0).ok().flatten().unwrap_or_default();
        let count: i64 = row.get(1).unwrap_or(0);
        summary.total_analyzed += count;
        summary.forensic_level_distribution.insert(level, count);
    }
    if summary.total_analyzed == 0 {
        return Ok(summary);
    }

    let mut rows = conn
        .query(
            "SELECT forensic_findings FROM ai_analysis_result WHERE forensic_findings IS NOT NULL",
            (),
        )
        .await
        .map_err(|e| AnalysisError::DataSource(format!("forensic findings query: {}", e)))?;

    let mut category_totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    let mut finding_freq: BTreeMap<String, usize> = BTreeMap::new();

    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| AnalysisError::DataSource(format!("forensic findings row: {}", e)))?
    {
        let findings = lenient_json(
            row.get::<Option<String>>(0).ok().flatten(),
            serde_json::json!({}),
        );

        if let Some(categories) = findings.get("categories").and_then(|c| c.as_object()) {
            for (category, value) in categories {
                if let Some(score) = value.as_f64() {
                    let entry = category_totals.entry(category.clone()).or_default();
                    entry.0 += score;
                    entry.1 += 1;
                }
            }
        }
        if let Some(list) = findings.get("findings").and_then(|f| f.as_array()) {
            for finding in list {
                let severity = finding
                    .get("severity")
                    .and_then(|s| s.as_str())
                    .unwrap_or("LOW");
                *summary
                    .severity_distribution
                    .entry(severity.to_string())
                    .or_default() += 1;
                if let Some(message) = finding.get("message").and_then(|m| m.as_str()) {
                    *finding_freq.entry(message.to_string()).or_default() += 1;
                }
            }
        }
    }

    summary.category_avg_scores = category_totals
        .into_iter()
        .map(|(category, (total, count))| (category, round2(total / count.max(1) as f64)))
        .collect();

    let mut top: Vec<TopFinding> = finding_freq
        .into_iter()
        .map(|(message, count)| TopFinding { message, count })
        .collect();
    top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
    top.truncate(10);
    summary.top_findings = top;

    Ok(summary)
}

// ==================== OVERALL STATISTICS ====================

#[derive(Debug, Clone, Serialize)]
pub struct CountryAnomalyCount {
    pub country: String,
    pub total: i64,
    pub anomalous: i64,
    pub anomaly_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisStatistics {
    pub total_analyzed: i64,
    pub normal_count: i64,
    pub suspicious_count: i64,
    pub anomalous_count: i64,
    pub risk_distribution: BTreeMap<String, i64>,
    pub avg_risk_score: f64,
    pub top_anomalous_countries: Vec<CountryAnomalyCount>,
    pub last_analysis_at: Option<String>,
    pub model_version: String,
}

/// Overall stored-analysis statistics for the status surface.
pub async fn analysis_statistics(
    store: &PkdStore,
    model_version: &str,
) -> Result<AnalysisStatistics> {
    let conn = store.connection()?;
    let mut stats = AnalysisStatistics {
        model_version: model_version.to_string(),
        ..Default::default()
    };

    let mut rows = conn
        .query(
            "SELECT anomaly_label, COUNT(*) FROM ai_analysis_result GROUP BY anomaly_label",
            (),
        )
        .await
        .map_err(|e| AnalysisError::DataSource(format!("label counts query: {}", e)))?;
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| AnalysisError::DataSource(format!("label counts row: {}", e)))?
    {
        let label: String = row.get::<Option<String>>(0).ok().flatten().unwrap_or_default();
        let count: i64 = row.get(1).unwrap_or(0);
        stats.total_analyzed += count;
        match label.as_str() {
            "NORMAL" => stats.normal_count = count,
            "SUSPICIOUS" => stats.suspicious_count = count,
            "ANOMALOUS" => stats.anomalous_count = count,
            _ => {}
        }
    }

    let mut rows = conn
        .query(
            "SELECT risk_level, COUNT(*) FROM ai_analysis_result GROUP BY risk_level",
            (),
        )
        .await
        .map_err(|e| AnalysisError::DataSource(format!("risk counts query: {}", e)))?;
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| AnalysisError::DataSource(format!("risk counts row: {}", e)))?
    {
        let level: String = row.get::<Option<String>>(0).ok().flatten().unwrap_or_default();
        let count: i64 = row.get(1).unwrap_or(0);
        stats.risk_distribution.insert(level, count);
    }

    let mut rows = conn
        .query("SELECT AVG(risk_score), MAX(analyzed_at) FROM ai_analysis_result", ())
        .await
        .map_err(|e| AnalysisError::DataSource(format!("aggregate query: {}", e)))?;
    if let Some(row) = rows
        .next()
        .await
        .map_err(|e| AnalysisError::DataSource(format!("aggregate row: {}", e)))?
    {
        stats.avg_risk_score = round2(row.get::<Option<f64>>(0).ok().flatten().unwrap_or(0.0));
        stats.last_analysis_at = row.get::<Option<String>>(1).ok().flatten();
    }

    let mut rows = conn
        .query(
            r#"
            SELECT country_code,
                   COUNT(*) AS total,
                   SUM(CASE WHEN anomaly_label = 'ANOMALOUS' THEN 1 ELSE 0 END) AS anomalous
            FROM ai_analysis_result
            GROUP BY country_code
            HAVING SUM(CASE WHEN anomaly_label = 'ANOMALOUS' THEN 1 ELSE 0 END) > 0
            ORDER BY anomalous DESC, country_code ASC
            LIMIT 10
            "#,
            (),
        )
        .await
        .map_err(|e| AnalysisError::DataSource(format!("top countries query: {}", e)))?;
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| AnalysisError::DataSource(format!("top countries row: {}", e)))?
    {
        let country: String = row.get::<Option<String>>(0).ok().flatten().unwrap_or_default();
        let total: i64 = row.get(1).unwrap_or(0);
        let anomalous: i64 = row.get(2).unwrap_or(0);
        stats.top_anomalous_countries.push(CountryAnomalyCount {
            country,
            total,
            anomalous,
            anomaly_rate: round4(anomalous as f64 / total.max(1) as f64),
        });
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{CertificateRecord, CertificateType};
    use chrono::{TimeZone, Utc};

    fn record(country: &str, sig: &str, pub_alg: &str, ks: i64, year: i32) -> CertificateRecord {
        CertificateRecord {
            fingerprint: format!("{}-{}-{}", country, sig, ks),
            certificate_type: Some(CertificateType::Dsc),
            country_code: country.into(),
            signature_algorithm: sig.into(),
            public_key_algorithm: pub_alg.into(),
            public_key_size: Some(ks),
            not_before: Some(Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()),
            not_after: Some(Utc.with_ymd_and_hms(year + 10, 1, 1, 0, 0, 0).unwrap()),
            icao_compliant: Some(true),
            trust_chain_valid: Some(true),
            crl_distribution_points: Some("http://crl".into()),
            authority_key_identifier: Some("keyid".into()),
            subject_key_identifier: Some("keyid".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_country_maturity_skips_small_countries() {
        let population = Population::new(vec![
            record("KR", "sha256WithRSAEncryption", "RSA", 2048, 2020),
            record("KR", "sha384WithRSAEncryption", "RSA", 4096, 2021),
            record("KR", "ecdsa-with-SHA384", "ECDSA", 384, 2022),
            record("DE", "sha1WithRSAEncryption", "RSA", 1024, 2010),
        ]);
        let results = country_maturity(&population);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].country_code, "KR");
        assert!(results[0].maturity_score > 70.0);
    }

    #[test]
    fn test_country_maturity_ordering() {
        let mut rows = Vec::new();
        for i in 0..3 {
            let mut r = record("AA", "sha512WithRSAEncryption", "RSA", 4096, 2020 + i);
            r.fingerprint = format!("aa{}", i);
            rows.push(r);
        }
        for i in 0..3 {
            let mut r = record("BB", "sha1WithRSAEncryption", "RSA", 1024, 2005 + i);
            r.fingerprint = format!("bb{}", i);
            r.icao_compliant = Some(false);
            r.trust_chain_valid = Some(false);
            rows.push(r);
        }
        let results = country_maturity(&Population::new(rows));
        assert_eq!(results[0].country_code, "AA");
        assert!(results[0].maturity_score > results[1].maturity_score);
    }

    #[test]
    fn test_algorithm_trends_window() {
        let population = Population::new(vec![
            record("KR", "sha256WithRSAEncryption", "RSA", 2048, 2015),
            record("KR", "sha256WithRSAEncryption", "RSA", 3072, 2015),
            record("KR", "sha1WithRSAEncryption", "RSA", 2048, 1999), // outside window
        ]);
        let trends = algorithm_trends(&population);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].year, 2015);
        assert_eq!(trends[0].total, 2);
        assert_eq!(trends[0].algorithms["sha256WithRSAEncryption"], 2);
    }

    #[test]
    fn test_key_size_distribution_percentages() {
        let population = Population::new(vec![
            record("KR", "sha256WithRSAEncryption", "RSA", 2048, 2020),
            record("DE", "sha256WithRSAEncryption", "RSA", 2048, 2020),
            record("FR", "ecdsa-with-SHA384", "ECDSA", 384, 2020),
            record("US", "sha256WithRSAEncryption", "RSA", 4096, 2020),
        ]);
        let dist = key_size_distribution(&population);
        assert_eq!(dist[0].algorithm, "RSA");
        assert_eq!(dist[0].key_size, 2048);
        assert_eq!(dist[0].count, 2);
        assert!((dist[0].percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_country_detail() {
        let population = Population::new(vec![
            record("KR", "sha256WithRSAEncryption", "RSA", 2048, 2020),
            record("KR", "ecdsa-with-SHA384", "ECDSA", 384, 2021),
        ]);
        let detail = country_detail(&population, "KR").unwrap();
        assert_eq!(detail.total_certificates, 2);
        assert_eq!(detail.type_distribution["DSC"], 2);
        assert_eq!(detail.key_size_distribution["384"], 1);
        assert!(country_detail(&population, "ZZ").is_none());
    }

    #[test]
    fn test_extension_anomalies_filtering() {
        let mut bad = record("KR", "sha256WithRSAEncryption", "RSA", 2048, 2020);
        bad.certificate_type = Some(CertificateType::Csca);
        bad.is_ca = false; // forbidden for CSCA
        let population = Population::new(vec![bad]);

        let all = extension_anomalies(&population, None, None, 50);
        assert_eq!(all.len(), 1);
        let filtered = extension_anomalies(&population, Some("DSC"), None, 50);
        assert!(filtered.is_empty());
        let by_country = extension_anomalies(&population, None, Some("KR"), 50);
        assert_eq!(by_country.len(), 1);
    }
}
