// src/issuer.rs
// Issuer behavioural profiling.
//
// Certificates are grouped by issuer DN; each issuer gets a profile of its
// typical issuing behaviour (algorithms, key sizes, countries, compliance).
// A per-row deviation score in [0, 1] flags certificates that break their
// issuer's pattern.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::population::Population;

/// Score assigned when the issuer is unknown or has no profile.
const UNKNOWN_ISSUER_SCORE: f64 = 0.30;

#[derive(Debug, Clone, Serialize)]
pub struct IssuerProfile {
    pub cert_count: usize,
    pub type_diversity: usize,
    pub types: BTreeMap<String, usize>,
    pub dominant_algorithm: String,
    pub algorithm_diversity: usize,
    pub avg_key_size: f64,
    pub std_key_size: f64,
    pub country_count: usize,
    pub dominant_country: String,
    pub compliance_rate: f64,
    pub expired_rate: f64,
    /// `clamp(1 − icao_ok_rate + 0.5·expired_rate, 0, 1)`
    pub anomaly_proxy: f64,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Most frequent key; ties break on the lexically smaller key so the
/// result is stable across runs.
fn dominant_key(counts: &BTreeMap<String, usize>) -> String {
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(k, _)| k.clone())
        .unwrap_or_default()
}

/// Build behavioural profiles for every issuer DN in the population.
pub fn build_profiles(population: &Population) -> BTreeMap<String, IssuerProfile> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, record) in population.iter().enumerate() {
        let issuer = record.issuer_dn.trim();
        if issuer.is_empty() {
            continue;
        }
        groups.entry(issuer).or_default().push(i);
    }

    let mut profiles = BTreeMap::new();
    for (issuer_dn, indices) in groups {
        let n = indices.len();

        let mut types: BTreeMap<String, usize> = BTreeMap::new();
        let mut algorithms: BTreeMap<String, usize> = BTreeMap::new();
        let mut countries: BTreeMap<String, usize> = BTreeMap::new();
        let mut key_sizes: Vec<f64> = Vec::new();
        let mut icao_ok = 0usize;
        let mut expired = 0usize;

        for &i in &indices {
            let record = &population.rows[i];
            if let Some(ct) = record.certificate_type {
                *types.entry(ct.as_str().to_string()).or_default() += 1;
            }
            if !record.signature_algorithm.is_empty() {
                *algorithms
                    .entry(record.signature_algorithm.clone())
                    .or_default() += 1;
            }
            if !record.country_code.is_empty() {
                *countries.entry(record.country_code.clone()).or_default() += 1;
            }
            if let Some(ks) = record.public_key_size {
                if ks > 0 {
                    key_sizes.push(ks as f64);
                }
            }
            if record.is_icao_ok() {
                icao_ok += 1;
            }
            if record.is_expired_status() {
                expired += 1;
            }
        }

        let avg_key_size = if key_sizes.is_empty() {
            0.0
        } else {
            key_sizes.iter().sum::<f64>() / key_sizes.len() as f64
        };
        let std_key_size = if key_sizes.len() > 1 {
            let variance = key_sizes
                .iter()
                .map(|ks| (ks - avg_key_size).powi(2))
                .sum::<f64>()
                / (key_sizes.len() - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        let compliance_rate = round4(icao_ok as f64 / n as f64);
        let expired_rate = round4(expired as f64 / n as f64);
        let anomaly_proxy =
            round4((1.0 - compliance_rate + 0.5 * expired_rate).clamp(0.0, 1.0));

        profiles.insert(
            issuer_dn.to_string(),
            IssuerProfile {
                cert_count: n,
                type_diversity: types.len(),
                dominant_algorithm: dominant_key(&algorithms),
                algorithm_diversity: algorithms.len(),
                avg_key_size,
                std_key_size,
                country_count: countries.len(),
                dominant_country: dominant_key(&countries),
                compliance_rate,
                expired_rate,
                anomaly_proxy,
                types,
            },
        );
    }

    info!("Built profiles for {} issuers", profiles.len());
    profiles
}

/// Per-row issuer deviation score, row-aligned with the population.
pub fn score(population: &Population, profiles: &BTreeMap<String, IssuerProfile>) -> Vec<f64> {
    population
        .iter()
        .map(|record| {
            let issuer = record.issuer_dn.trim();
            if issuer.is_empty() {
                return UNKNOWN_ISSUER_SCORE;
            }
            let Some(profile) = profiles.get(issuer) else {
                return UNKNOWN_ISSUER_SCORE;
            };

            let mut score = 0.0;

            // Rare issuer
            if profile.cert_count < 3 {
                score += 0.15;
            } else if profile.cert_count < 10 {
                score += 0.05;
            }

            // Key size deviation from the issuer mean
            let key_size = record.public_key_size.unwrap_or(0) as f64;
            if profile.avg_key_size > 0.0 && profile.std_key_size > 0.0 && key_size > 0.0 {
                let z = (key_size - profile.avg_key_size).abs() / profile.std_key_size;
                if z > 3.0 {
                    score += 0.20;
                } else if z > 2.0 {
                    score += 0.10;
                }
            }

            // Algorithm off the issuer's dominant choice
            if !record.signature_algorithm.is_empty()
                && record.signature_algorithm != profile.dominant_algorithm
                && profile.algorithm_diversity <= 2
            {
                score += 0.15;
            }

            // Issuer-wide anomaly proxy
            score += profile.anomaly_proxy * 0.20;

            // Country outside the issuer's single usual country
            if !record.country_code.is_empty()
                && record.country_code != profile.dominant_country
                && profile.country_count == 1
            {
                score += 0.15;
            }

            score.min(1.0)
        })
        .collect()
}

// ==================== REPORT ====================

#[derive(Debug, Clone, Serialize)]
pub struct IssuerProfileEntry {
    pub issuer_dn: String,
    pub cert_count: usize,
    pub type_diversity: usize,
    pub types: BTreeMap<String, usize>,
    pub dominant_algorithm: String,
    pub avg_key_size: i64,
    pub compliance_rate: f64,
    pub expired_rate: f64,
    pub risk_indicator: &'static str,
    pub country: String,
}

/// Issuer report sorted worst compliance first; the risk indicator comes
/// from the anomaly proxy (>0.7 HIGH, >0.3 MEDIUM, else LOW).
pub fn profile_report(profiles: &BTreeMap<String, IssuerProfile>) -> Vec<IssuerProfileEntry> {
    let mut report: Vec<IssuerProfileEntry> = profiles
        .iter()
        .map(|(issuer_dn, profile)| {
            let risk_indicator = if profile.anomaly_proxy > 0.7 {
                "HIGH"
            } else if profile.anomaly_proxy > 0.3 {
                "MEDIUM"
            } else {
                "LOW"
            };

            IssuerProfileEntry {
                issuer_dn: issuer_dn.chars().take(200).collect(),
                cert_count: profile.cert_count,
                type_diversity: profile.type_diversity,
                types: profile.types.clone(),
                dominant_algorithm: profile.dominant_algorithm.clone(),
                avg_key_size: profile.avg_key_size as i64,
                compliance_rate: profile.compliance_rate,
                expired_rate: profile.expired_rate,
                risk_indicator,
                country: profile.dominant_country.clone(),
            }
        })
        .collect();

    report.sort_by(|a, b| {
        a.compliance_rate
            .partial_cmp(&b.compliance_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    report
}
