// src/features/mod.rs
// Feature engineering: certificate population → dense 45-column matrix.
//
// One pre-aggregation pass computes every population-relative statistic
// (country averages, per-type validity moments, issuer profiles, per-type
// extension-presence rates, country-year issuance counts); the row loop
// then fills the matrix without touching the population again. NaN and
// ±∞ are replaced by 0 at the end.

pub mod dn;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Utc};
use ndarray::Array2;
use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::issuer::{self, IssuerProfile};
use crate::population::{CertificateRecord, CertificateType, ExtensionField, Population};

pub const FEATURE_COUNT: usize = 45;

const DAYS_PER_YEAR: f64 = 365.25;

/// Stable feature names, index-aligned with the matrix columns.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // Base block
    "key_size_normalized",
    "algorithm_age_score",
    "is_ecdsa",
    "is_rsa_pss",
    "validity_days",
    "validity_ratio",
    "days_until_expiry",
    "is_expired",
    "icao_compliant",
    "trust_chain_valid",
    "icao_violation_count",
    "key_usage_compliant",
    "algorithm_compliant",
    "extension_count",
    "has_crl_dp",
    "has_ocsp",
    "has_aki",
    "is_ca",
    "is_self_signed",
    "version",
    "path_len",
    "key_size_vs_country_avg",
    "validity_vs_country_avg",
    "country_cert_count",
    "cert_type_encoded",
    // Issuer profile
    "issuer_cert_count",
    "issuer_anomaly_rate",
    "issuer_type_diversity",
    "issuer_country_match",
    // Temporal
    "issuance_month",
    "validity_zscore_type",
    "issuance_rate_deviation",
    "elapsed_life_ratio",
    // DN structure
    "subject_dn_field_count",
    "issuer_dn_field_count",
    "dn_format_type",
    "has_email_in_dn",
    // Extension profile
    "extension_pattern_hash",
    "unexpected_extension_count",
    "missing_required_count",
    "critical_extension_count",
    // Cross-certificate
    "key_size_vs_issuer_avg",
    "algorithm_matches_issuer",
    "country_compliance_proxy",
    "extension_pattern_match",
];

/// Algorithm quality scores (higher = better/newer); unknown OID = 0.5.
static ALGORITHM_SCORES: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("sha512WithRSAEncryption", 1.0),
        ("ecdsa-with-SHA512", 1.0),
        ("sha384WithRSAEncryption", 0.9),
        ("ecdsa-with-SHA384", 0.9),
        ("sha256WithRSAEncryption", 0.8),
        ("ecdsa-with-SHA256", 0.8),
        ("id-RSASSA-PSS", 0.85),
        ("sha1WithRSAEncryption", 0.2),
        ("ecdsa-with-SHA1", 0.2),
    ])
});

pub fn algorithm_quality(sig_alg: &str) -> f64 {
    ALGORITHM_SCORES.get(sig_alg).copied().unwrap_or(0.5)
}

/// Row-aligned identity columns of the feature matrix.
#[derive(Debug, Clone)]
pub struct RowMeta {
    pub fingerprint: String,
    pub certificate_type: Option<CertificateType>,
    pub country_code: String,
}

// ==================== PRE-AGGREGATIONS ====================

#[derive(Debug, Default)]
pub struct PopulationStats {
    pub country_avg_key_size: HashMap<String, f64>,
    pub country_avg_validity: HashMap<String, f64>,
    pub country_cert_counts: HashMap<String, usize>,
    pub type_validity_mean: HashMap<CertificateType, f64>,
    pub type_validity_std: HashMap<CertificateType, f64>,
    pub issuer_profiles: BTreeMap<String, IssuerProfile>,
    pub country_year_counts: HashMap<(String, i32), usize>,
    pub country_year_mean: HashMap<String, f64>,
    pub type_extension_rates: HashMap<CertificateType, [f64; 6]>,
    pub country_compliance_proxy: HashMap<String, f64>,
    pub max_key_size: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// One pass over the population computing every cross-row statistic the
/// row loop needs.
pub fn compute_population_stats(population: &Population) -> PopulationStats {
    let mut stats = PopulationStats::default();

    let mut country_key_sizes: HashMap<String, Vec<f64>> = HashMap::new();
    let mut country_validities: HashMap<String, Vec<f64>> = HashMap::new();
    let mut type_validities: HashMap<CertificateType, Vec<f64>> = HashMap::new();
    let mut type_ext_counts: HashMap<CertificateType, ([usize; 6], usize)> = HashMap::new();
    let mut country_compliance: HashMap<String, (usize, usize, usize)> = HashMap::new();

    for record in population.iter() {
        let country = record.country_code.clone();
        *stats.country_cert_counts.entry(country.clone()).or_default() += 1;

        if let Some(ks) = record.public_key_size {
            if ks > 0 {
                let ks = ks as f64;
                country_key_sizes.entry(country.clone()).or_default().push(ks);
                if ks > stats.max_key_size {
                    stats.max_key_size = ks;
                }
            }
        }

        if let Some(validity) = record.validity_days() {
            country_validities
                .entry(country.clone())
                .or_default()
                .push(validity);
            if let Some(ct) = record.certificate_type {
                type_validities.entry(ct).or_default().push(validity);
            }
        }

        if let Some(ct) = record.certificate_type {
            let (counts, total) = type_ext_counts.entry(ct).or_default();
            for (bit, field) in ExtensionField::ALL.iter().enumerate() {
                if record.has_extension(*field) {
                    counts[bit] += 1;
                }
            }
            *total += 1;
        }

        if let Some(nb) = record.not_before {
            *stats
                .country_year_counts
                .entry((country.clone(), nb.year()))
                .or_default() += 1;
        }

        let entry = country_compliance.entry(country).or_default();
        entry.0 += 1;
        if record.is_icao_ok() {
            entry.1 += 1;
        }
        if record.is_expired_status() {
            entry.2 += 1;
        }
    }

    if stats.max_key_size <= 0.0 {
        stats.max_key_size = 4096.0;
    }

    for (country, sizes) in country_key_sizes {
        stats.country_avg_key_size.insert(country, mean(&sizes));
    }
    for (country, validities) in country_validities {
        stats.country_avg_validity.insert(country, mean(&validities));
    }
    for (ct, validities) in type_validities {
        let m = mean(&validities);
        stats.type_validity_mean.insert(ct, m);
        stats.type_validity_std.insert(ct, sample_std(&validities, m));
    }
    for (ct, (counts, total)) in type_ext_counts {
        let mut rates = [0.0; 6];
        if total > 0 {
            for (bit, count) in counts.iter().enumerate() {
                rates[bit] = *count as f64 / total as f64;
            }
        }
        stats.type_extension_rates.insert(ct, rates);
    }
    for (country, (total, icao_ok, expired)) in country_compliance {
        let icao_rate = icao_ok as f64 / total as f64;
        let expired_rate = expired as f64 / total as f64;
        stats
            .country_compliance_proxy
            .insert(country, 0.6 * (1.0 - icao_rate) + 0.4 * expired_rate);
    }

    // Mean issuance rate per country over the years it actually issued
    let mut per_country: HashMap<String, (usize, usize)> = HashMap::new();
    for ((country, _year), count) in &stats.country_year_counts {
        let entry = per_country.entry(country.clone()).or_default();
        entry.0 += count;
        entry.1 += 1;
    }
    for (country, (total, years)) in per_country {
        stats
            .country_year_mean
            .insert(country, total as f64 / years as f64);
    }

    stats.issuer_profiles = issuer::build_profiles(population);
    stats
}

// ==================== FEATURE MATRIX ====================

/// Knuth multiplicative hash of the six-bit extension mask into [0, 1).
fn extension_mask_hash(mask: u8) -> f64 {
    let hashed = (mask as u64).wrapping_mul(2_654_435_761) % (1u64 << 32);
    hashed as f64 / (1u64 << 32) as f64
}

fn count_critical_markers(record: &CertificateRecord) -> usize {
    let mut count = 0;
    for value in [record.key_usage.as_deref(), record.extended_key_usage.as_deref()] {
        if let Some(v) = value {
            count += v.to_lowercase().matches("critical").count();
        }
    }
    count
}

/// Transform the population into `(metadata, features)` where `features`
/// is a dense `N × 45` matrix row-aligned with `metadata`.
pub fn engineer(population: &Population, now: DateTime<Utc>) -> (Vec<RowMeta>, Array2<f64>) {
    let n = population.len();
    let stats = compute_population_stats(population);
    let mut features = Array2::<f64>::zeros((n, FEATURE_COUNT));
    let mut metadata = Vec::with_capacity(n);

    for (i, record) in population.iter().enumerate() {
        let key_size = record.public_key_size.unwrap_or(0) as f64;
        let sig_alg = record.signature_algorithm.as_str();
        let pub_alg_lower = record.public_key_algorithm.to_lowercase();
        let country = record.country_code.as_str();
        let cert_type = record.certificate_type;

        let validity_days = record.validity_days().unwrap_or(0.0);
        let days_until = record.days_until_expiry(now).unwrap_or(0.0);
        let issuer_profile = stats.issuer_profiles.get(record.issuer_dn.trim());

        let mut row = features.row_mut(i);

        // --- Base block (0-24) ---
        row[0] = key_size / stats.max_key_size;
        row[1] = algorithm_quality(sig_alg);
        row[2] = if pub_alg_lower.contains("ecdsa") || pub_alg_lower == "ec" {
            1.0
        } else {
            0.0
        };
        row[3] = if sig_alg.to_lowercase().contains("pss") { 1.0 } else { 0.0 };
        row[4] = validity_days / DAYS_PER_YEAR;
        row[5] = if validity_days > 0.0 {
            let type_avg = cert_type
                .and_then(|ct| stats.type_validity_mean.get(&ct).copied())
                .unwrap_or(validity_days);
            if type_avg > 0.0 {
                validity_days / type_avg
            } else {
                0.0
            }
        } else {
            0.0
        };
        row[6] = (days_until / DAYS_PER_YEAR).max(-5.0);
        row[7] = if record.not_after.is_some() && days_until < 0.0 {
            1.0
        } else {
            0.0
        };
        row[8] = if record.icao_compliant == Some(true) { 1.0 } else { 0.0 };
        row[9] = if record.trust_chain_valid == Some(true) { 1.0 } else { 0.0 };
        row[10] = record.icao_violation_count() as f64;
        row[11] = if record.icao_key_usage_compliant == Some(true) { 1.0 } else { 0.0 };
        row[12] = if record.icao_algorithm_compliant == Some(true) { 1.0 } else { 0.0 };
        row[13] = record.extension_count() as f64;
        row[14] = if record.has_extension(ExtensionField::CrlDistributionPoints) { 1.0 } else { 0.0 };
        row[15] = if record.has_extension(ExtensionField::OcspResponderUrl) { 1.0 } else { 0.0 };
        row[16] = if record.has_extension(ExtensionField::AuthorityKeyIdentifier) { 1.0 } else { 0.0 };
        row[17] = if record.is_ca { 1.0 } else { 0.0 };
        row[18] = if record.is_self_signed { 1.0 } else { 0.0 };
        row[19] = record.version.unwrap_or(0) as f64;
        row[20] = record.path_len_constraint.unwrap_or(-1) as f64;

        let country_avg_ks = stats
            .country_avg_key_size
            .get(country)
            .copied()
            .unwrap_or(if key_size > 0.0 { key_size } else { 1.0 });
        row[21] = if country_avg_ks > 0.0 {
            (key_size - country_avg_ks) / country_avg_ks
        } else {
            0.0
        };

        let country_avg_v = stats
            .country_avg_validity
            .get(country)
            .copied()
            .unwrap_or(if validity_days > 0.0 { validity_days } else { 1.0 });
        row[22] = if country_avg_v > 0.0 {
            (validity_days - country_avg_v) / country_avg_v
        } else {
            0.0
        };
        row[23] = stats.country_cert_counts.get(country).copied().unwrap_or(0) as f64;
        row[24] = cert_type.map(|ct| ct.encoded()).unwrap_or(-1.0);

        // --- Issuer profile (25-28) ---
        row[25] = issuer_profile.map(|p| p.cert_count as f64).unwrap_or(0.0);
        row[26] = issuer_profile.map(|p| p.anomaly_proxy).unwrap_or(0.0);
        row[27] = issuer_profile.map(|p| p.type_diversity as f64).unwrap_or(0.0);
        let issuer_country = dn::extract_country(&record.issuer_dn);
        row[28] = if !issuer_country.is_empty() && issuer_country == country {
            1.0
        } else {
            0.0
        };

        // --- Temporal (29-32) ---
        row[29] = record
            .not_before
            .map(|nb| nb.month() as f64 / 12.0)
            .unwrap_or(0.0);
        row[30] = cert_type
            .map(|ct| {
                let type_mean = stats.type_validity_mean.get(&ct).copied().unwrap_or(0.0);
                let type_std = stats.type_validity_std.get(&ct).copied().unwrap_or(0.0);
                if type_std > 1e-9 {
                    (validity_days - type_mean) / type_std
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        row[31] = record
            .not_before
            .map(|nb| {
                let count = stats
                    .country_year_counts
                    .get(&(country.to_string(), nb.year()))
                    .copied()
                    .unwrap_or(0) as f64;
                let mean_rate = stats.country_year_mean.get(country).copied().unwrap_or(0.0);
                if mean_rate > 0.0 {
                    (count - mean_rate) / mean_rate
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        row[32] = match (record.not_before, validity_days) {
            (Some(nb), v) if v > 0.0 => {
                let elapsed = (now - nb).num_seconds() as f64 / 86_400.0;
                (elapsed / v).clamp(0.0, 2.0)
            }
            _ => 0.0,
        };

        // --- DN structure (33-36) ---
        row[33] = dn::count_fields(&record.subject_dn) as f64;
        row[34] = dn::count_fields(&record.issuer_dn) as f64;
        row[35] = dn::format_tag(&record.subject_dn) as f64;
        row[36] = if dn::has_email(&record.subject_dn) { 1.0 } else { 0.0 };

        // --- Extension profile (37-40) ---
        row[37] = extension_mask_hash(record.extension_mask());
        row[38] = crate::extensions::count_unexpected(record) as f64;
        row[39] = crate::extensions::count_missing_required(record) as f64;
        row[40] = count_critical_markers(record) as f64;

        // --- Cross-certificate (41-44) ---
        row[41] = issuer_profile
            .map(|p| {
                if p.avg_key_size > 0.0 && key_size > 0.0 {
                    (key_size - p.avg_key_size) / p.avg_key_size
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        row[42] = issuer_profile
            .map(|p| {
                if !sig_alg.is_empty() && sig_alg == p.dominant_algorithm {
                    1.0
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        row[43] = stats
            .country_compliance_proxy
            .get(country)
            .copied()
            .unwrap_or(0.0);
        row[44] = cert_type
            .and_then(|ct| stats.type_extension_rates.get(&ct))
            .map(|rates| {
                let mut matches = 0;
                for (bit, field) in ExtensionField::ALL.iter().enumerate() {
                    let present = record.has_extension(*field);
                    let modal = rates[bit] >= 0.5;
                    if present == modal {
                        matches += 1;
                    }
                }
                matches as f64 / 6.0
            })
            .unwrap_or(0.0);

        metadata.push(RowMeta {
            fingerprint: record.fingerprint.clone(),
            certificate_type: cert_type,
            country_code: record.country_code.clone(),
        });
    }

    // Malformed inputs surface here as non-finite cells; zero-fill and log.
    let mut replaced = 0usize;
    for value in features.iter_mut() {
        if !value.is_finite() {
            *value = 0.0;
            replaced += 1;
        }
    }
    if replaced > 0 {
        warn!("Replaced {} non-finite feature values with 0", replaced);
    }

    info!("Engineered {} features for {} certificates", FEATURE_COUNT, n);
    (metadata, features)
}
