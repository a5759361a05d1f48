// src/extensions.rs
// ICAO Doc 9303 extension profile rules engine.
//
// Each certificate type has an expected-extension profile (required,
// recommended, forbidden flags, required key-usage bits). Checking a row
// yields a structural anomaly score in [0, 1] and severity-tagged
// violation details.

use serde::Serialize;

use crate::population::{CertificateRecord, CertificateType, ExtensionField, Population};

// ==================== SEVERITY ====================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

// ==================== PROFILES ====================

struct ExtensionProfile {
    required: &'static [&'static str],
    recommended: &'static [&'static str],
    /// `Some(v)`: a row whose `is_ca` equals `v` violates the profile.
    forbidden_is_ca: Option<bool>,
    required_key_usage_bits: &'static [&'static str],
}

const CSCA_PROFILE: ExtensionProfile = ExtensionProfile {
    required: &["key_usage", "subject_key_identifier", "is_ca"],
    recommended: &["authority_key_identifier", "crl_distribution_points"],
    forbidden_is_ca: Some(false), // CSCA must have CA=TRUE
    required_key_usage_bits: &["keyCertSign", "cRLSign"],
};

const DSC_PROFILE: ExtensionProfile = ExtensionProfile {
    required: &["key_usage", "authority_key_identifier"],
    recommended: &["crl_distribution_points", "ocsp_responder_url"],
    forbidden_is_ca: Some(true), // DSC must NOT be a CA
    required_key_usage_bits: &["digitalSignature"],
};

const MLSC_PROFILE: ExtensionProfile = ExtensionProfile {
    required: &["extended_key_usage"],
    recommended: &["authority_key_identifier", "subject_key_identifier"],
    forbidden_is_ca: None,
    required_key_usage_bits: &[],
};

const DSC_NC_PROFILE: ExtensionProfile = ExtensionProfile {
    required: &[],
    recommended: &["authority_key_identifier", "key_usage"],
    forbidden_is_ca: None,
    required_key_usage_bits: &[],
};

fn profile_for(cert_type: Option<CertificateType>) -> &'static ExtensionProfile {
    match cert_type {
        Some(CertificateType::Csca) => &CSCA_PROFILE,
        Some(CertificateType::Dsc) => &DSC_PROFILE,
        Some(CertificateType::Mlsc) => &MLSC_PROFILE,
        Some(CertificateType::DscNc) | None => &DSC_NC_PROFILE,
    }
}

fn field_by_name(name: &str) -> Option<ExtensionField> {
    ExtensionField::ALL.iter().copied().find(|f| f.as_str() == name)
}

fn has_field(record: &CertificateRecord, name: &str) -> bool {
    match field_by_name(name) {
        Some(field) => record.has_extension(field),
        None => false,
    }
}

// ==================== CHECK RESULT ====================

#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub rule: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionCheck {
    pub missing_required: Vec<String>,
    pub missing_recommended: Vec<String>,
    pub forbidden_violations: Vec<String>,
    pub key_usage_violations: Vec<String>,
    pub structural_score: f64,
    pub violations_detail: Vec<Violation>,
}

/// Check one certificate against its type's expected-extension profile.
pub fn check(record: &CertificateRecord) -> ExtensionCheck {
    let profile = profile_for(record.certificate_type);

    let mut missing_required = Vec::new();
    let mut missing_recommended = Vec::new();
    let mut forbidden_violations = Vec::new();
    let mut key_usage_violations = Vec::new();
    let mut violations_detail = Vec::new();

    for field in profile.required {
        if *field == "is_ca" {
            if !record.is_ca {
                missing_required.push(field.to_string());
                violations_detail.push(Violation {
                    rule: format!("Required: {}", field),
                    severity: Severity::Critical,
                });
            }
        } else if !has_field(record, field) {
            missing_required.push(field.to_string());
            violations_detail.push(Violation {
                rule: format!("Required extension missing: {}", field),
                severity: Severity::High,
            });
        }
    }

    for field in profile.recommended {
        if !has_field(record, field) {
            missing_recommended.push(field.to_string());
            violations_detail.push(Violation {
                rule: format!("Recommended extension missing: {}", field),
                severity: Severity::Medium,
            });
        }
    }

    if let Some(forbidden_value) = profile.forbidden_is_ca {
        if record.is_ca == forbidden_value {
            forbidden_violations.push("is_ca".to_string());
            violations_detail.push(Violation {
                rule: format!("Forbidden: is_ca={}", forbidden_value),
                severity: Severity::Critical,
            });
        }
    }

    let key_usage = record
        .key_usage
        .as_deref()
        .unwrap_or("")
        .to_lowercase();
    for bit in profile.required_key_usage_bits {
        if !key_usage.contains(&bit.to_lowercase()) {
            key_usage_violations.push(bit.to_string());
            violations_detail.push(Violation {
                rule: format!("Missing key usage bit: {}", bit),
                severity: Severity::High,
            });
        }
    }

    let score = 0.25 * missing_required.len() as f64
        + 0.30 * forbidden_violations.len() as f64
        + 0.15 * key_usage_violations.len() as f64
        + 0.05 * missing_recommended.len() as f64;
    let structural_score = (score.min(1.0) * 10_000.0).round() / 10_000.0;

    ExtensionCheck {
        missing_required,
        missing_recommended,
        forbidden_violations,
        key_usage_violations,
        structural_score,
        violations_detail,
    }
}

/// Extensions present on the row that its type's profile does not mention.
pub fn count_unexpected(record: &CertificateRecord) -> usize {
    let profile = profile_for(record.certificate_type);
    ExtensionField::ALL
        .iter()
        .filter(|f| {
            let name = f.as_str();
            record.has_extension(**f)
                && !profile.required.contains(&name)
                && !profile.recommended.contains(&name)
        })
        .count()
}

/// Required items missing on the row (is_ca counts when false).
pub fn count_missing_required(record: &CertificateRecord) -> usize {
    let profile = profile_for(record.certificate_type);
    profile
        .required
        .iter()
        .filter(|field| {
            if **field == "is_ca" {
                !record.is_ca
            } else {
                !has_field(record, field)
            }
        })
        .count()
}

// ==================== POPULATION-LEVEL REPORTS ====================

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionAnomaly {
    pub fingerprint: String,
    pub certificate_type: String,
    pub country_code: String,
    pub structural_score: f64,
    pub missing_required: Vec<String>,
    pub missing_recommended: Vec<String>,
    pub forbidden_violations: Vec<String>,
    pub key_usage_violations: Vec<String>,
    pub violations_detail: Vec<Violation>,
}

/// All certificates with a non-zero structural score, worst first.
pub fn compute_extension_anomalies(population: &Population) -> Vec<ExtensionAnomaly> {
    let mut results: Vec<ExtensionAnomaly> = population
        .iter()
        .filter_map(|record| {
            let compliance = check(record);
            if compliance.structural_score > 0.0 {
                Some(ExtensionAnomaly {
                    fingerprint: record.fingerprint.clone(),
                    certificate_type: record
                        .certificate_type
                        .map(|t| t.as_str().to_string())
                        .unwrap_or_default(),
                    country_code: record.country_code.clone(),
                    structural_score: compliance.structural_score,
                    missing_required: compliance.missing_required,
                    missing_recommended: compliance.missing_recommended,
                    forbidden_violations: compliance.forbidden_violations,
                    key_usage_violations: compliance.key_usage_violations,
                    violations_detail: compliance.violations_detail,
                })
            } else {
                None
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.structural_score
            .partial_cmp(&a.structural_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeViolationCounts {
    pub total: usize,
    pub with_violations: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtensionAnomalySummary {
    pub by_type: std::collections::BTreeMap<String, TypeViolationCounts>,
    pub by_severity: std::collections::BTreeMap<String, usize>,
    pub total_checked: usize,
}

/// Violation counts grouped by certificate type and severity.
pub fn extension_anomaly_summary(population: &Population) -> ExtensionAnomalySummary {
    let mut summary = ExtensionAnomalySummary {
        total_checked: population.len(),
        ..Default::default()
    };

    for record in population.iter() {
        let type_key = record
            .certificate_type
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let entry = summary.by_type.entry(type_key).or_default();
        entry.total += 1;

        let compliance = check(record);
        if compliance.structural_score > 0.0 {
            entry.with_violations += 1;
            for v in &compliance.violations_detail {
                *summary
                    .by_severity
                    .entry(v.severity.as_str().to_string())
                    .or_default() += 1;
            }
        }
    }
    summary
}
