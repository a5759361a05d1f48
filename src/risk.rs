// src/risk.rs
// Composite risk scoring.
//
// Ten weighted categories. Categories 1-6 form the legacy score (sum
// clamped to 100); all ten form the forensic score (sum / 200 × 100,
// clamped to 100). Categories crossing their severity bar emit a finding
// with a localised message.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::info;

use crate::extensions::Severity;
use crate::features::dn;
use crate::labels;
use crate::population::{CertificateRecord, CertificateType, ExtensionField, Population};

const DAYS_PER_YEAR: f64 = 365.25;

// ==================== LEVELS ====================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Legacy thresholds: 76 / 51 / 26.
pub fn classify_risk(score: f64) -> RiskLevel {
    if score >= 76.0 {
        RiskLevel::Critical
    } else if score >= 51.0 {
        RiskLevel::High
    } else if score >= 26.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Forensic thresholds: 60 / 40 / 20.
pub fn classify_forensic_risk(score: f64) -> RiskLevel {
    if score >= 60.0 {
        RiskLevel::Critical
    } else if score >= 40.0 {
        RiskLevel::High
    } else if score >= 20.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

// ==================== CATEGORY TABLES ====================

/// Signature-algorithm risk points; unknown OIDs carry moderate risk.
static ALGORITHM_RISK: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("sha1WithRSAEncryption", 40.0),
        ("ecdsa-with-SHA1", 40.0),
        ("sha256WithRSAEncryption", 5.0),
        ("ecdsa-with-SHA256", 5.0),
        ("sha384WithRSAEncryption", 0.0),
        ("ecdsa-with-SHA384", 0.0),
        ("sha512WithRSAEncryption", 0.0),
        ("ecdsa-with-SHA512", 0.0),
        ("id-RSASSA-PSS", 2.0),
    ])
});

pub const CATEGORY_NAMES: [&str; 10] = [
    "algorithm",
    "key_size",
    "compliance",
    "validity",
    "extensions",
    "anomaly",
    "issuer_reputation",
    "structural_consistency",
    "temporal_pattern",
    "dn_consistency",
];

// ==================== OUTPUT ====================

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub message: String,
}

/// Structured forensic result stored per row.
#[derive(Debug, Clone, Serialize)]
pub struct ForensicReport {
    pub score: f64,
    pub level: String,
    pub findings: Vec<Finding>,
    pub categories: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub risk_factors: BTreeMap<String, f64>,
    pub forensic_risk_score: f64,
    pub forensic_risk_level: RiskLevel,
    pub forensic: ForensicReport,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ==================== SCORER ====================

/// Score every row from the frame facts plus the three upstream signals
/// (row-aligned anomaly, structural and issuer scores).
pub fn score(
    population: &Population,
    now: DateTime<Utc>,
    anomaly_scores: &[f64],
    structural_scores: &[f64],
    issuer_scores: &[f64],
) -> Vec<RiskAssessment> {
    let assessments: Vec<RiskAssessment> = population
        .iter()
        .enumerate()
        .map(|(i, record)| {
            score_row(
                record,
                now,
                anomaly_scores.get(i).copied().unwrap_or(0.0),
                structural_scores.get(i).copied().unwrap_or(0.0),
                issuer_scores.get(i).copied().unwrap_or(0.0),
            )
        })
        .collect();

    let critical = assessments
        .iter()
        .filter(|a| a.risk_level == RiskLevel::Critical)
        .count();
    let avg = if assessments.is_empty() {
        0.0
    } else {
        assessments.iter().map(|a| a.risk_score).sum::<f64>() / assessments.len() as f64
    };
    info!(
        "Risk scoring complete: avg={:.1}, critical={}",
        avg, critical
    );
    assessments
}

fn score_row(
    record: &CertificateRecord,
    now: DateTime<Utc>,
    anomaly: f64,
    structural: f64,
    issuer: f64,
) -> RiskAssessment {
    let mut findings: Vec<Finding> = Vec::new();

    // 1. Algorithm (cap 40)
    let sig_alg = record.signature_algorithm.as_str();
    let algorithm = ALGORITHM_RISK.get(sig_alg).copied().unwrap_or(15.0);
    if algorithm >= 30.0 {
        findings.push(Finding {
            category: "algorithm".into(),
            severity: Severity::Critical,
            message: labels::msg_weak_algorithm(sig_alg),
        });
    }

    // 2. Key size (cap 40)
    let key_size = record.public_key_size.unwrap_or(0);
    let pub_alg = record.public_key_algorithm.to_lowercase();
    let key_size_risk = if pub_alg.contains("rsa") {
        if key_size < 2048 {
            40.0
        } else if key_size < 3072 {
            10.0
        } else if key_size < 4096 {
            3.0
        } else {
            0.0
        }
    } else if pub_alg.contains("ec") {
        if key_size < 256 {
            35.0
        } else if key_size < 384 {
            5.0
        } else {
            0.0
        }
    } else {
        15.0
    };
    if key_size_risk >= 30.0 {
        findings.push(Finding {
            category: "key_size".into(),
            severity: Severity::Critical,
            message: labels::msg_weak_key(&record.public_key_algorithm, key_size),
        });
    }

    // 3. ICAO compliance (cap 20)
    let compliance = match record.icao_compliant {
        Some(false) => 20.0,
        None => 5.0,
        Some(true) => 0.0,
    };
    if compliance >= 15.0 {
        findings.push(Finding {
            category: "compliance".into(),
            severity: Severity::Critical,
            message: labels::msg_non_compliant(),
        });
    }

    // 4. Validity (cap 15)
    let days_left = record.days_until_expiry(now);
    let validity = match days_left {
        Some(d) if d < 0.0 => 15.0,
        Some(d) if d < 30.0 => 10.0,
        Some(d) if d < 90.0 => 5.0,
        Some(_) => 0.0,
        None => 5.0,
    };
    if validity >= 15.0 {
        findings.push(Finding {
            category: "validity".into(),
            severity: Severity::Critical,
            message: labels::msg_validity(days_left.unwrap_or(-1.0)),
        });
    } else if validity >= 10.0 {
        findings.push(Finding {
            category: "validity".into(),
            severity: Severity::High,
            message: labels::msg_validity(days_left.unwrap_or(-1.0)),
        });
    }

    // 5. Extensions (cap 15)
    let mut extension_risk: f64 = 0.0;
    if !record.has_extension(ExtensionField::CrlDistributionPoints) {
        extension_risk += 5.0;
    }
    if !record.has_extension(ExtensionField::AuthorityKeyIdentifier) {
        extension_risk += 5.0;
    }
    if !record.has_extension(ExtensionField::SubjectKeyIdentifier) {
        extension_risk += 3.0;
    }
    if !record.has_extension(ExtensionField::OcspResponderUrl) {
        extension_risk += 2.0;
    }
    let extension_risk = extension_risk.min(15.0);

    // 6. ML anomaly (cap 15)
    let anomaly_risk = round1(anomaly * 15.0);
    if anomaly_risk >= 10.0 {
        findings.push(Finding {
            category: "anomaly".into(),
            severity: Severity::High,
            message: labels::msg_ml_anomaly(anomaly),
        });
    }

    // 7. Issuer reputation (cap 15)
    let issuer_risk = round1(issuer * 15.0);
    if issuer_risk >= 10.0 {
        findings.push(Finding {
            category: "issuer_reputation".into(),
            severity: Severity::Medium,
            message: labels::msg_issuer_reputation(issuer),
        });
    }

    // 8. Structural consistency (cap 20)
    let structural_risk = round1(structural * 20.0);
    if structural_risk >= 15.0 {
        findings.push(Finding {
            category: "structural_consistency".into(),
            severity: Severity::High,
            message: labels::msg_structural(structural),
        });
    }

    // 9. Temporal pattern (cap 10)
    let validity_days = record.validity_days();
    let validity_years = validity_days.map(|d| d / DAYS_PER_YEAR);
    let temporal = match (record.certificate_type, validity_years) {
        (Some(CertificateType::Dsc), Some(y)) if y > 15.0 => 8.0,
        (Some(CertificateType::Csca), Some(y)) if y < 1.0 => 6.0,
        (_, Some(y)) if y * DAYS_PER_YEAR < 30.0 => 5.0,
        (_, Some(y)) if y > 30.0 => 7.0,
        _ => 0.0,
    };
    if temporal >= 6.0 {
        findings.push(Finding {
            category: "temporal_pattern".into(),
            severity: Severity::Medium,
            message: labels::msg_temporal_pattern(),
        });
    }

    // 10. DN consistency (cap 10)
    let mut dn_risk = 0.0;
    let subject_country = dn::extract_country(&record.subject_dn);
    if !subject_country.is_empty()
        && !record.country_code.is_empty()
        && subject_country != record.country_code
    {
        dn_risk += 5.0;
        findings.push(Finding {
            category: "dn_consistency".into(),
            severity: Severity::Medium,
            message: labels::msg_dn_country_mismatch(&subject_country, &record.country_code),
        });
    }
    let subject_fields = dn::count_fields(&record.subject_dn);
    if subject_fields < 2 {
        dn_risk += 3.0;
    }
    if subject_fields > 10 {
        dn_risk += 2.0;
    }

    // Legacy composite: categories 1-6, clamped to 100
    let legacy_total = round2(
        (algorithm + key_size_risk + compliance + validity + extension_risk + anomaly_risk)
            .min(100.0),
    );

    let mut risk_factors = BTreeMap::new();
    if algorithm > 0.0 {
        risk_factors.insert("algorithm".to_string(), algorithm);
    }
    if key_size_risk > 0.0 {
        risk_factors.insert("key_size".to_string(), key_size_risk);
    }
    if compliance > 0.0 {
        risk_factors.insert("compliance".to_string(), compliance);
    }
    if validity > 0.0 {
        risk_factors.insert("validity".to_string(), validity);
    }
    if extension_risk > 0.0 {
        risk_factors.insert("extensions".to_string(), extension_risk);
    }
    if anomaly_risk > 1.0 {
        risk_factors.insert("anomaly".to_string(), anomaly_risk);
    }

    // Forensic composite: all ten categories, normalised into [0, 100]
    let categories = BTreeMap::from([
        ("algorithm".to_string(), algorithm),
        ("key_size".to_string(), key_size_risk),
        ("compliance".to_string(), compliance),
        ("validity".to_string(), validity),
        ("extensions".to_string(), extension_risk),
        ("anomaly".to_string(), anomaly_risk),
        ("issuer_reputation".to_string(), issuer_risk),
        ("structural_consistency".to_string(), structural_risk),
        ("temporal_pattern".to_string(), temporal),
        ("dn_consistency".to_string(), dn_risk),
    ]);
    let forensic_sum: f64 = categories.values().sum();
    let forensic_total = round2((forensic_sum / 200.0 * 100.0).min(100.0));
    let forensic_level = classify_forensic_risk(forensic_total);

    RiskAssessment {
        risk_score: legacy_total,
        risk_level: classify_risk(legacy_total),
        risk_factors,
        forensic_risk_score: forensic_total,
        forensic_risk_level: forensic_level,
        forensic: ForensicReport {
            score: forensic_total,
            level: forensic_level.as_str().to_string(),
            findings,
            categories,
        },
    }
}
