// src/population.rs
// In-memory frame model for the certificate population.
//
// One `CertificateRecord` per certificate, deduplicated by fingerprint,
// joined with its validation facts. Every field is a primitive so the
// analysis stages never touch the store again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

// ==================== CERTIFICATE TYPE ====================

/// ICAO Doc 9303 certificate roles. What the store holds as a string
/// discriminator is semantically this four-variant sum; every per-type
/// table (extension profiles, detector parameters) keys on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CertificateType {
    /// Country Signing Certificate Authority
    Csca,
    /// Document Signer Certificate
    Dsc,
    /// Non-conformant Document Signer Certificate
    DscNc,
    /// Master List Signer Certificate
    Mlsc,
}

impl CertificateType {
    pub const ALL: [CertificateType; 4] = [
        CertificateType::Csca,
        CertificateType::Dsc,
        CertificateType::DscNc,
        CertificateType::Mlsc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::Csca => "CSCA",
            CertificateType::Dsc => "DSC",
            CertificateType::DscNc => "DSC_NC",
            CertificateType::Mlsc => "MLSC",
        }
    }

    /// Exact match against the four supported discriminators.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CSCA" => Some(CertificateType::Csca),
            "DSC" => Some(CertificateType::Dsc),
            "DSC_NC" => Some(CertificateType::DscNc),
            "MLSC" => Some(CertificateType::Mlsc),
            _ => None,
        }
    }

    /// Numeric encoding used by the feature matrix.
    pub fn encoded(&self) -> f64 {
        match self {
            CertificateType::Csca => 0.0,
            CertificateType::Dsc => 1.0,
            CertificateType::DscNc => 2.0,
            CertificateType::Mlsc => 3.0,
        }
    }
}

impl std::fmt::Display for CertificateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== EXTENSION FIELDS ====================

/// The six extension columns of the certificate table, in stable order.
/// The order defines bit positions in the extension-presence mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionField {
    KeyUsage,
    ExtendedKeyUsage,
    SubjectKeyIdentifier,
    AuthorityKeyIdentifier,
    CrlDistributionPoints,
    OcspResponderUrl,
}

impl ExtensionField {
    pub const ALL: [ExtensionField; 6] = [
        ExtensionField::KeyUsage,
        ExtensionField::ExtendedKeyUsage,
        ExtensionField::SubjectKeyIdentifier,
        ExtensionField::AuthorityKeyIdentifier,
        ExtensionField::CrlDistributionPoints,
        ExtensionField::OcspResponderUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionField::KeyUsage => "key_usage",
            ExtensionField::ExtendedKeyUsage => "extended_key_usage",
            ExtensionField::SubjectKeyIdentifier => "subject_key_identifier",
            ExtensionField::AuthorityKeyIdentifier => "authority_key_identifier",
            ExtensionField::CrlDistributionPoints => "crl_distribution_points",
            ExtensionField::OcspResponderUrl => "ocsp_responder_url",
        }
    }
}

// ==================== CERTIFICATE RECORD ====================

/// One row of the joined certificate + validation population.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateRecord {
    // Identity
    pub fingerprint: String,
    pub certificate_type: Option<CertificateType>,
    pub country_code: String,
    pub subject_dn: String,
    pub issuer_dn: String,
    pub serial_number: String,

    // Crypto facts
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    pub public_key_size: Option<i64>,
    pub public_key_curve: Option<String>,

    // Extensions
    pub key_usage: Option<String>,
    pub extended_key_usage: Option<String>,
    pub subject_key_identifier: Option<String>,
    pub authority_key_identifier: Option<String>,
    pub crl_distribution_points: Option<String>,
    pub ocsp_responder_url: Option<String>,
    pub is_ca: bool,
    pub path_len_constraint: Option<i64>,
    pub is_self_signed: bool,
    pub version: Option<i64>,

    // Temporal
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub validation_status: Option<String>,

    // Validation facts (left-joined, absent when no validation row exists)
    pub trust_chain_valid: Option<bool>,
    pub icao_compliant: Option<bool>,
    pub icao_violations: Option<String>,
    pub icao_key_usage_compliant: Option<bool>,
    pub icao_algorithm_compliant: Option<bool>,
    pub icao_key_size_compliant: Option<bool>,
    pub icao_extensions_compliant: Option<bool>,
    pub signature_valid: Option<bool>,
}

impl CertificateRecord {
    fn extension_value(&self, field: ExtensionField) -> Option<&str> {
        match field {
            ExtensionField::KeyUsage => self.key_usage.as_deref(),
            ExtensionField::ExtendedKeyUsage => self.extended_key_usage.as_deref(),
            ExtensionField::SubjectKeyIdentifier => self.subject_key_identifier.as_deref(),
            ExtensionField::AuthorityKeyIdentifier => self.authority_key_identifier.as_deref(),
            ExtensionField::CrlDistributionPoints => self.crl_distribution_points.as_deref(),
            ExtensionField::OcspResponderUrl => self.ocsp_responder_url.as_deref(),
        }
    }

    /// Non-empty, non-whitespace extension field.
    pub fn has_extension(&self, field: ExtensionField) -> bool {
        self.extension_value(field)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }

    /// Count of present extension fields.
    pub fn extension_count(&self) -> usize {
        ExtensionField::ALL
            .iter()
            .filter(|f| self.has_extension(**f))
            .count()
    }

    /// Six-bit presence mask over the extension fields, stable bit order.
    pub fn extension_mask(&self) -> u8 {
        ExtensionField::ALL
            .iter()
            .enumerate()
            .fold(0u8, |mask, (bit, field)| {
                if self.has_extension(*field) {
                    mask | (1 << bit)
                } else {
                    mask
                }
            })
    }

    /// Validity window length in days; `None` when either bound is missing.
    pub fn validity_days(&self) -> Option<f64> {
        match (self.not_before, self.not_after) {
            (Some(nb), Some(na)) => Some((na - nb).num_seconds() as f64 / SECONDS_PER_DAY),
            _ => None,
        }
    }

    /// Days until `not_after` relative to `now`; `None` when missing.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<f64> {
        self.not_after
            .map(|na| (na - now).num_seconds() as f64 / SECONDS_PER_DAY)
    }

    /// ICAO violation count from the pipe-separated column.
    pub fn icao_violation_count(&self) -> usize {
        match self.icao_violations.as_deref() {
            Some(v) if !v.trim().is_empty() => v.split('|').count(),
            _ => 0,
        }
    }

    /// Whether the validation status marks this certificate expired.
    pub fn is_expired_status(&self) -> bool {
        matches!(
            self.validation_status
                .as_deref()
                .map(|s| s.to_uppercase())
                .as_deref(),
            Some("EXPIRED") | Some("EXPIRED_VALID")
        )
    }

    /// ICAO compliance confirmed by a validation row.
    pub fn is_icao_ok(&self) -> bool {
        self.icao_compliant == Some(true)
    }
}

// ==================== POPULATION ====================

/// The loaded certificate population, in loader order.
#[derive(Debug, Clone, Default)]
pub struct Population {
    pub rows: Vec<CertificateRecord>,
}

impl Population {
    pub fn new(rows: Vec<CertificateRecord>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CertificateRecord> {
        self.rows.iter()
    }

    /// Certificate types row-aligned with the frame, defaulting absent
    /// discriminators to DSC behaviour downstream.
    pub fn certificate_types(&self) -> Vec<Option<CertificateType>> {
        self.rows.iter().map(|r| r.certificate_type).collect()
    }
}

// ==================== INPUT VALIDATION ====================

/// 64 hex chars, case-insensitive.
pub fn is_valid_fingerprint(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// 2-3 upper-case ASCII letters.
pub fn is_valid_country_code(s: &str) -> bool {
    (2..=3).contains(&s.len()) && s.chars().all(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record_with_extensions() -> CertificateRecord {
        CertificateRecord {
            key_usage: Some("digitalSignature".into()),
            authority_key_identifier: Some("keyid:AB:CD".into()),
            crl_distribution_points: Some("   ".into()), // whitespace only
            ..Default::default()
        }
    }

    #[test]
    fn test_certificate_type_round_trip() {
        for ct in CertificateType::ALL {
            assert_eq!(CertificateType::parse(ct.as_str()), Some(ct));
        }
        assert_eq!(CertificateType::parse("csca"), None);
        assert_eq!(CertificateType::parse("ROOT"), None);
    }

    #[test]
    fn test_extension_presence_ignores_whitespace() {
        let r = record_with_extensions();
        assert!(r.has_extension(ExtensionField::KeyUsage));
        assert!(r.has_extension(ExtensionField::AuthorityKeyIdentifier));
        assert!(!r.has_extension(ExtensionField::CrlDistributionPoints));
        assert_eq!(r.extension_count(), 2);
    }

    #[test]
    fn test_extension_mask_bit_order() {
        let r = record_with_extensions();
        // key_usage = bit 0, authority_key_identifier = bit 3
        assert_eq!(r.extension_mask(), 0b0000_1001);
    }

    #[test]
    fn test_validity_days() {
        let r = CertificateRecord {
            not_before: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            not_after: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let days = r.validity_days().unwrap();
        assert!((days - 3653.0).abs() < 1.0);
    }

    #[test]
    fn test_icao_violation_count() {
        let mut r = CertificateRecord::default();
        assert_eq!(r.icao_violation_count(), 0);
        r.icao_violations = Some("KU_MISSING|ALG_WEAK|EXT_MISSING".into());
        assert_eq!(r.icao_violation_count(), 3);
        r.icao_violations = Some("single".into());
        assert_eq!(r.icao_violation_count(), 1);
    }

    #[test]
    fn test_fingerprint_validation() {
        assert!(is_valid_fingerprint(&"a".repeat(64)));
        assert!(is_valid_fingerprint(&"A1".repeat(32)));
        assert!(!is_valid_fingerprint(&"a".repeat(63)));
        assert!(!is_valid_fingerprint(&"g".repeat(64)));
    }

    #[test]
    fn test_country_code_validation() {
        assert!(is_valid_country_code("KR"));
        assert!(is_valid_country_code("UNO"));
        assert!(!is_valid_country_code("kr"));
        assert!(!is_valid_country_code("K"));
        assert!(!is_valid_country_code("KORE"));
    }
}
