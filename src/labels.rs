// src/labels.rs
// Localised display strings for anomaly explanations and risk findings.
//
// The math emits stable English feature names and category keys; every
// human-readable string goes through this table so another locale can be
// added without touching the scoring code. Current locale: Korean.

use std::collections::HashMap;

use once_cell::sync::Lazy;

static FEATURE_LABELS_KO: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("key_size_normalized", "키 크기"),
        ("algorithm_age_score", "알고리즘 권장 수준"),
        ("is_ecdsa", "ECDSA 사용 여부"),
        ("is_rsa_pss", "RSA-PSS 사용 여부"),
        ("validity_days", "유효기간 일수"),
        ("validity_ratio", "유형 평균 대비 유효기간"),
        ("days_until_expiry", "만료까지 남은 일수"),
        ("is_expired", "만료 여부"),
        ("icao_compliant", "ICAO 9303 준수"),
        ("trust_chain_valid", "신뢰 체인 유효성"),
        ("icao_violation_count", "ICAO 위반 항목 수"),
        ("key_usage_compliant", "Key Usage 준수"),
        ("algorithm_compliant", "알고리즘 준수"),
        ("extension_count", "확장 필드 수"),
        ("has_crl_dp", "CRL Distribution Point 존재"),
        ("has_ocsp", "OCSP Responder 존재"),
        ("has_aki", "Authority Key Identifier 존재"),
        ("is_ca", "CA 인증서 여부"),
        ("is_self_signed", "자체 서명 여부"),
        ("version", "X.509 버전"),
        ("path_len", "pathLen 제약"),
        ("key_size_vs_country_avg", "국가 평균 대비 키 크기 편차"),
        ("validity_vs_country_avg", "국가 평균 대비 유효기간 편차"),
        ("country_cert_count", "해당 국가 인증서 수"),
        ("cert_type_encoded", "인증서 유형"),
        ("issuer_cert_count", "발급자 인증서 수"),
        ("issuer_anomaly_rate", "발급자 이상 징후 비율"),
        ("issuer_type_diversity", "발급자 인증서 유형 다양성"),
        ("issuer_country_match", "발급자-주체 국가 일치"),
        ("issuance_month", "발급 월"),
        ("validity_zscore_type", "유형 내 유효기간 표준편차"),
        ("issuance_rate_deviation", "국가-연도 발급률 편차"),
        ("elapsed_life_ratio", "경과 수명 비율"),
        ("subject_dn_field_count", "주체 DN 필드 수"),
        ("issuer_dn_field_count", "발급자 DN 필드 수"),
        ("dn_format_type", "DN 형식 유형"),
        ("has_email_in_dn", "DN 내 이메일 존재"),
        ("extension_pattern_hash", "확장 패턴 해시"),
        ("unexpected_extension_count", "예상 외 확장 수"),
        ("missing_required_count", "필수 확장 누락 수"),
        ("critical_extension_count", "Critical 확장 표시 수"),
        ("key_size_vs_issuer_avg", "발급자 평균 대비 키 크기 편차"),
        ("algorithm_matches_issuer", "발급자 주력 알고리즘 일치"),
        ("country_compliance_proxy", "국가 준수율 프록시"),
        ("extension_pattern_match", "유형 확장 패턴 일치율"),
    ])
});

/// Display label for a feature name; unknown names fall back to the name.
pub fn feature_label(name: &str) -> &str {
    FEATURE_LABELS_KO.get(name).copied().unwrap_or(name)
}

/// One anomaly-explanation line: `"<label>: 평균 대비 X.Xσ {높음|낮음}"`.
pub fn explanation_line(feature_name: &str, sigma: f64, above_mean: bool) -> String {
    let direction = if above_mean { "높음" } else { "낮음" };
    format!(
        "{}: 평균 대비 {:.1}σ {}",
        feature_label(feature_name),
        sigma,
        direction
    )
}

// ==================== FINDING MESSAGES ====================

pub fn msg_weak_algorithm(sig_alg: &str) -> String {
    format!("취약한 서명 알고리즘 사용: {}", sig_alg)
}

pub fn msg_weak_key(pub_alg: &str, key_size: i64) -> String {
    format!("불충분한 키 크기: {} {}비트", pub_alg, key_size)
}

pub fn msg_non_compliant() -> String {
    "ICAO Doc 9303 비준수 인증서".to_string()
}

pub fn msg_validity(days_left: f64) -> String {
    if days_left < 0.0 {
        "만료된 인증서".to_string()
    } else {
        format!("만료 임박: {:.0}일 남음", days_left)
    }
}

pub fn msg_ml_anomaly(score: f64) -> String {
    format!("ML 이상 탐지 점수 높음: {:.2}", score)
}

pub fn msg_issuer_reputation(score: f64) -> String {
    format!("발급자 행동 패턴 이상: {:.2}", score)
}

pub fn msg_structural(score: f64) -> String {
    format!("확장 필드 구조 위반: {:.2}", score)
}

pub fn msg_temporal_pattern() -> String {
    "비정상적인 유효기간 패턴".to_string()
}

pub fn msg_dn_country_mismatch(dn_country: &str, country_code: &str) -> String {
    format!("주체 DN 국가({})와 등록 국가({}) 불일치", dn_country, country_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_label_lookup() {
        assert_eq!(feature_label("key_size_normalized"), "키 크기");
        assert_eq!(feature_label("no_such_feature"), "no_such_feature");
    }

    #[test]
    fn test_explanation_line_format() {
        let line = explanation_line("is_expired", 2.34, true);
        assert_eq!(line, "만료 여부: 평균 대비 2.3σ 높음");
        let line = explanation_line("key_size_normalized", 1.05, false);
        assert_eq!(line, "키 크기: 평균 대비 1.0σ 낮음");
    }
}
