//! End-to-end pipeline tests against an in-memory store.

use chrono::{DateTime, Duration, Utc};
use libsql::params;

use pkd_analysis::config::AnalysisConfig;
use pkd_analysis::detector::classify_anomaly;
use pkd_analysis::job::{JobController, JobStatus};
use pkd_analysis::pipeline::{run_pipeline, AnalysisService};
use pkd_analysis::risk::{classify_forensic_risk, classify_risk};
use pkd_analysis::store::PkdStore;
use pkd_analysis::AnalysisError;

// ==================== FIXTURES ====================

#[derive(Clone)]
struct CertFixture {
    fingerprint: String,
    certificate_type: &'static str,
    country_code: &'static str,
    signature_algorithm: String,
    public_key_algorithm: String,
    public_key_size: i64,
    key_usage: Option<String>,
    extended_key_usage: Option<String>,
    subject_key_identifier: Option<String>,
    authority_key_identifier: Option<String>,
    crl_distribution_points: Option<String>,
    ocsp_responder_url: Option<String>,
    is_ca: bool,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    validation_status: Option<String>,
    subject_dn: String,
    issuer_dn: String,
    icao_compliant: Option<bool>,
    trust_chain_valid: Option<bool>,
}

fn fingerprint(n: u64) -> String {
    format!("{:064x}", n)
}

impl CertFixture {
    /// A fully compliant DSC baseline.
    fn dsc(n: u64) -> Self {
        let now = Utc::now();
        CertFixture {
            fingerprint: fingerprint(n),
            certificate_type: "DSC",
            country_code: "KR",
            signature_algorithm: "sha256WithRSAEncryption".into(),
            public_key_algorithm: "RSA".into(),
            public_key_size: 3072,
            key_usage: Some("digitalSignature".into()),
            extended_key_usage: None,
            subject_key_identifier: Some("keyid:01".into()),
            authority_key_identifier: Some("keyid:02".into()),
            crl_distribution_points: Some("http://crl.example/ca.crl".into()),
            ocsp_responder_url: Some("http://ocsp.example".into()),
            is_ca: false,
            not_before: now - Duration::days(365),
            not_after: now + Duration::days(4 * 365),
            validation_status: Some("VALID".into()),
            subject_dn: format!("CN=DSC {}, O=Gov, C=KR", n),
            issuer_dn: "CN=CSCA, O=Gov, C=KR".into(),
            icao_compliant: Some(true),
            trust_chain_valid: Some(true),
        }
    }

    fn csca(n: u64) -> Self {
        let now = Utc::now();
        CertFixture {
            certificate_type: "CSCA",
            signature_algorithm: "ecdsa-with-SHA384".into(),
            public_key_algorithm: "ECDSA".into(),
            public_key_size: 384,
            key_usage: Some("keyCertSign,cRLSign".into()),
            is_ca: true,
            not_before: now - Duration::days(365),
            not_after: now + Duration::days(5 * 365),
            subject_dn: format!("CN=CSCA {}, O=Gov, C=KR", n),
            ..CertFixture::dsc(n)
        }
    }

    fn mlsc(n: u64) -> Self {
        CertFixture {
            certificate_type: "MLSC",
            extended_key_usage: Some("masterListSigning".into()),
            ..CertFixture::dsc(n)
        }
    }
}

async fn insert(store: &PkdStore, fixture: &CertFixture) {
    let conn = store.connection().unwrap();
    conn.execute(
        r#"
        INSERT INTO certificate (
            fingerprint_sha256, certificate_type, country_code, version,
            signature_algorithm, public_key_algorithm, public_key_size, public_key_curve,
            key_usage, extended_key_usage, is_ca, path_len_constraint, is_self_signed,
            subject_key_identifier, authority_key_identifier,
            crl_distribution_points, ocsp_responder_url,
            not_before, not_after, validation_status,
            subject_dn, issuer_dn, serial_number
        ) VALUES (?1, ?2, ?3, 3, ?4, ?5, ?6, NULL, ?7, ?8, ?9, NULL, 0,
                  ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
        "#,
        params![
            fixture.fingerprint.clone(),
            fixture.certificate_type,
            fixture.country_code,
            fixture.signature_algorithm.clone(),
            fixture.public_key_algorithm.clone(),
            fixture.public_key_size,
            fixture.key_usage.clone(),
            fixture.extended_key_usage.clone(),
            fixture.is_ca as i64,
            fixture.subject_key_identifier.clone(),
            fixture.authority_key_identifier.clone(),
            fixture.crl_distribution_points.clone(),
            fixture.ocsp_responder_url.clone(),
            fixture.not_before.to_rfc3339(),
            fixture.not_after.to_rfc3339(),
            fixture.validation_status.clone(),
            fixture.subject_dn.clone(),
            fixture.issuer_dn.clone(),
            format!("serial-{}", &fixture.fingerprint[..8]),
        ],
    )
    .await
    .unwrap();

    if fixture.icao_compliant.is_some() || fixture.trust_chain_valid.is_some() {
        conn.execute(
            r#"
            INSERT INTO validation_result (
                certificate_id, trust_chain_valid, icao_compliant, icao_violations,
                icao_key_usage_compliant, icao_algorithm_compliant,
                icao_key_size_compliant, icao_extensions_compliant, signature_valid
            ) VALUES (?1, ?2, ?3, NULL, 1, 1, 1, 1, 1)
            "#,
            params![
                fixture.fingerprint.clone(),
                fixture.trust_chain_valid.map(|b| b as i64),
                fixture.icao_compliant.map(|b| b as i64),
            ],
        )
        .await
        .unwrap();
    }
}

async fn memory_store() -> PkdStore {
    PkdStore::connect(":memory:", None).await.unwrap()
}

fn test_config() -> AnalysisConfig {
    AnalysisConfig {
        database_url: ":memory:".into(),
        batch_size: 2,
        ..Default::default()
    }
}

async fn run(store: &PkdStore) -> JobController {
    let job = JobController::new();
    job.try_start().unwrap();
    run_pipeline(store, &test_config(), &job).await.unwrap();
    job
}

// ==================== SCENARIOS ====================

/// S1: weak DSC saturates the legacy risk score.
#[tokio::test]
async fn test_weak_dsc_scores_critical() {
    let store = memory_store().await;
    let now = Utc::now();
    let weak = CertFixture {
        signature_algorithm: "sha1WithRSAEncryption".into(),
        public_key_size: 1024,
        icao_compliant: Some(false),
        not_after: now + Duration::days(10),
        subject_key_identifier: None,
        authority_key_identifier: None,
        crl_distribution_points: None,
        ocsp_responder_url: None,
        ..CertFixture::dsc(1)
    };
    insert(&store, &weak).await;

    let job = run(&store).await;
    assert_eq!(job.snapshot().status, JobStatus::Completed);

    let row = store
        .fetch_analysis(&fingerprint(1))
        .await
        .unwrap()
        .expect("analysis row must exist");

    assert_eq!(row.risk_score, 100.0);
    assert_eq!(row.risk_level, "CRITICAL");
    assert_eq!(row.risk_factors["algorithm"], 40.0);
    assert_eq!(row.risk_factors["key_size"], 40.0);
    assert_eq!(row.risk_factors["compliance"], 20.0);
    assert_eq!(row.risk_factors["validity"], 10.0);
    assert_eq!(row.risk_factors["extensions"], 15.0);

    // DSC missing its required AKI (0.25) plus both recommended (0.10)
    assert!((row.structural_anomaly_score - 0.35).abs() < 1e-9);

    let finding_categories: Vec<String> = row.forensic_findings["findings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["category"].as_str().unwrap().to_string())
        .collect();
    for expected in ["algorithm", "key_size", "compliance", "validity"] {
        assert!(
            finding_categories.contains(&expected.to_string()),
            "missing finding {}",
            expected
        );
    }
}

/// S2: compliant CSCA scores low across the board.
#[tokio::test]
async fn test_compliant_csca_scores_low() {
    let store = memory_store().await;
    insert(&store, &CertFixture::csca(2)).await;

    run(&store).await;
    let row = store.fetch_analysis(&fingerprint(2)).await.unwrap().unwrap();

    assert_eq!(row.risk_level, "LOW");
    assert!(row.risk_score <= 5.0);
    assert_eq!(row.forensic_risk_level, "LOW");
    assert_eq!(row.structural_anomaly_score, 0.0);

    let categories = row.forensic_findings["categories"].as_object().unwrap();
    for (name, value) in categories {
        let v = value.as_f64().unwrap();
        assert!(v <= 3.0, "category {} unexpectedly high: {}", name, v);
    }
}

/// S3: CSCA with is_ca=false violates required + forbidden rules.
#[tokio::test]
async fn test_csca_forbidden_ca_flag() {
    let store = memory_store().await;
    let bad = CertFixture {
        is_ca: false,
        ..CertFixture::csca(3)
    };
    insert(&store, &bad).await;

    run(&store).await;
    let row = store.fetch_analysis(&fingerprint(3)).await.unwrap().unwrap();
    assert!((row.structural_anomaly_score - 0.55).abs() < 1e-9);
}

/// S4: two DSCs sharing a rare issuer get the rare-issuer increment only.
#[tokio::test]
async fn test_issuer_drift_scores() {
    let store = memory_store().await;
    let a = CertFixture {
        public_key_size: 2048,
        ..CertFixture::dsc(4)
    };
    let b = CertFixture {
        public_key_size: 4096,
        ..CertFixture::dsc(5)
    };
    insert(&store, &a).await;
    insert(&store, &b).await;

    run(&store).await;
    for n in [4u64, 5] {
        let row = store.fetch_analysis(&fingerprint(n)).await.unwrap().unwrap();
        assert!(
            (row.issuer_anomaly_score - 0.15).abs() < 1e-9,
            "issuer score for {} was {}",
            n,
            row.issuer_anomaly_score
        );
    }
}

/// S5: five MLSC rows take the rule-based fallback with IF = LOF = combined
/// and normalisation endpoints at 0 and 1.
#[tokio::test]
async fn test_small_mlsc_population_fallback() {
    let store = memory_store().await;
    let now = Utc::now();
    for n in 10..14u64 {
        insert(&store, &CertFixture::mlsc(n)).await;
    }
    // One clearly different row so the robust deviations are non-zero
    let odd = CertFixture {
        signature_algorithm: "sha1WithRSAEncryption".into(),
        public_key_size: 1024,
        not_after: now + Duration::days(40 * 365),
        icao_compliant: Some(false),
        ..CertFixture::mlsc(14)
    };
    insert(&store, &odd).await;

    run(&store).await;

    let mut scores = Vec::new();
    for n in 10..15u64 {
        let row = store.fetch_analysis(&fingerprint(n)).await.unwrap().unwrap();
        assert!((0.0..=1.0).contains(&row.anomaly_score));
        assert_eq!(row.anomaly_score, row.isolation_forest_score);
        assert_eq!(row.anomaly_score, row.lof_score);
        scores.push(row.anomaly_score);
    }
    assert!(scores.iter().any(|s| *s == 0.0));
    assert!(scores.iter().any(|s| *s == 1.0));
}

/// S6: concurrent starts — exactly one accepted, final state COMPLETED.
#[tokio::test]
async fn test_concurrent_start_single_flight() {
    let store = memory_store().await;
    insert(&store, &CertFixture::dsc(20)).await;

    let service = AnalysisService::new(store, test_config());

    let first = service.start_analysis();
    let second = service.start_analysis();

    assert!(first.is_ok());
    assert!(matches!(second, Err(AnalysisError::StateConflict)));

    // Wait for the background run to finish
    for _ in 0..100 {
        if service.job_status().status != JobStatus::Running {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }

    let status = service.job_status();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.total_certificates, 1);
    assert_eq!(status.processed_certificates, 1);
    assert_eq!(status.progress, 1.0);
}

// ==================== BOUNDARIES & INVARIANTS ====================

#[tokio::test]
async fn test_empty_population_completes_with_no_writes() {
    let store = memory_store().await;
    let job = run(&store).await;

    let state = job.snapshot();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.total_certificates, 0);
    assert_eq!(state.progress, 1.0);
    assert_eq!(store.analysis_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_completed_run_writes_one_row_per_certificate() {
    let store = memory_store().await;
    for n in 30..37u64 {
        insert(&store, &CertFixture::dsc(n)).await;
    }
    run(&store).await;

    assert_eq!(store.analysis_count().await.unwrap(), 7);
    for n in 30..37u64 {
        let row = store.fetch_analysis(&fingerprint(n)).await.unwrap().unwrap();
        assert_eq!(row.analysis_version, test_config().model_version);
        assert!(!row.analyzed_at.is_empty());
    }
}

#[tokio::test]
async fn test_labels_and_levels_are_deterministic_functions_of_scores() {
    let store = memory_store().await;
    let now = Utc::now();
    for n in 40..52u64 {
        let mut fixture = CertFixture::dsc(n);
        if n % 3 == 0 {
            fixture.signature_algorithm = "sha1WithRSAEncryption".into();
            fixture.public_key_size = 1024;
            fixture.icao_compliant = Some(false);
            fixture.not_after = now + Duration::days(5);
        }
        insert(&store, &fixture).await;
    }
    run(&store).await;

    for n in 40..52u64 {
        let row = store.fetch_analysis(&fingerprint(n)).await.unwrap().unwrap();
        assert_eq!(row.anomaly_label, classify_anomaly(row.anomaly_score).as_str());
        assert_eq!(row.risk_level, classify_risk(row.risk_score).as_str());
        assert_eq!(
            row.forensic_risk_level,
            classify_forensic_risk(row.forensic_risk_score).as_str()
        );
        assert!((0.0..=1.0).contains(&row.anomaly_score));
        assert!((0.0..=1.0).contains(&row.isolation_forest_score));
        assert!((0.0..=1.0).contains(&row.lof_score));
        assert!((0.0..=1.0).contains(&row.structural_anomaly_score));
        assert!((0.0..=1.0).contains(&row.issuer_anomaly_score));
        assert!((0.0..=1.0).contains(&row.temporal_anomaly_score));
        assert!((0.0..=100.0).contains(&row.risk_score));
        assert!((0.0..=100.0).contains(&row.forensic_risk_score));
    }
}

#[tokio::test]
async fn test_rerun_is_deterministic_and_idempotent() {
    let store = memory_store().await;
    for n in 60..72u64 {
        let mut fixture = CertFixture::dsc(n);
        fixture.public_key_size = 2048 + (n % 3) as i64 * 1024;
        insert(&store, &fixture).await;
    }

    run(&store).await;
    let mut first = Vec::new();
    for n in 60..72u64 {
        let row = store.fetch_analysis(&fingerprint(n)).await.unwrap().unwrap();
        first.push((row.feature_vector.clone(), row.isolation_forest_score));
    }

    run(&store).await;
    assert_eq!(store.analysis_count().await.unwrap(), 12);

    // The two wall-clock-relative slots may differ between runs at the
    // sixth decimal; every other feature must be bit-identical, and the
    // seeded isolation forest must reproduce its scores exactly.
    let clock_relative = ["days_until_expiry", "elapsed_life_ratio"];
    for (i, n) in (60..72u64).enumerate() {
        let row = store.fetch_analysis(&fingerprint(n)).await.unwrap().unwrap();
        let second = row.feature_vector.as_object().unwrap();
        let initial = first[i].0.as_object().unwrap();
        assert_eq!(second.len(), initial.len());
        for (name, value) in initial {
            if clock_relative.contains(&name.as_str()) {
                continue;
            }
            assert_eq!(second[name], *value, "feature {} drift for {}", name, n);
        }
        assert_eq!(
            row.isolation_forest_score, first[i].1,
            "isolation forest drift for {}",
            n
        );
    }
}

#[tokio::test]
async fn test_temporal_score_derived_from_forensic_category() {
    let store = memory_store().await;
    let now = Utc::now();
    // DSC with 20-year validity trips the temporal rule (8 points)
    let long_lived = CertFixture {
        not_before: now - Duration::days(365),
        not_after: now + Duration::days(19 * 365),
        ..CertFixture::dsc(80)
    };
    insert(&store, &long_lived).await;

    run(&store).await;
    let row = store.fetch_analysis(&fingerprint(80)).await.unwrap().unwrap();
    let category = row.forensic_findings["categories"]["temporal_pattern"]
        .as_f64()
        .unwrap();
    assert_eq!(category, 8.0);
    assert!((row.temporal_anomaly_score - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_loader_filters_types_and_deduplicates() {
    let store = memory_store().await;
    insert(&store, &CertFixture::dsc(90)).await;

    let conn = store.connection().unwrap();
    // Unsupported type must be filtered out
    conn.execute(
        "INSERT INTO certificate (fingerprint_sha256, certificate_type, country_code) \
         VALUES (?1, 'ROOT', 'KR')",
        params![fingerprint(91)],
    )
    .await
    .unwrap();
    // A second validation row must not duplicate the certificate
    conn.execute(
        "INSERT INTO validation_result (certificate_id, trust_chain_valid, icao_compliant) \
         VALUES (?1, 1, 1)",
        params![fingerprint(90)],
    )
    .await
    .unwrap();

    let population = store.load_population().await.unwrap();
    assert_eq!(population.len(), 1);
    assert_eq!(population.rows[0].fingerprint, fingerprint(90));
}

#[tokio::test]
async fn test_reports_over_stored_results() {
    use pkd_analysis::reports;

    let store = memory_store().await;
    let now = Utc::now();
    for n in 200..206u64 {
        insert(&store, &CertFixture::dsc(n)).await;
    }
    let weak = CertFixture {
        signature_algorithm: "sha1WithRSAEncryption".into(),
        public_key_size: 1024,
        icao_compliant: Some(false),
        not_after: now + Duration::days(5),
        ..CertFixture::dsc(206)
    };
    insert(&store, &weak).await;

    run(&store).await;

    // Risk distribution is ordered CRITICAL → LOW and sums to the population
    let distribution = reports::risk_distribution(&store).await.unwrap();
    let total: i64 = distribution.iter().map(|d| d.count).sum();
    assert_eq!(total, 7);
    let order: Vec<&str> = distribution.iter().map(|d| d.risk_level.as_str()).collect();
    let rank = |level: &str| match level {
        "CRITICAL" => 1,
        "HIGH" => 2,
        "MEDIUM" => 3,
        "LOW" => 4,
        _ => 5,
    };
    assert!(order.windows(2).all(|w| rank(w[0]) <= rank(w[1])));
    assert!(order.contains(&"CRITICAL"));

    // Forensic summary aggregates categories and severities
    let summary = reports::forensic_summary(&store).await.unwrap();
    assert_eq!(summary.total_analyzed, 7);
    assert!(summary.category_avg_scores.contains_key("algorithm"));
    assert!(!summary.severity_distribution.is_empty());
    assert!(!summary.top_findings.is_empty());

    // Overall statistics
    let stats = reports::analysis_statistics(&store, "1.0.0").await.unwrap();
    assert_eq!(stats.total_analyzed, 7);
    assert_eq!(
        stats.normal_count + stats.suspicious_count + stats.anomalous_count,
        7
    );
    assert!(stats.avg_risk_score > 0.0);
    assert!(stats.last_analysis_at.is_some());

    // Population reports over the loaded frame
    let population = store.load_population().await.unwrap();
    let maturity = reports::country_maturity(&population);
    assert_eq!(maturity.len(), 1);
    assert_eq!(maturity[0].country_code, "KR");
    let trends = reports::algorithm_trends(&population);
    assert!(!trends.is_empty());
}

#[tokio::test]
async fn test_mixed_population_end_to_end() {
    let store = memory_store().await;
    let now = Utc::now();

    for n in 100..140u64 {
        let mut fixture = CertFixture::dsc(n);
        fixture.public_key_size = 2048 + (n % 4) as i64 * 512;
        fixture.not_after = now + Duration::days(300 + (n % 7) as i64 * 200);
        insert(&store, &fixture).await;
    }
    for n in 140..145u64 {
        insert(&store, &CertFixture::csca(n)).await;
    }
    let rogue = CertFixture {
        signature_algorithm: "md5WithRSAEncryption".into(),
        public_key_size: 512,
        icao_compliant: Some(false),
        validation_status: Some("EXPIRED".into()),
        not_after: now - Duration::days(30),
        issuer_dn: "CN=Unknown CA".into(),
        ..CertFixture::dsc(145)
    };
    insert(&store, &rogue).await;

    let job = run(&store).await;
    assert_eq!(job.snapshot().status, JobStatus::Completed);
    assert_eq!(store.analysis_count().await.unwrap(), 46);

    let rogue_row = store.fetch_analysis(&fingerprint(145)).await.unwrap().unwrap();
    assert_eq!(rogue_row.risk_level, "CRITICAL");
    assert!(rogue_row.anomaly_score > 0.0);

    let baseline = store.fetch_analysis(&fingerprint(100)).await.unwrap().unwrap();
    assert!(baseline.risk_score < rogue_row.risk_score);
}
