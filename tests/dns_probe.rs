//! DNS prober against local mock servers.

use std::time::Duration;

use hickory_proto::op::ResponseCode;
use probe_exporter::prober::result::RrSection;
use probe_exporter::prober::{ProbeContext, ProbeEngine, ProbeFailure, ProbeReport};

mod common;

async fn probe(module_yaml: &str, target: &str) -> ProbeReport {
    let module = common::module(module_yaml);
    ProbeEngine::new()
        .probe("m", &module, target, ProbeContext::new(Duration::from_secs(3)))
        .await
}

const A_QUERY: &str = "prober: dns\ndns:\n  query_name: example.com\n  query_type: A";

#[tokio::test]
async fn test_udp_query_counts_records() {
    let addr = common::start_dns_udp_server(ResponseCode::NoError).await;
    let report = probe(A_QUERY, &addr.to_string()).await;

    assert!(report.success, "{:?}", report.failure);
    let dns = report.measurements.dns.unwrap();
    assert_eq!(dns.answer_rrs, 1);
    assert_eq!(dns.authority_rrs, 1);
    assert_eq!(dns.additional_rrs, 0);
    assert_eq!(report.measurements.ip_protocol, Some(4));
}

#[tokio::test]
async fn test_tcp_transport() {
    let addr = common::start_dns_tcp_server(ResponseCode::NoError).await;
    let yaml = format!("{}\n  transport_protocol: tcp", A_QUERY);
    let report = probe(&yaml, &addr.to_string()).await;

    assert!(report.success, "{:?}", report.failure);
    assert_eq!(report.measurements.dns.unwrap().answer_rrs, 1);
}

#[tokio::test]
async fn test_rcode_failure_still_exports_counts() {
    let addr = common::start_dns_udp_server(ResponseCode::NXDomain).await;
    let report = probe(A_QUERY, &addr.to_string()).await;

    assert_eq!(report.failure, Some(ProbeFailure::Rcode("NXDOMAIN".into())));
    let dns = report.measurements.dns.unwrap();
    assert_eq!(dns.answer_rrs, 1);

    let yaml = format!("{}\n  valid_rcodes: [NOERROR, NXDOMAIN]", A_QUERY);
    let report = probe(&yaml, &addr.to_string()).await;
    assert!(report.success, "{:?}", report.failure);
}

#[tokio::test]
async fn test_section_validation() {
    let addr = common::start_dns_udp_server(ResponseCode::NoError).await;

    let yaml = format!(
        "{}\n  validate_answer_rrs:\n    fail_if_not_matches_regexp: ['example.com.\\s+300\\s+IN\\s+A\\s+127.0.0.1']\n  validate_authority_rrs:\n    fail_if_matches_regexp: ['ns2.example.com']",
        A_QUERY
    );
    let report = probe(&yaml, &addr.to_string()).await;
    assert!(report.success, "{:?}", report.failure);

    let yaml = format!(
        "{}\n  validate_authority_rrs:\n    fail_if_matches_regexp: ['ns1.example.com']",
        A_QUERY
    );
    let report = probe(&yaml, &addr.to_string()).await;
    assert_eq!(report.failure, Some(ProbeFailure::RrValidation(RrSection::Authority)));

    let yaml = format!(
        "{}\n  validate_additional_rrs:\n    fail_if_not_matches_regexp: ['.*']",
        A_QUERY
    );
    let report = probe(&yaml, &addr.to_string()).await;
    assert_eq!(report.failure, Some(ProbeFailure::RrValidation(RrSection::Additional)));
}

#[tokio::test]
async fn test_ip6_only_against_v4_server_fails_resolution() {
    let addr = common::start_dns_udp_server(ResponseCode::NoError).await;
    let yaml = format!(
        "{}\n  preferred_ip_protocol: ip6\n  ip_protocol_fallback: false",
        A_QUERY
    );
    let report = probe(&yaml, &addr.to_string()).await;

    assert!(matches!(report.failure, Some(ProbeFailure::Resolution { .. })));
    assert_eq!(report.measurements.dns, Some(Default::default()));
    assert!(report.measurements.dns_lookup_time.is_some());
}
