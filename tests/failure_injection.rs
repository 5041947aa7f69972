//! Failure injection tests for the probers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use probe_exporter::observability::exposition::render_report;
use probe_exporter::prober::result::DnsMeasurements;
use probe_exporter::prober::{ProbeContext, ProbeEngine, ProbeFailure};

mod common;
use common::MockResponse;

#[tokio::test]
async fn test_connection_refused_is_transport_failure() {
    let addr = common::closed_port().await;
    let module = common::module("prober: http");

    let report = ProbeEngine::new()
        .probe("m", &module, &addr.to_string(), ProbeContext::new(Duration::from_secs(2)))
        .await;

    assert!(!report.success);
    assert!(matches!(report.failure, Some(ProbeFailure::Transport(_))), "{:?}", report.failure);
    let http = report.measurements.http.unwrap();
    assert_eq!(http.status_code, 0);
    assert_eq!(http.content_length, -1);
    assert_eq!(report.measurements.ip_protocol, Some(4));
}

#[tokio::test]
async fn test_slow_backend_times_out_at_deadline() {
    let addr = common::start_programmable_backend(|_| async {
        MockResponse::new(200, "late").delay(Duration::from_secs(3))
    })
    .await;
    let module = common::module("prober: http\ntimeout: 300ms");

    let start = Instant::now();
    let report = ProbeEngine::new()
        .probe("m", &module, &addr.to_string(), ProbeContext::new(module.timeout))
        .await;

    assert!(matches!(report.failure, Some(ProbeFailure::Timeout(_))), "{:?}", report.failure);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_no_retries_on_failure() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let addr = common::start_programmable_backend(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { MockResponse::new(503, "Service Unavailable") }
    })
    .await;
    let module = common::module("prober: http");

    let report = ProbeEngine::new()
        .probe("m", &module, &addr.to_string(), ProbeContext::new(Duration::from_secs(2)))
        .await;

    assert_eq!(report.failure, Some(ProbeFailure::StatusCode(503)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tcp_conversation_times_out() {
    // Greets with READY but never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut socket, b"READY\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let module = common::module(
        "prober: tcp\ntimeout: 300ms\ntcp:\n  query_response:\n    - expect: '^READY'\n    - send: ping\n    - expect: '^PONG'",
    );
    let report = ProbeEngine::new()
        .probe("m", &module, &addr.to_string(), ProbeContext::new(module.timeout))
        .await;

    assert!(matches!(report.failure, Some(ProbeFailure::Timeout(_))), "{:?}", report.failure);
}

#[tokio::test]
async fn test_dns_server_silent() {
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();
    let module = common::module("prober: dns\ntimeout: 300ms\ndns:\n  query_name: example.com");

    let report = ProbeEngine::new()
        .probe("m", &module, &addr.to_string(), ProbeContext::new(module.timeout))
        .await;

    assert!(matches!(report.failure, Some(ProbeFailure::Timeout(_))), "{:?}", report.failure);
    assert_eq!(report.measurements.dns, Some(DnsMeasurements::default()));

    let text = render_report(&report);
    assert!(text.contains("probe_dns_answer_rrs 0\n"), "{}", text);
    assert!(text.contains("probe_dns_authority_rrs 0\n"), "{}", text);
    assert!(text.contains("probe_dns_additional_rrs 0\n"), "{}", text);
    drop(silent);
}

#[tokio::test]
async fn test_icmp_loopback_or_socket_failure() {
    let module = common::module("prober: icmp\nicmp:\n  protocol: icmp4");
    let report = ProbeEngine::new()
        .probe("m", &module, "127.0.0.1", ProbeContext::new(Duration::from_secs(2)))
        .await;

    // Raw sockets need privileges; without them the failure is a socket failure.
    match report.failure {
        None => assert!(report.success),
        Some(ProbeFailure::Socket(_)) | Some(ProbeFailure::Timeout(_)) => {}
        other => panic!("unexpected failure {:?}", other),
    }
    assert_eq!(report.measurements.ip_protocol, Some(4));
}
