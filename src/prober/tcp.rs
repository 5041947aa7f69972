//! TCP prober.
//!
//! Connects to `host:port` in the resolved family and optionally runs a
//! line based expect/send conversation.

use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::config::schema::{QueryResponse, TcpProbe};
use crate::prober::resolver::{resolve_target, split_host_port};
use crate::prober::result::{Measurements, ProbeContext, ProbeFailure, ProbeOutcome};

/// Run one TCP probe.
pub async fn probe_tcp(ctx: &ProbeContext, target: &str, config: &TcpProbe) -> ProbeOutcome {
    let mut measurements = Measurements::default();
    if config.query_response.iter().any(|step| step.expect.is_some()) {
        measurements.failed_due_to_regex = Some(false);
    }

    let result = run(ctx, target, config, &mut measurements).await;
    if let Err(failure) = &result {
        if failure.is_regexp() {
            measurements.failed_due_to_regex = Some(true);
        }
    }
    ProbeOutcome::new(result, measurements)
}

async fn run(
    ctx: &ProbeContext,
    target: &str,
    config: &TcpProbe,
    measurements: &mut Measurements,
) -> Result<(), ProbeFailure> {
    let (host, port) = split_host_port(target);
    let port = port.ok_or_else(|| ProbeFailure::InvalidTarget {
        target: target.to_string(),
        reason: "missing port".to_string(),
    })?;

    let resolved = resolve_target(&host, config.preferred_ip_protocol, config.ip_protocol_fallback)
        .await
        .map_err(|e| {
            tracing::warn!(target = %target, error = %e, "Error resolving address");
            measurements.dns_lookup_time = Some(e.lookup_time());
            ProbeFailure::Resolution {
                target: host.clone(),
                reason: e.to_string(),
            }
        })?;
    measurements.ip_protocol = Some(resolved.family().version());
    measurements.dns_lookup_time = Some(resolved.lookup_time);

    let addr = std::net::SocketAddr::new(resolved.ip, port);
    let network = resolved.family().dial_network("tcp");
    tracing::debug!(%addr, network, "Dialing TCP");

    let started = Instant::now();
    let stream = tokio::time::timeout_at(ctx.deadline(), TcpStream::connect(addr))
        .await
        .map_err(|_| ProbeFailure::Timeout(format!("connecting to {}", addr)))?
        .map_err(|e| {
            tracing::warn!(%addr, error = %e, "Error dialing TCP");
            ProbeFailure::Transport(e.to_string())
        })?;
    tracing::debug!(%addr, elapsed = ?started.elapsed(), "Connected");

    if config.query_response.is_empty() {
        return Ok(());
    }

    match tokio::time::timeout_at(ctx.deadline(), converse(stream, &config.query_response)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeFailure::Timeout("TCP conversation".to_string())),
    }
}

async fn converse(stream: TcpStream, steps: &[QueryResponse]) -> Result<(), ProbeFailure> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    for (i, step) in steps.iter().enumerate() {
        let mut matched_line = None;

        if let Some(expect) = &step.expect {
            tracing::debug!(step = i, expect = %expect, "Awaiting line");
            loop {
                let line = lines
                    .next_line()
                    .await
                    .map_err(|e| ProbeFailure::Transport(e.to_string()))?;
                let Some(line) = line else {
                    tracing::warn!(step = i, expect = %expect, "Connection closed before match");
                    return Err(ProbeFailure::ExpectNotMatched(expect.original().to_string()));
                };
                tracing::debug!(step = i, line = %line, "Read line");
                if expect.is_match(&line) {
                    matched_line = Some(line);
                    break;
                }
            }
        }

        if !step.send.is_empty() {
            let mut payload = String::new();
            match (&step.expect, matched_line.as_deref()) {
                (Some(expect), Some(line)) => match expect.captures(line) {
                    Some(caps) => caps.expand(&step.send, &mut payload),
                    None => payload.push_str(&step.send),
                },
                _ => payload.push_str(&step.send),
            }
            payload.push('\n');
            tracing::debug!(step = i, send = payload.trim_end(), "Sending line");
            writer
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| ProbeFailure::Transport(e.to_string()))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::config::{IpProtocol, Regexp};

    fn v4_config(steps: Vec<QueryResponse>) -> TcpProbe {
        TcpProbe {
            preferred_ip_protocol: IpProtocol::Ip4,
            ip_protocol_fallback: false,
            query_response: steps,
        }
    }

    #[tokio::test]
    async fn test_missing_port() {
        let ctx = ProbeContext::new(Duration::from_secs(1));
        let outcome = probe_tcp(&ctx, "127.0.0.1", &v4_config(vec![])).await;
        assert!(matches!(outcome.result, Err(ProbeFailure::InvalidTarget { .. })));
    }

    #[tokio::test]
    async fn test_expect_and_send_with_captures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, mut w) = stream.into_split();
            w.write_all(b"banner\nSSH-2.0-test\n").await.unwrap();
            let mut lines = BufReader::new(r).lines();
            lines.next_line().await.unwrap()
        });

        let steps = vec![QueryResponse {
            expect: Some(Regexp::new("^SSH-2.0-(\\w+)").unwrap()),
            send: "hello ${1}".to_string(),
        }];
        let ctx = ProbeContext::new(Duration::from_secs(2));
        let outcome = probe_tcp(&ctx, &addr.to_string(), &v4_config(steps)).await;

        assert!(outcome.result.is_ok(), "{:?}", outcome.result);
        assert_eq!(outcome.measurements.ip_protocol, Some(4));
        assert_eq!(outcome.measurements.failed_due_to_regex, Some(false));
        assert_eq!(server.await.unwrap().as_deref(), Some("hello test"));
    }

    #[tokio::test]
    async fn test_expect_fails_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"nope\n").await.unwrap();
        });

        let steps = vec![QueryResponse {
            expect: Some(Regexp::new("^OK").unwrap()),
            send: String::new(),
        }];
        let ctx = ProbeContext::new(Duration::from_secs(2));
        let outcome = probe_tcp(&ctx, &addr.to_string(), &v4_config(steps)).await;

        assert!(matches!(outcome.result, Err(ProbeFailure::ExpectNotMatched(_))));
        assert_eq!(outcome.measurements.failed_due_to_regex, Some(true));
    }
}
