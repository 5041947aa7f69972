//! HTTP prober.
//!
//! # Responsibilities
//! - Normalise the target into a URL and resolve its host
//! - Build a one-shot client pinned to the resolved address family
//! - Send the configured request and classify the response
//!
//! # Design Decisions
//! - Keep-alive is disabled: every probe opens a fresh connection
//! - Redirect limits stop following instead of erroring, so the last
//!   response is still evaluated
//! - Measurements are filled in as they become known, so early failures
//!   still report what was learned

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, HOST};
use reqwest::{redirect, Method, Response, Version};
use url::Url;

use crate::config::schema::{HttpDialProtocol, HttpProbe};
use crate::prober::matcher::{check_header, RegexpRules, Violation};
use crate::prober::resolver::{resolve_target, AddressFamily};
use crate::prober::result::{HttpMeasurements, Measurements, ProbeContext, ProbeFailure, ProbeOutcome};
use crate::prober::tls::{apply_tls_config, certificate_expiry, PeerChain};

/// Redirect chains longer than this are not followed.
pub const MAX_REDIRECTS: usize = 10;

/// Prefix `http://` when the target has no scheme.
pub fn normalize_target(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

/// Success rule for status codes.
pub fn status_is_valid(status: u16, valid: &[u16]) -> bool {
    if valid.is_empty() {
        (200..300).contains(&status)
    } else {
        valid.contains(&status)
    }
}

fn version_str(version: Version) -> (&'static str, f64) {
    match version {
        Version::HTTP_09 => ("HTTP/0.9", 0.9),
        Version::HTTP_10 => ("HTTP/1.0", 1.0),
        Version::HTTP_2 => ("HTTP/2.0", 2.0),
        Version::HTTP_3 => ("HTTP/3.0", 3.0),
        _ => ("HTTP/1.1", 1.1),
    }
}

/// Run one HTTP probe.
pub async fn probe_http(ctx: &ProbeContext, target: &str, config: &HttpProbe) -> ProbeOutcome {
    let mut measurements = Measurements::default();
    let mut http = HttpMeasurements::default();

    let result = run(ctx, target, config, &mut measurements, &mut http).await;

    measurements.http = Some(http);
    ProbeOutcome::new(result, measurements)
}

async fn run(
    ctx: &ProbeContext,
    target: &str,
    config: &HttpProbe,
    measurements: &mut Measurements,
    http: &mut HttpMeasurements,
) -> Result<(), ProbeFailure> {
    let target = normalize_target(target);
    let url = Url::parse(&target).map_err(|e| ProbeFailure::InvalidTarget {
        target: target.clone(),
        reason: e.to_string(),
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| ProbeFailure::InvalidTarget {
            target: target.clone(),
            reason: "missing host".to_string(),
        })?
        .to_string();

    let resolved = match config.protocol {
        HttpDialProtocol::Tcp => {
            let resolved = resolve_target(
                &host,
                config.preferred_ip_protocol,
                config.ip_protocol_fallback,
            )
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
            Some(resolved)
        }
        HttpDialProtocol::Icmp => None,
    };

    let redirects = Arc::new(AtomicUsize::new(0));
    let (client, chain) =
        build_client(ctx, config, &host, resolved.map(|r| r.ip), redirects.clone())?;
    let request = build_request(&client, url, config).await?;

    let response = client.execute(request).await;
    http.redirects = redirects.load(Ordering::Relaxed);

    let response = response.map_err(|e| {
        tracing::warn!(target = %target, error = %e, "Error for HTTP request");
        if e.is_timeout() {
            ProbeFailure::Timeout(format!("HTTP request to {}", target))
        } else {
            ProbeFailure::Transport(e.to_string())
        }
    })?;

    if measurements.ip_protocol.is_none() {
        if let Some(addr) = response.remote_addr() {
            measurements.ip_protocol = Some(AddressFamily::of(&addr.ip()).version());
        }
    }

    evaluate_response(response, &chain, config, measurements, http).await
}

fn build_client(
    ctx: &ProbeContext,
    config: &HttpProbe,
    host: &str,
    pinned: Option<IpAddr>,
    redirects: Arc<AtomicUsize>,
) -> Result<(reqwest::Client, PeerChain), ProbeFailure> {
    let no_follow = config.no_follow_redirects;
    let policy = redirect::Policy::custom(move |attempt| {
        let hops = attempt.previous().len();
        redirects.store(hops, Ordering::Relaxed);
        if hops > MAX_REDIRECTS || no_follow {
            attempt.stop()
        } else {
            attempt.follow()
        }
    });

    let mut builder = reqwest::Client::builder()
        .timeout(ctx.remaining())
        .redirect(policy)
        .pool_max_idle_per_host(0)
        .tls_info(true);

    if let Some(ip) = pinned {
        // Bind the wildcard of the resolved family so every hop, redirects
        // included, dials that family only.
        builder = builder.local_address(AddressFamily::of(&ip).unspecified());
        if host.parse::<IpAddr>().is_err() {
            builder = builder.resolve(host, SocketAddr::new(ip, 0));
        }
    }

    let client_config = &config.http_client_config;
    if let Some(proxy_url) = &client_config.proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url.as_str())
            .map_err(|e| ProbeFailure::Config(format!("invalid proxy_url: {}", e)))?;
        builder = builder.proxy(proxy);
    }

    let (builder, chain) = apply_tls_config(builder, &client_config.tls_config).map_err(|e| {
        tracing::error!(error = %e, "Error generating TLS config");
        ProbeFailure::Config(format!("error generating TLS config: {}", e))
    })?;

    let client = builder.build().map_err(|e| {
        tracing::error!(error = %e, "Error building HTTP client");
        ProbeFailure::Config(format!("error building HTTP client: {}", e))
    })?;
    Ok((client, chain))
}

async fn build_request(
    client: &reqwest::Client,
    url: Url,
    config: &HttpProbe,
) -> Result<reqwest::Request, ProbeFailure> {
    let method = Method::from_bytes(config.method.as_bytes())
        .map_err(|_| ProbeFailure::Config(format!("invalid method {:?}", config.method)))?;

    let mut request = client.request(method, url);

    for (key, value) in &config.headers {
        let value = HeaderValue::from_str(value)
            .map_err(|_| ProbeFailure::Config(format!("invalid value for header {}", key)))?;
        // The Host header sets the request authority instead of being appended.
        if key.eq_ignore_ascii_case("host") {
            request = request.header(HOST, value);
            continue;
        }
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ProbeFailure::Config(format!("invalid header name {}", key)))?;
        request = request.header(name, value);
    }

    if !config.compression.is_empty() && config.accept_encoding().is_none() {
        let value = HeaderValue::from_str(&config.compression)
            .map_err(|_| ProbeFailure::Config("invalid compression".to_string()))?;
        request = request.header(ACCEPT_ENCODING, value);
    }

    let client_config = &config.http_client_config;
    if let Some(token) = &client_config.bearer_token {
        request = request.bearer_auth(token.expose());
    } else if let Some(path) = &client_config.bearer_token_file {
        let token = tokio::fs::read_to_string(path).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Error reading bearer token file");
            ProbeFailure::Config(format!("reading bearer_token_file: {}", e))
        })?;
        request = request.bearer_auth(token.trim());
    }

    if let Some(auth) = &client_config.basic_auth {
        let password = match (&auth.password, &auth.password_file) {
            (Some(secret), _) => Some(secret.expose().to_string()),
            (None, Some(path)) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| ProbeFailure::Config(format!("reading password_file: {}", e)))?
                    .trim()
                    .to_string(),
            ),
            (None, None) => None,
        };
        request = request.basic_auth(&auth.username, password);
    }

    if !config.body.is_empty() {
        request = request.body(config.body.clone());
    } else if let Some(path) = &config.body_file {
        let body = tokio::fs::read(path).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Error reading body file");
            ProbeFailure::Config(format!("reading body_file: {}", e))
        })?;
        request = request.body(body);
    }

    request.build().map_err(|e| {
        tracing::error!(error = %e, "Error creating request");
        ProbeFailure::Config(format!("error creating request: {}", e))
    })
}

async fn evaluate_response(
    response: Response,
    chain: &PeerChain,
    config: &HttpProbe,
    measurements: &mut Measurements,
    http: &mut HttpMeasurements,
) -> Result<(), ProbeFailure> {
    let status = response.status().as_u16();
    let (version_name, version_number) = version_str(response.version());
    http.status_code = status;
    http.version = Some(version_number);
    http.content_length = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(-1);

    http.ssl = response.url().scheme() == "https";
    if let Some(info) = response.extensions().get::<reqwest::tls::TlsInfo>() {
        http.ssl = true;
        tracing::debug!(certificates = chain.len(), "Peer certificate chain");
        http.ssl_earliest_cert_expiry = chain
            .earliest_expiry()
            .or_else(|| info.peer_certificate().and_then(certificate_expiry));
    }

    let body_rules = RegexpRules::new(
        &config.fail_if_body_matches_regexp,
        &config.fail_if_body_not_matches_regexp,
    );
    let has_regexps = !body_rules.is_empty()
        || !config.fail_if_header_matches.is_empty()
        || !config.fail_if_header_not_matches.is_empty();
    if has_regexps {
        measurements.failed_due_to_regex = Some(false);
    }

    let mut result = check_status_and_headers(&response, config, status, version_name);
    if result.is_ok() && !body_rules.is_empty() {
        result = check_body(response, body_rules).await;
    }

    if let Err(failure) = &result {
        if failure.is_regexp() {
            measurements.failed_due_to_regex = Some(true);
        }
        tracing::debug!(failure = %failure, "HTTP response rejected");
    }

    // TLS policy is applied after everything else and always wins.
    if http.ssl && config.fail_if_ssl {
        return Err(ProbeFailure::TlsForbidden);
    }
    if !http.ssl && config.fail_if_not_ssl {
        return Err(ProbeFailure::TlsRequired);
    }

    result
}

fn check_status_and_headers(
    response: &Response,
    config: &HttpProbe,
    status: u16,
    version: &str,
) -> Result<(), ProbeFailure> {
    if !status_is_valid(status, &config.valid_status_codes) {
        return Err(ProbeFailure::StatusCode(status));
    }

    if !config.valid_http_versions.is_empty()
        && !config.valid_http_versions.iter().any(|v| v == version)
    {
        return Err(ProbeFailure::HttpVersion(version.to_string()));
    }

    let headers = response.headers();
    let values = |name: &str| -> Vec<&str> {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    };
    for rule in &config.fail_if_header_matches {
        check_header(&values(&rule.header), rule, true)?;
    }
    for rule in &config.fail_if_header_not_matches {
        check_header(&values(&rule.header), rule, false)?;
    }

    if !config.compression.is_empty() {
        let actual = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !actual.eq_ignore_ascii_case(&config.compression) {
            return Err(ProbeFailure::ContentEncoding {
                expected: config.compression.clone(),
                actual: actual.to_string(),
            });
        }
    }

    Ok(())
}

async fn check_body(response: Response, rules: RegexpRules<'_>) -> Result<(), ProbeFailure> {
    let body = response.bytes().await.map_err(|e| {
        tracing::error!(error = %e, "Error reading HTTP body");
        if e.is_timeout() {
            ProbeFailure::Timeout("reading HTTP body".to_string())
        } else {
            ProbeFailure::Body(e.to_string())
        }
    })?;
    let text = String::from_utf8_lossy(&body);
    rules.check(&text).map_err(|violation| match violation {
        Violation::Matched(re) => ProbeFailure::BodyMatched(re),
        Violation::NotMatched(re) => ProbeFailure::BodyNotMatched(re),
        Violation::Empty => ProbeFailure::BodyNotMatched(String::new()),
    })
}
