//! Prometheus text rendering of a single probe.
//!
//! The `/probe` endpoint answers with a fresh set of gauges per request, so
//! reports are rendered directly instead of going through the global
//! recorder.

use std::fmt::Write;

use crate::prober::ProbeReport;

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct Exposition {
    out: String,
}

impl Exposition {
    fn new() -> Self {
        Self { out: String::new() }
    }

    fn gauge(&mut self, name: &str, help: &str, value: f64) {
        let _ = writeln!(self.out, "# HELP {} {}", name, help);
        let _ = writeln!(self.out, "# TYPE {} gauge", name);
        let _ = writeln!(self.out, "{} {}", name, value);
    }

    fn flag(&mut self, name: &str, help: &str, value: bool) {
        self.gauge(name, help, if value { 1.0 } else { 0.0 });
    }
}

/// Render a report in the Prometheus text format.
pub fn render_report(report: &ProbeReport) -> String {
    let mut e = Exposition::new();
    let m = &report.measurements;

    if let Some(lookup) = m.dns_lookup_time {
        e.gauge(
            "probe_dns_lookup_time_seconds",
            "Returns the time taken for probe dns lookup in seconds",
            lookup.as_secs_f64(),
        );
    }
    if let Some(version) = m.ip_protocol {
        e.gauge(
            "probe_ip_protocol",
            "Specifies whether probe ip protocol is IP4 or IP6",
            f64::from(version),
        );
    }

    if let Some(http) = &m.http {
        e.gauge(
            "probe_http_status_code",
            "Response HTTP status code",
            f64::from(http.status_code),
        );
        e.gauge(
            "probe_http_content_length",
            "Length of http content response",
            http.content_length as f64,
        );
        e.gauge(
            "probe_http_redirects",
            "The number of redirects",
            http.redirects as f64,
        );
        e.flag("probe_http_ssl", "Indicates if SSL was used for the final redirect", http.ssl);
        if let Some(version) = http.version {
            e.gauge("probe_http_version", "Returns the version of HTTP of the probe response", version);
        }
        if let Some(expiry) = http.ssl_earliest_cert_expiry {
            e.gauge(
                "probe_ssl_earliest_cert_expiry",
                "Returns earliest SSL cert expiry date",
                expiry,
            );
        }
    }

    if let Some(dns) = &m.dns {
        e.gauge(
            "probe_dns_answer_rrs",
            "Returns number of entries in the answer resource record list",
            dns.answer_rrs as f64,
        );
        e.gauge(
            "probe_dns_authority_rrs",
            "Returns number of entries in the authority resource record list",
            dns.authority_rrs as f64,
        );
        e.gauge(
            "probe_dns_additional_rrs",
            "Returns number of entries in the additional resource record list",
            dns.additional_rrs as f64,
        );
    }

    if let Some(failed) = m.failed_due_to_regex {
        e.flag("probe_failed_due_to_regex", "Indicates if probe failed due to regex", failed);
    }

    e.gauge(
        "probe_duration_seconds",
        "Returns how long the probe took to complete in seconds",
        report.duration.as_secs_f64(),
    );
    e.flag("probe_success", "Displays whether or not the probe was a success", report.success);

    e.out
}
