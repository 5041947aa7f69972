//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the exporter.
//! All types derive Serde traits for deserialization from config files, and
//! every struct rejects fields it does not know.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::regexp::Regexp;
use crate::config::secret::Secret;

/// Root configuration: named probe modules.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub modules: BTreeMap<String, Module>,
}

/// A named probe configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Module {
    /// Which prober runs this module.
    pub prober: ProberKind,

    /// Upper bound for a single probe attempt.
    #[serde(default = "default_timeout", with = "duration_format")]
    pub timeout: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpProbe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpProbe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsProbe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp: Option<IcmpProbe>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Borrowed view of the settings that belong to a module's prober.
#[derive(Debug, Clone, Copy)]
pub enum ProbeSettings<'a> {
    Http(&'a HttpProbe),
    Tcp(&'a TcpProbe),
    Dns(&'a DnsProbe),
    Icmp(&'a IcmpProbe),
}

impl Module {
    /// Build a module for `prober` with default settings and timeout.
    pub fn new(prober: ProberKind) -> Self {
        let mut module = Self {
            prober,
            timeout: default_timeout(),
            http: None,
            tcp: None,
            dns: None,
            icmp: None,
        };
        module.fill_defaults();
        module
    }

    /// Populate the section matching `prober` when the document omitted it.
    ///
    /// DNS has a mandatory query name, so its section is never synthesized.
    pub fn fill_defaults(&mut self) {
        match self.prober {
            ProberKind::Http => {
                self.http.get_or_insert_with(HttpProbe::default);
            }
            ProberKind::Tcp => {
                self.tcp.get_or_insert_with(TcpProbe::default);
            }
            ProberKind::Icmp => {
                self.icmp.get_or_insert_with(IcmpProbe::default);
            }
            ProberKind::Dns => {}
        }
    }

    /// The settings for this module's prober, if the matching section exists.
    pub fn settings(&self) -> Option<ProbeSettings<'_>> {
        match self.prober {
            ProberKind::Http => self.http.as_ref().map(ProbeSettings::Http),
            ProberKind::Tcp => self.tcp.as_ref().map(ProbeSettings::Tcp),
            ProberKind::Dns => self.dns.as_ref().map(ProbeSettings::Dns),
            ProberKind::Icmp => self.icmp.as_ref().map(ProbeSettings::Icmp),
        }
    }

    /// Names of populated sections that do not belong to `prober`.
    pub fn foreign_sections(&self) -> Vec<ProberKind> {
        let mut foreign = Vec::new();
        if self.http.is_some() && self.prober != ProberKind::Http {
            foreign.push(ProberKind::Http);
        }
        if self.tcp.is_some() && self.prober != ProberKind::Tcp {
            foreign.push(ProberKind::Tcp);
        }
        if self.dns.is_some() && self.prober != ProberKind::Dns {
            foreign.push(ProberKind::Dns);
        }
        if self.icmp.is_some() && self.prober != ProberKind::Icmp {
            foreign.push(ProberKind::Icmp);
        }
        foreign
    }
}

/// The closed set of probers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProberKind {
    Http,
    Tcp,
    Dns,
    Icmp,
}

impl ProberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProberKind::Http => "http",
            ProberKind::Tcp => "tcp",
            ProberKind::Dns => "dns",
            ProberKind::Icmp => "icmp",
        }
    }
}

/// A prober name that does not exactly match a known kind.
#[derive(Debug, thiserror::Error)]
#[error("prober '{0}' is invalid")]
pub struct UnknownProber(pub String);

impl TryFrom<String> for ProberKind {
    type Error = UnknownProber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "http" => Ok(ProberKind::Http),
            "tcp" => Ok(ProberKind::Tcp),
            "dns" => Ok(ProberKind::Dns),
            "icmp" => Ok(ProberKind::Icmp),
            _ => Err(UnknownProber(value)),
        }
    }
}

impl From<ProberKind> for String {
    fn from(kind: ProberKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ProberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preferred address family for target resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpProtocol {
    Ip4,
    #[default]
    Ip6,
}

impl IpProtocol {
    pub fn other(&self) -> Self {
        match self {
            IpProtocol::Ip4 => IpProtocol::Ip6,
            IpProtocol::Ip6 => IpProtocol::Ip4,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Ip4 => f.write_str("ip4"),
            IpProtocol::Ip6 => f.write_str("ip6"),
        }
    }
}

/// How the HTTP prober reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpDialProtocol {
    /// Resolve the target and pin the connection to the resolved family.
    #[default]
    Tcp,
    /// Leave address selection to the transport.
    Icmp,
}

/// HTTP probe settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpProbe {
    /// Accepted status codes. Empty means any 2xx.
    pub valid_status_codes: Vec<u16>,

    /// Accepted protocol versions, e.g. "HTTP/1.1". Empty means any.
    pub valid_http_versions: Vec<String>,

    pub protocol: HttpDialProtocol,
    pub preferred_ip_protocol: IpProtocol,
    pub ip_protocol_fallback: bool,

    pub no_follow_redirects: bool,
    pub fail_if_ssl: bool,
    pub fail_if_not_ssl: bool,

    pub method: String,
    /// Request headers in document order.
    pub headers: IndexMap<String, String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_file: Option<PathBuf>,

    /// Expected `Content-Encoding` of the response.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub compression: String,

    #[serde(alias = "fail_if_matches_regexp")]
    pub fail_if_body_matches_regexp: Vec<Regexp>,
    #[serde(alias = "fail_if_not_matches_regexp")]
    pub fail_if_body_not_matches_regexp: Vec<Regexp>,
    pub fail_if_header_matches: Vec<HeaderMatch>,
    pub fail_if_header_not_matches: Vec<HeaderMatch>,

    pub http_client_config: HttpClientConfig,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self {
            valid_status_codes: Vec::new(),
            valid_http_versions: Vec::new(),
            protocol: HttpDialProtocol::Tcp,
            preferred_ip_protocol: IpProtocol::Ip6,
            ip_protocol_fallback: true,
            no_follow_redirects: false,
            fail_if_ssl: false,
            fail_if_not_ssl: false,
            method: "GET".to_string(),
            headers: IndexMap::new(),
            body: String::new(),
            body_file: None,
            compression: String::new(),
            fail_if_body_matches_regexp: Vec::new(),
            fail_if_body_not_matches_regexp: Vec::new(),
            fail_if_header_matches: Vec::new(),
            fail_if_header_not_matches: Vec::new(),
            http_client_config: HttpClientConfig::default(),
        }
    }
}

impl HttpProbe {
    /// The configured `Accept-Encoding` header, matched case-insensitively.
    pub fn accept_encoding(&self) -> Option<(&str, &str)> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("accept-encoding"))
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// A header rule for HTTP responses.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderMatch {
    pub header: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regexp: Option<Regexp>,
    pub allow_missing: bool,
}

/// Credentials, TLS and proxy settings for the HTTP client.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpClientConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
    pub tls_config: TlsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// HTTP basic authentication.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BasicAuth {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
}

/// Client-side TLS options.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<TlsVersion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TlsVersion {
    #[serde(rename = "TLS12")]
    Tls12,
    #[serde(rename = "TLS13")]
    Tls13,
}

/// TCP probe settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpProbe {
    pub preferred_ip_protocol: IpProtocol,
    pub ip_protocol_fallback: bool,
    pub query_response: Vec<QueryResponse>,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            preferred_ip_protocol: IpProtocol::Ip6,
            ip_protocol_fallback: true,
            query_response: Vec::new(),
        }
    }
}

/// One expect/send step of a TCP conversation.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect: Option<Regexp>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub send: String,
}

/// DNS transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    #[default]
    Udp,
    Tcp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Udp => f.write_str("udp"),
            TransportProtocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// DNS probe settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DnsProbe {
    pub query_name: String,
    pub query_type: String,
    pub query_class: String,
    pub transport_protocol: TransportProtocol,
    pub preferred_ip_protocol: IpProtocol,
    pub ip_protocol_fallback: bool,
    pub recursion_desired: bool,
    pub valid_rcodes: Vec<String>,
    pub validate_answer_rrs: DnsRrValidator,
    pub validate_authority_rrs: DnsRrValidator,
    pub validate_additional_rrs: DnsRrValidator,
}

impl Default for DnsProbe {
    fn default() -> Self {
        Self {
            query_name: String::new(),
            query_type: "ANY".to_string(),
            query_class: "IN".to_string(),
            transport_protocol: TransportProtocol::Udp,
            preferred_ip_protocol: IpProtocol::Ip6,
            ip_protocol_fallback: true,
            recursion_desired: true,
            valid_rcodes: Vec::new(),
            validate_answer_rrs: DnsRrValidator::default(),
            validate_authority_rrs: DnsRrValidator::default(),
            validate_additional_rrs: DnsRrValidator::default(),
        }
    }
}

/// Match/non-match rules for one record section.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DnsRrValidator {
    pub fail_if_matches_regexp: Vec<Regexp>,
    pub fail_if_not_matches_regexp: Vec<Regexp>,
}

/// ICMP flavour. `icmp4`/`icmp6` pin the family with no fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IcmpProtocol {
    #[default]
    Icmp,
    Icmp4,
    Icmp6,
}

/// ICMP probe settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IcmpProbe {
    pub protocol: IcmpProtocol,
    pub preferred_ip_protocol: IpProtocol,
    pub ip_protocol_fallback: bool,
    /// Outgoing hop limit; 0 keeps the system default.
    pub ttl: i32,
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self {
            protocol: IcmpProtocol::Icmp,
            preferred_ip_protocol: IpProtocol::Ip6,
            ip_protocol_fallback: true,
            ttl: 0,
        }
    }
}

/// Human-readable durations ("5s", "250ms").
mod duration_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
