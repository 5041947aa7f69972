//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntax, unknown fields and regexp compilation)
//! - Check mutually exclusive settings (bearer token vs file, body vs body file)
//! - Validate value ranges and enumerations (TTL, DNS class/type/rcode)
//! - Check `Accept-Encoding` against the expected response compression
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::str::FromStr;

use hickory_proto::rr::Name;

use crate::config::schema::{
    Config, DnsProbe, HeaderMatch, HttpProbe, IcmpProbe, Module, ProberKind,
};
use crate::prober::dns::{parse_dns_class, parse_record_type, rcode_from_name};

/// A single semantic rejection, tagged with the module it came from.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("module '{module}': at most one of bearer_token & bearer_token_file must be configured")]
    BearerTokenConflict { module: String },

    #[error("module '{module}': at most one of basic_auth password & password_file must be configured")]
    BasicAuthPasswordConflict { module: String },

    #[error("module '{module}': setting body and body_file both are not allowed")]
    BodyConflict { module: String },

    #[error("module '{module}': prober '{prober}' cannot use a '{section}' section")]
    ForeignSection {
        module: String,
        prober: ProberKind,
        section: ProberKind,
    },

    #[error("module '{module}': query name must be set for DNS module")]
    MissingQueryName { module: String },

    #[error("module '{module}': query name '{name}' is not valid")]
    InvalidQueryName { module: String, name: String },

    #[error("module '{module}': query class '{class}' is not valid")]
    InvalidQueryClass { module: String, class: String },

    #[error("module '{module}': query type '{record_type}' is not valid")]
    InvalidQueryType { module: String, record_type: String },

    #[error("module '{module}': rcode '{rcode}' is not valid")]
    InvalidRcode { module: String, rcode: String },

    #[error("module '{module}': regexp must be set for HTTP header matchers")]
    MissingHeaderRegexp { module: String },

    #[error("module '{module}': header name must be set for HTTP header matchers")]
    MissingHeaderName { module: String },

    #[error("module '{module}': invalid configuration \"{header}: {accept_encoding}\", \"compression: {compression}\"")]
    CompressionMismatch {
        module: String,
        header: String,
        accept_encoding: String,
        compression: String,
    },

    #[error("module '{module}': proxy_url '{url}' is not a valid URL")]
    InvalidProxyUrl { module: String, url: String },

    #[error("module '{module}': \"ttl\" cannot be negative")]
    NegativeTtl { module: String },

    #[error("module '{module}': \"ttl\" cannot exceed 255")]
    TtlOverflow { module: String },

    #[error("module '{module}': timeout must be greater than zero")]
    ZeroTimeout { module: String },
}

/// Validate every module, collecting all errors.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    for (name, module) in &config.modules {
        validate_module(name, module, &mut errors);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_module(name: &str, module: &Module, errors: &mut Vec<ValidationError>) {
    if module.timeout.is_zero() {
        errors.push(ValidationError::ZeroTimeout {
            module: name.to_string(),
        });
    }

    for section in module.foreign_sections() {
        errors.push(ValidationError::ForeignSection {
            module: name.to_string(),
            prober: module.prober,
            section,
        });
    }

    match module.prober {
        ProberKind::Http => {
            if let Some(http) = &module.http {
                validate_http(name, http, errors);
            }
        }
        ProberKind::Dns => match &module.dns {
            Some(dns) => validate_dns(name, dns, errors),
            None => errors.push(ValidationError::MissingQueryName {
                module: name.to_string(),
            }),
        },
        ProberKind::Icmp => {
            if let Some(icmp) = &module.icmp {
                validate_icmp(name, icmp, errors);
            }
        }
        // Patterns are compiled during deserialization.
        ProberKind::Tcp => {}
    }
}

fn validate_http(name: &str, http: &HttpProbe, errors: &mut Vec<ValidationError>) {
    let client = &http.http_client_config;
    if client.bearer_token.is_some() && client.bearer_token_file.is_some() {
        errors.push(ValidationError::BearerTokenConflict {
            module: name.to_string(),
        });
    }
    if let Some(auth) = &client.basic_auth {
        if auth.password.is_some() && auth.password_file.is_some() {
            errors.push(ValidationError::BasicAuthPasswordConflict {
                module: name.to_string(),
            });
        }
    }
    if let Some(proxy) = &client.proxy_url {
        if url::Url::parse(proxy).is_err() {
            errors.push(ValidationError::InvalidProxyUrl {
                module: name.to_string(),
                url: proxy.clone(),
            });
        }
    }

    if !http.body.is_empty() && http.body_file.is_some() {
        errors.push(ValidationError::BodyConflict {
            module: name.to_string(),
        });
    }

    for matcher in http
        .fail_if_header_matches
        .iter()
        .chain(http.fail_if_header_not_matches.iter())
    {
        validate_header_match(name, matcher, errors);
    }

    if !http.compression.is_empty() {
        if let Some((header, value)) = http.accept_encoding() {
            if !is_compression_accept_encoding_valid(&http.compression, value) {
                errors.push(ValidationError::CompressionMismatch {
                    module: name.to_string(),
                    header: header.to_string(),
                    accept_encoding: value.to_string(),
                    compression: http.compression.clone(),
                });
            }
        }
    }
}

fn validate_header_match(name: &str, matcher: &HeaderMatch, errors: &mut Vec<ValidationError>) {
    if matcher.header.is_empty() {
        errors.push(ValidationError::MissingHeaderName {
            module: name.to_string(),
        });
    }
    let has_pattern = matcher
        .regexp
        .as_ref()
        .map(|re| !re.original().is_empty())
        .unwrap_or(false);
    if !has_pattern {
        errors.push(ValidationError::MissingHeaderRegexp {
            module: name.to_string(),
        });
    }
}

fn validate_dns(name: &str, dns: &DnsProbe, errors: &mut Vec<ValidationError>) {
    if dns.query_name.is_empty() {
        errors.push(ValidationError::MissingQueryName {
            module: name.to_string(),
        });
    } else if Name::from_str(&dns.query_name).is_err() {
        errors.push(ValidationError::InvalidQueryName {
            module: name.to_string(),
            name: dns.query_name.clone(),
        });
    }

    if parse_dns_class(&dns.query_class).is_none() {
        errors.push(ValidationError::InvalidQueryClass {
            module: name.to_string(),
            class: dns.query_class.clone(),
        });
    }

    if parse_record_type(&dns.query_type).is_none() {
        errors.push(ValidationError::InvalidQueryType {
            module: name.to_string(),
            record_type: dns.query_type.clone(),
        });
    }

    for rcode in &dns.valid_rcodes {
        if rcode_from_name(rcode).is_none() {
            errors.push(ValidationError::InvalidRcode {
                module: name.to_string(),
                rcode: rcode.clone(),
            });
        }
    }
}

fn validate_icmp(name: &str, icmp: &IcmpProbe, errors: &mut Vec<ValidationError>) {
    if icmp.ttl < 0 {
        errors.push(ValidationError::NegativeTtl {
            module: name.to_string(),
        });
    } else if icmp.ttl > 255 {
        errors.push(ValidationError::TtlOverflow {
            module: name.to_string(),
        });
    }
}

/// Check that `compression` is acceptable under an `Accept-Encoding` value.
///
/// Entries are `token[;q=weight]`, separated by commas. An explicit entry for
/// the token wins over `*`; a weight of zero rejects. An empty compression or
/// an empty header accepts anything.
pub fn is_compression_accept_encoding_valid(compression: &str, accept_encoding: &str) -> bool {
    if compression.is_empty() || accept_encoding.trim().is_empty() {
        return true;
    }

    let mut explicit: Option<f32> = None;
    let mut wildcard: Option<f32> = None;

    for entry in accept_encoding.split(',') {
        let mut parts = entry.split(';');
        let token = parts.next().unwrap_or_default().trim();
        if token.is_empty() {
            continue;
        }

        let mut weight = 1.0_f32;
        for param in parts {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")) {
                match value.trim().parse::<f32>() {
                    Ok(q) => weight = q,
                    // A malformed weight makes the whole header unusable.
                    Err(_) => return false,
                }
            }
        }

        if token == "*" {
            wildcard = Some(weight);
        } else if token.eq_ignore_ascii_case(compression) {
            explicit = Some(weight);
        }
    }

    match (explicit, wildcard) {
        (Some(q), _) => q > 0.0,
        (None, Some(q)) => q > 0.0,
        (None, None) => false,
    }
}
