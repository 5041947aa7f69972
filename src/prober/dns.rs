//! DNS prober.
//!
//! # Responsibilities
//! - Resolve the server address and pick the `udp4`/`udp6`/`tcp4`/`tcp6` network
//! - Send a single query and wait for the matching response
//! - Validate the response code and each record section
//!
//! # Design Decisions
//! - Record counts are always exported; they stay at zero until a response
//!   is parsed, so a failed exchange still reports them
//! - UDP datagrams carrying another message id are ignored, not fatal

use std::net::SocketAddr;
use std::str::FromStr;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, Record, RecordType};
use hickory_proto::serialize::binary::BinEncodable;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::config::schema::{DnsProbe, DnsRrValidator, TransportProtocol};
use crate::prober::matcher::RegexpRules;
use crate::prober::resolver::{resolve_target, split_host_port, AddressFamily};
use crate::prober::result::{
    DnsMeasurements, Measurements, ProbeContext, ProbeFailure, ProbeOutcome, RrSection,
};

const DEFAULT_PORT: u16 = 53;

/// Response code names accepted in `valid_rcodes`.
const RCODES: &[(&str, u16)] = &[
    ("NOERROR", 0),
    ("FORMERR", 1),
    ("SERVFAIL", 2),
    ("NXDOMAIN", 3),
    ("NOTIMP", 4),
    ("REFUSED", 5),
    ("YXDOMAIN", 6),
    ("YXRRSET", 7),
    ("NXRRSET", 8),
    ("NOTAUTH", 9),
    ("NOTZONE", 10),
    ("BADSIG", 16),
    ("BADVERS", 16),
    ("BADKEY", 17),
    ("BADTIME", 18),
    ("BADMODE", 19),
    ("BADNAME", 20),
    ("BADALG", 21),
    ("BADTRUNC", 22),
    ("BADCOOKIE", 23),
];

/// Numeric value of a response code name such as `NXDOMAIN`.
pub fn rcode_from_name(name: &str) -> Option<u16> {
    RCODES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, code)| *code)
}

fn rcode_name(code: u16) -> String {
    RCODES
        .iter()
        .find(|(_, known)| *known == code)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Record type names are upper case only (`A`, `AAAA`, `ANY`).
pub fn parse_record_type(name: &str) -> Option<RecordType> {
    if name.chars().any(|c| c.is_ascii_lowercase()) {
        return None;
    }
    RecordType::from_str(name).ok()
}

/// Class names are upper case only (`IN`, `CH`, `HS`, `ANY`).
pub fn parse_dns_class(name: &str) -> Option<DNSClass> {
    if name.chars().any(|c| c.is_ascii_lowercase()) {
        return None;
    }
    DNSClass::from_str(name).ok()
}

/// Build the query message for `config`.
pub fn build_query(config: &DnsProbe) -> Result<Message, ProbeFailure> {
    let mut name = Name::from_str(&config.query_name)
        .map_err(|e| ProbeFailure::Config(format!("invalid query name: {}", e)))?;
    name.set_fqdn(true);
    let record_type = parse_record_type(&config.query_type)
        .ok_or_else(|| ProbeFailure::Config(format!("invalid query type {:?}", config.query_type)))?;
    let class = parse_dns_class(&config.query_class)
        .ok_or_else(|| ProbeFailure::Config(format!("invalid query class {:?}", config.query_class)))?;

    let mut query = Query::query(name, record_type);
    query.set_query_class(class);

    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(config.recursion_desired)
        .add_query(query);
    Ok(message)
}

/// Run one DNS probe.
pub async fn probe_dns(ctx: &ProbeContext, target: &str, config: &DnsProbe) -> ProbeOutcome {
    let mut measurements = Measurements {
        dns: Some(DnsMeasurements::default()),
        ..Measurements::default()
    };
    let result = run(ctx, target, config, &mut measurements).await;
    ProbeOutcome::new(result, measurements)
}

async fn run(
    ctx: &ProbeContext,
    target: &str,
    config: &DnsProbe,
    measurements: &mut Measurements,
) -> Result<(), ProbeFailure> {
    let (host, port) = split_host_port(target);
    let port = port.unwrap_or(DEFAULT_PORT);

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

    let server = SocketAddr::new(resolved.ip, port);
    let network = resolved
        .family()
        .dial_network(&config.transport_protocol.to_string());

    let query = build_query(config)?;
    tracing::debug!(
        %server,
        network = %network,
        query_name = %config.query_name,
        query_type = %config.query_type,
        "Making DNS query"
    );

    let exchange = async {
        match config.transport_protocol {
            TransportProtocol::Udp => exchange_udp(&query, server, resolved.family()).await,
            TransportProtocol::Tcp => exchange_tcp(&query, server).await,
        }
    };
    let response = match tokio::time::timeout_at(ctx.deadline(), exchange).await {
        Ok(Ok(response)) => response,
        Ok(Err(failure)) => {
            tracing::warn!(%server, error = %failure, "Error while sending a DNS query");
            return Err(failure);
        }
        Err(_) => {
            tracing::warn!(%server, "DNS query timed out");
            return Err(ProbeFailure::Timeout(format!("DNS query to {}", server)));
        }
    };

    measurements.dns = Some(DnsMeasurements {
        answer_rrs: response.answers().len(),
        authority_rrs: response.name_servers().len(),
        additional_rrs: response.additionals().len(),
    });
    tracing::debug!(
        answers = response.answers().len(),
        authority = response.name_servers().len(),
        additional = response.additionals().len(),
        "Got response"
    );

    validate_response(&response, config)
}

/// Check the response code and every record section.
pub fn validate_response(response: &Message, config: &DnsProbe) -> Result<(), ProbeFailure> {
    let code = u16::from(response.response_code());
    let valid = if config.valid_rcodes.is_empty() {
        code == 0
    } else {
        config
            .valid_rcodes
            .iter()
            .filter_map(|name| rcode_from_name(name))
            .any(|valid| valid == code)
    };
    if !valid {
        let name = rcode_name(code);
        tracing::info!(rcode = %name, valid = ?config.valid_rcodes, "Rcode not in valid list");
        return Err(ProbeFailure::Rcode(name));
    }

    let sections = [
        (RrSection::Answer, response.answers(), &config.validate_answer_rrs),
        (RrSection::Authority, response.name_servers(), &config.validate_authority_rrs),
        (RrSection::Additional, response.additionals(), &config.validate_additional_rrs),
    ];
    for (section, records, validator) in sections {
        validate_records(section, records, validator)?;
    }
    Ok(())
}

fn validate_records(
    section: RrSection,
    records: &[Record],
    validator: &DnsRrValidator,
) -> Result<(), ProbeFailure> {
    let rules = RegexpRules::new(
        &validator.fail_if_matches_regexp,
        &validator.fail_if_not_matches_regexp,
    );
    rules
        .check_all(records.iter().map(|r| r.to_string()))
        .map_err(|violation| {
            tracing::info!(%section, ?violation, "Record validation failed");
            ProbeFailure::RrValidation(section)
        })
}

async fn exchange_udp(
    query: &Message,
    server: SocketAddr,
    family: AddressFamily,
) -> Result<Message, ProbeFailure> {
    let payload = query
        .to_vec()
        .map_err(|e| ProbeFailure::Config(format!("encoding query: {}", e)))?;

    let socket = UdpSocket::bind(SocketAddr::new(family.unspecified(), 0))
        .await
        .map_err(|e| ProbeFailure::Socket(e.to_string()))?;
    socket
        .connect(server)
        .await
        .map_err(|e| ProbeFailure::Transport(e.to_string()))?;
    socket
        .send(&payload)
        .await
        .map_err(|e| ProbeFailure::Transport(e.to_string()))?;

    let mut buf = vec![0u8; 65_535];
    loop {
        let n = socket
            .recv(&mut buf)
            .await
            .map_err(|e| ProbeFailure::Transport(e.to_string()))?;
        match Message::from_vec(&buf[..n]) {
            Ok(response) if response.id() == query.id() => return Ok(response),
            Ok(response) => {
                tracing::debug!(expected = query.id(), got = response.id(), "Ignoring DNS response with foreign id");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparsable DNS datagram");
            }
        }
    }
}

async fn exchange_tcp(query: &Message, server: SocketAddr) -> Result<Message, ProbeFailure> {
    let payload = query
        .to_vec()
        .map_err(|e| ProbeFailure::Config(format!("encoding query: {}", e)))?;
    let len = u16::try_from(payload.len())
        .map_err(|_| ProbeFailure::Config("query too large".to_string()))?;

    let mut stream = TcpStream::connect(server)
        .await
        .map_err(|e| ProbeFailure::Transport(e.to_string()))?;

    let mut framed = Vec::with_capacity(payload.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&payload);
    stream
        .write_all(&framed)
        .await
        .map_err(|e| ProbeFailure::Transport(e.to_string()))?;

    let mut len_buf = [0u8; 2];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ProbeFailure::Transport(e.to_string()))?;
    let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len_buf))];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| ProbeFailure::Transport(e.to_string()))?;

    let response =
        Message::from_vec(&buf).map_err(|e| ProbeFailure::Transport(e.to_string()))?;
    if response.id() != query.id() {
        return Err(ProbeFailure::Transport(format!(
            "response id {} does not match query id {}",
            response.id(),
            query.id()
        )));
    }
    Ok(response)
}
