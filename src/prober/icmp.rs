//! ICMP echo prober.
//!
//! # Responsibilities
//! - Resolve the target in the family implied by the module
//! - Send one echo request over a raw socket and wait for its reply
//!
//! # Design Decisions
//! - The expected reply is derived from the serialized request by changing
//!   its type byte, so replies are compared byte for byte
//! - Sequence numbers come from a shared [`IcmpSequence`] so concurrent
//!   probes never share an (identifier, sequence) pair
//! - The read loop is blocking and bounded by a socket read timeout; it runs
//!   on the blocking pool

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Mutex;
use std::time::Instant;

use pnet_packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet_packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::schema::{IcmpProbe, IcmpProtocol, IpProtocol};
use crate::prober::resolver::{resolve_target, AddressFamily};
use crate::prober::result::{Measurements, ProbeContext, ProbeFailure, ProbeOutcome};

const PAYLOAD: &[u8] = b"probe-exporter echo";
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Process-wide echo sequence counter.
#[derive(Debug, Default)]
pub struct IcmpSequence {
    next: Mutex<u16>,
}

impl IcmpSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting at `start`.
    pub fn starting_at(start: u16) -> Self {
        Self {
            next: Mutex::new(start),
        }
    }

    /// Take the next sequence number, wrapping at `u16::MAX`.
    pub fn next(&self) -> u16 {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        let current = *next;
        *next = next.wrapping_add(1);
        current
    }
}

/// Echo identifier: the process id truncated to 16 bits.
pub fn echo_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Serialize an echo request for `family`.
///
/// IPv4 requests carry their checksum; for IPv6 the kernel fills it in.
pub fn build_echo_request(family: AddressFamily, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut buffer = vec![0u8; MutableEchoRequestPacket::minimum_packet_size() + PAYLOAD.len()];
    if let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) {
        let icmp_type = match family {
            AddressFamily::V4 => IcmpTypes::EchoRequest,
            AddressFamily::V6 => IcmpType::new(ICMPV6_ECHO_REQUEST),
        };
        packet.set_icmp_type(icmp_type);
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);
        packet.set_payload(PAYLOAD);
    }
    if family == AddressFamily::V4 {
        set_checksum_v4(&mut buffer);
    }
    buffer
}

/// The reply a peer should send back for `request`.
pub fn expected_reply(family: AddressFamily, request: &[u8]) -> Vec<u8> {
    let mut reply = request.to_vec();
    match family {
        AddressFamily::V4 => {
            reply[0] = IcmpTypes::EchoReply.0;
            set_checksum_v4(&mut reply);
        }
        AddressFamily::V6 => {
            reply[0] = ICMPV6_ECHO_REPLY;
            reply[2] = 0;
            reply[3] = 0;
        }
    }
    reply
}

fn set_checksum_v4(buffer: &mut [u8]) {
    buffer[2] = 0;
    buffer[3] = 0;
    if let Some(view) = IcmpPacket::new(buffer) {
        let checksum = pnet_packet::icmp::checksum(&view);
        buffer[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
}

/// Normalize a received datagram to the ICMP message alone.
fn received_message(family: AddressFamily, datagram: &[u8]) -> Option<Vec<u8>> {
    match family {
        // IPv4 raw sockets deliver the IP header too.
        AddressFamily::V4 => {
            let header_len = usize::from(datagram.first()? & 0x0f) * 4;
            datagram.get(header_len..).map(<[u8]>::to_vec)
        }
        AddressFamily::V6 => {
            let mut message = datagram.to_vec();
            if message.len() >= 4 {
                message[2] = 0;
                message[3] = 0;
            }
            Some(message)
        }
    }
}

fn family_policy(config: &IcmpProbe) -> (IpProtocol, bool) {
    match config.protocol {
        IcmpProtocol::Icmp4 => (IpProtocol::Ip4, false),
        IcmpProtocol::Icmp6 => (IpProtocol::Ip6, false),
        IcmpProtocol::Icmp => (config.preferred_ip_protocol, config.ip_protocol_fallback),
    }
}

/// Run one ICMP probe.
pub async fn probe_icmp(
    ctx: &ProbeContext,
    target: &str,
    config: &IcmpProbe,
    sequence: &IcmpSequence,
) -> ProbeOutcome {
    let mut measurements = Measurements::default();

    let (preferred, fallback) = family_policy(config);
    let resolved = match resolve_target(target, preferred, fallback).await {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "Error resolving address");
            measurements.dns_lookup_time = Some(e.lookup_time());
            return ProbeOutcome::new(
                Err(ProbeFailure::Resolution {
                    target: target.to_string(),
                    reason: e.to_string(),
                }),
                measurements,
            );
        }
    };
    let family = resolved.family();
    measurements.ip_protocol = Some(family.version());
    measurements.dns_lookup_time = Some(resolved.lookup_time);

    let socket = match open_socket(family, config.ttl) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!(%family, error = %e, "Error listening to socket");
            return ProbeOutcome::new(Err(ProbeFailure::Socket(e.to_string())), measurements);
        }
    };

    let request = build_echo_request(family, echo_identifier(), sequence.next());
    let peer = resolved.ip;
    let deadline = ctx.deadline().into_std();

    let result = tokio::task::spawn_blocking(move || exchange(socket, family, peer, request, deadline))
        .await
        .unwrap_or_else(|e| Err(ProbeFailure::Socket(format!("echo task failed: {}", e))));

    ProbeOutcome::new(result, measurements)
}

fn open_socket(family: AddressFamily, ttl: i32) -> io::Result<UdpSocket> {
    let (domain, protocol) = match family {
        AddressFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
        AddressFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
    };
    let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
    socket.bind(&SockAddr::from(SocketAddr::new(family.unspecified(), 0)))?;

    if ttl > 0 && family == AddressFamily::V6 {
        socket.set_unicast_hops_v6(ttl as u32)?;
    }
    let socket: UdpSocket = socket.into();
    if ttl > 0 && family == AddressFamily::V4 {
        socket.set_ttl(ttl as u32)?;
    }
    Ok(socket)
}

fn exchange(
    socket: UdpSocket,
    family: AddressFamily,
    peer: IpAddr,
    request: Vec<u8>,
    deadline: Instant,
) -> Result<(), ProbeFailure> {
    let destination = SocketAddr::new(peer, 0);
    tracing::debug!(%peer, "Writing out packet");
    socket.send_to(&request, destination).map_err(|e| {
        tracing::warn!(%peer, error = %e, "Error writing to socket");
        ProbeFailure::Transport(e.to_string())
    })?;

    let expected = expected_reply(family, &request);
    let mut buf = [0u8; 1500];

    tracing::debug!(%peer, "Waiting for reply packets");
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProbeFailure::Timeout(format!("echo reply from {}", peer)));
        }
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeFailure::Socket(e.to_string()))?;

        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                tracing::warn!(%peer, "Timeout reading from socket");
                return Err(ProbeFailure::Timeout(format!("echo reply from {}", peer)));
            }
            Err(e) => {
                tracing::debug!(%peer, error = %e, "Error reading from socket");
                continue;
            }
        };

        if from.ip() != peer {
            continue;
        }
        match received_message(family, &buf[..n]) {
            Some(message) if message == expected => {
                tracing::debug!(%peer, "Found matching reply packet");
                return Ok(());
            }
            _ => continue,
        }
    }
}
