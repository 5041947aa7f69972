//! Target resolution with a preferred address family.
//!
//! # Responsibilities
//! - Split `host[:port]` targets
//! - Resolve a host, trying the preferred family first and the other one second
//! - Decide the dial family once, so a probe never mixes families
//!
//! # Design Decisions
//! - IP literals skip the resolver but still honour the family policy
//! - Lookup latency is measured here and reported by every prober

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use crate::config::IpProtocol;

/// Concrete family chosen for a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// 4 or 6.
    pub fn version(&self) -> u8 {
        match self {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 6,
        }
    }

    /// Network name for a transport, e.g. `tcp4` or `udp6`.
    pub fn dial_network(&self, transport: &str) -> String {
        format!("{}{}", transport, self.version())
    }

    /// Wildcard local address of this family.
    pub fn unspecified(&self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    fn matches(protocol: IpProtocol, ip: &IpAddr) -> bool {
        matches!(
            (protocol, ip),
            (IpProtocol::Ip4, IpAddr::V4(_)) | (IpProtocol::Ip6, IpAddr::V6(_))
        )
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ip{}", self.version())
    }
}

/// A resolved target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub ip: IpAddr,
    pub lookup_time: Duration,
}

impl ResolvedTarget {
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.ip)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("lookup of {host} failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
        lookup_time: Duration,
    },

    #[error("no suitable address found for {host}")]
    NoAddress { host: String, lookup_time: Duration },
}

impl ResolveError {
    /// Time spent before the lookup gave up.
    pub fn lookup_time(&self) -> Duration {
        match self {
            ResolveError::Lookup { lookup_time, .. }
            | ResolveError::NoAddress { lookup_time, .. } => *lookup_time,
        }
    }
}

/// Split `host:port`, `[v6]:port`, bare hosts and bare IPv6 literals.
///
/// Brackets are removed from the returned host.
pub fn split_host_port(target: &str) -> (String, Option<u16>) {
    if let Some(rest) = target.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host.to_string(), port);
        }
    }
    if target.parse::<Ipv6Addr>().is_ok() {
        return (target.to_string(), None);
    }
    match target.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (target.to_string(), None),
        },
        None => (target.to_string(), None),
    }
}

/// Pick an address honouring the preferred family and fallback policy.
pub fn select_address(addrs: &[IpAddr], preferred: IpProtocol, fallback: bool) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| AddressFamily::matches(preferred, ip))
        .or_else(|| {
            if fallback {
                addrs
                    .iter()
                    .find(|ip| AddressFamily::matches(preferred.other(), ip))
            } else {
                None
            }
        })
        .copied()
}

/// Resolve `host` in the preferred family, falling back to the other one.
pub async fn resolve_target(
    host: &str,
    preferred: IpProtocol,
    fallback: bool,
) -> Result<ResolvedTarget, ResolveError> {
    let start = Instant::now();
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let addrs: Vec<IpAddr> = match host.parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| ResolveError::Lookup {
                host: host.to_string(),
                source,
                lookup_time: start.elapsed(),
            })?
            .map(|addr| addr.ip())
            .collect(),
    };

    let ip = select_address(&addrs, preferred, fallback).ok_or_else(|| {
        ResolveError::NoAddress {
            host: host.to_string(),
            lookup_time: start.elapsed(),
        }
    })?;

    tracing::debug!(host, %ip, preferred = %preferred, "Resolved target");

    Ok(ResolvedTarget {
        ip,
        lookup_time: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    fn v6() -> IpAddr {
        "2001:db8::1".parse().unwrap()
    }

    #[test]
    fn test_select_prefers_family() {
        let addrs = [v4(), v6()];
        assert_eq!(select_address(&addrs, IpProtocol::Ip6, true), Some(v6()));
        assert_eq!(select_address(&addrs, IpProtocol::Ip4, true), Some(v4()));
    }

    #[test]
    fn test_select_fallback() {
        assert_eq!(select_address(&[v4()], IpProtocol::Ip6, true), Some(v4()));
        assert_eq!(select_address(&[v4()], IpProtocol::Ip6, false), None);
        assert_eq!(select_address(&[], IpProtocol::Ip4, true), None);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:53"), ("example.com".into(), Some(53)));
        assert_eq!(split_host_port("example.com"), ("example.com".into(), None));
        assert_eq!(split_host_port("[::1]:8080"), ("::1".into(), Some(8080)));
        assert_eq!(split_host_port("::1"), ("::1".into(), None));
        assert_eq!(split_host_port("[::1]"), ("::1".into(), None));
        assert_eq!(split_host_port("127.0.0.1:9"), ("127.0.0.1".into(), Some(9)));
    }

    #[test]
    fn test_dial_network() {
        assert_eq!(AddressFamily::V4.dial_network("udp"), "udp4");
        assert_eq!(AddressFamily::V6.dial_network("tcp"), "tcp6");
        assert_eq!(AddressFamily::of(&v6()).version(), 6);
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let resolved = resolve_target("127.0.0.1", IpProtocol::Ip6, true).await.unwrap();
        assert_eq!(resolved.family(), AddressFamily::V4);

        let err = resolve_target("127.0.0.1", IpProtocol::Ip6, false).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoAddress { .. }));
        assert!(err.lookup_time() < Duration::from_secs(1));
    }
}
