//! SSRF guard: refuse to fetch URLs whose host resolves to an address the
//! crawler must never touch (loopback, private, link-local, multicast,
//! unspecified).
//!
//! The check runs before any connection is opened; a blocked URL becomes a
//! `failed_ssrf` index row without a fetch.

use std::net::{IpAddr, Ipv6Addr};

use thiserror::Error;
use tokio::net::lookup_host;
use url::Url;

#[derive(Debug, Error)]
pub enum SsrfError {
    #[error("host {host} resolves to blocked address {ip}")]
    BlockedAddress { host: String, ip: IpAddr },
    #[error("DNS lookup failed for {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("DNS lookup for {host} returned no addresses")]
    NoAddresses { host: String },
    #[error("URL has no host: {0}")]
    NoHost(Url),
}

/// Resolve the URL's host and verify every returned address is routable.
///
/// `allow_loopback` exempts loopback targets only (for crawling locally
/// served docs and for tests); private and link-local ranges stay blocked.
pub async fn check_url(url: &Url, allow_loopback: bool) -> Result<(), SsrfError> {
    let host = url
        .host_str()
        .ok_or_else(|| SsrfError::NoHost(url.clone()))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);

    // IP literals skip DNS entirely.
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return check_ip(&host, ip, allow_loopback);
    }

    let addrs = lookup_host((host.as_str(), port))
        .await
        .map_err(|source| SsrfError::Resolution {
            host: host.clone(),
            source,
        })?;

    let mut any = false;
    for addr in addrs {
        any = true;
        check_ip(&host, addr.ip(), allow_loopback)?;
    }
    if !any {
        return Err(SsrfError::NoAddresses { host });
    }
    Ok(())
}

fn check_ip(host: &str, ip: IpAddr, allow_loopback: bool) -> Result<(), SsrfError> {
    if is_blocked(ip, allow_loopback) {
        return Err(SsrfError::BlockedAddress {
            host: host.to_string(),
            ip,
        });
    }
    Ok(())
}

fn is_blocked(ip: IpAddr, allow_loopback: bool) -> bool {
    // IPv4-mapped IPv6 addresses are classified by their embedded IPv4.
    let ip = match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };

    match ip {
        IpAddr::V4(v4) => {
            (v4.is_loopback() && !allow_loopback)
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            (v6.is_loopback() && !allow_loopback)
                || v6.is_multicast()
                || v6.is_unspecified()
                || is_v6_unique_local(&v6)
                || is_v6_link_local(&v6)
        }
    }
}

fn is_v6_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_v6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}
