//! SSRF protection for worker-fetched URLs.
//!
//! Run before every outbound fetch triggered by job input; decisions are
//! never cached.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Hostnames rejected outright: loopback names and cloud metadata endpoints.
const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "::1",
    "0.0.0.0",
    "169.254.169.254",
    "metadata.google.internal",
    "metadata.goog",
];

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme: {0}")]
    BadScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("blocked host: {0}")]
    BlockedHost(String),

    #[error("host {host} resolves to private/internal address {ip}")]
    PrivateAddress { host: String, ip: IpAddr },
}

fn ipv4_forbidden(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // CGNAT 100.64.0.0/10
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // Reserved 240.0.0.0/4
        || octets[0] >= 240
}

fn ipv6_forbidden(ip: Ipv6Addr) -> bool {
    let segments = ip.segments();
    if let Some(v4) = ip.to_ipv4_mapped() {
        return ipv4_forbidden(v4);
    }
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // Unique-local fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // Link-local fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
}

/// Private, loopback, link-local, reserved, or multicast.
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => ipv4_forbidden(v4),
        IpAddr::V6(v6) => ipv6_forbidden(v6),
    }
}

/// Validate that `raw` does not point at internal infrastructure.
///
/// Resolves domain hosts and rejects if any resolved address is internal.
/// DNS resolution failure lets the request proceed: it will fail at the
/// transport layer with a clearer error than a guard rejection.
pub async fn validate_url(raw: &str) -> Result<(), GuardError> {
    let parsed = Url::parse(raw)?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(GuardError::BadScheme(parsed.scheme().to_string()));
    }

    let host = parsed.host().ok_or(GuardError::MissingHost)?;
    match host {
        Host::Ipv4(ip) => {
            check_blocked(&ip.to_string())?;
            if ipv4_forbidden(ip) {
                return Err(GuardError::PrivateAddress {
                    host: ip.to_string(),
                    ip: IpAddr::V4(ip),
                });
            }
        }
        Host::Ipv6(ip) => {
            check_blocked(&ip.to_string())?;
            if ipv6_forbidden(ip) {
                return Err(GuardError::PrivateAddress {
                    host: ip.to_string(),
                    ip: IpAddr::V6(ip),
                });
            }
        }
        Host::Domain(domain) => {
            check_blocked(domain)?;
            match tokio::net::lookup_host((domain, 80)).await {
                Ok(addrs) => {
                    for addr in addrs {
                        if is_forbidden_ip(addr.ip()) {
                            return Err(GuardError::PrivateAddress {
                                host: domain.to_string(),
                                ip: addr.ip(),
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(host = domain, error = %e, "DNS resolution failed, allowing");
                }
            }
        }
    }

    Ok(())
}

fn check_blocked(host: &str) -> Result<(), GuardError> {
    let lowered = host.to_ascii_lowercase();
    if BLOCKED_HOSTS.contains(&lowered.as_str()) {
        return Err(GuardError::BlockedHost(lowered));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_and_metadata_rejected() {
        assert!(matches!(
            validate_url("http://127.0.0.1/steal").await,
            Err(GuardError::BlockedHost(_))
        ));
        assert!(matches!(
            validate_url("http://localhost:8080/x").await,
            Err(GuardError::BlockedHost(_))
        ));
        assert!(matches!(
            validate_url("http://169.254.169.254/latest/meta-data/").await,
            Err(GuardError::BlockedHost(_))
        ));
        assert!(matches!(
            validate_url("http://metadata.google.internal/computeMetadata/").await,
            Err(GuardError::BlockedHost(_))
        ));
        assert!(matches!(
            validate_url("http://[::1]/x").await,
            Err(GuardError::BlockedHost(_))
        ));
    }

    #[tokio::test]
    async fn rfc1918_literals_rejected() {
        for url in [
            "http://10.0.0.5/img.jpg",
            "http://172.16.4.1/img.jpg",
            "http://192.168.1.10/img.jpg",
            "http://127.8.8.8/img.jpg",
            "http://100.64.1.1/img.jpg",
            "http://169.254.1.1/img.jpg",
            "http://240.0.0.1/img.jpg",
        ] {
            assert!(
                matches!(
                    validate_url(url).await,
                    Err(GuardError::PrivateAddress { .. })
                ),
                "expected rejection for {url}"
            );
        }
    }

    #[tokio::test]
    async fn ipv6_internal_ranges_rejected() {
        assert!(validate_url("http://[fe80::1]/x").await.is_err());
        assert!(validate_url("http://[fd00::1]/x").await.is_err());
        assert!(validate_url("http://[::ffff:10.0.0.1]/x").await.is_err());
    }

    #[tokio::test]
    async fn public_ip_literal_allowed() {
        assert!(validate_url("https://93.184.216.34/photo.jpg").await.is_ok());
        assert!(validate_url("http://8.8.8.8/photo.jpg").await.is_ok());
    }

    #[tokio::test]
    async fn unresolvable_host_allowed() {
        // Fails later at the transport layer instead of blocking here.
        assert!(
            validate_url("http://nonexistent-host.invalid/photo.jpg")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn non_http_schemes_rejected() {
        assert!(matches!(
            validate_url("file:///etc/passwd").await,
            Err(GuardError::BadScheme(_))
        ));
        assert!(matches!(
            validate_url("ftp://example.com/x").await,
            Err(GuardError::BadScheme(_))
        ));
    }
}
