//! Ingress URL screening (SSRF protection).
//!
//! Any public http(s) host is accepted since `generic_url` jobs may point
//! anywhere; loopback, private, link-local and metadata targets are refused.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::{Host, Url};

/// Maximum URL length accepted at ingress.
pub const MAX_URL_LENGTH: usize = 2048;

/// Hostnames that resolve to internal services.
static BLOCKED_HOSTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^localhost\.?$").unwrap(),
        Regex::new(r"\.localhost\.?$").unwrap(),
        Regex::new(r"^metadata(\.|$)").unwrap(),
        Regex::new(r"\.internal\.?$").unwrap(),
        Regex::new(r"\.local\.?$").unwrap(),
    ]
});

/// Why a media URL was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlRejection {
    Empty,
    TooLong,
    Malformed(String),
    UnsupportedScheme(String),
    Blocked(String),
}

impl std::fmt::Display for UrlRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "URL cannot be empty"),
            Self::TooLong => write!(f, "URL exceeds maximum length of {MAX_URL_LENGTH} characters"),
            Self::Malformed(e) => write!(f, "Invalid URL format: {e}"),
            Self::UnsupportedScheme(s) => write!(f, "Unsupported URL scheme '{s}', use http or https"),
            Self::Blocked(host) => write!(f, "URL host '{host}' is not allowed"),
        }
    }
}

/// Validate a media URL and return it trimmed.
pub fn validate_media_url(raw: &str) -> Result<String, UrlRejection> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(UrlRejection::Empty);
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(UrlRejection::TooLong);
    }

    let parsed = Url::parse(url).map_err(|e| UrlRejection::Malformed(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlRejection::UnsupportedScheme(parsed.scheme().to_string()));
    }

    let blocked = match parsed.host() {
        None => return Err(UrlRejection::Malformed("missing host".to_string())),
        Some(Host::Ipv4(ip)) => is_internal_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_internal_ip(IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            BLOCKED_HOSTS.iter().any(|re| re.is_match(&domain))
        }
    };

    if blocked {
        let host = parsed.host_str().unwrap_or_default().to_string();
        warn!(host = %host, "Blocked internal media URL");
        return Err(UrlRejection::Blocked(host));
    }

    Ok(url.to_string())
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_internal_v4(mapped);
            }
            is_internal_v6(v6)
        }
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // carrier-grade NAT 100.64.0.0/10
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link local
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_public_platform_urls() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://t.me/channel/42",
            "https://vk.com/video-1_2",
            "http://cdn.example.org/clip.mp4",
        ] {
            assert!(validate_media_url(url).is_ok(), "{url}");
        }
        assert_eq!(
            validate_media_url("  https://rutube.ru/video/abc/ ").unwrap(),
            "https://rutube.ru/video/abc/"
        );
    }

    #[test]
    fn test_rejects_internal_targets() {
        for url in [
            "http://127.0.0.1/admin",
            "http://localhost:6379",
            "http://10.0.0.5/video.mp4",
            "http://172.16.1.1/",
            "http://192.168.1.10/",
            "http://169.254.169.254/latest/meta-data/",
            "http://metadata.google.internal/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://100.64.0.1/",
        ] {
            assert!(
                matches!(validate_media_url(url), Err(UrlRejection::Blocked(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!(validate_media_url("   "), Err(UrlRejection::Empty));
        assert!(matches!(validate_media_url("not a url"), Err(UrlRejection::Malformed(_))));
        assert!(matches!(
            validate_media_url("ftp://example.com/a.mp4"),
            Err(UrlRejection::UnsupportedScheme(_))
        ));
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert_eq!(validate_media_url(&long), Err(UrlRejection::TooLong));
    }
}
