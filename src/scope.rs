// src/scope.rs - hostname/TLD segmentation and scope helpers
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ScanError, ScanResult};

static HOST_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9\-\.]+$").expect("host chars regex"));

/// Public-suffix style TLD table. Hostnames are segmented against it to
/// derive registrable domains and keywords; scope matching treats the
/// longest matching suffix as the TLD.
#[derive(Debug, Default)]
pub struct TldTable {
    suffixes: HashSet<String>,
    wildcards: HashSet<String>,
    exceptions: HashSet<String>,
}

impl TldTable {
    /// Parse a public-suffix list. Lines starting with `//` are comments,
    /// `*.` prefixes are wildcard rules, `!` prefixes are exceptions.
    pub fn parse(data: &str) -> Self {
        let mut table = TldTable::default();
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
                continue;
            }
            let entry = line.to_lowercase();
            if let Some(rest) = entry.strip_prefix("!") {
                table.exceptions.insert(rest.to_string());
            } else if let Some(rest) = entry.strip_prefix("*.") {
                table.wildcards.insert(rest.to_string());
            } else {
                table.suffixes.insert(entry);
            }
        }
        table
    }

    pub fn load(path: &Path) -> ScanResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| ScanError::Fatal(format!(
            "Could not read TLD list {}: {}",
            path.display(),
            e
        )))?;
        let table = Self::parse(&data);
        if table.is_empty() {
            return Err(ScanError::Fatal(format!(
                "TLD list {} contained no entries",
                path.display()
            )));
        }
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty() && self.wildcards.is_empty()
    }

    pub fn len(&self) -> usize {
        self.suffixes.len() + self.wildcards.len()
    }

    /// The public suffix of `host` by longest-suffix lookup, e.g.
    /// `www.example.co.uk` -> `co.uk`. None when no rule matches.
    pub fn tld_from(&self, host: &str) -> Option<String> {
        let host = normalize_host(host)?;
        let labels: Vec<&str> = host.split('.').collect();

        // Walk from the longest candidate suffix to the shortest so that
        // multi-label entries like co.uk win over uk.
        for i in 0..labels.len() {
            let candidate = labels[i..].join(".");
            if self.exceptions.contains(&candidate) {
                // An exception rule cancels the wildcard above it; the
                // suffix is the rule minus its leftmost label.
                return candidate.split_once('.').map(|(_, rest)| rest.to_string());
            }
        }
        for i in 0..labels.len() {
            let candidate = labels[i..].join(".");
            if self.suffixes.contains(&candidate) {
                return Some(candidate);
            }
            // *.foo matches exactly one extra label below foo.
            if i + 1 < labels.len() {
                let parent = labels[i + 1..].join(".");
                if self.wildcards.contains(&parent) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// The registrable domain for `host`: the public suffix plus one label.
    /// None when the host has no matching suffix or is itself a suffix.
    pub fn host_domain(&self, host: &str) -> Option<String> {
        let host = normalize_host(host)?;
        let tld = self.tld_from(&host)?;
        if host == tld {
            return None;
        }
        let prefix = host.strip_suffix(&format!(".{}", tld))?;
        let keyword = prefix.rsplit('.').next()?;
        if keyword.is_empty() {
            return None;
        }
        Some(format!("{}.{}", keyword, tld))
    }

    /// Whether `host` is exactly a registrable domain (one label atop a
    /// public suffix). The suffix entry itself is not a domain.
    pub fn is_domain(&self, host: &str) -> bool {
        match (normalize_host(host), self.host_domain(host)) {
            (Some(host), Some(domain)) => host == domain,
            _ => false,
        }
    }

    /// Whether `host` is a syntactically valid hostname whose final label
    /// rests on a known public suffix.
    pub fn is_valid_host(&self, host: &str) -> bool {
        let host = match normalize_host(host) {
            Some(h) => h,
            None => return false,
        };
        if host.len() > 253 || !host.contains('.') {
            return false;
        }
        if !HOST_CHARS_RE.is_match(&host) {
            return false;
        }
        for label in host.split('.') {
            if label.is_empty() || label.len() > 63 {
                return false;
            }
            if label.starts_with('-') || label.ends_with('-') {
                return false;
            }
        }
        self.tld_from(&host).is_some()
    }

    /// The keyword of a domain: the label left of the public suffix,
    /// e.g. `mail.example.co.uk` -> `example`.
    pub fn domain_keyword(&self, host: &str) -> Option<String> {
        let domain = self.host_domain(host)?;
        let tld = self.tld_from(&domain)?;
        domain
            .strip_suffix(&format!(".{}", tld))
            .map(|k| k.to_string())
    }
}

fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    if host.is_empty() || host.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return None;
    }
    Some(host)
}

/// Valid IPv4 address check.
pub fn valid_ip(address: &str) -> bool {
    address.parse::<IpAddr>().map_or(false, |ip| ip.is_ipv4())
}

/// Valid IPv6 address check.
pub fn valid_ip6(address: &str) -> bool {
    address.parse::<IpAddr>().map_or(false, |ip| ip.is_ipv6())
}

/// Valid CIDR netblock check.
pub fn valid_ip_network(cidr: &str) -> bool {
    cidr.contains('/') && cidr.parse::<IpNetwork>().is_ok()
}

/// Whether an address is publicly routable: unicast, not loopback,
/// private, link-local or multicast.
pub fn is_public_ip(address: &str) -> bool {
    let ip: IpAddr = match address.parse() {
        Ok(ip) => ip,
        Err(_) => return false,
    };
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback() || v6.is_multicast() || v6.is_unspecified())
                // fc00::/7 unique-local, fe80::/10 link-local
                && (v6.segments()[0] & 0xfe00) != 0xfc00
                && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

/// Whether an address sits on the local machine or LAN (loopback, RFC1918
/// IPv4, IPv6 ULA).
pub fn is_local_or_loopback_ip(address: &str) -> bool {
    let ip: IpAddr = match address.parse() {
        Ok(ip) => ip,
        Err(_) => return false,
    };
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TldTable {
        TldTable::parse(
            "// test suffixes\ncom\nnet\norg\nuk\nco.uk\n*.ck\n!www.ck\n",
        )
    }

    #[test]
    fn test_tld_from_longest_suffix() {
        let t = table();
        assert_eq!(t.tld_from("www.example.com"), Some("com".to_string()));
        assert_eq!(t.tld_from("www.example.co.uk"), Some("co.uk".to_string()));
        assert_eq!(t.tld_from("example.nosuchtld"), None);
    }

    #[test]
    fn test_tld_wildcard_and_exception() {
        let t = table();
        assert_eq!(t.tld_from("shop.foo.ck"), Some("foo.ck".to_string()));
        assert_eq!(t.tld_from("www.ck"), Some("ck".to_string()));
    }

    #[test]
    fn test_host_domain() {
        let t = table();
        assert_eq!(
            t.host_domain("a.b.example.co.uk"),
            Some("example.co.uk".to_string())
        );
        assert_eq!(t.host_domain("example.com"), Some("example.com".to_string()));
        assert_eq!(t.host_domain("co.uk"), None);
    }

    #[test]
    fn test_is_domain() {
        let t = table();
        assert!(t.is_domain("example.com"));
        assert!(t.is_domain("example.co.uk"));
        assert!(!t.is_domain("www.example.com"));
        assert!(!t.is_domain("co.uk"));
        assert!(!t.is_domain("com"));
    }

    #[test]
    fn test_is_valid_host() {
        let t = table();
        assert!(t.is_valid_host("www.example.com"));
        assert!(t.is_valid_host("WWW.EXAMPLE.COM."));
        assert!(!t.is_valid_host("example.nosuchtld"));
        assert!(!t.is_valid_host("bad host.com"));
        assert!(!t.is_valid_host("-bad.example.com"));
        assert!(!t.is_valid_host(""));
        assert!(!t.is_valid_host(&format!("{}.com", "a".repeat(64))));
        assert!(!t.is_valid_host(&format!("{}.com", "a.".repeat(130))));
    }

    #[test]
    fn test_domain_keyword() {
        let t = table();
        assert_eq!(
            t.domain_keyword("mail.example.co.uk"),
            Some("example".to_string())
        );
        assert_eq!(t.domain_keyword("example.com"), Some("example".to_string()));
        assert_eq!(t.domain_keyword("com"), None);
    }

    #[test]
    fn test_ip_helpers() {
        assert!(valid_ip("192.0.2.1"));
        assert!(!valid_ip("::1"));
        assert!(valid_ip6("2001:db8::1"));
        assert!(valid_ip_network("10.0.0.0/8"));
        assert!(!valid_ip_network("10.0.0.1"));
        assert!(is_public_ip("8.8.8.8"));
        assert!(!is_public_ip("10.1.2.3"));
        assert!(!is_public_ip("127.0.0.1"));
        assert!(is_local_or_loopback_ip("192.168.1.1"));
        assert!(is_local_or_loopback_ip("::1"));
        assert!(!is_local_or_loopback_ip("1.1.1.1"));
    }
}
