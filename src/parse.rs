// src/parse.rs - shared extractors over fetched content
use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use crate::error::{ScanError, ScanResult};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.\-]+@[\w.\-]+\.[\w.\-]+").expect("email regex"));

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[a-zA-Z0-9\-\.:]+(?:/[a-zA-Z0-9\-\._~!$&'()*+,;=:@/%?#]*)?"#)
        .expect("url regex")
});

static LINK_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:href|src|action|url)\s*=\s*["']?([^"'\s>]+)"#).expect("link regex")
});

static HEX_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9a-fA-F]{32,128}").expect("hash regex"));

static CARD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]{13,19}").expect("card regex"));

static IBAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z]{2}[0-9]{2}[A-Za-z0-9]{11,28}").expect("iban regex"));

static ROBOTS_DISALLOW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*disallow\s*:\s*(.+?)\s*$").expect("robots regex"));

/// Email addresses found in free text, in first-seen order. Matches are
/// loose on purpose; `valid_email` applies the structural checks.
pub fn parse_emails(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in EMAIL_RE.find_iter(text) {
        let email = m.as_str().trim_matches('.').to_lowercase();
        if !valid_email(&email) {
            continue;
        }
        if seen.insert(email.clone()) {
            out.push(email);
        }
    }
    out
}

pub fn valid_email(email: &str) -> bool {
    if email.len() < 5 || email.contains("..") || email.matches('@').count() != 1 {
        return false;
    }
    EMAIL_RE
        .find(email)
        .map_or(false, |m| m.start() == 0 && m.end() == email.len())
}

/// http/https URLs embedded in free text, trimmed of trailing
/// punctuation, in first-seen order.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in URL_RE.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ')', '\'', '"']);
        if url.len() <= "https://".len() {
            continue;
        }
        if seen.insert(url.to_string()) {
            out.push(url.to_string());
        }
    }
    out
}

/// A link lifted from markup: the resolved absolute URL, the attribute
/// value as written, and the page it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub url: String,
    pub original: String,
    pub source: String,
}

/// Links from `href`/`src`/`action`/`url` attributes in `html`, resolved
/// against `base_url`. mailto:, javascript:, in-page fragments and
/// unresolvable values are dropped. Insertion order is document order,
/// deduplicated on the resolved URL.
pub fn parse_links(base_url: &str, html: &str) -> Vec<Link> {
    let base = match Url::parse(base_url) {
        Ok(b) => b,
        Err(e) => {
            debug!(base_url, "could not parse base URL: {}", e);
            return Vec::new();
        }
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cap in LINK_ATTR_RE.captures_iter(html) {
        let original = cap[1].trim();
        if original.is_empty() || original.starts_with('#') {
            continue;
        }
        let lowered = original.to_lowercase();
        if lowered.starts_with("mailto:")
            || lowered.starts_with("javascript:")
            || lowered.starts_with("data:")
            || lowered.starts_with("tel:")
        {
            continue;
        }
        let resolved = match base.join(original) {
            Ok(mut u) => {
                u.set_fragment(None);
                u.to_string()
            }
            Err(_) => continue,
        };
        if seen.insert(resolved.clone()) {
            out.push(Link {
                url: resolved,
                original: original.to_string(),
                source: base_url.to_string(),
            });
        }
    }
    out
}

/// `scheme://host[:port]` of a URL, with no path.
pub fn url_base_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let mut base = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        base.push_str(&format!(":{}", port));
    }
    Some(base)
}

/// The URL up to and including its last path slash.
pub fn url_base_dir(url: &str) -> String {
    let path_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[path_start..].rfind('/') {
        Some(idx) => url[..=path_start + idx].to_string(),
        None => format!("{}/", url),
    }
}

/// Collapse `.` and `..` segments in a URL path without needing a base.
pub fn url_relative_to_absolute(url: &str) -> String {
    if !url.contains("..") {
        return url.to_string();
    }
    let (prefix, path) = match url.find("://") {
        Some(idx) => {
            let after = &url[idx + 3..];
            match after.find('/') {
                Some(slash) => (&url[..idx + 3 + slash], &url[idx + 3 + slash..]),
                None => return url.to_string(),
            }
        }
        None => ("", url),
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("{}{}", prefix, segments.join("/"))
}

/// The hostname component of a URL.
pub fn url_fqdn(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Md5 => "MD5",
            HashKind::Sha1 => "SHA1",
            HashKind::Sha256 => "SHA256",
            HashKind::Sha512 => "SHA512",
        }
    }
}

/// Hash-looking hex runs classified by exact length. A 64-char run is
/// one SHA256, never two MD5s, because the whole run is matched first.
pub fn parse_hashes(text: &str) -> Vec<(HashKind, String)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in HEX_RUN_RE.find_iter(text) {
        let kind = match m.as_str().len() {
            32 => HashKind::Md5,
            40 => HashKind::Sha1,
            64 => HashKind::Sha256,
            128 => HashKind::Sha512,
            _ => continue,
        };
        let value = m.as_str().to_lowercase();
        if seen.insert(value.clone()) {
            out.push((kind, value));
        }
    }
    out
}

/// Card-number candidates validated by the Luhn checksum. Spaces and
/// dashes between digit groups are tolerated.
pub fn parse_credit_cards(text: &str) -> Vec<String> {
    let squashed: String = text
        .chars()
        .map(|c| if c == ' ' || c == '-' { '\u{0}' } else { c })
        .filter(|c| *c != '\u{0}')
        .collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in CARD_RE.find_iter(&squashed) {
        let digits = m.as_str();
        if luhn_valid(digits) && seen.insert(digits.to_string()) {
            out.push(digits.to_string());
        }
    }
    out
}

fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false;
    for c in digits.chars().rev() {
        let mut d = match c.to_digit(10) {
            Some(d) => d,
            None => return false,
        };
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

/// ISO 13616 IBAN lengths by country code.
const IBAN_LENGTHS: &[(&str, usize)] = &[
    ("AL", 28), ("AD", 24), ("AT", 20), ("AZ", 28), ("BH", 22), ("BY", 28), ("BE", 16),
    ("BA", 20), ("BR", 29), ("BG", 22), ("CR", 22), ("HR", 21), ("CY", 28), ("CZ", 24),
    ("DK", 18), ("DO", 28), ("EG", 29), ("SV", 28), ("EE", 20), ("FO", 18), ("FI", 18),
    ("FR", 27), ("GE", 22), ("DE", 22), ("GI", 23), ("GR", 27), ("GL", 18), ("GT", 28),
    ("VA", 22), ("HU", 28), ("IS", 26), ("IQ", 23), ("IE", 22), ("IL", 23), ("IT", 27),
    ("JO", 30), ("KZ", 20), ("XK", 20), ("KW", 30), ("LV", 21), ("LB", 28), ("LI", 21),
    ("LT", 20), ("LU", 20), ("MT", 31), ("MR", 27), ("MU", 30), ("MD", 24), ("MC", 27),
    ("ME", 22), ("NL", 18), ("MK", 19), ("NO", 15), ("PK", 24), ("PS", 29), ("PL", 28),
    ("PT", 25), ("QA", 29), ("RO", 24), ("LC", 32), ("SM", 27), ("ST", 25), ("SA", 24),
    ("RS", 22), ("SC", 31), ("SK", 24), ("SI", 19), ("ES", 24), ("SE", 24), ("CH", 21),
    ("TL", 23), ("TN", 24), ("TR", 26), ("UA", 29), ("AE", 23), ("GB", 22), ("VG", 24),
];

/// IBANs verified structurally (known country, exact national length)
/// and by the mod-97 checksum.
pub fn parse_iban(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in IBAN_RE.find_iter(text) {
        let candidate = m.as_str().to_uppercase();
        let country = &candidate[..2];
        let expected = match IBAN_LENGTHS.iter().find(|(c, _)| *c == country) {
            Some((_, len)) => *len,
            None => continue,
        };
        if candidate.len() != expected || !iban_mod97_valid(&candidate) {
            continue;
        }
        if seen.insert(candidate.clone()) {
            out.push(candidate);
        }
    }
    out
}

fn iban_mod97_valid(iban: &str) -> bool {
    // Move the country code and check digits to the end, map letters to
    // two-digit values (A=10..Z=35), then take the whole thing mod 97.
    let rearranged: String = iban[4..].chars().chain(iban[..4].chars()).collect();
    let mut remainder: u64 = 0;
    for c in rearranged.chars() {
        let piece = match c {
            '0'..='9' => c as u64 - '0' as u64,
            'A'..='Z' => c as u64 - 'A' as u64 + 10,
            _ => return false,
        };
        remainder = if piece >= 10 {
            (remainder * 100 + piece) % 97
        } else {
            (remainder * 10 + piece) % 97
        };
    }
    remainder == 1
}

/// Fields lifted from an X.509 certificate.
#[derive(Debug, Clone)]
pub struct CertInfo {
    pub subject: String,
    pub issuer: String,
    pub sans: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertInfo {
    pub fn expires_in_days(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after < now
    }

    /// Whether `host` is covered by the certificate, by SAN or subject
    /// CN, honoring single-label wildcards.
    pub fn hostname_matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_lowercase();
        let cn = self
            .subject
            .split(',')
            .filter_map(|part| part.trim().strip_prefix("CN="))
            .map(|cn| cn.to_lowercase());
        self.sans
            .iter()
            .map(|s| s.to_lowercase())
            .chain(cn)
            .any(|name| cert_name_covers(&name, &host))
    }
}

fn cert_name_covers(name: &str, host: &str) -> bool {
    if name == host {
        return true;
    }
    if let Some(suffix) = name.strip_prefix("*.") {
        // A wildcard covers exactly one extra label.
        if let Some(prefix) = host.strip_suffix(suffix) {
            let prefix = prefix.trim_end_matches('.');
            return !prefix.is_empty() && !prefix.contains('.');
        }
    }
    false
}

/// Parse a certificate from DER or PEM bytes.
pub fn parse_certificate(raw: &[u8]) -> ScanResult<CertInfo> {
    let der;
    let der_bytes: &[u8] = if raw.starts_with(b"-----BEGIN") {
        let (_, pem) = x509_parser::pem::parse_x509_pem(raw)
            .map_err(|e| ScanError::Parse(format!("invalid PEM: {}", e)))?;
        der = pem.contents;
        &der
    } else {
        raw
    };
    let (_, cert) = X509Certificate::from_der(der_bytes)
        .map_err(|e| ScanError::Parse(format!("invalid certificate: {}", e)))?;

    let mut sans = Vec::new();
    if let Ok(Some(ext)) = cert.subject_alternative_name() {
        for name in &ext.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                sans.push(dns.to_string());
            }
        }
    }

    let not_before = Utc
        .timestamp_opt(cert.validity().not_before.timestamp(), 0)
        .single()
        .ok_or_else(|| ScanError::Parse("certificate notBefore out of range".to_string()))?;
    let not_after = Utc
        .timestamp_opt(cert.validity().not_after.timestamp(), 0)
        .single()
        .ok_or_else(|| ScanError::Parse("certificate notAfter out of range".to_string()))?;

    Ok(CertInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        sans,
        not_before,
        not_after,
    })
}

/// `Disallow:` patterns from a robots.txt body, for every user-agent.
pub fn parse_robots_txt(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cap in ROBOTS_DISALLOW_RE.captures_iter(text) {
        let pattern = cap[1].split('#').next().unwrap_or("").trim();
        if pattern.is_empty() {
            continue;
        }
        if seen.insert(pattern.to_string()) {
            out.push(pattern.to_string());
        }
    }
    out
}
