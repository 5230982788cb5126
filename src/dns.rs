// src/dns.rs - DNS resolution facade with wildcard detection
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

use crate::error::{ScanError, ScanResult};

/// Raw record lookups. The swappable seam under [`Resolver`] so tests can
/// script answers without touching the network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup_a(&self, name: &str) -> ScanResult<Vec<String>>;
    async fn lookup_aaaa(&self, name: &str) -> ScanResult<Vec<String>>;
    async fn lookup_ptr(&self, ip: IpAddr) -> ScanResult<Vec<String>>;
}

/// System-configured trust-dns backend.
pub struct TrustDnsBackend {
    resolver: TokioAsyncResolver,
}

impl TrustDnsBackend {
    pub fn new() -> Self {
        let mut opts = ResolverOpts::default();
        opts.attempts = 2;
        TrustDnsBackend {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

impl Default for TrustDnsBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn map_resolve_error(name: &str, e: trust_dns_resolver::error::ResolveError) -> ScanResult<Vec<String>> {
    match e.kind() {
        // Empty answer, not a failure.
        ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
        _ => Err(ScanError::Transport(format!(
            "DNS lookup failed for {}: {}",
            name, e
        ))),
    }
}

#[async_trait]
impl DnsLookup for TrustDnsBackend {
    async fn lookup_a(&self, name: &str) -> ScanResult<Vec<String>> {
        match self.resolver.ipv4_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().map(|r| r.to_string()).collect()),
            Err(e) => map_resolve_error(name, e),
        }
    }

    async fn lookup_aaaa(&self, name: &str) -> ScanResult<Vec<String>> {
        match self.resolver.ipv6_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().map(|r| r.to_string()).collect()),
            Err(e) => map_resolve_error(name, e),
        }
    }

    async fn lookup_ptr(&self, ip: IpAddr) -> ScanResult<Vec<String>> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => Ok(lookup.iter().map(|name| name.to_string()).collect()),
            Err(e) => map_resolve_error(&ip.to_string(), e),
        }
    }
}

/// Consonant/digit pool for wildcard probe labels; avoids vowels so the
/// probes never spell a word someone might have registered.
const PROBE_CHARS: &[u8] = b"bcdfghjklmnpqrstvwxyz3456789";
const PROBE_LEN: usize = 10;
const PROBE_COUNT: usize = 3;

/// Upper bound on any single lookup, so a dead resolver cannot stall
/// the cooperative dispatch loop.
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolution facade shared by the scanner and plugins. Normalizes
/// answers and caches per-zone wildcard verdicts for the scan lifetime.
pub struct Resolver {
    backend: Arc<dyn DnsLookup>,
    lookup_timeout: Duration,
    wildcard_cache: Mutex<HashMap<String, bool>>,
}

impl Resolver {
    pub fn new(backend: Arc<dyn DnsLookup>) -> Self {
        Self::with_lookup_timeout(backend, DEFAULT_LOOKUP_TIMEOUT)
    }

    pub fn with_lookup_timeout(backend: Arc<dyn DnsLookup>, lookup_timeout: Duration) -> Self {
        Resolver {
            backend,
            lookup_timeout,
            wildcard_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = ScanResult<T>>,
    ) -> ScanResult<T> {
        match tokio::time::timeout(self.lookup_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::Timeout {
                operation: operation.to_string(),
                seconds: self.lookup_timeout.as_secs(),
            }),
        }
    }

    /// IPv4 addresses for a hostname. Non-existent names yield an empty
    /// list; only transport failures are errors.
    pub async fn resolve_host(&self, name: &str) -> ScanResult<Vec<String>> {
        if name.trim().is_empty() {
            return Err(ScanError::InvalidInput("empty hostname".to_string()));
        }
        let answers = self.bounded("A lookup", self.backend.lookup_a(name)).await?;
        Ok(normalize_dns(answers))
    }

    /// IPv6 addresses for a hostname.
    pub async fn resolve_host6(&self, name: &str) -> ScanResult<Vec<String>> {
        if name.trim().is_empty() {
            return Err(ScanError::InvalidInput("empty hostname".to_string()));
        }
        let answers = self.bounded("AAAA lookup", self.backend.lookup_aaaa(name)).await?;
        Ok(normalize_dns(answers))
    }

    /// Reverse lookup: hostnames behind an IP address.
    pub async fn resolve_ip(&self, address: &str) -> ScanResult<Vec<String>> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| ScanError::InvalidInput(format!("invalid IP address: {}", address)))?;
        let answers = self.bounded("PTR lookup", self.backend.lookup_ptr(ip)).await?;
        Ok(normalize_dns(answers))
    }

    /// Confirm that `host` actually resolves to `address` by forward
    /// lookup, guarding against stale or spoofed reverse records.
    pub async fn validate_ip(&self, host: &str, address: &str) -> ScanResult<bool> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| ScanError::InvalidInput(format!("invalid IP address: {}", address)))?;
        let answers = if ip.is_ipv4() {
            self.resolve_host(host).await?
        } else {
            self.resolve_host6(host).await?
        };
        Ok(answers.iter().any(|a| a == address))
    }

    /// Whether `domain` answers for any name thrown at it. Probes several
    /// random labels; a wildcard verdict requires every probe to resolve
    /// to the same non-empty answer set. Verdicts are cached per zone.
    pub async fn check_dns_wildcard(&self, domain: &str) -> bool {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        if domain.is_empty() {
            return false;
        }
        if let Some(&verdict) = self.wildcard_cache.lock().get(&domain) {
            return verdict;
        }

        let mut seen: Option<Vec<String>> = None;
        let mut wildcard = true;
        for _ in 0..PROBE_COUNT {
            let probe = format!("{}.{}", random_probe_label(), domain);
            let answers = match self.bounded("wildcard probe", self.backend.lookup_a(&probe)).await {
                Ok(a) => {
                    let mut a = normalize_dns(a);
                    a.sort();
                    a
                }
                Err(e) => {
                    warn!(%domain, "wildcard probe failed: {}", e);
                    wildcard = false;
                    break;
                }
            };
            if answers.is_empty() {
                wildcard = false;
                break;
            }
            match &seen {
                Some(prev) if *prev != answers => {
                    wildcard = false;
                    break;
                }
                Some(_) => {}
                None => seen = Some(answers),
            }
        }

        debug!(%domain, wildcard, "wildcard DNS verdict");
        self.wildcard_cache.lock().insert(domain, wildcard);
        wildcard
    }
}

fn random_probe_label() -> String {
    let mut rng = rand::thread_rng();
    (0..PROBE_LEN)
        .map(|_| PROBE_CHARS[rng.gen_range(0..PROBE_CHARS.len())] as char)
        .collect()
}

/// Clean up raw DNS answers: strip trailing dots, lowercase, drop empties
/// and duplicates while keeping first-seen order.
pub fn normalize_dns(answers: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(answers.len());
    for answer in answers {
        let cleaned = answer.trim().trim_end_matches('.').to_lowercase();
        if cleaned.is_empty() || out.contains(&cleaned) {
            continue;
        }
        out.push(cleaned);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[test]
    fn test_normalize_dns() {
        let raw = vec![
            "Host.Example.COM.".to_string(),
            "host.example.com".to_string(),
            "".to_string(),
            "other.example.com.".to_string(),
        ];
        assert_eq!(
            normalize_dns(raw),
            vec!["host.example.com".to_string(), "other.example.com".to_string()]
        );
    }

    #[test]
    fn test_probe_label_shape() {
        let a = random_probe_label();
        let b = random_probe_label();
        assert_eq!(a.len(), PROBE_LEN);
        assert!(a.bytes().all(|c| PROBE_CHARS.contains(&c)));
        // Astronomically unlikely to collide.
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_resolve_host_normalizes() {
        let mut mock = MockDnsLookup::new();
        mock.expect_lookup_a()
            .with(eq("www.example.com"))
            .returning(|_| Ok(vec!["93.184.216.34".to_string(), "93.184.216.34".to_string()]));
        let resolver = Resolver::new(Arc::new(mock));
        let answers = resolver.resolve_host("www.example.com").await.unwrap();
        assert_eq!(answers, vec!["93.184.216.34".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_ip_rejects_garbage() {
        let resolver = Resolver::new(Arc::new(MockDnsLookup::new()));
        assert!(resolver.resolve_ip("not-an-ip").await.is_err());
    }

    #[tokio::test]
    async fn test_validate_ip() {
        let mut mock = MockDnsLookup::new();
        mock.expect_lookup_a()
            .returning(|_| Ok(vec!["192.0.2.10".to_string()]));
        let resolver = Resolver::new(Arc::new(mock));
        assert!(resolver.validate_ip("www.example.com", "192.0.2.10").await.unwrap());
        assert!(!resolver.validate_ip("www.example.com", "192.0.2.11").await.unwrap());
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        struct Stalled;
        #[async_trait]
        impl DnsLookup for Stalled {
            async fn lookup_a(&self, _name: &str) -> ScanResult<Vec<String>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
            async fn lookup_aaaa(&self, _name: &str) -> ScanResult<Vec<String>> {
                Ok(Vec::new())
            }
            async fn lookup_ptr(&self, _ip: IpAddr) -> ScanResult<Vec<String>> {
                Ok(Vec::new())
            }
        }

        let resolver =
            Resolver::with_lookup_timeout(Arc::new(Stalled), Duration::from_millis(20));
        match resolver.resolve_host("www.example.com").await {
            Err(ScanError::Timeout { operation, .. }) => assert_eq!(operation, "A lookup"),
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wildcard_detected_when_probes_agree() {
        let mut mock = MockDnsLookup::new();
        mock.expect_lookup_a()
            .times(PROBE_COUNT)
            .returning(|_| Ok(vec!["192.0.2.1".to_string()]));
        let resolver = Resolver::new(Arc::new(mock));
        assert!(resolver.check_dns_wildcard("wild.example.com").await);
        // Second call answers from the cache without new lookups.
        assert!(resolver.check_dns_wildcard("wild.example.com").await);
    }

    #[tokio::test]
    async fn test_no_wildcard_when_probe_misses() {
        let mut mock = MockDnsLookup::new();
        mock.expect_lookup_a().returning(|_| Ok(Vec::new()));
        let resolver = Resolver::new(Arc::new(mock));
        assert!(!resolver.check_dns_wildcard("example.com").await);
    }

    #[tokio::test]
    async fn test_no_wildcard_when_probes_differ() {
        let mut mock = MockDnsLookup::new();
        let mut n = 0u8;
        mock.expect_lookup_a().returning(move |_| {
            n += 1;
            Ok(vec![format!("192.0.2.{}", n)])
        });
        let resolver = Resolver::new(Arc::new(mock));
        assert!(!resolver.check_dns_wildcard("example.com").await);
    }
}
