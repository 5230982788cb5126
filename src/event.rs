// src/event.rs
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ScanError, ScanResult};

/// Hash sentinel reserved for the seed event of a scan.
pub const ROOT_HASH: &str = "ROOT";

/// Monotonic sequence counter shared by all events in the process.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// The closed ontology of event types. The string names are a published
/// contract: collectors are wired together by them, and persisted records
/// carry them. Adding or renaming a type is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Root,
    IpAddress,
    Ipv6Address,
    InternetName,
    DomainName,
    NetblockOwner,
    NetblockMember,
    EmailAddr,
    EmailAddrGeneric,
    EmailAddrCompromised,
    HumanName,
    PhoneNumber,
    Username,
    BitcoinAddress,
    AffiliateInternetName,
    AffiliateDomainName,
    AffiliateIpAddr,
    CoHostedSite,
    MaliciousIpAddr,
    MaliciousInternetName,
    MaliciousCoHostedSite,
    SslCertificateIssued,
    SslCertificateRaw,
    SslCertificateMismatch,
    SslCertificateExpiring,
    SslCertificateExpired,
    GeoInfo,
    RawRirData,
    SearchEngineWebContent,
    TargetWebContent,
    LinkedUrlInternal,
    LinkedUrlExternal,
    WebserverBanner,
    SoftwareUsed,
    Hash,
    HashCompromised,
    CreditCardNumber,
    IbanNumber,
}

impl EventType {
    /// The wire/registry name for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Root => "ROOT",
            EventType::IpAddress => "IP_ADDRESS",
            EventType::Ipv6Address => "IPV6_ADDRESS",
            EventType::InternetName => "INTERNET_NAME",
            EventType::DomainName => "DOMAIN_NAME",
            EventType::NetblockOwner => "NETBLOCK_OWNER",
            EventType::NetblockMember => "NETBLOCK_MEMBER",
            EventType::EmailAddr => "EMAILADDR",
            EventType::EmailAddrGeneric => "EMAILADDR_GENERIC",
            EventType::EmailAddrCompromised => "EMAILADDR_COMPROMISED",
            EventType::HumanName => "HUMAN_NAME",
            EventType::PhoneNumber => "PHONE_NUMBER",
            EventType::Username => "USERNAME",
            EventType::BitcoinAddress => "BITCOIN_ADDRESS",
            EventType::AffiliateInternetName => "AFFILIATE_INTERNET_NAME",
            EventType::AffiliateDomainName => "AFFILIATE_DOMAIN_NAME",
            EventType::AffiliateIpAddr => "AFFILIATE_IPADDR",
            EventType::CoHostedSite => "CO_HOSTED_SITE",
            EventType::MaliciousIpAddr => "MALICIOUS_IPADDR",
            EventType::MaliciousInternetName => "MALICIOUS_INTERNET_NAME",
            EventType::MaliciousCoHostedSite => "MALICIOUS_COHOST",
            EventType::SslCertificateIssued => "SSL_CERTIFICATE_ISSUED",
            EventType::SslCertificateRaw => "SSL_CERTIFICATE_RAW",
            EventType::SslCertificateMismatch => "SSL_CERTIFICATE_MISMATCH",
            EventType::SslCertificateExpiring => "SSL_CERTIFICATE_EXPIRING",
            EventType::SslCertificateExpired => "SSL_CERTIFICATE_EXPIRED",
            EventType::GeoInfo => "GEOINFO",
            EventType::RawRirData => "RAW_RIR_DATA",
            EventType::SearchEngineWebContent => "SEARCH_ENGINE_WEB_CONTENT",
            EventType::TargetWebContent => "TARGET_WEB_CONTENT",
            EventType::LinkedUrlInternal => "LINKED_URL_INTERNAL",
            EventType::LinkedUrlExternal => "LINKED_URL_EXTERNAL",
            EventType::WebserverBanner => "WEBSERVER_BANNER",
            EventType::SoftwareUsed => "SOFTWARE_USED",
            EventType::Hash => "HASH",
            EventType::HashCompromised => "HASH_COMPROMISED",
            EventType::CreditCardNumber => "CREDIT_CARD_NUMBER",
            EventType::IbanNumber => "IBAN_NUMBER",
        }
    }

    /// All types in the ontology, in registry order.
    pub fn all() -> &'static [EventType] {
        use EventType::*;
        &[
            Root, IpAddress, Ipv6Address, InternetName, DomainName,
            NetblockOwner, NetblockMember, EmailAddr, EmailAddrGeneric,
            EmailAddrCompromised, HumanName, PhoneNumber, Username,
            BitcoinAddress, AffiliateInternetName, AffiliateDomainName,
            AffiliateIpAddr, CoHostedSite, MaliciousIpAddr,
            MaliciousInternetName, MaliciousCoHostedSite,
            SslCertificateIssued, SslCertificateRaw, SslCertificateMismatch,
            SslCertificateExpiring, SslCertificateExpired, GeoInfo,
            RawRirData, SearchEngineWebContent, TargetWebContent,
            LinkedUrlInternal, LinkedUrlExternal, WebserverBanner,
            SoftwareUsed, Hash, HashCompromised, CreditCardNumber,
            IbanNumber,
        ]
    }

    /// Affiliate artifacts: related to but not owned by the target.
    pub fn is_affiliate(&self) -> bool {
        matches!(
            self,
            EventType::AffiliateInternetName
                | EventType::AffiliateDomainName
                | EventType::AffiliateIpAddr
        )
    }

    /// Raw evidence carriers are never scope-filtered; they exist to give
    /// downstream parsers something to chew on.
    pub fn is_evidence(&self) -> bool {
        matches!(
            self,
            EventType::RawRirData
                | EventType::SearchEngineWebContent
                | EventType::TargetWebContent
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::all()
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| ScanError::InvalidInput(format!("Unknown event type: {}", s)))
    }
}

/// An immutable fact discovered during a scan. The parent chain forms the
/// provenance tree back to the ROOT seed event.
#[derive(Debug, Clone)]
pub struct Event {
    event_type: EventType,
    data: String,
    module: String,
    parent: Option<Arc<Event>>,
    confidence: u8,
    visibility: u8,
    risk: u8,
    hash: String,
    generated: u64,
}

impl Event {
    /// Create the synthetic seed event for a scan. Its hash is the fixed
    /// "ROOT" sentinel and it has no parent or producing module.
    pub fn root(target_value: &str) -> Arc<Event> {
        Arc::new(Event {
            event_type: EventType::Root,
            data: target_value.to_string(),
            module: String::new(),
            parent: None,
            confidence: 100,
            visibility: 100,
            risk: 0,
            hash: ROOT_HASH.to_string(),
            generated: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Create an event produced by `module` in response to `parent`.
    /// Empty data is rejected.
    pub fn new(
        event_type: EventType,
        data: impl Into<String>,
        module: impl Into<String>,
        parent: Arc<Event>,
    ) -> ScanResult<Event> {
        let data = data.into();
        if data.is_empty() {
            return Err(ScanError::InvalidInput(format!(
                "empty data for {} event",
                event_type
            )));
        }
        let module = module.into();
        if module.is_empty() {
            return Err(ScanError::InvalidInput(format!(
                "empty module for {} event",
                event_type
            )));
        }

        let hash = content_hash(event_type, &data, &module);
        Ok(Event {
            event_type,
            data,
            module,
            parent: Some(parent),
            confidence: 100,
            visibility: 100,
            risk: 0,
            hash,
            generated: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence.min(100);
        self
    }

    pub fn with_visibility(mut self, visibility: u8) -> Self {
        self.visibility = visibility.min(100);
        self
    }

    pub fn with_risk(mut self, risk: u8) -> Self {
        self.risk = risk.min(100);
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn parent(&self) -> Option<&Arc<Event>> {
        self.parent.as_ref()
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn visibility(&self) -> u8 {
        self.visibility
    }

    pub fn risk(&self) -> u8 {
        self.risk
    }

    /// Deterministic content-addressed identifier, or "ROOT" for the seed.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Monotonic sequence number assigned at creation time.
    pub fn generated(&self) -> u64 {
        self.generated
    }

    pub fn is_root(&self) -> bool {
        self.event_type == EventType::Root
    }

    /// Walk the provenance chain from this event's parent up to ROOT.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent.as_deref(),
        }
    }

    /// The persisted form of this event.
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            event_type: self.event_type.as_str().to_string(),
            data: self.data.clone(),
            module: self.module.clone(),
            parent_hash: self
                .parent
                .as_ref()
                .map(|p| p.hash().to_string())
                .unwrap_or_default(),
            confidence: self.confidence,
            visibility: self.visibility,
            risk: self.risk,
            generated: self.generated,
        }
    }
}

/// Iterator over an event's ancestry, nearest parent first.
pub struct Ancestors<'a> {
    next: Option<&'a Event>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent.as_deref();
        Some(current)
    }
}

/// Serialisable event record: what gets persisted or exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: String,
    pub module: String,
    pub parent_hash: String,
    pub confidence: u8,
    pub visibility: u8,
    pub risk: u8,
    pub generated: u64,
}

/// SHA256 over type name, data and producing module. Stable across runs so
/// identical inputs always produce identical hashes.
fn content_hash(event_type: EventType, data: &str, module: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_type.as_str().as_bytes());
    hasher.update(data.as_bytes());
    hasher.update(module.as_bytes());
    format!("{:x}", hasher.finalize())
}
