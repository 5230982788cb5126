// src/target.rs
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::event::EventType;

static HOSTNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9\-\._]+$").expect("hostname regex"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[%a-zA-Z\.0-9_\-\+]+@[a-zA-Z\.0-9\-]+\.[a-zA-Z\.0-9\-]+$").expect("email regex")
});
static BITCOIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[13][a-km-zA-HJ-NP-Z1-9]{25,34}$").expect("bitcoin regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9\(\)\-\s\.]{6,}$").expect("phone regex"));

/// What kind of seed the scan was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    IpAddress,
    Ipv6Address,
    Netblock,
    DomainName,
    InternetName,
    EmailAddr,
    HumanName,
    PhoneNumber,
    Username,
    BitcoinAddress,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::IpAddress => "IP_ADDRESS",
            TargetKind::Ipv6Address => "IPV6_ADDRESS",
            TargetKind::Netblock => "NETBLOCK",
            TargetKind::DomainName => "DOMAIN_NAME",
            TargetKind::InternetName => "INTERNET_NAME",
            TargetKind::EmailAddr => "EMAILADDR",
            TargetKind::HumanName => "HUMAN_NAME",
            TargetKind::PhoneNumber => "PHONE_NUMBER",
            TargetKind::Username => "USERNAME",
            TargetKind::BitcoinAddress => "BITCOIN_ADDRESS",
        }
    }

    /// The event type a scan seeded with this kind of target emits first.
    pub fn seed_event_type(&self) -> EventType {
        match self {
            TargetKind::IpAddress => EventType::IpAddress,
            TargetKind::Ipv6Address => EventType::Ipv6Address,
            TargetKind::Netblock => EventType::NetblockOwner,
            TargetKind::DomainName => EventType::DomainName,
            TargetKind::InternetName => EventType::InternetName,
            TargetKind::EmailAddr => EventType::EmailAddr,
            TargetKind::HumanName => EventType::HumanName,
            TargetKind::PhoneNumber => EventType::PhoneNumber,
            TargetKind::Username => EventType::Username,
            TargetKind::BitcoinAddress => EventType::BitcoinAddress,
        }
    }
}

impl FromStr for TargetKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IP_ADDRESS" => Ok(TargetKind::IpAddress),
            "IPV6_ADDRESS" => Ok(TargetKind::Ipv6Address),
            "NETBLOCK" => Ok(TargetKind::Netblock),
            "DOMAIN_NAME" => Ok(TargetKind::DomainName),
            "INTERNET_NAME" => Ok(TargetKind::InternetName),
            "EMAILADDR" => Ok(TargetKind::EmailAddr),
            "HUMAN_NAME" => Ok(TargetKind::HumanName),
            "PHONE_NUMBER" => Ok(TargetKind::PhoneNumber),
            "USERNAME" => Ok(TargetKind::Username),
            "BITCOIN_ADDRESS" => Ok(TargetKind::BitcoinAddress),
            other => Err(ScanError::InvalidInput(format!(
                "Unknown target kind: {}",
                other
            ))),
        }
    }
}

/// An alias registered against the target, e.g. the PTR name a collector
/// found for an IP target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAlias {
    pub event_type: EventType,
    pub value: String,
}

/// The seed of a scan: one value plus its kind, with any aliases collectors
/// register along the way. Scope decisions flow through `matches`.
#[derive(Debug)]
pub struct Target {
    value: String,
    kind: TargetKind,
    aliases: RwLock<Vec<TargetAlias>>,
}

impl Target {
    /// Create a target, rejecting values that are not syntactically valid
    /// for the given kind.
    pub fn new(value: &str, kind: TargetKind) -> ScanResult<Self> {
        let value = value.trim().to_lowercase();
        if value.is_empty() {
            return Err(ScanError::InvalidInput("target value is blank".into()));
        }

        let valid = match kind {
            TargetKind::IpAddress => value.parse::<IpAddr>().map_or(false, |ip| ip.is_ipv4()),
            TargetKind::Ipv6Address => value.parse::<IpAddr>().map_or(false, |ip| ip.is_ipv6()),
            TargetKind::Netblock => value.parse::<IpNetwork>().is_ok(),
            TargetKind::DomainName | TargetKind::InternetName => {
                value.contains('.') && HOSTNAME_RE.is_match(&value)
            }
            TargetKind::EmailAddr => EMAIL_RE.is_match(&value),
            TargetKind::BitcoinAddress => BITCOIN_RE.is_match(&value),
            TargetKind::PhoneNumber => PHONE_RE.is_match(&value),
            TargetKind::HumanName | TargetKind::Username => true,
        };
        if !valid {
            return Err(ScanError::InvalidInput(format!(
                "'{}' is not a valid {}",
                value,
                kind.as_str()
            )));
        }

        Ok(Target {
            value,
            kind,
            aliases: RwLock::new(Vec::new()),
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// Register another name or address that is equivalent to this target.
    /// Duplicates are ignored.
    pub fn set_alias(&self, event_type: EventType, value: &str) {
        if value.is_empty() {
            return;
        }
        let alias = TargetAlias {
            event_type,
            value: value.to_lowercase(),
        };
        let mut aliases = self.aliases.write();
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }

    /// All hostnames equivalent to the target: INTERNET_NAME aliases plus
    /// the target value itself where the kind is name-like. For an email
    /// target the mailbox's domain also counts.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .aliases
            .read()
            .iter()
            .filter(|a| a.event_type == EventType::InternetName)
            .map(|a| a.value.clone())
            .collect();

        match self.kind {
            TargetKind::DomainName | TargetKind::InternetName => {
                if !names.contains(&self.value) {
                    names.push(self.value.clone());
                }
            }
            TargetKind::EmailAddr => {
                if !names.contains(&self.value) {
                    names.push(self.value.clone());
                }
                if let Some(domain) = self.value.split('@').nth(1) {
                    let domain = domain.to_string();
                    if !names.contains(&domain) {
                        names.push(domain);
                    }
                }
            }
            _ => {}
        }
        names
    }

    /// All IP addresses equivalent to the target.
    pub fn addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self
            .aliases
            .read()
            .iter()
            .filter(|a| {
                a.event_type == EventType::IpAddress || a.event_type == EventType::Ipv6Address
            })
            .map(|a| a.value.clone())
            .collect();

        if matches!(self.kind, TargetKind::IpAddress | TargetKind::Ipv6Address)
            && !addrs.contains(&self.value)
        {
            addrs.push(self.value.clone());
        }
        addrs
    }

    /// Whether `candidate` is tightly related to the target. Deterministic
    /// and total: invalid input is simply not a match.
    ///
    /// Exact equality is checked before either flag is consulted, so the
    /// flags only govern strict parent/child relationships.
    pub fn matches(&self, candidate: &str, include_children: bool, include_parents: bool) -> bool {
        let candidate = candidate.trim().trim_end_matches('.').to_lowercase();
        if candidate.is_empty() {
            return false;
        }

        // Nothing useful can be said about these kinds, so everything is
        // considered related, mirroring the fuzzy-target behaviour of the
        // HUMAN_NAME/PHONE_NUMBER/USERNAME scans.
        if matches!(
            self.kind,
            TargetKind::HumanName | TargetKind::PhoneNumber | TargetKind::Username
        ) {
            return true;
        }

        if self.kind == TargetKind::BitcoinAddress {
            return candidate == self.value;
        }

        // An email candidate is scope-matched by its mailbox domain.
        if candidate.contains('@') {
            return match candidate.split('@').nth(1) {
                Some(domain) if !domain.is_empty() => {
                    self.matches(domain, include_children, include_parents)
                }
                _ => false,
            };
        }

        if let Ok(ip) = candidate.parse::<IpAddr>() {
            if self.addresses().contains(&candidate) {
                return true;
            }
            if self.kind == TargetKind::Netblock {
                if let Ok(net) = self.value.parse::<IpNetwork>() {
                    return net.contains(ip);
                }
            }
            return false;
        }

        for name in self.names() {
            if candidate == name {
                return true;
            }
            if include_children && candidate.ends_with(&format!(".{}", name)) {
                return true;
            }
            if include_parents && name.ends_with(&format!(".{}", candidate)) {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_target_matches_children() {
        let target = Target::new("osprey.net", TargetKind::DomainName).unwrap();
        assert!(target.matches("osprey.net", true, false));
        assert!(target.matches("a.osprey.net", true, false));
        assert!(target.matches("A.OSPREY.NET.", true, false));
        assert!(!target.matches("evil.example", true, false));
        assert!(!target.matches("notosprey.net", true, false));
    }

    #[test]
    fn test_children_flag_off() {
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        assert!(target.matches("example.com", false, false));
        assert!(!target.matches("www.example.com", false, false));
    }

    #[test]
    fn test_parents_flag() {
        let target = Target::new("www.example.com", TargetKind::InternetName).unwrap();
        assert!(target.matches("example.com", false, true));
        assert!(!target.matches("example.com", true, false));
    }

    #[test]
    fn test_exact_equality_wins_with_both_flags() {
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        assert!(target.matches("example.com", true, true));
    }

    #[test]
    fn test_ip_target() {
        let target = Target::new("1.1.1.1", TargetKind::IpAddress).unwrap();
        assert!(target.matches("1.1.1.1", true, false));
        assert!(!target.matches("1.1.1.2", true, false));
        assert!(!target.matches("one.one.one.one", true, false));
    }

    #[test]
    fn test_netblock_containment() {
        let target = Target::new("192.0.2.0/24", TargetKind::Netblock).unwrap();
        assert!(target.matches("192.0.2.55", true, false));
        assert!(!target.matches("192.0.3.55", true, false));
    }

    #[test]
    fn test_email_candidate_matched_by_domain() {
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        assert!(target.matches("bob@example.com", true, false));
        assert!(target.matches("bob@mail.example.com", true, false));
        assert!(!target.matches("bob@other.org", true, false));
    }

    #[test]
    fn test_email_target_names_include_domain() {
        let target = Target::new("bob@example.com", TargetKind::EmailAddr).unwrap();
        assert!(target.matches("example.com", true, false));
        assert!(target.matches("www.example.com", true, false));
    }

    #[test]
    fn test_alias_extends_scope() {
        let target = Target::new("1.1.1.1", TargetKind::IpAddress).unwrap();
        target.set_alias(EventType::InternetName, "one.one.one.one");
        assert!(target.matches("one.one.one.one", true, false));
        assert!(target.matches("www.one.one.one.one", true, false));
    }

    #[test]
    fn test_invalid_target_values_rejected() {
        assert!(Target::new("not an ip", TargetKind::IpAddress).is_err());
        assert!(Target::new("", TargetKind::DomainName).is_err());
        assert!(Target::new("no-dots", TargetKind::DomainName).is_err());
        assert!(Target::new("bademail", TargetKind::EmailAddr).is_err());
    }

    #[test]
    fn test_fuzzy_kinds_match_everything() {
        let target = Target::new("Jane Doe", TargetKind::HumanName).unwrap();
        assert!(target.matches("anything-at-all", true, false));
    }
}
