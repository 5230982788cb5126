// src/plugins/dns_resolve.rs - forward/reverse resolution collector
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{OptValue, PluginOpts};
use crate::error::ScanResult;
use crate::event::{Event, EventType};
use crate::plugin::{plugin_err, EventSink, Plugin, PluginMeta, Watch};
use crate::services::Services;
use crate::target::Target;

/// Resolves discovered names to addresses and addresses back to names.
/// Reverse results are forward-verified before anything is emitted, and
/// verified names that fall outside scope become co-hosted sites.
pub struct DnsResolvePlugin {
    services: Option<Arc<Services>>,
    target: Option<Arc<Target>>,
    verify: bool,
}

impl DnsResolvePlugin {
    pub fn new() -> Self {
        DnsResolvePlugin {
            services: None,
            target: None,
            verify: true,
        }
    }

    fn services(&self) -> ScanResult<&Arc<Services>> {
        self.services
            .as_ref()
            .ok_or_else(|| plugin_err("dns_resolve", "setup was not called"))
    }

    fn target(&self) -> ScanResult<&Arc<Target>> {
        self.target
            .as_ref()
            .ok_or_else(|| plugin_err("dns_resolve", "no target injected"))
    }

    async fn handle_name(
        &self,
        event: &Arc<Event>,
        sink: &mut EventSink,
    ) -> ScanResult<()> {
        let services = self.services()?;
        let target = self.target()?;
        let host = event.data();

        if !services.tlds.is_valid_host(host) {
            debug!(host, "skipping invalid hostname");
            return Ok(());
        }

        let in_scope = target.matches(host, true, false);

        // Addresses under a wildcard zone prove nothing about the name,
        // so they are reported with reduced confidence.
        let domain = services.tlds.host_domain(host);
        let wildcard = match &domain {
            Some(d) if d.as_str() != host => services.dns.check_dns_wildcard(d).await,
            _ => false,
        };
        let confidence = if wildcard { 50 } else { 100 };

        for addr in services.dns.resolve_host(host).await? {
            if services.stop_requested() {
                return Ok(());
            }
            let event_type = if in_scope {
                EventType::IpAddress
            } else {
                EventType::AffiliateIpAddr
            };
            sink.emit_scored(event_type, addr, confidence, 0)?;
        }
        for addr in services.dns.resolve_host6(host).await? {
            if in_scope {
                sink.emit(EventType::Ipv6Address, addr)?;
            }
        }

        // A name sitting exactly on its registrable domain is also a
        // DOMAIN_NAME artifact.
        if in_scope && event.event_type() == EventType::InternetName {
            if let Some(d) = &domain {
                if d.as_str() == host {
                    sink.emit(EventType::DomainName, d.clone())?;
                }
            }
        }
        Ok(())
    }

    async fn handle_address(
        &self,
        event: &Arc<Event>,
        sink: &mut EventSink,
    ) -> ScanResult<()> {
        let services = self.services()?;
        let target = self.target()?;
        let addr = event.data();

        for name in services.dns.resolve_ip(addr).await? {
            if services.stop_requested() {
                return Ok(());
            }
            if !services.tlds.is_valid_host(&name) {
                continue;
            }
            if self.verify && !services.dns.validate_ip(&name, addr).await? {
                debug!(%name, addr, "reverse record failed forward verification");
                continue;
            }
            if target.matches(&name, true, false) {
                sink.emit(EventType::InternetName, name)?;
            } else {
                sink.emit(EventType::CoHostedSite, name)?;
            }
        }
        Ok(())
    }
}

impl Default for DnsResolvePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for DnsResolvePlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new("dns_resolve", "Resolve hostnames and IP addresses via DNS")
    }

    fn watched_events(&self) -> Watch {
        Watch::Events(vec![
            EventType::DomainName,
            EventType::InternetName,
            EventType::IpAddress,
            EventType::Ipv6Address,
        ])
    }

    fn produced_events(&self) -> Vec<EventType> {
        vec![
            EventType::IpAddress,
            EventType::Ipv6Address,
            EventType::AffiliateIpAddr,
            EventType::InternetName,
            EventType::DomainName,
            EventType::CoHostedSite,
        ]
    }

    fn default_opts(&self) -> HashMap<String, OptValue> {
        let mut opts = HashMap::new();
        opts.insert("verify".to_string(), OptValue::from(true));
        opts
    }

    async fn setup(&mut self, services: Arc<Services>, opts: &PluginOpts) -> ScanResult<()> {
        self.verify = opts.get_bool("verify");
        self.services = Some(services);
        Ok(())
    }

    fn set_target(&mut self, target: Arc<Target>) {
        self.target = Some(target);
    }

    async fn handle_event(&mut self, event: &Arc<Event>, sink: &mut EventSink) -> ScanResult<()> {
        match event.event_type() {
            EventType::DomainName | EventType::InternetName => {
                self.handle_name(event, sink).await
            }
            EventType::IpAddress | EventType::Ipv6Address => {
                self.handle_address(event, sink).await
            }
            _ => Ok(()),
        }
    }
}
