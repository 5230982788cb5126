// src/plugins/email_extract.rs - email harvesting from raw content
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{OptValue, PluginOpts};
use crate::error::ScanResult;
use crate::event::{Event, EventType};
use crate::parse::parse_emails;
use crate::plugin::{plugin_err, EventSink, Plugin, PluginMeta, Watch};
use crate::services::Services;
use crate::target::Target;

/// Pulls email addresses out of evidence content. Addresses on
/// out-of-scope domains are dropped unless `include_external` is set;
/// well-known role mailboxes are reported as generic.
pub struct EmailExtractPlugin {
    services: Option<Arc<Services>>,
    target: Option<Arc<Target>>,
    include_external: bool,
    seen: HashSet<String>,
}

impl EmailExtractPlugin {
    pub fn new() -> Self {
        EmailExtractPlugin {
            services: None,
            target: None,
            include_external: false,
            seen: HashSet::new(),
        }
    }
}

impl Default for EmailExtractPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for EmailExtractPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new("email_extract", "Extract email addresses from fetched content")
    }

    fn watched_events(&self) -> Watch {
        Watch::Events(vec![
            EventType::TargetWebContent,
            EventType::SearchEngineWebContent,
            EventType::RawRirData,
        ])
    }

    fn produced_events(&self) -> Vec<EventType> {
        vec![EventType::EmailAddr, EventType::EmailAddrGeneric]
    }

    fn default_opts(&self) -> HashMap<String, OptValue> {
        let mut opts = HashMap::new();
        opts.insert("include_external".to_string(), OptValue::from(false));
        opts
    }

    async fn setup(&mut self, services: Arc<Services>, opts: &PluginOpts) -> ScanResult<()> {
        self.include_external = opts.get_bool("include_external");
        self.services = Some(services);
        Ok(())
    }

    fn set_target(&mut self, target: Arc<Target>) {
        self.target = Some(target);
    }

    async fn handle_event(&mut self, event: &Arc<Event>, sink: &mut EventSink) -> ScanResult<()> {
        let services = self
            .services
            .as_ref()
            .ok_or_else(|| plugin_err("email_extract", "setup was not called"))?;
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| plugin_err("email_extract", "no target injected"))?;

        for email in parse_emails(event.data()) {
            let (mailbox, domain) = match email.split_once('@') {
                Some(parts) => parts,
                None => continue,
            };
            if !self.include_external && !target.matches(domain, true, false) {
                debug!(%email, "address outside scope");
                continue;
            }
            if !self.seen.insert(email.clone()) {
                continue;
            }
            let event_type = if services.config.is_generic_user(mailbox) {
                EventType::EmailAddrGeneric
            } else {
                EventType::EmailAddr
            };
            sink.emit(event_type, email)?;
        }
        Ok(())
    }
}
