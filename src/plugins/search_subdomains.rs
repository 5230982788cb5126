// src/plugins/search_subdomains.rs - web-search subdomain discovery
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{OptValue, PluginOpts};
use crate::error::{ScanError, ScanResult};
use crate::event::{Event, EventType};
use crate::parse::{extract_urls, url_fqdn};
use crate::plugin::{plugin_err, EventSink, Plugin, PluginMeta, Watch};
use crate::search::SearchOptions;
use crate::services::Services;
use crate::target::Target;

/// Discovers hostnames under the target domain by paging through a web
/// search engine for `site:` results. An auth rejection from the engine
/// sets the sticky error state so the key is not burned further.
pub struct SearchSubdomainsPlugin {
    services: Option<Arc<Services>>,
    target: Option<Arc<Target>>,
    engine: String,
    api_key: String,
    cse_id: String,
    max_pages: u64,
    seen_hosts: HashSet<String>,
    errored: bool,
}

impl SearchSubdomainsPlugin {
    pub fn new() -> Self {
        SearchSubdomainsPlugin {
            services: None,
            target: None,
            engine: "bing".to_string(),
            api_key: String::new(),
            cse_id: String::new(),
            max_pages: 10,
            seen_hosts: HashSet::new(),
            errored: false,
        }
    }
}

impl Default for SearchSubdomainsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for SearchSubdomainsPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new(
            "search_subdomains",
            "Find hostnames under the target domain via web search",
        )
    }

    fn watched_events(&self) -> Watch {
        Watch::Events(vec![EventType::DomainName])
    }

    fn produced_events(&self) -> Vec<EventType> {
        vec![EventType::InternetName, EventType::SearchEngineWebContent]
    }

    fn default_opts(&self) -> HashMap<String, OptValue> {
        let mut opts = HashMap::new();
        opts.insert("engine".to_string(), OptValue::from("bing"));
        opts.insert("api_key".to_string(), OptValue::from(""));
        opts.insert("cse_id".to_string(), OptValue::from(""));
        opts.insert("max_pages".to_string(), OptValue::from(10i64));
        opts
    }

    async fn setup(&mut self, services: Arc<Services>, opts: &PluginOpts) -> ScanResult<()> {
        self.engine = opts.get_str("engine").unwrap_or("bing").to_string();
        self.api_key = opts.get_str("api_key").unwrap_or("").to_string();
        self.cse_id = opts.get_str("cse_id").unwrap_or("").to_string();
        self.max_pages = opts.get_int("max_pages").unwrap_or(10).max(1) as u64;
        if self.api_key.is_empty() {
            warn!("search_subdomains has no API key and will stay idle");
        }
        self.services = Some(services);
        Ok(())
    }

    fn set_target(&mut self, target: Arc<Target>) {
        self.target = Some(target);
    }

    async fn handle_event(&mut self, event: &Arc<Event>, sink: &mut EventSink) -> ScanResult<()> {
        if self.api_key.is_empty() {
            return Ok(());
        }
        let services = Arc::clone(
            self.services
                .as_ref()
                .ok_or_else(|| plugin_err("search_subdomains", "setup was not called"))?,
        );
        let target = Arc::clone(
            self.target
                .as_ref()
                .ok_or_else(|| plugin_err("search_subdomains", "no target injected"))?,
        );

        let domain = event.data();
        let options = SearchOptions {
            api_key: self.api_key.clone(),
            cse_id: if self.cse_id.is_empty() {
                None
            } else {
                Some(self.cse_id.clone())
            },
            max_pages: self.max_pages,
            ..Default::default()
        };
        let query = format!("site:{}", domain);
        let mut pages = match self.engine.as_str() {
            "google" => services.search.google_iterate(&query, options)?,
            _ => services.search.bing_iterate(&query, options)?,
        };

        loop {
            if services.stop_requested() {
                return Ok(());
            }
            let page = match pages.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e @ ScanError::RemoteRejection { .. }) => {
                    self.errored = true;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            sink.emit(EventType::SearchEngineWebContent, page.content.clone())?;

            let mut candidates = page.urls.clone();
            candidates.extend(extract_urls(&page.content));
            for url in candidates {
                let host = match url_fqdn(&url) {
                    Some(h) => h,
                    None => continue,
                };
                if !services.tlds.is_valid_host(&host) {
                    continue;
                }
                if !target.matches(&host, true, false) {
                    debug!(%host, "search result outside scope");
                    continue;
                }
                if self.seen_hosts.insert(host.clone()) {
                    sink.emit(EventType::InternetName, host)?;
                }
            }
        }
        Ok(())
    }

    fn error_state(&self) -> bool {
        self.errored
    }
}
