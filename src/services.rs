// src/services.rs - shared service bundle injected into plugins
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::GlobalConfig;
use crate::dns::{DnsLookup, Resolver, TrustDnsBackend};
use crate::error::ScanResult;
use crate::http::HttpClient;
use crate::scope::TldTable;
use crate::search::SearchClient;

/// Everything a plugin may touch besides its own state: the shared
/// HTTP client (one cookie jar per scan), the resolver, the cache, the
/// search helpers and the TLD table. Also carries the scan-wide stop
/// flag that handlers poll for cooperative cancellation.
pub struct Services {
    pub config: GlobalConfig,
    pub http: Arc<HttpClient>,
    pub dns: Resolver,
    pub cache: Cache,
    pub search: SearchClient,
    pub tlds: Arc<TldTable>,
    pub scan_id: String,
    stop: AtomicBool,
}

impl Services {
    pub fn new(config: GlobalConfig, tlds: TldTable) -> ScanResult<Self> {
        Self::with_dns_backend(config, tlds, Arc::new(TrustDnsBackend::new()))
    }

    /// Build with a custom lookup backend. Tests script DNS answers
    /// through this seam.
    pub fn with_dns_backend(
        config: GlobalConfig,
        tlds: TldTable,
        dns_backend: Arc<dyn DnsLookup>,
    ) -> ScanResult<Self> {
        let scan_id = Uuid::new_v4().to_string();
        let http = Arc::new(HttpClient::new(&config)?);
        let cache_root = config
            .cache_dir
            .clone()
            .unwrap_or_else(Cache::default_root);
        let cache = Cache::new(cache_root)?;
        let search = SearchClient::new(Arc::clone(&http));
        info!(scan_id = %scan_id, "services initialised");
        Ok(Services {
            config,
            http,
            dns: Resolver::new(dns_backend),
            cache,
            search,
            tlds: Arc::new(tlds),
            scan_id,
            stop: AtomicBool::new(false),
        })
    }

    /// Ask the scan to wind down. Handlers see it at their next poll;
    /// deliveries already in flight run to completion.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
