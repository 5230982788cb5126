// src/search.rs - paginated web search helpers
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{ScanError, ScanResult};
use crate::http::{remove_url_creds, FetchOptions, HttpClient};

const GOOGLE_PAGE_SIZE: u64 = 10;
const BING_PAGE_SIZE: u64 = 20;

/// Controls for a paginated search run. The page cap bounds how many
/// requests one query may cost; the delay is a fixed pause before each
/// page after the first, keeping collectors polite to the API.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub api_key: String,
    /// Google custom search engine id; unused by Bing.
    pub cse_id: Option<String>,
    pub max_pages: u64,
    pub timeout: Option<Duration>,
    pub page_delay: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            api_key: String::new(),
            cse_id: None,
            max_pages: 10,
            timeout: None,
            page_delay: Duration::from_secs(1),
        }
    }
}

/// One page of results: the raw response body plus the result URLs
/// pulled out of it.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub content: String,
    pub urls: Vec<String>,
}

/// Engine-agnostic pagination state driven by [`SearchClient`].
pub struct SearchIterator {
    http: Arc<HttpClient>,
    options: SearchOptions,
    engine: Engine,
    query: String,
    pages_fetched: u64,
    next_offset: u64,
    done: bool,
}

enum Engine {
    Google,
    Bing,
}

impl SearchIterator {
    /// Fetch the next page, or None once the cap is reached or the
    /// engine runs out of results.
    pub async fn next_page(&mut self) -> ScanResult<Option<SearchPage>> {
        if self.done || self.pages_fetched >= self.options.max_pages {
            return Ok(None);
        }
        if self.pages_fetched > 0 && !self.options.page_delay.is_zero() {
            tokio::time::sleep(self.options.page_delay).await;
        }

        let (url, mut fetch_opts) = match self.engine {
            Engine::Google => (self.google_url(), FetchOptions::new()),
            Engine::Bing => {
                let mut opts = FetchOptions::new();
                opts.headers.insert(
                    "Ocp-Apim-Subscription-Key".to_string(),
                    self.options.api_key.clone(),
                );
                (self.bing_url(), opts)
            }
        };
        fetch_opts.timeout = self.options.timeout;

        let response = self
            .http
            .fetch(&url, &fetch_opts)
            .await?
            .ok_or_else(|| ScanError::Unexpected("search URL not fetchable".to_string()))?;

        let content = match (&response.code, response.content) {
            (Some(200), Some(content)) => content,
            (code, _) => {
                self.done = true;
                return Err(ScanError::RemoteRejection {
                    source_name: match self.engine {
                        Engine::Google => "Google".to_string(),
                        Engine::Bing => "Bing".to_string(),
                    },
                    message: format!(
                        "search request returned {:?} ({}) for {}",
                        code,
                        response.status,
                        remove_url_creds(&url)
                    ),
                });
            }
        };

        let parsed: Value = serde_json::from_str(&content)
            .map_err(|e| ScanError::Parse(format!("search response was not JSON: {}", e)))?;
        let urls = match self.engine {
            Engine::Google => google_result_urls(&parsed),
            Engine::Bing => bing_result_urls(&parsed),
        };

        self.pages_fetched += 1;
        if urls.is_empty() {
            self.done = true;
            return Ok(None);
        }
        self.next_offset += match self.engine {
            Engine::Google => GOOGLE_PAGE_SIZE,
            Engine::Bing => BING_PAGE_SIZE,
        };
        debug!(
            page = self.pages_fetched,
            results = urls.len(),
            query = %self.query,
            "search page fetched"
        );
        Ok(Some(SearchPage { content, urls }))
    }

    fn google_url(&self) -> String {
        format!(
            "https://www.googleapis.com/customsearch/v1?key={}&cx={}&q={}&start={}",
            self.options.api_key,
            self.options.cse_id.as_deref().unwrap_or(""),
            urlencode(&self.query),
            self.next_offset + 1
        )
    }

    fn bing_url(&self) -> String {
        format!(
            "https://api.bing.microsoft.com/v7.0/search?q={}&count={}&offset={}&responseFilter=Webpages",
            urlencode(&self.query),
            BING_PAGE_SIZE,
            self.next_offset
        )
    }
}

/// Factory for engine iterators, sharing the scan's HTTP client.
pub struct SearchClient {
    http: Arc<HttpClient>,
}

impl SearchClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        SearchClient { http }
    }

    /// Page through Google Custom Search results for `query`. Requires
    /// both an API key and a CSE id in the options.
    pub fn google_iterate(&self, query: &str, options: SearchOptions) -> ScanResult<SearchIterator> {
        if options.api_key.is_empty() || options.cse_id.as_deref().unwrap_or("").is_empty() {
            return Err(ScanError::Config(
                "Google search requires an API key and CSE id".to_string(),
            ));
        }
        Ok(self.iterator(Engine::Google, query, options))
    }

    /// Page through Bing Web Search results for `query`.
    pub fn bing_iterate(&self, query: &str, options: SearchOptions) -> ScanResult<SearchIterator> {
        if options.api_key.is_empty() {
            return Err(ScanError::Config("Bing search requires an API key".to_string()));
        }
        Ok(self.iterator(Engine::Bing, query, options))
    }

    fn iterator(&self, engine: Engine, query: &str, options: SearchOptions) -> SearchIterator {
        SearchIterator {
            http: Arc::clone(&self.http),
            options,
            engine,
            query: query.to_string(),
            pages_fetched: 0,
            next_offset: 0,
            done: false,
        }
    }
}

fn google_result_urls(body: &Value) -> Vec<String> {
    body.get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("link").and_then(Value::as_str))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn bing_result_urls(body: &Value) -> Vec<String> {
    body.get("webPages")
        .and_then(|w| w.get("value"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("url").and_then(Value::as_str))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn urlencode(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for b in query.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
