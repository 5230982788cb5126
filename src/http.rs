// src/http.rs - outbound HTTP with proxy routing and credential scrubbing
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Method, Proxy};
use tracing::{debug, warn};
use url::Url;

use crate::config::{GlobalConfig, ProxyConfig};
use crate::error::{ScanError, ScanResult};

static URL_CREDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(key|pass|user|password)=[^&]*").expect("creds regex"));

/// Strip credential-bearing query values before a URL reaches logs or
/// emitted events.
pub fn remove_url_creds(url: &str) -> String {
    URL_CREDS_RE.replace_all(url, "$1=XXX").to_string()
}

/// Per-request knobs layered over the client defaults.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
    pub post_data: Option<String>,
    /// Cap on body bytes read; anything beyond is discarded and the
    /// response is flagged truncated.
    pub size_limit: Option<usize>,
    /// Issue a HEAD request and skip the body entirely.
    pub head_only: bool,
    /// Cookie header value for this request only, on top of the
    /// client's cookie store.
    pub cookies: Option<String>,
    /// Suppress fetch logging, for requests whose URL or outcome is
    /// sensitive even after scrubbing.
    pub no_log: bool,
    /// Escalate a transport failure to a fatal scan error instead of
    /// returning it as a structured response.
    pub fatal: bool,
}

impl FetchOptions {
    pub fn new() -> Self {
        FetchOptions::default()
    }
}

/// Outcome of a fetch. Transport failures still produce a response so
/// plugins can inspect what happened without unwinding; `code` is None
/// only when no HTTP status was ever received.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub code: Option<u16>,
    pub status: String,
    pub content: Option<String>,
    pub headers: HashMap<String, String>,
    pub real_url: String,
    pub truncated: bool,
}

impl HttpResponse {
    fn transport_failure(url: &str, message: String) -> Self {
        HttpResponse {
            code: None,
            status: message,
            content: None,
            headers: HashMap::new(),
            real_url: remove_url_creds(url),
            truncated: false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, Some(c) if (200..300).contains(&c))
    }
}

/// Shared HTTP client. One cookie store per scan, with an optional SOCKS
/// proxy that only public destinations are routed through.
pub struct HttpClient {
    direct: reqwest::Client,
    proxied: Option<reqwest::Client>,
    proxy_host: Option<String>,
    default_timeout: Duration,
    user_agent: String,
}

impl HttpClient {
    pub fn new(config: &GlobalConfig) -> ScanResult<Self> {
        let default_timeout = Duration::from_secs(config.fetch_timeout.max(1));
        let direct = Self::builder(config)?
            .build()
            .map_err(|e| ScanError::Config(format!("could not build HTTP client: {}", e)))?;

        let proxied = match &config.proxy {
            Some(proxy) if !proxy.addr.is_empty() => {
                let p = Proxy::all(proxy.proxy_url()).map_err(|e| {
                    ScanError::Config(format!("invalid proxy configuration: {}", e))
                })?;
                Some(
                    Self::builder(config)?
                        .proxy(p)
                        .build()
                        .map_err(|e| {
                            ScanError::Config(format!("could not build proxied client: {}", e))
                        })?,
                )
            }
            _ => None,
        };

        let proxy_host = config
            .proxy
            .as_ref()
            .filter(|p| !p.addr.is_empty())
            .map(|p| p.addr.trim_end_matches('.').to_lowercase());

        Ok(HttpClient {
            direct,
            proxied,
            proxy_host,
            default_timeout,
            user_agent: config.user_agent.clone(),
        })
    }

    fn builder(config: &GlobalConfig) -> ScanResult<reqwest::ClientBuilder> {
        Ok(reqwest::Client::builder()
            .cookie_store(true)
            .redirect(Policy::limited(10))
            .danger_accept_invalid_certs(!config.verify_tls)
            .user_agent(config.user_agent.clone()))
    }

    /// Whether a URL should go through the configured proxy. Local and
    /// LAN destinations never do, so an internal scan cannot leak through
    /// an external SOCKS endpoint.
    pub fn use_proxy_for_url(&self, url: &str) -> bool {
        if self.proxied.is_none() {
            return false;
        }
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return false,
        };
        let host = match parsed.host_str() {
            Some(h) => h.trim_end_matches('.').to_lowercase(),
            None => return false,
        };
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".arpa") {
            return false;
        }
        // Talking to the proxy endpoint itself never goes through it.
        if self.proxy_host.as_deref() == Some(host.as_str()) {
            return false;
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return crate::scope::is_public_ip(&ip.to_string());
        }
        true
    }

    /// Fetch a URL. Only http and https schemes are attempted; anything
    /// else yields None so callers can skip mailto:, ftp: and friends
    /// found in page content.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> ScanResult<Option<HttpResponse>> {
        let parsed = match Url::parse(url.trim()) {
            Ok(u) => u,
            Err(e) => {
                return Err(ScanError::InvalidInput(format!(
                    "could not parse URL {}: {}",
                    remove_url_creds(url),
                    e
                )))
            }
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            debug!(url = %remove_url_creds(url), scheme = parsed.scheme(), "skipping non-web URL");
            return Ok(None);
        }

        let client = if self.use_proxy_for_url(url) {
            self.proxied.as_ref().unwrap_or(&self.direct)
        } else {
            &self.direct
        };

        let method = if options.head_only {
            Method::HEAD
        } else if options.post_data.is_some() {
            Method::POST
        } else {
            Method::GET
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ScanError::InvalidInput(format!("invalid header name: {}", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ScanError::InvalidInput(format!("invalid header value for {}", name))
            })?;
            headers.insert(name, value);
        }
        if let Some(cookies) = &options.cookies {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookies).map_err(|_| {
                    ScanError::InvalidInput("invalid cookie value".to_string())
                })?,
            );
        }
        if let Some(agent) = &options.user_agent {
            headers.insert(
                USER_AGENT,
                HeaderValue::from_str(agent).map_err(|_| {
                    ScanError::InvalidInput("invalid user agent".to_string())
                })?,
            );
        }

        let mut request = client
            .request(method, parsed)
            .headers(headers)
            .timeout(options.timeout.unwrap_or(self.default_timeout));
        if let Some(body) = &options.post_data {
            request = request.body(body.clone());
        }

        let safe_url = remove_url_creds(url);
        if !options.no_log {
            debug!(url = %safe_url, "fetching");
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                // reqwest error text embeds the request URL, credentials
                // included, so it gets scrubbed like the URL itself.
                let reason = remove_url_creds(&e.to_string());
                if options.fatal {
                    return Err(ScanError::Fatal(format!(
                        "could not fetch {}: {}",
                        safe_url, reason
                    )));
                }
                if !options.no_log {
                    warn!(url = %safe_url, "fetch failed: {}", reason);
                }
                return Ok(Some(HttpResponse::transport_failure(url, reason)));
            }
        };

        let code = response.status().as_u16();
        let status = response
            .status()
            .canonical_reason()
            .unwrap_or("unknown")
            .to_string();
        let real_url = remove_url_creds(response.url().as_str());
        let mut header_map = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                header_map.insert(name.as_str().to_lowercase(), v.to_string());
            }
        }

        if options.head_only {
            return Ok(Some(HttpResponse {
                code: Some(code),
                status,
                content: None,
                headers: header_map,
                real_url,
                truncated: false,
            }));
        }

        let (content, truncated) = match options.size_limit {
            Some(limit) => read_capped(response, limit).await?,
            None => {
                let body = response.bytes().await.map_err(|e| {
                    ScanError::Transport(format!("could not read body from {}: {}", safe_url, e))
                })?;
                (String::from_utf8_lossy(&body).into_owned(), false)
            }
        };

        Ok(Some(HttpResponse {
            code: Some(code),
            status: if truncated { "truncated".to_string() } else { status },
            content: Some(content),
            headers: header_map,
            real_url,
            truncated,
        }))
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> ScanResult<(String, bool)> {
    let mut buf: Vec<u8> = Vec::with_capacity(limit.min(64 * 1024));
    let mut truncated = false;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ScanError::Transport(format!("body read failed: {}", e)))?
    {
        if buf.len() + chunk.len() > limit {
            buf.extend_from_slice(&chunk[..limit - buf.len()]);
            truncated = true;
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

impl ProxyConfig {
    /// SOCKS URL for reqwest, with credentials when configured.
    pub fn proxy_url(&self) -> String {
        let scheme = match self.kind.as_str() {
            "socks4" => "socks4",
            _ => "socks5h",
        };
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() => {
                format!("{}://{}:{}@{}:{}", scheme, user, pass, self.addr, self.port)
            }
            _ => format!("{}://{}:{}", scheme, self.addr, self.port),
        }
    }
}
