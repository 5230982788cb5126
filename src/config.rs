// src/config.rs - global settings and per-plugin option handling
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ScanError, ScanResult};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:115.0) Gecko/20100101 Firefox/115.0";

const DEFAULT_TLD_SOURCE: &str = "https://publicsuffix.org/list/effective_tld_names.dat";

/// SOCKS proxy settings for outbound HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// "socks5" or "socks4".
    #[serde(default = "default_proxy_kind")]
    pub kind: String,
    pub addr: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_proxy_kind() -> String {
    "socks5".to_string()
}

fn default_proxy_port() -> u16 {
    1080
}

/// Scan-wide settings, loaded from a TOML file with environment
/// overrides (`SKOPOS_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub fetch_timeout: u64,
    pub verify_tls: bool,
    pub proxy: Option<ProxyConfig>,
    /// Where to fetch the public-suffix list from, or a local file path.
    pub internet_tlds: String,
    /// How long a cached TLD list stays fresh.
    pub tld_cache_hours: u64,
    pub cache_dir: Option<PathBuf>,
    /// Mailbox names too generic to treat as belonging to the target.
    pub generic_users: Vec<String>,
    pub debug: bool,
    /// Per-plugin option overrides, keyed by plugin name.
    pub plugin_opts: HashMap<String, HashMap<String, OptValue>>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout: 5,
            verify_tls: true,
            proxy: None,
            internet_tlds: DEFAULT_TLD_SOURCE.to_string(),
            tld_cache_hours: 72,
            cache_dir: None,
            generic_users: default_generic_users(),
            debug: false,
            plugin_opts: HashMap::new(),
        }
    }
}

fn default_generic_users() -> Vec<String> {
    [
        "abuse", "admin", "billing", "compliance", "devnull", "dns", "ftp", "hostmaster",
        "inoc", "ispfeedback", "ispsupport", "list", "list-request", "maildaemon",
        "marketing", "noc", "no-reply", "noreply", "null", "peering", "phish", "phishing",
        "postmaster", "privacy", "registrar", "registry", "root", "sales", "security",
        "spam", "support", "sysadmin", "tech", "unsubscribe", "usenet", "uucp",
        "webmaster", "www",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl GlobalConfig {
    /// Load from an explicit file, falling back to the per-user config
    /// directory, with environment variables layered on top.
    pub fn load(path: Option<&Path>) -> ScanResult<Self> {
        let mut builder = Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path.to_path_buf()));
            }
            None => {
                if let Some(default_path) = Self::default_path() {
                    builder = builder.add_source(File::from(default_path).required(false));
                }
            }
        }
        builder = builder.add_source(
            Environment::with_prefix("SKOPOS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ScanError::Config(format!("could not load configuration: {}", e)))?;
        let loaded: GlobalConfig = config
            .try_deserialize()
            .map_err(|e| ScanError::Config(format!("invalid configuration: {}", e)))?;
        debug!(debug = loaded.debug, timeout = loaded.fetch_timeout, "configuration loaded");
        Ok(loaded)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("skopos").join("config.toml"))
    }

    /// Whether a mailbox name is too generic to attribute to the target.
    pub fn is_generic_user(&self, mailbox: &str) -> bool {
        let mailbox = mailbox.to_lowercase();
        self.generic_users.iter().any(|g| *g == mailbox)
    }
}

/// A single plugin option value. Untagged so TOML option tables read
/// naturally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl OptValue {
    fn kind(&self) -> &'static str {
        match self {
            OptValue::Bool(_) => "boolean",
            OptValue::Int(_) => "integer",
            OptValue::Str(_) => "string",
        }
    }
}

impl From<bool> for OptValue {
    fn from(v: bool) -> Self {
        OptValue::Bool(v)
    }
}

impl From<i64> for OptValue {
    fn from(v: i64) -> Self {
        OptValue::Int(v)
    }
}

impl From<&str> for OptValue {
    fn from(v: &str) -> Self {
        OptValue::Str(v.to_string())
    }
}

/// Options handed to one plugin instance: its declared defaults with
/// user overrides merged in. Overrides must name a declared key and
/// carry the declared type.
#[derive(Debug, Clone, Default)]
pub struct PluginOpts {
    values: HashMap<String, OptValue>,
}

impl PluginOpts {
    pub fn from_defaults(defaults: HashMap<String, OptValue>) -> Self {
        PluginOpts { values: defaults }
    }

    pub fn apply_overrides(
        &mut self,
        plugin: &str,
        overrides: &HashMap<String, OptValue>,
    ) -> ScanResult<()> {
        for (key, value) in overrides {
            match self.values.get(key) {
                None => {
                    return Err(ScanError::UnknownOption {
                        plugin: plugin.to_string(),
                        key: key.clone(),
                    })
                }
                Some(existing) if existing.kind() != value.kind() => {
                    return Err(ScanError::Config(format!(
                        "option {} of plugin {} expects a {}, got a {}",
                        key,
                        plugin,
                        existing.kind(),
                        value.kind()
                    )))
                }
                Some(_) => {
                    self.values.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(OptValue::Bool(true)))
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(OptValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(OptValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}
