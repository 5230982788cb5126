// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use skopos::cache::Cache;
use skopos::config::GlobalConfig;
use skopos::error::{ScanError, ScanResult};
use skopos::http::{FetchOptions, HttpClient};
use skopos::plugins;
use skopos::scope::{self, TldTable};
use skopos::{EventType, ScanState, Scanner, Services, Target, TargetKind};

#[derive(Parser)]
#[command(name = "skopos", version, about = "OSINT reconnaissance engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scan against a target
    Scan {
        /// Target value: domain, hostname, IP, netblock, email, ...
        target: String,

        /// Target kind; guessed from the value when omitted
        #[arg(short = 'k', long = "kind")]
        kind: Option<TargetKind>,

        /// Comma-separated plugin names; dependencies are pulled in
        /// automatically. All plugins run when omitted.
        #[arg(short, long, value_delimiter = ',')]
        modules: Vec<String>,

        /// Print events as JSON records instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List available plugins
    Modules,
    /// List the event type ontology
    Types,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> ScanResult<()> {
    match cli.command {
        Command::Modules => {
            for plugin in plugins::registry() {
                let meta = plugin.meta();
                println!("{:<24} {}", meta.name, meta.description);
            }
            Ok(())
        }
        Command::Types => {
            for t in EventType::all() {
                println!("{}", t.as_str());
            }
            Ok(())
        }
        Command::Scan {
            target,
            kind,
            modules,
            json,
        } => {
            let mut config = GlobalConfig::load(cli.config.as_deref())?;
            if cli.debug {
                config.debug = true;
            }
            scan(config, &target, kind, &modules, json).await
        }
    }
}

async fn scan(
    config: GlobalConfig,
    target_value: &str,
    kind: Option<TargetKind>,
    modules: &[String],
    json: bool,
) -> ScanResult<()> {
    let tlds = load_tld_table(&config).await?;

    let kind = match kind {
        Some(kind) => kind,
        None => guess_target_kind(target_value, &tlds)?,
    };
    let target = Target::new(target_value, kind)?;

    let available = plugins::registry();
    let selected = if modules.is_empty() {
        available
    } else {
        Scanner::resolve_plugins(available, modules)?
    };

    let plugin_opts = config.plugin_opts.clone();
    let services = Arc::new(Services::new(config, tlds)?);

    // First Ctrl-C asks the scan to wind down; handlers see the flag at
    // their next poll.
    let stop_services = Arc::clone(&services);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping scan");
            stop_services.request_stop();
        }
    });

    let mut scanner = Scanner::new(Arc::clone(&services), target);
    for plugin in selected {
        let overrides = plugin_opts.get(plugin.meta().name).cloned();
        scanner.register(plugin, overrides);
    }

    let summary = scanner.run().await?;

    for event in &summary.events {
        if event.is_root() {
            continue;
        }
        if json {
            println!("{}", serde_json::to_string(&event.to_record())?);
        } else {
            println!(
                "{:<28} {:<20} {}",
                event.event_type().as_str(),
                event.module(),
                event.data()
            );
        }
    }

    info!(
        state = %summary.state,
        events = summary.events.len(),
        "scan {}",
        if summary.state == ScanState::Finished {
            "finished"
        } else {
            "ended early"
        }
    );
    if !summary.errored_plugins.is_empty() {
        warn!("plugins in error state: {}", summary.errored_plugins.join(", "));
    }
    Ok(())
}

/// Load the public-suffix table: from a local file if the configured
/// source is a path, otherwise fetched over HTTP through the cache.
async fn load_tld_table(config: &GlobalConfig) -> ScanResult<TldTable> {
    let source = config.internet_tlds.as_str();
    if !source.starts_with("http://") && !source.starts_with("https://") {
        return TldTable::load(std::path::Path::new(source));
    }

    let cache_root = config
        .cache_dir
        .clone()
        .unwrap_or_else(Cache::default_root);
    let cache = Cache::new(cache_root)?;
    if let Some(data) = cache.get_str("internet_tlds", config.tld_cache_hours) {
        let table = TldTable::parse(&data);
        if !table.is_empty() {
            return Ok(table);
        }
    }

    info!(source, "fetching TLD list");
    let http = HttpClient::new(config)?;
    let response = http
        .fetch(source, &FetchOptions::new())
        .await?
        .ok_or_else(|| ScanError::Fatal("TLD list source is not a web URL".to_string()))?;
    let body = match (response.code, response.content) {
        (Some(200), Some(body)) => body,
        (code, _) => {
            return Err(ScanError::Fatal(format!(
                "could not fetch TLD list: {:?} {}",
                code, response.status
            )))
        }
    };
    let table = TldTable::parse(&body);
    if table.is_empty() {
        return Err(ScanError::Fatal("fetched TLD list contained no entries".to_string()));
    }
    cache.put("internet_tlds", body.as_bytes())?;
    Ok(table)
}

/// Infer the target kind from its shape, the way a user typing a bare
/// value expects.
fn guess_target_kind(value: &str, tlds: &TldTable) -> ScanResult<TargetKind> {
    if scope::valid_ip(value) {
        return Ok(TargetKind::IpAddress);
    }
    if scope::valid_ip6(value) {
        return Ok(TargetKind::Ipv6Address);
    }
    if scope::valid_ip_network(value) {
        return Ok(TargetKind::Netblock);
    }
    if value.contains('@') {
        return Ok(TargetKind::EmailAddr);
    }
    if tlds.is_domain(value) {
        return Ok(TargetKind::DomainName);
    }
    if tlds.is_valid_host(value) {
        return Ok(TargetKind::InternetName);
    }
    Err(ScanError::InvalidInput(format!(
        "could not infer a target kind for {:?}; pass --kind",
        value
    )))
}
