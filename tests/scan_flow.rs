// tests/scan_flow.rs - end-to-end scan behaviour with scripted DNS
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use skopos::config::{GlobalConfig, PluginOpts};
use skopos::dns::DnsLookup;
use skopos::error::ScanResult;
use skopos::plugins::DnsResolvePlugin;
use skopos::scope::TldTable;
use skopos::{
    Event, EventSink, EventType, Plugin, PluginMeta, ScanState, Scanner, Services, Target,
    TargetKind, Watch,
};

/// DNS backend with canned answers; anything unscripted resolves to
/// nothing.
#[derive(Default)]
struct ScriptedDns {
    a: HashMap<String, Vec<String>>,
    ptr: HashMap<IpAddr, Vec<String>>,
}

#[async_trait]
impl DnsLookup for ScriptedDns {
    async fn lookup_a(&self, name: &str) -> ScanResult<Vec<String>> {
        Ok(self.a.get(name).cloned().unwrap_or_default())
    }

    async fn lookup_aaaa(&self, _name: &str) -> ScanResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn lookup_ptr(&self, ip: IpAddr) -> ScanResult<Vec<String>> {
        Ok(self.ptr.get(&ip).cloned().unwrap_or_default())
    }
}

fn build_services(tlds: &str, dns: ScriptedDns) -> Arc<Services> {
    let config = GlobalConfig {
        cache_dir: Some(tempfile::tempdir().unwrap().into_path()),
        ..Default::default()
    };
    Arc::new(Services::with_dns_backend(config, TldTable::parse(tlds), Arc::new(dns)).unwrap())
}

/// Emits the hostnames a mock search service "returned", subject to
/// scope matching, the way a search collector would.
struct MockSearchPlugin {
    results: Vec<&'static str>,
    target: Option<Arc<Target>>,
}

#[async_trait]
impl Plugin for MockSearchPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new("mock_search", "emits canned search results")
    }
    fn watched_events(&self) -> Watch {
        Watch::Events(vec![EventType::DomainName])
    }
    fn produced_events(&self) -> Vec<EventType> {
        vec![EventType::InternetName]
    }
    async fn setup(&mut self, _services: Arc<Services>, _opts: &PluginOpts) -> ScanResult<()> {
        Ok(())
    }
    fn set_target(&mut self, target: Arc<Target>) {
        self.target = Some(target);
    }
    async fn handle_event(&mut self, _event: &Arc<Event>, sink: &mut EventSink) -> ScanResult<()> {
        let target = self.target.as_ref().expect("target injected");
        for host in &self.results {
            if target.matches(host, true, false) {
                sink.emit(EventType::InternetName, *host)?;
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn scope_filters_search_results() {
    let services = build_services("net\ncom\nexample\n", ScriptedDns::default());
    let target = Target::new("osprey.net", TargetKind::DomainName).unwrap();
    let mut scanner = Scanner::new(services, target);
    scanner.register(
        Box::new(MockSearchPlugin {
            results: vec!["a.osprey.net", "b.osprey.net", "evil.example"],
            target: None,
        }),
        None,
    );

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.state, ScanState::Finished);

    let found: Vec<&str> = summary
        .events
        .iter()
        .filter(|e| e.event_type() == EventType::InternetName && e.module() == "mock_search")
        .map(|e| e.data())
        .collect();
    assert_eq!(found, vec!["a.osprey.net", "b.osprey.net"]);
}

#[tokio::test]
async fn cohosted_sites_require_forward_verification() {
    let ip: IpAddr = "1.1.1.1".parse().unwrap();
    let mut dns = ScriptedDns::default();
    dns.ptr.insert(
        ip,
        vec!["one.one.one.one".to_string(), "cloudflare.example".to_string()],
    );
    // Forward lookups: only one.one.one.one still points at the target.
    dns.a.insert("one.one.one.one".to_string(), vec!["1.1.1.1".to_string()]);
    dns.a.insert("cloudflare.example".to_string(), vec!["8.8.8.8".to_string()]);

    let services = build_services("one\nexample\ncom\n", dns);
    let target = Target::new("1.1.1.1", TargetKind::IpAddress).unwrap();
    let mut scanner = Scanner::new(services, target);
    scanner.register(Box::new(DnsResolvePlugin::new()), None);

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.state, ScanState::Finished);

    let cohosted = summary.events_of_type(EventType::CoHostedSite);
    assert_eq!(cohosted.len(), 1);
    assert_eq!(cohosted[0].data(), "one.one.one.one");
}

struct EmailEmitter;

#[async_trait]
impl Plugin for EmailEmitter {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new("email_emitter", "emits one address")
    }
    fn watched_events(&self) -> Watch {
        Watch::Events(vec![EventType::DomainName])
    }
    fn produced_events(&self) -> Vec<EventType> {
        vec![EventType::EmailAddr]
    }
    async fn setup(&mut self, _services: Arc<Services>, _opts: &PluginOpts) -> ScanResult<()> {
        Ok(())
    }
    fn set_target(&mut self, _target: Arc<Target>) {}
    async fn handle_event(&mut self, _event: &Arc<Event>, sink: &mut EventSink) -> ScanResult<()> {
        sink.emit(EventType::EmailAddr, "a@example.com")
    }
}

/// Pretends every address it sees has a positive breach lookup.
struct BreachChecker;

#[async_trait]
impl Plugin for BreachChecker {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new("breach_checker", "flags compromised addresses")
    }
    fn watched_events(&self) -> Watch {
        Watch::Events(vec![EventType::EmailAddr])
    }
    fn produced_events(&self) -> Vec<EventType> {
        vec![EventType::EmailAddrCompromised]
    }
    async fn setup(&mut self, _services: Arc<Services>, _opts: &PluginOpts) -> ScanResult<()> {
        Ok(())
    }
    fn set_target(&mut self, _target: Arc<Target>) {}
    async fn handle_event(&mut self, event: &Arc<Event>, sink: &mut EventSink) -> ScanResult<()> {
        sink.emit(EventType::EmailAddrCompromised, event.data())
    }
}

async fn run_breach_scan() -> Vec<String> {
    let services = build_services("com\n", ScriptedDns::default());
    let target = Target::new("example.com", TargetKind::DomainName).unwrap();
    let mut scanner = Scanner::new(services, target);
    scanner.register(Box::new(EmailEmitter), None);
    scanner.register(Box::new(BreachChecker), None);

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.state, ScanState::Finished);
    assert_eq!(summary.events_of_type(EventType::EmailAddr).len(), 1);
    assert_eq!(summary.events_of_type(EventType::EmailAddrCompromised).len(), 1);

    summary
        .events
        .iter()
        .filter(|e| !e.is_root())
        .map(|e| e.hash().to_string())
        .collect()
}

#[tokio::test]
async fn breach_chain_is_deterministic() {
    let first = run_breach_scan().await;
    let second = run_breach_scan().await;
    assert_eq!(first, second);
}

/// Requests cancellation from inside its own handler, after emitting.
struct Stopper {
    services: Option<Arc<Services>>,
}

#[async_trait]
impl Plugin for Stopper {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new("stopper", "stops the scan mid-flight")
    }
    fn watched_events(&self) -> Watch {
        Watch::Events(vec![EventType::DomainName])
    }
    fn produced_events(&self) -> Vec<EventType> {
        vec![EventType::InternetName]
    }
    async fn setup(&mut self, services: Arc<Services>, _opts: &PluginOpts) -> ScanResult<()> {
        self.services = Some(services);
        Ok(())
    }
    fn set_target(&mut self, _target: Arc<Target>) {}
    async fn handle_event(&mut self, _event: &Arc<Event>, sink: &mut EventSink) -> ScanResult<()> {
        sink.emit(EventType::InternetName, "a.example.com")?;
        sink.emit(EventType::InternetName, "b.example.com")?;
        self.services.as_ref().unwrap().request_stop();
        Ok(())
    }
}

struct CountingRecorder {
    count: Arc<Mutex<usize>>,
}

#[async_trait]
impl Plugin for CountingRecorder {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new("counter", "counts deliveries")
    }
    fn watched_events(&self) -> Watch {
        Watch::Events(vec![EventType::InternetName])
    }
    fn produced_events(&self) -> Vec<EventType> {
        vec![EventType::RawRirData]
    }
    async fn setup(&mut self, _services: Arc<Services>, _opts: &PluginOpts) -> ScanResult<()> {
        Ok(())
    }
    fn set_target(&mut self, _target: Arc<Target>) {}
    async fn handle_event(&mut self, _event: &Arc<Event>, _sink: &mut EventSink) -> ScanResult<()> {
        *self.count.lock() += 1;
        Ok(())
    }
}

#[tokio::test]
async fn cancellation_halts_dispatch_but_keeps_events() {
    let services = build_services("com\n", ScriptedDns::default());
    let target = Target::new("example.com", TargetKind::DomainName).unwrap();
    let mut scanner = Scanner::new(services, target);
    let count = Arc::new(Mutex::new(0usize));
    scanner.register(Box::new(Stopper { services: None }), None);
    scanner.register(
        Box::new(CountingRecorder {
            count: Arc::clone(&count),
        }),
        None,
    );

    let summary = scanner.run().await.unwrap();
    assert_eq!(summary.state, ScanState::Aborted);
    // No handler started after the stop was requested.
    assert_eq!(*count.lock(), 0);
    // The emitted events remain observable in the summary.
    let emitted: HashSet<&str> = summary
        .events_of_type(EventType::InternetName)
        .iter()
        .map(|e| e.data())
        .collect();
    assert!(emitted.contains("a.example.com"));
    assert!(emitted.contains("b.example.com"));
}
