// src/scanner.rs - scan lifecycle and event dispatch
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::OptValue;
use crate::error::{ScanError, ScanResult};
use crate::event::{Event, EventType, ROOT_HASH};
use crate::plugin::{merge_plugin_opts, EventSink, Plugin, PluginMeta, Watch};
use crate::services::Services;
use crate::target::Target;

/// Module name stamped on the seed events the scanner itself emits.
pub const SCANNER_MODULE: &str = "skopos";

/// Scan lifecycle states. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Created,
    Running,
    Finished,
    Aborted,
    Failed,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanState::Created => "CREATED",
            ScanState::Running => "RUNNING",
            ScanState::Finished => "FINISHED",
            ScanState::Aborted => "ABORTED",
            ScanState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What a finished scan hands back: terminal state, every event that
/// was dispatched (in dispatch order), and the plugins that ended in a
/// sticky error state.
pub struct ScanSummary {
    pub state: ScanState,
    pub events: Vec<Arc<Event>>,
    pub errored_plugins: Vec<String>,
}

impl ScanSummary {
    pub fn events_of_type(&self, event_type: EventType) -> Vec<&Arc<Event>> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }
}

struct PluginSlot {
    plugin: Box<dyn Plugin>,
    meta: PluginMeta,
    watch: Watch,
    produced: Vec<EventType>,
    overrides: Option<HashMap<String, OptValue>>,
    /// Delivery dedupe, keyed by event hash. Owned here so plugins
    /// cannot accidentally defeat the at-most-once guarantee.
    seen: HashSet<String>,
}

/// Owns the plugin set and pumps the event bus until quiescence or
/// cancellation. Single logical thread: one `handle_event` runs at a
/// time, and everything a handler emits is drained depth-first before
/// the next sibling delivery.
pub struct Scanner {
    services: Arc<Services>,
    target: Arc<Target>,
    slots: Vec<PluginSlot>,
    events: Vec<Arc<Event>>,
    state: ScanState,
}

impl Scanner {
    pub fn new(services: Arc<Services>, target: Target) -> Self {
        Scanner {
            services,
            target: Arc::new(target),
            slots: Vec::new(),
            events: Vec::new(),
            state: ScanState::Created,
        }
    }

    /// Register a plugin, optionally with user option overrides. The
    /// overrides are validated against the plugin's declared defaults
    /// during setup.
    pub fn register(
        &mut self,
        plugin: Box<dyn Plugin>,
        overrides: Option<HashMap<String, OptValue>>,
    ) {
        let meta = plugin.meta();
        let watch = plugin.watched_events();
        let produced = plugin.produced_events();
        self.slots.push(PluginSlot {
            plugin,
            meta,
            watch,
            produced,
            overrides,
            seen: HashSet::new(),
        });
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    /// Select the plugins to run: the requested ones plus, transitively,
    /// every available plugin that produces an event type some selected
    /// plugin consumes.
    pub fn resolve_plugins(
        available: Vec<Box<dyn Plugin>>,
        requested: &[String],
    ) -> ScanResult<Vec<Box<dyn Plugin>>> {
        let mut pool: Vec<Option<Box<dyn Plugin>>> = available.into_iter().map(Some).collect();
        let mut selected: Vec<Box<dyn Plugin>> = Vec::new();

        for name in requested {
            let idx = pool
                .iter()
                .position(|p| p.as_deref().map(|p| p.meta().name) == Some(name.as_str()))
                .ok_or_else(|| ScanError::PluginNotFound(name.clone()))?;
            selected.push(pool[idx].take().expect("slot just located"));
        }

        loop {
            let wanted: Vec<EventType> = selected
                .iter()
                .flat_map(|p| match p.watched_events() {
                    Watch::All => EventType::all().to_vec(),
                    Watch::Events(types) => types,
                })
                .collect();
            let idx = pool.iter().position(|p| {
                p.as_deref()
                    .map(|p| p.produced_events().iter().any(|t| wanted.contains(t)))
                    .unwrap_or(false)
            });
            match idx {
                Some(idx) => {
                    let plugin = pool[idx].take().expect("slot just located");
                    debug!(plugin = plugin.meta().name, "pulled in as dependency");
                    selected.push(plugin);
                }
                None => break,
            }
        }
        Ok(selected)
    }

    /// Sanity-check the listener graph before running: watched types no
    /// selected plugin produces and produced types nothing consumes are
    /// worth a warning, not an error.
    fn validate_graph(&self) {
        let mut produced: HashSet<EventType> = HashSet::new();
        produced.insert(EventType::Root);
        produced.insert(self.target.kind().seed_event_type());
        produced.insert(EventType::DomainName);
        produced.insert(EventType::InternetName);
        for slot in &self.slots {
            produced.extend(slot.produced.iter().copied());
        }

        let mut watched: HashSet<EventType> = HashSet::new();
        let mut wildcard = false;
        for slot in &self.slots {
            match &slot.watch {
                Watch::All => wildcard = true,
                Watch::Events(types) => watched.extend(types.iter().copied()),
            }
            for t in types_not_in(&slot.watch, &produced) {
                warn!(
                    plugin = slot.meta.name,
                    event_type = t.as_str(),
                    "watched event type is produced by no selected plugin"
                );
            }
        }
        if !wildcard {
            for slot in &self.slots {
                for t in &slot.produced {
                    if !watched.contains(t) {
                        debug!(
                            plugin = slot.meta.name,
                            event_type = t.as_str(),
                            "produced event type has no consumer"
                        );
                    }
                }
            }
        }
    }

    /// Run the scan to completion. Setup failures abort before any event
    /// is dispatched; handler failures stay local to the plugin.
    pub async fn run(&mut self) -> ScanResult<ScanSummary> {
        if self.state != ScanState::Created {
            return Err(ScanError::Unexpected(format!(
                "scan already ran (state {})",
                self.state
            )));
        }
        self.state = ScanState::Running;
        info!(
            scan_id = %self.services.scan_id,
            target = self.target.value(),
            kind = self.target.kind().as_str(),
            plugins = self.slots.len(),
            "scan starting"
        );

        self.validate_graph();

        // Lower priority number dispatches first; registration order
        // breaks ties.
        self.slots.sort_by_key(|s| s.meta.priority);

        for slot in &mut self.slots {
            let opts = match merge_plugin_opts(slot.plugin.as_ref(), slot.overrides.as_ref()) {
                Ok(opts) => opts,
                Err(e) => {
                    self.state = ScanState::Failed;
                    return Err(e);
                }
            };
            if let Err(e) = slot.plugin.setup(Arc::clone(&self.services), &opts).await {
                error!(plugin = slot.meta.name, "setup failed: {}", e);
                self.state = ScanState::Failed;
                return Err(e);
            }
            slot.plugin.set_target(Arc::clone(&self.target));
        }

        let root = Event::root(self.target.value());
        self.dispatch(Arc::clone(&root)).await;

        if !self.services.stop_requested() {
            let seed_type = self.target.kind().seed_event_type();
            self.seed(seed_type, &root).await;
            // A name target that is itself a registrable domain also
            // seeds DOMAIN_NAME, and a domain target is a name too.
            match seed_type {
                EventType::InternetName
                    if self.services.tlds.is_domain(self.target.value()) =>
                {
                    self.seed(EventType::DomainName, &root).await;
                }
                EventType::DomainName => {
                    self.seed(EventType::InternetName, &root).await;
                }
                _ => {}
            }
        }

        for slot in &mut self.slots {
            if let Err(e) = slot.plugin.teardown().await {
                warn!(plugin = slot.meta.name, "teardown failed: {}", e);
            }
        }

        self.state = if self.services.stop_requested() {
            ScanState::Aborted
        } else {
            ScanState::Finished
        };
        let errored: Vec<String> = self
            .slots
            .iter()
            .filter(|s| s.plugin.error_state())
            .map(|s| s.meta.name.to_string())
            .collect();
        info!(
            scan_id = %self.services.scan_id,
            state = %self.state,
            events = self.events.len(),
            errored = errored.len(),
            "scan complete"
        );
        Ok(ScanSummary {
            state: self.state,
            events: std::mem::take(&mut self.events),
            errored_plugins: errored,
        })
    }

    async fn seed(&mut self, event_type: EventType, root: &Arc<Event>) {
        match Event::new(event_type, self.target.value(), SCANNER_MODULE, Arc::clone(root)) {
            Ok(event) => self.dispatch(Arc::new(event)).await,
            Err(e) => error!("could not build seed event: {}", e),
        }
    }

    /// Deliver one event to every matching plugin, draining each
    /// handler's emissions recursively before the next plugin sees the
    /// event. This gives the depth-first, parent-before-sibling order
    /// that downstream dedupe and tests rely on.
    fn dispatch<'a>(
        &'a mut self,
        event: Arc<Event>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.events.push(Arc::clone(&event));

            // An event whose data already appears in its own ancestry adds
            // no information and would loop; keep it observable but do not
            // route it.
            if ancestry_repeats(&event) {
                debug!(
                    event_type = event.event_type().as_str(),
                    data = event.data(),
                    "suppressing re-discovered ancestor"
                );
                return;
            }

            for idx in 0..self.slots.len() {
                if self.services.stop_requested() {
                    debug!("stop requested, halting dispatch");
                    return;
                }
                let emitted = {
                    let slot = &mut self.slots[idx];
                    if slot.plugin.error_state() {
                        continue;
                    }
                    if !slot.watch.covers(event.event_type()) {
                        continue;
                    }
                    // A plugin never hears its own output.
                    if slot.meta.name == event.module() {
                        continue;
                    }
                    if event.hash() != ROOT_HASH && !slot.seen.insert(event.hash().to_string()) {
                        continue;
                    }

                    let mut sink = EventSink::new(slot.meta.name, Arc::clone(&event));
                    match slot.plugin.handle_event(&event, &mut sink).await {
                        Ok(()) => sink.into_events(),
                        Err(e @ ScanError::Fatal(_)) => {
                            error!(plugin = slot.meta.name, "fatal error, aborting scan: {}", e);
                            self.services.request_stop();
                            return;
                        }
                        Err(e) => {
                            error!(
                                plugin = slot.meta.name,
                                event_hash = event.hash(),
                                "handler failed: {}",
                                e
                            );
                            Vec::new()
                        }
                    }
                };
                for child in emitted {
                    self.dispatch(Arc::new(child)).await;
                }
            }
        })
    }
}

fn types_not_in(watch: &Watch, produced: &HashSet<EventType>) -> Vec<EventType> {
    match watch {
        Watch::All => Vec::new(),
        Watch::Events(types) => types
            .iter()
            .copied()
            .filter(|t| !produced.contains(t))
            .collect(),
    }
}

fn ancestry_repeats(event: &Event) -> bool {
    event.ancestors().any(|ancestor| {
        ancestor.event_type() != EventType::Root
            && ancestor.event_type() == event.event_type()
            && ancestor.data() == event.data()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::scope::TldTable;
    use crate::target::TargetKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn test_services() -> Arc<Services> {
        let dir = tempfile::tempdir().unwrap();
        let config = GlobalConfig {
            cache_dir: Some(dir.into_path()),
            ..Default::default()
        };
        Arc::new(Services::new(config, TldTable::parse("com\nnet\n")).unwrap())
    }

    /// Emits a fixed list of events whenever a watched event arrives.
    struct Emitter {
        name: &'static str,
        watches: Vec<EventType>,
        emits: Vec<(EventType, String)>,
    }

    #[async_trait]
    impl Plugin for Emitter {
        fn meta(&self) -> PluginMeta {
            PluginMeta::new(self.name, "emits fixed events")
        }
        fn watched_events(&self) -> Watch {
            Watch::Events(self.watches.clone())
        }
        fn produced_events(&self) -> Vec<EventType> {
            self.emits.iter().map(|(t, _)| *t).collect()
        }
        async fn setup(
            &mut self,
            _services: Arc<Services>,
            _opts: &crate::config::PluginOpts,
        ) -> ScanResult<()> {
            Ok(())
        }
        fn set_target(&mut self, _target: Arc<Target>) {}
        async fn handle_event(
            &mut self,
            _event: &Arc<Event>,
            sink: &mut EventSink,
        ) -> ScanResult<()> {
            for (t, data) in &self.emits {
                sink.emit(*t, data.clone())?;
            }
            Ok(())
        }
    }

    /// Records every delivery it receives.
    struct Recorder {
        name: &'static str,
        watches: Watch,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn meta(&self) -> PluginMeta {
            PluginMeta::new(self.name, "records deliveries")
        }
        fn watched_events(&self) -> Watch {
            self.watches.clone()
        }
        fn produced_events(&self) -> Vec<EventType> {
            Vec::new()
        }
        async fn setup(
            &mut self,
            _services: Arc<Services>,
            _opts: &crate::config::PluginOpts,
        ) -> ScanResult<()> {
            Ok(())
        }
        fn set_target(&mut self, _target: Arc<Target>) {}
        async fn handle_event(
            &mut self,
            event: &Arc<Event>,
            _sink: &mut EventSink,
        ) -> ScanResult<()> {
            self.log
                .lock()
                .push(format!("{}:{}", event.event_type().as_str(), event.data()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_seed_events_for_domain_target() {
        let services = test_services();
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        let mut scanner = Scanner::new(services, target);
        let log = Arc::new(Mutex::new(Vec::new()));
        scanner.register(
            Box::new(Recorder {
                name: "recorder",
                watches: Watch::All,
                log: Arc::clone(&log),
            }),
            None,
        );
        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.state, ScanState::Finished);
        let log = log.lock();
        assert_eq!(
            *log,
            vec![
                "ROOT:example.com",
                "DOMAIN_NAME:example.com",
                "INTERNET_NAME:example.com",
            ]
        );
    }

    #[tokio::test]
    async fn test_depth_first_ordering() {
        let services = test_services();
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        let mut scanner = Scanner::new(services, target);
        let log = Arc::new(Mutex::new(Vec::new()));
        scanner.register(
            Box::new(Emitter {
                name: "producer",
                watches: vec![EventType::DomainName],
                emits: vec![
                    (EventType::InternetName, "a.example.com".to_string()),
                    (EventType::InternetName, "b.example.com".to_string()),
                ],
            }),
            None,
        );
        scanner.register(
            Box::new(Emitter {
                name: "expander",
                watches: vec![EventType::InternetName],
                emits: vec![(EventType::IpAddress, "192.0.2.1".to_string())],
            }),
            None,
        );
        scanner.register(
            Box::new(Recorder {
                name: "recorder",
                watches: Watch::Events(vec![EventType::InternetName, EventType::IpAddress]),
                log: Arc::clone(&log),
            }),
            None,
        );
        scanner.run().await.unwrap();
        let log = log.lock();
        // a.example.com and its descendants drain before b.example.com.
        let a_pos = log.iter().position(|l| l.ends_with("a.example.com")).unwrap();
        let ip_pos = log.iter().position(|l| l.starts_with("IP_ADDRESS")).unwrap();
        let b_pos = log.iter().position(|l| l.ends_with("b.example.com")).unwrap();
        assert!(a_pos < b_pos && ip_pos < b_pos);
    }

    #[tokio::test]
    async fn test_duplicate_hash_delivered_once() {
        let services = test_services();
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        let mut scanner = Scanner::new(services, target);
        let log = Arc::new(Mutex::new(Vec::new()));
        // Fires on both seed types, producing the same child event twice.
        scanner.register(
            Box::new(Emitter {
                name: "producer",
                watches: vec![EventType::DomainName, EventType::InternetName],
                emits: vec![(EventType::EmailAddr, "a@example.com".to_string())],
            }),
            None,
        );
        scanner.register(
            Box::new(Recorder {
                name: "recorder",
                watches: Watch::Events(vec![EventType::EmailAddr]),
                log: Arc::clone(&log),
            }),
            None,
        );
        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.state, ScanState::Finished);
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_plugin_never_hears_itself() {
        let services = test_services();
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        let mut scanner = Scanner::new(services, target);
        // Watches the type it produces; without the self-skip this would
        // only terminate through dedupe, and the handler would run twice.
        let log = Arc::new(Mutex::new(Vec::new()));
        scanner.register(
            Box::new(Emitter {
                name: "loop",
                watches: vec![EventType::InternetName],
                emits: vec![(EventType::InternetName, "x.example.com".to_string())],
            }),
            None,
        );
        scanner.register(
            Box::new(Recorder {
                name: "recorder",
                watches: Watch::Events(vec![EventType::InternetName]),
                log: Arc::clone(&log),
            }),
            None,
        );
        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.state, ScanState::Finished);
        // Seed plus one emission; the emitter saw only the seed.
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_plugins_pulls_dependencies() {
        let consumer: Box<dyn Plugin> = Box::new(Emitter {
            name: "consumer",
            watches: vec![EventType::IpAddress],
            emits: vec![],
        });
        let producer: Box<dyn Plugin> = Box::new(Emitter {
            name: "producer",
            watches: vec![EventType::DomainName],
            emits: vec![(EventType::IpAddress, "unused".to_string())],
        });
        let unrelated: Box<dyn Plugin> = Box::new(Emitter {
            name: "unrelated",
            watches: vec![EventType::BitcoinAddress],
            emits: vec![(EventType::GeoInfo, "unused".to_string())],
        });
        let selected = Scanner::resolve_plugins(
            vec![consumer, producer, unrelated],
            &["consumer".to_string()],
        )
        .unwrap();
        let names: Vec<&str> = selected.iter().map(|p| p.meta().name).collect();
        assert_eq!(names, vec!["consumer", "producer"]);
    }

    #[tokio::test]
    async fn test_unknown_plugin_rejected() {
        match Scanner::resolve_plugins(Vec::new(), &["nope".to_string()]) {
            Err(ScanError::PluginNotFound(name)) => assert_eq!(name, "nope"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected resolution to fail"),
        }
    }

    #[tokio::test]
    async fn test_handler_failure_stays_local() {
        struct Failing;
        #[async_trait]
        impl Plugin for Failing {
            fn meta(&self) -> PluginMeta {
                PluginMeta::new("failing", "always errors")
            }
            fn watched_events(&self) -> Watch {
                Watch::Events(vec![EventType::DomainName])
            }
            fn produced_events(&self) -> Vec<EventType> {
                vec![EventType::IpAddress]
            }
            async fn setup(
                &mut self,
                _services: Arc<Services>,
                _opts: &crate::config::PluginOpts,
            ) -> ScanResult<()> {
                Ok(())
            }
            fn set_target(&mut self, _target: Arc<Target>) {}
            async fn handle_event(
                &mut self,
                _event: &Arc<Event>,
                _sink: &mut EventSink,
            ) -> ScanResult<()> {
                Err(ScanError::Transport("socket closed".to_string()))
            }
        }

        let services = test_services();
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        let mut scanner = Scanner::new(services, target);
        let log = Arc::new(Mutex::new(Vec::new()));
        scanner.register(Box::new(Failing), None);
        scanner.register(
            Box::new(Recorder {
                name: "recorder",
                watches: Watch::Events(vec![EventType::DomainName]),
                log: Arc::clone(&log),
            }),
            None,
        );
        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.state, ScanState::Finished);
        assert_eq!(log.lock().len(), 1);
        assert!(summary.errored_plugins.is_empty());
    }

    #[tokio::test]
    async fn test_scan_runs_once() {
        let services = test_services();
        let target = Target::new("example.com", TargetKind::DomainName).unwrap();
        let mut scanner = Scanner::new(services, target);
        scanner.run().await.unwrap();
        assert!(scanner.run().await.is_err());
    }
}
