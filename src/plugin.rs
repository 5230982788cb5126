// src/plugin.rs - collector plugin contract
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{OptValue, PluginOpts};
use crate::error::{ScanError, ScanResult};
use crate::event::{Event, EventType};
use crate::services::Services;
use crate::target::Target;

/// Static description of a plugin for listings and graph wiring.
#[derive(Debug, Clone)]
pub struct PluginMeta {
    pub name: &'static str,
    pub description: &'static str,
    /// Dispatch order among plugins watching the same event; lower runs
    /// first.
    pub priority: u8,
}

impl PluginMeta {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        PluginMeta {
            name,
            description,
            priority: 1,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// What a plugin subscribes to.
#[derive(Debug, Clone)]
pub enum Watch {
    /// Every event type, the wildcard subscription.
    All,
    Events(Vec<EventType>),
}

impl Watch {
    pub fn covers(&self, event_type: EventType) -> bool {
        match self {
            Watch::All => true,
            Watch::Events(types) => types.contains(&event_type),
        }
    }
}

/// Collects the events a plugin emits while handling one delivery. The
/// dispatcher drains it after the handler returns and routes each event
/// depth-first, so emission order is dispatch order.
pub struct EventSink {
    module: String,
    parent: Arc<Event>,
    emitted: Vec<Event>,
}

impl EventSink {
    pub fn new(module: impl Into<String>, parent: Arc<Event>) -> Self {
        EventSink {
            module: module.into(),
            parent,
            emitted: Vec::new(),
        }
    }

    /// Emit a new event stamped with this plugin's name and the event
    /// currently being handled as parent. Empty data is rejected.
    pub fn emit(&mut self, event_type: EventType, data: impl Into<String>) -> ScanResult<()> {
        let event = Event::new(event_type, data, self.module.clone(), Arc::clone(&self.parent))?;
        self.emitted.push(event);
        Ok(())
    }

    /// Emit with explicit confidence and risk, for sources that qualify
    /// their findings.
    pub fn emit_scored(
        &mut self,
        event_type: EventType,
        data: impl Into<String>,
        confidence: u8,
        risk: u8,
    ) -> ScanResult<()> {
        let event = Event::new(event_type, data, self.module.clone(), Arc::clone(&self.parent))?
            .with_confidence(confidence)
            .with_risk(risk);
        self.emitted.push(event);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.emitted
    }
}

/// The contract every collector obeys. The dispatcher owns the instance
/// and calls the hooks in lifecycle order: `setup`, `set_target`, then
/// `handle_event` per matching delivery, and `teardown` at scan end.
///
/// Handlers must poll `services.stop_requested()` around long operations
/// and return promptly once it is set. A plugin that hits an
/// unrecoverable source failure (revoked API key, permanent rejection)
/// sets its sticky error state; the dispatcher stops delivering to it.
#[async_trait]
pub trait Plugin: Send {
    fn meta(&self) -> PluginMeta;

    fn watched_events(&self) -> Watch;

    /// Advisory list used for graph wiring and validation.
    fn produced_events(&self) -> Vec<EventType>;

    /// Declared options with their default values. User overrides must
    /// name one of these keys.
    fn default_opts(&self) -> HashMap<String, OptValue> {
        HashMap::new()
    }

    async fn setup(&mut self, services: Arc<Services>, opts: &PluginOpts) -> ScanResult<()>;

    fn set_target(&mut self, target: Arc<Target>);

    async fn handle_event(&mut self, event: &Arc<Event>, sink: &mut EventSink) -> ScanResult<()>;

    async fn teardown(&mut self) -> ScanResult<()> {
        Ok(())
    }

    /// Sticky failure flag. Once true the plugin receives no further
    /// deliveries for the rest of the scan.
    fn error_state(&self) -> bool {
        false
    }
}

/// Build the merged option set for a plugin, validating overrides
/// against its declared defaults.
pub fn merge_plugin_opts(
    plugin: &dyn Plugin,
    overrides: Option<&HashMap<String, OptValue>>,
) -> ScanResult<PluginOpts> {
    let mut opts = PluginOpts::from_defaults(plugin.default_opts());
    if let Some(overrides) = overrides {
        opts.apply_overrides(plugin.meta().name, overrides)?;
    }
    Ok(opts)
}

/// Typed guard for use inside handlers: maps a missing service lookup
/// into a plugin-scoped error.
pub fn plugin_err(plugin: &str, message: impl Into<String>) -> ScanError {
    ScanError::Plugin {
        plugin: plugin.to_string(),
        message: message.into(),
    }
}
