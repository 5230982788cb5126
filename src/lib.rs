// src/lib.rs
//! OSINT reconnaissance engine core: a typed event bus, a plugin
//! contract and the shared services (HTTP, DNS, cache, search, parsers)
//! every collector builds on.

pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod event;
pub mod http;
pub mod parse;
pub mod plugin;
pub mod plugins;
pub mod scanner;
pub mod scope;
pub mod search;
pub mod services;
pub mod target;

pub use error::{ScanError, ScanResult};
pub use event::{Event, EventType};
pub use plugin::{EventSink, Plugin, PluginMeta, Watch};
pub use scanner::{ScanState, ScanSummary, Scanner};
pub use services::Services;
pub use target::{Target, TargetKind};
