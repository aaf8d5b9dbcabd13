//! Ingestion of coding-agent session history from heterogeneous local
//! stores.
//!
//! Each supported tool persists its sessions differently — append-only JSONL
//! logs, per-message file trees, single-document threads, SQLite databases —
//! and this crate normalizes them behind one [`Adapter`] trait: list the
//! sessions touching a project, assemble their messages in order, account
//! for tokens and cost, and watch the store for changes with debounced
//! events. [`AdapterRegistry`] probes which tools are present and
//! [`Aggregator`] merges the survivors into one session list and one event
//! stream.
//!
//! Reads are non-destructive and tolerant: a malformed record is skipped
//! with a debug log, a vanished file yields an empty result, and only a
//! store that exists but cannot be opened is an error.

pub mod adapters;
pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod paths;
pub mod pricing;
pub mod watch;

pub use adapters::Adapter;
pub use adapters::registry::AdapterRegistry;
pub use aggregator::{Aggregator, Subscription};
pub use config::IngestConfig;
pub use error::IngestError;
pub use model::{
    Capabilities, ContentBlock, Event, EventKind, Message, Role, SearchMatch, Session,
    ThinkingBlock, TokenUsage, ToolUse, UsageStats, WatchScope,
};
pub use pricing::PricingTable;
pub use watch::{WatchConfig, WatchHandle};
