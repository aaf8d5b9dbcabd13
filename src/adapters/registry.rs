//! Adapter registry: detection and the active set.
//!
//! The registry owns one instance of every built-in adapter and, on
//! `detect`, probes each against a project root. Adapters whose source is
//! present become the active set; the rest are recorded with the reason
//! they were skipped so callers can report why a tool's history is absent
//! instead of silently dropping it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapters::amazon_q::AmazonQAdapter;
use crate::adapters::amp::AmpAdapter;
use crate::adapters::claude_code::ClaudeCodeAdapter;
use crate::adapters::codex::CodexAdapter;
use crate::adapters::opencode::OpenCodeAdapter;
use crate::adapters::warp::WarpAdapter;
use crate::adapters::Adapter;
use crate::config::IngestConfig;
use crate::model::Capabilities;

pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn Adapter>>,
    active: Vec<Arc<dyn Adapter>>,
    unavailable: HashMap<String, String>,
    project_root: Option<PathBuf>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    /// All built-in adapters with default roots.
    pub fn new() -> AdapterRegistry {
        Self::with_config(&IngestConfig::default())
    }

    pub fn with_config(config: &IngestConfig) -> AdapterRegistry {
        Self::from_adapters(vec![
            Arc::new(ClaudeCodeAdapter::with_config(
                ClaudeCodeAdapter::default_root(),
                config,
            )),
            Arc::new(CodexAdapter::with_config(
                CodexAdapter::default_root(),
                config,
            )),
            Arc::new(OpenCodeAdapter::with_config(
                OpenCodeAdapter::default_root(),
                config,
            )),
            Arc::new(AmpAdapter::with_config(AmpAdapter::default_root(), config)),
            Arc::new(AmazonQAdapter::with_config(
                AmazonQAdapter::default_db(),
                config,
            )),
            Arc::new(WarpAdapter::with_config(WarpAdapter::default_db(), config)),
        ])
    }

    /// Build from an explicit adapter list. Used by tests and by embedders
    /// that want a subset or custom roots.
    pub fn from_adapters(adapters: Vec<Arc<dyn Adapter>>) -> AdapterRegistry {
        AdapterRegistry {
            adapters,
            active: Vec::new(),
            unavailable: HashMap::new(),
            project_root: None,
        }
    }

    /// Probe every adapter against `project_root` and settle the active set.
    /// A detection probe that finds nothing is not an error; the adapter is
    /// simply recorded as unavailable with a reason.
    pub fn detect(&mut self, project_root: &Path) -> &[Arc<dyn Adapter>] {
        self.active.clear();
        self.unavailable.clear();
        self.project_root = Some(project_root.to_path_buf());

        for adapter in &self.adapters {
            if adapter.detect(project_root) {
                tracing::debug!(adapter = adapter.id(), "source detected");
                self.active.push(Arc::clone(adapter));
            } else {
                tracing::debug!(adapter = adapter.id(), "source not present, skipping");
                self.unavailable.insert(
                    adapter.id().to_string(),
                    format!(
                        "{} has no sessions for {}",
                        adapter.display_name(),
                        project_root.display()
                    ),
                );
            }
        }
        &self.active
    }

    pub fn all(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    /// Adapters whose source was present at the last `detect`.
    pub fn active(&self) -> &[Arc<dyn Adapter>] {
        &self.active
    }

    pub fn unavailable(&self) -> &HashMap<String, String> {
        &self.unavailable
    }

    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    pub fn get(&self, adapter_id: &str) -> Option<&Arc<dyn Adapter>> {
        self.adapters.iter().find(|a| a.id() == adapter_id)
    }

    /// Union of the active adapters' capability sets.
    pub fn union_capabilities(&self) -> Capabilities {
        self.active
            .iter()
            .fold(Capabilities::default(), |acc, a| {
                acc.union(a.capabilities())
            })
    }

    /// Release held resources (DB connections) on every adapter.
    pub fn close(&self) {
        for adapter in &self.adapters {
            adapter.close();
        }
    }
}
