//! Library tuning knobs, loadable from the platform config directory.
//!
//! Everything has a sensible default; a missing or partial config file is
//! normal. The pricing table override lives here so rates are not compiled
//! in (see `pricing`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::pricing::PricingTable;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Watcher debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Outbound watch channel capacity; overflow drops events.
    pub event_buffer: usize,
    /// Bound on cached per-session message lists.
    pub message_cache_entries: usize,
    /// Bound on cached session metadata entries.
    pub meta_cache_entries: usize,
    /// Inline pricing override, same schema as `PricingTable::from_toml_str`.
    pub pricing: Option<toml::Value>,
}

impl Default for IngestConfig {
    fn default() -> IngestConfig {
        IngestConfig {
            debounce_ms: 150,
            event_buffer: 32,
            message_cache_entries: 128,
            meta_cache_entries: 2048,
            pricing: None,
        }
    }
}

impl IngestConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Default location: `<config dir>/agent-session-ingest/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("agent-session-ingest/config.toml"))
    }

    /// Load from the default location; missing file yields defaults.
    pub fn load() -> Result<IngestConfig> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(IngestConfig::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<IngestConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: IngestConfig =
            toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Pricing table from the inline override, or the built-in default.
    pub fn pricing_table(&self) -> PricingTable {
        match &self.pricing {
            Some(value) => match toml::to_string(value)
                .map_err(anyhow::Error::from)
                .and_then(|s| PricingTable::from_toml_str(&s))
            {
                Ok(table) => table,
                Err(e) => {
                    tracing::warn!(error = %e, "invalid pricing override, using defaults");
                    PricingTable::default()
                }
            },
            None => PricingTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_resource_ceilings() {
        let cfg = IngestConfig::default();
        assert_eq!(cfg.debounce(), Duration::from_millis(150));
        assert_eq!(cfg.event_buffer, 32);
        assert_eq!(cfg.message_cache_entries, 128);
        assert_eq!(cfg.meta_cache_entries, 2048);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "debounce_ms = 200\n").unwrap();
        let cfg = IngestConfig::load_from(&path).unwrap();
        assert_eq!(cfg.debounce_ms, 200);
        assert_eq!(cfg.event_buffer, 32);
    }

    #[test]
    fn pricing_override_is_honored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [pricing]
            default = { input = 9.0, output = 9.0 }
            "#,
        )
        .unwrap();
        let cfg = IngestConfig::load_from(&path).unwrap();
        assert_eq!(cfg.pricing_table().rate_for("whatever").input, 9.0);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "debounce_ms = \"fast\"\n").unwrap();
        assert!(IngestConfig::load_from(&path).is_err());
    }
}
