//! Cost estimation from model-name prefixes.
//!
//! Rates are $/MTok for input and output. Cache-read tokens bill at 10% of
//! the input rate; cache-write tokens bill at the input rate. The longest
//! matching prefix wins; unknown models fall back to the default rate.
//!
//! The built-in table is only a default — hosts can replace it wholesale
//! from TOML (see [`PricingTable::from_toml_str`]).

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::model::TokenUsage;

const CACHE_READ_DISCOUNT: f64 = 0.10;
const MTOK: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelRate {
    /// Dollars per million input tokens.
    pub input: f64,
    /// Dollars per million output tokens.
    pub output: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct PricingToml {
    #[serde(default)]
    default: Option<ModelRate>,
    #[serde(default)]
    models: std::collections::BTreeMap<String, ModelRate>,
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    /// (model-name prefix, rate), longest prefix consulted first.
    rates: Vec<(String, ModelRate)>,
    default_rate: ModelRate,
}

static DEFAULT_RATES: Lazy<Vec<(String, ModelRate)>> = Lazy::new(|| {
    let table: &[(&str, f64, f64)] = &[
        ("claude-opus-4", 15.0, 75.0),
        ("claude-sonnet-4", 3.0, 15.0),
        ("claude-haiku-4", 1.0, 5.0),
        ("claude-3-5-haiku", 0.8, 4.0),
        ("gpt-5-mini", 0.25, 2.0),
        ("gpt-5", 1.25, 10.0),
        ("gpt-4o", 2.5, 10.0),
        ("o3", 2.0, 8.0),
        ("gemini-2.5-pro", 1.25, 10.0),
        ("gemini-2.5-flash", 0.3, 2.5),
    ];
    table
        .iter()
        .map(|(prefix, input, output)| {
            (
                (*prefix).to_string(),
                ModelRate {
                    input: *input,
                    output: *output,
                },
            )
        })
        .collect()
});

impl Default for PricingTable {
    fn default() -> PricingTable {
        PricingTable::new(DEFAULT_RATES.clone(), ModelRate {
            input: 3.0,
            output: 15.0,
        })
    }
}

impl PricingTable {
    pub fn new(mut rates: Vec<(String, ModelRate)>, default_rate: ModelRate) -> PricingTable {
        // Longest prefix first so "gpt-5-mini" shadows "gpt-5".
        rates.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));
        PricingTable {
            rates,
            default_rate,
        }
    }

    /// Parse a rate table from TOML:
    ///
    /// ```toml
    /// default = { input = 3.0, output = 15.0 }
    /// [models]
    /// "claude-opus-4" = { input = 15.0, output = 75.0 }
    /// ```
    pub fn from_toml_str(s: &str) -> anyhow::Result<PricingTable> {
        let parsed: PricingToml = toml::from_str(s)?;
        let default_rate = parsed.default.unwrap_or(ModelRate {
            input: 3.0,
            output: 15.0,
        });
        Ok(PricingTable::new(
            parsed.models.into_iter().collect(),
            default_rate,
        ))
    }

    pub fn rate_for(&self, model: &str) -> ModelRate {
        self.rates
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, rate)| *rate)
            .unwrap_or(self.default_rate)
    }

    /// Estimated dollar cost for one message's usage.
    pub fn cost(&self, model: Option<&str>, usage: &TokenUsage) -> f64 {
        let rate = model
            .map(|m| self.rate_for(m))
            .unwrap_or(self.default_rate);
        let input = usage.input as f64 * rate.input / MTOK;
        let output = usage.output as f64 * rate.output / MTOK;
        let cache_read = usage.cache_read as f64 * rate.input * CACHE_READ_DISCOUNT / MTOK;
        let cache_write = usage.cache_write as f64 * rate.input / MTOK;
        input + output + cache_read + cache_write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64, cache_read: u64) -> TokenUsage {
        TokenUsage {
            input,
            output,
            cache_read,
            cache_write: 0,
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let table = PricingTable::default();
        assert_eq!(table.rate_for("gpt-5-mini-2025").input, 0.25);
        assert_eq!(table.rate_for("gpt-5-2025").input, 1.25);
    }

    #[test]
    fn unknown_model_uses_default_rate() {
        let table = PricingTable::default();
        let rate = table.rate_for("mystery-model");
        assert_eq!(rate.input, 3.0);
        assert_eq!(rate.output, 15.0);
    }

    #[test]
    fn cache_read_bills_at_ten_percent_of_input() {
        let table = PricingTable::default();
        // 1M cache-read tokens on an unknown model: 3.0 * 0.10.
        let cost = table.cost(Some("mystery"), &usage(0, 0, 1_000_000));
        assert!((cost - 0.30).abs() < 1e-9);
    }

    #[test]
    fn toml_override_replaces_table() {
        let table = PricingTable::from_toml_str(
            r#"
            default = { input = 1.0, output = 2.0 }
            [models]
            "local-llm" = { input = 0.0, output = 0.0 }
            "#,
        )
        .unwrap();
        assert_eq!(table.rate_for("local-llm-7b").input, 0.0);
        assert_eq!(table.rate_for("anything-else").output, 2.0);
        let cost = table.cost(Some("x"), &usage(1_000_000, 500_000, 0));
        assert!((cost - 2.0).abs() < 1e-9);
    }
}
