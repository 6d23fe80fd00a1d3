// src/config.rs

//! Defines the configuration structures for a kernel structure search.
//!
//! Every struct derives `Serialize`/`Deserialize` and carries
//! `#[serde(default)]`, so a configuration file only needs to mention the
//! settings it changes. Files are JSON.

use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::grammar::{Grammar, DEFAULT_GRAMMAR};

// --- Top-Level Configuration Structure ---

/// Settings for one search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of search steps (frontier expansions) to run.
    pub n_steps: usize,
    /// Upper bound on concurrently running scorer calls. Zero is treated as one.
    pub max_workers: usize,
    /// Base kernels and operators the search may use.
    pub grammar: Grammar,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            n_steps: 5,
            max_workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            grammar: DEFAULT_GRAMMAR.clone(),
        }
    }
}

impl SearchConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Invalid search configuration")
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        log::info!("Loaded search config from {}", path.display());
        Ok(config)
    }

    pub fn with_steps(mut self, n_steps: usize) -> Self {
        self.n_steps = n_steps;
        self
    }

    pub fn with_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_grammar(mut self, grammar: Grammar) -> Self {
        self.grammar = grammar;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{BaseKind, CombRule};

    #[test_log::test]
    fn test_empty_json_gives_defaults() {
        let config = SearchConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SearchConfig::default());
        assert!(config.max_workers >= 1);
    }

    #[test_log::test]
    fn test_partial_override() {
        let config = SearchConfig::from_json_str(
            r#"{ "n_steps": 2, "grammar": { "bases": ["LIN", "PER"], "operators": ["*"] } }"#,
        )
        .unwrap();
        assert_eq!(config.n_steps, 2);
        assert_eq!(config.grammar.bases, vec![BaseKind::Linear, BaseKind::Periodic]);
        assert_eq!(config.grammar.operators, vec![CombRule::Product]);
    }

    #[test_log::test]
    fn test_unknown_base_is_an_error() {
        let err = SearchConfig::from_json_str(r#"{ "grammar": { "bases": ["RQ"] } }"#).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid search configuration"));
    }

    #[test_log::test]
    fn test_missing_file_names_path() {
        let err = SearchConfig::load("/nonexistent/search.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/search.json"));
    }

    #[test_log::test]
    fn test_serialize_round_trip() {
        let config = SearchConfig::default().with_steps(3).with_workers(2);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(SearchConfig::from_json_str(&json).unwrap(), config);
    }
}
