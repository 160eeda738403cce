//! Engine configuration file.
//!
//! One JSON document carries the filename grammar, the output layout and both
//! retry budgets. Every field has a default, so `{}` is a valid config.

use crate::builder::ProductFilenameBuilder;
use crate::grammar::FilenameGrammar;
use crate::lock::LockConfig;
use crate::paths::OutputLayout;
use crate::reserve::ReservePolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything the engine reads from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Product filename grammar.
    pub grammar: FilenameGrammar,
    /// Construction-mode output layout.
    pub layout: OutputLayout,
    /// Reservation retry budget.
    pub reserve: ReservePolicy,
    /// Product lock retry budget.
    pub lock: LockConfig,
}

impl EngineConfig {
    /// Parse a config from JSON text and validate it.
    ///
    /// # Errors
    /// Fails on malformed JSON, unknown top-level keys or an invalid grammar.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(raw).context("parse engine config")?;
        cfg.grammar.validate().context("invalid filename grammar")?;
        Ok(cfg)
    }

    /// Read and validate a config file.
    ///
    /// # Errors
    /// Fails if the file cannot be read or does not validate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("load config {}", path.display()))
    }

    /// Defaults when `path` is `None`, otherwise [`Self::load`].
    ///
    /// # Errors
    /// See [`Self::load`].
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// A builder preloaded with this config's grammar and reservation policy.
    #[must_use]
    pub fn builder(&self) -> ProductFilenameBuilder {
        ProductFilenameBuilder::new(self.grammar.clone()).policy(self.reserve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::DirNaming;
    use anyhow::ensure;

    #[test]
    fn empty_object_is_all_defaults() -> anyhow::Result<()> {
        ensure!(EngineConfig::from_json("{}")? == EngineConfig::default());
        Ok(())
    }

    #[test]
    fn partial_sections_keep_other_defaults() -> anyhow::Result<()> {
        let cfg = EngineConfig::from_json(
            r#"{
                "grammar": { "data_extension": ".bin" },
                "layout": { "dir_naming": "apid", "product_line": "MSL" },
                "reserve": { "max_retries": 4 }
            }"#,
        )?;
        ensure!(cfg.grammar.data_extension == ".bin");
        ensure!(cfg.grammar.metadata_extension == FilenameGrammar::default().metadata_extension);
        ensure!(cfg.layout.dir_naming == DirNaming::Apid);
        ensure!(cfg.layout.use_doy_directory);
        ensure!(cfg.reserve.max_retries == 4);
        ensure!(cfg.reserve.max_backoff_ms == ReservePolicy::default().max_backoff_ms);
        ensure!(cfg.lock == LockConfig::default());
        Ok(())
    }

    #[test]
    fn invalid_grammar_is_rejected() {
        for raw in [
            r#"{ "grammar": { "data_extension": "" } }"#,
            r#"{ "grammar": { "metadata_extension": ".dat" } }"#,
            r#"{ "grammar": { "partial_marker": "_Part-ial" } }"#,
            r#"{ "surprise": 1 }"#,
        ] {
            assert!(EngineConfig::from_json(raw).is_err(), "{raw} accepted");
        }
    }

    #[test]
    fn load_reports_missing_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let err = EngineConfig::load(&dir.path().join("nope.json"))
            .err()
            .map(|e| format!("{e:#}"))
            .unwrap_or_default();
        ensure!(err.contains("read config file"), "{err}");
        ensure!(EngineConfig::load_or_default(None)? == EngineConfig::default());
        Ok(())
    }
}
