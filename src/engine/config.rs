use crate::core::currency::CurrencyCode;
use crate::policy::baseline::BaselinePolicyTable;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Includes baseline tables that fail validation.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Ceiling on what any bilateral ruleset may grant.
    pub baseline: BaselinePolicyTable,
    /// Used when a ruleset names no base currency.
    pub default_base_currency: CurrencyCode,
    /// Issue the upstream reads on scoped threads.
    pub concurrent_fetch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            baseline: BaselinePolicyTable::standard(),
            default_base_currency: CurrencyCode::new("USD"),
            concurrent_fetch: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(body: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&body)
    }
}
