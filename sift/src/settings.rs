//! Search settings
//!
//! A typed, read-only configuration record. Built once (from defaults or a
//! JSON document) and validated before an engine is constructed; the
//! engine never mutates it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("`limit` must be at least 1")]
    ZeroLimit,
    #[error("`{field}` must not be negative (got {value})")]
    NegativeWeight { field: &'static str, value: i64 },
    #[error("full-text search is enabled but both weights are zero")]
    ZeroWeights,
    #[error("`post_types` must name at least one document kind")]
    NoDocumentKinds,
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Options consumed by the resolution pipeline.
///
/// Unknown keys in the JSON form (presentation options such as
/// `highlight` or `excerpt_length`) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Results per page when the caller does not supply a limit
    pub limit: usize,
    pub use_fulltext: bool,
    /// Use boolean full-text as the primary strategy
    pub boolean_mode: bool,
    pub weight_title: i64,
    pub weight_content: i64,
    #[serde(alias = "cache")]
    pub cache_enabled: bool,
    /// Document kinds eligible for search
    pub post_types: Vec<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limit: 10,
            use_fulltext: true,
            boolean_mode: false,
            weight_title: 1,
            weight_content: 10,
            cache_enabled: true,
            post_types: vec!["post".to_string(), "page".to_string()],
        }
    }
}

impl SearchSettings {
    /// Parse and validate settings from a JSON object. Missing keys take defaults.
    pub fn from_json(json: &str) -> SettingsResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> SettingsResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> SettingsResult<()> {
        if self.limit == 0 {
            return Err(SettingsError::ZeroLimit);
        }
        for (field, value) in [("weight_title", self.weight_title), ("weight_content", self.weight_content)] {
            if value < 0 {
                return Err(SettingsError::NegativeWeight { field, value });
            }
        }
        if self.use_fulltext && self.weight_title == 0 && self.weight_content == 0 {
            return Err(SettingsError::ZeroWeights);
        }
        if self.post_types.iter().all(|k| k.trim().is_empty()) {
            return Err(SettingsError::NoDocumentKinds);
        }
        Ok(())
    }

    /// Non-blank document kinds, trimmed
    pub fn allowed_kinds(&self) -> Vec<String> {
        self.post_types
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}
