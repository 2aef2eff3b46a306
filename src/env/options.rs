use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::types::ConfigError;

/// Configuration consulted by slot stores on every mutation and compaction.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreOptions {
    /// Disk fill ratio at which new, unpersisted writes are refused.
    pub disk_full_factor: f64,
    /// Retention policy applied by compaction.
    pub compaction: CompactionCfg,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            disk_full_factor: 0.98,
            compaction: CompactionCfg::default(),
        }
    }
}

impl StoreOptions {
    /// Sets the disk fill threshold.
    pub fn disk_full_factor(mut self, factor: f64) -> Self {
        self.disk_full_factor = factor;
        self
    }

    /// Sets the compaction policy.
    pub fn compaction(mut self, cfg: CompactionCfg) -> Self {
        self.compaction = cfg;
        self
    }

    /// Rejects values the store cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.disk_full_factor > 0.0 && self.disk_full_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "disk_full_factor must be in (0, 1], got {}",
                self.disk_full_factor
            )));
        }
        self.compaction.validate()
    }

    /// Parses options from TOML, filling unspecified keys with defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawOptions =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;
        let options = raw.into_options();
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses a TOML options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

/// Retention rules deciding which historical slots compaction may drop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionCfg {
    /// Minimum age before a superseded version may be discarded.
    pub revert_time_period: Duration,
    /// Minimum age before a tombstone may be discarded.
    pub keep_remove_time_period: Duration,
    /// Versions kept per document regardless of age. Must be at least 1.
    pub max_document_versions: u32,
}

impl Default for CompactionCfg {
    fn default() -> Self {
        Self {
            revert_time_period: Duration::from_secs(300),
            keep_remove_time_period: Duration::from_secs(7 * 24 * 60 * 60),
            max_document_versions: 5,
        }
    }
}

impl CompactionCfg {
    /// Sets the revert window.
    pub fn revert_time_period(mut self, period: Duration) -> Self {
        self.revert_time_period = period;
        self
    }

    /// Sets the tombstone retention window.
    pub fn keep_remove_time_period(mut self, period: Duration) -> Self {
        self.keep_remove_time_period = period;
        self
    }

    /// Sets the per-document version cap.
    pub fn max_document_versions(mut self, versions: u32) -> Self {
        self.max_document_versions = versions;
        self
    }

    /// Rejects a zero version cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_document_versions == 0 {
            return Err(ConfigError::Invalid(
                "max_document_versions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    disk_full_factor: Option<f64>,
    #[serde(default)]
    compaction: RawCompaction,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCompaction {
    revert_time_period_secs: Option<u64>,
    keep_remove_time_period_secs: Option<u64>,
    max_document_versions: Option<u32>,
}

impl RawOptions {
    fn into_options(self) -> StoreOptions {
        let defaults = StoreOptions::default();
        let compaction = CompactionCfg {
            revert_time_period: self
                .compaction
                .revert_time_period_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.compaction.revert_time_period),
            keep_remove_time_period: self
                .compaction
                .keep_remove_time_period_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.compaction.keep_remove_time_period),
            max_document_versions: self
                .compaction
                .max_document_versions
                .unwrap_or(defaults.compaction.max_document_versions),
        };
        StoreOptions {
            disk_full_factor: self.disk_full_factor.unwrap_or(defaults.disk_full_factor),
            compaction,
        }
    }
}
