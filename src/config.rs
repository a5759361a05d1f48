// src/config.rs
// Runtime configuration for the analysis service.
// Loaded from a TOML file, the environment, or both (env wins).

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Configuration for the analysis service and pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Store URL: a local file path, `:memory:`, or a `libsql://` remote
    pub database_url: String,

    /// Access token for remote stores (unused for local files)
    pub database_auth_token: Option<String>,

    /// Hour of day (0-23, local time) at which the daily run triggers
    pub analysis_schedule_hour: u8,

    /// Master switch for the scheduled daily run
    pub analysis_enabled: bool,

    /// Version string copied into every analysis row
    pub model_version: String,

    /// Contamination for the legacy single-model detector path
    pub anomaly_contamination: f64,

    /// Neighbor count for the legacy single-model LOF
    pub lof_neighbors: usize,

    /// Rows per upsert transaction in the result writer
    pub batch_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            database_url: "pkd-analysis.db".to_string(),
            database_auth_token: None,
            analysis_schedule_hour: 3,
            analysis_enabled: true,
            model_version: crate::DEFAULT_MODEL_VERSION.to_string(),
            anomaly_contamination: 0.05,
            lof_neighbors: 20,
            batch_size: 1000,
        }
    }
}

impl AnalysisConfig {
    /// Load from a TOML config file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::Config(format!("cannot read {}: {}", path, e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AnalysisError::Config(format!("invalid TOML in {}: {}", path, e)))?;

        tracing::info!("Loaded analysis config from {}", path);
        Ok(config)
    }

    /// Apply `PKD_*` environment variable overrides on top of `self`.
    pub fn apply_environment(mut self) -> Self {
        if let Ok(url) = std::env::var("PKD_DATABASE_URL") {
            if !url.trim().is_empty() {
                self.database_url = url.trim().to_string();
            }
        }
        if let Ok(token) = std::env::var("PKD_DATABASE_AUTH_TOKEN") {
            if !token.trim().is_empty() {
                self.database_auth_token = Some(token.trim().to_string());
            }
        }
        if let Ok(hour) = std::env::var("PKD_ANALYSIS_SCHEDULE_HOUR") {
            if let Ok(h) = hour.trim().parse() {
                self.analysis_schedule_hour = h;
            }
        }
        if let Ok(enabled) = std::env::var("PKD_ANALYSIS_ENABLED") {
            self.analysis_enabled = matches!(enabled.trim(), "true" | "1" | "yes");
        }
        if let Ok(version) = std::env::var("PKD_MODEL_VERSION") {
            if !version.trim().is_empty() {
                self.model_version = version.trim().to_string();
            }
        }
        if let Ok(c) = std::env::var("PKD_ANOMALY_CONTAMINATION") {
            if let Ok(v) = c.trim().parse() {
                self.anomaly_contamination = v;
            }
        }
        if let Ok(k) = std::env::var("PKD_LOF_NEIGHBORS") {
            if let Ok(v) = k.trim().parse() {
                self.lof_neighbors = v;
            }
        }
        if let Ok(b) = std::env::var("PKD_BATCH_SIZE") {
            if let Ok(v) = b.trim().parse() {
                self.batch_size = v;
            }
        }
        self
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(AnalysisError::Config("database_url cannot be empty".into()));
        }
        if self.analysis_schedule_hour > 23 {
            return Err(AnalysisError::Config(format!(
                "analysis_schedule_hour must be 0-23, got {}",
                self.analysis_schedule_hour
            )));
        }
        if self.batch_size == 0 {
            return Err(AnalysisError::Config("batch_size cannot be 0".into()));
        }
        if !(self.anomaly_contamination > 0.0 && self.anomaly_contamination <= 0.5) {
            return Err(AnalysisError::Config(format!(
                "anomaly_contamination must be in (0, 0.5], got {}",
                self.anomaly_contamination
            )));
        }
        if self.lof_neighbors < 2 {
            return Err(AnalysisError::Config("lof_neighbors must be >= 2".into()));
        }
        Ok(())
    }

    /// Get a summary of the configuration (token redacted).
    pub fn summary(&self) -> String {
        format!(
            "AnalysisConfig {{\n  \
             database_url: {},\n  \
             schedule_hour: {:02}:00 (enabled: {}),\n  \
             model_version: {},\n  \
             contamination: {}, lof_neighbors: {},\n  \
             batch_size: {}\n\
             }}",
            self.database_url,
            self.analysis_schedule_hour,
            self.analysis_enabled,
            self.model_version,
            self.anomaly_contamination,
            self.lof_neighbors,
            self.batch_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalysisConfig::default();
        assert_eq!(config.analysis_schedule_hour, 3);
        assert_eq!(config.batch_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_schedule_hour_out_of_range() {
        let config = AnalysisConfig {
            analysis_schedule_hour: 24,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = AnalysisConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_contamination_bounds() {
        let mut config = AnalysisConfig::default();
        config.anomaly_contamination = 0.0;
        assert!(config.validate().is_err());
        config.anomaly_contamination = 0.5;
        assert!(config.validate().is_ok());
        config.anomaly_contamination = 0.6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_mentions_schedule() {
        let config = AnalysisConfig::default();
        assert!(config.summary().contains("03:00"));
    }
}
