// src/error.rs
// Error taxonomy for the analysis pipeline.
//
// The split mirrors the failure handling rules of the pipeline:
//   DataSource / Write  → the run ends FAILED
//   Feature             → zero-filled and logged, the run continues
//   Model               → subset downgraded to the rule-based fallback
//   StateConflict       → rejected start, never a run failure

use thiserror::Error;

/// Generic message exposed outside the process. Detailed diagnostics go
/// to the log sink only.
pub const GENERIC_FAILURE_MESSAGE: &str = "Analysis failed. Check server logs for details.";

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Store unreachable or the load query failed.
    #[error("data source error: {0}")]
    DataSource(String),

    /// Structurally malformed input where a primitive was promised.
    #[error("feature error: {0}")]
    Feature(String),

    /// A model fit failed on a type subset.
    #[error("model error: {0}")]
    Model(String),

    /// A batch commit failed; partial results are left in place.
    #[error("write error: {0}")]
    Write(String),

    /// A second start attempt while a run is already RUNNING.
    #[error("analysis already running")]
    StateConflict,

    /// Invalid configuration detected at startup.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_prefixed() {
        let e = AnalysisError::DataSource("connection refused".into());
        assert_eq!(e.to_string(), "data source error: connection refused");
        assert_eq!(AnalysisError::StateConflict.to_string(), "analysis already running");
    }
}
