// Export Module
// Render targets that turn query tables into report artifacts, and the
// naming policy that places those artifacts on disk

pub mod anomaly;
pub mod chart;
pub mod dashboard;
pub mod json;
pub mod naming;
pub mod svg;
pub mod text;

pub use anomaly::AnomalyChartTarget;
pub use chart::ChartTarget;
pub use dashboard::DashboardTarget;
pub use json::{JsonExporter, JsonSummaryTarget};
pub use naming::OutputPolicy;
pub use text::TextSummaryTarget;

use crate::query::{ResultSet, TabularResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A file written by a render target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Render errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Missing input table '{0}'")]
    MissingInput(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Render backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Serialization(err.to_string())
    }
}

/// A named sink producing exactly one artifact per run.
///
/// Targets share no mutable state; each receives only the tables listed in
/// `inputs` and writes only to the path it is handed.
pub trait RenderTarget: Send + Sync {
    fn name(&self) -> &str;

    /// File extension of the artifact, without the dot
    fn extension(&self) -> &str;

    /// Catalogue entries this target reads
    fn inputs(&self) -> &[&'static str];

    fn render(&self, results: &ResultSet, path: &Path) -> Result<Artifact, RenderError>;
}

/// The report's standard targets, in dispatch order
pub fn default_targets() -> Vec<Arc<dyn RenderTarget>> {
    vec![
        Arc::new(ChartTarget::attack_distribution()),
        Arc::new(ChartTarget::protocol_risk()),
        Arc::new(ChartTarget::service_risk()),
        Arc::new(ChartTarget::temporal_risk()),
        Arc::new(AnomalyChartTarget::new()),
        Arc::new(DashboardTarget::new()),
        Arc::new(JsonSummaryTarget::new()),
        Arc::new(TextSummaryTarget::new()),
    ]
}

/// Look up a table the target cannot work without
pub(crate) fn require<'a>(results: &'a ResultSet, name: &str) -> Result<&'a TabularResult, RenderError> {
    results
        .get(name)
        .ok_or_else(|| RenderError::MissingInput(name.to_string()))
}

/// Write the artifact contents and report what landed on disk
pub(crate) fn write_artifact(path: &Path, contents: &[u8]) -> Result<Artifact, RenderError> {
    std::fs::write(path, contents)?;
    let bytes = std::fs::metadata(path)?.len();
    Ok(Artifact {
        path: path.to_path_buf(),
        bytes,
    })
}
