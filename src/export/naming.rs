// Output Naming/Placement Policy
// Deterministic, timestamped artifact paths under a configurable root

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Run timestamp format used in directory and file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Places every artifact of a run at `root/run_<ts>/<target>_<ts>.<ext>`
#[derive(Debug, Clone)]
pub struct OutputPolicy {
    root: PathBuf,
}

impl OutputPolicy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stamp(timestamp: &DateTime<Local>) -> String {
        timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Directory holding every artifact of the run
    pub fn run_dir(&self, timestamp: &DateTime<Local>) -> PathBuf {
        self.root.join(format!("run_{}", Self::stamp(timestamp)))
    }

    /// Path for a target's artifact, without touching the filesystem
    pub fn path_for(&self, target: &str, extension: &str, timestamp: &DateTime<Local>) -> PathBuf {
        let stamp = Self::stamp(timestamp);
        let file = format!("{}_{}.{}", slug(target), stamp, slug(extension));
        self.run_dir(timestamp).join(file)
    }

    /// Path for a target's artifact; the run directory is created if missing
    pub fn name_for(
        &self,
        target: &str,
        extension: &str,
        timestamp: &DateTime<Local>,
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(self.run_dir(timestamp))?;
        Ok(self.path_for(target, extension, timestamp))
    }
}

/// Lowercase ASCII alphanumerics; everything else becomes `_`
pub fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timestamp() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 15, 13, 5, 9).unwrap()
    }

    #[test]
    fn test_path_layout() {
        let policy = OutputPolicy::new("/srv/reports");
        let path = policy.path_for("attack-distribution-chart", "svg", &timestamp());
        assert_eq!(
            path,
            PathBuf::from("/srv/reports/run_20240115_130509/attack_distribution_chart_20240115_130509.svg")
        );
    }

    #[test]
    fn test_deterministic() {
        let policy = OutputPolicy::new("out");
        assert_eq!(
            policy.path_for("json-summary", "json", &timestamp()),
            policy.path_for("json-summary", "json", &timestamp())
        );
    }

    #[test]
    fn test_distinct_targets_get_distinct_paths() {
        let policy = OutputPolicy::new("out");
        let names = [
            "attack-distribution-chart",
            "protocol-risk-chart",
            "service-risk-chart",
            "temporal-risk-chart",
            "interactive-dashboard",
            "json-summary",
            "text-summary",
        ];
        let paths: std::collections::HashSet<_> = names
            .iter()
            .map(|n| policy.path_for(n, "out", &timestamp()))
            .collect();
        assert_eq!(paths.len(), names.len());
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Service Risk/Chart"), "service_risk_chart");
        assert_eq!(slug("../etc"), "___etc");
        assert_eq!(slug("json"), "json");
    }

    #[test]
    fn test_name_for_creates_directories_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let policy = OutputPolicy::new(dir.path().join("nested/root"));

        let first = policy.name_for("text-summary", "txt", &timestamp()).unwrap();
        let second = policy.name_for("text-summary", "txt", &timestamp()).unwrap();

        assert_eq!(first, second);
        assert!(first.parent().unwrap().is_dir());
        assert!(!first.exists());
    }
}
