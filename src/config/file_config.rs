use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub default_target: Option<String>,
    pub max_varchar_length: Option<usize>,

    // Shutdown drain
    pub shutdown_timeout_secs: Option<u64>,
    pub shutdown_poll_interval_ms: Option<u64>,
    pub sweep_interval_secs: Option<u64>,

    /// Replaces the built-in targets when present.
    pub targets: Option<Vec<TargetConfig>>,
    /// Job or task name to target name.
    pub job_targets: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub name: String,
    pub job_prefix: String,
    pub task_prefix: String,
    /// "legacy" or "current", defaults to "current".
    pub layout: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_targets_and_bindings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
db_path = "/var/lib/history.db"
default_target = "boot3"
shutdown_timeout_secs = 5

[[targets]]
name = "boot2"
job_prefix = "BATCH_"
task_prefix = "TASK_"
layout = "legacy"

[[targets]]
name = "boot3"
job_prefix = "BOOT3_BATCH_"
task_prefix = "BOOT3_TASK_"

[job_targets]
nightly-import = "boot2"
"#,
        )
        .unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("/var/lib/history.db"));
        assert_eq!(config.shutdown_timeout_secs, Some(5));
        assert!(config.max_varchar_length.is_none());
        let targets = config.targets.unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].layout.as_deref(), Some("legacy"));
        assert!(targets[1].layout.is_none());
        assert_eq!(
            config.job_targets.unwrap().get("nightly-import").map(String::as_str),
            Some("boot2")
        );
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_varchar_length = \"wide\"").unwrap();
        let err = FileConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
