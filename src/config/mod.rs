mod file_config;

pub use file_config::{FileConfig, TargetConfig};

use crate::execution_store::DEFAULT_MAX_VARCHAR_LENGTH;
use crate::lifecycle::LifecycleSettings;
use crate::schema_target::{SchemaLayout, SchemaTarget, SchemaTargetResolver};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub default_target: Option<String>,
    pub max_varchar_length: Option<usize>,
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    /// Validated targets; exactly one is the default.
    pub targets: Vec<SchemaTarget>,
    pub job_targets: HashMap<String, String>,
    pub max_varchar_length: usize,
    pub lifecycle: LifecycleSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let max_varchar_length = file
            .max_varchar_length
            .or(cli.max_varchar_length)
            .unwrap_or(DEFAULT_MAX_VARCHAR_LENGTH);
        if max_varchar_length < 8 {
            bail!("max_varchar_length must be at least 8, got {}", max_varchar_length);
        }

        let default_target = file.default_target.or_else(|| cli.default_target.clone());
        let targets = resolve_targets(file.targets, default_target.as_deref())?;
        let job_targets = file.job_targets.unwrap_or_default();

        // Rejects duplicate names and bindings to unknown targets.
        SchemaTargetResolver::new(targets.clone(), job_targets.clone())?;

        let lifecycle = LifecycleSettings {
            shutdown_timeout: Duration::from_secs(
                file.shutdown_timeout_secs
                    .or(cli.shutdown_timeout_secs)
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ),
            poll_interval: Duration::from_millis(
                file.shutdown_poll_interval_ms
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                    .max(1),
            ),
            sweep_interval: Duration::from_secs(
                file.sweep_interval_secs
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                    .max(1),
            ),
        };

        Ok(Self {
            db_path,
            targets,
            job_targets,
            max_varchar_length,
            lifecycle,
        })
    }

    pub fn resolver(&self) -> Result<SchemaTargetResolver> {
        SchemaTargetResolver::new(self.targets.clone(), self.job_targets.clone())
    }

    pub fn default_target(&self) -> Option<&SchemaTarget> {
        self.targets.iter().find(|t| t.is_default)
    }
}

fn resolve_targets(
    configured: Option<Vec<TargetConfig>>,
    default_target: Option<&str>,
) -> Result<Vec<SchemaTarget>> {
    let configured = configured.unwrap_or_default();

    let mut targets = if configured.is_empty() {
        SchemaTarget::builtin()
    } else {
        let mut targets = Vec::with_capacity(configured.len());
        for (i, t) in configured.into_iter().enumerate() {
            let layout = match t.layout.as_deref() {
                Some(layout) => SchemaLayout::parse(layout)?,
                None => SchemaLayout::Current,
            };
            // Without an explicit default, the first configured target is it.
            targets.push(SchemaTarget::new(t.name, t.job_prefix, t.task_prefix, layout, i == 0)?);
        }
        targets
    };

    if let Some(name) = default_target {
        if !targets.iter().any(|t| t.name == name) {
            bail!("Default schema target {} is not configured", name);
        }
        for target in targets.iter_mut() {
            target.is_default = target.name == name;
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_target::{CURRENT_TARGET, LEGACY_TARGET};
    use tempfile::TempDir;

    fn make_temp_db_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.db");
        (dir, path)
    }

    fn target_config(name: &str, prefix: &str, layout: Option<&str>) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            job_prefix: format!("{}BATCH_", prefix),
            task_prefix: format!("{}TASK_", prefix),
            layout: layout.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_cli_only_uses_builtin_targets() {
        let (_dir, path) = make_temp_db_path();
        let cli = CliConfig {
            db_path: Some(path.clone()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_path, path);
        assert_eq!(config.max_varchar_length, 2500);
        assert_eq!(config.lifecycle.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(config.lifecycle.poll_interval, Duration::from_secs(1));
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.default_target().unwrap().name, LEGACY_TARGET);
        assert!(config.resolver().is_ok());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let (_dir, path) = make_temp_db_path();
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/should/be/overridden/history.db")),
            max_varchar_length: Some(1000),
            shutdown_timeout_secs: Some(10),
            default_target: Some(LEGACY_TARGET.to_string()),
        };
        let file_config = FileConfig {
            db_path: Some(path.to_string_lossy().to_string()),
            shutdown_timeout_secs: Some(2),
            default_target: Some(CURRENT_TARGET.to_string()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_path, path);
        assert_eq!(config.lifecycle.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(config.default_target().unwrap().name, CURRENT_TARGET);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.max_varchar_length, 1000);
    }

    #[test]
    fn test_resolve_missing_db_path_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_path must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/nonexistent/path/that/should/not/exist/h.db")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_configured_targets_replace_builtin() {
        let (_dir, path) = make_temp_db_path();
        let file_config = FileConfig {
            db_path: Some(path.to_string_lossy().to_string()),
            targets: Some(vec![
                target_config("boot2", "", Some("legacy")),
                target_config("boot3", "BOOT3_", None),
            ]),
            default_target: Some("boot3".to_string()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap();
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].layout, SchemaLayout::Legacy);
        assert_eq!(config.targets[1].layout, SchemaLayout::Current);
        assert_eq!(config.targets[1].job_prefix, "BOOT3_BATCH_");
        assert_eq!(config.default_target().unwrap().name, "boot3");
    }

    #[test]
    fn test_first_configured_target_is_default() {
        let (_dir, path) = make_temp_db_path();
        let file_config = FileConfig {
            db_path: Some(path.to_string_lossy().to_string()),
            targets: Some(vec![
                target_config("a", "A_", None),
                target_config("b", "B_", None),
            ]),
            ..Default::default()
        };
        let config = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap();
        assert_eq!(config.default_target().unwrap().name, "a");
    }

    #[test]
    fn test_invalid_targets_are_rejected() {
        let (_dir, path) = make_temp_db_path();
        let db_path = Some(path.to_string_lossy().to_string());

        let bad_prefix = FileConfig {
            db_path: db_path.clone(),
            targets: Some(vec![target_config("a", "A; DROP TABLE x; --", None)]),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&CliConfig::default(), Some(bad_prefix)).is_err());

        let duplicate = FileConfig {
            db_path: db_path.clone(),
            targets: Some(vec![
                target_config("a", "A_", None),
                target_config("a", "B_", None),
            ]),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&CliConfig::default(), Some(duplicate)).is_err());

        let unknown_default = FileConfig {
            db_path: db_path.clone(),
            default_target: Some("missing".to_string()),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(unknown_default)).unwrap_err();
        assert!(err.to_string().contains("missing"));

        let unknown_binding = FileConfig {
            db_path,
            job_targets: Some(HashMap::from([(
                "import".to_string(),
                "missing".to_string(),
            )])),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&CliConfig::default(), Some(unknown_binding)).is_err());
    }

    #[test]
    fn test_unknown_layout_is_rejected() {
        let (_dir, path) = make_temp_db_path();
        let file_config = FileConfig {
            db_path: Some(path.to_string_lossy().to_string()),
            targets: Some(vec![target_config("a", "A_", Some("v7"))]),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("Unknown schema layout"));
    }
}
