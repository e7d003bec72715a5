//! Schema targets: named physical table sets that hold execution history.
//!
//! Targets are fixed at startup. Every record read from the store carries
//! the name of the target it came from, and ids are only meaningful together
//! with that name.

use crate::sqlite_persistence::TablePrefixes;
use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

pub const LEGACY_TARGET: &str = "legacy";
pub const CURRENT_TARGET: &str = "current";

/// Column layout of a target's tables. The layouts differ in how job
/// parameters are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaLayout {
    /// Typed value columns (`TYPE_CD`, `STRING_VAL`, `LONG_VAL`, ...).
    Legacy,
    /// Type name plus textual value (`PARAMETER_TYPE`, `PARAMETER_VALUE`).
    Current,
}

impl SchemaLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaLayout::Legacy => "legacy",
            SchemaLayout::Current => "current",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "legacy" => Ok(SchemaLayout::Legacy),
            "current" => Ok(SchemaLayout::Current),
            other => bail!("Unknown schema layout: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaTarget {
    pub name: String,
    pub job_prefix: String,
    pub task_prefix: String,
    pub layout: SchemaLayout,
    pub is_default: bool,
}

impl SchemaTarget {
    /// Builds a target, rejecting prefixes that are not plain identifiers.
    /// Prefixes end up inside SQL text, so this is the only place they are
    /// checked.
    pub fn new(
        name: impl Into<String>,
        job_prefix: impl Into<String>,
        task_prefix: impl Into<String>,
        layout: SchemaLayout,
        is_default: bool,
    ) -> Result<Self> {
        let name = name.into();
        let job_prefix = job_prefix.into();
        let task_prefix = task_prefix.into();

        if name.trim().is_empty() {
            bail!("Schema target name must not be empty");
        }
        let identifier = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$")?;
        for prefix in [&job_prefix, &task_prefix] {
            if !identifier.is_match(prefix) {
                bail!("Invalid table prefix {:?} for schema target {}", prefix, name);
            }
        }

        Ok(Self {
            name,
            job_prefix,
            task_prefix,
            layout,
            is_default,
        })
    }

    /// The two targets used when nothing is configured.
    pub fn builtin() -> Vec<SchemaTarget> {
        vec![
            SchemaTarget {
                name: LEGACY_TARGET.to_string(),
                job_prefix: "BATCH_".to_string(),
                task_prefix: "TASK_".to_string(),
                layout: SchemaLayout::Legacy,
                is_default: true,
            },
            SchemaTarget {
                name: CURRENT_TARGET.to_string(),
                job_prefix: "V2_BATCH_".to_string(),
                task_prefix: "V2_TASK_".to_string(),
                layout: SchemaLayout::Current,
                is_default: false,
            },
        ]
    }

    pub fn prefixes(&self) -> TablePrefixes<'_> {
        TablePrefixes {
            job: &self.job_prefix,
            task: &self.task_prefix,
        }
    }

    /// Physical name of a job table, e.g. `JOB_EXECUTION`.
    pub fn job_table(&self, base: &str) -> String {
        format!("{}{}", self.job_prefix, base)
    }

    /// Physical name of a task table, e.g. `JOB_LINK`.
    pub fn task_table(&self, base: &str) -> String {
        format!("{}{}", self.task_prefix, base)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("No such schema target: {0}")]
pub struct UnknownTarget(pub String);

/// Looks up whether a target already holds history for a job name.
pub trait TargetProbe: Send + Sync {
    fn has_job_name(&self, target: &SchemaTarget, name: &str) -> Result<bool>;
}

pub struct SchemaTargetResolver {
    /// Default target first, then the others in configured order.
    targets: Vec<SchemaTarget>,
    /// Explicit job/task name to target name bindings.
    bindings: HashMap<String, String>,
    probe: Option<Arc<dyn TargetProbe>>,
}

impl SchemaTargetResolver {
    pub fn new(targets: Vec<SchemaTarget>, bindings: HashMap<String, String>) -> Result<Self> {
        if targets.is_empty() {
            bail!("At least one schema target must be configured");
        }
        let mut names = HashSet::new();
        for target in &targets {
            if !names.insert(target.name.as_str()) {
                bail!("Duplicate schema target: {}", target.name);
            }
        }
        let defaults = targets.iter().filter(|t| t.is_default).count();
        if defaults != 1 {
            bail!("Exactly one default schema target expected, found {}", defaults);
        }
        for (job, target) in &bindings {
            if !names.contains(target.as_str()) {
                bail!("Job {} is bound to unknown schema target {}", job, target);
            }
        }

        let mut targets = targets;
        targets.sort_by_key(|t| !t.is_default);

        Ok(Self {
            targets,
            bindings,
            probe: None,
        })
    }

    /// Enables resolution by prior writes: `target_for` will look for
    /// existing history of a name before falling back to the default.
    pub fn with_probe(mut self, probe: Arc<dyn TargetProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn all_targets(&self) -> &[SchemaTarget] {
        &self.targets
    }

    pub fn default_target(&self) -> &SchemaTarget {
        &self.targets[0]
    }

    pub fn get(&self, name: &str) -> Option<&SchemaTarget> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// The named target, or the default one when no name is given.
    pub fn resolve(&self, name: Option<&str>) -> Result<&SchemaTarget, UnknownTarget> {
        match name {
            None => Ok(self.default_target()),
            Some(name) => self
                .get(name)
                .ok_or_else(|| UnknownTarget(name.to_string())),
        }
    }

    /// Target holding the history of a job or task name: an explicit
    /// binding, else the first target that already has history for the
    /// name, else the default.
    pub fn target_for(&self, name: &str) -> &SchemaTarget {
        if let Some(target) = self.bindings.get(name).and_then(|t| self.get(t)) {
            return target;
        }

        if let Some(probe) = &self.probe {
            for target in &self.targets {
                match probe.has_job_name(target, name) {
                    Ok(true) => {
                        debug!("Resolved {} to schema target {} by history", name, target.name);
                        return target;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(
                        "Failed to probe schema target {} for {}: {}",
                        target.name, name, e
                    ),
                }
            }
        }

        self.default_target()
    }
}
