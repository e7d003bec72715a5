use crate::context_codec::DeserializedContext;
use crate::execution_store::{ExecutionFilter, ExecutionRecord, JobInstance, StepRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Upper bound on the shutdown drain.
    pub shutdown_timeout: Duration,
    pub poll_interval: Duration,
    /// How often finished executions are dropped from the active set.
    pub sweep_interval: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A page request over execution history.
#[derive(Debug, Clone)]
pub struct ExecutionQuery {
    pub filter: ExecutionFilter,
    pub offset: u64,
    pub page_size: u64,
    pub with_step_count: bool,
    /// Restricts the query to one schema target. Without it every target
    /// is searched, except for id-keyed filters which use the default.
    pub target: Option<String>,
}

impl ExecutionQuery {
    pub fn new(filter: ExecutionFilter, offset: u64, page_size: u64) -> Self {
        Self {
            filter,
            offset,
            page_size,
            with_step_count: false,
            target: None,
        }
    }

    pub fn with_step_count(mut self) -> Self {
        self.with_step_count = true;
        self
    }

    pub fn in_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPage {
    pub records: Vec<ExecutionRecord>,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepPage {
    pub records: Vec<StepRecord>,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionDetail {
    pub record: ExecutionRecord,
    pub instance: Option<JobInstance>,
    pub steps: Vec<StepRecord>,
    /// `None` when the context could not be loaded or none was stored.
    pub context: Option<DeserializedContext>,
}

/// Rows that can be merged across schema targets.
pub(super) trait HistoryRow {
    fn start_time(&self) -> Option<DateTime<Utc>>;
    fn id(&self) -> i64;
    fn schema_target(&self) -> &str;
}

impl HistoryRow for ExecutionRecord {
    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn schema_target(&self) -> &str {
        &self.schema_target
    }
}

impl HistoryRow for StepRecord {
    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn schema_target(&self) -> &str {
        &self.schema_target
    }
}

/// Start time descending with unstarted rows last, then id descending,
/// then target name.
pub(super) fn newest_first<T: HistoryRow>(a: &T, b: &T) -> Ordering {
    let by_start = match (a.start_time(), b.start_time()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_start
        .then_with(|| b.id().cmp(&a.id()))
        .then_with(|| a.schema_target().cmp(b.schema_target()))
}

/// The per-target paging key (id descending), with the target name breaking
/// ties between targets that reuse an id.
pub(super) fn by_paging_key<T: HistoryRow>(a: &T, b: &T) -> Ordering {
    b.id()
        .cmp(&a.id())
        .then_with(|| a.schema_target().cmp(b.schema_target()))
}

/// Sorts rows gathered from several targets and cuts out one page.
///
/// Each target hands over its leading rows in paging-key order, so the merge
/// must sort on that same key for the window to hold every row of the page.
pub(super) fn merge_page<T: HistoryRow>(mut rows: Vec<T>, offset: u64, page_size: u64) -> Vec<T> {
    rows.sort_by(by_paging_key);
    rows.into_iter()
        .skip(offset as usize)
        .take(page_size as usize)
        .collect()
}
