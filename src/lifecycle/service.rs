use super::active::ActiveExecutions;
use super::error::LifecycleError;
use super::launcher::{ExecutionHandle, Launcher};
use super::models::*;
use crate::context_codec::ContextCodec;
use crate::execution_store::{
    BatchStatus, ExecutionFilter, ExecutionReader, ExecutionRecord, ExecutionRepository,
    JobParameters, StaleRecord, StepRecord,
};
use crate::schema_target::{SchemaTarget, SchemaTargetResolver};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Entry point for reading execution history and changing execution state.
///
/// Reads fan out over every schema target unless the caller names one.
/// State changes go through the launcher for job types it manages and
/// straight to the store otherwise.
pub struct JobLifecycleService {
    reader: Arc<dyn ExecutionReader>,
    repository: Arc<dyn ExecutionRepository>,
    resolver: Arc<SchemaTargetResolver>,
    launcher: Arc<dyn Launcher>,
    codec: ContextCodec,
    active: Arc<ActiveExecutions>,
    settings: LifecycleSettings,
    sweeper_token: CancellationToken,
}

impl JobLifecycleService {
    /// Creates the service. When called inside a tokio runtime, also starts
    /// the task that periodically drops finished executions from the active
    /// set; it runs until [`shutdown`](Self::shutdown) or drop.
    pub fn new(
        reader: Arc<dyn ExecutionReader>,
        repository: Arc<dyn ExecutionRepository>,
        resolver: Arc<SchemaTargetResolver>,
        launcher: Arc<dyn Launcher>,
        settings: LifecycleSettings,
    ) -> Self {
        let active = Arc::new(ActiveExecutions::new());
        let sweeper_token = CancellationToken::new();

        if Handle::try_current().is_ok() {
            spawn_sweeper(
                reader.clone(),
                resolver.clone(),
                active.clone(),
                settings.sweep_interval,
                sweeper_token.clone(),
            );
        } else {
            debug!("No async runtime, active executions are swept on shutdown only");
        }

        Self {
            reader,
            repository,
            resolver,
            launcher,
            codec: ContextCodec::default(),
            active,
            settings,
            sweeper_token,
        }
    }

    pub fn targets(&self) -> &[SchemaTarget] {
        self.resolver.all_targets()
    }

    /// Creates missing tables for every schema target.
    pub fn ensure_schema(&self) -> Result<usize, LifecycleError> {
        let mut created = 0;
        for target in self.resolver.all_targets() {
            created += self.repository.ensure_schema(target)?;
        }
        Ok(created)
    }

    pub fn active_executions(&self) -> Vec<ExecutionHandle> {
        self.active.snapshot()
    }

    fn handle_for(record: &ExecutionRecord) -> ExecutionHandle {
        ExecutionHandle::new(record.schema_target.clone(), record.id, record.name.clone())
    }

    fn load_execution(
        &self,
        target: &SchemaTarget,
        execution_id: i64,
    ) -> Result<ExecutionRecord, LifecycleError> {
        self.reader
            .get_execution(target, execution_id)?
            .ok_or_else(|| LifecycleError::NotFound {
                kind: "execution",
                id: execution_id,
                target: target.name.clone(),
            })
    }

    fn persist(
        &self,
        target: &SchemaTarget,
        record: &ExecutionRecord,
    ) -> Result<ExecutionRecord, LifecycleError> {
        self.repository
            .update_execution(target, record)
            .map_err(|e| match e.downcast_ref::<StaleRecord>() {
                Some(stale) => LifecycleError::OptimisticLock {
                    id: stale.id,
                    target: stale.target.clone(),
                    version: stale.expected_version,
                },
                None => LifecycleError::Store(e),
            })
    }

    /// Target to page directly, or `None` when every target is searched.
    fn single_target(
        &self,
        target: Option<&str>,
        filter: &ExecutionFilter,
    ) -> Result<Option<&SchemaTarget>, LifecycleError> {
        match target {
            Some(name) => Ok(Some(self.resolver.resolve(Some(name))?)),
            None if filter.is_keyed_by_id() => Ok(Some(self.resolver.default_target())),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn list_executions(&self, query: &ExecutionQuery) -> Result<ExecutionPage, LifecycleError> {
        if let Some(target) = self.single_target(query.target.as_deref(), &query.filter)? {
            let records = self.reader.list_executions(
                target,
                &query.filter,
                query.offset,
                query.page_size,
                query.with_step_count,
            )?;
            let total_count = self.reader.count_executions(target, &query.filter)?;
            return Ok(ExecutionPage {
                records,
                total_count,
            });
        }

        // Each target's newest offset + page_size rows are enough to cut the
        // merged page.
        let window = query.offset + query.page_size;
        let mut rows = Vec::new();
        let mut total_count = 0;
        for target in self.resolver.all_targets() {
            rows.extend(self.reader.list_executions(
                target,
                &query.filter,
                0,
                window,
                query.with_step_count,
            )?);
            total_count += self.reader.count_executions(target, &query.filter)?;
        }
        Ok(ExecutionPage {
            records: merge_page(rows, query.offset, query.page_size),
            total_count,
        })
    }

    pub fn count_executions(
        &self,
        filter: &ExecutionFilter,
        target: Option<&str>,
    ) -> Result<u64, LifecycleError> {
        if let Some(target) = self.single_target(target, filter)? {
            return Ok(self.reader.count_executions(target, filter)?);
        }
        let mut total = 0;
        for target in self.resolver.all_targets() {
            total += self.reader.count_executions(target, filter)?;
        }
        Ok(total)
    }

    /// Loads an execution with its instance, steps and decoded context.
    /// A context that cannot be loaded is left out rather than failing.
    pub fn get_execution(
        &self,
        execution_id: i64,
        target: Option<&str>,
    ) -> Result<ExecutionDetail, LifecycleError> {
        let target = self.resolver.resolve(target)?;
        let record = self.load_execution(target, execution_id)?;
        let instance = self.reader.get_job_instance(target, record.instance_id)?;
        let steps = self.reader.step_executions(target, execution_id)?;
        let context = match self.reader.execution_context(target, execution_id) {
            Ok(blob) => blob.map(|bytes| self.codec.decode(&bytes)),
            Err(e) => {
                info!(
                    "Could not load context of execution {} in {}: {}",
                    execution_id, target.name, e
                );
                None
            }
        };
        Ok(ExecutionDetail {
            record,
            instance,
            steps,
            context,
        })
    }

    pub fn get_step_execution(
        &self,
        execution_id: i64,
        step_id: i64,
        target: Option<&str>,
    ) -> Result<StepRecord, LifecycleError> {
        let target = self.resolver.resolve(target)?;
        self.load_execution(target, execution_id)?;
        self.reader
            .get_step_execution(target, execution_id, step_id)?
            .ok_or_else(|| LifecycleError::NotFound {
                kind: "step execution",
                id: step_id,
                target: target.name.clone(),
            })
    }

    pub fn list_step_executions(
        &self,
        execution_id: i64,
        target: Option<&str>,
    ) -> Result<Vec<StepRecord>, LifecycleError> {
        let target = self.resolver.resolve(target)?;
        self.load_execution(target, execution_id)?;
        Ok(self.reader.step_executions(target, execution_id)?)
    }

    /// Steps of every target whose job and step names match the patterns.
    pub fn find_step_executions(
        &self,
        job_pattern: &str,
        step_pattern: &str,
        offset: u64,
        count: u64,
    ) -> Result<StepPage, LifecycleError> {
        let mut rows = Vec::new();
        let mut total_count = 0;
        for target in self.resolver.all_targets() {
            rows.extend(self.reader.find_step_executions(
                target,
                job_pattern,
                step_pattern,
                0,
                offset + count,
            )?);
            total_count += self
                .reader
                .count_step_executions(target, job_pattern, step_pattern)?;
        }
        Ok(StepPage {
            records: merge_page(rows, offset, count),
            total_count,
        })
    }

    fn all_job_names(&self) -> Result<BTreeSet<String>, LifecycleError> {
        let mut names = BTreeSet::new();
        for target in self.resolver.all_targets() {
            names.extend(self.reader.job_names(target)?);
        }
        Ok(names)
    }

    /// Distinct job names across targets, sorted.
    pub fn list_job_names(&self, offset: u64, count: u64) -> Result<Vec<String>, LifecycleError> {
        Ok(self
            .all_job_names()?
            .into_iter()
            .skip(offset as usize)
            .take(count as usize)
            .collect())
    }

    pub fn count_job_names(&self) -> Result<u64, LifecycleError> {
        Ok(self.all_job_names()?.len() as u64)
    }

    /// Parameters of the newest execution of the job's newest instance.
    pub fn last_job_parameters(&self, job_name: &str) -> Result<Option<JobParameters>, LifecycleError> {
        let target = self.resolver.target_for(job_name);
        let Some(instance) = self.reader.latest_job_instance(target, job_name)? else {
            return Ok(None);
        };
        Ok(self
            .reader
            .last_execution_for_instance(target, instance.id)?
            .map(|execution| execution.parameters))
    }

    /// Running executions of every target, newest first.
    pub fn list_running(&self, job_name: Option<&str>) -> Result<Vec<ExecutionRecord>, LifecycleError> {
        let mut rows = Vec::new();
        for target in self.resolver.all_targets() {
            rows.extend(self.reader.running_executions(target, job_name)?);
        }
        rows.sort_by(newest_first);
        Ok(rows)
    }

    pub fn executions_for_instance(
        &self,
        instance_id: i64,
        target: Option<&str>,
    ) -> Result<Vec<ExecutionRecord>, LifecycleError> {
        let target = self.resolver.resolve(target)?;
        if self.reader.get_job_instance(target, instance_id)?.is_none() {
            return Err(LifecycleError::NotFound {
                kind: "job instance",
                id: instance_id,
                target: target.name.clone(),
            });
        }
        Ok(self.reader.executions_for_instance(target, instance_id)?)
    }

    // =========================================================================
    // State changes
    // =========================================================================

    /// Signals a running execution to stop and returns the refreshed record.
    /// Delivery of the signal is guaranteed, completion is not.
    pub fn stop(
        &self,
        execution_id: i64,
        target: Option<&str>,
    ) -> Result<ExecutionRecord, LifecycleError> {
        let target = self.resolver.resolve(target)?;
        let mut record = self.load_execution(target, execution_id)?;
        if !record.is_running() {
            return Err(LifecycleError::ExecutionNotRunning {
                id: execution_id,
                target: target.name.clone(),
                status: record.status,
            });
        }

        if self.launcher.manages(&record.name) {
            self.launcher
                .stop(&Self::handle_for(&record))
                .map_err(LifecycleError::Launcher)?;
            info!(
                "Sent stop signal to execution {} of {} in {}",
                execution_id, record.name, target.name
            );
            return self.load_execution(target, execution_id);
        }

        record.status = BatchStatus::Stopping;
        let stored = self.persist(target, &record)?;
        info!(
            "Marked execution {} of {} in {} as stopping",
            execution_id, stored.name, target.name
        );
        Ok(stored)
    }

    /// Marks an execution that is not making progress as abandoned.
    pub fn abandon(
        &self,
        execution_id: i64,
        target: Option<&str>,
    ) -> Result<ExecutionRecord, LifecycleError> {
        let target = self.resolver.resolve(target)?;
        let mut record = self.load_execution(target, execution_id)?;
        if record.status.is_less_than(BatchStatus::Stopping) {
            return Err(LifecycleError::AlreadyRunning {
                id: execution_id,
                target: target.name.clone(),
                status: record.status,
            });
        }

        record.status = BatchStatus::Abandoned;
        record.end_time = Some(Utc::now());
        let stored = self.persist(target, &record)?;
        if self.launcher.manages(&stored.name) {
            self.launcher
                .abandon(&Self::handle_for(&stored))
                .map_err(LifecycleError::Launcher)?;
        }
        self.active.release(&target.name, execution_id);
        info!("Abandoned execution {} of {} in {}", execution_id, stored.name, target.name);
        Ok(stored)
    }

    /// Starts a new execution of a stopped or failed execution's instance,
    /// with the prior parameters unless others are given.
    pub fn restart(
        &self,
        execution_id: i64,
        target: Option<&str>,
        parameters: Option<JobParameters>,
    ) -> Result<ExecutionRecord, LifecycleError> {
        let target = self.resolver.resolve(target)?;
        let record = self.load_execution(target, execution_id)?;
        if !self.launcher.manages(&record.name) {
            return Err(LifecycleError::NoSuchJob(record.name));
        }
        if !matches!(record.status, BatchStatus::Stopped | BatchStatus::Failed) {
            return Err(LifecycleError::NotRestartable {
                id: execution_id,
                target: target.name.clone(),
                status: record.status,
            });
        }

        let parameters = parameters.unwrap_or_else(|| record.parameters.clone());
        let handle = self
            .launcher
            .restart(&Self::handle_for(&record), &parameters)
            .map_err(LifecycleError::Launcher)?;
        info!(
            "Restarted execution {} of {} in {} as execution {}",
            execution_id, record.name, target.name, handle.execution_id
        );
        self.track_launched(handle)
    }

    pub fn launch(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<ExecutionRecord, LifecycleError> {
        if !self.launcher.manages(job_name) {
            return Err(LifecycleError::NoSuchJob(job_name.to_string()));
        }
        let target = self.resolver.target_for(job_name);
        let handle = self
            .launcher
            .start(target, job_name, parameters)
            .map_err(LifecycleError::Launcher)?;
        info!(
            "Launched {} as execution {} in {}",
            job_name, handle.execution_id, handle.target
        );
        self.track_launched(handle)
    }

    fn track_launched(&self, handle: ExecutionHandle) -> Result<ExecutionRecord, LifecycleError> {
        let target = self.resolver.resolve(Some(handle.target.as_str()))?;
        let record = self.load_execution(target, handle.execution_id)?;
        if record.is_running() {
            self.active.track(handle);
        }
        Ok(record)
    }

    /// Stops every running execution of every target. Returns how many were
    /// signaled.
    pub fn stop_all(&self) -> Result<usize, LifecycleError> {
        let mut signaled = 0;
        for target in self.resolver.all_targets() {
            for record in self.reader.running_executions(target, None)? {
                match self.stop(record.id, Some(target.name.as_str())) {
                    Ok(_) => signaled += 1,
                    // Finished between the listing and the stop.
                    Err(LifecycleError::ExecutionNotRunning { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(signaled)
    }

    /// Drops executions that are no longer running from the active set.
    pub fn remove_inactive_executions(&self) -> usize {
        sweep_inactive(self.reader.as_ref(), &self.resolver, &self.active)
    }

    /// Stops every active execution and waits, up to the shutdown timeout,
    /// for them to finish. Executions still running at the timeout are left
    /// alone. The first stop failure is returned once the wait is over.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        let started = Instant::now();
        let handles = self.active.snapshot();
        info!("Stopping {} active executions", handles.len());

        let mut first_error = None;
        for handle in &handles {
            match self.stop(handle.execution_id, Some(handle.target.as_str())) {
                Ok(_) => {}
                Err(e @ LifecycleError::ExecutionNotRunning { .. }) => info!("{}", e),
                Err(e) => {
                    error!(
                        "Failed to stop execution {} in {}: {}",
                        handle.execution_id, handle.target, e
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let poll_ms = (self.settings.poll_interval.as_millis() as u64).max(1);
        let timeout_ms = self.settings.shutdown_timeout.as_millis() as u64;
        let max_polls = (timeout_ms + poll_ms) / poll_ms;
        let mut polls = 0;
        loop {
            if self.active.is_empty() {
                break;
            }
            polls += 1;
            if polls >= max_polls {
                break;
            }
            sweep_off_runtime(
                self.reader.clone(),
                self.resolver.clone(),
                self.active.clone(),
            )
            .await;
            tokio::time::sleep(Duration::from_millis(poll_ms)).await;
        }

        self.sweeper_token.cancel();
        let remaining = self.active.len();
        if remaining > 0 {
            warn!(
                "{} executions still active after {:?}, leaving them running",
                remaining,
                started.elapsed()
            );
        } else {
            info!("All active executions drained in {:?}", started.elapsed());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for JobLifecycleService {
    fn drop(&mut self) {
        self.sweeper_token.cancel();
    }
}

fn sweep_inactive(
    reader: &dyn ExecutionReader,
    resolver: &SchemaTargetResolver,
    active: &ActiveExecutions,
) -> usize {
    let inactive: Vec<ExecutionHandle> = active
        .snapshot()
        .into_iter()
        .filter(|handle| {
            let Some(target) = resolver.get(&handle.target) else {
                return true;
            };
            match reader.get_execution(target, handle.execution_id) {
                Ok(Some(record)) => !record.is_running(),
                Ok(None) => true,
                Err(e) => {
                    warn!(
                        "Could not check execution {} in {}: {}",
                        handle.execution_id, handle.target, e
                    );
                    false
                }
            }
        })
        .collect();

    for handle in &inactive {
        active.release(&handle.target, handle.execution_id);
        debug!(
            "Execution {} in {} is no longer active",
            handle.execution_id, handle.target
        );
    }
    inactive.len()
}

/// Runs [`sweep_inactive`] on the blocking pool, since each check is a
/// SQLite read.
async fn sweep_off_runtime(
    reader: Arc<dyn ExecutionReader>,
    resolver: Arc<SchemaTargetResolver>,
    active: Arc<ActiveExecutions>,
) -> usize {
    let result =
        tokio::task::spawn_blocking(move || sweep_inactive(reader.as_ref(), &resolver, &active))
            .await;
    match result {
        Ok(removed) => removed,
        Err(e) => {
            error!("Active execution sweep panicked: {}", e);
            0
        }
    }
}

fn spawn_sweeper(
    reader: Arc<dyn ExecutionReader>,
    resolver: Arc<SchemaTargetResolver>,
    active: Arc<ActiveExecutions>,
    interval: Duration,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Active execution sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed =
                        sweep_off_runtime(reader.clone(), resolver.clone(), active.clone()).await;
                    if removed > 0 {
                        debug!("Swept {} finished executions", removed);
                    }
                }
            }
        }
    });
}
