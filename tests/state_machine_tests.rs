mod common;

use common::{RecordingLauncher, TestHistory};
use execution_history::execution_store::{
    BatchStatus, ExecutionFilter, JobParameter, JobParameters, ParameterValue,
};
use execution_history::lifecycle::{LifecycleError, LifecycleSettings};
use std::sync::Arc;

#[test]
fn test_abandon_running_execution_is_rejected() {
    let history = TestHistory::new();
    let id = history.insert("legacy", None, "import", BatchStatus::Started);
    let service = history.service(LifecycleSettings::default());

    let err = service.abandon(id, None).unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyRunning { .. }));
    assert!(err.is_invalid_state());
    assert_eq!(
        service.get_execution(id, None).unwrap().record.status,
        BatchStatus::Started
    );
}

#[test]
fn test_stop_completed_execution_is_rejected() {
    let history = TestHistory::new();
    let id = history.insert("legacy", None, "import", BatchStatus::Completed);
    let service = history.service(LifecycleSettings::default());

    let err = service.stop(id, None).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::ExecutionNotRunning {
            status: BatchStatus::Completed,
            ..
        }
    ));
}

#[test]
fn test_stop_then_abandon() {
    let history = TestHistory::new();
    let id = history.insert("current", None, "report", BatchStatus::Started);
    let service = history.service(LifecycleSettings::default());

    let stopping = service.stop(id, Some("current")).unwrap();
    assert_eq!(stopping.status, BatchStatus::Stopping);
    assert!(stopping.end_time.is_none());

    let abandoned = service.abandon(id, Some("current")).unwrap();
    assert_eq!(abandoned.status, BatchStatus::Abandoned);
    assert!(abandoned.end_time.is_some());
    assert_eq!(abandoned.version, stopping.version + 1);

    // Abandoned is final: no stop, no restart.
    assert!(matches!(
        service.stop(id, Some("current")).unwrap_err(),
        LifecycleError::ExecutionNotRunning { .. }
    ));
    let abandoned_count = service
        .count_executions(&ExecutionFilter::Status(BatchStatus::Abandoned), Some("current"))
        .unwrap();
    assert_eq!(abandoned_count, 1);
}

#[test]
fn test_restart_failed_execution_with_prior_parameters() {
    let history = TestHistory::new();
    let launcher = Arc::new(RecordingLauncher::new(
        history.repository.clone(),
        history.targets.clone(),
    ));
    let service = history.service_with_launcher(launcher, LifecycleSettings::default());

    let params =
        JobParameters::new().with("run", JobParameter::identifying(ParameterValue::Long(3)));
    let first = service.launch("import", &params).unwrap();
    let stopped = service.stop(first.id, Some(first.schema_target.as_str())).unwrap();
    assert_eq!(stopped.status, BatchStatus::Started);

    let err = service
        .restart(first.id, Some(first.schema_target.as_str()), None)
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotRestartable { .. }));

    let failed_id = history.insert(&first.schema_target, None, "import", BatchStatus::Failed);
    let restarted = service
        .restart(failed_id, Some(first.schema_target.as_str()), None)
        .unwrap();
    assert_ne!(restarted.id, failed_id);
    assert_eq!(restarted.status, BatchStatus::Started);
    assert_eq!(
        restarted.parameters.get("job").and_then(|p| p.value.as_ref()),
        Some(&ParameterValue::String("import".to_string()))
    );
    assert!(service
        .active_executions()
        .iter()
        .any(|h| h.execution_id == restarted.id));
}

#[test]
fn test_unknown_execution_and_target() {
    let history = TestHistory::new();
    let service = history.service(LifecycleSettings::default());

    let err = service.stop(404, None).unwrap_err();
    assert!(err.is_not_found());
    let err = service.get_execution(1, Some("nowhere")).unwrap_err();
    assert!(matches!(err, LifecycleError::NoSuchTarget(_)));
    assert!(err.is_not_found());
}
