use std::sync::Arc;

use nimport::*;
use nimport_testkit::fixtures;
use nimport_testkit::{FailStage, Harness, ScriptedEngineFactory};

fn service(harness: &Harness, workers: usize) -> ImportService {
    ImportService::new(Arc::new(harness.dispatcher(workers)))
}

#[tokio::test]
async fn test_execute_inline_and_report_status() {
    let harness = Harness::new(ScriptedEngineFactory::new().with_diff("+ vlan 20", 1));
    let service = service(&harness, 0);
    let mut events = harness.events.subscribe_job_events();

    let response = service
        .execute(fixtures::request(JobMode::Check))
        .await
        .unwrap();
    assert_eq!(response.execution_mode, "immediate");
    assert_eq!(response.worker_count, 0);
    assert!(response.job.success);
    assert_eq!(response.job.job.status, JobStatus::Completed);
    assert_eq!(response.job.job.site_code, fixtures::SITE);
    assert!(response.job.logs_count > 0);

    let status = service.status(response.job.job.id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert!(status.success);
    assert!(!status.has_errors);
    assert_eq!(status.error_logs_count, 0);
    assert_eq!(status.logs_count, response.job.logs_count);
    assert_eq!(status.worker_count, 0);
    assert!(status.started_at.is_some());

    let first = events.recv().await.unwrap();
    assert_eq!(first.payload.name(), "created");
}

#[tokio::test]
async fn test_execute_queued_reports_worker_mode() {
    let harness = Harness::new(ScriptedEngineFactory::new());
    let service = service(&harness, 4);

    let response = service
        .execute(fixtures::request(JobMode::Apply))
        .await
        .unwrap();
    assert_eq!(response.execution_mode, "worker");
    assert_eq!(response.worker_count, 4);
    assert!(response.outcome.is_queued());
    assert_eq!(response.job.job.status, JobStatus::Queued);
    assert!(!response.job.success);
    assert!(response.job.job.task_ref.is_some());

    let status = service.status(response.job.job.id).await.unwrap();
    assert_eq!(status.status, JobStatus::Queued);
    assert_eq!(status.worker_count, 4);
    assert_eq!(status.logs_count, 0);
}

#[tokio::test]
async fn test_invalid_request_creates_no_job() {
    let harness = Harness::new(ScriptedEngineFactory::new());
    let service = service(&harness, 0);

    let blank = ImportRequest::new("  ", JobMode::Check, fixtures::settings());
    let err = service.execute(blank).await.unwrap_err();
    assert!(matches!(err, ServiceError::Request(RequestError::EmptySite)));

    let bad_mode = ImportRequest {
        site: fixtures::SITE.to_string(),
        mode: "preview".to_string(),
        settings: fixtures::settings(),
    };
    assert!(matches!(
        service.execute(bad_mode).await.unwrap_err(),
        ServiceError::Request(RequestError::InvalidMode(_))
    ));

    let no_network = ImportRequest::new(
        fixtures::SITE,
        JobMode::Check,
        serde_json::json!({ "inventory": { "name": fixtures::INVENTORY_NAME } }),
    );
    let err = service.execute(no_network).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid request: settings.network is required");

    assert!(harness.store.is_empty());
    assert_eq!(harness.engines.create_count(), 0);
}

#[tokio::test]
async fn test_failed_job_status_has_errors() {
    let harness = Harness::new(
        ScriptedEngineFactory::new().failing(FailStage::Inventory, "nautobot returned 502"),
    );
    let service = service(&harness, 0);

    let response = service
        .execute(fixtures::request(JobMode::Check))
        .await
        .unwrap();
    let failure = response
        .outcome
        .result()
        .and_then(ExecutionResult::failure)
        .unwrap();
    assert_eq!(failure.kind, FailureKind::Engine);

    let status = service.status(response.job.job.id).await.unwrap();
    assert_eq!(status.status, JobStatus::Failed);
    assert!(!status.success);
    assert!(status.has_errors);
    assert!(status.error_logs_count >= 1);

    let errors = service
        .logs(response.job.job.id, &LogFilter::errors())
        .await
        .unwrap();
    assert_eq!(errors.len(), status.error_logs_count);
    assert!(errors.iter().all(|entry| entry.level.is_error()));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let harness = Harness::new(ScriptedEngineFactory::new());
    let service = service(&harness, 0);
    let missing = JobId::new();

    assert!(service.status(missing).await.unwrap_err().is_not_found());
    assert!(
        service
            .logs(missing, &LogFilter::default())
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_list_filters_by_site_and_status() {
    let harness = Harness::new(ScriptedEngineFactory::new());
    let service = service(&harness, 0);

    service
        .execute(fixtures::request(JobMode::Check))
        .await
        .unwrap();
    service
        .execute(ImportRequest::new("branch-2", JobMode::Check, fixtures::settings()))
        .await
        .unwrap();

    let all = service.list(&JobFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].created_at >= all[1].created_at);

    let hq = service
        .list(&JobFilter {
            site_code: Some(fixtures::SITE.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(hq.len(), 1);

    let failed = service
        .list(&JobFilter {
            status: Some(JobStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(failed.is_empty());
}
