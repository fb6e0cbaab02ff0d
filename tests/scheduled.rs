mod common;

use bulkpay::application::service::ExecuteRequest;
use bulkpay::domain::job::{ExecutionMode, ItemStatus, JobStatus};
use bulkpay::error::BatchError;
use chrono::{Duration, Utc};
use common::{ScriptedClient, payments, service};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_scheduled_job_starts_at_its_time() {
    let client = Arc::new(ScriptedClient::new());
    let service = service(client.clone());
    let job_id = service.submit(payments(3)).await.unwrap().job.id;

    let at = Utc::now() + Duration::hours(1);
    let armed = service
        .execute(job_id, ExecuteRequest::scheduled(at))
        .await
        .unwrap();
    assert_eq!(armed.job.status, JobStatus::Ready);
    assert_eq!(armed.job.execution_mode, ExecutionMode::Scheduled { at });
    assert_eq!(client.started(), 0);

    // A second execute while the schedule is armed is rejected.
    assert!(matches!(
        service.execute(job_id, ExecuteRequest::immediate()).await,
        Err(BatchError::InvalidState { .. })
    ));

    let mut status = service.watch_status(job_id).await.unwrap();
    status
        .wait_for(|status| *status == JobStatus::Running)
        .await
        .unwrap();
    service.wait_until_settled(job_id).await;

    let done = service.get_status(job_id).await.unwrap();
    assert_eq!(done.job.status, JobStatus::Completed);
    assert_eq!(client.started(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_job_can_be_cancelled_before_start() {
    let client = Arc::new(ScriptedClient::new());
    let service = service(client.clone());
    let job_id = service.submit(payments(3)).await.unwrap().job.id;

    service
        .execute(
            job_id,
            ExecuteRequest::scheduled(Utc::now() + Duration::minutes(30)),
        )
        .await
        .unwrap();

    let cancelled = service.cancel(job_id).await.unwrap();
    assert_eq!(cancelled.job.status, JobStatus::Cancelled);
    assert!(
        cancelled
            .job
            .items
            .iter()
            .all(|item| item.status == ItemStatus::Cancelled)
    );

    service.wait_until_settled(job_id).await;
    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    assert_eq!(client.started(), 0);
    assert_eq!(
        service.get_status(job_id).await.unwrap().job.status,
        JobStatus::Cancelled
    );
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_job_cannot_be_paused_before_start() {
    let service = service(Arc::new(ScriptedClient::new()));
    let job_id = service.submit(payments(1)).await.unwrap().job.id;
    service
        .execute(job_id, ExecuteRequest::scheduled(Utc::now() + Duration::hours(2)))
        .await
        .unwrap();

    assert!(matches!(
        service.pause(job_id).await,
        Err(BatchError::InvalidState {
            status: JobStatus::Ready,
            action: "pause",
            ..
        })
    ));
}

#[tokio::test]
async fn test_schedule_in_the_past_starts_at_once() {
    let client = Arc::new(ScriptedClient::new());
    let service = service(client.clone());
    let job_id = service.submit(payments(2)).await.unwrap().job.id;

    service
        .execute(job_id, ExecuteRequest::scheduled(Utc::now() - Duration::minutes(5)))
        .await
        .unwrap();
    service.wait_until_settled(job_id).await;

    assert_eq!(
        service.get_status(job_id).await.unwrap().job.status,
        JobStatus::Completed
    );
    assert_eq!(client.started(), 2);
}
