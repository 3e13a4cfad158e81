//! スクレイピングジョブスケジューラの統合テスト（インメモリリポジトリ + FakeConnector）

use std::time::Duration;

use workloom_integration_server::domain::entity::account::AccountStatus;
use workloom_integration_server::domain::entity::scraping_job::{JobConfig, JobStatus, JobType};
use workloom_integration_server::domain::error::IntegrationError;
use workloom_integration_server::test_support::{
    active_account, build_harness, fast_linkedin_config, linkedin_credentials, person,
    FakeConnector,
};
use workloom_integration_server::usecase::account_registry::CreateAccountInput;
use workloom_integration_server::usecase::scraping_job_scheduler::SubmitJobInput;

fn search_input(max_results: u32) -> SubmitJobInput {
    SubmitJobInput {
        job_type: JobType::ProfileSearch,
        config: JobConfig {
            search_query: Some("engineering manager".into()),
            max_results,
            ..JobConfig::default()
        },
    }
}

fn people(n: usize) -> Vec<workloom_integration_server::domain::entity::profile::DiscoveredRecord> {
    (0..n)
        .map(|i| person(&format!("p{i}"), &format!("Person {i}"), "Engineer", "Acme"))
        .collect()
}

#[tokio::test]
async fn test_job_completes_and_counts_results() {
    let h = build_harness(FakeConnector::new(), 4).unwrap();
    h.connector.set_people(people(7)).await;
    let account = active_account(
        &h.state,
        "alice",
        linkedin_credentials("alice@example.com"),
        Some(fast_linkedin_config(500)),
    )
    .await
    .unwrap();

    let job = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(100))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let done = h.state.scheduler.wait("alice", job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.found, 7);
    assert_eq!(done.scraped, 7);
    assert_eq!(done.failed, 0);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_second_job_on_busy_account_is_conflict() {
    let h = build_harness(FakeConnector::new(), 4).unwrap();
    h.connector.set_people(people(3)).await;
    h.connector.set_fetch_delay(Duration::from_millis(100)).await;
    let account = active_account(
        &h.state,
        "alice",
        linkedin_credentials("alice@example.com"),
        Some(fast_linkedin_config(500)),
    )
    .await
    .unwrap();

    let first = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(10))
        .await
        .unwrap();
    let second = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(10))
        .await;
    assert!(matches!(second, Err(IntegrationError::Conflict(_))));

    let done = h.state.scheduler.wait("alice", first.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    // 完了後は同じアカウントで再び投入できる
    let third = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(10))
        .await
        .unwrap();
    h.state.scheduler.wait("alice", third.id).await.unwrap();
}

#[tokio::test]
async fn test_failed_detail_fetch_is_counted_not_fatal() {
    let h = build_harness(FakeConnector::new(), 4).unwrap();
    h.connector.set_people(people(4)).await;
    h.connector
        .fail_profile("https://www.linkedin.com/in/p2")
        .await;
    let account = active_account(
        &h.state,
        "alice",
        linkedin_credentials("alice@example.com"),
        Some(fast_linkedin_config(500)),
    )
    .await
    .unwrap();

    let job = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(100))
        .await
        .unwrap();
    let done = h.state.scheduler.wait("alice", job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.found, 4);
    assert_eq!(done.scraped, 3);
    assert_eq!(done.failed, 1);
    assert!(done.scraped + done.failed <= done.found);

    let account = h.state.accounts.get("alice", account.id).await.unwrap();
    assert_eq!(account.status, AccountStatus::Active);
}

#[tokio::test]
async fn test_max_results_caps_found() {
    let h = build_harness(FakeConnector::new(), 4).unwrap();
    h.connector.set_people(people(30)).await;
    let account = active_account(
        &h.state,
        "alice",
        linkedin_credentials("alice@example.com"),
        Some(fast_linkedin_config(500)),
    )
    .await
    .unwrap();

    let job = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(12))
        .await
        .unwrap();
    let done = h.state.scheduler.wait("alice", job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.found, 12);
    assert_eq!(done.scraped, 12);
}

#[tokio::test]
async fn test_cancel_keeps_partial_results() {
    let h = build_harness(FakeConnector::new(), 4).unwrap();
    h.connector.set_people(people(40)).await;
    h.connector.set_fetch_delay(Duration::from_millis(50)).await;
    let account = active_account(
        &h.state,
        "alice",
        linkedin_credentials("alice@example.com"),
        Some(fast_linkedin_config(500)),
    )
    .await
    .unwrap();

    let job = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(40))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cancelled = h.state.scheduler.cancel("alice", job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.scraped < 40);
    assert!(cancelled.scraped + cancelled.failed <= cancelled.found);

    // 終了済みジョブのキャンセルは Conflict
    let again = h.state.scheduler.cancel("alice", job.id).await;
    assert!(matches!(again, Err(IntegrationError::Conflict(_))));

    // キャンセル後はアカウントが解放されている
    assert!(!h.state.scheduler.is_running(account.id));
    h.connector.set_fetch_delay(Duration::from_millis(0)).await;
    let next = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(2))
        .await
        .unwrap();
    let next = h.state.scheduler.wait("alice", next.id).await.unwrap();
    assert_eq!(next.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_account_awaiting_validation_is_unavailable() {
    let h = build_harness(FakeConnector::new(), 4).unwrap();
    let account = h
        .state
        .accounts
        .create(
            "alice",
            CreateAccountInput {
                name: "unverified".into(),
                credentials: linkedin_credentials("alice@example.com"),
                config: Some(fast_linkedin_config(500)),
            },
        )
        .await
        .unwrap();
    assert_eq!(account.status, AccountStatus::Testing);

    let result = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(10))
        .await;
    assert!(matches!(result, Err(IntegrationError::AccountUnavailable(_))));
}

#[tokio::test]
async fn test_other_users_job_is_not_found() {
    let h = build_harness(FakeConnector::new(), 4).unwrap();
    h.connector.set_people(people(1)).await;
    let account = active_account(
        &h.state,
        "alice",
        linkedin_credentials("alice@example.com"),
        Some(fast_linkedin_config(500)),
    )
    .await
    .unwrap();
    let job = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(1))
        .await
        .unwrap();
    h.state.scheduler.wait("alice", job.id).await.unwrap();

    let result = h.state.scheduler.get("mallory", job.id).await;
    assert!(matches!(result, Err(IntegrationError::NotFound(_))));
}

#[tokio::test]
async fn test_quota_exhaustion_fails_job_as_retryable_with_partial_counts() {
    let h = build_harness(FakeConnector::new(), 4).unwrap();
    h.connector.set_people(people(5)).await;
    let account = active_account(
        &h.state,
        "alice",
        linkedin_credentials("alice@example.com"),
        Some(fast_linkedin_config(2)),
    )
    .await
    .unwrap();

    // 検索ページで 1 単位、1 件目の詳細取得で 1 単位を使い切る
    let job = h
        .state
        .scheduler
        .submit("alice", account.id, search_input(10))
        .await
        .unwrap();
    let done = h.state.scheduler.wait("alice", job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.retryable);
    assert_eq!(done.found, 5);
    assert_eq!(done.scraped, 1);
    assert_eq!(done.failed, 0);
    assert!(done
        .error_message
        .as_deref()
        .is_some_and(|m| m.starts_with("daily quota exceeded")));

    let account = h.state.accounts.get("alice", account.id).await.unwrap();
    assert_eq!(account.status, AccountStatus::Active);
}
