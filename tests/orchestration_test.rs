//! Batch submission, scheduling and job lifecycle against a mock extractor
//!
//! Run with: cargo test --test orchestration_test

mod helpers;

use std::collections::HashSet;
use std::time::Duration;

use helpers::*;
use media_fetch::models::job::{ErrorKind, JobState};
use media_fetch::services::dispatcher::DispatchError;

#[tokio::test]
async fn test_submit_creates_one_record_per_url_in_order() {
    let app = TestApp::default().await;
    let urls = [
        "https://media.example/a",
        "https://media.example/b",
        "https://media.example/c",
    ];

    let submission = app.state.dispatcher.submit(items(&urls)).await.unwrap();
    assert_eq!(submission.job_ids.len(), 3);

    let batch = app.state.tracker.get_batch(submission.batch_id).await.unwrap();
    let ids = batch.iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids, submission.job_ids);
    for (record, url) in batch.iter().zip(urls) {
        assert_eq!(record.url, url);
        assert_eq!(record.batch_id, submission.batch_id);
    }
}

#[tokio::test]
async fn test_completed_jobs_have_output_and_no_error() {
    let app = TestApp::default().await;
    let submission = app
        .state
        .dispatcher
        .submit(items(&["https://media.example/a", "https://media.example/b"]))
        .await
        .unwrap();

    let records = wait_for_all(&app.state.tracker, &submission.job_ids).await;
    for record in records {
        assert_eq!(record.state(), JobState::Completed);
        assert_eq!(record.progress(), 100);
        assert!(record.error().is_none());
        assert!(record.started_at().is_some());
        assert!(record.finished_at() >= record.started_at());

        let output = record.output().expect("completed job has an output");
        assert!(output.path.starts_with(app.dir.path()));
        assert_eq!(std::fs::read(&output.path).unwrap(), MOCK_CONTENT);
    }
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_job() {
    let app = TestApp::default().await;
    let submission = app
        .state
        .dispatcher
        .submit(items(&[
            "https://media.example/first",
            "not a url",
            "https://media.example/third",
        ]))
        .await
        .unwrap();

    let records = wait_for_all(&app.state.tracker, &submission.job_ids).await;

    assert_eq!(records[0].state(), JobState::Completed);
    assert_eq!(records[2].state(), JobState::Completed);

    assert_eq!(records[1].state(), JobState::Failed);
    assert!(records[1].output().is_none());
    assert_eq!(records[1].error().unwrap().kind, ErrorKind::InvalidUrl);
}

#[tokio::test]
async fn test_extractor_failure_is_classified() {
    let app = TestApp::default().await;
    let submission = app
        .state
        .dispatcher
        .submit(items(&["https://media.example/fail"]))
        .await
        .unwrap();

    let record = wait_for_terminal(&app.state.tracker, submission.job_ids[0]).await;
    assert_eq!(record.state(), JobState::Failed);
    let error = record.error().unwrap();
    assert_eq!(error.kind, ErrorKind::ExtractionFailed);
    assert!(error.message.contains("video unavailable"));
}

#[tokio::test]
async fn test_running_jobs_never_exceed_worker_count() {
    let app = TestApp::spawn(
        MockExtractor::new().delay(Duration::from_millis(40)),
        TestOptions {
            workers: 2,
            ..Default::default()
        },
    )
    .await;

    let urls = (0..6)
        .map(|i| format!("https://media.example/{i}"))
        .collect::<Vec<_>>();
    let urls = urls.iter().map(String::as_str).collect::<Vec<_>>();
    let submission = app.state.dispatcher.submit(items(&urls)).await.unwrap();

    let mut observed_max = 0;
    loop {
        let counts = app.state.tracker.counts().await;
        observed_max = observed_max.max(counts.running);
        if counts.completed + counts.failed == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(observed_max <= 2, "saw {observed_max} running jobs");
    assert!(app.extractor.max_running() <= 2);
    assert_eq!(app.extractor.calls(), 6);

    let records = wait_for_all(&app.state.tracker, &submission.job_ids).await;
    assert!(records.iter().all(|r| r.state() == JobState::Completed));
}

#[tokio::test]
async fn test_hanging_job_times_out_and_frees_its_slot() {
    let app = TestApp::spawn(
        MockExtractor::new(),
        TestOptions {
            workers: 1,
            job_timeout: Duration::from_millis(100),
            ..Default::default()
        },
    )
    .await;

    let submission = app
        .state
        .dispatcher
        .submit(items(&[
            "https://media.example/hang",
            "https://media.example/after",
        ]))
        .await
        .unwrap();

    let records = wait_for_all(&app.state.tracker, &submission.job_ids).await;

    assert_eq!(records[0].state(), JobState::Failed);
    assert_eq!(records[0].error().unwrap().kind, ErrorKind::Timeout);
    assert!(records[0].output().is_none());

    assert_eq!(records[1].state(), JobState::Completed);
}

#[tokio::test]
async fn test_stalled_extractor_times_out_and_frees_its_slot() {
    let app = TestApp::spawn(
        MockExtractor::new(),
        TestOptions {
            workers: 1,
            job_timeout: Duration::from_millis(100),
            ..Default::default()
        },
    )
    .await;

    let submission = app
        .state
        .dispatcher
        .submit(items(&[
            "https://media.example/stall",
            "https://media.example/after",
        ]))
        .await
        .unwrap();

    let records = wait_for_all(&app.state.tracker, &submission.job_ids).await;

    assert_eq!(records[0].state(), JobState::Failed);
    assert_eq!(records[0].error().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(records[1].state(), JobState::Completed);
}

#[tokio::test]
async fn test_panicking_job_is_internal_error() {
    let app = TestApp::spawn(
        MockExtractor::new(),
        TestOptions {
            workers: 1,
            ..Default::default()
        },
    )
    .await;

    let submission = app
        .state
        .dispatcher
        .submit(items(&[
            "https://media.example/panic",
            "https://media.example/after",
        ]))
        .await
        .unwrap();

    let records = wait_for_all(&app.state.tracker, &submission.job_ids).await;

    assert_eq!(records[0].state(), JobState::Failed);
    assert_eq!(records[0].error().unwrap().kind, ErrorKind::InternalError);
    assert!(records[0].output().is_none());
    assert!(records[0].finished_at().is_some());

    assert_eq!(records[1].state(), JobState::Completed);
}

#[tokio::test]
async fn test_storage_failure_is_classified() {
    let app = TestApp::default().await;
    let submission = app
        .state
        .dispatcher
        .submit(items(&["https://media.example/missing"]))
        .await
        .unwrap();

    let record = wait_for_terminal(&app.state.tracker, submission.job_ids[0]).await;
    assert_eq!(record.state(), JobState::Failed);
    assert_eq!(record.error().unwrap().kind, ErrorKind::StorageError);
    assert!(record.output().is_none());

    let files = app.state.storage.list().await.unwrap();
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_shutdown_fails_running_job_as_internal_error() {
    let app = TestApp::spawn(
        MockExtractor::new(),
        TestOptions {
            workers: 1,
            ..Default::default()
        },
    )
    .await;

    let submission = app
        .state
        .dispatcher
        .submit(items(&["https://media.example/hang"]))
        .await
        .unwrap();
    let job_id = submission.job_ids[0];

    tokio::time::timeout(Duration::from_secs(5), async {
        while app.state.tracker.get(job_id).await.unwrap().state() != JobState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job never started");

    app.state.pool.shutdown();

    let record = wait_for_terminal(&app.state.tracker, job_id).await;
    assert_eq!(record.state(), JobState::Failed);
    let error = record.error().unwrap();
    assert_eq!(error.kind, ErrorKind::InternalError);
    assert!(error.message.contains("shutting down"));
}

#[tokio::test]
async fn test_same_title_produces_distinct_files() {
    let app = TestApp::spawn(MockExtractor::with_title("Same Song"), TestOptions::default()).await;

    let submission = app
        .state
        .dispatcher
        .submit(items(&["https://media.example/x", "https://media.example/y"]))
        .await
        .unwrap();

    let records = wait_for_all(&app.state.tracker, &submission.job_ids).await;
    let first = records[0].output().unwrap();
    let second = records[1].output().unwrap();

    assert_ne!(first.path, second.path);
    assert!(first.file_name.starts_with("Same_Song_best_"));
    assert!(second.file_name.starts_with("Same_Song_best_"));
    assert_eq!(std::fs::read(&first.path).unwrap(), MOCK_CONTENT);
    assert_eq!(std::fs::read(&second.path).unwrap(), MOCK_CONTENT);
}

#[tokio::test]
async fn test_concurrent_submissions_get_unique_ids() {
    let app = TestApp::spawn(
        MockExtractor::new(),
        TestOptions {
            start_pool: false,
            ..Default::default()
        },
    )
    .await;

    let submissions = futures::future::join_all((0..10).map(|i| {
        let dispatcher = app.state.dispatcher.clone();
        async move {
            let urls = (1..=3)
                .map(|n| format!("https://media.example/{i}/{n}"))
                .collect::<Vec<_>>();
            let urls = urls.iter().map(String::as_str).collect::<Vec<_>>();
            dispatcher.submit(items(&urls)).await.unwrap()
        }
    }))
    .await;

    let job_ids = submissions
        .iter()
        .flat_map(|s| s.job_ids.iter().copied())
        .collect::<HashSet<_>>();
    let batch_ids = submissions.iter().map(|s| s.batch_id).collect::<HashSet<_>>();

    assert_eq!(job_ids.len(), 30);
    assert_eq!(batch_ids.len(), 10);
    assert_eq!(app.state.tracker.len().await, 30);
    assert_eq!(app.state.queue.depth().await, 30);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let app = TestApp::default().await;

    let err = app.state.dispatcher.submit(Vec::new()).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidRequest(_)));
    assert!(app.state.tracker.is_empty().await);
}

#[tokio::test]
async fn test_full_queue_rejects_whole_batch() {
    let app = TestApp::spawn(
        MockExtractor::new(),
        TestOptions {
            max_queue_len: Some(2),
            start_pool: false,
            ..Default::default()
        },
    )
    .await;

    let err = app
        .state
        .dispatcher
        .submit(items(&[
            "https://media.example/1",
            "https://media.example/2",
            "https://media.example/3",
        ]))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Backpressure(_)));
    assert!(app.state.tracker.is_empty().await);
    assert_eq!(app.state.queue.depth().await, 0);
}

#[tokio::test]
async fn test_staging_directories_are_removed() {
    let app = TestApp::default().await;
    let submission = app
        .state
        .dispatcher
        .submit(items(&["https://media.example/a", "https://media.example/fail"]))
        .await
        .unwrap();

    wait_for_all(&app.state.tracker, &submission.job_ids).await;

    let staging = app.dir.path().join(".staging");
    let leftover = std::fs::read_dir(staging).unwrap().count();
    assert_eq!(leftover, 0);
}
