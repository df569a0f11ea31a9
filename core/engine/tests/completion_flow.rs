//! Integration tests for the completion controller's capture windows,
//! duplicate suppression and retry.

mod common;

use common::{assert_close, fix, harness, next_snapshot, ScriptedStore};
use runtrack_engine::protocol::{RunningDetail, RunningMetrics, SessionId};
use runtrack_engine::{
    ApiError, CompletionHandle, CompletionState, ServerErrorKind, TrackerConfig,
};
use std::time::Duration;
use tokio::time::Instant;

fn detail() -> RunningDetail {
    RunningDetail {
        started_at: Some(common::base_time()),
        ended_at: Some(common::base_time() + chrono::Duration::seconds(600)),
        metrics: RunningMetrics {
            distance_meters: 2_000.0,
            elapsed_seconds: 600.0,
            avg_pace_sec_per_km: Some(300.0),
            total_steps: 1_700,
            ..RunningMetrics::default()
        },
        points: vec![fix(0, 0.0).to_point(), fix(600, 2_000.0).to_point()],
    }
}

fn spawn_completion(store: &std::sync::Arc<ScriptedStore>) -> CompletionHandle {
    CompletionHandle::spawn(
        &TrackerConfig::default(),
        store.clone(),
        SessionId::parse("run-42").unwrap(),
        &detail(),
    )
}

#[tokio::test(start_paused = true)]
async fn capture_fails_after_three_windows_without_uploading() {
    let store = ScriptedStore::new();
    let mut completion = spawn_completion(&store);
    let started = Instant::now();

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(
        completion.state(),
        CompletionState::WaitingForArtifact { attempt: 2 }
    );

    let settled = completion.settled().await;
    assert_eq!(settled, CompletionState::CaptureFailed { attempts: 3 });
    assert!(settled.user_message().is_some());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(9) && waited < Duration::from_secs(10));
    assert!(store.completions().is_empty());

    // A late artifact is ignored; retry does not apply to capture failures.
    assert!(completion.provide_artifact(vec![1, 2, 3]));
    assert!(!completion.retry_completion());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(store.completions().is_empty());
    assert_eq!(
        completion.state(),
        CompletionState::CaptureFailed { attempts: 3 }
    );
}

#[tokio::test(start_paused = true)]
async fn artifact_in_second_window_completes_exactly_once() {
    let store = ScriptedStore::new();
    let mut completion = spawn_completion(&store);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(
        completion.state(),
        CompletionState::WaitingForArtifact { attempt: 2 }
    );
    let sink = completion.artifact_sink();
    assert!(sink.provide(b"png-bytes".to_vec()));

    let settled = completion.settled().await;
    assert_eq!(
        settled,
        CompletionState::Completed {
            map_image_url: Some("https://maps.example.test/run-42.png".to_string())
        }
    );

    // Further triggers are no-ops.
    sink.provide(b"other".to_vec());
    assert!(!completion.retry_completion());
    tokio::time::sleep(Duration::from_secs(30)).await;

    let completions = store.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].artifact.as_deref(), Some(&b"png-bytes"[..]));
    assert_eq!(completions[0].session_id.as_str(), "run-42");
    assert_close(completions[0].summary.distance_meters, 2_000.0);
    assert_eq!(completions[0].summary.total_steps, 1_700);
}

#[tokio::test(start_paused = true)]
async fn failed_completion_retries_the_same_request() {
    let store = ScriptedStore::new();
    store.fail_next_complete(ApiError::Server(ServerErrorKind::BadGateway));
    let mut completion = spawn_completion(&store);

    completion.provide_artifact(vec![9; 16]);
    let settled = completion.settled().await;
    assert_eq!(
        settled,
        CompletionState::Failed {
            error: ApiError::Server(ServerErrorKind::BadGateway)
        }
    );
    assert!(settled.user_message().is_some());

    // A new artifact does not replace the preserved inputs.
    completion.provide_artifact(vec![0; 4]);
    let mut state = completion.subscribe();
    assert!(completion.retry_completion());
    let done = state
        .wait_for(|state| matches!(state, CompletionState::Completed { .. }))
        .await
        .unwrap()
        .clone();
    assert!(matches!(done, CompletionState::Completed { .. }));

    let completions = store.completions();
    assert_eq!(completions.len(), 2);
    assert_eq!(completions[0], completions[1]);
    assert_eq!(completions[1].artifact, Some(vec![9; 16]));
}

#[tokio::test(start_paused = true)]
async fn completes_without_artifact_only_on_request() {
    let store = ScriptedStore::new();
    let mut completion = spawn_completion(&store);
    assert!(!completion.complete_without_artifact());

    completion.settled().await;
    assert!(store.completions().is_empty());

    let mut state = completion.subscribe();
    assert!(completion.complete_without_artifact());
    state
        .wait_for(|state| matches!(state, CompletionState::Completed { .. }))
        .await
        .unwrap();
    let completions = store.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].artifact, None);
}

#[tokio::test]
async fn stop_hands_final_metrics_to_completion() {
    let h = harness();
    h.controller.create_session().await.unwrap();
    let mut snapshots = h.controller.start().await.unwrap();
    for index in 0..3 {
        h.fixes.send(fix(index * 10, index as f64 * 40.0));
    }
    for _ in 0..3 {
        next_snapshot(&mut snapshots).await;
    }

    let outcome = h.controller.stop().await.unwrap();
    let mut completion = outcome.completion.expect("completion handle");
    assert_eq!(completion.session_id().as_str(), "run-1");
    completion.provide_artifact(b"route".to_vec());
    assert!(matches!(
        completion.settled().await,
        CompletionState::Completed { .. }
    ));

    let completions = h.store.completions();
    let request = &completions[0];
    assert_close(request.summary.distance_meters, 80.0);
    assert_close(request.summary.duration_seconds, 20.0);
    assert_eq!(request.summary.started_at, Some(common::base_time()));
    assert_eq!(
        request.summary.ended_at,
        outcome.detail.points.last().map(|point| point.timestamp)
    );
}
