//! Isolated-process task integration tests.
//!
//! Every test here spawns real worker processes.

use crate::common::{fixture, wait_until};
use std::time::{Duration, Instant};
use taskbrain::testing::RecordingSink;
use taskbrain::{AttributeStore, ExecutionState};
use tracing::Level;

#[tokio::test]
async fn test_one_shot_result_crosses_the_process_boundary() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let output = brain.call("answer").await.unwrap();

    assert_eq!(output.execution_state, ExecutionState::Success);
    assert_eq!(output.value::<i64>(), Some(42));
    assert!(sink.contains("[SP] answer: SUCCESS"));
}

#[tokio::test]
async fn test_local_result_arrives_as_untransferable() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let output = brain.call("opaque").await.unwrap();

    assert!(output.is_success());
    assert!(output.result.is_untransferable());
}

#[tokio::test]
async fn test_empty_result() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let output = brain.call("nothing").await.unwrap();

    assert!(output.is_success());
    assert!(output.result.is_empty());
}

#[tokio::test]
async fn test_task_error_is_reported_not_fatal() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let output = brain.call("fail").await.unwrap();

    assert!(output.have_crashed());
    assert!(output.error.as_deref().unwrap().contains("fixture failure"));
    assert_eq!(sink.count_at(Level::ERROR), 1);

    // the brain is still usable
    assert!(brain.call("answer").await.unwrap().is_success());
}

#[tokio::test]
async fn test_worker_crash_becomes_error_output() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let output = brain.call("explode").await.unwrap();

    assert!(output.have_crashed());
    assert!(
        output
            .error
            .as_deref()
            .unwrap()
            .contains("exited before reporting")
    );
}

#[tokio::test]
async fn test_one_shot_timeout_kills_worker() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let started = Instant::now();
    let output = brain.call("sleepy").await.unwrap();

    assert!(output.have_timeout());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(sink.contains("[SP] sleepy: TIMEOUT"));
    assert_eq!(sink.count_at(Level::WARN), 1);
}

#[tokio::test]
async fn test_unmirrored_attribute_is_a_configuration_error() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let output = brain.call("peek_local").await.unwrap();

    assert!(output.have_crashed());
    assert!(output.error.as_deref().unwrap().contains("not mirrored"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recurring_worker_keeps_ticking_until_shutdown() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &["bump_worker"]);

    let handle = brain.start();
    wait_until("five worker ticks", Duration::from_secs(10), || {
        brain.shared().get::<u64>("worker_hits").unwrap() >= 5
    })
    .await;
    handle.shutdown().await;

    let after_shutdown = brain.shared().get::<u64>("worker_hits").unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    // the worker was killed with the brain
    assert_eq!(brain.shared().get::<u64>("worker_hits").unwrap(), after_shutdown);
}
