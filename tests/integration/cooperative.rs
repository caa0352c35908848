//! Cooperative tasks alongside real workers.

use crate::common::fixture;
use taskbrain::testing::RecordingSink;
use taskbrain::{AttributeStore, ExecutionMode};

#[tokio::test]
async fn test_cooperative_and_process_tasks_share_one_call_surface() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let coop = brain.call("coop_bump").await.unwrap();
    let process = brain.call("answer").await.unwrap();

    assert_eq!(brain.spec("coop_bump").unwrap().mode, ExecutionMode::Cooperative);
    assert_eq!(brain.spec("answer").unwrap().mode, ExecutionMode::IsolatedProcess);
    assert_eq!(coop.value::<u64>(), Some(1));
    assert_eq!(process.value::<i64>(), Some(42));
    assert!(sink.contains("[MP] coop_bump: SUCCESS"));
    assert!(sink.contains("[SP] answer: SUCCESS"));
}

#[tokio::test]
async fn test_startup_tasks_follow_config_overrides() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &["coop_bump", "answer"]);

    let names: Vec<String> = brain
        .get_tasks()
        .iter()
        .map(|task| task.name().to_string())
        .collect();
    // declaration order, not override order
    assert_eq!(names, vec!["answer", "coop_bump"]);

    brain.start().join().await;

    assert_eq!(brain.shared().get::<u64>("coop_hits").unwrap(), 1);
    assert!(sink.contains("[SP] answer: SUCCESS"));
}
