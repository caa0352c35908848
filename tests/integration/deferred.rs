//! Deferred-loop integration tests.

use crate::common::{fixture, wait_until};
use std::time::Duration;
use taskbrain::AttributeStore;
use taskbrain::testing::RecordingSink;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_setup_runs_once_per_worker_lifetime() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &["deferred_counter"]);

    let handle = brain.start();
    // the first worker stalls on its third tick and is replaced
    wait_until("a respawned worker", Duration::from_secs(15), || {
        brain.shared().get::<u64>("setups").unwrap() >= 2
            && brain.shared().get::<u64>("loop_ticks").unwrap() >= 6
    })
    .await;
    handle.shutdown().await;

    assert_eq!(brain.shared().get::<u64>("setups").unwrap(), 2);
    assert_eq!(sink.count_containing("deferred_counter: TIMEOUT"), 1);
    assert!(sink.count_containing("deferred_counter: SUCCESS") >= 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hanging_setup_times_out_and_respawns() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &["stuck_setup"]);

    let handle = brain.start();
    // each worker is killed 300ms after spawn and replaced
    wait_until("two startup timeouts", Duration::from_secs(10), || {
        sink.count_containing("stuck_setup: TIMEOUT") >= 2
    })
    .await;
    handle.shutdown().await;

    assert!(!sink.contains("stuck_setup: SUCCESS"));
}
