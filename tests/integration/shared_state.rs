//! Shared attribute integration tests.

use crate::common::fixture;
use std::time::Duration;
use taskbrain::AttributeStore;
use taskbrain::testing::RecordingSink;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_counters_advance_on_both_sides_of_the_boundary() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &["inc_a", "inc_b"]);

    let handle = brain.start();
    tokio::time::sleep(Duration::from_millis(5500)).await;
    handle.shutdown().await;

    // ticks at 0s..5s; worker startup may cost the process side its last one
    let a = brain.shared().get::<i64>("a").unwrap();
    let b = brain.shared().get::<i64>("b").unwrap();
    assert!((5..=6).contains(&a), "a = {}", a);
    assert!((5..=6).contains(&b), "b = {}", b);
}

#[tokio::test]
async fn test_worker_writes_are_visible_to_the_parent() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);
    brain.shared().set("b", 40i64).unwrap();

    let first = brain.call("inc_b").await.unwrap();
    let second = brain.call("inc_b").await.unwrap();

    assert_eq!(first.value::<i64>(), Some(41));
    assert_eq!(second.value::<i64>(), Some(42));
    assert_eq!(brain.shared().get::<i64>("b").unwrap(), 42);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_never_lose_an_update() {
    let sink = RecordingSink::new();
    let brain = fixture(&sink, &[]);

    let calls = (0..8).map(|_| brain.call("inc_b"));
    let outputs = futures::future::join_all(calls).await;

    assert!(outputs.iter().all(|o| o.as_ref().unwrap().is_success()));
    assert_eq!(brain.shared().get::<i64>("b").unwrap(), 8);
}
