//! Common test utilities shared across integration tests.

use std::time::Duration;
use taskbrain::testing::{RecordingSink, fixture_builder_with};
use taskbrain::{Brain, BrainConfig, TaskOverride, WorkerCommand, WorkerConfig};

/// The worker program: this crate's binary serving the fixture brain.
pub fn fixture_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_taskbrain")).arg("fixture")
}

/// Supervision settings short enough for tests.
pub fn fast_workers() -> BrainConfig {
    BrainConfig {
        worker: WorkerConfig {
            shutdown_grace_ms: 500,
            respawn_delay_ms: 50,
            startup_timeout_ms: 5_000,
        },
        ..BrainConfig::default()
    }
}

/// Fixture brain running real workers, with `startup` tasks enabled.
pub fn fixture(sink: &RecordingSink, startup: &[&str]) -> Brain {
    let config = startup.iter().fold(fast_workers(), |config, name| {
        config.with_task(*name, TaskOverride::run_on_start(true))
    });
    fixture_builder_with(sink.clone())
        .worker_command(fixture_command())
        .config(config)
        .build()
        .unwrap()
}

/// Wait until `condition` holds, polling every 20ms.
///
/// # Panics
///
/// Panics if `timeout` elapses first.
pub async fn wait_until(what: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let start = tokio::time::Instant::now();
    loop {
        if condition() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
