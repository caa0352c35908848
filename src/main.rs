//! taskbrain - run a brain of cooperative and isolated-process tasks.
//!
//! Usage:
//!   taskbrain demo [--duration <secs>] [--config <file>]   Run the example brain
//!
//! The same binary serves as the worker program for its own process tasks.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use taskbrain::{
    AttributeStore, Brain, BrainConfig, ConfigError, Payload, TaskError, TaskSpec, TracingSink,
};
use tracing::{Level, error, info};

/// taskbrain - cooperative and isolated-process tasks under one roof
#[derive(Parser)]
#[command(name = "taskbrain")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the example brain until interrupted
    Demo {
        /// Stop after this many seconds (default: run until Ctrl+C)
        #[arg(short, long)]
        duration: Option<f64>,

        /// YAML file with worker settings and task overrides
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Serve the test fixture brain as a worker program
    #[command(hide = true)]
    Fixture,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // stdout belongs to the worker link; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { duration, config } => {
            let brain = demo_brain(config.as_deref())?;
            if let Some(code) = brain.worker_entry() {
                return Ok(code);
            }
            let duration = duration.map(Duration::try_from_secs_f64).transpose()?;
            run_brain(brain, duration)?;
        }
        Commands::Fixture => {
            let brain = taskbrain::testing::fixture_brain()?;
            if let Some(code) = brain.worker_entry() {
                return Ok(code);
            }
            for task in brain.tasks() {
                println!("{:<18} {}", task.name, task.mode);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Run the startup tasks until Ctrl+C or until `duration` elapses.
fn run_brain(brain: Brain, duration: Option<Duration>) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let handle = brain.start();
        info!("Brain started with {} task(s)", handle.running_tasks().len());

        let deadline = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, shutting down...");
            }
            _ = deadline => {
                info!("Run duration elapsed, shutting down...");
            }
        }

        handle.shutdown().await;
        info!("Brain stopped");
    });

    Ok(())
}

/// The example brain: counters shared with workers, counters private to the
/// parent, state displays on both sides, and on-demand calls.
fn demo_brain(config: Option<&Path>) -> Result<Brain, ConfigError> {
    let config = match config {
        Some(path) => BrainConfig::from_file(path)?,
        None => BrainConfig::default(),
    };

    // parent-only counters; workers never see them
    let local_attr1 = Arc::new(AtomicI64::new(0));
    let local_attr2 = Arc::new(AtomicI64::new(0));

    let display_local = (Arc::clone(&local_attr1), Arc::clone(&local_attr2));
    let incrementer_local = Arc::clone(&local_attr1);
    let timeout_local = Arc::clone(&local_attr1);

    Brain::builder(TracingSink)
        .mirror("share_attr1", 0i64)
        .mirror("share_attr2", 0i64)
        .config(config)
        // MainProcess tasks
        .task(
            TaskSpec::cooperative("mp_start", |ctx| async move {
                ctx.log("[MP] MainBrain started", Level::INFO);
                ctx.log(
                    &format!("[MP] Shared attributes: {:?}", ctx.shared().snapshot()),
                    Level::INFO,
                );
                Ok(Payload::Empty)
            })
            .run_on_start(true),
        )
        .task(
            TaskSpec::cooperative("mp_states_display", move |ctx| {
                let (local1, local2) = display_local.clone();
                async move {
                    ctx.log(
                        &format!(
                            "[MP] Attributes states: {:?} local_attr1={} local_attr2={}",
                            ctx.shared().snapshot(),
                            local1.load(Ordering::SeqCst),
                            local2.load(Ordering::SeqCst)
                        ),
                        Level::INFO,
                    );
                    Ok(Payload::Empty)
                }
            })
            .run_on_start(true)
            .refresh_rate(Duration::from_secs(1)),
        )
        .task(
            TaskSpec::cooperative("mp_incrementer", move |ctx| {
                let local = Arc::clone(&incrementer_local);
                async move {
                    ctx.shared().update("share_attr1", |n: i64| n + 1)?;
                    local.fetch_add(1, Ordering::SeqCst);
                    Ok(Payload::Empty)
                }
            })
            .run_on_start(true)
            .refresh_rate(Duration::from_secs(1)),
        )
        .task(
            TaskSpec::cooperative("mp_incrementer_with_timeout", move |ctx| {
                let local = Arc::clone(&timeout_local);
                async move {
                    ctx.shared().update("share_attr1", |n: i64| n + 10)?;
                    local.fetch_add(10, Ordering::SeqCst);
                    Ok(Payload::Empty)
                }
            })
            .run_on_start(true)
            .refresh_rate(Duration::from_secs(1))
            .timeout(Duration::from_secs(5)),
        )
        // SubProcess tasks
        .task(
            TaskSpec::process("sb_start", |ctx| {
                ctx.log("[SP] MainBrain started in another process", Level::INFO);
                let share_attr1 = ctx.shared().get::<i64>("share_attr1")?;
                let share_attr2 = ctx.shared().get::<i64>("share_attr2")?;
                ctx.log(
                    &format!(
                        "[SP] Shared attributes available in this worker: share_attr1={} share_attr2={}",
                        share_attr1, share_attr2
                    ),
                    Level::INFO,
                );
                Ok(Payload::Empty)
            })
            .run_on_start(true),
        )
        .task(
            TaskSpec::process("sp_states_display", |ctx| {
                let share_attr1 = ctx.shared().get::<i64>("share_attr1")?;
                let share_attr2 = ctx.shared().get::<i64>("share_attr2")?;
                ctx.log(
                    &format!(
                        "[SP] Attributes states: share_attr1={} share_attr2={}",
                        share_attr1, share_attr2
                    ),
                    Level::INFO,
                );
                Ok(Payload::Empty)
            })
            .run_on_start(true)
            .refresh_rate(Duration::from_secs(1)),
        )
        .task(
            TaskSpec::process("sb_incrementer", |ctx| {
                ctx.shared().update("share_attr2", |n: i64| n + 1)?;
                Ok(Payload::Empty)
            })
            .run_on_start(true)
            .refresh_rate(Duration::from_secs(1)),
        )
        .task(
            TaskSpec::process("sb_incrementer_with_timeout", |ctx| {
                ctx.shared().update("share_attr2", |n: i64| n + 10)?;
                Ok(Payload::Empty)
            })
            .run_on_start(true)
            .refresh_rate(Duration::from_secs(1))
            .timeout(Duration::from_secs(5)),
        )
        .task(
            TaskSpec::deferred_loop(
                "sb_routine_with_setup",
                // built once per worker, never sent to the parent
                |_ctx| Ok(Rc::<str>::from("I'm not a serializable attribute")),
                |ctx, attribute: &mut Rc<str>| {
                    ctx.log(
                        &format!("[SP] Non-serializable attribute: {}", attribute),
                        Level::INFO,
                    );
                    Ok(Payload::Empty)
                },
            )
            .run_on_start(true)
            .refresh_rate(Duration::from_secs(1)),
        )
        // On-demand tasks
        .task(TaskSpec::cooperative("callable_function_1", |ctx| async move {
            ctx.log("[MP] Callable function 1", Level::INFO);
            Ok(Payload::json(&1))
        }))
        .task(TaskSpec::process("callable_function_2", |ctx| {
            ctx.log("[SP] Callable function 2", Level::INFO);
            Ok(Payload::json(&2))
        }))
        .task(
            TaskSpec::cooperative("call_tasks", |ctx| async move {
                // let the timed incrementers run a few rounds first
                tokio::time::sleep(Duration::from_secs(10)).await;
                ctx.log("[MP] Call tasks", Level::INFO);

                let f1 = ctx
                    .call("callable_function_1")
                    .await
                    .map_err(|e| TaskError::failed(e.to_string()))?;
                let f2 = ctx
                    .call("callable_function_2")
                    .await
                    .map_err(|e| TaskError::failed(e.to_string()))?;

                ctx.log(&format!("[MP] Callable function 1 result: {}", f1), Level::INFO);
                ctx.log(&format!("[MP] Callable function 2 result: {}", f2), Level::INFO);
                Ok(Payload::Empty)
            })
            .run_on_start(true),
        )
        .build()
}
