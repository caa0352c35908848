//! The brain: task registry, invocation and reporting.
//!
//! Declare attributes and tasks on a [`BrainBuilder`], build a [`Brain`], then
//! either drive its startup tasks yourself or call [`Brain::start`].

mod builder;
mod engine;
mod handle;
mod log;
mod types;

pub use builder::BrainBuilder;
pub use engine::{Brain, StartupTask};
pub use handle::BrainHandle;
pub use log::{LogSink, TracingSink};
pub use types::BrainError;
