//! Core task model.
//!
//! Declarations, descriptors, execution contexts and task outcomes.

pub mod context;
pub mod deferred;
pub mod output;
pub mod task;
pub mod types;
