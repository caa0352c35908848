//! Shared attribute registry.
//!
//! Attributes are mirrored explicitly by name on the parent's [`SharedState`].
//! Workers see the registry through a [`RemoteState`] that forwards every
//! access to the parent, so there is a single copy of each value.

mod remote;
mod shared;
mod store;

pub use remote::RemoteState;
pub(crate) use remote::{StateReply, StateRequest, StateTransport};
pub use shared::SharedState;
pub use store::{AttributeStore, StateError, SwapOutcome};
