//! Deferred-loop routines.
//!
//! A deferred loop is a recurring worker routine split in two phases. The setup
//! phase runs once per worker lifetime and may build values that cannot leave
//! the worker process. The loop phase runs every tick with those values in
//! scope. A respawned worker runs setup again before its first tick.

use std::any::Any;
use std::sync::Arc;

use super::context::WorkerContext;
use super::output::Payload;
use super::task::TaskError;

type SetupFn = Arc<dyn Fn(&WorkerContext) -> Result<Box<dyn Any>, TaskError> + Send + Sync>;
type LoopFn = Arc<dyn Fn(&WorkerContext, &mut dyn Any) -> Result<Payload, TaskError> + Send + Sync>;

/// Type-erased setup/loop pair.
#[derive(Clone)]
pub struct DeferredLoop {
    setup: SetupFn,
    body: LoopFn,
}

impl DeferredLoop {
    pub(crate) fn new<S, Setup, Body>(setup: Setup, body: Body) -> Self
    where
        S: 'static,
        Setup: Fn(&WorkerContext) -> Result<S, TaskError> + Send + Sync + 'static,
        Body: Fn(&WorkerContext, &mut S) -> Result<Payload, TaskError> + Send + Sync + 'static,
    {
        Self {
            setup: Arc::new(move |ctx: &WorkerContext| {
                setup(ctx).map(|state| Box::new(state) as Box<dyn Any>)
            }),
            body: Arc::new(move |ctx: &WorkerContext, state: &mut dyn Any| {
                let state = state
                    .downcast_mut::<S>()
                    .ok_or_else(|| TaskError::failed("loop state has an unexpected type"))?;
                body(ctx, state)
            }),
        }
    }

    /// Run the setup phase, producing the state for one worker lifetime.
    pub(crate) fn instantiate(&self, ctx: &WorkerContext) -> Result<LoopInstance, TaskError> {
        let state = (self.setup)(ctx)?;
        Ok(LoopInstance {
            state,
            body: Arc::clone(&self.body),
        })
    }
}

/// Setup state bound to its loop body, alive for one worker lifetime.
pub(crate) struct LoopInstance {
    state: Box<dyn Any>,
    body: LoopFn,
}

impl LoopInstance {
    /// Run one tick of the loop phase.
    pub(crate) fn tick(&mut self, ctx: &WorkerContext) -> Result<Payload, TaskError> {
        (self.body)(ctx, self.state.as_mut())
    }
}
