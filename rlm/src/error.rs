//! Fatal errors that abort a trampoline run.

use thiserror::Error;

/// Errors surfaced by [`Controller::run`](crate::controller::Controller::run).
///
/// Variants raised inside the loop carry the depth and stack size at the point
/// of failure, enough to tell a too-broad query from a too-tight bound.
#[derive(Debug, Error)]
pub enum TrampolineError {
    #[error("maximum recursion depth exceeded: depth {depth} > {max_depth} (stack size {stack_size})")]
    MaxDepthExceeded {
        depth: u32,
        max_depth: u32,
        stack_size: usize,
    },

    #[error(
        "maximum iterations exceeded: {max_iterations} iterations (depth {depth}, stack size {stack_size})"
    )]
    MaxIterationsExceeded {
        max_iterations: u32,
        depth: u32,
        stack_size: usize,
    },

    #[error("subagent dispatch failed at depth {depth} (stack size {stack_size})")]
    Dispatch {
        depth: u32,
        stack_size: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("no subagent dispatcher configured")]
    MissingDispatcher,

    #[error("unknown outcome type {kind:?} at depth {depth} (stack size {stack_size})")]
    UnknownOutcomeType {
        kind: String,
        depth: u32,
        stack_size: usize,
    },
}

impl TrampolineError {
    /// True for the depth and iteration bounds.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Self::MaxDepthExceeded { .. } | Self::MaxIterationsExceeded { .. }
        )
    }
}
