//! Continuation-based recursion controller ("trampoline").
//!
//! Lets a stateless, depth-limited worker perform unboundedly deep recursive
//! decomposition of a task. The worker never recurses itself: it either answers
//! or asks for one more level of work, and the [`controller`] keeps the pending
//! parents on an explicit stack that is snapshotted after every iteration.
//!
//! - **[`core`]**: Pure logic (data model, cache keys, worker reply parsing).
//! - **[`io`]**: Side effects (config file, memo store, snapshot, processes).
//!
//! [`dispatch`] defines the worker seam; [`controller`] wires it to the stores.

pub mod controller;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
