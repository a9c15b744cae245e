//! Trampoline controller: drives unboundedly deep recursive decomposition with
//! an explicit, durable continuation stack.
//!
//! Each loop iteration dispatches the current frame (or replays a memoized
//! answer) and classifies the outcome:
//!
//! - **Continuation**: the current frame is pushed and a child frame one level
//!   deeper becomes current.
//! - **Result**: the answer is written into the parent's `child_results` under
//!   the child's return label and the parent becomes current again, or, with an
//!   empty stack, the run is done.
//!
//! State is snapshotted after every iteration that does not finish the run, so
//! an interrupted run resumes from its last completed iteration.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use crate::core::cache_key::cache_key;
use crate::core::outcome::UnknownOutcomeType;
use crate::core::types::{
    ContinuationRequest, DispatchOutcome, Frame, RunStats, TerminalResult,
};
use crate::dispatch::Dispatcher;
use crate::error::TrampolineError;
use crate::io::config::ControllerConfig;
use crate::io::memo_store::MemoStore;
use crate::io::paths::WorkDirPaths;
use crate::io::snapshot::{PersistedState, SnapshotStore};

/// State-machine position of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Dispatching,
    /// A deeper frame was just pushed.
    Continuing,
    /// A result was just handed back to the parent frame.
    Returning,
    Done,
    Failed,
}

/// Owns one recursive computation for a working directory.
///
/// Exactly one controller may run against a working directory at a time: the
/// snapshot and memo files are not locked.
pub struct Controller {
    config: ControllerConfig,
    dispatcher: Option<Box<dyn Dispatcher>>,
    memo: MemoStore,
    snapshot: SnapshotStore,
    stack: Vec<Frame>,
    current: Option<Frame>,
    cross_frame_results: BTreeMap<String, TerminalResult>,
    stats: RunStats,
    phase: Phase,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        let paths = WorkDirPaths::new(&config.work_dir);
        Self {
            memo: MemoStore::new(paths.cache_dir),
            snapshot: SnapshotStore::new(paths.snapshot_path),
            config,
            dispatcher: None,
            stack: Vec::new(),
            current: None,
            cross_frame_results: BTreeMap::new(),
            stats: RunStats::fresh(),
            phase: Phase::Init,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.set_dispatcher(dispatcher);
        self
    }

    pub fn set_dispatcher(&mut self, dispatcher: impl Dispatcher + 'static) {
        self.dispatcher = Some(Box::new(dispatcher));
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Pending parent frames, root first.
    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    /// Frame the last run stopped on: the root after success, the failing frame otherwise.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    /// Every child result handed back so far, keyed by return label.
    pub fn cross_frame_results(&self) -> &BTreeMap<String, TerminalResult> {
        &self.cross_frame_results
    }

    pub fn memo_store(&self) -> &MemoStore {
        &self.memo
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshot
    }

    /// Analyze `document_path` for `query`, resuming an interrupted run if a
    /// snapshot exists in the working directory.
    #[instrument(skip_all, fields(document_path = %document_path, query = %query))]
    pub fn run(
        &mut self,
        document_path: &str,
        query: &str,
    ) -> Result<TerminalResult, TrampolineError> {
        let Some(mut dispatcher) = self.dispatcher.take() else {
            return Err(TrampolineError::MissingDispatcher);
        };
        let frame = self.initialize(document_path, query);
        let outcome = self.trampoline(dispatcher.as_mut(), frame);
        self.dispatcher = Some(dispatcher);
        if outcome.is_err() {
            self.phase = Phase::Failed;
        }
        outcome
    }

    /// INIT: restore from the snapshot, or start a fresh root frame.
    fn initialize(&mut self, document_path: &str, query: &str) -> Frame {
        self.phase = Phase::Init;
        self.current = None;
        match self.snapshot.load() {
            Ok(Some(state)) => {
                info!(
                    stack_size = state.stack.len(),
                    depth = state.current_frame.depth,
                    results = state.cross_frame_results.len(),
                    "resuming from snapshot"
                );
                return self.restore(state);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to restore snapshot, starting fresh");
            }
        }

        debug!("starting fresh run");
        self.stack.clear();
        self.cross_frame_results.clear();
        self.stats = RunStats::fresh();
        Frame::root(document_path, query)
    }

    fn restore(&mut self, state: PersistedState) -> Frame {
        self.stack = state.stack;
        self.cross_frame_results = state.cross_frame_results;
        self.stats = state.stats;
        state.current_frame
    }

    fn trampoline(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
        mut frame: Frame,
    ) -> Result<TerminalResult, TrampolineError> {
        let mut iterations: u32 = 0;
        loop {
            iterations = iterations.saturating_add(1);

            // Bounds first, so an over-limit snapshot fails before re-dispatching.
            if frame.depth > self.config.max_depth {
                let err = TrampolineError::MaxDepthExceeded {
                    depth: frame.depth,
                    max_depth: self.config.max_depth,
                    stack_size: self.stack.len(),
                };
                self.current = Some(frame);
                return Err(err);
            }
            if iterations > self.config.max_iterations {
                let err = TrampolineError::MaxIterationsExceeded {
                    max_iterations: self.config.max_iterations,
                    depth: frame.depth,
                    stack_size: self.stack.len(),
                };
                self.current = Some(frame);
                return Err(err);
            }

            self.stats.observe_depth(frame.depth);
            self.phase = Phase::Dispatching;
            info!(
                agent_role = %frame.agent_role,
                depth = frame.depth,
                stack_size = self.stack.len(),
                "dispatching frame"
            );

            let key = cache_key(&frame);
            let (outcome, from_cache) = match self.lookup(&key) {
                Some(result) => {
                    self.stats.cache_hits += 1;
                    debug!(cache_key = %key, "using cached result");
                    (DispatchOutcome::Result(result), true)
                }
                None => match dispatcher.dispatch(&frame) {
                    Ok(outcome) => {
                        self.stats.subagent_calls += 1;
                        (outcome, false)
                    }
                    Err(err) => {
                        let err = self.dispatch_error(&frame, err);
                        self.current = Some(frame);
                        return Err(err);
                    }
                },
            };

            frame = match outcome {
                DispatchOutcome::Continuation(request) => self.push_child(frame, request),
                DispatchOutcome::Result(result) => {
                    self.stats.record_usage(&result);
                    if !from_cache {
                        self.remember(&key, &result);
                    }
                    match self.stack.pop() {
                        Some(parent) => self.return_to_parent(parent, frame, result),
                        None => {
                            self.current = Some(frame);
                            self.finish();
                            return Ok(result);
                        }
                    }
                }
            };

            self.persist(&frame);
        }
    }

    /// CONTINUING: suspend `frame` on the stack and descend into its child.
    fn push_child(&mut self, frame: Frame, request: ContinuationRequest) -> Frame {
        debug!(
            agent_role = %request.agent_role,
            return_label = %request.return_label,
            "continuation requested"
        );
        let child = frame.child(request);
        self.stack.push(frame);
        self.phase = Phase::Continuing;
        child
    }

    /// RETURNING: hand `result` back to `parent` under the child's return label.
    fn return_to_parent(
        &mut self,
        mut parent: Frame,
        child: Frame,
        result: TerminalResult,
    ) -> Frame {
        let label = child.return_label.unwrap_or_default();
        self.cross_frame_results.insert(label.clone(), result.clone());
        parent.child_results.insert(label, result);
        debug!(
            depth = parent.depth,
            stack_size = self.stack.len(),
            "returned to parent frame"
        );
        self.phase = Phase::Returning;
        parent
    }

    fn lookup(&self, key: &str) -> Option<TerminalResult> {
        if !self.config.cache_enabled {
            return None;
        }
        self.memo.lookup(key)
    }

    fn remember(&self, key: &str, result: &TerminalResult) {
        if !self.config.cache_enabled {
            return;
        }
        if let Err(err) = self.memo.store(key, result, self.config.cache_ttl) {
            warn!(cache_key = key, err = %format!("{err:#}"), "failed to cache result");
        }
    }

    fn persist(&self, current: &Frame) {
        if let Err(err) =
            self.snapshot
                .save(&self.stack, current, &self.cross_frame_results, &self.stats)
        {
            warn!(err = %format!("{err:#}"), "failed to save snapshot");
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Done;
        info!(
            subagent_calls = self.stats.subagent_calls,
            cache_hits = self.stats.cache_hits,
            max_depth = self.stats.max_depth_reached,
            "run complete"
        );
        if let Err(err) = self.snapshot.clear() {
            warn!(err = %format!("{err:#}"), "failed to clear snapshot");
        }
    }

    fn dispatch_error(&self, frame: &Frame, err: anyhow::Error) -> TrampolineError {
        if let Some(unknown) = err.downcast_ref::<UnknownOutcomeType>() {
            return TrampolineError::UnknownOutcomeType {
                kind: unknown.kind.clone(),
                depth: frame.depth,
                stack_size: self.stack.len(),
            };
        }
        TrampolineError::Dispatch {
            depth: frame.depth,
            stack_size: self.stack.len(),
            source: err.into(),
        }
    }
}
