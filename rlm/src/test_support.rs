//! Test-only scripted dispatchers and outcome builders.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::types::{
    ContinuationRequest, DispatchOutcome, Frame, FrameContext, Metadata, TerminalResult,
};
use crate::dispatch::Dispatcher;
use crate::io::config::{ControllerConfig, RlmConfig};

/// Default controller settings scoped to `work_dir`.
pub fn controller_config(work_dir: &Path) -> ControllerConfig {
    RlmConfig::default().controller_config(work_dir)
}

/// Terminal outcome with the given usage.
pub fn terminal(content: &str, token_count: u64, cost_usd: f64) -> DispatchOutcome {
    DispatchOutcome::Result(TerminalResult {
        content: content.to_string(),
        metadata: Metadata::new(),
        token_count,
        cost_usd,
    })
}

/// Continuation outcome asking for one `agent_role` child answering into `return_label`.
pub fn continuation(agent_role: &str, description: &str, return_label: &str) -> DispatchOutcome {
    DispatchOutcome::Continuation(ContinuationRequest {
        agent_role: agent_role.to_string(),
        description: description.to_string(),
        context: FrameContext::new(),
        return_label: return_label.to_string(),
        metadata: Metadata::new(),
    })
}

enum Script {
    Repeat(DispatchOutcome),
    Queue(VecDeque<Result<DispatchOutcome>>),
    Func(Box<dyn FnMut(&Frame) -> DispatchOutcome>),
}

/// Dispatcher that replays predetermined outcomes and records every call.
///
/// Counters are shared handles so tests can inspect them after the dispatcher
/// has been moved into a controller.
pub struct ScriptedDispatcher {
    script: Script,
    calls: Rc<Cell<u32>>,
    frames: Rc<RefCell<Vec<Frame>>>,
}

impl ScriptedDispatcher {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: Rc::new(Cell::new(0)),
            frames: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Return the same outcome for every frame.
    pub fn repeating(outcome: DispatchOutcome) -> Self {
        Self::with_script(Script::Repeat(outcome))
    }

    /// Return queued results in order; fails once the queue is exhausted.
    pub fn from_results(results: Vec<Result<DispatchOutcome>>) -> Self {
        Self::with_script(Script::Queue(results.into()))
    }

    /// Compute each outcome from the dispatched frame.
    pub fn from_fn(f: impl FnMut(&Frame) -> DispatchOutcome + 'static) -> Self {
        Self::with_script(Script::Func(Box::new(f)))
    }

    /// Number of dispatch calls made so far.
    pub fn calls(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.calls)
    }

    /// Every frame dispatched so far, in order.
    pub fn frames(&self) -> Rc<RefCell<Vec<Frame>>> {
        Rc::clone(&self.frames)
    }
}

impl Dispatcher for ScriptedDispatcher {
    fn dispatch(&mut self, frame: &Frame) -> Result<DispatchOutcome> {
        self.calls.set(self.calls.get() + 1);
        self.frames.borrow_mut().push(frame.clone());
        match &mut self.script {
            Script::Repeat(outcome) => Ok(outcome.clone()),
            Script::Queue(queue) => queue
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("scripted dispatcher exhausted"))),
            Script::Func(f) => Ok(f(frame)),
        }
    }
}
