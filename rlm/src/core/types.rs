//! Shared deterministic types for the trampoline controller.
//!
//! These types define the stable contracts between the controller, the memo
//! store, the snapshot file and worker dispatchers. They are plain data: no I/O,
//! and every one of them round-trips through JSON unchanged.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured values handed to a worker alongside the task description.
///
/// Insertion order carries no meaning; cache keys canonicalize it away.
pub type FrameContext = HashMap<String, Value>;

/// Opaque metadata attached to worker responses.
pub type Metadata = BTreeMap<String, Value>;

/// Role assigned to the root frame of every fresh run.
pub const ROOT_AGENT_ROLE: &str = "Explorer";

/// One node of the in-flight recursive call tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Which worker behavior to invoke (e.g. `Explorer`, `Worker`).
    pub agent_role: String,
    /// Task-specific objective for this frame.
    pub description: String,
    #[serde(default)]
    pub context: FrameContext,
    /// Root is 0; every child is exactly `parent.depth + 1`.
    pub depth: u32,
    /// Slot in the parent's `child_results` this frame answers into. `None` only for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_label: Option<String>,
    /// Terminal results of completed children, keyed by their return label.
    #[serde(default)]
    pub child_results: BTreeMap<String, TerminalResult>,
}

impl Frame {
    /// Build the depth-0 frame for analyzing `document_path` with `query`.
    pub fn root(document_path: &str, query: &str) -> Self {
        let mut context = FrameContext::new();
        context.insert(
            "document_path".to_string(),
            Value::String(document_path.to_string()),
        );
        context.insert("query".to_string(), Value::String(query.to_string()));
        Self {
            agent_role: ROOT_AGENT_ROLE.to_string(),
            description: query.to_string(),
            context,
            depth: 0,
            return_label: None,
            child_results: BTreeMap::new(),
        }
    }

    /// Build the frame one level below `self` that answers `request`.
    pub fn child(&self, request: ContinuationRequest) -> Self {
        Self {
            agent_role: request.agent_role,
            description: request.description,
            context: request.context,
            depth: self.depth + 1,
            return_label: Some(request.return_label),
            child_results: BTreeMap::new(),
        }
    }
}

/// A worker's request to recurse one level deeper before its frame can complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationRequest {
    #[serde(alias = "agent_type")]
    pub agent_role: String,
    #[serde(alias = "task")]
    pub description: String,
    #[serde(default)]
    pub context: FrameContext,
    /// Where the child's answer is written back into the requesting frame.
    #[serde(alias = "return_to")]
    pub return_label: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// A worker's completed answer. Carries no recursion instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalResult {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub token_count: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

/// What a worker returned for one frame: exactly one of recurse or answer.
///
/// Serialized with a `type` tag (`CONTINUATION` / `RESULT`), which is also the
/// wire format external workers reply with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOutcome {
    Continuation(ContinuationRequest),
    Result(TerminalResult),
}

/// Counters accumulated over a whole run, including across resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Dispatcher invocations (cache hits excluded).
    pub subagent_calls: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub max_depth_reached: u32,
    pub cache_hits: u64,
    pub started_at: DateTime<Utc>,
}

impl RunStats {
    /// Zeroed counters anchored at the current time.
    pub fn fresh() -> Self {
        Self {
            subagent_calls: 0,
            total_tokens: 0,
            total_cost_usd: 0.0,
            max_depth_reached: 0,
            cache_hits: 0,
            started_at: Utc::now(),
        }
    }

    /// Fold a terminal result's usage into the totals.
    pub fn record_usage(&mut self, result: &TerminalResult) {
        self.total_tokens += result.token_count;
        self.total_cost_usd += result.cost_usd;
    }

    pub fn observe_depth(&mut self, depth: u32) {
        self.max_depth_reached = self.max_depth_reached.max(depth);
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::fresh()
    }
}
