//! Per-message context threaded through every pipeline stage.

use std::fmt;
use std::sync::Arc;

/// Terminal state recorded for one executed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageState {
    Success,
    Failure(String),
    Rejected(String),
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Failure(msg) => write!(f, "Failure: {msg}"),
            Self::Rejected(msg) => write!(f, "Rejected: {msg}"),
        }
    }
}

/// One entry of the per-message stage log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLog {
    pub stage_name: String,
    pub stage_index: u32,
    pub duration_ms: u64,
    pub reflections_used: u32,
    pub state: StageState,
}

/// Receives stage lifecycle notifications as they happen.
///
/// Implementations must be non-blocking; the runtime's sink hands records to
/// a background writer task. The default is a no-op.
pub trait StageObserver: Send + Sync {
    fn stage_started(&self, ctx: &PipelineContext, stage_name: &str);
    fn stage_finished(&self, ctx: &PipelineContext, log: &StageLog);
}

/// Observer that drops every notification.
pub struct NoopObserver;

impl StageObserver for NoopObserver {
    fn stage_started(&self, _ctx: &PipelineContext, _stage_name: &str) {}
    fn stage_finished(&self, _ctx: &PipelineContext, _log: &StageLog) {}
}

impl NoopObserver {
    pub fn arc() -> Arc<dyn StageObserver> {
        Arc::new(NoopObserver)
    }
}

/// Immutable metadata for one message's trip through a pipeline.
///
/// Created at message ingress and augmented per stage. `conversation_id` and
/// `trace_id` are never mutated within a message lifetime; `step_index` is
/// strictly increasing and `step_logs` is append-only. The context never
/// carries the payload value.
#[derive(Clone)]
pub struct PipelineContext {
    pub agent_name: String,
    pub trace_id: String,
    pub conversation_id: String,
    pub step_index: u32,
    pub step_logs: Vec<StageLog>,
    observer: Arc<dyn StageObserver>,
}

impl PipelineContext {
    /// Fresh context at step zero with no logs and a no-op observer.
    pub fn initial(
        agent_name: impl Into<String>,
        trace_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self::initial_with_observer(agent_name, trace_id, conversation_id, NoopObserver::arc())
    }

    /// Fresh context wired to a runtime observer.
    pub fn initial_with_observer(
        agent_name: impl Into<String>,
        trace_id: impl Into<String>,
        conversation_id: impl Into<String>,
        observer: Arc<dyn StageObserver>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            trace_id: trace_id.into(),
            conversation_id: conversation_id.into(),
            step_index: 0,
            step_logs: Vec::new(),
            observer,
        }
    }

    /// Copy with `step_index + 1`.
    #[must_use]
    pub fn next_step(&self) -> Self {
        let mut next = self.clone();
        next.step_index += 1;
        next
    }

    /// Copy with `entry` appended to the stage log.
    #[must_use]
    pub fn with_log(&self, entry: StageLog) -> Self {
        let mut next = self.clone();
        next.step_logs.push(entry);
        next
    }

    pub(crate) fn observer(&self) -> &Arc<dyn StageObserver> {
        &self.observer
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("agent_name", &self.agent_name)
            .field("trace_id", &self.trace_id)
            .field("conversation_id", &self.conversation_id)
            .field("step_index", &self.step_index)
            .field("step_logs", &self.step_logs)
            .finish()
    }
}
