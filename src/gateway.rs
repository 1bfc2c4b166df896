//! External-collaborator traits.
//!
//! The Task Delegation Core does not resolve models, execute tools, or own
//! session persistence itself — it consumes those capabilities through the
//! traits below. A host process supplies concrete implementations; this
//! crate only depends on the shapes it needs from them.

use std::fmt;

/// A single event on a sub-agent's session bus, as seen by the executor.
///
/// The executor translates each variant into a mutation of the task's
/// Progress Record (see `scheduler.rs`) and forwards it verbatim upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The model began producing a message. `true` marks the start of a
    /// "thinking" segment rather than visible output.
    MessageStart { thinking: bool },
    /// A tool call started executing.
    ToolExecutionStart { name: String },
    /// A tool call finished. `ok` is `false` if the tool reported failure.
    ToolExecutionEnd { name: String, ok: bool },
    /// The model finished producing a message; `preview` is a short,
    /// truncated rendering of the assistant's text for progress display.
    MessageEnd { preview: String },
    /// A `submit_result` tool call completed. `schema_ok` indicates whether
    /// the structured payload validated against the agent's output schema.
    SubmitResult { schema_ok: bool },
    /// The underlying session has nothing further to produce this turn.
    AgentEnd,
}

/// One turn's outcome, as returned by [`ModelGateway::run_turn`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Whether any tool call this turn was a successful `submit_result`.
    pub submit_result_ok: bool,
    /// Whether `submit_result` was called but failed schema validation.
    pub submit_result_schema_error: Option<String>,
    /// Whether any `submit_result` call happened this turn at all.
    pub submit_result_attempted: bool,
    /// The assistant's final text for this turn, when not awaiting a
    /// structured submission.
    pub final_text: Option<String>,
}

/// Token/cost accounting for a single sub-agent run, aggregated
/// component-wise by the scheduler across a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_read_cost: f64,
    pub cache_write_cost: f64,
    pub total_cost: f64,
}

impl Usage {
    /// Component-wise sum, used by the scheduler's aggregation step.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_read_tokens: self.cache_read_tokens + other.cache_read_tokens,
            cache_write_tokens: self.cache_write_tokens + other.cache_write_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            input_cost: self.input_cost + other.input_cost,
            output_cost: self.output_cost + other.output_cost,
            cache_read_cost: self.cache_read_cost + other.cache_read_cost,
            cache_write_cost: self.cache_write_cost + other.cache_write_cost,
            total_cost: self.total_cost + other.total_cost,
        }
    }
}

/// An error from a gateway/runtime/store collaborator. Opaque by design —
/// the executor wraps these into `DelegationError` at its boundary rather
/// than matching on collaborator-specific variants.
#[derive(Debug)]
pub struct CollaboratorError(pub String);

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CollaboratorError {}

/// Resolves a model identifier and drives one turn of a sub-agent session.
pub trait ModelGateway {
    /// Send `prompt` to the session identified by `session_id` and drive
    /// the model until it stops, emitting [`SessionEvent`]s to `on_event`
    /// as they occur. Returns the turn's outcome.
    ///
    /// # Errors
    /// Returns an error if the model cannot be reached or the session is
    /// in an invalid state.
    fn run_turn(
        &self,
        session_id: &str,
        prompt: &str,
        on_event: &mut dyn FnMut(SessionEvent),
    ) -> Result<TurnOutcome, CollaboratorError>;

    /// Usage accrued by the session since the last call to `run_turn`,
    /// if any.
    fn usage(&self, session_id: &str) -> Usage;

    /// Request cancellation of an in-flight turn. Best-effort: the
    /// gateway should unwind at its next safe point.
    fn cancel(&self, session_id: &str);
}

/// Executes the tools a sub-agent calls. The executor only needs to know
/// which tools are available to an ephemeral child session, not how they
/// run.
pub trait ToolRuntime {
    /// Create a child session's tool set: `base_tools` minus any tool the
    /// agent's `spawns` policy denies delegating through.
    fn child_tool_set(&self, base_tools: &[String], denied: &[String]) -> Vec<String>;
}

/// An append-only event log for a session. The scheduler writes artifacts
/// and progress into it but does not define its on-disk format.
pub trait SessionStore {
    /// Append one event. Ordering within a session is preserved; ordering
    /// across sessions is not guaranteed.
    ///
    /// # Errors
    /// Returns an error if the underlying store cannot accept the write.
    fn append(&self, session_id: &str, event: &SessionEvent) -> Result<(), CollaboratorError>;

    /// Persist an artifact (e.g. a spilled output file) and return its
    /// `agent://<id>` identity.
    ///
    /// # Errors
    /// Returns an error if the artifact cannot be stored.
    fn store_artifact(&self, session_id: &str, bytes: &[u8]) -> Result<String, CollaboratorError>;
}
