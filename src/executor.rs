//! Sub-agent Executor — runs one sub-agent turn-loop to completion,
//! enforcing the submit-result contract and streaming progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ExecutorConfig;
use crate::error::DelegationError;
use crate::gateway::{ModelGateway, SessionEvent, Usage};
use crate::model::types::{AgentName, TaskId};
use crate::registry::AgentDefinition;

/// One task as handed to the executor, already validated by the scheduler.
#[derive(Clone, Debug)]
pub struct TaskSpec {
    pub id: TaskId,
    pub description: String,
    pub prompt: String,
}

/// Status of a task's Progress Record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

/// Mutable per-task progress, owned by its worker, read by the scheduler
/// when emitting snapshots.
#[derive(Clone, Debug)]
pub struct ProgressRecord {
    pub index: usize,
    pub id: TaskId,
    pub agent: AgentName,
    pub status: ProgressStatus,
    pub task: String,
    pub description: String,
    pub recent_tools: Vec<String>,
    pub recent_output: Vec<String>,
    pub tool_count: u64,
    pub usage: Usage,
    pub duration: Duration,
}

impl ProgressRecord {
    #[must_use]
    pub fn new(index: usize, id: TaskId, agent: AgentName, task: String, description: String) -> Self {
        Self {
            index,
            id,
            agent,
            status: ProgressStatus::Pending,
            task,
            description,
            recent_tools: Vec::new(),
            recent_output: Vec::new(),
            tool_count: 0,
            usage: Usage::default(),
            duration: Duration::ZERO,
        }
    }

    fn apply(&mut self, event: &SessionEvent, recent_tools_capacity: usize) {
        match event {
            SessionEvent::MessageStart { .. } => {
                self.status = ProgressStatus::Running;
            }
            SessionEvent::ToolExecutionStart { name } => {
                self.recent_tools.push(name.clone());
                if self.recent_tools.len() > recent_tools_capacity {
                    self.recent_tools.remove(0);
                }
                self.tool_count += 1;
            }
            SessionEvent::MessageEnd { preview } => {
                self.recent_output.push(preview.clone());
                if self.recent_output.len() > recent_tools_capacity {
                    self.recent_output.remove(0);
                }
            }
            SessionEvent::AgentEnd => {
                if self.status != ProgressStatus::Failed && self.status != ProgressStatus::Aborted {
                    self.status = ProgressStatus::Completed;
                }
            }
            SessionEvent::ToolExecutionEnd { .. } | SessionEvent::SubmitResult { .. } => {}
        }
    }
}

/// Outcome of driving one sub-agent to completion.
#[derive(Clone, Debug)]
pub struct SingleResult {
    pub task_id: TaskId,
    pub aborted: bool,
    pub exit_code: i32,
    pub output: Option<String>,
    pub stderr: Option<String>,
    pub usage: Usage,
}

impl SingleResult {
    fn aborted(task_id: TaskId, stderr: impl Into<String>) -> Self {
        Self {
            task_id,
            aborted: true,
            exit_code: 1,
            output: None,
            stderr: Some(stderr.into()),
            usage: Usage::default(),
        }
    }
}

/// Submit-result contract state, per §4.D.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubmitState {
    AwaitingSubmit,
    DoneOk,
    DoneAbort,
}

/// Drives one sub-agent turn loop to completion against `gateway`.
pub struct Executor<'a> {
    gateway: &'a dyn ModelGateway,
    config: ExecutorConfig,
}

impl<'a> Executor<'a> {
    #[must_use]
    pub const fn new(gateway: &'a dyn ModelGateway, config: ExecutorConfig) -> Self {
        Self { gateway, config }
    }

    /// Pre-check: does `parent`'s spawn policy permit delegating to `agent`?
    /// On rejection the caller should synthesize a failure `SingleResult`
    /// without starting a session.
    ///
    /// # Errors
    /// Returns [`DelegationError::SpawnNotAllowed`] if denied.
    pub fn check_spawn_allowed(
        parent: &AgentDefinition,
        child: &AgentName,
    ) -> Result<(), DelegationError> {
        if parent.spawns.permits(child.as_str()) {
            Ok(())
        } else {
            Err(DelegationError::SpawnNotAllowed {
                parent: AgentName::new(&parent.name).unwrap_or_else(|_| child.clone()),
                child: child.clone(),
            })
        }
    }

    /// Run one sub-agent to completion.
    ///
    /// `schema_in_effect` mirrors whether the agent has an output schema:
    /// when `true`, the submit-result state machine governs completion;
    /// when `false`, the assistant's final text is the result.
    pub fn run(
        &self,
        task: &TaskSpec,
        agent: AgentName,
        schema_in_effect: bool,
        cancel: &Arc<AtomicBool>,
        mut record: ProgressRecord,
        on_progress: &mut dyn FnMut(&ProgressRecord),
    ) -> (SingleResult, ProgressRecord) {
        let started = Instant::now();
        let session_id = format!("task-{}", task.id);
        tracing::debug!(task = %task.id, agent = %agent, "starting sub-agent turn loop");

        if cancel.load(Ordering::SeqCst) {
            record.status = ProgressStatus::Aborted;
            on_progress(&record);
            return (
                SingleResult::aborted(task.id.clone(), "Skipped (cancelled before start)"),
                record,
            );
        }

        let mut state = SubmitState::AwaitingSubmit;
        let mut reminders: u32 = 0;
        let mut prompt = task.prompt.clone();
        let mut final_text: Option<String> = None;

        loop {
            if cancel.load(Ordering::SeqCst) {
                self.gateway.cancel(&session_id);
                record.status = ProgressStatus::Aborted;
                on_progress(&record);
                let usage = self.gateway.usage(&session_id);
                return (
                    SingleResult {
                        task_id: task.id.clone(),
                        aborted: true,
                        exit_code: 1,
                        output: None,
                        stderr: Some("Cancelled.".to_string()),
                        usage,
                    },
                    record,
                );
            }

            let capacity = self.config.recent_tools_capacity;
            let outcome = match self.gateway.run_turn(&session_id, &prompt, &mut |event| {
                record.apply(&event, capacity);
                on_progress(&record);
            }) {
                Ok(outcome) => outcome,
                Err(err) => {
                    record.status = ProgressStatus::Failed;
                    on_progress(&record);
                    return (
                        SingleResult {
                            task_id: task.id.clone(),
                            aborted: false,
                            exit_code: 1,
                            output: None,
                            stderr: Some(err.to_string()),
                            usage: self.gateway.usage(&session_id),
                        },
                        record,
                    );
                }
            };

            if !schema_in_effect {
                final_text = outcome.final_text;
                break;
            }

            if outcome.submit_result_ok {
                state = SubmitState::DoneOk;
                final_text = outcome.final_text;
                break;
            }

            if let Some(schema_error) = outcome.submit_result_schema_error {
                prompt = schema_error;
                continue;
            }

            if !outcome.submit_result_attempted {
                reminders += 1;
                if reminders > self.config.reminder_cap {
                    state = SubmitState::DoneAbort;
                    break;
                }
                prompt = "You stopped without calling submit_result.".to_string();
                continue;
            }
        }

        record.duration = started.elapsed();
        record.usage = self.gateway.usage(&session_id);

        let result = match state {
            SubmitState::DoneAbort => {
                record.status = ProgressStatus::Aborted;
                SingleResult {
                    task_id: task.id.clone(),
                    aborted: true,
                    exit_code: 1,
                    output: None,
                    stderr: Some("Subagent stopped without submit_result.".to_string()),
                    usage: record.usage,
                }
            }
            SubmitState::DoneOk | SubmitState::AwaitingSubmit => {
                record.status = ProgressStatus::Completed;
                SingleResult {
                    task_id: task.id.clone(),
                    aborted: false,
                    exit_code: 0,
                    output: final_text,
                    stderr: None,
                    usage: record.usage,
                }
            }
        };

        tracing::debug!(
            task = %task.id,
            agent = %agent,
            aborted = result.aborted,
            duration_ms = record.duration.as_millis() as u64,
            "sub-agent turn loop finished"
        );
        on_progress(&record);
        (result, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CollaboratorError, TurnOutcome};
    use std::cell::RefCell;

    struct FakeGateway {
        turns: RefCell<Vec<TurnOutcome>>,
        cancelled: RefCell<bool>,
    }

    impl FakeGateway {
        fn new(turns: Vec<TurnOutcome>) -> Self {
            Self {
                turns: RefCell::new(turns),
                cancelled: RefCell::new(false),
            }
        }
    }

    impl ModelGateway for FakeGateway {
        fn run_turn(
            &self,
            _session_id: &str,
            _prompt: &str,
            on_event: &mut dyn FnMut(SessionEvent),
        ) -> Result<TurnOutcome, CollaboratorError> {
            on_event(SessionEvent::MessageStart { thinking: false });
            on_event(SessionEvent::AgentEnd);
            let mut turns = self.turns.borrow_mut();
            if turns.is_empty() {
                Ok(TurnOutcome::default())
            } else {
                Ok(turns.remove(0))
            }
        }

        fn usage(&self, _session_id: &str) -> Usage {
            Usage::default()
        }

        fn cancel(&self, _session_id: &str) {
            *self.cancelled.borrow_mut() = true;
        }
    }

    fn task(id: &str) -> TaskSpec {
        TaskSpec {
            id: TaskId::new(id).unwrap(),
            description: "desc".to_string(),
            prompt: "do it".to_string(),
        }
    }

    fn record(id: &str) -> ProgressRecord {
        ProgressRecord::new(
            0,
            TaskId::new(id).unwrap(),
            AgentName::new("worker").unwrap(),
            "task".to_string(),
            "desc".to_string(),
        )
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            reminder_cap: 3,
            recent_tools_capacity: 10,
        }
    }

    #[test]
    fn schema_less_agent_completes_on_first_turn() {
        let gateway = FakeGateway::new(vec![TurnOutcome {
            final_text: Some("done".to_string()),
            ..Default::default()
        }]);
        let executor = Executor::new(&gateway, config());
        let cancel = Arc::new(AtomicBool::new(false));
        let (result, rec) = executor.run(
            &task("t1"),
            AgentName::new("worker").unwrap(),
            false,
            &cancel,
            record("t1"),
            &mut |_| {},
        );
        assert!(!result.aborted);
        assert_eq!(result.output.as_deref(), Some("done"));
        assert_eq!(rec.status, ProgressStatus::Completed);
    }

    #[test]
    fn submit_result_success_completes() {
        let gateway = FakeGateway::new(vec![TurnOutcome {
            submit_result_ok: true,
            final_text: Some("{}".to_string()),
            ..Default::default()
        }]);
        let executor = Executor::new(&gateway, config());
        let cancel = Arc::new(AtomicBool::new(false));
        let (result, _rec) = executor.run(
            &task("t2"),
            AgentName::new("worker").unwrap(),
            true,
            &cancel,
            record("t2"),
            &mut |_| {},
        );
        assert!(!result.aborted);
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn schema_rejection_retries_without_counting_against_cap() {
        let gateway = FakeGateway::new(vec![
            TurnOutcome {
                submit_result_schema_error: Some("missing field x".to_string()),
                ..Default::default()
            },
            TurnOutcome {
                submit_result_ok: true,
                final_text: Some("{}".to_string()),
                ..Default::default()
            },
        ]);
        let executor = Executor::new(&gateway, config());
        let cancel = Arc::new(AtomicBool::new(false));
        let (result, _rec) = executor.run(
            &task("t3"),
            AgentName::new("worker").unwrap(),
            true,
            &cancel,
            record("t3"),
            &mut |_| {},
        );
        assert!(!result.aborted);
    }

    #[test]
    fn exceeding_reminder_cap_aborts() {
        let turns = vec![TurnOutcome::default(); 5];
        let gateway = FakeGateway::new(turns);
        let executor = Executor::new(&gateway, config());
        let cancel = Arc::new(AtomicBool::new(false));
        let (result, rec) = executor.run(
            &task("t4"),
            AgentName::new("worker").unwrap(),
            true,
            &cancel,
            record("t4"),
            &mut |_| {},
        );
        assert!(result.aborted);
        assert_eq!(result.stderr.as_deref(), Some("Subagent stopped without submit_result."));
        assert_eq!(rec.status, ProgressStatus::Aborted);
    }

    #[test]
    fn cancellation_before_start_skips_session() {
        let gateway = FakeGateway::new(vec![]);
        let executor = Executor::new(&gateway, config());
        let cancel = Arc::new(AtomicBool::new(true));
        let (result, rec) = executor.run(
            &task("t5"),
            AgentName::new("worker").unwrap(),
            false,
            &cancel,
            record("t5"),
            &mut |_| {},
        );
        assert!(result.aborted);
        assert_eq!(result.stderr.as_deref(), Some("Skipped (cancelled before start)"));
        assert_eq!(rec.status, ProgressStatus::Aborted);
    }

    #[test]
    fn spawn_check_denies_when_policy_excludes_child() {
        let parent = AgentDefinition {
            name: "lead".to_string(),
            description: String::new(),
            system_prompt: String::new(),
            model: None,
            thinking_level: None,
            tools: None,
            spawns: crate::registry::SpawnPolicy::None,
            output_schema: None,
            source: crate::registry::Source::Bundled,
            blocking: false,
        };
        let child = AgentName::new("worker").unwrap();
        let err = Executor::check_spawn_allowed(&parent, &child).unwrap_err();
        assert!(matches!(err, DelegationError::SpawnNotAllowed { .. }));
    }

    #[test]
    fn spawn_check_allows_wildcard_policy() {
        let parent = AgentDefinition {
            name: "lead".to_string(),
            description: String::new(),
            system_prompt: String::new(),
            model: None,
            thinking_level: None,
            tools: None,
            spawns: crate::registry::SpawnPolicy::Any,
            output_schema: None,
            source: crate::registry::Source::Bundled,
            blocking: false,
        };
        let child = AgentName::new("worker").unwrap();
        assert!(Executor::check_spawn_allowed(&parent, &child).is_ok());
    }
}
