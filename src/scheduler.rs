//! Task Scheduler — validates a batch, fans out sub-agents under a
//! concurrency cap, aggregates usage, and hands deltas to reconciliation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::SchedulerConfig;
use crate::error::DelegationError;
use crate::executor::{ProgressRecord, ProgressStatus, SingleResult};
use crate::gateway::Usage;
use crate::model::types::{AgentName, TaskId};
use crate::registry::{AgentDefinition, Registry};

/// One task item in a batch, prior to validation.
#[derive(Clone, Debug)]
pub struct TaskItem {
    pub id: TaskId,
    pub description: String,
    pub task: String,
}

/// A batch of tasks submitted to one agent.
#[derive(Clone, Debug)]
pub struct TaskBatch {
    pub agent: AgentName,
    pub tasks: Vec<TaskItem>,
    pub isolated: bool,
}

/// Outcome of one completed batch.
#[derive(Clone, Debug, Default)]
pub struct BatchResult {
    pub results: Vec<SingleResult>,
    pub usage: Usage,
    pub wall_time: Duration,
}

/// A small counting semaphore built on `Mutex`/`Condvar`, matching the
/// concurrency primitives carried over from the teacher's synchronous
/// `std::process::Command`-driven model (no async runtime in this crate).
struct Semaphore {
    state: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut guard = self.state.lock().expect("semaphore mutex poisoned");
        while *guard == 0 {
            guard = self.condvar.wait(guard).expect("semaphore mutex poisoned");
        }
        *guard -= 1;
    }

    fn release(&self) {
        let mut guard = self.state.lock().expect("semaphore mutex poisoned");
        *guard += 1;
        self.condvar.notify_one();
    }
}

/// Validate a batch against the registry and current-process identity.
/// Rejects atomically, before any worker starts.
///
/// # Errors
/// Returns the first validation failure found, in the order listed in
/// the scheduler's contract: agent existence, self-recursion, duplicate
/// ids, spawn allow-list (checked by the caller, which has the parent
/// agent in scope), isolation compatibility.
pub fn validate_batch(
    batch: &TaskBatch,
    registry: &Registry,
    scheduler_config: &SchedulerConfig,
    isolation_mode_is_none: bool,
) -> Result<AgentDefinition, DelegationError> {
    if batch.tasks.is_empty() {
        return Err(DelegationError::EmptyBatch);
    }

    let agent = registry
        .get(batch.agent.as_str())
        .cloned()
        .ok_or_else(|| DelegationError::UnknownAgent {
            name: batch.agent.clone(),
        })?;

    if let Some(blocked) = &scheduler_config.blocked_agent {
        if blocked == batch.agent.as_str() {
            return Err(DelegationError::SelfRecursion {
                name: batch.agent.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for task in &batch.tasks {
        let key = task.id.to_lowercase();
        if !seen.insert(key) {
            duplicates.push(task.id.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(DelegationError::DuplicateTaskIds { ids: duplicates });
    }

    if batch.isolated && isolation_mode_is_none {
        return Err(DelegationError::IncompatibleIsolationRequest {
            detail: "batch requested isolation but isolation mode is \"none\"".to_string(),
        });
    }

    Ok(agent)
}

/// Allocate a unique `agent://<id>` artifact id for a task, given the
/// other ids already allocated in this batch. Derived from the task id;
/// collisions (case-insensitive duplicates already rejected by
/// `validate_batch`) cannot occur within one batch.
#[must_use]
pub fn allocate_artifact_id(task_id: &TaskId) -> String {
    format!("agent://{}", task_id.to_lowercase())
}

/// Drives a validated batch through fan-out, using `run_one` to execute a
/// single task. `run_one` is expected to wrap `Executor::run` plus
/// isolation prepare/capture; it is injected so this module stays free of
/// a direct dependency on the model gateway.
pub fn execute<F>(
    batch: &TaskBatch,
    max_concurrency: usize,
    cancel: Arc<AtomicBool>,
    mut on_progress: impl FnMut(&ProgressRecord) + Send,
    run_one: F,
) -> BatchResult
where
    F: Fn(usize, &TaskItem, &Arc<AtomicBool>) -> (SingleResult, ProgressRecord) + Sync,
{
    let started = Instant::now();
    let semaphore = Semaphore::new(max_concurrency.max(1));
    let completed = AtomicUsize::new(0);

    tracing::info!(
        agent = %batch.agent,
        tasks = batch.tasks.len(),
        max_concurrency,
        isolated = batch.isolated,
        "dispatching task batch"
    );

    let progress_mutex: Mutex<Vec<Option<ProgressRecord>>> =
        Mutex::new(vec![None; batch.tasks.len()]);
    let results_mutex: Mutex<Vec<Option<SingleResult>>> =
        Mutex::new(vec![None; batch.tasks.len()]);

    std::thread::scope(|scope| {
        for (index, task) in batch.tasks.iter().enumerate() {
            let semaphore = &semaphore;
            let cancel = Arc::clone(&cancel);
            let run_one = &run_one;
            let progress_mutex = &progress_mutex;
            let results_mutex = &results_mutex;
            let completed = &completed;

            scope.spawn(move || {
                semaphore.acquire();
                let (result, record) = run_one(index, task, &cancel);
                {
                    let mut progress = progress_mutex.lock().expect("progress mutex poisoned");
                    progress[index] = Some(record);
                }
                {
                    let mut results = results_mutex.lock().expect("results mutex poisoned");
                    results[index] = Some(result);
                }
                completed.fetch_add(1, Ordering::SeqCst);
                semaphore.release();
            });
        }
    });

    let progress = progress_mutex.into_inner().expect("progress mutex poisoned");
    for record in progress.into_iter().flatten() {
        on_progress(&record);
    }

    let results: Vec<SingleResult> = results_mutex
        .into_inner()
        .expect("results mutex poisoned")
        .into_iter()
        .enumerate()
        .map(|(index, maybe)| {
            maybe.unwrap_or_else(|| SingleResult {
                task_id: batch.tasks[index].id.clone(),
                aborted: true,
                exit_code: 1,
                output: None,
                stderr: Some("Skipped (cancelled before start)".to_string()),
                usage: Usage::default(),
            })
        })
        .collect();

    let usage = results
        .iter()
        .fold(Usage::default(), |acc, r| acc.add(&r.usage));

    let wall_time = started.elapsed();
    tracing::info!(
        agent = %batch.agent,
        completed = completed.load(Ordering::SeqCst),
        total_tokens = usage.total_tokens,
        wall_time_ms = wall_time.as_millis() as u64,
        "task batch finished"
    );

    BatchResult {
        results,
        usage,
        wall_time,
    }
}

/// Build the "already-started" Progress Record set for tasks skipped
/// because the batch was cancelled before dispatch began.
#[must_use]
pub fn cancelled_before_start(task: &TaskItem, agent: &AgentName, index: usize) -> ProgressRecord {
    let mut record = ProgressRecord::new(
        index,
        task.id.clone(),
        agent.clone(),
        task.task.clone(),
        task.description.clone(),
    );
    record.status = ProgressStatus::Aborted;
    record
}
