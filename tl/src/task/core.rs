//! Task variants and attempt execution

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tracing::debug;
use uuid::Uuid;

use super::state::TaskState;
use crate::error::{LimiterError, TaskError};

/// Future returned by a step
pub type StepFuture<T> = BoxFuture<'static, Result<T, TaskError>>;

/// A step receives the previous step's output (`None` for the first step)
pub type StepFn<T> = Arc<dyn Fn(Option<T>) -> StepFuture<T> + Send + Sync>;

/// Which shape of work a task holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Single,
    Sequence,
    Group,
}

/// Result of a finished task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput<T> {
    /// Output of a single task or the last step of a sequence
    Value(T),
    /// Outputs of a group, in member order
    Group(Vec<T>),
}

impl<T> TaskOutput<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Group(_) => None,
        }
    }

    pub fn into_group(self) -> Option<Vec<T>> {
        match self {
            Self::Value(_) => None,
            Self::Group(values) => Some(values),
        }
    }
}

/// Ordered steps where each output feeds the next step
///
/// The chain remembers how far it got, so a retried attempt resumes at the
/// step that failed with the value that step was given.
pub struct Chain<T> {
    steps: Vec<StepFn<T>>,
    cursor: usize,
    carry: Option<T>,
}

impl<T: Clone> Clone for Chain<T> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
            cursor: self.cursor,
            carry: self.carry.clone(),
        }
    }
}

impl<T> Chain<T>
where
    T: Clone + Send + 'static,
{
    /// Start a chain with a step that takes no input
    pub fn start<F, Fut>(step: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let step: StepFn<T> = Arc::new(move |_input: Option<T>| step().boxed());
        Self {
            steps: vec![step],
            cursor: 0,
            carry: None,
        }
    }

    /// Append a step fed with the previous step's output
    pub fn then<F, Fut>(mut self, step: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let step: StepFn<T> = Arc::new(move |input: Option<T>| match input {
            Some(value) => step(value).boxed(),
            None => async { Err::<T, TaskError>(TaskError::fatal("sequence step ran without input")) }.boxed(),
        });
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.carry = None;
    }

    async fn run(&mut self) -> Result<(), TaskError> {
        while self.cursor < self.steps.len() {
            let step = Arc::clone(&self.steps[self.cursor]);
            let value = step(self.carry.clone()).await?;
            self.carry = Some(value);
            self.cursor += 1;
        }
        Ok(())
    }
}

enum Work<T> {
    Chain(Chain<T>),
    Group(Vec<Chain<T>>),
}

impl<T: Clone> Clone for Work<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Chain(chain) => Self::Chain(chain.clone()),
            Self::Group(members) => Self::Group(members.clone()),
        }
    }
}

/// Why an attempt failed and whether another attempt may help
#[derive(Debug)]
pub(crate) struct AttemptError {
    pub error: LimiterError,
    pub retryable: bool,
}

impl AttemptError {
    pub fn new(error: LimiterError) -> Self {
        let retryable = error.is_retryable();
        Self { error, retryable }
    }
}

/// A unit of work with its own state machine
pub struct Task<T> {
    id: String,
    kind: TaskKind,
    work: Work<T>,
    state: TaskState,
    attempts: u32,
}

impl<T: Clone> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            work: self.work.clone(),
            state: self.state,
            attempts: self.attempts,
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl<T> Task<T>
where
    T: Clone + Send + 'static,
{
    fn from_work(kind: TaskKind, work: Work<T>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            work,
            state: TaskState::Pending,
            attempts: 0,
        }
    }

    /// One callable
    pub fn single<F, Fut>(step: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Self::from_work(TaskKind::Single, Work::Chain(Chain::start(step)))
    }

    /// Steps run in order, each fed with the previous output
    pub fn sequence(chain: Chain<T>) -> Self {
        let kind = if chain.len() == 1 {
            TaskKind::Single
        } else {
            TaskKind::Sequence
        };
        Self::from_work(kind, Work::Chain(chain))
    }

    /// Members run concurrently under one submission
    ///
    /// Members must be single or sequence tasks.
    pub fn group(members: Vec<Task<T>>) -> Result<Self, LimiterError> {
        if members.is_empty() {
            return Err(LimiterError::invalid("group must have at least one member"));
        }
        let mut chains = Vec::with_capacity(members.len());
        for member in members {
            match member.work {
                Work::Chain(chain) => chains.push(chain),
                Work::Group(_) => return Err(LimiterError::invalid("groups cannot be nested")),
            }
        }
        Ok(Self::from_work(TaskKind::Group, Work::Group(chains)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A copy with a new id and no progress, for resubmitting a template
    pub fn fresh_copy(&self) -> Self {
        let mut work = self.work.clone();
        match &mut work {
            Work::Chain(chain) => chain.reset(),
            Work::Group(members) => members.iter_mut().for_each(Chain::reset),
        }
        Self::from_work(self.kind, work)
    }

    /// Move to `next`, refusing illegal transitions
    pub fn transition(&mut self, next: TaskState) -> Result<(), LimiterError> {
        if !self.state.can_transition_to(next) {
            return Err(LimiterError::Internal(format!(
                "task {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        debug!(task_id = %self.id, from = %self.state, to = %next, "Task::transition");
        if next == TaskState::Processing {
            self.attempts += 1;
        }
        self.state = next;
        Ok(())
    }

    /// Run one attempt, continuing from wherever the last attempt stopped
    ///
    /// Progress made before a failure (or before the future is dropped by a
    /// timeout) is kept for the next attempt.
    pub(crate) async fn run_attempt(&mut self) -> Result<(), AttemptError> {
        debug!(task_id = %self.id, attempt = self.attempts, "Task::run_attempt: called");
        match &mut self.work {
            Work::Chain(chain) => chain.run().await.map_err(|e| AttemptError::new(LimiterError::Task(e))),
            Work::Group(members) => {
                let pending: Vec<_> = members
                    .iter_mut()
                    .enumerate()
                    .filter(|(_, member)| !member.is_finished())
                    .map(|(index, member)| async move { (index, member.run().await) })
                    .collect();
                let results = join_all(pending).await;

                let mut failures = Vec::new();
                let mut retryable = true;
                for (index, result) in results {
                    if let Err(e) = result {
                        retryable &= e.is_retryable();
                        failures.push(format!("member {}: {}", index, e));
                    }
                }
                if failures.is_empty() {
                    return Ok(());
                }

                let succeeded = members.iter().filter(|m| m.is_finished()).count();
                debug!(task_id = %self.id, succeeded, failed = failures.len(), "Task::run_attempt: group partial failure");
                Err(AttemptError {
                    error: LimiterError::PartialFailure { succeeded, failures },
                    retryable,
                })
            }
        }
    }

    /// Output of a completed task
    pub fn output(&self) -> Option<TaskOutput<T>> {
        match &self.work {
            Work::Chain(chain) if chain.is_finished() => chain.carry.clone().map(TaskOutput::Value),
            Work::Chain(_) => None,
            Work::Group(members) => {
                let values: Option<Vec<T>> = members
                    .iter()
                    .map(|m| if m.is_finished() { m.carry.clone() } else { None })
                    .collect();
                values.map(TaskOutput::Group)
            }
        }
    }
}
