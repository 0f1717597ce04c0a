//! # Tasks and Results
//!
//! A [`Task`] is immutable once submitted: the executor takes it by value and
//! only ever reads it. Its [`fingerprint`] is the cache key shared by every
//! task with the same kind, instructions and context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::error_classifier::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Lifecycle of one submitted task
///
/// `Submitted -> Completed` on a cache hit, otherwise
/// `Submitted -> Queued -> Borrowed -> Running -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    /// Waiting for an admission permit, holding no pool handle
    Queued,
    Borrowed,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Submitted => "submitted",
            TaskState::Queued => "queued",
            TaskState::Borrowed => "borrowed",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Inputs that shape the backend's answer, part of the fingerprint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub system_prompt: Option<String>,
    pub previous_results: Vec<String>,
    pub extra: BTreeMap<String, Value>,
}

impl TaskContext {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_previous_result(mut self, result: impl Into<String>) -> Self {
        self.previous_results.push(result.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Execution limits, not part of the fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConstraints {
    /// Output longer than this (in bytes) is truncated at a character boundary
    pub max_output_size: Option<usize>,
    /// Deadline measured from submission
    pub timeout: Option<Duration>,
    /// Labels attached to the cached result for tag invalidation
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: String,
    pub instructions: String,
    pub context: TaskContext,
    pub constraints: TaskConstraints,
    pub priority: TaskPriority,
}

impl Task {
    pub fn new(kind: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            instructions: instructions.into(),
            context: TaskContext::default(),
            constraints: TaskConstraints::default(),
            priority: TaskPriority::default(),
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.constraints.timeout = Some(timeout);
        self
    }

    pub fn with_max_output_size(mut self, max_output_size: usize) -> Self {
        self.constraints.max_output_size = Some(max_output_size);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Tags stored with this task's cached result
    pub fn cache_tags(&self) -> Vec<String> {
        let mut tags = self.constraints.tags.clone();
        tags.push(format!("kind:{}", self.kind));
        tags
    }
}

/// Cache key for a task
pub fn fingerprint(task: &Task) -> String {
    let mut buffer = Vec::new();
    fingerprint_into(task, &mut buffer)
}

/// Fingerprint using a caller-supplied scratch buffer
///
/// The buffer is cleared first; its contents afterwards are the digest input.
/// Text fields are length-prefixed so no split of the same bytes collides.
pub fn fingerprint_into(task: &Task, buffer: &mut Vec<u8>) -> String {
    buffer.clear();
    for field in [&task.kind, &task.instructions] {
        buffer.extend_from_slice(&(field.len() as u64).to_be_bytes());
        buffer.extend_from_slice(field.as_bytes());
    }

    let context = serde_json::to_value(&task.context)
        .map(canonicalize)
        .unwrap_or(Value::Null);
    if let Err(error) = serde_json::to_writer(&mut *buffer, &context) {
        tracing::debug!(error = %error, "Context serialization failed, fingerprinting without it");
    }

    hex::encode(Sha256::digest(buffer.as_slice()))
}

/// Rebuild every object with sorted keys
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Units consumed by one backend call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub input_units: u64,
    pub output_units: u64,
}

impl ResourceUsage {
    pub fn new(input_units: u64, output_units: u64) -> Self {
        Self {
            input_units,
            output_units,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_units + self.output_units
    }
}

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// The backend was invoked for this task
    Executed,
    /// Served from the tiered cache
    Cache,
    /// Shared from a concurrent execution of the same fingerprint
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    /// Name of the backend that produced the result
    pub executor: String,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<TaskError>,
    pub execution_time: Duration,
    pub resource_usage: ResourceUsage,
    pub timestamp: DateTime<Utc>,
    pub source: ResultSource,
    /// Backend invocations made, including retries
    pub attempts: u32,
}

impl TaskResult {
    pub fn success(
        task_id: Uuid,
        executor: impl Into<String>,
        output: String,
        resource_usage: ResourceUsage,
        execution_time: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            task_id,
            executor: executor.into(),
            success: true,
            output: Some(output),
            error: None,
            execution_time,
            resource_usage,
            timestamp: Utc::now(),
            source: ResultSource::Executed,
            attempts,
        }
    }

    pub fn failure(
        task_id: Uuid,
        executor: impl Into<String>,
        error: TaskError,
        execution_time: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            task_id,
            executor: executor.into(),
            success: false,
            output: None,
            error: Some(error),
            execution_time,
            resource_usage: ResourceUsage::default(),
            timestamp: Utc::now(),
            source: ResultSource::Executed,
            attempts,
        }
    }

    /// Copy of a shared result handed to another task
    ///
    /// Output, usage and error are kept; identity, source and timing describe
    /// the receiving task, which made no backend call of its own.
    pub fn reissued(&self, task_id: Uuid, source: ResultSource, execution_time: Duration) -> Self {
        Self {
            task_id,
            source,
            execution_time,
            attempts: 0,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn is_from_cache(&self) -> bool {
        self.source == ResultSource::Cache
    }
}

/// Cut `output` to at most `max_bytes`, backing off to a character boundary
pub(crate) fn truncate_output(output: &mut String, max_bytes: usize) -> bool {
    if output.len() <= max_bytes {
        return false;
    }
    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    true
}
