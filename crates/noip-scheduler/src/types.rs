use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The one job this agent schedules.
pub const UPDATE_JOB_ID: &str = "no-ip-update-task";

/// Ordered arguments handed to the update callable: `(credential, hostname)`.
///
/// Serialised as a JSON array so the store never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateArgs(pub String, pub String);

impl UpdateArgs {
    pub fn new(credential: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self(credential.into(), hostname.into())
    }

    pub fn credential(&self) -> &str {
        &self.0
    }

    pub fn hostname(&self) -> &str {
        &self.1
    }
}

/// Everything needed to register a job; the store adds the fire time.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    pub interval_minutes: u32,
    pub arguments: UpdateArgs,
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier, the primary key.
    pub id: String,
    /// Minutes between fires, always > 0.
    pub interval_minutes: u32,
    pub arguments: UpdateArgs,
    /// Absent until the job is first scheduled.
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Always 1: the engine never overlaps runs of the same job.
    pub max_instances: u32,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            id: spec.id,
            interval_minutes: spec.interval_minutes,
            arguments: spec.arguments,
            next_fire_time: None,
            max_instances: 1,
        }
    }

    /// True when the stored definition differs from `spec` (ignoring fire time).
    pub fn differs_from(&self, spec: &JobSpec) -> bool {
        self.interval_minutes != spec.interval_minutes || self.arguments != spec.arguments
    }
}

/// Result of one invocation of the update callable. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub job_id: String,
    /// Correlates the log lines of a single invocation.
    pub run_id: Uuid,
    /// The fire time this invocation served.
    pub scheduled_for: DateTime<Utc>,
    /// When the invocation finished.
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub failure_cause: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(job_id: &str, scheduled_for: DateTime<Utc>, at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_id: Uuid::now_v7(),
            scheduled_for,
            timestamp: at,
            success: true,
            failure_cause: None,
        }
    }

    pub fn failed(
        job_id: &str,
        scheduled_for: DateTime<Utc>,
        at: DateTime<Utc>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            failure_cause: Some(cause.into()),
            ..Self::succeeded(job_id, scheduled_for, at)
        }
    }
}

/// Where the engine loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for `next_fire_time`.
    Idle,
    /// Fire time reached.
    Firing,
    /// Update callable running.
    Invoking,
    /// Computing and persisting the next fire time.
    Rescheduling,
    /// Terminal.
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Firing => "firing",
            SchedulerState::Invoking => "invoking",
            SchedulerState::Rescheduling => "rescheduling",
            SchedulerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}
