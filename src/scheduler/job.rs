use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Allocated,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Allocated => write!(f, "allocated"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How the job reached the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    #[default]
    Automatic,
    Manual,
}

/// Outcome reported by the job owner once execution ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Completed,
    Failed,
}

/// Submission parameters for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub hardware_type: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    /// Higher is served first; equal priority falls back to FIFO.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub trigger: TriggerKind,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub queue_deadline: Option<DateTime<Utc>>,
    /// Lease duration for this job; the manager default applies when unset.
    #[serde(default)]
    pub execution_timeout: Option<Duration>,
}

impl JobSpec {
    pub fn new(hardware_type: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            hardware_type: hardware_type.into(),
            capabilities: HashSet::new(),
            priority: 0,
            trigger: TriggerKind::Automatic,
            requester: requester.into(),
            queue_deadline: None,
            execution_timeout: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerKind) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_queue_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.queue_deadline = Some(deadline);
        self
    }
}

/// One test job and its full lifecycle record.
///
/// Terminal jobs are retained for audit; status queries keep working after
/// completion until the record is externally purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub hardware_type: String,
    pub capabilities: HashSet<String>,
    pub priority: i32,
    pub trigger: TriggerKind,
    pub requester: String,
    pub status: JobStatus,
    pub assigned_bench: Option<String>,
    pub lease_id: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
    pub queue_deadline: Option<DateTime<Utc>>,
    pub execution_timeout: Option<Duration>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Job {
    pub fn from_spec(spec: JobSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            hardware_type: spec.hardware_type,
            capabilities: spec.capabilities,
            priority: spec.priority,
            trigger: spec.trigger,
            requester: spec.requester,
            status: JobStatus::Queued,
            assigned_bench: None,
            lease_id: None,
            submitted_at: Utc::now(),
            queue_deadline: spec.queue_deadline,
            execution_timeout: spec.execution_timeout,
            completed_at: None,
            failure_reason: None,
        }
    }
}
