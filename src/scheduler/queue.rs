use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::scheduler::job::{Job, JobStatus};

/// Ordering key for one queued job. Descending priority, then ascending
/// submission time, then ascending job id. The final key keeps allocation
/// order deterministic even under identical priorities and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    submitted_at: DateTime<Utc>,
    job_id: Uuid,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.submitted_at.cmp(&other.submitted_at))
            .then_with(|| self.job_id.cmp(&other.job_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Holds every submitted job and one ordered queue per hardware type.
///
/// Per-type queues are consulted independently, so a starved hardware type
/// never blocks allocation for another.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: HashMap<Uuid, Job>,
    queues: HashMap<String, Vec<QueueEntry>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job in `Queued` status, preserving priority-then-FIFO order
    /// within its hardware type. Non-blocking.
    pub fn enqueue(&mut self, job: Job) {
        debug_assert_eq!(job.status, JobStatus::Queued);
        let entry = QueueEntry {
            priority: job.priority,
            submitted_at: job.submitted_at,
            job_id: job.id,
        };
        let queue = self.queues.entry(job.hardware_type.clone()).or_default();
        let idx = queue.binary_search(&entry).unwrap_or_else(|i| i);
        queue.insert(idx, entry);
        tracing::debug!(job_id = %job.id, hardware_type = %job.hardware_type, "Job enqueued");
        self.jobs.insert(job.id, job);
    }

    /// Peek the highest-priority, oldest queued job for `hardware_type`
    /// whose required capabilities are a subset of `capabilities`.
    /// Does not remove the job; the allocator commits removal separately.
    pub fn peek_candidate(
        &self,
        hardware_type: &str,
        capabilities: &HashSet<String>,
    ) -> Option<&Job> {
        let queue = self.queues.get(hardware_type)?;
        queue.iter().find_map(|entry| {
            self.jobs.get(&entry.job_id).filter(|job| {
                job.status == JobStatus::Queued && job.capabilities.is_subset(capabilities)
            })
        })
    }

    /// Commit an allocation decided by the allocator: transition the job to
    /// `Allocated`, record its bench and lease, and drop it from the
    /// per-type queue. Must run inside the allocator's critical section.
    pub(crate) fn commit_allocation(&mut self, job_id: Uuid, bench_id: &str, lease_id: Uuid) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.status = JobStatus::Allocated;
            job.assigned_bench = Some(bench_id.to_string());
            job.lease_id = Some(lease_id);
            self.drop_from_queue(job_id);
        }
    }

    /// Remove a job that is still `Queued`. Returns false otherwise; the
    /// facade maps that to `JobNotCancellableError`.
    pub fn remove(&mut self, job_id: Uuid) -> bool {
        match self.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                self.drop_from_queue(job_id);
                true
            }
            _ => false,
        }
    }

    fn drop_from_queue(&mut self, job_id: Uuid) {
        for queue in self.queues.values_mut() {
            queue.retain(|entry| entry.job_id != job_id);
        }
    }

    pub fn get(&self, job_id: &Uuid) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub(crate) fn get_mut(&mut self, job_id: &Uuid) -> Option<&mut Job> {
        self.jobs.get_mut(job_id)
    }

    /// Queued jobs whose queue deadline has passed. The supervisor cancels
    /// these instead of leaving them stuck.
    pub fn deadline_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Queued
                    && job.queue_deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|job| job.id)
            .collect()
    }

    /// All jobs sorted chronologically by submission time.
    pub fn all_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|job| (job.submitted_at, job.id));
        jobs
    }

    /// Number of jobs still waiting for the given hardware type.
    pub fn queued_count(&self, hardware_type: &str) -> usize {
        self.queues
            .get(hardware_type)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}
