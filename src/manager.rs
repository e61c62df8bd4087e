use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{BenchDefinition, ManagerConfig};
use crate::error::{PoolError, Result};
use crate::health::{BenchProber, HealthMonitor};
use crate::lease::LeaseTable;
use crate::registry::{BenchRegistry, BenchSnapshot};
use crate::scheduler::allocator;
use crate::scheduler::job::{Job, JobOutcome, JobSpec, JobStatus};
use crate::scheduler::queue::JobQueue;

/// How a revoked lease's job record ends. Applied only if the job is not
/// already terminal, so timeout and explicit-release races keep the first
/// writer's verdict.
#[derive(Debug, Clone)]
enum Disposition {
    Completed,
    Failed(String),
    Cancelled,
}

/// The resource manager facade: composes the registry, job queue,
/// allocator, lease supervision, and health monitoring.
///
/// Lock discipline: registry, then queue, then leases. Every allocation or
/// release runs entirely inside one such write section; probes and I/O run
/// outside it.
pub struct ResourceManager {
    config: ManagerConfig,
    registry: Arc<RwLock<BenchRegistry>>,
    queue: Arc<RwLock<JobQueue>>,
    leases: Arc<RwLock<LeaseTable>>,
    prober: Arc<BenchProber>,
}

impl ResourceManager {
    /// Build the manager from static bench definitions. Fails fast on
    /// duplicate bench ids; the manager never partially starts.
    pub fn new(
        definitions: Vec<BenchDefinition>,
        config: ManagerConfig,
        prober: Arc<BenchProber>,
    ) -> Result<Self> {
        let mut registry = BenchRegistry::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        tracing::info!(benches = registry.len(), "Resource manager initialized");

        Ok(Self {
            config,
            registry: Arc::new(RwLock::new(registry)),
            queue: Arc::new(RwLock::new(JobQueue::new())),
            leases: Arc::new(RwLock::new(LeaseTable::new())),
            prober,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Spawn the lease supervisor and health monitor loops. Both stop when
    /// the token is cancelled.
    pub fn spawn_loops(self: &Arc<Self>, token: CancellationToken) {
        let supervisor = self.clone();
        let supervisor_token = token.clone();
        tokio::spawn(async move {
            supervisor.supervisor_loop(supervisor_token).await;
        });

        let monitor = HealthMonitor::new(
            self.registry.clone(),
            self.queue.clone(),
            self.leases.clone(),
            self.prober.clone(),
            self.config.clone(),
        );
        tokio::spawn(async move {
            monitor.run(token).await;
        });
    }

    /// Build a health monitor sharing this manager's state. Tests drive
    /// its `sweep` directly instead of running the loop.
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.registry.clone(),
            self.queue.clone(),
            self.leases.clone(),
            self.prober.clone(),
            self.config.clone(),
        )
    }

    // ------------------------------------------------------------------
    // Public API (CI/test-runner surface)
    // ------------------------------------------------------------------

    /// Submit a job. Returns its id once queued; allocation is attempted
    /// immediately but the call never waits for a bench.
    ///
    /// A hardware type with no capability-compatible bench registered at
    /// all is rejected here rather than queued forever.
    pub async fn submit(&self, spec: JobSpec) -> Result<Uuid> {
        let job = Job::from_spec(spec);
        let job_id = job.id;

        let mut registry = self.registry.write().await;
        let mut queue = self.queue.write().await;
        let mut leases = self.leases.write().await;

        if !registry.has_compatible_bench(&job.hardware_type, &job.capabilities) {
            return Err(PoolError::NoCompatibleBench(job.hardware_type));
        }

        let hardware_type = job.hardware_type.clone();
        tracing::info!(
            job_id = %job_id,
            hardware_type = %hardware_type,
            priority = job.priority,
            requester = %job.requester,
            "Job submitted"
        );
        queue.enqueue(job);
        allocator::run_matching_pass(
            &hardware_type,
            &mut registry,
            &mut queue,
            &mut leases,
            self.config.default_lease_timeout,
        );

        Ok(job_id)
    }

    /// Snapshot of one job's state. Works for terminal jobs too.
    pub async fn status(&self, job_id: Uuid) -> Result<Job> {
        self.queue
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(PoolError::JobNotFound(job_id))
    }

    /// Cancel a job. Synchronous while `Queued`; for an `Allocated` job the
    /// lease is force-revoked, which frees the bench within one quarantine
    /// probe. Terminal and `Running` jobs are not cancellable.
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        // Status check and queue removal share one write guard; the
        // allocator needs this same guard to assign the job, so a job seen
        // as Queued here cannot be allocated out from under the removal.
        let lease_id = {
            let mut queue = self.queue.write().await;
            let job = queue.get(&job_id).ok_or(PoolError::JobNotFound(job_id))?;
            match (job.status, job.lease_id) {
                (JobStatus::Queued, _) => {
                    queue.remove(job_id);
                    tracing::info!(job_id = %job_id, "Queued job cancelled");
                    return Ok(());
                }
                (JobStatus::Allocated, Some(lease_id)) => lease_id,
                _ => return Err(PoolError::JobNotCancellable(job_id)),
            }
        };

        tracing::info!(job_id = %job_id, lease_id = %lease_id, "Cancelling allocated job");
        self.revoke(lease_id, Disposition::Cancelled).await;
        Ok(())
    }

    /// The lease holder signals that execution has started.
    pub async fn mark_running(&self, job_id: Uuid) -> Result<()> {
        let mut queue = self.queue.write().await;
        let job = queue
            .get_mut(&job_id)
            .ok_or(PoolError::JobNotFound(job_id))?;
        match job.status {
            JobStatus::Allocated => {
                job.status = JobStatus::Running;
                tracing::info!(job_id = %job_id, "Job running");
                Ok(())
            }
            JobStatus::Running => Ok(()),
            // No bench granted yet; never held a lease
            JobStatus::Queued => Err(PoolError::JobNotAllocated(job_id)),
            // Forced timeout already ended this job
            _ => Err(PoolError::LeaseExpired(job.lease_id.unwrap_or(Uuid::nil()))),
        }
    }

    /// The job owner reports the final outcome; triggers release.
    /// Reporting after a forced timeout revocation yields `LeaseExpired`.
    pub async fn report_outcome(&self, job_id: Uuid, outcome: JobOutcome) -> Result<()> {
        let lease_id = {
            let queue = self.queue.read().await;
            let job = queue.get(&job_id).ok_or(PoolError::JobNotFound(job_id))?;
            match job.status {
                JobStatus::Allocated | JobStatus::Running => job
                    .lease_id
                    .ok_or(PoolError::LeaseExpired(Uuid::nil()))?,
                _ => {
                    return Err(PoolError::LeaseExpired(
                        job.lease_id.unwrap_or(Uuid::nil()),
                    ))
                }
            }
        };

        let disposition = match outcome {
            JobOutcome::Completed => Disposition::Completed,
            JobOutcome::Failed => Disposition::Failed("reported failed by owner".to_string()),
        };
        self.revoke(lease_id, disposition).await;
        Ok(())
    }

    /// Extend a live lease. Revoked or unknown leases yield `LeaseExpired`.
    pub async fn heartbeat(&self, lease_id: Uuid) -> Result<()> {
        self.leases.write().await.heartbeat(lease_id)
    }

    /// Read-only bench snapshots for dashboards. Informational; never used
    /// for allocation decisions.
    pub async fn list_bench_statuses(&self) -> Vec<BenchSnapshot> {
        self.registry.read().await.snapshots()
    }

    pub async fn bench_status(&self, bench_id: &str) -> Result<BenchSnapshot> {
        self.registry.read().await.snapshot(bench_id)
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.queue
            .read()
            .await
            .all_jobs()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn available_count(&self, hardware_type: Option<&str>) -> usize {
        self.registry.read().await.available_count(hardware_type)
    }

    /// Operator path: return a Maintenance bench to service immediately and
    /// re-run matching so queued jobs are picked up.
    pub async fn clear_maintenance(&self, bench_id: &str) -> Result<()> {
        let mut registry = self.registry.write().await;
        let mut queue = self.queue.write().await;
        let mut leases = self.leases.write().await;

        if registry.clear_maintenance(bench_id)? {
            let hardware_type = registry.get(bench_id)?.hardware_type.clone();
            allocator::run_matching_pass(
                &hardware_type,
                &mut registry,
                &mut queue,
                &mut leases,
                self.config.default_lease_timeout,
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lease supervision
    // ------------------------------------------------------------------

    /// Lease supervisor loop: the backstop against leaked benches when a
    /// job hangs or crashes without reporting.
    async fn supervisor_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.lease_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Lease supervisor stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.check_expired_leases().await;
                    self.check_queue_deadlines().await;
                }
            }
        }
    }

    /// Force-fail every job whose lease expired without a heartbeat or
    /// outcome, and release its bench.
    pub async fn check_expired_leases(&self) {
        let expired = self.leases.read().await.expired(Utc::now());
        for lease_id in expired {
            tracing::warn!(lease_id = %lease_id, "Lease expired, forcing release");
            self.revoke(lease_id, Disposition::Failed("lease expired".to_string()))
                .await;
        }
    }

    /// Cancel queued jobs whose queue deadline has passed.
    pub async fn check_queue_deadlines(&self) {
        let mut queue = self.queue.write().await;
        for job_id in queue.deadline_expired(Utc::now()) {
            if queue.remove(job_id) {
                if let Some(job) = queue.get_mut(&job_id) {
                    job.failure_reason = Some("queue deadline exceeded".to_string());
                }
                tracing::warn!(job_id = %job_id, "Queued job cancelled at deadline");
            }
        }
    }

    /// Revoke a lease exactly once. All three release paths (explicit
    /// release, timeout, forced cancellation) converge here; a second call
    /// for the same lease is a no-op.
    ///
    /// Three phases: detach the lease and park the bench in Maintenance
    /// under the write guards, run the post-release quarantine probe with
    /// no guard held, then promote the bench to Free (and re-run matching)
    /// only if the probe passed and nothing else moved the bench meanwhile.
    async fn revoke(&self, lease_id: Uuid, disposition: Disposition) {
        let (job_id, bench_id, endpoint) = {
            let mut registry = self.registry.write().await;
            let mut queue = self.queue.write().await;
            let mut leases = self.leases.write().await;

            let Some((job_id, bench_id)) = leases.mark_revoked(lease_id) else {
                return;
            };

            if let Some(job) = queue.get_mut(&job_id) {
                if !job.status.is_terminal() {
                    match &disposition {
                        Disposition::Completed => job.status = JobStatus::Completed,
                        Disposition::Failed(reason) => {
                            job.status = JobStatus::Failed;
                            job.failure_reason = Some(reason.clone());
                        }
                        Disposition::Cancelled => job.status = JobStatus::Cancelled,
                    }
                    job.completed_at = Some(Utc::now());
                    tracing::info!(job_id = %job_id, status = %job.status, "Job finished");
                }
            }

            match registry.begin_quarantine(&bench_id) {
                Ok(endpoint) => (job_id, bench_id, endpoint),
                Err(e) => {
                    tracing::error!(bench_id = %bench_id, error = %e, "Release failed");
                    return;
                }
            }
        };

        let outcome = self.prober.ping(&bench_id, &endpoint).await;

        let mut registry = self.registry.write().await;
        let mut queue = self.queue.write().await;
        let mut leases = self.leases.write().await;

        if outcome.is_healthy() {
            match registry.finish_quarantine_ok(&bench_id) {
                Ok(true) => {
                    let hardware_type = match registry.get(&bench_id) {
                        Ok(bench) => bench.hardware_type.clone(),
                        Err(_) => return,
                    };
                    tracing::info!(bench_id = %bench_id, job_id = %job_id, "Bench released");
                    allocator::run_matching_pass(
                        &hardware_type,
                        &mut registry,
                        &mut queue,
                        &mut leases,
                        self.config.default_lease_timeout,
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(bench_id = %bench_id, error = %e, "Quarantine finish failed");
                }
            }
        } else {
            tracing::warn!(
                bench_id = %bench_id,
                outcome = ?outcome,
                "Post-release check failed, bench stays in maintenance"
            );
        }
    }
}
