use std::time::Duration;

use uuid::Uuid;

use crate::lease::LeaseTable;
use crate::registry::{BenchRegistry, BenchStatus};
use crate::scheduler::queue::JobQueue;

/// One committed allocation decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub job_id: Uuid,
    pub bench_id: String,
    pub lease_id: Uuid,
}

/// Try to pair one Free bench with the best eligible queued job.
///
/// Peek and commit happen against state the caller holds exclusively
/// (registry, queue, and lease write guards), so no other allocation or
/// release can interleave between choosing the candidate and removing it -
/// the double-booking guard the whole design hinges on.
pub fn try_allocate_bench(
    bench_id: &str,
    registry: &mut BenchRegistry,
    queue: &mut JobQueue,
    leases: &mut LeaseTable,
    default_timeout: Duration,
) -> Option<Allocation> {
    let bench = registry.get(bench_id).ok()?;
    if bench.status != BenchStatus::Free {
        return None;
    }

    let candidate = queue.peek_candidate(&bench.hardware_type, &bench.capabilities)?;
    let job_id = candidate.id;
    let timeout = candidate.execution_timeout.unwrap_or(default_timeout);

    let lease_id = leases.grant(job_id, bench_id, timeout);
    if let Err(e) = registry.mark_allocated(bench_id, lease_id) {
        // Unreachable given the Free check above; leave the lease revoked
        // rather than dangling.
        tracing::error!(bench_id, error = %e, "Allocation commit failed");
        leases.mark_revoked(lease_id);
        return None;
    }
    queue.commit_allocation(job_id, bench_id, lease_id);

    tracing::info!(
        job_id = %job_id,
        bench_id = %bench_id,
        lease_id = %lease_id,
        "Job allocated"
    );
    Some(Allocation {
        job_id,
        bench_id: bench_id.to_string(),
        lease_id,
    })
}

/// Matching pass for one hardware type: offer every Free bench of the type
/// to the queue until no further pair can be formed. Runs when a job is
/// enqueued, a bench is released, or a bench comes back online.
pub fn run_matching_pass(
    hardware_type: &str,
    registry: &mut BenchRegistry,
    queue: &mut JobQueue,
    leases: &mut LeaseTable,
    default_timeout: Duration,
) -> Vec<Allocation> {
    let mut allocations = Vec::new();
    for bench_id in registry.free_benches_of_type(hardware_type) {
        if let Some(allocation) =
            try_allocate_bench(&bench_id, registry, queue, leases, default_timeout)
        {
            allocations.push(allocation);
        }
    }
    allocations
}
