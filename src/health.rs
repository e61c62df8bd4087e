use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::lease::LeaseTable;
use crate::registry::{BenchRegistry, BenchStatus};
use crate::scheduler::allocator;
use crate::scheduler::queue::JobQueue;

/// Result of one liveness probe against a bench's driver endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    /// Endpoint answered but refused or misbehaved.
    Unhealthy,
    Unreachable,
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Probes bench driver endpoints.
///
/// In mock mode every probe passes unless the bench is scripted to fail,
/// which is how tests drive offline and quarantine scenarios. The real
/// probe is a TCP connect against the driver endpoint; the manager never
/// interprets radar/PSU/PTP semantics itself.
#[derive(Debug)]
pub struct BenchProber {
    mock_mode: bool,
    probe_timeout: Duration,
    failing: Mutex<HashSet<String>>,
}

impl BenchProber {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            mock_mode: false,
            probe_timeout,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Prober that never touches the network.
    pub fn mock() -> Self {
        Self {
            mock_mode: true,
            probe_timeout: Duration::from_secs(1),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Script a bench to fail probes (mock mode only).
    pub fn set_mock_failure(&self, bench_id: &str) {
        self.failing
            .lock()
            .expect("prober mutex poisoned")
            .insert(bench_id.to_string());
    }

    pub fn clear_mock_failure(&self, bench_id: &str) {
        self.failing
            .lock()
            .expect("prober mutex poisoned")
            .remove(bench_id);
    }

    pub fn clear_mock_failures(&self) {
        self.failing.lock().expect("prober mutex poisoned").clear();
    }

    pub async fn ping(&self, bench_id: &str, endpoint: &str) -> ProbeOutcome {
        if self.mock_mode {
            let failing = self
                .failing
                .lock()
                .expect("prober mutex poisoned")
                .contains(bench_id);
            return if failing {
                ProbeOutcome::Unreachable
            } else {
                ProbeOutcome::Healthy
            };
        }

        match tokio::time::timeout(self.probe_timeout, tokio::net::TcpStream::connect(endpoint))
            .await
        {
            Ok(Ok(_)) => ProbeOutcome::Healthy,
            Ok(Err(e)) => {
                tracing::debug!(bench_id, endpoint, error = %e, "Probe connect failed");
                ProbeOutcome::Unhealthy
            }
            Err(_) => {
                tracing::debug!(bench_id, endpoint, "Probe timed out");
                ProbeOutcome::Unreachable
            }
        }
    }
}

/// Periodically probes every non-allocated bench and applies the
/// Free/Offline/Maintenance transition rules. Probe failures are internal
/// signals driving bench status; they are never surfaced to callers.
pub struct HealthMonitor {
    registry: Arc<RwLock<BenchRegistry>>,
    queue: Arc<RwLock<JobQueue>>,
    leases: Arc<RwLock<LeaseTable>>,
    prober: Arc<BenchProber>,
    config: ManagerConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<RwLock<BenchRegistry>>,
        queue: Arc<RwLock<JobQueue>>,
        leases: Arc<RwLock<LeaseTable>>,
        prober: Arc<BenchProber>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            leases,
            prober,
            config,
        }
    }

    /// Probe loop. Cancelled via the shutdown token.
    pub async fn run(self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.health_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Health monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One probe pass over all non-allocated benches.
    ///
    /// Endpoints are snapshotted under a read guard, the probes run with no
    /// guard held (a hung bench must not stall allocation), and the results
    /// are applied under the write guards. A bench allocated between
    /// snapshot and apply has its stale result dropped by the registry.
    pub async fn sweep(&self) {
        let targets = self.registry.read().await.probe_targets();
        if targets.is_empty() {
            return;
        }

        let mut results = Vec::with_capacity(targets.len());
        for (bench_id, endpoint) in targets {
            let outcome = self.prober.ping(&bench_id, &endpoint).await;
            results.push((bench_id, outcome));
        }

        let mut registry = self.registry.write().await;
        let mut queue = self.queue.write().await;
        let mut leases = self.leases.write().await;

        let mut reenabled_types: HashSet<String> = HashSet::new();
        for (bench_id, outcome) in results {
            let was_free = registry
                .get(&bench_id)
                .map(|b| b.status == BenchStatus::Free)
                .unwrap_or(false);
            let status = match registry.record_probe(
                &bench_id,
                outcome.is_healthy(),
                self.config.health_failure_threshold,
                self.config.quarantine_clean_probes,
            ) {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(bench_id, error = %e, "Probe result dropped");
                    continue;
                }
            };
            // A bench that just returned to Free can service queued jobs
            if status == BenchStatus::Free && !was_free {
                if let Ok(bench) = registry.get(&bench_id) {
                    reenabled_types.insert(bench.hardware_type.clone());
                }
            }
        }

        for hardware_type in reenabled_types {
            allocator::run_matching_pass(
                &hardware_type,
                &mut registry,
                &mut queue,
                &mut leases,
                self.config.default_lease_timeout,
            );
        }
    }
}
