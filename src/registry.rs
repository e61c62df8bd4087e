use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{BenchDefinition, InitialBenchState};
use crate::error::{PoolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchStatus {
    Free,
    Allocated,
    Offline,
    Maintenance,
}

impl std::fmt::Display for BenchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchStatus::Free => write!(f, "free"),
            BenchStatus::Allocated => write!(f, "allocated"),
            BenchStatus::Offline => write!(f, "offline"),
            BenchStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// One physical bench and its live allocation/health state.
///
/// Invariant: `current_lease.is_some()` exactly when status is `Allocated`.
#[derive(Debug, Clone)]
pub struct TestBench {
    pub id: String,
    pub hardware_type: String,
    pub capabilities: HashSet<String>,
    pub driver_endpoint: String,
    pub location: String,
    pub description: String,
    pub status: BenchStatus,
    pub current_lease: Option<Uuid>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Clean probes observed since the bench entered Maintenance.
    pub clean_probes: u32,
}

impl TestBench {
    fn from_definition(def: BenchDefinition) -> Self {
        let status = match def.state {
            InitialBenchState::Available => BenchStatus::Free,
            InitialBenchState::Maintenance => BenchStatus::Maintenance,
            InitialBenchState::Offline => BenchStatus::Offline,
        };
        Self {
            id: def.bench_id,
            hardware_type: def.hardware_type,
            capabilities: def.capabilities,
            driver_endpoint: def.driver_endpoint,
            location: def.location,
            description: def.description,
            status,
            current_lease: None,
            last_health_check: None,
            consecutive_failures: 0,
            clean_probes: 0,
        }
    }
}

/// Read-only view of a bench for status queries and reports.
#[derive(Debug, Clone, Serialize)]
pub struct BenchSnapshot {
    pub bench_id: String,
    pub hardware_type: String,
    pub capabilities: Vec<String>,
    pub driver_endpoint: String,
    pub location: String,
    pub description: String,
    pub status: BenchStatus,
    pub current_lease: Option<Uuid>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl BenchSnapshot {
    fn of(bench: &TestBench) -> Self {
        let mut capabilities: Vec<String> = bench.capabilities.iter().cloned().collect();
        capabilities.sort();
        Self {
            bench_id: bench.id.clone(),
            hardware_type: bench.hardware_type.clone(),
            capabilities,
            driver_endpoint: bench.driver_endpoint.clone(),
            location: bench.location.clone(),
            description: bench.description.clone(),
            status: bench.status,
            current_lease: bench.current_lease,
            last_health_check: bench.last_health_check,
            consecutive_failures: bench.consecutive_failures,
        }
    }
}

/// Authoritative inventory of physical benches.
///
/// Read-mostly after startup. Only status fields mutate, and those writes
/// come from the allocator, lease supervisor, and health monitor paths, all
/// inside the manager's write sections.
#[derive(Debug, Default)]
pub struct BenchRegistry {
    benches: HashMap<String, TestBench>,
}

impl BenchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bench at startup. Id collisions abort startup.
    pub fn register(&mut self, definition: BenchDefinition) -> Result<()> {
        let bench = TestBench::from_definition(definition);
        if self.benches.contains_key(&bench.id) {
            return Err(PoolError::DuplicateBench(bench.id));
        }
        tracing::info!(
            bench_id = %bench.id,
            hardware_type = %bench.hardware_type,
            status = %bench.status,
            "Bench registered"
        );
        self.benches.insert(bench.id.clone(), bench);
        Ok(())
    }

    pub fn get(&self, bench_id: &str) -> Result<&TestBench> {
        self.benches
            .get(bench_id)
            .ok_or_else(|| PoolError::UnknownBench(bench_id.to_string()))
    }

    fn get_mut(&mut self, bench_id: &str) -> Result<&mut TestBench> {
        self.benches
            .get_mut(bench_id)
            .ok_or_else(|| PoolError::UnknownBench(bench_id.to_string()))
    }

    /// Bench ids of one hardware type, sorted so the order is stable
    /// within a call.
    pub fn list_by_hardware_type(&self, hardware_type: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .benches
            .values()
            .filter(|b| b.hardware_type == hardware_type)
            .map(|b| b.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Whether any bench of this type carries the required capabilities,
    /// regardless of current status. Used for the submission-time
    /// starvation guard.
    pub fn has_compatible_bench(&self, hardware_type: &str, capabilities: &HashSet<String>) -> bool {
        self.benches
            .values()
            .any(|b| b.hardware_type == hardware_type && capabilities.is_subset(&b.capabilities))
    }

    /// Free benches of one type, sorted for deterministic matching order.
    pub fn free_benches_of_type(&self, hardware_type: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .benches
            .values()
            .filter(|b| b.hardware_type == hardware_type && b.status == BenchStatus::Free)
            .map(|b| b.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn available_count(&self, hardware_type: Option<&str>) -> usize {
        self.benches
            .values()
            .filter(|b| b.status == BenchStatus::Free)
            .filter(|b| hardware_type.map_or(true, |ty| b.hardware_type == ty))
            .count()
    }

    pub fn snapshots(&self) -> Vec<BenchSnapshot> {
        let mut snapshots: Vec<BenchSnapshot> =
            self.benches.values().map(BenchSnapshot::of).collect();
        snapshots.sort_by(|a, b| a.bench_id.cmp(&b.bench_id));
        snapshots
    }

    pub fn snapshot(&self, bench_id: &str) -> Result<BenchSnapshot> {
        self.get(bench_id).map(BenchSnapshot::of)
    }

    // ------------------------------------------------------------------
    // Status transitions. Callers are the allocator (Free -> Allocated),
    // the lease supervisor (Allocated -> Free/Maintenance), and the
    // health monitor (Free <-> Offline, Maintenance -> Free).
    // ------------------------------------------------------------------

    /// Allocator: Free -> Allocated, binding the lease.
    pub(crate) fn mark_allocated(&mut self, bench_id: &str, lease_id: Uuid) -> Result<()> {
        let bench = self.get_mut(bench_id)?;
        debug_assert_eq!(bench.status, BenchStatus::Free);
        bench.status = BenchStatus::Allocated;
        bench.current_lease = Some(lease_id);
        Ok(())
    }

    /// Lease supervisor: Allocated -> Maintenance while the post-release
    /// quarantine probe runs. Clears the lease binding and resets the
    /// clean-probe counter. Returns the endpoint for the probe.
    pub(crate) fn begin_quarantine(&mut self, bench_id: &str) -> Result<String> {
        let bench = self.get_mut(bench_id)?;
        debug_assert_eq!(bench.status, BenchStatus::Allocated);
        bench.status = BenchStatus::Maintenance;
        bench.current_lease = None;
        bench.clean_probes = 0;
        Ok(bench.driver_endpoint.clone())
    }

    /// Lease supervisor: quarantine probe passed, Maintenance -> Free.
    /// No-op if the bench left Maintenance while the probe was in flight.
    pub(crate) fn finish_quarantine_ok(&mut self, bench_id: &str) -> Result<bool> {
        let bench = self.get_mut(bench_id)?;
        if bench.status != BenchStatus::Maintenance {
            return Ok(false);
        }
        bench.status = BenchStatus::Free;
        bench.consecutive_failures = 0;
        bench.clean_probes = 0;
        bench.last_health_check = Some(Utc::now());
        Ok(true)
    }

    /// Health monitor: record a probe result for a non-allocated bench.
    /// Returns the status after applying the transition rules.
    pub(crate) fn record_probe(
        &mut self,
        bench_id: &str,
        healthy: bool,
        failure_threshold: u32,
        clean_probe_target: u32,
    ) -> Result<BenchStatus> {
        let bench = self.get_mut(bench_id)?;

        // Allocated benches are exempt; a probe snapshotted before the
        // allocation is stale and must not touch the health record either.
        if bench.status == BenchStatus::Allocated {
            return Ok(bench.status);
        }
        bench.last_health_check = Some(Utc::now());

        match (bench.status, healthy) {
            (BenchStatus::Allocated, _) => unreachable!(),
            (BenchStatus::Free, true) => {
                bench.consecutive_failures = 0;
            }
            (BenchStatus::Free, false) => {
                bench.consecutive_failures += 1;
                if bench.consecutive_failures >= failure_threshold {
                    bench.status = BenchStatus::Offline;
                    tracing::warn!(
                        bench_id = %bench.id,
                        failures = bench.consecutive_failures,
                        "Bench marked offline"
                    );
                }
            }
            (BenchStatus::Offline, true) => {
                bench.status = BenchStatus::Free;
                bench.consecutive_failures = 0;
                tracing::info!(bench_id = %bench.id, "Bench back online");
            }
            (BenchStatus::Offline, false) => {
                bench.consecutive_failures += 1;
            }
            (BenchStatus::Maintenance, true) => {
                bench.clean_probes += 1;
                if bench.clean_probes >= clean_probe_target {
                    bench.status = BenchStatus::Free;
                    bench.consecutive_failures = 0;
                    bench.clean_probes = 0;
                    tracing::info!(bench_id = %bench.id, "Bench cleared maintenance");
                }
            }
            (BenchStatus::Maintenance, false) => {
                bench.clean_probes = 0;
            }
        }

        Ok(bench.status)
    }

    /// Operator path: Maintenance -> Free without waiting for clean probes.
    pub(crate) fn clear_maintenance(&mut self, bench_id: &str) -> Result<bool> {
        let bench = self.get_mut(bench_id)?;
        if bench.status != BenchStatus::Maintenance {
            return Ok(false);
        }
        bench.status = BenchStatus::Free;
        bench.consecutive_failures = 0;
        bench.clean_probes = 0;
        tracing::info!(bench_id = %bench.id, "Maintenance cleared by operator");
        Ok(true)
    }

    /// Benches eligible for health probing, with their endpoints.
    /// Allocated benches are excluded so probes never interfere with an
    /// active job.
    pub fn probe_targets(&self) -> Vec<(String, String)> {
        let mut targets: Vec<(String, String)> = self
            .benches
            .values()
            .filter(|b| b.status != BenchStatus::Allocated)
            .map(|b| (b.id.clone(), b.driver_endpoint.clone()))
            .collect();
        targets.sort();
        targets
    }

    pub fn len(&self) -> usize {
        self.benches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.benches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str, hardware_type: &str, caps: &[&str]) -> BenchDefinition {
        BenchDefinition {
            bench_id: id.to_string(),
            hardware_type: hardware_type.to_string(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            driver_endpoint: format!("10.0.0.1:{}", 5000),
            location: "Lab A".to_string(),
            description: String::new(),
            state: InitialBenchState::Available,
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = BenchRegistry::new();
        registry.register(definition("B1", "radar_x_band", &[])).unwrap();
        assert!(matches!(
            registry.register(definition("B1", "radar_x_band", &[])),
            Err(PoolError::DuplicateBench(_))
        ));
    }

    #[test]
    fn unknown_bench_lookup_fails() {
        let registry = BenchRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(PoolError::UnknownBench(_))
        ));
    }

    #[test]
    fn compatible_bench_check_includes_busy_benches() {
        let mut registry = BenchRegistry::new();
        registry
            .register(definition("B1", "radar_x_band", &["eth"]))
            .unwrap();
        registry.mark_allocated("B1", Uuid::new_v4()).unwrap();

        let caps: HashSet<String> = ["eth".to_string()].into_iter().collect();
        // Busy is not "nonexistent": the starvation guard must not fire.
        assert!(registry.has_compatible_bench("radar_x_band", &caps));
        assert!(!registry.has_compatible_bench("radar_s_band", &caps));

        let ptp: HashSet<String> = ["ptp".to_string()].into_iter().collect();
        assert!(!registry.has_compatible_bench("radar_x_band", &ptp));
    }

    #[test]
    fn list_by_hardware_type_is_stable() {
        let mut registry = BenchRegistry::new();
        registry.register(definition("B2", "radar_x_band", &[])).unwrap();
        registry.register(definition("B1", "radar_x_band", &[])).unwrap();
        registry.register(definition("B3", "radar_s_band", &[])).unwrap();

        assert_eq!(
            registry.list_by_hardware_type("radar_x_band"),
            vec!["B1".to_string(), "B2".to_string()]
        );
        assert!(registry.list_by_hardware_type("radar_l_band").is_empty());
    }

    #[test]
    fn free_to_offline_after_threshold() {
        let mut registry = BenchRegistry::new();
        registry.register(definition("B1", "radar_x_band", &[])).unwrap();

        assert_eq!(
            registry.record_probe("B1", false, 2, 2).unwrap(),
            BenchStatus::Free
        );
        assert_eq!(
            registry.record_probe("B1", false, 2, 2).unwrap(),
            BenchStatus::Offline
        );
        // Recovery is immediate on one good probe
        assert_eq!(
            registry.record_probe("B1", true, 2, 2).unwrap(),
            BenchStatus::Free
        );
        assert_eq!(registry.get("B1").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn quarantine_flow() {
        let mut registry = BenchRegistry::new();
        registry.register(definition("B1", "radar_x_band", &[])).unwrap();
        let lease = Uuid::new_v4();
        registry.mark_allocated("B1", lease).unwrap();
        assert_eq!(registry.get("B1").unwrap().current_lease, Some(lease));

        registry.begin_quarantine("B1").unwrap();
        let bench = registry.get("B1").unwrap();
        assert_eq!(bench.status, BenchStatus::Maintenance);
        assert_eq!(bench.current_lease, None);

        assert!(registry.finish_quarantine_ok("B1").unwrap());
        assert_eq!(registry.get("B1").unwrap().status, BenchStatus::Free);
    }

    #[test]
    fn maintenance_needs_consecutive_clean_probes() {
        let mut registry = BenchRegistry::new();
        registry.register(definition("B1", "radar_x_band", &[])).unwrap();
        registry.mark_allocated("B1", Uuid::new_v4()).unwrap();
        registry.begin_quarantine("B1").unwrap();

        assert_eq!(
            registry.record_probe("B1", true, 3, 2).unwrap(),
            BenchStatus::Maintenance
        );
        // A failure resets the streak
        assert_eq!(
            registry.record_probe("B1", false, 3, 2).unwrap(),
            BenchStatus::Maintenance
        );
        assert_eq!(
            registry.record_probe("B1", true, 3, 2).unwrap(),
            BenchStatus::Maintenance
        );
        assert_eq!(
            registry.record_probe("B1", true, 3, 2).unwrap(),
            BenchStatus::Free
        );
    }

    #[test]
    fn probe_on_allocated_bench_leaves_record_untouched() {
        let mut registry = BenchRegistry::new();
        registry.register(definition("B1", "radar_x_band", &[])).unwrap();
        registry.mark_allocated("B1", Uuid::new_v4()).unwrap();

        // A probe snapshotted before the allocation lands late
        assert_eq!(
            registry.record_probe("B1", false, 1, 2).unwrap(),
            BenchStatus::Allocated
        );
        let bench = registry.get("B1").unwrap();
        assert_eq!(bench.last_health_check, None);
        assert_eq!(bench.consecutive_failures, 0);
    }

    #[test]
    fn probe_targets_exclude_allocated() {
        let mut registry = BenchRegistry::new();
        registry.register(definition("B1", "radar_x_band", &[])).unwrap();
        registry.register(definition("B2", "radar_x_band", &[])).unwrap();
        registry.mark_allocated("B1", Uuid::new_v4()).unwrap();

        let targets = registry.probe_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, "B2");
    }
}
