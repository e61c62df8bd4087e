use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// Runtime settings for the resource manager.
///
/// Defaults match the values the production inventory files ship with;
/// tests override them with much shorter intervals.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Lease duration applied when a job does not declare its own
    /// execution timeout.
    pub default_lease_timeout: Duration,
    /// How often the lease supervisor scans for expired leases.
    pub lease_check_interval: Duration,
    /// How often the health monitor probes non-allocated benches.
    pub health_check_interval: Duration,
    /// Consecutive probe failures before a Free bench goes Offline.
    pub health_failure_threshold: u32,
    /// Consecutive clean probes before a Maintenance bench returns to Free.
    pub quarantine_clean_probes: u32,
    /// Timeout for a single driver-endpoint probe.
    pub probe_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_lease_timeout: Duration::from_secs(1800),
            lease_check_interval: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            health_failure_threshold: 3,
            quarantine_clean_probes: 2,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl ManagerConfig {
    pub fn with_default_lease_timeout(mut self, timeout: Duration) -> Self {
        self.default_lease_timeout = timeout;
        self
    }

    pub fn with_lease_check_interval(mut self, interval: Duration) -> Self {
        self.lease_check_interval = interval;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_health_failure_threshold(mut self, threshold: u32) -> Self {
        self.health_failure_threshold = threshold;
        self
    }

    pub fn with_quarantine_clean_probes(mut self, probes: u32) -> Self {
        self.quarantine_clean_probes = probes;
        self
    }
}

/// Initial bench state as declared in the inventory file.
///
/// Anything outside this set is a deserialization error, which aborts
/// startup. A bench that cannot be classified must not be silently queued
/// for allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialBenchState {
    #[default]
    Available,
    Maintenance,
    Offline,
}

/// Static definition of one physical bench, loaded from the inventory file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchDefinition {
    pub bench_id: String,
    pub hardware_type: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    /// Opaque address routed to the probe; never interpreted here.
    pub driver_endpoint: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: InitialBenchState,
}

/// Settings section of the inventory file. All fields optional; absent
/// values fall back to `ManagerConfig` defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSection {
    default_lease_timeout_sec: Option<u64>,
    lease_check_interval_sec: Option<u64>,
    health_check_interval_sec: Option<u64>,
    health_failure_threshold: Option<u32>,
    quarantine_clean_probes: Option<u32>,
    probe_timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    settings: SettingsSection,
    benches: Vec<BenchDefinition>,
}

/// Parsed and validated inventory: bench definitions plus manager settings.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub benches: Vec<BenchDefinition>,
    pub config: ManagerConfig,
}

/// Load the bench inventory from a YAML or JSON file.
///
/// Fails fast on unreadable files, malformed documents, unknown settings
/// keys, unknown initial states, or incomplete bench definitions. The
/// manager never partially starts from a bad inventory.
pub fn load_inventory(path: &Path) -> Result<Inventory> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PoolError::Config(format!("cannot read {}: {e}", path.display())))?;

    let file: InventoryFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .map_err(|e| PoolError::Config(format!("invalid JSON in {}: {e}", path.display())))?,
        _ => serde_yaml::from_str(&raw)
            .map_err(|e| PoolError::Config(format!("invalid YAML in {}: {e}", path.display())))?,
    };

    for bench in &file.benches {
        if bench.bench_id.is_empty() {
            return Err(PoolError::Config("bench with empty bench_id".to_string()));
        }
        if bench.hardware_type.is_empty() {
            return Err(PoolError::Config(format!(
                "bench {} has no hardware_type",
                bench.bench_id
            )));
        }
        if bench.driver_endpoint.is_empty() {
            return Err(PoolError::Config(format!(
                "bench {} has no driver_endpoint",
                bench.bench_id
            )));
        }
    }

    let s = file.settings;
    let defaults = ManagerConfig::default();
    let config = ManagerConfig {
        default_lease_timeout: s
            .default_lease_timeout_sec
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_lease_timeout),
        lease_check_interval: s
            .lease_check_interval_sec
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease_check_interval),
        health_check_interval: s
            .health_check_interval_sec
            .map(Duration::from_secs)
            .unwrap_or(defaults.health_check_interval),
        health_failure_threshold: s
            .health_failure_threshold
            .unwrap_or(defaults.health_failure_threshold),
        quarantine_clean_probes: s
            .quarantine_clean_probes
            .unwrap_or(defaults.quarantine_clean_probes),
        probe_timeout: s
            .probe_timeout_sec
            .map(Duration::from_secs)
            .unwrap_or(defaults.probe_timeout),
    };

    tracing::info!(
        path = %path.display(),
        benches = file.benches.len(),
        "Loaded bench inventory"
    );

    Ok(Inventory {
        benches: file.benches,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str, ext: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{ext}"))
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn manager_config_defaults() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.default_lease_timeout, Duration::from_secs(1800));
        assert_eq!(cfg.health_failure_threshold, 3);
        assert_eq!(cfg.quarantine_clean_probes, 2);
    }

    #[test]
    fn load_yaml_inventory() {
        let file = write_temp(
            r#"
settings:
  default_lease_timeout_sec: 60
  health_failure_threshold: 2
benches:
  - bench_id: BENCH-001
    hardware_type: radar_x_band
    capabilities: [eth, ptp]
    driver_endpoint: 192.168.1.10:5000
    location: Lab A
  - bench_id: BENCH-002
    hardware_type: radar_s_band
    driver_endpoint: 192.168.2.10:5000
    state: maintenance
"#,
            "yaml",
        );

        let inv = load_inventory(file.path()).unwrap();
        assert_eq!(inv.benches.len(), 2);
        assert_eq!(inv.config.default_lease_timeout, Duration::from_secs(60));
        assert_eq!(inv.config.health_failure_threshold, 2);
        // Unset settings keep defaults
        assert_eq!(inv.config.quarantine_clean_probes, 2);
        assert!(inv.benches[0].capabilities.contains("ptp"));
        assert_eq!(inv.benches[1].state, InitialBenchState::Maintenance);
    }

    #[test]
    fn load_json_inventory() {
        let file = write_temp(
            r#"{"benches": [{"bench_id": "B1", "hardware_type": "radar_x_band",
                 "driver_endpoint": "10.0.0.1:5000"}]}"#,
            "json",
        );
        let inv = load_inventory(file.path()).unwrap();
        assert_eq!(inv.benches.len(), 1);
        assert_eq!(inv.benches[0].state, InitialBenchState::Available);
    }

    #[test]
    fn unknown_initial_state_is_rejected() {
        let file = write_temp(
            r#"
benches:
  - bench_id: B1
    hardware_type: radar_x_band
    driver_endpoint: 10.0.0.1:5000
    state: exploded
"#,
            "yaml",
        );
        assert!(matches!(
            load_inventory(file.path()),
            Err(PoolError::Config(_))
        ));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let file = write_temp(
            r#"
benches:
  - bench_id: B1
    hardware_type: radar_x_band
    driver_endpoint: ""
"#,
            "yaml",
        );
        assert!(matches!(
            load_inventory(file.path()),
            Err(PoolError::Config(_))
        ));
    }

    #[test]
    fn unknown_settings_key_is_rejected() {
        let file = write_temp(
            r#"
settings:
  lease_timeout_minutes: 3
benches: []
"#,
            "yaml",
        );
        assert!(matches!(
            load_inventory(file.path()),
            Err(PoolError::Config(_))
        ));
    }
}
