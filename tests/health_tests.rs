use std::sync::Arc;
use std::time::Duration;

use benchpool::config::{BenchDefinition, InitialBenchState, ManagerConfig};
use benchpool::health::BenchProber;
use benchpool::manager::ResourceManager;
use benchpool::registry::BenchStatus;
use benchpool::scheduler::job::{JobOutcome, JobSpec, JobStatus};

fn bench(id: &str, hardware_type: &str) -> BenchDefinition {
    BenchDefinition {
        bench_id: id.to_string(),
        hardware_type: hardware_type.to_string(),
        capabilities: Default::default(),
        driver_endpoint: "10.0.0.1:5000".to_string(),
        location: "Lab A".to_string(),
        description: String::new(),
        state: InitialBenchState::Available,
    }
}

fn manager_with(
    benches: Vec<BenchDefinition>,
    config: ManagerConfig,
) -> (Arc<ResourceManager>, Arc<BenchProber>) {
    let prober = Arc::new(BenchProber::mock());
    let manager =
        Arc::new(ResourceManager::new(benches, config, prober.clone()).expect("manager setup"));
    (manager, prober)
}

async fn bench_status(manager: &ResourceManager, bench_id: &str) -> BenchStatus {
    manager.bench_status(bench_id).await.unwrap().status
}

#[tokio::test]
async fn bench_goes_offline_after_failure_threshold() {
    let config = ManagerConfig::default().with_health_failure_threshold(3);
    let (manager, prober) = manager_with(vec![bench("B1", "radarX")], config);
    let monitor = manager.health_monitor();

    prober.set_mock_failure("B1");
    monitor.sweep().await;
    monitor.sweep().await;
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Free);

    monitor.sweep().await;
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Offline);
}

#[tokio::test]
async fn successful_probe_resets_failure_streak() {
    let config = ManagerConfig::default().with_health_failure_threshold(2);
    let (manager, prober) = manager_with(vec![bench("B1", "radarX")], config);
    let monitor = manager.health_monitor();

    prober.set_mock_failure("B1");
    monitor.sweep().await;
    prober.clear_mock_failure("B1");
    monitor.sweep().await;
    prober.set_mock_failure("B1");
    monitor.sweep().await;

    // Never two consecutive failures, so never offline
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Free);
}

#[tokio::test]
async fn recovered_bench_services_queued_jobs() {
    let config = ManagerConfig::default().with_health_failure_threshold(1);
    let (manager, prober) = manager_with(vec![bench("B1", "radarX")], config);
    let monitor = manager.health_monitor();

    prober.set_mock_failure("B1");
    monitor.sweep().await;
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Offline);

    // The type still has a registered bench, so submission queues
    let job_id = manager.submit(JobSpec::new("radarX", "ci")).await.unwrap();
    assert_eq!(
        manager.status(job_id).await.unwrap().status,
        JobStatus::Queued
    );

    prober.clear_mock_failure("B1");
    monitor.sweep().await;

    // Offline -> Free triggers a matching pass for the type
    assert_eq!(
        manager.status(job_id).await.unwrap().status,
        JobStatus::Allocated
    );
}

#[tokio::test]
async fn allocated_bench_is_never_probed() {
    let config = ManagerConfig::default().with_health_failure_threshold(1);
    let (manager, prober) = manager_with(vec![bench("B1", "radarX")], config);
    let monitor = manager.health_monitor();

    let job_id = manager.submit(JobSpec::new("radarX", "ci")).await.unwrap();
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Allocated);

    // Even a failing endpoint must not touch an allocated bench
    prober.set_mock_failure("B1");
    monitor.sweep().await;
    monitor.sweep().await;

    let snapshot = manager.bench_status("B1").await.unwrap();
    assert_eq!(snapshot.status, BenchStatus::Allocated);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert_eq!(
        manager.status(job_id).await.unwrap().status,
        JobStatus::Allocated
    );
}

#[tokio::test]
async fn maintenance_clears_after_consecutive_clean_probes() {
    let config = ManagerConfig::default().with_quarantine_clean_probes(2);
    let (manager, prober) = manager_with(vec![bench("B1", "radarX")], config);
    let monitor = manager.health_monitor();

    // Fail the post-release quarantine check to park the bench
    let job_id = manager.submit(JobSpec::new("radarX", "ci")).await.unwrap();
    prober.set_mock_failure("B1");
    manager
        .report_outcome(job_id, JobOutcome::Completed)
        .await
        .unwrap();
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Maintenance);

    prober.clear_mock_failure("B1");
    monitor.sweep().await;
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Maintenance);
    monitor.sweep().await;
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Free);
}

#[tokio::test]
async fn failed_probe_resets_clean_probe_streak() {
    let config = ManagerConfig::default().with_quarantine_clean_probes(2);
    let (manager, prober) = manager_with(vec![bench("B1", "radarX")], config);
    let monitor = manager.health_monitor();

    let job_id = manager.submit(JobSpec::new("radarX", "ci")).await.unwrap();
    prober.set_mock_failure("B1");
    manager
        .report_outcome(job_id, JobOutcome::Completed)
        .await
        .unwrap();

    prober.clear_mock_failure("B1");
    monitor.sweep().await;
    prober.set_mock_failure("B1");
    monitor.sweep().await;
    prober.clear_mock_failure("B1");
    monitor.sweep().await;

    // One clean, one failed, one clean: streak broken, still in maintenance
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Maintenance);
    monitor.sweep().await;
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Free);
}

#[tokio::test]
async fn monitor_loop_recovers_bench_end_to_end() {
    let config = ManagerConfig::default()
        .with_health_failure_threshold(1)
        .with_health_check_interval(Duration::from_millis(20));
    let (manager, prober) = manager_with(vec![bench("B1", "radarX")], config);

    let token = tokio_util::sync::CancellationToken::new();
    manager.spawn_loops(token.clone());

    prober.set_mock_failure("B1");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Offline);

    prober.clear_mock_failure("B1");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bench_status(&manager, "B1").await, BenchStatus::Free);

    token.cancel();
}
