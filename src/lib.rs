pub mod config;
pub mod dashboard;
pub mod error;
pub mod health;
pub mod lease;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod shutdown;

pub use config::{load_inventory, BenchDefinition, ManagerConfig};
pub use error::{PoolError, Result};
pub use health::{BenchProber, ProbeOutcome};
pub use manager::ResourceManager;
pub use registry::{BenchSnapshot, BenchStatus};
pub use scheduler::job::{Job, JobOutcome, JobSpec, JobStatus, TriggerKind};
