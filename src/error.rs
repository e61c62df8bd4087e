use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("no registered bench matches hardware type '{0}' with the required capabilities")]
    NoCompatibleBench(String),

    #[error("job {0} cannot be cancelled in its current state")]
    JobNotCancellable(Uuid),

    #[error("job {0} has no bench allocated yet")]
    JobNotAllocated(Uuid),

    #[error("lease {0} has expired or been revoked")]
    LeaseExpired(Uuid),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("unknown bench: {0}")]
    UnknownBench(String),

    #[error("duplicate bench id: {0}")]
    DuplicateBench(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;
