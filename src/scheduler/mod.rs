pub mod allocator;
pub mod job;
pub mod queue;

pub use allocator::Allocation;
pub use job::{Job, JobOutcome, JobSpec, JobStatus};
pub use queue::JobQueue;
