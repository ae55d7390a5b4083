pub mod pool;
pub mod sweep;

pub use pool::{job_channel, JobIntake, JobSender, WorkerPool};
pub use sweep::SweepScheduler;
