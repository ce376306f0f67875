pub mod job;
pub mod queue;

pub use job::{BackgroundJob, JobEvent, JobHandler, JobPhase};
pub use queue::JobQueue;
