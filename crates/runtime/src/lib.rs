//! Process runtime helpers shared by the indexer binaries.

/// One-shot and periodic execution of an indexer job.
pub mod job;
/// Termination signals that stop a periodic job between runs.
pub mod shutdown;

pub use job::run_job;
pub use shutdown::ShutdownSignal;
