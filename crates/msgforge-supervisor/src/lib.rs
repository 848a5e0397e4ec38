//! The task supervisor (spec §4.2): runs a fixed, declared set of long-lived worker
//! tasks, restarts a task that returns an error with exponential backoff, and reports
//! aggregated health. Every worker in `msgforge-workers` (and the outbox/quota sweepers
//! in `msgforge-store`) is registered here rather than spawned ad hoc, so restart policy
//! and health reporting are uniform across the process.

mod supervisor;

pub use supervisor::{BoxFuture, OverallHealth, Supervisor, TaskFactory, TaskHealth, TaskState};

pub use msgforge_core::error::RetryPolicy as RestartPolicy;
