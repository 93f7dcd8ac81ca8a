//! Durable publish queue.
//!
//! Jobs live in the `queue` table and move pending → claimed → done (deleted)
//! or failed. Control markers bracket a publish run: a ControlStart opens it
//! and a ControlStop either closes it (after all work) or halts it (at the
//! head of the queue).

pub mod actions;
pub mod error;
pub mod job;
pub mod policy;
pub mod store;

pub use error::QueueError;
pub use job::{
    Batch, BatchOutcome, ControlKind, Job, JobCounts, JobStatus, JobTarget, JobType, CLOSING_STOP,
};
pub use policy::{PriorityPolicy, CLOSING_STOP_PRIORITY};
pub use store::Queue;
