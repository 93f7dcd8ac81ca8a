use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Priority {priority} is reserved; ordinary jobs need a priority above {control}")]
    InvalidPriority { priority: i32, control: i32 },

    #[error("No queue job with id {0}")]
    UnknownJob(i64),

    #[error("Job {job_id} has been claimed since {claimed_at} without finishing")]
    StuckJob { job_id: i64, claimed_at: String },
}
