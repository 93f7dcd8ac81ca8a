use thiserror::Error;

use super::render::RenderError;
use crate::queue::JobType;

/// Failure of a single job. Recorded in the queue row; never aborts a batch.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Path resolution failed: {0}")]
    Resolve(#[from] crate::path::ResolveError),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Storage failed: {0}")]
    Storage(#[from] crate::error::StorageError),

    #[error("Missing {kind} #{id}")]
    MissingContent { kind: &'static str, id: i64 },

    #[error("Invalid target for {job_type} job: {reason}")]
    InvalidTarget { job_type: JobType, reason: String },

    #[error("Content lookup failed: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl JobError {
    pub(crate) fn missing(kind: &'static str, id: i64) -> Self {
        Self::MissingContent { kind, id }
    }
}
