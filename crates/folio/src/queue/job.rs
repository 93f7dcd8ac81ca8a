use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::content::BlogRef;
use crate::db::queue_repo::QueueRow;
use crate::db::{parse_timestamp, DatabaseError};

/// `data_string` of the ControlStop that closes a run.
pub const CLOSING_STOP: &str = "close";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Page,
    Index,
    Archive,
    Include,
    ControlStart,
    ControlStop,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Index => "index",
            Self::Archive => "archive",
            Self::Include => "include",
            Self::ControlStart => "control_start",
            Self::ControlStop => "control_stop",
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Self::ControlStart | Self::ControlStop)
    }
}

impl FromStr for JobType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" => Ok(Self::Page),
            "index" => Ok(Self::Index),
            "archive" => Ok(Self::Archive),
            "include" => Ok(Self::Include),
            "control_start" => Ok(Self::ControlStart),
            "control_stop" => Ok(Self::ControlStop),
            other => Err(DatabaseError::InvalidValue {
                column: "queue.job_type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of bracket marker accepted by `Queue::enqueue_control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Start,
    Stop,
}

impl ControlKind {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Start => JobType::ControlStart,
            Self::Stop => JobType::ControlStop,
        }
    }
}

/// What a job works on, stored in `data_integer` / `data_string`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum JobTarget {
    /// The blog as a whole.
    Blog,
    /// A content item id (page, template).
    Item(i64),
    /// A free-form descriptor.
    Key(String),
    /// An item id qualified by a descriptor (mapping + archive key).
    ItemKey(i64, String),
}

impl JobTarget {
    pub fn data_integer(&self) -> Option<i64> {
        match self {
            Self::Item(id) | Self::ItemKey(id, _) => Some(*id),
            Self::Blog | Self::Key(_) => None,
        }
    }

    pub fn data_string(&self) -> Option<&str> {
        match self {
            Self::Key(key) | Self::ItemKey(_, key) => Some(key),
            Self::Blog | Self::Item(_) => None,
        }
    }

    pub fn from_columns(data_integer: Option<i64>, data_string: Option<String>) -> Self {
        match (data_integer, data_string) {
            (None, None) => Self::Blog,
            (Some(id), None) => Self::Item(id),
            (None, Some(key)) => Self::Key(key),
            (Some(id), Some(key)) => Self::ItemKey(id, key),
        }
    }
}

impl fmt::Display for JobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blog => f.write_str("blog"),
            Self::Item(id) => write!(f, "#{}", id),
            Self::Key(key) => write!(f, "'{}'", key),
            Self::ItemKey(id, key) => write!(f, "#{} '{}'", id, key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Claimed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "failed" => Ok(Self::Failed),
            other => Err(DatabaseError::InvalidValue {
                column: "queue.status",
                value: other.to_string(),
            }),
        }
    }
}

/// One queue row. Completed jobs are deleted, so a job is always pending,
/// claimed or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: i64,
    pub job_type: JobType,
    pub target: JobTarget,
    pub priority: i32,
    pub touched_at: DateTime<Utc>,
    pub owner: BlogRef,
    pub status: JobStatus,
    pub claim_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn is_control(&self) -> bool {
        self.job_type.is_control()
    }

    /// A ControlStop that ends a run rather than halting it.
    pub fn is_closing_stop(&self) -> bool {
        self.job_type == JobType::ControlStop && self.target.data_string() == Some(CLOSING_STOP)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} ({} {})", self.id, self.job_type, self.target)
    }
}

impl TryFrom<QueueRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            job_type: row.job_type.parse()?,
            target: JobTarget::from_columns(row.data_integer, row.data_string),
            priority: row.priority,
            touched_at: parse_timestamp(&row.touched_at)?,
            owner: BlogRef {
                blog_id: row.blog_id,
                site_id: row.site_id,
            },
            status: row.status.parse()?,
            claim_id: row.claim_id,
            claimed_at: row.claimed_at.as_deref().map(parse_timestamp).transpose()?,
            error: row.error,
        })
    }
}

/// Per-blog queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    /// Pending ordinary jobs.
    pub pending: u64,
    /// Pending control markers.
    pub control: u64,
    pub claimed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn pending_total(&self) -> u64 {
        self.pending + self.control
    }
}

/// How a `dequeue_batch` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    /// At least one job was claimed.
    Claimed,
    /// Nothing was pending.
    Drained,
    /// A stop request is holding back pending work.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub jobs: Vec<Job>,
    pub outcome: BatchOutcome,
}

impl Batch {
    pub fn is_halted(&self) -> bool {
        self.outcome == BatchOutcome::Halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_columns_round_trip() {
        for target in [
            JobTarget::Blog,
            JobTarget::Item(42),
            JobTarget::Key("all".to_string()),
            JobTarget::ItemKey(3, r#"{"year":2021}"#.to_string()),
        ] {
            let rebuilt = JobTarget::from_columns(
                target.data_integer(),
                target.data_string().map(str::to_string),
            );
            assert_eq!(rebuilt, target);
        }
    }

    #[test]
    fn test_job_type_names() {
        assert_eq!("control_stop".parse::<JobType>().unwrap(), JobType::ControlStop);
        assert!(JobType::ControlStart.is_control());
        assert!(!JobType::Include.is_control());
        assert!("publish".parse::<JobType>().is_err());
    }
}
