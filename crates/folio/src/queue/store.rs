use std::time::Duration;

use chrono::{TimeDelta, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::error::QueueError;
use super::job::{
    Batch, BatchOutcome, ControlKind, Job, JobCounts, JobStatus, JobTarget, JobType, CLOSING_STOP,
};
use super::policy::{PriorityPolicy, CLOSING_STOP_PRIORITY};
use crate::content::BlogRef;
use crate::db::queue_repo::{self, QueueRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// Durable per-blog publish queue.
///
/// Every mutation runs in an IMMEDIATE transaction, so concurrent processes
/// sharing the database never claim the same job twice.
#[derive(Debug, Clone)]
pub struct Queue {
    db: Database,
    priorities: PriorityPolicy,
}

/// Next `touched_at`: now, or one microsecond past the latest touch when the
/// clock has not moved on. Keeps (priority, touched_at) a total order.
fn next_touch(conn: &Connection) -> Result<String, DatabaseError> {
    let now = Utc::now();
    let next = match queue_repo::latest_touch(conn)? {
        Some(latest) => {
            let bumped = parse_timestamp(&latest)? + TimeDelta::microseconds(1);
            bumped.max(now)
        }
        None => now,
    };
    Ok(format_timestamp(&next))
}

fn new_row(
    job_type: JobType,
    target: &JobTarget,
    blog: BlogRef,
    priority: i32,
    touched_at: String,
) -> QueueRow {
    QueueRow {
        id: 0,
        job_type: job_type.as_str().to_string(),
        is_control: job_type.is_control(),
        priority,
        data_integer: target.data_integer(),
        data_string: target.data_string().map(str::to_string),
        touched_at,
        blog_id: blog.blog_id,
        site_id: blog.site_id,
        status: JobStatus::Pending.as_str().to_string(),
        claim_id: None,
        claimed_at: None,
        error: None,
    }
}

fn load(conn: &Connection, id: i64) -> Result<Job, QueueError> {
    let row = queue_repo::find_by_id(conn, id)?.ok_or(QueueError::UnknownJob(id))?;
    Ok(Job::try_from(row)?)
}

fn into_jobs(rows: Vec<QueueRow>) -> Result<Vec<Job>, QueueError> {
    rows.into_iter()
        .map(|row| Job::try_from(row).map_err(QueueError::from))
        .collect()
}

fn insert_marker(
    conn: &Connection,
    job_type: JobType,
    target: &JobTarget,
    blog: BlogRef,
    priority: i32,
) -> Result<Job, QueueError> {
    let touched_at = next_touch(conn)?;
    let id = queue_repo::insert(conn, &new_row(job_type, target, blog, priority, touched_at))?;
    load(conn, id)
}

/// Returns a non-pending row to pending, merging it into a pending duplicate
/// when one exists.
fn return_to_pending(conn: &Connection, row: QueueRow) -> Result<Job, QueueError> {
    if row.status == JobStatus::Pending.as_str() {
        return Ok(Job::try_from(row)?);
    }

    let touched_at = next_touch(conn)?;
    if !row.is_control {
        let duplicate = queue_repo::find_pending_key(
            conn,
            row.blog_id,
            &row.job_type,
            row.data_integer,
            row.data_string.as_deref(),
        )?;
        if let Some(duplicate) = duplicate {
            queue_repo::delete(conn, row.id)?;
            queue_repo::touch(conn, duplicate.id, duplicate.priority, &touched_at)?;
            log::debug!("Job {} merged into pending job {}", row.id, duplicate.id);
            return load(conn, duplicate.id);
        }
    }

    queue_repo::reset_to_pending(conn, row.id, &touched_at)?;
    load(conn, row.id)
}

fn open_run(conn: &Connection, blog: BlogRef, control: i32) -> Result<Job, QueueError> {
    let start = JobType::ControlStart.as_str();
    let stop = JobType::ControlStop.as_str();
    queue_repo::delete_pending_markers(conn, blog.blog_id, stop, None)?;
    queue_repo::delete_pending_markers(conn, blog.blog_id, stop, Some(CLOSING_STOP))?;
    queue_repo::delete_pending_markers(conn, blog.blog_id, start, None)?;

    let pending = queue_repo::count_pending_ordinary(conn, blog.blog_id)?;
    let start_job = insert_marker(
        conn,
        JobType::ControlStart,
        &JobTarget::Item(pending as i64),
        blog,
        control,
    )?;
    insert_marker(
        conn,
        JobType::ControlStop,
        &JobTarget::Key(CLOSING_STOP.to_string()),
        blog,
        CLOSING_STOP_PRIORITY,
    )?;

    log::info!("Started publish run for {} with {} pending jobs", blog, pending);
    Ok(start_job)
}

fn claim_batch(conn: &Connection, blog: BlogRef, limit: usize) -> Result<Batch, QueueError> {
    let ordinary = queue_repo::count_pending_ordinary(conn, blog.blog_id)?;
    let halts =
        queue_repo::count_pending_markers(conn, blog.blog_id, JobType::ControlStop.as_str(), None)?;
    if halts > 0 && ordinary > 0 {
        log::info!("Queue for {} is halted with {} pending jobs", blog, ordinary);
        return Ok(Batch {
            jobs: Vec::new(),
            outcome: BatchOutcome::Halted,
        });
    }

    let claim_id = Uuid::new_v4().to_string();
    let claimed_at = format_timestamp(&Utc::now());

    let mut jobs = Vec::new();
    let mut held_back = false;
    for row in queue_repo::pending_ordered(conn, blog.blog_id, limit)? {
        if row.job_type == JobType::ControlStop.as_str()
            && queue_repo::count_pending_ordinary(conn, blog.blog_id)? > 0
        {
            held_back = true;
            break;
        }
        if !queue_repo::claim(conn, row.id, &claim_id, &claimed_at)? {
            continue;
        }
        let mut job = Job::try_from(row)?;
        job.status = JobStatus::Claimed;
        job.claim_id = Some(claim_id.clone());
        job.claimed_at = Some(parse_timestamp(&claimed_at)?);
        jobs.push(job);
    }

    let outcome = match (jobs.is_empty(), held_back) {
        (false, _) => BatchOutcome::Claimed,
        (true, true) => BatchOutcome::Halted,
        (true, false) => BatchOutcome::Drained,
    };
    log::debug!(
        "Claimed {} jobs for {} under claim {} ({:?})",
        jobs.len(),
        blog,
        claim_id,
        outcome
    );
    Ok(Batch { jobs, outcome })
}

impl Queue {
    pub fn new(db: Database, priorities: PriorityPolicy) -> Self {
        Self { db, priorities }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn priorities(&self) -> &PriorityPolicy {
        &self.priorities
    }

    /// Enqueues a job at its type's default priority, coalescing with an
    /// identical pending job.
    pub fn enqueue(
        &self,
        job_type: JobType,
        target: JobTarget,
        blog: BlogRef,
    ) -> Result<Job, QueueError> {
        self.enqueue_with_priority(job_type, target, blog, None)
    }

    /// Like [`Queue::enqueue`] with an explicit priority. The priority must
    /// sort after control markers.
    pub fn enqueue_with_priority(
        &self,
        job_type: JobType,
        target: JobTarget,
        blog: BlogRef,
        priority: Option<i32>,
    ) -> Result<Job, QueueError> {
        if let Some(priority) = priority {
            if priority <= self.priorities.control {
                return Err(QueueError::InvalidPriority {
                    priority,
                    control: self.priorities.control,
                });
            }
        }
        let priority = priority.unwrap_or_else(|| self.priorities.for_job(job_type));

        if job_type.is_control() {
            return self
                .db
                .with_tx(|tx| insert_marker(tx, job_type, &target, blog, priority));
        }

        self.db.with_tx(|tx| {
            let touched_at = next_touch(tx)?;
            let existing = queue_repo::find_pending_key(
                tx,
                blog.blog_id,
                job_type.as_str(),
                target.data_integer(),
                target.data_string(),
            )?;

            let id = match existing {
                Some(row) => {
                    queue_repo::touch(tx, row.id, priority, &touched_at)?;
                    log::debug!("Coalesced {} {} into job {}", job_type, target, row.id);
                    row.id
                }
                None => {
                    let row = new_row(job_type, &target, blog, priority, touched_at);
                    let id = queue_repo::insert(tx, &row)?;
                    log::debug!("Enqueued {} {} as job {} for {}", job_type, target, id, blog);
                    id
                }
            };
            load(tx, id)
        })
    }

    /// Inserts a bracket marker at control priority. Markers never coalesce.
    pub fn enqueue_control(&self, blog: BlogRef, kind: ControlKind) -> Result<Job, QueueError> {
        let priority = self.priorities.control;
        self.db
            .with_tx(|tx| insert_marker(tx, kind.job_type(), &JobTarget::Blog, blog, priority))
    }

    /// Requests a halt: no further batches are claimed while ordinary work
    /// remains, until the next [`Queue::start_run`] or [`Queue::clear`].
    pub fn stop(&self, blog: BlogRef) -> Result<Job, QueueError> {
        let job = self.enqueue_control(blog, ControlKind::Stop)?;
        log::info!("Stop requested for {}", blog);
        Ok(job)
    }

    /// Opens a publish run: drops pending halt requests and any earlier
    /// unclaimed bracket, then brackets the pending work with a ControlStart
    /// (carrying the pending count) and a closing ControlStop.
    pub fn start_run(&self, blog: BlogRef) -> Result<Job, QueueError> {
        let control = self.priorities.control;
        self.db.with_tx(|tx| open_run(tx, blog, control))
    }

    /// Atomically claims up to `max_items` pending jobs in processing order.
    ///
    /// Returns `Halted` with nothing claimed while a stop request holds back
    /// ordinary work. A ControlStop is only claimed once no ordinary work is
    /// left behind it.
    pub fn dequeue_batch(&self, blog: BlogRef, max_items: usize) -> Result<Batch, QueueError> {
        let limit = max_items.max(1);
        self.db.with_tx(|tx| claim_batch(tx, blog, limit))
    }

    /// [`Queue::dequeue_batch`], first opening a run when ordinary work is
    /// pending outside one and no stop request is held. The check, the
    /// bracket and the claim share one transaction, so overlapping runners
    /// never open a second run over the same work.
    pub fn dequeue_batch_opening_run(
        &self,
        blog: BlogRef,
        max_items: usize,
    ) -> Result<Batch, QueueError> {
        let limit = max_items.max(1);
        let control = self.priorities.control;
        self.db.with_tx(|tx| {
            let stop = JobType::ControlStop.as_str();
            let ordinary = queue_repo::count_pending_ordinary(tx, blog.blog_id)?;
            let open = queue_repo::count_pending_markers(tx, blog.blog_id, stop, Some(CLOSING_STOP))?;
            let halts = queue_repo::count_pending_markers(tx, blog.blog_id, stop, None)?;
            if ordinary > 0 && open == 0 && halts == 0 {
                open_run(tx, blog, control)?;
            }
            claim_batch(tx, blog, limit)
        })
    }

    /// Removes a finished job. Returns false when the claim was lost, e.g. to
    /// a stuck-job sweep.
    pub fn complete(&self, job: &Job) -> Result<bool, QueueError> {
        let claim_id = job.claim_id.as_deref().unwrap_or_default();
        let held = self
            .db
            .with_conn(|conn| queue_repo::delete_claimed(conn, job.id, claim_id))?;
        if !held {
            log::warn!("Completed {} no longer held by claim {}", job, claim_id);
        }
        Ok(held)
    }

    /// Marks a claimed job failed, keeping it for inspection.
    pub fn fail(&self, job: &Job, error: &str) -> Result<bool, QueueError> {
        let claim_id = job.claim_id.as_deref().unwrap_or_default();
        let held = self
            .db
            .with_conn(|conn| queue_repo::mark_failed(conn, job.id, claim_id, error))?;
        if held {
            log::warn!("{} failed: {}", job, error);
        } else {
            log::warn!("Failed {} no longer held by claim {}", job, claim_id);
        }
        Ok(held)
    }

    /// Explicit retry: returns a failed (or claimed) job to pending.
    pub fn requeue(&self, job_id: i64) -> Result<Job, QueueError> {
        self.db.with_tx(|tx| {
            let row = queue_repo::find_by_id(tx, job_id)?.ok_or(QueueError::UnknownJob(job_id))?;
            let job = return_to_pending(tx, row)?;
            log::info!("Requeued job {} as {}", job_id, job);
            Ok(job)
        })
    }

    /// Deletes every pending job of a blog, markers included. Claimed jobs
    /// are left to their batch.
    pub fn clear(&self, blog: BlogRef) -> Result<usize, QueueError> {
        let deleted = self
            .db
            .with_tx(|tx| queue_repo::delete_pending(tx, blog.blog_id))?;
        log::info!("Cleared {} pending jobs for {}", deleted, blog);
        Ok(deleted)
    }

    pub fn job_counts(&self, blog: BlogRef) -> Result<JobCounts, QueueError> {
        let rows = self
            .db
            .with_conn(|conn| queue_repo::counts(conn, blog.blog_id))?;
        let mut counts = JobCounts::default();
        for (status, is_control, count) in rows {
            match (status.parse::<JobStatus>()?, is_control) {
                (JobStatus::Pending, false) => counts.pending += count,
                (JobStatus::Pending, true) => counts.control += count,
                (JobStatus::Claimed, _) => counts.claimed += count,
                (JobStatus::Failed, _) => counts.failed += count,
            }
        }
        Ok(counts)
    }

    /// Pending control markers in processing order.
    pub fn control_jobs(&self, blog: BlogRef) -> Result<Vec<Job>, QueueError> {
        let rows = self.db.with_conn(|conn| {
            queue_repo::list(conn, blog.blog_id, Some(JobStatus::Pending.as_str()), true)
        })?;
        into_jobs(rows)
    }

    pub fn failed_jobs(&self, blog: BlogRef) -> Result<Vec<Job>, QueueError> {
        let rows = self.db.with_conn(|conn| {
            queue_repo::list(conn, blog.blog_id, Some(JobStatus::Failed.as_str()), false)
        })?;
        into_jobs(rows)
    }

    /// Every row of a blog in processing order.
    pub fn jobs(&self, blog: BlogRef) -> Result<Vec<Job>, QueueError> {
        let rows = self
            .db
            .with_conn(|conn| queue_repo::list(conn, blog.blog_id, None, false))?;
        into_jobs(rows)
    }

    pub fn find(&self, job_id: i64) -> Result<Option<Job>, QueueError> {
        let row = self
            .db
            .with_conn(|conn| queue_repo::find_by_id(conn, job_id))?;
        row.map(Job::try_from).transpose().map_err(QueueError::from)
    }

    /// Whether a pending closing stop marks a run in progress.
    pub fn has_open_run(&self, blog: BlogRef) -> Result<bool, QueueError> {
        let open = self.db.with_conn(|conn| {
            queue_repo::count_pending_markers(
                conn,
                blog.blog_id,
                JobType::ControlStop.as_str(),
                Some(CLOSING_STOP),
            )
        })?;
        Ok(open > 0)
    }

    /// Whether a stop request is holding back pending work.
    pub fn is_halted(&self, blog: BlogRef) -> Result<bool, QueueError> {
        let (halts, ordinary) = self.db.with_conn(|conn| {
            let halts = queue_repo::count_pending_markers(
                conn,
                blog.blog_id,
                JobType::ControlStop.as_str(),
                None,
            )?;
            Ok((halts, queue_repo::count_pending_ordinary(conn, blog.blog_id)?))
        })?;
        Ok(halts > 0 && ordinary > 0)
    }

    /// Jobs claimed longer ago than `older_than`.
    pub fn stuck_jobs(&self, blog: BlogRef, older_than: Duration) -> Result<Vec<Job>, QueueError> {
        let Some(cutoff) = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };
        let cutoff = format_timestamp(&cutoff);
        let rows = self
            .db
            .with_conn(|conn| queue_repo::claimed_before(conn, blog.blog_id, &cutoff))?;
        into_jobs(rows)
    }

    /// Operator sweep: returns stuck jobs to pending. Returns how many were
    /// reset.
    pub fn reset_stuck(&self, blog: BlogRef, older_than: Duration) -> Result<usize, QueueError> {
        let stuck = self.stuck_jobs(blog, older_than)?;
        let mut reset = 0;
        for job in stuck {
            match self.requeue(job.id) {
                Ok(_) => reset += 1,
                Err(QueueError::UnknownJob(id)) => {
                    log::debug!("Stuck job {} finished before it could be reset", id);
                }
                Err(e) => return Err(e),
            }
        }
        if reset > 0 {
            log::warn!("Reset {} stuck jobs for {}", reset, blog);
        }
        Ok(reset)
    }

    /// Fails with [`QueueError::StuckJob`] for the oldest stuck job, if any.
    pub fn ensure_not_stuck(&self, blog: BlogRef, older_than: Duration) -> Result<(), QueueError> {
        match self.stuck_jobs(blog, older_than)?.into_iter().next() {
            Some(job) => Err(QueueError::StuckJob {
                job_id: job.id,
                claimed_at: job
                    .claimed_at
                    .map(|at| format_timestamp(&at))
                    .unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }
}
