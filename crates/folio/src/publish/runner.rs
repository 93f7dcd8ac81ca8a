use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info_span, warn};

use crate::content::{Blog, BlogRef, ContentStore, Page, PublishingMode, Template, TemplateType};
use crate::db::fileinfo_repo::{self, FileInfo};
use crate::db::Database;
use crate::path::{ArchiveContext, ArchiveKey, PathResolver, ResolutionContext, ResolvedPath};
use crate::queue::{BatchOutcome, Job, JobTarget, JobType, Queue, QueueError};
use crate::storage::FileStorage;

use super::error::JobError;
use super::progress::{NoopProgress, ProgressReporter, PublishEvent};
use super::render::{RenderContext, Renderer};

/// Claimed jobs older than this are reported as stuck.
pub const DEFAULT_STUCK_AFTER: Duration = Duration::from_secs(15 * 60);

/// Outcome of one `process_batch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub done: usize,
    pub failed: usize,
    /// Pending jobs (markers included) left after the batch.
    pub remaining: u64,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    fn idle(outcome: BatchOutcome, remaining: u64) -> Self {
        Self {
            claimed: 0,
            done: 0,
            failed: 0,
            remaining,
            outcome,
        }
    }
}

/// Drains the queue one bounded batch at a time: resolves output paths,
/// renders, writes files and keeps the FileInfo store in step.
#[derive(Clone)]
pub struct Publisher {
    queue: Queue,
    storage: FileStorage,
    renderer: Arc<dyn Renderer>,
    progress: Arc<dyn ProgressReporter>,
    stuck_after: Duration,
}

/// What a page-less output renders.
struct Listing<'a> {
    template: &'a Template,
    context: ResolutionContext,
    pages: &'a [Page],
    archive: Option<&'a ArchiveContext>,
}

impl Publisher {
    pub fn new(queue: Queue, storage: FileStorage, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            queue,
            storage,
            renderer,
            progress: Arc::new(NoopProgress),
            stuck_after: DEFAULT_STUCK_AFTER,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_stuck_after(mut self, stuck_after: Duration) -> Self {
        self.stuck_after = stuck_after;
        self
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    fn db(&self) -> &Database {
        self.queue.database()
    }

    /// Claims and runs up to `batch_size` jobs for one blog.
    ///
    /// Per-job failures are recorded on the job and counted in the report;
    /// only queue errors (the claim itself, completing or failing a row)
    /// abort the call.
    pub fn process_batch(&self, blog: BlogRef, batch_size: usize) -> Result<BatchReport, QueueError> {
        let _span = info_span!("process_batch", blog_id = blog.blog_id, batch_size).entered();

        let stuck = self.queue.stuck_jobs(blog, self.stuck_after)?;
        for job in &stuck {
            warn!(
                "{} has been claimed since {:?}; run reset-stuck to retry it",
                job, job.claimed_at
            );
        }

        let counts = self.queue.job_counts(blog)?;
        if counts.pending_total() == 0 {
            debug!("Nothing pending for {}", blog);
            return Ok(BatchReport::idle(BatchOutcome::Drained, 0));
        }

        let batch = self.queue.dequeue_batch_opening_run(blog, batch_size)?;
        if batch.is_halted() {
            self.progress.report(PublishEvent::Halted { blog });
        }

        let mut report = BatchReport::idle(batch.outcome, 0);
        report.claimed = batch.jobs.len();
        for job in &batch.jobs {
            let _job_span = info_span!("job", job_id = job.id, job_type = %job.job_type).entered();
            self.progress.report(PublishEvent::JobStarted {
                job_id: job.id,
                job_type: job.job_type,
                target: job.target.to_string(),
            });

            match self.run_job(job) {
                Ok(()) => {
                    self.queue.complete(job)?;
                    report.done += 1;
                    self.progress.report(PublishEvent::JobCompleted { job_id: job.id });
                }
                Err(e) => {
                    let error = e.to_string();
                    self.queue.fail(job, &error)?;
                    report.failed += 1;
                    self.progress.report(PublishEvent::JobFailed {
                        job_id: job.id,
                        error,
                    });
                }
            }
        }

        report.remaining = self.queue.job_counts(blog)?.pending_total();
        self.progress
            .report(PublishEvent::BatchFinished { blog, report });
        Ok(report)
    }

    fn run_job(&self, job: &Job) -> Result<(), JobError> {
        let blog = self
            .db()
            .blog(job.owner.blog_id)?
            .ok_or(JobError::missing("blog", job.owner.blog_id))?;

        match (job.job_type, &job.target) {
            (JobType::ControlStart, target) => {
                let pending = target.data_integer().unwrap_or_default();
                self.progress.report(PublishEvent::RunStarted {
                    blog: job.owner,
                    pending,
                });
                Ok(())
            }
            (JobType::ControlStop, _) => {
                if job.is_closing_stop() {
                    self.progress
                        .report(PublishEvent::RunFinished { blog: job.owner });
                } else {
                    debug!("Stop request {} consumed with no work left", job.id);
                }
                Ok(())
            }
            (JobType::Page, JobTarget::Item(page_id)) => self.publish_page(job, &blog, *page_id),
            (JobType::Index, target) | (JobType::Include, target) => {
                let template_type = if job.job_type == JobType::Index {
                    TemplateType::Index
                } else {
                    TemplateType::Include
                };
                self.publish_blog_templates(job, &blog, template_type, target)
            }
            (JobType::Archive, JobTarget::ItemKey(mapping_id, descriptor)) => {
                self.publish_archive(job, &blog, *mapping_id, descriptor)
            }
            (job_type, target) => Err(JobError::InvalidTarget {
                job_type,
                reason: format!("unexpected target {}", target),
            }),
        }
    }

    fn publish_page(&self, job: &Job, blog: &Blog, page_id: i64) -> Result<(), JobError> {
        let db = self.db();
        let page = db.page(page_id)?.ok_or(JobError::missing("page", page_id))?;

        if !page.is_published() {
            for fileinfo in fileinfo_repo::for_page(db, page.id)? {
                self.retire_output(job, &fileinfo)?;
            }
            debug!("Page #{} is not published; outputs removed", page.id);
            return Ok(());
        }

        let category = match page.primary_category_id {
            Some(id) => db.category(id)?,
            None => None,
        };
        let author = match page.author_id {
            Some(id) => db.author(id)?,
            None => None,
        };
        let context = ResolutionContext::for_page(&page, category.as_ref(), author.as_ref());
        let (previous, next) = db.adjacent_pages(&page)?;
        let resolver = PathResolver::new(db);

        let mut live = HashSet::new();
        for template in db.templates(blog.id, TemplateType::Page)? {
            if !template.publishes() {
                continue;
            }
            for mapping in db.mappings(template.id)? {
                let resolved = resolver.resolve(blog, &mapping, &context)?;
                let render_context = RenderContext {
                    blog,
                    template: &template,
                    page: Some(&page),
                    pages: std::slice::from_ref(&page),
                    previous: previous.as_ref(),
                    next: next.as_ref(),
                    archive: None,
                    file_path: &resolved.file_path,
                    url: &resolved.url,
                };
                let fileinfo = self.write_output(job, blog, &template, &resolved, &render_context)?;
                live.insert(fileinfo);
            }
        }

        // Outputs of mappings that no longer apply to this page.
        for stale in fileinfo_repo::for_page(db, page.id)? {
            if !live.contains(&stale.id) {
                self.retire_output(job, &stale)?;
            }
        }
        Ok(())
    }

    /// Index and include jobs. A blog-wide target covers every Immediate
    /// template of the type; an item target names one template.
    fn publish_blog_templates(
        &self,
        job: &Job,
        blog: &Blog,
        template_type: TemplateType,
        target: &JobTarget,
    ) -> Result<(), JobError> {
        let db = self.db();
        let templates = match target {
            JobTarget::Blog => db
                .templates(blog.id, template_type)?
                .into_iter()
                .filter(|t| t.publishing_mode == PublishingMode::Immediate)
                .collect(),
            JobTarget::Item(template_id) => {
                let template = db
                    .template(*template_id)?
                    .ok_or(JobError::missing("template", *template_id))?;
                if template.template_type != template_type || template.blog_id != blog.id {
                    return Err(JobError::InvalidTarget {
                        job_type: job.job_type,
                        reason: format!(
                            "template #{} is a {} template of blog {}",
                            template.id, template.template_type, template.blog_id
                        ),
                    });
                }
                vec![template]
            }
            other => {
                return Err(JobError::InvalidTarget {
                    job_type: job.job_type,
                    reason: format!("unexpected target {}", other),
                })
            }
        };

        let pages = if template_type == TemplateType::Index {
            db.published_pages(blog.id)?
        } else {
            Vec::new()
        };

        for template in templates.iter().filter(|t| t.publishes()) {
            self.publish_listing(
                job,
                blog,
                Listing {
                    template,
                    context: ResolutionContext::Index,
                    pages: &pages,
                    archive: None,
                },
            )?;
        }
        Ok(())
    }

    fn publish_archive(
        &self,
        job: &Job,
        blog: &Blog,
        mapping_id: i64,
        descriptor: &str,
    ) -> Result<(), JobError> {
        let db = self.db();
        let key = ArchiveKey::from_descriptor(descriptor).map_err(|e| JobError::InvalidTarget {
            job_type: job.job_type,
            reason: format!("bad archive descriptor '{}': {}", descriptor, e),
        })?;
        let mapping = db
            .mapping(mapping_id)?
            .ok_or(JobError::missing("template mapping", mapping_id))?;
        let template = db
            .template(mapping.template_id)?
            .ok_or(JobError::missing("template", mapping.template_id))?;
        if !template.publishes() {
            debug!("Archive template #{} does not publish", template.id);
            return Ok(());
        }

        let category = match key.category_id {
            Some(id) => Some(db.category(id)?.ok_or(JobError::missing("category", id))?),
            None => None,
        };
        let author = match key.author_id {
            Some(id) => Some(db.author(id)?.ok_or(JobError::missing("author", id))?),
            None => None,
        };
        let archive = ArchiveContext::from_key(&key, category.as_ref(), author.as_ref());
        let context = ResolutionContext::Archive(archive.clone());
        let pages = db.archive_pages(blog.id, &key)?;

        let resolved = PathResolver::new(db).resolve(blog, &mapping, &context)?;
        if pages.is_empty() {
            // Nothing left to list; drop the existing output.
            if let Some(existing) = fileinfo_repo::find_by_sitewide_path(db, &resolved.sitewide_file_path)? {
                self.retire_output(job, &existing)?;
            }
            fileinfo_repo::record_archive_listing(db, mapping.id, descriptor, &[])?;
            return Ok(());
        }

        let render_context = RenderContext {
            blog,
            template: &template,
            page: None,
            pages: &pages,
            previous: None,
            next: None,
            archive: Some(&archive),
            file_path: &resolved.file_path,
            url: &resolved.url,
        };
        self.write_output(job, blog, &template, &resolved, &render_context)?;

        let listed: Vec<i64> = pages.iter().map(|p| p.id).collect();
        fileinfo_repo::record_archive_listing(db, mapping.id, descriptor, &listed)?;
        Ok(())
    }

    /// Resolves every mapping of a page-less template and writes the output.
    fn publish_listing(&self, job: &Job, blog: &Blog, listing: Listing<'_>) -> Result<(), JobError> {
        let db = self.db();
        let resolver = PathResolver::new(db);
        for mapping in db.mappings(listing.template.id)? {
            let resolved = resolver.resolve(blog, &mapping, &listing.context)?;
            let render_context = RenderContext {
                blog,
                template: listing.template,
                page: None,
                pages: listing.pages,
                previous: None,
                next: None,
                archive: listing.archive,
                file_path: &resolved.file_path,
                url: &resolved.url,
            };
            self.write_output(job, blog, listing.template, &resolved, &render_context)?;
        }
        Ok(())
    }

    /// Renders, writes and records one output. Returns the FileInfo id.
    fn write_output(
        &self,
        job: &Job,
        blog: &Blog,
        template: &Template,
        resolved: &ResolvedPath,
        render_context: &RenderContext<'_>,
    ) -> Result<i64, JobError> {
        let bytes = self.renderer.render(&template.body, render_context)?;
        self.storage.write(&resolved.sitewide_file_path, &bytes)?;
        self.progress.report(PublishEvent::FileWritten {
            job_id: job.id,
            path: resolved.sitewide_file_path.clone(),
            url: resolved.url.clone(),
        });

        let saved = fileinfo_repo::save(self.db(), blog.id, resolved)?;
        for orphan in &saved.orphaned {
            self.retire_output(job, orphan)?;
        }
        Ok(saved.fileinfo.id)
    }

    /// Removes an output file, then forgets its FileInfo. A failed removal
    /// keeps the row so a retry can find the file again.
    fn retire_output(&self, job: &Job, fileinfo: &FileInfo) -> Result<(), JobError> {
        if self.storage.remove(&fileinfo.sitewide_file_path)? {
            self.progress.report(PublishEvent::FileRemoved {
                job_id: job.id,
                path: fileinfo.sitewide_file_path.clone(),
            });
        }
        fileinfo_repo::delete(self.db(), fileinfo.id)?;
        Ok(())
    }
}
