//! Enqueue policies: which jobs a content change produces.
//!
//! These functions only decide what to enqueue; the runner does the work.
//! Coalescing in [`Queue::enqueue`] makes repeated calls cheap, so callers can
//! queue generously. Each function returns the number of enqueue calls made.

use std::collections::BTreeSet;

use super::job::{JobTarget, JobType};
use super::store::Queue;
use crate::content::{Blog, ContentStore, Page, PublishingMode, Template, TemplateType};
use crate::db::fileinfo_repo::{self, FileInfo};
use crate::error::{FolioError, Result};
use crate::path::{ArchiveKey, PathPattern};
use crate::storage::FileStorage;

fn publishing_templates(
    queue: &Queue,
    blog: &Blog,
    template_type: TemplateType,
    include_manual: bool,
) -> Result<Vec<Template>> {
    let templates = queue.database().templates(blog.id, template_type)?;
    Ok(templates
        .into_iter()
        .filter(|t| match t.publishing_mode {
            PublishingMode::Immediate => true,
            PublishingMode::Manual => include_manual,
            PublishingMode::DoNotPublish => false,
        })
        .collect())
}

/// Enqueues the archive outputs that should list `page` now, one per archive
/// mapping, plus every archive output that listed it when last published.
/// A page that moved (new date, category or author) thus also refreshes the
/// archives it left.
fn queue_page_archives(queue: &Queue, blog: &Blog, page: &Page) -> Result<usize> {
    let db = queue.database();
    let mut archives = BTreeSet::new();
    for template in publishing_templates(queue, blog, TemplateType::Archive, false)? {
        for mapping in db.mappings(template.id)? {
            let pattern = PathPattern::parse(&mapping.path_string)?;
            let Some(key) = ArchiveKey::for_page(page, &pattern) else {
                log::debug!(
                    "Page #{} has no value for archive mapping #{} ('{}')",
                    page.id,
                    mapping.id,
                    mapping.path_string
                );
                continue;
            };
            archives.insert((mapping.id, key.to_descriptor()?));
        }
    }
    archives.extend(fileinfo_repo::listed_archives(db, page.id)?);

    for (mapping_id, descriptor) in &archives {
        queue.enqueue(
            JobType::Archive,
            JobTarget::ItemKey(*mapping_id, descriptor.clone()),
            blog.owner(),
        )?;
    }
    Ok(archives.len())
}

/// Page job per page, plus the archives listing it. With `with_neighbours`
/// the previous and next published pages are republished too, so their
/// navigation links follow.
pub fn queue_page_actions(
    queue: &Queue,
    blog: &Blog,
    pages: &[Page],
    with_neighbours: bool,
) -> Result<usize> {
    let mut queued = 0;
    for page in pages {
        queue.enqueue(JobType::Page, JobTarget::Item(page.id), blog.owner())?;
        queued += 1;

        if with_neighbours {
            let (previous, next) = queue.database().adjacent_pages(page)?;
            for neighbour in previous.into_iter().chain(next) {
                queue.enqueue(JobType::Page, JobTarget::Item(neighbour.id), blog.owner())?;
                queued += 1;
            }
        }

        queued += queue_page_archives(queue, blog, page)?;
    }
    Ok(queued)
}

/// Index job per index template. Manual templates only when asked.
pub fn queue_index_actions(queue: &Queue, blog: &Blog, include_manual: bool) -> Result<usize> {
    let templates = publishing_templates(queue, blog, TemplateType::Index, include_manual)?;
    for template in &templates {
        queue.enqueue(JobType::Index, JobTarget::Item(template.id), blog.owner())?;
    }
    Ok(templates.len())
}

/// Include job per publishing include template.
pub fn queue_include_actions(queue: &Queue, blog: &Blog) -> Result<usize> {
    let templates = publishing_templates(queue, blog, TemplateType::Include, true)?;
    for template in &templates {
        queue.enqueue(JobType::Include, JobTarget::Item(template.id), blog.owner())?;
    }
    Ok(templates.len())
}

/// Queues every output of a blog and opens a run over it.
pub fn republish_blog(queue: &Queue, blog: &Blog) -> Result<usize> {
    let mut queued = queue_include_actions(queue, blog)?;
    queued += queue_index_actions(queue, blog, true)?;

    let pages = queue.database().published_pages(blog.id)?;
    queued += queue_page_actions(queue, blog, &pages, false)?;

    queue.start_run(blog.owner())?;
    log::info!("Queued {} jobs to republish {}", queued, blog.owner());
    Ok(queued)
}

/// Removes each output file, then its FileInfo. Stops at the first failed
/// removal, leaving that row and the rest for a later attempt.
fn retire_outputs(queue: &Queue, storage: &FileStorage, fileinfos: &[FileInfo]) -> Result<usize> {
    let mut removed = 0;
    for fileinfo in fileinfos {
        if storage.remove(&fileinfo.sitewide_file_path)? {
            removed += 1;
        }
        fileinfo_repo::delete(queue.database(), fileinfo.id)?;
    }
    Ok(removed)
}

/// Reacts to an edited template mapping: forgets every output it produced,
/// deletes those files and queues regeneration of everything it covers.
pub fn mapping_changed(queue: &Queue, storage: &FileStorage, mapping_id: i64) -> Result<usize> {
    let db = queue.database();
    let mapping = db.mapping(mapping_id)?.ok_or(FolioError::NotFound {
        kind: "template mapping",
        id: mapping_id,
    })?;
    let template = db.template(mapping.template_id)?.ok_or(FolioError::NotFound {
        kind: "template",
        id: mapping.template_id,
    })?;
    let blog = db.blog(template.blog_id)?.ok_or(FolioError::NotFound {
        kind: "blog",
        id: template.blog_id,
    })?;

    let purged = fileinfo_repo::for_mapping(db, mapping_id)?;
    let removed = retire_outputs(queue, storage, &purged)?;
    fileinfo_repo::clear_archive_listings(db, mapping_id)?;
    log::info!(
        "Mapping #{} changed: purged {} file records, removed {} files",
        mapping_id,
        purged.len(),
        removed
    );

    if !template.publishes() {
        return Ok(0);
    }

    let owner = blog.owner();
    let queued = match template.template_type {
        TemplateType::Page => {
            let pages = db.published_pages(blog.id)?;
            for page in &pages {
                queue.enqueue(JobType::Page, JobTarget::Item(page.id), owner)?;
            }
            pages.len()
        }
        TemplateType::Index => {
            queue.enqueue(JobType::Index, JobTarget::Item(template.id), owner)?;
            1
        }
        TemplateType::Include => {
            queue.enqueue(JobType::Include, JobTarget::Item(template.id), owner)?;
            1
        }
        TemplateType::Archive => {
            let pattern = PathPattern::parse(&mapping.path_string)?;
            let mut queued = 0;
            for page in db.published_pages(blog.id)? {
                if let Some(key) = ArchiveKey::for_page(&page, &pattern) {
                    queue.enqueue(
                        JobType::Archive,
                        JobTarget::ItemKey(mapping.id, key.to_descriptor()?),
                        owner,
                    )?;
                    queued += 1;
                }
            }
            queued
        }
    };
    Ok(queued)
}

/// Takes a page offline: deletes its outputs and queues the neighbours,
/// indexes and archives that listed it.
pub fn unpublish_page(queue: &Queue, storage: &FileStorage, page_id: i64) -> Result<usize> {
    let db = queue.database();
    let page = db.page(page_id)?.ok_or(FolioError::NotFound {
        kind: "page",
        id: page_id,
    })?;
    let blog = db.blog(page.blog_id)?.ok_or(FolioError::NotFound {
        kind: "blog",
        id: page.blog_id,
    })?;

    let purged = fileinfo_repo::for_page(db, page.id)?;
    let removed = retire_outputs(queue, storage, &purged)?;
    log::info!("Unpublished page #{}: removed {} files", page.id, removed);

    let mut queued = 0;
    let (previous, next) = db.adjacent_pages(&page)?;
    for neighbour in previous.into_iter().chain(next) {
        queue.enqueue(JobType::Page, JobTarget::Item(neighbour.id), blog.owner())?;
        queued += 1;
    }
    queued += queue_index_actions(queue, &blog, false)?;
    queued += queue_page_archives(queue, &blog, &page)?;
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::db::content_repo::{self, NewBlog, NewMapping, NewPage, NewTemplate};
    use crate::db::Database;
    use crate::content::ArchiveType;
    use crate::queue::{Job, PriorityPolicy};

    struct Fixture {
        queue: Queue,
        blog: Blog,
        pages: Vec<i64>,
        archive_mapping: i64,
        index_template: i64,
    }

    fn template(db: &Database, blog_id: i64, kind: TemplateType, mode: PublishingMode) -> i64 {
        content_repo::insert_template(
            db,
            &NewTemplate {
                blog_id,
                title: format!("{} template", kind),
                template_type: kind,
                body: String::new(),
                publishing_mode: mode,
            },
        )
        .unwrap()
    }

    fn mapping(db: &Database, template_id: i64, pattern: &str, archive_type: ArchiveType) -> i64 {
        content_repo::insert_mapping(
            db,
            &NewMapping {
                template_id,
                path_string: pattern.to_string(),
                is_default: true,
                archive_type,
            },
        )
        .unwrap()
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let site_id = content_repo::insert_site(&db, "Site", "http://example.com").unwrap();
        let blog_id = content_repo::insert_blog(
            &db,
            &NewBlog {
                site_id,
                name: "Blog".to_string(),
                url: "http://example.com/blog".to_string(),
                path: "/var/www/blog".to_string(),
                index_file: "index.html".to_string(),
            },
        )
        .unwrap();

        let page_template = template(&db, blog_id, TemplateType::Page, PublishingMode::Immediate);
        mapping(&db, page_template, "{basename}/", ArchiveType::Page);
        let index_template = template(&db, blog_id, TemplateType::Index, PublishingMode::Immediate);
        mapping(&db, index_template, "", ArchiveType::Index);
        let manual = template(&db, blog_id, TemplateType::Index, PublishingMode::Manual);
        mapping(&db, manual, "sitemap.xml", ArchiveType::Index);
        let archive_template =
            template(&db, blog_id, TemplateType::Archive, PublishingMode::Immediate);
        let archive_mapping = mapping(&db, archive_template, "archive/%Y/%m/", ArchiveType::Date);

        let pages = [(2021, 5, "may"), (2021, 6, "june"), (2021, 7, "july")]
            .into_iter()
            .map(|(year, month, basename)| {
                let date = Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0).unwrap();
                content_repo::insert_page(&db, &NewPage::published(blog_id, basename, date))
                    .unwrap()
            })
            .collect();

        let blog = db.blog(blog_id).unwrap().unwrap();
        Fixture {
            queue: Queue::new(db, PriorityPolicy::default()),
            blog,
            pages,
            archive_mapping,
            index_template,
        }
    }

    fn pending(queue: &Queue, blog: &Blog) -> Vec<Job> {
        queue
            .jobs(blog.owner())
            .unwrap()
            .into_iter()
            .filter(|j| !j.is_control())
            .collect()
    }

    #[test]
    fn test_page_actions_queue_neighbours_and_archive() {
        let f = fixture();
        let page = f.queue.database().page(f.pages[1]).unwrap().unwrap();

        queue_page_actions(&f.queue, &f.blog, &[page], true).unwrap();

        let jobs = pending(&f.queue, &f.blog);
        let page_targets: Vec<_> = jobs
            .iter()
            .filter(|j| j.job_type == JobType::Page)
            .map(|j| j.target.clone())
            .collect();
        assert_eq!(page_targets.len(), 3);
        for id in &f.pages {
            assert!(page_targets.contains(&JobTarget::Item(*id)));
        }

        let archives: Vec<_> = jobs
            .iter()
            .filter(|j| j.job_type == JobType::Archive)
            .collect();
        assert_eq!(archives.len(), 1);
        assert_eq!(
            archives[0].target,
            JobTarget::ItemKey(f.archive_mapping, r#"{"year":2021,"month":6}"#.to_string())
        );
    }

    #[test]
    fn test_index_actions_respect_publishing_mode() {
        let f = fixture();
        assert_eq!(queue_index_actions(&f.queue, &f.blog, false).unwrap(), 1);
        let jobs = pending(&f.queue, &f.blog);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].target, JobTarget::Item(f.index_template));

        assert_eq!(queue_index_actions(&f.queue, &f.blog, true).unwrap(), 2);
        assert_eq!(pending(&f.queue, &f.blog).len(), 2);
    }

    #[test]
    fn test_republish_opens_a_run() {
        let f = fixture();
        republish_blog(&f.queue, &f.blog).unwrap();

        let counts = f.queue.job_counts(f.blog.owner()).unwrap();
        // 2 indexes + 3 pages + 3 monthly archives.
        assert_eq!(counts.pending, 8);
        assert_eq!(counts.control, 2);
        assert!(f.queue.has_open_run(f.blog.owner()).unwrap());
    }

    #[test]
    fn test_mapping_changed_purges_and_requeues() {
        let f = fixture();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        let db = f.queue.database();

        let resolved = crate::path::ResolvedPath {
            file_path: "archive/2021/06/index.html".to_string(),
            sitewide_file_path: "/var/www/blog/archive/2021/06/index.html".to_string(),
            url: "http://example.com/blog/archive/2021/06/index.html".to_string(),
            context_tags: Vec::new(),
            owner: crate::path::ContentRef {
                page_id: None,
                mapping_id: f.archive_mapping,
            },
        };
        fileinfo_repo::save(db, f.blog.id, &resolved).unwrap();
        storage.write(&resolved.sitewide_file_path, b"old").unwrap();

        let queued = mapping_changed(&f.queue, &storage, f.archive_mapping).unwrap();

        assert_eq!(queued, 3);
        assert!(!storage.exists(&resolved.sitewide_file_path));
        assert!(fileinfo_repo::for_mapping(db, f.archive_mapping).unwrap().is_empty());
        assert_eq!(f.queue.job_counts(f.blog.owner()).unwrap().pending, 3);
    }

    #[test]
    fn test_unpublish_queues_dependents() {
        let f = fixture();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        unpublish_page(&f.queue, &storage, f.pages[0]).unwrap();

        let jobs = pending(&f.queue, &f.blog);
        assert!(jobs
            .iter()
            .any(|j| j.job_type == JobType::Page && j.target == JobTarget::Item(f.pages[1])));
        assert!(jobs.iter().any(|j| j.job_type == JobType::Index));
        assert!(jobs.iter().any(|j| j.job_type == JobType::Archive));

        let err = unpublish_page(&f.queue, &storage, 999).unwrap_err();
        assert!(matches!(err, FolioError::NotFound { kind: "page", id: 999 }));
    }

    #[test]
    fn test_page_actions_requeue_archives_the_page_left() {
        let f = fixture();
        let db = f.queue.database();
        let june = r#"{"year":2021,"month":6}"#;
        fileinfo_repo::record_archive_listing(db, f.archive_mapping, june, &[f.pages[1]]).unwrap();

        let mut page = db.page(f.pages[1]).unwrap().unwrap();
        page.publication_date = Some(Utc.with_ymd_and_hms(2021, 8, 1, 12, 0, 0).unwrap());
        content_repo::update_page(db, &page).unwrap();
        queue_page_actions(&f.queue, &f.blog, &[page], false).unwrap();

        let archives: Vec<_> = pending(&f.queue, &f.blog)
            .into_iter()
            .filter(|j| j.job_type == JobType::Archive)
            .map(|j| j.target)
            .collect();
        assert_eq!(archives.len(), 2);
        assert!(archives.contains(&JobTarget::ItemKey(f.archive_mapping, june.to_string())));
        assert!(archives.contains(&JobTarget::ItemKey(
            f.archive_mapping,
            r#"{"year":2021,"month":8}"#.to_string()
        )));
    }

    #[test]
    fn test_mapping_changed_keeps_records_when_removal_fails() {
        let f = fixture();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        let db = f.queue.database();

        let resolved = crate::path::ResolvedPath {
            file_path: "archive/2021/06/index.html".to_string(),
            sitewide_file_path: "/var/www/blog/archive/2021/06/index.html".to_string(),
            url: "http://example.com/blog/archive/2021/06/index.html".to_string(),
            context_tags: Vec::new(),
            owner: crate::path::ContentRef {
                page_id: None,
                mapping_id: f.archive_mapping,
            },
        };
        fileinfo_repo::save(db, f.blog.id, &resolved).unwrap();
        std::fs::create_dir_all(storage.path_for(&resolved.sitewide_file_path)).unwrap();

        let err = mapping_changed(&f.queue, &storage, f.archive_mapping).unwrap_err();
        assert!(matches!(err, FolioError::Storage(_)));
        assert_eq!(fileinfo_repo::for_mapping(db, f.archive_mapping).unwrap().len(), 1);

        std::fs::remove_dir(storage.path_for(&resolved.sitewide_file_path)).unwrap();
        mapping_changed(&f.queue, &storage, f.archive_mapping).unwrap();
        assert!(fileinfo_repo::for_mapping(db, f.archive_mapping).unwrap().is_empty());
    }
}
