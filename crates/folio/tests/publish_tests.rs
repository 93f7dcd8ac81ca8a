//! End-to-end publishing runs against a file database and a temp output root.

mod common;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use folio::content::{PageStatus, PublishingMode, TemplateType};
use folio::db::{content_repo, fileinfo_repo};
use folio::publish::{BroadcastProgress, PublishEvent};
use folio::queue::{actions, JobType};
use folio::worker::StopReason;

use common::harness::BLOG_PATH;
use common::{date, PageBuilder, TestHarness};

/// Page, front index and monthly archive templates plus three pages across
/// May and June 2021.
fn seed(h: &TestHarness) {
    h.add_template(
        h.template(TemplateType::Page, "Entry")
            .mapping("%Y/%m/{basename}/"),
    );
    h.add_template(h.template(TemplateType::Index, "Front").mapping("index.html"));
    h.add_template(
        h.template(TemplateType::Archive, "Monthly")
            .mapping("archive/%Y/%m/"),
    );
    h.add_page(PageBuilder::new(h.blog.id, "alpha").published_on(2021, 5, 2).build());
    h.add_page(PageBuilder::new(h.blog.id, "beta").published_on(2021, 6, 10).build());
    h.add_page(PageBuilder::new(h.blog.id, "gamma").published_on(2021, 6, 20).build());
}

fn collect_files(dir: &Path, root: &Path, files: &mut BTreeMap<String, String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_files(&path, root, files);
        } else {
            let relative = path.strip_prefix(root).unwrap().display().to_string();
            files.insert(relative, std::fs::read_to_string(&path).unwrap());
        }
    }
}

fn output_tree(h: &TestHarness) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    collect_files(&h.output_dir, &h.output_dir, &mut files);
    files
}

#[test]
fn test_republish_writes_every_output() {
    let h = TestHarness::new();
    seed(&h);

    actions::republish_blog(h.queue(), &h.blog).unwrap();
    let summary = h.run(10);

    assert_eq!(summary.failed, 0);
    assert_eq!(summary.remaining, 0);
    assert_eq!(summary.stop_reason, StopReason::Drained);

    assert_eq!(
        h.read("2021/05/alpha/index.html").as_deref(),
        Some("Entry page=alpha pages=alpha")
    );
    assert_eq!(
        h.read("index.html").as_deref(),
        Some("Front pages=alpha,beta,gamma")
    );
    assert_eq!(
        h.read("archive/2021/05/index.html").as_deref(),
        Some("Monthly pages=alpha")
    );
    assert_eq!(
        h.read("archive/2021/06/index.html").as_deref(),
        Some("Monthly pages=beta,gamma")
    );
    assert!(h.read("archive/2021/07/index.html").is_none());
}

#[test]
fn test_batch_size_does_not_change_output() {
    let small = TestHarness::new();
    let large = TestHarness::new();
    for h in [&small, &large] {
        seed(h);
        actions::republish_blog(h.queue(), &h.blog).unwrap();
    }

    let small_summary = small.run(1);
    let large_summary = large.run(100);

    assert!(small_summary.batches > large_summary.batches);
    assert_eq!(small_summary.done, large_summary.done);
    assert_eq!(output_tree(&small), output_tree(&large));
    assert!(!output_tree(&small).is_empty());
}

#[test]
fn test_indexes_publish_before_pages() {
    let h = TestHarness::new();
    seed(&h);

    let progress = Arc::new(BroadcastProgress::new(256));
    let mut events = progress.subscribe();
    let publisher = h.publisher.clone().with_progress(progress);

    actions::republish_blog(publisher.queue(), &h.blog).unwrap();
    while publisher.process_batch(h.blog.owner(), 3).unwrap().remaining > 0 {}

    let mut started = Vec::new();
    let mut run_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            PublishEvent::JobStarted { job_type, .. } => started.push(job_type),
            PublishEvent::RunStarted { pending, .. } => run_events.push(format!("start {}", pending)),
            PublishEvent::RunFinished { .. } => run_events.push("finish".to_string()),
            _ => {}
        }
    }

    assert_eq!(started.first(), Some(&JobType::ControlStart));
    assert_eq!(started.last(), Some(&JobType::ControlStop));
    let last_index = started.iter().rposition(|t| *t == JobType::Index).unwrap();
    let first_page = started.iter().position(|t| *t == JobType::Page).unwrap();
    let first_archive = started.iter().position(|t| *t == JobType::Archive).unwrap();
    assert!(last_index < first_archive);
    assert!(first_archive < first_page);

    // One index, two archives, three pages.
    assert_eq!(run_events, vec!["start 6".to_string(), "finish".to_string()]);
}

#[test]
fn test_empty_queue_is_a_no_op() {
    let h = TestHarness::new();
    seed(&h);

    let summary = h.run(5);

    assert_eq!(summary.done, 0);
    assert_eq!(summary.remaining, 0);
    assert_eq!(summary.stop_reason, StopReason::Drained);
    assert!(output_tree(&h).is_empty());
}

#[test]
fn test_collision_fails_only_the_colliding_job() {
    let h = TestHarness::new();
    h.add_template(h.template(TemplateType::Page, "Entry").mapping("{basename}.html"));
    h.add_template(h.template(TemplateType::Page, "About").mapping("about.html"));
    let first = h.add_page(PageBuilder::new(h.blog.id, "first").published_on(2021, 1, 1).build());
    let second =
        h.add_page(PageBuilder::new(h.blog.id, "second").published_on(2021, 2, 1).build());

    actions::queue_page_actions(h.queue(), &h.blog, &[first, second.clone()], false).unwrap();
    let summary = h.run(10);

    assert_eq!(summary.failed, 1);
    assert_eq!(h.read("about.html").as_deref(), Some("About page=first pages=first"));
    assert!(h.read("first.html").is_some());

    let failed = h.queue().failed_jobs(h.blog.owner()).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target.data_integer(), Some(second.id));
    assert!(failed[0].error.as_deref().unwrap().contains("already published"));
}

#[test]
fn test_stop_halts_until_next_run() {
    let h = TestHarness::new();
    seed(&h);
    actions::republish_blog(h.queue(), &h.blog).unwrap();

    // The first batch claims the start marker and the index.
    let first = h.publisher.process_batch(h.blog.owner(), 2).unwrap();
    assert_eq!(first.done, 2);

    h.queue().stop(h.blog.owner()).unwrap();
    let halted = h.run(2);
    assert_eq!(halted.stop_reason, StopReason::Halted);
    assert_eq!(halted.done, 0);
    assert!(halted.remaining > 0);
    assert!(h.read("2021/05/alpha/index.html").is_none());

    h.queue().start_run(h.blog.owner()).unwrap();
    let resumed = h.run(2);
    assert_eq!(resumed.stop_reason, StopReason::Drained);
    assert_eq!(resumed.remaining, 0);
    assert!(h.read("2021/05/alpha/index.html").is_some());
}

#[test]
fn test_unpublished_page_leaves_listings() {
    let h = TestHarness::new();
    seed(&h);
    actions::republish_blog(h.queue(), &h.blog).unwrap();
    h.run(10);

    let mut beta = h
        .blog_pages()
        .into_iter()
        .find(|p| p.basename == "beta")
        .unwrap();
    beta.status = PageStatus::Draft;
    content_repo::update_page(&h.db, &beta).unwrap();

    actions::unpublish_page(h.queue(), h.publisher.storage(), beta.id).unwrap();
    assert!(h.read("2021/06/beta/index.html").is_none());

    let summary = h.run(10);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.read("index.html").as_deref(), Some("Front pages=alpha,gamma"));
    assert_eq!(
        h.read("archive/2021/06/index.html").as_deref(),
        Some("Monthly pages=gamma")
    );
}

#[test]
fn test_moved_page_leaves_its_old_archive() {
    let h = TestHarness::new();
    seed(&h);
    actions::republish_blog(h.queue(), &h.blog).unwrap();
    h.run(10);
    assert_eq!(
        h.read("archive/2021/05/index.html").as_deref(),
        Some("Monthly pages=alpha")
    );

    let mut alpha = h
        .blog_pages()
        .into_iter()
        .find(|p| p.basename == "alpha")
        .unwrap();
    alpha.publication_date = Some(date(2021, 7, 1));
    content_repo::update_page(&h.db, &alpha).unwrap();

    actions::queue_page_actions(h.queue(), &h.blog, &[alpha], true).unwrap();
    let summary = h.run(10);

    assert_eq!(summary.failed, 0);
    assert!(h.read("archive/2021/05/index.html").is_none());
    let may = format!("{}/archive/2021/05/index.html", BLOG_PATH);
    assert!(fileinfo_repo::find_by_sitewide_path(&h.db, &may).unwrap().is_none());
    assert_eq!(
        h.read("archive/2021/07/index.html").as_deref(),
        Some("Monthly pages=alpha")
    );
    assert_eq!(
        h.read("archive/2021/06/index.html").as_deref(),
        Some("Monthly pages=beta,gamma")
    );
    assert!(h.read("2021/05/alpha/index.html").is_none());
    assert!(h.read("2021/07/alpha/index.html").is_some());
}

#[test]
fn test_mapping_change_moves_outputs() {
    let h = TestHarness::new();
    let (_, mappings) =
        h.add_template(h.template(TemplateType::Page, "Entry").mapping("{basename}.html"));
    h.add_page(PageBuilder::new(h.blog.id, "hello").build());
    actions::republish_blog(h.queue(), &h.blog).unwrap();
    h.run(10);
    assert!(h.read("hello.html").is_some());

    content_repo::update_mapping_pattern(&h.db, mappings[0], "posts/%Y/{basename}.html").unwrap();
    actions::mapping_changed(h.queue(), h.publisher.storage(), mappings[0]).unwrap();
    assert!(h.read("hello.html").is_none());

    h.run(10);
    assert_eq!(
        h.read("posts/2021/hello.html").as_deref(),
        Some("Entry page=hello pages=hello")
    );
}

#[test]
fn test_manual_templates_wait_for_republish() {
    let h = TestHarness::new();
    seed(&h);
    h.add_template(
        h.template(TemplateType::Index, "Feed")
            .mode(PublishingMode::Manual)
            .mapping("feed.xml"),
    );
    let pages = h.blog_pages();

    actions::queue_page_actions(h.queue(), &h.blog, &pages[..1], false).unwrap();
    actions::queue_index_actions(h.queue(), &h.blog, false).unwrap();
    h.run(10);
    assert!(h.read("index.html").is_some());
    assert!(h.read("feed.xml").is_none());

    actions::republish_blog(h.queue(), &h.blog).unwrap();
    h.run(10);
    assert_eq!(
        h.read("feed.xml").as_deref(),
        Some("Feed pages=alpha,beta,gamma")
    );
}
