use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use folio::config::{self, Config};
use folio::db::content_repo;
use folio::publish::{LogProgress, Publisher, VerbatimRenderer};
use folio::queue::{actions, JobTarget, JobType, Queue};
use folio::worker::{drive, DriveSettings, WorkerPool};
use folio::{Blog, ContentStore, Database, FileStorage, FolioError};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Publishing queue and static file-path resolution for blog sites")]
#[command(version)]
struct Cli {
    /// Config file (JSON); built-in defaults when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log at debug level unless FOLIO_LOG or RUST_LOG say otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Page,
    Index,
    Archive,
    Include,
}

impl From<Kind> for JobType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Page => JobType::Page,
            Kind::Index => JobType::Index,
            Kind::Archive => JobType::Archive,
            Kind::Include => JobType::Include,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue one job
    Enqueue {
        #[arg(long)]
        blog: i64,
        kind: Kind,
        /// Content item id (page, template or mapping)
        #[arg(long)]
        item: Option<i64>,
        /// Free-form descriptor, e.g. an archive key
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        priority: Option<i32>,
    },
    /// Queue a page with its neighbours and archives
    PublishPage {
        #[arg(long)]
        blog: i64,
        page: i64,
        #[arg(long)]
        no_neighbours: bool,
    },
    /// Take a page offline and queue what listed it
    Unpublish {
        page: i64,
    },
    /// Re-resolve everything a template mapping produced
    Remap {
        mapping: i64,
    },
    /// Queue every output of a blog and open a run
    Republish {
        #[arg(long)]
        blog: i64,
    },
    /// Open a publish run over the pending jobs
    Start {
        #[arg(long)]
        blog: i64,
    },
    /// Process batches until drained, halted or interrupted
    Run {
        /// Blogs to drive; every blog when omitted
        #[arg(long)]
        blog: Vec<i64>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        max_batches: Option<usize>,
    },
    /// Halt a blog's queue before its next batch
    Stop {
        #[arg(long)]
        blog: i64,
    },
    /// Delete every pending job of a blog
    Clear {
        #[arg(long)]
        blog: i64,
    },
    /// Show queue counts, markers and failures
    Status {
        #[arg(long)]
        blog: i64,
    },
    /// Print a free page basename for a title
    Basename {
        #[arg(long)]
        blog: i64,
        title: String,
    },
    /// Return a failed job to the queue
    Retry {
        job: i64,
    },
    /// Return jobs claimed too long ago to the queue
    ResetStuck {
        #[arg(long)]
        blog: i64,
        /// Defaults to the configured stuck threshold
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

fn find_blog(db: &Database, id: i64) -> Result<Blog, FolioError> {
    db.blog(id)?.ok_or(FolioError::NotFound { kind: "blog", id })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    folio::logging::init(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(database) = &cli.database {
        config.database.path = Some(database.display().to_string());
    }

    let db_path = config
        .database_path()
        .ok_or("Cannot determine a database path; pass --database")?;
    let db = Database::open(&db_path)?;
    let queue = Queue::new(db.clone(), config.priorities);
    let storage = FileStorage::new(&config.output.root);

    match cli.command {
        Command::Enqueue {
            blog,
            kind,
            item,
            key,
            priority,
        } => {
            let blog = find_blog(&db, blog)?;
            let target = JobTarget::from_columns(item, key);
            let job = queue.enqueue_with_priority(kind.into(), target, blog.owner(), priority)?;
            println!("{} (priority {})", job, job.priority);
        }
        Command::PublishPage {
            blog,
            page,
            no_neighbours,
        } => {
            let blog = find_blog(&db, blog)?;
            let page = db
                .page(page)?
                .ok_or(FolioError::NotFound { kind: "page", id: page })?;
            let queued = actions::queue_page_actions(&queue, &blog, &[page], !no_neighbours)?;
            println!("Queued {} jobs", queued);
        }
        Command::Unpublish { page } => {
            let queued = actions::unpublish_page(&queue, &storage, page)?;
            println!("Queued {} jobs", queued);
        }
        Command::Remap { mapping } => {
            let queued = actions::mapping_changed(&queue, &storage, mapping)?;
            println!("Queued {} jobs", queued);
        }
        Command::Republish { blog } => {
            let blog = find_blog(&db, blog)?;
            let queued = actions::republish_blog(&queue, &blog)?;
            println!("Queued {} jobs", queued);
        }
        Command::Start { blog } => {
            let blog = find_blog(&db, blog)?;
            let start = queue.start_run(blog.owner())?;
            println!(
                "Run opened with {} pending jobs",
                start.target.data_integer().unwrap_or_default()
            );
        }
        Command::Run {
            blog,
            batch_size,
            max_batches,
        } => {
            let blogs = if blog.is_empty() {
                db.blogs()?
            } else {
                blog.into_iter()
                    .map(|id| find_blog(&db, id))
                    .collect::<Result<Vec<_>, _>>()?
            };
            let settings = DriveSettings {
                batch_size: batch_size.unwrap_or(config.queue.batch_size),
                max_batches: max_batches.or(config.queue.max_batches),
            };
            let publisher = Publisher::new(queue, storage, Arc::new(VerbatimRenderer))
                .with_progress(Arc::new(LogProgress))
                .with_stuck_after(config.queue.stuck_after());
            run(publisher, &blogs, settings, config.worker_count)?;
        }
        Command::Stop { blog } => {
            let blog = find_blog(&db, blog)?;
            queue.stop(blog.owner())?;
            println!("Stop requested for {}", blog.name);
        }
        Command::Clear { blog } => {
            let blog = find_blog(&db, blog)?;
            let cleared = queue.clear(blog.owner())?;
            println!("Cleared {} pending jobs", cleared);
        }
        Command::Status { blog } => {
            let blog = find_blog(&db, blog)?;
            let owner = blog.owner();
            let counts = queue.job_counts(owner)?;
            println!(
                "{}: {} pending, {} markers, {} claimed, {} failed",
                blog.name, counts.pending, counts.control, counts.claimed, counts.failed
            );
            if queue.is_halted(owner)? {
                println!("Halted: a stop request is holding back pending work");
            }
            for job in queue.control_jobs(owner)? {
                println!("  marker {}", job);
            }
            for job in queue.failed_jobs(owner)? {
                println!("  failed {}: {}", job, job.error.as_deref().unwrap_or(""));
            }
            for job in queue.stuck_jobs(owner, config.queue.stuck_after())? {
                println!("  stuck {} since {:?}", job, job.claimed_at);
            }
        }
        Command::Basename { blog, title } => {
            let blog = find_blog(&db, blog)?;
            let basename = content_repo::allocate_page_basename(
                &db,
                blog.id,
                &title,
                config.output.max_basename_length,
            )?;
            println!("{}", basename);
        }
        Command::Retry { job } => {
            let job = queue.requeue(job)?;
            println!("Requeued {}", job);
        }
        Command::ResetStuck {
            blog,
            older_than_secs,
        } => {
            let blog = find_blog(&db, blog)?;
            let older_than = older_than_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.queue.stuck_after());
            let reset = queue.reset_stuck(blog.owner(), older_than)?;
            println!("Reset {} stuck jobs", reset);
        }
    }

    Ok(())
}

fn run(
    publisher: Publisher,
    blogs: &[Blog],
    settings: DriveSettings,
    worker_count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if let [blog] = blogs {
        let cancel = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&cancel);
        ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed))?;

        let summary = drive(
            &publisher,
            blog.owner(),
            settings.batch_size,
            settings.max_batches,
            &cancel,
        )?;
        println!(
            "{}: {} done, {} failed, {} remaining ({:?})",
            blog.name, summary.done, summary.failed, summary.remaining, summary.stop_reason
        );
        return Ok(());
    }

    let workers = worker_count.min(blogs.len()).max(1);
    let pool = WorkerPool::new(publisher, settings, workers)?;
    let shutdown = pool.shutdown_flag();
    ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed))?;

    // Both channels are bounded; never have more blogs in flight than workers.
    for chunk in blogs.chunks(workers) {
        for blog in chunk {
            pool.submit(blog.owner())?;
        }
        for _ in chunk {
            let Some(result) = pool.recv_result() else {
                break;
            };
            match result.outcome {
                Ok(summary) => println!(
                    "{}: {} done, {} failed, {} remaining ({:?})",
                    result.blog,
                    summary.done,
                    summary.failed,
                    summary.remaining,
                    summary.stop_reason
                ),
                Err(e) => eprintln!("{}: {}", result.blog, e),
            }
        }
        if pool.is_shutdown() {
            break;
        }
    }
    pool.shutdown();
    pool.wait();
    Ok(())
}
