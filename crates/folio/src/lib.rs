//! Publishing queue and static file-path resolution engine for blog sites.
//!
//! Content changes are turned into queue jobs ([`queue::actions`]), drained
//! in bounded batches by a [`Publisher`], and written to paths computed by
//! the [`path`] resolver. All state lives in one SQLite database.

pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod logging;
pub mod path;
pub mod publish;
pub mod queue;
pub mod storage;
pub mod worker;

pub use config::{load_config, Config};
pub use content::{Blog, BlogRef, ContentStore};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, FolioError, Result, StorageError, WorkerError};
pub use path::{PathResolver, ResolutionContext, ResolveError, ResolvedPath};
pub use publish::{BatchReport, JobError, Publisher, Renderer, VerbatimRenderer};
pub use queue::{Job, JobTarget, JobType, PriorityPolicy, Queue, QueueError};
pub use storage::FileStorage;
pub use worker::{drive, RunSummary, WorkerPool};
