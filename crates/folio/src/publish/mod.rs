pub mod error;
pub mod progress;
pub mod render;
pub mod runner;

pub use error::JobError;
pub use progress::{BroadcastProgress, LogProgress, NoopProgress, ProgressReporter, PublishEvent};
pub use render::{RenderContext, RenderError, Renderer, VerbatimRenderer};
pub use runner::{BatchReport, Publisher, DEFAULT_STUCK_AFTER};
