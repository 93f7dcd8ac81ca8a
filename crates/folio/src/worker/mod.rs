pub mod driver;
pub mod pool;

pub use driver::{drive, RunSummary, StopReason};
pub use pool::{DriveResult, DriveSettings, WorkerPool};
