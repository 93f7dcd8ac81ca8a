use serde::Serialize;
use tokio::sync::broadcast;

use super::runner::BatchReport;
use crate::content::BlogRef;
use crate::queue::JobType;

/// Events emitted while a batch is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishEvent {
    RunStarted {
        blog: BlogRef,
        /// Ordinary jobs pending when the run was opened.
        pending: i64,
    },
    RunFinished {
        blog: BlogRef,
    },
    Halted {
        blog: BlogRef,
    },
    JobStarted {
        job_id: i64,
        job_type: JobType,
        target: String,
    },
    FileWritten {
        job_id: i64,
        path: String,
        url: String,
    },
    FileRemoved {
        job_id: i64,
        path: String,
    },
    JobCompleted {
        job_id: i64,
    },
    JobFailed {
        job_id: i64,
        error: String,
    },
    BatchFinished {
        blog: BlogRef,
        report: BatchReport,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: PublishEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: PublishEvent) {}
}

/// Forwards events to the log at debug level, run boundaries at info.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: PublishEvent) {
        match &event {
            PublishEvent::RunStarted { blog, pending } => {
                tracing::info!("Publish run started for {} ({} jobs)", blog, pending)
            }
            PublishEvent::RunFinished { blog } => {
                tracing::info!("Publish run finished for {}", blog)
            }
            PublishEvent::Halted { blog } => tracing::info!("Publishing halted for {}", blog),
            PublishEvent::JobFailed { job_id, error } => {
                tracing::warn!("Job {} failed: {}", job_id, error)
            }
            other => tracing::debug!(?other, "publish progress"),
        }
    }
}

/// Publishes events on a tokio broadcast channel, e.g. for a polling
/// status endpoint. Events sent with no subscriber are dropped.
pub struct BroadcastProgress {
    sender: broadcast::Sender<PublishEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: PublishEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_delivers_to_subscribers() {
        let progress = BroadcastProgress::new(16);
        let mut rx = progress.subscribe();

        progress.report(PublishEvent::JobCompleted { job_id: 7 });

        assert_eq!(rx.try_recv().unwrap(), PublishEvent::JobCompleted { job_id: 7 });
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let progress = BroadcastProgress::new(1);
        progress.report(PublishEvent::JobFailed {
            job_id: 1,
            error: "boom".to_string(),
        });
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let json = serde_json::to_value(PublishEvent::FileRemoved {
            job_id: 3,
            path: "/var/www/old.html".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "file_removed");
        assert_eq!(json["path"], "/var/www/old.html");
    }
}
