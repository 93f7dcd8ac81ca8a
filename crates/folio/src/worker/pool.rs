use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use super::driver::{drive, RunSummary};
use crate::content::BlogRef;
use crate::error::WorkerError;
use crate::publish::Publisher;

/// Batch policy applied to every drive the pool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveSettings {
    pub batch_size: usize,
    pub max_batches: Option<usize>,
}

/// Result of driving one blog.
#[derive(Debug)]
pub struct DriveResult {
    pub blog: BlogRef,
    pub outcome: Result<RunSummary, String>,
}

/// Drives publish runs for many blogs on OS threads. Each submitted blog is
/// drained by one worker; different blogs proceed independently.
pub struct WorkerPool {
    task_sender: Sender<BlogRef>,
    result_receiver: Receiver<DriveResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        publisher: Publisher,
        settings: DriveSettings,
        worker_count: usize,
    ) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (task_sender, task_receiver) = bounded::<BlogRef>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<DriveResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_publisher = publisher.clone();

            let handle = thread::Builder::new()
                .name(format!("folio-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        task_rx,
                        result_tx,
                        shutdown_flag,
                        worker_publisher,
                        settings,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            task_sender,
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn submit(&self, blog: BlogRef) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.task_sender
            .send(blog)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<DriveResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<DriveResult> {
        self.result_receiver.recv().ok()
    }

    /// Flag shared with running drives; raising it stops them between
    /// batches.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<BlogRef>,
    result_sender: Sender<DriveResult>,
    shutdown: Arc<AtomicBool>,
    publisher: Publisher,
    settings: DriveSettings,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(blog) => {
                debug!("Worker {} driving {}", worker_id, blog);

                let outcome = drive(
                    &publisher,
                    blog,
                    settings.batch_size,
                    settings.max_batches,
                    &shutdown,
                )
                .map_err(|e| e.to_string());

                if let Err(e) = result_sender.send(DriveResult { blog, outcome }) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::publish::VerbatimRenderer;
    use crate::queue::{JobTarget, JobType, PriorityPolicy, Queue};
    use crate::storage::FileStorage;
    use crate::worker::StopReason;
    use tempfile::TempDir;

    fn publisher(temp_dir: &TempDir) -> Publisher {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "INSERT INTO sites (id, name) VALUES (1, 's');
                 INSERT INTO blogs (id, site_id, name, url, path) VALUES (1, 1, 'a', 'http://a', '/a');
                 INSERT INTO blogs (id, site_id, name, url, path) VALUES (2, 1, 'b', 'http://b', '/b');",
            )?;
            Ok(())
        })
        .unwrap();
        Publisher::new(
            Queue::new(db, PriorityPolicy::default()),
            FileStorage::new(temp_dir.path()),
            Arc::new(VerbatimRenderer),
        )
    }

    #[test]
    fn test_pool_drives_each_blog() {
        let temp_dir = TempDir::new().unwrap();
        let publisher = publisher(&temp_dir);
        let blogs = [
            BlogRef { blog_id: 1, site_id: 1 },
            BlogRef { blog_id: 2, site_id: 1 },
        ];
        for blog in blogs {
            publisher
                .queue()
                .enqueue(JobType::Include, JobTarget::Blog, blog)
                .unwrap();
        }

        let settings = DriveSettings {
            batch_size: 10,
            max_batches: None,
        };
        let pool = WorkerPool::new(publisher.clone(), settings, 2).unwrap();
        for blog in blogs {
            pool.submit(blog).unwrap();
        }

        let mut results: Vec<_> = (0..2).filter_map(|_| pool.recv_result()).collect();
        results.sort_by_key(|r| r.blog.blog_id);
        pool.shutdown();
        pool.wait();

        assert_eq!(results.len(), 2);
        for result in results {
            let summary = result.outcome.unwrap();
            assert_eq!(summary.stop_reason, StopReason::Drained);
            assert_eq!(summary.done, 3);
        }
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let temp_dir = TempDir::new().unwrap();
        let settings = DriveSettings {
            batch_size: 1,
            max_batches: None,
        };
        let pool = WorkerPool::new(publisher(&temp_dir), settings, 1).unwrap();
        pool.shutdown();

        let result = pool.submit(BlogRef { blog_id: 1, site_id: 1 });
        assert!(matches!(result, Err(WorkerError::ChannelClosed)));
        assert!(pool.is_shutdown());
        pool.wait();
    }
}
