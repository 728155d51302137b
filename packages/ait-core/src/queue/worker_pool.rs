//! Bounded worker pool for generation jobs.
//!
//! Each worker is a supervised tokio task: if the job handler panics, the
//! panic unwinds only that task (the workspace's release profile keeps
//! unwinding enabled for exactly this reason) and the supervisor
//! immediately respawns a replacement worker rather than losing a slot
//! from the pool permanently.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::queue::job::Job;

pub type JobHandler = Arc<dyn Fn(Job) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A bounded queue of jobs served by a fixed number of supervised workers.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `num_workers` supervised workers reading from a channel of
    /// capacity `queue_capacity`, each dispatching jobs to `handler`.
    pub fn spawn(num_workers: usize, queue_capacity: usize, handler: JobHandler) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = Arc::new(AtomicBool::new(false));

        for worker_id in 0..num_workers {
            spawn_supervised_worker(worker_id, receiver.clone(), handler.clone(), shutdown.clone());
        }

        Self { sender, shutdown }
    }

    /// Enqueues a job, returning `Busy` if the queue is at capacity.
    pub fn try_submit(&self, job: Job) -> Result<(), crate::error::AitError> {
        self.sender
            .try_send(job)
            .map_err(|_| crate::error::AitError::Busy)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn spawn_supervised_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    handler: JobHandler,
    shutdown: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            let receiver = receiver.clone();
            let handler = handler.clone();
            let join_result = tokio::spawn(worker_loop(worker_id, receiver, handler)).await;

            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            match join_result {
                Ok(()) => return,
                Err(panic) => {
                    log::error!("worker {worker_id} panicked, respawning: {panic}");
                    continue;
                }
            }
        }
    });
}

async fn worker_loop(worker_id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>, handler: JobHandler) {
    loop {
        let job = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };

        let Some(job) = job else {
            log::info!("worker {worker_id} shutting down: channel closed");
            return;
        };

        handler(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::RequestKind;
    use std::sync::atomic::AtomicUsize;

    fn sample_job() -> Job {
        Job::new(
            "1.2.3.4".into(),
            RequestKind::Generate {
                model: "llama3.2".into(),
                prompt: "hello".into(),
                message_id: "m1".into(),
            },
        )
    }

    #[tokio::test]
    async fn submitted_jobs_are_processed() {
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();
        let handler: JobHandler = Arc::new(move |_job: Job| {
            let processed = processed_clone.clone();
            Box::pin(async move {
                processed.fetch_add(1, Ordering::SeqCst);
            })
        });

        let pool = WorkerPool::spawn(2, 8, handler);
        pool.try_submit(sample_job()).unwrap();
        pool.try_submit(sample_job()).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn full_queue_returns_busy() {
        let handler: JobHandler = Arc::new(|_job: Job| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            })
        });

        let pool = WorkerPool::spawn(1, 1, handler);
        pool.try_submit(sample_job()).unwrap();
        pool.try_submit(sample_job()).unwrap();
        let result = pool.try_submit(sample_job());
        assert!(matches!(result, Err(crate::error::AitError::Busy)));
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_remaining_jobs() {
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();
        let handler: JobHandler = Arc::new(move |job: Job| {
            let processed = processed_clone.clone();
            Box::pin(async move {
                if let RequestKind::Generate { message_id, .. } = &job.kind {
                    if message_id == "panic-me" {
                        panic!("synthetic worker panic");
                    }
                }
                processed.fetch_add(1, Ordering::SeqCst);
            })
        });

        let pool = WorkerPool::spawn(1, 8, handler);
        let mut panic_job = sample_job();
        panic_job.kind = RequestKind::Generate {
            model: "llama3.2".into(),
            prompt: "x".into(),
            message_id: "panic-me".into(),
        };
        pool.try_submit(panic_job).unwrap();
        pool.try_submit(sample_job()).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }
}
