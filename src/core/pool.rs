//! Bounded cipher worker pool
//!
//! Cipher work runs on a fixed set of threads fed by a bounded queue. A
//! full queue rejects the job with [`FileCryptError::Busy`]; a job that
//! misses its deadline returns [`FileCryptError::Timeout`] to the caller
//! while the worker finishes it and discards the result.

use crate::error::{FileCryptError, Result};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool statistics
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Jobs accepted into the queue
    pub jobs_submitted: AtomicU64,
    /// Jobs that ran to completion
    pub jobs_completed: AtomicU64,
    /// Jobs refused because the queue was full
    pub jobs_rejected: AtomicU64,
    /// Jobs whose caller stopped waiting
    pub jobs_timed_out: AtomicU64,
    /// Jobs currently executing
    pub jobs_in_progress: AtomicUsize,
}

/// Fixed-size pool for CPU-bound cipher work
#[derive(Debug)]
pub struct CipherPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl CipherPool {
    /// Start `threads` workers behind a queue of `queue_depth` pending jobs
    pub fn new(threads: usize, queue_depth: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = bounded::<Job>(queue_depth.max(1));
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let receiver = receiver.clone();
            let stats = Arc::clone(&stats);

            let handle = thread::Builder::new()
                .name(format!("cipher-{}", worker_id))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        stats.jobs_in_progress.fetch_add(1, Ordering::Relaxed);
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("Cipher job panicked on worker {}", worker_id);
                        }
                        stats.jobs_in_progress.fetch_sub(1, Ordering::Relaxed);
                        stats.jobs_completed.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::debug!("Cipher worker {} shutting down", worker_id);
                })
                .map_err(|e| FileCryptError::ThreadPoolError(e.to_string()))?;
            workers.push(handle);
        }

        tracing::debug!("Started {} cipher workers (queue depth {})", threads, queue_depth);
        Ok(Self {
            sender: Some(sender),
            workers,
            stats,
        })
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Get statistics
    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Run `job` on a worker and wait up to `timeout` for its result
    pub fn run<T, F>(&self, timeout: Duration, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| FileCryptError::ThreadPoolError("cipher pool is shut down".to_string()))?;

        let (result_tx, result_rx) = bounded(1);
        let wrapped: Job = Box::new(move || {
            // The caller may have timed out and dropped the receiver
            let _ = result_tx.send(job());
        });

        match sender.try_send(wrapped) {
            Ok(()) => {
                self.stats.jobs_submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.stats.jobs_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(FileCryptError::Busy);
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(FileCryptError::ThreadPoolError("cipher workers exited".to_string()));
            }
        }

        match result_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.stats.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
                Err(FileCryptError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(FileCryptError::ThreadPoolError("cipher job panicked".to_string()))
            }
        }
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for CipherPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::Receiver;

    #[test]
    fn test_runs_jobs() {
        let pool = CipherPool::new(2, 4).unwrap();
        assert_eq!(pool.threads(), 2);

        let out = pool.run(Duration::from_secs(5), || Ok(6 * 7)).unwrap();
        assert_eq!(out, 42);

        let err = pool
            .run(Duration::from_secs(5), || -> Result<()> { Err(FileCryptError::AuthenticationFailure) })
            .unwrap_err();
        assert!(matches!(err, FileCryptError::AuthenticationFailure));
    }

    fn blocker(pool: &Arc<CipherPool>, gate: Receiver<()>) -> thread::JoinHandle<Result<()>> {
        let pool = Arc::clone(pool);
        thread::spawn(move || {
            pool.run(Duration::from_secs(10), move || {
                let _ = gate.recv();
                Ok(())
            })
        })
    }

    #[test]
    fn test_full_queue_is_busy() {
        let pool = Arc::new(CipherPool::new(1, 1).unwrap());
        let (open_gate, gate) = bounded::<()>(0);

        // One job occupies the worker, one fills the queue
        let running = blocker(&pool, gate.clone());
        while pool.stats().jobs_in_progress.load(Ordering::Relaxed) == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        let queued = blocker(&pool, gate);
        while pool.stats().jobs_submitted.load(Ordering::Relaxed) < 2 {
            thread::sleep(Duration::from_millis(5));
        }

        let err = pool.run(Duration::from_secs(1), || Ok(())).unwrap_err();
        assert!(matches!(err, FileCryptError::Busy));
        assert!(err.is_recoverable());
        assert_eq!(pool.stats().jobs_rejected.load(Ordering::Relaxed), 1);

        drop(open_gate);
        running.join().unwrap().unwrap();
        queued.join().unwrap().unwrap();
    }

    #[test]
    fn test_timeout() {
        let pool = CipherPool::new(1, 1).unwrap();
        let err = pool
            .run(Duration::from_millis(20), || {
                thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, FileCryptError::Timeout(_)));
        assert_eq!(pool.stats().jobs_timed_out.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panicking_job_keeps_worker() {
        let pool = CipherPool::new(1, 2).unwrap();
        let err = pool
            .run(Duration::from_secs(5), || -> Result<()> { panic!("boom") })
            .unwrap_err();
        assert!(matches!(err, FileCryptError::ThreadPoolError(_)));

        assert_eq!(pool.run(Duration::from_secs(5), || Ok("alive")).unwrap(), "alive");
    }

    #[test]
    fn test_shutdown_rejects_jobs() {
        let mut pool = CipherPool::new(1, 1).unwrap();
        pool.shutdown();
        assert!(matches!(
            pool.run(Duration::from_secs(1), || Ok(())).unwrap_err(),
            FileCryptError::ThreadPoolError(_)
        ));
    }
}
