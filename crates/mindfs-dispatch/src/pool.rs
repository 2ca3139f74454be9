//! Fixed-size worker pool.
//!
//! Workers pull jobs from a FIFO queue guarded by a mutex and condition
//! variable. Shutdown sets the stop flag, wakes everyone, and joins the
//! workers after they drain the remaining queue; enqueueing on a stopped
//! pool fails with `PoolStopped`.

use mindfs_error::{FsError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolQueue {
    jobs: VecDeque<Job>,
    stopped: bool,
}

#[derive(Default)]
struct PoolShared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
}

/// A fixed number of worker threads draining a shared FIFO queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers; 0 means one per available CPU.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            thread::available_parallelism().map_or(1, usize::from)
        } else {
            threads
        };

        let shared = Arc::new(PoolShared::default());
        let workers = (0..threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_main(&shared))
            })
            .collect();

        debug!(target: "mindfs::dispatch", event = "pool_started", threads);
        Self { shared, workers }
    }

    /// Queue a job for execution.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.stopped {
            return Err(FsError::PoolStopped);
        }
        queue.jobs.push_back(Box::new(job));
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }
}

fn worker_main(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            while queue.jobs.is_empty() && !queue.stopped {
                shared.available.wait(&mut queue);
            }
            match queue.jobs.pop_front() {
                Some(job) => job,
                // Stopped and drained.
                None => return,
            }
        };
        job();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.stopped = true;
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!(target: "mindfs::dispatch", event = "pool_stopped");
    }
}
