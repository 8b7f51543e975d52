//! Fixed-size worker pools for handler execution.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::protocol::metrics::Metrics;

type Job = Box<dyn FnOnce() + Send>;

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Named group of threads pulling jobs from one queue.
pub(crate) struct WorkerPool {
    name: &'static str,
    queue: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(name: &'static str, threads: usize) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("dbuslink-{name}-{index}"))
                .spawn(move || worker_loop(name, &rx))?;
            workers.push(handle);
        }
        Ok(Self {
            name,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue a job. `false` once the pool was shut down.
    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.queue.lock().as_ref() {
            Some(queue) => queue.send(Box::new(job)).is_ok(),
            None => {
                debug!(pool = self.name, "job dropped after shutdown");
                false
            }
        }
    }

    /// Stop accepting jobs, let queued ones finish and wait for the workers
    /// until `deadline`. A worker calling this is not waited for.
    pub(crate) fn shutdown(&self, deadline: Instant) {
        drop(self.queue.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(pool = self.name, "worker still busy after grace period, detaching");
            }
        }
    }
}

fn worker_loop(name: &'static str, rx: &Mutex<Receiver<Job>>) {
    loop {
        let job = rx.lock().recv();
        let Ok(job) = job else {
            break;
        };
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            Metrics::record_handler_failure();
            warn!(pool = name, "handler panicked");
        }
    }
}

/// The four pools a connection dispatches into.
pub(crate) struct Pools {
    pub(crate) signal: WorkerPool,
    pub(crate) error: WorkerPool,
    pub(crate) method_call: WorkerPool,
    pub(crate) method_return: WorkerPool,
}

impl Pools {
    pub(crate) fn new(config: &super::ReceivingConfig) -> std::io::Result<Self> {
        Ok(Self {
            signal: WorkerPool::new("signal", config.signal_threads)?,
            error: WorkerPool::new("error", config.error_threads)?,
            method_call: WorkerPool::new("method-call", config.method_call_threads)?,
            method_return: WorkerPool::new("method-return", config.method_return_threads)?,
        })
    }

    pub(crate) fn shutdown(&self, deadline: Instant) {
        for pool in [&self.method_call, &self.method_return, &self.error, &self.signal] {
            pool.shutdown(deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn runs_jobs_and_survives_panics() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        assert!(pool.execute(|| panic!("boom")));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.execute(move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown(Instant::now() + Duration::from_secs(5));
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(!pool.execute(|| {}));
    }

    #[test]
    fn single_thread_keeps_order() {
        let pool = WorkerPool::new("ordered", 1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            pool.execute(move || seen.lock().push(i));
        }
        pool.shutdown(Instant::now() + Duration::from_secs(5));
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_gives_up_after_deadline() {
        let pool = WorkerPool::new("slow", 1).unwrap();
        pool.execute(|| thread::sleep(Duration::from_millis(300)));
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        pool.shutdown(Instant::now() + Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(250));
    }
}
