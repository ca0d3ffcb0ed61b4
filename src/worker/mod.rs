//! Worker Pool Module
//!
//! Fixed-size named pool of OS threads that runs blocking script executions
//! off the async runtime. Results come back through a single-shot channel.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::{ConfigError, LwsError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

// == Worker Pool ==
pub struct WorkerPool {
    name: String,
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    // == Constructor ==
    /// Starts `threads` workers named `{name}-{i}`.
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(ConfigError::Zero("thread_pool.threads").into());
        }
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(index, receiver))?;
            workers.push(handle);
        }

        info!(pool = %name, threads, "worker pool started");
        Ok(Self {
            name,
            sender: Some(sender),
            workers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    // == Submit ==
    /// Queues `job` for exactly one worker thread.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| LwsError::Internal(format!("worker pool {} is closed", self.name)))?;
        sender
            .send(Box::new(job))
            .map_err(|_| LwsError::Internal(format!("worker pool {} is closed", self.name)))
    }

    // == Spawn ==
    /// Runs `job` on a worker and delivers its output on the returned receiver.
    ///
    /// If the job panics the sender is dropped and the receiver reports an
    /// error. If the receiver is gone when the job finishes, the output is
    /// dropped on the worker thread.
    pub fn spawn<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move || {
            if tx.send(job()).is_err() {
                debug!("completion receiver gone, dropping job output");
            }
        })?;
        Ok(rx)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue drains
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!(pool = %self.name, "worker thread terminated abnormally");
            }
        }
        info!(pool = %self.name, "worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("threads", &self.workers.len())
            .field("open", &self.sender.is_some())
            .finish()
    }
}

fn worker_loop(index: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = receiver.lock().recv();
        let Ok(job) = job else {
            debug!(worker = index, "worker exiting");
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            error!(worker = index, panic = panic_message(&*panic), "job panicked");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
