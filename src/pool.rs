//! Elastic worker thread pool.
//!
//! Workers pull boxed closures from a FIFO queue guarded by a mutex and
//! condition variable. A resizer thread wakes every `resize_interval` and
//! adds one worker when work is piling up, or asks one idle worker to retire
//! when there are more idle workers than the configured minimum.
//!
//! Thread counts are only ever decremented by the exiting worker itself, so
//! `threads` always reflects workers that are actually alive.

use crate::error::{ServerError, ServerResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a submitted task did not produce a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task panicked; carries the panic message
    Panicked(String),
    /// The task was dropped without running
    Discarded,
    /// `wait_timeout` gave up before the task finished
    TimedOut,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Panicked(msg) => write!(f, "task panicked: {}", msg),
            TaskError::Discarded => write!(f, "task was discarded"),
            TaskError::TimedOut => write!(f, "timed out waiting for task"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Completion handle returned by [`WorkerPool::submit`]
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has run
    pub fn wait(self) -> Result<T, TaskError> {
        self.rx.recv().unwrap_or(Err(TaskError::Discarded))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TaskError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(TaskError::Discarded),
        }
    }

    /// Result if the task already finished
    pub fn try_wait(&self) -> Option<Result<T, TaskError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Discarded)),
        }
    }
}

/// Snapshot of the pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub threads: usize,
    pub idle: usize,
    pub pending: usize,
}

struct PoolState {
    queue: VecDeque<Job>,
    threads: usize,
    idle: usize,
    // Retirements requested by the resizer that no worker has taken yet
    retiring: usize,
    stop: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    resizer_wakeup: Condvar,
    min_threads: usize,
    max_threads: usize,
    resize_interval: Duration,
    next_worker_id: AtomicUsize,
}

/// Bounded-elastic pool of worker threads
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    resizer: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `min_threads` workers and the resizer thread
    pub fn new(
        min_threads: usize,
        max_threads: usize,
        resize_interval: Duration,
    ) -> ServerResult<Self> {
        if min_threads == 0 || max_threads < min_threads {
            return Err(ServerError::Pool(format!(
                "invalid thread bounds: min {} max {}",
                min_threads, max_threads
            )));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                threads: 0,
                idle: 0,
                retiring: 0,
                stop: false,
            }),
            work_available: Condvar::new(),
            resizer_wakeup: Condvar::new(),
            min_threads,
            max_threads,
            resize_interval,
            next_worker_id: AtomicUsize::new(0),
        });
        let workers = Arc::new(Mutex::new(Vec::with_capacity(max_threads)));

        let pool = Self {
            shared: shared.clone(),
            workers: workers.clone(),
            resizer: Mutex::new(None),
        };

        for _ in 0..min_threads {
            let mut state = shared.state.lock();
            let handle = spawn_worker(&shared, &mut state)?;
            workers.lock().push(handle);
        }

        let resizer = thread::Builder::new()
            .name("pool-resizer".to_string())
            .spawn(move || resize_loop(shared, workers))?;
        *pool.resizer.lock() = Some(resizer);

        info!(
            "Worker pool started with {} threads (max {})",
            min_threads, max_threads
        );
        Ok(pool)
    }

    /// Queue a closure for execution. Never blocks on running tasks.
    pub fn submit<F, T>(&self, task: F) -> ServerResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(value) => Ok(value),
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    error!("Task panicked: {}", msg);
                    Err(TaskError::Panicked(msg))
                }
            };
            // The submitter may have dropped the handle
            let _ = tx.send(outcome);
        });

        {
            let mut state = self.shared.state.lock();
            if state.stop {
                return Err(ServerError::Pool("pool is shut down".to_string()));
            }
            state.queue.push_back(job);
        }
        self.shared.work_available.notify_one();

        Ok(TaskHandle { rx })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            threads: state.threads,
            idle: state.idle,
            pending: state.queue.len(),
        }
    }

    pub fn min_threads(&self) -> usize {
        self.shared.min_threads
    }

    pub fn max_threads(&self) -> usize {
        self.shared.max_threads
    }

    /// Stop accepting work, let the workers drain the queue, then join every
    /// worker followed by the resizer. Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.stop {
                return;
            }
            state.stop = true;
        }
        self.shared.work_available.notify_all();
        self.shared.resizer_wakeup.notify_all();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }

        if let Some(resizer) = self.resizer.lock().take() {
            let _ = resizer.join();
        }

        info!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn one worker, counting it as live and idle under `state`
fn spawn_worker(shared: &Arc<Shared>, state: &mut PoolState) -> ServerResult<JoinHandle<()>> {
    let id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let worker_shared = shared.clone();
    let handle = thread::Builder::new()
        .name(format!("worker-{}", id))
        .spawn(move || worker_loop(worker_shared, id))?;

    state.threads += 1;
    state.idle += 1;
    Ok(handle)
}

fn worker_loop(shared: Arc<Shared>, id: usize) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.idle -= 1;
                    break job;
                }
                if state.stop {
                    state.threads -= 1;
                    state.idle -= 1;
                    return;
                }
                if state.retiring > 0 {
                    state.retiring -= 1;
                    state.threads -= 1;
                    state.idle -= 1;
                    debug!("worker-{} retired, {} threads left", id, state.threads);
                    return;
                }
                shared.work_available.wait(&mut state);
            }
        };

        job();

        shared.state.lock().idle += 1;
    }
}

fn resize_loop(shared: Arc<Shared>, workers: Arc<Mutex<Vec<JoinHandle<()>>>>) {
    let mut state = shared.state.lock();
    loop {
        let deadline = Instant::now() + shared.resize_interval;
        while !state.stop {
            if shared
                .resizer_wakeup
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        if state.stop {
            return;
        }

        let live = state.threads.saturating_sub(state.retiring);
        let available = state.idle.saturating_sub(state.retiring);

        if state.queue.len() > available && state.threads < shared.max_threads {
            match spawn_worker(&shared, &mut state) {
                Ok(handle) => {
                    let mut workers = workers.lock();
                    workers.retain(|h| !h.is_finished());
                    workers.push(handle);
                    info!("Worker pool grew to {} threads", state.threads);
                }
                Err(e) => error!("Failed to spawn worker: {}", e),
            }
        } else if available > shared.min_threads && live > shared.min_threads {
            state.retiring += 1;
            shared.work_available.notify_one();
            info!("Worker pool shrinking to {} threads", live - 1);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_str_and_string() {
        let p: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(p.as_ref()), "boom");
        let p: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(p.as_ref()), "bang");
        let p: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(p.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_rejects_invalid_bounds() {
        assert!(WorkerPool::new(0, 4, Duration::from_secs(1)).is_err());
        assert!(WorkerPool::new(4, 2, Duration::from_secs(1)).is_err());
    }
}
