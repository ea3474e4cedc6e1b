//! Thread pools for description loading and listener delivery.
//!
//! [`WorkerPool`] hands a task to an idle thread when there is one, starts a
//! new thread while below its bound, and only queues once the bound is
//! reached. Idle threads exit after the idle timeout. A pool bounded to one
//! thread runs tasks strictly in submission order.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error, warn};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor has been shut down")]
    Rejected,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Runs listener notifications.
///
/// Implement this to deliver callbacks on a thread the application owns, such
/// as its main loop. Tasks must run in submission order: the control point
/// relies on the executor for the order of `on_discover`, `on_lost` and
/// event notifications. Running a task inline inside `execute` is allowed.
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, task: Task) -> Result<(), ExecutorError>;

    /// Called once when the control point terminates.
    fn terminate(&self) {}
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Task>,
    threads: usize,
    idle: usize,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    terminated: Condvar,
}

/// Bounded thread pool with a hand-off queue policy.
pub struct WorkerPool {
    name: String,
    max_threads: usize,
    idle_timeout: Duration,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, max_threads: usize, idle_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            max_threads: max_threads.max(1),
            idle_timeout,
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState::default()),
                work_available: Condvar::new(),
                terminated: Condvar::new(),
            }),
        }
    }

    /// Single-threaded pool: strict FIFO, one task at a time.
    pub fn sequential(name: impl Into<String>, idle_timeout: Duration) -> Self {
        Self::new(name, 1, idle_timeout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Submit a task. Fails immediately with [`ExecutorError::Rejected`] after shutdown.
    pub fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(ExecutorError::Rejected);
        }
        if state.idle > state.queue.len() {
            state.queue.push_back(task);
            self.shared.work_available.notify_one();
            return Ok(());
        }
        if state.threads >= self.max_threads {
            state.queue.push_back(task);
            return Ok(());
        }

        state.threads += 1;
        let index = state.threads;
        drop(state);

        let shared = Arc::clone(&self.shared);
        let idle_timeout = self.idle_timeout;
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.name, index))
            .spawn(move || worker_loop(shared, task, idle_timeout));
        if let Err(e) = spawned {
            let mut state = self.shared.state.lock();
            state.threads -= 1;
            if state.threads == 0 && state.shutdown {
                self.shared.terminated.notify_all();
            }
            return Err(ExecutorError::Spawn(e));
        }
        Ok(())
    }

    /// Threads currently running a task
    pub fn active_threads(&self) -> usize {
        let state = self.shared.state.lock();
        state.threads - state.idle
    }

    /// Threads alive, busy or idle
    pub fn pool_size(&self) -> usize {
        self.shared.state.lock().threads
    }

    /// Tasks waiting for a thread
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Stop accepting tasks. Queued tasks still run; idle threads exit.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        self.shared.work_available.notify_all();
        debug!("Worker pool {} shut down with {} queued", self.name, state.queue.len());
    }

    /// Wait until every thread has exited after [`shutdown`](Self::shutdown).
    ///
    /// Returns `false` if threads were still running when `timeout` elapsed.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !(state.shutdown && state.threads == 0) {
            if self
                .shared
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.shutdown && state.threads == 0;
            }
        }
        true
    }
}

impl CallbackExecutor for WorkerPool {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        WorkerPool::execute(self, task)
    }

    fn terminate(&self) {
        self.shutdown();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<PoolShared>, first: Task, idle_timeout: Duration) {
    let mut task = first;
    loop {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Task panicked on {:?}", thread::current().name());
        }
        match next_task(&shared, idle_timeout) {
            Some(next) => task = next,
            None => return,
        }
    }
}

/// Wait for the next task; `None` once the thread should exit.
fn next_task(shared: &PoolShared, idle_timeout: Duration) -> Option<Task> {
    let mut state = shared.state.lock();
    loop {
        if let Some(task) = state.queue.pop_front() {
            return Some(task);
        }
        if state.shutdown {
            break;
        }
        state.idle += 1;
        let timed_out = shared
            .work_available
            .wait_for(&mut state, idle_timeout)
            .timed_out();
        state.idle -= 1;
        if timed_out && state.queue.is_empty() {
            break;
        }
    }
    state.threads -= 1;
    if state.threads == 0 && state.shutdown {
        shared.terminated.notify_all();
    }
    None
}

/// The executors a control point runs on.
///
/// `io` is an unordered pool for description and icon downloads. `callback`
/// doubles as the sequential executor: every listener notification goes
/// through it, and their ordering holds only as long as it runs tasks FIFO.
/// The default is a single-thread [`WorkerPool::sequential`]; a custom
/// [`CallbackExecutor`] that runs tasks concurrently gives up that guarantee.
pub struct TaskExecutors {
    io: WorkerPool,
    callback: Arc<dyn CallbackExecutor>,
}

impl TaskExecutors {
    pub fn new(io_threads: usize, idle_timeout: Duration, callback: Option<Arc<dyn CallbackExecutor>>) -> Self {
        let callback = callback
            .unwrap_or_else(|| Arc::new(WorkerPool::sequential("upnp-callback", idle_timeout)));
        Self {
            io: WorkerPool::new("upnp-io", io_threads, idle_timeout),
            callback,
        }
    }

    /// Run I/O work such as a description download. No ordering between tasks.
    pub fn io(&self, task: Task) -> Result<(), ExecutorError> {
        self.io.execute(task)
    }

    /// Deliver a listener notification, in submission order.
    pub fn callback(&self, task: Task) -> Result<(), ExecutorError> {
        self.callback.execute(task)
    }

    pub(crate) fn callback_executor(&self) -> Arc<dyn CallbackExecutor> {
        Arc::clone(&self.callback)
    }

    pub fn io_pool(&self) -> &WorkerPool {
        &self.io
    }

    pub fn terminate(&self) {
        self.io.shutdown();
        self.callback.terminate();
        if !self.io.await_termination(Duration::from_secs(3)) {
            warn!("I/O pool threads still running after terminate");
        }
    }
}
