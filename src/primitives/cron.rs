
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle returned by [`Cron::add_task`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskHandle(u64);

#[derive(Default)]
struct CronState {
    queue: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: FxHashMap<u64, Task>,
    running: Option<u64>,
    next_id: u64,
    stopped: bool,
}

#[derive(Default)]
struct CronShared {
    state: Mutex<CronState>,
    wakeup: Condvar,
    finished: Condvar,
}

/// Timer service with one worker thread.
pub struct Cron {
    shared: Arc<CronShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Cron {
    /// Spawns the worker thread.
    pub fn start() -> Self {
        let shared = Arc::new(CronShared::default());
        let worker_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || Self::worker_loop(worker_shared));
        debug!("cron.start");
        Self {
            shared,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Schedules `task` to run once after `delay`.
    pub fn add_task<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let due = Instant::now() + delay;
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.insert(id, Box::new(task));
        state.queue.push(Reverse((due, id)));
        trace!(task = id, delay_ms = delay.as_millis() as u64, "cron.add_task");
        self.shared.wakeup.notify_one();
        TaskHandle(id)
    }

    /// Cancels a task. A task that is already running is waited for.
    ///
    /// Returns true when the task was cancelled before it started. Must not be
    /// called from inside the task itself.
    pub fn abort_task(&self, handle: TaskHandle) -> bool {
        let mut state = self.shared.state.lock();
        if state.tasks.remove(&handle.0).is_some() {
            trace!(task = handle.0, "cron.abort_task");
            return true;
        }
        while state.running == Some(handle.0) {
            self.shared.finished.wait(&mut state);
        }
        false
    }

    /// Stops the worker. Tasks that have not started are dropped.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.tasks.clear();
            state.queue.clear();
            self.shared.wakeup.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                debug!("cron worker panicked");
            }
        }
        debug!("cron.stop");
    }

    fn worker_loop(shared: Arc<CronShared>) {
        let mut state = shared.state.lock();
        loop {
            if state.stopped {
                break;
            }
            let Some(&Reverse((due, id))) = state.queue.peek() else {
                shared.wakeup.wait(&mut state);
                continue;
            };
            if due > Instant::now() {
                shared.wakeup.wait_until(&mut state, due);
                continue;
            }
            state.queue.pop();
            let Some(task) = state.tasks.remove(&id) else {
                // Aborted.
                continue;
            };
            state.running = Some(id);
            MutexGuard::unlocked(&mut state, task);
            state.running = None;
            shared.finished.notify_all();
        }
    }
}

impl Drop for Cron {
    fn drop(&mut self) {
        self.stop();
    }
}
