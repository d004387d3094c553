//! A single-threaded, ordered work-item loop with timer support.

use std::collections::{BinaryHeap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{EventExecutor, Task};
use crate::error::Error;

/// One named OS thread draining a FIFO queue of work items.
///
/// Ordering: immediate work items run strictly in submission order. Delayed
/// work items enter the queue once due, ordered by deadline with submission
/// order as the tie-break.
///
/// Shutdown is graceful: the queue is drained before the thread exits, while
/// not-yet-due timers are discarded. Work items submitted after shutdown are
/// rejected with a rejected-kind error so submitters holding a completion
/// token can fail it instead of losing the completion.
pub struct SingleThreadExecutor {
    shared: Arc<LoopShared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

struct LoopShared {
    state: Mutex<LoopState>,
    wakeup: Condvar,
}

struct LoopState {
    queue: VecDeque<Task>,
    timers: BinaryHeap<TimerEntry>,
    next_generation: u64,
    shutdown: bool,
}

struct TimerEntry {
    deadline: Instant,
    generation: u64,
    task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl SingleThreadExecutor {
    /// Spawns the loop thread and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn(name: impl Into<String>) -> Result<Arc<Self>, Error> {
        let name = name.into();
        let shared = Arc::new(LoopShared {
            state: Mutex::new(LoopState {
                queue: VecDeque::new(),
                timers: BinaryHeap::new(),
                next_generation: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(&loop_shared))
            .map_err(Error::from)?;
        let thread_id = handle.thread().id();

        Ok(Arc::new(Self {
            shared,
            thread_id,
            handle: Mutex::new(Some(handle)),
            name,
        }))
    }

    /// The loop thread's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the loop to drain its queue and exit. Idempotent; does not wait.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        drop(state);
        self.shared.wakeup.notify_one();
    }

    /// Blocks until the loop thread has exited. Call after [`Self::shutdown`].
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(executor = %self.name, "event loop thread panicked");
            }
        }
    }
}

impl EventExecutor for SingleThreadExecutor {
    fn execute(&self, task: Task) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            drop(state);
            return Err(Error::rejected(format!(
                "executor {} is shut down",
                self.name
            )));
        }
        state.queue.push_back(task);
        drop(state);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    fn schedule(&self, delay: Duration, task: Task) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            drop(state);
            return Err(Error::rejected(format!(
                "executor {} is shut down",
                self.name
            )));
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        state.timers.push(TimerEntry {
            deadline: Instant::now() + delay,
            generation,
            task,
        });
        drop(state);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    fn in_event_loop(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl std::fmt::Debug for SingleThreadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadExecutor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn run_loop(shared: &LoopShared) {
    let mut state = shared.state.lock();
    loop {
        let now = Instant::now();
        while state
            .timers
            .peek()
            .is_some_and(|entry| entry.deadline <= now)
        {
            if let Some(entry) = state.timers.pop() {
                state.queue.push_back(entry.task);
            }
        }

        if let Some(task) = state.queue.pop_front() {
            drop(state);
            run_task(task);
            state = shared.state.lock();
            continue;
        }

        if state.shutdown {
            // Queue drained; pending timers are discarded on shutdown.
            return;
        }

        match state.timers.peek().map(|entry| entry.deadline) {
            Some(deadline) => {
                let _ = shared.wakeup.wait_until(&mut state, deadline);
            }
            None => shared.wakeup.wait(&mut state),
        }
    }
}

fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        // A panicking work item must not take the whole loop down with it.
        tracing::error!("work item panicked; event loop continues");
    }
}
