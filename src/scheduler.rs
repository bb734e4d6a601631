//! Shared periodic-task facility driving lease heartbeats.
//!
//! One [`RenewalScheduler`] is created per process and handed to every lock
//! (and to the registry's idle sweep). A fixed pool of worker threads pops
//! due tasks from a deadline heap.
//!
//! A task is taken out of the queue while it runs and only re-queued after
//! its tick returns, so ticks of the same task never overlap even with
//! several workers. Scheduling is fixed-rate without catch-up: a tick that
//! overruns its period is followed by the next one immediately, not by a
//! burst of missed ticks.

use crate::error::{LeaseError, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// What a periodic task wants after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Run again after another period.
    Continue,
    /// Cancel the task.
    Stop,
}

type Job = Box<dyn FnMut() -> TickOutcome + Send>;

struct Slot {
    period: Duration,
    /// `None` while a worker is running the tick.
    job: Option<Job>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct Queue {
    due: BinaryHeap<Reverse<(Instant, u64)>>,
    slots: HashMap<u64, Slot>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

/// Pool of worker threads running periodic tasks.
pub struct RenewalScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RenewalScheduler {
    /// Start a scheduler with `workers` threads (at least one).
    pub fn new(workers: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wakeup: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("leasehold-renewal-{}", i))
                .spawn(move || worker_loop(&shared))
                .map_err(|e| LeaseError::Scheduler(format!("failed to spawn worker: {}", e)))?;
            handles.push(handle);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// Run `job` every `period`, first after `period` has elapsed.
    pub fn schedule_at_fixed_rate<F>(&self, period: Duration, job: F) -> Result<TaskHandle>
    where
        F: FnMut() -> TickOutcome + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return Err(LeaseError::Scheduler(
                "renewal scheduler has been shut down".to_string(),
            ));
        }

        let id = queue.next_id;
        queue.next_id += 1;
        queue.slots.insert(
            id,
            Slot {
                period,
                job: Some(Box::new(job)),
                cancelled: Arc::clone(&cancelled),
            },
        );
        queue.due.push(Reverse((Instant::now() + period, id)));
        drop(queue);

        self.shared.wakeup.notify_one();

        Ok(TaskHandle {
            id,
            cancelled,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Number of tasks scheduled and not yet cancelled or stopped.
    pub fn active_tasks(&self) -> usize {
        self.shared.queue.lock().slots.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.lock().shutdown
    }

    /// Stop all workers and drop every pending task. Idempotent.
    ///
    /// A tick that is running when this is called completes first.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if !queue.shutdown {
                debug!(tasks = queue.slots.len(), "shutting down renewal scheduler");
            }
            queue.shutdown = true;
            queue.slots.clear();
            queue.due.clear();
        }
        self.shared.wakeup.notify_all();

        let current = thread::current().id();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            // A task shutting the scheduler down cannot join its own worker
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("RenewalScheduler")
            .field("tasks", &queue.slots.len())
            .field("shutdown", &queue.shutdown)
            .finish()
    }
}

/// Handle to a scheduled task.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
    shared: Weak<Shared>,
}

impl TaskHandle {
    /// Cancel the task. A tick already running completes; no further tick
    /// starts. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(shared) = self.shared.upgrade() {
            let mut queue = shared.queue.lock();
            // A running tick has taken its job; the worker drops the slot
            if queue.slots.get(&self.id).is_some_and(|slot| slot.job.is_some()) {
                queue.slots.remove(&self.id);
            }
        }
    }

    /// Cancelled through this handle (or by the task stopping itself).
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Still scheduled: not cancelled, not stopped, scheduler alive.
    pub fn is_active(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.queue.lock().slots.contains_key(&self.id))
    }
}

fn worker_loop(shared: &Shared) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            return;
        }

        let Some(&Reverse((due, id))) = queue.due.peek() else {
            shared.wakeup.wait(&mut queue);
            continue;
        };

        if due > Instant::now() {
            shared.wakeup.wait_until(&mut queue, due);
            continue;
        }
        queue.due.pop();

        let Some(slot) = queue.slots.get_mut(&id) else {
            continue; // cancelled
        };
        let Some(job) = slot.job.take() else {
            continue;
        };
        let period = slot.period;
        let cancelled = Arc::clone(&slot.cancelled);

        let outcome = run_tick(&mut queue, job, id);
        reschedule(&mut queue, id, due, period, &cancelled, outcome);
    }
}

/// Run one tick with the queue unlocked. Returns the job if the task
/// should continue.
fn run_tick(queue: &mut MutexGuard<'_, Queue>, mut job: Job, id: u64) -> Option<Job> {
    let outcome = MutexGuard::unlocked(queue, || catch_unwind(AssertUnwindSafe(|| job())));
    match outcome {
        Ok(TickOutcome::Continue) => Some(job),
        Ok(TickOutcome::Stop) => None,
        Err(_) => {
            error!(task = id, "periodic task panicked; cancelling it");
            None
        }
    }
}

fn reschedule(
    queue: &mut Queue,
    id: u64,
    due: Instant,
    period: Duration,
    cancelled: &AtomicBool,
    job: Option<Job>,
) {
    let keep = job.is_some() && !cancelled.load(Ordering::SeqCst) && !queue.shutdown;
    if !keep {
        cancelled.store(true, Ordering::SeqCst);
        queue.slots.remove(&id);
        return;
    }

    let Some(slot) = queue.slots.get_mut(&id) else {
        return;
    };
    slot.job = job;
    let next = (due + period).max(Instant::now());
    queue.due.push(Reverse((next, id)));
}
