//! Parallel batch verification. Jobs are pulled by a fixed pool of worker
//! threads and by the thread waiting on the batch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use lccd_log::{log_category, Category};

/// One unit of verification work.
pub trait Check: Send + 'static {
    fn check(self) -> bool;
}

struct QueueState<T> {
    queue: Vec<T>,
    /// Threads parked waiting for work.
    idle: usize,
    /// Threads currently inside the service loop.
    total: usize,
    all_ok: bool,
    /// Jobs added but not yet finished, including ones being run.
    todo: usize,
    stopped: bool,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    worker_cv: Condvar,
    master_cv: Condvar,
    control_active: AtomicBool,
    batch_size: usize,
}

impl<T: Check> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait_on<'a>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'a, QueueState<T>>,
    ) -> MutexGuard<'a, QueueState<T>> {
        cv.wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The service loop. Workers run it until stopped; the master runs it until
    /// every job of the current batch is accounted for and returns the verdict.
    fn run(&self, master: bool) -> bool {
        let mut taken = 0usize;
        let mut ok = true;
        let mut jobs: Vec<T> = Vec::with_capacity(self.batch_size);
        loop {
            let mut state = self.lock();
            if taken > 0 {
                state.all_ok &= ok;
                state.todo -= taken;
                if state.todo == 0 && !master {
                    self.master_cv.notify_one();
                }
            } else {
                state.total += 1;
            }
            loop {
                if state.stopped {
                    if !master {
                        state.total -= 1;
                        return false;
                    }
                    if !state.queue.is_empty() {
                        let dropped = state.queue.len();
                        state.queue.clear();
                        state.todo -= dropped;
                        state.all_ok = false;
                        log_category!(
                            Category::CheckQueue,
                            "check queue stopped with {dropped} jobs pending"
                        );
                    }
                }
                if !state.queue.is_empty() {
                    break;
                }
                if master && state.todo == 0 {
                    state.total -= 1;
                    let verdict = state.all_ok;
                    state.all_ok = true;
                    return verdict;
                }
                state.idle += 1;
                state = if master {
                    self.wait_on(&self.master_cv, state)
                } else {
                    self.wait_on(&self.worker_cv, state)
                };
                state.idle -= 1;
            }
            let share = state.queue.len() / (state.total + state.idle + 1);
            taken = share.min(self.batch_size).max(1);
            let keep = state.queue.len() - taken;
            jobs.extend(state.queue.drain(keep..));
            ok = state.all_ok;
            drop(state);

            for job in jobs.drain(..) {
                if ok {
                    ok = catch_unwind(AssertUnwindSafe(|| job.check())).unwrap_or(false);
                }
            }
        }
    }
}

pub struct CheckQueue<T: Check> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Check> CheckQueue<T> {
    /// Starts `threads` workers. With zero workers the waiting thread does all
    /// of the work.
    pub fn new(threads: usize, batch_size: usize) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: Vec::new(),
                idle: 0,
                total: 0,
                all_ok: true,
                todo: 0,
                stopped: false,
            }),
            worker_cv: Condvar::new(),
            master_cv: Condvar::new(),
            control_active: AtomicBool::new(false),
            batch_size: batch_size.max(1),
        });
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("scriptcheck.{index}"))
                .spawn(move || {
                    worker_shared.run(false);
                })?;
            workers.push(handle);
        }
        Ok(Self { shared, workers })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Opens the control for a new batch.
    ///
    /// # Panics
    ///
    /// Panics if another control on this queue is still alive.
    pub fn control(&self) -> CheckQueueControl<'_, T> {
        if self.shared.control_active.swap(true, Ordering::AcqRel) {
            panic!("check queue control already active");
        }
        CheckQueueControl {
            shared: &self.shared,
            done: false,
        }
    }

    /// Wakes every worker and waiter. Workers exit; a batch that has not
    /// drained reports failure.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        state.stopped = true;
        drop(state);
        self.shared.worker_cv.notify_all();
        self.shared.master_cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }
}

impl<T: Check> Drop for CheckQueue<T> {
    fn drop(&mut self) {
        self.stop();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Scoped access to a [`CheckQueue`] for one batch. Dropping it without
/// calling [`wait`](Self::wait) waits implicitly.
pub struct CheckQueueControl<'a, T: Check> {
    shared: &'a Arc<Shared<T>>,
    done: bool,
}

impl<T: Check> CheckQueueControl<'_, T> {
    pub fn add(&mut self, jobs: Vec<T>) {
        if jobs.is_empty() {
            return;
        }
        let count = jobs.len();
        let mut state = self.shared.lock();
        state.queue.extend(jobs);
        state.todo += count;
        drop(state);
        if count == 1 {
            self.shared.worker_cv.notify_one();
        } else {
            self.shared.worker_cv.notify_all();
        }
    }

    /// Runs jobs on this thread until the batch is finished. True only when
    /// every job passed.
    pub fn wait(&mut self) -> bool {
        let verdict = self.shared.run(true);
        self.done = true;
        verdict
    }
}

impl<T: Check> Drop for CheckQueueControl<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.wait();
        }
        self.shared.control_active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Counted {
        verdict: bool,
        runs: Arc<AtomicUsize>,
    }

    impl Check for Counted {
        fn check(self) -> bool {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.verdict
        }
    }

    struct Slow(Duration);

    impl Check for Slow {
        fn check(self) -> bool {
            thread::sleep(self.0);
            true
        }
    }

    struct Panicking;

    impl Check for Panicking {
        fn check(self) -> bool {
            panic!("job panicked");
        }
    }

    fn jobs(count: usize, runs: &Arc<AtomicUsize>) -> Vec<Counted> {
        (0..count)
            .map(|_| Counted {
                verdict: true,
                runs: Arc::clone(runs),
            })
            .collect()
    }

    #[test]
    fn all_true_batches_pass_for_any_pool_size() {
        for threads in [0usize, 1, 3, 8] {
            let queue = CheckQueue::new(threads, 16).expect("queue");
            let runs = Arc::new(AtomicUsize::new(0));
            for round in 1..=4usize {
                let mut control = queue.control();
                for _ in 0..round {
                    control.add(jobs(37, &runs));
                }
                assert!(control.wait(), "threads={threads} round={round}");
            }
            assert_eq!(runs.load(Ordering::SeqCst), 37 * 10);
        }
    }

    #[test]
    fn single_false_job_fails_batch_and_next_batch_is_clean() {
        let queue = CheckQueue::new(4, 8).expect("queue");
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let mut control = queue.control();
            let mut batch = jobs(200, &runs);
            batch[117].verdict = false;
            control.add(batch);
            assert!(!control.wait());
        }
        let mut control = queue.control();
        control.add(jobs(10, &runs));
        assert!(control.wait());
    }

    #[test]
    fn panicking_job_counts_as_failure() {
        let queue = CheckQueue::new(2, 4).expect("queue");
        let mut control = queue.control();
        control.add(vec![Panicking]);
        assert!(!control.wait());
    }

    #[test]
    fn dropping_control_waits() {
        let queue = CheckQueue::new(2, 4).expect("queue");
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let mut control = queue.control();
            control.add(jobs(50, &runs));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 50);
    }

    #[test]
    #[should_panic(expected = "already active")]
    fn second_control_panics() {
        let queue: CheckQueue<Slow> = CheckQueue::new(0, 4).expect("queue");
        let _first = queue.control();
        let _second = queue.control();
    }

    #[test]
    fn stop_drains_without_deadlock() {
        let queue = Arc::new(CheckQueue::new(2, 1).expect("queue"));
        let stopper = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });
        let mut control = queue.control();
        control.add(
            (0..400)
                .map(|_| Slow(Duration::from_millis(2)))
                .collect(),
        );
        assert!(!control.wait());
        drop(control);
        handle.join().expect("stopper");
        assert!(queue.is_stopped());
    }
}
