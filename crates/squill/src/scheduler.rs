//! Deferred-callback scheduler.
//!
//! Accepts `(delay, callback)` pairs and returns a unique cancellation
//! token. A single dispatcher thread sleeps on a min-heap keyed by
//! `(deadline, insertion id)`, wakes at the nearest deadline, and fires due
//! callbacks on separately spawned worker threads so a slow callback never
//! delays the next deadline. Cancellation tombstones the entry; the heap
//! pops and discards it when it reaches the front.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Condvar, Mutex, OnceLock,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    thread,
    time::{Duration, Instant},
};

use ahash::AHashSet;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    deadline: Instant,
    id: u64,
    job: Option<Job>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the binary max-heap pops the nearest deadline first;
        // insertion id breaks ties deterministically
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// The process-wide scheduler. Created lazily; the dispatcher thread lives
/// for the rest of the process.
pub struct Scheduler {
    heap: Mutex<BinaryHeap<Entry>>,
    wakeup: Condvar,
    next_id: AtomicU64,
    tombstones: Mutex<AHashSet<u64>>,
}

impl Scheduler {
    fn new() -> &'static Self {
        let scheduler: &'static Self = Box::leak(Box::new(Self {
            heap: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            next_id: AtomicU64::new(1),
            tombstones: Mutex::new(AHashSet::new()),
        }));
        thread::Builder::new()
            .name("squill-scheduler".to_owned())
            .spawn(move || scheduler.dispatch_loop())
            .expect("spawning the scheduler dispatcher");
        scheduler
    }

    /// Schedules `job` to run after `delay`; returns the cancellation token.
    pub fn schedule(&self, delay: Duration, job: Job) -> u64 {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let entry = Entry {
            deadline: Instant::now() + delay,
            id,
            job: Some(job),
        };
        self.heap.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(entry);
        self.wakeup.notify_one();
        id
    }

    /// Marks a token cancelled. The entry stays in the heap and is discarded
    /// when it reaches the front.
    pub fn cancel(&self, token: u64) -> bool {
        self.tombstones
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(token)
    }

    fn dispatch_loop(&self) {
        let mut heap = self.heap.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            let now = Instant::now();
            match heap.peek() {
                None => {
                    heap = self.wakeup.wait(heap).unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                Some(front) if front.deadline <= now => {
                    let Some(mut entry) = heap.pop() else { continue };
                    let cancelled = self
                        .tombstones
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .remove(&entry.id);
                    if cancelled {
                        continue;
                    }
                    if let Some(job) = entry.job.take() {
                        // worker threads own their panics; one failing
                        // callback must not take down the dispatcher
                        thread::Builder::new()
                            .name("squill-timer".to_owned())
                            .spawn(move || {
                                if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                                    let message = panic
                                        .downcast_ref::<&str>()
                                        .map_or("non-string panic payload", |s| s);
                                    eprintln!("scheduler callback panicked: {message}");
                                }
                            })
                            .ok();
                    }
                }
                Some(front) => {
                    let wait = front.deadline.saturating_duration_since(now);
                    let (guard, _) = self
                        .wakeup
                        .wait_timeout(heap, wait)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    heap = guard;
                }
            }
        }
    }
}

static SCHEDULER: OnceLock<&'static Scheduler> = OnceLock::new();

/// The default process-wide scheduler.
pub fn global() -> &'static Scheduler {
    SCHEDULER.get_or_init(Scheduler::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering as AO},
    };

    #[test]
    fn fires_in_deadline_order() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let scheduler = global();
        for (delay_ms, label) in [(60u64, "late"), (10, "early")] {
            let hits = hits.clone();
            scheduler.schedule(
                Duration::from_millis(delay_ms),
                Box::new(move || {
                    hits.lock().unwrap().push(label);
                }),
            );
        }
        thread::sleep(Duration::from_millis(200));
        assert_eq!(*hits.lock().unwrap(), vec!["early", "late"]);
    }

    #[test]
    fn cancelled_entries_never_fire() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = global();
        let counter = count.clone();
        let token = scheduler.schedule(
            Duration::from_millis(30),
            Box::new(move || {
                counter.fetch_add(1, AO::SeqCst);
            }),
        );
        assert!(scheduler.cancel(token));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(AO::SeqCst), 0);
    }

    #[test]
    fn a_panicking_callback_does_not_stop_dispatch() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = global();
        scheduler.schedule(Duration::from_millis(10), Box::new(|| panic!("boom")));
        let counter = count.clone();
        scheduler.schedule(
            Duration::from_millis(40),
            Box::new(move || {
                counter.fetch_add(1, AO::SeqCst);
            }),
        );
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(AO::SeqCst), 1);
    }
}
