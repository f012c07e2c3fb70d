// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A fixed-size worker pool over a bounded job queue.  The pool moves
//! through `running`, `shutting-down`, and `terminated` exactly once;
//! while it is anything but running, every submission is refused and
//! the caller runs the job itself.  Shutdown waits for the queue to
//! drain up to a grace period and then discards whatever never started;
//! running threads cannot be killed, so past the grace period they are
//! detached and left to finish in the background.

use crossbeam::channel::{self, Receiver, Sender};
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// A unit of work the pool can run: boxed, owned, thread-safe.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool size used when the caller does not name one.
pub const DEFAULT_POOL_SIZE: usize = 20;

/// Grace period a session teardown grants queued and in-flight work.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// Queue capacity per worker.  The queue is bounded so that a flooded
// pool visibly rejects work instead of hoarding it.
const QUEUE_DEPTH: usize = 64;

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const TERMINATED: u8 = 2;

/// Where the pool is in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting submissions.
    Running,
    /// Draining; submissions are refused.
    ShuttingDown,
    /// Fully stopped; submissions are refused.
    Terminated,
}

/// A fixed set of worker threads feeding from one bounded queue.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    backlog: Receiver<Job>,
    exited: Receiver<()>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    state: AtomicU8,
    drained_clean: AtomicBool,
    workers: usize,
}

impl WorkerPool {
    /// Start a pool of `size` workers with the default queue depth.
    pub fn new(size: usize) -> WorkerPool {
        WorkerPool::with_queue_depth(size, QUEUE_DEPTH)
    }

    /// Start a pool of `size` workers whose queue holds at most
    /// `size * depth` jobs.  Small depths are a tuning (and testing)
    /// knob: they trade queue memory for more frequent rejections.
    pub fn with_queue_depth(size: usize, depth: usize) -> WorkerPool {
        let size = size.max(1);
        let (sender, receiver) = channel::bounded::<Job>(size * depth.max(1));
        let (exit_sender, exited) = channel::bounded::<()>(size);

        let mut handles = Vec::with_capacity(size);
        for n in 0..size {
            let receiver = receiver.clone();
            let exit_sender = exit_sender.clone();
            let handle = thread::Builder::new()
                .name(format!("quadbrot-worker-{}", n))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if panic::catch_unwind(panic::AssertUnwindSafe(|| job())).is_err() {
                            warn!("a pooled unit of work panicked; worker continues");
                        }
                    }
                    // Channel closed and drained; announce the exit so
                    // shutdown can count us.
                    let _ = exit_sender.send(());
                })
                .expect("could not spawn worker thread");
            handles.push(handle);
        }

        debug!("created worker pool with {} threads", size);
        WorkerPool {
            sender: Mutex::new(Some(sender)),
            backlog: receiver,
            exited,
            handles: Mutex::new(handles),
            state: AtomicU8::new(RUNNING),
            drained_clean: AtomicBool::new(false),
            workers: size,
        }
    }

    /// Where the pool is in its lifecycle.
    pub fn state(&self) -> PoolState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => PoolState::Running,
            SHUTTING_DOWN => PoolState::ShuttingDown,
            _ => PoolState::Terminated,
        }
    }

    /// True once the pool has stopped accepting submissions.
    pub fn is_shutdown(&self) -> bool {
        self.state.load(Ordering::SeqCst) != RUNNING
    }

    /// Submit a job.  On refusal -- a draining pool, a full queue, or a
    /// race with shutdown -- the job comes back in the error so the
    /// caller can run it inline instead of losing it.
    pub fn execute(&self, job: Job) -> Result<(), Job> {
        if self.is_shutdown() {
            return Err(job);
        }
        let sender = self.sender.lock().unwrap();
        match sender.as_ref() {
            None => Err(job),
            Some(sender) => sender.try_send(job).map_err(|refused| refused.into_inner()),
        }
    }

    /// Stop accepting work, wait up to `grace` for queued and in-flight
    /// jobs to finish, and discard whatever is still queued after that.
    /// Returns true when the pool drained cleanly.  Calling this on a
    /// pool that is already shutting down or terminated does nothing
    /// and reports the first call's outcome (false while that call is
    /// still draining).
    pub fn shutdown(&self, grace: Duration) -> bool {
        let flipped = self.state.compare_exchange(
            RUNNING,
            SHUTTING_DOWN,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if flipped.is_err() {
            return self.state.load(Ordering::SeqCst) == TERMINATED
                && self.drained_clean.load(Ordering::SeqCst);
        }
        info!("shutting down worker pool ({} workers)", self.workers);

        // Dropping the sender closes the queue; workers finish what is
        // queued and exit.
        self.sender.lock().unwrap().take();

        let deadline = Instant::now() + grace;
        let mut clean = true;
        for _ in 0..self.workers {
            let now = Instant::now();
            let wait = if deadline > now {
                deadline - now
            } else {
                Duration::from_millis(0)
            };
            if self.exited.recv_timeout(wait).is_err() {
                clean = false;
                break;
            }
        }

        if clean {
            for handle in self.handles.lock().unwrap().drain(..) {
                let _ = handle.join();
            }
            info!("worker pool drained and terminated");
        } else {
            let mut discarded = 0;
            while self.backlog.try_recv().is_ok() {
                discarded += 1;
            }
            warn!(
                "worker pool did not drain within {:?}; discarded {} queued units",
                grace, discarded
            );
            // The stuck workers are detached; nothing can interrupt them.
            self.handles.lock().unwrap().clear();
        }

        self.drained_clean.store(clean, Ordering::SeqCst);
        self.state.store(TERMINATED, Ordering::SeqCst);
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn pool_executes_submitted_jobs() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = counter.clone();
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_or_else(|job| job());
        }
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert_eq!(pool.state(), PoolState::Terminated);
    }

    #[test]
    fn pool_refuses_submissions_after_shutdown() {
        let pool = WorkerPool::new(1);
        assert!(pool.shutdown(Duration::from_secs(5)));
        let refused = pool.execute(Box::new(|| {}));
        assert!(refused.is_err());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = WorkerPool::new(1);
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(pool.state(), PoolState::Terminated);
    }

    #[test]
    fn shutdown_returns_within_the_grace_period_despite_a_stuck_worker() {
        let pool = WorkerPool::new(1);
        let (started_tx, started_rx) = channel::bounded::<()>(1);
        pool.execute(Box::new(move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_secs(2));
        }))
        .map_err(|_| ())
        .unwrap();
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker never started");

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        pool.execute(Box::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }))
        .map_err(|_| ())
        .unwrap();

        let begun = Instant::now();
        let clean = pool.shutdown(Duration::from_millis(100));
        assert!(!clean);
        assert!(begun.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.state(), PoolState::Terminated);
        // The queued job was discarded, not run.
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeated_shutdown_reports_the_first_outcome() {
        let pool = WorkerPool::new(1);
        let (started_tx, started_rx) = channel::bounded::<()>(1);
        pool.execute(Box::new(move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_secs(2));
        }))
        .map_err(|_| ())
        .unwrap();
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker never started");

        assert!(!pool.shutdown(Duration::from_millis(100)));
        // The pool never drained; a later call must not claim it did.
        assert!(!pool.shutdown(Duration::from_secs(5)));
        assert_eq!(pool.state(), PoolState::Terminated);
    }

    #[test]
    fn clean_shutdown_finishes_the_queue_first() {
        let pool = WorkerPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            pool.execute(Box::new(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_or_else(|job| job());
        }
        assert!(pool.shutdown(Duration::from_secs(10)));
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn a_panicking_job_does_not_kill_its_worker() {
        let pool = WorkerPool::new(1);
        pool.execute(Box::new(|| panic!("boom")))
            .map_err(|_| ())
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let flag = counter.clone();
        pool.execute(Box::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap_or_else(|job| job());
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
