//! Dispatch policies.  The partitioner hands every unit of work --
//! subdivision step or leaf tile -- to a dispatcher and lets the policy
//! decide where it runs.
//!
//! `ForkJoinDispatcher` reproduces the unbounded model: one scoped
//! thread per unit, the caller blocked until the whole batch (and,
//! transitively, the whole subtree) finishes.  `PooledDispatcher`
//! reproduces the bounded model: fire-and-forget submission to a fixed
//! worker pool, with synchronous execution as the fallback whenever the
//! pool refuses the work.  Neither policy ever drops a unit.

use crossbeam;
use engine::{Engine, Work};
use pool::{Job, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

/// A work-dispatch policy.  `dispatch` receives whole batches because
/// the fork/join policy must start a level's four quadrants before it
/// joins any of them.
pub trait Dispatch: Send + Sync {
    /// Run a batch of units under this policy.  Whether the call blocks
    /// until they finish is the policy's defining property.
    fn dispatch(&self, engine: &Arc<Engine>, batch: Vec<Work>);

    /// Release whatever execution resources the policy owns, granting
    /// in-flight work up to `grace` to finish.
    fn shutdown(&self, grace: Duration);
}

/// One scoped thread per unit; the dispatching call returns only when
/// every unit in the batch has completed.
pub struct ForkJoinDispatcher;

impl ForkJoinDispatcher {
    /// Constructor.
    pub fn new() -> ForkJoinDispatcher {
        ForkJoinDispatcher
    }
}

impl Dispatch for ForkJoinDispatcher {
    fn dispatch(&self, engine: &Arc<Engine>, batch: Vec<Work>) {
        let joined = crossbeam::scope(|spawner| {
            for work in batch {
                let engine = Arc::clone(engine);
                let pending = Engine::begin_unit(&engine);
                spawner.spawn(move |_| {
                    let _pending = pending;
                    Engine::run_unit(&engine, work);
                });
            }
        });
        // A panicked worker surfaces here after its siblings have
        // joined; the branch is abandoned, its pixels stay background.
        if joined.is_err() {
            warn!("a render worker panicked; abandoning that branch");
        }
    }

    fn shutdown(&self, _grace: Duration) {}
}

/// Fire-and-forget submission to a fixed-size worker pool.  The
/// dispatching call never blocks: refused units run on the calling
/// thread instead.
pub struct PooledDispatcher {
    pool: WorkerPool,
}

impl PooledDispatcher {
    /// Constructor; starts a pool of `size` workers.
    pub fn new(size: usize) -> PooledDispatcher {
        PooledDispatcher {
            pool: WorkerPool::new(size),
        }
    }

    /// Wrap an existing pool, typically one built with a custom queue
    /// depth.
    pub fn with_pool(pool: WorkerPool) -> PooledDispatcher {
        PooledDispatcher { pool }
    }

    /// The pool this dispatcher submits to.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl Dispatch for PooledDispatcher {
    fn dispatch(&self, engine: &Arc<Engine>, batch: Vec<Work>) {
        for work in batch {
            let engine = Arc::clone(engine);
            let pending = Engine::begin_unit(&engine);
            let job: Job = Box::new(move || {
                let _pending = pending;
                Engine::run_unit(&engine, work);
            });

            if self.pool.is_shutdown() {
                // The pool is draining or gone; keep making progress on
                // the caller's thread.
                job();
            } else if let Err(job) = self.pool.execute(job) {
                // Refused submission; run it here rather than lose it.
                job();
            }
        }
    }

    fn shutdown(&self, grace: Duration) {
        self.pool.shutdown(grace);
    }
}
