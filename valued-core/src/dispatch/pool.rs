//! Elastic worker pool with zero-buffer hand-off and caller-runs fallback
//!
//! `idle` counts workers that are not running a job. Every job in `handoff`
//! is owed to exactly one idle worker, so `handoff.len() <= idle` always
//! holds and the queue never holds work nobody is ready to take.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{run_guarded, Job};

struct State {
    handoff: VecDeque<Job>,
    idle: usize,
    workers: usize,
    shutdown: bool,
    handles: Vec<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    work_ready: Condvar,
}

pub(crate) struct Pool {
    shared: Arc<Shared>,
    min: usize,
    max: usize,
    keep_alive: Duration,
}

impl Pool {
    pub(crate) fn new(min: usize, max: usize, keep_alive: Duration) -> Self {
        let max = max.max(1);
        let min = min.min(max);

        let pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    handoff: VecDeque::new(),
                    idle: 0,
                    workers: 0,
                    shutdown: false,
                    handles: Vec::new(),
                }),
                work_ready: Condvar::new(),
            }),
            min,
            max,
            keep_alive,
        };

        let mut state = pool.shared.state.lock();
        for _ in 0..min {
            if let Err(e) = pool.start_worker(&mut state) {
                tracing::warn!(error = %e, "Failed to start dispatch pool worker");
                break;
            }
        }
        drop(state);

        pool
    }

    pub(crate) fn submit(&self, job: Job) {
        let mut state = self.shared.state.lock();

        if !state.shutdown {
            // An idle worker without a pending job takes it
            if state.idle > state.handoff.len() {
                state.handoff.push_back(job);
                drop(state);
                self.shared.work_ready.notify_one();
                return;
            }

            // Grow: the new worker starts idle and picks the job up
            if state.workers < self.max {
                state.handoff.push_back(job);
                match self.start_worker(&mut state) {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to start dispatch pool worker");
                        let job = state.handoff.pop_back();
                        drop(state);
                        if let Some(job) = job {
                            run_guarded(job);
                        }
                        return;
                    }
                }
            }
        }

        drop(state);
        tracing::debug!("Dispatch pool saturated, delivering on caller thread");
        run_guarded(job);
    }

    /// Registers and spawns a worker. Called with the state lock held.
    fn start_worker(&self, state: &mut MutexGuard<'_, State>) -> std::io::Result<()> {
        state.handles.retain(|h| !h.is_finished());

        let shared = Arc::clone(&self.shared);
        let min = self.min;
        let keep_alive = self.keep_alive;
        let handle = thread::Builder::new()
            .name("valued-dispatch-pool".to_string())
            .spawn(move || worker_loop(shared, min, keep_alive))?;

        state.workers += 1;
        state.idle += 1;
        state.handles.push(handle);
        Ok(())
    }

    /// Lets workers drain pending hand-offs, then joins them.
    pub(crate) fn shutdown(&self) {
        let handles = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.handles)
        };
        self.shared.work_ready.notify_all();

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Dispatch pool worker panicked");
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>, min: usize, keep_alive: Duration) {
    let mut state = shared.state.lock();

    loop {
        if let Some(job) = state.handoff.pop_front() {
            state.idle -= 1;
            MutexGuard::unlocked(&mut state, || run_guarded(job));
            state.idle += 1;
            continue;
        }

        if state.shutdown {
            break;
        }

        let timed_out = shared
            .work_ready
            .wait_for(&mut state, keep_alive)
            .timed_out();
        if timed_out && state.handoff.is_empty() && state.workers > min {
            break;
        }
    }

    state.idle -= 1;
    state.workers -= 1;
    tracing::trace!(workers = state.workers, "Dispatch pool worker exiting");
}
