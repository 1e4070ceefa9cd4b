//! Background delivery of events
//!
//! The dispatcher decides *where* a delivery runs. Callers hand it a job and
//! return immediately (except under pool saturation, see below); the job
//! runs exactly once and its failures never reach the caller.
//!
//! ## Strategies
//!
//! | Strategy | Runs on | Ordering |
//! |----------|---------|----------|
//! | [`Strategy::Synchronous`] | calling thread | submission order |
//! | [`Strategy::SingleWorker`] | one background thread, FIFO | submission order |
//! | [`Strategy::BoundedPool`] | `min..=max` worker threads | none |
//!
//! The bounded pool never buffers: a job is handed to an idle worker, or a
//! new worker is started if the pool is below `max`, or the job runs on the
//! calling thread (caller-runs). Nothing is dropped; a saturated pool slows
//! the submitter down instead.

mod pool;
mod worker;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::{DispatchConfig, Environment};
use crate::connection::Transport;
use crate::event::Event;

use self::pool::Pool;
use self::worker::SingleWorker;

/// A unit of background work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long workers above the pool minimum wait for work before exiting
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Execution strategy for deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Run on the calling thread. Deterministic; meant for tests.
    Synchronous,
    /// One background thread draining a FIFO queue
    SingleWorker,
    /// Elastic pool with zero-buffer hand-off and caller-runs fallback
    BoundedPool { min: usize, max: usize },
}

impl Strategy {
    pub const DEFAULT_POOL: Strategy = Strategy::BoundedPool { min: 1, max: 10 };

    /// Strategy for a deployment environment; unknown or missing
    /// environments get the production pool.
    pub fn for_environment(env: Option<&Environment>) -> Self {
        match env {
            Some(Environment::Test) => Strategy::Synchronous,
            Some(Environment::Development) => Strategy::SingleWorker,
            _ => Strategy::DEFAULT_POOL,
        }
    }

    /// Strategy for the environment named by the process environment
    pub fn detect() -> Self {
        Self::for_environment(Environment::detect().as_ref())
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::DEFAULT_POOL
    }
}

enum Executor {
    Immediate,
    Single(SingleWorker),
    Pool(Pool),
}

/// Runs deliveries according to a [`Strategy`]
pub struct Dispatcher {
    strategy: Strategy,
    executor: Executor,
}

impl Dispatcher {
    pub fn new(strategy: Strategy) -> Self {
        Self::with_keep_alive(strategy, DEFAULT_KEEP_ALIVE)
    }

    /// Like [`Dispatcher::new`], with a custom idle timeout for pool workers
    pub fn with_keep_alive(strategy: Strategy, keep_alive: Duration) -> Self {
        let executor = match strategy {
            Strategy::Synchronous => Executor::Immediate,
            Strategy::SingleWorker => match SingleWorker::spawn() {
                Ok(worker) => Executor::Single(worker),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to start dispatch worker, delivering inline");
                    Executor::Immediate
                }
            },
            Strategy::BoundedPool { min, max } => Executor::Pool(Pool::new(min, max, keep_alive)),
        };

        tracing::debug!(?strategy, "Dispatcher started");
        Self { strategy, executor }
    }

    /// Dispatcher for the `[dispatch]` config section, resolving `auto`
    /// mode against the detected environment
    pub fn from_config(config: &DispatchConfig) -> Self {
        let strategy = config.strategy(Environment::detect().as_ref());
        Self::with_keep_alive(strategy, config.keep_alive())
    }

    /// Process-wide dispatcher, created on first use from the detected
    /// environment and reused afterwards.
    pub fn shared() -> Arc<Dispatcher> {
        static SHARED: OnceLock<Arc<Dispatcher>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Dispatcher::new(Strategy::detect()))))
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Schedules `job` to run exactly once.
    pub fn submit(&self, job: Job) {
        match &self.executor {
            Executor::Immediate => run_guarded(job),
            Executor::Single(worker) => worker.submit(job),
            Executor::Pool(pool) => pool.submit(job),
        }
    }

    /// Schedules delivery of `event` to `target`.
    pub fn dispatch(&self, target: &Arc<dyn Transport>, event: Event) {
        let target = Arc::clone(target);
        self.submit(Box::new(move || target.deliver(&event)));
    }

    /// Waits for queued deliveries and stops background threads.
    ///
    /// Jobs submitted afterwards run on the calling thread.
    pub fn shutdown(&self) {
        match &self.executor {
            Executor::Immediate => {}
            Executor::Single(worker) => worker.shutdown(),
            Executor::Pool(pool) => pool.shutdown(),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Runs a job, containing any panic so it never reaches the submitter or
/// kills a worker.
pub(crate) fn run_guarded(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!(panic = panic_message(&*payload), "Event delivery panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
