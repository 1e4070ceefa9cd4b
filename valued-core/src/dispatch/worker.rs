//! Single background thread draining a FIFO queue

use std::io;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{run_guarded, Job};

pub(crate) struct SingleWorker {
    /// `None` once shut down
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SingleWorker {
    pub(crate) fn spawn() -> io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let handle = thread::Builder::new()
            .name("valued-dispatch".to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    run_guarded(job);
                }
                tracing::debug!("Dispatch worker stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn submit(&self, job: Job) {
        let rejected = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).err().map(|e| e.0),
            None => Some(job),
        };

        if let Some(job) = rejected {
            tracing::debug!("Dispatch worker stopped, delivering inline");
            run_guarded(job);
        }
    }

    /// Closes the queue and waits for the worker to drain it.
    pub(crate) fn shutdown(&self) {
        // Dropping the sender ends the worker loop once the queue is empty
        self.sender.lock().take();

        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("Dispatch worker panicked");
        }
    }
}
