//! Worker threads for row regeneration and prefetch.
//!
//! Two shapes of pool:
//! - [`Workers`]: persistent named threads fed by a crossbeam channel. One
//!   per composite, used for asynchronous prefetch of the next row.
//! - [`run_batch`]: scoped, bounded fan-out over a finite job list. Used by
//!   row regeneration; borrows the row's tiles without `'static` bounds and
//!   returns once every job has run.
//!
//! Both keep running after a job fails. `run_batch` hands back the first
//! error only.

use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{error, trace};

use crate::error::{Result, StitchError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default regeneration fan-out: half the logical cores, rounded up
pub fn default_threads() -> usize {
    num_cpus::get().div_ceil(2).max(1)
}

/// Persistent worker pool.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(1, "prefetch")?;
/// workers.execute(move || {
///     if let Err(e) = row.regenerate(&ctx) {
///         log::warn!("Prefetch failed: {}", e);
///     }
/// });
/// ```
pub struct Workers {
    sender: Option<Sender<Job>>, // None once shutting down
    handles: Vec<thread::JoinHandle<()>>,
}

impl Workers {
    /// Spawn `num_threads` workers named `stitcha-<label>-<n>`.
    pub fn new(num_threads: usize, label: &str) -> Result<Self> {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = unbounded();
        let mut handles = Vec::with_capacity(num_threads);

        for worker_id in 0..num_threads.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("stitcha-{}-{}", label, worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    // Ends when every sender is dropped
                    for job in receiver.iter() {
                        job();
                    }
                    trace!("Worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads ({})", handles.len(), label);

        Ok(Self {
            sender: Some(sender),
            handles,
        })
    }

    /// Queue a closure; runs asynchronously on one of the workers.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(Box::new(f)).is_err() {
            error!("Worker pool is gone, job dropped");
        }
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        // Closing the channel lets queued jobs drain, then workers exit
        self.sender.take();
        for handle in std::mem::take(&mut self.handles) {
            if handle.join().is_err() {
                error!("Worker panicked during shutdown");
            }
        }

        trace!("All {} workers stopped", num_threads);
    }
}

/// Run every job on at most `threads` scoped workers.
///
/// All jobs run even if some fail; the first error observed is returned.
/// Jobs may borrow from the caller's stack.
pub fn run_batch<'a, F>(jobs: Vec<F>, threads: usize) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'a,
{
    if jobs.is_empty() {
        return Ok(());
    }
    let threads = threads.clamp(1, jobs.len());

    let (sender, receiver) = unbounded::<F>();
    for job in jobs {
        // Receiver is alive; send on an unbounded channel cannot fail
        let _ = sender.send(job);
    }
    drop(sender);

    let first_error: Mutex<Option<StitchError>> = Mutex::new(None);
    let record = |e: StitchError| {
        let mut slot = first_error.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(e);
        }
    };

    thread::scope(|s| {
        let mut spawned = 0;
        for worker_id in 0..threads {
            let receiver = receiver.clone();
            let record = &record;
            let spawn = thread::Builder::new()
                .name(format!("stitcha-cell-{}", worker_id))
                .spawn_scoped(s, move || {
                    for job in receiver.iter() {
                        if let Err(e) = job() {
                            record(e);
                        }
                    }
                });
            match spawn {
                Ok(_) => spawned += 1,
                Err(e) => {
                    record(e.into());
                    break;
                }
            }
        }
        // Could not start any thread: drain on the caller's thread
        if spawned == 0 {
            for job in receiver.iter() {
                if let Err(e) = job() {
                    record(e);
                }
            }
        }
    });

    match first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
