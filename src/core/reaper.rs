//! Background sweeper that reclaims idle memory.
//!
//! One reaper per composite runs a sweep closure every `interval`. Dropping
//! the reaper wakes the thread immediately and joins it, so a composite never
//! outlives its sweeper nor waits a full interval on shutdown.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, trace};

use crate::error::Result;

#[derive(Debug, Default)]
struct Stop {
    flag: Mutex<bool>,
    wake: Condvar,
}

/// Periodic sweep thread, joined on drop
#[derive(Debug)]
pub struct Reaper {
    stop: Arc<Stop>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Reaper {
    /// Spawn a thread calling `sweep` every `interval` until dropped.
    pub fn spawn<F>(interval: Duration, label: &str, sweep: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(Stop::default());
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(format!("stitcha-reaper-{}", label))
            .spawn(move || {
                trace!("Reaper started (every {:?})", interval);
                let mut stopped = thread_stop.flag.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    let (guard, timeout) = thread_stop
                        .wake
                        .wait_timeout(stopped, interval)
                        .unwrap_or_else(|e| e.into_inner());
                    stopped = guard;
                    if *stopped {
                        break;
                    }
                    if timeout.timed_out() {
                        // Don't hold the stop lock while sweeping
                        drop(stopped);
                        sweep();
                        stopped = thread_stop.flag.lock().unwrap_or_else(|e| e.into_inner());
                    }
                }
                trace!("Reaper stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        *self.stop.flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.stop.wake.notify_all();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.join().is_err() {
            error!("Reaper thread panicked");
        }
    }
}
