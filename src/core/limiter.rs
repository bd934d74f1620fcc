//! Counting semaphore for blocking threads.
//!
//! Bounds how many pyramid tiles are encoded at once. Dispatch blocks in
//! [`Limiter::acquire`] until a slot is free; the slot returns when the
//! [`Permit`] drops, even if the encode panics.
//!
//! # Usage
//!
//! ```ignore
//! let limiter = Limiter::with_defaults("pyramid");
//! std::thread::scope(|s| {
//!     for job in jobs {
//!         let permit = limiter.acquire();
//!         s.spawn(move || {
//!             let _permit = permit;
//!             job();
//!         });
//!     }
//! });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use log::trace;

/// Blocking counting semaphore with in-flight statistics
#[derive(Debug)]
pub struct Limiter {
    available: Mutex<usize>,
    freed: Condvar,
    max_permits: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    label: String,
}

impl Limiter {
    /// Limiter with `max_concurrent` slots (at least one).
    pub fn new(max_concurrent: usize, label: impl Into<String>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            available: Mutex::new(max_concurrent),
            freed: Condvar::new(),
            max_permits: max_concurrent,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            label: label.into(),
        }
    }

    /// One slot per logical core
    pub fn with_defaults(label: impl Into<String>) -> Self {
        Self::new(num_cpus::get(), label)
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        while *available == 0 {
            available = self.freed.wait(available).unwrap_or_else(|e| e.into_inner());
        }
        *available -= 1;
        drop(available);

        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
        Permit { limiter: self }
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        *available += 1;
        self.freed.notify_one();
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest concurrent use observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }
}

/// Slot held while an operation runs; released on drop
#[must_use = "the slot is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct Permit<'a> {
    limiter: &'a Limiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.limiter.release();
        trace!("{}: permit released", self.limiter.label);
    }
}
