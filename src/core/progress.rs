//! Terminal progress for long exports.
//!
//! Exports run on the calling thread; a helper thread polls a progress
//! closure every 250 ms and updates an indicatif bar. The bar is cleared
//! when the work finishes, successfully or not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Progress bar fed by polling `(value, max)`
#[derive(Debug)]
pub struct ExportProgress {
    bar: ProgressBar,
}

impl ExportProgress {
    /// Bar with a unit label (e.g. "px", "tiles")
    pub fn new(unit: &str) -> Self {
        let bar = ProgressBar::new(0);
        let template = format!(
            "[{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} ({{percent}}%) | {{elapsed_precise}} ETA {{eta}} | {{msg}}"
        );
        match ProgressStyle::default_bar().template(&template) {
            Ok(style) => bar.set_style(style.progress_chars("█▓░")),
            Err(e) => warn!("Progress bar template rejected: {}", e),
        }
        Self { bar }
    }

    /// Bar that never draws (tests, `--quiet`)
    pub fn hidden() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
        Self { bar }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.bar.set_message(msg.into());
    }

    fn update(&self, (value, max): (u64, u64)) {
        if self.bar.length() != Some(max) {
            self.bar.set_length(max);
        }
        self.bar.set_position(value.min(max));
    }

    /// Run `work` while polling `poll` in the background.
    pub fn run<T, P, W>(&self, poll: P, work: W) -> T
    where
        P: Fn() -> (u64, u64) + Sync,
        W: FnOnce() -> T,
    {
        let done = AtomicBool::new(false);
        let result = thread::scope(|s| {
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    self.update(poll());
                    thread::sleep(POLL_INTERVAL);
                }
            });
            let result = work();
            done.store(true, Ordering::Release);
            result
        });
        self.update(poll());
        self.bar.finish_and_clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_run_returns_work_result_and_tracks_final_value() {
        let counter = AtomicU64::new(0);
        let progress = ExportProgress::hidden();
        let out = progress.run(
            || (counter.load(Ordering::Relaxed), 10),
            || {
                for _ in 0..10 {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                42
            },
        );
        assert_eq!(out, 42);
        assert_eq!(progress.bar.position(), 10);
        assert_eq!(progress.bar.length(), Some(10));
    }
}
