//! # Progress: Per-Run Segment Counter and Progress Bar
//!
//! Tracks how many segments of one sieve run are fully processed. Workers
//! bump the counter with an atomic `fetch_add`, so concurrent completions are
//! never lost. The optional textual bar is drawn through a mutex-guarded
//! writer; the counter is re-read under that lock, which keeps the drawn
//! percentage monotonic even when workers finish out of order.
//!
//! Bar layout: `\r[=====>    ] 42.00% completed`, 50 cells wide.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

pub const BAR_WIDTH: usize = 50;

pub struct Progress {
    completed: AtomicUsize,
    total: usize,
    bar: Option<Mutex<Box<dyn Write + Send>>>,
}

impl Progress {
    /// Counter only, nothing is drawn.
    pub fn new(total: usize) -> Self {
        Progress {
            completed: AtomicUsize::new(0),
            total,
            bar: None,
        }
    }

    pub fn with_output<W: Write + Send + 'static>(total: usize, out: W) -> Self {
        Progress {
            completed: AtomicUsize::new(0),
            total,
            bar: Some(Mutex::new(Box::new(out))),
        }
    }

    pub fn stderr(total: usize) -> Self {
        Self::with_output(total, io::stderr())
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn percent(&self) -> f64 {
        percent(self.completed(), self.total)
    }

    /// Count one finished segment and redraw. Returns the new count.
    pub fn record_segment(&self) -> usize {
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        self.draw();
        done
    }

    fn draw(&self) {
        let Some(bar) = &self.bar else {
            return;
        };
        let mut out = bar.lock().unwrap_or_else(PoisonError::into_inner);
        let line = render_bar(self.completed(), self.total);
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
            debug!(error = %e, "progress bar write failed");
        }
    }

    /// Terminate the bar line once the run is over.
    pub fn finish(&self) {
        let Some(bar) = &self.bar else {
            return;
        };
        let mut out = bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(b"\n").and_then(|_| out.flush()) {
            debug!(error = %e, "progress bar write failed");
        }
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    100.0 * done as f64 / total as f64
}

/// One frame of the progress bar for `done` out of `total` segments.
pub fn render_bar(done: usize, total: usize) -> String {
    let progress = percent(done, total);
    let pos = (BAR_WIDTH as f64 * progress / 100.0) as usize;

    let mut line = String::with_capacity(BAR_WIDTH + 24);
    line.push_str("\r[");
    for i in 0..BAR_WIDTH {
        line.push(match i.cmp(&pos) {
            std::cmp::Ordering::Less => '=',
            std::cmp::Ordering::Equal => '>',
            std::cmp::Ordering::Greater => ' ',
        });
    }
    line.push_str(&format!("] {progress:.2}% completed"));
    line
}
