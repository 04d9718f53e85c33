//! # Scheduler: Fixed Worker Pool over a Segment Plan
//!
//! A run moves through `Idle → Running → Draining → Done`. While `Running`,
//! each scoped worker thread claims the next segment index from a shared
//! atomic cursor, sieves it, hands the primes to the sink and bumps the
//! progress counter. The first worker to find the cursor past the end of the
//! plan switches the run to `Draining`; the run is `Done` once every worker
//! has joined.
//!
//! No lock is held while a segment is being sieved. The base-prime table is
//! shared read-only, the cursor and progress counter are atomics, and the
//! sink owns its own locking.
//!
//! ## Failures
//!
//! - A segment that cannot be written is logged and recorded; the worker
//!   moves on. The run then ends with [`Error::IoFailure`].
//! - An arithmetic error is fatal: the abort flag stops every worker from
//!   claiming more segments and the run ends with [`Error::Arithmetic`].

use std::io;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::thread;

use tracing::{debug, error};

use crate::bigint::ArithmeticError;
use crate::error::{Error, Result};
use crate::plan::{Segment, SegmentPlan};
use crate::primes::sieve_segment;
use crate::progress::Progress;
use crate::storage::PrimeSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Done = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            2 => SchedulerState::Draining,
            _ => SchedulerState::Done,
        }
    }
}

/// Totals for a run in which every segment was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    pub segments: usize,
    pub primes: u64,
}

#[derive(Default)]
struct WorkerStats {
    segments: usize,
    primes: u64,
    failed: Vec<(Segment, io::Error)>,
}

pub struct Scheduler<'a> {
    plan: &'a SegmentPlan,
    base_primes: &'a [u64],
    threads: usize,
    state: AtomicU8,
    cursor: AtomicUsize,
    abort: AtomicBool,
}

impl<'a> Scheduler<'a> {
    pub fn new(plan: &'a SegmentPlan, base_primes: &'a [u64], threads: usize) -> Self {
        Scheduler {
            plan,
            base_primes,
            threads,
            state: AtomicU8::new(SchedulerState::Idle as u8),
            cursor: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of worker threads a run starts; never more than there are segments.
    pub fn workers(&self) -> usize {
        self.threads.min(self.plan.total()).max(1)
    }

    /// Sieve every segment of the plan. A scheduler runs once.
    pub fn run(&self, sink: &dyn PrimeSink, progress: &Progress) -> Result<RunReport> {
        if self.threads < 1 {
            return Err(Error::InvalidInput("thread count must be at least 1".into()));
        }
        self.state
            .compare_exchange(
                SchedulerState::Idle as u8,
                SchedulerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::InvalidInput("scheduler has already run".into()))?;

        let outcomes: Vec<Result<WorkerStats, ArithmeticError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers())
                .map(|worker_id| scope.spawn(move || self.work(worker_id, sink, progress)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                .collect()
        });
        self.state.store(SchedulerState::Done as u8, Ordering::Release);

        let mut report = RunReport::default();
        let mut failed = Vec::new();
        for outcome in outcomes {
            let stats = outcome?;
            report.segments += stats.segments;
            report.primes += stats.primes;
            failed.extend(stats.failed);
        }

        if failed.is_empty() {
            return Ok(report);
        }
        failed.sort_by_key(|(segment, _)| segment.index);
        let mut failed = failed.into_iter();
        let Some((first, source)) = failed.next() else {
            return Ok(report);
        };
        let mut segments = vec![first];
        segments.extend(failed.map(|(segment, _)| segment));
        Err(Error::IoFailure {
            failed: segments,
            total: self.plan.total(),
            source,
        })
    }

    fn work(
        &self,
        worker_id: usize,
        sink: &dyn PrimeSink,
        progress: &Progress,
    ) -> Result<WorkerStats, ArithmeticError> {
        let mut stats = WorkerStats::default();
        let _guard = AbortOnPanic(sink);

        while !self.abort.load(Ordering::Acquire) {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed);
            let segment = match self.plan.segment(index) {
                Ok(Some(segment)) => segment,
                Ok(None) => {
                    self.begin_draining();
                    break;
                }
                Err(e) => return Err(self.fail(worker_id, index, sink, e)),
            };

            let primes = match sieve_segment(&segment, self.base_primes) {
                Ok(primes) => primes,
                Err(e) => return Err(self.fail(worker_id, index, sink, e)),
            };
            let count = primes.len();

            match sink.write_segment(primes) {
                Ok(()) => {
                    stats.segments += 1;
                    stats.primes += count as u64;
                    let done = progress.record_segment();
                    debug!(worker_id, %segment, primes = count, done, "segment complete");
                }
                Err(e) => {
                    error!(worker_id, %segment, error = %e, "failed to write segment");
                    stats.failed.push((segment, e));
                }
            }
        }

        Ok(stats)
    }

    fn begin_draining(&self) {
        let _ = self.state.compare_exchange(
            SchedulerState::Running as u8,
            SchedulerState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn fail(
        &self,
        worker_id: usize,
        index: usize,
        sink: &dyn PrimeSink,
        e: ArithmeticError,
    ) -> ArithmeticError {
        self.abort.store(true, Ordering::Release);
        sink.abort();
        error!(worker_id, segment = index, error = %e, "arithmetic failure, aborting run");
        e
    }
}

// Wakes siblings blocked in the sink if a worker unwinds.
struct AbortOnPanic<'s>(&'s dyn PrimeSink);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}
