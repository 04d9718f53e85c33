//! Multithreaded segmented Sieve of Eratosthenes over arbitrary-precision
//! ranges.
//!
//! `[2, limit]` is split into fixed-size segments that a pool of worker
//! threads sieves independently against a shared table of base primes up to
//! `isqrt(limit)`. Each segment's primes go to a [`PrimeSink`]: one file per
//! segment by default, a single ordered file, or memory.
//!
//! ```no_run
//! use primeseg::{BigInt, generate_primes};
//!
//! let summary = generate_primes(BigInt::from(1_000_000u64), 4, 100_000)?;
//! assert_eq!(summary.primes, 78_498);
//! # Ok::<(), primeseg::Error>(())
//! ```

pub mod bigint;
pub mod config;
pub mod error;
pub mod plan;
pub mod primes;
pub mod progress;
pub mod scheduler;
pub mod storage;

use std::time::{Duration, Instant};

use tracing::info;

pub use bigint::{ArithmeticError, BigInt, ParseBigIntError, Uint};
pub use config::SieveConfig;
pub use error::{Error, Result};
pub use plan::{Segment, SegmentPlan};
pub use primes::SegmentPrimes;
pub use progress::Progress;
pub use scheduler::{RunReport, Scheduler, SchedulerState};
pub use storage::{DEFAULT_OUTPUT_DIR, MemorySink, PrimeSink, SegmentFiles, SharedFile};

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub limit: BigInt,
    pub segments: usize,
    pub primes: u64,
    pub elapsed: Duration,
}

/// Sieve `[2, limit]` into per-segment files under `primes/`.
pub fn generate_primes(limit: BigInt, thread_count: usize, segment_size: u64) -> Result<Summary> {
    let config = SieveConfig::new(limit, thread_count, segment_size);
    config.validate()?;
    let sink = SegmentFiles::new(DEFAULT_OUTPUT_DIR, config.label)?;
    generate_primes_with(&config, &sink)
}

/// Sieve every value below `2^bits` into per-segment files under `primes/`.
pub fn generate_primes_by_bits(bits: u32, thread_count: usize) -> Result<Summary> {
    let config = SieveConfig::for_bits(bits, thread_count)?;
    config.validate()?;
    let sink = SegmentFiles::new(DEFAULT_OUTPUT_DIR, config.label)?;
    generate_primes_with(&config, &sink)
}

/// Run one sieve with `config`, handing every segment to `sink`.
pub fn generate_primes_with(config: &SieveConfig, sink: &dyn PrimeSink) -> Result<Summary> {
    config.validate()?;
    let start = Instant::now();

    let plan = config.plan()?;
    let base = primes::base_primes(plan.limit())?;
    info!(
        limit = %plan.limit(),
        threads = config.threads,
        segment_size = plan.segment_size(),
        segments = plan.total(),
        base_primes = base.len(),
        "starting sieve"
    );

    let progress = if config.show_progress {
        Progress::stderr(plan.total())
    } else {
        Progress::new(plan.total())
    };
    let scheduler = Scheduler::new(&plan, &base, config.threads);
    let outcome = scheduler.run(sink, &progress);
    progress.finish();
    let report = outcome?;
    sink.finish()?;

    let summary = Summary {
        limit: *plan.limit(),
        segments: report.segments,
        primes: report.primes,
        elapsed: start.elapsed(),
    };
    info!(
        primes = summary.primes,
        segments = summary.segments,
        elapsed_us = summary.elapsed.as_micros() as u64,
        "sieve complete"
    );
    Ok(summary)
}
