//! Run parameters for one sieve run.

use crate::bigint::BigInt;
use crate::error::{Error, Result};
use crate::plan::SegmentPlan;

/// Segment size for wide ranges, where each segment costs more marking work.
pub const WIDE_SEGMENT_SIZE: u64 = 500_000;
/// Segment size below 32 bits.
pub const NARROW_SEGMENT_SIZE: u64 = 10_000_000;

/// Default segment size for sieving every value of `bits` bits.
pub fn default_segment_size(bits: u32) -> u64 {
    if bits >= 32 {
        WIDE_SEGMENT_SIZE
    } else {
        NARROW_SEGMENT_SIZE
    }
}

/// Worker count when none is given: one per available core.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone)]
pub struct SieveConfig {
    /// Inclusive upper bound of the sieve.
    pub limit: BigInt,
    pub threads: usize,
    /// Values per segment.
    pub segment_size: u64,
    /// Bit-width tag used in output file names.
    pub label: u32,
    pub show_progress: bool,
}

impl SieveConfig {
    /// Sieve `[2, limit]`; files are labelled with the bit length of `limit`.
    pub fn new(limit: BigInt, threads: usize, segment_size: u64) -> Self {
        SieveConfig {
            limit,
            threads,
            segment_size,
            label: limit.bits(),
            show_progress: false,
        }
    }

    /// Sieve every value below `2^bits` with the default segment size.
    pub fn for_bits(bits: u32, threads: usize) -> Result<Self> {
        let limit = BigInt::max_of_bits(bits)?;
        Ok(SieveConfig {
            limit,
            threads,
            segment_size: default_segment_size(bits),
            label: bits,
            show_progress: false,
        })
    }

    pub fn with_label(mut self, label: u32) -> Self {
        self.label = label;
        self
    }

    pub fn with_segment_size(mut self, segment_size: u64) -> Self {
        self.segment_size = segment_size;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Reject parameters that cannot produce a run.
    pub fn validate(&self) -> Result<()> {
        if self.threads < 1 {
            return Err(Error::InvalidInput("thread count must be at least 1".into()));
        }
        self.plan().map(|_| ())
    }

    pub fn plan(&self) -> Result<SegmentPlan> {
        SegmentPlan::new(self.limit, self.segment_size)
    }
}
