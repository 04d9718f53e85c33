//! Splitting `[2, limit]` into fixed-size segments.

use std::fmt;

use crate::bigint::{ArithmeticError, BigInt};
use crate::error::{Error, Result};

/// First value any plan covers; 0 and 1 are never candidates.
pub const FIRST_CANDIDATE: u64 = 2;

/// One contiguous slice of the sieving interval, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    pub index: usize,
    pub low: BigInt,
    pub high: BigInt,
}

impl Segment {
    /// Number of values in `[low, high]`.
    pub fn len(&self) -> Result<usize, ArithmeticError> {
        let span = self.high.checked_sub(&self.low)?.to_u64()?;
        usize::try_from(span)
            .ok()
            .and_then(|span| span.checked_add(1))
            .ok_or(ArithmeticError::Overflow)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}, {}]", self.index, self.low, self.high)
    }
}

/// Deterministic partition of `[2, limit]`. Segment `i` starts at
/// `2 + i * segment_size`; only the last one may be shorter.
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    limit: BigInt,
    segment_size: u64,
    total: usize,
}

impl SegmentPlan {
    pub fn new(limit: BigInt, segment_size: u64) -> Result<Self> {
        if limit < BigInt::from(FIRST_CANDIDATE) {
            return Err(Error::InvalidInput(format!("limit must be at least 2, got {limit}")));
        }
        if segment_size == 0 {
            return Err(Error::InvalidInput("segment size must be at least 1".into()));
        }
        if usize::try_from(segment_size).is_err() {
            return Err(Error::InvalidInput(format!(
                "segment size {segment_size} does not fit in memory on this platform"
            )));
        }

        // limit - 2 + 1 values to cover
        let span = limit.checked_sub(&BigInt::from(FIRST_CANDIDATE - 1))?;
        let (whole, rest) = span.div_rem_u64(segment_size)?;
        let total = whole
            .to_u64()
            .ok()
            .and_then(|n| n.checked_add(u64::from(rest != 0)))
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "segment size {segment_size} splits limit {limit} into too many segments"
                ))
            })?;

        Ok(Self {
            limit,
            segment_size,
            total,
        })
    }

    /// A plan that claims `total` segments whatever the limit; segments past
    /// the real end have bounds that fail arithmetic checks.
    #[cfg(test)]
    pub(crate) fn with_total(limit: BigInt, segment_size: u64, total: usize) -> Self {
        Self {
            limit,
            segment_size,
            total,
        }
    }

    pub fn limit(&self) -> &BigInt {
        &self.limit
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Bounds of segment `index`, or `None` past the end of the plan.
    pub fn segment(&self, index: usize) -> Result<Option<Segment>, ArithmeticError> {
        if index >= self.total {
            return Ok(None);
        }
        let low = BigInt::from(index as u64)
            .checked_mul_u64(self.segment_size)?
            .checked_add_u64(FIRST_CANDIDATE)?;
        // Clamp through the remaining distance so `low + size - 1` is never
        // formed when it would pass the limit.
        let remaining = self.limit.checked_sub(&low)?;
        let high = if remaining < BigInt::from(self.segment_size - 1) {
            self.limit
        } else {
            low.checked_add_u64(self.segment_size - 1)?
        };
        Ok(Some(Segment { index, low, high }))
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Segment, ArithmeticError>> + '_ {
        (0..self.total).filter_map(move |index| self.segment(index).transpose())
    }
}
