use std::collections::TryReserveError;
use std::io::{self, Write};

use crate::bigint::{ArithmeticError, BigInt};
use crate::error::{Error, Result};
use crate::plan::{FIRST_CANDIDATE, Segment};

// Helper: Get bit at position idx
#[inline]
fn get_bit(bits: &[u64], idx: usize) -> bool {
    let word_idx = idx / 64;
    let bit_idx = idx % 64;
    (bits[word_idx] & (1_u64 << bit_idx)) != 0
}

// Helper: Clear bit at position idx
#[inline]
fn clear_bit(bits: &mut [u64], idx: usize) {
    let word_idx = idx / 64;
    let bit_idx = idx % 64;
    bits[word_idx] &= !(1_u64 << bit_idx);
}

// All-ones bitmap of `bits` bits, without aborting when it cannot be allocated.
fn bitmap(bits: usize) -> Result<Vec<u64>, TryReserveError> {
    let words = bits.div_ceil(64);
    let mut map = Vec::new();
    map.try_reserve_exact(words)?;
    map.resize(words, !0_u64);
    Ok(map)
}

/// Base primes for sieving every segment of `[2, limit]`: all primes up to
/// `isqrt(limit)`. Fails with `Overflow` when the root does not fit a `u64`
/// and with `InvalidInput` when its sieve does not fit in memory.
pub fn base_primes(limit: &BigInt) -> Result<Vec<u64>> {
    let bound = limit.isqrt().to_u64()?;
    let bound = usize::try_from(bound).map_err(|_| ArithmeticError::Overflow)?;
    primes_up_to(bound).map_err(|e| {
        Error::InvalidInput(format!(
            "limit {limit} needs base primes up to {bound}, which cannot be sieved: {e}"
        ))
    })
}

/// Odd-only, bit-packed Sieve of Eratosthenes over `[2, limit]`.
///
/// - Memory: 1 bit per odd number
/// - Index mapping: bit i represents number (2*i + 3)
pub fn primes_up_to(limit: usize) -> Result<Vec<u64>, TryReserveError> {
    if limit < 2 {
        return Ok(vec![]);
    }

    let mut primes = vec![2];

    // Only track odd numbers: 3, 5, 7, 9, 11, ...
    let odd_count = (limit - 1) / 2;
    let mut is_prime = bitmap(odd_count)?;

    for i in 0..odd_count {
        let p = 2 * i + 3;
        if p.checked_mul(p).is_none_or(|square| square > limit) {
            break;
        }
        if get_bit(&is_prime, i) {
            // Mark odd multiples of p starting at p^2
            let mut j = (p * p - 3) / 2;
            while j < odd_count {
                clear_bit(&mut is_prime, j);
                j += p;
            }
        }
    }

    // Collect all odd primes (iterate word-by-word, skip to set bits)
    for word_idx in 0..is_prime.len() {
        let mut word = is_prime[word_idx];

        while word != 0 {
            let bit_idx = word.trailing_zeros() as usize;
            let i = word_idx * 64 + bit_idx;

            if i >= odd_count {
                break; // Past the end of valid bits
            }

            primes.push((2 * i + 3) as u64);
            word &= word - 1; // Clear the lowest set bit
        }
    }

    Ok(primes)
}

/// Primes found in one segment, stored as offsets from `segment.low`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPrimes {
    pub segment: Segment,
    pub offsets: Vec<u64>,
}

impl SegmentPrimes {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// The primes themselves, ascending.
    pub fn values(&self) -> Result<Vec<BigInt>, ArithmeticError> {
        self.offsets
            .iter()
            .map(|&offset| self.segment.low.checked_add_u64(offset))
            .collect()
    }

    /// Write one decimal prime per line. Segments whose upper bound fits a
    /// `u64` go through `itoa`; wider ones are formatted as `BigInt`.
    pub fn write_decimal<W: Write>(&self, out: &mut W) -> io::Result<()> {
        // Pre-allocate estimated capacity (digits plus newline)
        let digits = self.segment.high.bits() as usize * 3 / 10 + 2;
        let mut buffer = String::with_capacity(self.offsets.len() * digits);

        if let (Ok(low), Ok(_)) = (self.segment.low.to_u64(), self.segment.high.to_u64()) {
            let mut itoa_buf = itoa::Buffer::new();
            for &offset in &self.offsets {
                buffer.push_str(itoa_buf.format(low + offset));
                buffer.push('\n');
            }
        } else {
            for value in self.values().map_err(io::Error::other)? {
                buffer.push_str(&value.to_string());
                buffer.push('\n');
            }
        }

        out.write_all(buffer.as_bytes())
    }
}

/// Segmented Sieve of Eratosthenes over one `[low, high]` slice.
///
/// Every base prime `p` with `p^2 <= high` clears its multiples from
/// `max(p^2, ceil(low / p) * p)` upward in a bit-packed buffer of
/// `high - low + 1` bits; the surviving bits are the primes. `base_primes`
/// must be ascending and cover `isqrt(high)`.
/// A segment too long to allocate is an `Overflow`.
pub fn sieve_segment(
    segment: &Segment,
    base_primes: &[u64],
) -> Result<SegmentPrimes, ArithmeticError> {
    let len = segment.len()?;
    let mut bits = bitmap(len).map_err(|_| ArithmeticError::Overflow)?;

    // 0 and 1 are not prime
    if let Ok(low) = segment.low.to_u64() {
        for value in low..FIRST_CANDIDATE.min(low.saturating_add(len as u64)) {
            clear_bit(&mut bits, (value - low) as usize);
        }
    }

    let low_native = segment.low.to_u64().ok();
    for &p in base_primes {
        let square = BigInt::try_from_u128(p as u128 * p as u128)?;
        if square > segment.high {
            break;
        }

        let start = if square >= segment.low {
            square.checked_sub(&segment.low)?.to_u64()?
        } else {
            let rem = match low_native {
                Some(low) => low % p,
                None => segment.low.rem_u64(p)?,
            };
            if rem == 0 { 0 } else { p - rem }
        };

        let Ok(start) = usize::try_from(start) else {
            continue;
        };
        for idx in (start..len).step_by(p as usize) {
            clear_bit(&mut bits, idx);
        }
    }

    // Collect surviving offsets (iterate word-by-word, skip to set bits)
    let mut offsets = Vec::new();
    for word_idx in 0..bits.len() {
        let mut word = bits[word_idx];

        while word != 0 {
            let bit_idx = word.trailing_zeros() as usize;
            let idx = word_idx * 64 + bit_idx;

            if idx >= len {
                break; // Past the end of the segment
            }

            offsets.push(idx as u64);
            word &= word - 1; // Clear lowest set bit
        }
    }

    Ok(SegmentPrimes {
        segment: *segment,
        offsets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMES_BELOW_50: [u64; 15] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];

    fn segment(index: usize, low: u64, high: u64) -> Segment {
        Segment {
            index,
            low: BigInt::from(low),
            high: BigInt::from(high),
        }
    }

    fn native(primes: &SegmentPrimes) -> Vec<u64> {
        primes
            .values()
            .unwrap()
            .iter()
            .map(|v| v.to_u64().unwrap())
            .collect()
    }

    fn is_prime_naive(n: u64) -> bool {
        n >= 2 && (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
    }

    #[test]
    fn base_primes_for_one_hundred() {
        assert_eq!(base_primes(&BigInt::from(100u64)).unwrap(), vec![2, 3, 5, 7]);
    }

    #[test]
    fn base_primes_reject_huge_roots() {
        let limit = BigInt::max_of_bits(130).unwrap();
        assert!(matches!(
            base_primes(&limit),
            Err(Error::Arithmetic(ArithmeticError::Overflow))
        ));
    }

    #[test]
    fn base_sieve_too_large_to_allocate() {
        // Root is u64::MAX: a 2^63-bit table.
        let limit = BigInt::max_of_bits(128).unwrap();
        assert!(matches!(base_primes(&limit), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn segment_too_large_to_allocate() {
        let primes = sieve_segment(&segment(0, 2, u64::MAX), &[]);
        assert_eq!(primes, Err(ArithmeticError::Overflow));
    }

    #[test]
    fn small_sieve_edges() {
        assert!(primes_up_to(0).unwrap().is_empty());
        assert!(primes_up_to(1).unwrap().is_empty());
        assert_eq!(primes_up_to(2).unwrap(), vec![2]);
        assert_eq!(primes_up_to(3).unwrap(), vec![2, 3]);
        assert_eq!(primes_up_to(9).unwrap(), vec![2, 3, 5, 7]);
        assert_eq!(primes_up_to(49).unwrap(), PRIMES_BELOW_50.to_vec());
    }

    #[test]
    fn small_sieve_matches_trial_division() {
        let expected: Vec<u64> = (0..=5_000).filter(|&n| is_prime_naive(n)).collect();
        assert_eq!(primes_up_to(5_000).unwrap(), expected);
    }

    #[test]
    fn one_segment_two_to_fifty() {
        let base = base_primes(&BigInt::from(50u64)).unwrap();
        let primes = sieve_segment(&segment(0, 2, 50), &base).unwrap();
        assert_eq!(native(&primes), PRIMES_BELOW_50.to_vec());
    }

    #[test]
    fn split_segments_match_single_segment() {
        let base = base_primes(&BigInt::from(50u64)).unwrap();
        let mut merged = Vec::new();
        for (index, low) in (2..=50).step_by(10).enumerate() {
            let high = (low + 9).min(50);
            merged.extend(native(&sieve_segment(&segment(index, low, high), &base).unwrap()));
        }
        assert_eq!(merged, PRIMES_BELOW_50.to_vec());
    }

    #[test]
    fn zero_and_one_never_emitted() {
        let base = base_primes(&BigInt::from(30u64)).unwrap();
        let primes = sieve_segment(&segment(0, 0, 30), &base).unwrap();
        assert_eq!(native(&primes), vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        let primes = sieve_segment(&segment(0, 1, 1), &base).unwrap();
        assert!(primes.is_empty());
    }

    #[test]
    fn base_primes_inside_segment_survive() {
        // Segment containing the base primes themselves and their squares.
        let base = base_primes(&BigInt::from(200u64)).unwrap();
        let primes = sieve_segment(&segment(0, 5, 50), &base).unwrap();
        assert_eq!(native(&primes), PRIMES_BELOW_50[2..].to_vec());
    }

    #[test]
    fn segment_matches_trial_division() {
        let limit = 100_000u64;
        let base = base_primes(&BigInt::from(limit)).unwrap();
        let primes = sieve_segment(&segment(3, 90_001, limit), &base).unwrap();
        let expected: Vec<u64> = (90_001..=limit).filter(|&n| is_prime_naive(n)).collect();
        assert_eq!(native(&primes), expected);
    }

    #[test]
    fn segment_above_two_to_the_64() {
        // Window [2^64 + 8, 2^64 + 20]: only 2^64 + 13 is prime and every
        // composite in it has a factor below 100, so a short base table is enough.
        let low = BigInt::try_from_u128((1u128 << 64) + 8).unwrap();
        let high = low.checked_add_u64(12).unwrap();
        let seg = Segment { index: 0, low, high };
        let primes = sieve_segment(&seg, &primes_up_to(100).unwrap()).unwrap();
        assert_eq!(primes.offsets, vec![5]);

        let mut out = Vec::new();
        primes.write_decimal(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "18446744073709551629\n");
    }

    #[test]
    fn write_decimal_native_path() {
        let base = base_primes(&BigInt::from(30u64)).unwrap();
        let primes = sieve_segment(&segment(2, 20, 30), &base).unwrap();
        let mut out = Vec::new();
        primes.write_decimal(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "23\n29\n");
    }

    #[test]
    fn empty_segment_writes_nothing() {
        let base = base_primes(&BigInt::from(30u64)).unwrap();
        let primes = sieve_segment(&segment(0, 24, 28), &base).unwrap();
        assert!(primes.is_empty());
        let mut out = Vec::new();
        primes.write_decimal(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
