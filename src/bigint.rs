//! Fixed-capacity unsigned big integers.
//!
//! `Uint<K>` stores `K` little-endian `u64` limbs. Every operation is exact:
//! a result that does not fit in `K` limbs is an [`ArithmeticError::Overflow`],
//! a negative difference is an [`ArithmeticError::Underflow`]. Nothing wraps
//! and nothing is truncated to the low limb.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Limb count used when `BigInt` is named without an explicit capacity (256 bits).
pub const DEFAULT_LIMBS: usize = 4;

/// The integer type the sieve runs on.
pub type BigInt = Uint<DEFAULT_LIMBS>;

const LIMB_BITS: u32 = 64;

// Largest power of ten that fits in a limb, used to peel off decimal chunks.
const DECIMAL_CHUNK: u64 = 10_000_000_000_000_000_000;
const DECIMAL_CHUNK_DIGITS: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArithmeticError {
    #[error("arithmetic overflow: value exceeds integer capacity")]
    Overflow,
    #[error("arithmetic underflow: result would be negative")]
    Underflow,
    #[error("division by zero")]
    DivideByZero,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseBigIntError {
    #[error("cannot parse integer from empty string")]
    Empty,
    #[error("invalid digit {0:?} in decimal integer")]
    InvalidDigit(char),
    #[error("decimal integer exceeds integer capacity")]
    Overflow,
}

/// Unsigned integer with room for `K` 64-bit limbs. `K` must be at least 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uint<const K: usize> {
    limbs: [u64; K],
}

impl<const K: usize> Uint<K> {
    pub const ZERO: Self = Self { limbs: [0; K] };

    pub const fn from_limbs(limbs: [u64; K]) -> Self {
        Self { limbs }
    }

    /// Little-endian limbs, including the zero padding above the value.
    pub fn limbs(&self) -> &[u64; K] {
        &self.limbs
    }

    /// Total number of bits this type can hold.
    pub const fn capacity_bits() -> u32 {
        K as u32 * LIMB_BITS
    }

    pub fn is_zero(&self) -> bool {
        self.limbs.iter().all(|&limb| limb == 0)
    }

    /// Number of significant bits; zero has none.
    pub fn bits(&self) -> u32 {
        match self.limbs.iter().rposition(|&limb| limb != 0) {
            Some(top) => top as u32 * LIMB_BITS + (LIMB_BITS - self.limbs[top].leading_zeros()),
            None => 0,
        }
    }

    fn bit(&self, idx: u32) -> bool {
        let limb = (idx / LIMB_BITS) as usize;
        (self.limbs[limb] >> (idx % LIMB_BITS)) & 1 == 1
    }

    fn set_bit(&mut self, idx: u32) {
        let limb = (idx / LIMB_BITS) as usize;
        self.limbs[limb] |= 1 << (idx % LIMB_BITS);
    }

    pub fn to_u64(&self) -> Result<u64, ArithmeticError> {
        if self.limbs[1..].iter().any(|&limb| limb != 0) {
            return Err(ArithmeticError::Overflow);
        }
        Ok(self.limbs[0])
    }

    pub fn try_from_u128(value: u128) -> Result<Self, ArithmeticError> {
        let mut out = Self::ZERO;
        out.limbs[0] = value as u64;
        let high = (value >> 64) as u64;
        if high != 0 {
            if K < 2 {
                return Err(ArithmeticError::Overflow);
            }
            out.limbs[1] = high;
        }
        Ok(out)
    }

    pub fn checked_add(&self, rhs: &Self) -> Result<Self, ArithmeticError> {
        let (sum, carry) = self.overflowing_add(rhs);
        if carry {
            return Err(ArithmeticError::Overflow);
        }
        Ok(sum)
    }

    fn overflowing_add(&self, rhs: &Self) -> (Self, bool) {
        let mut out = Self::ZERO;
        let mut carry = false;
        for i in 0..K {
            let (s1, c1) = self.limbs[i].overflowing_add(rhs.limbs[i]);
            let (s2, c2) = s1.overflowing_add(carry as u64);
            out.limbs[i] = s2;
            carry = c1 || c2;
        }
        (out, carry)
    }

    pub fn checked_sub(&self, rhs: &Self) -> Result<Self, ArithmeticError> {
        let (diff, borrow) = self.overflowing_sub(rhs);
        if borrow {
            return Err(ArithmeticError::Underflow);
        }
        Ok(diff)
    }

    fn overflowing_sub(&self, rhs: &Self) -> (Self, bool) {
        let mut out = Self::ZERO;
        let mut borrow = false;
        for i in 0..K {
            let (d1, b1) = self.limbs[i].overflowing_sub(rhs.limbs[i]);
            let (d2, b2) = d1.overflowing_sub(borrow as u64);
            out.limbs[i] = d2;
            borrow = b1 || b2;
        }
        (out, borrow)
    }

    /// Schoolbook multiplication; any partial product landing at or above limb `K`
    /// is an overflow.
    pub fn checked_mul(&self, rhs: &Self) -> Result<Self, ArithmeticError> {
        let mut out = Self::ZERO;
        for i in 0..K {
            if self.limbs[i] == 0 {
                continue;
            }
            let mut carry: u128 = 0;
            for j in 0..K {
                let product = self.limbs[i] as u128 * rhs.limbs[j] as u128;
                if i + j >= K {
                    if product != 0 || carry != 0 {
                        return Err(ArithmeticError::Overflow);
                    }
                    continue;
                }
                let t = out.limbs[i + j] as u128 + product + carry;
                out.limbs[i + j] = t as u64;
                carry = t >> 64;
            }
            if carry != 0 {
                return Err(ArithmeticError::Overflow);
            }
        }
        Ok(out)
    }

    pub fn checked_mul_u64(&self, rhs: u64) -> Result<Self, ArithmeticError> {
        let mut out = Self::ZERO;
        let mut carry: u128 = 0;
        for i in 0..K {
            let t = self.limbs[i] as u128 * rhs as u128 + carry;
            out.limbs[i] = t as u64;
            carry = t >> 64;
        }
        if carry != 0 {
            return Err(ArithmeticError::Overflow);
        }
        Ok(out)
    }

    pub fn checked_add_u64(&self, rhs: u64) -> Result<Self, ArithmeticError> {
        self.checked_add(&Self::from(rhs))
    }

    pub fn checked_div(&self, rhs: &Self) -> Result<Self, ArithmeticError> {
        self.div_rem(rhs).map(|(q, _)| q)
    }

    pub fn checked_rem(&self, rhs: &Self) -> Result<Self, ArithmeticError> {
        self.div_rem(rhs).map(|(_, r)| r)
    }

    /// Quotient and remainder in one pass.
    pub fn div_rem(&self, rhs: &Self) -> Result<(Self, Self), ArithmeticError> {
        if rhs.is_zero() {
            return Err(ArithmeticError::DivideByZero);
        }
        Ok(self.div_rem_nonzero(rhs))
    }

    fn div_rem_nonzero(&self, rhs: &Self) -> (Self, Self) {
        if let Ok(small) = rhs.to_u64() {
            let (q, r) = self.div_rem_u64_nonzero(small);
            return (q, Self::from(r));
        }
        if self < rhs {
            return (Self::ZERO, *self);
        }

        // Restoring binary long division. The remainder is always below `rhs`,
        // so a bit shifted out of the top limb means it already exceeds `rhs`
        // and the wrapping subtraction lands on the true value.
        let mut quotient = Self::ZERO;
        let mut remainder = Self::ZERO;
        for idx in (0..self.bits()).rev() {
            let carried = remainder.shl1_in(self.bit(idx));
            if carried || remainder >= *rhs {
                remainder = remainder.overflowing_sub(rhs).0;
                quotient.set_bit(idx);
            }
        }
        (quotient, remainder)
    }

    /// Division by a native divisor, limb by limb through `u128`.
    pub fn div_rem_u64(&self, rhs: u64) -> Result<(Self, u64), ArithmeticError> {
        if rhs == 0 {
            return Err(ArithmeticError::DivideByZero);
        }
        Ok(self.div_rem_u64_nonzero(rhs))
    }

    fn div_rem_u64_nonzero(&self, rhs: u64) -> (Self, u64) {
        let mut quotient = Self::ZERO;
        let mut rem: u128 = 0;
        for i in (0..K).rev() {
            let acc = (rem << 64) | self.limbs[i] as u128;
            quotient.limbs[i] = (acc / rhs as u128) as u64;
            rem = acc % rhs as u128;
        }
        (quotient, rem as u64)
    }

    /// `self mod rhs` for a native modulus.
    pub fn rem_u64(&self, rhs: u64) -> Result<u64, ArithmeticError> {
        self.div_rem_u64(rhs).map(|(_, r)| r)
    }

    // Shift left by one, feeding `bit_in` into bit 0. Returns the bit shifted out.
    fn shl1_in(&mut self, bit_in: bool) -> bool {
        let mut carry = bit_in as u64;
        for limb in self.limbs.iter_mut() {
            let next = *limb >> 63;
            *limb = (*limb << 1) | carry;
            carry = next;
        }
        carry == 1
    }

    pub fn checked_shl(&self, shift: u32) -> Result<Self, ArithmeticError> {
        if self.is_zero() {
            return Ok(*self);
        }
        if shift >= Self::capacity_bits() || self.bits() + shift > Self::capacity_bits() {
            return Err(ArithmeticError::Overflow);
        }
        let limb_shift = (shift / LIMB_BITS) as usize;
        let bit_shift = shift % LIMB_BITS;
        let mut out = Self::ZERO;
        for i in (limb_shift..K).rev() {
            let src = i - limb_shift;
            let mut limb = self.limbs[src] << bit_shift;
            if bit_shift != 0 && src > 0 {
                limb |= self.limbs[src - 1] >> (LIMB_BITS - bit_shift);
            }
            out.limbs[i] = limb;
        }
        Ok(out)
    }

    pub fn shr(&self, shift: u32) -> Self {
        if shift >= Self::capacity_bits() {
            return Self::ZERO;
        }
        let limb_shift = (shift / LIMB_BITS) as usize;
        let bit_shift = shift % LIMB_BITS;
        let mut out = Self::ZERO;
        for i in 0..K - limb_shift {
            let src = i + limb_shift;
            let mut limb = self.limbs[src] >> bit_shift;
            if bit_shift != 0 && src + 1 < K {
                limb |= self.limbs[src + 1] << (LIMB_BITS - bit_shift);
            }
            out.limbs[i] = limb;
        }
        out
    }

    /// `2^exp - 1`, the largest value of `exp` bits.
    pub fn max_of_bits(exp: u32) -> Result<Self, ArithmeticError> {
        if exp > Self::capacity_bits() {
            return Err(ArithmeticError::Overflow);
        }
        let mut out = Self::ZERO;
        for idx in 0..exp {
            out.set_bit(idx);
        }
        Ok(out)
    }

    /// Floor of the square root, by Newton iteration from a power-of-two
    /// starting point above the root.
    pub fn isqrt(&self) -> Self {
        if self.is_zero() {
            return Self::ZERO;
        }
        let mut x = Self::ZERO;
        x.set_bit(self.bits().div_ceil(2));
        loop {
            let (q, _) = self.div_rem_nonzero(&x);
            // x and n/x are both at most 2^(32K), the sum cannot leave the type.
            let y = x.overflowing_add(&q).0.shr(1);
            if y >= x {
                return x;
            }
            x = y;
        }
    }
}

impl<const K: usize> Default for Uint<K> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<const K: usize> From<u64> for Uint<K> {
    fn from(value: u64) -> Self {
        let mut out = Self::ZERO;
        out.limbs[0] = value;
        out
    }
}

impl<const K: usize> From<u32> for Uint<K> {
    fn from(value: u32) -> Self {
        Self::from(value as u64)
    }
}

impl<const K: usize> TryFrom<u128> for Uint<K> {
    type Error = ArithmeticError;

    fn try_from(value: u128) -> Result<Self, Self::Error> {
        Self::try_from_u128(value)
    }
}

impl<const K: usize> TryFrom<Uint<K>> for u64 {
    type Error = ArithmeticError;

    fn try_from(value: Uint<K>) -> Result<Self, Self::Error> {
        value.to_u64()
    }
}

impl<const K: usize> Ord for Uint<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.limbs.iter().rev().cmp(other.limbs.iter().rev())
    }
}

impl<const K: usize> PartialOrd for Uint<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const K: usize> fmt::Display for Uint<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.pad_integral(true, "", "0");
        }

        let mut chunks = Vec::new();
        let mut rest = *self;
        while !rest.is_zero() {
            let (q, r) = rest.div_rem_u64_nonzero(DECIMAL_CHUNK);
            chunks.push(r);
            rest = q;
        }

        let mut out = String::with_capacity(chunks.len() * DECIMAL_CHUNK_DIGITS);
        let mut buf = itoa::Buffer::new();
        let mut iter = chunks.iter().rev();
        if let Some(&top) = iter.next() {
            out.push_str(buf.format(top));
        }
        for &chunk in iter {
            let digits = buf.format(chunk);
            for _ in digits.len()..DECIMAL_CHUNK_DIGITS {
                out.push('0');
            }
            out.push_str(digits);
        }
        f.pad_integral(true, "", &out)
    }
}

impl<const K: usize> fmt::Debug for Uint<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BigInt({self})")
    }
}

impl<const K: usize> FromStr for Uint<K> {
    type Err = ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseBigIntError::Empty);
        }
        let mut acc = Self::ZERO;
        for c in s.chars() {
            let digit = c.to_digit(10).ok_or(ParseBigIntError::InvalidDigit(c))?;
            acc = acc
                .checked_mul_u64(10)
                .and_then(|v| v.checked_add_u64(digit as u64))
                .map_err(|_| ParseBigIntError::Overflow)?;
        }
        Ok(acc)
    }
}
