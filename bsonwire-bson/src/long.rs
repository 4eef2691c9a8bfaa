//! 64-bit two's-complement integer stored as a pair of 32-bit words.
//!
//! `Long` backs the BSON Int64 and Timestamp element types and server cursor
//! ids. Arithmetic works on 16-bit limbs with explicit carries so that every
//! operation wraps exactly like a hardware 64-bit register, and division is a
//! bitwise long division (no floating point anywhere on the exact paths).

use crate::error::BsonError;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, BitAnd, BitOr, BitXor, Mul, Neg, Not, Shl, Shr, Sub};

const TWO_PWR_32: f64 = 4_294_967_296.0;
const TWO_PWR_63: f64 = TWO_PWR_32 * TWO_PWR_32 / 2.0;

/// A signed 64-bit integer represented as low/high 32-bit words.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Long {
    low: i32,
    high: i32,
}

impl Long {
    pub const ZERO: Long = Long::from_bits(0, 0);
    pub const ONE: Long = Long::from_bits(1, 0);
    pub const NEG_ONE: Long = Long::from_bits(-1, -1);
    pub const MAX: Long = Long::from_bits(-1, i32::MAX);
    pub const MIN: Long = Long::from_bits(0, i32::MIN);

    /// Builds a value from its low and high 32-bit words.
    pub const fn from_bits(low: i32, high: i32) -> Self {
        Self { low, high }
    }

    pub fn from_i32(value: i32) -> Self {
        Self::from_bits(value, if value < 0 { -1 } else { 0 })
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_bits(value as i32, (value >> 32) as i32)
    }

    /// Converts a double, saturating at the 64-bit range. NaN and infinities map to zero.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::ZERO;
        }
        if value <= -TWO_PWR_63 {
            return Self::MIN;
        }
        if value + 1.0 >= TWO_PWR_63 {
            return Self::MAX;
        }
        if value < 0.0 {
            return -Self::from_f64(-value);
        }
        let low = (value % TWO_PWR_32).trunc() as u32 as i32;
        let high = (value / TWO_PWR_32).trunc() as i32;
        Self::from_bits(low, high)
    }

    pub fn low_bits(&self) -> i32 {
        self.low
    }

    pub fn high_bits(&self) -> i32 {
        self.high
    }

    pub fn low_bits_unsigned(&self) -> u32 {
        self.low as u32
    }

    /// Truncates to the low 32 bits.
    pub fn to_i32(&self) -> i32 {
        self.low
    }

    pub fn to_i64(&self) -> i64 {
        ((self.high as i64) << 32) | (self.low as u32 as i64)
    }

    /// Converts to a double; precision is lost above 2^53.
    pub fn to_f64(&self) -> f64 {
        self.high as f64 * TWO_PWR_32 + self.low_bits_unsigned() as f64
    }

    pub fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }

    pub fn is_negative(&self) -> bool {
        self.high < 0
    }

    pub fn is_odd(&self) -> bool {
        self.low & 1 == 1
    }

    /// Returns whether the value fits a signed 32-bit integer.
    pub fn fits_i32(&self) -> bool {
        (self.high == 0 && self.low >= 0) || (self.high == -1 && self.low < 0)
    }

    fn limbs(&self) -> [u64; 4] {
        let high = self.high as u32 as u64;
        let low = self.low as u32 as u64;
        [low & 0xFFFF, low >> 16, high & 0xFFFF, high >> 16]
    }

    fn from_limbs(c00: u64, c16: u64, c32: u64, c48: u64) -> Self {
        Self::from_bits(
            (((c16 & 0xFFFF) << 16) | (c00 & 0xFFFF)) as u32 as i32,
            (((c48 & 0xFFFF) << 16) | (c32 & 0xFFFF)) as u32 as i32,
        )
    }

    fn wrapping_add(self, other: Long) -> Long {
        let [a00, a16, a32, a48] = self.limbs();
        let [b00, b16, b32, b48] = other.limbs();

        let mut c00 = a00 + b00;
        let mut c16 = c00 >> 16;
        c00 &= 0xFFFF;
        c16 += a16 + b16;
        let mut c32 = c16 >> 16;
        c16 &= 0xFFFF;
        c32 += a32 + b32;
        let mut c48 = c32 >> 16;
        c32 &= 0xFFFF;
        c48 += a48 + b48;

        Self::from_limbs(c00, c16, c32, c48)
    }

    fn wrapping_mul(self, other: Long) -> Long {
        if self.is_zero() || other.is_zero() {
            return Self::ZERO;
        }
        let [a00, a16, a32, a48] = self.limbs();
        let [b00, b16, b32, b48] = other.limbs();

        let mut c00 = a00 * b00;
        let mut c16 = c00 >> 16;
        c00 &= 0xFFFF;

        c16 += a16 * b00;
        let mut c32 = c16 >> 16;
        c16 &= 0xFFFF;
        c16 += a00 * b16;
        c32 += c16 >> 16;
        c16 &= 0xFFFF;

        c32 += a32 * b00;
        let mut c48 = c32 >> 16;
        c32 &= 0xFFFF;
        c32 += a16 * b16;
        c48 += c32 >> 16;
        c32 &= 0xFFFF;
        c32 += a00 * b32;
        c48 += c32 >> 16;
        c32 &= 0xFFFF;

        c48 += a48 * b00 + a32 * b16 + a16 * b32 + a00 * b48;

        Self::from_limbs(c00, c16, c32, c48)
    }

    /// Compares the raw bits as an unsigned 64-bit quantity.
    fn compare_unsigned(&self, other: &Long) -> Ordering {
        (self.high as u32)
            .cmp(&(other.high as u32))
            .then((self.low as u32).cmp(&(other.low as u32)))
    }

    fn divide_unsigned(dividend: Long, divisor: Long) -> (Long, Long) {
        let mut quotient = Self::ZERO;
        let mut remainder = Self::ZERO;
        for bit in (0..64).rev() {
            remainder = (remainder << 1) | (dividend.shr_unsigned(bit) & Self::ONE);
            if remainder.compare_unsigned(&divisor) != Ordering::Less {
                remainder = remainder - divisor;
                quotient = quotient | (Self::ONE << bit);
            }
        }
        (quotient, remainder)
    }

    /// Truncating division. `MIN / -1` wraps to `MIN`.
    pub fn divide(&self, other: &Long) -> Result<Long, BsonError> {
        if other.is_zero() {
            return Err(BsonError::DivisionByZero);
        }
        if self.is_zero() {
            return Ok(Self::ZERO);
        }
        // Negating MIN yields MIN, whose unsigned reading is exactly 2^63.
        let dividend = if self.is_negative() { -*self } else { *self };
        let divisor = if other.is_negative() { -*other } else { *other };
        let (quotient, _) = Self::divide_unsigned(dividend, divisor);
        if self.is_negative() != other.is_negative() {
            Ok(-quotient)
        } else {
            Ok(quotient)
        }
    }

    /// Remainder with the sign of the dividend.
    pub fn modulo(&self, other: &Long) -> Result<Long, BsonError> {
        let quotient = self.divide(other)?;
        Ok(*self - quotient * *other)
    }

    /// Logical right shift; zeros are shifted in from the top.
    pub fn shr_unsigned(&self, bits: u32) -> Long {
        let bits = bits & 63;
        if bits == 0 {
            *self
        } else if bits < 32 {
            let low = ((self.low as u32) >> bits) | ((self.high as u32) << (32 - bits));
            Self::from_bits(low as i32, ((self.high as u32) >> bits) as i32)
        } else if bits == 32 {
            Self::from_bits(self.high, 0)
        } else {
            Self::from_bits(((self.high as u32) >> (bits - 32)) as i32, 0)
        }
    }

    /// Renders the value in the given radix (2..=36), lowercase digits.
    pub fn to_string_radix(&self, radix: u32) -> Result<String, BsonError> {
        if !(2..=36).contains(&radix) {
            return Err(BsonError::InvalidRadix(radix));
        }
        if self.is_zero() {
            return Ok("0".to_string());
        }

        let radix_long = Long::from_i32(radix as i32);
        if self.is_negative() {
            if *self == Self::MIN {
                // MIN has no positive counterpart: peel off the last digit first.
                let quotient = self.divide(&radix_long)?;
                let remainder = quotient * radix_long - *self;
                let digit = digit_char(remainder.to_i32() as u32, radix);
                return Ok(format!("{}{}", quotient.to_string_radix(radix)?, digit));
            }
            return Ok(format!("-{}", (-*self).to_string_radix(radix)?));
        }

        let mut digits = Vec::new();
        let mut rem = *self;
        while !rem.is_zero() {
            let (quotient, digit) = Self::divide_unsigned(rem, radix_long);
            digits.push(digit_char(digit.to_i32() as u32, radix));
            rem = quotient;
        }
        Ok(digits.iter().rev().collect())
    }

    /// Parses a radix string with an optional leading '-'. Values outside the
    /// 64-bit range wrap.
    pub fn from_str_radix(input: &str, radix: u32) -> Result<Long, BsonError> {
        if !(2..=36).contains(&radix) {
            return Err(BsonError::InvalidRadix(radix));
        }
        let invalid = || BsonError::InvalidNumber {
            input: input.to_string(),
            radix,
        };

        let (negative, digits) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input),
        };
        if digits.is_empty() {
            return Err(invalid());
        }

        let radix_long = Long::from_i32(radix as i32);
        let mut result = Self::ZERO;
        for ch in digits.chars() {
            let digit = ch.to_digit(radix).ok_or_else(invalid)?;
            result = result * radix_long + Long::from_i32(digit as i32);
        }
        Ok(if negative { -result } else { result })
    }
}

fn digit_char(digit: u32, radix: u32) -> char {
    std::char::from_digit(digit, radix).unwrap_or('0')
}

impl Ord for Long {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        match (self.is_negative(), other.is_negative()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            // Same sign: the difference cannot overflow.
            _ if (*self - *other).is_negative() => Ordering::Less,
            _ => Ordering::Greater,
        }
    }
}

impl PartialOrd for Long {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Long {
    type Output = Long;

    fn add(self, other: Long) -> Long {
        self.wrapping_add(other)
    }
}

impl Sub for Long {
    type Output = Long;

    fn sub(self, other: Long) -> Long {
        self.wrapping_add(-other)
    }
}

impl Mul for Long {
    type Output = Long;

    fn mul(self, other: Long) -> Long {
        self.wrapping_mul(other)
    }
}

impl Neg for Long {
    type Output = Long;

    fn neg(self) -> Long {
        if self == Self::MIN {
            return Self::MIN;
        }
        (!self).wrapping_add(Self::ONE)
    }
}

impl Not for Long {
    type Output = Long;

    fn not(self) -> Long {
        Self::from_bits(!self.low, !self.high)
    }
}

impl BitAnd for Long {
    type Output = Long;

    fn bitand(self, other: Long) -> Long {
        Self::from_bits(self.low & other.low, self.high & other.high)
    }
}

impl BitOr for Long {
    type Output = Long;

    fn bitor(self, other: Long) -> Long {
        Self::from_bits(self.low | other.low, self.high | other.high)
    }
}

impl BitXor for Long {
    type Output = Long;

    fn bitxor(self, other: Long) -> Long {
        Self::from_bits(self.low ^ other.low, self.high ^ other.high)
    }
}

impl Shl<u32> for Long {
    type Output = Long;

    fn shl(self, bits: u32) -> Long {
        let bits = bits & 63;
        if bits == 0 {
            self
        } else if bits < 32 {
            let high = (self.high << bits) | ((self.low as u32) >> (32 - bits)) as i32;
            Self::from_bits(self.low << bits, high)
        } else {
            Self::from_bits(0, self.low << (bits - 32))
        }
    }
}

impl Shr<u32> for Long {
    type Output = Long;

    /// Arithmetic right shift; the sign bit is replicated.
    fn shr(self, bits: u32) -> Long {
        let bits = bits & 63;
        if bits == 0 {
            self
        } else if bits < 32 {
            let low = ((self.low as u32) >> bits) | ((self.high as u32) << (32 - bits));
            Self::from_bits(low as i32, self.high >> bits)
        } else {
            let fill = if self.high >= 0 { 0 } else { -1 };
            Self::from_bits(self.high >> (bits - 32), fill)
        }
    }
}

impl From<i64> for Long {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<i32> for Long {
    fn from(value: i32) -> Self {
        Self::from_i32(value)
    }
}

impl From<Long> for i64 {
    fn from(value: Long) -> Self {
        value.to_i64()
    }
}

impl fmt::Display for Long {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_string_radix(10).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl fmt::Debug for Long {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Long({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn l(v: i64) -> Long {
        Long::from_i64(v)
    }

    #[test]
    fn test_word_layout() {
        let value = Long::from_bits(1, 2);
        assert_eq!(value.to_i64(), (2i64 << 32) + 1);
        assert_eq!(l(-1).low_bits(), -1);
        assert_eq!(l(-1).high_bits(), -1);
        assert_eq!(Long::MIN.to_i64(), i64::MIN);
        assert_eq!(Long::MAX.to_i64(), i64::MAX);
    }

    #[test]
    fn test_min_value_boundaries() {
        assert_eq!(-Long::MIN, Long::MIN);
        assert_eq!(Long::MIN.divide(&Long::NEG_ONE).unwrap(), Long::MIN);
        assert_eq!(Long::MIN.divide(&Long::MIN).unwrap(), Long::ONE);
        assert_eq!(l(5).divide(&Long::MIN).unwrap(), Long::ZERO);
        assert!(Long::MIN < Long::MAX);
        assert!(Long::MIN < l(0));
        assert_eq!(Long::MAX + Long::ONE, Long::MIN);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(l(10).divide(&Long::ZERO), Err(BsonError::DivisionByZero));
        assert_eq!(l(10).modulo(&Long::ZERO), Err(BsonError::DivisionByZero));
    }

    #[test]
    fn test_f64_conversion() {
        assert_eq!(Long::from_f64(12345.9), l(12345));
        assert_eq!(Long::from_f64(-12345.9), l(-12345));
        assert_eq!(Long::from_f64(f64::NAN), Long::ZERO);
        assert_eq!(Long::from_f64(1e300), Long::MAX);
        assert_eq!(Long::from_f64(-1e300), Long::MIN);
        assert_eq!(l(1 << 40).to_f64(), (1u64 << 40) as f64);
        assert_eq!(l(-7).to_f64(), -7.0);
    }

    #[test]
    fn test_radix_strings() {
        assert_eq!(l(255).to_string_radix(16).unwrap(), "ff");
        assert_eq!(l(-255).to_string_radix(2).unwrap(), "-11111111");
        assert_eq!(
            Long::MIN.to_string_radix(10).unwrap(),
            "-9223372036854775808"
        );
        assert_eq!(Long::from_str_radix("-ff", 16).unwrap(), l(-255));
        assert_eq!(
            Long::from_str_radix("9223372036854775807", 10).unwrap(),
            Long::MAX
        );
        assert!(Long::from_str_radix("12z", 10).is_err());
        assert!(Long::from_str_radix("-", 10).is_err());
        assert_eq!(l(1).to_string_radix(37), Err(BsonError::InvalidRadix(37)));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(l(1) << 63, Long::MIN);
        assert_eq!(Long::MIN >> 63, Long::NEG_ONE);
        assert_eq!(Long::MIN.shr_unsigned(63), Long::ONE);
        assert_eq!(l(-1).shr_unsigned(32), l(0xFFFF_FFFF));
    }

    #[test]
    fn test_fits_i32() {
        assert!(l(i32::MAX as i64).fits_i32());
        assert!(l(i32::MIN as i64).fits_i32());
        assert!(!l(i32::MAX as i64 + 1).fits_i32());
        assert!(!l(i32::MIN as i64 - 1).fits_i32());
    }

    #[test]
    fn test_display() {
        assert_eq!(l(-42).to_string(), "-42");
        assert_eq!(format!("{:?}", l(7)), "Long(7)");
    }

    proptest! {
        #[test]
        fn prop_arithmetic_matches_i64(a: i64, b: i64) {
            prop_assert_eq!((l(a) + l(b)).to_i64(), a.wrapping_add(b));
            prop_assert_eq!((l(a) - l(b)).to_i64(), a.wrapping_sub(b));
            prop_assert_eq!((l(a) * l(b)).to_i64(), a.wrapping_mul(b));
            prop_assert_eq!((-l(a)).to_i64(), a.wrapping_neg());
            prop_assert_eq!(l(a).cmp(&l(b)), a.cmp(&b));
            if b != 0 {
                prop_assert_eq!(l(a).divide(&l(b)).unwrap().to_i64(), a.wrapping_div(b));
                prop_assert_eq!(l(a).modulo(&l(b)).unwrap().to_i64(), a.wrapping_rem(b));
            }
        }

        #[test]
        fn prop_bitwise_matches_i64(a: i64, b: i64, shift in 0u32..64) {
            prop_assert_eq!((l(a) & l(b)).to_i64(), a & b);
            prop_assert_eq!((l(a) | l(b)).to_i64(), a | b);
            prop_assert_eq!((l(a) ^ l(b)).to_i64(), a ^ b);
            prop_assert_eq!((!l(a)).to_i64(), !a);
            prop_assert_eq!((l(a) << shift).to_i64(), a.wrapping_shl(shift));
            prop_assert_eq!((l(a) >> shift).to_i64(), a.wrapping_shr(shift));
            prop_assert_eq!(l(a).shr_unsigned(shift).to_i64(), ((a as u64) >> shift) as i64);
        }

        #[test]
        fn prop_decimal_string_matches_i64(a: i64) {
            prop_assert_eq!(l(a).to_string(), a.to_string());
            prop_assert_eq!(Long::from_str_radix(&a.to_string(), 10).unwrap(), l(a));
        }
    }
}
