//! Arbitrary-precision two's-complement integer.
//!
//! The value is a little-endian vector of 32-bit words followed by an
//! infinite run of `sign` words (all zeros or all ones). Representations are
//! kept normalized: trailing words equal to the sign word are dropped, so
//! structural equality is numeric equality.

use crate::error::BsonError;
use crate::long::Long;
use std::cmp::Ordering;
use std::fmt;

const TWO_PWR_32: f64 = 4_294_967_296.0;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Integer {
    words: Vec<u32>,
    sign: u32,
}

impl Integer {
    pub fn zero() -> Self {
        Self {
            words: Vec::new(),
            sign: 0,
        }
    }

    pub fn one() -> Self {
        Self::from_i32(1)
    }

    /// Builds a value from little-endian words; the top bit of the last word
    /// is taken as the sign.
    pub fn from_words(words: Vec<u32>) -> Self {
        let sign = match words.last() {
            Some(top) if top & 0x8000_0000 != 0 => u32::MAX,
            _ => 0,
        };
        Self::normalized(words, sign)
    }

    fn normalized(mut words: Vec<u32>, sign: u32) -> Self {
        while words.last() == Some(&sign) {
            words.pop();
        }
        Self { words, sign }
    }

    pub fn from_i32(value: i32) -> Self {
        Self::normalized(vec![value as u32], if value < 0 { u32::MAX } else { 0 })
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from(Long::from_i64(value))
    }

    /// Converts the integral part of a double. NaN and infinities map to zero.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::zero();
        }
        if value < 0.0 {
            return Self::from_f64(-value).negate();
        }
        let mut words = Vec::new();
        let mut pow = 1.0;
        while value >= pow {
            words.push(((value / pow).trunc() % TWO_PWR_32) as u32);
            pow *= TWO_PWR_32;
        }
        Self::normalized(words, 0)
    }

    /// Word `index`, sign-extended past the stored words.
    pub fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(self.sign)
    }

    pub fn is_zero(&self) -> bool {
        self.sign == 0 && self.words.is_empty()
    }

    pub fn is_negative(&self) -> bool {
        self.sign != 0
    }

    pub fn is_odd(&self) -> bool {
        self.word(0) & 1 == 1
    }

    pub fn to_i32(&self) -> i32 {
        self.word(0) as i32
    }

    /// Truncates to the low 64 bits.
    pub fn to_long(&self) -> Long {
        Long::from_bits(self.word(0) as i32, self.word(1) as i32)
    }

    pub fn to_f64(&self) -> f64 {
        if self.is_negative() {
            return -self.negate().to_f64();
        }
        let mut value = 0.0;
        let mut pow = 1.0;
        for word in &self.words {
            value += *word as f64 * pow;
            pow *= TWO_PWR_32;
        }
        value
    }

    pub fn negate(&self) -> Integer {
        self.not().add(&Self::one())
    }

    pub fn add(&self, other: &Integer) -> Integer {
        let len = self.words.len().max(other.words.len()) + 1;
        let mut words = Vec::with_capacity(len);
        let mut carry = 0u64;
        for i in 0..len {
            let sum = self.word(i) as u64 + other.word(i) as u64 + carry;
            words.push(sum as u32);
            carry = sum >> 32;
        }
        Self::from_words(words)
    }

    pub fn subtract(&self, other: &Integer) -> Integer {
        self.add(&other.negate())
    }

    pub fn multiply(&self, other: &Integer) -> Integer {
        if self.is_zero() || other.is_zero() {
            return Self::zero();
        }
        match (self.is_negative(), other.is_negative()) {
            (true, true) => return self.negate().multiply(&other.negate()),
            (true, false) => return self.negate().multiply(other).negate(),
            (false, true) => return self.multiply(&other.negate()).negate(),
            (false, false) => {}
        }

        // Schoolbook multiplication over 16-bit limbs with explicit carries.
        let len = self.words.len() + other.words.len();
        let mut limbs = vec![0u64; 2 * len + 1];
        for i in 0..self.words.len() {
            let a = self.words[i] as u64;
            let (a1, a0) = (a >> 16, a & 0xFFFF);
            for j in 0..other.words.len() {
                let b = other.words[j] as u64;
                let (b1, b0) = (b >> 16, b & 0xFFFF);
                let base = 2 * i + 2 * j;
                limbs[base] += a0 * b0;
                carry16(&mut limbs, base);
                limbs[base + 1] += a1 * b0;
                carry16(&mut limbs, base + 1);
                limbs[base + 1] += a0 * b1;
                carry16(&mut limbs, base + 1);
                limbs[base + 2] += a1 * b1;
                carry16(&mut limbs, base + 2);
            }
        }

        let words = (0..len)
            .map(|i| ((limbs[2 * i + 1] << 16) | limbs[2 * i]) as u32)
            .collect();
        Self::normalized(words, 0)
    }

    /// Truncating division.
    pub fn divide(&self, other: &Integer) -> Result<Integer, BsonError> {
        Ok(self.divide_with_remainder(other)?.0)
    }

    /// Remainder with the sign of the dividend.
    pub fn modulo(&self, other: &Integer) -> Result<Integer, BsonError> {
        Ok(self.divide_with_remainder(other)?.1)
    }

    fn divide_with_remainder(&self, other: &Integer) -> Result<(Integer, Integer), BsonError> {
        if other.is_zero() {
            return Err(BsonError::DivisionByZero);
        }
        if self.is_zero() {
            return Ok((Self::zero(), Self::zero()));
        }

        let dividend = if self.is_negative() { self.negate() } else { self.clone() };
        let divisor = if other.is_negative() { other.negate() } else { other.clone() };

        let mut quotient = Self::zero();
        let mut remainder = Self::zero();
        for bit in (0..dividend.words.len() * 32).rev() {
            let next = (dividend.word(bit / 32) >> (bit % 32)) & 1;
            remainder = remainder.shift_left(1);
            if next == 1 {
                remainder = remainder.or(&Self::one());
            }
            if remainder.compare(&divisor) != Ordering::Less {
                remainder = remainder.subtract(&divisor);
                quotient = quotient.or(&Self::one().shift_left(bit as u32));
            }
        }

        if self.is_negative() != other.is_negative() {
            quotient = quotient.negate();
        }
        if self.is_negative() {
            remainder = remainder.negate();
        }
        Ok((quotient, remainder))
    }

    pub fn not(&self) -> Integer {
        Self::normalized(self.words.iter().map(|w| !w).collect(), !self.sign)
    }

    pub fn and(&self, other: &Integer) -> Integer {
        self.zip_words(other, |a, b| a & b)
    }

    pub fn or(&self, other: &Integer) -> Integer {
        self.zip_words(other, |a, b| a | b)
    }

    pub fn xor(&self, other: &Integer) -> Integer {
        self.zip_words(other, |a, b| a ^ b)
    }

    fn zip_words(&self, other: &Integer, op: impl Fn(u32, u32) -> u32) -> Integer {
        let len = self.words.len().max(other.words.len());
        let words = (0..len).map(|i| op(self.word(i), other.word(i))).collect();
        Self::normalized(words, op(self.sign, other.sign))
    }

    pub fn shift_left(&self, bits: u32) -> Integer {
        let word_shift = (bits / 32) as usize;
        let bit_shift = bits % 32;
        let len = self.words.len() + word_shift + usize::from(bit_shift > 0);
        let mut words = Vec::with_capacity(len);
        for i in 0..len {
            let current = self.word_shifted(i, word_shift);
            if bit_shift == 0 {
                words.push(current);
                continue;
            }
            let carried = if i > 0 {
                self.word_shifted(i - 1, word_shift) >> (32 - bit_shift)
            } else {
                0
            };
            words.push((current << bit_shift) | carried);
        }
        Self::normalized(words, self.sign)
    }

    fn word_shifted(&self, index: usize, word_shift: usize) -> u32 {
        if index < word_shift {
            0
        } else {
            self.word(index - word_shift)
        }
    }

    /// Arithmetic right shift.
    pub fn shift_right(&self, bits: u32) -> Integer {
        let word_shift = (bits / 32) as usize;
        let bit_shift = bits % 32;
        if word_shift >= self.words.len() {
            return Self::normalized(Vec::new(), self.sign);
        }
        let len = self.words.len() - word_shift;
        let words = (0..len)
            .map(|i| {
                let lo = self.word(i + word_shift);
                if bit_shift > 0 {
                    (lo >> bit_shift) | (self.word(i + word_shift + 1) << (32 - bit_shift))
                } else {
                    lo
                }
            })
            .collect();
        Self::normalized(words, self.sign)
    }

    /// Ordering by the sign of the difference.
    pub fn compare(&self, other: &Integer) -> Ordering {
        let diff = self.subtract(other);
        if diff.is_zero() {
            Ordering::Equal
        } else if diff.is_negative() {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    pub fn to_string_radix(&self, radix: u32) -> Result<String, BsonError> {
        if !(2..=36).contains(&radix) {
            return Err(BsonError::InvalidRadix(radix));
        }
        if self.is_zero() {
            return Ok("0".to_string());
        }
        if self.is_negative() {
            return Ok(format!("-{}", self.negate().to_string_radix(radix)?));
        }

        let radix_int = Integer::from_i32(radix as i32);
        let mut digits = Vec::new();
        let mut rem = self.clone();
        while !rem.is_zero() {
            let (quotient, digit) = rem.divide_with_remainder(&radix_int)?;
            digits.push(std::char::from_digit(digit.to_i32() as u32, radix).unwrap_or('0'));
            rem = quotient;
        }
        Ok(digits.iter().rev().collect())
    }

    pub fn from_str_radix(input: &str, radix: u32) -> Result<Integer, BsonError> {
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

        let radix_int = Integer::from_i32(radix as i32);
        let mut result = Self::zero();
        for ch in digits.chars() {
            let digit = ch.to_digit(radix).ok_or_else(invalid)?;
            result = result
                .multiply(&radix_int)
                .add(&Integer::from_i32(digit as i32));
        }
        Ok(if negative { result.negate() } else { result })
    }
}

fn carry16(limbs: &mut [u64], mut index: usize) {
    while limbs[index] & 0xFFFF != limbs[index] {
        limbs[index + 1] += limbs[index] >> 16;
        limbs[index] &= 0xFFFF;
        index += 1;
    }
}

impl Ord for Integer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Integer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Long> for Integer {
    fn from(value: Long) -> Self {
        Self::from_words(vec![value.low_bits() as u32, value.high_bits() as u32])
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_string_radix(10).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl fmt::Debug for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Integer({})", self)
    }
}
