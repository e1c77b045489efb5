//! The ND100 48-bit floating point format.
//!
//! A value is held in three words, normally the T, A and D registers:
//!
//! ```text
//!   T: | S | exponent (15 bits, bias 16384) |
//!   A: | mantissa bits 31..16               |
//!   D: | mantissa bits 15..0                |
//! ```
//!
//! The mantissa is a binary fraction in [0.5, 1) with its leading one
//! stored. Zero is "standardized" as all three words zero.
//!
//! Multiply and divide run on exact integer arithmetic wide enough to
//! reproduce an 80-bit extended intermediate, then re-quantize the result
//! to 32 mantissa bits with [`truncate_mantissa`], which truncates exactly
//! the way a bit-by-bit magnitude comparison does.

use serde::{Deserialize, Serialize};

/// Exponent bias.
pub const BIAS: i32 = 16384;
/// Largest representable unbiased exponent.
pub const EXP_MAX: i32 = 16383;
/// Smallest representable unbiased exponent.
pub const EXP_MIN: i32 = -16384;

const SIGN: u16 = 0x8000;

/// Outcome flags of a float operation. Only FAD turns `Inexact` into TG;
/// the others leave the status register alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatStatus {
    Exact,
    /// Bits were lost while aligning operands.
    Inexact,
    Overflow,
    Underflow,
    DivideByZero,
}

/// A float in ND register layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NdFloat {
    /// Sign and biased exponent (T).
    pub exp_word: u16,
    /// High mantissa word (A).
    pub hi: u16,
    /// Low mantissa word (D).
    pub lo: u16,
}

impl NdFloat {
    pub const ZERO: NdFloat = NdFloat { exp_word: 0, hi: 0, lo: 0 };

    pub fn from_words(words: [u16; 3]) -> Self {
        Self { exp_word: words[0], hi: words[1], lo: words[2] }
    }

    pub fn words(&self) -> [u16; 3] {
        [self.exp_word, self.hi, self.lo]
    }

    pub fn negative(&self) -> bool {
        self.exp_word & SIGN != 0
    }

    /// Unbiased exponent.
    pub fn exponent(&self) -> i32 {
        (self.exp_word & 0x7fff) as i32 - BIAS
    }

    pub fn mantissa(&self) -> u32 {
        (self.hi as u32) << 16 | self.lo as u32
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa() == 0
    }

    pub fn negated(&self) -> Self {
        Self { exp_word: self.exp_word ^ SIGN, ..*self }
    }

    /// Build from parts, applying the range checks shared by all operations.
    fn pack(negative: bool, exponent: i32, mantissa: u32) -> (Self, Option<FloatStatus>) {
        let sign = if negative { SIGN } else { 0 };
        if exponent > EXP_MAX {
            let max = Self { exp_word: sign | 0x7fff, hi: 0xffff, lo: 0xffff };
            return (max, Some(FloatStatus::Overflow));
        }
        if exponent < EXP_MIN {
            return (Self { exp_word: sign, hi: 0, lo: 0 }, Some(FloatStatus::Underflow));
        }
        let value = Self {
            exp_word: sign | (exponent + BIAS) as u16,
            hi: (mantissa >> 16) as u16,
            lo: mantissa as u16,
        };
        (value, None)
    }

    /// Convert to a host double. Used for diagnostics and tests only; it
    /// loses precision below 2^-52 of the mantissa.
    pub fn to_f64(&self) -> f64 {
        let m = self.mantissa() as f64 / 4294967296.0;
        let v = m * (self.exponent() as f64).exp2();
        if self.negative() { -v } else { v }
    }
}

// ==================== Add / Sub ====================

/// Floating add (FAD).
///
/// The smaller operand is aligned by shifting right; if any one bit is
/// lost, the least significant result bit is forced to one *before* a
/// carry out of the mantissa is handled, so a carry shift may discard it
/// again.
pub fn add(a: NdFloat, b: NdFloat) -> (NdFloat, FloatStatus) {
    let mut exp_r;
    let mut ma = a.mantissa();
    let mut mb = b.mantissa();
    let mut exact = true;

    let (ea, eb) = (a.exponent(), b.exponent());
    if ea > eb {
        exact = align(&mut mb, (ea - eb) as u32);
        exp_r = ea;
    } else if eb > ea {
        exact = align(&mut ma, (eb - ea) as u32);
        exp_r = eb;
    } else {
        exp_r = ea;
    }

    let mut carry = false;
    let mut negative;
    let mut r;
    if a.negative() == b.negative() {
        negative = a.negative();
        let (sum, c) = ma.overflowing_add(mb);
        r = sum;
        carry = c;
    } else if ma >= mb {
        r = ma - mb;
        negative = a.negative();
    } else {
        r = mb - ma;
        negative = b.negative();
    }

    if !exact {
        r |= 1;
    }
    if carry {
        exp_r += 1;
        r = (r >> 1) | 0x8000_0000;
    }

    if r != 0 {
        let shift = r.leading_zeros();
        r <<= shift;
        exp_r -= shift as i32;
    } else {
        exp_r = 0;
        negative = false;
    }

    let (mut value, range) = NdFloat::pack(negative, exp_r, r);
    if let Some(status) = range {
        return (value, status);
    }
    if value.exp_word == 0o40000 && value.hi == 0 && value.lo == 0 {
        value.exp_word = 0;
    }
    let status = if exact { FloatStatus::Exact } else { FloatStatus::Inexact };
    (value, status)
}

/// Shift a mantissa right by `delta`, returning whether the shift was
/// exact. Shifting by 32 or more clears it.
fn align(m: &mut u32, delta: u32) -> bool {
    if delta >= 32 {
        let exact = *m == 0;
        *m = 0;
        return exact;
    }
    let lost = *m & !(u32::MAX << delta);
    *m >>= delta;
    lost == 0
}

/// Floating subtract (FSB): `a - b`, done as `a + (-b)`.
pub fn sub(a: NdFloat, b: NdFloat) -> (NdFloat, FloatStatus) {
    add(a, b.negated())
}

// ==================== Mul / Div ====================

/// Re-quantize a positive binary fraction to 32 mantissa bits by testing
/// each bit from 2^-1 downward and keeping it when the running sum does
/// not exceed the value.
///
/// `frac` is given as a fixed-point number with `frac_bits` fraction bits
/// and must be below one. The result is exactly the leading 32 fraction
/// bits.
pub fn truncate_mantissa(frac: u128, frac_bits: u32) -> u32 {
    let mut res = 0u32;
    let mut acc = 0u128;
    for i in 1..=32u32 {
        if i > frac_bits {
            break;
        }
        let bit = 1u128 << (frac_bits - i);
        if acc + bit <= frac {
            acc += bit;
            res |= 1 << (32 - i);
        }
    }
    res
}

/// Round a positive integer to 64 significant bits, nearest-even, the way
/// an extended-precision intermediate does. `sticky` reports nonzero bits
/// below the given value. Returns the rounded significand (top bit set)
/// and the power of two it is scaled by.
fn round_to_extended(v: u128, sticky: bool) -> (u64, i32) {
    let len = 128 - v.leading_zeros();
    if len <= 64 {
        return ((v << (64 - len)) as u64, len as i32 - 64);
    }
    let shift = len - 64;
    let mut kept = v >> shift;
    let dropped = v & ((1u128 << shift) - 1);
    let half = 1u128 << (shift - 1);
    if dropped > half || (dropped == half && (sticky || kept & 1 == 1)) {
        kept += 1;
    }
    if kept >> 64 != 0 {
        return ((kept >> 1) as u64, shift as i32 + 1);
    }
    (kept as u64, shift as i32)
}

/// Pack an extended significand (top bit set) holding `sig * 2^scale`.
fn from_extended(negative: bool, sig: u64, scale: i32) -> (NdFloat, FloatStatus) {
    // value = (sig / 2^64) * 2^(scale + 64)
    let mantissa = truncate_mantissa(sig as u128, 64);
    if mantissa == 0 {
        return (NdFloat::ZERO, FloatStatus::Exact);
    }
    let (value, range) = NdFloat::pack(negative, scale + 64, mantissa);
    (value, range.unwrap_or(FloatStatus::Exact))
}

/// Floating multiply (FMU).
pub fn mul(a: NdFloat, b: NdFloat) -> (NdFloat, FloatStatus) {
    let product = a.mantissa() as u128 * b.mantissa() as u128;
    if product == 0 {
        return (NdFloat::ZERO, FloatStatus::Exact);
    }
    let (sig, scale) = round_to_extended(product, false);
    // mantissas are fractions of 2^32 each
    let scale = scale + a.exponent() + b.exponent() - 64;
    from_extended(a.negative() != b.negative(), sig, scale)
}

/// Floating divide (FDV): `a / b`.
///
/// A zero divisor mantissa yields the largest positive value and
/// [`FloatStatus::DivideByZero`].
pub fn div(a: NdFloat, b: NdFloat) -> (NdFloat, FloatStatus) {
    if b.mantissa() == 0 {
        let max = NdFloat { exp_word: 0x7fff, hi: 0xffff, lo: 0xffff };
        return (max, FloatStatus::DivideByZero);
    }
    if a.mantissa() == 0 {
        return (NdFloat::ZERO, FloatStatus::Exact);
    }
    let num = (a.mantissa() as u128) << 96;
    let den = b.mantissa() as u128;
    let (quot, rem) = (num / den, num % den);
    let (sig, scale) = round_to_extended(quot, rem != 0);
    let scale = scale - 96 + a.exponent() - b.exponent();
    from_extended(a.negative() != b.negative(), sig, scale)
}

// ==================== NLZ / DNZ ====================

/// Normalize (NLZ): integer in A to a float, scaled by `2^(scaling - 16)`.
/// D is always cleared.
pub fn normalize(a: u16, scaling: i8) -> NdFloat {
    if a == 0 {
        return NdFloat::ZERO;
    }
    let value = a as i16 as i32;
    let magnitude = value.unsigned_abs();
    let bits = 32 - magnitude.leading_zeros();
    let exponent = bits as i32 + scaling as i32 - 16;
    // 15 truncated bits land in A bits 15..1
    let frac = (magnitude as u128) << (64 - bits);
    let hi = (truncate_mantissa(frac, 64) >> 16) as u16 & 0xfffe;
    let sign = if value < 0 { SIGN } else { 0 };
    NdFloat {
        exp_word: sign | ((BIAS + exponent) as u16),
        hi,
        lo: 0,
    }
}

/// Result of [`denormalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denormalized {
    /// New A register.
    pub a: u16,
    /// Integer magnitude above 32767; sets Z.
    pub overflow: bool,
}

/// Denormalize (DNZ): float in T:A:D to a truncated integer scaled by
/// `2^(scaling + 16)`. Only the upper 31 mantissa bits take part.
pub fn denormalize(value: NdFloat, scaling: i8) -> Denormalized {
    let m31 = (value.mantissa() >> 1) as u128;
    // value = m31 / 2^31 * 2^exp, then scaled
    let shift = value.exponent() + scaling as i32 + 16 - 31;
    let (magnitude, huge) = if shift >= 0 {
        if shift > 64 {
            (0u128, m31 != 0)
        } else {
            (m31 << shift, false)
        }
    } else if shift <= -128 {
        (0, false)
    } else {
        (m31 >> (-shift) as u32, false)
    };
    let overflow = huge || magnitude > 32767;
    let signed = if value.negative() {
        (magnitude as i128).wrapping_neg()
    } else {
        magnitude as i128
    };
    Denormalized { a: signed as u16, overflow }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn one() -> NdFloat {
        // 0.5 * 2^1
        NdFloat { exp_word: 0o40001, hi: 0x8000, lo: 0 }
    }

    fn from_parts(negative: bool, exp: i32, mantissa: u32) -> NdFloat {
        NdFloat::pack(negative, exp, mantissa).0
    }

    #[test]
    fn test_one_plus_one() {
        let (r, st) = add(one(), one());
        assert_eq!(st, FloatStatus::Exact);
        assert_eq!(r.to_f64(), 2.0);
        assert_eq!(r.words(), [0o40002, 0x8000, 0]);
    }

    #[test]
    fn test_sub_to_standard_zero() {
        let x = from_parts(true, 7, 0xdead_beef);
        let (r, st) = sub(x, x);
        assert_eq!(r, NdFloat::ZERO);
        assert_eq!(st, FloatStatus::Exact);
    }

    #[test]
    fn test_mixed_sign_add() {
        let three = from_parts(false, 2, 0xc000_0000);
        let (r, _) = add(three, one().negated());
        assert_eq!(r.to_f64(), 2.0);
    }

    #[test]
    fn test_wide_delta_keeps_larger_and_marks_inexact() {
        let big = from_parts(false, 40, 0x8000_0000);
        let tiny = from_parts(false, 1, 0x8000_0001);
        let (r, st) = add(big, tiny);
        assert_eq!(st, FloatStatus::Inexact);
        assert_eq!(r.exp_word, big.exp_word);
        assert_eq!(r.mantissa(), 0x8000_0001);
    }

    #[test]
    fn test_sticky_bit_lost_on_carry() {
        // 0xc0000000 + 0x40000000 carries out; the forced lsb is shifted away
        let a = from_parts(false, 1, 0xc000_0000);
        let b = from_parts(false, 0, 0x8000_0001);
        let (r, st) = add(a, b);
        assert_eq!(st, FloatStatus::Inexact);
        assert_eq!(r.exponent(), 2);
        assert_eq!(r.mantissa(), 0x8000_0000);
    }

    #[test]
    fn test_add_overflow() {
        let max = NdFloat { exp_word: 0x7fff, hi: 0x8000, lo: 0 };
        let (r, st) = add(max, max);
        assert_eq!(st, FloatStatus::Overflow);
        assert_eq!(r.words(), [0x7fff, 0xffff, 0xffff]);
    }

    #[test]
    fn test_mul_and_div() {
        let three = from_parts(false, 2, 0xc000_0000);
        let (six, st) = mul(three, from_parts(false, 2, 0x8000_0000));
        assert_eq!(st, FloatStatus::Exact);
        assert_eq!(six.to_f64(), 6.0);

        let (third, _) = div(one(), three);
        assert_eq!(third.exponent(), -1);
        assert_eq!(third.mantissa(), 0xaaaa_aaaa);

        let (neg, _) = mul(three.negated(), one());
        assert!(neg.negative());
        assert_eq!(neg.to_f64(), -3.0);
    }

    #[test]
    fn test_div_by_zero() {
        let (r, st) = div(one(), NdFloat::ZERO);
        assert_eq!(st, FloatStatus::DivideByZero);
        assert_eq!(r.words(), [0x7fff, 0xffff, 0xffff]);
    }

    #[test]
    fn test_truncate_mantissa() {
        // 0.1111...1 with 40 fraction bits keeps the first 32
        let v = (1u128 << 40) - 1;
        assert_eq!(truncate_mantissa(v, 40), u32::MAX);
        assert_eq!(truncate_mantissa(1u128 << 39, 40), 0x8000_0000);
    }

    #[test]
    fn test_normalize() {
        let f = normalize(1, 16);
        assert_eq!(f.to_f64(), 1.0);
        assert_eq!(f.lo, 0);

        let f = normalize((-5i16) as u16, 16);
        assert_eq!(f.to_f64(), -5.0);

        assert_eq!(normalize(0, 16), NdFloat::ZERO);
    }

    #[test]
    fn test_denormalize() {
        let five = normalize(5, 16);
        assert_eq!(denormalize(five, -16), Denormalized { a: 5, overflow: false });

        let neg = normalize((-300i16) as u16, 16);
        assert_eq!(denormalize(neg, -16).a as i16, -300);

        let big = from_parts(false, 20, 0x8000_0000);
        assert!(denormalize(big, -16).overflow);
    }

    fn normalized() -> impl Strategy<Value = NdFloat> {
        (any::<bool>(), -1000i32..1000, 0x8000_0000u32..=u32::MAX)
            .prop_map(|(s, e, m)| from_parts(s, e, m))
    }

    proptest! {
        #[test]
        fn prop_zero_is_identity(x in normalized()) {
            let (r, st) = add(NdFloat::ZERO, x);
            prop_assert_eq!(r, x);
            prop_assert_eq!(st, FloatStatus::Exact);
            let (r, _) = add(x, NdFloat::ZERO);
            prop_assert_eq!(r, x);
        }

        #[test]
        fn prop_self_difference_is_zero(x in normalized()) {
            prop_assert_eq!(sub(x, x).0, NdFloat::ZERO);
        }

        #[test]
        fn prop_mul_by_one(x in normalized()) {
            prop_assert_eq!(mul(x, one()).0, x);
        }
    }
}
