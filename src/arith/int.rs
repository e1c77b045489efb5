//! Integer arithmetic and the flag rules that go with it.
//!
//! The ND100 keeps two overflow flags: Q (dynamic) follows the last
//! operation, O (static) is only ever set here and must be cleared by
//! software. Callers apply an [`AddOutcome`] accordingly.

/// Result of the 16-bit adder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub value: u16,
    /// Carry out of bit 15.
    pub carry: bool,
    /// Both operands had the same sign and the result sign differs.
    /// Sets O and Q; when false only Q is cleared.
    pub overflow: bool,
}

/// `a + b + k` with ND flag semantics.
///
/// The overflow test looks at the two operands as given, so for a
/// subtraction it sees the complemented subtrahend.
pub fn add(a: u16, b: u16, carry_in: bool) -> AddOutcome {
    let sum = a as u32 + b as u32 + carry_in as u32;
    let value = sum as u16;
    let same_sign = (a ^ b) & 0x8000 == 0;
    AddOutcome {
        value,
        carry: sum & 0xffff_0000 != 0,
        overflow: same_sign && (a ^ value) & 0x8000 != 0,
    }
}

/// `a - b` as one's complement plus carry.
#[inline]
pub fn sub(a: u16, b: u16) -> AddOutcome {
    add(a, !b, true)
}

/// Sign-extend the low byte of an instruction word.
#[inline]
pub fn sign_extend_byte(word: u16) -> u16 {
    word as u8 as i8 as i16 as u16
}

/// Word multiply (MPY). Returns the low 16 bits of the signed product and
/// whether its magnitude exceeds 32767.
pub fn mpy(a: u16, b: u16) -> (u16, bool) {
    let product = a as i16 as i32 * b as i16 as i32;
    (product as u16, product.unsigned_abs() > 32767)
}

/// Register multiply (RMPY). Returns `(high, low, overflow)` where overflow
/// means the product magnitude is outside the signed 32-bit range.
pub fn rmpy(a: u16, b: u16) -> (u16, u16, bool) {
    let product = a as i16 as i64 * b as i16 as i64;
    let overflow = product.unsigned_abs() > i32::MAX as u64;
    let bits = product as u32;
    ((bits >> 16) as u16, bits as u16, overflow)
}

/// Register divide (RDIV): `A:D / divisor`, truncating toward zero.
///
/// Returns `(quotient, remainder)` reduced to 16 bits, or `None` when
/// the divisor is zero.
pub fn rdiv(a: u16, d: u16, divisor: u16) -> Option<(u16, u16)> {
    let dividend = ((a as u32) << 16 | d as u32) as i32;
    let divisor = divisor as i16 as i32;
    if divisor == 0 {
        return None;
    }
    let quotient = dividend.wrapping_div(divisor);
    let remainder = dividend.wrapping_rem(divisor);
    Some((quotient as u16, remainder as u16))
}

// ==================== Shifts ====================

/// Fill mode of a shift instruction, bits 9-10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    /// Arithmetic: right shift replicates the sign, left shift fills 0.
    Plain,
    /// Rotate through the word.
    Rotate,
    /// Zero fill.
    ZeroIn,
    /// Fill with the M flag as it was before the shift.
    LinkIn,
}

/// Decoded shift field of SHT/SHD/SHA/SAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftOp {
    pub kind: ShiftKind,
    /// Positive shifts left, negative shifts right.
    pub count: i8,
}

impl ShiftOp {
    pub fn from_instruction(instr: u16) -> Self {
        let kind = match (instr >> 9) & 3 {
            0 => ShiftKind::Plain,
            1 => ShiftKind::Rotate,
            2 => ShiftKind::ZeroIn,
            _ => ShiftKind::LinkIn,
        };
        // 6-bit two's complement count
        let raw = (instr & 0x3f) as i8;
        let count = if raw & 0x20 != 0 { raw - 64 } else { raw };
        Self { kind, count }
    }
}

/// Shift the low `width` bits of `value`. Returns the new value and the new
/// M flag, which is the last bit shifted out (or `m` when the count is 0).
fn shift_bits(value: u32, width: u32, op: ShiftOp, m: bool) -> (u32, bool) {
    let msb = 1u32 << (width - 1);
    let mask = if width == 32 { u32::MAX } else { (1 << width) - 1 };
    let right = op.count < 0;
    let steps = op.count.unsigned_abs();
    let mut reg = value & mask;
    let mut out = m;

    for _ in 0..steps {
        let sign = reg & msb != 0;
        if right {
            out = reg & 1 != 0;
            reg >>= 1;
            let fill = match op.kind {
                ShiftKind::Plain => sign,
                ShiftKind::Rotate => out,
                ShiftKind::ZeroIn => false,
                ShiftKind::LinkIn => m,
            };
            if fill {
                reg |= msb;
            }
        } else {
            out = sign;
            reg = (reg << 1) & mask;
            let fill = match op.kind {
                ShiftKind::Plain | ShiftKind::ZeroIn => false,
                ShiftKind::Rotate => out,
                ShiftKind::LinkIn => m,
            };
            if fill {
                reg |= 1;
            }
        }
    }
    (reg, out)
}

/// Shift a single register (SHT, SHD, SHA).
pub fn shift16(value: u16, op: ShiftOp, m: bool) -> (u16, bool) {
    let (v, m) = shift_bits(value as u32, 16, op, m);
    (v as u16, m)
}

/// Shift the A:D register pair (SAD).
pub fn shift32(value: u32, op: ShiftOp, m: bool) -> (u32, bool) {
    shift_bits(value, 32, op, m)
}

// ==================== Skip compare ====================

/// Condition field of SKP, bits 8-10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCondition {
    Eql,
    Geq,
    Gre,
    Mgre,
    Ueq,
    Lss,
    Lst,
    Mlst,
}

impl SkipCondition {
    pub fn from_instruction(instr: u16) -> Self {
        match (instr >> 8) & 7 {
            0 => Self::Eql,
            1 => Self::Geq,
            2 => Self::Gre,
            3 => Self::Mgre,
            4 => Self::Ueq,
            5 => Self::Lss,
            6 => Self::Lst,
            _ => Self::Mlst,
        }
    }

    /// Evaluate `dst - src` against this condition.
    pub fn holds(self, dst: u16, src: u16) -> bool {
        let diff = (dst as i16).wrapping_sub(src as i16);
        let z = dst == src;
        let s = diff < 0;
        let ss = src as i16;
        let sd = dst as i16;
        let o = ((sd & !ss & !diff) | (!sd & ss & diff)) < 0;
        let c = dst >= src;
        match self {
            Self::Eql => z,
            Self::Geq => !s,
            Self::Gre => !(s ^ o),
            Self::Mgre => c,
            Self::Ueq => !z,
            Self::Lss => s,
            Self::Lst => s ^ o,
            Self::Mlst => !c,
        }
    }
}
