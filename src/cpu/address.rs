//! Effective-address unit.
//!
//! Memory reference instructions carry a 3-bit mode in bits 8-10 and a
//! signed 8-bit displacement. The mode selects the base register(s), one
//! level of indirection, and whether the final access may use the
//! alternate page table.

use crate::arith::int::sign_extend_byte;

/// Mode bits of a memory reference instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// `P + disp`
    Relative,
    /// `B + disp`
    BRelative,
    /// `(P + disp)`
    Indirect,
    /// `(B + disp)`
    BIndirect,
    /// `X + disp`
    Indexed,
    /// `B + disp + X`
    BIndexed,
    /// `(P + disp) + X`
    IndirectIndexed,
    /// `(B + disp) + X`
    BIndirectIndexed,
}

impl AddressMode {
    pub fn from_instruction(instr: u16) -> Self {
        match (instr >> 8) & 0x7 {
            0 => AddressMode::Relative,
            1 => AddressMode::BRelative,
            2 => AddressMode::Indirect,
            3 => AddressMode::BIndirect,
            4 => AddressMode::Indexed,
            5 => AddressMode::BIndexed,
            6 => AddressMode::IndirectIndexed,
            _ => AddressMode::BIndirectIndexed,
        }
    }

    /// Assembler notation, `*` for P, `,B` `,X` `I` for the rest.
    pub fn notation(self) -> &'static str {
        match self {
            AddressMode::Relative => "*",
            AddressMode::BRelative => ",B",
            AddressMode::Indirect => "I *",
            AddressMode::BIndirect => "I ,B",
            AddressMode::Indexed => ",X",
            AddressMode::BIndexed => ",X ,B",
            AddressMode::IndirectIndexed => "I ,X *",
            AddressMode::BIndirectIndexed => "I ,X ,B",
        }
    }
}

/// A resolved operand address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveAddress {
    pub addr: u16,
    /// The operand access may use the alternate page table.
    pub use_apt: bool,
}

/// Base registers seen by the address unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bases {
    pub p: u16,
    pub b: u16,
    pub x: u16,
}

/// Resolve the operand address of `instr`.
///
/// `read(addr, use_apt)` performs the pointer read of the indirect modes.
/// A P-relative pointer is read through the normal page table, a
/// B-relative one through the alternate table.
pub fn resolve<E>(
    instr: u16,
    bases: Bases,
    mut read: impl FnMut(u16, bool) -> Result<u16, E>,
) -> Result<EffectiveAddress, E> {
    let disp = sign_extend_byte(instr);
    let Bases { p, b, x } = bases;
    let (addr, use_apt) = match AddressMode::from_instruction(instr) {
        AddressMode::Relative => (p.wrapping_add(disp), false),
        AddressMode::BRelative => (b.wrapping_add(disp), true),
        AddressMode::Indirect => (read(p.wrapping_add(disp), false)?, true),
        AddressMode::BIndirect => (read(b.wrapping_add(disp), true)?, true),
        AddressMode::Indexed => (x.wrapping_add(disp), true),
        AddressMode::BIndexed => (b.wrapping_add(x).wrapping_add(disp), true),
        AddressMode::IndirectIndexed => (x.wrapping_add(read(p.wrapping_add(disp), false)?), true),
        AddressMode::BIndirectIndexed => (x.wrapping_add(read(b.wrapping_add(disp), true)?), true),
    };
    Ok(EffectiveAddress { addr, use_apt })
}
