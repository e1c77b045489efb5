//! Instruction decoder for the ND100 family.
//!
//! Decoding maps a raw instruction word to a *canonical opcode*: the word
//! with its operand fields masked off. Two words with the same canonical
//! opcode execute the same handler. Most families are told apart by the
//! top five bits; the 0140000 and 0150000 groups need narrower masks, and
//! part of the 0140000 group means different things on ND110.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CPU variant as named in machine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuModel {
    #[default]
    Nd100,
    Nd100Ce,
    Nd100Cx,
    Nd110,
    Nd110Ce,
    Nd110Cx,
    /// ND110 with the PCX ("butterfly") microcode.
    Nd110Pcx,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown CPU model '{0}'")]
pub struct UnknownModel(pub String);

impl CpuModel {
    pub const ALL: [CpuModel; 7] = [
        CpuModel::Nd100,
        CpuModel::Nd100Ce,
        CpuModel::Nd100Cx,
        CpuModel::Nd110,
        CpuModel::Nd110Ce,
        CpuModel::Nd110Cx,
        CpuModel::Nd110Pcx,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CpuModel::Nd100 => "nd100",
            CpuModel::Nd100Ce => "nd100ce",
            CpuModel::Nd100Cx => "nd100cx",
            CpuModel::Nd110 => "nd110",
            CpuModel::Nd110Ce => "nd110ce",
            CpuModel::Nd110Cx => "nd110cx",
            CpuModel::Nd110Pcx => "nd110pcx",
        }
    }

    /// Opcode map used by this model.
    pub fn opcode_map(self) -> OpcodeMap {
        match self {
            CpuModel::Nd100 | CpuModel::Nd100Ce | CpuModel::Nd100Cx => OpcodeMap::Nd100,
            CpuModel::Nd110 | CpuModel::Nd110Ce | CpuModel::Nd110Cx => OpcodeMap::Nd110,
            CpuModel::Nd110Pcx => OpcodeMap::Nd110Pcx,
        }
    }
}

impl FromStr for CpuModel {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        CpuModel::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| UnknownModel(s.to_string()))
    }
}

impl fmt::Display for CpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The instruction set variant. Resolved once from the [`CpuModel`]; the
/// decoder and dispatch table never look at the model itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpcodeMap {
    Nd100,
    Nd110,
    /// ND110 plus RTNSIM.
    Nd110Pcx,
}

impl OpcodeMap {
    pub fn is_nd110(self) -> bool {
        !matches!(self, OpcodeMap::Nd100)
    }
}

// ==================== Masks ====================

const TOP5: u16 = 0xf800;
const TOP8: u16 = 0xff00;
const TOP9: u16 = 0xff80;
const TOP10: u16 = 0xffc0;
/// Top ten bits plus bits 0-2: the register field in bits 3-5 is free.
const NO_SR: u16 = 0xffc7;
/// Shift group: top five bits plus the register select in bits 7-8.
const SHIFT: u16 = TOP5 | 0x0180;

/// Decode a raw word to its canonical opcode.
pub fn decode(raw: u16, map: OpcodeMap) -> u16 {
    match raw & TOP5 {
        // conditional jumps
        0o130000 => raw & TOP8,
        0o140000 => {
            if raw & 0o300 == 0 {
                // SKP
                0o140000
            } else {
                decode_140k(raw, map)
            }
        }
        0o150000 => decode_150k(raw),
        // register operations
        0o144000 => raw & TOP10,
        0o154000 => raw & SHIFT,
        // argument instructions
        0o170000 => raw & TOP8,
        // bit operations
        0o174000 => raw & TOP9,
        // memory reference and IOX
        _ => raw & TOP5,
    }
}

/// Extended instructions sharing the SKP group.
fn decode_140k(raw: u16, map: OpcodeMap) -> u16 {
    match raw {
        // ADDD..MOVBF
        0o140120..=0o140132 => return raw,
        0o140133 if map.is_nd110() => return raw,
        // INIT ENTR LEAVE ELEAV
        0o140134..=0o140137 => return raw,
        // SETPT CLEPT CLNREENT CHREENT CLEPU
        0o140300..=0o140304 => return raw,
        // LWCS
        0o143500 => return raw,
        // IDENT PL10..PL13
        0o143604 | 0o143611 | 0o143622 | 0o143643 => return raw,
        _ => {}
    }

    let group = raw & TOP10;
    match group {
        // WGLOB..RDUSP are exact words; anything else in the slot stays raw
        0o140500 if map.is_nd110() => return raw,
        0o140700 if map.is_nd110() => {
            let op = raw & NO_SR;
            return if (0o140700..=0o140707).contains(&op) { op } else { raw };
        }
        0o140200 | 0o140500 | 0o140600 | 0o140700 | 0o141100 | 0o141200 | 0o141300 | 0o141500
        | 0o141600 | 0o141700 | 0o142100 | 0o142200 | 0o142300 | 0o142500 | 0o142600
        | 0o142700 | 0o143100 | 0o143200 => return group,
        _ => {}
    }

    match raw & NO_SR {
        op @ 0o143300..=0o143306 => op,
        _ => raw,
    }
}

/// System instructions.
fn decode_150k(raw: u16) -> u16 {
    match raw {
        0o150400 | 0o150401 | 0o150402 | 0o150404..=0o150407 | 0o150410 | 0o150412
        | 0o150415..=0o150417 => return raw,
        _ => {}
    }
    match raw & TOP8 {
        // WAIT NLZ DNZ MON
        op @ (0o151000 | 0o151400 | 0o152000 | 0o153000) => return op,
        _ => {}
    }
    match raw & TOP9 {
        // SRB LRB IRW IRR
        op @ (0o152400 | 0o152600 | 0o153400 | 0o153600) => return op,
        _ => {}
    }
    match raw & TOP10 {
        // TRA TRR MCL MST
        op @ (0o150000 | 0o150100 | 0o150200 | 0o150300) => op,
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ND100: OpcodeMap = OpcodeMap::Nd100;
    const ND110: OpcodeMap = OpcodeMap::Nd110;

    #[test]
    fn test_memory_reference_masks_operand() {
        assert_eq!(decode(0o044377, ND100), 0o044000);
        assert_eq!(decode(0o004123, ND100), 0o004000);
        assert_eq!(decode(0o164017, ND100), 0o164000);
    }

    #[test]
    fn test_conditional_jumps_keep_condition() {
        assert_eq!(decode(0o130777, ND100), 0o130400);
        assert_eq!(decode(0o133405, ND100), 0o133400);
    }

    #[test]
    fn test_skip_vs_extended() {
        assert_eq!(decode(0o140012, ND100), 0o140000);
        assert_eq!(decode(0o143400, ND100), 0o140000);
        assert_eq!(decode(0o141277, ND100), 0o141200);
        assert_eq!(decode(0o140130, ND100), 0o140130);
        assert_eq!(decode(0o143604, ND100), 0o143604);
        assert_eq!(decode(0o143337, ND100), 0o143337);
        assert_eq!(decode(0o143373, ND100), 0o143303);
    }

    #[test]
    fn test_versn_only_on_nd110() {
        assert_eq!(decode(0o140133, ND110), 0o140133);
        assert_eq!(decode(0o140133, OpcodeMap::Nd110Pcx), 0o140133);
        // on ND100 the word passes through and is left for the illegal handler
        assert_eq!(decode(0o140133, ND100), 0o140133);
    }

    #[test]
    fn test_user_slots_differ_by_model() {
        assert_eq!(decode(0o140577, ND100), 0o140500);
        assert_eq!(decode(0o140503, ND110), 0o140503);
        assert_eq!(decode(0o140511, ND110), 0o140511);
        assert_eq!(decode(0o140777, ND100), 0o140700);
        assert_eq!(decode(0o140772, ND110), 0o140702);
        assert_eq!(decode(0o140710, ND110), 0o140700);
    }

    #[test]
    fn test_system_group() {
        assert_eq!(decode(0o150402, ND100), 0o150402);
        assert_eq!(decode(0o150017, ND100), 0o150000);
        assert_eq!(decode(0o151123, ND100), 0o151000);
        assert_eq!(decode(0o152577, ND100), 0o152400);
        assert_eq!(decode(0o153777, ND100), 0o153600);
        assert_eq!(decode(0o150403, ND100), 0o150403);
    }

    #[test]
    fn test_shift_rop_argument_bop() {
        assert_eq!(decode(0o154677, ND100), 0o154600);
        assert_eq!(decode(0o155277, ND100), 0o154200);
        assert_eq!(decode(0o146137, ND100), 0o146100);
        assert_eq!(decode(0o170777, ND100), 0o170400);
        assert_eq!(decode(0o177777, ND100), 0o177600);
    }

    #[test]
    fn test_model_names() {
        assert_eq!("ND110CX".parse::<CpuModel>().unwrap(), CpuModel::Nd110Cx);
        assert!("nd500".parse::<CpuModel>().is_err());
        assert_eq!(CpuModel::Nd100Ce.opcode_map(), OpcodeMap::Nd100);
        assert_eq!(CpuModel::Nd110Pcx.opcode_map(), OpcodeMap::Nd110Pcx);
        assert_eq!(CpuModel::Nd110Ce.to_string(), "nd110ce");
    }
}
