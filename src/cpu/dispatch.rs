//! Canonical opcode to handler mapping.
//!
//! The table is a sorted list of non-overlapping opcode ranges, built once
//! per [`OpcodeMap`]. Anything not covered is an illegal instruction.

use serde::{Deserialize, Serialize};

use super::decode::OpcodeMap;

/// Instruction handlers. Each handler receives the raw instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handler {
    // ==================== Memory reference ====================
    Stz,
    Sta,
    Stt,
    Stx,
    /// Store A:D.
    Std,
    /// Load A:D.
    Ldd,
    /// Store T:A:D.
    Stf,
    /// Load T:A:D.
    Ldf,
    /// Increment memory and skip on zero.
    Min,
    Lda,
    Ldt,
    Ldx,
    Add,
    Sub,
    And,
    Ora,
    Fad,
    Fsb,
    Fmu,
    Fdv,
    Mpy,
    Jmp,
    /// Jump and link.
    Jpl,

    // ==================== Conditional jumps ====================
    Jap,
    Jan,
    Jaz,
    Jaf,
    Jpc,
    Jnc,
    Jxz,
    Jxn,

    // ==================== Register and bit ====================
    Skp,
    Rop,
    Bop,
    Shift,
    Rmpy,
    Rdiv,
    Nlz,
    Dnz,
    Sab,
    Saa,
    Sat,
    Sax,
    Aab,
    Aaa,
    Aat,
    Aax,

    // ==================== System ====================
    Tra,
    Trr,
    Mcl,
    Mst,
    Opcom,
    Iof,
    Ion,
    Pof,
    Piof,
    Sex,
    Rex,
    Pon,
    Pion,
    Iox,
    Ioxt,
    Exam,
    Depo,
    Wait,
    /// Monitor call.
    Mon,
    /// Store register block.
    Srb,
    /// Load register block.
    Lrb,
    /// Inter-level register write.
    Irw,
    /// Inter-level register read.
    Irr,
    /// Execute register.
    Exr,
    Ident,

    // ==================== Extended ====================
    Lbyt,
    Sbyt,
    Mix3,
    Ldatx,
    Ldxtx,
    Lddtx,
    Ldbtx,
    Statx,
    Stztx,
    Stdtx,
    Bfill,
    Movb,
    Movbf,
    Init,
    Entr,
    Leave,
    Eleav,
    Clept,
    /// Undocumented; treated as a no-op.
    Geco,

    /// Recognized but not emulated. Stops the CPU.
    Unimplemented,
    /// Level-14 illegal instruction interrupt.
    Illegal,
}

/// One table entry: `start..=end` maps to `handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    start: u16,
    end: u16,
    handler: Handler,
}

const fn span(start: u16, end: u16, handler: Handler) -> Entry {
    Entry { start, end, handler }
}

const fn one(op: u16, handler: Handler) -> Entry {
    Entry { start: op, end: op, handler }
}

use Handler::*;

/// Entries shared by every model, in ascending order.
const COMMON: &[Entry] = &[
    span(0o000000, 0o003777, Stz),
    span(0o004000, 0o007777, Sta),
    span(0o010000, 0o013777, Stt),
    span(0o014000, 0o017777, Stx),
    span(0o020000, 0o023777, Std),
    span(0o024000, 0o027777, Ldd),
    span(0o030000, 0o033777, Stf),
    span(0o034000, 0o037777, Ldf),
    span(0o040000, 0o043777, Min),
    span(0o044000, 0o047777, Lda),
    span(0o050000, 0o053777, Ldt),
    span(0o054000, 0o057777, Ldx),
    span(0o060000, 0o063777, Add),
    span(0o064000, 0o067777, Sub),
    span(0o070000, 0o073777, And),
    span(0o074000, 0o077777, Ora),
    span(0o100000, 0o103777, Fad),
    span(0o104000, 0o107777, Fsb),
    span(0o110000, 0o113777, Fmu),
    span(0o114000, 0o117777, Fdv),
    span(0o120000, 0o123777, Mpy),
    span(0o124000, 0o127777, Jmp),
    span(0o130000, 0o130377, Jap),
    span(0o130400, 0o130777, Jan),
    span(0o131000, 0o131377, Jaz),
    span(0o131400, 0o131777, Jaf),
    span(0o132000, 0o132377, Jpc),
    span(0o132400, 0o132777, Jnc),
    span(0o133000, 0o133377, Jxz),
    span(0o133400, 0o133777, Jxn),
    span(0o134000, 0o137777, Jpl),
    one(0o140000, Skp),
    // ADDD SUBD COMD TSET PACK UPACK SHDE RDUS
    span(0o140120, 0o140127, Unimplemented),
    one(0o140130, Bfill),
    one(0o140131, Movb),
    one(0o140132, Movbf),
    one(0o140134, Init),
    one(0o140135, Entr),
    one(0o140136, Leave),
    one(0o140137, Eleav),
    // SETPT
    one(0o140300, Unimplemented),
    one(0o140301, Clept),
    // CLNREENT CHREENT-PAGES CLEPU
    span(0o140302, 0o140304, Unimplemented),
    span(0o140600, 0o140677, Exr),
    span(0o141200, 0o141277, Rmpy),
    span(0o141600, 0o141677, Rdiv),
    span(0o142200, 0o142277, Lbyt),
    span(0o142600, 0o142677, Sbyt),
    span(0o142700, 0o142777, Geco),
    // MOVEW
    span(0o143100, 0o143177, Unimplemented),
    span(0o143200, 0o143277, Mix3),
    one(0o143300, Ldatx),
    one(0o143301, Ldxtx),
    one(0o143302, Lddtx),
    one(0o143303, Ldbtx),
    one(0o143304, Statx),
    one(0o143305, Stztx),
    one(0o143306, Stdtx),
    // LWCS
    one(0o143500, Unimplemented),
    one(0o143604, Ident),
    one(0o143611, Ident),
    one(0o143622, Ident),
    one(0o143643, Ident),
    span(0o144000, 0o147777, Rop),
    span(0o150000, 0o150077, Tra),
    span(0o150100, 0o150177, Trr),
    span(0o150200, 0o150277, Mcl),
    span(0o150300, 0o150377, Mst),
    one(0o150400, Opcom),
    one(0o150401, Iof),
    one(0o150402, Ion),
    one(0o150404, Pof),
    one(0o150405, Piof),
    one(0o150406, Sex),
    one(0o150407, Rex),
    one(0o150410, Pon),
    one(0o150412, Pion),
    one(0o150415, Ioxt),
    one(0o150416, Exam),
    one(0o150417, Depo),
    span(0o151000, 0o151377, Wait),
    span(0o151400, 0o151777, Nlz),
    span(0o152000, 0o152377, Dnz),
    span(0o152400, 0o152577, Srb),
    span(0o152600, 0o152777, Lrb),
    span(0o153000, 0o153377, Mon),
    span(0o153400, 0o153577, Irw),
    span(0o153600, 0o153777, Irr),
    span(0o154000, 0o157777, Shift),
    span(0o164000, 0o167777, Iox),
    span(0o170000, 0o170377, Sab),
    span(0o170400, 0o170777, Saa),
    span(0o171000, 0o171377, Sat),
    span(0o171400, 0o171777, Sax),
    span(0o172000, 0o172377, Aab),
    span(0o172400, 0o172777, Aaa),
    span(0o173000, 0o173377, Aat),
    span(0o173400, 0o173777, Aax),
    span(0o174000, 0o177777, Bop),
];

/// ND110 additions.
const ND110: &[Entry] = &[
    // VERSN
    one(0o140133, Unimplemented),
    // WGLOB RGLOB INSPL REMPL CNREK CLPT ENPT REPT LBIT
    span(0o140500, 0o140510, Unimplemented),
    // SBITP LBYTP SBYTP TSETP RDUSP
    span(0o140513, 0o140517, Unimplemented),
    // LASB SASB LACB SACB LXSB LXCB SZSB SZCB
    span(0o140700, 0o140707, Unimplemented),
];

/// PCX additions.
const PCX: &[Entry] = &[
    // RTNSIM
    one(0o150403, Unimplemented),
];

/// Range table for one opcode map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTable {
    map: OpcodeMap,
    entries: Vec<Entry>,
}

impl DispatchTable {
    pub fn build(map: OpcodeMap) -> Self {
        let mut entries = COMMON.to_vec();
        if map.is_nd110() {
            entries.extend_from_slice(ND110);
        }
        if map == OpcodeMap::Nd110Pcx {
            entries.extend_from_slice(PCX);
        }
        entries.sort_by_key(|e| e.start);
        debug_assert!(entries.windows(2).all(|w| w[0].end < w[1].start));
        Self { map, entries }
    }

    pub fn map(&self) -> OpcodeMap {
        self.map
    }

    /// Handler for a canonical opcode.
    pub fn lookup(&self, canonical: u16) -> Handler {
        let idx = self.entries.partition_point(|e| e.start <= canonical);
        match idx.checked_sub(1).map(|i| self.entries[i]) {
            Some(e) if canonical <= e.end => e.handler,
            _ => Handler::Illegal,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
