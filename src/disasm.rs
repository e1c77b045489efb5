//! Disassembler for ND100 instruction words.
//!
//! Converts raw words back to NORD-style assembly text for trace output and
//! the `disasm` command.

use crate::arith::int::{sign_extend_byte, ShiftKind, ShiftOp, SkipCondition};
use crate::cpu::address::AddressMode;
use crate::cpu::decode::{decode, CpuModel};
use crate::cpu::dispatch::{DispatchTable, Handler};

const REGISTERS: [&str; 8] = ["STS", "D", "P", "B", "L", "A", "T", "X"];

const INTERNAL: [&str; 16] = [
    "PANS", "STS", "OPR", "PGS", "PVL", "IIC", "PID", "PIE", "CSR", "ACTL", "ALD", "PES", "PGC",
    "PEA", "14", "15",
];

const INTERNAL_WRITE: [&str; 16] = [
    "PANC", "STS", "LMP", "PCR", "4", "IIE", "PID", "PIE", "CCL", "LCIL", "UCIL", "11", "12",
    "13", "14", "15",
];

const BOP: [&str; 16] = [
    "BSET ZRO", "BSET ONE", "BSET BCM", "BSET BAC", "BSKP ZRO", "BSKP ONE", "BSKP BCM",
    "BSKP BAC", "BSTC", "BSTA", "BLDC", "BLDA", "BANC", "BAND", "BORC", "BORA",
];

/// Mnemonic of a canonical opcode, `???` when it has none.
pub fn mnemonic(canonical: u16) -> &'static str {
    match canonical {
        // ==================== Memory reference ====================
        0o000000 => "STZ",
        0o004000 => "STA",
        0o010000 => "STT",
        0o014000 => "STX",
        0o020000 => "STD",
        0o024000 => "LDD",
        0o030000 => "STF",
        0o034000 => "LDF",
        0o040000 => "MIN",
        0o044000 => "LDA",
        0o050000 => "LDT",
        0o054000 => "LDX",
        0o060000 => "ADD",
        0o064000 => "SUB",
        0o070000 => "AND",
        0o074000 => "ORA",
        0o100000 => "FAD",
        0o104000 => "FSB",
        0o110000 => "FMU",
        0o114000 => "FDV",
        0o120000 => "MPY",
        0o124000 => "JMP",
        0o134000 => "JPL",
        0o164000 => "IOX",

        // ==================== Conditional jumps ====================
        0o130000 => "JAP",
        0o130400 => "JAN",
        0o131000 => "JAZ",
        0o131400 => "JAF",
        0o132000 => "JPC",
        0o132400 => "JNC",
        0o133000 => "JXZ",
        0o133400 => "JXN",

        // ==================== Register ====================
        0o140000 => "SKP",
        0o141200 => "RMPY",
        0o141600 => "RDIV",
        0o151400 => "NLZ",
        0o152000 => "DNZ",
        0o154000 => "SHT",
        0o154200 => "SHD",
        0o154400 => "SHA",
        0o154600 => "SAD",
        0o170000 => "SAB",
        0o170400 => "SAA",
        0o171000 => "SAT",
        0o171400 => "SAX",
        0o172000 => "AAB",
        0o172400 => "AAA",
        0o173000 => "AAT",
        0o173400 => "AAX",
        c @ 0o144000..=0o147700 => rop_mnemonic(c),
        c @ 0o174000..=0o177600 => BOP[((c >> 7) & 0xf) as usize],

        // ==================== System ====================
        0o150000 => "TRA",
        0o150100 => "TRR",
        0o150200 => "MCL",
        0o150300 => "MST",
        0o150400 => "OPCOM",
        0o150401 => "IOF",
        0o150402 => "ION",
        0o150403 => "RTNSIM",
        0o150404 => "POF",
        0o150405 => "PIOF",
        0o150406 => "SEX",
        0o150407 => "REX",
        0o150410 => "PON",
        0o150412 => "PION",
        0o150415 => "IOXT",
        0o150416 => "EXAM",
        0o150417 => "DEPO",
        0o151000 => "WAIT",
        0o152400 => "SRB",
        0o152600 => "LRB",
        0o153000 => "MON",
        0o153400 => "IRW",
        0o153600 => "IRR",
        0o140600 => "EXR",
        0o143604 => "IDENT PL10",
        0o143611 => "IDENT PL11",
        0o143622 => "IDENT PL12",
        0o143643 => "IDENT PL13",

        // ==================== Extended ====================
        0o140120 => "ADDD",
        0o140121 => "SUBD",
        0o140122 => "COMD",
        0o140123 => "TSET",
        0o140124 => "PACK",
        0o140125 => "UPACK",
        0o140126 => "SHDE",
        0o140127 => "RDUS",
        0o140130 => "BFILL",
        0o140131 => "MOVB",
        0o140132 => "MOVBF",
        0o140133 => "VERSN",
        0o140134 => "INIT",
        0o140135 => "ENTR",
        0o140136 => "LEAVE",
        0o140137 => "ELEAV",
        0o140300 => "SETPT",
        0o140301 => "CLEPT",
        0o140302 => "CLNREENT",
        0o140303 => "CHREENT-PAGES",
        0o140304 => "CLEPU",
        0o142200 => "LBYT",
        0o142600 => "SBYT",
        0o142700 => "GECO",
        0o143100 => "MOVEW",
        0o143200 => "MIX3",
        0o143300 => "LDATX",
        0o143301 => "LDXTX",
        0o143302 => "LDDTX",
        0o143303 => "LDBTX",
        0o143304 => "STATX",
        0o143305 => "STZTX",
        0o143306 => "STDTX",
        0o143500 => "LWCS",

        // ND110 only
        0o140500 => "WGLOB",
        0o140501 => "RGLOB",
        0o140502 => "INSPL",
        0o140503 => "REMPL",
        0o140504 => "CNREK",
        0o140505 => "CLPT",
        0o140506 => "ENPT",
        0o140507 => "REPT",
        0o140510 => "LBIT",
        0o140513 => "SBITP",
        0o140514 => "LBYTP",
        0o140515 => "SBYTP",
        0o140516 => "TSETP",
        0o140517 => "RDUSP",
        0o140700 => "LASB",
        0o140701 => "SASB",
        0o140702 => "LACB",
        0o140703 => "SACB",
        0o140704 => "LXSB",
        0o140705 => "LXCB",
        0o140706 => "SZSB",
        0o140707 => "SZCB",

        _ => "???",
    }
}

fn rop_mnemonic(canonical: u16) -> &'static str {
    if canonical & 0o2000 == 0 {
        return match (canonical >> 8) & 3 {
            0 => "SWAP",
            1 => "RAND",
            2 => "REXO",
            _ => "RORA",
        };
    }
    match (canonical >> 6) & 0xf {
        // RADD CLD
        1 => "COPY",
        // RADD CM1 AD1
        6 => "RSUB",
        _ => "RADD",
    }
}

/// Modifier keywords of a register operation, in assembler order.
fn rop_modifiers(raw: u16) -> String {
    let mut out = String::new();
    let arith = raw & 0o2000 != 0;
    let op = (raw >> 6) & 0xf;
    if arith && (op == 1 || op == 6) {
        return out;
    }
    if arith {
        match (raw >> 8) & 3 {
            1 => out.push_str(" AD1"),
            2 => out.push_str(" ADC"),
            _ => {}
        }
    }
    if raw & 0o200 != 0 {
        out.push_str(" CM1");
    }
    if raw & 0o100 != 0 {
        out.push_str(" CLD");
    }
    out
}

fn register_name(field: u16) -> &'static str {
    REGISTERS[(field & 7) as usize]
}

fn skip_condition(raw: u16) -> &'static str {
    match SkipCondition::from_instruction(raw) {
        SkipCondition::Eql => "EQL",
        SkipCondition::Geq => "GEQ",
        SkipCondition::Gre => "GRE",
        SkipCondition::Mgre => "MGRE",
        SkipCondition::Ueq => "UEQ",
        SkipCondition::Lss => "LSS",
        SkipCondition::Lst => "LST",
        SkipCondition::Mlst => "MLST",
    }
}

fn shift_operand(raw: u16) -> String {
    let op = ShiftOp::from_instruction(raw);
    let kind = match op.kind {
        ShiftKind::Plain => "",
        ShiftKind::Rotate => " ROT",
        ShiftKind::ZeroIn => " ZIN",
        ShiftKind::LinkIn => " LIN",
    };
    format!("{} {}", kind, op.count)
}

fn memory_operand(raw: u16) -> String {
    let disp = sign_extend_byte(raw) as i16;
    let mode = AddressMode::from_instruction(raw);
    format!("{} {}", mode.notation(), disp)
}

/// Disassemble one word with a prebuilt dispatch table. Opcodes the table
/// does not know print as `???` followed by the raw word.
pub fn format_with(raw: u16, table: &DispatchTable) -> String {
    let canonical = decode(raw, table.map());
    let handler = table.lookup(canonical);
    if handler == Handler::Illegal {
        return format!("??? {:06o}", raw);
    }
    let name = mnemonic(canonical);
    let sr = (raw >> 3) & 7;
    let dr = raw & 7;

    use Handler::*;
    match handler {
        Stz | Sta | Stt | Stx | Std | Ldd | Stf | Ldf | Min | Lda | Ldt | Ldx | Add | Sub
        | And | Ora | Fad | Fsb | Fmu | Fdv | Mpy | Jmp | Jpl => {
            format!("{} {}", name, memory_operand(raw))
        }
        Jap | Jan | Jaz | Jaf | Jpc | Jnc | Jxz | Jxn => {
            format!("{} {}", name, sign_extend_byte(raw) as i16)
        }
        Sab | Saa | Sat | Sax | Aab | Aaa | Aat | Aax | Nlz | Dnz => {
            format!("{} {}", name, sign_extend_byte(raw) as i16)
        }
        Wait | Mon => format!("{} {:o}", name, raw & 0xff),
        Iox => format!("{} {:o}", name, raw & 0o3777),
        Skp => format!(
            "SKP IF D{} {} S{}",
            register_name(dr),
            skip_condition(raw),
            register_name(sr)
        ),
        Rop => format!(
            "{}{} S{} D{}",
            name,
            rop_modifiers(raw),
            register_name(sr),
            register_name(dr)
        ),
        Bop => format!("{} {} D{}", name, (raw >> 3) & 0xf, register_name(dr)),
        Shift => format!("{}{}", name, shift_operand(raw)),
        Rmpy => format!("{} S{} D{}", name, register_name(sr), register_name(dr)),
        Rdiv | Exr => format!("{} S{}", name, register_name(sr)),
        Tra => format!("{} {}", name, INTERNAL[(raw & 0xf) as usize]),
        Trr | Mcl | Mst => format!("{} {}", name, INTERNAL_WRITE[(raw & 0xf) as usize]),
        Srb | Lrb => format!("{} {}", name, (raw >> 3) & 0xf),
        Irw | Irr => format!("{} {} D{}", name, (raw >> 3) & 0xf, register_name(dr)),
        _ => name.to_string(),
    }
}

/// Disassemble one word for `model`.
pub fn format(raw: u16, model: CpuModel) -> String {
    format_with(raw, &DispatchTable::build(model.opcode_map()))
}

/// Disassemble a block of words starting at `origin`, one line per word.
pub fn disassemble(words: &[u16], origin: u16, model: CpuModel) -> String {
    let table = DispatchTable::build(model.opcode_map());
    let mut output = String::new();
    for (i, word) in words.iter().enumerate() {
        let addr = origin.wrapping_add(i as u16);
        output.push_str(&format!(
            "{:06o}: {:06o}  {}\n",
            addr,
            word,
            format_with(*word, &table)
        ));
    }
    output
}
