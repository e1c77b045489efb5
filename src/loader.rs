//! Boot image loaders.
//!
//! Two formats are supported:
//! - **BP**: a raw big-endian word image copied to physical memory.
//! - **BPUN**: a punched-tape block. An ASCII header carries the *B* and
//!   *C* numbers in octal, ended by `!`. After it come the load address,
//!   the word count, the data words, a checksum and an action code, all
//!   big-endian.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpu::{Cpu, CpuError};

/// Highest word address a BP image may fill.
const BP_LIMIT: usize = 0o200000;

/// Image format selected at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootKind {
    #[default]
    Bp,
    Bpun,
}

impl FromStr for BootKind {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bp" => Ok(BootKind::Bp),
            "bpun" => Ok(BootKind::Bpun),
            other => Err(LoadError::UnknownBoot(other.to_string())),
        }
    }
}

impl fmt::Display for BootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootKind::Bp => f.write_str("bp"),
            BootKind::Bpun => f.write_str("bpun"),
        }
    }
}

/// A BPUN block after loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BpunImage {
    pub b_number: Option<u16>,
    pub c_number: Option<u16>,
    pub load_address: u16,
    /// Data words in load order.
    pub words: Vec<u16>,
    /// Whether the stored checksum matched the data.
    pub checksum_ok: bool,
    pub action_code: u16,
}

/// What a boot load put into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded {
    /// Number of BP words written.
    Bp(usize),
    Bpun(BpunImage),
}

impl Loaded {
    pub fn word_count(&self) -> usize {
        match self {
            Loaded::Bp(n) => *n,
            Loaded::Bpun(image) => image.words.len(),
        }
    }
}

/// Errors that can occur while loading an image.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("image ends early: {0}")]
    Truncated(&'static str),

    #[error("BP image does not fit below address 0o200000 ({words} words at 0o{start:o})")]
    TooLarge { start: u16, words: usize },

    #[error("bad BPUN header: {0}")]
    Header(String),

    #[error("unknown boot type '{0}'")]
    UnknownBoot(String),

    #[error(transparent)]
    Cpu(#[from] CpuError),
}

/// Cursor over big-endian words.
struct Words<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Words<'a> {
    fn next(&mut self, what: &'static str) -> Result<u16, LoadError> {
        match self.bytes.get(self.pos..self.pos + 2) {
            Some(&[hi, lo]) => {
                self.pos += 2;
                Ok(u16::from_be_bytes([hi, lo]))
            }
            _ => Err(LoadError::Truncated(what)),
        }
    }
}

fn octal(digits: &str) -> Result<u16, LoadError> {
    u16::from_str_radix(digits, 8)
        .map_err(|_| LoadError::Header(format!("'{}' is not a 16-bit octal number", digits)))
}

/// Copy a BP image into physical memory starting at `load_address`.
///
/// Words are read big-endian, the ND's own byte order and the one BPUN
/// uses, so an image loads the same on any host.
pub fn load_bp(cpu: &mut Cpu, bytes: &[u8], load_address: u16) -> Result<usize, LoadError> {
    if bytes.len() % 2 != 0 {
        return Err(LoadError::Truncated("odd byte at end of BP image"));
    }
    let words = bytes.len() / 2;
    if load_address as usize + words > BP_LIMIT {
        return Err(LoadError::TooLarge { start: load_address, words });
    }
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = u16::from_be_bytes([pair[0], pair[1]]);
        cpu.physical_write(load_address as u32 + i as u32, value);
    }
    debug!("BP: {} words at {:06o}", words, load_address);
    Ok(words)
}

/// Load a BPUN block through the normal memory write path.
pub fn load_bpun(cpu: &mut Cpu, bytes: &[u8]) -> Result<BpunImage, LoadError> {
    let mut b_number = None;
    let mut c_number = None;
    let mut digits = String::new();
    let mut header_end = None;

    for (i, byte) in bytes.iter().enumerate() {
        let ch = (byte & 0x7f) as char;
        match ch {
            '0'..='9' => digits.push(ch),
            '\r' => {
                if !digits.is_empty() {
                    b_number = Some(octal(&digits)?);
                }
                digits.clear();
            }
            '!' => {
                if !digits.is_empty() {
                    c_number = Some(octal(&digits)?);
                }
                header_end = Some(i + 1);
                break;
            }
            _ => digits.clear(),
        }
    }
    let start = header_end.ok_or(LoadError::Truncated("no '!' ending the BPUN header"))?;
    debug!("BPUN header: B={:?} C={:?}", b_number, c_number);

    let mut input = Words { bytes, pos: start };
    let load_address = input.next("block load address")?;
    let count = input.next("block word count")?;
    debug!("BPUN block: {} words at {:06o}", count, load_address);

    let mut words = Vec::with_capacity(count as usize);
    let mut sum = 0u16;
    for i in 0..count {
        let value = input.next("block data")?;
        cpu.memory_write(load_address.wrapping_add(i), value, false)?;
        sum = sum.wrapping_add(value);
        words.push(value);
    }

    let checksum = input.next("block checksum")?;
    let checksum_ok = checksum == sum;
    if !checksum_ok {
        warn!("BPUN checksum mismatch: stored {:06o}, computed {:06o}", checksum, sum);
    }
    let action_code = input.next("action code")?;
    debug!("BPUN action code {:06o}", action_code);

    Ok(BpunImage {
        b_number,
        c_number,
        load_address,
        words,
        checksum_ok,
        action_code,
    })
}

/// Read an image file from disk and load it.
pub fn load_file<P: AsRef<Path>>(
    cpu: &mut Cpu,
    path: P,
    kind: BootKind,
    load_address: u16,
) -> Result<Loaded, LoadError> {
    let bytes = std::fs::read(path.as_ref()).map_err(|e| LoadError::Io(e.to_string()))?;
    match kind {
        BootKind::Bp => load_bp(cpu, &bytes, load_address).map(Loaded::Bp),
        BootKind::Bpun => load_bpun(cpu, &bytes).map(Loaded::Bpun),
    }
}

/// Read a BP file as a word list without loading it.
pub fn read_words<P: AsRef<Path>>(path: P) -> Result<Vec<u16>, LoadError> {
    let bytes = std::fs::read(path.as_ref()).map_err(|e| LoadError::Io(e.to_string()))?;
    if bytes.len() % 2 != 0 {
        return Err(LoadError::Truncated("odd byte at end of BP image"));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}
