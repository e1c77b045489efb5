//! Machine configuration.
//!
//! A [`MachineConfig`] is read from a JSON file, then command line flags
//! are laid over it with [`MachineConfig::apply`]. Every field has a
//! default, so an empty object `{}` is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpu::{CpuModel, OpcodeMap, UnknownModel};
use crate::loader::BootKind;

/// Errors that can occur while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] UnknownModel),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub cpu_type: CpuModel,
    pub boot: BootKind,
    pub image: Option<PathBuf>,
    /// Initial P.
    pub start: u16,
    /// First word address of a BP image.
    pub load_address: u16,
    pub breakpoint: Option<u16>,
    pub instruction_limit: Option<u64>,
    pub trace: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cpu_type: CpuModel::Nd100,
            boot: BootKind::Bp,
            image: None,
            start: 0,
            load_address: 0,
            breakpoint: None,
            instruction_limit: None,
            trace: false,
        }
    }
}

/// Command line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub cpu_type: Option<String>,
    pub boot: Option<BootKind>,
    pub image: Option<PathBuf>,
    pub start: Option<u16>,
    pub load_address: Option<u16>,
    pub breakpoint: Option<u16>,
    pub instruction_limit: Option<u64>,
    pub trace: bool,
}

impl MachineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&text)
    }

    /// Lay command line values over this configuration.
    pub fn apply(&mut self, o: &Overrides) -> Result<(), ConfigError> {
        if let Some(name) = &o.cpu_type {
            self.cpu_type = name.parse()?;
        }
        if let Some(boot) = o.boot {
            self.boot = boot;
        }
        if let Some(image) = &o.image {
            self.image = Some(image.clone());
        }
        if let Some(start) = o.start {
            self.start = start;
        }
        if let Some(addr) = o.load_address {
            self.load_address = addr;
        }
        if o.breakpoint.is_some() {
            self.breakpoint = o.breakpoint;
        }
        if o.instruction_limit.is_some() {
            self.instruction_limit = o.instruction_limit;
        }
        self.trace |= o.trace;
        Ok(())
    }

    pub fn opcode_map(&self) -> OpcodeMap {
        self.cpu_type.opcode_map()
    }

    /// Whether the run needs SemiRun for a breakpoint or instruction limit.
    pub fn is_semi_run(&self) -> bool {
        self.breakpoint.is_some() || self.instruction_limit.is_some()
    }
}

/// Parse an address or count the way the ND tools write them: a leading
/// `0` or `0o` means octal, `0x` hex, anything else decimal.
pub fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x") {
        (hex, 16)
    } else if let Some(oct) = s.strip_prefix("0o") {
        (oct, 8)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("'{}': {}", s, e))
}

/// [`parse_number`] limited to a 16-bit address.
pub fn parse_address(s: &str) -> Result<u16, String> {
    let n = parse_number(s)?;
    u16::try_from(n).map_err(|_| format!("'{}' is above 0o177777", s))
}
