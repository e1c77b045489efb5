//! Priority interrupt system.
//!
//! PID/PIE and the level-14 internal interrupt registers are shared with
//! device threads, so they live behind one mutex together with the ident
//! chain and PGS. Every mutation goes through [`InterruptLine::update`],
//! which recomputes PK before the lock is released.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Level used for internal (CPU-detected) interrupts.
pub const INTERNAL_LEVEL: u16 = 14;

/// Level-14 sub-interrupt bits in IID/IIE.
pub mod iid {
    pub const MONITOR_CALL: u16 = 1 << 1;
    pub const PROTECTION_VIOLATION: u16 = 1 << 2;
    pub const PAGE_FAULT: u16 = 1 << 3;
    pub const ILLEGAL_INSTRUCTION: u16 = 1 << 4;
    pub const IOX_ERROR: u16 = 1 << 7;
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InterruptError {
    #[error("interrupt state lock poisoned")]
    Poisoned,
}

/// A device waiting to be identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentEntry {
    pub level: u16,
    pub code: u16,
    /// Opaque id of the raising device.
    pub caller: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptState {
    /// Pending interrupts, one bit per level.
    pub pid: u16,
    /// Enabled interrupts, one bit per level.
    pub pie: u16,
    /// Internal interrupt detect (level 14 sub-sources).
    pub iid: u16,
    /// Internal interrupt enable.
    pub iie: u16,
    /// Highest pending and enabled level; 0 when none.
    pk: u16,
    /// Paging status (fault syndrome).
    pub pgs: u16,
    /// Internal interrupt code, latched by `read_iic`.
    pub iic: u16,
    ident: VecDeque<IdentEntry>,
}

impl InterruptState {
    pub fn pk(&self) -> u16 {
        self.pk
    }

    fn recompute_pk(&mut self) {
        let active = self.pid & self.pie;
        self.pk = highest_bit(active);
    }

    /// Set a pending bit. For level 14 the subcode is ORed into IID and
    /// the level only goes pending if an enabled sub-source is set.
    pub fn raise(&mut self, level: u16, subcode: u16) {
        let level = level & 0xf;
        if level == INTERNAL_LEVEL {
            self.iid |= subcode;
            if self.iid & self.iie != 0 {
                self.pid |= 1 << INTERNAL_LEVEL;
            }
        } else {
            self.pid |= 1 << level;
        }
    }

    /// Queue a device for IDENT. A device already in the chain is not
    /// added twice.
    pub fn push_ident(&mut self, entry: IdentEntry) {
        if self.ident.iter().any(|e| e.caller == entry.caller) {
            return;
        }
        self.ident.push_back(entry);
    }

    /// Remove and return the oldest entry on `level`.
    pub fn take_ident(&mut self, level: u16) -> Option<IdentEntry> {
        let idx = self.ident.iter().position(|e| e.level == level)?;
        self.ident.remove(idx)
    }

    pub fn ident_chain(&self) -> impl Iterator<Item = &IdentEntry> {
        self.ident.iter()
    }

    /// Latch IIC as the highest bit of IID & IIE, clear IID and return IIC.
    pub fn read_iic(&mut self) -> u16 {
        self.iic = highest_bit(self.iid & self.iie);
        self.iid = 0;
        self.iic
    }

    /// Read and clear PGS.
    pub fn take_pgs(&mut self) -> u16 {
        std::mem::take(&mut self.pgs)
    }
}

/// Highest set bit among bits 1-15, or 0.
fn highest_bit(bits: u16) -> u16 {
    let bits = bits & 0xfffe;
    if bits == 0 { 0 } else { 15 - bits.leading_zeros() as u16 }
}

/// Shared handle to the interrupt state.
#[derive(Debug, Clone, Default)]
pub struct InterruptLine {
    state: Arc<Mutex<InterruptState>>,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InterruptState>, InterruptError> {
        self.state.lock().map_err(|_| {
            error!("interrupt lock poisoned");
            InterruptError::Poisoned
        })
    }

    /// Run `f` on the state under the lock and recompute PK afterwards.
    pub fn update<R>(&self, f: impl FnOnce(&mut InterruptState) -> R) -> Result<R, InterruptError> {
        let mut state = self.lock()?;
        let r = f(&mut state);
        state.recompute_pk();
        Ok(r)
    }

    /// Read-only access under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&InterruptState) -> R) -> Result<R, InterruptError> {
        let state = self.lock()?;
        Ok(f(&state))
    }

    pub fn raise(&self, level: u16, subcode: u16) -> Result<(), InterruptError> {
        self.update(|s| s.raise(level, subcode))
    }

    /// Raise an internal interrupt for a memory fault and latch the syndrome.
    pub fn raise_fault(&self, subcode: u16, pgs: u16) -> Result<(), InterruptError> {
        self.update(|s| {
            s.pgs = pgs;
            s.raise(INTERNAL_LEVEL, subcode);
        })
    }

    /// Device side: make `level` pending and queue the device for IDENT.
    pub fn raise_device(&self, level: u16, code: u16, caller: u32) -> Result<(), InterruptError> {
        self.update(|s| {
            s.push_ident(IdentEntry { level, code, caller });
            s.raise(level, 0);
        })?;
        debug!("irq: device {} raised level {} code {:o}", caller, level, code);
        Ok(())
    }

    /// IDENT: take the oldest entry on `level`. Raises an IOX error when the
    /// chain has none.
    pub fn ident(&self, level: u16) -> Result<Option<u16>, InterruptError> {
        let found = self.update(|s| {
            let entry = s.take_ident(level);
            if entry.is_none() {
                s.raise(INTERNAL_LEVEL, iid::IOX_ERROR);
            }
            entry
        })?;
        match found {
            Some(e) => debug!("irq: ident level {} -> code {:o} (device {})", level, e.code, e.caller),
            None => debug!("irq: ident level {} with empty chain", level),
        }
        Ok(found.map(|e| e.code))
    }

    pub fn pk(&self) -> Result<u16, InterruptError> {
        self.with(|s| s.pk)
    }

    pub fn snapshot(&self) -> Result<InterruptState, InterruptError> {
        self.with(|s| s.clone())
    }

    pub fn reset(&self) -> Result<(), InterruptError> {
        self.update(|s| *s = InterruptState::default())
    }
}
