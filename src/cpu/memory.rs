//! ND100 memory subsystem.
//!
//! Physical memory is up to 16M 16-bit words in 1K-word pages. The four
//! 64-entry page tables live outside normal memory and are reached either
//! by the MMU during translation or by software through the shadow window
//! at the top of the 16-bit address space.

use serde::{Deserialize, Serialize};

/// Words per page.
pub const PAGE_WORDS: usize = 1024;
/// Pages of physical memory (16M words).
pub const MAX_PAGES: usize = 16384;
/// Entries per page table.
pub const PT_ENTRIES: usize = 64;
/// Number of page tables.
pub const PAGE_TABLES: usize = 4;

/// Page table entry bits.
pub mod pte {
    pub const WPM: u32 = 1 << 31;
    pub const RPM: u32 = 1 << 30;
    pub const FPM: u32 = 1 << 29;
    pub const PERMITS: u32 = WPM | RPM | FPM;
    /// Written in page.
    pub const WIP: u32 = 1 << 28;
    /// Page used.
    pub const PGU: u32 = 1 << 27;
    pub const RING_SHIFT: u32 = 24;

    pub fn ring(entry: u32) -> u16 {
        ((entry >> RING_SHIFT) & 0x3) as u16
    }

    /// Physical page number, 14 bits with extended addressing or 9 without.
    pub fn ppn(entry: u32, sexi: bool) -> u32 {
        if sexi { entry & 0x3fff } else { entry & 0x01ff }
    }
}

/// Which part of a word a store touches. Even byte addresses are the most
/// significant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteSelect {
    High,
    Low,
    Word,
}

impl ByteSelect {
    /// Merge `value` into `old` according to the selector.
    #[inline]
    pub fn merge(self, old: u16, value: u16) -> u16 {
        match self {
            ByteSelect::High => (old & 0x00ff) | (value << 8),
            ByteSelect::Low => (old & 0xff00) | (value & 0x00ff),
            ByteSelect::Word => value,
        }
    }
}

/// Physical memory.
#[derive(Clone)]
pub struct PhysicalMemory {
    words: Vec<u16>,
}

impl PhysicalMemory {
    /// Full 16M-word memory.
    pub fn new() -> Self {
        Self::with_pages(MAX_PAGES)
    }

    /// Memory of `pages` 1K-word pages, rounded up to a power of two so
    /// addresses can wrap by masking.
    pub fn with_pages(pages: usize) -> Self {
        let pages = pages.clamp(64, MAX_PAGES).next_power_of_two();
        Self { words: vec![0; pages * PAGE_WORDS] }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    fn index(&self, addr: u32) -> usize {
        addr as usize & (self.words.len() - 1)
    }

    #[inline]
    pub fn read(&self, addr: u32) -> u16 {
        self.words[self.index(addr)]
    }

    #[inline]
    pub fn write(&mut self, addr: u32, value: u16, select: ByteSelect) {
        let i = self.index(addr);
        self.words[i] = select.merge(self.words[i], value);
    }

    /// Address of word `offset` in physical page `ppn`.
    #[inline]
    pub fn page_address(ppn: u32, offset: u16) -> u32 {
        (ppn << 10) | (offset as u32 & 0x3ff)
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Copy `words` into memory starting at `start`.
    pub fn load(&mut self, start: u32, words: &[u16]) {
        for (i, &w) in words.iter().enumerate() {
            self.write(start.wrapping_add(i as u32), w, ByteSelect::Word);
        }
    }

    pub fn dump(&self, start: u32, count: usize) -> Vec<(u32, u16)> {
        (0..count as u32)
            .map(|i| {
                let a = start.wrapping_add(i);
                (a, self.read(a))
            })
            .collect()
    }
}

impl Default for PhysicalMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PhysicalMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self.words.iter().filter(|&&w| w != 0).count();
        f.debug_struct("PhysicalMemory")
            .field("words", &self.words.len())
            .field("nonzero", &used)
            .finish()
    }
}

/// The four page tables, stored as one flat array of 256 entries so the
/// shadow window can address them linearly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTables {
    entries: Vec<u32>,
}

impl PageTables {
    pub fn new() -> Self {
        Self { entries: vec![0; PAGE_TABLES * PT_ENTRIES] }
    }

    #[inline]
    pub fn entry(&self, table: u16, vpn: u16) -> u32 {
        self.entries[Self::slot(table, vpn)]
    }

    #[inline]
    pub fn set_entry(&mut self, table: u16, vpn: u16, value: u32) {
        self.entries[Self::slot(table, vpn)] = value;
    }

    /// OR `bits` into an entry (used / written markers).
    #[inline]
    pub fn mark(&mut self, table: u16, vpn: u16, bits: u32) {
        self.entries[Self::slot(table, vpn)] |= bits;
    }

    #[inline]
    fn slot(table: u16, vpn: u16) -> usize {
        (table as usize & 0x3) * PT_ENTRIES + (vpn as usize & 0x3f)
    }

    /// Index into the flat array for a shadow-window address. With
    /// extended addressing each entry takes two words.
    #[inline]
    fn shadow_slot(addr: u16, sexi: bool) -> usize {
        if sexi { ((addr & 0x01ff) >> 1) as usize } else { (addr & 0x00ff) as usize }
    }

    /// Read one word of the shadow window.
    ///
    /// In extended mode even addresses give the upper half of the entry and
    /// odd ones the lower half. In normal mode an entry is packed into one
    /// word: permits and ring in bits 15-9, page number in bits 8-0.
    pub fn shadow_read(&self, addr: u16, sexi: bool) -> u16 {
        let e = self.entries[Self::shadow_slot(addr, sexi)];
        if sexi {
            if addr & 1 == 0 { (e >> 16) as u16 } else { e as u16 }
        } else {
            (((e & 0xfe00_0000) >> 16) | (e & 0x0000_01ff)) as u16
        }
    }

    /// Write through the shadow window.
    pub fn shadow_write(&mut self, addr: u16, value: u16, select: ByteSelect, sexi: bool) {
        let slot = Self::shadow_slot(addr, sexi);
        let e = self.entries[slot];
        let v = value as u32;
        let even = addr & 1 == 0;
        self.entries[slot] = match (select, sexi) {
            (ByteSelect::High, true) if even => (e & 0x00ff_ffff) | (v << 24),
            (ByteSelect::High, true) => (e & 0xffff_00ff) | (v << 8),
            (ByteSelect::High, false) => (e & 0x01ff_feff) | ((v & 0xfe) << 25) | ((v & 0x01) << 8),
            (ByteSelect::Low, true) if even => (e & 0xff00_ffff) | ((v & 0xff) << 16),
            (ByteSelect::Low, true) => (e & 0xffff_ff00) | (v & 0xff),
            (ByteSelect::Low, false) => (e & 0xffff_ff00) | (v & 0xff),
            (ByteSelect::Word, true) if even => (e & 0x0000_ffff) | (v << 16),
            (ByteSelect::Word, true) => (e & 0xffff_0000) | v,
            (ByteSelect::Word, false) => (e & 0x01ff_fe00) | ((v & 0xfe00) << 16) | (v & 0x01ff),
        };
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = 0);
    }
}

impl Default for PageTables {
    fn default() -> Self {
        Self::new()
    }
}
