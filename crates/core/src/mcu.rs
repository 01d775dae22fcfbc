//! Simulated microcontroller descriptor.
//!
//! [`Mcu`] holds everything the configuration core reads or writes about a
//! device: its identity, memory layout, non-volatile fuse/lock bytes, the
//! clock and boot-loader settings derived from them, and the program memory
//! once a buffer has been bound.
//!
//! Boot-loader boundaries are word addresses, as in the datasheets. Memory
//! layout boundaries are byte addresses.

use serde::{Deserialize, Serialize};

use crate::fuse::{BootSize, FuseBytes};

/// Frequency reported when the clock comes from an external source whose
/// rate cannot be derived from the fuses.
pub const FREQ_UNKNOWN: u32 = u32::MAX;

/// Where the system clock comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockSource {
    /// Calibrated internal RC oscillator
    #[default]
    Internal,
    /// Clock signal driven on XTAL1
    External,
}

/// Boot-loader section of program memory (word addresses, size in words).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BootLoader {
    pub start: u16,
    pub end: u16,
    pub size: u16,
}

impl BootLoader {
    /// Region selected by the BOOTSZ1:0 fuse field.
    pub const fn from_boot_size(bs: BootSize) -> Self {
        match bs {
            BootSize::Words1024 => BootLoader { start: 0xC00, end: 0xFFF, size: 1024 },
            BootSize::Words512 => BootLoader { start: 0xE00, end: 0xFFF, size: 512 },
            BootSize::Words256 => BootLoader { start: 0xF00, end: 0xFFF, size: 256 },
            BootSize::Words128 => BootLoader { start: 0xF80, end: 0xFFF, size: 128 },
        }
    }

    /// Whether a word address falls inside the boot-loader section.
    pub fn contains(&self, word_addr: u16) -> bool {
        word_addr >= self.start && word_addr <= self.end
    }
}

/// Static memory layout of a variant (byte addresses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryLayout {
    /// SPM page size in bytes
    pub spm_pagesize: u16,
    pub flashstart: u32,
    pub flashend: u32,
    pub ramstart: u32,
    pub ramend: u32,
    pub ramsize: u32,
    pub e2start: u32,
    pub e2end: u32,
    pub e2size: u32,
    pub e2pagesize: u16,
}

impl MemoryLayout {
    /// Flash capacity in 16-bit words, or 0 when the bounds are inverted.
    pub fn flash_words(&self) -> usize {
        if self.flashend < self.flashstart {
            return 0;
        }
        ((self.flashend - self.flashstart) as usize + 1) / 2
    }
}

/// Microcontroller descriptor.
#[derive(Debug, Clone, Default)]
pub struct Mcu {
    /// Device name, e.g. "atmega8a"
    pub name: String,
    pub layout: MemoryLayout,
    /// Lock bits, 1 = unprogrammed
    pub lockbits: u8,
    /// Fuse bytes: `fuse[0]` is the low byte, `fuse[1]` the high byte
    pub fuse: [u8; 2],
    pub clk_source: ClockSource,
    /// Clock frequency in kHz, or [`FREQ_UNKNOWN`]
    pub freq: u32,
    pub boot_loader: BootLoader,
    /// Program memory, present once bound
    prog_mem: Option<Vec<u16>>,
}

impl Mcu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw fuse bytes as a typed value.
    pub fn fuse_bytes(&self) -> FuseBytes {
        FuseBytes::new(self.fuse[1], self.fuse[0])
    }

    /// Flash capacity in 16-bit words.
    pub fn flash_words(&self) -> usize {
        self.layout.flash_words()
    }

    /// Word address execution starts from after reset.
    ///
    /// BOOTRST programmed moves the reset vector to the start of the
    /// boot-loader section.
    pub fn reset_vector(&self) -> u16 {
        if self.fuse_bytes().boot_reset() {
            self.boot_loader.start
        } else {
            0
        }
    }

    /// Bound program memory.
    pub fn prog_mem(&self) -> Option<&[u16]> {
        self.prog_mem.as_deref()
    }

    /// Bound program memory, mutably.
    pub fn prog_mem_mut(&mut self) -> Option<&mut [u16]> {
        self.prog_mem.as_deref_mut()
    }

    /// Give up ownership of the bound program memory.
    pub fn take_prog_mem(&mut self) -> Option<Vec<u16>> {
        self.prog_mem.take()
    }

    pub(crate) fn install_prog_mem(&mut self, mem: Vec<u16>) {
        self.prog_mem = Some(mem);
    }

    /// Read one byte of flash by byte address. Out of range or unbound reads 0.
    pub fn read_flash_byte(&self, byte_addr: usize) -> u8 {
        match self.prog_mem.as_deref().and_then(|m| m.get(byte_addr / 2)) {
            Some(&w) if byte_addr % 2 == 0 => w as u8,
            Some(&w) => (w >> 8) as u8,
            None => 0,
        }
    }
}
