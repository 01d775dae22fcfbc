//! # mcusim-core
//!
//! Configuration core of mcusim: sets up a simulated AVR microcontroller's
//! non-volatile configuration (fuse and lock bits) and loads its program
//! memory from an Intel HEX image with checksum verification.
//!
//! ## Architecture
//!
//! - [`Mcu`] — Device descriptor: memory layout, fuse/lock bytes, derived
//!   clock and boot-loader settings, bound program memory
//! - [`fuse`] — Fuse byte decoding into clock source, frequency and
//!   boot-loader region; lock bit modes
//! - [`init`] — Variant initialization with datasheet defaults
//! - [`registry`] — Variant name → static configuration, built-in ATmega8A
//!   plus TOML-defined variants
//! - [`progmem`] — Program memory binding and the two-pass HEX load/verify
//! - [`datamem`] — Data memory loading (not implemented, always fails)
//! - [`ihex`] — Intel HEX record parser, reader and formatter
//! - [`savestate`] — Non-volatile state images (fuses, lock bits, flash)
//!
//! [`Device`] wires these together for the common case: initialize a
//! variant, bind erased flash, load a HEX file.
//!
//! Everything is synchronous and single-threaded. Exclusive access to a
//! descriptor is expressed through `&mut Mcu`; callers that share one across
//! threads must serialize reconfiguration themselves.

pub mod datamem;
pub mod error;
pub mod fuse;
pub mod ihex;
pub mod init;
pub mod mcu;
pub mod progmem;
pub mod registry;
pub mod savestate;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub use error::{McuError, Result};
pub use fuse::{FuseBytes, LockBits};
pub use ihex::{HexImage, HexRecord, RecordType};
pub use mcu::{BootLoader, ClockSource, MemoryLayout, Mcu, FREQ_UNKNOWN};
pub use progmem::{LoadOptions, LoadSummary, RecordPolicy};
pub use registry::{VariantConfig, VariantRegistry};

/// Value of an erased flash word.
pub const ERASED_WORD: u16 = 0xFFFF;

/// A configured device with erased flash bound, ready to be programmed.
#[derive(Debug, Clone)]
pub struct Device {
    pub mcu: Mcu,
    pub load_options: LoadOptions,
}

impl Device {
    /// Initialize the named variant from `registry` and bind erased flash.
    pub fn new(registry: &VariantRegistry, variant: &str) -> Result<Self> {
        let mut mcu = Mcu::new();
        registry.initialize(variant, Some(&mut mcu))?;
        let words = mcu.flash_words();
        progmem::bind_memory(&mut mcu, vec![ERASED_WORD; words], words)?;
        Ok(Device { mcu, load_options: LoadOptions::default() })
    }

    /// Built-in ATmega8A with datasheet defaults.
    pub fn atmega8a() -> Result<Self> {
        Self::new(&VariantRegistry::builtin(), registry::ATMEGA8A)
    }

    /// Load and verify Intel HEX text.
    pub fn load_hex(&mut self, hex: &str) -> Result<LoadSummary> {
        let stream = std::io::Cursor::new(hex);
        progmem::load_from_stream_with(&mut self.mcu, Some(stream), &self.load_options)
    }

    /// Load and verify an Intel HEX file.
    pub fn load_hex_file<P: AsRef<Path>>(&mut self, path: P) -> Result<LoadSummary> {
        let file = File::open(path).map_err(|_| McuError::NoStream)?;
        let stream = BufReader::new(file);
        progmem::load_from_stream_with(&mut self.mcu, Some(stream), &self.load_options)
    }

    /// Reprogram the fuse bytes.
    pub fn set_fuses(&mut self, fuses: FuseBytes) -> Result<()> {
        fuse::set_fuse_bytes(&mut self.mcu, fuses.high(), fuses.low())
    }

    /// Erase flash back to [`ERASED_WORD`].
    pub fn chip_erase(&mut self) {
        if let Some(mem) = self.mcu.prog_mem_mut() {
            mem.fill(ERASED_WORD);
        }
    }
}
