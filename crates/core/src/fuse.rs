//! Fuse and lock bit decoding for the ATmega8A.
//!
//! The ATmega8A has two fuse bytes:
//!
//! | Bit | High byte | Low byte |
//! |-----|-----------|----------|
//! | 7   | RSTDISBL  | BODLEVEL |
//! | 6   | WDTON     | BODEN    |
//! | 5   | SPIEN     | SUT1     |
//! | 4   | CKOPT     | SUT0     |
//! | 3   | EESAVE    | CKSEL3   |
//! | 2   | BOOTSZ1   | CKSEL2   |
//! | 1   | BOOTSZ0   | CKSEL1   |
//! | 0   | BOOTRST   | CKSEL0   |
//!
//! and six lock bits (BLB12 BLB11 BLB02 BLB01 LB2 LB1, bit 5 down to 0).
//! A bit reads 0 when programmed and 1 when unprogrammed.
//!
//! [`set_fuse_bytes`] turns the raw bytes into the derived clock and
//! boot-loader state of an [`Mcu`].

use tracing::{debug, warn};

use crate::error::{McuError, Result};
use crate::mcu::{BootLoader, ClockSource, Mcu, FREQ_UNKNOWN};

/// Boot-loader section size selected by BOOTSZ1:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSize {
    /// 00: 1024 words, 0xC00-0xFFF
    Words1024,
    /// 01: 512 words, 0xE00-0xFFF
    Words512,
    /// 10: 256 words, 0xF00-0xFFF
    Words256,
    /// 11: 128 words, 0xF80-0xFFF
    Words128,
}

impl BootSize {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x01 => BootSize::Words512,
            0x02 => BootSize::Words256,
            0x03 => BootSize::Words128,
            _ => BootSize::Words1024,
        }
    }

    pub fn region(self) -> BootLoader {
        BootLoader::from_boot_size(self)
    }
}

/// Clock configuration selected by CKSEL3:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSelect {
    /// CKSEL = 0000
    External,
    /// Calibrated internal RC oscillator at the given frequency in kHz.
    /// CKSEL 0001..0100; every other value falls back to 1 MHz.
    InternalRc(u32),
}

impl ClockSelect {
    pub fn from_cksel(cksel: u8) -> Self {
        match cksel & 0x0F {
            0x00 => ClockSelect::External,
            0x02 => ClockSelect::InternalRc(2000),
            0x03 => ClockSelect::InternalRc(4000),
            0x04 => ClockSelect::InternalRc(8000),
            _ => ClockSelect::InternalRc(1000),
        }
    }

    pub fn source(self) -> ClockSource {
        match self {
            ClockSelect::External => ClockSource::External,
            ClockSelect::InternalRc(_) => ClockSource::Internal,
        }
    }

    /// Frequency in kHz, [`FREQ_UNKNOWN`] for an external clock.
    pub fn freq(self) -> u32 {
        match self {
            ClockSelect::External => FREQ_UNKNOWN,
            ClockSelect::InternalRc(khz) => khz,
        }
    }
}

/// Raw ATmega8A fuse bytes with named field accessors.
///
/// Boolean accessors return `true` when the fuse is *programmed* (bit = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseBytes {
    high: u8,
    low: u8,
}

impl FuseBytes {
    /// Datasheet defaults: 1 MHz internal RC, 1024-word boot section.
    pub const DEFAULT: FuseBytes = FuseBytes { high: 0xD9, low: 0xE1 };

    pub const fn new(high: u8, low: u8) -> Self {
        FuseBytes { high, low }
    }

    pub fn high(&self) -> u8 { self.high }
    pub fn low(&self) -> u8 { self.low }

    #[inline]
    fn high_programmed(&self, bit: u8) -> bool {
        self.high & (1 << bit) == 0
    }

    #[inline]
    fn low_programmed(&self, bit: u8) -> bool {
        self.low & (1 << bit) == 0
    }

    /// BOOTSZ1:0
    pub fn boot_size(&self) -> BootSize {
        BootSize::from_bits(self.high >> 1)
    }

    /// BOOTRST: reset vector points to the boot-loader section.
    pub fn boot_reset(&self) -> bool { self.high_programmed(0) }
    /// EESAVE: EEPROM is preserved through chip erase.
    pub fn eeprom_save(&self) -> bool { self.high_programmed(3) }
    /// CKOPT: oscillator option, must stay unprogrammed for the internal RC.
    pub fn ckopt(&self) -> bool { self.high_programmed(4) }
    /// SPIEN: serial programming enabled.
    pub fn spi_enabled(&self) -> bool { self.high_programmed(5) }
    /// WDTON: watchdog always on.
    pub fn watchdog_on(&self) -> bool { self.high_programmed(6) }
    /// RSTDISBL: PC6 is an I/O pin instead of RESET.
    pub fn reset_disabled(&self) -> bool { self.high_programmed(7) }

    /// CKSEL3:0
    pub fn cksel(&self) -> u8 {
        self.low & 0x0F
    }

    pub fn clock_select(&self) -> ClockSelect {
        ClockSelect::from_cksel(self.cksel())
    }

    /// SUT1:0 start-up time selection.
    pub fn sut(&self) -> u8 {
        (self.low >> 4) & 0x03
    }

    /// BODEN: brown-out detector enabled.
    pub fn bod_enabled(&self) -> bool { self.low_programmed(6) }

    /// Brown-out trigger level in millivolts (BODLEVEL: 1 = 2.7 V, 0 = 4.0 V).
    pub fn bod_level_mv(&self) -> u32 {
        if self.low_programmed(7) { 4000 } else { 2700 }
    }
}

impl Default for FuseBytes {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Protection mode of a lock bit pair, in datasheet mode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Mode 1: both bits unprogrammed, no restriction
    Mode1,
    Mode2,
    Mode3,
    Mode4,
}

impl LockMode {
    fn from_pair(bits: u8) -> Self {
        match bits & 0x03 {
            0x03 => LockMode::Mode1,
            0x02 => LockMode::Mode2,
            0x00 => LockMode::Mode3,
            _ => LockMode::Mode4,
        }
    }
}

/// ATmega8A lock bits. Bits 7:6 are not implemented and are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockBits(u8);

impl LockBits {
    /// No memory lock features enabled, no SPM/LPM restrictions.
    pub const UNLOCKED: LockBits = LockBits(0x3F);

    pub const fn new(bits: u8) -> Self {
        LockBits(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0 & 0x3F
    }

    /// LB2:1, external programming protection.
    pub fn memory_lock(&self) -> LockMode {
        LockMode::from_pair(self.0)
    }

    /// BLB02:01, SPM/LPM protection of the application section.
    pub fn application_lock(&self) -> LockMode {
        LockMode::from_pair(self.0 >> 2)
    }

    /// BLB12:11, SPM/LPM protection of the boot-loader section.
    pub fn boot_loader_lock(&self) -> LockMode {
        LockMode::from_pair(self.0 >> 4)
    }

    pub fn is_unlocked(&self) -> bool {
        self.bits() == 0x3F
    }
}

/// Store fuse bytes in `mcu` and derive its clock and boot-loader settings.
///
/// The internal RC oscillator requires CKOPT unprogrammed; selecting it with
/// CKOPT programmed is rejected. The raw bytes and the boot-loader region
/// are stored before that check, so a rejected pair still lands in
/// `mcu.fuse` while the clock source and frequency keep their old values.
pub fn set_fuse_bytes(mcu: &mut Mcu, high: u8, low: u8) -> Result<()> {
    let fuses = FuseBytes::new(high, low);
    let boot_loader = fuses.boot_size().region();
    let clock = fuses.clock_select();

    mcu.fuse = [low, high];
    mcu.boot_loader = boot_loader;

    if let ClockSelect::InternalRc(_) = clock {
        if fuses.ckopt() {
            warn!(high, low, "CKOPT programmed with internal clock source");
            return Err(McuError::InvalidFuseConfig {
                high,
                low,
                reason: "CKOPT fuse bit should be unprogrammed (CKOPT == 1) \
                         using internal clock source",
            });
        }
    }

    mcu.clk_source = clock.source();
    mcu.freq = clock.freq();

    debug!(
        high,
        low,
        clock = ?mcu.clk_source,
        freq = mcu.freq,
        boot_start = boot_loader.start,
        boot_size = boot_loader.size,
        "fuse bytes decoded"
    );
    Ok(())
}
