//! Variant initialization.
//!
//! Applies a variant's memory layout, then sets the lock bits and fuse bytes
//! to their datasheet defaults. For the ATmega8A that means no memory lock
//! features and no SPM/LPM restrictions on either section (lock bits 0x3F),
//! a 1024-word boot section at 0xC00-0xFFF and the 1 MHz internal RC
//! oscillator (fuses 0xD9/0xE1).

use tracing::{error, info};

use crate::error::{McuError, Result};
use crate::fuse::set_fuse_bytes;
use crate::mcu::Mcu;
use crate::registry::VariantConfig;

/// Configure `mcu` as `variant`.
///
/// Fails with [`McuError::NullMcu`] when no descriptor is given; fuse
/// decoding errors are passed through unchanged.
pub fn initialize(mcu: Option<&mut Mcu>, variant: &VariantConfig) -> Result<()> {
    let Some(mcu) = mcu else {
        error!("MCU should not be NULL");
        return Err(McuError::NullMcu);
    };

    mcu.name = variant.name.clone();
    mcu.layout = variant.layout;
    mcu.lockbits = variant.lockbits;

    if let Err(e) = set_fuse_bytes(mcu, variant.fuse_high, variant.fuse_low) {
        error!(mcu = %mcu.name, "fuse bytes cannot be set correctly");
        return Err(e);
    }

    info!(
        mcu = %mcu.name,
        flash_words = mcu.flash_words(),
        clock = ?mcu.clk_source,
        freq = mcu.freq,
        "MCU initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::{BootLoader, ClockSource};

    #[test]
    fn test_atmega8a_defaults() {
        let mut mcu = Mcu::new();
        initialize(Some(&mut mcu), &VariantConfig::atmega8a()).unwrap();
        assert_eq!(mcu.name, "atmega8a");
        assert_eq!(mcu.lockbits, 0x3F);
        assert_eq!(mcu.fuse, [0xE1, 0xD9]);
        assert_eq!(mcu.clk_source, ClockSource::Internal);
        assert_eq!(mcu.freq, 1000);
        assert_eq!(mcu.boot_loader, BootLoader { start: 0xC00, end: 0xFFF, size: 1024 });
        assert_eq!(mcu.layout.spm_pagesize, 64);
        assert_eq!(mcu.layout.ramsize, 1024);
        assert_eq!(mcu.layout.e2pagesize, 4);
        assert_eq!(mcu.flash_words(), 4096);
        assert_eq!(mcu.reset_vector(), 0);
    }

    #[test]
    fn test_null_mcu() {
        let err = initialize(None, &VariantConfig::atmega8a()).unwrap_err();
        assert!(matches!(err, McuError::NullMcu));
    }

    #[test]
    fn test_propagates_fuse_error() {
        let mut variant = VariantConfig::atmega8a();
        variant.fuse_high = 0xC9;
        let mut mcu = Mcu::new();
        let err = initialize(Some(&mut mcu), &variant).unwrap_err();
        assert!(matches!(err, McuError::InvalidFuseConfig { high: 0xC9, low: 0xE1, .. }));
    }

    #[test]
    fn test_boot_reset_vector() {
        let mut variant = VariantConfig::atmega8a();
        // BOOTRST programmed, BOOTSZ = 10
        variant.fuse_high = 0xDC;
        let mut mcu = Mcu::new();
        initialize(Some(&mut mcu), &variant).unwrap();
        assert_eq!(mcu.boot_loader.start, 0xF00);
        assert_eq!(mcu.reset_vector(), 0xF00);
    }
}
