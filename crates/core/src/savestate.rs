//! Non-volatile state images.
//!
//! Fuse bytes, lock bits and flash survive power cycles on the real part.
//! This module captures them from an [`Mcu`] and writes them to a file using
//! bincode serialization with deflate compression, so a configured and
//! programmed device can be brought back without re-flashing.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "MCUS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Name length      |  u8
//! +------------------+
//! | Device name      |  UTF-8, `name length` bytes
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{McuError, Result};
use crate::fuse::set_fuse_bytes;
use crate::mcu::Mcu;

/// Magic bytes identifying a state image.
const MAGIC: &[u8; 4] = b"MCUS";
/// Current state image format version.
const FORMAT_VERSION: u32 = 1;
/// Magic + version + name length
const HEADER_LEN: usize = 9;

/// Non-volatile state of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvState {
    pub lockbits: u8,
    /// `[low, high]`, as stored in [`Mcu::fuse`]
    pub fuse: [u8; 2],
    pub prog_mem: Option<Vec<u16>>,
}

impl NvState {
    pub fn capture(mcu: &Mcu) -> Self {
        NvState {
            lockbits: mcu.lockbits,
            fuse: mcu.fuse,
            prog_mem: mcu.prog_mem().map(<[u16]>::to_vec),
        }
    }

    /// Apply the state to `mcu`, re-deriving clock and boot-loader settings
    /// from the fuses.
    ///
    /// Nothing is changed if the flash image has the wrong size or the fuses
    /// are rejected.
    pub fn restore(&self, mcu: &mut Mcu) -> Result<()> {
        if let Some(mem) = &self.prog_mem {
            if mem.len() != mcu.flash_words() {
                return Err(McuError::SizeMismatch {
                    expected: mcu.flash_words(),
                    supplied: mem.len(),
                });
            }
        }
        set_fuse_bytes(mcu, self.fuse[1], self.fuse[0])?;
        mcu.lockbits = self.lockbits;
        if let Some(mem) = &self.prog_mem {
            mcu.install_prog_mem(mem.clone());
        }
        Ok(())
    }
}

/// Encode a state image for the device called `name`.
pub fn encode(state: &NvState, name: &str) -> Result<Vec<u8>> {
    let name_len = u8::try_from(name.len())
        .map_err(|_| McuError::SaveState(format!("device name too long: {}", name)))?;
    let payload = bincode::serialize(state)
        .map_err(|e| McuError::SaveState(format!("serialize error: {}", e)))?;

    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + name.len() + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(name_len);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode a state image, verifying magic, version, and device name.
pub fn decode(data: &[u8], expected_name: &str) -> Result<NvState> {
    if data.len() < HEADER_LEN {
        return Err(McuError::SaveState("file too small".into()));
    }
    if &data[0..4] != MAGIC {
        return Err(McuError::SaveState("invalid state image (bad magic)".into()));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(McuError::SaveState(format!(
            "unsupported state image version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    let name_end = HEADER_LEN + data[8] as usize;
    let name = data
        .get(HEADER_LEN..name_end)
        .ok_or_else(|| McuError::SaveState("truncated header".into()))?;
    if name != expected_name.as_bytes() {
        return Err(McuError::SaveState(format!(
            "device mismatch: image={} current={}",
            String::from_utf8_lossy(name),
            expected_name
        )));
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[name_end..])
        .map_err(|e| McuError::SaveState(format!("decompress error: {:?}", e)))?;

    bincode::deserialize(&decompressed)
        .map_err(|e| McuError::SaveState(format!("deserialize error: {}", e)))
}

/// Save the non-volatile state of `mcu` to `path`.
pub fn save_to_file(mcu: &Mcu, path: &Path) -> Result<()> {
    let out = encode(&NvState::capture(mcu), &mcu.name)?;
    std::fs::write(path, out)?;
    info!(mcu = %mcu.name, path = %path.display(), "non-volatile state saved");
    Ok(())
}

/// Load the state image at `path` into `mcu`.
pub fn load_from_file(mcu: &mut Mcu, path: &Path) -> Result<()> {
    let data = std::fs::read(path)?;
    let state = decode(&data, &mcu.name)?;
    state.restore(mcu)?;
    info!(mcu = %mcu.name, path = %path.display(), "non-volatile state restored");
    Ok(())
}

/// Derive the state file path from a firmware path.
/// `blink.hex` → `blink.nvm`
pub fn state_path(firmware_path: &Path) -> PathBuf {
    let stem = firmware_path.file_stem().and_then(|s| s.to_str()).unwrap_or("firmware");
    let dir = firmware_path.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}.nvm", stem))
}
