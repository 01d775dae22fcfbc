//! Data memory loading.
//!
//! Declared so frontends have a single entry point for it; there is no
//! implementation yet and every call fails explicitly rather than silently
//! doing nothing.

use tracing::warn;

use crate::error::{McuError, Result};
use crate::mcu::Mcu;

/// Bind `mem` as the data memory of `mcu`. Always fails with
/// [`McuError::NotImplemented`].
pub fn set_data_memory(mcu: &mut Mcu, mem: Vec<u8>, size: usize) -> Result<()> {
    warn!(mcu = %mcu.name, size, supplied = mem.len(), "data memory loading requested");
    Err(McuError::NotImplemented("data memory loading"))
}
