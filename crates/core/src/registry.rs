//! Per-variant configuration registry.
//!
//! Each variant maps to an immutable [`VariantConfig`]: memory layout plus
//! the datasheet default fuse and lock bytes. The ATmega8A is built in;
//! further variants can be described in TOML:
//!
//! ```toml
//! [variants.atmega8l]
//! fuse_high = 0xD9
//! fuse_low = 0xE1
//! lockbits = 0x3F
//!
//! [variants.atmega8l.layout]
//! spm_pagesize = 64
//! flashstart = 0x0000
//! flashend = 0x1FFF
//! ramstart = 0x0060
//! ramend = 0x045F
//! ramsize = 1024
//! e2start = 0x000
//! e2end = 0x1FF
//! e2size = 512
//! e2pagesize = 4
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{McuError, Result};
use crate::fuse::{FuseBytes, LockBits};
use crate::init;
use crate::mcu::{MemoryLayout, Mcu};

/// Name of the built-in variant.
pub const ATMEGA8A: &str = "atmega8a";

/// Static configuration of one microcontroller variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Filled in from the table key when loaded from TOML
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_fuse_high")]
    pub fuse_high: u8,
    #[serde(default = "default_fuse_low")]
    pub fuse_low: u8,
    #[serde(default = "default_lockbits")]
    pub lockbits: u8,
    pub layout: MemoryLayout,
}

fn default_fuse_high() -> u8 { FuseBytes::DEFAULT.high() }
fn default_fuse_low() -> u8 { FuseBytes::DEFAULT.low() }
fn default_lockbits() -> u8 { LockBits::UNLOCKED.bits() }

impl VariantConfig {
    /// ATmega8A, values from its `avr/io.h` and datasheet.
    pub fn atmega8a() -> Self {
        VariantConfig {
            name: ATMEGA8A.to_string(),
            fuse_high: 0xD9,
            fuse_low: 0xE1,
            lockbits: 0x3F,
            layout: MemoryLayout {
                spm_pagesize: 64,
                flashstart: 0x0000,
                flashend: 0x1FFF,
                ramstart: 0x0060,
                ramend: 0x045F,
                ramsize: 1024,
                e2start: 0x0000,
                e2end: 0x01FF,
                e2size: 512,
                e2pagesize: 4,
            },
        }
    }

    pub fn default_fuses(&self) -> FuseBytes {
        FuseBytes::new(self.fuse_high, self.fuse_low)
    }

    /// Check the layout invariants the loaders rely on.
    pub fn validate(&self) -> Result<()> {
        let l = &self.layout;
        if self.name.is_empty() {
            return Err(McuError::Config("variant has no name".into()));
        }
        if l.flashend < l.flashstart {
            return Err(McuError::Config(format!(
                "{}: flash end 0x{:X} is below flash start 0x{:X}",
                self.name, l.flashend, l.flashstart
            )));
        }
        if (l.flashend as u64 - l.flashstart as u64 + 1) % 2 != 0 {
            return Err(McuError::Config(format!(
                "{}: flash size is not a whole number of words",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    variants: BTreeMap<String, VariantConfig>,
}

/// Variant name → configuration.
#[derive(Debug, Clone, Default)]
pub struct VariantRegistry {
    variants: BTreeMap<String, VariantConfig>,
}

impl VariantRegistry {
    /// Registry with no variants.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in variants.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        reg.variants.insert(ATMEGA8A.to_string(), VariantConfig::atmega8a());
        reg
    }

    /// Parse variants from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut reg = Self::empty();
        reg.extend_from_toml(text)?;
        Ok(reg)
    }

    /// Add (or replace) the variants described in TOML text.
    pub fn extend_from_toml(&mut self, text: &str) -> Result<()> {
        let file: RegistryFile = toml::from_str(text).map_err(|e| McuError::Config(e.to_string()))?;
        for (key, mut cfg) in file.variants {
            if cfg.name.is_empty() {
                cfg.name = key.clone();
            }
            cfg.validate()?;
            debug!(variant = %key, "variant registered");
            self.variants.insert(key, cfg);
        }
        Ok(())
    }

    /// Add the variants described in a TOML file.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.extend_from_toml(&text)
    }

    pub fn insert(&mut self, cfg: VariantConfig) -> Result<()> {
        cfg.validate()?;
        self.variants.insert(cfg.name.clone(), cfg);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&VariantConfig> {
        self.variants
            .get(name)
            .ok_or_else(|| McuError::UnknownVariant(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }

    /// Initialize `mcu` as the named variant.
    pub fn initialize(&self, name: &str, mcu: Option<&mut Mcu>) -> Result<()> {
        init::initialize(mcu, self.get(name)?)
    }

    /// Serialize every variant back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Out<'a> {
            variants: &'a BTreeMap<String, VariantConfig>,
        }
        toml::to_string(&Out { variants: &self.variants })
            .map_err(|e| McuError::Config(e.to_string()))
    }
}
