//! Error type shared by every configuration and loading operation.
//!
//! All failures are returned synchronously to the caller; nothing is retried
//! or recovered inside the crate. The `Display` text of each variant is the
//! diagnostic a frontend is expected to show to the user.

use crate::ihex::HexRecord;

/// Failure reported by the MCU configuration and loading operations.
#[derive(Debug, thiserror::Error)]
pub enum McuError {
    /// No descriptor was supplied to an operation that needs one.
    #[error("MCU should not be NULL")]
    NullMcu,

    /// The supplied program memory does not match the flash capacity.
    ///
    /// Both sizes are in 16-bit words.
    #[error("program memory is limited by {expected} words ({expected_kib} KiB), \
             {supplied} words ({supplied_kib}.{supplied_rem:03} KiB) doesn't match",
        expected_kib = .expected * 2 / 1024,
        supplied_kib = .supplied * 2 / 1024,
        supplied_rem = .supplied * 2 % 1024)]
    SizeMismatch {
        /// Flash capacity of the descriptor.
        expected: usize,
        /// Size of the buffer the caller tried to bind.
        supplied: usize,
    },

    /// The firmware stream is absent or cannot be read from.
    #[error("cannot read from the firmware stream")]
    NoStream,

    /// A record rebuilt from program memory disagrees with the image.
    #[error("checksum is not correct: 0x{memory:02X} (memory) != 0x{file:02X} (file)\n\
             file record:   {file_record}\nmemory record: {memory_record}")]
    ChecksumMismatch {
        /// Checksum recomputed from the current memory content.
        memory: u8,
        /// Checksum stored in the image.
        file: u8,
        /// Record as read from the image.
        file_record: Box<HexRecord>,
        /// Record rebuilt from program memory at the same address.
        memory_record: Box<HexRecord>,
    },

    /// Fuse bytes describe a configuration the device cannot run with.
    #[error("invalid fuse configuration (high 0x{high:02X}, low 0x{low:02X}): {reason}")]
    InvalidFuseConfig {
        /// High fuse byte that was rejected.
        high: u8,
        /// Low fuse byte that was rejected.
        low: u8,
        /// Which constraint was violated.
        reason: &'static str,
    },

    /// Operation is declared but has no implementation.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// A load was attempted before any program memory was bound.
    #[error("no program memory is bound to {0}")]
    ProgramMemoryUnbound(String),

    /// A line of the image is not a well-formed Intel HEX record.
    #[error("invalid HEX record on line {line}: {reason}")]
    InvalidRecord {
        /// 1-based line number within the stream.
        line: usize,
        /// What is wrong with the line.
        reason: String,
    },

    /// A record type the loader does not interpret, under the reject policy.
    #[error("unsupported HEX record type 0x{kind:02X} (record {record})")]
    UnsupportedRecord {
        /// Raw record type byte.
        kind: u8,
        /// 1-based position of the record in the image.
        record: usize,
    },

    /// A record payload is longer than the count field can describe.
    #[error("record at 0x{address:04X} has {len} data bytes, at most 255 fit")]
    RecordTooLong {
        /// Byte address of the record.
        address: u16,
        /// Payload length in bytes.
        len: usize,
    },

    /// A data record reaches past the end of program memory.
    #[error("record at 0x{address:04X} with {len} bytes \
             exceeds program memory of {capacity} words")]
    AddressOutOfRange {
        /// Byte address of the record.
        address: u16,
        /// Payload length in bytes.
        len: usize,
        /// Program memory size in words.
        capacity: usize,
    },

    /// The registry has no entry under the requested name.
    #[error("unknown MCU variant '{0}'")]
    UnknownVariant(String),

    /// A variant definition could not be decoded.
    #[error("variant configuration error: {0}")]
    Config(String),

    /// A non-volatile state image is malformed or belongs to another device.
    #[error("state image error: {0}")]
    SaveState(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, McuError>;
