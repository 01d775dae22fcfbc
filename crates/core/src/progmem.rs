//! Program memory binding and Intel HEX loading.
//!
//! Loading is a two-pass protocol over the same record sequence:
//!
//! 1. **Ingest** copies every data record into program memory at word
//!    offset `address / 2`, low byte first within each word.
//! 2. **Verify** replays the records from the start, rebuilds each data
//!    record from what is now in memory, and compares the recomputed
//!    checksum against the one stored in the image.
//!
//! A stream is replayed by seeking back to its start, so
//! [`load_from_stream`] needs `BufRead + Seek`. [`load_image`] runs the same
//! passes over an already parsed [`HexImage`].
//!
//! A failure during ingest can leave memory partially overwritten. Treat any
//! error as "reload from a known-good state".

use std::io::{BufRead, Seek};

use tracing::{debug, info, warn};

use crate::error::{McuError, Result};
use crate::ihex::{HexImage, HexReader, HexRecord, RecordType};
use crate::mcu::Mcu;

/// What the ingest pass does with record types other than data and EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordPolicy {
    /// Ignore the record
    #[default]
    Skip,
    /// Fail with [`McuError::UnsupportedRecord`]
    Reject,
}

/// Options for the ingest pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub unknown_records: RecordPolicy,
}

/// Outcome of a completed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    /// Data records written and verified
    pub data_records: usize,
    /// Payload bytes written
    pub bytes: usize,
    /// Records of other types that were skipped (EOF excluded)
    pub skipped: usize,
}

/// Bind `mem` as the program memory of `mcu`.
///
/// `size` is the word count the caller claims for the buffer; it must equal
/// the flash capacity, and so must the buffer itself. On success the
/// descriptor owns the buffer, replacing any previously bound one.
pub fn bind_memory(mcu: &mut Mcu, mem: Vec<u16>, size: usize) -> Result<()> {
    let flash_size = mcu.flash_words();
    if size != flash_size || mem.len() != flash_size {
        let supplied = if size != flash_size { size } else { mem.len() };
        warn!(mcu = %mcu.name, expected = flash_size, supplied, "program memory size mismatch");
        return Err(McuError::SizeMismatch { expected: flash_size, supplied });
    }
    mcu.install_prog_mem(mem);
    info!(mcu = %mcu.name, words = flash_size, "program memory bound");
    Ok(())
}

/// Load and verify an Intel HEX stream with default options.
pub fn load_from_stream<R: BufRead + Seek>(
    mcu: &mut Mcu,
    stream: Option<R>,
) -> Result<LoadSummary> {
    load_from_stream_with(mcu, stream, &LoadOptions::default())
}

/// Load and verify an Intel HEX stream.
///
/// Fails with [`McuError::NoStream`] before touching memory if there is no
/// stream or it cannot report its position.
pub fn load_from_stream_with<R: BufRead + Seek>(
    mcu: &mut Mcu,
    stream: Option<R>,
    opts: &LoadOptions,
) -> Result<LoadSummary> {
    let mut stream = stream.ok_or(McuError::NoStream)?;
    if stream.stream_position().is_err() {
        return Err(McuError::NoStream);
    }
    ensure_bound(mcu)?;

    let mut reader = HexReader::new(stream);
    let mut summary = ingest(mcu, &mut reader, opts)?;

    let mut stream = reader.into_inner();
    stream.rewind()?;
    summary.data_records = verify(mcu, HexReader::new(stream))?;

    info!(
        mcu = %mcu.name,
        records = summary.data_records,
        bytes = summary.bytes,
        "program memory loaded"
    );
    Ok(summary)
}

/// Load and verify an already parsed image.
pub fn load_image(mcu: &mut Mcu, image: &HexImage, opts: &LoadOptions) -> Result<LoadSummary> {
    ensure_bound(mcu)?;
    let mut summary = ingest(mcu, image.iter(), opts)?;
    summary.data_records = verify(mcu, image.iter())?;
    info!(
        mcu = %mcu.name,
        records = summary.data_records,
        bytes = summary.bytes,
        "program memory loaded"
    );
    Ok(summary)
}

/// Ingest pass: copy data records into program memory.
///
/// A record whose payload would run past the end of memory fails with
/// [`McuError::AddressOutOfRange`] before any of it is written. Overlapping
/// records are written in order; the later one wins.
pub fn ingest<I>(mcu: &mut Mcu, records: I, opts: &LoadOptions) -> Result<LoadSummary>
where
    I: IntoIterator<Item = Result<HexRecord>>,
{
    let name = mcu.name.clone();
    let mem = mcu
        .prog_mem_mut()
        .ok_or(McuError::ProgramMemoryUnbound(name))?;
    let mut summary = LoadSummary::default();

    for (i, rec) in records.into_iter().enumerate() {
        let rec = rec?;
        match rec.kind {
            RecordType::Data => {
                let offset = word_offset(&rec, mem.len())?;
                write_bytes(mem, offset, &rec.data);
                summary.data_records += 1;
                summary.bytes += rec.data.len();
            }
            RecordType::EndOfFile => continue,
            RecordType::Other(kind) => match opts.unknown_records {
                RecordPolicy::Skip => {
                    debug!(kind, address = rec.address, "skipping HEX record");
                    summary.skipped += 1;
                }
                RecordPolicy::Reject => {
                    return Err(McuError::UnsupportedRecord { kind, record: i + 1 });
                }
            },
        }
    }
    Ok(summary)
}

/// Verify pass: compare every data record against program memory.
///
/// Returns the number of data records checked. The first record whose
/// checksum differs from the one rebuilt out of memory fails with
/// [`McuError::ChecksumMismatch`].
pub fn verify<I>(mcu: &Mcu, records: I) -> Result<usize>
where
    I: IntoIterator<Item = Result<HexRecord>>,
{
    let mem = mcu
        .prog_mem()
        .ok_or_else(|| McuError::ProgramMemoryUnbound(mcu.name.clone()))?;
    let mut checked = 0;

    for rec in records {
        let rec = rec?;
        if rec.kind != RecordType::Data {
            continue;
        }

        let offset = word_offset(&rec, mem.len())?;
        let content = read_bytes(mem, offset, rec.data.len());
        let mem_rec = HexRecord::new(rec.address, rec.kind, &content)?;
        if mem_rec.checksum != rec.checksum {
            warn!(
                memory = mem_rec.checksum,
                file = rec.checksum,
                file_record = %rec,
                memory_record = %mem_rec,
                "checksum is not correct"
            );
            return Err(McuError::ChecksumMismatch {
                memory: mem_rec.checksum,
                file: rec.checksum,
                file_record: Box::new(rec),
                memory_record: Box::new(mem_rec),
            });
        }
        checked += 1;
    }
    Ok(checked)
}

fn ensure_bound(mcu: &Mcu) -> Result<()> {
    if mcu.prog_mem().is_none() {
        return Err(McuError::ProgramMemoryUnbound(mcu.name.clone()));
    }
    Ok(())
}

/// Word offset of a data record, checked against the memory size.
/// Empty records touch no memory and are never out of range.
fn word_offset(rec: &HexRecord, words: usize) -> Result<usize> {
    let offset = rec.address as usize / 2;
    if !rec.data.is_empty() && offset * 2 + rec.data.len() > words * 2 {
        return Err(McuError::AddressOutOfRange {
            address: rec.address,
            len: rec.data.len(),
            capacity: words,
        });
    }
    Ok(offset)
}

fn write_bytes(mem: &mut [u16], offset: usize, data: &[u8]) {
    for (i, &b) in data.iter().enumerate() {
        let w = &mut mem[offset + i / 2];
        if i % 2 == 0 {
            *w = (*w & 0xFF00) | b as u16;
        } else {
            *w = (*w & 0x00FF) | ((b as u16) << 8);
        }
    }
}

fn read_bytes(mem: &[u16], offset: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let w = mem[offset + i / 2];
            if i % 2 == 0 { w as u8 } else { (w >> 8) as u8 }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::MemoryLayout;
    use std::io::{self, Cursor, Read, SeekFrom};

    const WORDS: usize = 4096;

    fn m8a() -> Mcu {
        let mut mcu = Mcu::new();
        mcu.name = "atmega8a".into();
        mcu.layout = MemoryLayout { flashstart: 0, flashend: 0x1FFF, ..Default::default() };
        mcu
    }

    fn bound_m8a() -> Mcu {
        let mut mcu = m8a();
        bind_memory(&mut mcu, vec![0xFFFF; WORDS], WORDS).unwrap();
        mcu
    }

    fn sample_image() -> HexImage {
        let bytes: Vec<u8> = (0..100u32).map(|i| (i * 7 + 3) as u8).collect();
        HexImage::from_bytes(&bytes, 16)
    }

    #[test]
    fn test_bind_memory_size() {
        let mut mcu = m8a();
        match bind_memory(&mut mcu, vec![0; WORDS - 1], WORDS - 1) {
            Err(McuError::SizeMismatch { expected, supplied }) => {
                assert_eq!(expected, WORDS);
                assert_eq!(supplied, WORDS - 1);
            }
            other => panic!("expected size mismatch, got {:?}", other),
        }
        assert!(matches!(
            bind_memory(&mut mcu, vec![0; WORDS], WORDS + 1),
            Err(McuError::SizeMismatch { .. })
        ));
        assert!(mcu.prog_mem().is_none());

        bind_memory(&mut mcu, vec![0; WORDS], WORDS).unwrap();
        assert_eq!(mcu.prog_mem().unwrap().len(), WORDS);
    }

    #[test]
    fn test_bind_replaces_buffer() {
        let mut mcu = bound_m8a();
        bind_memory(&mut mcu, vec![0x1234; WORDS], WORDS).unwrap();
        assert!(mcu.prog_mem().unwrap().iter().all(|&w| w == 0x1234));
    }

    #[test]
    fn test_load_from_stream() {
        let mut mcu = bound_m8a();
        let hex = ":100000000C9434000C944E000C944E000C944E0052\n:00000001FF\n";
        let summary = load_from_stream(&mut mcu, Some(Cursor::new(hex))).unwrap();
        assert_eq!(summary, LoadSummary { data_records: 1, bytes: 16, skipped: 0 });

        let mem = mcu.prog_mem().unwrap();
        assert_eq!(mem[0], 0x940C);
        assert_eq!(mem[1], 0x0034);
        assert_eq!(mem[8], 0xFFFF);
    }

    #[test]
    fn test_round_trip_many_records() {
        let mut mcu = bound_m8a();
        let image = sample_image();
        let text = image.to_string();
        let summary = load_from_stream(&mut mcu, Some(Cursor::new(text))).unwrap();
        assert_eq!(summary.data_records, 7);
        assert_eq!(summary.bytes, 100);
        assert_eq!(mcu.read_flash_byte(99), (99 * 7 + 3) as u8);
        assert_eq!(mcu.read_flash_byte(100), 0xFF);
    }

    #[test]
    fn test_corruption_between_passes() {
        let mut mcu = bound_m8a();
        let image = sample_image();
        ingest(&mut mcu, image.iter(), &LoadOptions::default()).unwrap();

        // byte 37 lives in the third record (0x20..0x30)
        mcu.prog_mem_mut().unwrap()[37 / 2] ^= 0x0100;
        // and byte 70 in the fifth
        mcu.prog_mem_mut().unwrap()[35] ^= 0x0001;

        match verify(&mcu, image.iter()) {
            Err(McuError::ChecksumMismatch { memory, file, file_record, memory_record }) => {
                assert_eq!(file_record.address, 0x20);
                assert_eq!(memory_record.address, 0x20);
                assert_eq!(file, image.records()[2].checksum);
                assert_ne!(memory, file);
                assert_eq!(memory_record.data[5], file_record.data[5] ^ 0x01);
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_no_stream() {
        let mut mcu = bound_m8a();
        let err = load_from_stream::<Cursor<&str>>(&mut mcu, None).unwrap_err();
        assert!(matches!(err, McuError::NoStream));
        assert!(mcu.prog_mem().unwrap().iter().all(|&w| w == 0xFFFF));
    }

    /// Stream that refuses to seek.
    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl BufRead for Broken {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            Ok(&[])
        }
        fn consume(&mut self, _: usize) {}
    }

    impl Seek for Broken {
        fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::Other, "closed"))
        }
    }

    #[test]
    fn test_unseekable_stream() {
        let mut mcu = bound_m8a();
        assert!(matches!(load_from_stream(&mut mcu, Some(Broken)), Err(McuError::NoStream)));
    }

    #[test]
    fn test_unbound_memory() {
        let mut mcu = m8a();
        let err = load_from_stream(&mut mcu, Some(Cursor::new(":00000001FF\n"))).unwrap_err();
        assert!(matches!(err, McuError::ProgramMemoryUnbound(_)));
    }

    #[test]
    fn test_unknown_record_policy() {
        let hex = ":020000021000EC\n:0400000001020304F2\n:00000001FF\n";

        let mut mcu = bound_m8a();
        let summary = load_from_stream(&mut mcu, Some(Cursor::new(hex))).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(mcu.prog_mem().unwrap()[0], 0x0201);

        let mut mcu = bound_m8a();
        let opts = LoadOptions { unknown_records: RecordPolicy::Reject };
        let err = load_from_stream_with(&mut mcu, Some(Cursor::new(hex)), &opts).unwrap_err();
        assert!(matches!(err, McuError::UnsupportedRecord { kind: 0x02, record: 1 }));
        assert_eq!(mcu.prog_mem().unwrap()[0], 0xFFFF);
    }

    #[test]
    fn test_out_of_range_record() {
        let mut mcu = bound_m8a();
        let image = HexImage::parse(
            &[
                HexRecord::new(0x1FFE, RecordType::Data, &[0xAA, 0xBB]).unwrap().to_string(),
                HexRecord::new(0x1FFE, RecordType::Data, &[1, 2, 3, 4]).unwrap().to_string(),
            ]
            .join("\n"),
        )
        .unwrap();
        let err = load_image(&mut mcu, &image, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, McuError::AddressOutOfRange { address: 0x1FFE, len: 4, .. }));
        let mem = mcu.prog_mem().unwrap();
        assert_eq!(mem[WORDS - 1], 0xBBAA);
    }

    #[test]
    fn test_overlapping_records_fail_verification() {
        let mut mcu = bound_m8a();
        let hex = [
            HexRecord::new(0x0000, RecordType::Data, &[1, 2, 3, 4]).unwrap().to_string(),
            HexRecord::new(0x0002, RecordType::Data, &[9, 9]).unwrap().to_string(),
            HexRecord::eof().to_string(),
        ]
        .join("\n");
        match load_from_stream(&mut mcu, Some(Cursor::new(hex))) {
            Err(McuError::ChecksumMismatch { file_record, .. }) => {
                assert_eq!(file_record.address, 0)
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
        assert_eq!(mcu.prog_mem().unwrap()[1], 0x0909);
    }

    #[test]
    fn test_odd_length_record_keeps_high_byte() {
        let mut mcu = bound_m8a();
        let rec = HexRecord::new(0x10, RecordType::Data, &[0x11, 0x22, 0x33]).unwrap();
        let image = HexImage::parse(&rec.to_string()).unwrap();
        load_image(&mut mcu, &image, &LoadOptions::default()).unwrap();
        let mem = mcu.prog_mem().unwrap();
        assert_eq!(mem[8], 0x2211);
        assert_eq!(mem[9], 0xFF33);
    }

    #[test]
    fn test_empty_record_past_end_of_memory() {
        let mut mcu = bound_m8a();
        let hex = ":0400000001020304F2\n:00FFF00011\n:00000001FF\n";
        let summary = load_from_stream(&mut mcu, Some(Cursor::new(hex))).unwrap();
        assert_eq!(summary.data_records, 2);
        assert_eq!(summary.bytes, 4);
        assert_eq!(mcu.prog_mem().unwrap()[0], 0x0201);
    }

    #[test]
    fn test_malformed_line_aborts_load() {
        let mut mcu = bound_m8a();
        let hex = ":0400000001020304F2\n:04000400zz\n";
        let err = load_from_stream(&mut mcu, Some(Cursor::new(hex))).unwrap_err();
        assert!(matches!(err, McuError::InvalidRecord { line: 2, .. }));
        // first record already landed
        assert_eq!(mcu.prog_mem().unwrap()[0], 0x0201);
    }
}
