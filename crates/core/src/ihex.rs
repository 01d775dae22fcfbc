//! Intel HEX records.
//!
//! One record per line, `:LLAAAATT[DD...]CC`:
//!
//! | Field | Meaning                                   |
//! |-------|-------------------------------------------|
//! | `:`   | start code                                |
//! | LL    | number of data bytes (0-255)              |
//! | AAAA  | 16-bit address, big-endian                |
//! | TT    | record type                               |
//! | DD    | data bytes                                |
//! | CC    | two's complement of the sum of all bytes  |
//!
//! Only type 00 (data) and 01 (end of file) mean anything to the loader;
//! everything else parses as [`RecordType::Other`].
//!
//! [`HexReader`] yields records lazily from any [`BufRead`]; [`HexImage`]
//! is a fully materialized record list.

use std::fmt;
use std::io::BufRead;

use crate::error::{McuError, Result};

/// Longest payload a record can carry.
pub const MAX_DATA_LEN: usize = 255;

/// Intel HEX record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// 00
    Data,
    /// 01
    EndOfFile,
    /// Extended segment/linear address, start address, or anything else
    Other(u8),
}

impl RecordType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => RecordType::Data,
            0x01 => RecordType::EndOfFile,
            other => RecordType::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            RecordType::Data => 0x00,
            RecordType::EndOfFile => 0x01,
            RecordType::Other(b) => b,
        }
    }
}

/// A single parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Byte address within the current segment
    pub address: u16,
    pub kind: RecordType,
    pub data: Vec<u8>,
    pub checksum: u8,
}

impl HexRecord {
    /// Build a record and compute its checksum.
    ///
    /// Fails with [`McuError::RecordTooLong`] for payloads longer than
    /// [`MAX_DATA_LEN`], which the one-byte count field cannot describe.
    pub fn new(address: u16, kind: RecordType, data: &[u8]) -> Result<Self> {
        if data.len() > MAX_DATA_LEN {
            return Err(McuError::RecordTooLong { address, len: data.len() });
        }
        Ok(Self::with_checksum(address, kind, data.to_vec()))
    }

    /// `data` must be at most [`MAX_DATA_LEN`] bytes.
    fn with_checksum(address: u16, kind: RecordType, data: Vec<u8>) -> Self {
        let mut rec = HexRecord { address, kind, data, checksum: 0 };
        rec.checksum = rec.compute_checksum();
        rec
    }

    /// End-of-file record, `:00000001FF`.
    pub fn eof() -> Self {
        Self::with_checksum(0, RecordType::EndOfFile, Vec::new())
    }

    /// Two's complement of the sum of every byte except the checksum itself.
    pub fn compute_checksum(&self) -> u8 {
        let [hi, lo] = self.address.to_be_bytes();
        let sum = self.data.iter().fold(
            (self.data.len() as u8)
                .wrapping_add(hi)
                .wrapping_add(lo)
                .wrapping_add(self.kind.as_byte()),
            |acc, &b| acc.wrapping_add(b),
        );
        (!sum).wrapping_add(1)
    }

    /// Parse one line. Surrounding whitespace is ignored.
    ///
    /// The error string describes what is wrong with the line; callers attach
    /// the position.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        let body = line
            .strip_prefix(':')
            .ok_or_else(|| "missing start code ':'".to_string())?;

        let bytes = hex_line_to_bytes(body)?;
        if bytes.len() < 5 {
            return Err("line too short".into());
        }

        let byte_count = bytes[0] as usize;
        if bytes.len() != byte_count + 5 {
            return Err(format!(
                "byte count {} doesn't match {} data bytes",
                byte_count,
                bytes.len() - 5
            ));
        }

        let sum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Err(format!("checksum error: sum={}", sum));
        }

        Ok(HexRecord {
            address: u16::from_be_bytes([bytes[1], bytes[2]]),
            kind: RecordType::from_byte(bytes[3]),
            data: bytes[4..4 + byte_count].to_vec(),
            checksum: bytes[4 + byte_count],
        })
    }
}

impl fmt::Display for HexRecord {
    /// Formats the record as its Intel HEX line, without a line terminator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{:02X}{:04X}{:02X}", self.data.len(), self.address, self.kind.as_byte())?;
        for b in &self.data {
            write!(f, "{:02X}", b)?;
        }
        write!(f, "{:02X}", self.checksum)
    }
}

/// Convert hex character pairs to bytes
fn hex_line_to_bytes(hex_str: &str) -> std::result::Result<Vec<u8>, String> {
    let chars: Vec<char> = hex_str.chars().collect();

    if chars.len() % 2 != 0 {
        return Err("odd number of hex characters".into());
    }

    let mut bytes = Vec::with_capacity(chars.len() / 2);
    for chunk in chars.chunks(2) {
        let hi = hex_char(chunk[0])?;
        let lo = hex_char(chunk[1])?;
        bytes.push((hi << 4) | lo);
    }

    Ok(bytes)
}

fn hex_char(c: char) -> std::result::Result<u8, String> {
    match c {
        '0'..='9' => Ok(c as u8 - b'0'),
        'a'..='f' => Ok(c as u8 - b'a' + 10),
        'A'..='F' => Ok(c as u8 - b'A' + 10),
        _ => Err(format!("invalid hex character: {:?}", c)),
    }
}

/// Lazy record reader over a buffered stream.
///
/// Blank lines are skipped. A malformed line or an I/O error is yielded as
/// an error item and ends the sequence.
pub struct HexReader<R> {
    inner: R,
    line: usize,
    buf: String,
    done: bool,
}

impl<R: BufRead> HexReader<R> {
    pub fn new(inner: R) -> Self {
        HexReader { inner, line: 0, buf: String::new(), done: false }
    }

    /// Number of lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: BufRead> Iterator for HexReader<R> {
    type Item = Result<HexRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.buf.clear();
            match self.inner.read_line(&mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
            self.line += 1;
            if self.buf.trim().is_empty() {
                continue;
            }
            let parsed = HexRecord::parse(&self.buf).map_err(|reason| McuError::InvalidRecord {
                line: self.line,
                reason,
            });
            if parsed.is_err() {
                self.done = true;
            }
            return Some(parsed);
        }
    }
}

/// A fully parsed Intel HEX image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexImage {
    records: Vec<HexRecord>,
}

impl HexImage {
    /// Parse a whole image held in memory.
    pub fn parse(hex: &str) -> Result<Self> {
        Self::from_reader(hex.as_bytes())
    }

    /// Read every record from a stream.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let records = HexReader::new(reader).collect::<Result<Vec<_>>>()?;
        Ok(HexImage { records })
    }

    /// Encode a contiguous byte image starting at address 0 as data records
    /// of at most `record_len` bytes, followed by an end-of-file record.
    pub fn from_bytes(bytes: &[u8], record_len: usize) -> Self {
        let record_len = record_len.clamp(1, MAX_DATA_LEN);
        let mut records: Vec<HexRecord> = bytes
            .chunks(record_len)
            .enumerate()
            .map(|(i, chunk)| {
                HexRecord::with_checksum((i * record_len) as u16, RecordType::Data, chunk.to_vec())
            })
            .collect();
        records.push(HexRecord::eof());
        HexImage { records }
    }

    pub fn records(&self) -> &[HexRecord] {
        &self.records
    }

    /// Records as the fallible sequence the loader passes consume.
    pub fn iter(&self) -> impl Iterator<Item = Result<HexRecord>> + '_ {
        self.records.iter().cloned().map(Ok)
    }

    /// Total number of payload bytes in data records.
    pub fn data_len(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.kind == RecordType::Data)
            .map(|r| r.data.len())
            .sum()
    }
}

impl fmt::Display for HexImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rec in &self.records {
            writeln!(f, "{}", rec)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = ":100000000C9434000C944E000C944E000C944E0052";

    #[test]
    fn test_parse_data_record() {
        let rec = HexRecord::parse(LINE).unwrap();
        assert_eq!(rec.address, 0);
        assert_eq!(rec.kind, RecordType::Data);
        assert_eq!(rec.data.len(), 16);
        assert_eq!(&rec.data[..4], &[0x0C, 0x94, 0x34, 0x00]);
        assert_eq!(rec.checksum, 0x52);
        assert_eq!(rec.compute_checksum(), 0x52);
    }

    #[test]
    fn test_display_matches_source_line() {
        let rec = HexRecord::parse(LINE).unwrap();
        assert_eq!(rec.to_string(), LINE);
        assert_eq!(HexRecord::eof().to_string(), ":00000001FF");
    }

    #[test]
    fn test_checksum_error() {
        let err = HexRecord::parse(":100000000C9434000C944E000C944E000C944E00FF").unwrap_err();
        assert!(err.contains("checksum"));
    }

    #[test]
    fn test_malformed_lines() {
        assert!(HexRecord::parse("100000000C94").is_err());
        assert!(HexRecord::parse(":0000").is_err());
        assert!(HexRecord::parse(":00000001F").is_err());
        assert!(HexRecord::parse(":00000001FG").is_err());
        // byte count says 2, one data byte present
        assert!(HexRecord::parse(":0200000011ED").is_err());
    }

    #[test]
    fn test_new_rejects_oversized_payload() {
        let rec = HexRecord::new(0x0100, RecordType::Data, &[0xAB; MAX_DATA_LEN]).unwrap();
        assert_eq!(rec.data.len(), MAX_DATA_LEN);
        assert_eq!(HexRecord::parse(&rec.to_string()).unwrap(), rec);

        let err = HexRecord::new(0x0100, RecordType::Data, &[0xAB; MAX_DATA_LEN + 1]).unwrap_err();
        assert!(matches!(err, McuError::RecordTooLong { address: 0x0100, len: 256 }));
    }

    #[test]
    fn test_other_record_types_parse() {
        let rec = HexRecord::parse(":020000021000EC").unwrap();
        assert_eq!(rec.kind, RecordType::Other(0x02));
        assert_eq!(rec.data, vec![0x10, 0x00]);
    }

    #[test]
    fn test_reader_skips_blank_lines_and_stops_on_error() {
        let text = format!("{}\n\n  \n:00000001FF\nnot hex\n{}\n", LINE, LINE);
        let mut reader = HexReader::new(text.as_bytes());
        assert_eq!(reader.next().unwrap().unwrap().kind, RecordType::Data);
        assert_eq!(reader.next().unwrap().unwrap().kind, RecordType::EndOfFile);
        match reader.next() {
            Some(Err(McuError::InvalidRecord { line, .. })) => assert_eq!(line, 5),
            other => panic!("expected invalid record, got {:?}", other),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_image_from_bytes() {
        let bytes: Vec<u8> = (0..40u8).collect();
        let image = HexImage::from_bytes(&bytes, 16);
        let recs = image.records();
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[1].address, 16);
        assert_eq!(recs[2].data.len(), 8);
        assert_eq!(recs[3].kind, RecordType::EndOfFile);
        assert_eq!(image.data_len(), 40);

        let reparsed = HexImage::parse(&image.to_string()).unwrap();
        assert_eq!(reparsed, image);
    }
}
