//! Byte-level encoding helpers shared by the index reader and the fixture writer.
//!
//! Integers are big-endian unless written as unsigned LEB128 varints. Every
//! index section is framed by its length and followed by a CRC32 (Castagnoli)
//! of its contents:
//!
//! ```text
//! len <4b or uvarint> | contents <len bytes> | crc32c(contents) <4b>
//! ```

use crate::error::IndexError;

/// Maximum number of bytes a 64-bit varint can occupy.
const MAX_VARINT_LEN: usize = 10;

/// Read cursor over a byte slice.
///
/// Offsets in errors are absolute file offsets so corrupted blocks can be
/// inspected with a hex dump.
#[derive(Debug, Clone)]
pub(crate) struct Decbuf<'a> {
    b: &'a [u8],
    pos: usize,
    /// Absolute offset of `b[0]` in the file.
    base: usize,
    section: &'static str,
}

impl<'a> Decbuf<'a> {
    /// Creates a cursor over `b`, which starts at absolute offset `base`.
    pub(crate) fn new(b: &'a [u8], base: usize, section: &'static str) -> Self {
        Self {
            b,
            pos: 0,
            base,
            section,
        }
    }

    /// Number of unread bytes.
    pub(crate) fn remaining(&self) -> usize {
        self.b.len() - self.pos
    }

    /// Returns the unread bytes without consuming them.
    pub(crate) fn rest(&self) -> &'a [u8] {
        &self.b[self.pos..]
    }

    fn truncated(&self) -> IndexError {
        IndexError::Truncated {
            section: self.section,
            offset: self.base + self.pos,
        }
    }

    /// Consumes `n` raw bytes.
    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8], IndexError> {
        if self.remaining() < n {
            return Err(self.truncated());
        }
        let out = &self.b[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Consumes a single byte.
    pub(crate) fn byte(&mut self) -> Result<u8, IndexError> {
        Ok(self.bytes(1)?[0])
    }

    /// Consumes a big-endian `u32`.
    pub(crate) fn be32(&mut self) -> Result<u32, IndexError> {
        let raw = self.bytes(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Consumes a big-endian `u64`.
    pub(crate) fn be64(&mut self) -> Result<u64, IndexError> {
        let raw = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_be_bytes(buf))
    }

    /// Consumes an unsigned LEB128 varint.
    pub(crate) fn uvarint(&mut self) -> Result<u64, IndexError> {
        let (value, len) = read_uvarint(self.rest()).ok_or_else(|| {
            if self.remaining() < MAX_VARINT_LEN && self.rest().iter().all(|b| b & 0x80 != 0) {
                self.truncated()
            } else {
                IndexError::InvalidVarint {
                    section: self.section,
                }
            }
        })?;
        self.pos += len;
        Ok(value)
    }

    /// Consumes a varint that must fit in 32 bits.
    pub(crate) fn uvarint32(&mut self) -> Result<u32, IndexError> {
        let value = self.uvarint()?;
        u32::try_from(value).map_err(|_| IndexError::InvalidVarint {
            section: self.section,
        })
    }

    /// Consumes a varint-length-prefixed UTF-8 string.
    pub(crate) fn uvarint_str(&mut self) -> Result<&'a str, IndexError> {
        let len = usize::try_from(self.uvarint()?).map_err(|_| self.truncated())?;
        let raw = self.bytes(len)?;
        std::str::from_utf8(raw).map_err(|_| IndexError::InvalidUtf8 {
            section: self.section,
        })
    }
}

/// Decodes an unsigned LEB128 varint, returning the value and its length.
///
/// Returns `None` if the input ends mid-varint or the value overflows 64 bits.
pub(crate) fn read_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        if shift == 63 && byte > 1 {
            return None;
        }
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
    }
    None
}

/// Reads the 4-byte-length-framed section at `offset` and verifies its checksum.
///
/// Returns a cursor over the section contents (without length and CRC).
pub(crate) fn section_at<'a>(
    data: &'a [u8],
    offset: usize,
    section: &'static str,
) -> Result<Decbuf<'a>, IndexError> {
    let mut head = Decbuf::new(data.get(offset..).unwrap_or_default(), offset, section);
    let len = head.be32()? as usize;
    checked_contents(data, offset, offset + 4, len, section)
}

/// Reads the varint-length-framed section at `offset` and verifies its checksum.
pub(crate) fn uvarint_section_at<'a>(
    data: &'a [u8],
    offset: usize,
    section: &'static str,
) -> Result<Decbuf<'a>, IndexError> {
    let (len, prefix) = read_uvarint(data.get(offset..).unwrap_or_default()).ok_or(
        IndexError::Truncated { section, offset },
    )?;
    let len = usize::try_from(len).map_err(|_| IndexError::Truncated { section, offset })?;
    checked_contents(data, offset, offset + prefix, len, section)
}

fn checked_contents<'a>(
    data: &'a [u8],
    offset: usize,
    start: usize,
    len: usize,
    section: &'static str,
) -> Result<Decbuf<'a>, IndexError> {
    let end = start
        .checked_add(len)
        .filter(|end| end.saturating_add(4) <= data.len())
        .ok_or(IndexError::Truncated { section, offset })?;

    let contents = &data[start..end];
    let crc = &data[end..end + 4];
    let expected = u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]);
    let computed = crc32c::crc32c(contents);
    if expected != computed {
        return Err(IndexError::ChecksumMismatch {
            section,
            offset,
            expected,
            computed,
        });
    }

    Ok(Decbuf::new(contents, start, section))
}

/// Growable write buffer mirroring [`Decbuf`].
#[derive(Debug, Default)]
pub(crate) struct Encbuf {
    b: Vec<u8>,
}

impl Encbuf {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.b.len()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.b
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.b
    }

    pub(crate) fn put_byte(&mut self, v: u8) {
        self.b.push(v);
    }

    pub(crate) fn put_bytes(&mut self, v: &[u8]) {
        self.b.extend_from_slice(v);
    }

    pub(crate) fn put_be32(&mut self, v: u32) {
        self.b.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn put_be64(&mut self, v: u64) {
        self.b.extend_from_slice(&v.to_be_bytes());
    }

    #[allow(clippy::cast_possible_truncation)] // masked to 7 bits
    pub(crate) fn put_uvarint(&mut self, mut v: u64) {
        while v > 0x7F {
            self.b.push((v as u8 & 0x7F) | 0x80);
            v >>= 7;
        }
        self.b.push(v as u8);
    }

    pub(crate) fn put_uvarint_str(&mut self, s: &str) {
        self.put_uvarint(s.len() as u64);
        self.b.extend_from_slice(s.as_bytes());
    }

    /// Appends the CRC32 (Castagnoli) of `contents`.
    pub(crate) fn put_crc32(&mut self, contents: &[u8]) {
        self.put_be32(crc32c::crc32c(contents));
    }

    /// Pads with zero bytes until the length is a multiple of `align`.
    pub(crate) fn pad_to(&mut self, align: usize) {
        let rem = self.b.len() % align;
        if rem != 0 {
            self.b.resize(self.b.len() + align - rem, 0);
        }
    }

    /// Appends `contents` framed by a 4-byte length and a trailing checksum.
    #[allow(clippy::cast_possible_truncation)] // sections are far below 4 GiB in fixtures
    pub(crate) fn put_section(&mut self, contents: &[u8]) {
        self.put_be32(contents.len() as u32);
        self.put_bytes(contents);
        self.put_crc32(contents);
    }

    /// Appends `contents` framed by a varint length and a trailing checksum.
    pub(crate) fn put_uvarint_section(&mut self, contents: &[u8]) {
        self.put_uvarint(contents.len() as u64);
        self.put_bytes(contents);
        self.put_crc32(contents);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uvarint_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            let mut enc = Encbuf::new();
            enc.put_uvarint(value);
            let (decoded, len) = read_uvarint(enc.as_slice()).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(len, enc.len());
        }
    }

    #[test]
    fn test_uvarint_truncated_and_overflow() {
        assert!(read_uvarint(&[0x80, 0x80]).is_none());
        assert!(read_uvarint(&[0xFF; 10]).is_none());

        let mut dec = Decbuf::new(&[0x80], 10, "test");
        assert!(matches!(
            dec.uvarint(),
            Err(IndexError::Truncated { offset: 10, .. })
        ));
    }

    #[test]
    fn test_section_checksum_verified() {
        let mut enc = Encbuf::new();
        enc.put_byte(0xAA);
        enc.put_section(b"hello");
        let mut data = enc.into_inner();

        let mut dec = section_at(&data, 1, "test").unwrap();
        assert_eq!(dec.bytes(5).unwrap(), b"hello");
        assert_eq!(dec.remaining(), 0);

        // Flip one content byte.
        data[6] ^= 0xFF;
        assert!(matches!(
            section_at(&data, 1, "test"),
            Err(IndexError::ChecksumMismatch { offset: 1, .. })
        ));
    }

    #[test]
    fn test_section_length_past_end() {
        let mut enc = Encbuf::new();
        enc.put_be32(1000);
        enc.put_bytes(b"short");
        assert!(matches!(
            section_at(enc.as_slice(), 0, "test"),
            Err(IndexError::Truncated { .. })
        ));
        assert!(matches!(
            section_at(&[], 0, "test"),
            Err(IndexError::Truncated { .. })
        ));
    }

    #[test]
    fn test_uvarint_section() {
        let mut enc = Encbuf::new();
        enc.put_uvarint_section(&[1, 2, 3]);
        let mut dec = uvarint_section_at(enc.as_slice(), 0, "series").unwrap();
        assert_eq!(dec.byte().unwrap(), 1);
        assert_eq!(dec.remaining(), 2);
    }

    #[test]
    fn test_strings_and_fixed_width() {
        let mut enc = Encbuf::new();
        enc.put_uvarint_str("pod");
        enc.put_be64(42);
        enc.pad_to(16);
        assert_eq!(enc.len(), 16);

        let mut dec = Decbuf::new(enc.as_slice(), 0, "test");
        assert_eq!(dec.uvarint_str().unwrap(), "pod");
        assert_eq!(dec.be64().unwrap(), 42);

        let mut bad = Decbuf::new(&[2, 0xFF, 0xFE], 0, "symbols");
        assert!(matches!(bad.uvarint_str(), Err(IndexError::InvalidUtf8 { .. })));
    }
}
