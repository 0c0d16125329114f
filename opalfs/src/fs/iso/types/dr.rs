// SPDX-License-Identifier: MIT

//! Directory records.
//!
//! A record is a variable-length structure of at most 255 bytes whose
//! trailing bytes (after the identifier and its pad) form the system
//! use area carrying SUSP entries. Records never span a block
//! boundary: the encoder pads to the next block and re-emits at the
//! block head, the decoder refuses a record that would cross one.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::core::codec::*;
use crate::core::error::*;
use crate::fs::iso::constant::*;

bitflags! {
    /// File flags byte of a directory record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u8 {
        const HIDDEN       = 0x01;
        const DIRECTORY    = 0x02;
        const ASSOCIATED   = 0x04;
        const RECORD       = 0x08;
        const PROTECTION   = 0x10;
        const MULTI_EXTENT = 0x80;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    pub xattr_len: u8,
    pub extent: u32,
    pub data_len: u32,
    pub date: RecordDate,
    pub flags: FileFlags,
    pub file_unit_size: u8,
    pub interleave_gap: u8,
    pub vol_seq: u16,
    /// Encoded identifier bytes. 0x00 is "." and 0x01 is "..".
    pub ident: Vec<u8>,
    /// Raw system use area (SUSP anchor), excluding the even-length pad.
    pub system_use: Vec<u8>,
}

impl DirRecord {
    pub fn new(ident: Vec<u8>, flags: FileFlags, date: RecordDate) -> Self {
        Self {
            xattr_len: 0,
            extent: 0,
            data_len: 0,
            date,
            flags,
            file_unit_size: 0,
            interleave_gap: 0,
            vol_seq: 1,
            ident,
            system_use: Vec::new(),
        }
    }

    pub fn dot(flags: FileFlags, date: RecordDate) -> Self {
        let mut r = Self::new([ISO_IDENT_SELF].into(), flags, date);
        r.flags |= FileFlags::DIRECTORY;
        r
    }

    pub fn dotdot(flags: FileFlags, date: RecordDate) -> Self {
        let mut r = Self::new([ISO_IDENT_PARENT].into(), flags, date);
        r.flags |= FileFlags::DIRECTORY;
        r
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    /// "." self-reference. A zero-length identifier is a documented
    /// cdrkit deviation and is treated the same way.
    #[inline]
    pub fn is_dot(&self) -> bool {
        self.ident.is_empty() || self.ident == [ISO_IDENT_SELF]
    }

    #[inline]
    pub fn is_dotdot(&self) -> bool {
        self.ident == [ISO_IDENT_PARENT]
    }

    /// Identifier pad byte: present when the identifier length is even.
    #[inline]
    fn ident_pad(&self) -> usize {
        usize::from(self.ident.len() % 2 == 0)
    }

    /// Encoded length in bytes, including the trailing even-length pad.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        let n = ISO_DR_BASE_LEN + self.ident.len() + self.ident_pad() + self.system_use.len();
        n + n % 2
    }

    /// Parses one record starting at `pos` inside `block`.
    ///
    /// `block_num` is used for error reporting only. A length byte of
    /// zero signals block padding and is the caller's concern.
    pub fn parse(block: &[u8], pos: usize, block_num: u64) -> IsoResult<Self> {
        let off = pos as u32;
        let b = &block[pos..];
        if b.is_empty() {
            return Err(malformed("directory record out of block", block_num, off));
        }

        let len = b[0] as usize;
        if len < ISO_DR_BASE_LEN + 1 {
            return Err(malformed("directory record too short", block_num, off));
        }
        if len > b.len() {
            return Err(malformed(
                "directory record exceeds remaining block bytes",
                block_num,
                off,
            ));
        }
        let b = &b[..len];

        let id_len = b[32] as usize;
        if ISO_DR_BASE_LEN + id_len > len {
            return Err(malformed("identifier exceeds record", block_num, off));
        }

        let ident = b[33..33 + id_len].to_vec();
        let sys_start = (ISO_DR_BASE_LEN + id_len + usize::from(id_len % 2 == 0)).min(len);

        Ok(Self {
            xattr_len: b[1],
            extent: decode_both32(&b[2..10], block_num, off + 2)?,
            data_len: decode_both32(&b[10..18], block_num, off + 10)?,
            date: RecordDate::from_bytes(b[18..25].try_into().unwrap()),
            flags: FileFlags::from_bits_retain(b[25]),
            file_unit_size: b[26],
            interleave_gap: b[27],
            vol_seq: decode_both16(&b[28..32], block_num, off + 28)?,
            ident,
            system_use: b[sys_start..].to_vec(),
        })
    }

    /// Appends the encoded record to `out`.
    ///
    /// The caller is responsible for block-boundary placement; the
    /// encoded form is always `self.len()` bytes and at most 255.
    pub fn emit(&self, out: &mut Vec<u8>) -> IsoResult<()> {
        let len = self.len();
        if len > ISO_DR_MAX_LEN {
            return Err(IsoError::Internal("directory record longer than 255 bytes"));
        }

        let start = out.len();
        out.push(len as u8);
        out.push(self.xattr_len);
        out.extend_from_slice(&encode_both32(self.extent));
        out.extend_from_slice(&encode_both32(self.data_len));
        out.extend_from_slice(&self.date.to_bytes());
        out.push(self.flags.bits());
        out.push(self.file_unit_size);
        out.push(self.interleave_gap);
        out.extend_from_slice(&encode_both16(self.vol_seq));
        out.push(self.ident.len() as u8);
        out.extend_from_slice(&self.ident);
        if self.ident_pad() == 1 {
            out.push(0);
        }
        out.extend_from_slice(&self.system_use);
        if (out.len() - start) % 2 != 0 {
            out.push(0);
        }

        debug_assert_eq!(out.len() - start, len);
        Ok(())
    }
}

/// Iterates the records of a directory's data area.
///
/// Handles the block-padding convention: a zero length byte means the
/// rest of the block is padding and scanning resumes at the next
/// block head.
pub struct DirStream<'a> {
    data: &'a [u8],
    pos: usize,
    base_block: u64,
}

impl<'a> DirStream<'a> {
    pub fn new(data: &'a [u8], base_block: u64) -> Self {
        Self {
            data,
            pos: 0,
            base_block,
        }
    }

    /// (block, offset) location of the record at `pos`.
    #[inline]
    fn location(&self) -> (u64, u32) {
        (
            self.base_block + (self.pos / ISO_BLOCK_SIZE) as u64,
            (self.pos % ISO_BLOCK_SIZE) as u32,
        )
    }
}

impl<'a> Iterator for DirStream<'a> {
    type Item = IsoResult<(DirRecord, u64, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pos >= self.data.len() {
                return None;
            }
            if self.data[self.pos] == 0 {
                // Padding until the next block boundary.
                self.pos = (self.pos / ISO_BLOCK_SIZE + 1) * ISO_BLOCK_SIZE;
                continue;
            }

            let (block, offset) = self.location();
            let block_end = (self.pos / ISO_BLOCK_SIZE + 1) * ISO_BLOCK_SIZE;
            let slice = &self.data[..block_end.min(self.data.len())];

            return match DirRecord::parse(slice, self.pos, block) {
                Ok(r) => {
                    self.pos += r.len();
                    Some(Ok((r, block, offset)))
                }
                Err(e) => {
                    self.pos = self.data.len();
                    Some(Err(e))
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> DirRecord {
        let mut r = DirRecord::new(b"FOO.;1".to_vec(), FileFlags::empty(), RecordDate::default());
        r.extent = 24;
        r.data_len = 4;
        r.vol_seq = 1;
        r
    }

    #[test]
    fn test_emit_parse_roundtrip() {
        let r = sample_record();
        let mut buf = Vec::new();
        r.emit(&mut buf).unwrap();
        assert_eq!(buf.len(), r.len());
        assert_eq!(buf.len() % 2, 0);

        let back = DirRecord::parse(&buf, 0, 0).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_even_ident_gets_pad_byte() {
        let r = DirRecord::new(b"AB".to_vec(), FileFlags::empty(), RecordDate::default());
        // 33 + 2 + 1 pad = 36
        assert_eq!(r.len(), 36);
        let mut buf = Vec::new();
        r.emit(&mut buf).unwrap();
        assert_eq!(buf[32], 2);
        assert_eq!(buf[35], 0);
    }

    #[test]
    fn test_parse_refuses_record_crossing_block() {
        let r = sample_record();
        let mut buf = Vec::new();
        r.emit(&mut buf).unwrap();
        // Truncate: self-declared length now exceeds the remaining bytes.
        buf.truncate(buf.len() - 4);
        let err = DirRecord::parse(&buf, 0, 7).unwrap_err();
        assert_eq!(err.kind(), IsoErrorKind::MalformedIso);
    }

    #[test]
    fn test_both_endian_mismatch_detected() {
        let r = sample_record();
        let mut buf = Vec::new();
        r.emit(&mut buf).unwrap();
        buf[6] = 0xFF; // corrupt the MSB half of the extent field
        let err = DirRecord::parse(&buf, 0, 0).unwrap_err();
        assert_eq!(err.kind(), IsoErrorKind::MalformedIso);
    }

    #[test]
    fn test_dir_stream_skips_block_padding() {
        let mut data = vec![0u8; 2 * ISO_BLOCK_SIZE];

        let dot = DirRecord::dot(FileFlags::DIRECTORY, RecordDate::default());
        let mut buf = Vec::new();
        dot.emit(&mut buf).unwrap();
        data[..buf.len()].copy_from_slice(&buf);

        let mut r2 = sample_record();
        r2.ident = b"SECOND.;1".to_vec();
        let mut buf2 = Vec::new();
        r2.emit(&mut buf2).unwrap();
        data[ISO_BLOCK_SIZE..ISO_BLOCK_SIZE + buf2.len()].copy_from_slice(&buf2);

        let records: Vec<_> = DirStream::new(&data, 40)
            .collect::<IsoResult<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].0.is_dot());
        assert_eq!(records[0].1, 40);
        assert_eq!(records[1].0.ident, b"SECOND.;1");
        assert_eq!(records[1].1, 41);
        assert_eq!(records[1].2, 0);
    }
}
