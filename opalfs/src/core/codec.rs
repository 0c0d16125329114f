// SPDX-License-Identifier: MIT

//! Field codecs for the on-disk formats.
//!
//! Covers the both-endian integer forms, the two date formats (7-byte
//! directory record date, 17-byte volume descriptor date), the
//! d-character / a-character alphabets, and UCS-2BE transcoding for
//! the Unicode directory hierarchy.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{string::String, vec::Vec};

use time::OffsetDateTime;

use crate::core::error::*;

// === Both-endian integers ===

/// Encodes a 16-bit value as LSB bytes followed by MSB bytes.
#[inline]
pub fn encode_both16(v: u16) -> [u8; 4] {
    let le = v.to_le_bytes();
    let be = v.to_be_bytes();
    [le[0], le[1], be[0], be[1]]
}

/// Encodes a 32-bit value as LSB bytes followed by MSB bytes.
#[inline]
pub fn encode_both32(v: u32) -> [u8; 8] {
    let le = v.to_le_bytes();
    let be = v.to_be_bytes();
    [le[0], le[1], le[2], le[3], be[0], be[1], be[2], be[3]]
}

/// Decodes a both-endian 16-bit field, verifying that both halves agree.
pub fn decode_both16(b: &[u8], block: u64, offset: u32) -> IsoResult<u16> {
    let le = u16::from_le_bytes([b[0], b[1]]);
    let be = u16::from_be_bytes([b[2], b[3]]);
    if le != be {
        return Err(malformed("both-endian u16 mismatch", block, offset));
    }
    Ok(le)
}

/// Decodes a both-endian 32-bit field, verifying that both halves agree.
pub fn decode_both32(b: &[u8], block: u64, offset: u32) -> IsoResult<u32> {
    let le = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    let be = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
    if le != be {
        return Err(malformed("both-endian u32 mismatch", block, offset));
    }
    Ok(le)
}

// === Directory record date (7 bytes) ===

/// The 7-byte date recorded in directory records and Rock Ridge TF
/// entries: year since 1900, month, day, hour, minute, second, and the
/// GMT offset in 15-minute units.
///
/// The all-zero form means "unspecified" and round-trips unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordDate {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub gmt_offset: i8,
}

impl RecordDate {
    pub const UNSPECIFIED: RecordDate = RecordDate {
        year: 0,
        month: 0,
        day: 0,
        hour: 0,
        minute: 0,
        second: 0,
        gmt_offset: 0,
    };

    #[inline]
    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    pub fn from_datetime(dt: &OffsetDateTime) -> Self {
        let year = dt.year().clamp(1900, 1900 + 255) - 1900;
        Self {
            year: year as u8,
            month: dt.month() as u8,
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
            gmt_offset: (dt.offset().whole_minutes() / 15) as i8,
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(&crate::core::utils::time_utils::now_utc())
    }

    pub fn from_bytes(b: &[u8; 7]) -> Self {
        Self {
            year: b[0],
            month: b[1],
            day: b[2],
            hour: b[3],
            minute: b[4],
            second: b[5],
            gmt_offset: b[6] as i8,
        }
    }

    pub fn to_bytes(self) -> [u8; 7] {
        [
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.gmt_offset as u8,
        ]
    }
}

// === Volume descriptor date (17 bytes) ===

/// The 17-byte digit-encoded date used by volume descriptors:
/// "YYYYMMDDHHMMSSss" followed by the GMT offset byte.
///
/// Some mastering tools record the unspecified form with 0x00 bytes
/// instead of ASCII zeroes; `nul_form` preserves that on round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
    pub gmt_offset: i8,
    pub nul_form: bool,
}

impl VolumeDate {
    #[inline]
    pub fn is_unspecified(&self) -> bool {
        self.year == 0
            && self.month == 0
            && self.day == 0
            && self.hour == 0
            && self.minute == 0
            && self.second == 0
            && self.hundredths == 0
            && self.gmt_offset == 0
    }

    pub fn from_datetime(dt: &OffsetDateTime) -> Self {
        Self {
            year: dt.year().clamp(0, 9999) as u16,
            month: dt.month() as u8,
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
            hundredths: 0,
            gmt_offset: (dt.offset().whole_minutes() / 15) as i8,
            nul_form: false,
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(&crate::core::utils::time_utils::now_utc())
    }

    pub fn from_bytes(b: &[u8; 17], block: u64, offset: u32) -> IsoResult<Self> {
        if b[..16].iter().all(|&c| c == 0) {
            return Ok(Self {
                gmt_offset: b[16] as i8,
                nul_form: true,
                ..Self::default()
            });
        }

        let digits = |range: core::ops::Range<usize>| -> IsoResult<u16> {
            let mut v: u16 = 0;
            for &c in &b[range] {
                if !c.is_ascii_digit() {
                    return Err(malformed("non-digit in volume date", block, offset));
                }
                v = v * 10 + (c - b'0') as u16;
            }
            Ok(v)
        };

        Ok(Self {
            year: digits(0..4)?,
            month: digits(4..6)? as u8,
            day: digits(6..8)? as u8,
            hour: digits(8..10)? as u8,
            minute: digits(10..12)? as u8,
            second: digits(12..14)? as u8,
            hundredths: digits(14..16)? as u8,
            gmt_offset: b[16] as i8,
            nul_form: false,
        })
    }

    pub fn to_bytes(self) -> [u8; 17] {
        let mut out = [0u8; 17];
        if self.nul_form && self.is_unspecified() {
            return out;
        }

        let mut put = |pos: usize, width: usize, v: u16| {
            let mut v = v;
            for i in (0..width).rev() {
                out[pos + i] = b'0' + (v % 10) as u8;
                v /= 10;
            }
        };

        put(0, 4, self.year);
        put(4, 2, self.month as u16);
        put(6, 2, self.day as u16);
        put(8, 2, self.hour as u16);
        put(10, 2, self.minute as u16);
        put(12, 2, self.second as u16);
        put(14, 2, self.hundredths as u16);
        out[16] = self.gmt_offset as u8;
        out
    }
}

// === Character alphabets ===

/// d-characters: the strict identifier alphabet {A-Z, 0-9, _}.
#[inline]
pub fn is_d_char(c: u8) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == b'_'
}

/// a-characters: d-characters plus space and the defined symbol set.
#[inline]
pub fn is_a_char(c: u8) -> bool {
    is_d_char(c)
        || matches!(
            c,
            b' ' | b'!'
                | b'"'
                | b'%'
                | b'&'
                | b'\''
                | b'('
                | b')'
                | b'*'
                | b'+'
                | b','
                | b'-'
                | b'.'
                | b'/'
                | b':'
                | b';'
                | b'<'
                | b'='
                | b'>'
                | b'?'
        )
}

pub fn is_d_str(s: &[u8]) -> bool {
    s.iter().all(|&c| is_d_char(c))
}

pub fn is_a_str(s: &[u8]) -> bool {
    s.iter().all(|&c| is_a_char(c))
}

// === UCS-2BE transcoding ===

/// Encodes a native string as UCS-2 big-endian.
///
/// Only the Basic Multilingual Plane is representable; any code point
/// at or above U+10000 is rejected as invalid input.
pub fn encode_ucs2be(s: &str) -> IsoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for c in s.chars() {
        let v = c as u32;
        if v > 0xFFFF {
            return Err(IsoError::Invalid(
                "code point outside the basic multilingual plane",
            ));
        }
        out.extend_from_slice(&(v as u16).to_be_bytes());
    }
    Ok(out)
}

/// Decodes UCS-2 big-endian bytes into a native string.
///
/// Returns `None` on odd length or on a lone surrogate code unit.
pub fn decode_ucs2be(b: &[u8]) -> Option<String> {
    if b.len() % 2 != 0 {
        return None;
    }
    let mut out = String::with_capacity(b.len() / 2);
    for pair in b.chunks_exact(2) {
        let unit = u16::from_be_bytes([pair[0], pair[1]]);
        out.push(char::from_u32(unit as u32)?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_endian_roundtrip() {
        let b = encode_both32(0x12345678);
        assert_eq!(b, [0x78, 0x56, 0x34, 0x12, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(decode_both32(&b, 0, 0).unwrap(), 0x12345678);

        let b = encode_both16(0xBEEF);
        assert_eq!(decode_both16(&b, 0, 0).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_both_endian_mismatch_is_malformed() {
        let mut b = encode_both32(42);
        b[4] = 0xFF;
        let err = decode_both32(&b, 16, 80).unwrap_err();
        assert_eq!(err.kind(), IsoErrorKind::MalformedIso);
    }

    #[test]
    fn test_record_date_roundtrip() {
        let d = RecordDate {
            year: 126,
            month: 8,
            day: 2,
            hour: 11,
            minute: 30,
            second: 7,
            gmt_offset: -8,
        };
        assert_eq!(RecordDate::from_bytes(&d.to_bytes()), d);
    }

    #[test]
    fn test_record_date_unspecified_roundtrip() {
        let d = RecordDate::from_bytes(&[0u8; 7]);
        assert!(d.is_unspecified());
        assert_eq!(d.to_bytes(), [0u8; 7]);
    }

    #[test]
    fn test_volume_date_roundtrip() {
        let d = VolumeDate {
            year: 2026,
            month: 8,
            day: 2,
            hour: 9,
            minute: 15,
            second: 33,
            hundredths: 12,
            gmt_offset: 4,
            nul_form: false,
        };
        let b = d.to_bytes();
        assert_eq!(&b[..16], b"2026080209153312");
        assert_eq!(VolumeDate::from_bytes(&b, 0, 0).unwrap(), d);
    }

    #[test]
    fn test_volume_date_preserves_nul_form() {
        let b = [0u8; 17];
        let d = VolumeDate::from_bytes(&b, 0, 0).unwrap();
        assert!(d.is_unspecified());
        assert_eq!(d.to_bytes(), b);

        let digits: [u8; 17] = *b"0000000000000000\0";
        let d = VolumeDate::from_bytes(&digits, 0, 0).unwrap();
        assert!(d.is_unspecified());
        assert_eq!(d.to_bytes(), digits);
    }

    #[test]
    fn test_char_alphabets() {
        assert!(is_d_str(b"FOO_BAR1"));
        assert!(!is_d_str(b"foo"));
        assert!(!is_d_str(b"A B"));
        assert!(is_a_str(b"LINUX (X86_64) DISC 1/2"));
        assert!(!is_a_str(b"lower"));
    }

    #[test]
    fn test_ucs2_roundtrip() {
        let enc = encode_ucs2be("f\u{00F6}o").unwrap();
        assert_eq!(enc, [0x00, b'f', 0x00, 0xF6, 0x00, b'o']);
        assert_eq!(decode_ucs2be(&enc).unwrap(), "f\u{00F6}o");
    }

    #[test]
    fn test_ucs2_rejects_non_bmp() {
        let err = encode_ucs2be("crab \u{1F980}").unwrap_err();
        assert_eq!(err.kind(), IsoErrorKind::InvalidInput);
    }

    #[test]
    fn test_ucs2_decode_rejects_odd_and_surrogate() {
        assert!(decode_ucs2be(&[0x00]).is_none());
        assert!(decode_ucs2be(&[0xD8, 0x00]).is_none());
    }
}
