// SPDX-License-Identifier: MIT

//! Identifier encoding, validation, and ordering for the namespaces.
//!
//! ISO 9660 identifiers are d-characters with an optional `;N`
//! version suffix and are compared with 0x20 padding; Joliet
//! identifiers are UCS-2BE compared by 16-bit units with 0x0000
//! padding; UDF identifiers are CS0 and compared by their stored
//! bytes.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use core::cmp::Ordering;

use crate::core::codec::*;
use crate::core::error::*;
use crate::fs::iso::constant::*;

// === ISO 9660 identifiers ===

/// Splits an encoded identifier into (base, extension, version).
/// Non-digit bytes after the separator are ignored rather than
/// trusted; parsed images contain surprises.
fn split_iso_ident(ident: &[u8]) -> (&[u8], &[u8], u32) {
    let (stem, version) = match ident.iter().position(|&c| c == b';') {
        Some(i) => {
            let v = ident[i + 1..]
                .iter()
                .filter(|c| c.is_ascii_digit())
                .fold(0u32, |acc, &c| {
                    acc.saturating_mul(10).saturating_add((c - b'0') as u32)
                });
            (&ident[..i], v)
        }
        None => (ident, 0),
    };
    match stem.iter().position(|&c| c == b'.') {
        Some(i) => (&stem[..i], &stem[i + 1..], version),
        None => (stem, &[], version),
    }
}

fn cmp_padded(a: &[u8], b: &[u8], pad: u8) -> Ordering {
    let n = a.len().max(b.len());
    for i in 0..n {
        let ca = a.get(i).copied().unwrap_or(pad);
        let cb = b.get(i).copied().unwrap_or(pad);
        match ca.cmp(&cb) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

fn iso_ident_rank(ident: &[u8]) -> u8 {
    match ident {
        [] | [ISO_IDENT_SELF] => 0,
        [ISO_IDENT_PARENT] => 1,
        _ => 2,
    }
}

/// Record order of two encoded ISO 9660 identifiers: "." first, ".."
/// second, then base and extension padded with 0x20, then descending
/// version.
pub fn iso_ident_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let rank = iso_ident_rank(a).cmp(&iso_ident_rank(b));
    if rank != Ordering::Equal || iso_ident_rank(a) < 2 {
        return rank;
    }

    let (abase, aext, aver) = split_iso_ident(a);
    let (bbase, bext, bver) = split_iso_ident(b);
    cmp_padded(abase, bbase, 0x20)
        .then_with(|| cmp_padded(aext, bext, 0x20))
        .then_with(|| bver.cmp(&aver))
}

/// Equality for path resolution: same base, extension, and version.
pub fn iso_ident_eq(a: &[u8], b: &[u8]) -> bool {
    let (abase, aext, aver) = split_iso_ident(a);
    let (bbase, bext, bver) = split_iso_ident(b);
    abase == bbase && aext == bext && aver == bver
}

/// Encodes and validates a caller-supplied ISO 9660 name.
///
/// Files get an implicit `;1` version when none is given; directories
/// take no extension and no version. The interchange level bounds the
/// identifier lengths; level 4 relaxes both length and alphabet.
pub fn encode_iso_name(name: &str, level: u8, is_dir: bool) -> IsoResult<Vec<u8>> {
    if name.is_empty() {
        return Err(IsoError::Invalid("empty iso9660 name"));
    }
    let bytes = name.as_bytes();

    if is_dir {
        if bytes.iter().any(|&c| c == b'.' || c == b';') {
            return Err(IsoError::Invalid("iso9660 directory name with . or ;"));
        }
        let max = match level {
            1 => 8,
            4 => 207,
            _ => 31,
        };
        if bytes.len() > max {
            return Err(IsoError::Invalid("iso9660 directory name too long"));
        }
        if level < 4 && !is_d_str(bytes) {
            return Err(IsoError::Invalid("illegal character in iso9660 name"));
        }
        return Ok(bytes.to_vec());
    }

    let mut out = bytes.to_vec();
    if !bytes.contains(&b';') {
        out.extend_from_slice(b";1");
    }

    let (base, ext, version) = split_iso_ident(&out);
    if version == 0 || version > 32767 {
        return Err(IsoError::Invalid("iso9660 version out of range"));
    }
    if level < 4 {
        if !is_d_str(base) || !is_d_str(ext) {
            return Err(IsoError::Invalid("illegal character in iso9660 name"));
        }
        let dots = out.iter().filter(|&&c| c == b'.').count();
        if dots != 1 {
            return Err(IsoError::Invalid("iso9660 file name needs exactly one ."));
        }
    }
    let (max_base, max_ext) = match level {
        1 => (8, 3),
        4 => (193, 193),
        _ => (30, 30),
    };
    if base.len() > max_base || ext.len() > max_ext {
        return Err(IsoError::Invalid("iso9660 name component too long"));
    }
    if level != 4 && base.len() + ext.len() > 30 {
        return Err(IsoError::Invalid("iso9660 name too long"));
    }
    if out.len() > 207 {
        return Err(IsoError::Invalid("iso9660 name too long"));
    }

    Ok(out)
}

/// Derives a legal ISO 9660 identifier from a free-form name; the
/// namespace facades use this when the caller never supplies one.
pub fn mangle_iso_name(name: &str, level: u8, is_dir: bool) -> String {
    #[cfg(all(not(feature = "std"), feature = "alloc"))]
    use alloc::string::String;

    let map = |c: char| -> char {
        let c = c.to_ascii_uppercase();
        if c.is_ascii_uppercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        }
    };

    if is_dir {
        let mut out: String = name.chars().map(map).collect();
        let max = match level {
            1 => 8,
            4 => 207,
            _ => 31,
        };
        out.truncate(max);
        return out;
    }

    let (base, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i + 1..]),
        _ => (name, ""),
    };
    let mut base: String = base.chars().map(map).collect();
    let mut ext: String = ext.chars().map(map).collect();
    let (max_base, max_ext) = match level {
        1 => (8, 3),
        4 => (193, 13),
        _ => (27, 3),
    };
    base.truncate(max_base);
    ext.truncate(max_ext);

    let mut out = base;
    out.push('.');
    out.push_str(&ext);
    out.push_str(";1");
    out
}

// === Joliet identifiers ===

/// UCS-2BE unit comparison with 0x0000 padding; "." and ".." bytes
/// order first as in the primary hierarchy.
pub fn joliet_ident_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let rank = iso_ident_rank(a).cmp(&iso_ident_rank(b));
    if rank != Ordering::Equal || iso_ident_rank(a) < 2 {
        return rank;
    }

    let unit = |s: &[u8], i: usize| -> u16 {
        if 2 * i + 1 < s.len() {
            u16::from_be_bytes([s[2 * i], s[2 * i + 1]])
        } else {
            0
        }
    };
    let n = a.len().div_ceil(2).max(b.len().div_ceil(2));
    for i in 0..n {
        match unit(a, i).cmp(&unit(b, i)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Encodes and validates a caller-supplied Joliet name.
pub fn encode_joliet_name(name: &str) -> IsoResult<Vec<u8>> {
    if name.is_empty() {
        return Err(IsoError::Invalid("empty joliet name"));
    }
    if name.contains(['/', ';', '\0', '*', '?']) {
        return Err(IsoError::Invalid("illegal character in joliet name"));
    }
    let encoded = encode_ucs2be(name)?;
    if encoded.len() / 2 > JOLIET_MAX_NAME_UNITS {
        return Err(IsoError::Invalid("joliet name longer than 64 units"));
    }
    Ok(encoded)
}

// === UDF identifiers ===

pub fn check_udf_name(name: &str) -> IsoResult<()> {
    if name.is_empty() {
        return Err(IsoError::Invalid("empty udf name"));
    }
    if name.contains(['/', '\0']) {
        return Err(IsoError::Invalid("illegal character in udf name"));
    }
    if name.chars().count() > 255 {
        return Err(IsoError::Invalid("udf name too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_version() {
        assert_eq!(encode_iso_name("FOO.", 1, false).unwrap(), b"FOO.;1");
        assert_eq!(encode_iso_name("FOO.;2", 1, false).unwrap(), b"FOO.;2");
        assert_eq!(encode_iso_name("BAR.TXT", 1, false).unwrap(), b"BAR.TXT;1");
    }

    #[test]
    fn test_level1_limits() {
        assert!(encode_iso_name("ABCDEFGH.IJK", 1, false).is_ok());
        assert!(encode_iso_name("ABCDEFGHI.TXT", 1, false).is_err());
        assert!(encode_iso_name("AB.CDEF", 1, false).is_err());
        assert!(encode_iso_name("lower.txt", 1, false).is_err());
        assert!(encode_iso_name("DIRNAME1", 1, true).is_ok());
        assert!(encode_iso_name("TOOLONGNAME", 1, true).is_err());
    }

    #[test]
    fn test_level4_relaxed() {
        assert!(encode_iso_name("lower case.txt", 4, false).is_ok());
        assert!(encode_iso_name("no_version", 4, false).is_ok());
    }

    #[test]
    fn test_iso_ordering() {
        // "." then ".." then names padded with spaces.
        let dot = [ISO_IDENT_SELF];
        let dotdot = [ISO_IDENT_PARENT];
        assert_eq!(iso_ident_cmp(&dot, &dotdot), Ordering::Less);
        assert_eq!(iso_ident_cmp(&dotdot, b"AAA.;1"), Ordering::Less);
        assert_eq!(iso_ident_cmp(b"BAR.;1", b"FOO.;1"), Ordering::Less);
        // Shorter base sorts as if padded with spaces.
        assert_eq!(iso_ident_cmp(b"AB.;1", b"ABC.;1"), Ordering::Less);
        // Higher version sorts first.
        assert_eq!(iso_ident_cmp(b"A.;2", b"A.;1"), Ordering::Less);
    }

    #[test]
    fn test_iso_eq_ignores_encoding_only() {
        assert!(iso_ident_eq(b"FOO.;1", b"FOO.;1"));
        assert!(!iso_ident_eq(b"FOO.;1", b"FOO.;2"));
    }

    #[test]
    fn test_joliet_ordering_by_units() {
        let a = encode_joliet_name("ab").unwrap();
        let b = encode_joliet_name("b").unwrap();
        assert_eq!(joliet_ident_cmp(&a, &b), Ordering::Less);

        let short = encode_joliet_name("a").unwrap();
        let long = encode_joliet_name("aa").unwrap();
        assert_eq!(joliet_ident_cmp(&short, &long), Ordering::Less);
    }

    #[test]
    fn test_mangle_produces_legal_names() {
        assert_eq!(mangle_iso_name("hello.txt", 1, false), "HELLO.TXT;1");
        assert_eq!(mangle_iso_name("no-ext", 1, false), "NO_EXT.;1");
        assert_eq!(
            mangle_iso_name("a-very-long-file-name.data", 1, false),
            "A_VERY_L.DAT;1"
        );
        assert_eq!(mangle_iso_name("sub dir", 1, true), "SUB_DIR");
        assert!(encode_iso_name(&mangle_iso_name("weird~name!.bin", 1, false), 1, false).is_ok());
    }

    #[test]
    fn test_joliet_name_limits() {
        let long: String = core::iter::repeat('x').take(65).collect();
        assert!(encode_joliet_name(&long).is_err());
        assert!(encode_joliet_name("name;1").is_err());
        assert!(encode_joliet_name("crab \u{1F980}").is_err());
    }
}
