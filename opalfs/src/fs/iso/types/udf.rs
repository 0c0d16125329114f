// SPDX-License-Identifier: MIT

//! UDF / ECMA-167 descriptors for the read-only bridge profile.
//!
//! Every descriptor is prefixed by a 16-byte tag carrying a header
//! checksum and a CRC over the descriptor body. Writes recompute
//! both; reads verify them and fail as malformed on mismatch.
//! Numbers are little-endian throughout.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};

use crate::core::codec::decode_ucs2be;
use crate::core::error::*;
use crate::fs::iso::constant::*;

// === CRC ===

/// CRC-CCITT (polynomial 0x1021, initial value 0) over descriptor
/// bodies. This is not the CRC-32 family used by partition tables.
pub fn crc_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

// === Descriptor tag ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTag {
    pub tag_id: u16,
    pub version: u16,
    pub serial: u16,
    pub crc_len: u16,
    pub location: u32,
}

impl DescriptorTag {
    /// Verifies the header checksum and descriptor CRC of a tagged
    /// buffer and returns the parsed tag.
    pub fn parse(buf: &[u8], block: u64) -> IsoResult<Self> {
        if buf.len() < 16 {
            return Err(malformed("short descriptor tag", block, 0));
        }

        let mut sum: u8 = 0;
        for (i, &b) in buf[..16].iter().enumerate() {
            if i != 4 {
                sum = sum.wrapping_add(b);
            }
        }
        if sum != buf[4] {
            return Err(malformed("descriptor tag checksum mismatch", block, 4));
        }

        let tag = Self {
            tag_id: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            version: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
            serial: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            crc_len: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            location: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        };

        let crc_end = 16 + tag.crc_len as usize;
        if crc_end > buf.len() {
            return Err(malformed("descriptor CRC length out of range", block, 10));
        }
        let crc = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        if crc != crc_ccitt(&buf[16..crc_end]) {
            return Err(malformed("descriptor CRC mismatch", block, 8));
        }

        Ok(tag)
    }

    /// Stamps the first 16 bytes of `buf` with a fresh tag, computing
    /// the CRC over everything after the tag and then the checksum.
    pub fn finalize(buf: &mut [u8], tag_id: u16, serial: u16, location: u32) {
        let crc_len = (buf.len() - 16) as u16;
        let crc = crc_ccitt(&buf[16..]);

        buf[0..2].copy_from_slice(&tag_id.to_le_bytes());
        buf[2..4].copy_from_slice(&3u16.to_le_bytes()); // descriptor version (NSR03-compatible readers accept 2 and 3)
        buf[4] = 0;
        buf[5] = 0;
        buf[6..8].copy_from_slice(&serial.to_le_bytes());
        buf[8..10].copy_from_slice(&crc.to_le_bytes());
        buf[10..12].copy_from_slice(&crc_len.to_le_bytes());
        buf[12..16].copy_from_slice(&location.to_le_bytes());

        let mut sum: u8 = 0;
        for (i, &b) in buf[..16].iter().enumerate() {
            if i != 4 {
                sum = sum.wrapping_add(b);
            }
        }
        buf[4] = sum;
    }
}

// === Small building blocks ===

/// Entity identifier (regid), 32 bytes.
pub fn regid(flags: u8, id: &[u8], suffix: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[0] = flags;
    out[1..1 + id.len().min(23)].copy_from_slice(&id[..id.len().min(23)]);
    out[24..24 + suffix.len().min(8)].copy_from_slice(&suffix[..suffix.len().min(8)]);
    out
}

/// OSTA charspec, 64 bytes.
pub fn osta_charspec() -> [u8; 64] {
    let mut out = [0u8; 64];
    out[1..24].copy_from_slice(b"OSTA Compressed Unicode");
    out
}

/// 12-byte UDF timestamp; type 1 (local time), zero offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UdfTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl UdfTimestamp {
    pub fn now() -> Self {
        let dt = crate::core::utils::time_utils::now_utc();
        Self {
            year: dt.year().clamp(0, 9999) as u16,
            month: dt.month() as u8,
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        }
    }

    pub fn emit(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..2].copy_from_slice(&0x1000u16.to_le_bytes());
        out[2..4].copy_from_slice(&self.year.to_le_bytes());
        out[4] = self.month;
        out[5] = self.day;
        out[6] = self.hour;
        out[7] = self.minute;
        out[8] = self.second;
        out
    }

    pub fn parse(b: &[u8]) -> Self {
        Self {
            year: u16::from_le_bytes(b[2..4].try_into().unwrap()),
            month: b[4],
            day: b[5],
            hour: b[6],
            minute: b[7],
            second: b[8],
        }
    }
}

/// Short allocation descriptor: (length, partition-relative block).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortAd {
    pub len: u32,
    pub pos: u32,
}

/// Long allocation descriptor: length plus lb_addr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LongAd {
    pub len: u32,
    pub block: u32,
    pub partition: u16,
}

impl LongAd {
    pub fn emit(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..8].copy_from_slice(&self.block.to_le_bytes());
        out[8..10].copy_from_slice(&self.partition.to_le_bytes());
        out
    }

    pub fn parse(b: &[u8]) -> Self {
        Self {
            len: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            block: u32::from_le_bytes(b[4..8].try_into().unwrap()),
            partition: u16::from_le_bytes(b[8..10].try_into().unwrap()),
        }
    }
}

// === CS0 (OSTA compressed unicode) ===

/// Encodes an identifier in CS0: compression byte 8 when every code
/// unit fits one byte, otherwise 16 with UCS-2BE units.
pub fn encode_cs0(s: &str) -> IsoResult<Vec<u8>> {
    if s.is_empty() {
        return Ok(vec![]);
    }
    let mut units = Vec::with_capacity(s.chars().count());
    for c in s.chars() {
        let v = c as u32;
        if v > 0xFFFF {
            return Err(IsoError::Invalid(
                "code point outside the basic multilingual plane",
            ));
        }
        units.push(v as u16);
    }

    let mut out = vec![];
    if units.iter().all(|&u| u <= 0xFF) {
        out.push(UDF_CS0_8BIT);
        out.extend(units.iter().map(|&u| u as u8));
    } else {
        out.push(UDF_CS0_16BIT);
        for u in units {
            out.extend_from_slice(&u.to_be_bytes());
        }
    }
    Ok(out)
}

/// Decodes a CS0 identifier.
pub fn decode_cs0(b: &[u8]) -> Option<String> {
    if b.is_empty() {
        return Some(String::new());
    }
    match b[0] {
        UDF_CS0_8BIT => Some(b[1..].iter().map(|&c| c as char).collect()),
        UDF_CS0_16BIT => decode_ucs2be(&b[1..]),
        _ => None,
    }
}

/// Fixed-width dstring: CS0 content with the used length in the last
/// byte.
pub fn encode_dstring<const N: usize>(s: &str) -> IsoResult<[u8; N]> {
    let mut out = [0u8; N];
    let cs0 = encode_cs0(s)?;
    if cs0.len() > N - 1 {
        return Err(IsoError::Invalid("identifier too long for dstring field"));
    }
    out[..cs0.len()].copy_from_slice(&cs0);
    out[N - 1] = cs0.len() as u8;
    Ok(out)
}

pub fn decode_dstring(b: &[u8]) -> Option<String> {
    let used = *b.last()? as usize;
    if used >= b.len() {
        return None;
    }
    decode_cs0(&b[..used])
}

// === Volume recognition sequence ===

/// Emits one volume structure descriptor block (BEA01/NSR02/TEA01).
pub fn emit_vrs_block(id: &[u8; 5]) -> [u8; ISO_BLOCK_SIZE] {
    let mut out = [0u8; ISO_BLOCK_SIZE];
    out[0] = 0;
    out[1..6].copy_from_slice(id);
    out[6] = 1;
    out
}

// === Anchor volume descriptor pointer ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Avdp {
    pub main_vds: ShortAd,
    pub reserve_vds: ShortAd,
}

impl Avdp {
    pub fn bridge_default() -> Self {
        Self {
            main_vds: ShortAd {
                len: (UDF_VDS_BLOCKS as usize * ISO_BLOCK_SIZE) as u32,
                pos: UDF_MAIN_VDS_BLOCK as u32,
            },
            reserve_vds: ShortAd {
                len: (UDF_VDS_BLOCKS as usize * ISO_BLOCK_SIZE) as u32,
                pos: UDF_RESERVE_VDS_BLOCK as u32,
            },
        }
    }

    pub fn emit(&self, location: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        buf[16..20].copy_from_slice(&self.main_vds.len.to_le_bytes());
        buf[20..24].copy_from_slice(&self.main_vds.pos.to_le_bytes());
        buf[24..28].copy_from_slice(&self.reserve_vds.len.to_le_bytes());
        buf[28..32].copy_from_slice(&self.reserve_vds.pos.to_le_bytes());
        DescriptorTag::finalize(&mut buf, UDF_TAG_AVDP, 0, location);
        buf
    }

    pub fn parse(buf: &[u8], block: u64) -> IsoResult<Self> {
        let tag = DescriptorTag::parse(buf, block)?;
        if tag.tag_id != UDF_TAG_AVDP {
            return Err(malformed("expected anchor volume descriptor", block, 0));
        }
        Ok(Self {
            main_vds: ShortAd {
                len: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
                pos: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            },
            reserve_vds: ShortAd {
                len: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
                pos: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            },
        })
    }
}

// === Volume descriptor sequence ===

/// The logical state carried by the main and reserve VDS, the
/// integrity sequence, and the file-set descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdfContext {
    pub vol_ident: String,
    pub volset_ident: String,
    pub partition_start: u32,
    pub partition_len: u32,
    pub unique_id: u64,
    pub num_files: u32,
    pub num_dirs: u32,
    /// Single recording time stamped into every descriptor, so a
    /// reopened image reproduces its bytes.
    pub recording_time: UdfTimestamp,
}

impl UdfContext {
    pub fn new(vol_ident: &str) -> Self {
        Self {
            vol_ident: vol_ident.to_string(),
            volset_ident: vol_ident.to_string(),
            partition_start: UDF_PARTITION_START as u32,
            partition_len: 0,
            unique_id: 261,
            num_files: 0,
            num_dirs: 1,
            recording_time: UdfTimestamp::now(),
        }
    }
}

fn impl_regid() -> [u8; 32] {
    regid(0, b"*opalfs", &[])
}

fn domain_regid() -> [u8; 32] {
    // Domain suffix carries the UDF revision (1.02 compatibility per
    // the bridge profile).
    regid(0, b"*OSTA UDF Compliant", &0x0102u16.to_le_bytes())
}

/// Emits the primary volume descriptor of the sequence.
pub fn emit_udf_pvd(ctx: &UdfContext, location: u32) -> IsoResult<Vec<u8>> {
    let mut buf = vec![0u8; 512];
    buf[16..20].copy_from_slice(&0u32.to_le_bytes()); // sequence number
    buf[20..24].copy_from_slice(&0u32.to_le_bytes()); // pvd number
    buf[24..56].copy_from_slice(&encode_dstring::<32>(&ctx.vol_ident)?);
    buf[56..58].copy_from_slice(&1u16.to_le_bytes()); // volume sequence number
    buf[58..60].copy_from_slice(&1u16.to_le_bytes()); // max sequence number
    buf[60..62].copy_from_slice(&2u16.to_le_bytes()); // interchange level
    buf[62..64].copy_from_slice(&2u16.to_le_bytes()); // max interchange level
    buf[64..68].copy_from_slice(&1u32.to_le_bytes()); // charset list
    buf[68..72].copy_from_slice(&1u32.to_le_bytes()); // max charset list
    buf[72..200].copy_from_slice(&encode_dstring::<128>(&ctx.volset_ident)?);
    buf[200..264].copy_from_slice(&osta_charspec());
    buf[264..328].copy_from_slice(&osta_charspec());
    buf[344..376].copy_from_slice(&regid(0, b"", &[]));
    buf[376..388].copy_from_slice(&ctx.recording_time.emit());
    buf[388..420].copy_from_slice(&impl_regid());
    // flags + reserved stay zero
    DescriptorTag::finalize(&mut buf, UDF_TAG_PVD, 0, location);
    Ok(buf)
}

/// Emits the implementation use volume descriptor.
pub fn emit_udf_iuvd(ctx: &UdfContext, location: u32) -> IsoResult<Vec<u8>> {
    let mut buf = vec![0u8; 512];
    buf[16..20].copy_from_slice(&1u32.to_le_bytes());
    buf[20..52].copy_from_slice(&regid(0, b"*UDF LV Info", &0x0102u16.to_le_bytes()));
    // implementation use: charspec + logical volume identifier + infos
    buf[52..116].copy_from_slice(&osta_charspec());
    buf[116..244].copy_from_slice(&encode_dstring::<128>(&ctx.vol_ident)?);
    buf[352..384].copy_from_slice(&impl_regid());
    DescriptorTag::finalize(&mut buf, UDF_TAG_IUVD, 0, location);
    Ok(buf)
}

/// Emits the partition descriptor.
pub fn emit_udf_pd(ctx: &UdfContext, location: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 512];
    buf[16..20].copy_from_slice(&2u32.to_le_bytes());
    buf[20..22].copy_from_slice(&1u16.to_le_bytes()); // flags: allocated
    buf[22..24].copy_from_slice(&0u16.to_le_bytes()); // partition number
    buf[24..56].copy_from_slice(&regid(2, b"+NSR02", &[]));
    buf[184..188].copy_from_slice(&1u32.to_le_bytes()); // access type: read only
    buf[188..192].copy_from_slice(&ctx.partition_start.to_le_bytes());
    buf[192..196].copy_from_slice(&ctx.partition_len.to_le_bytes());
    buf[196..228].copy_from_slice(&impl_regid());
    DescriptorTag::finalize(&mut buf, UDF_TAG_PD, 0, location);
    buf
}

/// Emits the logical volume descriptor (single type-1 partition map).
pub fn emit_udf_lvd(ctx: &UdfContext, location: u32) -> IsoResult<Vec<u8>> {
    let mut buf = vec![0u8; 512];
    buf[16..20].copy_from_slice(&3u32.to_le_bytes());
    buf[20..84].copy_from_slice(&osta_charspec());
    buf[84..212].copy_from_slice(&encode_dstring::<128>(&ctx.vol_ident)?);
    buf[212..216].copy_from_slice(&(ISO_BLOCK_SIZE as u32).to_le_bytes());
    buf[216..248].copy_from_slice(&domain_regid());
    // logical volume contents use: long_ad of the file-set descriptor
    let fsd = LongAd {
        len: ISO_BLOCK_SIZE as u32,
        block: 0,
        partition: 0,
    };
    buf[248..264].copy_from_slice(&fsd.emit());
    buf[264..268].copy_from_slice(&6u32.to_le_bytes()); // map table length
    buf[268..272].copy_from_slice(&1u32.to_le_bytes()); // one partition map
    buf[272..304].copy_from_slice(&impl_regid());
    // integrity sequence extent
    buf[432..436].copy_from_slice(&(2 * ISO_BLOCK_SIZE as u32).to_le_bytes());
    buf[436..440].copy_from_slice(&(UDF_LVID_BLOCK as u32).to_le_bytes());
    // type 1 partition map
    buf[440] = 1;
    buf[441] = 6;
    buf[442..444].copy_from_slice(&1u16.to_le_bytes()); // volume sequence number
    buf[444..446].copy_from_slice(&0u16.to_le_bytes()); // partition number
    DescriptorTag::finalize(&mut buf, UDF_TAG_LVD, 0, location);
    Ok(buf)
}

/// Emits the unallocated space descriptor (no free extents).
pub fn emit_udf_usd(location: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 24];
    buf[16..20].copy_from_slice(&4u32.to_le_bytes());
    DescriptorTag::finalize(&mut buf, UDF_TAG_USD, 0, location);
    buf
}

/// Emits a terminating descriptor.
pub fn emit_udf_td(location: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 512];
    DescriptorTag::finalize(&mut buf, UDF_TAG_TD, 0, location);
    buf
}

/// Emits the logical volume integrity descriptor (close state).
pub fn emit_udf_lvid(ctx: &UdfContext, location: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 134];
    buf[16..28].copy_from_slice(&ctx.recording_time.emit());
    buf[28..32].copy_from_slice(&1u32.to_le_bytes()); // integrity type: close
    // next integrity extent: none
    // logical volume contents use: next unique id
    buf[40..48].copy_from_slice(&ctx.unique_id.to_le_bytes());
    buf[72..76].copy_from_slice(&1u32.to_le_bytes()); // partition count
    buf[76..80].copy_from_slice(&46u32.to_le_bytes()); // implementation use length
    buf[80..84].copy_from_slice(&0u32.to_le_bytes()); // free space: none (read only)
    buf[84..88].copy_from_slice(&ctx.partition_len.to_le_bytes()); // size table
    let iu = 88;
    buf[iu..iu + 32].copy_from_slice(&impl_regid());
    buf[iu + 32..iu + 36].copy_from_slice(&ctx.num_files.to_le_bytes());
    buf[iu + 36..iu + 40].copy_from_slice(&ctx.num_dirs.to_le_bytes());
    buf[iu + 40..iu + 42].copy_from_slice(&0x0102u16.to_le_bytes()); // min read revision
    buf[iu + 42..iu + 44].copy_from_slice(&0x0102u16.to_le_bytes()); // min write revision
    buf[iu + 44..iu + 46].copy_from_slice(&0x0102u16.to_le_bytes()); // max write revision
    DescriptorTag::finalize(&mut buf, UDF_TAG_LVID, 0, location);
    buf
}

/// Emits the file-set descriptor at partition block 0.
pub fn emit_udf_fsd(ctx: &UdfContext) -> IsoResult<Vec<u8>> {
    let mut buf = vec![0u8; 512];
    buf[16..28].copy_from_slice(&ctx.recording_time.emit());
    buf[28..30].copy_from_slice(&3u16.to_le_bytes()); // interchange level
    buf[30..32].copy_from_slice(&3u16.to_le_bytes());
    buf[32..36].copy_from_slice(&1u32.to_le_bytes()); // charset list
    buf[36..40].copy_from_slice(&1u32.to_le_bytes());
    buf[48..112].copy_from_slice(&osta_charspec());
    buf[112..240].copy_from_slice(&encode_dstring::<128>(&ctx.vol_ident)?);
    buf[240..304].copy_from_slice(&osta_charspec());
    buf[304..336].copy_from_slice(&encode_dstring::<32>(&ctx.vol_ident)?);
    // copyright and abstract identifiers stay empty
    let root_icb = LongAd {
        len: ISO_BLOCK_SIZE as u32,
        block: 1,
        partition: 0,
    };
    buf[400..416].copy_from_slice(&root_icb.emit());
    buf[416..448].copy_from_slice(&domain_regid());
    DescriptorTag::finalize(&mut buf, UDF_TAG_FSD, 0, 0);
    Ok(buf)
}

/// Root ICB location parsed from a file-set descriptor.
pub fn parse_udf_fsd(buf: &[u8], block: u64) -> IsoResult<LongAd> {
    let tag = DescriptorTag::parse(buf, block)?;
    if tag.tag_id != UDF_TAG_FSD {
        return Err(malformed("expected file-set descriptor", block, 0));
    }
    Ok(LongAd::parse(&buf[400..416]))
}

// === File entry ===

/// Logical view of a (possibly extended) file entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub file_type: u8,
    pub uid: u32,
    pub gid: u32,
    pub permissions: u32,
    pub link_count: u16,
    pub info_len: u64,
    pub unique_id: u64,
    pub access: UdfTimestamp,
    pub modification: UdfTimestamp,
    pub attr: UdfTimestamp,
    /// Short allocation descriptors of the data area.
    pub alloc: Vec<ShortAd>,
}

impl FileEntry {
    pub const PERM_FILE: u32 = 0x1084;
    pub const PERM_DIR: u32 = 0x14A5;

    pub fn new_dir(link_count: u16, unique_id: u64, stamp: UdfTimestamp) -> Self {
        Self {
            file_type: UDF_ICB_FILE_TYPE_DIR,
            uid: u32::MAX,
            gid: u32::MAX,
            permissions: Self::PERM_DIR,
            link_count,
            info_len: 0,
            unique_id,
            access: stamp,
            modification: stamp,
            attr: stamp,
            alloc: vec![],
        }
    }

    pub fn new_file(info_len: u64, unique_id: u64, stamp: UdfTimestamp) -> Self {
        Self {
            file_type: UDF_ICB_FILE_TYPE_FILE,
            uid: u32::MAX,
            gid: u32::MAX,
            permissions: Self::PERM_FILE,
            link_count: 1,
            info_len,
            unique_id,
            access: stamp,
            modification: stamp,
            attr: stamp,
            alloc: vec![],
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == UDF_ICB_FILE_TYPE_DIR
    }

    pub fn emit(&self, location: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 176 + self.alloc.len() * 8];

        // ICB tag
        buf[20..22].copy_from_slice(&4u16.to_le_bytes()); // strategy type 4
        buf[24..26].copy_from_slice(&1u16.to_le_bytes()); // max entries
        buf[27] = self.file_type;
        buf[34..36].copy_from_slice(&560u16.to_le_bytes()); // flags: short ads, non-relocatable

        buf[36..40].copy_from_slice(&self.uid.to_le_bytes());
        buf[40..44].copy_from_slice(&self.gid.to_le_bytes());
        buf[44..48].copy_from_slice(&self.permissions.to_le_bytes());
        buf[48..50].copy_from_slice(&self.link_count.to_le_bytes());
        buf[52..56].copy_from_slice(&0u32.to_le_bytes()); // record length
        buf[56..64].copy_from_slice(&self.info_len.to_le_bytes());
        let blocks = blocks_for(self.info_len);
        buf[64..72].copy_from_slice(&blocks.to_le_bytes());
        buf[72..84].copy_from_slice(&self.access.emit());
        buf[84..96].copy_from_slice(&self.modification.emit());
        buf[96..108].copy_from_slice(&self.attr.emit());
        buf[108..112].copy_from_slice(&1u32.to_le_bytes()); // checkpoint
        buf[128..160].copy_from_slice(&impl_regid());
        buf[160..168].copy_from_slice(&self.unique_id.to_le_bytes());
        buf[168..172].copy_from_slice(&0u32.to_le_bytes()); // no extended attributes
        buf[172..176].copy_from_slice(&((self.alloc.len() * 8) as u32).to_le_bytes());

        let mut pos = 176;
        for ad in &self.alloc {
            buf[pos..pos + 4].copy_from_slice(&ad.len.to_le_bytes());
            buf[pos + 4..pos + 8].copy_from_slice(&ad.pos.to_le_bytes());
            pos += 8;
        }

        DescriptorTag::finalize(&mut buf, UDF_TAG_FE, 0, location);
        buf
    }

    /// Parses a file entry or extended file entry.
    pub fn parse(buf: &[u8], block: u64) -> IsoResult<Self> {
        let tag = DescriptorTag::parse(buf, block)?;
        let extended = match tag.tag_id {
            UDF_TAG_FE => false,
            UDF_TAG_EFE => true,
            _ => return Err(malformed("expected file entry", block, 0)),
        };
        let fixed = if extended { 216 } else { 176 };
        if buf.len() < fixed {
            return Err(malformed("short file entry", block, 0));
        }

        let file_type = buf[27];
        let uid = u32::from_le_bytes(buf[36..40].try_into().unwrap());
        let gid = u32::from_le_bytes(buf[40..44].try_into().unwrap());
        let permissions = u32::from_le_bytes(buf[44..48].try_into().unwrap());
        let link_count = u16::from_le_bytes(buf[48..50].try_into().unwrap());
        let info_len = u64::from_le_bytes(buf[56..64].try_into().unwrap());

        // Timestamp and tail offsets differ between FE and EFE.
        let (t_access, t_mod, t_attr, uid_off, len_ad_off) = if extended {
            (80, 92, 116, 200, 212)
        } else {
            (72, 84, 96, 160, 172)
        };

        let icb_flags = u16::from_le_bytes(buf[34..36].try_into().unwrap());
        if icb_flags & 0x07 != 0 {
            return Err(malformed("only short allocation descriptors supported", block, 34));
        }

        let len_ad = u32::from_le_bytes(buf[len_ad_off..len_ad_off + 4].try_into().unwrap()) as usize;
        let ad_start = fixed
            + u32::from_le_bytes(buf[len_ad_off - 4..len_ad_off].try_into().unwrap()) as usize;
        if ad_start + len_ad > buf.len() {
            return Err(malformed("allocation descriptors out of range", block, 0));
        }

        let mut alloc = vec![];
        for chunk in buf[ad_start..ad_start + len_ad].chunks_exact(8) {
            let len = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
            let pos = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
            if len & 0x3FFF_FFFF != 0 {
                alloc.push(ShortAd {
                    len: len & 0x3FFF_FFFF,
                    pos,
                });
            }
        }

        Ok(Self {
            file_type,
            uid,
            gid,
            permissions,
            link_count,
            info_len,
            unique_id: u64::from_le_bytes(buf[uid_off..uid_off + 8].try_into().unwrap()),
            access: UdfTimestamp::parse(&buf[t_access..t_access + 12]),
            modification: UdfTimestamp::parse(&buf[t_mod..t_mod + 12]),
            attr: UdfTimestamp::parse(&buf[t_attr..t_attr + 12]),
            alloc,
        })
    }
}

// === File identifier descriptor ===

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdent {
    pub is_dir: bool,
    pub is_parent: bool,
    pub hidden: bool,
    /// Native-string identifier; empty for the parent entry.
    pub ident: String,
    /// CS0 bytes as stored, preserved for ordering and round-trip.
    pub cs0: Vec<u8>,
    pub icb: LongAd,
}

impl FileIdent {
    pub fn new(ident: &str, is_dir: bool) -> IsoResult<Self> {
        Ok(Self {
            is_dir,
            is_parent: false,
            hidden: false,
            ident: ident.to_string(),
            cs0: encode_cs0(ident)?,
            icb: LongAd::default(),
        })
    }

    pub fn parent() -> Self {
        Self {
            is_dir: true,
            is_parent: true,
            hidden: false,
            ident: String::new(),
            cs0: vec![],
            icb: LongAd::default(),
        }
    }

    /// Stored length, padded to a 4-byte multiple.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        (38 + self.cs0.len()).div_ceil(4) * 4
    }

    pub fn emit(&self, location: u32) -> Vec<u8> {
        let mut buf = vec![0u8; self.len()];
        buf[16..18].copy_from_slice(&1u16.to_le_bytes()); // file version number
        let mut ch = 0u8;
        if self.hidden {
            ch |= 0x01;
        }
        if self.is_dir {
            ch |= 0x02;
        }
        if self.is_parent {
            ch |= 0x08;
        }
        buf[18] = ch;
        buf[19] = self.cs0.len() as u8;
        buf[20..36].copy_from_slice(&self.icb.emit());
        buf[36..38].copy_from_slice(&0u16.to_le_bytes()); // implementation use length
        buf[38..38 + self.cs0.len()].copy_from_slice(&self.cs0);
        DescriptorTag::finalize(&mut buf, UDF_TAG_FID, 0, location);
        buf
    }

    /// Parses one descriptor at `pos`; returns the descriptor and the
    /// number of bytes consumed.
    pub fn parse(data: &[u8], pos: usize, block: u64) -> IsoResult<(Self, usize)> {
        let b = &data[pos..];
        if b.len() < 38 {
            return Err(malformed("short file identifier", block, pos as u32));
        }
        let tag = DescriptorTag::parse(b, block)?;
        if tag.tag_id != UDF_TAG_FID {
            return Err(malformed("expected file identifier", block, pos as u32));
        }

        let ch = b[18];
        let l_fi = b[19] as usize;
        let l_iu = u16::from_le_bytes(b[36..38].try_into().unwrap()) as usize;
        let total = (38 + l_iu + l_fi).div_ceil(4) * 4;
        if total > b.len() {
            return Err(malformed("file identifier out of range", block, pos as u32));
        }

        let cs0 = b[38 + l_iu..38 + l_iu + l_fi].to_vec();
        let ident = decode_cs0(&cs0)
            .ok_or(malformed("file identifier not CS0", block, pos as u32))?;

        Ok((
            Self {
                is_dir: ch & 0x02 != 0,
                is_parent: ch & 0x08 != 0,
                hidden: ch & 0x01 != 0,
                ident,
                cs0,
                icb: LongAd::parse(&b[20..36]),
            },
            total,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_ccitt_known_value() {
        // CRC-CCITT of "123456789" with init 0 is 0x31C3.
        assert_eq!(crc_ccitt(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_tag_finalize_then_parse() {
        let mut buf = vec![0u8; 64];
        buf[20] = 0xAB;
        DescriptorTag::finalize(&mut buf, UDF_TAG_PVD, 1, 32);
        let tag = DescriptorTag::parse(&buf, 32).unwrap();
        assert_eq!(tag.tag_id, UDF_TAG_PVD);
        assert_eq!(tag.location, 32);
        assert_eq!(tag.crc_len, 48);
    }

    #[test]
    fn test_corrupt_body_fails_crc() {
        let mut buf = vec![0u8; 64];
        DescriptorTag::finalize(&mut buf, UDF_TAG_PVD, 1, 32);
        buf[40] ^= 1;
        let err = DescriptorTag::parse(&buf, 32).unwrap_err();
        assert_eq!(err.kind(), IsoErrorKind::MalformedIso);
    }

    #[test]
    fn test_cs0_picks_narrow_form() {
        let enc = encode_cs0("BOOT.CAT").unwrap();
        assert_eq!(enc[0], UDF_CS0_8BIT);
        assert_eq!(decode_cs0(&enc).unwrap(), "BOOT.CAT");

        let wide = encode_cs0("d\u{0101}ta").unwrap();
        assert_eq!(wide[0], UDF_CS0_16BIT);
        assert_eq!(decode_cs0(&wide).unwrap(), "d\u{0101}ta");
    }

    #[test]
    fn test_avdp_roundtrip() {
        let avdp = Avdp::bridge_default();
        let buf = avdp.emit(UDF_ANCHOR_BLOCK as u32);
        assert_eq!(Avdp::parse(&buf, UDF_ANCHOR_BLOCK).unwrap(), avdp);
    }

    #[test]
    fn test_file_entry_roundtrip() {
        let mut fe = FileEntry::new_file(5000, 42, UdfTimestamp::default());
        fe.alloc.push(ShortAd { len: 5000, pos: 10 });
        let buf = fe.emit(3);
        let back = FileEntry::parse(&buf, 260).unwrap();
        assert_eq!(back, fe);
    }

    #[test]
    fn test_file_ident_roundtrip() {
        let mut fid = FileIdent::new("kernel.img", false).unwrap();
        fid.icb = LongAd {
            len: 2048,
            block: 9,
            partition: 0,
        };
        let buf = fid.emit(4);
        assert_eq!(buf.len() % 4, 0);
        let (back, used) = FileIdent::parse(&buf, 0, 4).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(back, fid);
    }

    #[test]
    fn test_fsd_root_icb() {
        let ctx = UdfContext::new("UDFVOL");
        let buf = emit_udf_fsd(&ctx).unwrap();
        let root = parse_udf_fsd(&buf, 257).unwrap();
        assert_eq!(root.block, 1);
        assert_eq!(root.len, ISO_BLOCK_SIZE as u32);
    }
}
