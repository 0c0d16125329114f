// SPDX-License-Identifier: MIT

// === Logical geometry ===

/// Logical block ("extent") size. Fixed by the standard profile.
pub const ISO_BLOCK_SIZE: usize = 2048;
/// Blocks 0-15 form the system area (zero, or isohybrid boot code).
pub const ISO_SYSTEM_AREA_BLOCKS: u64 = 16;
/// Volume descriptors start here, one per block.
pub const ISO_VD_START_BLOCK: u64 = 16;

// === Volume descriptors ===

pub const ISO_STANDARD_ID: [u8; 5] = *b"CD001";
pub const ISO_VD_VERSION: u8 = 1;

pub const VD_TYPE_BOOT_RECORD: u8 = 0;
pub const VD_TYPE_PRIMARY: u8 = 1;
pub const VD_TYPE_SUPPLEMENTARY: u8 = 2;
pub const VD_TYPE_PARTITION: u8 = 3;
pub const VD_TYPE_TERMINATOR: u8 = 255;

pub const ISO_FILE_STRUCTURE_VERSION: u8 = 1;

// === Directory records ===

/// Fixed header length of a directory record before the identifier.
pub const ISO_DR_BASE_LEN: usize = 33;
/// A directory record must fit a single length byte.
pub const ISO_DR_MAX_LEN: usize = 255;
/// Strict hierarchy depth limit (root is depth 1).
pub const ISO_MAX_DEPTH: usize = 8;
/// Maximum length of an encoded path.
pub const ISO_MAX_PATH_LEN: usize = 255;

pub const ISO_IDENT_SELF: u8 = 0x00;
pub const ISO_IDENT_PARENT: u8 = 0x01;

// === Rock Ridge ===

/// Synthetic depth-2 directory that receives relocated deep subtrees.
pub const RR_MOVED_NAME: &[u8] = b"RR_MOVED";

pub const RR_ER_ID: &[u8] = b"RRIP_1991A";
pub const RR_ER_DESC: &[u8] = b"THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS";
pub const RR_ER_SRC: &[u8] = b"PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE.  SEE PUBLISHER IDENTIFIER IN PRIMARY VOLUME DESCRIPTOR FOR CONTACT INFORMATION.";

pub const RR_ER_ID_112: &[u8] = b"IEEE_P1282";
pub const RR_ER_DESC_112: &[u8] = b"THE IEEE P1282 PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS.";
pub const RR_ER_SRC_112: &[u8] = b"PLEASE CONTACT THE IEEE STANDARDS DEPARTMENT, PISCATAWAY, NJ, USA FOR THE P1282 SPECIFICATION.";

// === Joliet ===

/// UCS-2 level escape sequences carried in the supplementary
/// descriptor (levels 1, 2, 3).
pub const JOLIET_ESCAPE_L1: [u8; 3] = [0x25, 0x2F, 0x40];
pub const JOLIET_ESCAPE_L2: [u8; 3] = [0x25, 0x2F, 0x43];
pub const JOLIET_ESCAPE_L3: [u8; 3] = [0x25, 0x2F, 0x45];

/// Joliet file identifiers are limited to 64 UCS-2 units.
pub const JOLIET_MAX_NAME_UNITS: usize = 64;

// === El Torito ===

pub const ELTORITO_BOOT_SYSTEM_ID: &[u8] = b"EL TORITO SPECIFICATION";
pub const ELTORITO_VALIDATION_HEADER_ID: u8 = 0x01;
pub const ELTORITO_BOOTABLE: u8 = 0x88;
pub const ELTORITO_NOT_BOOTABLE: u8 = 0x00;
pub const ELTORITO_SECTION_HEADER_ID: u8 = 0x90;
pub const ELTORITO_LAST_SECTION_HEADER_ID: u8 = 0x91;
pub const ELTORITO_KEY_55: u8 = 0x55;
pub const ELTORITO_KEY_AA: u8 = 0xAA;

// === UDF (ECMA-167 / OSTA UDF 2.60, bridge profile) ===

pub const UDF_BEA_ID: [u8; 5] = *b"BEA01";
pub const UDF_NSR_ID: [u8; 5] = *b"NSR02";
pub const UDF_TEA_ID: [u8; 5] = *b"TEA01";

pub const UDF_TAG_PVD: u16 = 1;
pub const UDF_TAG_AVDP: u16 = 2;
pub const UDF_TAG_IUVD: u16 = 4;
pub const UDF_TAG_PD: u16 = 5;
pub const UDF_TAG_LVD: u16 = 6;
pub const UDF_TAG_USD: u16 = 7;
pub const UDF_TAG_TD: u16 = 8;
pub const UDF_TAG_LVID: u16 = 9;
pub const UDF_TAG_FSD: u16 = 256;
pub const UDF_TAG_FID: u16 = 257;
pub const UDF_TAG_FE: u16 = 261;
pub const UDF_TAG_EFE: u16 = 266;

/// Fixed block plan of the bridge profile.
pub const UDF_MAIN_VDS_BLOCK: u64 = 32;
pub const UDF_RESERVE_VDS_BLOCK: u64 = 48;
pub const UDF_VDS_BLOCKS: u64 = 16;
pub const UDF_LVID_BLOCK: u64 = 64;
pub const UDF_ANCHOR_BLOCK: u64 = 256;
pub const UDF_PARTITION_START: u64 = 257;

/// CS0 compression ids.
pub const UDF_CS0_8BIT: u8 = 8;
pub const UDF_CS0_16BIT: u8 = 16;

pub const UDF_ICB_FILE_TYPE_DIR: u8 = 4;
pub const UDF_ICB_FILE_TYPE_FILE: u8 = 5;

// === Block math ===

/// Number of whole blocks needed to hold `len` bytes.
#[inline]
pub const fn blocks_for(len: u64) -> u64 {
    len.div_ceil(ISO_BLOCK_SIZE as u64)
}

/// Byte offset of the start of an extent.
#[inline]
pub const fn extent_offset(extent: u64) -> u64 {
    extent * ISO_BLOCK_SIZE as u64
}
