// SPDX-License-Identifier: MIT

//! Volume descriptors.
//!
//! One descriptor per block starting at block 16: the primary,
//! any boot records, supplementary (Joliet) descriptors, volume
//! partition descriptors, and the set terminator. The raw on-disk
//! shape is a fixed 2048-byte structure.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{vec, vec::Vec};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::core::codec::*;
use crate::core::error::*;
use crate::fs::iso::constant::*;
use crate::fs::iso::types::dr::DirRecord;

/// On-disk shape shared by the primary and supplementary descriptors.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone)]
#[repr(C, packed)]
pub struct RawVd {
    pub vd_type: u8,
    pub std_id: [u8; 5],
    pub version: u8,
    pub flags: u8,
    pub system_id: [u8; 32],
    pub volume_id: [u8; 32],
    pub unused2: [u8; 8],
    pub space_size: [u8; 8],
    pub escapes: [u8; 32],
    pub set_size: [u8; 4],
    pub seq_num: [u8; 4],
    pub block_size: [u8; 4],
    pub path_table_size: [u8; 8],
    pub lpath_extent: [u8; 4],
    pub opt_lpath_extent: [u8; 4],
    pub mpath_extent: [u8; 4],
    pub opt_mpath_extent: [u8; 4],
    pub root_record: [u8; 34],
    pub volset_id: [u8; 128],
    pub publisher_id: [u8; 128],
    pub preparer_id: [u8; 128],
    pub application_id: [u8; 128],
    pub copyright_file_id: [u8; 37],
    pub abstract_file_id: [u8; 37],
    pub biblio_file_id: [u8; 37],
    pub vol_creation: [u8; 17],
    pub vol_modification: [u8; 17],
    pub vol_expiration: [u8; 17],
    pub vol_effective: [u8; 17],
    pub fs_version: u8,
    pub unused3: u8,
    pub app_use: [u8; 512],
    pub reserved: [u8; 653],
}

/// Parsed primary or supplementary volume descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pvd {
    pub system_id: [u8; 32],
    pub volume_id: [u8; 32],
    pub space_size: u32,
    pub escapes: [u8; 32],
    pub set_size: u16,
    pub seq_num: u16,
    pub path_table_size: u32,
    pub lpath_extent: u32,
    pub opt_lpath_extent: u32,
    pub mpath_extent: u32,
    pub opt_mpath_extent: u32,
    pub root: DirRecord,
    pub volset_id: [u8; 128],
    pub publisher_id: [u8; 128],
    pub preparer_id: [u8; 128],
    pub application_id: [u8; 128],
    pub copyright_file_id: [u8; 37],
    pub abstract_file_id: [u8; 37],
    pub biblio_file_id: [u8; 37],
    pub creation: VolumeDate,
    pub modification: VolumeDate,
    pub expiration: VolumeDate,
    pub effective: VolumeDate,
    pub app_use: [u8; 512],
}

/// Space-padded a-character field of fixed width.
pub fn pad_field<const N: usize>(s: &[u8]) -> [u8; N] {
    let mut out = [b' '; N];
    let n = s.len().min(N);
    out[..n].copy_from_slice(&s[..n]);
    out
}

impl Pvd {
    /// An empty descriptor for a freshly initialised volume.
    pub fn new(system_id: &[u8], volume_id: &[u8]) -> Self {
        let now = VolumeDate::now();
        Self {
            system_id: pad_field(system_id),
            volume_id: pad_field(volume_id),
            space_size: 0,
            escapes: [0; 32],
            set_size: 1,
            seq_num: 1,
            path_table_size: 0,
            lpath_extent: 0,
            opt_lpath_extent: 0,
            mpath_extent: 0,
            opt_mpath_extent: 0,
            root: DirRecord::dot(Default::default(), RecordDate::now()),
            volset_id: pad_field(b""),
            publisher_id: pad_field(b""),
            preparer_id: pad_field(b""),
            application_id: pad_field(b""),
            copyright_file_id: pad_field(b""),
            abstract_file_id: pad_field(b""),
            biblio_file_id: pad_field(b""),
            creation: now,
            modification: now,
            expiration: VolumeDate::default(),
            effective: VolumeDate::default(),
            app_use: [0; 512],
        }
    }

    /// Joliet variant of this descriptor with the UCS-2 level escape.
    pub fn joliet_escapes(level: u8) -> [u8; 32] {
        let mut escapes = [0u8; 32];
        escapes[..3].copy_from_slice(&match level {
            1 => JOLIET_ESCAPE_L1,
            2 => JOLIET_ESCAPE_L2,
            _ => JOLIET_ESCAPE_L3,
        });
        escapes
    }

    pub fn is_joliet(&self) -> bool {
        let e = &self.escapes[..3];
        e == JOLIET_ESCAPE_L1 || e == JOLIET_ESCAPE_L2 || e == JOLIET_ESCAPE_L3
    }

    pub fn parse(raw: &RawVd, block: u64) -> IsoResult<Self> {
        let block_size = decode_both16(&raw.block_size, block, 128)?;
        if block_size as usize != ISO_BLOCK_SIZE {
            return Err(malformed("unsupported logical block size", block, 128));
        }

        let mut root_buf = [0u8; ISO_BLOCK_SIZE];
        root_buf[..34].copy_from_slice(&raw.root_record);
        let root = DirRecord::parse(&root_buf, 0, block)?;

        Ok(Self {
            system_id: raw.system_id,
            volume_id: raw.volume_id,
            space_size: decode_both32(&raw.space_size, block, 80)?,
            escapes: raw.escapes,
            set_size: decode_both16(&raw.set_size, block, 120)?,
            seq_num: decode_both16(&raw.seq_num, block, 124)?,
            path_table_size: decode_both32(&raw.path_table_size, block, 132)?,
            lpath_extent: u32::from_le_bytes(raw.lpath_extent),
            opt_lpath_extent: u32::from_le_bytes(raw.opt_lpath_extent),
            mpath_extent: u32::from_be_bytes(raw.mpath_extent),
            opt_mpath_extent: u32::from_be_bytes(raw.opt_mpath_extent),
            root,
            volset_id: raw.volset_id,
            publisher_id: raw.publisher_id,
            preparer_id: raw.preparer_id,
            application_id: raw.application_id,
            copyright_file_id: raw.copyright_file_id,
            abstract_file_id: raw.abstract_file_id,
            biblio_file_id: raw.biblio_file_id,
            creation: VolumeDate::from_bytes(&raw.vol_creation, block, 813)?,
            modification: VolumeDate::from_bytes(&raw.vol_modification, block, 830)?,
            expiration: VolumeDate::from_bytes(&raw.vol_expiration, block, 847)?,
            effective: VolumeDate::from_bytes(&raw.vol_effective, block, 864)?,
            app_use: raw.app_use,
        })
    }

    pub fn to_raw(&self, supplementary: bool) -> IsoResult<RawVd> {
        let mut root_buf: Vec<u8> = vec![];
        self.root.emit(&mut root_buf)?;
        if root_buf.len() != 34 {
            return Err(IsoError::Internal("root record must be 34 bytes"));
        }
        let mut root_record = [0u8; 34];
        root_record.copy_from_slice(&root_buf);

        Ok(RawVd {
            vd_type: if supplementary {
                VD_TYPE_SUPPLEMENTARY
            } else {
                VD_TYPE_PRIMARY
            },
            std_id: ISO_STANDARD_ID,
            version: ISO_VD_VERSION,
            flags: 0,
            system_id: self.system_id,
            volume_id: self.volume_id,
            unused2: [0; 8],
            space_size: encode_both32(self.space_size),
            escapes: self.escapes,
            set_size: encode_both16(self.set_size),
            seq_num: encode_both16(self.seq_num),
            block_size: encode_both16(ISO_BLOCK_SIZE as u16),
            path_table_size: encode_both32(self.path_table_size),
            lpath_extent: self.lpath_extent.to_le_bytes(),
            opt_lpath_extent: self.opt_lpath_extent.to_le_bytes(),
            mpath_extent: self.mpath_extent.to_be_bytes(),
            opt_mpath_extent: self.opt_mpath_extent.to_be_bytes(),
            root_record,
            volset_id: self.volset_id,
            publisher_id: self.publisher_id,
            preparer_id: self.preparer_id,
            application_id: self.application_id,
            copyright_file_id: self.copyright_file_id,
            abstract_file_id: self.abstract_file_id,
            biblio_file_id: self.biblio_file_id,
            vol_creation: self.creation.to_bytes(),
            vol_modification: self.modification.to_bytes(),
            vol_expiration: self.expiration.to_bytes(),
            vol_effective: self.effective.to_bytes(),
            fs_version: ISO_FILE_STRUCTURE_VERSION,
            unused3: 0,
            app_use: self.app_use,
            reserved: [0; 653],
        })
    }
}

/// Boot record descriptor; for El Torito the system use area leads
/// with the 32-bit LE extent of the boot catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootRecordVd {
    pub boot_system_id: [u8; 32],
    pub boot_id: [u8; 32],
    pub catalog_extent: u32,
}

impl BootRecordVd {
    pub fn new_eltorito() -> Self {
        let mut boot_system_id = [0u8; 32];
        boot_system_id[..ELTORITO_BOOT_SYSTEM_ID.len()].copy_from_slice(ELTORITO_BOOT_SYSTEM_ID);
        Self {
            boot_system_id,
            boot_id: [0; 32],
            catalog_extent: 0,
        }
    }

    pub fn is_eltorito(&self) -> bool {
        self.boot_system_id.starts_with(ELTORITO_BOOT_SYSTEM_ID)
    }

    pub fn parse(block_data: &[u8], block: u64) -> IsoResult<Self> {
        if block_data.len() < 0x4B {
            return Err(malformed("short boot record", block, 0));
        }
        Ok(Self {
            boot_system_id: block_data[7..39].try_into().unwrap(),
            boot_id: block_data[39..71].try_into().unwrap(),
            catalog_extent: u32::from_le_bytes(block_data[71..75].try_into().unwrap()),
        })
    }

    pub fn emit(&self) -> [u8; ISO_BLOCK_SIZE] {
        let mut out = [0u8; ISO_BLOCK_SIZE];
        out[0] = VD_TYPE_BOOT_RECORD;
        out[1..6].copy_from_slice(&ISO_STANDARD_ID);
        out[6] = ISO_VD_VERSION;
        out[7..39].copy_from_slice(&self.boot_system_id);
        out[39..71].copy_from_slice(&self.boot_id);
        out[71..75].copy_from_slice(&self.catalog_extent.to_le_bytes());
        out
    }
}

/// Volume partition descriptor. Parsed and re-emitted; never produced
/// for new images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionVd {
    pub system_id: [u8; 32],
    pub partition_id: [u8; 32],
    pub location: u32,
    pub size: u32,
}

impl PartitionVd {
    pub fn parse(block_data: &[u8], block: u64) -> IsoResult<Self> {
        Ok(Self {
            system_id: block_data[8..40].try_into().unwrap(),
            partition_id: block_data[40..72].try_into().unwrap(),
            location: decode_both32(&block_data[72..80], block, 72)?,
            size: decode_both32(&block_data[80..88], block, 80)?,
        })
    }

    pub fn emit(&self) -> [u8; ISO_BLOCK_SIZE] {
        let mut out = [0u8; ISO_BLOCK_SIZE];
        out[0] = VD_TYPE_PARTITION;
        out[1..6].copy_from_slice(&ISO_STANDARD_ID);
        out[6] = ISO_VD_VERSION;
        out[8..40].copy_from_slice(&self.system_id);
        out[40..72].copy_from_slice(&self.partition_id);
        out[72..80].copy_from_slice(&encode_both32(self.location));
        out[80..88].copy_from_slice(&encode_both32(self.size));
        out
    }
}

/// One classified descriptor block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeDescriptor {
    Primary(Pvd),
    Supplementary(Pvd),
    BootRecord(BootRecordVd),
    Partition(PartitionVd),
    Terminator,
}

impl VolumeDescriptor {
    /// Classifies and parses one descriptor block.
    pub fn parse(block_data: &[u8], block: u64) -> IsoResult<Self> {
        if block_data.len() < ISO_BLOCK_SIZE {
            return Err(malformed("short volume descriptor block", block, 0));
        }
        if block_data[1..6] != ISO_STANDARD_ID {
            return Err(malformed("bad volume descriptor standard id", block, 1));
        }

        match block_data[0] {
            VD_TYPE_PRIMARY => {
                let raw = RawVd::read_from_bytes(&block_data[..ISO_BLOCK_SIZE])
                    .map_err(|_| malformed("undecodable volume descriptor", block, 0))?;
                Ok(Self::Primary(Pvd::parse(&raw, block)?))
            }
            VD_TYPE_SUPPLEMENTARY => {
                let raw = RawVd::read_from_bytes(&block_data[..ISO_BLOCK_SIZE])
                    .map_err(|_| malformed("undecodable volume descriptor", block, 0))?;
                Ok(Self::Supplementary(Pvd::parse(&raw, block)?))
            }
            VD_TYPE_BOOT_RECORD => Ok(Self::BootRecord(BootRecordVd::parse(block_data, block)?)),
            VD_TYPE_PARTITION => Ok(Self::Partition(PartitionVd::parse(block_data, block)?)),
            VD_TYPE_TERMINATOR => Ok(Self::Terminator),
            _ => Err(malformed("unknown volume descriptor type", block, 0)),
        }
    }
}

/// Emits the set terminator block.
pub fn emit_terminator() -> [u8; ISO_BLOCK_SIZE] {
    let mut out = [0u8; ISO_BLOCK_SIZE];
    out[0] = VD_TYPE_TERMINATOR;
    out[1..6].copy_from_slice(&ISO_STANDARD_ID);
    out[6] = ISO_VD_VERSION;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_vd_is_one_block() {
        assert_eq!(core::mem::size_of::<RawVd>(), ISO_BLOCK_SIZE);
    }

    #[test]
    fn test_pvd_roundtrip() {
        let mut pvd = Pvd::new(b"LINUX", b"TESTVOL");
        pvd.space_size = 30;
        pvd.path_table_size = 10;
        pvd.lpath_extent = 20;
        pvd.mpath_extent = 21;
        pvd.root.extent = 23;
        pvd.root.data_len = 2048;

        let raw = pvd.to_raw(false).unwrap();
        assert_eq!(raw.vd_type, VD_TYPE_PRIMARY);
        let back = Pvd::parse(&raw, 16).unwrap();
        assert_eq!(back, pvd);
    }

    #[test]
    fn test_classify_terminator() {
        let block = emit_terminator();
        assert_eq!(
            VolumeDescriptor::parse(&block, 17).unwrap(),
            VolumeDescriptor::Terminator
        );
    }

    #[test]
    fn test_joliet_escape_detection() {
        let mut svd = Pvd::new(b"", b"JOLIET");
        assert!(!svd.is_joliet());
        svd.escapes = Pvd::joliet_escapes(3);
        assert!(svd.is_joliet());

        let raw = svd.to_raw(true).unwrap();
        assert_eq!(raw.vd_type, VD_TYPE_SUPPLEMENTARY);
        let back = Pvd::parse(&raw, 17).unwrap();
        assert!(back.is_joliet());
    }

    #[test]
    fn test_boot_record_roundtrip() {
        let mut br = BootRecordVd::new_eltorito();
        br.catalog_extent = 25;
        let block = br.emit();
        let back = BootRecordVd::parse(&block, 17).unwrap();
        assert_eq!(back, br);
        assert!(back.is_eltorito());
    }

    #[test]
    fn test_bad_standard_id_is_malformed() {
        let mut block = emit_terminator();
        block[2] = b'X';
        let err = VolumeDescriptor::parse(&block, 18).unwrap_err();
        assert_eq!(err.kind(), IsoErrorKind::MalformedIso);
    }
}
