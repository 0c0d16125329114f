// SPDX-License-Identifier: MIT

//! Isohybrid support: an MBR in the system area (blocks 0-15) that
//! makes the image bootable from disk-like media as well as optical
//! drives. The partition table covers the whole padded image.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{vec, vec::Vec};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::core::error::*;

pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
/// Boot code area before the disk id field.
pub const MBR_CODE_LEN: usize = 440;

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct MbrEntry {
    pub boot_flag: u8,
    pub start_chs: [u8; 3],
    pub part_type: u8,
    pub end_chs: [u8; 3],
    pub start_lba: u32,
    pub sectors: u32,
}

impl MbrEntry {
    pub const EMPTY: MbrEntry = MbrEntry {
        boot_flag: 0,
        start_chs: [0; 3],
        part_type: 0,
        end_chs: [0; 3],
        start_lba: 0,
        sectors: 0,
    };
}

fn chs(lba: u64, heads: u32, spt: u32) -> [u8; 3] {
    let sector = (lba % spt as u64) as u32 + 1;
    let head = ((lba / spt as u64) % heads as u64) as u32;
    let cyl = (lba / (spt as u64 * heads as u64)).min(1023) as u32;
    [
        head as u8,
        (((cyl >> 8) as u8) << 6) | sector as u8,
        (cyl & 0xFF) as u8,
    ]
}

/// Installed isohybrid state.
#[derive(Debug, Clone)]
pub struct IsoHybrid {
    /// Boot code occupying the start of the MBR.
    pub mbr_code: Vec<u8>,
    pub mbr_id: u32,
    /// Partition slot 1-4.
    pub part_entry: u8,
    pub part_type: u8,
    pub heads: u32,
    pub sectors_per_track: u32,
}

impl IsoHybrid {
    pub fn new(mbr_code: &[u8], mbr_id: u32) -> IsoResult<Self> {
        if mbr_code.len() > MBR_CODE_LEN {
            return Err(IsoError::Invalid("isohybrid boot code longer than 440 bytes"));
        }
        if mbr_code.is_empty() {
            return Err(IsoError::Invalid("isohybrid boot code is empty"));
        }
        Ok(Self {
            mbr_code: mbr_code.to_vec(),
            mbr_id,
            part_entry: 1,
            part_type: 0x17,
            heads: 64,
            sectors_per_track: 32,
        })
    }

    /// Patches the MBR into the first 512 bytes of the system area.
    ///
    /// `image_len` is the padded image length in bytes; the partition
    /// covers the whole image in 512-byte sectors.
    pub fn patch_system_area(&self, system_area: &mut [u8], image_len: u64) -> IsoResult<()> {
        if system_area.len() < 512 {
            return Err(IsoError::Internal("system area shorter than one sector"));
        }
        if !(1..=4).contains(&self.part_entry) {
            return Err(IsoError::Invalid("mbr partition slot must be 1-4"));
        }

        system_area[..512].fill(0);
        system_area[..self.mbr_code.len()].copy_from_slice(&self.mbr_code);
        system_area[440..444].copy_from_slice(&self.mbr_id.to_le_bytes());

        let sectors = image_len.div_ceil(512);
        let entry = MbrEntry {
            boot_flag: 0x80,
            start_chs: chs(0, self.heads, self.sectors_per_track),
            part_type: self.part_type,
            end_chs: chs(sectors.saturating_sub(1), self.heads, self.sectors_per_track),
            start_lba: 0,
            sectors: sectors.min(u32::MAX as u64) as u32,
        };

        let base = 446 + (self.part_entry as usize - 1) * 16;
        system_area[base..base + 16].copy_from_slice(entry.as_bytes());
        system_area[510..512].copy_from_slice(&MBR_SIGNATURE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbr_entry_is_16_bytes() {
        assert_eq!(core::mem::size_of::<MbrEntry>(), 16);
    }

    #[test]
    fn test_patch_writes_signature_and_entry() {
        let hybrid = IsoHybrid::new(&[0xFA, 0x90, 0xEB], 0x12345678).unwrap();
        let mut area = vec![0u8; 16 * 2048];
        hybrid.patch_system_area(&mut area, 2 * 1024 * 1024).unwrap();

        assert_eq!(&area[510..512], &MBR_SIGNATURE);
        assert_eq!(&area[440..444], &0x12345678u32.to_le_bytes());
        let entry = MbrEntry::read_from_bytes(&area[446..462]).unwrap();
        assert_eq!(entry.boot_flag, 0x80);
        assert_eq!(entry.part_type, 0x17);
        assert_eq!(entry.sectors, 4096);
    }

    #[test]
    fn test_oversized_code_rejected() {
        let code = vec![0u8; 441];
        assert!(IsoHybrid::new(&code, 0).is_err());
    }
}
