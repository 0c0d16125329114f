// SPDX-License-Identifier: MIT

//! SUSP and Rock Ridge system-use entries.
//!
//! SUSP carries a stream of 4-byte-tagged sub-records in a directory
//! record's system-use area; Rock Ridge layers POSIX semantics on top
//! of it. The set of tags is closed by the standards, so the entries
//! are a sum type and matching is exhaustive. Entries that do not fit
//! in the record spill into a continuation area reached through a CE
//! entry.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};

use bitflags::bitflags;

use crate::core::codec::*;
use crate::core::error::*;

/// Largest payload a single NM entry can carry.
const NM_MAX_NAME: usize = 250;
/// Largest content a single SL component record can carry.
const SL_MAX_COMPONENT: usize = 248;
/// Encoded size of a CE entry.
const CE_LEN: usize = 28;

bitflags! {
    /// TF presence bitmap. Bit 7 selects the 17-byte long date form.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TfFlags: u8 {
        const CREATION   = 0x01;
        const MODIFY     = 0x02;
        const ACCESS     = 0x04;
        const ATTRIBUTES = 0x08;
        const BACKUP     = 0x10;
        const EXPIRATION = 0x20;
        const EFFECTIVE  = 0x40;
        const LONG_FORM  = 0x80;
    }
}

/// One symlink path component record inside an SL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlComponent {
    pub flags: u8,
    pub content: Vec<u8>,
}

impl SlComponent {
    pub const CONTINUE: u8 = 0x01;
    pub const CURRENT: u8 = 0x02;
    pub const PARENT: u8 = 0x04;
    pub const ROOT: u8 = 0x08;

    #[inline]
    fn len(&self) -> usize {
        2 + self.content.len()
    }
}

/// A single SUSP or Rock Ridge sub-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspEntry {
    Sp { skip: u8 },
    Ce { extent: u32, offset: u32, len: u32 },
    Er { ext_ver: u8, id: Vec<u8>, desc: Vec<u8>, src: Vec<u8> },
    Es { seq: u8 },
    Rr { flags: u8 },
    Px { mode: u32, nlinks: u32, uid: u32, gid: u32, ino: Option<u32> },
    Pn { dev_high: u32, dev_low: u32 },
    Sl { flags: u8, components: Vec<SlComponent> },
    Nm { flags: u8, name: Vec<u8> },
    Cl { child_extent: u32 },
    Pl { parent_extent: u32 },
    Re,
    Tf { flags: TfFlags, short: Vec<RecordDate>, long: Vec<VolumeDate> },
    Sf { size_high: u32, size_low: u32, table_depth: u8 },
    St,
    /// Unrecognised entries (AA/AL and friends) are preserved verbatim.
    Unknown { sig: [u8; 2], version: u8, data: Vec<u8> },
}

impl SuspEntry {
    pub const NM_CONTINUE: u8 = 0x01;
    pub const SL_CONTINUE: u8 = 0x01;

    /// Encoded length in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            SuspEntry::Sp { .. } => 7,
            SuspEntry::Ce { .. } => CE_LEN,
            SuspEntry::Er { id, desc, src, .. } => 8 + id.len() + desc.len() + src.len(),
            SuspEntry::Es { .. } => 5,
            SuspEntry::Rr { .. } => 5,
            SuspEntry::Px { ino, .. } => {
                if ino.is_some() {
                    44
                } else {
                    36
                }
            }
            SuspEntry::Pn { .. } => 20,
            SuspEntry::Sl { components, .. } => {
                5 + components.iter().map(SlComponent::len).sum::<usize>()
            }
            SuspEntry::Nm { name, .. } => 5 + name.len(),
            SuspEntry::Cl { .. } => 12,
            SuspEntry::Pl { .. } => 12,
            SuspEntry::Re => 4,
            SuspEntry::Tf { short, long, .. } => 5 + short.len() * 7 + long.len() * 17,
            SuspEntry::Sf { .. } => 21,
            SuspEntry::St => 4,
            SuspEntry::Unknown { data, .. } => 4 + data.len(),
        }
    }

    fn signature(&self) -> [u8; 2] {
        match self {
            SuspEntry::Sp { .. } => *b"SP",
            SuspEntry::Ce { .. } => *b"CE",
            SuspEntry::Er { .. } => *b"ER",
            SuspEntry::Es { .. } => *b"ES",
            SuspEntry::Rr { .. } => *b"RR",
            SuspEntry::Px { .. } => *b"PX",
            SuspEntry::Pn { .. } => *b"PN",
            SuspEntry::Sl { .. } => *b"SL",
            SuspEntry::Nm { .. } => *b"NM",
            SuspEntry::Cl { .. } => *b"CL",
            SuspEntry::Pl { .. } => *b"PL",
            SuspEntry::Re => *b"RE",
            SuspEntry::Tf { .. } => *b"TF",
            SuspEntry::Sf { .. } => *b"SF",
            SuspEntry::St => *b"ST",
            SuspEntry::Unknown { sig, .. } => *sig,
        }
    }

    /// Appends the encoded entry to `out`.
    pub fn emit(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&self.signature());
        out.push(self.len() as u8);
        out.push(match self {
            SuspEntry::Unknown { version, .. } => *version,
            _ => 1,
        });

        match self {
            SuspEntry::Sp { skip } => {
                out.extend_from_slice(&[0xBE, 0xEF, *skip]);
            }
            SuspEntry::Ce {
                extent,
                offset,
                len,
            } => {
                out.extend_from_slice(&encode_both32(*extent));
                out.extend_from_slice(&encode_both32(*offset));
                out.extend_from_slice(&encode_both32(*len));
            }
            SuspEntry::Er {
                ext_ver,
                id,
                desc,
                src,
            } => {
                out.push(id.len() as u8);
                out.push(desc.len() as u8);
                out.push(src.len() as u8);
                out.push(*ext_ver);
                out.extend_from_slice(id);
                out.extend_from_slice(desc);
                out.extend_from_slice(src);
            }
            SuspEntry::Es { seq } => out.push(*seq),
            SuspEntry::Rr { flags } => out.push(*flags),
            SuspEntry::Px {
                mode,
                nlinks,
                uid,
                gid,
                ino,
            } => {
                out.extend_from_slice(&encode_both32(*mode));
                out.extend_from_slice(&encode_both32(*nlinks));
                out.extend_from_slice(&encode_both32(*uid));
                out.extend_from_slice(&encode_both32(*gid));
                if let Some(ino) = ino {
                    out.extend_from_slice(&encode_both32(*ino));
                }
            }
            SuspEntry::Pn { dev_high, dev_low } => {
                out.extend_from_slice(&encode_both32(*dev_high));
                out.extend_from_slice(&encode_both32(*dev_low));
            }
            SuspEntry::Sl { flags, components } => {
                out.push(*flags);
                for c in components {
                    out.push(c.flags);
                    out.push(c.content.len() as u8);
                    out.extend_from_slice(&c.content);
                }
            }
            SuspEntry::Nm { flags, name } => {
                out.push(*flags);
                out.extend_from_slice(name);
            }
            SuspEntry::Cl { child_extent } => {
                out.extend_from_slice(&encode_both32(*child_extent));
            }
            SuspEntry::Pl { parent_extent } => {
                out.extend_from_slice(&encode_both32(*parent_extent));
            }
            SuspEntry::Re | SuspEntry::St => {}
            SuspEntry::Tf { flags, short, long } => {
                out.push(flags.bits());
                for d in short {
                    out.extend_from_slice(&d.to_bytes());
                }
                for d in long {
                    out.extend_from_slice(&d.to_bytes());
                }
            }
            SuspEntry::Sf {
                size_high,
                size_low,
                table_depth,
            } => {
                out.extend_from_slice(&encode_both32(*size_high));
                out.extend_from_slice(&encode_both32(*size_low));
                out.push(*table_depth);
            }
            SuspEntry::Unknown { data, .. } => out.extend_from_slice(data),
        }

        debug_assert_eq!(out.len() - start, self.len());
    }

    fn parse_one(b: &[u8], block: u64, off: u32) -> IsoResult<Self> {
        let sig = [b[0], b[1]];
        let version = b[3];
        let body = &b[4..];

        // Fixed minimum body length per tag; shorter entries are refused
        // before any field access.
        let min_body = match &sig {
            b"SP" => 3,
            b"CE" => 24,
            b"ER" => 4,
            b"ES" | b"RR" | b"SL" | b"NM" | b"TF" => 1,
            b"PX" => 32,
            b"PN" => 16,
            b"CL" | b"PL" => 8,
            b"SF" => 17,
            _ => 0,
        };
        if body.len() < min_body {
            return Err(malformed("system-use entry too short", block, off));
        }

        let entry = match &sig {
            b"SP" => {
                if body.len() < 3 || body[0] != 0xBE || body[1] != 0xEF {
                    return Err(malformed("bad SP check bytes", block, off));
                }
                SuspEntry::Sp { skip: body[2] }
            }
            b"CE" => SuspEntry::Ce {
                extent: decode_both32(&body[0..8], block, off)?,
                offset: decode_both32(&body[8..16], block, off)?,
                len: decode_both32(&body[16..24], block, off)?,
            },
            b"ER" => {
                let (li, ld, ls) = (body[0] as usize, body[1] as usize, body[2] as usize);
                if 4 + li + ld + ls > body.len() {
                    return Err(malformed("ER lengths exceed entry", block, off));
                }
                SuspEntry::Er {
                    ext_ver: body[3],
                    id: body[4..4 + li].to_vec(),
                    desc: body[4 + li..4 + li + ld].to_vec(),
                    src: body[4 + li + ld..4 + li + ld + ls].to_vec(),
                }
            }
            b"ES" => SuspEntry::Es { seq: body[0] },
            b"RR" => SuspEntry::Rr { flags: body[0] },
            b"PX" => SuspEntry::Px {
                mode: decode_both32(&body[0..8], block, off)?,
                nlinks: decode_both32(&body[8..16], block, off)?,
                uid: decode_both32(&body[16..24], block, off)?,
                gid: decode_both32(&body[24..32], block, off)?,
                ino: if body.len() >= 40 {
                    Some(decode_both32(&body[32..40], block, off)?)
                } else {
                    None
                },
            },
            b"PN" => SuspEntry::Pn {
                dev_high: decode_both32(&body[0..8], block, off)?,
                dev_low: decode_both32(&body[8..16], block, off)?,
            },
            b"SL" => {
                let mut components = vec![];
                let mut pos = 1;
                while pos + 2 <= body.len() {
                    let clen = body[pos + 1] as usize;
                    if pos + 2 + clen > body.len() {
                        return Err(malformed("SL component exceeds entry", block, off));
                    }
                    components.push(SlComponent {
                        flags: body[pos],
                        content: body[pos + 2..pos + 2 + clen].to_vec(),
                    });
                    pos += 2 + clen;
                }
                SuspEntry::Sl {
                    flags: body[0],
                    components,
                }
            }
            b"NM" => SuspEntry::Nm {
                flags: body[0],
                name: body[1..].to_vec(),
            },
            b"CL" => SuspEntry::Cl {
                child_extent: decode_both32(&body[0..8], block, off)?,
            },
            b"PL" => SuspEntry::Pl {
                parent_extent: decode_both32(&body[0..8], block, off)?,
            },
            b"RE" => SuspEntry::Re,
            b"TF" => {
                let flags = TfFlags::from_bits_retain(body[0]);
                let count = (flags.bits() & 0x7F).count_ones() as usize;
                let mut short = vec![];
                let mut long = vec![];
                let mut pos = 1;
                for _ in 0..count {
                    if flags.contains(TfFlags::LONG_FORM) {
                        if pos + 17 > body.len() {
                            return Err(malformed("TF stamps exceed entry", block, off));
                        }
                        long.push(VolumeDate::from_bytes(
                            body[pos..pos + 17].try_into().unwrap(),
                            block,
                            off,
                        )?);
                        pos += 17;
                    } else {
                        if pos + 7 > body.len() {
                            return Err(malformed("TF stamps exceed entry", block, off));
                        }
                        short.push(RecordDate::from_bytes(body[pos..pos + 7].try_into().unwrap()));
                        pos += 7;
                    }
                }
                SuspEntry::Tf { flags, short, long }
            }
            b"SF" => SuspEntry::Sf {
                size_high: decode_both32(&body[0..8], block, off)?,
                size_low: decode_both32(&body[8..16], block, off)?,
                table_depth: body[16],
            },
            b"ST" => SuspEntry::St,
            _ => SuspEntry::Unknown {
                sig,
                version,
                data: body.to_vec(),
            },
        };
        Ok(entry)
    }
}

/// Parses a system-use area into its entries.
///
/// Stops at an ST entry or when fewer than 4 bytes remain (pad).
pub fn parse_system_use(area: &[u8], block: u64, off: u32) -> IsoResult<Vec<SuspEntry>> {
    let mut entries = vec![];
    let mut pos = 0;

    while area.len() - pos >= 4 {
        let len = area[pos + 2] as usize;
        if len < 4 || pos + len > area.len() {
            return Err(malformed(
                "system-use entry length out of range",
                block,
                off + pos as u32,
            ));
        }
        let entry = SuspEntry::parse_one(&area[pos..pos + len], block, off + pos as u32)?;
        pos += len;
        let stop = matches!(entry, SuspEntry::St);
        entries.push(entry);
        if stop {
            break;
        }
    }

    Ok(entries)
}

/// Encodes a slice of entries back to bytes.
pub fn encode_entries(entries: &[SuspEntry]) -> Vec<u8> {
    let mut out = vec![];
    for e in entries {
        e.emit(&mut out);
    }
    out
}

/// Greedy split of an entry list into the in-record part and the
/// continuation-area spill.
///
/// When everything fits in `avail` bytes the spill is empty.
/// Otherwise the in-record part reserves space for the CE entry the
/// caller will append once the continuation area has an extent.
pub struct SuspPacking {
    pub in_record: Vec<SuspEntry>,
    pub spill: Vec<SuspEntry>,
}

impl SuspPacking {
    pub fn plan(entries: Vec<SuspEntry>, avail: usize) -> Self {
        let total: usize = entries.iter().map(SuspEntry::len).sum();
        if total <= avail {
            return Self {
                in_record: entries,
                spill: vec![],
            };
        }

        let room = avail.saturating_sub(CE_LEN);
        let mut in_record = vec![];
        let mut spill = vec![];
        let mut used = 0;

        for e in entries {
            if spill.is_empty() && used + e.len() <= room {
                used += e.len();
                in_record.push(e);
            } else {
                spill.push(e);
            }
        }

        Self { in_record, spill }
    }

    /// Bytes the in-record part will occupy, including the CE entry.
    pub fn in_record_len(&self) -> usize {
        let n: usize = self.in_record.iter().map(SuspEntry::len).sum();
        if self.spill.is_empty() { n } else { n + CE_LEN }
    }

    /// Bytes the spill will occupy in the continuation area.
    pub fn spill_len(&self) -> usize {
        self.spill.iter().map(SuspEntry::len).sum()
    }
}

// === Rock Ridge aggregate view ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RrVersion {
    #[default]
    V1_09,
    V1_12,
}

/// The Rock Ridge attributes of one directory record, reconstructed
/// from (or generating) its SUSP entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RockRidge {
    pub version: RrVersion,
    /// Full Rock Ridge name; NM entries concatenated in order.
    pub name: Option<String>,
    pub mode: u32,
    pub nlinks: u32,
    pub uid: u32,
    pub gid: u32,
    pub ino: Option<u32>,
    pub dev: Option<(u32, u32)>,
    pub symlink_target: Option<String>,
    pub tf_creation: Option<RecordDate>,
    pub tf_modify: Option<RecordDate>,
    pub tf_access: Option<RecordDate>,
    pub tf_attributes: Option<RecordDate>,
    /// RE entry: this directory was relocated out of a deep tree.
    pub relocated: bool,
    /// CL entry: placeholder pointing at the relocated directory.
    pub child_link: Option<u32>,
    /// PL entry: the relocated directory's real parent (on "..").
    pub parent_link: Option<u32>,
    pub sparse: Option<(u32, u32, u8)>,
}

impl RockRidge {
    pub fn new_file(version: RrVersion, name: &str, mode: u32) -> Self {
        let now = RecordDate::now();
        Self {
            version,
            name: Some(name.to_string()),
            mode,
            nlinks: 1,
            uid: 0,
            gid: 0,
            tf_modify: Some(now),
            tf_access: Some(now),
            tf_attributes: Some(now),
            ..Self::default()
        }
    }

    pub fn new_dir(version: RrVersion, name: &str, mode: u32) -> Self {
        let mut rr = Self::new_file(version, name, mode);
        rr.nlinks = 2;
        rr
    }

    /// Folds parsed entries (record area plus any CE continuations)
    /// into the aggregate view.
    pub fn from_entries(entries: &[SuspEntry]) -> Self {
        let mut rr = Self::default();
        let mut symlink: Vec<u8> = vec![];
        let mut sl_continue = false;

        for e in entries {
            match e {
                SuspEntry::Px {
                    mode,
                    nlinks,
                    uid,
                    gid,
                    ino,
                } => {
                    rr.mode = *mode;
                    rr.nlinks = *nlinks;
                    rr.uid = *uid;
                    rr.gid = *gid;
                    rr.ino = *ino;
                    if ino.is_some() {
                        rr.version = RrVersion::V1_12;
                    }
                }
                SuspEntry::Pn { dev_high, dev_low } => rr.dev = Some((*dev_high, *dev_low)),
                SuspEntry::Nm { flags: _, name } => {
                    // NM entries concatenate in order; the CONTINUE flag
                    // only announces that more follow.
                    let text = String::from_utf8_lossy(name);
                    match &mut rr.name {
                        Some(n) => n.push_str(&text),
                        None => rr.name = Some(text.into_owned()),
                    }
                }
                SuspEntry::Sl { components, .. } => {
                    for c in components {
                        if c.flags & SlComponent::ROOT != 0 {
                            symlink.clear();
                            symlink.push(b'/');
                            sl_continue = false;
                            continue;
                        }
                        if !sl_continue
                            && !symlink.is_empty()
                            && symlink.last() != Some(&b'/')
                        {
                            symlink.push(b'/');
                        }
                        if c.flags & SlComponent::CURRENT != 0 {
                            symlink.push(b'.');
                        } else if c.flags & SlComponent::PARENT != 0 {
                            symlink.extend_from_slice(b"..");
                        } else {
                            symlink.extend_from_slice(&c.content);
                        }
                        sl_continue = c.flags & SlComponent::CONTINUE != 0;
                    }
                }
                SuspEntry::Cl { child_extent } => rr.child_link = Some(*child_extent),
                SuspEntry::Pl { parent_extent } => rr.parent_link = Some(*parent_extent),
                SuspEntry::Re => rr.relocated = true,
                SuspEntry::Tf { flags, short, .. } => {
                    let mut it = short.iter();
                    if flags.contains(TfFlags::CREATION) {
                        rr.tf_creation = it.next().copied();
                    }
                    if flags.contains(TfFlags::MODIFY) {
                        rr.tf_modify = it.next().copied();
                    }
                    if flags.contains(TfFlags::ACCESS) {
                        rr.tf_access = it.next().copied();
                    }
                    if flags.contains(TfFlags::ATTRIBUTES) {
                        rr.tf_attributes = it.next().copied();
                    }
                }
                SuspEntry::Sf {
                    size_high,
                    size_low,
                    table_depth,
                } => rr.sparse = Some((*size_high, *size_low, *table_depth)),
                SuspEntry::Er { id, .. } => {
                    if id.as_slice() == crate::fs::iso::constant::RR_ER_ID_112 {
                        rr.version = RrVersion::V1_12;
                    }
                }
                _ => {}
            }
        }

        if !symlink.is_empty() {
            rr.symlink_target = Some(String::from_utf8_lossy(&symlink).into_owned());
        }
        rr
    }

    fn rr_flags(&self) -> u8 {
        let mut f = 0u8;
        f |= 0x01; // PX always present
        if self.dev.is_some() {
            f |= 0x02;
        }
        if self.symlink_target.is_some() {
            f |= 0x04;
        }
        if self.name.is_some() {
            f |= 0x08;
        }
        if self.child_link.is_some() {
            f |= 0x10;
        }
        if self.parent_link.is_some() {
            f |= 0x20;
        }
        if self.relocated {
            f |= 0x40;
        }
        f |= 0x80; // TF always present
        f
    }

    fn tf_entry(&self) -> SuspEntry {
        let mut flags = TfFlags::empty();
        let mut short = vec![];
        for (bit, stamp) in [
            (TfFlags::CREATION, self.tf_creation),
            (TfFlags::MODIFY, self.tf_modify),
            (TfFlags::ACCESS, self.tf_access),
            (TfFlags::ATTRIBUTES, self.tf_attributes),
        ] {
            if let Some(d) = stamp {
                flags |= bit;
                short.push(d);
            }
        }
        SuspEntry::Tf {
            flags,
            short,
            long: vec![],
        }
    }

    fn sl_entries(&self) -> Vec<SuspEntry> {
        let Some(target) = &self.symlink_target else {
            return vec![];
        };

        let mut components = vec![];
        let bytes = target.as_bytes();
        let absolute = bytes.first() == Some(&b'/');
        if absolute {
            components.push(SlComponent {
                flags: SlComponent::ROOT,
                content: vec![],
            });
        }
        for part in target.split('/') {
            if part.is_empty() {
                continue;
            }
            match part {
                "." => components.push(SlComponent {
                    flags: SlComponent::CURRENT,
                    content: vec![],
                }),
                ".." => components.push(SlComponent {
                    flags: SlComponent::PARENT,
                    content: vec![],
                }),
                name => {
                    // Long components are split with the CONTINUE flag.
                    let chunks: Vec<&[u8]> = name.as_bytes().chunks(SL_MAX_COMPONENT).collect();
                    for (i, chunk) in chunks.iter().enumerate() {
                        components.push(SlComponent {
                            flags: if i + 1 < chunks.len() {
                                SlComponent::CONTINUE
                            } else {
                                0
                            },
                            content: chunk.to_vec(),
                        });
                    }
                }
            }
        }

        // Split the component list across SL entries when too long.
        let mut entries: Vec<SuspEntry> = vec![];
        let mut current: Vec<SlComponent> = vec![];
        let mut current_len = 5;
        for c in components {
            if current_len + c.len() > 255 {
                entries.push(SuspEntry::Sl {
                    flags: SuspEntry::SL_CONTINUE,
                    components: core::mem::take(&mut current),
                });
                current_len = 5;
            }
            current_len += c.len();
            current.push(c);
        }
        entries.push(SuspEntry::Sl {
            flags: 0,
            components: current,
        });
        entries
    }

    fn nm_entries(&self) -> Vec<SuspEntry> {
        let Some(name) = &self.name else {
            return vec![];
        };
        let chunks: Vec<&[u8]> = name.as_bytes().chunks(NM_MAX_NAME).collect();
        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| SuspEntry::Nm {
                flags: if i + 1 < chunks.len() {
                    SuspEntry::NM_CONTINUE
                } else {
                    0
                },
                name: chunk.to_vec(),
            })
            .collect()
    }

    /// Generates the ordered entry list for one directory record.
    ///
    /// `root_dot` marks the "." record of the root directory, which
    /// carries the SP indicator and the ER extension reference.
    pub fn to_entries(&self, root_dot: bool) -> Vec<SuspEntry> {
        let mut entries = vec![];

        if root_dot {
            entries.push(SuspEntry::Sp { skip: 0 });
        }
        if self.version == RrVersion::V1_09 {
            entries.push(SuspEntry::Rr {
                flags: self.rr_flags(),
            });
        }
        entries.push(SuspEntry::Px {
            mode: self.mode,
            nlinks: self.nlinks,
            uid: self.uid,
            gid: self.gid,
            ino: if self.version == RrVersion::V1_12 {
                self.ino.or(Some(0))
            } else {
                None
            },
        });
        if let Some((dev_high, dev_low)) = self.dev {
            entries.push(SuspEntry::Pn { dev_high, dev_low });
        }
        entries.extend(self.sl_entries());
        entries.extend(self.nm_entries());
        if let Some(child_extent) = self.child_link {
            entries.push(SuspEntry::Cl { child_extent });
        }
        if let Some(parent_extent) = self.parent_link {
            entries.push(SuspEntry::Pl { parent_extent });
        }
        if self.relocated {
            entries.push(SuspEntry::Re);
        }
        entries.push(self.tf_entry());
        if let Some((size_high, size_low, table_depth)) = self.sparse {
            entries.push(SuspEntry::Sf {
                size_high,
                size_low,
                table_depth,
            });
        }
        if root_dot {
            use crate::fs::iso::constant::*;
            let (id, desc, src) = match self.version {
                RrVersion::V1_09 => (RR_ER_ID, RR_ER_DESC, RR_ER_SRC),
                RrVersion::V1_12 => (RR_ER_ID_112, RR_ER_DESC_112, RR_ER_SRC_112),
            };
            entries.push(SuspEntry::Er {
                ext_ver: 1,
                id: id.to_vec(),
                desc: desc.to_vec(),
                src: src.to_vec(),
            });
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_roundtrip() {
        let entries = vec![
            SuspEntry::Sp { skip: 0 },
            SuspEntry::Px {
                mode: 0o100644,
                nlinks: 1,
                uid: 1000,
                gid: 100,
                ino: None,
            },
            SuspEntry::Nm {
                flags: 0,
                name: b"hello.txt".to_vec(),
            },
            SuspEntry::Tf {
                flags: TfFlags::MODIFY | TfFlags::ACCESS,
                short: vec![RecordDate::default(), RecordDate::default()],
                long: vec![],
            },
        ];
        let bytes = encode_entries(&entries);
        let back = parse_system_use(&bytes, 0, 0).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn test_px_112_roundtrip() {
        let e = SuspEntry::Px {
            mode: 0o40755,
            nlinks: 2,
            uid: 0,
            gid: 0,
            ino: Some(42),
        };
        assert_eq!(e.len(), 44);
        let bytes = encode_entries(core::slice::from_ref(&e));
        assert_eq!(parse_system_use(&bytes, 0, 0).unwrap(), vec![e]);
    }

    #[test]
    fn test_unknown_entry_preserved() {
        let e = SuspEntry::Unknown {
            sig: *b"AA",
            version: 1,
            data: vec![1, 2, 3, 4],
        };
        let bytes = encode_entries(core::slice::from_ref(&e));
        assert_eq!(parse_system_use(&bytes, 0, 0).unwrap(), vec![e]);
    }

    #[test]
    fn test_nm_split_reconstructs() {
        let long_name: String = core::iter::repeat('x').take(600).collect();
        let rr = RockRidge {
            name: Some(long_name.clone()),
            ..RockRidge::default()
        };
        let nm = rr.nm_entries();
        assert_eq!(nm.len(), 3);
        let back = RockRidge::from_entries(&nm);
        assert_eq!(back.name.as_deref(), Some(long_name.as_str()));
    }

    #[test]
    fn test_symlink_roundtrip() {
        for target in ["/usr/share/doc", "../sibling/file", "a/b/./c"] {
            let rr = RockRidge {
                symlink_target: Some(target.to_string()),
                ..RockRidge::default()
            };
            let back = RockRidge::from_entries(&rr.sl_entries());
            assert_eq!(back.symlink_target.as_deref(), Some(target), "{target}");
        }
    }

    #[test]
    fn test_packing_spills_with_ce_reserve() {
        let entries = vec![
            SuspEntry::Px {
                mode: 0,
                nlinks: 1,
                uid: 0,
                gid: 0,
                ino: None,
            },
            SuspEntry::Nm {
                flags: 0,
                name: vec![b'n'; 100],
            },
            SuspEntry::Re,
        ];
        let packing = SuspPacking::plan(entries.clone(), 70);
        assert_eq!(packing.in_record, vec![entries[0].clone()]);
        assert_eq!(packing.spill.len(), 2);
        assert!(packing.in_record_len() <= 70);
        assert_eq!(packing.in_record_len(), 36 + 28);
        assert_eq!(packing.spill_len(), 105 + 4);

        let all_fit = SuspPacking::plan(entries, 200);
        assert!(all_fit.spill.is_empty());
        assert_eq!(all_fit.in_record_len(), 36 + 105 + 4);
    }

    #[test]
    fn test_to_entries_root_dot_carries_sp_and_er() {
        let rr = RockRidge::new_dir(RrVersion::V1_09, "", 0o555);
        let mut rr = rr;
        rr.name = None;
        let entries = rr.to_entries(true);
        assert!(matches!(entries.first(), Some(SuspEntry::Sp { .. })));
        assert!(matches!(entries.last(), Some(SuspEntry::Er { .. })));
        assert!(entries.iter().any(|e| matches!(e, SuspEntry::Rr { .. })));
    }
}
