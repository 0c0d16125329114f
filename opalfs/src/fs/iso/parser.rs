// SPDX-License-Identifier: MIT

//! The image parser.
//!
//! Materialises the node model from an input image in sequential
//! phases: volume descriptor scan, primary hierarchy, Joliet
//! hierarchy, boot catalog, UDF chain, and finally the Rock Ridge
//! relocation resolve. Any violation of the standards raises a
//! malformed-iso error carrying the failing block.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{collections::BTreeMap, string::String, vec, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use opalio::OpalIO;
use tracing::debug;

use crate::core::error::*;
use crate::fs::iso::constant::*;
use crate::fs::iso::image::{ElTorito, VolumeState};
use crate::fs::iso::meta::{IsoMeta, IsoOpts};
use crate::fs::iso::node::*;
use crate::fs::iso::types::dr::{DirRecord, DirStream, FileFlags};
use crate::fs::iso::types::eltorito::BootCatalog;
use crate::fs::iso::types::susp::{RockRidge, RrVersion, SuspEntry, parse_system_use};
use crate::fs::iso::types::udf::{self, Avdp, FileEntry, FileIdent};
use crate::fs::iso::types::vd::{BootRecordVd, PartitionVd, Pvd, VolumeDescriptor};

/// Upper bound on the descriptor scan, far beyond any real image.
const MAX_VDS: u64 = 64;

pub struct IsoParser<'a, IO: OpalIO + ?Sized> {
    io: &'a mut IO,
}

impl<'a, IO: OpalIO + ?Sized> IsoParser<'a, IO> {
    pub fn new(io: &'a mut IO) -> Self {
        Self { io }
    }

    fn read_block(&mut self, block: u64) -> IsoResult<Vec<u8>> {
        let mut buf = vec![0u8; ISO_BLOCK_SIZE];
        self.io.read_at(extent_offset(block), &mut buf)?;
        Ok(buf)
    }

    fn read_extent_data(&mut self, extent: u32, len: u64, block: u64) -> IsoResult<Vec<u8>> {
        let blocks = blocks_for(len);
        let mut buf = vec![0u8; (blocks as usize) * ISO_BLOCK_SIZE];
        self.io
            .read_at(extent_offset(extent as u64), &mut buf)
            .map_err(|_| malformed("extent beyond end of image", block, 0))?;
        Ok(buf)
    }

    /// Phase 1: classify descriptors from block 16 to the terminator.
    fn scan_descriptors(
        &mut self,
    ) -> IsoResult<(Pvd, Option<Pvd>, Vec<BootRecordVd>, Vec<PartitionVd>)> {
        let mut pvd = None;
        let mut svd = None;
        let mut boots = vec![];
        let mut partitions = vec![];

        for block in ISO_VD_START_BLOCK..ISO_VD_START_BLOCK + MAX_VDS {
            let data = self.read_block(block)?;
            match VolumeDescriptor::parse(&data, block)? {
                VolumeDescriptor::Primary(vd) => {
                    if pvd.is_none() {
                        pvd = Some(vd);
                    }
                }
                VolumeDescriptor::Supplementary(vd) => {
                    if svd.is_none() && vd.is_joliet() {
                        svd = Some(vd);
                    }
                }
                VolumeDescriptor::BootRecord(vd) => boots.push(vd),
                VolumeDescriptor::Partition(vd) => partitions.push(vd),
                VolumeDescriptor::Terminator => {
                    let pvd = pvd.ok_or(malformed(
                        "no primary volume descriptor before terminator",
                        block,
                        0,
                    ))?;
                    return Ok((pvd, svd, boots, partitions));
                }
            }
        }
        Err(malformed(
            "volume descriptor set has no terminator",
            ISO_VD_START_BLOCK + MAX_VDS,
            0,
        ))
    }

    /// Reads a record's full SUSP entry list, following CE chains.
    fn read_susp(
        &mut self,
        record: &DirRecord,
        skip: usize,
        block: u64,
        offset: u32,
    ) -> IsoResult<Vec<SuspEntry>> {
        if record.system_use.len() <= skip {
            return Ok(vec![]);
        }
        let mut entries = parse_system_use(&record.system_use[skip..], block, offset)?;

        // Follow continuation areas; bounded to keep malformed chains
        // from looping.
        let mut hops = 0;
        loop {
            let ce = entries.iter().find_map(|e| match e {
                SuspEntry::Ce {
                    extent,
                    offset,
                    len,
                } => Some((*extent, *offset, *len)),
                _ => None,
            });
            let Some((extent, ce_off, len)) = ce else {
                break;
            };
            entries.retain(|e| !matches!(e, SuspEntry::Ce { .. }));

            hops += 1;
            if hops > 32 {
                return Err(malformed("susp continuation chain too long", block, offset));
            }

            let data = self.read_extent_data(extent, (ce_off + len) as u64, block)?;
            let slice = &data[ce_off as usize..(ce_off + len) as usize];
            entries.extend(parse_system_use(slice, extent as u64, ce_off)?);
        }
        Ok(entries)
    }

    /// Phase 2: BFS over the primary hierarchy.
    fn parse_iso_tree(&mut self, st: &mut VolumeState) -> IsoResult<bool> {
        let root_extent = st.pvd.root.extent;
        let root_len = st.pvd.root.data_len;
        {
            let view = st.arena.node_mut(st.arena.iso_root).iso.as_mut().unwrap();
            view.extent = root_extent;
            view.data_len = root_len;
            view.date = st.pvd.root.date;
        }

        let mut rock_ridge = false;
        let mut sp_skip = 0usize;
        let mut queue = vec![(st.arena.iso_root, root_extent, root_len, 1usize)];
        let mut seen_extents = vec![root_extent];

        while let Some((dir_id, extent, len, depth)) = queue.pop() {
            // `depth` counts the root as level 1, so 8 directory
            // components below the root are still in bounds.
            if depth > ISO_MAX_DEPTH + 1 && !rock_ridge {
                return Err(malformed(
                    "directory deeper than 8 without rock ridge",
                    extent as u64,
                    0,
                ));
            }

            let data = self.read_extent_data(extent, len as u64, extent as u64)?;
            let mut pending_me: Option<(DirRecord, u64, u32)> = None;

            for item in DirStream::new(&data[..len as usize], extent as u64) {
                let (record, rec_block, rec_off) = item?;

                if record.is_dot() || record.is_dotdot() {
                    if record.is_dot() {
                        // SP on the root "." announces SUSP; its absence
                        // elsewhere is a documented cdrkit deviation.
                        let entries = self.read_susp(&record, 0, rec_block, rec_off)?;
                        if dir_id == st.arena.iso_root {
                            if let Some(SuspEntry::Sp { skip }) = entries
                                .iter()
                                .find(|e| matches!(e, SuspEntry::Sp { .. }))
                            {
                                rock_ridge = true;
                                sp_skip = *skip as usize;
                            }
                            if rock_ridge {
                                let rr = RockRidge::from_entries(&entries);
                                if let Some(v) = st.arena.node_mut(dir_id).iso.as_mut() {
                                    v.rr = Some(rr);
                                }
                            }
                        } else if rock_ridge {
                            let rr = RockRidge::from_entries(&entries);
                            if let Some(v) = st.arena.node_mut(dir_id).iso.as_mut()
                                && let Some(existing) = v.rr.as_mut()
                            {
                                existing.relocated = rr.relocated;
                            }
                        }
                    }
                    continue;
                }

                // Multi-extent files arrive as a run of records sharing
                // an identifier; only the last clears the flag.
                let record = if let Some((mut first, _b, _o)) = pending_me.take() {
                    if record.ident != first.ident
                        || first.extent + blocks_for(first.data_len as u64) as u32 != record.extent
                    {
                        return Err(malformed(
                            "non-contiguous multi-extent file",
                            rec_block,
                            rec_off,
                        ));
                    }
                    first.data_len += record.data_len;
                    first.flags = record.flags;
                    first
                } else {
                    record
                };
                if record.flags.contains(FileFlags::MULTI_EXTENT) {
                    pending_me = Some((record, rec_block, rec_off));
                    continue;
                }

                let rr = if rock_ridge {
                    let entries = self.read_susp(&record, sp_skip, rec_block, rec_off)?;
                    Some(RockRidge::from_entries(&entries))
                } else {
                    None
                };

                let is_dir = record.is_dir();
                // A CL placeholder's extent aliases the relocated
                // directory, which is reached through its storage
                // parent instead.
                let is_placeholder = rr.as_ref().is_some_and(|r| r.child_link.is_some());
                let mut node = Node::new(if is_dir { NodeKind::Dir } else { NodeKind::File });

                if !is_dir && rr.as_ref().is_none_or(|r| r.symlink_target.is_none()) {
                    let pid = image_payload(&mut st.arena, record.extent, record.data_len as u64);
                    node.payload = Some(pid);
                }

                node.iso = Some(IsoView {
                    ident: record.ident.clone(),
                    rr,
                    extent: record.extent,
                    data_len: record.data_len,
                    date: record.date,
                    dr_loc: Some((rec_block, rec_off)),
                    ..IsoView::default()
                });

                let id = st.arena.alloc(node);
                st.arena.insert_child(dir_id, id, Namespace::Iso9660)?;

                if is_dir && !is_placeholder {
                    if seen_extents.contains(&record.extent) {
                        return Err(malformed("directory cycle", rec_block, rec_off));
                    }
                    seen_extents.push(record.extent);
                    queue.push((id, record.extent, record.data_len, depth + 1));
                }
            }

            if pending_me.is_some() {
                return Err(malformed(
                    "multi-extent run without final record",
                    extent as u64,
                    0,
                ));
            }
        }

        Ok(rock_ridge)
    }

    /// Phase 3: Joliet hierarchy, attached to existing nodes by
    /// (extent, length) identity.
    fn parse_joliet_tree(&mut self, st: &mut VolumeState) -> IsoResult<()> {
        let Some(svd) = st.svd.clone() else {
            return Ok(());
        };

        // Identity map over the primary hierarchy's payloads.
        let mut by_extent: BTreeMap<(u32, u32), NodeId> = BTreeMap::new();
        for id in st.arena.ids().collect::<Vec<_>>() {
            let node = st.arena.node(id);
            if let (Some(view), false) = (node.iso.as_ref(), node.is_dir()) {
                by_extent.insert((view.extent, view.data_len), id);
            }
        }

        let joliet_root = st.arena.iso_root;
        st.arena.joliet_root = Some(joliet_root);
        {
            let node = st.arena.node_mut(joliet_root);
            node.joliet = Some(JolietView {
                extent: svd.root.extent,
                data_len: svd.root.data_len,
                date: svd.root.date,
                ..JolietView::default()
            });
        }

        let mut queue = vec![(joliet_root, svd.root.extent, svd.root.data_len)];
        let mut seen = vec![svd.root.extent];

        while let Some((dir_id, extent, len)) = queue.pop() {
            let data = self.read_extent_data(extent, len as u64, extent as u64)?;
            for item in DirStream::new(&data[..len as usize], extent as u64) {
                let (record, rec_block, rec_off) = item?;
                if record.is_dot() || record.is_dotdot() {
                    continue;
                }

                let is_dir = record.is_dir();
                let view = JolietView {
                    ident: record.ident.clone(),
                    extent: record.extent,
                    data_len: record.data_len,
                    date: record.date,
                    dr_loc: Some((rec_block, rec_off)),
                    ..JolietView::default()
                };

                let id = if !is_dir {
                    if let Some(&known) = by_extent.get(&(record.extent, record.data_len)) {
                        st.arena.node_mut(known).joliet = Some(view);
                        known
                    } else {
                        // Joliet-only file.
                        let mut node = Node::new(NodeKind::File);
                        let pid =
                            image_payload(&mut st.arena, record.extent, record.data_len as u64);
                        node.payload = Some(pid);
                        node.joliet = Some(view);
                        st.arena.alloc(node)
                    }
                } else {
                    let mut node = Node::new(NodeKind::Dir);
                    node.joliet = Some(view);
                    st.arena.alloc(node)
                };
                st.arena.insert_child(dir_id, id, Namespace::Joliet)?;

                if is_dir {
                    if seen.contains(&record.extent) {
                        return Err(malformed("directory cycle", rec_block, rec_off));
                    }
                    seen.push(record.extent);
                    queue.push((id, record.extent, record.data_len));
                }
            }
        }
        Ok(())
    }

    /// Phase 4: boot catalog.
    fn parse_eltorito(&mut self, st: &mut VolumeState, boots: Vec<BootRecordVd>) -> IsoResult<()> {
        let Some(vd) = boots.into_iter().find(|b| b.is_eltorito()) else {
            return Ok(());
        };

        let extent = vd.catalog_extent;
        let data = self.read_block(extent as u64)?;
        let catalog = BootCatalog::parse(&data, extent as u64)?;

        let mut entry_nodes = vec![];
        for entry in catalog.entries() {
            let node = st.arena.ids().find(|&id| {
                let n = st.arena.node(id);
                n.payload
                    .map(|p| st.arena.payload(p))
                    .is_some_and(|p| matches!(p.source, PayloadSource::Image { extent: e } if e == entry.load_rba))
            });
            entry_nodes.push(node);
        }

        let catalog_node = st.arena.ids().find(|&id| {
            st.arena
                .node(id)
                .iso
                .as_ref()
                .is_some_and(|v| v.extent == extent && !st.arena.node(id).is_dir())
        });

        st.eltorito = Some(ElTorito {
            catalog,
            catalog_extent: extent,
            catalog_node,
            entry_nodes,
        });
        st.boot_vd = Some(vd);
        Ok(())
    }

    /// Phase 5: UDF hierarchy.
    fn parse_udf(&mut self, st: &mut VolumeState) -> IsoResult<()> {
        let anchor_off = extent_offset(UDF_ANCHOR_BLOCK);
        if self.io.len()? < anchor_off + 512 {
            return Ok(());
        }
        let block = self.read_block(UDF_ANCHOR_BLOCK)?;
        if block.iter().all(|&b| b == 0) {
            return Ok(());
        }
        let avdp = Avdp::parse(&block, UDF_ANCHOR_BLOCK)?;

        // Walk the main volume descriptor sequence.
        let mut partition_start = None;
        let mut partition_len = 0;
        let mut recording_time = udf::UdfTimestamp::default();
        let mut fsd_ad = None;
        let mut vol_ident = String::new();
        for i in 0..blocks_for(avdp.main_vds.len as u64) {
            let loc = avdp.main_vds.pos as u64 + i;
            let data = self.read_block(loc)?;
            if data.iter().all(|&b| b == 0) {
                continue;
            }
            let tag = udf::DescriptorTag::parse(&data, loc)?;
            match tag.tag_id {
                UDF_TAG_PVD => {
                    recording_time = udf::UdfTimestamp::parse(&data[376..388]);
                }
                UDF_TAG_PD => {
                    partition_start =
                        Some(u32::from_le_bytes(data[188..192].try_into().unwrap()));
                    partition_len = u32::from_le_bytes(data[192..196].try_into().unwrap());
                    if !data[25..30].starts_with(b"+NSR") {
                        return Err(malformed("unsupported udf partition contents", loc, 24));
                    }
                }
                UDF_TAG_LVD => {
                    fsd_ad = Some(udf::LongAd::parse(&data[248..264]));
                    if data[440] != 1 {
                        return Err(malformed("unsupported udf partition map type", loc, 440));
                    }
                    vol_ident = udf::decode_dstring(&data[84..212]).unwrap_or_default();
                }
                UDF_TAG_TD => break,
                _ => {}
            }
        }

        let partition_start =
            partition_start.ok_or(malformed("udf sequence without partition", 0, 0))?;
        let fsd_ad = fsd_ad.ok_or(malformed("udf sequence without logical volume", 0, 0))?;

        let fsd_block = partition_start as u64 + fsd_ad.block as u64;
        let fsd = self.read_block(fsd_block)?;
        let root_icb = udf::parse_udf_fsd(&fsd, fsd_block)?;

        let mut ctx = udf::UdfContext::new(&vol_ident);
        ctx.partition_start = partition_start;
        ctx.partition_len = partition_len;
        ctx.recording_time = recording_time;
        st.udf = Some(ctx);
        st.meta.udf = true;

        // Identity map for hard-link joins.
        let mut by_extent: BTreeMap<(u32, u32), NodeId> = BTreeMap::new();
        for id in st.arena.ids().collect::<Vec<_>>() {
            let node = st.arena.node(id);
            if let (Some(view), false) = (node.iso.as_ref(), node.is_dir()) {
                by_extent.insert((view.extent, view.data_len), id);
            } else if let (Some(view), false) = (node.joliet.as_ref(), node.is_dir()) {
                by_extent.insert((view.extent, view.data_len), id);
            }
        }

        let udf_root = st.arena.iso_root;
        st.arena.udf_root = Some(udf_root);
        let root_fe_block = partition_start as u64 + root_icb.block as u64;
        st.arena.node_mut(udf_root).udf = Some(UdfView {
            fe_extent: root_fe_block as u32,
            ..UdfView::default()
        });

        let mut queue = vec![(udf_root, root_fe_block)];
        let mut seen = vec![root_fe_block];
        while let Some((dir_id, fe_block)) = queue.pop() {
            let fe_data = self.read_block(fe_block)?;
            let fe = FileEntry::parse(&fe_data, fe_block)?;
            if !fe.is_dir() {
                return Err(malformed("expected directory file entry", fe_block, 0));
            }

            for ad in &fe.alloc {
                let abs = partition_start as u64 + ad.pos as u64;
                let data = self.read_extent_data(abs as u32, ad.len as u64, abs)?;
                let mut pos = 0;
                while pos < ad.len as usize {
                    let (fid, used) = FileIdent::parse(&data, pos, abs)?;
                    pos += used;
                    if fid.is_parent {
                        continue;
                    }

                    let child_fe_block = partition_start as u64 + fid.icb.block as u64;
                    if fid.is_dir {
                        let mut node = Node::new(NodeKind::Dir);
                        node.udf = Some(UdfView {
                            ident: fid.ident.clone(),
                            fe_extent: child_fe_block as u32,
                            ..UdfView::default()
                        });
                        let id = st.arena.alloc(node);
                        st.arena.insert_child(dir_id, id, Namespace::Udf)?;
                        if seen.contains(&child_fe_block) {
                            return Err(malformed("udf directory cycle", child_fe_block, 0));
                        }
                        seen.push(child_fe_block);
                        queue.push((id, child_fe_block));
                    } else {
                        let cfe_data = self.read_block(child_fe_block)?;
                        let cfe = FileEntry::parse(&cfe_data, child_fe_block)?;
                        let (extent, len) = cfe
                            .alloc
                            .first()
                            .map(|ad| (partition_start + ad.pos, cfe.info_len))
                            .unwrap_or((0, 0));

                        let view = UdfView {
                            ident: fid.ident.clone(),
                            fe_extent: child_fe_block as u32,
                            unique_id: cfe.unique_id,
                            ..UdfView::default()
                        };
                        let id = if let Some(&known) = by_extent.get(&(extent, len as u32)) {
                            st.arena.node_mut(known).udf = Some(view);
                            known
                        } else {
                            let mut node = Node::new(NodeKind::File);
                            let pid = image_payload(&mut st.arena, extent, len);
                            node.payload = Some(pid);
                            node.udf = Some(view);
                            st.arena.alloc(node)
                        };
                        st.arena.insert_child(dir_id, id, Namespace::Udf)?;

                        // Remember the file entry's block; hard links
                        // share one entry.
                        if let Some(pid) = st.arena.node(id).payload
                            && !st.udf_fe_extents.iter().any(|(p, _)| *p == pid)
                        {
                            st.udf_fe_extents.push((pid, child_fe_block as u32));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Phase 6: resolve CL/RE/PL relocation triangles.
    fn resolve_relocations(&mut self, st: &mut VolumeState) -> IsoResult<()> {
        // Map directory extents to nodes.
        let mut by_extent: BTreeMap<u32, NodeId> = BTreeMap::new();
        for id in st.arena.ids().collect::<Vec<_>>() {
            let node = st.arena.node(id);
            if node.is_dir()
                && let Some(view) = node.iso.as_ref()
            {
                by_extent.insert(view.extent, id);
            }
        }

        for id in st.arena.ids().collect::<Vec<_>>() {
            let Some(cl_extent) = st
                .arena
                .node(id)
                .iso
                .as_ref()
                .and_then(|v| v.rr.as_ref())
                .and_then(|rr| rr.child_link)
            else {
                continue;
            };
            let target = by_extent.get(&cl_extent).copied().ok_or(malformed(
                "relocation child link points nowhere",
                cl_extent as u64,
                0,
            ))?;

            let placeholder_parent = st.arena.parent(id, Namespace::Iso9660);
            if let Some(v) = st.arena.node_mut(id).iso.as_mut() {
                v.cl_target = Some(target);
            }
            if let Some(v) = st.arena.node_mut(target).iso.as_mut() {
                v.rr_parent = placeholder_parent;
            }
        }
        Ok(())
    }

    /// Runs every phase and returns the materialised volume.
    pub fn parse(&mut self) -> IsoResult<VolumeState> {
        let (pvd, svd, boots, partitions) = self.scan_descriptors()?;

        let mut system_area = vec![0u8; (ISO_SYSTEM_AREA_BLOCKS as usize) * ISO_BLOCK_SIZE];
        self.io.read_at(0, &mut system_area)?;

        let meta = IsoMeta::from_opts(&IsoOpts {
            interchange_level: 3,
            joliet: svd.as_ref().map(|_| 3),
            vol_ident: String::new(),
            ..IsoOpts::default()
        })?;

        let mut st = VolumeState {
            meta,
            arena: NodeArena::new(None, false, false),
            total_blocks: pvd.space_size,
            pvd,
            svd,
            boot_vd: None,
            partitions,
            eltorito: None,
            udf: None,
            udf_fe_extents: vec![],
            isohybrid: None,
            path_table: vec![],
            joliet_path_table: vec![],
            system_area,
            dirty: false,
        };

        let rock_ridge = self.parse_iso_tree(&mut st)?;
        if rock_ridge {
            let version = detect_rr_version(&st);
            st.meta.rock_ridge = Some(version);
        }
        self.parse_joliet_tree(&mut st)?;
        self.parse_eltorito(&mut st, boots)?;
        self.parse_udf(&mut st)?;
        self.resolve_relocations(&mut st)?;

        // Rebuild the derived tables so a clean, untouched volume can
        // stream itself back out without a reshuffle.
        let iso_dirs = crate::fs::iso::layout::number_directories(&mut st.arena);
        let joliet_dirs = st.arena.dirs_bfs(Namespace::Joliet);
        crate::fs::iso::layout::build_path_tables(&mut st, &iso_dirs, &joliet_dirs)?;

        debug!(
            blocks = st.total_blocks,
            rock_ridge,
            joliet = st.svd.is_some(),
            udf = st.udf.is_some(),
            "image parsed"
        );
        Ok(st)
    }
}

/// Joins or creates the payload entry for a source-image byte range.
/// The entry's target extent starts out identical to its source
/// extent so an unmodified image round-trips in place.
fn image_payload(arena: &mut NodeArena, extent: u32, len: u64) -> PayloadId {
    match arena.find_image_payload(extent, len) {
        Some(pid) => {
            arena.payload_ref(pid);
            pid
        }
        None => {
            let pid = arena.add_payload(PayloadSource::Image { extent }, len);
            arena.payload_mut(pid).extent = extent;
            pid
        }
    }
}

fn detect_rr_version(st: &VolumeState) -> RrVersion {
    st.arena
        .node(st.arena.iso_root)
        .iso
        .as_ref()
        .and_then(|v| v.rr.as_ref())
        .map(|rr| rr.version)
        .unwrap_or(RrVersion::V1_09)
}
