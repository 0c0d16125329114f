// SPDX-License-Identifier: MIT

//! The layout planner.
//!
//! Reconciling a volume recomputes every derived quantity from the
//! node model: directory record streams (with their SUSP continuation
//! areas), path tables, extent assignments for every metadata block
//! and payload, and the back-references that point at them. The
//! process is deterministic, so sizing and emission can run the same
//! code twice and agree.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{vec, vec::Vec};

use tracing::debug;

use crate::core::error::*;
use crate::fs::iso::constant::*;
use crate::fs::iso::image::VolumeState;
use crate::fs::iso::node::*;
use crate::fs::iso::types::dr::{DirRecord, FileFlags};
use crate::fs::iso::types::path_table::PathTableRecord;
use crate::fs::iso::types::susp::{RockRidge, SuspEntry, SuspPacking, encode_entries};

/// Largest even record length; a record must fit its length byte.
const DR_TARGET_LEN: usize = 254;

/// One directory's rendered data area and continuation area.
pub struct DirStreamSpec {
    /// Record stream, padded to a whole number of blocks.
    pub data: Vec<u8>,
    /// SUSP continuation bytes, padded to a whole number of blocks
    /// (empty when nothing spilled).
    pub ce: Vec<u8>,
}

fn pad_to_block(buf: &mut Vec<u8>) {
    let len = buf.len().next_multiple_of(ISO_BLOCK_SIZE);
    buf.resize(len, 0);
}

/// Appends one record, re-emitting at the next block head when it
/// would cross a boundary.
fn push_record(stream: &mut Vec<u8>, record: &DirRecord) -> IsoResult<()> {
    let rem = ISO_BLOCK_SIZE - stream.len() % ISO_BLOCK_SIZE;
    if record.len() > rem {
        let len = stream.len() + rem;
        stream.resize(len, 0);
    }
    record.emit(stream)
}

/// Rock Ridge entries for the "." and ".." records of a directory.
fn dir_self_rr(arena: &NodeArena, dir: NodeId, dotdot: bool) -> Option<RockRidge> {
    let view = arena.node(dir).iso.as_ref()?;
    let source = if dotdot {
        // ".." carries the attributes of the parent directory.
        let parent = view.parent.unwrap_or(dir);
        arena.node(parent).iso.as_ref()?.rr.clone()?
    } else {
        view.rr.clone()?
    };

    let mut rr = RockRidge {
        name: None,
        relocated: false,
        child_link: None,
        parent_link: None,
        ..source
    };
    if dotdot {
        // The real parent of a relocated directory is restored via PL.
        if let Some(real) = view.rr_parent {
            let real_extent = arena.node(real).iso.as_ref().map(|v| v.extent).unwrap_or(0);
            rr.parent_link = Some(real_extent);
        }
    } else if view.rr_parent.is_some() {
        // Relocation is announced on the "." record.
        rr.relocated = true;
    }
    Some(rr)
}

/// Rock Ridge entries for a child's record in its parent's stream.
fn child_rr(arena: &NodeArena, child: NodeId) -> Option<RockRidge> {
    let view = arena.node(child).iso.as_ref()?;
    let mut rr = view.rr.clone()?;
    rr.relocated = false;
    rr.parent_link = None;
    rr.child_link = view.cl_target.map(|target| {
        arena
            .node(target)
            .iso
            .as_ref()
            .map(|v| v.extent)
            .unwrap_or(0)
    });
    Some(rr)
}

/// Builds one ISO 9660 directory's record stream and continuation
/// area. Lengths do not depend on any extent value, so the planner
/// sizes with stale extents and the writer re-runs it afterwards for
/// the final bytes.
pub fn build_iso_dir_stream(
    arena: &NodeArena,
    dir: NodeId,
    root: NodeId,
) -> IsoResult<DirStreamSpec> {
    let view = arena
        .node(dir)
        .iso
        .as_ref()
        .ok_or(IsoError::Internal("directory missing iso view"))?;

    let ce_extent = view.extent + blocks_for(view.data_len as u64) as u32;
    let mut data = vec![];
    let mut ce: Vec<u8> = vec![];

    let parent = view.parent.unwrap_or(dir);
    let parent_view = arena
        .node(parent)
        .iso
        .as_ref()
        .ok_or(IsoError::Internal("parent missing iso view"))?;

    // "." and ".."
    let mut dot = DirRecord::dot(FileFlags::DIRECTORY, view.date);
    dot.extent = view.extent;
    dot.data_len = view.data_len;
    let mut dotdot = DirRecord::dotdot(FileFlags::DIRECTORY, parent_view.date);
    dotdot.extent = parent_view.extent;
    dotdot.data_len = parent_view.data_len;

    let mut records = vec![
        (dot, dir_self_rr(arena, dir, false), dir == root && arena.node(dir).iso.as_ref().is_some_and(|v| v.rr.is_some())),
        (dotdot, dir_self_rr(arena, dir, true), false),
    ];

    for &child in arena.children(dir, Namespace::Iso9660) {
        let cview = arena
            .node(child)
            .iso
            .as_ref()
            .ok_or(IsoError::Internal("child missing iso view"))?;
        let mut flags = FileFlags::empty();
        if arena.node(child).is_dir() {
            flags |= FileFlags::DIRECTORY;
        }
        let mut rec = DirRecord::new(cview.ident.clone(), flags, cview.date);
        rec.extent = cview.extent;
        rec.data_len = cview.data_len;
        if let Some(target) = cview.cl_target {
            // Placeholder for a relocated directory: point readers at
            // the stored location.
            if let Some(tview) = arena.node(target).iso.as_ref() {
                rec.extent = tview.extent;
                rec.data_len = tview.data_len;
            }
        }
        records.push((rec, child_rr(arena, child), false));
    }

    for (mut rec, rr, root_dot) in records {
        if let Some(rr) = rr {
            let entries = rr.to_entries(root_dot);
            let base = ISO_DR_BASE_LEN + rec.ident.len() + usize::from(rec.ident.len() % 2 == 0);
            let packing = SuspPacking::plan(entries, DR_TARGET_LEN.saturating_sub(base));

            let mut system_use = encode_entries(&packing.in_record);
            if !packing.spill.is_empty() {
                let spill = encode_entries(&packing.spill);
                // A continuation area may not cross a block boundary.
                if ce.len() % ISO_BLOCK_SIZE + spill.len() > ISO_BLOCK_SIZE {
                    pad_to_block(&mut ce);
                }
                SuspEntry::Ce {
                    extent: ce_extent + (ce.len() / ISO_BLOCK_SIZE) as u32,
                    offset: (ce.len() % ISO_BLOCK_SIZE) as u32,
                    len: spill.len() as u32,
                }
                .emit(&mut system_use);
                ce.extend_from_slice(&spill);
            }
            rec.system_use = system_use;
        }
        push_record(&mut data, &rec)?;
    }

    pad_to_block(&mut data);
    if !ce.is_empty() {
        pad_to_block(&mut ce);
    }
    Ok(DirStreamSpec { data, ce })
}

/// Builds one Joliet directory's record stream (no system use area).
pub fn build_joliet_dir_stream(arena: &NodeArena, dir: NodeId) -> IsoResult<DirStreamSpec> {
    let view = arena
        .node(dir)
        .joliet
        .as_ref()
        .ok_or(IsoError::Internal("directory missing joliet view"))?;
    let parent = view.parent.unwrap_or(dir);
    let parent_view = arena
        .node(parent)
        .joliet
        .as_ref()
        .ok_or(IsoError::Internal("parent missing joliet view"))?;

    let mut data = vec![];

    let mut dot = DirRecord::dot(FileFlags::DIRECTORY, view.date);
    dot.extent = view.extent;
    dot.data_len = view.data_len;
    push_record(&mut data, &dot)?;

    let mut dotdot = DirRecord::dotdot(FileFlags::DIRECTORY, parent_view.date);
    dotdot.extent = parent_view.extent;
    dotdot.data_len = parent_view.data_len;
    push_record(&mut data, &dotdot)?;

    for &child in arena.children(dir, Namespace::Joliet) {
        let cview = arena
            .node(child)
            .joliet
            .as_ref()
            .ok_or(IsoError::Internal("child missing joliet view"))?;
        let mut flags = FileFlags::empty();
        if arena.node(child).is_dir() {
            flags |= FileFlags::DIRECTORY;
        }
        let mut rec = DirRecord::new(cview.ident.clone(), flags, cview.date);
        rec.extent = cview.extent;
        rec.data_len = cview.data_len;
        push_record(&mut data, &rec)?;
    }

    pad_to_block(&mut data);
    Ok(DirStreamSpec { data, ce: vec![] })
}

/// Assigns path-table directory numbers in (depth, parent number,
/// name) order and returns the table in that order.
pub(crate) fn number_directories(arena: &mut NodeArena) -> Vec<NodeId> {
    let dirs = arena.dirs_bfs(Namespace::Iso9660);

    // BFS yields parents before children and siblings in sorted
    // order, which is exactly the path table order.
    for (i, &dir) in dirs.iter().enumerate() {
        if let Some(v) = arena.node_mut(dir).iso.as_mut() {
            v.dirnum = (i + 1) as u16;
        }
    }
    dirs
}

/// Computes everything derived and clears the dirty flag.
pub fn reconcile(st: &mut VolumeState) -> IsoResult<()> {
    st.arena.sweep_orphans();

    let joliet = st.meta.has_joliet();

    // --- Pass 1: directory stream sizes ---
    let iso_dirs = number_directories(&mut st.arena);
    let mut iso_sizes = vec![];
    for &dir in &iso_dirs {
        let spec = build_iso_dir_stream(&st.arena, dir, st.arena.iso_root)?;
        iso_sizes.push((spec.data.len() as u32, spec.ce.len() as u32));
    }

    let joliet_dirs = st.arena.dirs_bfs(Namespace::Joliet);
    let mut joliet_sizes = vec![];
    if joliet {
        for &dir in &joliet_dirs {
            let spec = build_joliet_dir_stream(&st.arena, dir)?;
            joliet_sizes.push(spec.data.len() as u32);
        }
    }

    // --- Pass 2: sequential extent assignment ---
    let mut ext: u64 = ISO_VD_START_BLOCK;
    ext += 1; // primary
    if st.eltorito.is_some() {
        ext += 1; // boot record
    }
    if joliet {
        ext += 1; // supplementary
    }
    ext += st.partitions.len() as u64;
    ext += 1; // set terminator

    st.udf_fe_extents.clear();
    if st.meta.udf {
        if ext + 3 > UDF_MAIN_VDS_BLOCK {
            return Err(IsoError::Internal("descriptors overlap the udf sequence"));
        }

        // The recognition sequence sits right after the terminator;
        // the fixed bridge plan owns blocks 32-65 and the anchor.
        // Partition space: file-set descriptor at 257, then the
        // directory hierarchy, then one file entry per linked payload.
        let mut part = UDF_PARTITION_START + 1;
        for &dir in st.arena.dirs_bfs(Namespace::Udf).iter() {
            let fids = super::writer::build_udf_dir_fids(&st.arena, dir)?;
            if let Some(v) = st.arena.node_mut(dir).udf.as_mut() {
                v.fe_extent = part as u32;
            }
            part += 1 + blocks_for(fids.len() as u64);
        }
        for pid in st.arena.live_payloads().collect::<Vec<_>>() {
            if payload_has_udf_ref(&st.arena, pid) {
                st.udf_fe_extents.push((pid, part as u32));
                part += 1;
            }
        }
        ext = part;
    }

    // Path tables, both endians, one after the other.
    let path_table_size: u32 = iso_dirs
        .iter()
        .map(|&d| {
            PathTableRecord {
                xattr_len: 0,
                extent: 0,
                parent_num: 0,
                ident: if d == st.arena.iso_root {
                    vec![0]
                } else {
                    st.arena.ident(d, Namespace::Iso9660).to_vec()
                },
            }
            .len() as u32
        })
        .sum();

    st.pvd.lpath_extent = ext as u32;
    ext += blocks_for(path_table_size as u64);
    st.pvd.mpath_extent = ext as u32;
    ext += blocks_for(path_table_size as u64);
    st.pvd.path_table_size = path_table_size;
    st.pvd.opt_lpath_extent = 0;
    st.pvd.opt_mpath_extent = 0;

    if joliet {
        let joliet_path_table_size: u32 = joliet_dirs
            .iter()
            .map(|&d| {
                let ident_len = if d == st.arena.joliet_root.unwrap_or(d) {
                    1
                } else {
                    st.arena.ident(d, Namespace::Joliet).len()
                };
                (8 + ident_len + ident_len % 2) as u32
            })
            .sum();
        let svd = st.svd.as_mut().ok_or(IsoError::Internal("joliet without svd"))?;
        svd.lpath_extent = ext as u32;
        ext += blocks_for(joliet_path_table_size as u64);
        svd.mpath_extent = ext as u32;
        ext += blocks_for(joliet_path_table_size as u64);
        svd.path_table_size = joliet_path_table_size;
        svd.opt_lpath_extent = 0;
        svd.opt_mpath_extent = 0;
    }

    // ISO directories in BFS order, each followed by its continuation
    // area.
    for (&dir, &(data_len, ce_len)) in iso_dirs.iter().zip(&iso_sizes) {
        if let Some(v) = st.arena.node_mut(dir).iso.as_mut() {
            v.extent = ext as u32;
            v.data_len = data_len;
        }
        ext += blocks_for(data_len as u64) + blocks_for(ce_len as u64);
    }

    // Joliet directories.
    if joliet {
        for (&dir, &data_len) in joliet_dirs.iter().zip(&joliet_sizes) {
            if let Some(v) = st.arena.node_mut(dir).joliet.as_mut() {
                v.extent = ext as u32;
                v.data_len = data_len;
            }
            ext += blocks_for(data_len as u64);
        }
    }

    // Boot catalog.
    if let Some(el) = st.eltorito.as_mut() {
        el.catalog_extent = ext as u32;
        ext += 1;
    }

    // Payloads, in order of first appearance walking the hierarchies.
    let order = payload_order(&st.arena);
    for pid in order {
        let entry = st.arena.payload_mut(pid);
        if entry.len == 0 {
            entry.extent = 0;
        } else {
            entry.extent = ext as u32;
            ext += blocks_for(entry.len);
        }
    }

    // The closing anchor occupies the final block.
    if st.meta.udf {
        ext += 1;
    }
    st.total_blocks = ext as u32;

    // --- Pass 3: write every derived field back ---
    propagate_extents(st)?;
    build_path_tables(st, &iso_dirs, &joliet_dirs)?;
    update_eltorito(st)?;
    update_udf(st);

    st.dirty = false;
    debug!(
        total_blocks = st.total_blocks,
        dirs = iso_dirs.len(),
        "layout reconciled"
    );
    Ok(())
}

fn payload_has_udf_ref(arena: &NodeArena, pid: PayloadId) -> bool {
    arena
        .ids()
        .any(|id| arena.node(id).payload == Some(pid) && arena.node(id).udf.is_some())
}

/// First-appearance order over the ISO hierarchy, then Joliet-only,
/// then UDF-only payloads.
fn payload_order(arena: &NodeArena) -> Vec<PayloadId> {
    let mut seen = vec![];
    let mut push = |pid: PayloadId, seen: &mut Vec<PayloadId>| {
        if !seen.contains(&pid) {
            seen.push(pid);
        }
    };

    for ns in [Namespace::Iso9660, Namespace::Joliet, Namespace::Udf] {
        for dir in arena.dirs_bfs(ns) {
            for &child in arena.children(dir, ns) {
                if let Some(pid) = arena.node(child).payload {
                    push(pid, &mut seen);
                }
            }
        }
    }
    // Payloads kept alive by namespace-less references (defensive).
    for pid in arena.live_payloads() {
        push(pid, &mut seen);
    }
    seen
}

/// Copies payload extents into every referencing view and fixes the
/// root records of the volume descriptors.
fn propagate_extents(st: &mut VolumeState) -> IsoResult<()> {
    let ids: Vec<NodeId> = st.arena.ids().collect();
    for id in ids {
        let (payload, is_catalog) = {
            let node = st.arena.node(id);
            let is_catalog = st
                .eltorito
                .as_ref()
                .is_some_and(|el| el.catalog_node == Some(id));
            (node.payload, is_catalog)
        };

        let (extent, len) = if is_catalog {
            let el = st.eltorito.as_ref().unwrap();
            (el.catalog_extent, ISO_BLOCK_SIZE as u64)
        } else if let Some(pid) = payload {
            let p = st.arena.payload(pid);
            (p.extent, p.len)
        } else if st.arena.node(id).is_dir() {
            continue; // directory extents were assigned directly
        } else {
            (0, 0) // symlink or other dataless node
        };

        let udf_fe = payload.and_then(|pid| {
            st.udf_fe_extents
                .iter()
                .find(|(p, _)| *p == pid)
                .map(|&(_, fe)| fe)
        });

        let node = st.arena.node_mut(id);
        if let Some(v) = node.iso.as_mut() {
            v.extent = extent;
            v.data_len = len as u32;
        }
        if let Some(v) = node.joliet.as_mut() {
            v.extent = extent;
            v.data_len = len as u32;
        }
        if let (Some(v), Some(fe)) = (node.udf.as_mut(), udf_fe) {
            v.fe_extent = fe;
        }
    }

    // Root directory records inside the descriptors.
    let root_view = st
        .arena
        .node(st.arena.iso_root)
        .iso
        .as_ref()
        .ok_or(IsoError::Internal("root missing iso view"))?;
    st.pvd.root.extent = root_view.extent;
    st.pvd.root.data_len = root_view.data_len;
    st.pvd.root.date = root_view.date;
    st.pvd.space_size = st.total_blocks;

    if let (Some(svd), Some(joliet_root)) = (st.svd.as_mut(), st.arena.joliet_root) {
        let view = st
            .arena
            .node(joliet_root)
            .joliet
            .as_ref()
            .ok_or(IsoError::Internal("joliet root missing view"))?;
        svd.root.extent = view.extent;
        svd.root.data_len = view.data_len;
        svd.root.date = view.date;
        svd.space_size = st.total_blocks;
    }
    Ok(())
}

pub(crate) fn build_path_tables(
    st: &mut VolumeState,
    iso_dirs: &[NodeId],
    joliet_dirs: &[NodeId],
) -> IsoResult<()> {
    st.path_table.clear();
    for &dir in iso_dirs {
        let view = st
            .arena
            .node(dir)
            .iso
            .as_ref()
            .ok_or(IsoError::Internal("directory missing iso view"))?;
        let parent_num = view
            .parent
            .map(|p| {
                st.arena
                    .node(p)
                    .iso
                    .as_ref()
                    .map(|v| v.dirnum)
                    .unwrap_or(1)
            })
            .unwrap_or(1);
        st.path_table.push(PathTableRecord {
            xattr_len: 0,
            extent: view.extent,
            parent_num,
            ident: if dir == st.arena.iso_root {
                vec![0]
            } else {
                view.ident.clone()
            },
        });
    }

    st.joliet_path_table.clear();
    for &dir in joliet_dirs {
        let view = st
            .arena
            .node(dir)
            .joliet
            .as_ref()
            .ok_or(IsoError::Internal("directory missing joliet view"))?;
        let parent_num = view
            .parent
            .map(|p| {
                (joliet_dirs.iter().position(|&d| d == p).unwrap_or(0) + 1) as u16
            })
            .unwrap_or(1);
        st.joliet_path_table.push(PathTableRecord {
            xattr_len: 0,
            extent: view.extent,
            parent_num,
            ident: if Some(dir) == st.arena.joliet_root {
                vec![0]
            } else {
                view.ident.clone()
            },
        });
    }
    Ok(())
}

/// Points boot entries at their nodes' payload extents and refreshes
/// the boot record descriptor.
fn update_eltorito(st: &mut VolumeState) -> IsoResult<()> {
    let Some(el) = st.eltorito.as_mut() else {
        return Ok(());
    };

    let nodes = el.entry_nodes.clone();
    for (entry, node) in el.catalog.entries_mut().zip(nodes) {
        let Some(node) = node else { continue };
        let Some(pid) = st.arena.node(node).payload else {
            return Err(IsoError::Internal("boot entry without payload"));
        };
        let p = st.arena.payload(pid);
        entry.load_rba = p.extent;
    }

    if let Some(vd) = st.boot_vd.as_mut() {
        vd.catalog_extent = el.catalog_extent;
    }
    Ok(())
}

/// Refreshes the UDF bookkeeping counters.
fn update_udf(st: &mut VolumeState) {
    let Some(ctx) = st.udf.as_mut() else { return };
    let dirs = st.arena.dirs_bfs(Namespace::Udf);
    let mut files = 0u32;
    for &dir in &dirs {
        for &c in st.arena.children(dir, Namespace::Udf) {
            if !st.arena.node(c).is_dir() {
                files += 1;
            }
        }
    }
    ctx.num_dirs = dirs.len() as u32;
    ctx.num_files = files;
    ctx.partition_len = st
        .total_blocks
        .saturating_sub(1) // closing anchor
        .saturating_sub(ctx.partition_start);
    ctx.unique_id = 261 + (files + dirs.len() as u32) as u64;
}
