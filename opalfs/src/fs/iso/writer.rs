// SPDX-License-Identifier: MIT

//! The image writer.
//!
//! Streams a reconciled volume to the output sink in ascending extent
//! order. Payload bytes come either from the opened source image or
//! from buffers captured at add time; no block is written before its
//! contents are final, and a dirty volume is refused outright.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{vec, vec::Vec};

use opalio::{OpalIO, OpalIOExt};
use tracing::debug;

use crate::core::error::*;
use crate::fs::iso::constant::*;
use crate::fs::iso::image::VolumeState;
use crate::fs::iso::layout::{build_iso_dir_stream, build_joliet_dir_stream};
use crate::fs::iso::node::*;
use crate::fs::iso::types::udf::*;
use crate::fs::iso::types::vd::emit_terminator;

/// Writes `data` at `extent`, zero-padding to whole blocks.
fn write_block(out: &mut dyn OpalIO, extent: u64, data: &[u8]) -> IsoResult<()> {
    out.write_at(extent_offset(extent), data)?;
    let padded = data.len().next_multiple_of(ISO_BLOCK_SIZE);
    if padded > data.len() {
        out.zero_fill(
            extent_offset(extent) + data.len() as u64,
            padded - data.len(),
        )?;
    }
    Ok(())
}

/// Renders the file identifier stream of one UDF directory.
///
/// The identifier bytes never depend on extent values, so the layout
/// planner calls this for sizing before extents settle and the writer
/// calls it again for the final bytes.
pub fn build_udf_dir_fids(arena: &NodeArena, dir: NodeId) -> IsoResult<Vec<u8>> {
    let view = arena
        .node(dir)
        .udf
        .as_ref()
        .ok_or(IsoError::Internal("directory missing udf view"))?;
    let data_start = (view.fe_extent + 1).saturating_sub(UDF_PARTITION_START as u32);

    let mut out = vec![];

    let mut parent = FileIdent::parent();
    let parent_fe = view
        .parent
        .and_then(|p| arena.node(p).udf.as_ref())
        .map(|v| v.fe_extent)
        .unwrap_or(view.fe_extent);
    parent.icb = LongAd {
        len: ISO_BLOCK_SIZE as u32,
        block: parent_fe.saturating_sub(UDF_PARTITION_START as u32),
        partition: 0,
    };
    let loc = data_start + (out.len() / ISO_BLOCK_SIZE) as u32;
    out.extend_from_slice(&parent.emit(loc));

    for &child in arena.children(dir, Namespace::Udf) {
        let node = arena.node(child);
        let cview = node
            .udf
            .as_ref()
            .ok_or(IsoError::Internal("child missing udf view"))?;
        let mut fid = FileIdent::new(&cview.ident, node.is_dir())?;
        fid.icb = LongAd {
            len: ISO_BLOCK_SIZE as u32,
            block: cview.fe_extent.saturating_sub(UDF_PARTITION_START as u32),
            partition: 0,
        };
        let loc = data_start + (out.len() / ISO_BLOCK_SIZE) as u32;
        out.extend_from_slice(&fid.emit(loc));
    }

    Ok(out)
}

fn write_volume_descriptors(st: &VolumeState, out: &mut dyn OpalIO) -> IsoResult<u64> {
    let mut ext = ISO_VD_START_BLOCK;

    let raw = st.pvd.to_raw(false)?;
    write_block(out, ext, zerocopy::IntoBytes::as_bytes(&raw))?;
    ext += 1;

    if let Some(vd) = st.boot_vd.as_ref() {
        write_block(out, ext, &vd.emit())?;
        ext += 1;
    }
    if let Some(svd) = st.svd.as_ref() {
        let raw = svd.to_raw(true)?;
        write_block(out, ext, zerocopy::IntoBytes::as_bytes(&raw))?;
        ext += 1;
    }
    for part in &st.partitions {
        write_block(out, ext, &part.emit())?;
        ext += 1;
    }
    write_block(out, ext, &emit_terminator())?;
    ext += 1;

    Ok(ext)
}

fn write_udf(st: &VolumeState, out: &mut dyn OpalIO, after_vds: u64) -> IsoResult<()> {
    let Some(parsed_ctx) = st.udf.as_ref() else {
        return Ok(());
    };

    // Derived counters are recomputed from the model so a clean,
    // untouched volume emits the same descriptors it was read from.
    let udf_dirs = st.arena.dirs_bfs(Namespace::Udf);
    let mut ctx = parsed_ctx.clone();
    ctx.num_dirs = udf_dirs.len() as u32;
    ctx.num_files = udf_dirs
        .iter()
        .flat_map(|&d| st.arena.children(d, Namespace::Udf))
        .filter(|&&c| !st.arena.node(c).is_dir())
        .count() as u32;
    ctx.unique_id = 261 + (ctx.num_files + ctx.num_dirs) as u64;
    ctx.partition_len = st
        .total_blocks
        .saturating_sub(1)
        .saturating_sub(ctx.partition_start);
    let ctx = &ctx;

    // Volume recognition sequence.
    write_block(out, after_vds, &emit_vrs_block(&UDF_BEA_ID))?;
    write_block(out, after_vds + 1, &emit_vrs_block(&UDF_NSR_ID))?;
    write_block(out, after_vds + 2, &emit_vrs_block(&UDF_TEA_ID))?;

    // Main and reserve descriptor sequences.
    for base in [UDF_MAIN_VDS_BLOCK, UDF_RESERVE_VDS_BLOCK] {
        write_block(out, base, &emit_udf_pvd(ctx, base as u32)?)?;
        write_block(out, base + 1, &emit_udf_iuvd(ctx, (base + 1) as u32)?)?;
        write_block(out, base + 2, &emit_udf_pd(ctx, (base + 2) as u32))?;
        write_block(out, base + 3, &emit_udf_lvd(ctx, (base + 3) as u32)?)?;
        write_block(out, base + 4, &emit_udf_usd((base + 4) as u32))?;
        write_block(out, base + 5, &emit_udf_td((base + 5) as u32))?;
        for blank in base + 6..base + UDF_VDS_BLOCKS {
            out.zero_fill(extent_offset(blank), ISO_BLOCK_SIZE)?;
        }
    }

    // Integrity sequence and anchors.
    write_block(out, UDF_LVID_BLOCK, &emit_udf_lvid(ctx, UDF_LVID_BLOCK as u32))?;
    write_block(
        out,
        UDF_LVID_BLOCK + 1,
        &emit_udf_td((UDF_LVID_BLOCK + 1) as u32),
    )?;
    let avdp = Avdp::bridge_default();
    write_block(out, UDF_ANCHOR_BLOCK, &avdp.emit(UDF_ANCHOR_BLOCK as u32))?;
    let last = (st.total_blocks - 1) as u64;
    write_block(out, last, &avdp.emit(last as u32))?;

    // File-set descriptor at partition block 0.
    write_block(out, UDF_PARTITION_START, &emit_udf_fsd(ctx)?)?;

    // Directory hierarchy: one file entry per directory followed by
    // its identifier stream.
    for dir in st.arena.dirs_bfs(Namespace::Udf) {
        let view = st
            .arena
            .node(dir)
            .udf
            .as_ref()
            .ok_or(IsoError::Internal("directory missing udf view"))?;
        let fids = build_udf_dir_fids(&st.arena, dir)?;

        let subdirs = st
            .arena
            .children(dir, Namespace::Udf)
            .iter()
            .filter(|&&c| st.arena.node(c).is_dir())
            .count() as u16;
        let mut fe = FileEntry::new_dir(1 + subdirs, view.unique_id, ctx.recording_time);
        fe.info_len = fids.len() as u64;
        fe.alloc.push(ShortAd {
            len: fids.len() as u32,
            pos: (view.fe_extent + 1).saturating_sub(UDF_PARTITION_START as u32),
        });

        let loc = view.fe_extent.saturating_sub(UDF_PARTITION_START as u32);
        write_block(out, view.fe_extent as u64, &fe.emit(loc))?;
        write_block(out, (view.fe_extent + 1) as u64, &fids)?;
    }

    // One file entry per payload linked from the UDF hierarchy.
    for &(pid, fe_extent) in &st.udf_fe_extents {
        let payload = st.arena.payload(pid);
        let links = st
            .arena
            .ids()
            .filter(|&id| st.arena.node(id).payload == Some(pid) && st.arena.node(id).udf.is_some())
            .count() as u16;
        let unique_id = st
            .arena
            .ids()
            .find(|&id| st.arena.node(id).payload == Some(pid) && st.arena.node(id).udf.is_some())
            .and_then(|id| st.arena.node(id).udf.as_ref())
            .map(|v| v.unique_id)
            .unwrap_or(0);

        let mut fe = FileEntry::new_file(payload.len, unique_id, ctx.recording_time);
        fe.link_count = links.max(1);
        if payload.len > 0 {
            fe.alloc.push(ShortAd {
                len: payload.len as u32,
                pos: payload.extent.saturating_sub(UDF_PARTITION_START as u32),
            });
        }
        let loc = fe_extent.saturating_sub(UDF_PARTITION_START as u32);
        write_block(out, fe_extent as u64, &fe.emit(loc))?;
    }

    Ok(())
}

fn write_path_tables(st: &VolumeState, out: &mut dyn OpalIO) -> IsoResult<()> {
    let mut le = vec![];
    let mut be = vec![];
    for rec in &st.path_table {
        rec.emit(&mut le, false);
        rec.emit(&mut be, true);
    }
    write_block(out, st.pvd.lpath_extent as u64, &le)?;
    write_block(out, st.pvd.mpath_extent as u64, &be)?;

    if let Some(svd) = st.svd.as_ref() {
        let mut le = vec![];
        let mut be = vec![];
        for rec in &st.joliet_path_table {
            rec.emit(&mut le, false);
            rec.emit(&mut be, true);
        }
        write_block(out, svd.lpath_extent as u64, &le)?;
        write_block(out, svd.mpath_extent as u64, &be)?;
    }
    Ok(())
}

fn write_payloads(
    st: &VolumeState,
    source: Option<&mut dyn OpalIO>,
    out: &mut dyn OpalIO,
) -> IsoResult<()> {
    let mut payloads: Vec<PayloadId> = st.arena.live_payloads().collect();
    payloads.sort_by_key(|&pid| st.arena.payload(pid).extent);

    let mut source = source;
    for pid in payloads {
        let p = st.arena.payload(pid);
        if p.len == 0 {
            continue;
        }
        match &p.source {
            PayloadSource::Buf(bytes) => {
                write_block(out, p.extent as u64, bytes)?;
            }
            PayloadSource::Image { extent } => {
                let src = source
                    .as_deref_mut()
                    .ok_or(IsoError::Internal("image payload without open source"))?;
                out.copy_from(src, extent_offset(*extent as u64), extent_offset(p.extent as u64), p.len)?;
                let padded = (p.len as usize).next_multiple_of(ISO_BLOCK_SIZE);
                if padded as u64 > p.len {
                    out.zero_fill(
                        extent_offset(p.extent as u64) + p.len,
                        padded - p.len as usize,
                    )?;
                }
            }
        }
    }
    Ok(())
}

/// Streams the whole image. The volume must be clean.
pub fn write_image(
    st: &VolumeState,
    source: Option<&mut dyn OpalIO>,
    out: &mut dyn OpalIO,
) -> IsoResult<()> {
    if st.dirty {
        return Err(IsoError::Internal("writer invoked on a dirty volume"));
    }

    // System area: blocks 0-15, preserved or isohybrid-provided.
    let mut system_area = st.system_area.clone();
    system_area.resize(ISO_SYSTEM_AREA_BLOCKS as usize * ISO_BLOCK_SIZE, 0);
    if let Some(hybrid) = st.isohybrid.as_ref() {
        let end = extent_offset(st.total_blocks as u64);
        hybrid.patch_system_area(&mut system_area, end.next_multiple_of(1024 * 1024))?;
    }
    out.write_at(0, &system_area)?;

    let after_vds = write_volume_descriptors(st, out)?;
    write_udf(st, out, after_vds)?;
    write_path_tables(st, out)?;

    for dir in st.arena.dirs_bfs(Namespace::Iso9660) {
        let view = st
            .arena
            .node(dir)
            .iso
            .as_ref()
            .ok_or(IsoError::Internal("directory missing iso view"))?;
        let spec = build_iso_dir_stream(&st.arena, dir, st.arena.iso_root)?;
        write_block(out, view.extent as u64, &spec.data)?;
        if !spec.ce.is_empty() {
            let ce_extent = view.extent as u64 + blocks_for(view.data_len as u64);
            write_block(out, ce_extent, &spec.ce)?;
        }
    }

    if st.svd.is_some() {
        for dir in st.arena.dirs_bfs(Namespace::Joliet) {
            let view = st
                .arena
                .node(dir)
                .joliet
                .as_ref()
                .ok_or(IsoError::Internal("directory missing joliet view"))?;
            let spec = build_joliet_dir_stream(&st.arena, dir)?;
            write_block(out, view.extent as u64, &spec.data)?;
        }
    }

    if let Some(el) = st.eltorito.as_ref() {
        write_block(out, el.catalog_extent as u64, &el.catalog.emit()?)?;
    }

    write_payloads(st, source, out)?;

    // Make the image exactly volume-space-size blocks, then apply the
    // isohybrid padding to the next megabyte boundary.
    let end = extent_offset(st.total_blocks as u64);
    let cur = out.len()?;
    if cur < end {
        out.zero_fill(cur, (end - cur) as usize)?;
    }
    if st.isohybrid.is_some() {
        let padded = end.next_multiple_of(1024 * 1024);
        if padded > end {
            out.zero_fill(end, (padded - end) as usize)?;
        }
    }

    out.flush()?;
    debug!(blocks = st.total_blocks, "image written");
    Ok(())
}
