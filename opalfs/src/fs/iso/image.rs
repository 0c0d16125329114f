// SPDX-License-Identifier: MIT

//! The public volume object.
//!
//! `IsoImage` owns the node model, the parsed or generated volume
//! descriptors, and (for opened images) the input source. Mutations
//! mark the volume dirty; any operation that observes derived state
//! reconciles first, and `write` streams the reconciled image.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{
    boxed::Box,
    string::{String, ToString},
    vec,
    vec::Vec,
};

use opalio::OpalIO;

use crate::core::codec::{RecordDate, decode_ucs2be};
use crate::core::error::*;
use crate::core::utils::path_utils::{check_abs_path, split_parent, split_path};
use crate::fs::iso::constant::*;
use crate::fs::iso::hybrid::IsoHybrid;
use crate::fs::iso::layout;
use crate::fs::iso::meta::{IsoMeta, IsoOpts};
use crate::fs::iso::node::*;
use crate::fs::iso::parser::IsoParser;
use crate::fs::iso::types::eltorito::{
    BootCatalog, BootEntry, BootMedia, BootPlatform, SectionHeader,
};
use crate::fs::iso::types::path_table::PathTableRecord;
use crate::fs::iso::types::susp::RockRidge;
use crate::fs::iso::types::udf::UdfContext;
use crate::fs::iso::types::vd::{BootRecordVd, PartitionVd, Pvd, pad_field};
use crate::fs::iso::utils::{check_udf_name, encode_iso_name, encode_joliet_name};
use crate::fs::iso::writer;

/// El Torito state: the catalog plus its links into the node model.
#[derive(Debug, Clone)]
pub struct ElTorito {
    pub catalog: BootCatalog,
    pub catalog_extent: u32,
    /// Set when the catalog is visible as a file in the hierarchy.
    pub catalog_node: Option<NodeId>,
    /// One slot per catalog entry, initial entry first.
    pub entry_nodes: Vec<Option<NodeId>>,
}

/// Everything the planner and writer operate on; the facade around it
/// lives in [`IsoImage`].
#[derive(Debug, Clone)]
pub struct VolumeState {
    pub meta: IsoMeta,
    pub arena: NodeArena,
    pub pvd: Pvd,
    pub svd: Option<Pvd>,
    pub boot_vd: Option<BootRecordVd>,
    pub partitions: Vec<PartitionVd>,
    pub eltorito: Option<ElTorito>,
    pub udf: Option<UdfContext>,
    pub udf_fe_extents: Vec<(PayloadId, u32)>,
    pub isohybrid: Option<IsoHybrid>,
    pub path_table: Vec<PathTableRecord>,
    pub joliet_path_table: Vec<PathTableRecord>,
    pub system_area: Vec<u8>,
    pub total_blocks: u32,
    pub dirty: bool,
}

/// A path plus the namespace it addresses. Exactly one namespace per
/// call; `BootCatalog` is accepted only where a link source is
/// expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoPathArg<'a> {
    IsoPath(&'a str),
    RockRidge(&'a str),
    Joliet(&'a str),
    Udf(&'a str),
    BootCatalog,
}

/// Paths for the convenience add/remove operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOpts<'a> {
    pub iso_path: Option<&'a str>,
    pub rr_name: Option<&'a str>,
    pub joliet_path: Option<&'a str>,
    pub udf_path: Option<&'a str>,
    pub file_mode: Option<u32>,
}

/// Options for `add_eltorito`.
#[derive(Debug, Clone, Copy)]
pub struct ElToritoOpts<'a> {
    pub boot_cat_path: Option<&'a str>,
    pub load_segment: u16,
    pub boot_load_size: Option<u16>,
    pub platform: BootPlatform,
    pub media: BootMedia,
    pub system_type: u8,
}

impl Default for ElToritoOpts<'_> {
    fn default() -> Self {
        Self {
            boot_cat_path: None,
            load_segment: 0,
            boot_load_size: None,
            platform: BootPlatform::X86,
            media: BootMedia::NoEmulation,
            system_type: 0,
        }
    }
}

/// Read-only snapshot of one record, as returned by the inspection
/// APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoRecord {
    pub name: String,
    pub is_dir: bool,
    pub length: u64,
    pub extent: u32,
    pub symlink_target: Option<String>,
}

/// UCS-2BE space-padded text field for the supplementary descriptor.
fn ucs2_field<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let mut i = 0;
    while i + 1 < N {
        out[i] = 0x00;
        out[i + 1] = 0x20;
        i += 2;
    }
    if let Ok(enc) = crate::core::codec::encode_ucs2be(s) {
        let n = enc.len().min(N & !1);
        out[..n].copy_from_slice(&enc[..n]);
    }
    out
}

pub struct IsoImage {
    st: VolumeState,
    source: Option<Box<dyn OpalIO>>,
    always_consistent: bool,
    closed: bool,
}

impl IsoImage {
    // === Lifecycle ===

    /// Initialises an empty volume with the requested namespaces.
    pub fn new(opts: IsoOpts) -> IsoResult<Self> {
        let meta = IsoMeta::from_opts(&opts)?;

        let mut pvd = Pvd::new(meta.sys_ident.as_bytes(), meta.vol_ident.as_bytes());
        pvd.volset_id = pad_field(meta.volset_ident.as_bytes());
        pvd.publisher_id = pad_field(meta.publisher_ident.as_bytes());
        pvd.preparer_id = pad_field(meta.preparer_ident.as_bytes());
        pvd.application_id = pad_field(meta.application_ident.as_bytes());

        let svd = meta.joliet.map(|level| {
            let mut svd = Pvd::new(b"", b"");
            svd.system_id = ucs2_field(&meta.sys_ident);
            svd.volume_id = ucs2_field(&meta.vol_ident);
            svd.volset_id = ucs2_field(&meta.volset_ident);
            svd.publisher_id = ucs2_field(&meta.publisher_ident);
            svd.preparer_id = ucs2_field(&meta.preparer_ident);
            svd.application_id = ucs2_field(&meta.application_ident);
            svd.escapes = Pvd::joliet_escapes(level);
            svd
        });

        let udf = meta.udf.then(|| UdfContext::new(&meta.vol_ident));
        let arena = NodeArena::new(meta.rock_ridge, meta.joliet.is_some(), meta.udf);

        let mut image = Self {
            st: VolumeState {
                meta,
                arena,
                pvd,
                svd,
                boot_vd: None,
                partitions: vec![],
                eltorito: None,
                udf,
                udf_fe_extents: vec![],
                isohybrid: None,
                path_table: vec![],
                joliet_path_table: vec![],
                system_area: vec![0; (ISO_SYSTEM_AREA_BLOCKS as usize) * ISO_BLOCK_SIZE],
                total_blocks: 0,
                dirty: true,
            },
            source: None,
            always_consistent: false,
            closed: false,
        };
        image.reconcile()?;
        Ok(image)
    }

    /// Parses an existing image; the source stays open for the life of
    /// the object because payloads reference it lazily.
    pub fn open<S: OpalIO + 'static>(mut source: S) -> IsoResult<Self> {
        let st = IsoParser::new(&mut source).parse()?;
        Ok(Self {
            st,
            source: Some(Box::new(source)),
            always_consistent: false,
            closed: false,
        })
    }

    /// Opens an image file from the local filesystem. Opened
    /// read-write when permissions allow, so `modify_file_in_place`
    /// can patch the source; read-only otherwise.
    #[cfg(feature = "std")]
    pub fn open_file(path: &str) -> IsoResult<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .or_else(|_| std::fs::File::open(path))
            .map_err(|_| IsoError::Invalid("cannot open source image"))?;
        Self::open(opalio::StdOpalIO::new(file))
    }

    /// Parses an existing image from any seekable stream.
    #[cfg(feature = "std")]
    pub fn open_fp<T>(stream: T) -> IsoResult<Self>
    where
        T: std::io::Read + std::io::Write + std::io::Seek + 'static,
    {
        Self::open(opalio::StdOpalIO::new(stream))
    }

    /// Releases resources and invalidates the object.
    pub fn close(&mut self) {
        self.source = None;
        self.closed = true;
    }

    /// Re-runs the planner after every mutation when enabled.
    pub fn set_always_consistent(&mut self, enabled: bool) {
        self.always_consistent = enabled;
    }

    fn check_open(&self) -> IsoResult<()> {
        if self.closed {
            return Err(IsoError::Invalid("operation on a closed volume"));
        }
        Ok(())
    }

    fn reconcile(&mut self) -> IsoResult<()> {
        layout::reconcile(&mut self.st)
    }

    fn ensure_clean(&mut self) -> IsoResult<()> {
        self.check_open()?;
        if self.st.dirty {
            self.reconcile()?;
        }
        Ok(())
    }

    fn mark_dirty(&mut self) -> IsoResult<()> {
        self.st.dirty = true;
        if self.always_consistent {
            self.reconcile()?;
        }
        Ok(())
    }

    /// Explicitly runs the planner.
    pub fn force_consistency(&mut self) -> IsoResult<()> {
        self.check_open()?;
        self.reconcile()
    }

    // === Path resolution ===

    fn ns_root(&self, ns: Namespace) -> IsoResult<NodeId> {
        match ns {
            Namespace::Iso9660 => Ok(self.st.arena.iso_root),
            Namespace::Joliet => self
                .st
                .arena
                .joliet_root
                .ok_or(IsoError::Invalid("volume has no joliet hierarchy")),
            Namespace::Udf => self
                .st
                .arena
                .udf_root
                .ok_or(IsoError::Invalid("volume has no udf hierarchy")),
        }
    }

    /// Follows a CL placeholder to the relocated directory.
    fn deref_cl(&self, id: NodeId) -> NodeId {
        self.st
            .arena
            .node(id)
            .iso
            .as_ref()
            .and_then(|v| v.cl_target)
            .unwrap_or(id)
    }

    fn find_iso_child(&self, dir: NodeId, comp: &str) -> Option<NodeId> {
        let arena = &self.st.arena;
        if let Some(id) = arena.find_child(dir, Namespace::Iso9660, comp.as_bytes()) {
            return Some(id);
        }
        // A versionless file lookup matches the `;1` form.
        if !comp.contains(';') {
            let mut with_version = comp.as_bytes().to_vec();
            with_version.extend_from_slice(b";1");
            return arena.find_child(dir, Namespace::Iso9660, &with_version);
        }
        None
    }

    fn find_rr_child(&self, dir: NodeId, comp: &str) -> Option<NodeId> {
        self.st
            .arena
            .children(dir, Namespace::Iso9660)
            .iter()
            .copied()
            .find(|&c| {
                self.st
                    .arena
                    .node(c)
                    .iso
                    .as_ref()
                    .and_then(|v| v.rr.as_ref())
                    .and_then(|rr| rr.name.as_deref())
                    == Some(comp)
            })
    }

    fn resolve_in(&self, ns: Namespace, path: &str, rr_names: bool) -> IsoResult<NodeId> {
        check_abs_path(path)?;
        let mut cur = self.ns_root(ns)?;

        for comp in split_path(path) {
            if !self.st.arena.node(cur).is_dir() {
                return Err(IsoError::Invalid("path component is not a directory"));
            }
            let next = match ns {
                Namespace::Iso9660 if rr_names => self.find_rr_child(cur, comp),
                Namespace::Iso9660 => self.find_iso_child(cur, comp),
                Namespace::Joliet => {
                    let encoded = encode_joliet_name(comp)?;
                    self.st.arena.find_child(cur, Namespace::Joliet, &encoded)
                }
                Namespace::Udf => self.st.arena.find_child(cur, Namespace::Udf, comp.as_bytes()),
            };
            let next = next.ok_or(IsoError::Invalid("no such path"))?;
            cur = if ns == Namespace::Iso9660 {
                self.deref_cl(next)
            } else {
                next
            };
        }
        Ok(cur)
    }

    fn resolve(&self, arg: IsoPathArg<'_>) -> IsoResult<NodeId> {
        match arg {
            IsoPathArg::IsoPath(p) => self.resolve_in(Namespace::Iso9660, p, false),
            IsoPathArg::RockRidge(p) => self.resolve_in(Namespace::Iso9660, p, true),
            IsoPathArg::Joliet(p) => self.resolve_in(Namespace::Joliet, p, false),
            IsoPathArg::Udf(p) => self.resolve_in(Namespace::Udf, p, false),
            IsoPathArg::BootCatalog => self
                .st
                .eltorito
                .as_ref()
                .and_then(|el| el.catalog_node)
                .ok_or(IsoError::Invalid("boot catalog is not linked as a file")),
        }
    }

    fn resolve_parent(&self, ns: Namespace, path: &str, rr_names: bool) -> IsoResult<(NodeId, String)> {
        let (parents, name) = split_parent(path)?;
        let mut cur = self.ns_root(ns)?;
        for comp in parents {
            let next = match ns {
                Namespace::Iso9660 if rr_names => self.find_rr_child(cur, comp),
                Namespace::Iso9660 => self.find_iso_child(cur, comp),
                Namespace::Joliet => {
                    let encoded = encode_joliet_name(comp)?;
                    self.st.arena.find_child(cur, Namespace::Joliet, &encoded)
                }
                Namespace::Udf => self.st.arena.find_child(cur, Namespace::Udf, comp.as_bytes()),
            };
            let next = next.ok_or(IsoError::Invalid("intermediate directory does not exist"))?;
            cur = if ns == Namespace::Iso9660 {
                self.deref_cl(next)
            } else {
                next
            };
            if !self.st.arena.node(cur).is_dir() {
                return Err(IsoError::Invalid("path component is not a directory"));
            }
        }
        Ok((cur, name.to_string()))
    }

    // === Adding and removing files ===

    fn check_add_opts(&self, opts: &AddOpts<'_>) -> IsoResult<()> {
        if opts.iso_path.is_none()
            && opts.joliet_path.is_none()
            && opts.udf_path.is_none()
        {
            return Err(IsoError::Invalid("at least one path must be supplied"));
        }
        if opts.rr_name.is_some() && !self.st.meta.has_rock_ridge() {
            return Err(IsoError::Invalid("rock ridge name on a non rock ridge volume"));
        }
        if opts.iso_path.is_some() {
            if self.st.meta.has_rock_ridge() && opts.rr_name.is_none() {
                return Err(IsoError::Invalid("rock ridge volumes need an rr_name"));
            }
            if self.st.meta.has_joliet() && opts.joliet_path.is_none() {
                return Err(IsoError::Invalid("joliet volumes need a joliet_path"));
            }
        }
        if opts.joliet_path.is_some() && !self.st.meta.has_joliet() {
            return Err(IsoError::Invalid("joliet path on a non joliet volume"));
        }
        if opts.udf_path.is_some() && !self.st.meta.udf {
            return Err(IsoError::Invalid("udf path on a non udf volume"));
        }
        Ok(())
    }

    fn attach_views(
        &mut self,
        id: NodeId,
        is_dir: bool,
        opts: &AddOpts<'_>,
    ) -> IsoResult<()> {
        if let Some(path) = opts.iso_path {
            let (parent, name) = self.resolve_parent(Namespace::Iso9660, path, false)?;
            let ident = encode_iso_name(&name, self.st.meta.interchange_level, is_dir)?;
            let rr = self.st.meta.rock_ridge.map(|version| {
                let rr_name = opts.rr_name.unwrap_or(&name);
                let mode = opts
                    .file_mode
                    .unwrap_or(if is_dir { 0o40555 } else { 0o100444 });
                if is_dir {
                    RockRidge::new_dir(version, rr_name, mode)
                } else {
                    RockRidge::new_file(version, rr_name, mode)
                }
            });
            self.st.arena.node_mut(id).iso = Some(IsoView {
                ident,
                rr,
                date: RecordDate::now(),
                ..IsoView::default()
            });
            self.st.arena.insert_child(parent, id, Namespace::Iso9660)?;
        }

        if let Some(path) = opts.joliet_path {
            let (parent, name) = self.resolve_parent(Namespace::Joliet, path, false)?;
            let ident = encode_joliet_name(&name)?;
            self.st.arena.node_mut(id).joliet = Some(JolietView {
                ident,
                date: RecordDate::now(),
                ..JolietView::default()
            });
            self.st.arena.insert_child(parent, id, Namespace::Joliet)?;
        }

        if let Some(path) = opts.udf_path {
            let (parent, name) = self.resolve_parent(Namespace::Udf, path, false)?;
            check_udf_name(&name)?;
            self.st.arena.node_mut(id).udf = Some(UdfView {
                ident: name,
                ..UdfView::default()
            });
            self.st.arena.insert_child(parent, id, Namespace::Udf)?;
        }

        Ok(())
    }

    /// Adds a file whose content is an owned byte buffer.
    pub fn add_bytes(&mut self, data: Vec<u8>, opts: &AddOpts<'_>) -> IsoResult<()> {
        self.check_open()?;
        self.check_add_opts(opts)?;

        let len = data.len() as u64;
        let pid = self.st.arena.add_payload(PayloadSource::Buf(data), len);
        let mut node = Node::new(NodeKind::File);
        node.payload = Some(pid);
        let id = self.st.arena.alloc(node);

        if let Err(e) = self.attach_views(id, false, opts) {
            let _ = self.detach_everywhere(id);
            return Err(e);
        }
        self.mark_dirty()
    }

    /// Adds a file from a seekless stream of known length.
    #[cfg(feature = "std")]
    pub fn add_fp(
        &mut self,
        reader: &mut dyn std::io::Read,
        length: u64,
        opts: &AddOpts<'_>,
    ) -> IsoResult<()> {
        let mut data = vec![0u8; length as usize];
        reader
            .read_exact(&mut data)
            .map_err(|_| IsoError::Invalid("stream shorter than the declared length"))?;
        self.add_bytes(data, opts)
    }

    /// Adds a file from the local filesystem.
    #[cfg(feature = "std")]
    pub fn add_file(&mut self, local_path: &str, opts: &AddOpts<'_>) -> IsoResult<()> {
        let data = std::fs::read(local_path)
            .map_err(|_| IsoError::Invalid("cannot read local file"))?;
        self.add_bytes(data, opts)
    }

    /// Adds a symbolic link carried by the Rock Ridge SL entries; the
    /// primary record itself stores no data.
    pub fn add_symlink(
        &mut self,
        iso_path: &str,
        rr_name: &str,
        target: &str,
    ) -> IsoResult<()> {
        self.check_open()?;
        if !self.st.meta.has_rock_ridge() {
            return Err(IsoError::Invalid("symlinks need a rock ridge volume"));
        }

        let (parent, name) = self.resolve_parent(Namespace::Iso9660, iso_path, false)?;
        let ident = encode_iso_name(&name, self.st.meta.interchange_level, false)?;
        let version = self.st.meta.rock_ridge.unwrap_or_default();
        let mut rr = RockRidge::new_file(version, rr_name, 0o120555);
        rr.symlink_target = Some(target.to_string());

        let mut node = Node::new(NodeKind::File);
        node.iso = Some(IsoView {
            ident,
            rr: Some(rr),
            date: RecordDate::now(),
            ..IsoView::default()
        });
        let id = self.st.arena.alloc(node);
        self.st.arena.insert_child(parent, id, Namespace::Iso9660)?;
        self.mark_dirty()
    }

    /// Adds a directory to every namespace named in `opts`.
    pub fn add_directory(&mut self, opts: &AddOpts<'_>) -> IsoResult<()> {
        self.check_open()?;
        self.check_add_opts(opts)?;

        // Deep hierarchies relocate under RR_MOVED when Rock Ridge is
        // enabled and are refused otherwise.
        let relocate = match opts.iso_path {
            Some(path) => {
                check_abs_path(path)?;
                let depth = split_path(path).len();
                if depth > ISO_MAX_DEPTH {
                    if !self.st.meta.has_rock_ridge() {
                        return Err(IsoError::Invalid(
                            "directory deeper than 8 needs rock ridge",
                        ));
                    }
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        let id = self.st.arena.alloc(Node::new(NodeKind::Dir));

        let result = if relocate {
            self.attach_relocated_dir(id, opts)
        } else {
            self.attach_views(id, true, opts)
        };
        if let Err(e) = result {
            let _ = self.detach_everywhere(id);
            return Err(e);
        }
        self.mark_dirty()
    }

    /// Ensures the RR_MOVED landing directory exists and returns it.
    fn rr_moved_dir(&mut self) -> IsoResult<NodeId> {
        let root = self.st.arena.iso_root;
        if let Some(id) = self.st.arena.find_child(root, Namespace::Iso9660, RR_MOVED_NAME) {
            return Ok(id);
        }

        let version = self
            .st
            .meta
            .rock_ridge
            .ok_or(IsoError::Internal("relocation without rock ridge"))?;
        let mut node = Node::new(NodeKind::Dir);
        node.iso = Some(IsoView {
            ident: RR_MOVED_NAME.to_vec(),
            rr: Some(RockRidge::new_dir(version, "rr_moved", 0o40555)),
            date: RecordDate::now(),
            ..IsoView::default()
        });
        let id = self.st.arena.alloc(node);
        self.st.arena.insert_child(root, id, Namespace::Iso9660)?;
        Ok(id)
    }

    /// Deep-directory relocation: the new directory lands under
    /// RR_MOVED while a CL placeholder stays at the requested spot.
    fn attach_relocated_dir(&mut self, id: NodeId, opts: &AddOpts<'_>) -> IsoResult<()> {
        let path = opts.iso_path.ok_or(IsoError::Internal("relocation without iso path"))?;
        let (parent, name) = self.resolve_parent(Namespace::Iso9660, path, false)?;
        let ident = encode_iso_name(&name, self.st.meta.interchange_level, true)?;
        let version = self
            .st
            .meta
            .rock_ridge
            .ok_or(IsoError::Internal("relocation without rock ridge"))?;
        let rr_name = opts.rr_name.unwrap_or(&name).to_string();
        let mode = opts.file_mode.unwrap_or(0o40555);

        let rr_moved = self.rr_moved_dir()?;
        if self
            .st
            .arena
            .find_child(rr_moved, Namespace::Iso9660, &ident)
            .is_some()
        {
            return Err(IsoError::Invalid("relocated name already in rr_moved"));
        }

        // The real directory, stored under RR_MOVED.
        self.st.arena.node_mut(id).iso = Some(IsoView {
            ident: ident.clone(),
            rr: Some(RockRidge::new_dir(version, &rr_name, mode)),
            date: RecordDate::now(),
            rr_parent: Some(parent),
            ..IsoView::default()
        });
        self.st.arena.insert_child(rr_moved, id, Namespace::Iso9660)?;

        // The placeholder at the requested location.
        let mut placeholder = Node::new(NodeKind::Dir);
        placeholder.iso = Some(IsoView {
            ident,
            rr: Some(RockRidge::new_dir(version, &rr_name, mode)),
            date: RecordDate::now(),
            cl_target: Some(id),
            ..IsoView::default()
        });
        let ph = self.st.arena.alloc(placeholder);
        self.st.arena.insert_child(parent, ph, Namespace::Iso9660)?;

        // Joliet and UDF see the real node at its real place.
        let mut rest = *opts;
        rest.iso_path = None;
        self.attach_views(id, true, &rest)
    }

    fn detach_view(&mut self, id: NodeId, ns: Namespace) -> IsoResult<()> {
        if let Some(parent) = self.st.arena.parent(id, ns) {
            self.st.arena.remove_child(parent, id, ns)?;
        }
        let node = self.st.arena.node_mut(id);
        match ns {
            Namespace::Iso9660 => node.iso = None,
            Namespace::Joliet => node.joliet = None,
            Namespace::Udf => node.udf = None,
        }
        Ok(())
    }

    fn detach_everywhere(&mut self, id: NodeId) -> IsoResult<()> {
        for ns in [Namespace::Iso9660, Namespace::Joliet, Namespace::Udf] {
            let has = match ns {
                Namespace::Iso9660 => self.st.arena.node(id).iso.is_some(),
                Namespace::Joliet => self.st.arena.node(id).joliet.is_some(),
                Namespace::Udf => self.st.arena.node(id).udf.is_some(),
            };
            if has {
                self.detach_view(id, ns)?;
            }
        }
        self.st.arena.sweep_orphans();
        Ok(())
    }

    /// Removes a file's links in every namespace it appears in.
    pub fn rm_file(&mut self, path: IsoPathArg<'_>) -> IsoResult<()> {
        self.check_open()?;
        let id = self.resolve(path)?;
        if self.st.arena.node(id).is_dir() {
            return Err(IsoError::Invalid("rm_file on a directory"));
        }
        if self
            .st
            .eltorito
            .as_ref()
            .is_some_and(|el| el.entry_nodes.contains(&Some(id)))
        {
            return Err(IsoError::Invalid("file is referenced by the boot catalog"));
        }
        if self
            .st
            .eltorito
            .as_ref()
            .is_some_and(|el| el.catalog_node == Some(id))
        {
            return Err(IsoError::Invalid("remove the boot catalog via rm_eltorito"));
        }
        self.detach_everywhere(id)?;
        self.mark_dirty()
    }

    /// Removes a directory (which must be empty) from every namespace.
    pub fn rm_directory(&mut self, path: IsoPathArg<'_>) -> IsoResult<()> {
        self.check_open()?;
        let id = self.resolve(path)?;
        let node = self.st.arena.node(id);
        if !node.is_dir() {
            return Err(IsoError::Invalid("rm_directory on a file"));
        }
        for ns in [Namespace::Iso9660, Namespace::Joliet, Namespace::Udf] {
            if !self.st.arena.children(id, ns).is_empty() {
                return Err(IsoError::Invalid("directory not empty"));
            }
        }
        if id == self.st.arena.iso_root {
            return Err(IsoError::Invalid("cannot remove the root"));
        }

        // A relocated directory takes its placeholder along.
        let placeholder = self.st.arena.ids().find(|&p| {
            self.st
                .arena
                .node(p)
                .iso
                .as_ref()
                .is_some_and(|v| v.cl_target == Some(id))
        });
        if let Some(ph) = placeholder {
            self.detach_everywhere(ph)?;
        }
        self.detach_everywhere(id)?;
        self.mark_dirty()
    }

    // === Hard links ===

    /// Adds a single namespace link to an existing payload without
    /// touching any other namespace.
    pub fn add_hard_link(
        &mut self,
        old: IsoPathArg<'_>,
        new: IsoPathArg<'_>,
        rr_name: Option<&str>,
    ) -> IsoResult<()> {
        self.check_open()?;
        let old_id = self.resolve(old)?;
        if self.st.arena.node(old_id).is_dir() {
            return Err(IsoError::Invalid("hard links to directories are not allowed"));
        }

        let payload = self.st.arena.node(old_id).payload;
        let mut node = Node::new(NodeKind::File);
        node.payload = payload;
        if let Some(pid) = payload {
            self.st.arena.payload_ref(pid);
        }
        let id = self.st.arena.alloc(node);

        let opts = match new {
            IsoPathArg::IsoPath(p) => AddOpts {
                iso_path: Some(p),
                rr_name,
                ..AddOpts::default()
            },
            IsoPathArg::Joliet(p) => AddOpts {
                joliet_path: Some(p),
                ..AddOpts::default()
            },
            IsoPathArg::Udf(p) => AddOpts {
                udf_path: Some(p),
                ..AddOpts::default()
            },
            IsoPathArg::RockRidge(_) | IsoPathArg::BootCatalog => {
                self.st.arena.free(id);
                return Err(IsoError::Invalid("link target must name a namespace path"));
            }
        };
        if opts.iso_path.is_some() && self.st.meta.has_rock_ridge() && rr_name.is_none() {
            self.st.arena.free(id);
            return Err(IsoError::Invalid("rock ridge volumes need an rr_name"));
        }

        if let Err(e) = self.attach_views(id, false, &opts) {
            let _ = self.detach_everywhere(id);
            return Err(e);
        }
        self.mark_dirty()
    }

    /// Removes exactly one namespace link; the payload survives while
    /// other links remain.
    pub fn rm_hard_link(&mut self, path: IsoPathArg<'_>) -> IsoResult<()> {
        self.check_open()?;
        let ns = match path {
            IsoPathArg::IsoPath(_) | IsoPathArg::RockRidge(_) => Namespace::Iso9660,
            IsoPathArg::Joliet(_) => Namespace::Joliet,
            IsoPathArg::Udf(_) => Namespace::Udf,
            IsoPathArg::BootCatalog => {
                return Err(IsoError::Invalid("rm_hard_link needs a namespace path"));
            }
        };
        let id = self.resolve(path)?;
        let node = self.st.arena.node(id);
        if node.is_dir() {
            return Err(IsoError::Invalid("rm_hard_link on a directory"));
        }
        // Dropping the last link of a catalog-referenced node would
        // leave the boot catalog dangling.
        let views = usize::from(node.iso.is_some())
            + usize::from(node.joliet.is_some())
            + usize::from(node.udf.is_some());
        if views <= 1
            && self.st.eltorito.as_ref().is_some_and(|el| {
                el.entry_nodes.contains(&Some(id)) || el.catalog_node == Some(id)
            })
        {
            return Err(IsoError::Invalid("file is referenced by the boot catalog"));
        }
        self.detach_view(id, ns)?;
        self.st.arena.sweep_orphans();
        self.mark_dirty()
    }

    // === El Torito ===

    /// Marks an existing file as the boot image, creating the catalog
    /// or appending a section for an additional platform.
    pub fn add_eltorito(&mut self, bootfile_iso_path: &str, opts: &ElToritoOpts<'_>) -> IsoResult<()> {
        self.check_open()?;
        let node = self.resolve_in(Namespace::Iso9660, bootfile_iso_path, false)?;
        let pid = self
            .st
            .arena
            .node(node)
            .payload
            .ok_or(IsoError::Invalid("boot file has no data"))?;
        let len = self.st.arena.payload(pid).len;

        let sector_count = opts
            .boot_load_size
            .unwrap_or_else(|| len.div_ceil(512).min(u16::MAX as u64) as u16);
        let entry = BootEntry {
            bootable: true,
            media: opts.media,
            load_segment: opts.load_segment,
            system_type: opts.system_type,
            sector_count,
            load_rba: 0,
            selection: [0; 20],
        };

        match self.st.eltorito.as_mut() {
            None => {
                let catalog = BootCatalog::new(opts.platform, entry);
                self.st.eltorito = Some(ElTorito {
                    catalog,
                    catalog_extent: 0,
                    catalog_node: None,
                    entry_nodes: vec![Some(node)],
                });
                self.st.boot_vd = Some(BootRecordVd::new_eltorito());
            }
            Some(el) => {
                // One initial entry only; further boot images become
                // section entries.
                for (header, _) in el.catalog.sections.iter_mut() {
                    header.last = false;
                }
                el.catalog.sections.push((
                    SectionHeader {
                        last: true,
                        platform: opts.platform,
                        id_string: [0; 28],
                    },
                    vec![entry],
                ));
                el.entry_nodes.push(Some(node));
            }
        }

        if let Some(cat_path) = opts.boot_cat_path {
            let cat_node = self.st.arena.alloc(Node::new(NodeKind::File));
            let add = AddOpts {
                iso_path: Some(cat_path),
                rr_name: self.st.meta.has_rock_ridge().then_some("boot.cat"),
                joliet_path: None,
                udf_path: None,
                file_mode: None,
            };
            if let Err(e) = self.attach_views(cat_node, false, &add) {
                let _ = self.detach_everywhere(cat_node);
                return Err(e);
            }
            if let Some(el) = self.st.eltorito.as_mut() {
                el.catalog_node = Some(cat_node);
            }
        }

        self.mark_dirty()
    }

    /// Drops the boot catalog and its descriptor.
    pub fn rm_eltorito(&mut self) -> IsoResult<()> {
        self.check_open()?;
        let el = self
            .st
            .eltorito
            .take()
            .ok_or(IsoError::Invalid("volume has no boot catalog"))?;
        self.st.boot_vd = None;
        if let Some(node) = el.catalog_node {
            self.detach_everywhere(node)?;
        }
        self.mark_dirty()
    }

    // === Isohybrid ===

    /// Installs MBR boot code into the system area.
    pub fn add_isohybrid(&mut self, mbr_code: &[u8], mbr_id: u32) -> IsoResult<()> {
        self.check_open()?;
        if self.st.eltorito.is_none() {
            return Err(IsoError::Invalid("isohybrid needs an el torito boot image"));
        }
        self.st.isohybrid = Some(IsoHybrid::new(mbr_code, mbr_id)?);
        self.mark_dirty()
    }

    pub fn rm_isohybrid(&mut self) -> IsoResult<()> {
        self.check_open()?;
        if self.st.isohybrid.take().is_none() {
            return Err(IsoError::Invalid("volume has no isohybrid boot code"));
        }
        // The system area reverts to zeros.
        self.st.system_area.fill(0);
        self.mark_dirty()
    }

    // === In-place modification ===

    /// Replaces a file's bytes without any layout change. The new
    /// length must fit the extent-aligned length of the original.
    pub fn modify_file_in_place(&mut self, data: &[u8], iso_path: &str) -> IsoResult<()> {
        self.check_open()?;
        if self.st.dirty {
            return Err(IsoError::Invalid(
                "in-place modification requires a consistent volume",
            ));
        }

        let id = self.resolve_in(Namespace::Iso9660, iso_path, false)?;
        let node = self.st.arena.node(id);
        if node.is_dir() {
            return Err(IsoError::Invalid("in-place modification of a directory"));
        }
        let pid = node
            .payload
            .ok_or(IsoError::Invalid("file has no data to modify"))?;

        let old_len = self.st.arena.payload(pid).len;
        let aligned = blocks_for(old_len) * ISO_BLOCK_SIZE as u64;
        if data.len() as u64 > aligned {
            return Err(IsoError::Invalid(
                "new content exceeds the file's allocated extents",
            ));
        }

        let extent = self.st.arena.payload(pid).extent;
        let new_len = data.len() as u64;

        // Patch the payload blocks and length fields on the open
        // source, when there is one to patch.
        if let Some(source) = self.source.as_mut() {
            use opalio::OpalIOExt;
            source.write_at(extent_offset(extent as u64), data)?;
            if new_len < aligned {
                source.zero_fill(
                    extent_offset(extent as u64) + new_len,
                    (aligned - new_len) as usize,
                )?;
            }

            let node = self.st.arena.node(id);
            let mut locs = vec![];
            if let Some(v) = node.iso.as_ref().and_then(|v| v.dr_loc) {
                locs.push(v);
            }
            if let Some(v) = node.joliet.as_ref().and_then(|v| v.dr_loc) {
                locs.push(v);
            }
            for (block, offset) in locs {
                let field = extent_offset(block) + offset as u64 + 10;
                source.write_at(field, &crate::core::codec::encode_both32(new_len as u32))?;
            }

            // The UDF file entry carries the length too, under a CRC.
            if let Some(fe_extent) = node.udf.as_ref().map(|v| v.fe_extent).filter(|&e| e != 0) {
                let part_start = self
                    .st
                    .udf
                    .as_ref()
                    .map(|c| c.partition_start)
                    .unwrap_or(UDF_PARTITION_START as u32);
                let mut block = vec![0u8; ISO_BLOCK_SIZE];
                source.read_at(extent_offset(fe_extent as u64), &mut block)?;
                let mut fe =
                    crate::fs::iso::types::udf::FileEntry::parse(&block, fe_extent as u64)?;
                fe.info_len = new_len;
                if let Some(ad) = fe.alloc.first_mut() {
                    ad.len = new_len as u32;
                }
                let patched = fe.emit(fe_extent.saturating_sub(part_start));
                source.write_at(extent_offset(fe_extent as u64), &patched)?;
            }
        }

        // Update the model so a later write reproduces the patch.
        {
            let entry = self.st.arena.payload_mut(pid);
            entry.source = PayloadSource::Buf(data.to_vec());
            entry.len = new_len;
            entry.extent = extent;
        }
        let node = self.st.arena.node_mut(id);
        if let Some(v) = node.iso.as_mut() {
            v.data_len = new_len as u32;
        }
        if let Some(v) = node.joliet.as_mut() {
            v.data_len = new_len as u32;
        }
        Ok(())
    }

    // === Writing ===

    /// Reconciles if needed, then streams the image to the sink.
    pub fn write_fp(&mut self, out: &mut dyn OpalIO) -> IsoResult<()> {
        self.ensure_clean()?;
        let source = self.source.as_mut().map(|b| b.as_mut() as &mut dyn OpalIO);
        writer::write_image(&self.st, source, out)
    }

    /// Writes the image to a local file.
    #[cfg(feature = "std")]
    pub fn write(&mut self, local_path: &str) -> IsoResult<()> {
        let file = std::fs::File::create(local_path)
            .map_err(|_| IsoError::Invalid("cannot create output file"))?;
        let mut out = opalio::StdOpalIO::new(file);
        self.write_fp(&mut out)
    }

    // === Inspection ===

    fn display_name(&self, id: NodeId, arg: IsoPathArg<'_>) -> String {
        let node = self.st.arena.node(id);
        match arg {
            IsoPathArg::RockRidge(_) => node
                .iso
                .as_ref()
                .and_then(|v| v.rr.as_ref())
                .and_then(|rr| rr.name.clone())
                .unwrap_or_default(),
            IsoPathArg::Joliet(_) => node
                .joliet
                .as_ref()
                .and_then(|v| decode_ucs2be(&v.ident))
                .unwrap_or_default(),
            IsoPathArg::Udf(_) => node.udf.as_ref().map(|v| v.ident.clone()).unwrap_or_default(),
            _ => node
                .iso
                .as_ref()
                .map(|v| String::from_utf8_lossy(&v.ident).into_owned())
                .unwrap_or_default(),
        }
    }

    fn arg_ns(arg: IsoPathArg<'_>) -> Namespace {
        match arg {
            IsoPathArg::Joliet(_) => Namespace::Joliet,
            IsoPathArg::Udf(_) => Namespace::Udf,
            _ => Namespace::Iso9660,
        }
    }

    fn record_of(&self, id: NodeId, arg: IsoPathArg<'_>) -> IsoRecord {
        let node = self.st.arena.node(id);
        let (extent, length) = match Self::arg_ns(arg) {
            Namespace::Joliet => node
                .joliet
                .as_ref()
                .map(|v| (v.extent, v.data_len as u64))
                .unwrap_or((0, 0)),
            Namespace::Udf => {
                if node.is_dir() {
                    node.udf.as_ref().map(|v| (v.fe_extent, 0)).unwrap_or((0, 0))
                } else {
                    node.payload
                        .map(|pid| {
                            let p = self.st.arena.payload(pid);
                            (p.extent, p.len)
                        })
                        .unwrap_or((0, 0))
                }
            }
            Namespace::Iso9660 => node
                .iso
                .as_ref()
                .map(|v| (v.extent, v.data_len as u64))
                .unwrap_or((0, 0)),
        };
        IsoRecord {
            name: self.display_name(id, arg),
            is_dir: node.is_dir(),
            length,
            extent,
            symlink_target: node
                .iso
                .as_ref()
                .and_then(|v| v.rr.as_ref())
                .and_then(|rr| rr.symlink_target.clone()),
        }
    }

    /// Returns the record snapshot for a path.
    pub fn get_record(&mut self, path: IsoPathArg<'_>) -> IsoResult<IsoRecord> {
        self.ensure_clean()?;
        let id = self.resolve(path)?;
        Ok(self.record_of(id, path))
    }

    /// Lists the children of a directory.
    pub fn list_children(&mut self, path: IsoPathArg<'_>) -> IsoResult<Vec<IsoRecord>> {
        self.ensure_clean()?;
        let id = self.resolve(path)?;
        if !self.st.arena.node(id).is_dir() {
            return Err(IsoError::Invalid("list_children on a file"));
        }
        let ns = Self::arg_ns(path);
        Ok(self
            .st
            .arena
            .children(id, ns)
            .iter()
            .map(|&c| self.record_of(c, path))
            .collect())
    }

    /// Walks a hierarchy breadth-first; yields (dir path, directory
    /// names, file names) triples.
    pub fn walk(&mut self, start: IsoPathArg<'_>) -> IsoResult<Vec<(String, Vec<String>, Vec<String>)>> {
        self.ensure_clean()?;
        let start_id = self.resolve(start)?;
        if !self.st.arena.node(start_id).is_dir() {
            return Err(IsoError::Invalid("walk must start at a directory"));
        }
        let ns = Self::arg_ns(start);
        let start_path = match start {
            IsoPathArg::IsoPath(p)
            | IsoPathArg::RockRidge(p)
            | IsoPathArg::Joliet(p)
            | IsoPathArg::Udf(p) => p.trim_end_matches('/').to_string(),
            IsoPathArg::BootCatalog => String::new(),
        };

        let mut queue = vec![(
            start_id,
            if start_path.is_empty() {
                "/".to_string()
            } else {
                start_path
            },
        )];
        let mut out = vec![];
        let mut i = 0;
        while i < queue.len() {
            let (dir, path) = queue[i].clone();
            i += 1;

            let mut dirs = vec![];
            let mut files = vec![];
            for &c in self.st.arena.children(dir, ns) {
                let name = self.display_name(c, start);
                if self.st.arena.node(c).is_dir() {
                    let sub = if path == "/" {
                        alloc_format(&name)
                    } else {
                        let mut s = path.clone();
                        s.push('/');
                        s.push_str(&name);
                        s
                    };
                    queue.push((self.deref_cl_in(c, ns), sub));
                    dirs.push(name);
                } else {
                    files.push(name);
                }
            }
            out.push((path, dirs, files));
        }
        Ok(out)
    }

    fn deref_cl_in(&self, id: NodeId, ns: Namespace) -> NodeId {
        if ns == Namespace::Iso9660 {
            self.deref_cl(id)
        } else {
            id
        }
    }

    /// Reads a file's whole payload.
    pub fn read_file(&mut self, path: IsoPathArg<'_>) -> IsoResult<Vec<u8>> {
        self.ensure_clean()?;
        let id = self.resolve(path)?;
        let node = self.st.arena.node(id);
        if node.is_dir() {
            return Err(IsoError::Invalid("read of a directory"));
        }

        if self
            .st
            .eltorito
            .as_ref()
            .is_some_and(|el| el.catalog_node == Some(id))
        {
            return Ok(self
                .st
                .eltorito
                .as_ref()
                .unwrap()
                .catalog
                .emit()?
                .to_vec());
        }

        let pid = node
            .payload
            .ok_or(IsoError::Invalid("file has no data"))?;
        let entry = self.st.arena.payload(pid);
        match &entry.source {
            PayloadSource::Buf(bytes) => Ok(bytes.clone()),
            PayloadSource::Image { extent } => {
                let source = self
                    .source
                    .as_mut()
                    .ok_or(IsoError::Internal("image payload without open source"))?;
                let mut buf = vec![0u8; entry.len as usize];
                source.read_at(extent_offset(*extent as u64), &mut buf)?;
                Ok(buf)
            }
        }
    }

    /// Extracts a file to the local filesystem.
    #[cfg(feature = "std")]
    pub fn get_file_from_iso(&mut self, local_path: &str, path: IsoPathArg<'_>) -> IsoResult<()> {
        let data = self.read_file(path)?;
        std::fs::write(local_path, data)
            .map_err(|_| IsoError::Invalid("cannot write local file"))?;
        Ok(())
    }

    /// Opens a streaming reader over a file's payload.
    pub fn open_file_from_iso(&mut self, path: IsoPathArg<'_>) -> IsoResult<IsoFileReader<'_>> {
        self.ensure_clean()?;
        let id = self.resolve(path)?;
        let node = self.st.arena.node(id);
        if node.is_dir() {
            return Err(IsoError::Invalid("read of a directory"));
        }
        let pid = node
            .payload
            .ok_or(IsoError::Invalid("file has no data"))?;
        let entry = self.st.arena.payload(pid);

        match &entry.source {
            PayloadSource::Buf(bytes) => Ok(IsoFileReader {
                inner: ReaderInner::Buf(bytes.clone()),
                pos: 0,
                len: entry.len,
            }),
            PayloadSource::Image { extent } => {
                let offset = extent_offset(*extent as u64);
                let source = self
                    .source
                    .as_mut()
                    .ok_or(IsoError::Internal("image payload without open source"))?;
                Ok(IsoFileReader {
                    inner: ReaderInner::Image {
                        io: source.as_mut(),
                        offset,
                    },
                    pos: 0,
                    len: entry.len,
                })
            }
        }
    }

    // === Accessors used by the facades and tests ===

    pub fn meta(&self) -> &IsoMeta {
        &self.st.meta
    }

    pub fn total_blocks(&mut self) -> IsoResult<u32> {
        self.ensure_clean()?;
        Ok(self.st.total_blocks)
    }
}

fn alloc_format(name: &str) -> String {
    let mut s = String::with_capacity(name.len() + 1);
    s.push('/');
    s.push_str(name);
    s
}

enum ReaderInner<'a> {
    Buf(Vec<u8>),
    Image { io: &'a mut dyn OpalIO, offset: u64 },
}

/// Streaming reader over one file payload.
pub struct IsoFileReader<'a> {
    inner: ReaderInner<'a>,
    pos: u64,
    len: u64,
}

impl IsoFileReader<'_> {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the next chunk; returns the number of bytes produced.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> IsoResult<usize> {
        let remaining = (self.len - self.pos) as usize;
        let n = remaining.min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        match &mut self.inner {
            ReaderInner::Buf(bytes) => {
                buf[..n].copy_from_slice(&bytes[self.pos as usize..self.pos as usize + n]);
            }
            ReaderInner::Image { io, offset } => {
                io.read_at(*offset + self.pos, &mut buf[..n])?;
            }
        }
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(feature = "std")]
impl std::io::Read for IsoFileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_chunk(buf)
            .map_err(|e| std::io::Error::other(e.msg()))
    }
}
