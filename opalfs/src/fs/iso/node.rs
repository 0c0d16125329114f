// SPDX-License-Identifier: MIT

//! The in-memory volume model.
//!
//! Nodes live in a flat arena and carry at most one record view per
//! namespace; parent/child and hard-link edges are arena indices, not
//! back-pointers. Payloads live in their own arena and are shared by
//! reference count, which is what makes a hard-link group: the set of
//! nodes pointing at one payload entry.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{string::String, vec, vec::Vec};

use crate::core::codec::RecordDate;
use crate::core::error::*;
use crate::fs::iso::types::susp::{RockRidge, RrVersion};
use crate::fs::iso::utils::{iso_ident_cmp, iso_ident_eq, joliet_ident_cmp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Iso9660,
    Joliet,
    Udf,
}

/// Where a payload's bytes come from.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// Byte range of the opened source image, read lazily at write.
    Image { extent: u32 },
    /// Owned bytes captured when the file was added.
    Buf(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct PayloadEntry {
    pub source: PayloadSource,
    pub len: u64,
    /// Extent assigned by the layout planner; 0 for empty payloads.
    pub extent: u32,
    pub refs: u32,
}

/// ISO 9660 record view, including the Rock Ridge attributes and the
/// deep-directory relocation state.
#[derive(Debug, Clone, Default)]
pub struct IsoView {
    pub ident: Vec<u8>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub rr: Option<RockRidge>,
    pub extent: u32,
    pub data_len: u32,
    pub date: RecordDate,
    /// On-disk location of the record in the parent's extent, kept for
    /// in-place patching.
    pub dr_loc: Option<(u64, u32)>,
    /// This record is a CL placeholder for a relocated directory.
    pub cl_target: Option<NodeId>,
    /// Real (Rock Ridge) parent of a directory stored under RR_MOVED.
    pub rr_parent: Option<NodeId>,
    /// Path table directory number, assigned by the planner.
    pub dirnum: u16,
}

#[derive(Debug, Clone, Default)]
pub struct JolietView {
    /// UCS-2BE identifier bytes.
    pub ident: Vec<u8>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub extent: u32,
    pub data_len: u32,
    pub date: RecordDate,
    pub dr_loc: Option<(u64, u32)>,
}

#[derive(Debug, Clone, Default)]
pub struct UdfView {
    pub ident: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Absolute block of the node's file entry.
    pub fe_extent: u32,
    pub unique_id: u64,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub payload: Option<PayloadId>,
    pub iso: Option<IsoView>,
    pub joliet: Option<JolietView>,
    pub udf: Option<UdfView>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            payload: None,
            iso: None,
            joliet: None,
            udf: None,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    /// A node with no remaining namespace view is an orphan.
    pub fn is_orphan(&self) -> bool {
        self.iso.is_none() && self.joliet.is_none() && self.udf.is_none()
    }
}

/// Flat arena of nodes plus the payload arena.
#[derive(Debug, Clone)]
pub struct NodeArena {
    nodes: Vec<Option<Node>>,
    payloads: Vec<PayloadEntry>,
    pub iso_root: NodeId,
    pub joliet_root: Option<NodeId>,
    pub udf_root: Option<NodeId>,
}

impl NodeArena {
    /// Creates the arena with a root directory present in each
    /// requested namespace.
    pub fn new(rock_ridge: Option<RrVersion>, joliet: bool, udf: bool) -> Self {
        let mut root = Node::new(NodeKind::Dir);
        root.iso = Some(IsoView {
            rr: rock_ridge.map(|v| RockRidge::new_dir(v, "", 0o40555)),
            date: RecordDate::now(),
            ..IsoView::default()
        });
        if joliet {
            root.joliet = Some(JolietView {
                date: RecordDate::now(),
                ..JolietView::default()
            });
        }
        if udf {
            root.udf = Some(UdfView::default());
        }

        let root_id = NodeId(0);
        Self {
            nodes: vec![Some(root)],
            payloads: vec![],
            iso_root: root_id,
            joliet_root: joliet.then_some(root_id),
            udf_root: udf.then_some(root_id),
        }
    }

    // === Node access ===

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0 as usize]
            .as_ref()
            .expect("stale node index")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0 as usize]
            .as_mut()
            .expect("stale node index")
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(slot) = self.nodes.iter().position(Option::is_none) {
            self.nodes[slot] = Some(node);
            NodeId(slot as u32)
        } else {
            self.nodes.push(Some(node));
            NodeId((self.nodes.len() - 1) as u32)
        }
    }

    /// Frees a node, dropping its payload reference.
    pub fn free(&mut self, id: NodeId) {
        if let Some(node) = self.nodes[id.0 as usize].take()
            && let Some(pid) = node.payload
        {
            self.payload_unref(pid);
        }
    }

    /// Iterates live node ids.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i as u32))
    }

    /// Frees every node whose last namespace link is gone.
    pub fn sweep_orphans(&mut self) {
        let orphans: Vec<NodeId> = self
            .ids()
            .filter(|&id| self.node(id).is_orphan())
            .collect();
        for id in orphans {
            self.free(id);
        }
    }

    // === Payloads ===

    pub fn payload(&self, id: PayloadId) -> &PayloadEntry {
        &self.payloads[id.0 as usize]
    }

    pub fn payload_mut(&mut self, id: PayloadId) -> &mut PayloadEntry {
        &mut self.payloads[id.0 as usize]
    }

    pub fn add_payload(&mut self, source: PayloadSource, len: u64) -> PayloadId {
        self.payloads.push(PayloadEntry {
            source,
            len,
            extent: 0,
            refs: 1,
        });
        PayloadId((self.payloads.len() - 1) as u32)
    }

    pub fn payload_ref(&mut self, id: PayloadId) {
        self.payloads[id.0 as usize].refs += 1;
    }

    pub fn payload_unref(&mut self, id: PayloadId) {
        let entry = &mut self.payloads[id.0 as usize];
        entry.refs = entry.refs.saturating_sub(1);
    }

    /// Payload ids still referenced by at least one node.
    pub fn live_payloads(&self) -> impl Iterator<Item = PayloadId> + '_ {
        self.payloads
            .iter()
            .enumerate()
            .filter(|(_, p)| p.refs > 0)
            .map(|(i, _)| PayloadId(i as u32))
    }

    /// Finds the payload entry sharing a source-image extent, used to
    /// join hard-link groups while parsing.
    pub fn find_image_payload(&self, extent: u32, len: u64) -> Option<PayloadId> {
        self.payloads.iter().enumerate().find_map(|(i, p)| {
            match (&p.source, p.refs > 0) {
                (PayloadSource::Image { extent: e }, true) if *e == extent && p.len == len => {
                    Some(PayloadId(i as u32))
                }
                _ => None,
            }
        })
    }

    // === Tree edges ===

    fn children_mut(&mut self, dir: NodeId, ns: Namespace) -> IsoResult<&mut Vec<NodeId>> {
        let node = self.node_mut(dir);
        let children = match ns {
            Namespace::Iso9660 => node.iso.as_mut().map(|v| &mut v.children),
            Namespace::Joliet => node.joliet.as_mut().map(|v| &mut v.children),
            Namespace::Udf => node.udf.as_mut().map(|v| &mut v.children),
        };
        children.ok_or(IsoError::Internal("directory missing namespace view"))
    }

    pub fn children(&self, dir: NodeId, ns: Namespace) -> &[NodeId] {
        let node = self.node(dir);
        match ns {
            Namespace::Iso9660 => node.iso.as_ref().map(|v| v.children.as_slice()),
            Namespace::Joliet => node.joliet.as_ref().map(|v| v.children.as_slice()),
            Namespace::Udf => node.udf.as_ref().map(|v| v.children.as_slice()),
        }
        .unwrap_or(&[])
    }

    /// Encoded identifier of a node in a namespace.
    pub fn ident<'a>(&'a self, id: NodeId, ns: Namespace) -> &'a [u8] {
        let node = self.node(id);
        match ns {
            Namespace::Iso9660 => node.iso.as_ref().map(|v| v.ident.as_slice()),
            Namespace::Joliet => node.joliet.as_ref().map(|v| v.ident.as_slice()),
            Namespace::Udf => node.udf.as_ref().map(|v| v.ident.as_bytes()),
        }
        .unwrap_or(&[])
    }

    fn ident_cmp(ns: Namespace, a: &[u8], b: &[u8]) -> core::cmp::Ordering {
        match ns {
            Namespace::Iso9660 => iso_ident_cmp(a, b),
            Namespace::Joliet => joliet_ident_cmp(a, b),
            Namespace::Udf => a.cmp(b),
        }
    }

    /// Inserts a child keeping the namespace sort order; refuses
    /// duplicates.
    pub fn insert_child(&mut self, dir: NodeId, child: NodeId, ns: Namespace) -> IsoResult<()> {
        let ident = self.ident(child, ns).to_vec();
        let children = self.children(dir, ns).to_vec();

        let mut at = children.len();
        for (i, &c) in children.iter().enumerate() {
            let other = self.ident(c, ns);
            match ns {
                Namespace::Iso9660 if iso_ident_eq(&ident, other) => {
                    return Err(IsoError::Invalid("duplicate name in directory"));
                }
                _ if ident == other => {
                    return Err(IsoError::Invalid("duplicate name in directory"));
                }
                _ => {}
            }
            if Self::ident_cmp(ns, &ident, other).is_lt() && at == children.len() {
                at = i;
            }
        }

        self.children_mut(dir, ns)?.insert(at, child);
        self.set_parent(child, ns, Some(dir));
        Ok(())
    }

    pub fn remove_child(&mut self, dir: NodeId, child: NodeId, ns: Namespace) -> IsoResult<()> {
        let children = self.children_mut(dir, ns)?;
        let pos = children
            .iter()
            .position(|&c| c == child)
            .ok_or(IsoError::Internal("child not in directory"))?;
        children.remove(pos);
        self.set_parent(child, ns, None);
        Ok(())
    }

    fn set_parent(&mut self, id: NodeId, ns: Namespace, parent: Option<NodeId>) {
        let node = self.node_mut(id);
        match ns {
            Namespace::Iso9660 => {
                if let Some(v) = node.iso.as_mut() {
                    v.parent = parent;
                }
            }
            Namespace::Joliet => {
                if let Some(v) = node.joliet.as_mut() {
                    v.parent = parent;
                }
            }
            Namespace::Udf => {
                if let Some(v) = node.udf.as_mut() {
                    v.parent = parent;
                }
            }
        }
    }

    pub fn parent(&self, id: NodeId, ns: Namespace) -> Option<NodeId> {
        let node = self.node(id);
        match ns {
            Namespace::Iso9660 => node.iso.as_ref().and_then(|v| v.parent),
            Namespace::Joliet => node.joliet.as_ref().and_then(|v| v.parent),
            Namespace::Udf => node.udf.as_ref().and_then(|v| v.parent),
        }
    }

    /// Finds a child by encoded identifier using the namespace
    /// comparison.
    pub fn find_child(&self, dir: NodeId, ns: Namespace, encoded: &[u8]) -> Option<NodeId> {
        self.children(dir, ns).iter().copied().find(|&c| {
            let other = self.ident(c, ns);
            match ns {
                Namespace::Iso9660 => iso_ident_eq(encoded, other),
                _ => encoded == other,
            }
        })
    }

    /// Depth of a directory in its namespace tree; the root is 1.
    pub fn depth(&self, mut id: NodeId, ns: Namespace) -> usize {
        let mut depth = 1;
        while let Some(p) = self.parent(id, ns) {
            depth += 1;
            id = p;
        }
        depth
    }

    /// Breadth-first directory walk of one namespace, root first.
    pub fn dirs_bfs(&self, ns: Namespace) -> Vec<NodeId> {
        let root = match ns {
            Namespace::Iso9660 => Some(self.iso_root),
            Namespace::Joliet => self.joliet_root,
            Namespace::Udf => self.udf_root,
        };
        let Some(root) = root else {
            return vec![];
        };

        let mut out = vec![root];
        let mut i = 0;
        while i < out.len() {
            let dir = out[i];
            for &c in self.children(dir, ns) {
                if self.node(c).is_dir() && self.node(c).iso.as_ref().is_none_or(|v| v.cl_target.is_none()) {
                    out.push(c);
                }
            }
            i += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::iso::utils::encode_iso_name;

    fn file_node(arena: &mut NodeArena, name: &str, content: &[u8]) -> NodeId {
        let payload = arena.add_payload(PayloadSource::Buf(content.to_vec()), content.len() as u64);
        let mut node = Node::new(NodeKind::File);
        node.payload = Some(payload);
        node.iso = Some(IsoView {
            ident: encode_iso_name(name, 1, false).unwrap(),
            ..IsoView::default()
        });
        arena.alloc(node)
    }

    #[test]
    fn test_insert_keeps_sort_order() {
        let mut arena = NodeArena::new(None, false, false);
        let root = arena.iso_root;

        let foo = file_node(&mut arena, "FOO.", b"foo");
        let bar = file_node(&mut arena, "BAR.", b"bar");
        let zap = file_node(&mut arena, "ZAP.", b"zap");
        for id in [foo, bar, zap] {
            arena.insert_child(root, id, Namespace::Iso9660).unwrap();
        }

        let names: Vec<&[u8]> = arena
            .children(root, Namespace::Iso9660)
            .iter()
            .map(|&c| arena.ident(c, Namespace::Iso9660))
            .collect();
        assert_eq!(names, [b"BAR.;1".as_slice(), b"FOO.;1", b"ZAP.;1"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut arena = NodeArena::new(None, false, false);
        let root = arena.iso_root;
        let a = file_node(&mut arena, "FOO.", b"1");
        let b = file_node(&mut arena, "FOO.", b"2");
        arena.insert_child(root, a, Namespace::Iso9660).unwrap();
        let err = arena.insert_child(root, b, Namespace::Iso9660).unwrap_err();
        assert_eq!(err.kind(), IsoErrorKind::InvalidInput);
    }

    #[test]
    fn test_hard_link_group_shares_payload() {
        let mut arena = NodeArena::new(None, false, false);
        let root = arena.iso_root;

        let a = file_node(&mut arena, "A.", b"shared");
        arena.insert_child(root, a, Namespace::Iso9660).unwrap();
        let payload = arena.node(a).payload.unwrap();

        // Second link in the same namespace: new node, same payload.
        arena.payload_ref(payload);
        let mut link = Node::new(NodeKind::File);
        link.payload = Some(payload);
        link.iso = Some(IsoView {
            ident: encode_iso_name("B.", 1, false).unwrap(),
            ..IsoView::default()
        });
        let b = arena.alloc(link);
        arena.insert_child(root, b, Namespace::Iso9660).unwrap();

        assert_eq!(arena.payload(payload).refs, 2);

        // Dropping one link keeps the payload alive.
        arena.remove_child(root, a, Namespace::Iso9660).unwrap();
        arena.node_mut(a).iso = None;
        arena.sweep_orphans();
        assert_eq!(arena.payload(payload).refs, 1);
        assert_eq!(arena.live_payloads().count(), 1);
    }

    #[test]
    fn test_find_child_resolves_versionless_lookup() {
        let mut arena = NodeArena::new(None, false, false);
        let root = arena.iso_root;
        let a = file_node(&mut arena, "FOO.", b"x");
        arena.insert_child(root, a, Namespace::Iso9660).unwrap();

        let probe = encode_iso_name("FOO.", 1, false).unwrap();
        assert_eq!(arena.find_child(root, Namespace::Iso9660, &probe), Some(a));
        assert_eq!(arena.find_child(root, Namespace::Iso9660, b"NOPE.;1"), None);
    }

    #[test]
    fn test_depth() {
        let mut arena = NodeArena::new(None, false, false);
        let root = arena.iso_root;
        let mut parent = root;
        for name in ["A", "B", "C"] {
            let mut node = Node::new(NodeKind::Dir);
            node.iso = Some(IsoView {
                ident: encode_iso_name(name, 1, true).unwrap(),
                ..IsoView::default()
            });
            let id = arena.alloc(node);
            arena.insert_child(parent, id, Namespace::Iso9660).unwrap();
            parent = id;
        }
        assert_eq!(arena.depth(parent, Namespace::Iso9660), 4);
        assert_eq!(arena.dirs_bfs(Namespace::Iso9660).len(), 4);
    }
}
