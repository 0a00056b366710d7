//! The closed hierarchy of versioned nodes.
//!
//! Three node kinds share one contract: a node has at most two parents of
//! its own kind, never appears in its own parent closure, and is
//! identified by a digest over its defining attributes (parents plus
//! payload). Identity is computed once, deterministically, with a
//! domain-separation tag per kind, so structurally equal nodes collapse
//! to one object in the graph.
//!
//! * [`FileVersion`]: one version of a file, a path plus an opaque
//!   reference into an external content store.
//! * [`Snapshot`]: a directory tree state, a map from path to file
//!   version.
//! * [`Commit`]: a historical unit referencing exactly one snapshot.
//!
//! Nodes are constructed freely; every invariant that needs the rest of
//! the graph (parent existence, acyclicity, path agreement) is enforced
//! when the node is handed to [`ObjectGraph::insert_or_get`] and its
//! typed wrappers.
//!
//! [`ObjectGraph::insert_or_get`]: crate::graph::ObjectGraph

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::hash::{Digest, Handle, HashProtocol, RawDigest};
use crate::path::Path;

pub type FileHandle<H> = Handle<H, FileVersion<H>>;
pub type SnapshotHandle<H> = Handle<H, Snapshot<H>>;
pub type CommitHandle<H> = Handle<H, Commit<H>>;

const FILE_TAG: &[u8] = b"bonsai/file/v1\0";
const SNAPSHOT_TAG: &[u8] = b"bonsai/snapshot/v1\0";
const COMMIT_TAG: &[u8] = b"bonsai/commit/v1\0";

/// The parent set of a node: zero, one or two members.
///
/// Set semantics, not sequence semantics: `two(p, p)` collapses to one
/// parent and a two-member set is kept in sorted order, so equal parent
/// sets are structurally equal and digest identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parents<T> {
    None,
    One(T),
    Two(T, T),
}

impl<T: Copy + Ord> Parents<T> {
    pub fn none() -> Self {
        Parents::None
    }

    pub fn one(parent: T) -> Self {
        Parents::One(parent)
    }

    pub fn two(a: T, b: T) -> Self {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Parents::Two(a, b),
            std::cmp::Ordering::Equal => Parents::One(a),
            std::cmp::Ordering::Greater => Parents::Two(b, a),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Parents::None => 0,
            Parents::One(_) => 1,
            Parents::Two(_, _) => 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Parents::None)
    }

    pub fn contains(&self, member: &T) -> bool {
        self.iter().any(|p| p == *member)
    }

    pub fn iter(&self) -> ParentsIter<T> {
        match *self {
            Parents::None => ParentsIter(None, None),
            Parents::One(a) => ParentsIter(Some(a), None),
            Parents::Two(a, b) => ParentsIter(Some(a), Some(b)),
        }
    }
}

pub struct ParentsIter<T>(Option<T>, Option<T>);

impl<T> Iterator for ParentsIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.0.take().or_else(|| self.1.take())
    }
}

impl<T: Copy + Ord> IntoIterator for &Parents<T> {
    type Item = T;
    type IntoIter = ParentsIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One version of a file: a path, an opaque content reference, and the
/// prior versions it descends from.
pub struct FileVersion<H: HashProtocol> {
    path: Path,
    content: Digest<H>,
    parents: Parents<FileHandle<H>>,
}

impl<H: HashProtocol> FileVersion<H> {
    pub fn new(path: Path, content: Digest<H>, parents: Parents<FileHandle<H>>) -> Self {
        Self {
            path,
            content,
            parents,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> Digest<H> {
        self.content
    }

    pub fn parents(&self) -> &Parents<FileHandle<H>> {
        &self.parents
    }

    pub fn handle(&self) -> FileHandle<H> {
        let mut hasher = H::new();
        hasher.update(FILE_TAG);
        digest_parents(&mut hasher, self.parents.iter().map(|p| *p.raw()));
        digest_path(&mut hasher, &self.path);
        hasher.update(self.content.bytes);
        Handle::new(hasher.finalize().into())
    }
}

/// An immutable directory tree state: a mapping from path to file
/// version, plus the snapshots it was derived from.
pub struct Snapshot<H: HashProtocol> {
    entries: BTreeMap<Path, FileHandle<H>>,
    parents: Parents<SnapshotHandle<H>>,
}

impl<H: HashProtocol> Snapshot<H> {
    pub(crate) fn new(
        entries: BTreeMap<Path, FileHandle<H>>,
        parents: Parents<SnapshotHandle<H>>,
    ) -> Self {
        Self { entries, parents }
    }

    pub fn entries(&self) -> &BTreeMap<Path, FileHandle<H>> {
        &self.entries
    }

    pub fn get(&self, path: &Path) -> Option<FileHandle<H>> {
        self.entries.get(path).copied()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parents(&self) -> &Parents<SnapshotHandle<H>> {
        &self.parents
    }

    pub fn handle(&self) -> SnapshotHandle<H> {
        let mut hasher = H::new();
        hasher.update(SNAPSHOT_TAG);
        digest_parents(&mut hasher, self.parents.iter().map(|p| *p.raw()));
        hasher.update((self.entries.len() as u64).to_le_bytes());
        for (path, file) in &self.entries {
            digest_path(&mut hasher, path);
            hasher.update(file.raw());
        }
        Handle::new(hasher.finalize().into())
    }
}

/// A historical unit: exactly one snapshot plus the commits it succeeds.
pub struct Commit<H: HashProtocol> {
    snapshot: SnapshotHandle<H>,
    parents: Parents<CommitHandle<H>>,
}

impl<H: HashProtocol> Commit<H> {
    pub fn new(snapshot: SnapshotHandle<H>, parents: Parents<CommitHandle<H>>) -> Self {
        Self { snapshot, parents }
    }

    pub fn snapshot(&self) -> SnapshotHandle<H> {
        self.snapshot
    }

    pub fn parents(&self) -> &Parents<CommitHandle<H>> {
        &self.parents
    }

    pub fn handle(&self) -> CommitHandle<H> {
        let mut hasher = H::new();
        hasher.update(COMMIT_TAG);
        digest_parents(&mut hasher, self.parents.iter().map(|p| *p.raw()));
        hasher.update(self.snapshot.raw());
        Handle::new(hasher.finalize().into())
    }
}

/// A node as stored in the graph.
///
/// The arcs make lookups cheap: the graph hands out shared references to
/// its immutable nodes instead of cloning entry maps around.
pub enum AnyNode<H: HashProtocol> {
    File(Arc<FileVersion<H>>),
    Snapshot(Arc<Snapshot<H>>),
    Commit(Arc<Commit<H>>),
}

impl<H: HashProtocol> AnyNode<H> {
    pub fn raw_digest(&self) -> RawDigest {
        match self {
            AnyNode::File(f) => *f.handle().raw(),
            AnyNode::Snapshot(s) => *s.handle().raw(),
            AnyNode::Commit(c) => *c.handle().raw(),
        }
    }

    /// The node's parent digests, erased of their kind. This is the edge
    /// set the ancestor closure and the cycle check walk; payload
    /// references (snapshot entries, a commit's snapshot) are not parent
    /// edges.
    pub fn parent_digests(&self) -> Vec<RawDigest> {
        match self {
            AnyNode::File(f) => f.parents.iter().map(|p| *p.raw()).collect(),
            AnyNode::Snapshot(s) => s.parents.iter().map(|p| *p.raw()).collect(),
            AnyNode::Commit(c) => c.parents.iter().map(|p| *p.raw()).collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnyNode::File(_) => "file",
            AnyNode::Snapshot(_) => "snapshot",
            AnyNode::Commit(_) => "commit",
        }
    }
}

impl<H: HashProtocol> Clone for AnyNode<H> {
    fn clone(&self) -> Self {
        match self {
            AnyNode::File(f) => AnyNode::File(f.clone()),
            AnyNode::Snapshot(s) => AnyNode::Snapshot(s.clone()),
            AnyNode::Commit(c) => AnyNode::Commit(c.clone()),
        }
    }
}

impl<H: HashProtocol> Debug for AnyNode<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyNode::{}({})", self.kind(), hex::encode_upper(self.raw_digest()))
    }
}

fn digest_parents<H: HashProtocol>(hasher: &mut H, parents: impl Iterator<Item = RawDigest>) {
    let parents: Vec<_> = parents.collect();
    hasher.update([parents.len() as u8]);
    for parent in parents {
        hasher.update(parent);
    }
}

fn digest_path<H: HashProtocol>(hasher: &mut H, path: &Path) {
    hasher.update((path.depth() as u64).to_le_bytes());
    for name in path.names() {
        let bytes = name.as_str().as_bytes();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
}

// Node kinds carry phantom hash parameters, so derives would demand
// `H: Clone`/`H: PartialEq`; implemented by hand instead, as for handles.

impl<H: HashProtocol> Clone for FileVersion<H> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            content: self.content,
            parents: self.parents,
        }
    }
}

impl<H: HashProtocol> PartialEq for FileVersion<H> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.content == other.content && self.parents == other.parents
    }
}

impl<H: HashProtocol> Eq for FileVersion<H> {}

impl<H: HashProtocol> Debug for FileVersion<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileVersion")
            .field("path", &self.path)
            .field("content", &self.content)
            .field("parents", &self.parents)
            .finish()
    }
}

impl<H: HashProtocol> Clone for Snapshot<H> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            parents: self.parents,
        }
    }
}

impl<H: HashProtocol> PartialEq for Snapshot<H> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.parents == other.parents
    }
}

impl<H: HashProtocol> Eq for Snapshot<H> {}

impl<H: HashProtocol> Debug for Snapshot<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("entries", &self.entries)
            .field("parents", &self.parents)
            .finish()
    }
}

impl<H: HashProtocol> Clone for Commit<H> {
    fn clone(&self) -> Self {
        Self {
            snapshot: self.snapshot,
            parents: self.parents,
        }
    }
}

impl<H: HashProtocol> PartialEq for Commit<H> {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot == other.snapshot && self.parents == other.parents
    }
}

impl<H: HashProtocol> Eq for Commit<H> {}

impl<H: HashProtocol> Debug for Commit<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commit")
            .field("snapshot", &self.snapshot)
            .field("parents", &self.parents)
            .finish()
    }
}
