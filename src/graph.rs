//! The content-addressed object graph.
//!
//! The graph is the only shared mutable state in the engine. It stores
//! every node keyed by its digest and exposes one mutating operation,
//! lookup-or-insert: a candidate whose defining attributes match an
//! existing node resolves to that node's handle, otherwise the candidate
//! is inserted. The check and the insert happen under one write lock, so
//! concurrent attempts to insert structurally identical nodes observe
//! the same identity.
//!
//! Nodes are immutable and never removed, which buys two things: ancestor
//! closures can be memoized forever, and validation done against the
//! graph before taking the write lock cannot be invalidated by concurrent
//! inserts (the graph only ever grows).

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{self, Debug};
use std::sync::{Arc, PoisonError, RwLock};

use quick_cache::sync::Cache;
use tracing::{debug, trace};

use crate::hash::{Blake3, HashProtocol, RawDigest};
use crate::node::{AnyNode, Commit, CommitHandle, FileHandle, FileVersion, Snapshot, SnapshotHandle};
use crate::path::Path;

const ANCESTOR_CACHE_ITEMS: usize = 1 << 16;

/// Append-only store of versioned nodes, keyed by content address.
pub struct ObjectGraph<H: HashProtocol = Blake3> {
    nodes: RwLock<HashMap<RawDigest, AnyNode<H>>>,
    ancestors: Cache<RawDigest, Arc<HashSet<RawDigest>>>,
}

impl<H: HashProtocol> ObjectGraph<H> {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            ancestors: Cache::new(ANCESTOR_CACHE_ITEMS),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().map(|nodes| nodes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, digest: &RawDigest) -> bool {
        self.nodes
            .read()
            .map(|nodes| nodes.contains_key(digest))
            .unwrap_or(false)
    }

    pub fn node(&self, digest: &RawDigest) -> Option<AnyNode<H>> {
        self.nodes.read().ok()?.get(digest).cloned()
    }

    /// The digests of every stored node.
    pub fn digests(&self) -> Vec<RawDigest> {
        self.nodes
            .read()
            .map(|nodes| nodes.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn file(&self, handle: &FileHandle<H>) -> Result<Arc<FileVersion<H>>, NotFoundError> {
        match self.node(handle.raw()) {
            Some(AnyNode::File(file)) => Ok(file),
            _ => Err(NotFoundError(*handle.raw())),
        }
    }

    pub fn snapshot(&self, handle: &SnapshotHandle<H>) -> Result<Arc<Snapshot<H>>, NotFoundError> {
        match self.node(handle.raw()) {
            Some(AnyNode::Snapshot(snapshot)) => Ok(snapshot),
            _ => Err(NotFoundError(*handle.raw())),
        }
    }

    pub fn commit(&self, handle: &CommitHandle<H>) -> Result<Arc<Commit<H>>, NotFoundError> {
        match self.node(handle.raw()) {
            Some(AnyNode::Commit(commit)) => Ok(commit),
            _ => Err(NotFoundError(*handle.raw())),
        }
    }

    /// Insert a file version, or resolve it to the already-stored node
    /// with the same defining attributes.
    ///
    /// Beyond the generic checks this validates the file-history rule
    /// that parent versions live at the same path.
    pub fn insert_file(&self, file: FileVersion<H>) -> Result<FileHandle<H>, InsertError> {
        for parent in file.parents().iter() {
            let parent = self
                .file(&parent)
                .map_err(|e| InsertError::UnknownParent(e.0))?;
            if parent.path() != file.path() {
                return Err(InsertError::ParentPathMismatch {
                    expected: file.path().clone(),
                    found: parent.path().clone(),
                });
            }
        }
        let handle = file.handle();
        self.insert_or_get(AnyNode::File(Arc::new(file)))?;
        Ok(handle)
    }

    pub(crate) fn insert_snapshot(
        &self,
        snapshot: Snapshot<H>,
    ) -> Result<SnapshotHandle<H>, InsertError> {
        let handle = snapshot.handle();
        self.insert_or_get(AnyNode::Snapshot(Arc::new(snapshot)))?;
        Ok(handle)
    }

    pub(crate) fn insert_commit(&self, commit: Commit<H>) -> Result<CommitHandle<H>, InsertError> {
        let handle = commit.handle();
        self.insert_or_get(AnyNode::Commit(Arc::new(commit)))?;
        Ok(handle)
    }

    /// The lookup-or-insert at the heart of the engine.
    ///
    /// Parent existence and acyclicity are checked before the write lock
    /// is taken; both facts are stable because the graph only grows.
    fn insert_or_get(&self, node: AnyNode<H>) -> Result<RawDigest, InsertError> {
        let digest = node.raw_digest();

        if self.contains(&digest) {
            trace!(kind = node.kind(), "node already present");
            return Ok(digest);
        }

        for parent in node.parent_digests() {
            if parent == digest {
                return Err(InsertError::Cycle(digest));
            }
            let closure = self
                .ancestors(&parent)
                .map_err(|e| InsertError::UnknownParent(e.0))?;
            if closure.contains(&digest) {
                return Err(InsertError::Cycle(digest));
            }
        }

        let mut nodes = self.nodes.write()?;
        if !nodes.contains_key(&digest) {
            debug!(
                kind = node.kind(),
                digest = %hex::encode_upper(digest),
                "inserted node"
            );
            nodes.insert(digest, node);
        }
        Ok(digest)
    }

    /// The transitive parent closure of a node, memoized per digest.
    ///
    /// Closures of immutable nodes never change, so cache entries are
    /// computed at most once per eviction lifetime and never invalidated.
    pub fn ancestors(&self, digest: &RawDigest) -> Result<Arc<HashSet<RawDigest>>, NotFoundError> {
        if let Some(hit) = self.ancestors.get(digest) {
            return Ok(hit);
        }

        // Post-order walk with an explicit stack. `local` keeps every
        // closure computed during this call, so cache evictions mid-walk
        // only cost recomputation, never correctness.
        let mut local: HashMap<RawDigest, Arc<HashSet<RawDigest>>> = HashMap::new();
        let mut stack = vec![*digest];

        while let Some(&current) = stack.last() {
            if local.contains_key(&current) {
                stack.pop();
                continue;
            }
            if let Some(hit) = self.ancestors.get(&current) {
                local.insert(current, hit);
                stack.pop();
                continue;
            }

            let node = self.node(&current).ok_or(NotFoundError(current))?;
            let parents = node.parent_digests();
            let pending: Vec<_> = parents
                .iter()
                .filter(|p| !local.contains_key(*p))
                .copied()
                .collect();

            if pending.is_empty() {
                let mut closure = HashSet::new();
                for parent in parents {
                    closure.insert(parent);
                    closure.extend(local[&parent].iter().copied());
                }
                let closure = Arc::new(closure);
                self.ancestors.insert(current, closure.clone());
                local.insert(current, closure);
                stack.pop();
            } else {
                stack.extend(pending);
            }
        }

        Ok(local[digest].clone())
    }
}

impl<H: HashProtocol> Default for ObjectGraph<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HashProtocol> Debug for ObjectGraph<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectGraph")
            .field("nodes", &self.len())
            .finish()
    }
}

#[derive(Debug)]
pub enum InsertError {
    /// The candidate would appear in its own parent closure.
    Cycle(RawDigest),
    /// A declared parent is not part of the graph.
    UnknownParent(RawDigest),
    /// A file version's parent lives at a different path.
    ParentPathMismatch { expected: Path, found: Path },
    Poisoned,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycle(digest) => {
                write!(f, "node {} would be its own ancestor", hex::encode_upper(digest))
            }
            Self::UnknownParent(digest) => {
                write!(f, "parent {} is not in the graph", hex::encode_upper(digest))
            }
            Self::ParentPathMismatch { expected, found } => write!(
                f,
                "file parent lives at {found}, expected {expected}"
            ),
            Self::Poisoned => write!(f, "graph lock poisoned"),
        }
    }
}

impl Error for InsertError {}

impl<T> From<PoisonError<T>> for InsertError {
    fn from(_: PoisonError<T>) -> Self {
        InsertError::Poisoned
    }
}

/// No node with the requested digest is stored in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFoundError(pub RawDigest);

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no node for digest {} in graph", hex::encode_upper(self.0))
    }
}

impl Error for NotFoundError {}
