//! Computing diff records between a snapshot and its parent set.
//!
//! A [`DiffRecord`] is the compact, replayable description of how a
//! target snapshot differs from a set of parent snapshots: paths added,
//! paths remapped to a different file version, paths deleted. It is a
//! pure value derived from graph state, never a node itself.
//!
//! The subtle part is the conflict sweep. Paths across a *set* of parents
//! can collide structurally (one parent holds the file `"a"`, another
//! the file `"a/b"`) even though each parent on its own is well formed.
//! Any parent path implicated in such a collision must be recorded
//! explicitly, never left to survive implicitly into reconstruction:
//!
//! * gone from the target: recorded as deleted (this is also where a
//!   file-to-directory turn like `"a"` → `"a/b"` lands);
//! * still present in the target: re-recorded as modified, mapped to
//!   the target's version, even when a parent already agrees with it.
//!
//! Without the second arm, [`apply`](crate::apply::apply) would treat the
//! surviving path as contested and drop it, and the record would no
//! longer replay to the target.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{self, Debug};
use std::ops::Bound;

use tracing::debug;

use crate::graph::{NotFoundError, ObjectGraph};
use crate::hash::{HashProtocol, RawDigest};
use crate::node::{FileHandle, Parents, SnapshotHandle};
use crate::path::Path;
use crate::snapshot::resolve_parents;

/// How one snapshot differs from a set of parent snapshots.
///
/// Invariants, guaranteed by [`diff`]: `added`, `modified` and `deleted`
/// are pairwise disjoint over paths; added paths are absent from every
/// parent; deleted paths are present in some parent; a modified path is
/// either mapped differently by some parent that contains it, or is a
/// conflict re-record (see the module docs).
pub struct DiffRecord<H: HashProtocol> {
    added: BTreeMap<Path, FileHandle<H>>,
    modified: BTreeMap<Path, FileHandle<H>>,
    deleted: BTreeSet<Path>,
    target: SnapshotHandle<H>,
    parents: Parents<SnapshotHandle<H>>,
}

impl<H: HashProtocol> DiffRecord<H> {
    pub fn added(&self) -> &BTreeMap<Path, FileHandle<H>> {
        &self.added
    }

    pub fn modified(&self) -> &BTreeMap<Path, FileHandle<H>> {
        &self.modified
    }

    pub fn deleted(&self) -> &BTreeSet<Path> {
        &self.deleted
    }

    /// The snapshot this record was derived from.
    pub fn target(&self) -> SnapshotHandle<H> {
        self.target
    }

    /// The parent set this record replays against.
    pub fn parents(&self) -> &Parents<SnapshotHandle<H>> {
        &self.parents
    }

    /// True when replaying the record changes nothing about the parents.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Every path the record touches.
    pub fn touched_paths(&self) -> impl Iterator<Item = &Path> {
        self.added
            .keys()
            .chain(self.modified.keys())
            .chain(self.deleted.iter())
    }
}

/// Compute the diff record describing `target` against `parents`.
pub fn diff<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    target: SnapshotHandle<H>,
    parents: Parents<SnapshotHandle<H>>,
) -> Result<DiffRecord<H>, DiffError> {
    if parents.contains(&target) {
        return Err(DiffError::TargetIsParent(*target.raw()));
    }

    let target_snapshot = graph
        .snapshot(&target)
        .map_err(|e| DiffError::UnknownSnapshot(e.0))?;
    let parent_snapshots =
        resolve_parents(graph, &parents).map_err(|e| DiffError::UnknownSnapshot(e.0))?;

    let mut parent_paths: BTreeSet<Path> = BTreeSet::new();
    for parent in &parent_snapshots {
        parent_paths.extend(parent.paths().cloned());
    }

    let mut added = BTreeMap::new();
    let mut modified = BTreeMap::new();
    for (path, file) in target_snapshot.entries() {
        if !parent_paths.contains(path) {
            added.insert(path.clone(), *file);
        } else if parent_snapshots
            .iter()
            .any(|p| p.get(path).is_some_and(|theirs| theirs != *file))
        {
            modified.insert(path.clone(), *file);
        }
    }

    // Paths dropped outright.
    let deleted: BTreeSet<Path> = parent_paths
        .iter()
        .filter(|p| !target_snapshot.contains_path(p))
        .cloned()
        .collect();

    // Conflict sweep. Every parent path ordered with a touched path is
    // recorded explicitly. A parent path missing from the target is
    // already in `deleted` (it is a dropped path by definition), so the
    // sweep's only real additions are the target-surviving ones.
    let touched: BTreeSet<Path> = deleted
        .iter()
        .chain(added.keys())
        .chain(modified.keys())
        .cloned()
        .collect();
    for path in &parent_paths {
        if modified.contains_key(path) || !target_snapshot.contains_path(path) {
            continue;
        }
        if ordered_with_any(path, &touched) {
            let file = target_snapshot
                .get(path)
                .expect("path was just checked to be in the target");
            modified.insert(path.clone(), file);
        }
    }

    debug_assert!(added.keys().all(|p| !modified.contains_key(p) && !deleted.contains(p)));
    debug_assert!(modified.keys().all(|p| !deleted.contains(p)));
    debug_assert!(conflict_pairs_covered(&parent_paths, &modified, &deleted));

    debug!(
        added = added.len(),
        modified = modified.len(),
        deleted = deleted.len(),
        "computed diff record"
    );

    Ok(DiffRecord {
        added,
        modified,
        deleted,
        target,
        parents,
    })
}

/// True if some member of `set` is ordered with `path`.
///
/// Descendants of `path` sort as a contiguous run immediately after it,
/// so one successor probe settles that direction; ancestors are the
/// strict prefixes, each a plain membership test.
pub(crate) fn ordered_with_any(path: &Path, set: &BTreeSet<Path>) -> bool {
    if let Some(next) = set
        .range((Bound::Excluded(path), Bound::Unbounded))
        .next()
    {
        if path.is_prefix_of(next) {
            return true;
        }
    }
    path.prefixes().any(|prefix| set.contains(&prefix))
}

fn conflict_pairs_covered<H: HashProtocol>(
    parent_paths: &BTreeSet<Path>,
    modified: &BTreeMap<Path, FileHandle<H>>,
    deleted: &BTreeSet<Path>,
) -> bool {
    parent_paths.iter().all(|p| {
        let mut rest = parent_paths.range((Bound::Excluded(p), Bound::Unbounded));
        rest.all(|q| {
            !p.ordered_with(q)
                || ((modified.contains_key(p) || deleted.contains(p))
                    && (modified.contains_key(q) || deleted.contains(q)))
        })
    })
}

impl<H: HashProtocol> Clone for DiffRecord<H> {
    fn clone(&self) -> Self {
        Self {
            added: self.added.clone(),
            modified: self.modified.clone(),
            deleted: self.deleted.clone(),
            target: self.target,
            parents: self.parents,
        }
    }
}

impl<H: HashProtocol> PartialEq for DiffRecord<H> {
    fn eq(&self, other: &Self) -> bool {
        self.added == other.added
            && self.modified == other.modified
            && self.deleted == other.deleted
            && self.target == other.target
            && self.parents == other.parents
    }
}

impl<H: HashProtocol> Eq for DiffRecord<H> {}

impl<H: HashProtocol> Debug for DiffRecord<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffRecord")
            .field("added", &self.added)
            .field("modified", &self.modified)
            .field("deleted", &self.deleted)
            .field("target", &self.target)
            .field("parents", &self.parents)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffError {
    /// The target snapshot is a member of its own parent set.
    TargetIsParent(RawDigest),
    UnknownSnapshot(RawDigest),
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetIsParent(digest) => write!(
                f,
                "target snapshot {} is among its own parents",
                hex::encode_upper(digest)
            ),
            Self::UnknownSnapshot(digest) => write!(
                f,
                "no snapshot for digest {} in graph",
                hex::encode_upper(digest)
            ),
        }
    }
}

impl Error for DiffError {}

impl From<NotFoundError> for DiffError {
    fn from(value: NotFoundError) -> Self {
        DiffError::UnknownSnapshot(value.0)
    }
}
