//! Building and interrogating directory snapshots.
//!
//! A snapshot is a flat map from path to file version. Flatness is what
//! makes the diff engine tractable, but it admits one class of malformed
//! input: an entry set containing both a file and a file nested below it
//! (`"a"` and `"a/b"`). [`build_snapshot`] rejects those before the node
//! ever reaches the graph.
//!
//! Because snapshot keys are sorted and the strict-prefix relation is
//! interval-closed under the path order, the conflict scan only compares
//! adjacent keys.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::graph::{InsertError, NotFoundError, ObjectGraph};
use crate::hash::HashProtocol;
use crate::node::{FileHandle, Parents, Snapshot, SnapshotHandle};
use crate::path::Path;

/// Validate an entry map and insert it as a snapshot node.
///
/// Checks, in order: no two entry paths are ordered; every entry's file
/// version exists and carries the entry's own path. The insert itself is
/// the graph's lookup-or-insert, so building the same entry map against
/// the same parents twice returns the same handle.
pub fn build_snapshot<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    entries: BTreeMap<Path, FileHandle<H>>,
    parents: Parents<SnapshotHandle<H>>,
) -> Result<SnapshotHandle<H>, SnapshotError> {
    for (first, second) in entries.keys().tuple_windows() {
        if first.is_prefix_of(second) {
            return Err(SnapshotError::PathConflict {
                first: first.clone(),
                second: second.clone(),
            });
        }
    }

    for (path, handle) in &entries {
        let file = graph
            .file(handle)
            .map_err(|e| SnapshotError::UnknownFile(e))?;
        if file.path() != path {
            return Err(SnapshotError::EntryPathMismatch {
                entry: path.clone(),
                file: file.path().clone(),
            });
        }
    }

    let handle = graph.insert_snapshot(Snapshot::new(entries, parents))?;
    Ok(handle)
}

/// The union of all paths held by the given parent snapshots.
pub fn parent_paths<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    parents: &Parents<SnapshotHandle<H>>,
) -> Result<BTreeSet<Path>, NotFoundError> {
    let mut paths = BTreeSet::new();
    for snapshot in resolve_parents(graph, parents)? {
        paths.extend(snapshot.paths().cloned());
    }
    Ok(paths)
}

pub(crate) fn resolve_parents<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    parents: &Parents<SnapshotHandle<H>>,
) -> Result<Vec<Arc<Snapshot<H>>>, NotFoundError> {
    parents.iter().map(|p| graph.snapshot(&p)).collect()
}

#[derive(Debug)]
pub enum SnapshotError {
    /// Two entries where one path strictly prefixes the other.
    PathConflict { first: Path, second: Path },
    /// An entry's file version lives at a different path than its key.
    EntryPathMismatch { entry: Path, file: Path },
    /// An entry references a file version the graph does not hold.
    UnknownFile(NotFoundError),
    Insert(InsertError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathConflict { first, second } => {
                write!(f, "snapshot holds both {first} and {second}")
            }
            Self::EntryPathMismatch { entry, file } => {
                write!(f, "entry at {entry} references a file version for {file}")
            }
            Self::UnknownFile(e) => write!(f, "snapshot entry: {e}"),
            Self::Insert(e) => write!(f, "{e}"),
        }
    }
}

impl Error for SnapshotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownFile(e) => Some(e),
            Self::Insert(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InsertError> for SnapshotError {
    fn from(value: InsertError) -> Self {
        SnapshotError::Insert(value)
    }
}
