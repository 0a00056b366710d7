//! Replaying diff records back into snapshots.
//!
//! [`apply`] is the inverse of [`diff`](crate::diff::diff): parent
//! entries whose paths the record does not touch survive, the record's
//! additions and modifications land on top, and the result is built as a
//! snapshot with the supplied parent set. For any snapshot `m` built
//! against parents `P`, `apply(diff(m, P), P)` resolves to `m`'s own
//! handle: identity, not mere field equality, because the graph
//! deduplicates structurally.
//!
//! The parent set is an explicit argument: a record replayed against a
//! parent set it was not derived from is legal input, and a structurally
//! impossible combination surfaces as the path-conflict rejection from
//! snapshot construction.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;

use crate::diff::DiffRecord;
use crate::graph::{NotFoundError, ObjectGraph};
use crate::hash::{HashProtocol, RawDigest};
use crate::node::{Parents, SnapshotHandle};
use crate::path::Path;
use crate::snapshot::{build_snapshot, resolve_parents, SnapshotError};

/// Reconstruct a snapshot from a diff record and a parent set.
pub fn apply<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    record: &DiffRecord<H>,
    parents: &Parents<SnapshotHandle<H>>,
) -> Result<SnapshotHandle<H>, ApplyError> {
    let parent_snapshots =
        resolve_parents(graph, parents).map_err(|e| ApplyError::UnknownSnapshot(e.0))?;

    let touched: BTreeSet<&Path> = record.touched_paths().collect();

    let mut entries: BTreeMap<Path, _> = BTreeMap::new();
    for parent in &parent_snapshots {
        for (path, file) in parent.entries() {
            if !touched.contains(path) {
                // Contested paths are always touched, so the surviving
                // parents agree; first containing parent wins.
                entries.entry(path.clone()).or_insert(*file);
            }
        }
    }
    entries.extend(record.added().iter().map(|(p, f)| (p.clone(), *f)));
    entries.extend(record.modified().iter().map(|(p, f)| (p.clone(), *f)));

    let handle = build_snapshot(graph, entries, *parents)?;
    Ok(handle)
}

#[derive(Debug)]
pub enum ApplyError {
    UnknownSnapshot(RawDigest),
    /// The reconstructed entry set is not a valid snapshot; the record
    /// does not belong to this parent set.
    Snapshot(SnapshotError),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSnapshot(digest) => write!(
                f,
                "no snapshot for digest {} in graph",
                hex::encode_upper(digest)
            ),
            Self::Snapshot(e) => write!(f, "replayed record is malformed: {e}"),
        }
    }
}

impl Error for ApplyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Snapshot(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SnapshotError> for ApplyError {
    fn from(value: SnapshotError) -> Self {
        ApplyError::Snapshot(value)
    }
}

impl From<NotFoundError> for ApplyError {
    fn from(value: NotFoundError) -> Self {
        ApplyError::UnknownSnapshot(value.0)
    }
}
