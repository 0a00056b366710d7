//! The core versioning engine of a content-addressed version-control
//! system.
//!
//! The design is inspired by Mercurial's data model, with a focus on
//! object/content-addressed storage: every historical object, be it a file
//! version, a directory snapshot or a commit, is an immutable node in one
//! append-only DAG, identified by a hash over its defining attributes.
//! Identity by content means deduplication comes for free: building the
//! same object twice yields the same handle, and "is this the same
//! snapshot" is a pointer comparison rather than a tree walk.
//!
//! Three node kinds share one contract (at most two parents, never your
//! own ancestor), and each adds its own rules on top:
//!
//! * a [`FileVersion`](node::FileVersion) pins a path to an opaque
//!   content reference and to the prior versions it descends from;
//! * a [`Snapshot`](node::Snapshot) maps paths to file versions, with no
//!   path naming both a file and a directory above another file;
//! * a [`Commit`](node::Commit) ties exactly one snapshot into history.
//!
//! On top of the graph sit the two derivation engines and the validator:
//! [`diff`](diff::diff) compresses a snapshot against a set of parent
//! snapshots into a replayable add/mod/del record,
//! [`apply`](apply::apply) replays such a record back into the identical
//! snapshot, and [`History::commit`](commit::History::commit) guards the
//! cross-object invariants (file-history continuity, snapshot/commit
//! ancestry correspondence, no snapshot resurrection) before anything is
//! appended.
//!
//! Mutable state is reduced to an absolute minimum: the
//! [`ObjectGraph`](graph::ObjectGraph)'s lookup-or-insert and the
//! [`History`](commit::History) head are the only two synchronization
//! points. Everything else is a pure function over immutable values, so
//! diff and apply parallelize across independent requests without any
//! coordination. Storage, transport and working-directory concerns live
//! with the caller; this crate neither performs I/O nor prescribes a
//! wire format.
//!
//! # Example
//!
//! ```
//! use bonsai::prelude::*;
//! use std::collections::BTreeMap;
//!
//! let graph: ObjectGraph = ObjectGraph::new();
//! let history: History = History::new();
//!
//! // First snapshot: one file, no history.
//! let path: Path = "docs/intro".parse()?;
//! let v1 = graph.insert_file(FileVersion::new(
//!     path.clone(),
//!     Digest::of_bytes(b"hello"),
//!     Parents::none(),
//! ))?;
//! let snap1 = build_snapshot(&graph, BTreeMap::from([(path.clone(), v1)]), Parents::none())?;
//! let root = match history.commit(&graph, None, Commit::new(snap1, Parents::none()))? {
//!     CommitOutcome::Committed(handle) => handle,
//!     CommitOutcome::Conflict { .. } => unreachable!("no concurrent writer"),
//! };
//!
//! // Second snapshot: the file changes.
//! let v2 = graph.insert_file(FileVersion::new(
//!     path.clone(),
//!     Digest::of_bytes(b"hello, world"),
//!     Parents::one(v1),
//! ))?;
//! let snap2 = build_snapshot(&graph, BTreeMap::from([(path, v2)]), Parents::one(snap1))?;
//!
//! // The diff record replays to the identical snapshot.
//! let record = diff(&graph, snap2, Parents::one(snap1))?;
//! assert_eq!(record.modified().len(), 1);
//! assert_eq!(apply(&graph, &record, &Parents::one(snap1))?, snap2);
//!
//! // Append it to history against the observed head.
//! history.commit(&graph, Some(root), Commit::new(snap2, Parents::one(root)))?;
//! assert_eq!(history.head(), Some(Commit::new(snap2, Parents::one(root)).handle()));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod apply;
pub mod commit;
pub mod diff;
pub mod graph;
pub mod hash;
pub mod node;
pub mod path;
pub mod prelude;
pub mod snapshot;
