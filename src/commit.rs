//! Appending commits to a recorded history.
//!
//! A [`History`] is the engine's notion of "what has happened": the
//! append-only set of commits accepted so far, plus a head pointer naming
//! the latest of them. Appending is optimistic, in the shape of the
//! compare-and-swap a storage layer would run against a branch pointer:
//! the caller observes a head, builds a candidate against it, and asks
//! the history to advance. If the head moved in the meantime the caller
//! gets [`CommitOutcome::Conflict`] with the current head back, not an
//! error, an invitation to re-validate and retry.
//!
//! Validation runs four checks in order, first failure wins:
//!
//! 1. every declared parent commit is recorded history;
//! 2. the snapshot is not resurrected from deeper history (a direct
//!    parent's snapshot is the only permissible reuse);
//! 3. the snapshot's parent set mirrors the commit's parent set;
//! 4. every file version's parent set matches the file versions at the
//!    same path in the parent snapshots, and actually changes something.
//!
//! The whole append is one critical section over the history state, so
//! nothing is mutated until every check has passed: a rejected candidate
//! leaves the graph, the recorded set and the head untouched.

use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{self, Debug};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::graph::{InsertError, NotFoundError, ObjectGraph};
use crate::hash::{Blake3, HashProtocol, RawDigest};
use crate::node::{AnyNode, Commit, CommitHandle, FileHandle, Parents, Snapshot, SnapshotHandle};
use crate::path::Path;

/// Validation policy knobs.
///
/// The engine's default forbids no-op commits: a commit must change its
/// snapshot relative to its parents. Allowing them is a deliberate
/// opt-in for callers that want empty commits as history markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitPolicy {
    /// Permit a commit whose snapshot is exactly a direct parent's
    /// snapshot, and skip the per-file no-op rejection.
    pub allow_noop_commits: bool,
}

struct HistoryState<H: HashProtocol> {
    head: Option<CommitHandle<H>>,
    recorded: HashSet<RawDigest>,
}

/// A recorded commit history: the set of accepted commits and its head.
pub struct History<H: HashProtocol = Blake3> {
    state: RwLock<HistoryState<H>>,
    policy: CommitPolicy,
}

/// Result of a commit attempt whose validation was reached.
pub enum CommitOutcome<H: HashProtocol> {
    /// The head was advanced to the (possibly deduplicated) commit.
    Committed(CommitHandle<H>),
    /// The head moved between observation and the swap; re-validate
    /// against `current` and retry.
    Conflict { current: Option<CommitHandle<H>> },
}

impl<H: HashProtocol> Copy for CommitOutcome<H> {}

impl<H: HashProtocol> Clone for CommitOutcome<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: HashProtocol> PartialEq for CommitOutcome<H> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Committed(a), Self::Committed(b)) => a == b,
            (Self::Conflict { current: a }, Self::Conflict { current: b }) => a == b,
            _ => false,
        }
    }
}

impl<H: HashProtocol> Eq for CommitOutcome<H> {}

impl<H: HashProtocol> Debug for CommitOutcome<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed(handle) => f.debug_tuple("Committed").field(handle).finish(),
            Self::Conflict { current } => f
                .debug_struct("Conflict")
                .field("current", current)
                .finish(),
        }
    }
}

impl<H: HashProtocol> History<H> {
    pub fn new() -> Self {
        Self::with_policy(CommitPolicy::default())
    }

    pub fn with_policy(policy: CommitPolicy) -> Self {
        Self {
            state: RwLock::new(HistoryState {
                head: None,
                recorded: HashSet::new(),
            }),
            policy,
        }
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    pub fn head(&self) -> Option<CommitHandle<H>> {
        self.state.read().ok().and_then(|state| state.head)
    }

    /// True if the commit has been accepted into this history.
    pub fn records(&self, commit: &CommitHandle<H>) -> bool {
        self.state
            .read()
            .map(|state| state.recorded.contains(commit.raw()))
            .unwrap_or(false)
    }

    /// Validate `candidate` against this history and compare-and-swap
    /// the head from `observed` to the candidate.
    pub fn commit(
        &self,
        graph: &ObjectGraph<H>,
        observed: Option<CommitHandle<H>>,
        candidate: Commit<H>,
    ) -> Result<CommitOutcome<H>, CommitError> {
        let mut state = self.state.write()?;
        if state.head != observed {
            debug!("commit head moved, returning conflict");
            return Ok(CommitOutcome::Conflict {
                current: state.head,
            });
        }

        validate(graph, &state.recorded, &candidate, self.policy)?;

        let handle = graph.insert_commit(candidate)?;
        state.recorded.insert(*handle.raw());
        state.head = Some(handle);
        debug!(head = %hex::encode_upper(handle.raw()), "advanced history head");
        Ok(CommitOutcome::Committed(handle))
    }
}

impl<H: HashProtocol> Default for History<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HashProtocol> Debug for History<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("head", &self.head())
            .field("policy", &self.policy)
            .finish()
    }
}

fn validate<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    recorded: &HashSet<RawDigest>,
    candidate: &Commit<H>,
    policy: CommitPolicy,
) -> Result<(), CommitError> {
    // Check 1: parents are recorded history.
    for parent in candidate.parents().iter() {
        if !recorded.contains(parent.raw()) {
            return Err(CommitError::MissingParent(*parent.raw()));
        }
    }

    let snapshot = graph
        .snapshot(&candidate.snapshot())
        .map_err(|e| CommitError::UnknownReference(e.0))?;

    let parent_commits: Vec<Arc<Commit<H>>> = candidate
        .parents()
        .iter()
        .map(|p| graph.commit(&p))
        .collect::<Result<_, _>>()
        .map_err(|e| CommitError::UnknownReference(e.0))?;
    let parent_snapshot_handles: BTreeSet<SnapshotHandle<H>> =
        parent_commits.iter().map(|c| c.snapshot()).collect();

    // Check 2: no resurrecting a snapshot from deeper history. Direct
    // parents' snapshots are exempt.
    if !parent_snapshot_handles.contains(&candidate.snapshot()) {
        for ancestor in commit_ancestors(graph, candidate)? {
            if ancestor.snapshot() == candidate.snapshot() {
                return Err(CommitError::SnapshotReuse(*candidate.snapshot().raw()));
            }
        }
    } else if policy.allow_noop_commits {
        // The snapshot was fully validated when it was first committed;
        // correspondence and file continuity held there, and a no-op
        // commit deliberately repeats it.
        return Ok(());
    }

    // Check 3: snapshot ancestry mirrors commit ancestry.
    let declared: BTreeSet<SnapshotHandle<H>> = snapshot.parents().iter().collect();
    if declared != parent_snapshot_handles {
        return Err(CommitError::SnapshotAncestryMismatch {
            declared: declared.iter().map(|h| *h.raw()).collect(),
            required: parent_snapshot_handles.iter().map(|h| *h.raw()).collect(),
        });
    }

    // Check 4: file-history continuity.
    let parent_snapshots: Vec<Arc<Snapshot<H>>> = parent_commits
        .iter()
        .map(|c| graph.snapshot(&c.snapshot()))
        .collect::<Result<_, _>>()
        .map_err(|e| CommitError::UnknownReference(e.0))?;

    for (path, file) in snapshot.entries() {
        let expected: BTreeSet<FileHandle<H>> = parent_snapshots
            .iter()
            .filter_map(|p| p.get(path))
            .collect();

        if expected.contains(file) {
            // Carried from a parent snapshot, including the per-file
            // resolution of a merge by taking one side wholesale. Its
            // own history was validated when that parent was committed;
            // the continuity rule binds versions this commit introduces.
            continue;
        }

        let version = graph
            .file(file)
            .map_err(|e| CommitError::UnknownReference(e.0))?;
        let declared: BTreeSet<FileHandle<H>> = version.parents().iter().collect();
        if declared != expected {
            return Err(CommitError::FileHistory(path.clone()));
        }

        if !policy.allow_noop_commits && !expected.is_empty() {
            let mut differs = false;
            for parent in &expected {
                let parent = graph
                    .file(parent)
                    .map_err(|e| CommitError::UnknownReference(e.0))?;
                if parent.content() != version.content() {
                    differs = true;
                    break;
                }
            }
            if !differs {
                return Err(CommitError::NoOpFile(path.clone()));
            }
        }
    }

    Ok(())
}

/// Strict ancestors of a not-yet-inserted candidate: its parents plus
/// their closures.
fn commit_ancestors<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    candidate: &Commit<H>,
) -> Result<Vec<Arc<Commit<H>>>, CommitError> {
    let mut digests: BTreeSet<RawDigest> = BTreeSet::new();
    for parent in candidate.parents().iter() {
        digests.insert(*parent.raw());
        let closure = graph
            .ancestors(parent.raw())
            .map_err(|e| CommitError::UnknownReference(e.0))?;
        digests.extend(closure.iter().copied());
    }
    let mut ancestors = Vec::with_capacity(digests.len());
    for digest in digests {
        match graph.node(&digest) {
            Some(AnyNode::Commit(commit)) => ancestors.push(commit),
            _ => return Err(CommitError::UnknownReference(digest)),
        }
    }
    Ok(ancestors)
}

/// The parent set of a recorded commit.
pub fn parents_of<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    commit: CommitHandle<H>,
) -> Result<Parents<CommitHandle<H>>, NotFoundError> {
    Ok(*graph.commit(&commit)?.parents())
}

/// Walk `n` first-parent steps up from `commit`.
pub fn nth_ancestor<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    commit: CommitHandle<H>,
    n: u64,
) -> Result<Option<CommitHandle<H>>, NotFoundError> {
    let mut current = commit;
    for _ in 0..n {
        match graph.commit(&current)?.parents().iter().next() {
            Some(parent) => current = parent,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Commits reachable from exactly one of the two heads.
///
/// The classic pre-merge question: what would merging `b` into `a`
/// actually bring in, and what does `a` have that `b` lacks.
pub fn symmetric_diff<H: HashProtocol>(
    graph: &ObjectGraph<H>,
    a: CommitHandle<H>,
    b: CommitHandle<H>,
) -> Result<Vec<CommitHandle<H>>, NotFoundError> {
    let mut of_a: BTreeSet<RawDigest> = graph.ancestors(a.raw())?.iter().copied().collect();
    of_a.insert(*a.raw());
    let mut of_b: BTreeSet<RawDigest> = graph.ancestors(b.raw())?.iter().copied().collect();
    of_b.insert(*b.raw());

    Ok(of_a
        .symmetric_difference(&of_b)
        .map(|digest| CommitHandle::new(*digest))
        .collect())
}

#[derive(Debug)]
pub enum CommitError {
    /// A declared parent commit is not part of recorded history.
    MissingParent(RawDigest),
    /// The snapshot belongs to an ancestor commit that is not a direct
    /// parent.
    SnapshotReuse(RawDigest),
    /// The snapshot's parent set does not mirror the commit's parents.
    SnapshotAncestryMismatch {
        declared: Vec<RawDigest>,
        required: Vec<RawDigest>,
    },
    /// A file version's parent set does not match the versions at its
    /// path in the parent snapshots.
    FileHistory(Path),
    /// A file version that changes nothing relative to its parents.
    NoOpFile(Path),
    /// A handle named during validation resolves to nothing.
    UnknownReference(RawDigest),
    Insert(InsertError),
    Poisoned,
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParent(digest) => write!(
                f,
                "parent commit {} is not recorded history",
                hex::encode_upper(digest)
            ),
            Self::SnapshotReuse(digest) => write!(
                f,
                "snapshot {} is resurrected from deeper history",
                hex::encode_upper(digest)
            ),
            Self::SnapshotAncestryMismatch { .. } => {
                write!(f, "snapshot ancestry does not mirror commit ancestry")
            }
            Self::FileHistory(path) => {
                write!(f, "file history at {path} does not continue its parents")
            }
            Self::NoOpFile(path) => {
                write!(f, "file version at {path} changes nothing")
            }
            Self::UnknownReference(digest) => write!(
                f,
                "no node for digest {} in graph",
                hex::encode_upper(digest)
            ),
            Self::Insert(e) => write!(f, "{e}"),
            Self::Poisoned => write!(f, "history lock poisoned"),
        }
    }
}

impl Error for CommitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Insert(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InsertError> for CommitError {
    fn from(value: InsertError) -> Self {
        CommitError::Insert(value)
    }
}

impl<T> From<PoisonError<T>> for CommitError {
    fn from(_: PoisonError<T>) -> Self {
        CommitError::Poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Digest;
    use crate::node::FileVersion;
    use crate::snapshot::build_snapshot;

    type Step = (
        CommitHandle<Blake3>,
        SnapshotHandle<Blake3>,
        FileHandle<Blake3>,
    );

    fn path(s: &str) -> Path {
        s.parse().expect("test path should parse")
    }

    fn content(byte: u8) -> Digest<Blake3> {
        Digest::of_bytes(&[byte])
    }

    /// One linear step: a new version of "a" with content `byte` on top
    /// of `base`.
    fn step(graph: &ObjectGraph, history: &History, base: Option<Step>, byte: u8) -> Step {
        let (commit_parents, snapshot_parents, file_parents) = match base {
            None => (Parents::none(), Parents::none(), Parents::none()),
            Some((c, s, f)) => (Parents::one(c), Parents::one(s), Parents::one(f)),
        };
        let file = graph
            .insert_file(FileVersion::new(path("a"), content(byte), file_parents))
            .expect("file insert");
        let snapshot = build_snapshot(graph, [(path("a"), file)].into(), snapshot_parents)
            .expect("snapshot build");
        let outcome = history
            .commit(
                graph,
                base.map(|(c, _, _)| c),
                Commit::new(snapshot, commit_parents),
            )
            .expect("commit should validate");
        match outcome {
            CommitOutcome::Committed(handle) => (handle, snapshot, file),
            CommitOutcome::Conflict { .. } => panic!("expected successful commit"),
        }
    }

    #[test]
    fn linear_history_commits() {
        let graph: ObjectGraph = ObjectGraph::new();
        let history: History = History::new();

        let first = step(&graph, &history, None, 1);
        let second = step(&graph, &history, Some(first), 2);

        assert_eq!(history.head(), Some(second.0));
        assert!(history.records(&first.0));
        assert_eq!(
            nth_ancestor(&graph, second.0, 1).expect("recorded"),
            Some(first.0)
        );
        assert_eq!(nth_ancestor(&graph, second.0, 2).expect("recorded"), None);
    }

    #[test]
    fn missing_parent_is_rejected() {
        let graph: ObjectGraph = ObjectGraph::new();
        let history: History = History::new();

        let first = step(&graph, &history, None, 1);

        // Same candidate shape, but offered to a history that never
        // recorded the parent commit.
        let file = graph
            .insert_file(FileVersion::new(
                path("a"),
                content(9),
                Parents::one(first.2),
            ))
            .expect("file insert");
        let snapshot = build_snapshot(&graph, [(path("a"), file)].into(), Parents::one(first.1))
            .expect("snapshot build");
        let other: History = History::new();
        let err = other
            .commit(&graph, None, Commit::new(snapshot, Parents::one(first.0)))
            .expect_err("parent not recorded");
        assert!(matches!(err, CommitError::MissingParent(_)));
    }

    #[test]
    fn grandparent_snapshot_reuse_is_rejected() {
        let graph: ObjectGraph = ObjectGraph::new();
        let history: History = History::new();

        let first = step(&graph, &history, None, 1);
        let second = step(&graph, &history, Some(first), 2);

        // Candidate reusing the grandparent's snapshot wholesale.
        let err = history
            .commit(
                &graph,
                Some(second.0),
                Commit::new(first.1, Parents::one(second.0)),
            )
            .expect_err("snapshot resurrected from deeper history");
        assert!(matches!(err, CommitError::SnapshotReuse(_)));
    }

    #[test]
    fn noop_commit_forbidden_by_default_allowed_by_policy() {
        let graph: ObjectGraph = ObjectGraph::new();

        let strict: History = History::new();
        let first = step(&graph, &strict, None, 1);

        // Reusing the direct parent's snapshot passes the reuse check
        // but trips ancestry correspondence under the default policy.
        let err = strict
            .commit(
                &graph,
                Some(first.0),
                Commit::new(first.1, Parents::one(first.0)),
            )
            .expect_err("no-op commit under default policy");
        assert!(matches!(err, CommitError::SnapshotAncestryMismatch { .. }));

        let lenient: History = History::with_policy(CommitPolicy {
            allow_noop_commits: true,
        });
        let first = step(&graph, &lenient, None, 1);
        let outcome = lenient
            .commit(
                &graph,
                Some(first.0),
                Commit::new(first.1, Parents::one(first.0)),
            )
            .expect("no-op commit under lenient policy");
        assert!(matches!(outcome, CommitOutcome::Committed(_)));
    }

    #[test]
    fn snapshot_ancestry_must_mirror_commit_ancestry() {
        let graph: ObjectGraph = ObjectGraph::new();
        let history: History = History::new();

        let first = step(&graph, &history, None, 1);

        // New snapshot claiming no parents, attached to a commit that
        // has one.
        let file = graph
            .insert_file(FileVersion::new(
                path("a"),
                content(2),
                Parents::one(first.2),
            ))
            .expect("file insert");
        let snapshot = build_snapshot(&graph, [(path("a"), file)].into(), Parents::none())
            .expect("snapshot build");
        let err = history
            .commit(
                &graph,
                Some(first.0),
                Commit::new(snapshot, Parents::one(first.0)),
            )
            .expect_err("snapshot parents do not mirror commit parents");
        assert!(matches!(err, CommitError::SnapshotAncestryMismatch { .. }));
    }

    #[test]
    fn file_continuity_is_enforced() {
        let graph: ObjectGraph = ObjectGraph::new();
        let history: History = History::new();

        let first = step(&graph, &history, None, 1);

        // A rootless file version where a descendant of first's file is
        // required.
        let orphan = graph
            .insert_file(FileVersion::new(path("a"), content(2), Parents::none()))
            .expect("file insert");
        let snapshot = build_snapshot(&graph, [(path("a"), orphan)].into(), Parents::one(first.1))
            .expect("snapshot build");
        let err = history
            .commit(
                &graph,
                Some(first.0),
                Commit::new(snapshot, Parents::one(first.0)),
            )
            .expect_err("file version severs its history");
        assert!(matches!(err, CommitError::FileHistory(_)));
    }

    #[test]
    fn noop_file_rewrite_is_rejected() {
        let graph: ObjectGraph = ObjectGraph::new();
        let history: History = History::new();

        let first = step(&graph, &history, None, 1);

        // Same content as the parent version, new node.
        let rewrite = graph
            .insert_file(FileVersion::new(
                path("a"),
                content(1),
                Parents::one(first.2),
            ))
            .expect("file insert");
        let snapshot = build_snapshot(&graph, [(path("a"), rewrite)].into(), Parents::one(first.1))
            .expect("snapshot build");
        let err = history
            .commit(
                &graph,
                Some(first.0),
                Commit::new(snapshot, Parents::one(first.0)),
            )
            .expect_err("content-identical rewrite");
        assert!(matches!(err, CommitError::NoOpFile(_)));
    }

    #[test]
    fn cas_conflict_and_retry() {
        let graph: ObjectGraph = ObjectGraph::new();
        let history: History = History::new();

        let first = step(&graph, &history, None, 1);

        // Two writers observe the same head and build competing commits.
        let build_candidate = |byte: u8, base: Step| {
            let file = graph
                .insert_file(FileVersion::new(
                    path("a"),
                    content(byte),
                    Parents::one(base.2),
                ))
                .expect("file insert");
            let snapshot =
                build_snapshot(&graph, [(path("a"), file)].into(), Parents::one(base.1))
                    .expect("snapshot build");
            Commit::new(snapshot, Parents::one(base.0))
        };

        let winner = history
            .commit(&graph, Some(first.0), build_candidate(2, first))
            .expect("validates");
        let CommitOutcome::Committed(winner) = winner else {
            panic!("first writer should win");
        };

        let loser = history
            .commit(&graph, Some(first.0), build_candidate(3, first))
            .expect("stale head is an outcome, not an error");
        let CommitOutcome::Conflict { current } = loser else {
            panic!("second writer should conflict");
        };
        assert_eq!(current, Some(winner));

        // Retry against the updated head.
        let winner_snapshot = graph.commit(&winner).expect("recorded").snapshot();
        let winner_file = graph
            .snapshot(&winner_snapshot)
            .expect("recorded")
            .get(&path("a"))
            .expect("entry");
        let retry = history
            .commit(
                &graph,
                Some(winner),
                build_candidate(3, (winner, winner_snapshot, winner_file)),
            )
            .expect("validates");
        assert!(matches!(retry, CommitOutcome::Committed(_)));
    }

    #[test]
    fn merge_commit_joins_both_histories() {
        let graph: ObjectGraph = ObjectGraph::new();
        let history: History = History::new();

        let base = step(&graph, &history, None, 1);
        let left = step(&graph, &history, Some(base), 2);

        // The sibling line forks from base: committed with the left tip
        // observed, so the history records both lines.
        let right_file = graph
            .insert_file(FileVersion::new(path("a"), content(3), Parents::one(base.2)))
            .expect("file insert");
        let right_snapshot = build_snapshot(
            &graph,
            [(path("a"), right_file)].into(),
            Parents::one(base.1),
        )
        .expect("snapshot build");
        let outcome = history
            .commit(
                &graph,
                Some(left.0),
                Commit::new(right_snapshot, Parents::one(base.0)),
            )
            .expect("fork commit validates");
        let CommitOutcome::Committed(right) = outcome else {
            panic!("fork should commit");
        };

        // Merge: both tips become parents; the merged file version joins
        // both file histories.
        let merged_file = graph
            .insert_file(FileVersion::new(
                path("a"),
                content(4),
                Parents::two(left.2, right_file),
            ))
            .expect("file insert");
        let merged_snapshot = build_snapshot(
            &graph,
            [(path("a"), merged_file)].into(),
            Parents::two(left.1, right_snapshot),
        )
        .expect("snapshot build");
        let outcome = history
            .commit(
                &graph,
                Some(right),
                Commit::new(merged_snapshot, Parents::two(left.0, right)),
            )
            .expect("merge validates");
        let CommitOutcome::Committed(merge) = outcome else {
            panic!("merge should commit");
        };

        let expected: BTreeSet<RawDigest> = [*left.0.raw(), *right.raw()].into();
        let sym: BTreeSet<RawDigest> = symmetric_diff(&graph, left.0, right)
            .expect("recorded")
            .iter()
            .map(|h| *h.raw())
            .collect();
        assert_eq!(sym, expected);
        assert!(symmetric_diff(&graph, merge, merge)
            .expect("recorded")
            .is_empty());
    }
}
