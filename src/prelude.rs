pub use crate::apply::{apply, ApplyError};
pub use crate::commit::{
    nth_ancestor, parents_of, symmetric_diff, CommitError, CommitOutcome, CommitPolicy, History,
};
pub use crate::diff::{diff, DiffError, DiffRecord};
pub use crate::graph::{InsertError, NotFoundError, ObjectGraph};
pub use crate::hash::{Blake2b, Blake3, Digest, Handle, HashProtocol, RawDigest};
pub use crate::node::{
    AnyNode, Commit, CommitHandle, FileHandle, FileVersion, Parents, Snapshot, SnapshotHandle,
};
pub use crate::path::{Name, Path, PathParseError};
pub use crate::snapshot::{build_snapshot, parent_paths, SnapshotError};
