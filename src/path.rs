//! Hierarchical paths and the prefix relation between them.
//!
//! A [`Name`] is one atomic segment of a path; a [`Path`] is a non-empty
//! sequence of names. Paths are plain values with structural equality, so
//! two paths built from the same names are the same key in any collection
//! and deduplicate on their own.
//!
//! The load-bearing operation here is [`Path::is_prefix_of`]: two paths
//! are *ordered* when one strictly prefixes the other, which means one
//! names a file where the other names an ancestor directory. A valid
//! directory snapshot never holds an ordered pair.
//!
//! Paths order lexicographically by their names. Under that order the
//! strict-prefix relation is interval-closed: if `a < c < b` and `a`
//! prefixes `b`, then `a` prefixes `c`. Conflict detection over a sorted
//! path set therefore only ever needs to look at adjacent elements.

use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

use itertools::Itertools;

/// Separator used by the string rendering of paths.
pub const SEPARATOR: char = '/';

/// An atomic path segment. Non-empty, free of the separator and NUL.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(Arc<str>);

impl Name {
    pub fn new(name: &str) -> Result<Self, PathParseError> {
        if name.is_empty() {
            return Err(PathParseError::EmptyName);
        }
        if name.contains(SEPARATOR) || name.contains('\0') {
            return Err(PathParseError::InvalidName(name.to_string()));
        }
        Ok(Self(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({:?})", self.0)
    }
}

impl FromStr for Name {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::new(s)
    }
}

/// A non-empty sequence of names addressing a file in a snapshot.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Arc<[Name]>);

impl Path {
    pub fn new(names: Vec<Name>) -> Result<Self, PathParseError> {
        if names.is_empty() {
            return Err(PathParseError::Empty);
        }
        Ok(Self(names.into()))
    }

    pub fn names(&self) -> &[Name] {
        &self.0
    }

    /// Number of names in the path.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The path one level up, if any.
    pub fn parent(&self) -> Option<Path> {
        match self.0.len() {
            1 => None,
            n => Some(Path(self.0[..n - 1].into())),
        }
    }

    pub fn child(&self, name: Name) -> Path {
        let mut names = self.0.to_vec();
        names.push(name);
        Path(names.into())
    }

    /// True if `self`'s names are a *strict* prefix of `other`'s. A path
    /// never prefixes itself.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.0.len() < other.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True if one of the two paths strictly prefixes the other, i.e. one
    /// names a file where the other names an ancestor directory.
    pub fn ordered_with(&self, other: &Path) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// All strict prefixes of this path, shortest first.
    pub fn prefixes(&self) -> impl Iterator<Item = Path> + '_ {
        (1..self.0.len()).map(|end| Path(self.0[..end].into()))
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(&SEPARATOR.to_string()))
    }
}

impl Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self)
    }
}

impl FromStr for Path {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathParseError::Empty);
        }
        let names = s
            .split(SEPARATOR)
            .map(Name::new)
            .collect::<Result<Vec<_>, _>>()?;
        Path::new(names)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathParseError {
    Empty,
    EmptyName,
    InvalidName(String),
}

impl Display for PathParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "path needs at least one name"),
            Self::EmptyName => write!(f, "path names must be non-empty"),
            Self::InvalidName(name) => write!(f, "invalid characters in path name {name:?}"),
        }
    }
}

impl Error for PathParseError {}

#[cfg(feature = "proptest")]
pub mod strategies {
    //! Proptest strategies over a deliberately small alphabet, so that
    //! generated path sets actually collide and nest.

    use super::{Name, Path};
    use proptest::prelude::*;

    pub fn name() -> impl Strategy<Value = Name> {
        prop::sample::select(vec!["a", "b", "c", "d"])
            .prop_map(|s| Name::new(s).expect("alphabet names are valid"))
    }

    pub fn path(max_depth: usize) -> impl Strategy<Value = Path> {
        prop::collection::vec(name(), 1..=max_depth)
            .prop_map(|names| Path::new(names).expect("generated paths are non-empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Path {
        s.parse().expect("test path should parse")
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(path("a/b/c").to_string(), "a/b/c");
        assert_eq!(path("a").depth(), 1);
        assert_eq!(path("a/b/c").depth(), 3);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!("".parse::<Path>(), Err(PathParseError::Empty));
        assert_eq!("a//b".parse::<Path>(), Err(PathParseError::EmptyName));
        assert_eq!("/a".parse::<Path>(), Err(PathParseError::EmptyName));
        assert!(matches!(
            Name::new("a/b"),
            Err(PathParseError::InvalidName(_))
        ));
    }

    #[test]
    fn prefix_is_strict() {
        assert!(path("a").is_prefix_of(&path("a/b")));
        assert!(path("a/b").is_prefix_of(&path("a/b/c")));
        assert!(!path("a").is_prefix_of(&path("a")));
        assert!(!path("a/b").is_prefix_of(&path("a")));
        assert!(!path("a").is_prefix_of(&path("ab")));
    }

    #[test]
    fn ordered_is_symmetric() {
        assert!(path("a").ordered_with(&path("a/b")));
        assert!(path("a/b").ordered_with(&path("a")));
        assert!(!path("a").ordered_with(&path("b")));
        assert!(!path("a/b").ordered_with(&path("a/c")));
        assert!(!path("a").ordered_with(&path("a")));
    }

    #[test]
    fn parent_and_prefixes() {
        assert_eq!(path("a/b/c").parent(), Some(path("a/b")));
        assert_eq!(path("a").parent(), None);
        let prefixes: Vec<_> = path("a/b/c").prefixes().collect();
        assert_eq!(prefixes, vec![path("a"), path("a/b")]);
    }

    #[test]
    fn paths_order_by_names() {
        // "a/b" < "ab" componentwise even though '/' would not sort that
        // way as a string; the interval-closure argument relies on this.
        assert!(path("a/b") < path("ab"));
        assert!(path("a") < path("a/b"));
        assert!(path("a/b") < path("b"));
    }
}
