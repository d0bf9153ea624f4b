//! Hierarchical, interned names.
//!
//! Value-equal names are reference-identical: a process-wide interning
//! table keyed by `(parent, segment)` is consulted on every construction,
//! so `PartialEq`/`Hash`/`depth` all become pointer operations afterward.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

struct NameInner {
    segment: Arc<str>,
    parent: Option<Name>,
    depth: usize,
}

/// An interned hierarchical identifier. Cheap to clone (one `Arc` bump);
/// equality and hashing are O(1) pointer operations once interned.
#[derive(Clone)]
pub struct Name(Arc<NameInner>);

type InternKey = (usize, Arc<str>);

static INTERN_TABLE: Lazy<DashMap<InternKey, Name>> = Lazy::new(DashMap::new);

fn parent_key(parent: &Option<Name>) -> usize {
    match parent {
        Some(n) => Arc::as_ptr(&n.0) as usize,
        None => 0,
    }
}

impl Name {
    /// Interns a single segment under an optional parent.
    fn intern(parent: Option<Name>, segment: &str) -> Result<Name, String> {
        if segment.is_empty() {
            return Err("name segment must not be empty".to_string());
        }
        if segment.contains('.') {
            return Err(format!(
                "name segment must not contain the separator '.': {segment:?}"
            ));
        }
        let key: InternKey = (parent_key(&parent), Arc::from(segment));
        let depth = parent.as_ref().map(|p| p.depth() + 1).unwrap_or(1);
        let entry = INTERN_TABLE.entry(key).or_insert_with(|| {
            Name(Arc::new(NameInner {
                segment: Arc::from(segment),
                parent,
                depth,
            }))
        });
        Ok(entry.clone())
    }

    /// Interns a single top-level segment.
    pub fn of(segment: &str) -> Result<Name, String> {
        Name::intern(None, segment)
    }

    /// Interns `segment` as a child of `self`.
    pub fn append(&self, segment: &str) -> Result<Name, String> {
        Name::intern(Some(self.clone()), segment)
    }

    /// Interns a name from an iterable of segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Name, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current: Option<Name> = None;
        for segment in segments {
            current = Some(Name::intern(current, segment.as_ref())?);
        }
        current.ok_or_else(|| "name requires at least one segment".to_string())
    }

    /// Parses a dotted path (`"a.b.c"`) left to right. Empty segments
    /// (`"a..b"`, leading/trailing dots) are an error.
    pub fn parse(path: &str) -> Result<Name, String> {
        Name::from_segments(path.split('.'))
    }

    /// The parent name, if any (the root-most names have none).
    pub fn enclosure(&self) -> Option<Name> {
        self.0.parent.clone()
    }

    /// Number of segments from the root to this name, inclusive. O(1).
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    /// The final segment of this name.
    pub fn segment(&self) -> &str {
        &self.0.segment
    }

    /// `true` iff `other` is a prefix of `self` (or `other == self`).
    pub fn within(&self, other: &Name) -> bool {
        if self == other {
            return true;
        }
        if self.depth() <= other.depth() {
            return false;
        }
        let mut cursor = self.enclosure();
        while let Some(n) = cursor {
            if &n == other {
                return true;
            }
            if n.depth() <= other.depth() {
                return false;
            }
            cursor = n.enclosure();
        }
        false
    }

    /// Segments from root to leaf.
    pub fn segments(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.depth());
        let mut stack = Vec::with_capacity(self.depth());
        let mut cursor = Some(self.clone());
        while let Some(n) = cursor {
            stack.push(n.segment().to_string());
            cursor = n.enclosure();
        }
        out.extend(stack.into_iter().rev());
        out
    }

    /// The dotted path representation.
    pub fn to_path(&self) -> String {
        self.segments().join(".")
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.to_path())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path())
    }
}

impl TryFrom<&str> for Name {
    type Error = String;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        Name::parse(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_paths_are_reference_identical() {
        let a = Name::parse("a.b.c").unwrap();
        let b = Name::parse("a.b.c").unwrap();
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn within_is_a_prefix_test() {
        let root = Name::parse("a").unwrap();
        let child = root.append("b").unwrap();
        assert!(child.within(&root));
        assert!(child.within(&child));
        assert!(!root.within(&child));
    }

    #[test]
    fn empty_segment_is_an_error() {
        assert!(Name::parse("a..b").is_err());
        assert!(Name::of("").is_err());
    }

    #[test]
    fn depth_and_path_roundtrip() {
        let n = Name::parse("x.y.z").unwrap();
        assert_eq!(n.depth(), 3);
        assert_eq!(n.to_path(), "x.y.z");
        assert_eq!(n.segments(), vec!["x", "y", "z"]);
    }
}
