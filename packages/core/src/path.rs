//! Escaped, slash-delimited paths.
//!
//! A [`Path`] addresses an element globally: the first segment names a root
//! collection in the [`Registry`](crate::Registry), every following segment
//! names a child of the collection before it. Names may contain any
//! character; `/` and `\` are escaped inside a segment so that a raw `/` in
//! the string form is always a separator.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors related to path parsing and navigation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// A backslash was followed by something other than `\` or `s`.
    #[error("invalid escape sequence '\\{sequence}' in segment '{segment}'")]
    InvalidEscape { segment: String, sequence: char },

    /// A segment ended with a lone backslash.
    #[error("dangling escape at end of segment '{segment}'")]
    DanglingEscape { segment: String },

    /// A relative path used `..` past the first segment.
    #[error("relative path '{relative}' climbs above the root from '{base}'")]
    AboveRoot { base: String, relative: String },
}

/// Escape a raw name into a single path segment.
///
/// `\` becomes `\\` and `/` becomes `\s`; nothing else changes.
pub fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\s"),
            c => out.push(c),
        }
    }
    out
}

/// Undo [`escape`] on a single segment.
pub fn unescape(segment: &str) -> Result<String, PathError> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('s') => out.push('/'),
            Some(other) => {
                return Err(PathError::InvalidEscape {
                    segment: segment.to_string(),
                    sequence: other,
                })
            }
            None => {
                return Err(PathError::DanglingEscape {
                    segment: segment.to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Unescape a segment that was validated when its path was built.
fn decode(segment: &str) -> String {
    unescape(segment).unwrap_or_else(|_| segment.to_string())
}

struct Inner {
    repr: String,
    parent: OnceLock<Path>,
    name: OnceLock<String>,
}

/// An immutable, escaped, slash-delimited element address.
///
/// Paths are cheap to clone. Derived paths (child, parent, sibling, relative)
/// are new values; the parent and the unescaped name are computed on first
/// use and remembered by the instance.
#[derive(Clone)]
pub struct Path {
    inner: Arc<Inner>,
}

impl Path {
    fn from_repr(repr: String) -> Self {
        Path {
            inner: Arc::new(Inner {
                repr,
                parent: OnceLock::new(),
                name: OnceLock::new(),
            }),
        }
    }

    /// The empty path: the ancestor of everything and the parent of roots.
    pub fn empty() -> Self {
        Self::from_repr(String::new())
    }

    /// Parse an escaped path string.
    ///
    /// Empty segments are dropped, so `/a//b/` and `a/b` are the same path.
    ///
    /// ```rust
    /// use arbor_core::Path;
    ///
    /// let path = Path::parse("docs/a\\sb").unwrap();
    /// assert_eq!(path.depth(), 2);
    /// assert_eq!(path.name(), "a/b");
    /// ```
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let mut segments = Vec::new();
        for segment in s.split('/').filter(|c| !c.is_empty()) {
            unescape(segment)?;
            segments.push(segment);
        }
        Ok(Self::from_repr(segments.join("/")))
    }

    /// A depth-one path naming a root collection.
    pub fn root(name: &str) -> Self {
        Self::empty().child(name)
    }

    /// Build a path from raw (unescaped) names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::empty().descend(names)
    }

    /// The escaped string form.
    pub fn as_str(&self) -> &str {
        &self.inner.repr
    }

    /// True for the empty path.
    pub fn is_empty(&self) -> bool {
        self.inner.repr.is_empty()
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.inner.repr.bytes().filter(|b| *b == b'/').count() + 1
        }
    }

    /// Escaped segments, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.repr.split('/').filter(|s| !s.is_empty())
    }

    /// Unescaped names, in order.
    pub fn components(&self) -> impl Iterator<Item = String> + '_ {
        self.segments().map(decode)
    }

    /// The unescaped last name, or `""` for the empty path.
    pub fn name(&self) -> &str {
        self.inner.name.get_or_init(|| match self.inner.repr.rfind('/') {
            Some(i) => decode(&self.inner.repr[i + 1..]),
            None => decode(&self.inner.repr),
        })
    }

    /// The name of the root collection this path starts at.
    pub fn root_name(&self) -> Option<String> {
        self.segments().next().map(decode)
    }

    /// The path without its last segment. The parent of a root (and of the
    /// empty path) is the empty path.
    pub fn parent(&self) -> Path {
        self.inner
            .parent
            .get_or_init(|| match self.inner.repr.rfind('/') {
                Some(i) => Self::from_repr(self.inner.repr[..i].to_string()),
                None => Self::empty(),
            })
            .clone()
    }

    /// Append one raw name. An empty name leaves the path unchanged.
    #[must_use]
    pub fn child(&self, name: &str) -> Path {
        if name.is_empty() {
            return self.clone();
        }
        let escaped = escape(name);
        let repr = if self.is_empty() {
            escaped
        } else {
            format!("{}/{}", self.inner.repr, escaped)
        };
        let child = Self::from_repr(repr);
        let _ = child.inner.parent.set(self.clone());
        let _ = child.inner.name.set(name.to_string());
        child
    }

    /// Append several raw names.
    #[must_use]
    pub fn descend<I, S>(&self, names: I) -> Path
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .fold(self.clone(), |path, name| path.child(name.as_ref()))
    }

    /// Same parent, different last name.
    #[must_use]
    pub fn sibling(&self, name: &str) -> Path {
        self.parent().child(name)
    }

    /// Join this path with another.
    #[must_use]
    pub fn join(&self, other: &Path) -> Path {
        match (self.is_empty(), other.is_empty()) {
            (_, true) => self.clone(),
            (true, false) => other.clone(),
            (false, false) => Self::from_repr(format!("{}/{}", self.inner.repr, other.inner.repr)),
        }
    }

    /// Navigate an escaped relative path string.
    ///
    /// `.` stays, `..` goes up one level, anything else descends. A leading
    /// `/` starts from the empty path instead of from `self`.
    pub fn relative(&self, relative: &str) -> Result<Path, PathError> {
        let mut segments: Vec<&str> = if relative.starts_with('/') {
            Vec::new()
        } else {
            self.segments().collect()
        };
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            match segment {
                "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PathError::AboveRoot {
                            base: self.to_string(),
                            relative: relative.to_string(),
                        });
                    }
                }
                other => {
                    unescape(other)?;
                    segments.push(other);
                }
            }
        }
        Ok(Self::from_repr(segments.join("/")))
    }

    /// Component-wise strict prefix test. Every path, the empty one included,
    /// descends from the empty path.
    pub fn is_descendant_of(&self, ancestor: &Path) -> bool {
        if ancestor.is_empty() {
            return true;
        }
        let (repr, prefix) = (self.as_str(), ancestor.as_str());
        repr.len() > prefix.len()
            && repr.starts_with(prefix)
            && repr.as_bytes()[prefix.len()] == b'/'
    }

    pub fn is_ancestor_of(&self, descendant: &Path) -> bool {
        descendant.is_descendant_of(self)
    }

    /// Longest shared leading run of segments.
    #[must_use]
    pub fn common_prefix(&self, other: &Path) -> Path {
        let shared: Vec<&str> = self
            .segments()
            .zip(other.segments())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect();
        Self::from_repr(shared.join("/"))
    }

    /// Strip a prefix from this path.
    ///
    /// Returns `None` if the prefix doesn't match.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        if prefix.is_empty() {
            Some(self.clone())
        } else if self == prefix {
            Some(Self::empty())
        } else if self.is_descendant_of(prefix) {
            Some(Self::from_repr(
                self.as_str()[prefix.as_str().len() + 1..].to_string(),
            ))
        } else {
            None
        }
    }

    /// First free variant of this path: the path itself, or the same name
    /// with ` (n)` appended for the smallest `n` that `exists` rejects.
    ///
    /// Probing and creation are separate steps, so two callers racing on the
    /// same name may both be handed the same result.
    #[must_use]
    pub fn uniq_with(&self, mut exists: impl FnMut(&Path) -> bool) -> Path {
        if !exists(self) {
            return self.clone();
        }
        let base = self.name().to_string();
        (1..)
            .map(|n| self.sibling(&format!("{} ({})", base, n)))
            .find(|candidate| !exists(candidate))
            .unwrap_or_else(|| self.clone())
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.inner.repr == other.inner.repr
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.repr.hash(state);
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments().cmp(other.segments())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.repr)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({:?})", self.inner.repr)
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D>(deserializer: D) -> Result<Path, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Path::parse(&s).map_err(D::Error::custom)
    }
}

/// Macro for creating paths from escaped literals.
///
/// # Example
///
/// ```rust
/// use arbor_core::path;
///
/// let p = path!("users/alice");
/// assert_eq!(p.depth(), 2);
/// ```
#[macro_export]
macro_rules! path {
    ($s:expr) => {
        $crate::Path::parse($s).expect("invalid path literal")
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_basic_paths() {
        assert_eq!(Path::parse("").unwrap().depth(), 0);
        assert_eq!(Path::parse("foo").unwrap().depth(), 1);
        assert_eq!(Path::parse("foo/bar").unwrap().depth(), 2);
        assert_eq!(Path::parse("foo/bar/baz").unwrap().depth(), 3);
    }

    #[test]
    fn normalize_slashes() {
        assert_eq!(path!("foo/bar/"), path!("foo/bar"));
        assert_eq!(path!("foo//bar"), path!("foo/bar"));
        assert_eq!(path!("/foo/bar"), path!("foo/bar"));
    }

    #[test]
    fn escaping_keeps_separators_unambiguous() {
        let p = Path::root("a/b").child("c\\d");
        assert_eq!(p.as_str(), "a\\sb/c\\\\d");
        assert_eq!(p.depth(), 2);
        let names: Vec<String> = p.components().collect();
        assert_eq!(names, vec!["a/b".to_string(), "c\\d".to_string()]);
        assert_eq!(Path::parse(p.as_str()).unwrap(), p);
    }

    #[test]
    fn invalid_escapes_rejected() {
        assert!(matches!(
            Path::parse("a\\x"),
            Err(PathError::InvalidEscape { sequence: 'x', .. })
        ));
        assert!(matches!(
            Path::parse("a\\"),
            Err(PathError::DanglingEscape { .. })
        ));
    }

    #[test]
    fn parent_and_name() {
        let p = path!("a/b/c");
        assert_eq!(p.parent(), path!("a/b"));
        assert_eq!(p.name(), "c");
        assert_eq!(path!("a").parent(), Path::empty());
        assert_eq!(Path::empty().parent(), Path::empty());
        assert_eq!(Path::empty().name(), "");
    }

    #[test]
    fn sibling_replaces_last_name() {
        assert_eq!(path!("a/b").sibling("c"), path!("a/c"));
        assert_eq!(path!("a").sibling("z"), path!("z"));
    }

    #[test]
    fn relative_navigation() {
        let base = path!("a/b/c");
        assert_eq!(base.relative("..").unwrap(), path!("a/b"));
        assert_eq!(base.relative("../d").unwrap(), path!("a/b/d"));
        assert_eq!(base.relative("./e/./f").unwrap(), path!("a/b/c/e/f"));
        assert_eq!(base.relative("/x/y").unwrap(), path!("x/y"));
        assert!(matches!(
            base.relative("../../../.."),
            Err(PathError::AboveRoot { .. })
        ));
    }

    #[test]
    fn descendant_and_ancestor() {
        let p = path!("foo/bar/baz");
        assert!(p.is_descendant_of(&path!("foo")));
        assert!(p.is_descendant_of(&path!("foo/bar")));
        assert!(!p.is_descendant_of(&p));
        assert!(!path!("foobar").is_descendant_of(&path!("foo")));
        assert!(path!("foo").is_ancestor_of(&p));
        assert!(Path::empty().is_descendant_of(&Path::empty()));
    }

    #[test]
    fn common_prefix_works() {
        assert_eq!(path!("a/b/c").common_prefix(&path!("a/b/d")), path!("a/b"));
        assert_eq!(path!("a/b").common_prefix(&path!("x")), Path::empty());
    }

    #[test]
    fn strip_prefix_works() {
        let p = path!("foo/bar/baz");
        assert_eq!(p.strip_prefix(&path!("foo")), Some(path!("bar/baz")));
        assert_eq!(p.strip_prefix(&p), Some(Path::empty()));
        assert_eq!(p.strip_prefix(&path!("other")), None);
    }

    #[test]
    fn join_with_empty() {
        let p1 = path!("foo");
        assert_eq!(p1.join(&Path::empty()), p1);
        assert_eq!(Path::empty().join(&path!("bar")), path!("bar"));
        assert_eq!(p1.join(&path!("bar/baz")), path!("foo/bar/baz"));
    }

    #[test]
    fn uniq_appends_counter() {
        let taken = [path!("r/doc"), path!("r/doc (1)")];
        let free = path!("r/doc").uniq_with(|p| taken.contains(p));
        assert_eq!(free, Path::root("r").child("doc (2)"));

        let untouched = path!("r/other").uniq_with(|p| taken.contains(p));
        assert_eq!(untouched, path!("r/other"));
    }

    #[test]
    fn ordering_is_component_wise() {
        assert!(path!("a/b") < path!("a/c"));
        assert!(path!("a") < path!("a/b"));
        assert!(path!("a/z") < path!("a0"));
    }

    #[test]
    fn serde_as_string() {
        let p = Path::root("x/y").child("z");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"x\\\\sy/z\"");
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    proptest! {
        #[test]
        fn escape_round_trips(name in ".*") {
            prop_assert_eq!(unescape(&escape(&name)).unwrap(), name);
        }

        #[test]
        fn child_then_parent_is_identity(
            names in proptest::collection::vec("[^\\x00]{1,8}", 0..5),
            leaf in ".{1,8}",
        ) {
            let p = Path::from_names(&names);
            prop_assert_eq!(p.child(&leaf).parent(), p);
        }

        #[test]
        fn everything_descends_from_empty(names in proptest::collection::vec(".{1,8}", 0..5)) {
            prop_assert!(Path::from_names(&names).is_descendant_of(&Path::empty()));
        }
    }
}
