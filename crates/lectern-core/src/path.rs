//! Hierarchical path type backing the `groups.path` ltree column.
//!
//! A [`HierarchyPath`] is a dot-delimited ancestor chain such as
//! `district1.school2.math`. The value is opaque at this layer: construction
//! performs no label validation and no normalization, so whatever string goes
//! in comes back out of storage byte-for-byte. Callers that want label checks
//! use [`HierarchyPath::is_well_formed`].
//!
//! On the wire the path is bound as `TEXT` and cast in SQL (`$1::ltree`,
//! `path::text`), so the ltree operators (`<@`, `@>`, `~`, `nlevel`) run in
//! PostgreSQL while Rust only ever sees strings.

use serde::{Deserialize, Serialize};

/// Label separator used by ltree.
pub const SEPARATOR: char = '.';

/// Longest label every supported PostgreSQL release accepts.
pub const MAX_LABEL_LEN: usize = 255;

/// A dot-delimited ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct HierarchyPath(String);

impl HierarchyPath {
    /// Wrap a path string as-is.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Single-label root path.
    pub fn root(label: &str) -> Self {
        Self(label.to_string())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Labels from root to leaf. An empty path has no labels.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|l| !l.is_empty())
    }

    /// Number of labels, matching ltree's `nlevel`.
    pub fn depth(&self) -> usize {
        self.labels().count()
    }

    /// Path of the immediate parent, or `None` for a root or empty path.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(SEPARATOR)
            .map(|(head, _)| Self(head.to_string()))
    }

    /// Append a label.
    pub fn child(&self, label: &str) -> Self {
        if self.0.is_empty() {
            Self(label.to_string())
        } else {
            Self(format!("{}{}{}", self.0, SEPARATOR, label))
        }
    }

    /// `self @> other`: true when `self` is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &HierarchyPath) -> bool {
        let mine: Vec<&str> = self.labels().collect();
        let theirs: Vec<&str> = other.labels().collect();
        mine.len() <= theirs.len() && theirs[..mine.len()] == mine[..]
    }

    /// `self <@ other`: true when `self` is `other` or one of its descendants.
    pub fn is_descendant_of(&self, other: &HierarchyPath) -> bool {
        other.is_ancestor_of(self)
    }

    /// Every prefix of this path, root first, ending with the path itself.
    ///
    /// `a.b.c` yields `a`, `a.b`, `a.b.c`.
    pub fn ancestors(&self) -> Vec<HierarchyPath> {
        let mut out = Vec::with_capacity(self.depth());
        let mut acc = HierarchyPath::new(String::new());
        for label in self.labels() {
            acc = acc.child(label);
            out.push(acc.clone());
        }
        out
    }

    /// True when every label is non-empty and made of `[A-Za-z0-9_]`.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.split(SEPARATOR).all(|label| {
                !label.is_empty()
                    && label
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
            })
    }

    /// Turn a URL slug into an ltree label (`north-high` → `north_high`).
    pub fn label_from_slug(slug: &str) -> String {
        slug.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl std::fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HierarchyPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for HierarchyPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}
