//! Active tag set of a run.

use std::collections::BTreeSet;
use std::fmt;

/// The set of tags active for a run.
///
/// Tags select variants of a specification: sections, variable lines,
/// overrides and cluster file lines may be scoped to a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: BTreeSet<String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether a block declaring `declared` tags is admitted.
    ///
    /// A block without tags is always admitted, otherwise at least one of
    /// its tags must be active.
    pub fn admits<S: AsRef<str>>(&self, declared: &[S]) -> bool {
        declared.is_empty() || declared.iter().any(|t| self.contains(t.as_ref()))
    }

    /// Resolve a `tag` or `-tag` scope prefix.
    ///
    /// `-tag` is satisfied when `tag` is *not* active.
    pub fn satisfies_scope(&self, scope: &str) -> bool {
        match scope.strip_prefix('-') {
            Some(negated) => !self.contains(negated),
            None => self.contains(scope),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<_> = self.iter().collect();
        write!(f, "{{{}}}", tags.join(","))
    }
}
