//! Fluent read specification: predicate builders for equality, inequality,
//! range, set-membership, substring-like, and empty-set tests, compiled to
//! a closure run over a tree scan (§4.1).
//!
//! There is no query planner — predicates compile directly to a closure —
//! but the vocabulary matches the contract named in the storage spec.

use std::collections::BTreeSet;

#[derive(Clone)]
pub enum Predicate<T, V> {
    Eq(fn(&T) -> V, V),
    Neq(fn(&T) -> V, V),
    InSet(fn(&T) -> V, BTreeSet<V>),
    Range(fn(&T) -> V, Option<V>, Option<V>),
    Like(fn(&T) -> String, String),
    Empty(fn(&T) -> bool),
}

/// A composable, in-process filter specification over entity `T`.
pub struct Spec<T> {
    predicates: Vec<Box<dyn Fn(&T) -> bool + Send + Sync>>,
}

impl<T> Default for Spec<T> {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }
}

impl<T: 'static> Spec<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq<V: PartialEq + 'static>(mut self, f: impl Fn(&T) -> V + Send + Sync + 'static, v: V) -> Self {
        self.predicates.push(Box::new(move |t| f(t) == v));
        self
    }

    pub fn neq<V: PartialEq + 'static>(mut self, f: impl Fn(&T) -> V + Send + Sync + 'static, v: V) -> Self {
        self.predicates.push(Box::new(move |t| f(t) != v));
        self
    }

    pub fn in_set<V: PartialEq + 'static>(
        mut self,
        f: impl Fn(&T) -> V + Send + Sync + 'static,
        set: Vec<V>,
    ) -> Self {
        self.predicates
            .push(Box::new(move |t| set.iter().any(|v| *v == f(t))));
        self
    }

    pub fn range<V: PartialOrd + 'static>(
        mut self,
        f: impl Fn(&T) -> V + Send + Sync + 'static,
        min: Option<V>,
        max: Option<V>,
    ) -> Self {
        self.predicates.push(Box::new(move |t| {
            let v = f(t);
            min.as_ref().map(|m| v >= *m).unwrap_or(true) && max.as_ref().map(|m| v <= *m).unwrap_or(true)
        }));
        self
    }

    pub fn like(mut self, f: impl Fn(&T) -> String + Send + Sync + 'static, needle: String) -> Self {
        self.predicates
            .push(Box::new(move |t| f(t).to_lowercase().contains(&needle.to_lowercase())));
        self
    }

    pub fn is_empty(mut self, f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Box::new(f));
        self
    }

    /// Query-mode "all" (AND) vs "any" (OR) combination over a set of named
    /// tags/labels, per §4.2 listActions/listOutputs.
    pub fn tags_match(
        mut self,
        f: impl Fn(&T) -> BTreeSet<String> + Send + Sync + 'static,
        wanted: Vec<String>,
        match_all: bool,
    ) -> Self {
        self.predicates.push(Box::new(move |t| {
            let have = f(t);
            if match_all {
                wanted.iter().all(|w| have.contains(w))
            } else {
                wanted.iter().any(|w| have.contains(w))
            }
        }));
        self
    }

    pub fn matches(&self, item: &T) -> bool {
        self.predicates.iter().all(|p| p(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Row {
        status: u8,
        name: String,
    }

    #[test]
    fn eq_and_like_compose_with_and_semantics() {
        let spec = Spec::<Row>::new()
            .eq(|r| r.status, 1u8)
            .like(|r| r.name.clone(), "pay".to_string());
        let matching = Row { status: 1, name: "payment one".to_string() };
        let wrong_status = Row { status: 2, name: "payment two".to_string() };
        assert!(spec.matches(&matching));
        assert!(!spec.matches(&wrong_status));
    }
}
